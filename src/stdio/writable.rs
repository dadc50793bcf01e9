//! Writable stdio stream, pushing bytes to the peer.

use std::{
    collections::VecDeque,
    mem,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use log::{debug, trace, warn};

use crate::{
    error::StdioError,
    packet::{Fd, Packet},
    port::{Channel, Port},
};

use super::{Sink, WriteCallback};

/// Stream sending write requests to the peer for one of its
/// descriptors.
///
/// Writes are not resolved locally: their callbacks are queued until
/// the peer acknowledges them through [`Writable::flush`] or
/// [`Writable::more_data`]. Every unacknowledged write holds one
/// pending operation on the channel.
#[derive(Debug)]
pub struct Writable<P: Port> {
    channel: Arc<Channel<P>>,
    fd: Fd,
    callbacks: Mutex<Callbacks>,
    /// Guards the order of packets: nothing is sent after the
    /// end-of-stream sentinel.
    finished: Mutex<bool>,
}

/// FIFO queue of write callbacks.
#[derive(Default)]
struct Callbacks(VecDeque<WriteCallback>);

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Callbacks({})", self.0.len())
    }
}

impl<P: Port> Writable<P> {
    pub fn new(channel: Arc<Channel<P>>, fd: Fd) -> Self {
        trace!("init writable stream for fd {fd}");

        Self {
            channel,
            fd,
            callbacks: Mutex::default(),
            finished: Mutex::new(false),
        }
    }

    pub fn fd(&self) -> Fd {
        self.fd
    }

    /// Returns the amount of writes waiting for an acknowledgment.
    pub fn pending_writes(&self) -> usize {
        self.lock().0.len()
    }

    /// Returns `true` once the stream has been finalized or
    /// destroyed.
    pub fn is_finished(&self) -> bool {
        *self.lock_finished()
    }

    /// Resolves the `acknowledged` oldest pending writes.
    ///
    /// Callbacks are invoked in write order.
    pub fn flush(&self, acknowledged: usize) {
        let callbacks: VecDeque<_> = {
            let mut callbacks = self.lock();
            let n = acknowledged.min(callbacks.0.len());

            if n < acknowledged {
                debug!("fd {}: {acknowledged} writes acknowledged, {n} pending", self.fd);
            }

            callbacks.0.drain(..n).collect()
        };

        self.resolve(callbacks, Ok(()))
    }

    /// Resolves all pending writes at once.
    pub fn more_data(&self) {
        let callbacks = mem::take(&mut self.lock().0);
        self.resolve(callbacks, Ok(()))
    }

    fn resolve(&self, callbacks: VecDeque<WriteCallback>, result: Result<(), StdioError>) {
        let n = callbacks.len();

        if n == 0 {
            return;
        }

        debug!("fd {}: resolve {n} write(s)", self.fd);

        for cb in callbacks {
            cb(result.clone());
        }

        self.channel.release(n);
    }

    fn lock(&self) -> MutexGuard<'_, Callbacks> {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_finished(&self) -> MutexGuard<'_, bool> {
        self.finished
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<P: Port> Sink for Writable<P> {
    fn accept_write(&self, data: Vec<u8>, encoding: Option<String>, cb: WriteCallback) {
        let finished = self.lock_finished();

        if *finished {
            drop(finished);
            warn!("fd {}: write after end, discard {} bytes", self.fd, data.len());
            return cb(Err(StdioError::WriteAfterEnd(self.fd)));
        }

        // the write must be pending before the peer can acknowledge it
        {
            let mut callbacks = self.lock();
            callbacks.0.push_back(cb);
            self.channel.acquire(1);
        }

        trace!("fd {}: write {} bytes", self.fd, data.len());
        self.channel.send(Packet::write_request(self.fd, data, encoding));
        drop(finished);
    }

    fn finalize(&self, cb: WriteCallback) {
        let mut finished = self.lock_finished();

        if !*finished {
            *finished = true;
            debug!("fd {}: end of stream", self.fd);
            self.channel.send(Packet::end_of_stream(self.fd));
        }

        drop(finished);
        cb(Ok(()))
    }

    fn destroy(&self) {
        *self.lock_finished() = true;

        let callbacks = mem::take(&mut self.lock().0);

        if !callbacks.is_empty() {
            warn!("fd {}: destroyed with {} pending write(s)", self.fd, callbacks.len());
        }

        self.resolve(callbacks, Err(StdioError::Destroyed(self.fd)))
    }
}
