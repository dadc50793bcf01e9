//! Readable stdio stream, pulling bytes from the peer.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, trace};

use crate::{
    packet::{Fd, Packet},
    port::{Channel, Port},
};

use super::Source;

/// Stream asking the peer for bytes of one of its descriptors.
///
/// Every demand emits a read request. Received bytes do not come
/// back through this stream: the peer dispatcher pushes them into
/// whatever buffers the consumer side (see [`Pusher`]).
///
/// A stream created with [`Readable::with_keep_alive`] holds one
/// pending operation on the channel from its first demand until it
/// ends, however many read requests it sends in between.
///
/// [`Pusher`]: crate::runtimes::pipe::Pusher
#[derive(Debug)]
pub struct Readable<P: Port> {
    channel: Arc<Channel<P>>,
    fd: Fd,
    keep_alive: bool,
    lifecycle: Mutex<Lifecycle>,
}

#[derive(Debug, Default)]
struct Lifecycle {
    started: bool,
    ended: bool,
}

impl<P: Port> Readable<P> {
    /// Creates a readable stream that never keeps the process alive.
    pub fn new(channel: Arc<Channel<P>>, fd: Fd) -> Self {
        Self::with_options(channel, fd, false)
    }

    /// Creates a readable stream that keeps the process alive while
    /// it is being read.
    pub fn with_keep_alive(channel: Arc<Channel<P>>, fd: Fd) -> Self {
        Self::with_options(channel, fd, true)
    }

    fn with_options(channel: Arc<Channel<P>>, fd: Fd, keep_alive: bool) -> Self {
        trace!("init readable stream for fd {fd} (keep alive: {keep_alive})");

        Self {
            channel,
            fd,
            keep_alive,
            lifecycle: Mutex::default(),
        }
    }

    pub fn fd(&self) -> Fd {
        self.fd
    }

    pub fn participates(&self) -> bool {
        self.keep_alive
    }

    pub fn is_started(&self) -> bool {
        self.lock().started
    }

    pub fn is_ended(&self) -> bool {
        self.lock().ended
    }

    fn terminate(&self, reason: &str) {
        let mut lifecycle = self.lock();

        if lifecycle.ended {
            return;
        }

        lifecycle.ended = true;
        debug!("readable stream for fd {} {reason}", self.fd);

        if self.keep_alive && lifecycle.started {
            self.channel.release(1);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<P: Port> Source for Readable<P> {
    fn demand_data(&self) {
        if self.keep_alive {
            let mut lifecycle = self.lock();

            // an ended stream can no longer release what it acquires
            if !lifecycle.started && !lifecycle.ended {
                lifecycle.started = true;
                debug!("readable stream for fd {} started", self.fd);
                self.channel.acquire(1);
            }
        }

        self.channel.send(Packet::read_request(self.fd));
    }

    fn ended(&self) {
        self.terminate("ended")
    }

    fn destroy(&self) {
        self.terminate("destroyed")
    }
}
