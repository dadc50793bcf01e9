//! Shared state between stream runtimes and the peer dispatcher.
//!
//! The dispatcher never touches a runtime reader directly: it feeds
//! received bytes through a [`Pusher`]. Writers track their
//! unacknowledged writes in a [`WritePipe`], updated by the write
//! callbacks once the peer flushed them.

use std::{
    collections::VecDeque,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    task::Waker,
};

use log::{debug, trace};

use crate::error::StdioError;

/// The encoding name given to raw bytes.
pub const BUFFER_ENCODING: &str = "buffer";

/// Bytes received from the peer, waiting to be read.
#[derive(Debug, Default)]
pub struct ReadPipe {
    state: Mutex<ReadState>,
    ready: Condvar,
}

#[derive(Debug, Default)]
pub(crate) struct ReadState {
    buffer: VecDeque<u8>,
    ended: bool,
    demanded: bool,
    waker: Option<Waker>,
}

impl ReadState {
    /// Moves buffered bytes into the given buffer.
    ///
    /// Returns `Some(0)` once the end marker has been received and
    /// every byte consumed, `None` when there is nothing to read yet.
    pub(crate) fn take(&mut self, buf: &mut [u8]) -> Option<usize> {
        if !self.buffer.is_empty() {
            let n = buf.len().min(self.buffer.len());

            for (dst, src) in buf.iter_mut().zip(self.buffer.drain(..n)) {
                *dst = src;
            }

            return Some(n);
        }

        if self.ended {
            return Some(0);
        }

        None
    }

    /// Marks more bytes as demanded.
    ///
    /// Returns `false` if a demand is already waiting for the peer.
    pub(crate) fn demand(&mut self) -> bool {
        !std::mem::replace(&mut self.demanded, true)
    }

    #[cfg(feature = "tokio")]
    pub(crate) fn register(&mut self, waker: &Waker) {
        match &self.waker {
            Some(prev) if prev.will_wake(waker) => (),
            _ => self.waker = Some(waker.clone()),
        }
    }
}

impl ReadPipe {
    pub fn with_capacity(capacity: usize) -> Self {
        let state = ReadState {
            buffer: VecDeque::with_capacity(capacity),
            ..Default::default()
        };

        Self {
            state: Mutex::new(state),
            ready: Condvar::new(),
        }
    }

    /// Returns the amount of buffered bytes.
    pub fn len(&self) -> usize {
        self.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ReadState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(feature = "std")]
    pub(crate) fn wait<'a>(&self, guard: MutexGuard<'a, ReadState>) -> MutexGuard<'a, ReadState> {
        self.ready
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, mut state: MutexGuard<'_, ReadState>) {
        let waker = state.waker.take();
        drop(state);

        self.ready.notify_all();

        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

/// Handle used by the peer dispatcher to feed a reader.
#[derive(Clone, Debug)]
pub struct Pusher {
    pipe: Arc<ReadPipe>,
}

impl Pusher {
    pub(crate) fn new(pipe: Arc<ReadPipe>) -> Self {
        Self { pipe }
    }

    /// Pushes bytes received from the peer.
    pub fn push(&self, bytes: impl AsRef<[u8]>) {
        let bytes = bytes.as_ref();

        if bytes.is_empty() {
            return;
        }

        let mut state = self.pipe.lock();

        if state.ended {
            debug!("discard {} bytes pushed after end", bytes.len());
            return;
        }

        trace!("push {} bytes", bytes.len());
        state.buffer.extend(bytes);
        state.demanded = false;
        self.pipe.notify(state);
    }

    /// Marks the end of the descriptor, nothing more will be pushed.
    pub fn end(&self) {
        let mut state = self.pipe.lock();

        if state.ended {
            return;
        }

        trace!("push end marker");
        state.ended = true;
        self.pipe.notify(state);
    }
}

/// Writes handed to a sink, waiting for the peer acknowledgment.
#[derive(Debug, Default)]
pub struct WritePipe {
    state: Mutex<WriteState>,
    drained: Condvar,
}

#[derive(Debug, Default)]
pub(crate) struct WriteState {
    pub(crate) in_flight: usize,
    pub(crate) error: Option<StdioError>,
    waker: Option<Waker>,
}

impl WriteState {
    #[cfg(feature = "tokio")]
    pub(crate) fn register(&mut self, waker: &Waker) {
        match &self.waker {
            Some(prev) if prev.will_wake(waker) => (),
            _ => self.waker = Some(waker.clone()),
        }
    }
}

impl WritePipe {
    /// Returns the amount of writes not acknowledged yet.
    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, WriteState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(feature = "std")]
    pub(crate) fn wait<'a>(
        &self,
        guard: MutexGuard<'a, WriteState>,
    ) -> MutexGuard<'a, WriteState> {
        self.drained
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolves one write.
    pub(crate) fn complete(&self, result: Result<(), StdioError>) {
        let mut state = self.lock();
        state.in_flight = state.in_flight.saturating_sub(1);

        if let Err(err) = result {
            debug!("write failed: {err}");
            state.error.get_or_insert(err);
        }

        let waker = state.waker.take();
        drop(state);

        self.drained.notify_all();

        if let Some(waker) = waker {
            waker.wake();
        }
    }
}
