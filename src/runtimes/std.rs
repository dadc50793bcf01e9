//! The standard, blocking stdio runtime.

use std::{
    io::{self, Read, Write},
    sync::Arc,
};

use log::{debug, trace};

use crate::stdio::{Sink, Source, WriteCallback};

use super::pipe::{Pusher, ReadPipe, WritePipe, BUFFER_ENCODING};

/// Blocking reader over a [`Source`].
///
/// Reading from an empty buffer demands more bytes from the source,
/// then blocks until the peer dispatcher pushes some through the
/// [`Pusher`] returned by [`Reader::pusher`].
#[derive(Debug)]
pub struct Reader<S: Source> {
    source: S,
    pipe: Arc<ReadPipe>,
    eof: bool,
}

impl<S: Source> Reader<S> {
    /// The default read buffer capacity.
    pub const DEFAULT_CAPACITY: usize = 8 * 1024;

    pub fn new(source: S) -> Self {
        Self::with_capacity(source, Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(source: S, capacity: usize) -> Self {
        debug!("create blocking reader with {capacity} capacity");
        let pipe = Arc::new(ReadPipe::with_capacity(capacity));

        Self {
            source,
            pipe,
            eof: false,
        }
    }

    /// Returns a handle to feed this reader.
    pub fn pusher(&self) -> Pusher {
        Pusher::new(self.pipe.clone())
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

impl<S: Source> Read for Reader<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.eof || buf.is_empty() {
            return Ok(0);
        }

        let mut state = self.pipe.lock();

        loop {
            if let Some(n) = state.take(buf) {
                drop(state);

                if n == 0 {
                    trace!("reached end of stream");
                    self.eof = true;
                    self.source.ended();
                }

                return Ok(n);
            }

            if state.demand() {
                drop(state);
                self.source.demand_data();
                state = self.pipe.lock();
                continue;
            }

            trace!("wait for pushed bytes");
            state = self.pipe.wait(state);
        }
    }
}

impl<S: Source> Drop for Reader<S> {
    fn drop(&mut self) {
        if !self.eof {
            self.source.destroy();
        }
    }
}

/// Blocking writer over a [`Sink`].
///
/// Writes block while [`Writer::high_water_mark`] writes are waiting
/// for the peer acknowledgment.
#[derive(Debug)]
pub struct Writer<S: Sink> {
    sink: S,
    pipe: Arc<WritePipe>,
    high_water_mark: usize,
    finished: bool,
}

impl<S: Sink> Writer<S> {
    /// The default amount of unacknowledged writes.
    pub const DEFAULT_HIGH_WATER_MARK: usize = 16;

    pub fn new(sink: S) -> Self {
        Self::with_high_water_mark(sink, Self::DEFAULT_HIGH_WATER_MARK)
    }

    pub fn with_high_water_mark(sink: S, high_water_mark: usize) -> Self {
        debug!("create blocking writer with high water mark {high_water_mark}");

        Self {
            sink,
            pipe: Arc::default(),
            high_water_mark: high_water_mark.max(1),
            finished: false,
        }
    }

    pub fn high_water_mark(&self) -> usize {
        self.high_water_mark
    }

    /// Returns the amount of writes not acknowledged yet.
    pub fn in_flight(&self) -> usize {
        self.pipe.in_flight()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Waits for every write to be acknowledged, then ends the
    /// stream.
    pub fn finish(&mut self) -> io::Result<()> {
        if self.finished {
            return Ok(());
        }

        self.flush()?;
        self.finished = true;

        let pipe = self.pipe.clone();
        let cb: WriteCallback = Box::new(move |res| {
            if let Err(err) = res {
                pipe.lock().error.get_or_insert(err);
            }
        });

        self.sink.finalize(cb);

        Ok(())
    }
}

impl<S: Sink> Write for Writer<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.finished {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "write after end"));
        }

        if buf.is_empty() {
            return Ok(0);
        }

        let mut state = self.pipe.lock();

        while state.in_flight >= self.high_water_mark && state.error.is_none() {
            trace!("wait for {} writes to be acknowledged", state.in_flight);
            state = self.pipe.wait(state);
        }

        if let Some(err) = state.error.clone() {
            return Err(err.into());
        }

        state.in_flight += 1;
        drop(state);

        let pipe = self.pipe.clone();
        let cb: WriteCallback = Box::new(move |res| pipe.complete(res));
        self.sink.accept_write(buf.to_vec(), Some(BUFFER_ENCODING.into()), cb);

        // the sink may have rejected the write synchronously
        if let Some(err) = self.pipe.lock().error.clone() {
            return Err(err.into());
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut state = self.pipe.lock();

        while state.in_flight > 0 && state.error.is_none() {
            state = self.pipe.wait(state);
        }

        match state.error.clone() {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}

impl<S: Sink> Drop for Writer<S> {
    fn drop(&mut self) {
        if !self.finished {
            self.sink.destroy();
        }
    }
}
