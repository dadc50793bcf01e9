//! The Tokio-based, async stdio runtime.

use std::{
    io,
    pin::Pin,
    sync::Arc,
    task::{ready, Context, Poll},
};

use log::{debug, trace};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::stdio::{Sink, Source, WriteCallback};

use super::pipe::{Pusher, ReadPipe, WritePipe, BUFFER_ENCODING};

/// Async reader over a [`Source`].
///
/// Polling an empty reader demands more bytes from the source. The
/// task is woken up when the peer dispatcher pushes bytes through
/// the [`Pusher`] returned by [`Reader::pusher`].
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
        debug!("create async reader with {capacity} capacity");
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

impl<S: Source + Unpin> AsyncRead for Reader<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.eof || buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        loop {
            let mut state = this.pipe.lock();

            if let Some(n) = state.take(buf.initialize_unfilled()) {
                drop(state);

                if n == 0 {
                    trace!("reached end of stream");
                    this.eof = true;
                    this.source.ended();
                } else {
                    buf.advance(n);
                }

                return Poll::Ready(Ok(()));
            }

            state.register(cx.waker());

            if !state.demand() {
                trace!("wait for pushed bytes");
                return Poll::Pending;
            }

            drop(state);
            this.source.demand_data();
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

/// Async writer over a [`Sink`].
///
/// Writes stay pending while [`Writer::high_water_mark`] writes are
/// waiting for the peer acknowledgment. Shutting down the writer
/// waits for every acknowledgment, then ends the stream.
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
        debug!("create async writer with high water mark {high_water_mark}");

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

    fn poll_drained(&self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut state = self.pipe.lock();

        if let Some(err) = state.error.clone() {
            return Poll::Ready(Err(err.into()));
        }

        if state.in_flight > 0 {
            trace!("wait for {} writes to be acknowledged", state.in_flight);
            state.register(cx.waker());
            return Poll::Pending;
        }

        Poll::Ready(Ok(()))
    }
}

impl<S: Sink + Unpin> AsyncWrite for Writer<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        if this.finished {
            let err = io::Error::new(io::ErrorKind::BrokenPipe, "write after end");
            return Poll::Ready(Err(err));
        }

        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let mut state = this.pipe.lock();

        if let Some(err) = state.error.clone() {
            return Poll::Ready(Err(err.into()));
        }

        if state.in_flight >= this.high_water_mark {
            trace!("wait for {} writes to be acknowledged", state.in_flight);
            state.register(cx.waker());
            return Poll::Pending;
        }

        state.in_flight += 1;
        drop(state);

        let pipe = this.pipe.clone();
        let cb: WriteCallback = Box::new(move |res| pipe.complete(res));
        this.sink.accept_write(buf.to_vec(), Some(BUFFER_ENCODING.into()), cb);

        // the sink may have rejected the write synchronously
        if let Some(err) = this.pipe.lock().error.clone() {
            return Poll::Ready(Err(err.into()));
        }

        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.poll_drained(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.finished {
            return Poll::Ready(Ok(()));
        }

        ready!(this.poll_drained(cx))?;
        this.finished = true;

        let pipe = this.pipe.clone();
        let cb: WriteCallback = Box::new(move |res| {
            if let Err(err) = res {
                pipe.lock().error.get_or_insert(err);
            }
        });

        this.sink.finalize(cb);

        Poll::Ready(Ok(()))
    }
}

impl<S: Sink> Drop for Writer<S> {
    fn drop(&mut self) {
        if !self.finished {
            self.sink.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{io, sync::Arc, time::Duration};

    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        time::timeout,
    };

    use crate::{
        packet::Packet,
        port::{
            testing::{FeedingPort, RecordingPort},
            Channel,
        },
        stdio::{null::NullWritable, readable::Readable, writable::Writable, Sink},
    };

    use super::{Reader, Writer};

    #[tokio::test]
    async fn read_to_end() {
        let _ = env_logger::try_init();

        let channel = Arc::new(Channel::new(FeedingPort::new(["hello ", "world"])));
        let stdout = Arc::new(Readable::with_keep_alive(channel.clone(), 1));

        let mut reader = Reader::new(stdout.clone());
        channel.port().attach(reader.pusher());

        let mut output = String::new();
        reader.read_to_string(&mut output).await.unwrap();

        assert_eq!(output, "hello world");
        assert!(stdout.is_ended());
        assert_eq!(channel.pending_ops(), 0);
        assert_eq!(channel.port().recorder.refs(), 1);
        assert_eq!(channel.port().recorder.unrefs(), 1);
    }

    #[tokio::test]
    async fn wake_on_push() {
        let _ = env_logger::try_init();

        let channel = Arc::new(Channel::new(RecordingPort::default()));
        let stderr = Arc::new(Readable::new(channel.clone(), 2));

        let mut reader = Reader::new(stderr.clone());
        let pusher = reader.pusher();

        let task = tokio::spawn(async move {
            let mut output = Vec::new();
            reader.read_to_end(&mut output).await.unwrap();
            output
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        pusher.push(b"late");
        pusher.end();

        assert_eq!(task.await.unwrap(), b"late");
        assert!(stderr.is_ended());
        assert_eq!(channel.port().refs(), 0);
        assert_eq!(channel.port().unrefs(), 0);
        assert!(!channel.port().sent().is_empty());
    }

    #[tokio::test]
    async fn write_with_backpressure() {
        let _ = env_logger::try_init();

        let channel = Arc::new(Channel::new(RecordingPort::default()));
        let stdout = Arc::new(Writable::new(channel.clone(), 1));

        let mut writer = Writer::with_high_water_mark(stdout.clone(), 2);
        writer.write_all(b"a").await.unwrap();
        writer.write_all(b"b").await.unwrap();

        let blocked = timeout(Duration::from_millis(20), writer.write_all(b"c")).await;
        assert!(blocked.is_err());
        assert_eq!(stdout.pending_writes(), 2);
        assert_eq!(channel.pending_ops(), 2);

        stdout.flush(2);
        assert_eq!(channel.pending_ops(), 0);
        assert_eq!(channel.port().unrefs(), 1);

        writer.write_all(b"c").await.unwrap();
        assert_eq!(writer.in_flight(), 1);

        let shutdown = timeout(Duration::from_millis(20), writer.shutdown()).await;
        assert!(shutdown.is_err());
        assert!(!stdout.is_finished());

        stdout.more_data();
        writer.shutdown().await.unwrap();
        assert!(stdout.is_finished());

        let sent = channel.port().sent();
        assert_eq!(sent.len(), 4);
        assert_eq!(sent[3], Packet::end_of_stream(1));
        assert_eq!(channel.port().refs(), 2);
        assert_eq!(channel.port().unrefs(), 2);

        assert!(writer.write_all(b"d").await.is_err());
    }

    #[tokio::test]
    async fn write_rejected_by_sink() {
        let _ = env_logger::try_init();

        let channel = Arc::new(Channel::new(RecordingPort::default()));
        let stderr = Arc::new(Writable::new(channel.clone(), 2));

        let mut writer = Writer::new(stderr.clone());
        stderr.destroy();

        let err = writer.write(b"late").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(writer.in_flight(), 0);
        assert_eq!(channel.pending_ops(), 0);
        assert!(channel.port().sent().is_empty());
    }

    #[tokio::test]
    async fn write_to_null() {
        let _ = env_logger::try_init();

        let mut writer = Writer::with_high_water_mark(NullWritable, 1);

        for _ in 0..10 {
            writer.write_all(b"discarded").await.unwrap();
        }

        writer.shutdown().await.unwrap();
        assert_eq!(writer.in_flight(), 0);
    }
}
