//! The port abstraction and its keep-alive counter.
//!
//! A [`Port`] transports packets to the peer and decides whether the
//! host process may exit. Streams never talk to the port directly:
//! they go through a [`Channel`], which owns the port together with
//! the counter of pending operations shared by every stream.

use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, trace, warn};

use crate::packet::Packet;

/// The transport side of a channel.
///
/// Implementations must tolerate repeated calls of
/// [`Port::ref_handle`] and [`Port::unref_handle`]: the [`Channel`]
/// only guarantees that they are called on counter transitions.
pub trait Port: Send + Sync {
    /// Enqueues the given packet for the peer.
    fn send(&self, packet: Packet);

    /// Tells the host process to stay alive.
    fn ref_handle(&self);

    /// Tells the host process it may exit if nothing else holds it.
    fn unref_handle(&self);
}

/// A port shared by stdio streams.
///
/// The channel counts operations that have been sent but not yet
/// resolved. The port is referenced when the count leaves zero and
/// unreferenced when it comes back to zero.
#[derive(Debug)]
pub struct Channel<P: Port> {
    port: P,
    pending_ops: Mutex<usize>,
}

impl<P: Port> Channel<P> {
    pub fn new(port: P) -> Self {
        Self {
            port,
            pending_ops: Mutex::new(0),
        }
    }

    /// Returns a reference to the inner port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Returns the current amount of pending operations.
    pub fn pending_ops(&self) -> usize {
        *self.lock()
    }

    /// Sends the given packet through the port.
    pub fn send(&self, packet: Packet) {
        trace!("send {:?} packet for fd {}", packet.kind, packet.fd());
        self.port.send(packet)
    }

    /// Registers `n` new pending operations.
    ///
    /// The port is referenced before the counter leaves zero.
    pub fn acquire(&self, n: usize) {
        if n == 0 {
            return;
        }

        let mut pending_ops = self.lock();

        if *pending_ops == 0 {
            debug!("first pending operation, ref port");
            self.port.ref_handle();
        }

        *pending_ops += n;
        trace!("acquired {n} operation(s), {} pending", *pending_ops);
    }

    /// Resolves `n` pending operations.
    ///
    /// The port is unreferenced right after the counter reaches zero.
    pub fn release(&self, n: usize) {
        if n == 0 {
            return;
        }

        let mut pending_ops = self.lock();

        if *pending_ops == 0 {
            warn!("cannot release {n} operation(s): none pending");
            return;
        }

        if n > *pending_ops {
            warn!("cannot release {n} operation(s): only {} pending", *pending_ops);
        }

        *pending_ops = pending_ops.saturating_sub(n);
        trace!("released {n} operation(s), {} pending", *pending_ops);

        if *pending_ops == 0 {
            debug!("no more pending operation, unref port");
            self.port.unref_handle();
        }
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.pending_ops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{collections::VecDeque, sync::Mutex};

    use crate::{
        packet::{Packet, PacketType},
        runtimes::pipe::Pusher,
    };

    use super::Port;

    /// Something that happened to a [`RecordingPort`].
    #[derive(Clone, Debug, Eq, PartialEq)]
    pub enum Event {
        Send(Packet),
        Ref,
        Unref,
    }

    /// Port recording every call in order.
    #[derive(Debug, Default)]
    pub struct RecordingPort {
        events: Mutex<Vec<Event>>,
    }

    impl RecordingPort {
        pub fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }

        pub fn sent(&self) -> Vec<Packet> {
            self.events()
                .into_iter()
                .filter_map(|event| match event {
                    Event::Send(packet) => Some(packet),
                    _ => None,
                })
                .collect()
        }

        /// Returns the ref/unref calls only, in order.
        pub fn transitions(&self) -> Vec<Event> {
            self.events()
                .into_iter()
                .filter(|event| !matches!(event, Event::Send(_)))
                .collect()
        }

        /// Returns `true` if every ref is followed by exactly one
        /// unref before the next ref.
        pub fn alternates(&self) -> bool {
            self.transitions()
                .iter()
                .enumerate()
                .all(|(i, event)| match i % 2 {
                    0 => *event == Event::Ref,
                    _ => *event == Event::Unref,
                })
        }

        pub fn refs(&self) -> usize {
            self.count(&Event::Ref)
        }

        pub fn unrefs(&self) -> usize {
            self.count(&Event::Unref)
        }

        fn count(&self, expected: &Event) -> usize {
            self.events().iter().filter(|e| *e == expected).count()
        }
    }

    impl Port for RecordingPort {
        fn send(&self, packet: Packet) {
            self.events.lock().unwrap().push(Event::Send(packet));
        }

        fn ref_handle(&self) {
            self.events.lock().unwrap().push(Event::Ref);
        }

        fn unref_handle(&self) {
            self.events.lock().unwrap().push(Event::Unref);
        }
    }

    /// Port answering each read request with the next chunk, then
    /// with the end marker once chunks are exhausted.
    #[derive(Debug, Default)]
    pub struct FeedingPort {
        pub recorder: RecordingPort,
        chunks: Mutex<VecDeque<Vec<u8>>>,
        pusher: Mutex<Option<Pusher>>,
    }

    impl FeedingPort {
        pub fn new<'a>(chunks: impl IntoIterator<Item = &'a str>) -> Self {
            let chunks = chunks.into_iter().map(|c| c.as_bytes().to_vec());

            Self {
                chunks: Mutex::new(chunks.collect()),
                ..Default::default()
            }
        }

        pub fn attach(&self, pusher: Pusher) {
            *self.pusher.lock().unwrap() = Some(pusher);
        }
    }

    impl Port for FeedingPort {
        fn send(&self, packet: Packet) {
            let is_read = packet.kind == PacketType::StdioRead;
            self.recorder.send(packet);

            if !is_read {
                return;
            }

            let chunk = self.chunks.lock().unwrap().pop_front();
            let pusher = self.pusher.lock().unwrap().clone();

            if let Some(pusher) = pusher {
                match chunk {
                    Some(chunk) => pusher.push(chunk),
                    None => pusher.end(),
                }
            }
        }

        fn ref_handle(&self) {
            self.recorder.ref_handle()
        }

        fn unref_handle(&self) {
            self.recorder.unref_handle()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::{
        testing::{Event, RecordingPort},
        Channel,
    };

    #[test]
    fn ref_on_first_acquire_only() {
        let _ = env_logger::try_init();

        let channel = Channel::new(RecordingPort::default());

        channel.acquire(1);
        channel.acquire(2);

        assert_eq!(channel.pending_ops(), 3);
        assert_eq!(channel.port().events(), vec![Event::Ref]);
    }

    #[test]
    fn unref_when_back_to_zero() {
        let _ = env_logger::try_init();

        let channel = Channel::new(RecordingPort::default());

        channel.acquire(3);
        channel.release(2);
        assert_eq!(channel.port().unrefs(), 0);

        channel.release(1);
        assert_eq!(channel.pending_ops(), 0);
        assert_eq!(channel.port().events(), vec![Event::Ref, Event::Unref]);

        channel.acquire(1);
        channel.release(1);
        assert_eq!(channel.port().refs(), 2);
        assert_eq!(channel.port().unrefs(), 2);
    }

    #[test]
    fn concurrent_acquire_release() {
        let _ = env_logger::try_init();

        let channel = Channel::new(RecordingPort::default());

        thread::scope(|s| {
            for n in 1..=8 {
                let channel = &channel;
                s.spawn(move || {
                    for _ in 0..500 {
                        channel.acquire(n);
                        channel.release(n);
                    }
                });
            }
        });

        let port = channel.port();
        assert_eq!(channel.pending_ops(), 0);
        assert!(port.refs() >= 1);
        assert_eq!(port.refs(), port.unrefs());
        assert!(port.alternates());
    }

    #[test]
    fn zero_is_a_no_op() {
        let _ = env_logger::try_init();

        let channel = Channel::new(RecordingPort::default());

        channel.acquire(0);
        channel.release(0);

        assert!(channel.port().events().is_empty());
    }

    #[test]
    fn release_never_goes_negative() {
        let _ = env_logger::try_init();

        let channel = Channel::new(RecordingPort::default());

        channel.release(1);
        assert_eq!(channel.pending_ops(), 0);
        assert!(channel.port().events().is_empty());

        channel.acquire(1);
        channel.release(5);
        assert_eq!(channel.pending_ops(), 0);
        assert_eq!(channel.port().events(), vec![Event::Ref, Event::Unref]);
    }
}
