//! Packets emitted by the stdio streams.
//!
//! Only two kinds of packets ever leave this crate: read requests and
//! write requests. Encoding them for the wire is the job of the
//! [`Port`] implementation.
//!
//! [`Port`]: crate::port::Port

/// File descriptor of the peer stream a packet targets.
pub type Fd = u32;

/// The packet type tag.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum PacketType {
    /// Asks the peer for more bytes from a descriptor.
    StdioRead,

    /// Hands the peer bytes to write to a descriptor.
    StdioWrite,
}

/// The packet payload.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Payload {
    /// Payload of a [`PacketType::StdioRead`] packet.
    Read { fd: Fd },

    /// Payload of a [`PacketType::StdioWrite`] packet.
    ///
    /// Both `data` and `encoding` set to `None` is the end-of-stream
    /// sentinel.
    Write {
        fd: Fd,
        data: Option<Vec<u8>>,
        encoding: Option<String>,
    },
}

/// A typed envelope sent through a [`Port`].
///
/// [`Port`]: crate::port::Port
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Packet {
    pub kind: PacketType,
    pub id: u32,
    pub payload: Payload,
}

impl Packet {
    pub fn new(kind: PacketType, id: u32, payload: Payload) -> Self {
        Self { kind, id, payload }
    }

    /// Builds a read request for the given descriptor.
    pub fn read_request(fd: Fd) -> Self {
        Self::new(PacketType::StdioRead, 0, Payload::Read { fd })
    }

    /// Builds a write request carrying the given bytes.
    pub fn write_request(fd: Fd, data: Vec<u8>, encoding: Option<String>) -> Self {
        let data = Some(data);
        Self::new(PacketType::StdioWrite, 0, Payload::Write { fd, data, encoding })
    }

    /// Builds the write request telling the peer that no more bytes
    /// will be written to the given descriptor.
    pub fn end_of_stream(fd: Fd) -> Self {
        let payload = Payload::Write {
            fd,
            data: None,
            encoding: None,
        };

        Self::new(PacketType::StdioWrite, 0, payload)
    }

    /// Returns the descriptor targeted by the packet.
    pub fn fd(&self) -> Fd {
        match &self.payload {
            Payload::Read { fd } => *fd,
            Payload::Write { fd, .. } => *fd,
        }
    }

    pub fn is_end_of_stream(&self) -> bool {
        matches!(
            self.payload,
            Payload::Write {
                data: None,
                encoding: None,
                ..
            }
        )
    }
}
