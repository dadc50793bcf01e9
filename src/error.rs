use std::io;

use thiserror::Error;

use crate::packet::Fd;

/// Errors handed to write callbacks.
///
/// Streams never fail on their own: these errors only report writes
/// that could not be bridged to the peer.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum StdioError {
    #[error("Cannot write to fd {0}: stream already ended")]
    WriteAfterEnd(Fd),
    #[error("Cannot complete write to fd {0}: stream destroyed")]
    Destroyed(Fd),
}

impl StdioError {
    /// Returns the descriptor of the stream the error comes from.
    pub fn fd(&self) -> Fd {
        match self {
            Self::WriteAfterEnd(fd) => *fd,
            Self::Destroyed(fd) => *fd,
        }
    }
}

impl From<StdioError> for io::Error {
    fn from(err: StdioError) -> Self {
        io::Error::new(io::ErrorKind::BrokenPipe, err)
    }
}
