//! Collection of stdio runtimes.
//!
//! A runtime drives [streams] from a byte-oriented I/O API: it owns
//! the read buffer, applies backpressure on writes, and tells the
//! streams when more bytes are needed or when the end is reached.
//!
//! [streams]: crate::stdio

pub mod pipe;
#[cfg(feature = "std")]
pub mod std;
#[cfg(feature = "tokio")]
pub mod tokio;
