//! Collection of stdio streams bridged over a [`Channel`].
//!
//! Streams only provide the bridging logic. Buffering and
//! backpressure belong to whatever drives them, see [runtimes].
//!
//! [`Channel`]: crate::port::Channel
//! [runtimes]: crate::runtimes

pub mod null;
pub mod readable;
pub mod writable;

use std::sync::Arc;

use crate::error::StdioError;

/// Callback resolving a single write.
pub type WriteCallback = Box<dyn FnOnce(Result<(), StdioError>) + Send>;

/// Pull side of a stdio stream.
pub trait Source: Send + Sync {
    /// Called whenever the consumer needs more bytes.
    fn demand_data(&self);

    /// Called once the consumer reached the end of the stream.
    fn ended(&self);

    /// Called when the consumer goes away before the end of the
    /// stream.
    fn destroy(&self);
}

/// Push side of a stdio stream.
pub trait Sink: Send + Sync {
    /// Accepts bytes to write.
    ///
    /// The callback may be invoked long after this function returns.
    fn accept_write(&self, data: Vec<u8>, encoding: Option<String>, cb: WriteCallback);

    /// Closes the stream, no more write will come.
    fn finalize(&self, cb: WriteCallback);

    /// Called when the producer goes away without finalizing.
    fn destroy(&self);
}

impl<T: Source + ?Sized> Source for Arc<T> {
    fn demand_data(&self) {
        (**self).demand_data()
    }

    fn ended(&self) {
        (**self).ended()
    }

    fn destroy(&self) {
        (**self).destroy()
    }
}

impl<T: Sink + ?Sized> Sink for Arc<T> {
    fn accept_write(&self, data: Vec<u8>, encoding: Option<String>, cb: WriteCallback) {
        (**self).accept_write(data, encoding, cb)
    }

    fn finalize(&self, cb: WriteCallback) {
        (**self).finalize(cb)
    }

    fn destroy(&self) {
        (**self).destroy()
    }
}
