//! Streams standing in for descriptors that are not bridged.

use log::trace;

use super::{Sink, Source, WriteCallback};

/// Source that never asks for anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullReadable;

impl Source for NullReadable {
    fn demand_data(&self) {}

    fn ended(&self) {}

    fn destroy(&self) {}
}

/// Sink discarding every write.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullWritable;

impl Sink for NullWritable {
    fn accept_write(&self, data: Vec<u8>, _encoding: Option<String>, cb: WriteCallback) {
        trace!("discard {} bytes", data.len());
        cb(Ok(()))
    }

    fn finalize(&self, cb: WriteCallback) {
        cb(Ok(()))
    }

    fn destroy(&self) {}
}
