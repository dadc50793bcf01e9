#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

pub mod error;
pub mod packet;
pub mod port;
pub mod runtimes;
pub mod stdio;

#[doc(inline)]
pub use crate::{
    error::StdioError,
    packet::{Fd, Packet, PacketType, Payload},
    port::{Channel, Port},
    stdio::{
        null::{NullReadable, NullWritable},
        readable::Readable,
        writable::Writable,
        Sink, Source, WriteCallback,
    },
};
