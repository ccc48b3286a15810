//! Encodes and decodes wire messages to and from bytes.
//!
//! Transports only ever move `Vec<u8>`; a [`Coder`] is what lets a transport
//! stay agnostic to the message schema. The production implementation is
//! [`BincodeCoder`]; [`NullCoder`] is a shim for execution strategies that
//! never actually cross a byte boundary (e.g. [`crate::message::ChannelTransport`]
//! delivers [`crate::wire::WireMessage`] values directly).

use crate::wire::WireMessage;

/// An object that can encode a particular type to, and decode it from, a
/// `Vec<u8>`. The implementation can be based on a `serde` data format, or
/// anything else.
pub trait Coder {
    type Type;

    /// Consume an instance of the encodable type and convert it to bytes.
    fn encode(&self, inst: &Self::Type) -> Vec<u8>;

    /// Consume a buffer of bytes and decode it to the decodable type.
    fn decode(&self, data: &[u8]) -> Self::Type;
}

/// Encodes [`WireMessage`] with `bincode`.
#[derive(Debug, Default, Clone, Copy)]
pub struct BincodeCoder;

impl Coder for BincodeCoder {
    type Type = WireMessage;

    fn encode(&self, inst: &Self::Type) -> Vec<u8> {
        bincode::serialize(inst).expect("WireMessage is always serializable")
    }

    fn decode(&self, data: &[u8]) -> Self::Type {
        bincode::deserialize(data).expect("bytes on the wire were encoded by BincodeCoder")
    }
}

/// Shim implementation of `Coder`. Calling `encode` or `decode` results in
/// `unimplemented` type panic.
pub struct NullCoder<T> {
    phantom: std::marker::PhantomData<T>,
}

impl<T> NullCoder<T> {
    pub fn new() -> Self {
        Self {
            phantom: std::marker::PhantomData::<T> {},
        }
    }
}

impl<T> Coder for NullCoder<T> {
    type Type = T;

    fn encode(&self, _: &Self::Type) -> Vec<u8> {
        unimplemented!()
    }

    fn decode(&self, _: &[u8]) -> Self::Type {
        unimplemented!()
    }
}

impl<T> Default for NullCoder<T> {
    fn default() -> Self {
        Self::new()
    }
}
