//! Error taxonomy for the allreduce protocol.
//!
//! Fallible public entry points return `Result<T, AllreduceError>` rather
//! than panicking, so that the binaries at the edge of the crate can log the
//! failure with context and choose an exit code. Invariant violations that
//! indicate a bug in this crate itself (not a misbehaving peer) still use an
//! assertion, since no caller could recover from a broken invariant anyway.

use thiserror::Error;

/// Everything that can go wrong while running the master or a worker.
#[derive(Debug, Error)]
pub enum AllreduceError {
    /// `dataSource` returned a vector of the wrong length; the worker cannot
    /// proceed with a mismatched round.
    #[error("data source returned {actual} values, expected {expected}")]
    DataSizeMismatch { expected: usize, actual: usize },

    /// An inbound block was addressed to a different worker id; this points
    /// at corrupted peer-id bookkeeping in the transport or the peer.
    #[error("message misaddressed: expected destId {expected}, got {actual}")]
    Misaddressed { expected: i64, actual: i64 },

    /// A `ReduceBlock` carried more values than `maxChunkSize` allows.
    #[error("chunk of length {len} exceeds maxChunkSize {max}")]
    OversizeChunk { len: usize, max: usize },

    /// The master's address resolution for a newly-reported member did not
    /// complete within the registration timeout.
    #[error("address resolution for member {member} timed out")]
    AddressResolutionTimeout { member: String },

    /// A send or receive failed at the transport layer.
    #[error("transport error: {0}")]
    Transport(String),

    /// A message failed to encode or decode.
    #[error("encoding error: {0}")]
    Encoding(String),
}
