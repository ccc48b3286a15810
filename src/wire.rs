//! The typed messages exchanged between masters and workers.
//!
//! Wire encoding is a transport concern (see [`crate::coder`]); this module
//! only fixes the logical schema. `PeerId` is the dense integer assigned by
//! the master at registration; `Address` is whatever the transport needs to
//! reach a peer (a socket address for [`crate::message::TcpTransport`], a
//! channel endpoint for [`crate::message::ChannelTransport`]).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type PeerId = i64;
pub type Round = i64;
pub type Address = String;

/// Sent once by the master to a newly-registered worker, before the first
/// `StartAllreduce`. Carries everything the worker needs to size its buffers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitWorkers {
    pub peers: BTreeMap<PeerId, Address>,
    pub master: Address,
    pub dest_id: PeerId,
    pub th_reduce: f64,
    pub th_complete: f64,
    pub max_lag: usize,
    pub data_size: usize,
    pub max_chunk_size: usize,
}

/// Paces the protocol: tells a worker it may (and should) scatter round `round`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartAllreduce {
    pub round: Round,
}

/// One chunk of the block `dest_id` owns, contributed by `src_id` for `round`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScatterBlock {
    pub value: Vec<f64>,
    pub src_id: PeerId,
    pub dest_id: PeerId,
    pub chunk_id: usize,
    pub round: Round,
}

/// The reduction of a chunk across however many peers had contributed by the
/// time `thReduce` quorum was reached, broadcast to every peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReduceBlock {
    pub value: Vec<f64>,
    pub src_id: PeerId,
    pub dest_id: PeerId,
    pub chunk_id: usize,
    pub round: Round,
    pub reduce_count: usize,
}

/// Sent by a worker to the master once it has assembled and sunk the output
/// vector for `round`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteAllreduce {
    pub src_id: PeerId,
    pub round: Round,
}

/// Supervisory notice that a peer (or a registered worker, from the master's
/// point of view) has gone away. Not necessarily carried over the same
/// transport as the data messages; see [`crate::membership`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Terminated {
    pub peer_id: PeerId,
}

/// The union of everything that can arrive in a worker's or master's mailbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireMessage {
    InitWorkers(InitWorkers),
    StartAllreduce(StartAllreduce),
    ScatterBlock(ScatterBlock),
    ReduceBlock(ReduceBlock),
    CompleteAllreduce(CompleteAllreduce),
    Terminated(Terminated),
}

impl From<InitWorkers> for WireMessage {
    fn from(m: InitWorkers) -> Self {
        WireMessage::InitWorkers(m)
    }
}

impl From<StartAllreduce> for WireMessage {
    fn from(m: StartAllreduce) -> Self {
        WireMessage::StartAllreduce(m)
    }
}

impl From<ScatterBlock> for WireMessage {
    fn from(m: ScatterBlock) -> Self {
        WireMessage::ScatterBlock(m)
    }
}

impl From<ReduceBlock> for WireMessage {
    fn from(m: ReduceBlock) -> Self {
        WireMessage::ReduceBlock(m)
    }
}

impl From<CompleteAllreduce> for WireMessage {
    fn from(m: CompleteAllreduce) -> Self {
        WireMessage::CompleteAllreduce(m)
    }
}

impl From<Terminated> for WireMessage {
    fn from(m: Terminated) -> Self {
        WireMessage::Terminated(m)
    }
}
