//! A scatter-reduce-broadcast allreduce protocol tolerant of slow or
//! temporarily unreachable peers.
//!
//! The core state machines ([`worker::Worker`], [`master::Master`]) are
//! transport- and membership-agnostic; [`message`] and [`membership`] are
//! the seams where a real cluster (TCP sockets, an external membership
//! service) or an in-process simulation (for tests) are plugged in.

pub mod buffer;
pub mod coder;
pub mod config;
pub mod error;
pub mod master;
pub mod membership;
pub mod message;
pub mod partition;
pub mod reducer;
pub mod wire;
pub mod worker;

pub use error::AllreduceError;
pub use wire::{Address, PeerId, Round, WireMessage};
