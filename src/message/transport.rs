//! The addressable, typed send/receive seam a worker or master talks through.
//!
//! Implementors only need `local_address`, `send`, and `recv`; the protocol
//! above (see [`crate::worker`], [`crate::master`]) never depends on how
//! bytes actually cross the wire. Self-redelivery (a worker deferring a
//! message to itself) is implemented by sending to `local_address()`, so any
//! `Transport` that can address itself gets self-redelivery for free.

use crate::error::AllreduceError;
use crate::wire::{Address, WireMessage};

pub trait Transport {
    /// This node's own address, reachable by `send`.
    fn local_address(&self) -> Address;

    /// Send `message` to `dest`. Non-blocking: queuing for delivery is
    /// enough, the protocol tolerates reordering and re-delivery.
    fn send(&self, dest: &Address, message: WireMessage) -> Result<(), AllreduceError>;

    /// Block until a message addressed to this node arrives.
    fn recv(&self) -> Result<WireMessage, AllreduceError>;

    /// Non-blocking variant of [`Transport::recv`]: `Ok(None)` if nothing is
    /// waiting right now. Used to poll several peers from one thread, e.g.
    /// in tests that drive more than one [`crate::worker::Worker`] at once.
    fn try_recv(&self) -> Result<Option<WireMessage>, AllreduceError>;
}
