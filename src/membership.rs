//! The cluster membership service the master depends on.
//!
//! Membership discovery and transport are explicitly out of scope for this
//! crate (see the purpose and scope notes); `Membership` is the seam a real
//! cluster manager (etcd, Kubernetes, an Akka cluster receptionist, ...)
//! would be adapted to. [`InProcessMembership`] is the test double used by
//! the master's own unit tests.

use crate::error::AllreduceError;
use crate::wire::Address;
use std::time::Duration;

/// The role a cluster member advertises itself under. The master only acts
/// on members advertising `Worker`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Worker,
    Master,
}

/// A membership-service-level event, reported before address resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
    /// A member advertising `role` has come up, identified by `member`
    /// (a membership-service-level id, not yet a transport address).
    MemberUp { role: Role, member: String },
    /// A previously-up, already-resolved member has gone away.
    Terminated { member: String },
}

pub trait Membership {
    /// Blocks until the next membership event is available.
    fn next_event(&self) -> Result<MembershipEvent, AllreduceError>;

    /// Resolves a membership-service-level member id to a transport
    /// address, giving up with [`AllreduceError::AddressResolutionTimeout`]
    /// after `timeout`.
    fn resolve(&self, member: &str, timeout: Duration) -> Result<Address, AllreduceError>;
}

/// An in-process `Membership` driven entirely by a test (or an embedding
/// process that already knows its peers, such as the reference launcher).
pub struct InProcessMembership {
    events: crossbeam_channel::Receiver<MembershipEvent>,
    addresses: std::sync::Mutex<std::collections::HashMap<String, Address>>,
}

impl InProcessMembership {
    pub fn new(events: crossbeam_channel::Receiver<MembershipEvent>) -> Self {
        Self {
            events,
            addresses: std::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// Registers the address a later `resolve` call for `member` should
    /// return. Used by tests to simulate a membership service that already
    /// knows how to reach a member.
    pub fn register(&self, member: impl Into<String>, address: Address) {
        self.addresses.lock().unwrap().insert(member.into(), address);
    }
}

impl Membership for InProcessMembership {
    fn next_event(&self) -> Result<MembershipEvent, AllreduceError> {
        self.events
            .recv()
            .map_err(|e| AllreduceError::Transport(e.to_string()))
    }

    fn resolve(&self, member: &str, timeout: Duration) -> Result<Address, AllreduceError> {
        self.addresses
            .lock()
            .unwrap()
            .get(member)
            .cloned()
            .ok_or_else(|| {
                let _ = timeout;
                AllreduceError::AddressResolutionTimeout {
                    member: member.to_string(),
                }
            })
    }
}

/// A `Membership` that already knows its worker addresses up front, given
/// by an operator rather than discovered. Stands in for a real membership
/// service (etcd, Kubernetes, an Akka cluster receptionist) in the `master`
/// binary, which has no such service to talk to. Every configured address
/// is reported "up" once, at construction; none are ever resolved further
/// or reported terminated (a real service would do both).
pub struct StaticMembership {
    events: crossbeam_channel::Receiver<MembershipEvent>,
}

impl StaticMembership {
    pub fn new(worker_addresses: Vec<Address>) -> Self {
        let (sender, events) = crossbeam_channel::unbounded();
        for address in worker_addresses {
            let _ = sender.send(MembershipEvent::MemberUp {
                role: Role::Worker,
                member: address,
            });
        }
        Self { events }
    }
}

impl Membership for StaticMembership {
    fn next_event(&self) -> Result<MembershipEvent, AllreduceError> {
        self.events
            .recv()
            .map_err(|e| AllreduceError::Transport(e.to_string()))
    }

    /// The member id already *is* the transport address in this scheme, so
    /// resolution is the identity function.
    fn resolve(&self, member: &str, _timeout: Duration) -> Result<Address, AllreduceError> {
        Ok(member.to_string())
    }
}
