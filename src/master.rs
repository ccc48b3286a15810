//! The cluster-level coordinator: gathers worker registrations and paces
//! rounds.
//!
//! Unlike a [`crate::worker::Worker`], which only ever reacts to its own
//! mailbox, the master reacts to two independent event sources: membership
//! events (workers coming up or going away) and `CompleteAllreduce` messages
//! on the data transport. `run` forwards both onto one channel so the actual
//! state transitions still happen on a single thread, cooperatively, like
//! everything else in this crate.

use crate::error::AllreduceError;
use crate::membership::{Membership, MembershipEvent, Role};
use crate::message::Transport;
use crate::wire::{Address, CompleteAllreduce, InitWorkers, PeerId, Round, StartAllreduce, Terminated, WireMessage};
use log::{info, warn};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Hyperparameters fixed for the lifetime of a master, mirroring the
/// reference launcher's CLI defaults (see [`crate::config`]).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MasterConfig {
    pub total_workers: usize,
    pub th_allreduce: f64,
    pub th_reduce: f64,
    pub th_complete: f64,
    pub max_lag: usize,
    pub data_size: usize,
    pub max_round: Round,
    pub max_chunk_size: usize,
}

fn quorum_count(total: usize, threshold: f64) -> usize {
    ((threshold * total as f64).ceil() as usize).max(1)
}

enum MasterEvent {
    Membership(MembershipEvent),
    Message(WireMessage),
}

/// The master state machine. Generic over both its data transport and its
/// membership service, so tests can swap in in-process doubles for both.
pub struct Master<T, M> {
    transport: Arc<T>,
    membership: Arc<M>,
    config: MasterConfig,
    workers: BTreeMap<PeerId, Address>,
    member_ids: HashMap<String, PeerId>,
    round: Round,
    num_complete: usize,
}

impl<T, M> Master<T, M>
where
    T: Transport + Send + Sync + 'static,
    M: Membership + Send + Sync + 'static,
{
    pub fn new(transport: T, membership: M, config: MasterConfig) -> Self {
        Master {
            transport: Arc::new(transport),
            membership: Arc::new(membership),
            config,
            workers: BTreeMap::new(),
            member_ids: HashMap::new(),
            round: -1,
            num_complete: 0,
        }
    }

    pub fn local_address(&self) -> Address {
        self.transport.local_address()
    }

    /// Spawns the membership-polling and transport-receiving threads and
    /// runs the cooperative dispatch loop forever. Returns only if both
    /// event sources are exhausted (their senders have been dropped), which
    /// in practice means the process is shutting down.
    pub fn run(&mut self) -> Result<(), AllreduceError> {
        let (tx, rx) = crossbeam_channel::unbounded();

        let membership = self.membership.clone();
        let membership_tx = tx.clone();
        thread::spawn(move || loop {
            match membership.next_event() {
                Ok(event) => {
                    if membership_tx.send(MasterEvent::Membership(event)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("membership event stream ended: {e}");
                    break;
                }
            }
        });

        let transport = self.transport.clone();
        thread::spawn(move || loop {
            match transport.recv() {
                Ok(message) => {
                    if tx.send(MasterEvent::Message(message)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("transport closed: {e}");
                    break;
                }
            }
        });

        for event in rx {
            match event {
                MasterEvent::Membership(e) => self.handle_membership_event(e)?,
                MasterEvent::Message(m) => self.handle_message(m)?,
            }
        }
        Ok(())
    }

    /// Handles one membership event. Exposed separately from [`Master::run`]
    /// so tests can drive registration deterministically.
    pub fn handle_membership_event(&mut self, event: MembershipEvent) -> Result<(), AllreduceError> {
        match event {
            MembershipEvent::MemberUp {
                role: Role::Worker,
                member,
            } => {
                let address = self.membership.resolve(&member, REGISTRATION_TIMEOUT)?;
                let id = self.workers.len() as PeerId;
                self.workers.insert(id, address);
                self.member_ids.insert(member, id);
                info!(
                    "worker {} registered ({} of {})",
                    id,
                    self.workers.len(),
                    self.config.total_workers
                );
                self.maybe_start()?;
            }
            MembershipEvent::MemberUp {
                role: Role::Master, ..
            } => {
                // Another master advertising itself is not this crate's
                // concern; leader election happens above this layer.
            }
            MembershipEvent::Terminated { member } => {
                if let Some(id) = self.member_ids.remove(&member) {
                    if self.workers.remove(&id).is_some() {
                        warn!("worker {id} terminated");
                        self.broadcast(Terminated { peer_id: id }.into())?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Handles one message off the data transport. Only `CompleteAllreduce`
    /// is ever addressed to the master; anything else is ignored.
    pub fn handle_message(&mut self, message: WireMessage) -> Result<(), AllreduceError> {
        if let WireMessage::CompleteAllreduce(m) = message {
            self.handle_complete(m)?;
        }
        Ok(())
    }

    fn maybe_start(&mut self) -> Result<(), AllreduceError> {
        if self.round != -1 {
            return Ok(());
        }
        let quorum = quorum_count(self.config.total_workers, self.config.th_allreduce);
        if self.workers.len() < quorum {
            return Ok(());
        }
        let master_address = self.transport.local_address();
        for (&id, address) in self.workers.clone().iter() {
            self.transport.send(
                address,
                InitWorkers {
                    peers: self.workers.clone(),
                    master: master_address.clone(),
                    dest_id: id,
                    th_reduce: self.config.th_reduce,
                    th_complete: self.config.th_complete,
                    max_lag: self.config.max_lag,
                    data_size: self.config.data_size,
                    max_chunk_size: self.config.max_chunk_size,
                }
                .into(),
            )?;
        }
        self.round = 0;
        self.num_complete = 0;
        info!("starting allreduce with {} registered workers", self.workers.len());
        self.broadcast(StartAllreduce { round: 0 }.into())
    }

    fn handle_complete(&mut self, m: CompleteAllreduce) -> Result<(), AllreduceError> {
        if m.round != self.round {
            return Ok(());
        }
        self.num_complete += 1;
        let quorum = quorum_count(self.config.total_workers, self.config.th_allreduce);
        if self.num_complete >= quorum && self.round < self.config.max_round {
            let finished = self.round;
            self.round += 1;
            self.num_complete = 0;
            info!("round {} complete, advancing to {}", finished, self.round);
            self.broadcast(StartAllreduce { round: self.round }.into())?;
        }
        Ok(())
    }

    fn broadcast(&self, message: WireMessage) -> Result<(), AllreduceError> {
        for address in self.workers.values() {
            self.transport.send(address, message.clone())?;
        }
        Ok(())
    }
}
