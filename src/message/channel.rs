//! An in-process transport backed by `crossbeam_channel`, for tests and for
//! simulating a cluster in a single process.
//!
//! Mirrors the connection-cache idiom of [`super::tcp::ConnectionPool`]: a
//! shared registry of per-address senders stands in for the cache of open
//! sockets, and sending to an address that is not yet registered is an
//! error rather than a lazily-opened connection.

use super::transport::Transport;
use crate::error::AllreduceError;
use crate::wire::{Address, WireMessage};
use crossbeam_channel::{Receiver, Sender};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A shared switchboard that a group of [`ChannelTransport`]s register with.
#[derive(Clone, Default)]
pub struct LocalNetwork {
    senders: Arc<Mutex<HashMap<Address, Sender<WireMessage>>>>,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }
}

pub struct ChannelTransport {
    address: Address,
    network: LocalNetwork,
    receiver: Receiver<WireMessage>,
}

impl ChannelTransport {
    /// Registers a new mailbox at `address` on `network`.
    pub fn new(network: &LocalNetwork, address: Address) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        network
            .senders
            .lock()
            .unwrap()
            .insert(address.clone(), sender);
        ChannelTransport {
            address,
            network: network.clone(),
            receiver,
        }
    }
}

impl Transport for ChannelTransport {
    fn local_address(&self) -> Address {
        self.address.clone()
    }

    fn send(&self, dest: &Address, message: WireMessage) -> Result<(), AllreduceError> {
        let senders = self.network.senders.lock().unwrap();
        let sender = senders
            .get(dest)
            .ok_or_else(|| AllreduceError::Transport(format!("no such peer: {dest}")))?;
        sender
            .send(message)
            .map_err(|e| AllreduceError::Transport(e.to_string()))
    }

    fn recv(&self) -> Result<WireMessage, AllreduceError> {
        self.receiver
            .recv()
            .map_err(|e| AllreduceError::Transport(e.to_string()))
    }

    fn try_recv(&self) -> Result<Option<WireMessage>, AllreduceError> {
        match self.receiver.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(crossbeam_channel::TryRecvError::Empty) => Ok(None),
            Err(crossbeam_channel::TryRecvError::Disconnected) => {
                Err(AllreduceError::Transport("channel disconnected".to_string()))
            }
        }
    }
}
