//! A minimal distributed message-passing API.
//!
//! This module exports the [`Transport`] trait that masters and workers
//! talk through, plus two implementations: [`ChannelTransport`] for
//! in-process simulation and tests, and [`TcpTransport`] for a real
//! cluster.

mod channel;
mod tcp;
mod transport;
mod util;

pub use channel::{ChannelTransport, LocalNetwork};
pub use tcp::TcpTransport;
pub use transport::Transport;
