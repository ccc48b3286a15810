//! Reference launcher for the master node.
//!
//! `master [port] [totalWorkers] [dataSize] [maxChunkSize] --worker <addr>...`

use allreduce::coder::BincodeCoder;
use allreduce::config::MasterArgs;
use allreduce::master::Master;
use allreduce::membership::StaticMembership;
use allreduce::message::TcpTransport;
use clap::Parser;
use log::error;
use std::net::SocketAddr;
use std::process;

fn main() {
    env_logger::init();
    let args = MasterArgs::parse();
    let config = args.to_config();

    let address: SocketAddr = format!("127.0.0.1:{}", args.port)
        .parse()
        .expect("port produces a valid socket address");
    let transport = match TcpTransport::bind(address, BincodeCoder) {
        Ok(t) => t,
        Err(e) => {
            error!("failed to bind master transport on {address}: {e}");
            process::exit(1);
        }
    };

    if args.workers.is_empty() {
        error!("no workers configured; pass --worker <address> at least once");
        process::exit(1);
    }
    let membership = StaticMembership::new(args.workers.clone());

    let mut master = Master::new(transport, membership, config);
    if let Err(e) = master.run() {
        error!("master exited with error: {e}");
        process::exit(1);
    }
}
