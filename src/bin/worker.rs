//! Reference launcher for a worker node.
//!
//! `worker [port] [sourceDataSize]`
//!
//! A worker never initiates anything on its own: it binds its transport and
//! waits for `InitWorkers` from the master named in `--worker` on the master
//! side of the launch.

use allreduce::coder::BincodeCoder;
use allreduce::config::WorkerArgs;
use allreduce::message::TcpTransport;
use allreduce::worker::{AllReduceInputRequest, AllReduceOutput, DataSink, DataSource, Worker};
use clap::Parser;
use log::{error, info};
use std::net::SocketAddr;
use std::process;

/// Produces a deterministic vector for each round, so a small cluster run
/// with this binary is reproducible without wiring in a real data pipeline.
struct GeneratedDataSource {
    size: usize,
}

impl DataSource for GeneratedDataSource {
    fn fetch(&mut self, request: AllReduceInputRequest) -> allreduce::worker::AllReduceInput {
        let data = (0..self.size)
            .map(|i| (request.iteration as f64) * 1000.0 + i as f64)
            .collect();
        allreduce::worker::AllReduceInput { data }
    }
}

/// Logs each round's aggregate instead of handing it to a real consumer.
struct LoggingDataSink;

impl DataSink for LoggingDataSink {
    fn sink(&mut self, output: AllReduceOutput) {
        let sum: f64 = output.data.iter().sum();
        info!(
            "round {} complete: {} values, sum={sum}",
            output.iteration,
            output.data.len()
        );
    }
}

fn main() {
    env_logger::init();
    let args = WorkerArgs::parse();

    let address: SocketAddr = format!("127.0.0.1:{}", args.port)
        .parse()
        .expect("port produces a valid socket address");
    let transport = match TcpTransport::bind(address, BincodeCoder) {
        Ok(t) => t,
        Err(e) => {
            error!("failed to bind worker transport on {address}: {e}");
            process::exit(1);
        }
    };

    let data_source = Box::new(GeneratedDataSource {
        size: args.source_data_size,
    });
    let data_sink = Box::new(LoggingDataSink);
    let mut worker = Worker::new(transport, data_source, data_sink);

    info!("worker listening on {address}");
    if let Err(e) = worker.run() {
        error!("worker exited with error: {e}");
        process::exit(1);
    }
}
