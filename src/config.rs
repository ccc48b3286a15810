//! CLI argument parsing for the `master` and `worker` binaries.
//!
//! Positional defaults mirror the reference launcher: a master started with
//! no arguments binds port 2551 and expects 2 workers; a worker started with
//! no arguments binds port 2553 and sources a 10-element input vector.

use crate::master::MasterConfig;
use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "master", about = "Coordinates a scatter-reduce-broadcast allreduce cluster")]
pub struct MasterArgs {
    /// Port to bind the master's transport on.
    #[arg(default_value_t = 2551)]
    pub port: u16,

    /// Number of workers the master waits to register before starting.
    #[arg(default_value_t = 2)]
    pub total_workers: usize,

    /// Length of the data vector reduced each round. Defaults to
    /// `totalWorkers * 5` when omitted, matching the reference launcher.
    pub data_size: Option<usize>,

    /// Maximum number of floats carried by a single scatter or reduce chunk.
    #[arg(default_value_t = 2)]
    pub max_chunk_size: usize,

    /// Address of a worker to expect, e.g. `--worker 127.0.0.1:2553`. Stands
    /// in for a real membership service (out of scope for this crate): an
    /// operator supplies the cluster's worker addresses directly, and the
    /// master treats all of them as "up" immediately. Repeat for more than
    /// one worker.
    #[arg(long = "worker", value_name = "ADDRESS")]
    pub workers: Vec<String>,

    /// Fraction of registered workers that must report completion before
    /// the master advances to the next round (also gates the initial
    /// registration quorum before the first round starts).
    #[arg(long, default_value_t = 1.0)]
    pub th_allreduce: f64,

    /// Fraction of peers whose scatter contributions are enough to reduce a
    /// chunk.
    #[arg(long, default_value_t = 0.9)]
    pub th_reduce: f64,

    /// Fraction of peers whose reduced chunks are enough to complete a round.
    #[arg(long, default_value_t = 0.8)]
    pub th_complete: f64,

    /// How many rounds behind the furthest-started round a worker may lag
    /// before its buffers force it to catch up.
    #[arg(long, default_value_t = 1)]
    pub max_lag: usize,

    /// Last round the master will start.
    #[arg(long, default_value_t = 100)]
    pub max_round: i64,
}

impl MasterArgs {
    pub fn to_config(&self) -> MasterConfig {
        MasterConfig {
            total_workers: self.total_workers,
            th_allreduce: self.th_allreduce,
            th_reduce: self.th_reduce,
            th_complete: self.th_complete,
            max_lag: self.max_lag,
            data_size: self.data_size.unwrap_or(self.total_workers * 5),
            max_round: self.max_round,
            max_chunk_size: self.max_chunk_size,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "worker", about = "Runs one worker node of an allreduce cluster")]
pub struct WorkerArgs {
    /// Port to bind this worker's transport on.
    #[arg(default_value_t = 2553)]
    pub port: u16,

    /// Length of the vector this worker's data source produces each round.
    #[arg(default_value_t = 10)]
    pub source_data_size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn master_defaults_match_reference_launcher() {
        let args = MasterArgs::parse_from(["master"]);
        assert_eq!(args.port, 2551);
        assert_eq!(args.total_workers, 2);
        assert_eq!(args.to_config().data_size, 10);
        assert_eq!(args.th_allreduce, 1.0);
        assert_eq!(args.th_reduce, 0.9);
        assert_eq!(args.th_complete, 0.8);
        assert_eq!(args.max_lag, 1);
        assert_eq!(args.max_round, 100);
    }

    #[test]
    fn worker_defaults_match_reference_launcher() {
        let args = WorkerArgs::parse_from(["worker"]);
        assert_eq!(args.port, 2553);
        assert_eq!(args.source_data_size, 10);
    }
}
