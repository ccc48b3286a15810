//! The per-node scatter-reduce-broadcast state machine.
//!
//! A [`Worker`] is a single-threaded, cooperative message handler: it
//! dequeues one message at a time from its [`Transport`] and runs it to
//! completion, never blocking inside a handler. It is initialized exactly
//! once by an `InitWorkers` message, after which it is driven entirely by
//! `StartAllreduce` (from the master) and `ScatterBlock` / `ReduceBlock`
//! (from its peers, including itself).

use crate::buffer::ChunkedRoundBuffer;
use crate::error::AllreduceError;
use crate::message::Transport;
use crate::partition::{block_size, num_chunks, chunk_range};
use crate::reducer::{Reducer, SumReducer};
use crate::wire::{
    Address, CompleteAllreduce, InitWorkers, PeerId, ReduceBlock, Round, ScatterBlock,
    StartAllreduce, Terminated, WireMessage,
};
use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// What round of input a [`DataSource`] is being asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllReduceInputRequest {
    pub iteration: Round,
}

/// The vector a [`DataSource`] hands back for a round. Must have exactly
/// `dataSize` elements; a worker that receives a mismatched length treats
/// it as a fatal configuration error.
#[derive(Debug, Clone, PartialEq)]
pub struct AllReduceInput {
    pub data: Vec<f64>,
}

/// The aggregate a [`DataSink`] receives once a round completes. `count`
/// carries, for each (block-owner, chunk) pair assembled into `data` in
/// that same order, how many peers had contributed to the reduction that
/// produced it — a diagnostic, not needed to interpret `data` itself.
#[derive(Debug, Clone, PartialEq)]
pub struct AllReduceOutput {
    pub data: Vec<f64>,
    pub count: Vec<usize>,
    pub iteration: Round,
}

/// Supplies the input vector for each round. Pluggable: production code
/// reads from wherever the numerical workload keeps its data (a gradient
/// buffer, a file, a generator); tests use a canned sequence.
pub trait DataSource {
    fn fetch(&mut self, request: AllReduceInputRequest) -> AllReduceInput;
}

/// Receives the aggregated output vector for each completed round.
pub trait DataSink {
    fn sink(&mut self, output: AllReduceOutput);
}

struct Initialized {
    id: PeerId,
    peers: BTreeMap<PeerId, Address>,
    master: Address,
    max_lag: usize,
    data_size: usize,
    max_chunk_size: usize,
    my_num_chunks: usize,
    owner_block_sizes: Vec<usize>,
    round: Round,
    max_round: Round,
    max_scattered: Round,
    completed: BTreeSet<Round>,
    data: Vec<f64>,
    scatter_buf: ChunkedRoundBuffer,
    reduce_buf: ChunkedRoundBuffer,
    reduce_counts: HashMap<(Round, usize, PeerId), usize>,
}

/// The worker state machine. Generic over the transport so the same logic
/// drives both the in-process test simulation and a real TCP cluster.
pub struct Worker<T: Transport> {
    transport: T,
    reducer: Box<dyn Reducer>,
    data_source: Box<dyn DataSource>,
    data_sink: Box<dyn DataSink>,
    state: Option<Initialized>,
}

impl<T: Transport> Worker<T> {
    pub fn new(
        transport: T,
        data_source: Box<dyn DataSource>,
        data_sink: Box<dyn DataSink>,
    ) -> Self {
        Worker {
            transport,
            reducer: Box::new(SumReducer),
            data_source,
            data_sink,
            state: None,
        }
    }

    pub fn with_reducer(mut self, reducer: Box<dyn Reducer>) -> Self {
        self.reducer = reducer;
        self
    }

    pub fn local_address(&self) -> Address {
        self.transport.local_address()
    }

    /// Blocks forever, handling one inbound message at a time. Returns only
    /// on a fatal protocol error.
    pub fn run(&mut self) -> Result<(), AllreduceError> {
        loop {
            let message = self.transport.recv()?;
            self.handle(message)?;
        }
    }

    /// Handles exactly one message. Exposed separately from [`Worker::run`]
    /// so tests can drive the state machine deterministically.
    pub fn handle(&mut self, message: WireMessage) -> Result<(), AllreduceError> {
        match message {
            WireMessage::InitWorkers(m) => {
                self.handle_init_workers(m);
                Ok(())
            }
            WireMessage::StartAllreduce(m) => self.handle_start_allreduce(m),
            WireMessage::ScatterBlock(m) => self.handle_scatter_block(m),
            WireMessage::ReduceBlock(m) => self.handle_reduce_block(m),
            WireMessage::CompleteAllreduce(_) => Ok(()), // workers never receive these
            WireMessage::Terminated(m) => {
                self.handle_terminated(m);
                Ok(())
            }
        }
    }

    fn redeliver(&self, message: WireMessage) -> Result<(), AllreduceError> {
        self.transport.send(&self.transport.local_address(), message)
    }

    fn handle_init_workers(&mut self, m: InitWorkers) {
        let n = m.peers.len();
        let my_block_size = block_size(m.data_size, n, m.dest_id as usize);
        let max_block_size = block_size(m.data_size, n, 0);
        let my_num_chunks = num_chunks(my_block_size, m.max_chunk_size);
        let max_num_chunks = num_chunks(max_block_size, m.max_chunk_size);
        let owner_block_sizes = (0..n).map(|i| block_size(m.data_size, n, i)).collect();
        let depth = m.max_lag + 1;

        info!(
            "worker {} initialized: {} peers, dataSize={}, myBlockSize={}",
            m.dest_id, n, m.data_size, my_block_size
        );

        self.state = Some(Initialized {
            id: m.dest_id,
            peers: m.peers,
            master: m.master,
            max_lag: m.max_lag,
            data_size: m.data_size,
            max_chunk_size: m.max_chunk_size,
            my_num_chunks,
            owner_block_sizes,
            round: 0,
            max_round: -1,
            max_scattered: -1,
            completed: BTreeSet::new(),
            data: vec![0.0; m.data_size],
            scatter_buf: ChunkedRoundBuffer::new(
                depth,
                n,
                my_num_chunks,
                m.max_chunk_size,
                m.th_reduce,
            ),
            reduce_buf: ChunkedRoundBuffer::new(
                depth,
                n,
                max_num_chunks,
                m.max_chunk_size,
                m.th_complete,
            ),
            reduce_counts: HashMap::new(),
        });
    }

    fn handle_start_allreduce(&mut self, m: StartAllreduce) -> Result<(), AllreduceError> {
        if self.state.is_none() {
            return self.redeliver(m.into());
        }
        {
            let st = self.state.as_mut().unwrap();
            st.max_round = st.max_round.max(m.round);
        }
        info!("round {} started", m.round);

        // Catch-up: force-complete any round about to fall out of the lag
        // window, regardless of how much scatter data actually arrived.
        loop {
            let stalled = {
                let st = self.state.as_ref().unwrap();
                st.round < st.max_round - st.max_lag as Round
            };
            if !stalled {
                break;
            }
            let (round, my_num_chunks) = {
                let st = self.state.as_ref().unwrap();
                (st.round, st.my_num_chunks)
            };
            let row = self
                .state
                .as_ref()
                .unwrap()
                .scatter_buf
                .row_of(round)
                .expect("current round always has a row in the scatter buffer");
            for chunk_id in 0..my_num_chunks {
                let (reduced, count) = self.reduce(row, chunk_id);
                self.broadcast(&reduced, chunk_id, round, count)?;
            }
            self.complete(round)?;
        }

        // Scatter every round this worker hasn't scattered yet.
        loop {
            let (max_scattered, max_round) = {
                let st = self.state.as_ref().unwrap();
                (st.max_scattered, st.max_round)
            };
            if max_scattered >= max_round {
                break;
            }
            let next = max_scattered + 1;
            let request = AllReduceInputRequest { iteration: next };
            let input = self.data_source.fetch(request);
            let data_size = self.state.as_ref().unwrap().data_size;
            if input.data.len() != data_size {
                return Err(AllreduceError::DataSizeMismatch {
                    expected: data_size,
                    actual: input.data.len(),
                });
            }
            self.state.as_mut().unwrap().data = input.data;
            self.scatter(next)?;
            self.state.as_mut().unwrap().max_scattered = next;
        }

        let round = self.state.as_ref().unwrap().round;
        self.state.as_mut().unwrap().completed.retain(|&r| r >= round);
        Ok(())
    }

    fn handle_scatter_block(&mut self, m: ScatterBlock) -> Result<(), AllreduceError> {
        if self.state.is_none() {
            return self.redeliver(m.into());
        }
        let id = self.state.as_ref().unwrap().id;
        if m.dest_id != id {
            return Err(AllreduceError::Misaddressed {
                expected: id,
                actual: m.dest_id,
            });
        }
        let (round, completed) = {
            let st = self.state.as_ref().unwrap();
            (st.round, st.completed.contains(&m.round))
        };
        if m.round < round || completed {
            warn!("dropping outdated ScatterBlock for round {}", m.round);
            return Ok(());
        }
        let max_round = self.state.as_ref().unwrap().max_round;
        if m.round > max_round {
            self.redeliver(StartAllreduce { round: m.round }.into())?;
            return self.redeliver(m.into());
        }

        let st = self.state.as_mut().unwrap();
        let row = st
            .scatter_buf
            .row_of(m.round)
            .expect("round within [round, round+maxLag] must have a valid row");
        st.scatter_buf.store(row, m.src_id, m.chunk_id, &m.value);
        debug!(
            "stored ScatterBlock round={} chunk={} src={} count={}",
            m.round,
            m.chunk_id,
            m.src_id,
            st.scatter_buf.count(row, m.chunk_id)
        );
        if st.scatter_buf.reach_threshold(row, m.chunk_id) {
            let (reduced, count) = self.reduce(row, m.chunk_id);
            self.broadcast(&reduced, m.chunk_id, m.round, count)?;
        }
        Ok(())
    }

    fn handle_reduce_block(&mut self, m: ReduceBlock) -> Result<(), AllreduceError> {
        let max_chunk_size = self
            .state
            .as_ref()
            .map(|st| st.max_chunk_size)
            .unwrap_or(usize::MAX);
        if m.value.len() > max_chunk_size {
            return Err(AllreduceError::OversizeChunk {
                len: m.value.len(),
                max: max_chunk_size,
            });
        }
        if self.state.is_none() {
            return self.redeliver(m.into());
        }
        let id = self.state.as_ref().unwrap().id;
        if m.dest_id != id {
            return Err(AllreduceError::Misaddressed {
                expected: id,
                actual: m.dest_id,
            });
        }
        let (round, completed) = {
            let st = self.state.as_ref().unwrap();
            (st.round, st.completed.contains(&m.round))
        };
        if m.round < round || completed {
            warn!("dropping outdated ReduceBlock for round {}", m.round);
            return Ok(());
        }
        let max_round = self.state.as_ref().unwrap().max_round;
        if m.round > max_round {
            self.redeliver(StartAllreduce { round: m.round }.into())?;
            return self.redeliver(m.into());
        }

        let row = {
            let st = self.state.as_mut().unwrap();
            let row = st
                .reduce_buf
                .row_of(m.round)
                .expect("round within [round, round+maxLag] must have a valid row");
            st.reduce_buf.store(row, m.src_id, m.chunk_id, &m.value);
            st.reduce_counts
                .insert((m.round, m.chunk_id, m.src_id), m.reduce_count);
            row
        };
        if self.state.as_ref().unwrap().reduce_buf.reach_round_threshold(row) {
            self.complete(m.round)?;
        }
        Ok(())
    }

    fn handle_terminated(&mut self, m: Terminated) {
        if let Some(st) = self.state.as_mut() {
            st.peers.remove(&m.peer_id);
            warn!("peer {} terminated", m.peer_id);
        }
    }

    /// Scatters `data` for `round`: each destination block is split into
    /// chunks sized by *that destination's own* block, not this worker's.
    fn scatter(&self, round: Round) -> Result<(), AllreduceError> {
        let st = self.state.as_ref().unwrap();
        let n = st.peers.len();
        for i in 0..n {
            let dest_idx = ((i as i64 + st.id).rem_euclid(n as i64)) as usize;
            let dest_block = block_size(st.data_size, n, dest_idx);
            let dest_range = crate::partition::block_range(st.data_size, n, dest_idx);
            let dest_chunks = num_chunks(dest_block, st.max_chunk_size);
            for chunk_id in 0..dest_chunks {
                let local = chunk_range(dest_block, st.max_chunk_size, chunk_id);
                if local.is_empty() {
                    continue;
                }
                let value = st.data[dest_range.start + local.start..dest_range.start + local.end]
                    .to_vec();
                let dest_id = dest_idx as PeerId;
                let address = st.peers.get(&dest_id).expect("dest peer must be known");
                self.transport.send(
                    address,
                    ScatterBlock {
                        value,
                        src_id: st.id,
                        dest_id,
                        chunk_id,
                        round,
                    }
                    .into(),
                )?;
            }
        }
        Ok(())
    }

    fn reduce(&self, row: usize, chunk_id: usize) -> (Vec<f64>, usize) {
        let st = self.state.as_ref().unwrap();
        let (slots, len) = st.scatter_buf.get(row, chunk_id);
        let reduced = self.reducer.reduce(&slots, len);
        let count = st.scatter_buf.count(row, chunk_id);
        (reduced, count)
    }

    fn broadcast(
        &self,
        reduced: &[f64],
        chunk_id: usize,
        round: Round,
        reduce_count: usize,
    ) -> Result<(), AllreduceError> {
        let st = self.state.as_ref().unwrap();
        let n = st.peers.len();
        for i in 0..n {
            let dest_idx = ((i as i64 + st.id).rem_euclid(n as i64)) as usize;
            let dest_id = dest_idx as PeerId;
            let address = st.peers.get(&dest_id).expect("dest peer must be known");
            self.transport.send(
                address,
                ReduceBlock {
                    value: reduced.to_vec(),
                    src_id: st.id,
                    dest_id,
                    chunk_id,
                    round,
                    reduce_count,
                }
                .into(),
            )?;
        }
        Ok(())
    }

    fn complete(&mut self, round: Round) -> Result<(), AllreduceError> {
        let (output, counts, id, master) = {
            let st = self.state.as_ref().unwrap();
            let data = st.reduce_buf.assemble_row(round, &st.owner_block_sizes);
            let mut counts = Vec::new();
            for (owner, &block) in st.owner_block_sizes.iter().enumerate() {
                let owner_chunks = num_chunks(block, st.max_chunk_size);
                for chunk_id in 0..owner_chunks {
                    let c = st
                        .reduce_counts
                        .get(&(round, chunk_id, owner as PeerId))
                        .copied()
                        .unwrap_or(0);
                    counts.push(c);
                }
            }
            (data, counts, st.id, st.master.clone())
        };

        self.data_sink.sink(AllReduceOutput {
            data: output,
            count: counts,
            iteration: round,
        });
        self.transport.send(
            &master,
            CompleteAllreduce {
                src_id: id,
                round,
            }
            .into(),
        )?;
        info!("round {} completed", round);

        let st = self.state.as_mut().unwrap();
        st.completed.insert(round);
        if round == st.round {
            loop {
                st.round += 1;
                st.scatter_buf.up();
                st.reduce_buf.up();
                if !st.completed.contains(&st.round) {
                    break;
                }
            }
            let round = st.round;
            st.reduce_counts.retain(|&(r, _, _), _| r >= round);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ChannelTransport, LocalNetwork};
    use std::sync::{Arc, Mutex};

    struct FixedSource(Vec<f64>);
    impl DataSource for FixedSource {
        fn fetch(&mut self, _: AllReduceInputRequest) -> AllReduceInput {
            AllReduceInput {
                data: self.0.clone(),
            }
        }
    }

    #[derive(Clone, Default)]
    struct RecordingSink(Arc<Mutex<Vec<AllReduceOutput>>>);
    impl DataSink for RecordingSink {
        fn sink(&mut self, output: AllReduceOutput) {
            self.0.lock().unwrap().push(output);
        }
    }

    fn init_message(n: usize, dest_id: PeerId, data_size: usize, max_chunk_size: usize) -> InitWorkers {
        let peers = (0..n as i64).map(|i| (i, i.to_string())).collect();
        InitWorkers {
            peers,
            master: "master".to_string(),
            dest_id,
            th_reduce: 1.0,
            th_complete: 1.0,
            max_lag: 1,
            data_size,
            max_chunk_size,
        }
    }

    #[test]
    fn two_workers_full_delivery_sums_elementwise() {
        // S1 from the testable-properties scenarios.
        let net = LocalNetwork::new();
        let t0 = ChannelTransport::new(&net, "0".to_string());
        let t1 = ChannelTransport::new(&net, "1".to_string());
        let _master = ChannelTransport::new(&net, "master".to_string());

        let sink0 = RecordingSink::default();
        let sink1 = RecordingSink::default();
        let mut w0 = Worker::new(
            t0,
            Box::new(FixedSource(vec![1.0, 2.0, 3.0, 4.0])),
            Box::new(sink0.clone()),
        );
        let mut w1 = Worker::new(
            t1,
            Box::new(FixedSource(vec![10.0, 20.0, 30.0, 40.0])),
            Box::new(sink1.clone()),
        );

        w0.handle(init_message(2, 0, 4, 2).into()).unwrap();
        w1.handle(init_message(2, 1, 4, 2).into()).unwrap();

        w0.handle(StartAllreduce { round: 0 }.into()).unwrap();
        w1.handle(StartAllreduce { round: 0 }.into()).unwrap();

        // Both workers' completion depends on a broadcast from the other,
        // so they must be pumped together rather than drained one at a
        // time (draining w0 to exhaustion first would block forever
        // waiting on a message w1 has not sent yet).
        let both_done = |sink0: &RecordingSink, sink1: &RecordingSink| {
            sink0.0.lock().unwrap().iter().any(|o| o.iteration == 0)
                && sink1.0.lock().unwrap().iter().any(|o| o.iteration == 0)
        };
        for _ in 0..256 {
            if both_done(&sink0, &sink1) {
                break;
            }
            if let Some(msg) = w0.transport.try_recv().unwrap() {
                w0.handle(msg).unwrap();
            }
            if let Some(msg) = w1.transport.try_recv().unwrap() {
                w1.handle(msg).unwrap();
            }
        }
        assert!(both_done(&sink0, &sink1), "workers never completed round 0");

        assert_eq!(sink0.0.lock().unwrap()[0].data, vec![11.0, 22.0, 33.0, 44.0]);
        assert_eq!(sink1.0.lock().unwrap()[0].data, vec![11.0, 22.0, 33.0, 44.0]);
    }

    #[test]
    fn duplicate_message_delivery_does_not_change_the_result() {
        // S5: re-handling the same ScatterBlock/ReduceBlock a second time
        // (simulating an at-least-once transport) must not change what ends
        // up in the sink.
        let net = LocalNetwork::new();
        let t0 = ChannelTransport::new(&net, "0".to_string());
        let t1 = ChannelTransport::new(&net, "1".to_string());
        let _master = ChannelTransport::new(&net, "master".to_string());

        let sink0 = RecordingSink::default();
        let sink1 = RecordingSink::default();
        let mut w0 = Worker::new(
            t0,
            Box::new(FixedSource(vec![1.0, 2.0, 3.0, 4.0])),
            Box::new(sink0.clone()),
        );
        let mut w1 = Worker::new(
            t1,
            Box::new(FixedSource(vec![10.0, 20.0, 30.0, 40.0])),
            Box::new(sink1.clone()),
        );

        w0.handle(init_message(2, 0, 4, 2).into()).unwrap();
        w1.handle(init_message(2, 1, 4, 2).into()).unwrap();
        w0.handle(StartAllreduce { round: 0 }.into()).unwrap();
        w1.handle(StartAllreduce { round: 0 }.into()).unwrap();

        let both_done = |sink0: &RecordingSink, sink1: &RecordingSink| {
            sink0.0.lock().unwrap().iter().any(|o| o.iteration == 0)
                && sink1.0.lock().unwrap().iter().any(|o| o.iteration == 0)
        };
        for _ in 0..512 {
            if both_done(&sink0, &sink1) {
                break;
            }
            if let Some(msg) = w0.transport.try_recv().unwrap() {
                w0.handle(msg.clone()).unwrap();
                w0.handle(msg).unwrap();
            }
            if let Some(msg) = w1.transport.try_recv().unwrap() {
                w1.handle(msg.clone()).unwrap();
                w1.handle(msg).unwrap();
            }
        }
        assert!(both_done(&sink0, &sink1), "workers never completed round 0");

        // Each sink must have seen round 0 exactly once, with the same
        // result a single, non-duplicated delivery would have produced.
        assert_eq!(sink0.0.lock().unwrap().len(), 1);
        assert_eq!(sink1.0.lock().unwrap().len(), 1);
        assert_eq!(sink0.0.lock().unwrap()[0].data, vec![11.0, 22.0, 33.0, 44.0]);
        assert_eq!(sink1.0.lock().unwrap()[0].data, vec![11.0, 22.0, 33.0, 44.0]);
    }

    #[test]
    fn chunk_splitting_still_sums_elementwise_when_data_size_is_uneven() {
        // S2: dataSize=5, maxChunkSize=2, N=2. Block 0 has 3 elements, block
        // 1 has 2, so the two peers chunk their scatters to each other
        // differently; the aggregate must still be the elementwise sum.
        let net = LocalNetwork::new();
        let t0 = ChannelTransport::new(&net, "0".to_string());
        let t1 = ChannelTransport::new(&net, "1".to_string());
        let _master = ChannelTransport::new(&net, "master".to_string());

        let sink0 = RecordingSink::default();
        let sink1 = RecordingSink::default();
        let mut w0 = Worker::new(
            t0,
            Box::new(FixedSource(vec![1.0, 2.0, 3.0, 4.0, 5.0])),
            Box::new(sink0.clone()),
        );
        let mut w1 = Worker::new(
            t1,
            Box::new(FixedSource(vec![10.0, 20.0, 30.0, 40.0, 50.0])),
            Box::new(sink1.clone()),
        );

        // th_complete is set below its full-quorum default: block 1 (owned
        // by worker 1) has only one chunk, so its second chunk slot can
        // never collect a contribution from both owners (worker 1 has
        // nothing to say about a chunk index it doesn't have) — a lower
        // th_complete is what lets a round with unevenly-chunked blocks
        // complete without waiting on the catch-up loop.
        let init_uneven = |id: PeerId| InitWorkers {
            peers: (0..2i64).map(|i| (i, i.to_string())).collect(),
            master: "master".to_string(),
            dest_id: id,
            th_reduce: 1.0,
            th_complete: 0.5,
            max_lag: 1,
            data_size: 5,
            max_chunk_size: 2,
        };
        w0.handle(init_uneven(0).into()).unwrap();
        w1.handle(init_uneven(1).into()).unwrap();
        w0.handle(StartAllreduce { round: 0 }.into()).unwrap();
        w1.handle(StartAllreduce { round: 0 }.into()).unwrap();

        let both_done = |sink0: &RecordingSink, sink1: &RecordingSink| {
            sink0.0.lock().unwrap().iter().any(|o| o.iteration == 0)
                && sink1.0.lock().unwrap().iter().any(|o| o.iteration == 0)
        };
        for _ in 0..256 {
            if both_done(&sink0, &sink1) {
                break;
            }
            if let Some(msg) = w0.transport.try_recv().unwrap() {
                w0.handle(msg).unwrap();
            }
            if let Some(msg) = w1.transport.try_recv().unwrap() {
                w1.handle(msg).unwrap();
            }
        }
        assert!(both_done(&sink0, &sink1), "workers never completed round 0");
        assert_eq!(
            sink0.0.lock().unwrap()[0].data,
            vec![11.0, 22.0, 33.0, 44.0, 55.0]
        );
        assert_eq!(
            sink1.0.lock().unwrap()[0].data,
            vec![11.0, 22.0, 33.0, 44.0, 55.0]
        );
    }

    #[test]
    fn lagging_peer_is_zero_filled_once_quorum_is_met_without_it() {
        // S3: N=3, thReduce=thComplete=0.66 (ceil(0.66*3)=2), maxLag=1.
        // Worker 2 never delivers its round-0 messages at all, so it never
        // scatters to (or reduces/broadcasts) its own block. Workers 0 and 1
        // still complete round 0 on just their two blocks, reduced from each
        // other's scatter alone (worker 2's scatter contribution to each is
        // missing and treated as zero); worker 2's own block is entirely
        // absent from the round and is zero-filled in the assembled output,
        // the same zero-fill the reduce buffer gives any block whose owner
        // never reported in.
        let net = LocalNetwork::new();
        let t0 = ChannelTransport::new(&net, "0".to_string());
        let t1 = ChannelTransport::new(&net, "1".to_string());
        let t2 = ChannelTransport::new(&net, "2".to_string());
        let _master = ChannelTransport::new(&net, "master".to_string());

        let sink0 = RecordingSink::default();
        let sink1 = RecordingSink::default();
        let mut w0 = Worker::new(
            t0,
            Box::new(FixedSource(vec![1.0, 2.0, 3.0])),
            Box::new(sink0.clone()),
        );
        let mut w1 = Worker::new(
            t1,
            Box::new(FixedSource(vec![10.0, 20.0, 30.0])),
            Box::new(sink1.clone()),
        );
        // Worker 2 is initialized (so sends/registers as a peer) but its
        // handle loop is never driven, simulating indefinitely delayed
        // delivery of its scatters for round 0.
        let mut w2 = Worker::new(
            t2,
            Box::new(FixedSource(vec![100.0, 200.0, 300.0])),
            Box::new(RecordingSink::default()),
        );

        let init3 = |n: usize, id: PeerId| InitWorkers {
            peers: (0..n as i64).map(|i| (i, i.to_string())).collect(),
            master: "master".to_string(),
            dest_id: id,
            th_reduce: 0.66,
            th_complete: 0.66,
            max_lag: 1,
            data_size: 3,
            max_chunk_size: 2,
        };
        w0.handle(init3(3, 0).into()).unwrap();
        w1.handle(init3(3, 1).into()).unwrap();
        w2.handle(init3(3, 2).into()).unwrap();

        w0.handle(StartAllreduce { round: 0 }.into()).unwrap();
        w1.handle(StartAllreduce { round: 0 }.into()).unwrap();
        // w2 never processes StartAllreduce, so it never scatters.

        let both_done = |sink0: &RecordingSink, sink1: &RecordingSink| {
            sink0.0.lock().unwrap().iter().any(|o| o.iteration == 0)
                && sink1.0.lock().unwrap().iter().any(|o| o.iteration == 0)
        };
        for _ in 0..256 {
            if both_done(&sink0, &sink1) {
                break;
            }
            if let Some(msg) = w0.transport.try_recv().unwrap() {
                w0.handle(msg).unwrap();
            }
            if let Some(msg) = w1.transport.try_recv().unwrap() {
                w1.handle(msg).unwrap();
            }
        }
        assert!(both_done(&sink0, &sink1), "workers never completed round 0");
        assert_eq!(sink0.0.lock().unwrap()[0].data, vec![11.0, 22.0, 0.0]);
        assert_eq!(sink1.0.lock().unwrap()[0].data, vec![11.0, 22.0, 0.0]);
    }

    #[test]
    fn future_round_scatter_is_self_redelivered_until_start_allreduce_arrives() {
        // S4: a ScatterBlock for round 1 arriving before this worker has
        // seen StartAllreduce(1) must be deferred (self-redelivered), not
        // dropped, and consumed once the round actually starts.
        let net = LocalNetwork::new();
        let t0 = ChannelTransport::new(&net, "0".to_string());
        let _master = ChannelTransport::new(&net, "master".to_string());

        let sink0 = RecordingSink::default();
        let mut w0 = Worker::new(
            t0,
            Box::new(FixedSource(vec![1.0, 2.0])),
            Box::new(sink0.clone()),
        );
        w0.handle(init_message(1, 0, 2, 2).into()).unwrap();

        // Deliver round-1 scatter before any StartAllreduce at all.
        w0.handle(
            ScatterBlock {
                value: vec![7.0, 8.0],
                src_id: 0,
                dest_id: 0,
                chunk_id: 0,
                round: 1,
            }
            .into(),
        )
        .unwrap();

        // Drain the self-redelivered StartAllreduce(1) and scatter; with a
        // single peer, the only remaining outbound traffic is this worker's
        // own round-0 and round-1 scatter/reduce to itself.
        for _ in 0..64 {
            if let Some(msg) = w0.transport.try_recv().unwrap() {
                w0.handle(msg).unwrap();
            } else {
                break;
            }
        }

        let outputs = sink0.0.lock().unwrap();
        assert!(
            outputs.iter().any(|o| o.iteration == 1),
            "round 1 never completed from the self-redelivered scatter"
        );
    }

    #[test]
    fn stalled_round_is_force_completed_once_it_falls_out_of_the_lag_window() {
        // Invariant 6 / catch-up: a round that never collects enough
        // scatter data still completes (with whatever zero-filled data it
        // has) once the lag window forces it, so the pipeline never wedges
        // on one missing contribution.
        let net = LocalNetwork::new();
        let t0 = ChannelTransport::new(&net, "0".to_string());
        let sink0 = RecordingSink::default();
        let mut w0 = Worker::new(
            t0,
            Box::new(FixedSource(vec![1.0, 2.0])),
            Box::new(sink0.clone()),
        );

        w0.handle(init_message(1, 0, 2, 2).into()).unwrap();

        // Advance the master's notion of the round well past what this
        // worker has scattered, without ever draining its self-sent
        // ScatterBlock/ReduceBlock messages. Round 0 has maxLag=1, so it is
        // forced to complete once maxRound reaches 2.
        w0.handle(StartAllreduce { round: 0 }.into()).unwrap();
        w0.handle(StartAllreduce { round: 1 }.into()).unwrap();
        w0.handle(StartAllreduce { round: 2 }.into()).unwrap();

        let outputs = sink0.0.lock().unwrap();
        let round0 = outputs.iter().find(|o| o.iteration == 0);
        assert!(round0.is_some(), "round 0 was never force-completed");
        assert_eq!(round0.unwrap().data, vec![0.0, 0.0]);
    }
}
