//! A ring of per-round, per-peer, per-chunk float slots.
//!
//! `ChunkedRoundBuffer` absorbs scatters and reduced blocks that may arrive
//! out of order and out of round, and answers the quorum predicates
//! (`reach_threshold`, `reach_round_threshold`) the worker's state machine
//! uses to decide when to act. A worker owns two instances: `scatterBuf`
//! (peer axis = contributing source, chunk axis = position within the
//! block this worker owns) and `reduceBuf` (peer axis = block owner, chunk
//! axis = position within that owner's own block).

use crate::wire::{PeerId, Round};
use std::collections::VecDeque;

#[derive(Clone)]
struct Slot {
    present: bool,
    len: usize,
    values: Vec<f64>,
}

impl Slot {
    fn empty(max_chunk_size: usize) -> Self {
        Slot {
            present: false,
            len: 0,
            values: vec![0.0; max_chunk_size],
        }
    }

    fn clear(&mut self) {
        self.present = false;
        self.len = 0;
        for v in &mut self.values {
            *v = 0.0;
        }
    }
}

#[derive(Clone)]
struct Cell {
    slots: Vec<Slot>,
    count: usize,
}

impl Cell {
    fn new(peer_size: usize, max_chunk_size: usize) -> Self {
        Cell {
            slots: (0..peer_size).map(|_| Slot::empty(max_chunk_size)).collect(),
            count: 0,
        }
    }

    fn clear(&mut self) {
        self.count = 0;
        for slot in &mut self.slots {
            slot.clear();
        }
    }
}

#[derive(Clone)]
struct Row {
    cells: Vec<Cell>,
}

impl Row {
    fn new(num_chunks: usize, peer_size: usize, max_chunk_size: usize) -> Self {
        Row {
            cells: (0..num_chunks)
                .map(|_| Cell::new(peer_size, max_chunk_size))
                .collect(),
        }
    }

    fn clear(&mut self) {
        for cell in &mut self.cells {
            cell.clear();
        }
    }
}

/// A `maxLag+1`-deep ring of `peerSize x numChunks` float slots, addressed by
/// round relative to a sliding `baseRound`.
pub struct ChunkedRoundBuffer {
    peer_size: usize,
    num_chunks: usize,
    max_chunk_size: usize,
    threshold: f64,
    base_round: Round,
    rows: VecDeque<Row>,
}

impl ChunkedRoundBuffer {
    /// `depth` is the number of rounds the buffer can hold at once
    /// (`maxLag + 1` per the worker's allocation).
    pub fn new(
        depth: usize,
        peer_size: usize,
        num_chunks: usize,
        max_chunk_size: usize,
        threshold: f64,
    ) -> Self {
        let rows = (0..depth)
            .map(|_| Row::new(num_chunks, peer_size, max_chunk_size))
            .collect();
        ChunkedRoundBuffer {
            peer_size,
            num_chunks,
            max_chunk_size,
            threshold,
            base_round: 0,
            rows,
        }
    }

    pub fn peer_size(&self) -> usize {
        self.peer_size
    }

    pub fn num_chunks(&self) -> usize {
        self.num_chunks
    }

    pub fn base_round(&self) -> Round {
        self.base_round
    }

    pub fn depth(&self) -> usize {
        self.rows.len()
    }

    /// `row` for a logical round, or `None` if it has already been evicted
    /// or is beyond the buffer's lag window.
    pub fn row_of(&self, round: Round) -> Option<usize> {
        let row = round - self.base_round;
        if row >= 0 && (row as usize) < self.rows.len() {
            Some(row as usize)
        } else {
            None
        }
    }

    /// Stores `values` for `(row, src_id, chunk_id)`. Idempotent: storing the
    /// same key twice overwrites the slot but leaves `count` unchanged.
    pub fn store(&mut self, row: usize, src_id: PeerId, chunk_id: usize, values: &[f64]) {
        assert!(
            values.len() <= self.max_chunk_size,
            "chunk of length {} exceeds maxChunkSize {}",
            values.len(),
            self.max_chunk_size
        );
        let cell = &mut self.rows[row].cells[chunk_id];
        let slot = &mut cell.slots[src_id as usize];
        if !slot.present {
            slot.present = true;
            cell.count += 1;
        }
        slot.len = values.len();
        slot.values[..values.len()].copy_from_slice(values);
        for v in &mut slot.values[values.len()..] {
            *v = 0.0;
        }
    }

    pub fn count(&self, row: usize, chunk_id: usize) -> usize {
        self.rows[row].cells[chunk_id].count
    }

    fn threshold_count(&self) -> usize {
        ((self.threshold * self.peer_size as f64).ceil() as usize).max(1)
    }

    pub fn reach_threshold(&self, row: usize, chunk_id: usize) -> bool {
        self.count(row, chunk_id) >= self.threshold_count()
    }

    pub fn reach_round_threshold(&self, row: usize) -> bool {
        (0..self.num_chunks).all(|chunk_id| self.reach_threshold(row, chunk_id))
    }

    /// The per-peer contributions to `(row, chunk_id)`, zero-filled for
    /// peers that have not stored anything yet, plus the chunk's actual
    /// length (taken from whichever peer has reported it; all contributing
    /// peers agree on this for a single owned block).
    pub fn get(&self, row: usize, chunk_id: usize) -> (Vec<&[f64]>, usize) {
        let cell = &self.rows[row].cells[chunk_id];
        let len = cell
            .slots
            .iter()
            .find(|s| s.present)
            .map(|s| s.len)
            .unwrap_or(0);
        let slots = cell.slots.iter().map(|s| &s.values[..len]).collect();
        (slots, len)
    }

    /// Reassembles the full vector for `row` by concatenating, in peer
    /// (block-owner) order, each peer's own chunks in chunk order. Peers
    /// whose data has not yet arrived contribute a zero block of
    /// `owner_block_sizes[peer]` elements, so a partially-filled row still
    /// reassembles to the right total length.
    pub fn assemble_row(&self, round: Round, owner_block_sizes: &[usize]) -> Vec<f64> {
        let row = self
            .row_of(round)
            .expect("assemble_row called on an evicted or future round");
        let cells = &self.rows[row].cells;
        let mut out = Vec::with_capacity(owner_block_sizes.iter().sum());
        for (owner, &block_size) in owner_block_sizes.iter().enumerate() {
            let owner_num_chunks = crate::partition::num_chunks(block_size, self.max_chunk_size);
            for chunk_id in 0..owner_num_chunks.min(self.num_chunks) {
                let want = crate::partition::chunk_range(block_size, self.max_chunk_size, chunk_id);
                let slot = &cells[chunk_id].slots[owner];
                if slot.present {
                    out.extend_from_slice(&slot.values[..slot.len]);
                } else {
                    out.extend(std::iter::repeat(0.0).take(want.end - want.start));
                }
            }
        }
        out
    }

    /// Advances `baseRound` by one round, evicting the oldest row and
    /// appending a cleared row at the far end.
    pub fn up(&mut self) {
        let mut evicted = self.rows.pop_front().expect("buffer has at least one row");
        evicted.clear();
        self.rows.push_back(evicted);
        self.base_round += 1;
    }
}
