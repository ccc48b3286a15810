//! Block and chunk boundary arithmetic shared by the worker and its buffers.
//!
//! The canonical half-open formula `[k*size, min((k+1)*size, len))` is used
//! everywhere; see Design Notes for why the source's clamped-both-ends
//! formula was not carried over (it produces zero-length or off-by-one
//! trailing chunks when a block does not fill its last chunk exactly).

/// Ceiling division for non-negative integers.
pub fn ceil_div(numerator: usize, denominator: usize) -> usize {
    (numerator + denominator - 1) / denominator
}

/// The size of block `idx` out of `num_blocks` blocks covering `data_size`
/// elements: `stepSize = ceil(dataSize / numBlocks)` for every block but the
/// last, which absorbs the remainder.
pub fn block_size(data_size: usize, num_blocks: usize, idx: usize) -> usize {
    let range = block_range(data_size, num_blocks, idx);
    range.end - range.start
}

/// The half-open range of global indices covered by block `idx`.
pub fn block_range(data_size: usize, num_blocks: usize, idx: usize) -> std::ops::Range<usize> {
    let step = ceil_div(data_size, num_blocks);
    let start = (idx * step).min(data_size);
    let end = ((idx + 1) * step).min(data_size);
    start..end
}

/// The number of chunks a block of `block_size` elements is split into.
pub fn num_chunks(block_size: usize, max_chunk_size: usize) -> usize {
    if block_size == 0 {
        0
    } else {
        ceil_div(block_size, max_chunk_size)
    }
}

/// The half-open range of block-local indices covered by chunk `chunk_id`.
pub fn chunk_range(
    block_size: usize,
    max_chunk_size: usize,
    chunk_id: usize,
) -> std::ops::Range<usize> {
    let start = (chunk_id * max_chunk_size).min(block_size);
    let end = ((chunk_id + 1) * max_chunk_size).min(block_size);
    start..end
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_partition_exactly() {
        // dataSize=5, N=2 -> block 0 = [0,3), block 1 = [3,5)
        assert_eq!(block_range(5, 2, 0), 0..3);
        assert_eq!(block_range(5, 2, 1), 3..5);
        assert_eq!(block_size(5, 2, 0), 3);
        assert_eq!(block_size(5, 2, 1), 2);
    }

    #[test]
    fn blocks_partition_evenly() {
        assert_eq!(block_range(4, 2, 0), 0..2);
        assert_eq!(block_range(4, 2, 1), 2..4);
    }

    #[test]
    fn chunking_splits_block_by_max_chunk_size() {
        // block of 3, maxChunkSize=2 -> chunks of sizes 2, 1
        assert_eq!(num_chunks(3, 2), 2);
        assert_eq!(chunk_range(3, 2, 0), 0..2);
        assert_eq!(chunk_range(3, 2, 1), 2..3);
    }

    #[test]
    fn chunking_handles_empty_block() {
        assert_eq!(num_chunks(0, 2), 0);
    }

    #[test]
    fn chunking_fills_final_chunk_exactly() {
        // block of 2, maxChunkSize=2 -> a single full chunk, no trailing
        // zero-length chunk
        assert_eq!(num_chunks(2, 2), 1);
        assert_eq!(chunk_range(2, 2, 0), 0..2);
    }
}
