//! Stable linear-time ordering of `u32` keys.
//!
//! Aggregates re-sort their member bounds by encoded min-X every time the
//! bounds move, so the sort is LSD radix over four byte-wide passes rather
//! than a comparison sort. Passes whose byte is constant across all keys are
//! skipped.

/// Return the permutation `order` such that `keys[order[i]]` is ascending.
/// Equal keys keep their relative order.
pub(crate) fn radix_ranks(keys: &[u32]) -> Vec<u32> {
    let n = keys.len();
    let mut ranks: Vec<u32> = (0..n as u32).collect();
    if n < 2 {
        return ranks;
    }
    let mut scratch: Vec<u32> = vec![0; n];

    for pass in 0..4 {
        let shift = pass * 8;

        let mut counts = [0usize; 256];
        for &k in keys {
            counts[((k >> shift) & 0xff) as usize] += 1;
        }
        if counts.iter().any(|&c| c == n) {
            continue;
        }

        let mut offsets = [0usize; 256];
        let mut running = 0;
        for (offset, &count) in offsets.iter_mut().zip(counts.iter()) {
            *offset = running;
            running += count;
        }

        for &index in ranks.iter() {
            let byte = ((keys[index as usize] >> shift) & 0xff) as usize;
            scratch[offsets[byte]] = index;
            offsets[byte] += 1;
        }
        std::mem::swap(&mut ranks, &mut scratch);
    }
    ranks
}
