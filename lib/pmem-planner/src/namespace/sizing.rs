//! Namespace sizing rules.
//!
//! An App Direct namespace striped across `ways` Dimms consumes the same amount of capacity from every Dimm, and each
//! Dimm hands out capacity in multiples of the platform's interleave alignment. Namespace capacities therefore have to
//! be multiples of `ways × alignment`, and are never smaller than one GiB per Dimm.
use crate::BYTES_PER_GIB;

/// Returns the granularity, in bytes, that namespace capacities on a set of `ways` Dimms must be a multiple of.
pub fn alignment_granularity(ways: usize, alignment: u64) -> u64 {
    (ways as u64).saturating_mul(alignment)
}

/// Returns the smallest namespace, in bytes, that can be created on a set of `ways` Dimms.
pub fn minimum_namespace_size(ways: usize, alignment: u64) -> u64 {
    let per_gib = (ways as u64).saturating_mul(BYTES_PER_GIB);
    per_gib.max(alignment_granularity(ways, alignment))
}

/// Returns `true` if `capacity` is a multiple of the granularity for a set of `ways` Dimms.
pub fn is_aligned(capacity: u64, ways: usize, alignment: u64) -> bool {
    match alignment_granularity(ways, alignment) {
        0 => true,
        granularity => capacity % granularity == 0,
    }
}

/// Returns the largest block count, no greater than `block_count`, whose capacity is aligned for a set of `ways` Dimms.
///
/// If either the block size or the granularity is zero, the block count is returned unchanged.
pub fn adjust_block_count(block_count: u64, block_size: u32, ways: usize, alignment: u64) -> u64 {
    let granularity = alignment_granularity(ways, alignment);
    let block_size = u64::from(block_size);
    if granularity == 0 || block_size == 0 {
        return block_count;
    }

    // Capacity is a multiple of the granularity exactly when the block count is a multiple of this step.
    let step = granularity / gcd(granularity, block_size);
    (block_count / step) * step
}

pub(crate) fn adjust_block_count_if_allowed(
    block_count: u64, block_size: u32, ways: usize, alignment: u64, allow_adjustment: bool,
) -> u64 {
    if allow_adjustment {
        adjust_block_count(block_count, block_size, ways, alignment)
    } else {
        block_count
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}
