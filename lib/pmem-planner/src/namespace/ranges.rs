use serde::Serialize;
use tracing::debug;

use super::sizing::minimum_namespace_size;
use crate::{NvmCapabilities, Pool};

/// Range of App Direct namespace sizes a pool can currently host.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct PossibleNamespaceRanges {
    /// Smallest namespace that can be created, in bytes.
    pub smallest: u64,

    /// Largest namespace that can be created, in bytes.
    pub largest: u64,

    /// Granularity of valid sizes between the smallest and largest, in bytes.
    pub increment: u64,
}

/// Calculates the range of App Direct namespace sizes that `pool` can host.
///
/// `largest` is the most available capacity on any single interleave set whose width matches `ways`, or on any set
/// at all when `ways` is zero. `smallest` is always the minimum namespace size of the narrowest set in the pool,
/// whether or not that set matches `ways`.
///
/// If the pool has no free capacity, or the platform does not support App Direct, every bound is zero.
pub fn pool_supported_size_ranges(pool: &Pool, capabilities: &NvmCapabilities, ways: u8) -> PossibleNamespaceRanges {
    let mut ranges = PossibleNamespaceRanges::default();
    if pool.free_capacity == 0 || !capabilities.app_direct_mode {
        return ranges;
    }

    ranges.largest = pool
        .interleave_sets
        .iter()
        .filter(|set| ways == 0 || set.settings.ways == ways)
        .map(|set| set.available_size)
        .max()
        .unwrap_or(0);

    if ranges.largest > 0 {
        let alignment = capabilities.interleave_alignment_bytes();
        let narrowest = pool
            .interleave_sets
            .iter()
            .map(|set| set.dimm_count())
            .fold(pool.dimm_count, usize::min);
        let narrowest = if pool.interleave_sets.is_empty() { 0 } else { narrowest };

        ranges.increment = alignment;
        ranges.smallest = minimum_namespace_size(narrowest, alignment);
    }

    debug!(pool_uid = %pool.uid, ways, ?ranges, "Calculated supported namespace size ranges.");
    ranges
}
