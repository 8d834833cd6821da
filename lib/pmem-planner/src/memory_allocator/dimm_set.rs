use std::collections::HashSet;

use snafu::Snafu;
use tracing::{debug, error};

use super::Dimm;
use crate::PlannerError;

/// Interleave bitmaps for a socket with six channels, three per memory controller.
///
/// Channels 0 through 2 are attached to memory controller 0, and channels 3 through 5 to memory controller 1. Bitmaps
/// are ordered from widest to narrowest.
pub const DEFAULT_INTERLEAVE_BITMAPS: &[u32] = &[
    // x6
    0b111111, //
    // x4
    0b011011, 0b110110, 0b101101, //
    // x3
    0b000111, 0b111000, //
    // x2
    0b000011, 0b000110, 0b000101, 0b011000, 0b110000, 0b101000, 0b001001, 0b010010, 0b100100, //
    // x1
    0b000001, 0b000010, 0b000100, 0b001000, 0b010000, 0b100000,
];

/// Dimm set builder error.
#[derive(Clone, Debug, Eq, PartialEq, Snafu)]
pub enum DimmSetError {
    /// The Dimms cannot be considered together for interleaving.
    #[snafu(display("invalid Dimms: {}", reason))]
    InvalidDimms {
        /// Why the Dimms were rejected.
        reason: String,
    },
}

impl From<DimmSetError> for PlannerError {
    fn from(e: DimmSetError) -> Self {
        match e {
            DimmSetError::InvalidDimms { reason } => PlannerError::InvalidDimms { reason },
        }
    }
}

/// Builds the largest set of Dimms on a socket that can be interleaved together.
///
/// Channels are identified by their bit in an interleave bitmap: channel `n` is bit `n`. The platform supports a fixed
/// table of bitmaps, and a group of Dimms can be interleaved together when the channels they occupy form one of those
/// bitmaps exactly.
///
/// The builder walks the table in order and, for every bitmap whose channels are all populated, collects the Dimms
/// sitting on those channels. The largest such group wins. When two groups are the same size, the one whose bitmap
/// appears first in the table is chosen.
#[derive(Clone, Debug)]
pub struct InterleavableDimmSetBuilder {
    bitmaps: Vec<u32>,
    dimms: Vec<Dimm>,
}

impl InterleavableDimmSetBuilder {
    /// Creates a new `InterleavableDimmSetBuilder` using [`DEFAULT_INTERLEAVE_BITMAPS`].
    pub fn new() -> Self {
        Self::with_interleave_bitmaps(DEFAULT_INTERLEAVE_BITMAPS.to_vec())
    }

    /// Creates a new `InterleavableDimmSetBuilder` using the given interleave bitmap table.
    ///
    /// Bitmaps are considered in the order given, which also determines how ties between equally-sized groups are
    /// broken.
    pub fn with_interleave_bitmaps(bitmaps: Vec<u32>) -> Self {
        Self {
            bitmaps,
            dimms: Vec::new(),
        }
    }

    /// Sets the candidate Dimms, replacing any previously set.
    pub fn set_dimms(&mut self, dimms: Vec<Dimm>) {
        self.dimms = dimms;
    }

    /// Returns the largest group of candidate Dimms that can be interleaved together.
    ///
    /// Dimms in the returned group keep their relative order from the candidate list. If there are no candidates, the
    /// returned group is empty.
    ///
    /// ## Errors
    ///
    /// If the candidates span more than one socket, if any candidate sits on a channel not covered by the interleave
    /// bitmap table, or if two candidates claim the same slot of the same channel, an error is returned.
    pub fn largest_set_of_interleavable_dimms(&self) -> Result<Vec<Dimm>, DimmSetError> {
        self.validate_dimms()?;

        let populated = self.dimms.iter().fold(0u32, |acc, dimm| acc | channel_bit(dimm));

        let mut largest: Vec<Dimm> = Vec::new();
        for &bitmap in &self.bitmaps {
            if bitmap == 0 || bitmap & populated != bitmap {
                continue;
            }

            let group = self.dimms_matching_bitmap(bitmap);
            if group.len() > largest.len() {
                debug!(bitmap, dimms = group.len(), "Found larger interleavable group.");
                largest = group;
            }
        }

        Ok(largest)
    }

    fn validate_dimms(&self) -> Result<(), DimmSetError> {
        let Some(first) = self.dimms.first() else {
            return Ok(());
        };

        if self.dimms.iter().any(|dimm| dimm.socket_id != first.socket_id) {
            error!(dimms = self.dimms.len(), "Dimms span multiple sockets.");
            return Err(DimmSetError::InvalidDimms {
                reason: "Dimms span more than one socket".to_string(),
            });
        }

        let recognized = self.bitmaps.iter().fold(0u32, |acc, bitmap| acc | bitmap);
        let mut slots = HashSet::new();
        for dimm in &self.dimms {
            let bit = channel_bit(dimm);
            if bit == 0 || bit & recognized == 0 {
                error!(dimm_uid = %dimm.uid, channel_id = dimm.channel_id, "Dimm is on an unrecognized channel.");
                return Err(DimmSetError::InvalidDimms {
                    reason: format!("Dimm {} is on unrecognized channel {}", dimm.uid, dimm.channel_id),
                });
            }

            if !slots.insert((dimm.channel_id, dimm.channel_position)) {
                error!(
                    dimm_uid = %dimm.uid,
                    channel_id = dimm.channel_id,
                    channel_position = dimm.channel_position,
                    "Dimm occupies a slot already claimed by another Dimm."
                );
                return Err(DimmSetError::InvalidDimms {
                    reason: format!(
                        "more than one Dimm in position {} of channel {}",
                        dimm.channel_position, dimm.channel_id
                    ),
                });
            }
        }

        Ok(())
    }

    fn dimms_matching_bitmap(&self, bitmap: u32) -> Vec<Dimm> {
        self.dimms
            .iter()
            .filter(|dimm| channel_bit(dimm) & bitmap != 0)
            .cloned()
            .collect()
    }
}

impl Default for InterleavableDimmSetBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn channel_bit(dimm: &Dimm) -> u32 {
    1u32.checked_shl(dimm.channel_id).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{DimmSetError, InterleavableDimmSetBuilder, DEFAULT_INTERLEAVE_BITMAPS};
    use crate::{memory_allocator::Dimm, test_util::dimm_at, PlannerError};

    fn largest(dimms: Vec<Dimm>) -> Result<Vec<Dimm>, DimmSetError> {
        let mut builder = InterleavableDimmSetBuilder::new();
        builder.set_dimms(dimms);
        builder.largest_set_of_interleavable_dimms()
    }

    fn uids(dimms: &[Dimm]) -> Vec<&str> {
        dimms.iter().map(|dimm| dimm.uid.as_str()).collect()
    }

    #[test]
    fn empty_input_yields_empty_set() {
        assert_eq!(largest(Vec::new()), Ok(Vec::new()));
    }

    #[test]
    fn multiple_sockets_rejected() {
        let dimms = vec![
            dimm_at("a", 0, 0, 0),
            dimm_at("b", 0, 1, 0),
            dimm_at("c", 1, 0, 0),
            dimm_at("d", 1, 1, 0),
        ];

        let error = largest(dimms).unwrap_err();
        assert!(matches!(error, DimmSetError::InvalidDimms { .. }));
        assert!(matches!(PlannerError::from(error), PlannerError::InvalidDimms { .. }));
    }

    #[test]
    fn unrecognized_channel_rejected() {
        let result = largest(vec![dimm_at("a", 0, 0, 0), dimm_at("b", 0, 6, 0)]);
        assert!(matches!(result, Err(DimmSetError::InvalidDimms { .. })));

        let result = largest(vec![dimm_at("a", 0, 40, 0)]);
        assert!(matches!(result, Err(DimmSetError::InvalidDimms { .. })));
    }

    #[test]
    fn duplicate_slot_rejected() {
        let result = largest(vec![dimm_at("a", 0, 2, 1), dimm_at("b", 0, 2, 1)]);
        assert!(matches!(result, Err(DimmSetError::InvalidDimms { .. })));
    }

    #[test]
    fn fully_populated_socket_interleaves_everything() {
        let dimms = (0..6).map(|ch| dimm_at(&format!("d{}", ch), 0, ch, 0)).collect::<Vec<_>>();
        let set = largest(dimms.clone()).unwrap();
        assert_eq!(set, dimms);
    }

    #[test]
    fn five_channels_fall_back_to_x4() {
        let dimms = (0..5).map(|ch| dimm_at(&format!("d{}", ch), 0, ch, 0)).collect::<Vec<_>>();
        let set = largest(dimms).unwrap();
        assert_eq!(uids(&set), vec!["d0", "d1", "d3", "d4"]);
    }

    #[test]
    fn two_dimms_per_channel_count_towards_group() {
        let dimms = vec![
            dimm_at("a0", 0, 0, 0),
            dimm_at("a1", 0, 0, 1),
            dimm_at("b0", 0, 1, 0),
            dimm_at("b1", 0, 1, 1),
            dimm_at("c0", 0, 3, 0),
        ];

        // Channels 0 and 1 form an x2 bitmap holding four Dimms, beating channels 0 and 3 with three.
        let set = largest(dimms).unwrap();
        assert_eq!(uids(&set), vec!["a0", "a1", "b0", "b1"]);
    }

    #[test]
    fn ties_go_to_first_bitmap_in_table() {
        // Channels 0 and 4 are not an x2 pattern, leaving two single-channel groups of one Dimm each.
        let set = largest(vec![dimm_at("e", 0, 4, 0), dimm_at("a", 0, 0, 0)]).unwrap();
        assert_eq!(uids(&set), vec!["a"]);
    }

    #[test]
    fn largest_of_three_groups_with_custom_table() {
        let mut dimms = Vec::new();
        for ch in 0..3 {
            dimms.push(dimm_at(&format!("first{}", ch), 0, ch, 0));
        }
        for ch in 3..6 {
            dimms.push(dimm_at(&format!("second{}", ch), 0, ch, 0));
        }
        for ch in 6..11 {
            dimms.push(dimm_at(&format!("third{}", ch), 0, ch, 0));
        }

        let mut builder = InterleavableDimmSetBuilder::with_interleave_bitmaps(vec![0b111, 0b111000, 0b11111000000]);
        builder.set_dimms(dimms);
        let set = builder.largest_set_of_interleavable_dimms().unwrap();

        assert_eq!(set.len(), 5);
        assert!(set.iter().all(|dimm| dimm.uid.starts_with("third")));
    }

    fn arb_populated_channels() -> impl Strategy<Value = Vec<(u32, u32)>> {
        // Up to two Dimms per channel, across the six default channels.
        proptest::collection::btree_set((0u32..6, 0u32..2), 0..12).prop_map(|slots| slots.into_iter().collect())
    }

    proptest! {
        #[test]
        fn property_test_group_is_maximal(slots in arb_populated_channels()) {
            let dimms = slots
                .iter()
                .map(|(ch, pos)| dimm_at(&format!("d{}-{}", ch, pos), 0, *ch, *pos))
                .collect::<Vec<_>>();
            let set = largest(dimms.clone()).unwrap();

            // The chosen group always occupies exactly one of the supported bitmaps.
            let chosen = set.iter().fold(0u32, |acc, dimm| acc | (1 << dimm.channel_id));
            prop_assert_eq!(set.is_empty(), dimms.is_empty());
            if !set.is_empty() {
                prop_assert!(DEFAULT_INTERLEAVE_BITMAPS.contains(&chosen));
            }

            // No other fully-populated bitmap holds more Dimms.
            let populated = dimms.iter().fold(0u32, |acc, dimm| acc | (1 << dimm.channel_id));
            for bitmap in DEFAULT_INTERLEAVE_BITMAPS {
                if bitmap & populated == *bitmap {
                    let members = dimms.iter().filter(|dimm| (1 << dimm.channel_id) & bitmap != 0).count();
                    prop_assert!(members <= set.len());
                }
            }
        }
    }
}
