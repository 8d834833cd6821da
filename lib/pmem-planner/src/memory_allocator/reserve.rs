use std::collections::BTreeMap;

use snafu::Snafu;
use tracing::{debug, warn};

use super::{Dimm, InterleavableDimmSetBuilder};

/// Reserve Dimm selector error.
#[derive(Debug, Eq, PartialEq, Snafu)]
pub enum ReserveError {
    /// There were no Dimms to choose from.
    #[snafu(display("no Dimms available to reserve"))]
    NoDimms,
}

/// Chooses the Dimm to set aside as the reserve device.
///
/// Reserving a Dimm removes its capacity from interleaving, so the selector prefers a Dimm that would not have been
/// interleaved anyway: the first candidate, in input order, that falls outside the largest interleavable set of its
/// socket.
///
/// When every candidate is part of its socket's largest set, the reserve comes from the socket with the most Dimms
/// (the lowest socket id on ties), and within that socket, the Dimm in the highest channel and channel position. Any
/// remaining tie is broken by the greatest uid.
pub struct ReserveDimmSelector<'a> {
    dimms: &'a [Dimm],
    builder: InterleavableDimmSetBuilder,
}

impl<'a> ReserveDimmSelector<'a> {
    /// Creates a new `ReserveDimmSelector` over the given candidates.
    pub fn new(dimms: &'a [Dimm]) -> Self {
        Self {
            dimms,
            builder: InterleavableDimmSetBuilder::new(),
        }
    }

    /// Sets the builder used to determine each socket's largest interleavable set.
    pub fn with_dimm_set_builder(mut self, builder: InterleavableDimmSetBuilder) -> Self {
        self.builder = builder;
        self
    }

    /// Returns the Dimm to reserve.
    ///
    /// ## Errors
    ///
    /// If there are no candidates, `ReserveError::NoDimms` is returned.
    pub fn reserved_dimm(&self) -> Result<&'a Dimm, ReserveError> {
        if self.dimms.is_empty() {
            return Err(ReserveError::NoDimms);
        }

        let mut sockets: BTreeMap<u16, Vec<Dimm>> = BTreeMap::new();
        for dimm in self.dimms {
            sockets.entry(dimm.socket_id).or_default().push(dimm.clone());
        }

        let mut interleaved_uids = Vec::new();
        for (socket_id, socket_dimms) in &sockets {
            let mut builder = self.builder.clone();
            builder.set_dimms(socket_dimms.clone());
            match builder.largest_set_of_interleavable_dimms() {
                Ok(set) => interleaved_uids.extend(set.into_iter().map(|dimm| dimm.uid)),
                Err(e) => {
                    // Without a valid set there is no way to tell which Dimms would go unused, so treat them all as
                    // interleaved.
                    warn!(socket_id, error = %e, "Unable to determine interleavable Dimms on socket.");
                    interleaved_uids.extend(socket_dimms.iter().map(|dimm| dimm.uid.clone()));
                }
            }
        }

        if let Some(dimm) = self
            .dimms
            .iter()
            .find(|dimm| !interleaved_uids.contains(&dimm.uid))
        {
            debug!(dimm_uid = %dimm.uid, "Reserving Dimm outside of the largest interleavable set.");
            return Ok(dimm);
        }

        let mut busiest_socket = None;
        let mut busiest_count = 0;
        for (socket_id, socket_dimms) in &sockets {
            if socket_dimms.len() > busiest_count {
                busiest_socket = Some(*socket_id);
                busiest_count = socket_dimms.len();
            }
        }

        let reserved = self
            .dimms
            .iter()
            .filter(|dimm| Some(dimm.socket_id) == busiest_socket)
            .max_by(|a, b| {
                (a.channel_id, a.channel_position, &a.uid).cmp(&(b.channel_id, b.channel_position, &b.uid))
            })
            .ok_or(ReserveError::NoDimms)?;

        debug!(dimm_uid = %reserved.uid, socket_id = reserved.socket_id, "Reserving Dimm from busiest socket.");
        Ok(reserved)
    }
}

#[cfg(test)]
mod tests {
    use super::{ReserveDimmSelector, ReserveError};
    use crate::{memory_allocator::Dimm, test_util::dimm_at};

    fn reserved_uid(dimms: &[Dimm]) -> Result<&str, ReserveError> {
        ReserveDimmSelector::new(dimms)
            .reserved_dimm()
            .map(|dimm| dimm.uid.as_str())
    }

    #[test]
    fn no_dimms() {
        assert_eq!(reserved_uid(&[]), Err(ReserveError::NoDimms));
    }

    #[test]
    fn prefers_dimm_outside_largest_set() {
        // Channels 0 through 4 populated: the largest set is the x4 on channels 0, 1, 3 and 4.
        let dimms = (0..5).map(|ch| dimm_at(&format!("d{}", ch), 0, ch, 0)).collect::<Vec<_>>();
        assert_eq!(reserved_uid(&dimms), Ok("d2"));
    }

    #[test]
    fn fully_interleaved_socket_gives_up_highest_channel() {
        let dimms = (0..6).map(|ch| dimm_at(&format!("d{}", ch), 0, ch, 0)).collect::<Vec<_>>();
        assert_eq!(reserved_uid(&dimms), Ok("d5"));
    }

    #[test]
    fn busiest_socket_chosen_when_everything_interleaves() {
        let mut dimms = [0, 1, 3, 4]
            .into_iter()
            .map(|ch| dimm_at(&format!("s1-d{}", ch), 1, ch, 0))
            .collect::<Vec<_>>();
        dimms.extend((0..6).map(|ch| dimm_at(&format!("s0-d{}", ch), 0, ch, 0)));

        assert_eq!(reserved_uid(&dimms), Ok("s0-d5"));
    }

    #[test]
    fn socket_ties_go_to_lowest_socket_id() {
        let dimms = vec![
            dimm_at("s1-a", 1, 0, 0),
            dimm_at("s1-b", 1, 1, 0),
            dimm_at("s0-a", 0, 0, 0),
            dimm_at("s0-b", 0, 1, 0),
        ];

        assert_eq!(reserved_uid(&dimms), Ok("s0-b"));
    }

    #[test]
    fn channel_position_breaks_channel_ties() {
        let dimms = vec![
            dimm_at("a0", 0, 0, 0),
            dimm_at("b1", 0, 1, 1),
            dimm_at("a1", 0, 0, 1),
            dimm_at("b0", 0, 1, 0),
        ];

        assert_eq!(reserved_uid(&dimms), Ok("b1"));
    }

    #[test]
    fn invalid_socket_is_not_preferred() {
        // Both Dimms claim the same slot, so the socket has no valid interleavable set to fall outside of.
        let dimms = vec![dimm_at("a", 0, 2, 0), dimm_at("b", 0, 2, 0)];
        assert_eq!(reserved_uid(&dimms), Ok("b"));
    }
}
