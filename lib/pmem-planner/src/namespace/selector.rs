use tracing::{debug, error};

use super::{
    sizing::{adjust_block_count_if_allowed, is_aligned, minimum_namespace_size},
    NamespaceCreateSettings, NamespaceType, SecurityGoals,
};
use crate::{DeviceDiscovery, InterleaveFormat, InterleaveSet, NvmCapabilities, PlannerError, Pool};

/// Where a new App Direct namespace should be placed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Placement {
    /// Driver id of the chosen interleave set.
    pub interleave_set_id: u32,

    /// Block count to create the namespace with, after any adjustment.
    pub block_count: u64,
}

/// Picks the interleave set that a new App Direct namespace should be carved from.
///
/// Sets are considered in the order the pool declares them, and the first set that satisfies every requirement wins.
/// Sets with a locked member Dimm are never considered.
///
/// When no set qualifies, the error describes the first requirement, in the order below, that no set could meet:
///
/// - every set has a locked member: `BadSecurityState`
/// - no set has room for the capacity, or the capacity is below the set's minimum: `BadSize`
/// - no set of the right size meets the security goals: `BadSecurityGoal`
/// - no set of the right size can host the capacity at its alignment: `BadAlignment`
/// - otherwise, no single set meets every requirement at once: `BadNamespaceSettings`
pub struct InterleaveSetSelector<'a> {
    pool: &'a Pool,
    capabilities: &'a NvmCapabilities,
    devices: &'a [DeviceDiscovery],
}

#[derive(Default)]
struct Diagnosis {
    any_unlocked: bool,
    any_size_fit: bool,
    any_security_met: bool,
    any_alignment_met: bool,
}

impl<'a> InterleaveSetSelector<'a> {
    /// Creates a new `InterleaveSetSelector` for the given pool.
    ///
    /// `devices` supplies the lock state and security capabilities of the Dimms backing the pool.
    pub fn new(pool: &'a Pool, capabilities: &'a NvmCapabilities, devices: &'a [DeviceDiscovery]) -> Self {
        Self {
            pool,
            capabilities,
            devices,
        }
    }

    /// Selects an interleave set for a namespace with the given settings.
    ///
    /// If `format` is given, the chosen set's interleave settings must satisfy it. If `allow_adjustment` is `true`, the
    /// requested block count is rounded down to the nearest aligned capacity for each set before it is checked.
    ///
    /// # Errors
    ///
    /// If the settings are not for an App Direct namespace, `BadNamespaceType` is returned. If no set qualifies, the
    /// error describes why, as outlined in the type-level documentation.
    pub fn select(
        &self, settings: &NamespaceCreateSettings, format: Option<&InterleaveFormat>, allow_adjustment: bool,
    ) -> Result<Placement, PlannerError> {
        if settings.namespace_type != NamespaceType::AppDirect {
            error!(namespace_type = ?settings.namespace_type, "Namespace is not App Direct.");
            return Err(PlannerError::BadNamespaceType {
                reason: "only App Direct namespaces can be placed on interleave sets",
            });
        }

        let alignment = self.capabilities.interleave_alignment_bytes();
        let mut diagnosis = Diagnosis::default();

        for set in &self.pool.interleave_sets {
            if set.has_locked_member(self.devices) {
                debug!(interleave_set_id = set.driver_id, "Skipping interleave set with locked Dimms.");
                continue;
            }
            diagnosis.any_unlocked = true;

            let ways = set.dimm_count();
            let minimum_bytes = minimum_namespace_size(ways, alignment);
            let block_count = adjust_block_count_if_allowed(
                settings.block_count,
                settings.block_size,
                ways,
                alignment,
                allow_adjustment,
            );
            let requested_bytes = block_count.saturating_mul(u64::from(settings.block_size));

            if requested_bytes > set.available_size || requested_bytes < minimum_bytes {
                debug!(
                    interleave_set_id = set.driver_id,
                    requested_bytes,
                    available_bytes = set.available_size,
                    minimum_bytes,
                    "Interleave set cannot host the requested capacity."
                );
                continue;
            }
            diagnosis.any_size_fit = true;

            let security_met = self.meets_security_goals(set, &settings.security);
            let format_met = format.map_or(true, |requested| set.settings.satisfies(requested));
            let alignment_met = is_aligned(requested_bytes, ways, alignment);

            diagnosis.any_security_met |= security_met;
            diagnosis.any_alignment_met |= alignment_met;

            if security_met && format_met && alignment_met {
                debug!(interleave_set_id = set.driver_id, block_count, "Selected interleave set for namespace.");
                return Ok(Placement {
                    interleave_set_id: set.driver_id,
                    block_count,
                });
            }

            debug!(
                interleave_set_id = set.driver_id,
                security_met, format_met, alignment_met, "Interleave set does not meet namespace settings."
            );
        }

        Err(self.diagnose(diagnosis, settings))
    }

    fn meets_security_goals(&self, set: &InterleaveSet, goals: &SecurityGoals) -> bool {
        if goals.is_ignored() {
            return true;
        }

        // Dimms that cannot be discovered cannot be shown to meet the goals.
        set.member_devices(self.devices)
            .all(|device| device.is_some_and(|device| goals.matches_device(device)))
    }

    fn diagnose(&self, diagnosis: Diagnosis, settings: &NamespaceCreateSettings) -> PlannerError {
        let pool_uid = self.pool.uid.as_str();
        let requested_bytes = settings.capacity();

        if !diagnosis.any_unlocked {
            error!(pool_uid, "Every interleave set in the pool has locked Dimms.");
            PlannerError::BadSecurityState
        } else if !diagnosis.any_size_fit {
            error!(pool_uid, requested_bytes, "No interleave set can host the requested capacity.");
            PlannerError::BadSize {
                reason: format!(
                    "no interleave set in pool {} can host a namespace of {} bytes",
                    pool_uid, requested_bytes
                ),
            }
        } else if !diagnosis.any_security_met {
            error!(pool_uid, security = ?settings.security, "No interleave set meets the requested security goals.");
            PlannerError::BadSecurityGoal
        } else if !diagnosis.any_alignment_met {
            error!(pool_uid, requested_bytes, "Requested capacity is not aligned for any interleave set.");
            PlannerError::BadAlignment {
                reason: format!(
                    "{} bytes is not a multiple of the interleave granularity of any interleave set in pool {}",
                    requested_bytes, pool_uid
                ),
            }
        } else {
            error!(pool_uid, "No interleave set meets every requested namespace setting.");
            PlannerError::BadNamespaceSettings
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::{
        namespace::{EncryptionGoal, EraseCapableGoal},
        test_util::{device, interleave_set, persistent_pool, unlocked_devices, GIB},
        InterleaveSize, LockState,
    };

    fn caps() -> NvmCapabilities {
        NvmCapabilities::default()
    }

    fn four_way_pool() -> (Pool, Vec<DeviceDiscovery>) {
        let set = interleave_set(11, &["d0", "d1", "d2", "d3"], 400 * GIB);
        let devices = unlocked_devices(&["d0", "d1", "d2", "d3"]);
        (persistent_pool("pool-0", vec![set]), devices)
    }

    #[test]
    fn unlocked_set_with_room_is_selected() {
        let (pool, devices) = four_way_pool();
        let caps = caps();
        let settings = NamespaceCreateSettings::app_direct(100 * GIB);

        let placement = InterleaveSetSelector::new(&pool, &caps, &devices)
            .select(&settings, None, false)
            .unwrap();

        assert_eq!(
            placement,
            Placement {
                interleave_set_id: 11,
                block_count: 100 * GIB
            }
        );
    }

    #[test]
    fn locked_member_blocks_placement() {
        let (pool, mut devices) = four_way_pool();
        devices[2].lock_state = LockState::Locked;
        let caps = caps();
        let settings = NamespaceCreateSettings::app_direct(100 * GIB);

        let result = InterleaveSetSelector::new(&pool, &caps, &devices).select(&settings, None, false);
        assert_eq!(result, Err(PlannerError::BadSecurityState));
    }

    #[test]
    fn capacity_beyond_available_is_bad_size() {
        let (pool, devices) = four_way_pool();
        let caps = caps();
        let settings = NamespaceCreateSettings::app_direct(500 * GIB);

        let result = InterleaveSetSelector::new(&pool, &caps, &devices).select(&settings, None, false);
        assert!(matches!(result, Err(PlannerError::BadSize { .. })));
    }

    #[test]
    fn capacity_below_minimum_is_bad_size() {
        let (pool, devices) = four_way_pool();
        let caps = caps();
        let settings = NamespaceCreateSettings::app_direct(2 * GIB);

        let result = InterleaveSetSelector::new(&pool, &caps, &devices).select(&settings, None, false);
        assert!(matches!(result, Err(PlannerError::BadSize { .. })));
    }

    #[test]
    fn skips_locked_set_for_later_unlocked_one() {
        let locked = interleave_set(1, &["a0", "a1"], 400 * GIB);
        let unlocked = interleave_set(2, &["b0", "b1"], 400 * GIB);
        let pool = persistent_pool("pool-0", vec![locked, unlocked]);
        let mut devices = unlocked_devices(&["a0", "a1", "b0", "b1"]);
        devices[0].lock_state = LockState::Locked;
        let caps = caps();

        let placement = InterleaveSetSelector::new(&pool, &caps, &devices)
            .select(&NamespaceCreateSettings::app_direct(10 * GIB), None, false)
            .unwrap();
        assert_eq!(placement.interleave_set_id, 2);
    }

    #[test]
    fn first_fit_in_declared_order() {
        let small = interleave_set(1, &["a0", "a1"], 8 * GIB);
        let large = interleave_set(2, &["b0", "b1"], 400 * GIB);
        let also_large = interleave_set(3, &["c0", "c1"], 400 * GIB);
        let pool = persistent_pool("pool-0", vec![small, large, also_large]);
        let devices = unlocked_devices(&["a0", "a1", "b0", "b1", "c0", "c1"]);
        let caps = caps();

        let placement = InterleaveSetSelector::new(&pool, &caps, &devices)
            .select(&NamespaceCreateSettings::app_direct(10 * GIB), None, false)
            .unwrap();
        assert_eq!(placement.interleave_set_id, 2);
    }

    #[test]
    fn unmet_security_goal() {
        let (pool, devices) = four_way_pool();
        let caps = caps();
        let mut settings = NamespaceCreateSettings::app_direct(100 * GIB);
        settings.security.erase_capable = EraseCapableGoal::True;

        let result = InterleaveSetSelector::new(&pool, &caps, &devices).select(&settings, None, false);
        assert_eq!(result, Err(PlannerError::BadSecurityGoal));
    }

    #[test]
    fn undiscoverable_member_fails_security_goal() {
        let (pool, mut devices) = four_way_pool();
        devices.pop();
        let caps = caps();
        let mut settings = NamespaceCreateSettings::app_direct(100 * GIB);
        settings.security.encryption = EncryptionGoal::On;

        let result = InterleaveSetSelector::new(&pool, &caps, &devices).select(&settings, None, false);
        assert_eq!(result, Err(PlannerError::BadSecurityGoal));

        // With no goals set, the missing record does not matter.
        let settings = NamespaceCreateSettings::app_direct(100 * GIB);
        assert!(InterleaveSetSelector::new(&pool, &caps, &devices)
            .select(&settings, None, false)
            .is_ok());
    }

    #[test]
    fn misaligned_capacity_without_adjustment() {
        let (pool, devices) = four_way_pool();
        let caps = caps();
        let settings = NamespaceCreateSettings::app_direct(10 * GIB);

        let result = InterleaveSetSelector::new(&pool, &caps, &devices).select(&settings, None, false);
        assert!(matches!(result, Err(PlannerError::BadAlignment { .. })));

        let placement = InterleaveSetSelector::new(&pool, &caps, &devices)
            .select(&settings, None, true)
            .unwrap();
        assert_eq!(placement.block_count, 8 * GIB);
    }

    #[test]
    fn unmet_format_is_bad_settings() {
        let (mut pool, devices) = four_way_pool();
        pool.interleave_sets[0].settings = InterleaveFormat {
            ways: 4,
            channel: InterleaveSize::Size4KiB,
            imc: InterleaveSize::Size4KiB,
        };
        let caps = caps();
        let settings = NamespaceCreateSettings::app_direct(100 * GIB);

        let x1 = InterleaveFormat {
            ways: 1,
            ..Default::default()
        };
        let result = InterleaveSetSelector::new(&pool, &caps, &devices).select(&settings, Some(&x1), false);
        assert_eq!(result, Err(PlannerError::BadNamespaceSettings));

        let matching = pool.interleave_sets[0].settings;
        assert!(InterleaveSetSelector::new(&pool, &caps, &devices)
            .select(&settings, Some(&matching), false)
            .is_ok());
    }

    #[test]
    fn storage_namespace_rejected() {
        let (pool, devices) = four_way_pool();
        let caps = caps();
        let mut settings = NamespaceCreateSettings::app_direct(100 * GIB);
        settings.namespace_type = NamespaceType::Storage;

        let result = InterleaveSetSelector::new(&pool, &caps, &devices).select(&settings, None, false);
        assert!(matches!(result, Err(PlannerError::BadNamespaceType { .. })));
    }

    #[test]
    fn empty_pool_has_no_unlocked_set() {
        let pool = persistent_pool("pool-0", Vec::new());
        let caps = caps();

        let result = InterleaveSetSelector::new(&pool, &caps, &[]).select(
            &NamespaceCreateSettings::app_direct(GIB),
            None,
            false,
        );
        assert_eq!(result, Err(PlannerError::BadSecurityState));
    }

    proptest! {
        #[test]
        fn property_test_never_places_on_locked_set(
            locked in proptest::collection::vec(any::<bool>(), 1..6),
            capacity_gib in 1u64..600,
        ) {
            let mut sets = Vec::new();
            let mut devices = Vec::new();
            for (i, is_locked) in locked.iter().enumerate() {
                let uids = [format!("s{}-a", i), format!("s{}-b", i)];
                sets.push(interleave_set(i as u32, &[uids[0].as_str(), uids[1].as_str()], 400 * GIB));
                devices.push(device(&uids[0], if *is_locked { LockState::Locked } else { LockState::Unlocked }));
                devices.push(device(&uids[1], LockState::Unlocked));
            }
            let pool = persistent_pool("pool-0", sets);
            let caps = caps();
            let settings = NamespaceCreateSettings::app_direct(capacity_gib * GIB);

            match InterleaveSetSelector::new(&pool, &caps, &devices).select(&settings, None, true) {
                Ok(placement) => {
                    prop_assert!(!locked[placement.interleave_set_id as usize]);
                    prop_assert!(placement.block_count <= settings.block_count);
                    prop_assert!(is_aligned(placement.block_count, 2, GIB));
                }
                Err(e) => {
                    if locked.iter().all(|is_locked| *is_locked) {
                        prop_assert_eq!(e, PlannerError::BadSecurityState);
                    }
                }
            }
        }
    }
}
