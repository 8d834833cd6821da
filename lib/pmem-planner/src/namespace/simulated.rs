use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CreationId, EnableState, NamespaceCreateRequest, NamespaceDriver, NamespaceHealth, NamespaceRecord};
use crate::{memory_allocator::Dimm, DeviceDiscovery, LockState, NvmCapabilities, PlannerError, Pool, PoolType};

/// A Dimm in an inventory snapshot.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct InventoryDimm {
    /// Topology of the Dimm.
    #[serde(flatten)]
    pub dimm: Dimm,

    /// Platform device handle.
    #[serde(default)]
    pub device_handle: u32,

    /// Current lock state.
    #[serde(default)]
    pub lock_state: LockState,

    /// Whether the Dimm supports secure erase.
    #[serde(default)]
    pub erase_capable: bool,
}

impl InventoryDimm {
    /// Returns the security view of this Dimm.
    pub fn device(&self) -> DeviceDiscovery {
        DeviceDiscovery {
            uid: self.dimm.uid.clone(),
            device_handle: self.device_handle,
            socket_id: self.dimm.socket_id,
            lock_state: self.lock_state,
            erase_capable: self.erase_capable,
        }
    }
}

/// A point-in-time snapshot of a platform's persistent memory inventory.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct Inventory {
    /// Platform capabilities.
    pub capabilities: NvmCapabilities,

    /// Installed Dimms.
    pub dimms: Vec<InventoryDimm>,

    /// Configured pools.
    pub pools: Vec<Pool>,

    /// Existing namespaces.
    pub namespaces: Vec<NamespaceRecord>,
}

impl Inventory {
    /// Returns the topology of every installed Dimm.
    pub fn dimms(&self) -> Vec<Dimm> {
        self.dimms.iter().map(|dimm| dimm.dimm.clone()).collect()
    }

    fn next_namespace_uid(&self) -> String {
        (1..)
            .map(|n: u64| format!("ns-{}", n))
            .find(|uid| self.namespaces.iter().all(|namespace| &namespace.uid != uid))
            .unwrap_or_default()
    }

    fn namespace_index(&self, uid: &str) -> Result<usize, PlannerError> {
        self.namespaces
            .iter()
            .position(|namespace| namespace.uid == uid)
            .ok_or_else(|| PlannerError::NotFound {
                what: "namespace",
                uid: uid.to_string(),
            })
    }

    fn owning_pool_index(&self, creation_id: CreationId) -> Result<usize, PlannerError> {
        let owns = |pool: &Pool| match creation_id {
            CreationId::InterleaveSet(id) => pool.interleave_set(id).is_some(),
            CreationId::DeviceHandle(handle) => {
                pool.pool_type == PoolType::Storage && self.dimms.iter().any(|dimm| dimm.device_handle == handle)
            }
        };

        self.pools
            .iter()
            .position(owns)
            .ok_or_else(|| PlannerError::DriverFailed {
                reason: format!("no pool owns capacity {:?}", creation_id),
            })
    }

    /// Moves `delta` bytes of capacity from a pool, and the backing set if any, into a namespace. A negative delta
    /// returns capacity.
    fn reserve_capacity(&mut self, creation_id: CreationId, delta: i128) -> Result<String, PlannerError> {
        let pool_index = self.owning_pool_index(creation_id)?;
        let pool = &mut self.pools[pool_index];

        let apply = |available: u64| -> Result<u64, PlannerError> {
            let updated = i128::from(available) - delta;
            u64::try_from(updated).map_err(|_| PlannerError::DriverFailed {
                reason: "insufficient capacity".to_string(),
            })
        };

        let free_capacity = apply(pool.free_capacity)?;
        if let CreationId::InterleaveSet(id) = creation_id {
            if let Some(set) = pool.interleave_sets.iter_mut().find(|set| set.driver_id == id) {
                set.available_size = apply(set.available_size)?;
            }
        }
        pool.free_capacity = free_capacity;

        Ok(pool.uid.clone())
    }
}

/// A namespace driver backed by an in-memory [`Inventory`].
///
/// Mutations update the inventory the same way a real driver would update the platform: creating or growing a
/// namespace consumes capacity from its pool and interleave set, and shrinking or deleting one returns it.
#[derive(Debug)]
pub struct SimulatedDriver {
    inventory: Mutex<Inventory>,
    has_permissions: bool,
    driver_available: bool,
    fail_mutations: bool,
}

impl SimulatedDriver {
    /// Creates a new `SimulatedDriver` over the given inventory.
    pub fn new(inventory: Inventory) -> Self {
        Self {
            inventory: Mutex::new(inventory),
            has_permissions: true,
            driver_available: true,
            fail_mutations: false,
        }
    }

    /// Sets whether callers are allowed to manage namespaces.
    pub fn with_permissions(mut self, has_permissions: bool) -> Self {
        self.has_permissions = has_permissions;
        self
    }

    /// Sets whether the driver reports itself as available.
    pub fn with_driver_available(mut self, driver_available: bool) -> Self {
        self.driver_available = driver_available;
        self
    }

    /// Makes every mutation fail with `DriverFailed`.
    pub fn with_failing_mutations(mut self, fail_mutations: bool) -> Self {
        self.fail_mutations = fail_mutations;
        self
    }

    /// Returns a copy of the current inventory.
    pub fn inventory(&self) -> Inventory {
        self.inventory.lock().unwrap().clone()
    }

    fn check_mutation(&self, operation: &str) -> Result<(), PlannerError> {
        if self.fail_mutations {
            return Err(PlannerError::DriverFailed {
                reason: format!("simulated failure during {}", operation),
            });
        }
        Ok(())
    }
}

impl NamespaceDriver for SimulatedDriver {
    fn caller_has_permissions(&self) -> bool {
        self.has_permissions
    }

    fn is_driver_available(&self) -> bool {
        self.driver_available
    }

    fn capabilities(&self) -> Result<NvmCapabilities, PlannerError> {
        Ok(self.inventory.lock().unwrap().capabilities)
    }

    fn pools(&self) -> Result<Vec<Pool>, PlannerError> {
        Ok(self.inventory.lock().unwrap().pools.clone())
    }

    fn devices(&self) -> Result<Vec<DeviceDiscovery>, PlannerError> {
        let inventory = self.inventory.lock().unwrap();
        Ok(inventory.dimms.iter().map(InventoryDimm::device).collect())
    }

    fn namespaces(&self) -> Result<Vec<NamespaceRecord>, PlannerError> {
        Ok(self.inventory.lock().unwrap().namespaces.clone())
    }

    fn create_namespace(&self, request: &NamespaceCreateRequest) -> Result<String, PlannerError> {
        self.check_mutation("create")?;

        let mut inventory = self.inventory.lock().unwrap();
        let capacity = request.block_count.saturating_mul(u64::from(request.block_size));
        let pool_uid = inventory.reserve_capacity(request.creation_id, i128::from(capacity))?;
        let uid = inventory.next_namespace_uid();

        inventory.namespaces.push(NamespaceRecord {
            uid: uid.clone(),
            friendly_name: request.friendly_name.clone(),
            namespace_type: request.namespace_type,
            block_size: request.block_size,
            block_count: request.block_count,
            enabled: request.enabled,
            health: NamespaceHealth::Normal,
            btt: request.btt,
            memory_page_allocation: request.memory_page_allocation,
            creation_id: request.creation_id,
            pool_uid,
        });

        debug!(%uid, capacity, "Simulated namespace creation.");
        Ok(uid)
    }

    fn rename_namespace(&self, uid: &str, friendly_name: &str) -> Result<(), PlannerError> {
        self.check_mutation("rename")?;

        let mut inventory = self.inventory.lock().unwrap();
        let index = inventory.namespace_index(uid)?;
        inventory.namespaces[index].friendly_name = friendly_name.to_string();
        Ok(())
    }

    fn resize_namespace(&self, uid: &str, block_count: u64) -> Result<(), PlannerError> {
        self.check_mutation("resize")?;

        let mut inventory = self.inventory.lock().unwrap();
        let index = inventory.namespace_index(uid)?;
        let namespace = &inventory.namespaces[index];
        let block_size = u64::from(namespace.block_size);
        let delta = i128::from(block_count.saturating_mul(block_size)) - i128::from(namespace.capacity());
        let creation_id = namespace.creation_id;

        inventory.reserve_capacity(creation_id, delta)?;
        inventory.namespaces[index].block_count = block_count;
        Ok(())
    }

    fn set_namespace_enabled(&self, uid: &str, enabled: EnableState) -> Result<(), PlannerError> {
        self.check_mutation("enable")?;

        let mut inventory = self.inventory.lock().unwrap();
        let index = inventory.namespace_index(uid)?;
        inventory.namespaces[index].enabled = enabled;
        Ok(())
    }

    fn delete_namespace(&self, uid: &str) -> Result<(), PlannerError> {
        self.check_mutation("delete")?;

        let mut inventory = self.inventory.lock().unwrap();
        let index = inventory.namespace_index(uid)?;
        let namespace = &inventory.namespaces[index];
        let (creation_id, capacity) = (namespace.creation_id, namespace.capacity());

        inventory.reserve_capacity(creation_id, -i128::from(capacity))?;
        inventory.namespaces.remove(index);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        namespace::{MemoryPageAllocation, NamespaceType},
        test_util::{interleave_set, persistent_pool, GIB},
    };

    fn driver() -> SimulatedDriver {
        SimulatedDriver::new(Inventory {
            pools: vec![persistent_pool("pool-0", vec![interleave_set(1, &["a", "b"], 100 * GIB)])],
            ..Default::default()
        })
    }

    fn request(block_count: u64) -> NamespaceCreateRequest {
        NamespaceCreateRequest {
            namespace_type: NamespaceType::AppDirect,
            creation_id: CreationId::InterleaveSet(1),
            friendly_name: "NvDimmVol1".to_string(),
            enabled: EnableState::Enabled,
            block_size: 1,
            block_count,
            btt: false,
            memory_page_allocation: MemoryPageAllocation::None,
        }
    }

    #[test]
    fn capacity_follows_namespace_lifecycle() {
        let driver = driver();
        let free_before = driver.pool("pool-0").unwrap().free_capacity;

        let uid = driver.create_namespace(&request(10 * GIB)).unwrap();
        assert_eq!(uid, "ns-1");

        let pool = driver.pool("pool-0").unwrap();
        assert_eq!(pool.free_capacity, free_before - 10 * GIB);
        assert_eq!(pool.interleave_sets[0].available_size, 90 * GIB);

        driver.resize_namespace(&uid, 4 * GIB).unwrap();
        assert_eq!(driver.pool("pool-0").unwrap().interleave_sets[0].available_size, 96 * GIB);

        driver.delete_namespace(&uid).unwrap();
        let pool = driver.pool("pool-0").unwrap();
        assert_eq!(pool.free_capacity, free_before);
        assert_eq!(pool.interleave_sets[0].available_size, 100 * GIB);
        assert!(driver.namespaces().unwrap().is_empty());
    }

    #[test]
    fn uids_are_not_reused_while_live() {
        let driver = driver();
        let first = driver.create_namespace(&request(GIB)).unwrap();
        let second = driver.create_namespace(&request(GIB)).unwrap();
        assert_ne!(first, second);

        driver.delete_namespace(&first).unwrap();
        let third = driver.create_namespace(&request(GIB)).unwrap();
        assert_ne!(third, second);
    }

    #[test]
    fn unknown_namespace_is_not_found() {
        let driver = driver();
        assert!(matches!(
            driver.rename_namespace("ns-9", "x"),
            Err(PlannerError::NotFound { what: "namespace", .. })
        ));
        assert!(matches!(
            driver.namespace("ns-9"),
            Err(PlannerError::NotFound { what: "namespace", .. })
        ));
    }

    #[test]
    fn failing_mutations_leave_inventory_untouched() {
        let driver = driver().with_failing_mutations(true);
        let before = driver.inventory();

        assert!(matches!(
            driver.create_namespace(&request(GIB)),
            Err(PlannerError::DriverFailed { .. })
        ));
        assert_eq!(driver.inventory(), before);
    }

    #[test]
    fn inventory_from_yaml() {
        let yaml = r#"
capabilities:
  interleave_alignment_exponent: 28
dimms:
  - uid: "0x0001"
    capacity: 137438953472
    socket_id: 0
    memory_controller_id: 0
    channel_id: 0
    device_handle: 1
    lock_state: locked
pools:
  - uid: pool-0
    pool_type: persistent
    free_capacity: 137438953472
    dimm_count: 1
    interleave_sets:
      - driver_id: 1
        dimms: ["0x0001"]
        settings: { ways: 1 }
        available_size: 137438953472
"#;
        let inventory: Inventory = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(inventory.capabilities.interleave_alignment_exponent, 28);
        assert!(inventory.capabilities.app_direct_mode);
        assert_eq!(inventory.dimms()[0].capacity, 128 * GIB);
        assert_eq!(inventory.dimms[0].device().lock_state, LockState::Locked);
        assert_eq!(inventory.pools[0].interleave_sets[0].dimm_count(), 1);
    }
}
