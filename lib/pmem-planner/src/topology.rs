use serde::{Deserialize, Serialize};

use crate::PlannerError;

/// Per-device security state.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LockState {
    /// Security is disabled.
    Disabled,

    /// Security is enabled and the device is unlocked.
    Unlocked,

    /// Security is enabled and the device is locked.
    Locked,

    /// Security is enabled and the security state is frozen until the next reset.
    Frozen,

    /// The passphrase retry limit was reached.
    PassphraseLimit,

    /// The device does not support security.
    NotSupported,

    /// Security state could not be determined.
    #[default]
    Unknown,
}

impl LockState {
    /// Returns `true` if the device is locked and its capacity cannot be accessed.
    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Locked)
    }

    /// Returns `true` if encryption is enabled on the device.
    pub fn encryption_enabled(&self) -> bool {
        matches!(self, Self::Unlocked | Self::Locked | Self::Frozen | Self::PassphraseLimit)
    }
}

/// Security view of a single Dimm.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DeviceDiscovery {
    /// Dimm uid.
    pub uid: String,

    /// Platform device handle.
    pub device_handle: u32,

    /// Socket the Dimm is installed in.
    #[serde(default)]
    pub socket_id: u16,

    /// Current lock state.
    #[serde(default)]
    pub lock_state: LockState,

    /// Whether the Dimm supports secure erase.
    #[serde(default)]
    pub erase_capable: bool,
}

/// Security features of a namespace or interleave set.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct SecurityFeatures {
    /// Every backing Dimm supports secure erase.
    pub erase_capable: bool,

    /// Every backing Dimm has encryption enabled.
    pub encryption: bool,
}

/// Interleave granularity at the channel or memory-controller level.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum InterleaveSize {
    #[default]
    Unknown,
    #[serde(rename = "64b")]
    Size64B,
    #[serde(rename = "128b")]
    Size128B,
    #[serde(rename = "256b")]
    Size256B,
    #[serde(rename = "4kib")]
    Size4KiB,
    #[serde(rename = "1gib")]
    Size1GiB,
}

/// Interleave settings of an interleave set, or the format requested for a namespace.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct InterleaveFormat {
    /// Number of Dimms interleaved together.
    pub ways: u8,

    /// Channel interleave size.
    #[serde(default)]
    pub channel: InterleaveSize,

    /// Memory controller interleave size.
    #[serde(default)]
    pub imc: InterleaveSize,
}

impl InterleaveFormat {
    /// Returns `true` if this format describes a non-interleaved, single-Dimm set.
    pub fn is_x1(&self) -> bool {
        self.ways == 1
    }

    /// Returns `true` if an interleave set with these settings can satisfy the `requested` format.
    ///
    /// Single-Dimm and interleaved formats never satisfy one another. Between two interleaved formats, the channel and
    /// memory controller sizes must also agree.
    pub fn satisfies(&self, requested: &InterleaveFormat) -> bool {
        if self.is_x1() != requested.is_x1() {
            return false;
        }

        requested.is_x1() || (self.imc == requested.imc && self.channel == requested.channel)
    }
}

/// A group of Dimms striped together into one contiguous App Direct region.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct InterleaveSet {
    /// Identifier assigned by the driver.
    pub driver_id: u32,

    /// Uids of the member Dimms, in interleave order.
    pub dimms: Vec<String>,

    /// Interleave settings.
    pub settings: InterleaveFormat,

    /// Capacity still available for new namespaces, in bytes.
    pub available_size: u64,

    /// Whether the set is mirrored.
    #[serde(default)]
    pub mirrored: bool,
}

impl InterleaveSet {
    /// Number of Dimms in the set.
    pub fn dimm_count(&self) -> usize {
        self.dimms.len()
    }

    /// Returns the discovery record of every member, in member order.
    ///
    /// Members with no matching record in `devices` yield `None`.
    pub fn member_devices<'a>(
        &'a self, devices: &'a [DeviceDiscovery],
    ) -> impl Iterator<Item = Option<&'a DeviceDiscovery>> + 'a {
        self.dimms
            .iter()
            .map(move |uid| devices.iter().find(|device| &device.uid == uid))
    }

    /// Returns `true` if any member Dimm is locked.
    ///
    /// Members with no discovery record are treated as unlocked.
    pub fn has_locked_member(&self, devices: &[DeviceDiscovery]) -> bool {
        self.member_devices(devices)
            .flatten()
            .any(|device| device.lock_state.is_locked())
    }

    /// Rolls up the security features of the member Dimms.
    ///
    /// A feature is reported only when every member has it. Members with no discovery record have none.
    pub fn security_features(&self, devices: &[DeviceDiscovery]) -> SecurityFeatures {
        let mut features = SecurityFeatures {
            erase_capable: !self.dimms.is_empty(),
            encryption: !self.dimms.is_empty(),
        };

        for device in self.member_devices(devices) {
            match device {
                Some(device) => {
                    features.erase_capable &= device.erase_capable;
                    features.encryption &= device.lock_state.encryption_enabled();
                }
                None => return SecurityFeatures::default(),
            }
        }

        features
    }
}

/// Kind of capacity a pool provides.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum PoolType {
    Persistent,
    PersistentMirror,
    Storage,
    Volatile,
}

impl PoolType {
    /// Returns `true` if App Direct namespaces can be carved from pools of this type.
    pub fn is_persistent(&self) -> bool {
        matches!(self, Self::Persistent | Self::PersistentMirror)
    }
}

/// Health of a pool.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolHealth {
    /// Pool is usable.
    #[default]
    Normal,

    /// A configuration goal is pending and will be applied on the next reset.
    Pending,

    /// One or more backing Dimms are locked.
    Locked,

    /// Pool is in an error state.
    Error,

    /// Health could not be determined.
    Unknown,
}

/// A logical grouping of allocatable capacity.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Pool {
    /// Pool uid.
    pub uid: String,

    /// Kind of capacity.
    pub pool_type: PoolType,

    /// Capacity not yet allocated to namespaces, in bytes.
    pub free_capacity: u64,

    /// Number of Dimms backing the pool.
    pub dimm_count: usize,

    /// Interleave sets backing the pool, in declared order.
    #[serde(default)]
    pub interleave_sets: Vec<InterleaveSet>,

    /// Pool health.
    #[serde(default)]
    pub health: PoolHealth,
}

impl Pool {
    /// Checks that the pool is healthy enough to host new namespaces.
    ///
    /// # Errors
    ///
    /// If a goal is pending, `GoalPending` is returned. If the pool is locked, `BadSecurityState` is returned. Any
    /// other state besides `Normal` results in `BadPoolHealth`.
    pub fn check_health(&self) -> Result<(), PlannerError> {
        match self.health {
            PoolHealth::Normal => Ok(()),
            PoolHealth::Pending => Err(PlannerError::GoalPending {
                pool_uid: self.uid.clone(),
            }),
            PoolHealth::Locked => Err(PlannerError::BadSecurityState),
            PoolHealth::Error | PoolHealth::Unknown => Err(PlannerError::BadPoolHealth {
                pool_uid: self.uid.clone(),
            }),
        }
    }

    /// Returns the interleave set with the given driver id.
    pub fn interleave_set(&self, driver_id: u32) -> Option<&InterleaveSet> {
        self.interleave_sets.iter().find(|set| set.driver_id == driver_id)
    }
}

/// Platform capabilities relevant to namespace placement.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct NvmCapabilities {
    /// Whether App Direct mode is supported.
    pub app_direct_mode: bool,

    /// Interleave alignment, as a power-of-two exponent of bytes.
    pub interleave_alignment_exponent: u8,

    /// Whether namespaces may host their own memory page structures.
    pub memory_page_allocation_capable: bool,
}

impl NvmCapabilities {
    /// Returns the per-Dimm interleave alignment, in bytes.
    pub fn interleave_alignment_bytes(&self) -> u64 {
        1u64 << self.interleave_alignment_exponent.min(63)
    }
}

impl Default for NvmCapabilities {
    fn default() -> Self {
        Self {
            app_direct_mode: true,
            interleave_alignment_exponent: 30,
            memory_page_allocation_capable: false,
        }
    }
}
