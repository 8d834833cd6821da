//! Namespace placement, sizing and lifecycle management.
//!
//! ## Placement
//!
//! App Direct namespaces are carved from the interleave sets backing a pool. [`InterleaveSetSelector`] walks a pool's
//! sets in declared order and picks the first one that can host the requested capacity with the requested security
//! profile, interleave format and alignment. When no set qualifies, the error explains which requirement could never be
//! met, so that callers can tell "too big" apart from "wrong security settings".
//!
//! ## Sizing
//!
//! Namespaces are sized in whole multiples of the per-Dimm interleave alignment times the number of Dimms in the set.
//! The helpers in [`sizing`] compute minimum sizes and round requested sizes down to a valid multiple, and
//! [`pool_supported_size_ranges`] reports the range of sizes a pool can currently host.
//!
//! ## Lifecycle
//!
//! [`NamespaceManager`] drives namespaces through their lifecycle (create, rename, resize, enable, disable and delete),
//! running every validation in a fixed order before asking the driver to make a change, and only then invalidating the
//! namespace cache and recording a management event.
use serde::{Deserialize, Serialize};

use crate::{DeviceDiscovery, InterleaveFormat, PlannerError, Pool, SecurityFeatures};

mod cache;
pub use self::cache::InMemoryNamespaceCache;

pub mod collaborators;
pub use self::collaborators::{
    EventCode, EventLog, EventSeverity, Feature, FeatureLicensing, ManagementEvent, NamespaceCache,
    NamespaceCreateRequest, NamespaceDriver,
};

mod events;
pub use self::events::TracingEventLog;

mod licensing;
pub use self::licensing::StaticLicensing;

mod manager;
pub use self::manager::NamespaceManager;

mod ranges;
pub use self::ranges::{pool_supported_size_ranges, PossibleNamespaceRanges};

mod selector;
pub use self::selector::{InterleaveSetSelector, Placement};

mod simulated;
pub use self::simulated::{Inventory, InventoryDimm, SimulatedDriver};

pub mod sizing;

/// Kind of namespace.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NamespaceType {
    /// Byte-addressable capacity backed by an interleave set.
    AppDirect,

    /// Block-addressable capacity backed by a single Dimm.
    Storage,
}

/// Whether a namespace is exposed to the operating system.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum EnableState {
    #[default]
    Enabled,
    Disabled,
    Unknown,
}

/// Requested encryption state of the Dimms backing a namespace.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionGoal {
    /// Every backing Dimm must have encryption enabled.
    On,

    /// No backing Dimm may have encryption enabled.
    Off,

    /// Encryption state does not matter.
    #[default]
    Ignore,
}

/// Requested secure-erase capability of the Dimms backing a namespace.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EraseCapableGoal {
    /// Every backing Dimm must support secure erase.
    True,

    /// No backing Dimm may support secure erase.
    False,

    /// Secure-erase capability does not matter.
    #[default]
    Ignore,
}

/// Security profile requested for a new namespace.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct SecurityGoals {
    /// Secure-erase requirement.
    pub erase_capable: EraseCapableGoal,

    /// Encryption requirement.
    pub encryption: EncryptionGoal,
}

impl SecurityGoals {
    /// Returns `true` if neither requirement is set.
    pub fn is_ignored(&self) -> bool {
        self.erase_capable == EraseCapableGoal::Ignore && self.encryption == EncryptionGoal::Ignore
    }

    /// Returns `true` if the given Dimm satisfies both requirements.
    pub fn matches_device(&self, device: &DeviceDiscovery) -> bool {
        let erase_capable_met = match self.erase_capable {
            EraseCapableGoal::True => device.erase_capable,
            EraseCapableGoal::False => !device.erase_capable,
            EraseCapableGoal::Ignore => true,
        };

        let encryption_enabled = device.lock_state.encryption_enabled();
        let encryption_met = match self.encryption {
            EncryptionGoal::On => encryption_enabled,
            EncryptionGoal::Off => !encryption_enabled,
            EncryptionGoal::Ignore => true,
        };

        erase_capable_met && encryption_met
    }
}

/// Where the memory page structures for a namespace are allocated.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryPageAllocation {
    /// No page structures are allocated.
    #[default]
    None,

    /// Page structures are allocated in DRAM.
    Dram,

    /// Page structures are allocated from the namespace itself.
    AppDirect,
}

impl MemoryPageAllocation {
    /// Returns `true` if page structures are allocated anywhere.
    pub fn is_allocated(&self) -> bool {
        matches!(self, Self::Dram | Self::AppDirect)
    }
}

/// Identifier the driver uses to locate the capacity backing a namespace.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CreationId {
    /// Driver id of the backing interleave set.
    InterleaveSet(u32),

    /// Device handle of the backing Dimm.
    DeviceHandle(u32),
}

/// Health of a namespace.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum NamespaceHealth {
    #[default]
    Normal,
    Warning,
    Critical,
    BrokenMirror,
    Unknown,
}

/// Settings for a namespace that is about to be created.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct NamespaceCreateSettings {
    /// Kind of namespace.
    pub namespace_type: NamespaceType,

    /// Block size, in bytes. App Direct namespaces are byte-addressable and use a block size of 1.
    pub block_size: u32,

    /// Number of blocks.
    pub block_count: u64,

    /// Friendly name. A name is synthesized when none is given.
    #[serde(default)]
    pub friendly_name: Option<String>,

    /// Initial enable state.
    #[serde(default)]
    pub enabled: EnableState,

    /// Security requirements for the backing Dimms.
    #[serde(default)]
    pub security: SecurityGoals,

    /// Whether to use a block translation table.
    #[serde(default)]
    pub btt: bool,

    /// Where to allocate memory page structures.
    #[serde(default)]
    pub memory_page_allocation: MemoryPageAllocation,
}

impl NamespaceCreateSettings {
    /// Creates settings for an enabled, unnamed App Direct namespace of `capacity` bytes.
    pub fn app_direct(capacity: u64) -> Self {
        Self {
            namespace_type: NamespaceType::AppDirect,
            block_size: 1,
            block_count: capacity,
            friendly_name: None,
            enabled: EnableState::Enabled,
            security: SecurityGoals::default(),
            btt: false,
            memory_page_allocation: MemoryPageAllocation::None,
        }
    }

    /// Returns the requested capacity, in bytes.
    pub fn capacity(&self) -> u64 {
        self.block_count.saturating_mul(u64::from(self.block_size))
    }
}

/// Basic identifying information about a namespace.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct NamespaceDiscovery {
    /// Namespace uid.
    pub uid: String,

    /// Friendly name.
    pub friendly_name: String,
}

/// A namespace as reported by the driver.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct NamespaceRecord {
    /// Namespace uid.
    pub uid: String,

    /// Friendly name.
    pub friendly_name: String,

    /// Kind of namespace.
    pub namespace_type: NamespaceType,

    /// Block size, in bytes.
    pub block_size: u32,

    /// Number of blocks.
    pub block_count: u64,

    /// Enable state.
    #[serde(default)]
    pub enabled: EnableState,

    /// Health.
    #[serde(default)]
    pub health: NamespaceHealth,

    /// Whether a block translation table is in use.
    #[serde(default)]
    pub btt: bool,

    /// Where memory page structures are allocated.
    #[serde(default)]
    pub memory_page_allocation: MemoryPageAllocation,

    /// Backing capacity.
    pub creation_id: CreationId,

    /// Uid of the owning pool.
    pub pool_uid: String,
}

impl NamespaceRecord {
    /// Returns the capacity, in bytes.
    pub fn capacity(&self) -> u64 {
        self.block_count.saturating_mul(u64::from(self.block_size))
    }

    /// Returns the driver id of the backing interleave set, if this is an App Direct namespace.
    pub fn interleave_set_id(&self) -> Option<u32> {
        match self.creation_id {
            CreationId::InterleaveSet(id) => Some(id),
            CreationId::DeviceHandle(_) => None,
        }
    }

    /// Returns the identifying information for this namespace.
    pub fn discovery(&self) -> NamespaceDiscovery {
        NamespaceDiscovery {
            uid: self.uid.clone(),
            friendly_name: self.friendly_name.clone(),
        }
    }
}

/// A namespace, resolved against the interleave set that backs it.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct NamespaceDetails {
    /// The namespace as reported by the driver.
    #[serde(flatten)]
    pub record: NamespaceRecord,

    /// Whether the backing interleave set is mirrored.
    pub mirrored: bool,

    /// Interleave settings of the backing set.
    pub interleave_format: Option<InterleaveFormat>,

    /// Security features rolled up from the backing Dimms.
    pub security_features: SecurityFeatures,
}

impl NamespaceDetails {
    /// Resolves `record` against its owning pool.
    ///
    /// App Direct namespaces pick up the mirroring, interleave format and security features of their backing set.
    ///
    /// # Errors
    ///
    /// If the namespace refers to an interleave set that the pool does not contain, `DriverFailed` is returned.
    pub fn resolve(record: NamespaceRecord, pool: &Pool, devices: &[DeviceDiscovery]) -> Result<Self, PlannerError> {
        let Some(set_id) = record.interleave_set_id() else {
            return Ok(Self {
                record,
                mirrored: false,
                interleave_format: None,
                security_features: SecurityFeatures::default(),
            });
        };

        let set = pool.interleave_set(set_id).ok_or_else(|| PlannerError::DriverFailed {
            reason: format!(
                "namespace {} refers to interleave set {} which is not in pool {}",
                record.uid, set_id, pool.uid
            ),
        })?;

        Ok(Self {
            mirrored: set.mirrored,
            interleave_format: Some(set.settings),
            security_features: set.security_features(devices),
            record,
        })
    }
}
