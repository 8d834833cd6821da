//! Interfaces to the systems the namespace manager depends on.
//!
//! The planner never talks to hardware, persists state or records events itself. Instead, the
//! [`NamespaceManager`](super::NamespaceManager) is handed implementations of these traits and calls them in a fixed
//! order: the driver is consulted and asked to make changes, and only after it reports success is the cache invalidated
//! and an event recorded.
use std::fmt;

use serde::{Deserialize, Serialize};

use super::{
    CreationId, EnableState, MemoryPageAllocation, NamespaceDetails, NamespaceDiscovery, NamespaceRecord, NamespaceType,
};
use crate::{DeviceDiscovery, NvmCapabilities, PlannerError, Pool};

/// A licensable namespace management feature.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum Feature {
    GetNamespaces,
    GetNamespaceDetails,
    CreateNamespace,
    DeleteNamespace,
    RenameNamespace,
    GrowNamespace,
    ShrinkNamespace,
    EnableNamespace,
    DisableNamespace,
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::GetNamespaces => "get_namespaces",
            Self::GetNamespaceDetails => "get_namespace_details",
            Self::CreateNamespace => "create_namespace",
            Self::DeleteNamespace => "delete_namespace",
            Self::RenameNamespace => "rename_namespace",
            Self::GrowNamespace => "grow_namespace",
            Self::ShrinkNamespace => "shrink_namespace",
            Self::EnableNamespace => "enable_namespace",
            Self::DisableNamespace => "disable_namespace",
        };
        f.write_str(name)
    }
}

/// Licensing policy for namespace management features.
pub trait FeatureLicensing: Send + Sync {
    /// Returns `true` if the given feature is licensed.
    fn is_licensed(&self, feature: Feature) -> bool;

    /// Checks that the given feature is licensed.
    ///
    /// # Errors
    ///
    /// If the feature is not licensed, `NotSupported` is returned.
    fn check_licensed(&self, feature: Feature) -> Result<(), PlannerError> {
        if self.is_licensed(feature) {
            Ok(())
        } else {
            Err(PlannerError::unlicensed(feature))
        }
    }
}

/// Severity of a management event.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum EventSeverity {
    Info,
    Warning,
    Critical,
}

/// Kind of management event.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum EventCode {
    NamespaceCreated,
    NamespaceModified,
    NamespaceDeleted,
}

/// A record of a successful namespace management operation.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ManagementEvent {
    /// Severity.
    pub severity: EventSeverity,

    /// What happened.
    pub code: EventCode,

    /// Uid of the namespace the event is about.
    pub subject_uid: String,

    /// Friendly name of the namespace the event is about.
    pub namespace_name: String,

    /// Whether the event requires action from an operator.
    pub action_required: bool,
}

impl ManagementEvent {
    /// Creates an informational event that requires no action.
    pub fn info(code: EventCode, subject_uid: impl Into<String>, namespace_name: impl Into<String>) -> Self {
        Self {
            severity: EventSeverity::Info,
            code,
            subject_uid: subject_uid.into(),
            namespace_name: namespace_name.into(),
            action_required: false,
        }
    }
}

/// Sink for management events.
pub trait EventLog: Send + Sync {
    /// Records an event.
    fn log_event(&self, event: ManagementEvent);

    /// Acknowledges every outstanding action-required event about the given uid.
    fn acknowledge_action_required(&self, subject_uid: &str);
}

/// Cache of namespace discovery results.
///
/// The cache is owned outside of the planner. The namespace manager reads through it, fills it on a miss, and
/// invalidates it after every successful change.
pub trait NamespaceCache: Send + Sync {
    /// Returns the cached namespace list, if present.
    fn namespaces(&self) -> Option<Vec<NamespaceDiscovery>>;

    /// Replaces the cached namespace list.
    fn set_namespaces(&self, namespaces: Vec<NamespaceDiscovery>);

    /// Returns the cached details of the given namespace, if present.
    fn namespace_details(&self, uid: &str) -> Option<NamespaceDetails>;

    /// Caches the details of a namespace.
    fn set_namespace_details(&self, details: NamespaceDetails);

    /// Drops everything that is cached.
    fn invalidate(&self);
}

/// A request for the driver to create a namespace.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct NamespaceCreateRequest {
    /// Kind of namespace.
    pub namespace_type: NamespaceType,

    /// Backing capacity.
    pub creation_id: CreationId,

    /// Friendly name.
    pub friendly_name: String,

    /// Initial enable state.
    pub enabled: EnableState,

    /// Block size, in bytes.
    pub block_size: u32,

    /// Number of blocks.
    pub block_count: u64,

    /// Whether to use a block translation table.
    pub btt: bool,

    /// Where to allocate memory page structures.
    pub memory_page_allocation: MemoryPageAllocation,
}

/// Access to the persistent memory driver and the inventory it reports.
///
/// Lookups that fail because a pool or namespace does not exist should return `NotFound`.
pub trait NamespaceDriver: Send + Sync {
    /// Returns `true` if the caller is allowed to manage namespaces.
    fn caller_has_permissions(&self) -> bool;

    /// Returns `true` if a compatible driver is loaded.
    fn is_driver_available(&self) -> bool;

    /// Returns the platform capabilities.
    fn capabilities(&self) -> Result<NvmCapabilities, PlannerError>;

    /// Returns every pool.
    fn pools(&self) -> Result<Vec<Pool>, PlannerError>;

    /// Returns the pool with the given uid.
    fn pool(&self, uid: &str) -> Result<Pool, PlannerError> {
        self.pools()?
            .into_iter()
            .find(|pool| pool.uid == uid)
            .ok_or_else(|| PlannerError::NotFound {
                what: "pool",
                uid: uid.to_string(),
            })
    }

    /// Returns the security view of every Dimm.
    fn devices(&self) -> Result<Vec<DeviceDiscovery>, PlannerError>;

    /// Returns every namespace.
    fn namespaces(&self) -> Result<Vec<NamespaceRecord>, PlannerError>;

    /// Returns the namespace with the given uid.
    fn namespace(&self, uid: &str) -> Result<NamespaceRecord, PlannerError> {
        self.namespaces()?
            .into_iter()
            .find(|namespace| namespace.uid == uid)
            .ok_or_else(|| PlannerError::NotFound {
                what: "namespace",
                uid: uid.to_string(),
            })
    }

    /// Creates a namespace, returning its uid.
    fn create_namespace(&self, request: &NamespaceCreateRequest) -> Result<String, PlannerError>;

    /// Renames a namespace.
    fn rename_namespace(&self, uid: &str, friendly_name: &str) -> Result<(), PlannerError>;

    /// Changes the block count of a namespace.
    fn resize_namespace(&self, uid: &str, block_count: u64) -> Result<(), PlannerError>;

    /// Enables or disables a namespace.
    fn set_namespace_enabled(&self, uid: &str, enabled: EnableState) -> Result<(), PlannerError>;

    /// Deletes a namespace.
    fn delete_namespace(&self, uid: &str) -> Result<(), PlannerError>;
}
