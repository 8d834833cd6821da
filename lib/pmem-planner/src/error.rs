use std::fmt;

use snafu::Snafu;

use crate::namespace::Feature;

/// Planner error.
///
/// Every validation failure surfaces as exactly one of these variants. Callers that only care about the category of a
/// failure, rather than the details carried alongside it, can match on [`PlannerError::kind`].
#[derive(Clone, Debug, Eq, PartialEq, Snafu)]
#[snafu(context(suffix(false)))]
pub enum PlannerError {
    /// An input was missing, empty, or otherwise unusable.
    #[snafu(display("Invalid parameter: {}.", reason))]
    InvalidParameter {
        /// What was wrong with the input.
        reason: &'static str,
    },

    /// The caller lacks the rights to manage namespaces.
    #[snafu(display("Caller does not have permission to perform this operation."))]
    InvalidPermissions,

    /// No compatible driver is available.
    #[snafu(display("No compatible persistent memory driver is available."))]
    BadDriver,

    /// The platform or the license does not support the requested feature.
    #[snafu(display("Not supported: {}.", reason))]
    NotSupported {
        /// What is unsupported.
        reason: String,
    },

    /// The namespace type is not valid for the requested operation or pool.
    #[snafu(display("Invalid namespace type: {}.", reason))]
    BadNamespaceType {
        /// Why the type was rejected.
        reason: &'static str,
    },

    /// The requested enable state is not `Enabled` or `Disabled`.
    #[snafu(display("Invalid namespace enable state."))]
    BadNamespaceEnableState,

    /// The requested block size is not valid for the namespace type.
    #[snafu(display("Invalid block size {} for the namespace type.", block_size))]
    BadBlockSize {
        /// Requested block size, in bytes.
        block_size: u32,
    },

    /// The requested capacity falls outside what the pool or interleave set can host.
    #[snafu(display("Invalid namespace size: {}.", reason))]
    BadSize {
        /// Why the size was rejected.
        reason: String,
    },

    /// The requested capacity is not aligned to the per-Dimm granularity.
    #[snafu(display("Namespace capacity is not aligned: {}.", reason))]
    BadAlignment {
        /// Why the capacity was rejected.
        reason: String,
    },

    /// One or more member Dimms are security-locked.
    #[snafu(display("One or more Dimms are in a locked security state."))]
    BadSecurityState,

    /// No interleave set satisfies the requested security profile.
    #[snafu(display("No interleave set satisfies the requested security features."))]
    BadSecurityGoal,

    /// No interleave set satisfies the combination of requested settings.
    #[snafu(display("No interleave set satisfies the requested namespace settings."))]
    BadNamespaceSettings,

    /// The pool cannot host any more App Direct namespaces.
    #[snafu(display("No more App Direct namespaces can be created on pool {}.", pool_uid))]
    TooManyNamespaces {
        /// Pool that is exhausted.
        pool_uid: String,
    },

    /// The pool is in an error or unknown health state.
    #[snafu(display("Pool {} is not healthy.", pool_uid))]
    BadPoolHealth {
        /// Pool that is unhealthy.
        pool_uid: String,
    },

    /// The pool has a configuration goal pending.
    #[snafu(display("Pool {} has a configuration goal pending.", pool_uid))]
    GoalPending {
        /// Pool with the pending goal.
        pool_uid: String,
    },

    /// The underlying state is inconsistent, e.g. a namespace references an interleave set that no longer exists.
    #[snafu(display("Driver state is inconsistent: {}.", reason))]
    DriverFailed {
        /// Description of the inconsistency.
        reason: String,
    },

    /// An allocation failed while planning.
    #[snafu(display("Out of memory."))]
    NoMemory,

    /// A layout was requested with no Dimms to lay out.
    #[snafu(display("Bad request: no Dimms were provided."))]
    BadRequestNoDimms,

    /// The Dimms handed to the interleave set builder cannot be considered together.
    #[snafu(display("Invalid Dimms: {}.", reason))]
    InvalidDimms {
        /// Why the Dimms were rejected.
        reason: String,
    },

    /// A pool or namespace uid is unknown to the driver.
    #[snafu(display("{} {} not found.", what, uid))]
    NotFound {
        /// Kind of object that was looked up.
        what: &'static str,

        /// Uid that was looked up.
        uid: String,
    },
}

impl PlannerError {
    /// Creates a `NotSupported` error for a feature that is not licensed.
    pub fn unlicensed(feature: Feature) -> Self {
        Self::NotSupported {
            reason: format!("{} is not licensed", feature),
        }
    }

    /// Returns the category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidParameter { .. } => ErrorKind::InvalidParameter,
            Self::InvalidPermissions => ErrorKind::InvalidPermissions,
            Self::BadDriver => ErrorKind::BadDriver,
            Self::NotSupported { .. } => ErrorKind::NotSupported,
            Self::BadNamespaceType { .. } => ErrorKind::BadNamespaceType,
            Self::BadNamespaceEnableState => ErrorKind::BadNamespaceEnableState,
            Self::BadBlockSize { .. } => ErrorKind::BadBlockSize,
            Self::BadSize { .. } => ErrorKind::BadSize,
            Self::BadAlignment { .. } => ErrorKind::BadAlignment,
            Self::BadSecurityState => ErrorKind::BadSecurityState,
            Self::BadSecurityGoal => ErrorKind::BadSecurityGoal,
            Self::BadNamespaceSettings => ErrorKind::BadNamespaceSettings,
            Self::TooManyNamespaces { .. } => ErrorKind::TooManyNamespaces,
            Self::BadPoolHealth { .. } => ErrorKind::BadPoolHealth,
            Self::GoalPending { .. } => ErrorKind::GoalPending,
            Self::DriverFailed { .. } => ErrorKind::DriverFailed,
            Self::NoMemory => ErrorKind::NoMemory,
            Self::BadRequestNoDimms => ErrorKind::BadRequestNoDimms,
            Self::InvalidDimms { .. } => ErrorKind::InvalidDimms,
            Self::NotFound { .. } => ErrorKind::NotFound,
        }
    }

    /// Returns `true` if retrying without rediscovering topology cannot succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::DriverFailed { .. } | Self::BadDriver)
    }
}

/// Category of a [`PlannerError`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[allow(missing_docs)]
pub enum ErrorKind {
    InvalidParameter,
    InvalidPermissions,
    BadDriver,
    NotSupported,
    BadNamespaceType,
    BadNamespaceEnableState,
    BadBlockSize,
    BadSize,
    BadAlignment,
    BadSecurityState,
    BadSecurityGoal,
    BadNamespaceSettings,
    TooManyNamespaces,
    BadPoolHealth,
    GoalPending,
    DriverFailed,
    NoMemory,
    BadRequestNoDimms,
    InvalidDimms,
    NotFound,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
