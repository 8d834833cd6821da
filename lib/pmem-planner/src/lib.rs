//! Capacity planning and namespace provisioning for persistent-memory modules.
//!
//! ## Overview
//!
//! Persistent-memory modules ("Dimms") installed in a node can be carved up into several kinds of consumable capacity:
//! volatile memory-mode capacity, interleaved App Direct regions, per-device storage capacity, and a reserved metadata
//! device. This crate holds the planning logic behind that carving, split into two halves.
//!
//! ## Memory allocation
//!
//! The [`memory_allocator`] module answers topology questions about a set of Dimms: which of them can be interleaved
//! together, and which one should be set aside as the reserve device. Allocation goals are assembled by running an
//! ordered pipeline of layout steps over a request, with each step refining the layout left by the one before it.
//!
//! ## Namespaces
//!
//! The [`namespace`] module decides where block-addressable volumes ("namespaces") can be placed within a pool of
//! App Direct capacity. Pools are backed by one or more interleave sets, and placing a namespace means finding the
//! first set that satisfies the requested size, security profile, interleave format and alignment, or explaining
//! precisely why none does.
//!
//! Everything here works on snapshots supplied by the caller. Talking to hardware, caching discovery results, and
//! recording management events are delegated to collaborators (see [`namespace::collaborators`]), which the
//! [`NamespaceManager`] drives in the right order.
#![deny(warnings)]
#![deny(missing_docs)]

mod config;
pub use self::config::PlannerConfiguration;

mod error;
pub use self::error::{ErrorKind, PlannerError};

pub mod memory_allocator;
pub mod namespace;
pub use self::namespace::NamespaceManager;

mod topology;
pub use self::topology::{
    DeviceDiscovery, InterleaveFormat, InterleaveSet, InterleaveSize, LockState, NvmCapabilities, Pool, PoolHealth,
    PoolType, SecurityFeatures,
};

#[cfg(test)]
pub(crate) mod test_util;

/// Number of bytes in one gibibyte.
pub const BYTES_PER_GIB: u64 = 1 << 30;
