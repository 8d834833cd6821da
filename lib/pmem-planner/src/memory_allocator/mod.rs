//! Topology-aware memory allocation planning.
//!
//! Before capacity on a set of Dimms can be configured, two topology questions need answering:
//!
//! - which Dimms on a socket can be interleaved together, and what is the widest such group
//! - which Dimm, if any, should be set aside as the reserve device
//!
//! [`InterleavableDimmSetBuilder`] answers the first, and [`ReserveDimmSelector`] the second. Allocation goals are then
//! assembled by a [`LayoutPipeline`]: an ordered list of [`LayoutStep`]s that each refine the layout left behind by the
//! steps before them.
use bytesize::ByteSize;
use serde::{Deserialize, Serialize};

mod dimm_set;
pub use self::dimm_set::{DimmSetError, InterleavableDimmSetBuilder, DEFAULT_INTERLEAVE_BITMAPS};

mod layout;
pub use self::layout::{
    DimmGoal, LayoutPipeline, LayoutStep, MemoryAllocationLayout, MemoryAllocationRequest, ReserveDimmStep,
};

mod reserve;
pub use self::reserve::{ReserveDimmSelector, ReserveError};

/// A persistent-memory module, as seen by the allocation planner.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Dimm {
    /// Dimm uid.
    pub uid: String,

    /// Raw capacity, in bytes.
    pub capacity: u64,

    /// Socket the Dimm is installed in.
    pub socket_id: u16,

    /// Memory controller the Dimm is attached to.
    pub memory_controller_id: u16,

    /// Channel the Dimm is attached to, numbered across the whole socket.
    pub channel_id: u32,

    /// Slot within the channel.
    #[serde(default)]
    pub channel_position: u32,

    /// Manufacturer identifier.
    #[serde(default)]
    pub vendor_id: u16,

    /// Manufacturer serial number.
    #[serde(default)]
    pub serial_number: String,
}

impl Dimm {
    /// Returns the raw capacity as a human-friendly byte size.
    pub fn byte_size(&self) -> ByteSize {
        ByteSize::b(self.capacity)
    }
}
