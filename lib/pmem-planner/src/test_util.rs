use std::sync::Mutex;

use crate::{
    memory_allocator::Dimm,
    namespace::{EventLog, ManagementEvent},
    DeviceDiscovery, InterleaveFormat, InterleaveSet, InterleaveSize, LockState, Pool, PoolHealth, PoolType,
    BYTES_PER_GIB,
};

pub const GIB: u64 = BYTES_PER_GIB;

/// Creates a 128 GiB Dimm in the given slot.
pub fn dimm_at(uid: &str, socket_id: u16, channel_id: u32, channel_position: u32) -> Dimm {
    Dimm {
        uid: uid.to_string(),
        capacity: 128 * GIB,
        socket_id,
        memory_controller_id: (channel_id / 3) as u16,
        channel_id,
        channel_position,
        vendor_id: 0x8089,
        serial_number: format!("SN-{}", uid),
    }
}

/// Creates a Dimm on socket 0, in the first slot of the given channel.
pub fn dimm_with_capacity(uid: &str, channel_id: u32, capacity: u64) -> Dimm {
    Dimm {
        capacity,
        ..dimm_at(uid, 0, channel_id, 0)
    }
}

pub fn device(uid: &str, lock_state: LockState) -> DeviceDiscovery {
    DeviceDiscovery {
        uid: uid.to_string(),
        device_handle: 0,
        socket_id: 0,
        lock_state,
        erase_capable: false,
    }
}

pub fn unlocked_devices(uids: &[&str]) -> Vec<DeviceDiscovery> {
    uids.iter().map(|uid| device(uid, LockState::Unlocked)).collect()
}

/// Creates an interleave set across the given Dimms, with 4 KiB channel and memory controller interleaving.
pub fn interleave_set(driver_id: u32, dimms: &[&str], available_size: u64) -> InterleaveSet {
    InterleaveSet {
        driver_id,
        dimms: dimms.iter().map(|uid| uid.to_string()).collect(),
        settings: InterleaveFormat {
            ways: dimms.len() as u8,
            channel: InterleaveSize::Size4KiB,
            imc: InterleaveSize::Size4KiB,
        },
        available_size,
        mirrored: false,
    }
}

/// Creates a healthy persistent pool whose free capacity is the sum of its sets' available capacity.
pub fn persistent_pool(uid: &str, interleave_sets: Vec<InterleaveSet>) -> Pool {
    Pool {
        uid: uid.to_string(),
        pool_type: PoolType::Persistent,
        free_capacity: interleave_sets.iter().map(|set| set.available_size).sum(),
        dimm_count: interleave_sets.iter().map(InterleaveSet::dimm_count).sum(),
        interleave_sets,
        health: PoolHealth::Normal,
    }
}

/// An event log that remembers everything it is handed.
#[derive(Default)]
pub struct RecordingEventLog {
    events: Mutex<Vec<ManagementEvent>>,
    acknowledged: Mutex<Vec<String>>,
}

impl RecordingEventLog {
    pub fn events(&self) -> Vec<ManagementEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn acknowledged(&self) -> Vec<String> {
        self.acknowledged.lock().unwrap().clone()
    }
}

impl EventLog for RecordingEventLog {
    fn log_event(&self, event: ManagementEvent) {
        self.events.lock().unwrap().push(event);
    }

    fn acknowledge_action_required(&self, subject_uid: &str) {
        self.acknowledged.lock().unwrap().push(subject_uid.to_string());
    }
}
