use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock},
    time::Instant,
};

use bytes::Bytes;

use crate::core::state::ConnectionState;

/// One encoded frame as published by a capture worker.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Per-device write counter, starting at 1.
    pub seq: u64,
    pub jpeg: Bytes,
    pub captured_at: Instant,
}

/// Latest frame and connection status of one device.
///
/// The frame and the status sit behind separate locks so that status updates
/// never hold up frame readers and vice versa. Neither lock is held across I/O.
#[derive(Debug, Default)]
pub struct CameraSlot {
    frame: RwLock<FrameSlot>,
    status: Mutex<ConnectionState>,
}

#[derive(Debug, Default)]
struct FrameSlot {
    latest: Option<Frame>,
    writes: u64,
}

impl CameraSlot {
    /// Overwrites the latest frame and returns its sequence number.
    pub fn put(&self, jpeg: Bytes) -> u64 {
        let mut slot = self.frame.write().unwrap_or_else(PoisonError::into_inner);
        slot.writes += 1;
        slot.latest = Some(Frame {
            seq: slot.writes,
            jpeg,
            captured_at: Instant::now(),
        });
        slot.writes
    }

    pub fn get(&self) -> Option<Frame> {
        self.frame
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .latest
            .clone()
    }

    pub fn clear(&self) {
        self.frame
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .latest = None;
    }

    pub fn status(&self) -> ConnectionState {
        lock(&self.status).clone()
    }

    pub fn update_status<R>(&self, update: impl FnOnce(&mut ConnectionState) -> R) -> R {
        update(&mut lock(&self.status))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registry of per-device slots keyed by camera id.
#[derive(Debug, Clone, Default)]
pub struct FrameStore {
    slots: Arc<RwLock<BTreeMap<u32, Arc<CameraSlot>>>>,
}

impl FrameStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty, disconnected slot for `camera_id` unless one exists.
    pub fn register(&self, camera_id: u32) -> Arc<CameraSlot> {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots.entry(camera_id).or_default().clone()
    }

    pub fn slot(&self, camera_id: u32) -> Option<Arc<CameraSlot>> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&camera_id)
            .cloned()
    }

    pub fn get(&self, camera_id: u32) -> Option<Frame> {
        self.slot(camera_id)?.get()
    }

    pub fn get_status(&self, camera_id: u32) -> Option<ConnectionState> {
        self.slot(camera_id).map(|slot| slot.status())
    }
}
