//! Fixed-membership device pool.
//!
//! Devices (GPU/worker identifiers) are partitioned at session creation and
//! returned on close. The pool never grows or shrinks at runtime; exhaustion
//! is an admission refusal, not a queue.

use parking_lot::Mutex;

use crate::error::TrackError;
use crate::types::DeviceId;

/// Pool of reservable device identifiers.
#[derive(Debug)]
pub struct DevicePool {
    members: Vec<DeviceId>,
    free: Mutex<Vec<DeviceId>>,
}

impl DevicePool {
    #[must_use]
    pub fn new(members: Vec<DeviceId>) -> Self {
        let free = members.clone();
        Self {
            members,
            free: Mutex::new(free),
        }
    }

    /// Number of devices currently available.
    #[must_use]
    pub fn available(&self) -> usize {
        self.free.lock().len()
    }

    /// Total pool membership.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.members.len()
    }

    /// Reserves devices for a session's exclusive use.
    ///
    /// With an explicit request every named device must be a pool member and
    /// currently free; without one, a single device is taken from the pool.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` for ids outside the pool, `CapacityExceeded` when the
    /// requested devices are not all free.
    pub fn reserve(&self, requested: Option<&[DeviceId]>) -> Result<Vec<DeviceId>, TrackError> {
        let mut free = self.free.lock();
        match requested {
            Some(ids) if !ids.is_empty() => {
                for id in ids {
                    if !self.members.contains(id) {
                        return Err(TrackError::invalid(format!(
                            "device {id} is not a member of the pool"
                        )));
                    }
                }
                if ids.iter().any(|id| !free.contains(id)) {
                    return Err(TrackError::CapacityExceeded {
                        active: self.members.len() - free.len(),
                        capacity: self.members.len(),
                    });
                }
                free.retain(|id| !ids.contains(id));
                Ok(ids.to_vec())
            }
            _ => {
                let Some(device) = free.pop() else {
                    return Err(TrackError::CapacityExceeded {
                        active: self.members.len(),
                        capacity: self.members.len(),
                    });
                };
                Ok(vec![device])
            }
        }
    }

    /// Returns devices to the free pool. Ids not belonging to the pool are
    /// ignored; double release is a no-op.
    pub fn release(&self, devices: &[DeviceId]) {
        let mut free = self.free.lock();
        for device in devices {
            if self.members.contains(device) && !free.contains(device) {
                free.push(device.clone());
            }
        }
    }
}
