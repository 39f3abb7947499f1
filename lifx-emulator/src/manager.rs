//! The device collection (§4.5): owns every virtual device, resolves broadcast/unicast targets,
//! and is the seam the scenario engine and persistence layer both hang off of.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::device::{DeviceSpec, DeviceState};
use crate::error::{EmulatorError, Result};
use crate::ids::DeviceId;
use crate::scenario::{ScenarioContext, TypeScope};

/// A single device plus the per-device lock serializing the requests it handles. Held behind an
/// `Arc` so the manager can hand a clone out to a connection task without holding its own lock
/// across the handler's work (§5: per-device serialization, cross-device parallelism).
pub struct ManagedDevice {
    pub addr: SocketAddr,
    pub state: Mutex<DeviceState>,
}

pub struct DeviceManager {
    devices: std::sync::RwLock<HashMap<DeviceId, Arc<ManagedDevice>>>,
}

impl DeviceManager {
    pub fn new() -> Self {
        DeviceManager {
            devices: std::sync::RwLock::new(HashMap::new()),
        }
    }

    pub fn add(&self, spec: DeviceSpec, addr: SocketAddr) -> Result<DeviceId> {
        let state = DeviceState::create(spec)?;
        let id = state.id();
        let mut devices = self.devices.write().unwrap();
        if devices.contains_key(&id) {
            return Err(EmulatorError::DuplicateDevice(id));
        }
        devices.insert(
            id,
            Arc::new(ManagedDevice {
                addr,
                state: Mutex::new(state),
            }),
        );
        Ok(id)
    }

    /// Restores a device from a persisted snapshot, bypassing duplicate-id rejection since this
    /// runs once at startup before any network traffic is possible.
    pub fn restore(&self, state: DeviceState, addr: SocketAddr) {
        let id = state.id();
        self.devices.write().unwrap().insert(
            id,
            Arc::new(ManagedDevice {
                addr,
                state: Mutex::new(state),
            }),
        );
    }

    pub fn remove(&self, id: DeviceId) -> Result<()> {
        self.devices
            .write()
            .unwrap()
            .remove(&id)
            .map(|_| ())
            .ok_or(EmulatorError::UnknownDevice(id))
    }

    pub fn get(&self, id: DeviceId) -> Option<Arc<ManagedDevice>> {
        self.devices.read().unwrap().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.devices.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<DeviceId> {
        self.devices.read().unwrap().keys().copied().collect()
    }

    pub fn all(&self) -> Vec<Arc<ManagedDevice>> {
        self.devices.read().unwrap().values().cloned().collect()
    }

    /// Resolves the set of devices a request with the given `target`/`tagged` addressing should
    /// reach, per §4.1: `tagged=1` or an all-zero target means broadcast to every device;
    /// otherwise only the device whose id matches `target`, if any. Per `DeviceId`'s invariant,
    /// only the low 6 bytes of the wire `target` identify a device; the top 2 bytes are reserved
    /// and must be masked off before either the broadcast test or the lookup.
    pub fn resolve_targets(&self, target: u64, tagged: bool) -> Vec<Arc<ManagedDevice>> {
        let target = target & 0x0000_ffff_ffff_ffff;
        if tagged || target == 0 {
            return self.all();
        }
        let id = DeviceId(target);
        self.get(id).into_iter().collect()
    }
}

impl Default for DeviceManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the dimensions a scenario lookup needs for one device, snapshotting its capabilities,
/// location, and group at resolution time.
pub async fn scenario_context(device: &ManagedDevice) -> ScenarioContext {
    let state = device.state.lock().await;
    ScenarioContext {
        device: state.id(),
        types: type_scopes(TypeScope::matching(&state.capabilities)),
        location: Some(state.location.id),
        group: Some(state.group.id),
    }
}

fn type_scopes(matching: Vec<TypeScope>) -> [Option<TypeScope>; 6] {
    let mut out = [None; 6];
    for (slot, typ) in out.iter_mut().zip(matching) {
        *slot = Some(typ);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceSpec;

    fn addr() -> SocketAddr {
        "127.0.0.1:56700".parse().unwrap()
    }

    #[test]
    fn add_rejects_duplicate_ids() {
        let mgr = DeviceManager::new();
        let id = DeviceId::from_bytes([1, 2, 3, 4, 5, 6]);
        let spec = DeviceSpec {
            vendor: 1,
            product: 27,
            id: Some(id),
            ..Default::default()
        };
        mgr.add(spec.clone(), addr()).unwrap();
        assert!(mgr.add(spec, addr()).is_err());
    }

    #[test]
    fn resolve_targets_broadcast_returns_all_devices() {
        let mgr = DeviceManager::new();
        for i in 0..3u8 {
            let spec = DeviceSpec {
                vendor: 1,
                product: 27,
                id: Some(DeviceId::from_bytes([1, 2, 3, 4, 5, i])),
                ..Default::default()
            };
            mgr.add(spec, addr()).unwrap();
        }
        assert_eq!(mgr.resolve_targets(0, false).len(), 3);
        assert_eq!(mgr.resolve_targets(0xffff, true).len(), 3);
    }

    #[test]
    fn resolve_targets_unicast_returns_one_device() {
        let mgr = DeviceManager::new();
        let id = DeviceId::from_bytes([1, 2, 3, 4, 5, 6]);
        let spec = DeviceSpec {
            vendor: 1,
            product: 27,
            id: Some(id),
            ..Default::default()
        };
        mgr.add(spec, addr()).unwrap();
        let found = mgr.resolve_targets(id.as_target(), false);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].state.try_lock().unwrap().id(), id);
    }

    #[test]
    fn resolve_targets_unknown_unicast_returns_empty() {
        let mgr = DeviceManager::new();
        let id = DeviceId::from_bytes([9, 9, 9, 9, 9, 9]);
        assert!(mgr.resolve_targets(id.as_target(), false).is_empty());
    }

    /// The wire `target` field is a full 8-byte `u64`; only its low 6 bytes identify a device, so
    /// a request with non-zero reserved upper bytes must still match by device id...
    #[test]
    fn resolve_targets_masks_reserved_upper_bytes_before_matching() {
        let mgr = DeviceManager::new();
        let id = DeviceId::from_bytes([1, 2, 3, 4, 5, 6]);
        let spec = DeviceSpec {
            vendor: 1,
            product: 27,
            id: Some(id),
            ..Default::default()
        };
        mgr.add(spec, addr()).unwrap();

        let dirty_target = id.as_target() | (0xbeef_u64 << 48);
        let found = mgr.resolve_targets(dirty_target, false);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].state.try_lock().unwrap().id(), id);
    }

    /// ...and non-zero reserved upper bytes over an all-zero device-id target must still be
    /// recognized as broadcast, not as an unmatched unicast target.
    #[test]
    fn resolve_targets_masks_reserved_upper_bytes_before_broadcast_test() {
        let mgr = DeviceManager::new();
        for i in 0..3u8 {
            let spec = DeviceSpec {
                vendor: 1,
                product: 27,
                id: Some(DeviceId::from_bytes([1, 2, 3, 4, 5, i])),
                ..Default::default()
            };
            mgr.add(spec, addr()).unwrap();
        }
        let dirty_broadcast = 0xbeef_u64 << 48;
        assert_eq!(mgr.resolve_targets(dirty_broadcast, false).len(), 3);
    }
}
