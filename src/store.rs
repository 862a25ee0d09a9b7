use std::net::IpAddr;

use indexmap::IndexMap;

use crate::{controller::Update, device::DeviceRecord};

/// The front-end's device list, keyed by address in insertion order.
///
/// Only the UI thread touches this; the worker describes changes as [`Update`]s.
#[derive(Debug, Default)]
pub struct DeviceStore {
    devices: IndexMap<IpAddr, DeviceRecord>,
}

impl DeviceStore {
    pub fn new() -> DeviceStore {
        DeviceStore::default()
    }

    /// Apply a device update. Returns false for updates that carry no device change.
    pub fn apply(&mut self, update: &Update) -> bool {
        match update {
            Update::DevicesReplaced(devices) => {
                self.devices = devices
                    .iter()
                    .map(|device| (device.addr, device.clone()))
                    .collect();
            }
            Update::DeviceAdded(device) => {
                self.devices.insert(device.addr, device.clone());
            }
            // A device dropped by a newer discovery pass stays dropped.
            Update::DeviceUpdated(device) => {
                if let Some(existing) = self.devices.get_mut(&device.addr) {
                    *existing = device.clone();
                }
            }
            Update::DeviceUnreachable(addr) => {
                if let Some(existing) = self.devices.get_mut(addr) {
                    *existing = existing.unreachable();
                }
            }
            Update::Status(_) | Update::Alert { .. } => return false,
        }
        true
    }

    pub fn get(&self, addr: &IpAddr) -> Option<&DeviceRecord> {
        self.devices.get(addr)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.devices.values()
    }

    /// Snapshot for handing to the worker.
    pub fn records(&self) -> Vec<DeviceRecord> {
        self.devices.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
