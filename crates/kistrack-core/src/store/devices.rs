// ── Device registry ──
//
// Two indices over the same `Arc<Device>` values: a global collection in
// first-seen order and one sub-collection per PHY. A PHY's sub-collection
// exists once the PHY has been observed (announced, or seen on a device),
// so "never observed" and "observed but empty" stay distinguishable.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use indexmap::IndexMap;

use crate::model::{ComponentData, ComponentId, Device, DeviceKey, PhyFilter, PhyId};

#[derive(Default)]
pub(crate) struct DeviceRegistry {
    all: IndexMap<DeviceKey, Arc<Device>>,
    by_phy: HashMap<PhyId, IndexMap<DeviceKey, Arc<Device>>>,
}

impl DeviceRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Make sure `phy` has a (possibly empty) sub-collection.
    pub(crate) fn ensure_phy(&mut self, phy: PhyId) {
        self.by_phy.entry(phy).or_default();
    }

    /// Insert a device, or merge it into the existing record with the same
    /// key. On merge the original `first_seen` is kept and the incoming
    /// components overwrite existing ones. Returns `true` if the key was new.
    pub(crate) fn upsert(&mut self, mut device: Device) -> bool {
        let key = device.key();
        let is_new = match self.all.get(&key) {
            Some(existing) => {
                let mut merged = Device::clone(existing);
                for id in device.component_ids().collect::<Vec<_>>() {
                    if let Some(data) = device.component(id) {
                        merged.set_component(id, data.clone());
                    }
                }
                merged.last_seen = device.last_seen.max(merged.last_seen);
                device = merged;
                false
            }
            None => true,
        };

        self.store(key, device);
        is_new
    }

    /// Attach `data` under `id` to the device at `key`.
    /// Returns `false` if no such device is tracked.
    pub(crate) fn attach(&mut self, key: &DeviceKey, id: ComponentId, data: ComponentData) -> bool {
        let Some(existing) = self.all.get(key) else {
            return false;
        };

        let mut updated = Device::clone(existing);
        updated.set_component(id, data);
        updated.last_seen = Utc::now();
        self.store(key.clone(), updated);
        true
    }

    pub(crate) fn get(&self, key: &DeviceKey) -> Option<Arc<Device>> {
        self.all.get(key).cloned()
    }

    /// `Any` -> the global collection (never `None`); a PHY -> its
    /// sub-collection, or `None` if that PHY was never observed.
    pub(crate) fn devices_for(&self, filter: PhyFilter) -> Option<Vec<Arc<Device>>> {
        match filter {
            PhyFilter::Any => Some(self.all.values().cloned().collect()),
            PhyFilter::Phy(phy) => self
                .by_phy
                .get(&phy)
                .map(|devices| devices.values().cloned().collect()),
        }
    }

    pub(crate) fn count(&self, filter: PhyFilter) -> usize {
        match filter {
            PhyFilter::Any => self.all.len(),
            PhyFilter::Phy(_) => self.all.values().filter(|d| filter.matches(d.phy)).count(),
        }
    }

    /// Iterate devices matching `filter` in global order.
    pub(crate) fn iter_matching(&self, filter: PhyFilter) -> impl Iterator<Item = &Arc<Device>> {
        self.all.values().filter(move |d| filter.matches(d.phy))
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<Device>> {
        self.all.values().cloned().collect()
    }

    fn store(&mut self, key: DeviceKey, device: Device) {
        let phy = device.phy;
        let shared = Arc::new(device);
        self.by_phy
            .entry(phy)
            .or_default()
            .insert(key.clone(), Arc::clone(&shared));
        self.all.insert(key, shared);
    }
}
