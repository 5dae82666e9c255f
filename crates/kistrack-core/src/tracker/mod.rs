// ── Device tracker ──
//
// Owns every registry behind one lock: components, PHY bindings, traffic
// counters, and devices. Ingestion takes the write lock once per protocol
// line; queries take the read lock. The device collection is also
// published through a `watch` channel so renderers can follow it without
// touching the lock.

mod ingest;
mod lifecycle;

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use crate::error::CoreError;
use crate::model::{
    COMMON_COMPONENT, ComponentData, ComponentId, Device, DeviceKey, MacAddress, PhyFilter, PhyId,
    PhyInfo,
};
use crate::store::{
    BindingStats, ComponentRegistry, CounterField, CounterStore, DeviceRegistry, FactoryOutcome,
    PhyCounters, PhyHandler, PhyHandlerFactory, PhyRegistry,
};
use crate::stream::{DeviceSnapshot, DeviceStream};

pub use ingest::{DEVICE_PROTOCOL, DropReason, IngestOutcome, PHYMAP_FIELDS, PHYMAP_PROTOCOL};
pub use lifecycle::{LifecycleHandler, ServerLink};

// ── Summary views ────────────────────────────────────────────────────

/// Counters for one PHY, or for all of them when `phy_id` is `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhySummary {
    pub phy_id: Option<PhyId>,
    pub phy_name: String,
    pub handler_bound: bool,
    pub devices: usize,
    #[serde(flatten)]
    pub counters: PhyCounters,
    pub crypt_packets: u64,
}

/// Everything a renderer needs for one refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackerSummary {
    pub total: PhySummary,
    pub phys: Vec<PhySummary>,
    pub bindings: BindingStats,
}

// ── DeviceTracker ────────────────────────────────────────────────────

struct TrackerState {
    components: ComponentRegistry,
    phys: PhyRegistry,
    counters: CounterStore,
    devices: DeviceRegistry,
}

/// Client-side model of what the server has reported: which PHYs exist,
/// which devices were seen on them, and how much traffic they carried.
///
/// Share it as `Arc<DeviceTracker>`; every method takes `&self`.
pub struct DeviceTracker {
    state: RwLock<TrackerState>,
    devices_tx: watch::Sender<DeviceSnapshot>,
    common: ComponentId,
}

impl Default for DeviceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceTracker {
    /// Create an empty tracker. The common traffic component is
    /// registered first and therefore always holds id 1.
    pub fn new() -> Self {
        let mut components = ComponentRegistry::new();
        let common = components.register(COMMON_COMPONENT);
        let (devices_tx, _) = watch::channel(Arc::new(Vec::new()));

        Self {
            state: RwLock::new(TrackerState {
                components,
                phys: PhyRegistry::new(),
                counters: CounterStore::new(),
                devices: DeviceRegistry::new(),
            }),
            devices_tx,
            common,
        }
    }

    // Poisoning is ignored: a partially applied line is a valid state.
    fn read(&self) -> RwLockReadGuard<'_, TrackerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TrackerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_devices(&self, state: &TrackerState) {
        self.devices_tx.send_replace(Arc::new(state.devices.snapshot()));
    }

    // ── Components ───────────────────────────────────────────────────

    /// Id for `name` (case-insensitive), allocating one on first use.
    pub fn register_component(&self, name: &str) -> ComponentId {
        self.write().components.register(name)
    }

    pub fn component_name(&self, id: ComponentId) -> Option<String> {
        self.read().components.resolve(id).map(str::to_owned)
    }

    pub fn component_id(&self, name: &str) -> Option<ComponentId> {
        self.read().components.lookup(name)
    }

    /// Id of the built-in common traffic component.
    pub fn common_component(&self) -> ComponentId {
        self.common
    }

    // ── PHY handlers ─────────────────────────────────────────────────

    /// Offer a PHY plugin. Binds immediately if the server already
    /// announced a matching PHY, otherwise waits for the announcement.
    ///
    /// The factory's `create` runs under the tracker's write lock.
    pub fn register_phy_handler_factory(&self, factory: Box<dyn PhyHandlerFactory>) -> FactoryOutcome {
        self.write().phys.register_factory(factory)
    }

    pub fn phy_handler_for(&self, phy: PhyId) -> Option<Arc<dyn PhyHandler>> {
        self.read().phys.handler_for(phy)
    }

    /// Name the server announced for `phy`.
    pub fn phy_name(&self, phy: PhyId) -> Option<String> {
        self.read().phys.phy_name(phy).map(str::to_owned)
    }

    /// Every PHY the server has announced, by ascending id.
    pub fn phys(&self) -> Vec<PhyInfo> {
        self.read().phys.infos()
    }

    /// Announced PHYs no plugin has claimed.
    pub fn unbound_phys(&self) -> Vec<PhyInfo> {
        self.phys().into_iter().filter(|p| !p.handler_bound).collect()
    }

    /// PHY names of factories still waiting for an announcement.
    pub fn pending_factories(&self) -> Vec<String> {
        self.read().phys.pending_factory_names()
    }

    pub fn binding_stats(&self) -> BindingStats {
        self.read().phys.stats()
    }

    // ── Devices ──────────────────────────────────────────────────────

    /// `Any` yields every device (possibly none). A specific PHY yields its
    /// devices, or `None` if that PHY has never been observed.
    pub fn devices_for(&self, filter: impl Into<PhyFilter>) -> Option<Vec<Arc<Device>>> {
        self.read().devices.devices_for(filter.into())
    }

    pub fn device(&self, key: &DeviceKey) -> Option<Arc<Device>> {
        self.read().devices.get(key)
    }

    /// Insert or merge a device. Returns `true` if it was not tracked yet.
    ///
    /// A device on a PHY the server has not announced still gets a
    /// per-PHY collection.
    pub fn track_device(&self, device: Device) -> bool {
        let key = device.key();
        let mut state = self.write();
        let is_new = state.devices.upsert(device);
        self.publish_devices(&state);
        drop(state);

        if is_new {
            debug!(device = %key, "tracking new device");
        }
        is_new
    }

    /// Attach or replace one component on a tracked device.
    pub fn attach_component(
        &self,
        key: &DeviceKey,
        id: ComponentId,
        data: impl Into<ComponentData>,
    ) -> Result<(), CoreError> {
        let mut state = self.write();
        if !state.devices.attach(key, id, data.into()) {
            return Err(CoreError::DeviceNotFound {
                identifier: key.to_string(),
            });
        }
        self.publish_devices(&state);
        Ok(())
    }

    /// Watch the global device collection.
    pub fn subscribe_devices(&self) -> DeviceStream {
        DeviceStream::new(self.devices_tx.subscribe())
    }

    // ── Tags ─────────────────────────────────────────────────────────

    /// Annotate a device with a tag. The server-side tag protocol is not
    /// modelled, so this always fails with [`CoreError::Unsupported`].
    #[allow(clippy::unused_self)]
    pub fn set_device_tag(
        &self,
        mac: &MacAddress,
        tag: &str,
        _data: &str,
        _persistent: bool,
    ) -> Result<(), CoreError> {
        debug!(%mac, tag, "device tagging requested");
        Err(CoreError::Unsupported {
            operation: format!("set tag '{tag}' on {mac}"),
            reason: "device tags are not supported by this client".into(),
        })
    }

    /// Remove a tag. Always fails with [`CoreError::Unsupported`].
    #[allow(clippy::unused_self)]
    pub fn clear_device_tag(&self, mac: &MacAddress, tag: &str) -> Result<(), CoreError> {
        debug!(%mac, tag, "device tag removal requested");
        Err(CoreError::Unsupported {
            operation: format!("clear tag '{tag}' on {mac}"),
            reason: "device tags are not supported by this client".into(),
        })
    }

    // ── Counters ─────────────────────────────────────────────────────

    fn counter(&self, filter: impl Into<PhyFilter>, field: CounterField) -> u64 {
        self.read().counters.get(filter.into(), field)
    }

    /// Tracked devices, globally or on one PHY.
    pub fn count_devices(&self, filter: impl Into<PhyFilter>) -> usize {
        self.read().devices.count(filter.into())
    }

    pub fn count_packets(&self, filter: impl Into<PhyFilter>) -> u64 {
        self.counter(filter, CounterField::Packets)
    }

    pub fn count_data_packets(&self, filter: impl Into<PhyFilter>) -> u64 {
        self.counter(filter, CounterField::DataPackets)
    }

    pub fn count_error_packets(&self, filter: impl Into<PhyFilter>) -> u64 {
        self.counter(filter, CounterField::ErrorPackets)
    }

    pub fn count_filter_packets(&self, filter: impl Into<PhyFilter>) -> u64 {
        self.counter(filter, CounterField::FilterPackets)
    }

    pub fn packet_rate(&self, filter: impl Into<PhyFilter>) -> u64 {
        self.counter(filter, CounterField::PacketRate)
    }

    /// Sum of `crypt_packets` over the common component of matching
    /// devices. Devices without the component count as zero.
    pub fn count_crypt_packets(&self, filter: impl Into<PhyFilter>) -> u64 {
        let state = self.read();
        crypt_total(&state, filter.into(), self.common)
    }

    // ── Summary ──────────────────────────────────────────────────────

    /// Consistent snapshot of every counter, taken under one read lock.
    pub fn summary(&self) -> TrackerSummary {
        let state = self.read();

        let phys = state
            .phys
            .infos()
            .into_iter()
            .map(|info| {
                let filter = PhyFilter::Phy(info.phy_id);
                PhySummary {
                    phy_id: Some(info.phy_id),
                    phy_name: info.phy_name,
                    handler_bound: info.handler_bound,
                    devices: state.devices.count(filter),
                    counters: state.counters.phy(info.phy_id),
                    crypt_packets: crypt_total(&state, filter, self.common),
                }
            })
            .collect();

        let bindings = state.phys.stats();
        let total = PhySummary {
            phy_id: None,
            phy_name: "all".into(),
            handler_bound: bindings.unbound_phys == 0,
            devices: state.devices.count(PhyFilter::Any),
            counters: state.counters.global(),
            crypt_packets: crypt_total(&state, PhyFilter::Any, self.common),
        };

        TrackerSummary {
            total,
            phys,
            bindings,
        }
    }
}

fn crypt_total(state: &TrackerState, filter: PhyFilter, common: ComponentId) -> u64 {
    state
        .devices
        .iter_matching(filter)
        .filter_map(|d| d.common(common))
        .fold(0_u64, |acc, c| acc.saturating_add(c.crypt_packets))
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{CommonComponent, KIS_PHY_ANY};
    use crate::store::phys::tests::TestFactory;
    use pretty_assertions::assert_eq;

    const ONE: PhyId = PhyId::new(1);
    const TWO: PhyId = PhyId::new(2);

    fn device(mac: &str, phy: PhyId) -> Device {
        Device::new(MacAddress::new(mac), phy)
    }

    fn crypt(n: u64) -> CommonComponent {
        CommonComponent {
            crypt_packets: n,
            ..CommonComponent::default()
        }
    }

    #[test]
    fn common_component_is_registered_first() {
        let tracker = DeviceTracker::new();
        assert_eq!(tracker.common_component().get(), 1);
        assert_eq!(tracker.component_id("COMMON"), Some(tracker.common_component()));
        assert_eq!(tracker.component_name(tracker.common_component()).as_deref(), Some("common"));
    }

    #[test]
    fn component_registration_is_case_insensitive() {
        let tracker = DeviceTracker::new();
        let a = tracker.register_component("Dot11");
        let b = tracker.register_component("DOT11");
        let c = tracker.register_component("bluetooth");
        assert_eq!(a, b);
        assert!(c.get() > a.get());
        assert_eq!(tracker.component_name(a).as_deref(), Some("dot11"));
    }

    #[test]
    fn devices_for_distinguishes_unknown_from_empty() {
        let tracker = DeviceTracker::new();
        assert!(tracker.devices_for(ONE).is_none());
        assert_eq!(tracker.devices_for(KIS_PHY_ANY).unwrap().len(), 0);

        tracker.handle_phymap(&["1", "802.11", "0", "0", "0", "0", "0"]);
        assert_eq!(tracker.devices_for(ONE).unwrap().len(), 0);
        assert!(tracker.devices_for(TWO).is_none());
    }

    #[test]
    fn device_on_unannounced_phy_gets_a_collection() {
        let tracker = DeviceTracker::new();
        assert!(tracker.track_device(device("00:00:00:00:00:01", TWO)));
        assert_eq!(tracker.devices_for(TWO).unwrap().len(), 1);
        assert!(tracker.phys().is_empty());
        assert!(tracker.phy_name(TWO).is_none());
    }

    #[test]
    fn crypt_packets_are_summed_from_common_components() {
        let tracker = DeviceTracker::new();
        let common = tracker.common_component();
        let plugin = tracker.register_component("dot11");

        tracker.track_device(device("00:00:00:00:00:01", ONE).with_component(common, crypt(4)));
        tracker.track_device(device("00:00:00:00:00:02", ONE).with_component(common, crypt(6)));
        tracker.track_device(device("00:00:00:00:00:03", TWO).with_component(common, crypt(1)));
        tracker.track_device(
            device("00:00:00:00:00:04", TWO).with_component(plugin, ComponentData::custom(7_u8)),
        );

        assert_eq!(tracker.count_crypt_packets(ONE), 10);
        assert_eq!(tracker.count_crypt_packets(TWO), 1);
        assert_eq!(tracker.count_crypt_packets(KIS_PHY_ANY), 11);
        assert_eq!(tracker.count_crypt_packets(PhyId::new(9)), 0);
        assert_eq!(tracker.count_devices(TWO), 2);
        assert_eq!(tracker.count_devices(KIS_PHY_ANY), 4);
    }

    #[test]
    fn attach_component_requires_tracked_device() {
        let tracker = DeviceTracker::new();
        let common = tracker.common_component();
        let key = device("00:00:00:00:00:01", ONE).key();

        let err = tracker.attach_component(&key, common, crypt(1)).unwrap_err();
        assert!(matches!(err, CoreError::DeviceNotFound { .. }));

        tracker.track_device(device("00:00:00:00:00:01", ONE));
        tracker.attach_component(&key, common, crypt(3)).unwrap();
        assert_eq!(tracker.count_crypt_packets(ONE), 3);
        assert_eq!(tracker.device(&key).unwrap().common(common), Some(&crypt(3)));
    }

    #[test]
    fn tag_hooks_are_unsupported() {
        let tracker = DeviceTracker::new();
        let mac = MacAddress::new("00:00:00:00:00:01");
        assert!(matches!(
            tracker.set_device_tag(&mac, "owner", "lab", true),
            Err(CoreError::Unsupported { .. })
        ));
        assert!(matches!(
            tracker.clear_device_tag(&mac, "owner"),
            Err(CoreError::Unsupported { .. })
        ));
    }

    #[test]
    fn factory_binding_through_tracker_is_order_independent() {
        let early = DeviceTracker::new();
        early.register_phy_handler_factory(TestFactory::boxed("802.11").0);
        early.handle_phymap(&["1", "802.11", "0", "0", "0", "0", "0"]);

        let late = DeviceTracker::new();
        late.handle_phymap(&["1", "802.11", "0", "0", "0", "0", "0"]);
        assert_eq!(late.unbound_phys().len(), 1);
        assert_eq!(
            late.register_phy_handler_factory(TestFactory::boxed("802.11").0),
            FactoryOutcome::Bound(ONE)
        );

        for tracker in [&early, &late] {
            let handler = tracker.phy_handler_for(ONE).unwrap();
            assert_eq!((handler.phy_id(), handler.phy_name()), (ONE, "802.11"));
            assert!(tracker.unbound_phys().is_empty());
            assert!(tracker.pending_factories().is_empty());
        }
        assert_eq!(early.phys(), late.phys());
    }

    #[test]
    fn summary_reports_each_phy_and_the_total() {
        let tracker = DeviceTracker::new();
        tracker.handle_phymap(&["1", "802.11", "100", "80", "5", "2", "10"]);
        tracker.handle_phymap(&["2", "BTLE", "7", "0", "1", "0", "3"]);
        tracker.register_phy_handler_factory(TestFactory::boxed("BTLE").0);
        tracker.track_device(
            device("00:00:00:00:00:01", ONE).with_component(tracker.common_component(), crypt(2)),
        );

        let summary = tracker.summary();
        assert_eq!(summary.phys.len(), 2);
        assert_eq!(summary.total.counters.packets, 107);
        assert_eq!(summary.total.counters.packet_rate, 13);
        assert_eq!(summary.total.devices, 1);
        assert_eq!(summary.total.crypt_packets, 2);
        assert!(!summary.total.handler_bound);

        let btle = &summary.phys[1];
        assert_eq!(btle.phy_name, "BTLE");
        assert!(btle.handler_bound);
        assert_eq!(btle.counters.error_packets, 1);
        assert_eq!(summary.bindings.unbound_phys, 1);
    }

    #[test]
    fn summary_serializes_flat_counters() {
        let tracker = DeviceTracker::new();
        tracker.handle_phymap(&["1", "802.11", "100", "80", "5", "2", "10"]);
        let json = serde_json::to_value(tracker.summary()).unwrap();
        assert_eq!(json["phys"][0]["phy_id"], 1);
        assert_eq!(json["phys"][0]["packets"], 100);
        assert_eq!(json["total"]["phy_id"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn device_stream_sees_new_devices() {
        let tracker = DeviceTracker::new();
        let mut stream = tracker.subscribe_devices();
        assert!(stream.current().is_empty());

        tracker.track_device(device("00:00:00:00:00:01", ONE));
        let snap = stream.changed().await.unwrap();
        assert_eq!(snap.len(), 1);
        assert_eq!(stream.latest_for(TWO.into()).len(), 0);
        assert_eq!(stream.latest_for(ONE.into()).len(), 1);
    }
}
