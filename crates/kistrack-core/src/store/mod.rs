// ── Tracker state stores ──
//
// Plain single-threaded stores. `DeviceTracker` owns one of each behind a
// single lock, so none of these types synchronise on their own.

mod components;
mod counters;
mod devices;
pub(crate) mod phys;

pub use counters::{CounterField, PhyCounters};
pub use phys::{BindingStats, FactoryOutcome, PhyHandler, PhyHandlerFactory, PhyObservation};

pub(crate) use components::ComponentRegistry;
pub(crate) use counters::CounterStore;
pub(crate) use devices::DeviceRegistry;
pub(crate) use phys::PhyRegistry;
