//! kistrack-core: client-side device and PHY tracking for Kismet servers.
//!
//! - [`DeviceTracker`] holds the component registry, PHY handler bindings,
//!   traffic counters, and tracked devices, and ingests `PHYMAP` sentences.
//! - [`LifecycleHandler`] subscribes a tracker to a [`ServerLink`] each
//!   time the link is configured.
//! - [`Session`] runs a tracker against a live server.

pub mod config;
pub mod error;
pub mod model;
pub mod session;
pub mod store;
pub mod stream;
pub mod tracker;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{DEFAULT_SERVER, SessionConfig};
pub use kistrack_proto::{ReconnectConfig, ServerInfo};
pub use error::CoreError;
pub use session::{Session, SessionState};
pub use store::{
    BindingStats, CounterField, FactoryOutcome, PhyCounters, PhyHandler, PhyHandlerFactory,
};
pub use stream::{DeviceSnapshot, DeviceStream, DeviceWatchStream};
pub use tracker::{
    DEVICE_PROTOCOL, DeviceTracker, DropReason, IngestOutcome, LifecycleHandler, PHYMAP_FIELDS,
    PHYMAP_PROTOCOL, PhySummary, ServerLink, TrackerSummary,
};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    COMMON_COMPONENT, CommonComponent, ComponentData, ComponentId, Device, DeviceKey, KIS_PHY_ANY,
    MacAddress, PhyFilter, PhyId, PhyInfo,
};
