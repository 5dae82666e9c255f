// ── Device domain types ──

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::component::{CommonComponent, ComponentData, ComponentId};
use super::phy::PhyId;

// ── MacAddress ──────────────────────────────────────────────────────

/// MAC address, normalized to lowercase colon-separated format (aa:bb:cc:dd:ee:ff).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MacAddress(String);

impl MacAddress {
    /// Create a normalized MAC address from any common format.
    /// Accepts colon-separated or dash-separated hex.
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_lowercase().replace('-', ":"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MacAddress {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

// ── DeviceKey ───────────────────────────────────────────────────────

/// Identity of a tracked device: the same address on two PHYs is two devices.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceKey {
    pub mac: MacAddress,
    pub phy: PhyId,
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@phy{}", self.mac, self.phy)
    }
}

// ── Device ──────────────────────────────────────────────────────────

/// A device observed on the medium, with a sparse set of component
/// attachments keyed by [`ComponentId`].
#[derive(Debug, Clone, Serialize)]
pub struct Device {
    pub mac: MacAddress,
    pub phy: PhyId,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(skip)]
    components: HashMap<ComponentId, ComponentData>,
}

impl Device {
    pub fn new(mac: MacAddress, phy: PhyId) -> Self {
        let now = Utc::now();
        Self {
            mac,
            phy,
            first_seen: now,
            last_seen: now,
            components: HashMap::new(),
        }
    }

    pub fn key(&self) -> DeviceKey {
        DeviceKey {
            mac: self.mac.clone(),
            phy: self.phy,
        }
    }

    /// Builder-style attach, for constructing a device before tracking it.
    #[must_use]
    pub fn with_component(mut self, id: ComponentId, data: impl Into<ComponentData>) -> Self {
        self.components.insert(id, data.into());
        self
    }

    /// Attach or replace the payload for `id`.
    pub fn set_component(&mut self, id: ComponentId, data: impl Into<ComponentData>) {
        self.components.insert(id, data.into());
    }

    pub fn component(&self, id: ComponentId) -> Option<&ComponentData> {
        self.components.get(&id)
    }

    /// The common traffic component, if `id` holds one.
    pub fn common(&self, id: ComponentId) -> Option<&CommonComponent> {
        self.component(id).and_then(ComponentData::as_common)
    }

    pub fn component_ids(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.components.keys().copied()
    }
}
