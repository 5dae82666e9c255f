// ── PHY identity types ──

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Server-assigned identifier of a physical-layer type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhyId(u32);

impl PhyId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PhyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PhyId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl From<u32> for PhyId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

/// Query selector: one PHY, or every PHY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PhyFilter {
    /// Aggregate across all PHYs.
    #[default]
    Any,
    Phy(PhyId),
}

/// Selector matching every PHY.
pub const KIS_PHY_ANY: PhyFilter = PhyFilter::Any;

impl PhyFilter {
    pub fn matches(self, phy: PhyId) -> bool {
        match self {
            Self::Any => true,
            Self::Phy(wanted) => wanted == phy,
        }
    }
}

impl From<PhyId> for PhyFilter {
    fn from(phy: PhyId) -> Self {
        Self::Phy(phy)
    }
}

impl From<Option<PhyId>> for PhyFilter {
    fn from(phy: Option<PhyId>) -> Self {
        phy.map_or(Self::Any, Self::Phy)
    }
}

/// Point-in-time view of one announced PHY.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhyInfo {
    pub phy_id: PhyId,
    pub phy_name: String,
    /// Whether a plugin handler has been bound to this PHY.
    pub handler_bound: bool,
}
