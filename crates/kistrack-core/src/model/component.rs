// ── Device component types ──
//
// Components are independently registered categories of per-device data.
// The core knows the shape of exactly one (`CommonComponent`); every
// plugin-defined payload travels as an opaque `Custom` value.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Name under which the common traffic component is registered.
pub const COMMON_COMPONENT: &str = "common";

/// Stable numeric slot for a registered component name. Starts at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentId(u32);

impl ComponentId {
    pub(crate) const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-device traffic tallies shared by every PHY.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommonComponent {
    pub packets: u64,
    pub data_packets: u64,
    pub crypt_packets: u64,
    pub error_packets: u64,
    pub filter_packets: u64,
}

/// Payload attached to a device under a [`ComponentId`].
#[derive(Clone)]
pub enum ComponentData {
    Common(CommonComponent),
    /// Plugin-defined data the core never inspects.
    Custom(Arc<dyn Any + Send + Sync>),
}

impl ComponentData {
    /// Wrap an arbitrary plugin value.
    pub fn custom<T: Any + Send + Sync>(value: T) -> Self {
        Self::Custom(Arc::new(value))
    }

    pub fn as_common(&self) -> Option<&CommonComponent> {
        match self {
            Self::Common(common) => Some(common),
            Self::Custom(_) => None,
        }
    }

    /// Borrow a custom payload as `T`, if that is what it holds.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Custom(value) => value.downcast_ref::<T>(),
            Self::Common(_) => None,
        }
    }
}

impl fmt::Debug for ComponentData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Common(common) => f.debug_tuple("Common").field(common).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl From<CommonComponent> for ComponentData {
    fn from(common: CommonComponent) -> Self {
        Self::Common(common)
    }
}
