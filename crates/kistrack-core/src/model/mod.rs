// ── Domain model ──
//
// Identity types for PHYs, devices, and device components.

pub mod component;
pub mod device;
pub mod phy;

pub use component::{COMMON_COMPONENT, CommonComponent, ComponentData, ComponentId};
pub use device::{Device, DeviceKey, MacAddress};
pub use phy::{KIS_PHY_ANY, PhyFilter, PhyId, PhyInfo};
