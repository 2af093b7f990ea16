//! Canonical domain types for the device cloud.

pub mod device;
pub mod family;

pub use device::{DeviceParams, DeviceSnapshot, OutletParams};
pub use family::{Family, FamilyInfo};
