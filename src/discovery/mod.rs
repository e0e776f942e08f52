//! Device discovery over UDP beacons
//!
//! Devices broadcast a beacon about once a second. [`AvailabilityListener`]
//! turns that traffic into begin/end availability events and a snapshot of
//! the devices currently heard from.

pub mod decoder;
pub mod listener;
pub mod registry;

pub use decoder::{decode_beacon, encode_beacon};
pub use listener::AvailabilityListener;
pub use registry::{AvailabilityChange, DeviceRegistry};
