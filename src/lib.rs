//! Geotrack client library
//! A BLE GATT client that discovers a tracker peripheral, subscribes to its
//! coordinate notifications, and accumulates the decoded fixes into an
//! ordered geolocation track. The embedding application supplies commands
//! (scan, connect, disconnect) and observes state snapshots; it never
//! mutates core state directly.

// Module declarations
pub mod core;
pub mod error;
pub mod logging;

// Re-export the public surface
pub use crate::core::bluetooth::{
    ConnectionPhase, PeripheralHandle, Preconditions, ScanState, Snapshot, TrackerManager,
};
pub use crate::core::track::{CoordinateSample, GeoFix, TrackStore};
pub use crate::error::{CommandError, DecodeError, SessionErrorKind};
