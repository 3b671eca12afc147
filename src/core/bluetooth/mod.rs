//! Bluetooth functionality for the geolocation tracker client.
//! This module handles all bluetooth operations including scanning,
//! connecting, and receiving coordinate notifications from the peripheral.

mod connection;
mod constants;
mod manager;
mod scanner;
mod session;
mod types;

// Re-export types that should be publicly accessible
pub use connection::{BluestCccdWriter, CccdWriter};
pub use constants::*; // Re-export all constants
pub use manager::TrackerManager;
pub use scanner::ScanController;
pub use session::{ConnectionPhase, GattSession, LinkEvent};
pub use types::{PeripheralHandle, Preconditions, ScanState, Snapshot};
