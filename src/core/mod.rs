//! Core functionality for the geolocation tracker client.
//! This module contains the session machinery, the frame decoder, and the
//! track storage it feeds.

pub mod bluetooth;
pub mod decoder;
pub mod track;

// Re-export commonly used types
pub use bluetooth::TrackerManager;
pub use track::{CoordinateSample, GeoFix, TrackStore};
