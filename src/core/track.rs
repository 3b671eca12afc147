//! Append-only storage for accepted geolocation samples.
//! The store assigns sequence numbers on append and answers aggregate queries
//! over the accumulated track.

use serde::Serialize;

/// A decoded latitude/longitude pair before it is accepted into the track.
///
/// Values are finite but otherwise unvalidated; the upstream feed is
/// permissive and no range clamping is imposed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeoFix {
    pub latitude: f64,
    pub longitude: f64,
}

/// A sample accepted into the track, tagged with its acceptance index.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CoordinateSample {
    pub latitude: f64,
    pub longitude: f64,
    /// Index at which the sample was accepted; strictly increasing, no gaps.
    pub sequence: u64,
}

/// Ordered, append-only collection of coordinate samples.
///
/// Mutated only by the active session; readers see clones via snapshots.
#[derive(Debug, Default)]
pub struct TrackStore {
    samples: Vec<CoordinateSample>,
    next_sequence: u64,
}

impl TrackStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts a fix, assigning it the next sequence number.
    pub fn append(&mut self, fix: GeoFix) -> CoordinateSample {
        let sample = CoordinateSample {
            latitude: fix.latitude,
            longitude: fix.longitude,
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;
        self.samples.push(sample);
        sample
    }

    /// Empties the store and resets the sequence counter to zero.
    pub fn clear(&mut self) {
        self.samples.clear();
        self.next_sequence = 0;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[CoordinateSample] {
        &self.samples
    }

    /// Arithmetic mean of all latitudes and longitudes, or `None` when the
    /// track is empty.
    pub fn centroid(&self) -> Option<GeoFix> {
        if self.samples.is_empty() {
            return None;
        }
        let count = self.samples.len() as f64;
        let lat_sum: f64 = self.samples.iter().map(|s| s.latitude).sum();
        let lng_sum: f64 = self.samples.iter().map(|s| s.longitude).sum();
        Some(GeoFix {
            latitude: lat_sum / count,
            longitude: lng_sum / count,
        })
    }
}
