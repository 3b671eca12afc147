//! The GATT session state machine.
//! One instance models one physical link to one peripheral: connect, service
//! resolution, notification arming, streaming, and teardown. The struct is
//! synchronous and single-writer; the transport driver marshals its events
//! here in arrival order, each tagged with the generation it belongs to.

use log::{debug, error, info, warn};
use serde::Serialize;

use crate::core::decoder;
use crate::core::track::TrackStore;
use crate::error::SessionErrorKind;

/// Ordered progression of a connection attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ConnectionPhase {
    Disconnected,
    Connecting,
    ServiceDiscovery,
    ArmingNotifications,
    Streaming,
    /// Terminal for this attempt; the only exit is a new connect.
    Error(SessionErrorKind),
}

/// An event reported by the transport for a specific connection attempt.
///
/// Events are applied together with the generation the transport driver was
/// started with, so callbacks from a superseded attempt are discardable.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// The physical link is up.
    Connected,
    /// The link could not be established.
    ConnectFailed(String),
    /// Service enumeration finished without the tracker service.
    ServiceMissing,
    /// The service is present but lacks the track characteristic.
    CharacteristicMissing,
    /// Service and characteristic were both located.
    ServicesResolved,
    /// The CCCD write was acknowledged and the notification stream is live.
    NotificationsArmed,
    /// Arming notifications failed (missing CCCD or rejected write).
    ArmFailed(String),
    /// One raw notification payload from the armed characteristic.
    Notification(Vec<u8>),
    /// The transport reported an unsolicited disconnect.
    LinkLost,
}

/// State machine owning one link and the track it accumulates.
pub struct GattSession {
    phase: ConnectionPhase,
    generation: u64,
    device_name: String,
    last_notification_text: Option<String>,
    decode_errors: u64,
    track: TrackStore,
}

impl Default for GattSession {
    fn default() -> Self {
        Self::new()
    }
}

impl GattSession {
    pub fn new() -> Self {
        Self {
            phase: ConnectionPhase::Disconnected,
            generation: 0,
            device_name: String::new(),
            last_notification_text: None,
            decode_errors: 0,
            track: TrackStore::new(),
        }
    }

    pub fn phase(&self) -> &ConnectionPhase {
        &self.phase
    }

    /// Generation of the current connection attempt. Transport drivers carry
    /// the value they were started with; a mismatch marks their events stale.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn last_notification_text(&self) -> Option<&str> {
        self.last_notification_text.as_deref()
    }

    pub fn decode_errors(&self) -> u64 {
        self.decode_errors
    }

    pub fn track(&self) -> &TrackStore {
        &self.track
    }

    /// Starts a new connection attempt, superseding any prior one.
    ///
    /// Clears the track and mints a fresh generation, so late events from a
    /// torn-down link can no longer land here. Returns the new generation for
    /// the transport driver to tag its events with.
    pub fn begin_connect(&mut self, device_name: &str) -> u64 {
        if self.phase != ConnectionPhase::Disconnected {
            info!(
                "Superseding {:?} session with a new connection attempt",
                self.phase
            );
        }
        self.generation += 1;
        self.phase = ConnectionPhase::Connecting;
        self.device_name = device_name.to_string();
        self.last_notification_text = None;
        self.decode_errors = 0;
        self.track.clear();
        info!(
            "Connecting to {:?} (generation {})",
            self.device_name, self.generation
        );
        self.generation
    }

    /// Tears the session down. Valid from any state; reconnecting afterwards
    /// always starts a fresh track.
    pub fn disconnect(&mut self) {
        // Bump the generation so in-flight transport callbacks are stale.
        self.generation += 1;
        self.phase = ConnectionPhase::Disconnected;
        self.device_name.clear();
        self.last_notification_text = None;
        self.decode_errors = 0;
        self.track.clear();
        info!("Session disconnected and track cleared");
    }

    /// Applies one transport event in arrival order.
    ///
    /// Events from superseded generations are discarded. Events that do not
    /// fit the current phase are ignored rather than treated as failures.
    pub fn apply(&mut self, generation: u64, event: LinkEvent) {
        if generation != self.generation {
            debug!(
                "Discarding stale {:?} from generation {} (current {})",
                event, generation, self.generation
            );
            return;
        }

        match (self.phase.clone(), event) {
            (ConnectionPhase::Connecting, LinkEvent::Connected) => {
                info!("Connected to {:?}, discovering services", self.device_name);
                self.phase = ConnectionPhase::ServiceDiscovery;
            }
            (ConnectionPhase::Connecting, LinkEvent::ConnectFailed(reason)) => {
                error!("Connection to {:?} failed: {}", self.device_name, reason);
                self.fail(SessionErrorKind::ConnectFailed);
            }
            (ConnectionPhase::Connecting, LinkEvent::LinkLost) => {
                error!("Link dropped while connecting to {:?}", self.device_name);
                self.fail(SessionErrorKind::ConnectFailed);
            }
            (ConnectionPhase::ServiceDiscovery, LinkEvent::ServiceMissing) => {
                error!("Tracker service not found on {:?}", self.device_name);
                self.fail(SessionErrorKind::ServiceNotFound);
            }
            (ConnectionPhase::ServiceDiscovery, LinkEvent::CharacteristicMissing) => {
                error!("Track characteristic not found on {:?}", self.device_name);
                self.fail(SessionErrorKind::CharacteristicNotFound);
            }
            (ConnectionPhase::ServiceDiscovery, LinkEvent::ServicesResolved) => {
                info!("Service and characteristic located, arming notifications");
                self.phase = ConnectionPhase::ArmingNotifications;
            }
            (ConnectionPhase::ArmingNotifications, LinkEvent::NotificationsArmed) => {
                info!("Notifications armed, streaming");
                self.phase = ConnectionPhase::Streaming;
            }
            (ConnectionPhase::ArmingNotifications, LinkEvent::ArmFailed(reason)) => {
                error!("Failed to arm notifications: {}", reason);
                self.fail(SessionErrorKind::NotificationArmFailed);
            }
            (ConnectionPhase::Streaming, LinkEvent::Notification(bytes)) => {
                self.ingest(&bytes);
            }
            (
                ConnectionPhase::ServiceDiscovery
                | ConnectionPhase::ArmingNotifications
                | ConnectionPhase::Streaming,
                LinkEvent::LinkLost,
            ) => {
                error!("Link to {:?} lost", self.device_name);
                self.fail(SessionErrorKind::LinkLost);
            }
            (phase, event) => {
                debug!("Ignoring {:?} in phase {:?}", event, phase);
            }
        }
    }

    /// Routes one raw notification through the decoder. A malformed frame is
    /// counted and logged; it never terminates the session.
    fn ingest(&mut self, bytes: &[u8]) {
        self.last_notification_text = Some(String::from_utf8_lossy(bytes).into_owned());
        match decoder::decode(bytes) {
            Ok(fix) => {
                let sample = self.track.append(fix);
                debug!(
                    "Stored sample #{}: {},{} ({} total)",
                    sample.sequence,
                    sample.latitude,
                    sample.longitude,
                    self.track.len()
                );
            }
            Err(e) => {
                self.decode_errors += 1;
                warn!(
                    "Dropping undecodable frame ({} so far): {}",
                    self.decode_errors, e
                );
            }
        }
    }

    fn fail(&mut self, kind: SessionErrorKind) {
        self.phase = ConnectionPhase::Error(kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Walks a session up to `Streaming` and returns the live generation.
    fn streaming_session(session: &mut GattSession) -> u64 {
        let generation = session.begin_connect("Tracker");
        session.apply(generation, LinkEvent::Connected);
        session.apply(generation, LinkEvent::ServicesResolved);
        session.apply(generation, LinkEvent::NotificationsArmed);
        assert_eq!(session.phase(), &ConnectionPhase::Streaming);
        generation
    }

    #[test]
    fn happy_path_walks_every_phase_in_order() {
        let mut session = GattSession::new();
        let generation = session.begin_connect("Tracker");
        assert_eq!(session.phase(), &ConnectionPhase::Connecting);
        session.apply(generation, LinkEvent::Connected);
        assert_eq!(session.phase(), &ConnectionPhase::ServiceDiscovery);
        session.apply(generation, LinkEvent::ServicesResolved);
        assert_eq!(session.phase(), &ConnectionPhase::ArmingNotifications);
        session.apply(generation, LinkEvent::NotificationsArmed);
        assert_eq!(session.phase(), &ConnectionPhase::Streaming);
        assert_eq!(session.device_name(), "Tracker");
    }

    #[test]
    fn connect_failure_parks_in_error() {
        let mut session = GattSession::new();
        let generation = session.begin_connect("Tracker");
        session.apply(generation, LinkEvent::ConnectFailed("timed out".into()));
        assert_eq!(
            session.phase(),
            &ConnectionPhase::Error(SessionErrorKind::ConnectFailed)
        );
    }

    #[test]
    fn link_loss_while_connecting_maps_to_connect_failed() {
        let mut session = GattSession::new();
        let generation = session.begin_connect("Tracker");
        session.apply(generation, LinkEvent::LinkLost);
        assert_eq!(
            session.phase(),
            &ConnectionPhase::Error(SessionErrorKind::ConnectFailed)
        );
    }

    #[test]
    fn missing_characteristic_then_reconnect_restarts_cleanly() {
        let mut session = GattSession::new();
        let generation = session.begin_connect("Tracker");
        session.apply(generation, LinkEvent::Connected);
        session.apply(generation, LinkEvent::CharacteristicMissing);
        assert_eq!(
            session.phase(),
            &ConnectionPhase::Error(SessionErrorKind::CharacteristicNotFound)
        );

        // The only exit from the error phase is an explicit new connect.
        let next = session.begin_connect("Tracker");
        assert!(next > generation);
        assert_eq!(session.phase(), &ConnectionPhase::Connecting);
        assert!(session.track().is_empty());
    }

    #[test]
    fn arm_failure_parks_in_error() {
        let mut session = GattSession::new();
        let generation = session.begin_connect("Tracker");
        session.apply(generation, LinkEvent::Connected);
        session.apply(generation, LinkEvent::ServicesResolved);
        session.apply(generation, LinkEvent::ArmFailed("CCCD not found".into()));
        assert_eq!(
            session.phase(),
            &ConnectionPhase::Error(SessionErrorKind::NotificationArmFailed)
        );
    }

    #[test]
    fn malformed_frame_mid_stream_is_skipped_without_phase_change() {
        let mut session = GattSession::new();
        let generation = streaming_session(&mut session);

        session.apply(generation, LinkEvent::Notification(b"37.7,-122.4".to_vec()));
        session.apply(generation, LinkEvent::Notification(b"bad-data".to_vec()));
        session.apply(generation, LinkEvent::Notification(b"37.8,-122.5".to_vec()));

        assert_eq!(session.phase(), &ConnectionPhase::Streaming);
        assert_eq!(session.track().len(), 2);
        let sequences: Vec<u64> = session.track().samples().iter().map(|s| s.sequence).collect();
        assert_eq!(sequences, vec![0, 1]);
        assert_eq!(session.decode_errors(), 1);
        assert_eq!(session.last_notification_text(), Some("37.8,-122.5"));
    }

    #[test]
    fn raw_text_is_recorded_even_for_undecodable_frames() {
        let mut session = GattSession::new();
        let generation = streaming_session(&mut session);
        session.apply(generation, LinkEvent::Notification(b"garbage".to_vec()));
        assert_eq!(session.last_notification_text(), Some("garbage"));
    }

    #[test]
    fn link_loss_while_streaming_keeps_the_track() {
        let mut session = GattSession::new();
        let generation = streaming_session(&mut session);
        session.apply(generation, LinkEvent::Notification(b"1.0,2.0".to_vec()));
        session.apply(generation, LinkEvent::LinkLost);
        assert_eq!(
            session.phase(),
            &ConnectionPhase::Error(SessionErrorKind::LinkLost)
        );
        // The accumulated track stays visible until an explicit disconnect.
        assert_eq!(session.track().len(), 1);
        assert_eq!(session.device_name(), "Tracker");
    }

    #[test]
    fn disconnect_clears_everything_from_any_phase() {
        let walks: Vec<fn(&mut GattSession) -> u64> = vec![
            |s| s.begin_connect("Tracker"),
            |s| {
                let g = s.begin_connect("Tracker");
                s.apply(g, LinkEvent::Connected);
                g
            },
            |s| {
                let g = s.begin_connect("Tracker");
                s.apply(g, LinkEvent::Connected);
                s.apply(g, LinkEvent::ServicesResolved);
                g
            },
            |s| {
                let g = streaming_session(s);
                s.apply(g, LinkEvent::Notification(b"1.0,2.0".to_vec()));
                g
            },
            |s| {
                let g = s.begin_connect("Tracker");
                s.apply(g, LinkEvent::ConnectFailed("nope".into()));
                g
            },
        ];

        for walk in walks {
            let mut session = GattSession::new();
            walk(&mut session);
            session.disconnect();
            assert_eq!(session.phase(), &ConnectionPhase::Disconnected);
            assert!(session.track().is_empty());
            assert_eq!(session.device_name(), "");
            assert_eq!(session.last_notification_text(), None);
        }
    }

    #[test]
    fn reconnect_discards_notifications_from_the_superseded_link() {
        let mut session = GattSession::new();
        let stale = streaming_session(&mut session);
        session.apply(stale, LinkEvent::Notification(b"1.0,1.0".to_vec()));
        assert_eq!(session.track().len(), 1);

        // A new connect tears down the old attempt and empties the track.
        let fresh = session.begin_connect("Other");
        assert!(session.track().is_empty());

        // Late callbacks from the old link must not land in the new track.
        session.apply(stale, LinkEvent::Notification(b"9.9,9.9".to_vec()));
        assert!(session.track().is_empty());
        assert_eq!(session.phase(), &ConnectionPhase::Connecting);

        // The fresh attempt proceeds normally afterwards.
        session.apply(fresh, LinkEvent::Connected);
        assert_eq!(session.phase(), &ConnectionPhase::ServiceDiscovery);
    }

    #[test]
    fn stale_events_cannot_resurrect_a_disconnected_session() {
        let mut session = GattSession::new();
        let stale = streaming_session(&mut session);
        session.disconnect();
        session.apply(stale, LinkEvent::Notification(b"1.0,2.0".to_vec()));
        session.apply(stale, LinkEvent::LinkLost);
        assert_eq!(session.phase(), &ConnectionPhase::Disconnected);
        assert!(session.track().is_empty());
    }

    #[test]
    fn notification_before_streaming_is_ignored() {
        let mut session = GattSession::new();
        let generation = session.begin_connect("Tracker");
        session.apply(generation, LinkEvent::Connected);
        // Streaming is only reachable through discovery and arming.
        session.apply(generation, LinkEvent::Notification(b"1.0,2.0".to_vec()));
        assert_eq!(session.phase(), &ConnectionPhase::ServiceDiscovery);
        assert!(session.track().is_empty());
    }
}
