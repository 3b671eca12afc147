//! Defines shared data structures for the Bluetooth module.

use std::sync::Arc;

use log::error;
use serde::Serialize;
use tokio::sync::{watch, Mutex};

use crate::core::bluetooth::session::{ConnectionPhase, GattSession};
use crate::core::track::CoordinateSample;
use crate::error::CommandError;

/// Identity of a discoverable or previously-bonded peripheral.
///
/// Immutable once observed; two handles are equal when their addresses match.
#[derive(Debug, Clone, Eq, Serialize)]
pub struct PeripheralHandle {
    /// Platform-specific identifier used to open a connection (especially
    /// important on macOS, where the transport address is not exposed).
    pub id: String,
    /// The advertised name, or a placeholder when the device has none.
    pub name: String,
    /// The transport address (MAC address on most platforms).
    pub address: String,
    /// Whether the platform reports this device as paired/bonded.
    pub paired: bool,
}

impl PartialEq for PeripheralHandle {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

/// Lifecycle of the discovery pass. `Scanning` holds only between a
/// successful start and a stop or failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScanState {
    Idle,
    Scanning,
    StoppingRequested,
}

/// Platform preconditions the caller is responsible for establishing.
///
/// The core never prompts for permissions or toggles radios; it only rejects
/// commands whose preconditions the caller reports as unmet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preconditions {
    pub adapter_enabled: bool,
    pub location_enabled: bool,
    pub permissions_granted: bool,
}

impl Default for Preconditions {
    fn default() -> Self {
        Self {
            adapter_enabled: true,
            location_enabled: true,
            permissions_granted: true,
        }
    }
}

/// Point-in-time view of the tracker published to observers on every state
/// change. Observers read snapshots; they never mutate core state.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub adapter_on: bool,
    pub scan_state: ScanState,
    pub discovered: Vec<PeripheralHandle>,
    pub paired: Vec<PeripheralHandle>,
    pub phase: ConnectionPhase,
    pub connected_device_name: String,
    pub last_notification_text: Option<String>,
    pub decode_errors: u64,
    pub track: Vec<CoordinateSample>,
}

/// The single-writer state behind the manager's mutex. Scan bookkeeping and
/// the session state machine are mutated only while this is locked.
pub(crate) struct TrackerState {
    pub adapter_present: bool,
    pub preconditions: Preconditions,
    pub scan_state: ScanState,
    pub discovered: Vec<PeripheralHandle>,
    pub paired: Vec<PeripheralHandle>,
    pub session: GattSession,
}

pub(crate) type SharedState = Arc<Mutex<TrackerState>>;
pub(crate) type SnapshotSender = Arc<watch::Sender<Snapshot>>;

impl TrackerState {
    pub fn new(adapter_present: bool) -> Self {
        Self {
            adapter_present,
            preconditions: Preconditions::default(),
            scan_state: ScanState::Idle,
            discovered: Vec::new(),
            paired: Vec::new(),
            session: GattSession::new(),
        }
    }

    /// Records a discovery event. Set semantics by address: a handle already
    /// present is not re-added and does not move. Returns whether the handle
    /// was newly added to either set.
    pub fn observe_peripheral(&mut self, handle: PeripheralHandle) -> bool {
        let mut added = false;
        if handle.paired && !self.paired.contains(&handle) {
            self.paired.push(handle.clone());
            added = true;
        }
        if !self.discovered.contains(&handle) {
            self.discovered.push(handle);
            added = true;
        }
        added
    }

    /// Validates the preconditions for starting discovery. Rejections are
    /// synchronous and leave all state untouched.
    pub fn check_scan_preconditions(&self) -> Result<(), CommandError> {
        if !self.adapter_present {
            return Err(CommandError::AdapterUnavailable);
        }
        if !self.preconditions.permissions_granted {
            return Err(CommandError::PermissionDenied);
        }
        if !self.preconditions.adapter_enabled {
            return Err(CommandError::AdapterDisabled);
        }
        if !self.preconditions.location_enabled {
            return Err(CommandError::PreconditionUnmet);
        }
        Ok(())
    }

    /// Validates the preconditions for opening a connection. Location
    /// services matter only for discovery, not for an established target.
    pub fn check_connect_preconditions(&self) -> Result<(), CommandError> {
        if !self.adapter_present {
            return Err(CommandError::AdapterUnavailable);
        }
        if !self.preconditions.permissions_granted {
            return Err(CommandError::PermissionDenied);
        }
        if !self.preconditions.adapter_enabled {
            return Err(CommandError::AdapterDisabled);
        }
        Ok(())
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            adapter_on: self.adapter_present && self.preconditions.adapter_enabled,
            scan_state: self.scan_state,
            discovered: self.discovered.clone(),
            paired: self.paired.clone(),
            phase: self.session.phase().clone(),
            connected_device_name: self.session.device_name().to_string(),
            last_notification_text: self.session.last_notification_text().map(str::to_string),
            decode_errors: self.session.decode_errors(),
            track: self.session.track().samples().to_vec(),
        }
    }

    /// Publishes the current snapshot to observers.
    pub fn publish(&self, tx: &SnapshotSender) {
        if let Err(e) = tx.send(self.snapshot()) {
            error!("Failed to publish state snapshot: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(address: &str, name: &str, paired: bool) -> PeripheralHandle {
        PeripheralHandle {
            id: format!("platform-{address}"),
            name: name.to_string(),
            address: address.to_string(),
            paired,
        }
    }

    #[test]
    fn observe_deduplicates_by_address() {
        let mut state = TrackerState::new(true);
        assert!(state.observe_peripheral(handle("AA:BB:CC:DD:EE:FF", "Tracker", false)));
        assert!(!state.observe_peripheral(handle("AA:BB:CC:DD:EE:FF", "Tracker", false)));
        assert_eq!(state.discovered.len(), 1);
    }

    #[test]
    fn re_observation_does_not_refresh_position() {
        let mut state = TrackerState::new(true);
        state.observe_peripheral(handle("11:11:11:11:11:11", "First", false));
        state.observe_peripheral(handle("22:22:22:22:22:22", "Second", false));
        // Same address, different advertised name: the original entry stays.
        state.observe_peripheral(handle("11:11:11:11:11:11", "Renamed", false));
        assert_eq!(state.discovered[0].name, "First");
        assert_eq!(state.discovered[1].name, "Second");
        assert_eq!(state.discovered.len(), 2);
    }

    #[test]
    fn paired_devices_land_in_both_sets() {
        let mut state = TrackerState::new(true);
        state.observe_peripheral(handle("AA:AA:AA:AA:AA:AA", "Bonded", true));
        assert_eq!(state.paired.len(), 1);
        assert_eq!(state.discovered.len(), 1);
    }

    #[test]
    fn snapshot_reports_adapter_off_when_precondition_unmet() {
        let mut state = TrackerState::new(true);
        assert!(state.snapshot().adapter_on);
        state.preconditions.adapter_enabled = false;
        assert!(!state.snapshot().adapter_on);
    }

    #[test]
    fn commands_pass_when_all_preconditions_hold() {
        let state = TrackerState::new(true);
        assert_eq!(state.check_scan_preconditions(), Ok(()));
        assert_eq!(state.check_connect_preconditions(), Ok(()));
    }

    #[test]
    fn missing_adapter_rejects_scan_and_connect() {
        let state = TrackerState::new(false);
        assert_eq!(
            state.check_scan_preconditions(),
            Err(CommandError::AdapterUnavailable)
        );
        assert_eq!(
            state.check_connect_preconditions(),
            Err(CommandError::AdapterUnavailable)
        );
    }

    #[test]
    fn missing_permissions_reject_scan_and_connect() {
        let mut state = TrackerState::new(true);
        state.preconditions.permissions_granted = false;
        assert_eq!(
            state.check_scan_preconditions(),
            Err(CommandError::PermissionDenied)
        );
        assert_eq!(
            state.check_connect_preconditions(),
            Err(CommandError::PermissionDenied)
        );
    }

    #[test]
    fn powered_off_adapter_rejects_scan_and_connect() {
        let mut state = TrackerState::new(true);
        state.preconditions.adapter_enabled = false;
        assert_eq!(
            state.check_scan_preconditions(),
            Err(CommandError::AdapterDisabled)
        );
        assert_eq!(
            state.check_connect_preconditions(),
            Err(CommandError::AdapterDisabled)
        );
    }

    #[test]
    fn disabled_location_rejects_scan_but_not_connect() {
        let mut state = TrackerState::new(true);
        state.preconditions.location_enabled = false;
        assert_eq!(
            state.check_scan_preconditions(),
            Err(CommandError::PreconditionUnmet)
        );
        assert_eq!(state.check_connect_preconditions(), Ok(()));
    }

    #[test]
    fn rejected_command_leaves_prior_state_unchanged() {
        let mut state = TrackerState::new(true);
        state.observe_peripheral(handle("AA:BB:CC:DD:EE:FF", "Tracker", false));
        state.preconditions.location_enabled = false;

        assert!(state.check_scan_preconditions().is_err());

        // The rejection mutated nothing: scan idle, sets intact, session down.
        assert_eq!(state.scan_state, ScanState::Idle);
        assert_eq!(state.discovered.len(), 1);
        assert_eq!(state.session.phase(), &ConnectionPhase::Disconnected);
        assert!(state.session.track().is_empty());
    }
}
