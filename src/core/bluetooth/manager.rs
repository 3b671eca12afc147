//! Tracker manager: the command and observation surface of the core.
//! This module provides the main interface for bluetooth operations: scan
//! control, connect/disconnect, precondition reporting, and the snapshot
//! channel observers subscribe to. Commands return after validation and
//! dispatch; link outcomes arrive through snapshots, never as return values.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use bluest::{Adapter, Device};
use log::{info, warn};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::connection;
use crate::core::bluetooth::constants::UNKNOWN_DEVICE_NAME;
use crate::core::bluetooth::scanner::ScanController;
use crate::core::bluetooth::types::{
    Preconditions, SharedState, Snapshot, SnapshotSender, TrackerState,
};
use crate::error::CommandError;

/// Manages Bluetooth operations for one tracker link at a time.
pub struct TrackerManager {
    /// `None` when the machine has no Bluetooth adapter; commands needing one
    /// are rejected with [`CommandError::AdapterUnavailable`].
    adapter: Option<Adapter>,
    /// Map of platform device ids to devices, filled by the scanner.
    devices: Arc<Mutex<HashMap<String, Device>>>,
    /// Single-writer state behind the session boundary.
    state: SharedState,
    snapshot_tx: SnapshotSender,
    snapshot_rx: watch::Receiver<Snapshot>,
    scanner: Option<ScanController>,
    /// The device of the current connection attempt, kept for link release.
    current_device: Option<Device>,
    /// Cancels the in-flight link driver; replaced on every connect.
    link_cancel: CancellationToken,
}

impl TrackerManager {
    /// Creates a new TrackerManager.
    ///
    /// A missing adapter is not fatal here: the manager still constructs and
    /// reports `adapter_on: false`, rejecting scan/connect commands until the
    /// environment changes.
    pub async fn new() -> Result<Self> {
        let adapter = Adapter::default().await;
        match &adapter {
            Some(adapter) => {
                adapter.wait_available().await?;
                info!("Bluetooth adapter is available.");
            }
            None => warn!("No Bluetooth adapter found; scan and connect will be rejected."),
        }

        let tracker_state = TrackerState::new(adapter.is_some());
        let (snapshot_tx, snapshot_rx) = watch::channel(tracker_state.snapshot());
        let snapshot_tx: SnapshotSender = Arc::new(snapshot_tx);
        let state: SharedState = Arc::new(Mutex::new(tracker_state));
        let devices = Arc::new(Mutex::new(HashMap::new()));

        let scanner = adapter.clone().map(|adapter| {
            ScanController::new(adapter, state.clone(), devices.clone(), snapshot_tx.clone())
        });

        Ok(Self {
            adapter,
            devices,
            state,
            snapshot_tx,
            snapshot_rx,
            scanner,
            current_device: None,
            link_cancel: CancellationToken::new(),
        })
    }

    /// Updates the caller-reported platform preconditions.
    pub async fn set_preconditions(&self, preconditions: Preconditions) {
        let mut state = self.state.lock().await;
        state.preconditions = preconditions;
        state.publish(&self.snapshot_tx);
    }

    /// Subscribes to state snapshots; a new snapshot is published on every
    /// state change.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot_rx.clone()
    }

    /// Returns the current state snapshot.
    pub async fn snapshot(&self) -> Snapshot {
        self.state.lock().await.snapshot()
    }

    /// Starts device discovery.
    pub async fn start_scan(&mut self) -> Result<(), CommandError> {
        self.check_scan_preconditions().await?;
        match self.scanner.as_mut() {
            Some(scanner) => {
                scanner
                    .start()
                    .await
                    .map_err(|_| CommandError::AdapterUnavailable)?;
                Ok(())
            }
            None => Err(CommandError::AdapterUnavailable),
        }
    }

    /// Stops device discovery; no-op when idle.
    pub async fn stop_scan(&mut self) {
        if let Some(scanner) = self.scanner.as_mut() {
            scanner.stop().await;
        }
    }

    /// Connects to a discovered peripheral by its platform id.
    ///
    /// Any prior live link is torn down first and the track starts fresh;
    /// the outcome of the attempt is observed through snapshots.
    pub async fn connect(&mut self, peripheral_id: &str) -> Result<(), CommandError> {
        self.check_connect_preconditions().await?;
        let adapter = self
            .adapter
            .clone()
            .ok_or(CommandError::AdapterUnavailable)?;

        let device = {
            let devices = self.devices.lock().await;
            devices
                .get(peripheral_id)
                .cloned()
                .ok_or_else(|| CommandError::UnknownPeripheral(peripheral_id.to_string()))?
        };

        // Supersede the in-flight driver. The old link itself is released by
        // the new driver, before it opens the new one: at most one link is
        // live at a time, and a half-torn-down predecessor must not be
        // mistaken for the fresh link on a same-peripheral reconnect.
        self.link_cancel.cancel();
        self.link_cancel = CancellationToken::new();
        let previous = self.current_device.take();

        let name = device
            .name()
            .unwrap_or_else(|_| UNKNOWN_DEVICE_NAME.to_string());
        let generation = {
            let mut state = self.state.lock().await;
            let generation = state.session.begin_connect(&name);
            state.publish(&self.snapshot_tx);
            generation
        };

        self.current_device = Some(device.clone());
        tokio::spawn(connection::drive_link(
            adapter,
            device,
            previous,
            generation,
            self.state.clone(),
            self.snapshot_tx.clone(),
            self.link_cancel.clone(),
        ));
        Ok(())
    }

    /// Disconnects the current session. Valid from any state: the phase
    /// returns to `Disconnected`, the device identity and track are cleared,
    /// and the transport link is released in the background.
    pub async fn disconnect(&mut self) {
        self.link_cancel.cancel();
        {
            let mut state = self.state.lock().await;
            state.session.disconnect();
            state.publish(&self.snapshot_tx);
        }
        if let (Some(adapter), Some(device)) = (self.adapter.clone(), self.current_device.take()) {
            tokio::spawn(connection::release_link(adapter, device));
        }
    }

    /// Returns the name of the currently connected device, if any.
    pub async fn connected_device_name(&self) -> Option<String> {
        let state = self.state.lock().await;
        let name = state.session.device_name();
        if name.is_empty() {
            None
        } else {
            Some(name.to_string())
        }
    }

    async fn check_scan_preconditions(&self) -> Result<(), CommandError> {
        self.state.lock().await.check_scan_preconditions()
    }

    async fn check_connect_preconditions(&self) -> Result<(), CommandError> {
        self.state.lock().await.check_connect_preconditions()
    }
}
