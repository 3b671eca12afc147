//! Discovery lifecycle for tracker peripherals.
//! This module owns the scan task: start/stop, dedup by address, and the
//! paired-device pass that runs before live discovery. Discovery itself is
//! unbounded in time; stopping is caller-driven.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use bluest::{Adapter, Device};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use regex::Regex;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::constants::UNKNOWN_DEVICE_NAME;
use crate::core::bluetooth::types::{
    PeripheralHandle, ScanState, SharedState, SnapshotSender,
};

/// Drives one discovery pass at a time and records observed peripherals.
pub struct ScanController {
    adapter: Adapter,
    state: SharedState,
    devices: Arc<Mutex<HashMap<String, Device>>>,
    snapshot_tx: SnapshotSender,
    cancel_token: CancellationToken,
    scan_task_handle: Option<JoinHandle<()>>,
}

impl ScanController {
    pub(crate) fn new(
        adapter: Adapter,
        state: SharedState,
        devices: Arc<Mutex<HashMap<String, Device>>>,
        snapshot_tx: SnapshotSender,
    ) -> Self {
        Self {
            adapter,
            state,
            devices,
            snapshot_tx,
            cancel_token: CancellationToken::new(),
            scan_task_handle: None,
        }
    }

    /// Starts discovery. Any in-flight pass is canceled first so duplicate
    /// result races cannot occur, then the discovered set is cleared and a
    /// fresh scan task is spawned.
    pub async fn start(&mut self) -> Result<()> {
        if self.scan_task_handle.is_some() {
            info!("Canceling previous discovery pass before restart");
            self.stop().await;
        }

        {
            let mut state = self.state.lock().await;
            state.discovered.clear();
            state.paired.clear();
            self.devices.lock().await.clear();
            state.scan_state = ScanState::Scanning;
            state.publish(&self.snapshot_tx);
        }

        self.cancel_token = CancellationToken::new();
        let adapter = self.adapter.clone();
        let state = self.state.clone();
        let devices = self.devices.clone();
        let snapshot_tx = self.snapshot_tx.clone();
        let cancel_token = self.cancel_token.clone();

        let handle = tokio::spawn(async move {
            Self::run_discovery(adapter, state, devices, snapshot_tx, cancel_token).await;
        });
        self.scan_task_handle = Some(handle);

        info!("Device scan task started.");
        Ok(())
    }

    /// Stops discovery and waits for the scan task to wind down. No-op when
    /// already idle.
    pub async fn stop(&mut self) {
        {
            let mut state = self.state.lock().await;
            if state.scan_state == ScanState::Idle && self.scan_task_handle.is_none() {
                debug!("Stop requested while already idle");
                return;
            }
            state.scan_state = ScanState::StoppingRequested;
            state.publish(&self.snapshot_tx);
        }

        info!("Stopping Bluetooth scan.");
        self.cancel_token.cancel();

        if let Some(handle) = self.scan_task_handle.take() {
            match handle.await {
                Ok(()) => info!("Scan task finished after cancellation."),
                Err(e) if e.is_cancelled() => info!("Scan task was cancelled successfully."),
                Err(e) => error!("Scan task finished with an unexpected join error: {:?}", e),
            }
        }

        let mut state = self.state.lock().await;
        state.scan_state = ScanState::Idle;
        state.publish(&self.snapshot_tx);
    }

    /// The discovery pass: surface devices the adapter already knows about,
    /// then stream advertisements until canceled or the stream ends.
    async fn run_discovery(
        adapter: Adapter,
        state: SharedState,
        devices: Arc<Mutex<HashMap<String, Device>>>,
        snapshot_tx: SnapshotSender,
        cancel_token: CancellationToken,
    ) {
        info!("Checking for already-connected devices");
        match adapter.connected_devices().await {
            Ok(connected) => {
                for device in connected {
                    Self::observe_device(&state, &devices, &snapshot_tx, &device).await;
                }
            }
            Err(e) => warn!("Failed to enumerate connected devices: {}", e),
        }

        info!("Starting bluetooth scan");
        let mut scan_stream = match adapter.scan(&[]).await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to start discovery: {}", e);
                let mut state = state.lock().await;
                state.scan_state = ScanState::Idle;
                state.publish(&snapshot_tx);
                return;
            }
        };

        loop {
            tokio::select! {
                result = scan_stream.next() => {
                    match result {
                        Some(discovered) => {
                            debug!(
                                "Advertisement - Device: {:?}, RSSI: {:?}",
                                discovered.device, discovered.rssi
                            );
                            Self::observe_device(&state, &devices, &snapshot_tx, &discovered.device)
                                .await;
                        }
                        None => {
                            info!("Bluetooth scan stream has ended.");
                            break;
                        }
                    }
                }
                _ = cancel_token.cancelled() => {
                    break;
                }
            }
        }

        let mut state = state.lock().await;
        state.scan_state = ScanState::Idle;
        state.publish(&snapshot_tx);
    }

    /// Records one observation: keeps the platform device handle for later
    /// connects and adds the peripheral to the observed sets (dedup by
    /// address, set semantics).
    async fn observe_device(
        state: &SharedState,
        devices: &Arc<Mutex<HashMap<String, Device>>>,
        snapshot_tx: &SnapshotSender,
        device: &Device,
    ) {
        let id = device.id().to_string();
        let name = device
            .name()
            .unwrap_or_else(|_| UNKNOWN_DEVICE_NAME.to_string());
        let address = Self::extract_mac_address(&id).unwrap_or_else(|| id.clone());
        let paired = device.is_paired().await.unwrap_or(false);

        let handle = PeripheralHandle {
            id: id.clone(),
            name,
            address,
            paired,
        };

        devices.lock().await.insert(id, device.clone());

        let mut state = state.lock().await;
        if state.observe_peripheral(handle.clone()) {
            info!(
                "Device found: {} - {} (paired: {})",
                handle.name, handle.address, handle.paired
            );
            state.publish(snapshot_tx);
        }
    }

    /// Pulls a MAC address out of a platform device id, where one exists.
    fn extract_mac_address(device_id_str: &str) -> Option<String> {
        let re = Regex::new(r"([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})").ok()?;
        re.find_iter(device_id_str)
            .last()
            .map(|m| m.as_str().to_uppercase())
    }
}
