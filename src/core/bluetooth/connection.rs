//! Transport driver for one connection attempt.
//! This module talks to the bluest stack: it opens the link, resolves the
//! tracker service and characteristic, arms notifications through the CCCD,
//! and pumps the notification stream. Every outcome is reported to the
//! session state machine as a [`LinkEvent`] tagged with this attempt's
//! generation; the driver never mutates session state directly.

use anyhow::{anyhow, Result};
use bluest::{Adapter, Characteristic, Device};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::constants::{
    ENABLE_NOTIFICATION_VALUE, UUID_CCCD, UUID_TRACK_NOTIFY_CHAR, UUID_TRACK_SERVICE,
};
use crate::core::bluetooth::session::LinkEvent;
use crate::core::bluetooth::types::{SharedState, SnapshotSender};

/// Writes the client characteristic configuration descriptor.
///
/// Kept behind a trait so the arming step can be exercised without a live
/// peripheral.
#[async_trait::async_trait]
pub trait CccdWriter {
    async fn write_cccd(&self, value: &[u8]) -> Result<()>;
}

/// CCCD writer backed by a bluest characteristic.
pub struct BluestCccdWriter {
    notify_char: Characteristic,
}

impl BluestCccdWriter {
    pub fn new(notify_char: Characteristic) -> Self {
        Self { notify_char }
    }
}

#[async_trait::async_trait]
impl CccdWriter for BluestCccdWriter {
    async fn write_cccd(&self, value: &[u8]) -> Result<()> {
        let descriptors = self.notify_char.descriptors().await?;
        let cccd = descriptors
            .iter()
            .find(|d| d.uuid() == UUID_CCCD)
            .ok_or_else(|| {
                anyhow!(
                    "CCCD descriptor not found on characteristic {}",
                    self.notify_char.uuid()
                )
            })?;
        cccd.write(value).await?;
        Ok(())
    }
}

/// Writes the standard enable-notifications value to the CCCD.
pub(crate) async fn arm_notifications<W: CccdWriter>(writer: &W) -> Result<()> {
    info!("Writing enable value to CCCD");
    writer.write_cccd(&ENABLE_NOTIFICATION_VALUE).await
}

/// Link-level transport operations, behind a trait so the single-link
/// ownership sequencing can be exercised without a live peripheral.
#[async_trait::async_trait]
pub(crate) trait LinkOps {
    type Handle: Send + Sync;

    /// Tears a link down; failures are logged, never propagated.
    async fn release(&self, device: &Self::Handle);
    /// Brings a link up, unless it is already up.
    async fn open(&self, device: &Self::Handle) -> Result<()>;
}

pub(crate) struct BluestLinkOps {
    adapter: Adapter,
}

#[async_trait::async_trait]
impl LinkOps for BluestLinkOps {
    type Handle = Device;

    async fn release(&self, device: &Device) {
        if device.is_connected().await {
            info!("Disconnecting from device {}", device.id());
            if let Err(e) = self.adapter.disconnect_device(device).await {
                warn!("Failed to release link to {}: {}", device.id(), e);
            }
        }
    }

    async fn open(&self, device: &Device) -> Result<()> {
        if !device.is_connected().await {
            self.adapter.connect_device(device).await?;
        }
        Ok(())
    }
}

/// Releases the superseded link (if any) and only then opens the new one.
///
/// At most one link is live at a time; the release must complete before the
/// open starts, otherwise a same-peripheral reconnect can observe the old
/// link as already up, skip the connect, and later be killed mid-stream by
/// the old link's teardown.
pub(crate) async fn open_exclusive<O: LinkOps>(
    ops: &O,
    device: &O::Handle,
    previous: Option<&O::Handle>,
) -> Result<()> {
    if let Some(previous) = previous {
        ops.release(previous).await;
    }
    ops.open(device).await
}

/// Releases a link outside of any connection attempt.
pub(crate) async fn release_link(adapter: Adapter, device: Device) {
    BluestLinkOps { adapter }.release(&device).await;
}

/// Runs one connection attempt to completion.
///
/// Spawned per connect; a superseding connect or a disconnect cancels the
/// token, after which this driver goes quiet. Events it has already emitted
/// for a superseded generation are discarded by the session. The driver owns
/// the teardown of the link it supersedes: the prior device is released
/// before the new link is opened.
pub(crate) async fn drive_link(
    adapter: Adapter,
    device: Device,
    previous: Option<Device>,
    generation: u64,
    state: SharedState,
    snapshot_tx: SnapshotSender,
    cancel_token: CancellationToken,
) {
    info!("Initiating connection to {} (generation {})", device.id(), generation);

    let ops = BluestLinkOps { adapter };
    if let Err(e) = open_exclusive(&ops, &device, previous.as_ref()).await {
        deliver(&state, &snapshot_tx, generation, LinkEvent::ConnectFailed(e.to_string())).await;
        return;
    }
    if cancel_token.is_cancelled() {
        debug!("Connection attempt {} canceled after link-up", generation);
        return;
    }
    deliver(&state, &snapshot_tx, generation, LinkEvent::Connected).await;

    let notify_char = match resolve_track_characteristic(&device).await {
        Ok(characteristic) => characteristic,
        Err(event) => {
            deliver(&state, &snapshot_tx, generation, event).await;
            return;
        }
    };
    deliver(&state, &snapshot_tx, generation, LinkEvent::ServicesResolved).await;

    let writer = BluestCccdWriter::new(notify_char.clone());
    if let Err(e) = arm_notifications(&writer).await {
        deliver(&state, &snapshot_tx, generation, LinkEvent::ArmFailed(e.to_string())).await;
        return;
    }
    let mut notifications = match notify_char.notify().await {
        Ok(stream) => stream,
        Err(e) => {
            deliver(&state, &snapshot_tx, generation, LinkEvent::ArmFailed(e.to_string())).await;
            return;
        }
    };
    deliver(&state, &snapshot_tx, generation, LinkEvent::NotificationsArmed).await;

    info!("Listening for track notifications...");
    loop {
        tokio::select! {
            result = notifications.next() => {
                match result {
                    Some(Ok(value)) => {
                        debug!("Received {} byte notification", value.len());
                        deliver(&state, &snapshot_tx, generation, LinkEvent::Notification(value))
                            .await;
                    }
                    Some(Err(e)) => {
                        error!("Error in notification stream: {}", e);
                        deliver(&state, &snapshot_tx, generation, LinkEvent::LinkLost).await;
                        return;
                    }
                    None => {
                        info!("Notification stream ended");
                        deliver(&state, &snapshot_tx, generation, LinkEvent::LinkLost).await;
                        return;
                    }
                }
            }
            _ = cancel_token.cancelled() => {
                debug!("Link driver for generation {} canceled", generation);
                return;
            }
        }
    }
}

/// Locates the tracker service and its notify characteristic. Absence of
/// either is reported as the matching session error; a transport failure
/// during enumeration counts as link loss.
async fn resolve_track_characteristic(device: &Device) -> Result<Characteristic, LinkEvent> {
    info!("Connection successful, discovering services...");
    let services = match device.services().await {
        Ok(services) => services,
        Err(e) => {
            error!("Service enumeration failed: {}", e);
            return Err(LinkEvent::LinkLost);
        }
    };

    let Some(service) = services.iter().find(|s| s.uuid() == UUID_TRACK_SERVICE) else {
        for service in &services {
            info!("Available service: {}", service.uuid());
        }
        return Err(LinkEvent::ServiceMissing);
    };
    info!("Found tracker service: {}", service.uuid());

    let characteristics = match service.characteristics().await {
        Ok(characteristics) => characteristics,
        Err(e) => {
            error!("Characteristic enumeration failed: {}", e);
            return Err(LinkEvent::LinkLost);
        }
    };

    let Some(notify_char) = characteristics
        .iter()
        .find(|c| c.uuid() == UUID_TRACK_NOTIFY_CHAR)
    else {
        return Err(LinkEvent::CharacteristicMissing);
    };
    info!("Found track characteristic: {}", notify_char.uuid());

    Ok(notify_char.clone())
}

/// Applies one event under the session's single-writer boundary and publishes
/// the resulting snapshot. Events are serialized in arrival order by the
/// state mutex.
async fn deliver(
    state: &SharedState,
    snapshot_tx: &SnapshotSender,
    generation: u64,
    event: LinkEvent,
) {
    let mut state = state.lock().await;
    state.session.apply(generation, event);
    state.publish(snapshot_tx);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// CCCD writer that records what was written, or fails on demand.
    struct RecordingWriter {
        written: Mutex<Vec<Vec<u8>>>,
        fail: bool,
    }

    impl RecordingWriter {
        fn new(fail: bool) -> Self {
            Self {
                written: Mutex::new(Vec::new()),
                fail,
            }
        }
    }

    #[async_trait::async_trait]
    impl CccdWriter for RecordingWriter {
        async fn write_cccd(&self, value: &[u8]) -> Result<()> {
            if self.fail {
                return Err(anyhow!("descriptor write rejected"));
            }
            self.written.lock().unwrap().push(value.to_vec());
            Ok(())
        }
    }

    #[tokio::test]
    async fn arming_writes_the_standard_enable_value() {
        let writer = RecordingWriter::new(false);
        arm_notifications(&writer).await.unwrap();
        let written = writer.written.lock().unwrap();
        assert_eq!(written.as_slice(), &[vec![0x01, 0x00]]);
    }

    #[tokio::test]
    async fn arming_propagates_descriptor_write_failure() {
        let writer = RecordingWriter::new(true);
        let err = arm_notifications(&writer).await.unwrap_err();
        assert!(err.to_string().contains("rejected"));
    }

    /// Link ops that record the order of release/open calls.
    struct RecordingLinkOps {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingLinkOps {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl LinkOps for RecordingLinkOps {
        type Handle = String;

        async fn release(&self, device: &String) {
            self.calls.lock().unwrap().push(format!("release {device}"));
        }

        async fn open(&self, device: &String) -> Result<()> {
            self.calls.lock().unwrap().push(format!("open {device}"));
            Ok(())
        }
    }

    #[tokio::test]
    async fn superseded_link_is_released_before_the_new_one_opens() {
        let ops = RecordingLinkOps::new();
        let old = "tracker-a".to_string();
        let new = "tracker-a".to_string();
        open_exclusive(&ops, &new, Some(&old)).await.unwrap();
        let calls = ops.calls.lock().unwrap();
        assert_eq!(
            calls.as_slice(),
            &["release tracker-a".to_string(), "open tracker-a".to_string()]
        );
    }

    #[tokio::test]
    async fn first_connect_opens_without_a_release() {
        let ops = RecordingLinkOps::new();
        open_exclusive(&ops, &"tracker-a".to_string(), None)
            .await
            .unwrap();
        let calls = ops.calls.lock().unwrap();
        assert_eq!(calls.as_slice(), &["open tracker-a".to_string()]);
    }
}
