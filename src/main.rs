//! Command-line harness for the tracker core: scans for a peripheral,
//! connects, and prints state snapshots as JSON while the track grows.
//! Pass a name fragment to pick the peripheral to connect to.

use anyhow::Result;
use geotrack::core::bluetooth::UNKNOWN_DEVICE_NAME;
use geotrack::{logging, ConnectionPhase, TrackerManager};
use log::info;

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let target = std::env::args().nth(1);

    let mut manager = TrackerManager::new().await?;
    let mut updates = manager.subscribe();

    manager.start_scan().await?;
    match &target {
        Some(name) => info!("Scanning for peripherals named like {:?}...", name),
        None => info!("Scanning; will connect to the first named peripheral..."),
    }

    let peripheral_id = loop {
        updates.changed().await?;
        let snapshot = updates.borrow_and_update().clone();
        let matched = snapshot.discovered.iter().find(|p| match &target {
            Some(name) => p.name.contains(name.as_str()),
            None => p.name != UNKNOWN_DEVICE_NAME,
        });
        if let Some(handle) = matched {
            info!("Selecting {} ({})", handle.name, handle.address);
            break handle.id.clone();
        }
    };

    manager.stop_scan().await;
    manager.connect(&peripheral_id).await?;

    loop {
        tokio::select! {
            changed = updates.changed() => {
                changed?;
                let snapshot = updates.borrow_and_update().clone();
                println!("{}", serde_json::to_string(&snapshot)?);
                if matches!(snapshot.phase, ConnectionPhase::Error(_)) {
                    info!("Session ended in error; exiting");
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted; disconnecting");
                break;
            }
        }
    }

    manager.disconnect().await;
    Ok(())
}
