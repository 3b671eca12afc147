//! Constants used throughout the tracker core.
//! This module contains the fixed identifiers of the wire contract with the
//! tracker peripheral, plus descriptor values for arming notifications.

use uuid::Uuid;

/// The UUID of the geolocation tracker service exposed by the peripheral.
pub const UUID_TRACK_SERVICE: Uuid = Uuid::from_u128(0x4fafc201_1fb5_459e_8fcc_c5c9c331914b);

/// The UUID of the notifiable characteristic carrying coordinate frames.
pub const UUID_TRACK_NOTIFY_CHAR: Uuid = Uuid::from_u128(0xbeb5483e_36e1_4688_b7f5_ea07361b26a8);

/// The well-known UUID of the client characteristic configuration descriptor.
pub const UUID_CCCD: Uuid = Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);

/// The standard 2-byte value written to the CCCD to enable notifications.
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

/// Placeholder name for peripherals that do not advertise one.
pub const UNKNOWN_DEVICE_NAME: &str = "Unknown";
