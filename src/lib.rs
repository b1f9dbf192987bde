#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

//! # walkingpad-control
//!
//! A Rust library for managing KingSmith WalkingPad treadmill sessions over
//! Bluetooth Low Energy.
//!
//! The library is layered the way a home-automation integration uses it:
//!
//! - **Driver** ([`WalkingPad`]): one serialized command channel per
//!   treadmill with lazy connect, a settle delay after every command, and
//!   telemetry fan-out to registered callbacks.
//! - **Coordinator** ([`WalkingPadCoordinator`]): polls while anyone listens,
//!   publishes only strictly newer status snapshots, and connects or
//!   disconnects as the first listener arrives or the last one leaves.
//! - **Entities**: [`BeltSwitch`] with optimistic state reconciliation,
//!   [`SpeedControl`] and the [`sensor`] readings.
//! - **Transport** ([`Transport`]): the link itself. [`ble::BleTransport`]
//!   talks to real hardware through btleplug.
//!
//! ## Safety Warning
//!
//! ⚠️ **Important**: This library moves physical exercise equipment. Commands
//! are fire-and-forget; always keep the treadmill's own stop button within reach.
//!
//! ## Quick Start
//!
//! ```no_run
//! use walkingpad_control::{ble::BleTransport, DeviceConfig, Status, WalkingPadContext};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = DeviceConfig::new("Office pad", "AA:BB:CC:DD:EE:FF");
//!     config.remote_control_enabled = true;
//!
//!     let mut context = WalkingPadContext::new(config, BleTransport::new().await?)?;
//!
//!     // Listening starts the connection and the polling
//!     context.coordinator().add_listener(Arc::new(|status: &Status| {
//!         println!("{} at {} km/h", status.belt_state, status.speed);
//!     }));
//!
//!     if let Some(switch) = context.belt_switch() {
//!         switch.turn_on().await;
//!     }
//!     if let Some(speed) = context.speed_control() {
//!         speed.set_speed(3.5).await?;
//!     }
//!
//!     Ok(())
//! }
//! ```

/// Bluetooth Low Energy transport
pub mod ble;
/// Device setup and configuration
pub mod context;
/// Polling coordinator and status publication
pub mod coordinator;
/// Device driver with serialized command execution
pub mod device;
/// Error types and handling
pub mod error;
/// WalkingPad wire format
pub mod protocol;
/// Readings derived from the published status
pub mod sensor;
/// Belt speed control
pub mod speed;
/// Belt switch with optimistic state
pub mod switch;
/// Optimistic values expiring on newer telemetry
pub mod temporary;
/// Link abstraction between driver and hardware
pub mod transport;
/// Type definitions and data structures
pub mod types;

// Re-export the main types for convenient usage
pub use context::{DeviceConfig, WalkingPadContext};
pub use coordinator::{ListenerId, WalkingPadCoordinator};
pub use device::{StatusCallback, SubscriptionId, WalkingPad};
pub use error::{Result, WalkingPadError};
pub use sensor::{Sensor, SensorKind, SensorValue};
pub use speed::SpeedControl;
pub use switch::{BeltSwitch, SwitchConfig, SwitchKind};
pub use transport::{FrameHandler, Transport};
pub use types::{
    BeltState, ConnectionStatus, CoordinatorConfig, DeviceInfo, DriverConfig, RawStatus, Status,
    WalkingPadMode,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// WalkingPad BLE service UUID
pub const WALKINGPAD_SERVICE_UUID: &str = "0000fe00-0000-1000-8000-00805f9b34fb";

/// Characteristic the treadmill notifies status frames on
pub const WALKINGPAD_NOTIFY_CHAR_UUID: &str = "0000fe01-0000-1000-8000-00805f9b34fb";

/// Characteristic commands are written to
pub const WALKINGPAD_WRITE_CHAR_UUID: &str = "0000fe02-0000-1000-8000-00805f9b34fb";
