use crate::error::{Result, WalkingPadError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Belt state as reported by the treadmill controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BeltState {
    /// Belt is stopped
    Stopped = 0,
    /// Belt is moving
    Active = 1,
    /// Treadmill is in standby
    Standby = 5,
    /// Start countdown is running
    Starting = 9,
    /// Any state byte the controller documents no meaning for
    Unknown = 1000,
}

impl From<u8> for BeltState {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Stopped,
            1 => Self::Active,
            5 => Self::Standby,
            9 => Self::Starting,
            _ => Self::Unknown,
        }
    }
}

impl BeltState {
    /// All belt states, in declaration order
    pub const ALL: [Self; 5] = [
        Self::Stopped,
        Self::Active,
        Self::Standby,
        Self::Starting,
        Self::Unknown,
    ];

    /// Whether the belt is moving or about to move
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Active | Self::Starting)
    }
}

impl fmt::Display for BeltState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Active => write!(f, "active"),
            Self::Standby => write!(f, "standby"),
            Self::Starting => write!(f, "starting"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Operating mode of the treadmill
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum WalkingPadMode {
    /// Speed follows the user's position on the belt
    Auto = 0,
    /// Speed is set by the remote or the app
    Manual = 1,
    /// Treadmill is idle
    Standby = 2,
}

impl TryFrom<u8> for WalkingPadMode {
    type Error = WalkingPadError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Auto),
            1 => Ok(Self::Manual),
            2 => Ok(Self::Standby),
            other => Err(WalkingPadError::ParseError(format!(
                "Unknown mode byte: {other:02X}"
            ))),
        }
    }
}

impl WalkingPadMode {
    /// All modes, in declaration order
    pub const ALL: [Self; 3] = [Self::Auto, Self::Manual, Self::Standby];
}

impl fmt::Display for WalkingPadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Manual => write!(f, "manual"),
            Self::Standby => write!(f, "standby"),
        }
    }
}

/// Connection state of the device driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// No link to the treadmill
    NotConnected,
    /// Transport bring-up in progress
    Connecting,
    /// Link established
    Connected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "Not Connected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
        }
    }
}

/// Telemetry frame exactly as delivered by a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RawStatus {
    /// Belt state byte
    pub belt_state: u8,
    /// Speed in tenths of km/h
    pub speed_tenths: u8,
    /// Mode byte
    pub manual_mode: u8,
    /// Distance counter in controller units
    pub distance_raw: u32,
    /// Session running time in seconds
    pub time: u32,
    /// Session step count
    pub steps: u32,
    /// Receive timestamp in milliseconds
    pub rtime: u64,
}

/// Snapshot of the treadmill state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    /// Belt state
    pub belt_state: BeltState,
    /// Belt speed in km/h
    pub speed: f64,
    /// Operating mode
    pub mode: WalkingPadMode,
    /// Session running time in seconds
    pub session_running_time: u32,
    /// Session distance in meters
    pub session_distance: u32,
    /// Session step count
    pub session_steps: u32,
    /// Receive timestamp of the frame this status came from, in milliseconds
    pub status_timestamp: u64,
}

impl Default for Status {
    fn default() -> Self {
        Self {
            belt_state: BeltState::Stopped,
            speed: 0.0,
            mode: WalkingPadMode::Manual,
            session_running_time: 0,
            session_distance: 0,
            session_steps: 0,
            status_timestamp: 0,
        }
    }
}

impl Status {
    /// Normalize a raw telemetry frame
    ///
    /// The distance counter is multiplied by ten as-is; whether the
    /// controller's unit really is decameters has not been confirmed
    /// against hardware documentation.
    ///
    /// # Errors
    ///
    /// Returns [`WalkingPadError::ParseError`] if the mode byte is unknown.
    pub fn from_raw(raw: &RawStatus) -> Result<Self> {
        Ok(Self {
            belt_state: BeltState::from(raw.belt_state),
            speed: f64::from(raw.speed_tenths) / 10.0,
            mode: WalkingPadMode::try_from(raw.manual_mode)?,
            session_running_time: raw.time,
            session_distance: raw.distance_raw.saturating_mul(10),
            session_steps: raw.steps,
            status_timestamp: raw.rtime,
        })
    }
}

/// Identity of the treadmill to connect to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Display name
    pub name: String,
    /// Bluetooth MAC address, `XX:XX:XX:XX:XX:XX`
    pub mac_address: String,
}

impl DeviceInfo {
    /// Create new device info
    #[must_use]
    pub const fn new(name: String, mac_address: String) -> Self {
        Self { name, mac_address }
    }
}

/// Timing of the device driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Transport bring-up timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Delay held under the command lock after each command, in milliseconds
    pub command_delay_ms: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            command_delay_ms: 750,
        }
    }
}

/// Timing of the polling coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Interval between status polls in milliseconds
    pub poll_interval_ms: u64,
    /// Upper bound for a single poll in milliseconds.
    /// Must exceed the driver's connect timeout.
    pub poll_timeout_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            poll_timeout_ms: 11_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_belt_state_from_u8() {
        assert_eq!(BeltState::from(0), BeltState::Stopped);
        assert_eq!(BeltState::from(1), BeltState::Active);
        assert_eq!(BeltState::from(5), BeltState::Standby);
        assert_eq!(BeltState::from(9), BeltState::Starting);
        assert_eq!(BeltState::from(2), BeltState::Unknown);
        assert_eq!(BeltState::from(255), BeltState::Unknown);
    }

    #[test]
    fn test_mode_from_u8() {
        assert_eq!(WalkingPadMode::try_from(0).unwrap(), WalkingPadMode::Auto);
        assert_eq!(WalkingPadMode::try_from(1).unwrap(), WalkingPadMode::Manual);
        assert_eq!(WalkingPadMode::try_from(2).unwrap(), WalkingPadMode::Standby);
        assert!(WalkingPadMode::try_from(3).is_err());
    }

    #[test]
    fn test_status_normalization() {
        let raw = RawStatus {
            belt_state: 1,
            speed_tenths: 35,
            manual_mode: 1,
            distance_raw: 42,
            time: 600,
            steps: 812,
            rtime: 1_700_000_000_123,
        };

        let status = Status::from_raw(&raw).unwrap();
        assert_eq!(status.belt_state, BeltState::Active);
        assert!((status.speed - 3.5).abs() < f64::EPSILON);
        assert_eq!(status.mode, WalkingPadMode::Manual);
        assert_eq!(status.session_distance, 420);
        assert_eq!(status.session_running_time, 600);
        assert_eq!(status.session_steps, 812);
        assert_eq!(status.status_timestamp, 1_700_000_000_123);
    }

    #[test]
    fn test_status_normalization_unknown_belt_state() {
        let raw = RawStatus {
            belt_state: 7,
            ..RawStatus::default()
        };
        let status = Status::from_raw(&raw).unwrap();
        assert_eq!(status.belt_state, BeltState::Unknown);
        assert_eq!(status.mode, WalkingPadMode::Auto);
    }

    #[test]
    fn test_status_normalization_rejects_unknown_mode() {
        let raw = RawStatus {
            manual_mode: 9,
            ..RawStatus::default()
        };
        assert!(matches!(
            Status::from_raw(&raw),
            Err(WalkingPadError::ParseError(_))
        ));
    }

    #[test]
    fn test_status_default() {
        let status = Status::default();
        assert_eq!(status.belt_state, BeltState::Stopped);
        assert_eq!(status.mode, WalkingPadMode::Manual);
        assert_eq!(status.status_timestamp, 0);
    }

    #[test]
    fn test_config_defaults() {
        let driver = DriverConfig::default();
        assert_eq!(driver.connect_timeout_ms, 10_000);
        assert_eq!(driver.command_delay_ms, 750);

        let coordinator = CoordinatorConfig::default();
        assert_eq!(coordinator.poll_interval_ms, 5_000);
        assert_eq!(coordinator.poll_timeout_ms, 11_000);
        assert!(coordinator.poll_timeout_ms > driver.connect_timeout_ms);
    }

    #[test]
    fn test_display_names() {
        assert_eq!(BeltState::Starting.to_string(), "starting");
        assert_eq!(WalkingPadMode::Standby.to_string(), "standby");
        assert_eq!(ConnectionStatus::Connecting.to_string(), "Connecting");
    }
}
