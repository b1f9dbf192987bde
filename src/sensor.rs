use crate::{
    coordinator::WalkingPadCoordinator,
    types::{BeltState, Status, WalkingPadMode},
};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};

/// Reading derived from the published status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorKind {
    /// Session distance in km
    Distance,
    /// Session step count
    Steps,
    /// Session duration in minutes
    DurationMinutes,
    /// Session duration in hours
    DurationHours,
    /// Session duration in days
    DurationDays,
    /// Belt speed in km/h
    CurrentSpeed,
    /// Belt state name
    BeltState,
    /// Operating mode name
    Mode,
}

/// Value of a [`SensorKind`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SensorValue {
    /// Measurement
    Number(f64),
    /// Counter
    Count(u32),
    /// Enumerated state
    State(String),
}

impl fmt::Display for SensorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(value) => write!(f, "{value}"),
            Self::Count(value) => write!(f, "{value}"),
            Self::State(value) => f.write_str(value),
        }
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

impl SensorKind {
    /// Every sensor, in display order
    pub const ALL: [Self; 8] = [
        Self::Distance,
        Self::Steps,
        Self::DurationMinutes,
        Self::DurationHours,
        Self::DurationDays,
        Self::CurrentSpeed,
        Self::BeltState,
        Self::Mode,
    ];

    /// Stable key of the sensor
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Distance => "walkingpad_distance",
            Self::Steps => "walkingpad_steps",
            Self::DurationMinutes => "walkingpad_duration_minutes",
            Self::DurationHours => "walkingpad_duration_hours",
            Self::DurationDays => "walkingpad_duration_days",
            Self::CurrentSpeed => "walkingpad_current_speed",
            Self::BeltState => "walkingpad_state",
            Self::Mode => "walkingpad_mode",
        }
    }

    /// Unit of measurement, if any
    #[must_use]
    pub const fn unit(self) -> Option<&'static str> {
        match self {
            Self::Distance => Some("km"),
            Self::Steps => Some("steps"),
            Self::DurationMinutes => Some("min"),
            Self::DurationHours => Some("h"),
            Self::DurationDays => Some("d"),
            Self::CurrentSpeed => Some("km/h"),
            Self::BeltState | Self::Mode => None,
        }
    }

    /// Possible values of the enumerated sensors
    #[must_use]
    pub fn options(self) -> Option<Vec<String>> {
        match self {
            Self::BeltState => Some(BeltState::ALL.iter().map(ToString::to_string).collect()),
            Self::Mode => Some(WalkingPadMode::ALL.iter().map(ToString::to_string).collect()),
            _ => None,
        }
    }

    /// Compute the reading from `status`
    #[must_use]
    pub fn value(self, status: &Status) -> SensorValue {
        let running_time = f64::from(status.session_running_time);
        match self {
            Self::Distance => SensorValue::Number(f64::from(status.session_distance) / 1000.0),
            Self::Steps => SensorValue::Count(status.session_steps),
            Self::DurationMinutes => SensorValue::Number(round_to(running_time / 60.0, 1)),
            Self::DurationHours => SensorValue::Number(round_to(running_time / 3_600.0, 4)),
            Self::DurationDays => SensorValue::Number(round_to(running_time / 86_400.0, 6)),
            Self::CurrentSpeed => SensorValue::Number(status.speed),
            Self::BeltState => SensorValue::State(status.belt_state.to_string()),
            Self::Mode => SensorValue::State(status.mode.to_string()),
        }
    }
}

/// A [`SensorKind`] bound to a coordinator
#[derive(Debug, Clone)]
pub struct Sensor {
    coordinator: Arc<WalkingPadCoordinator>,
    kind: SensorKind,
}

impl Sensor {
    /// Bind `kind` to `coordinator`
    #[must_use]
    pub const fn new(coordinator: Arc<WalkingPadCoordinator>, kind: SensorKind) -> Self {
        Self { coordinator, kind }
    }

    /// One sensor of every kind
    #[must_use]
    pub fn all(coordinator: &Arc<WalkingPadCoordinator>) -> Vec<Self> {
        SensorKind::ALL
            .iter()
            .map(|kind| Self::new(Arc::clone(coordinator), *kind))
            .collect()
    }

    /// Kind of this sensor
    #[must_use]
    pub const fn kind(&self) -> SensorKind {
        self.kind
    }

    /// Unique id, derived from the device MAC
    #[must_use]
    pub fn unique_id(&self) -> String {
        format!("{}-{}", self.coordinator.device().mac(), self.kind.key())
    }

    /// Current reading
    #[must_use]
    pub fn value(&self) -> SensorValue {
        self.kind.value(&self.coordinator.data())
    }

    /// Whether the treadmill is reachable
    #[must_use]
    pub fn available(&self) -> bool {
        self.coordinator.connected()
    }
}
