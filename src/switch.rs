use crate::{
    coordinator::WalkingPadCoordinator,
    temporary::TemporaryValue,
    types::{BeltState, WalkingPadMode},
};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info};

/// How the belt switch maps onto the treadmill's modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SwitchKind {
    /// On means the belt runs in manual mode
    #[default]
    Manual,
    /// On means the treadmill is in auto mode
    Auto,
}

/// Timing of the belt switch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchConfig {
    /// Wait after switching to manual mode before starting the belt, in milliseconds
    pub mode_switch_delay_ms: u64,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            mode_switch_delay_ms: 1_500,
        }
    }
}

/// Expiration for an optimistic value set now: one poll interval past the
/// published status
fn expiration_timestamp(coordinator: &WalkingPadCoordinator) -> u64 {
    coordinator
        .data()
        .status_timestamp
        .saturating_add(coordinator.config().poll_interval_ms)
}

/// Belt switch for manual mode
///
/// On while the belt is active or starting. A requested state overrides the
/// published one until a newer status arrives; a published `Starting` keeps
/// the override alive, since the start countdown can outlast one poll.
#[derive(Debug)]
pub struct ManualBeltSwitch {
    coordinator: Arc<WalkingPadCoordinator>,
    config: SwitchConfig,
    temporary_state: TemporaryValue<BeltState>,
}

impl ManualBeltSwitch {
    /// Create a manual-mode switch
    #[must_use]
    pub fn new(coordinator: Arc<WalkingPadCoordinator>, config: SwitchConfig) -> Self {
        Self {
            coordinator,
            config,
            temporary_state: TemporaryValue::new(),
        }
    }

    /// Whether an optimistic belt state is held
    #[must_use]
    pub const fn has_temporary_state(&self) -> bool {
        self.temporary_state.has_value()
    }

    /// Whether the belt is on
    pub fn is_on(&mut self) -> bool {
        let data = self.coordinator.data();
        if data.belt_state != BeltState::Starting
            && self.temporary_state.is_expired(data.status_timestamp)
        {
            debug!("Belt state override expired at {}", data.status_timestamp);
            self.temporary_state.reset();
        }

        self.temporary_state.peek(data.belt_state).is_running()
    }

    /// Start the belt, switching to manual mode first if needed
    pub async fn turn_on(&mut self) {
        let device = Arc::clone(self.coordinator.device());

        if self.coordinator.data().mode != WalkingPadMode::Manual {
            info!("Switching {} to manual mode before starting", device.name());
            device.switch_mode(WalkingPadMode::Manual).await;
            tokio::time::sleep(Duration::from_millis(self.config.mode_switch_delay_ms)).await;
        }

        self.temporary_state
            .set(BeltState::Starting, expiration_timestamp(&self.coordinator));
        device.start_belt().await;
    }

    /// Stop the belt
    pub async fn turn_off(&mut self) {
        self.temporary_state
            .set(BeltState::Stopped, expiration_timestamp(&self.coordinator));
        self.coordinator.device().stop_belt().await;
    }
}

/// Belt switch for auto mode
///
/// On while the treadmill is in auto mode, off in standby, and otherwise
/// follows the belt state. Requested mode and belt state both override the
/// published values until a newer status arrives.
#[derive(Debug)]
pub struct AutoBeltSwitch {
    coordinator: Arc<WalkingPadCoordinator>,
    temporary_mode: TemporaryValue<WalkingPadMode>,
    temporary_state: TemporaryValue<BeltState>,
}

impl AutoBeltSwitch {
    /// Create an auto-mode switch
    #[must_use]
    pub fn new(coordinator: Arc<WalkingPadCoordinator>) -> Self {
        Self {
            coordinator,
            temporary_mode: TemporaryValue::new(),
            temporary_state: TemporaryValue::new(),
        }
    }

    /// Whether an optimistic mode is held
    #[must_use]
    pub const fn has_temporary_mode(&self) -> bool {
        self.temporary_mode.has_value()
    }

    /// Whether an optimistic belt state is held
    #[must_use]
    pub const fn has_temporary_state(&self) -> bool {
        self.temporary_state.has_value()
    }

    /// Whether auto mode is on
    pub fn is_on(&mut self) -> bool {
        let data = self.coordinator.data();
        let timestamp = data.status_timestamp;
        let mode = self.temporary_mode.get(timestamp, data.mode);
        let belt_state = self.temporary_state.get(timestamp, data.belt_state);

        match mode {
            WalkingPadMode::Auto => true,
            WalkingPadMode::Standby => false,
            WalkingPadMode::Manual => belt_state.is_running(),
        }
    }

    /// Switch to auto mode
    pub async fn turn_on(&mut self) {
        self.temporary_mode
            .set(WalkingPadMode::Auto, expiration_timestamp(&self.coordinator));
        self.coordinator
            .device()
            .switch_mode(WalkingPadMode::Auto)
            .await;
    }

    /// Switch to standby
    pub async fn turn_off(&mut self) {
        let expiration = expiration_timestamp(&self.coordinator);
        self.temporary_mode.set(WalkingPadMode::Standby, expiration);
        self.temporary_state.set(BeltState::Stopped, expiration);
        self.coordinator
            .device()
            .switch_mode(WalkingPadMode::Standby)
            .await;
    }
}

/// Belt switch, selected by [`SwitchKind`]
#[derive(Debug)]
pub enum BeltSwitch {
    /// Manual-mode switch
    Manual(ManualBeltSwitch),
    /// Auto-mode switch
    Auto(AutoBeltSwitch),
}

impl BeltSwitch {
    /// Create the switch variant for `kind`
    #[must_use]
    pub fn new(
        kind: SwitchKind,
        coordinator: Arc<WalkingPadCoordinator>,
        config: SwitchConfig,
    ) -> Self {
        match kind {
            SwitchKind::Manual => Self::Manual(ManualBeltSwitch::new(coordinator, config)),
            SwitchKind::Auto => Self::Auto(AutoBeltSwitch::new(coordinator)),
        }
    }

    /// The variant of this switch
    #[must_use]
    pub const fn kind(&self) -> SwitchKind {
        match self {
            Self::Manual(_) => SwitchKind::Manual,
            Self::Auto(_) => SwitchKind::Auto,
        }
    }

    /// Whether the switch is on
    pub fn is_on(&mut self) -> bool {
        match self {
            Self::Manual(switch) => switch.is_on(),
            Self::Auto(switch) => switch.is_on(),
        }
    }

    /// Turn the switch on
    pub async fn turn_on(&mut self) {
        info!("Turning {:?} belt switch on", self.kind());
        match self {
            Self::Manual(switch) => switch.turn_on().await,
            Self::Auto(switch) => switch.turn_on().await,
        }
    }

    /// Turn the switch off
    pub async fn turn_off(&mut self) {
        info!("Turning {:?} belt switch off", self.kind());
        match self {
            Self::Manual(switch) => switch.turn_off().await,
            Self::Auto(switch) => switch.turn_off().await,
        }
    }
}
