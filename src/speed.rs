use crate::{
    coordinator::WalkingPadCoordinator,
    error::{Result, WalkingPadError},
};
use std::sync::Arc;
use tracing::debug;

/// Speed control for a running belt, in km/h
///
/// Speed changes only reach the treadmill while the published belt state is
/// active or starting; otherwise they are accepted and dropped.
#[derive(Debug, Clone)]
pub struct SpeedControl {
    coordinator: Arc<WalkingPadCoordinator>,
}

impl SpeedControl {
    /// Lowest settable speed
    pub const MIN_SPEED: f64 = 0.5;
    /// Highest settable speed
    pub const MAX_SPEED: f64 = 6.0;
    /// Speed increment
    pub const STEP: f64 = 0.1;
    /// Unit of [`SpeedControl::value`]
    pub const UNIT: &'static str = "km/h";
    /// Key used to build the control's unique id
    pub const KEY: &'static str = "walkingpad_speed";

    /// Create a speed control on top of `coordinator`
    #[must_use]
    pub const fn new(coordinator: Arc<WalkingPadCoordinator>) -> Self {
        Self { coordinator }
    }

    /// Unique id of this control, derived from the device MAC
    #[must_use]
    pub fn unique_id(&self) -> String {
        format!("{}-{}", self.coordinator.device().mac(), Self::KEY)
    }

    /// Current published speed
    #[must_use]
    pub fn value(&self) -> f64 {
        self.coordinator.data().speed
    }

    /// Whether the treadmill is reachable
    #[must_use]
    pub fn available(&self) -> bool {
        self.coordinator.connected()
    }

    /// Request a new belt speed
    ///
    /// # Errors
    ///
    /// Returns [`WalkingPadError::InvalidParameters`] if `speed` lies outside
    /// [`SpeedControl::MIN_SPEED`]..=[`SpeedControl::MAX_SPEED`].
    pub async fn set_speed(&self, speed: f64) -> Result<()> {
        if !(Self::MIN_SPEED..=Self::MAX_SPEED).contains(&speed) {
            return Err(WalkingPadError::InvalidParameters(format!(
                "Speed {speed} km/h outside {}..={} km/h",
                Self::MIN_SPEED,
                Self::MAX_SPEED
            )));
        }

        let belt_state = self.coordinator.data().belt_state;
        if !belt_state.is_running() {
            debug!("Ignoring speed {speed} km/h while belt is {belt_state}");
            return Ok(());
        }

        self.coordinator.device().set_speed(speed).await;
        Ok(())
    }
}
