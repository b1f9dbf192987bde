use crate::{
    coordinator::WalkingPadCoordinator,
    device::WalkingPad,
    error::{Result, WalkingPadError},
    sensor::Sensor,
    speed::SpeedControl,
    switch::{BeltSwitch, SwitchConfig, SwitchKind},
    transport::Transport,
    types::{CoordinatorConfig, DeviceInfo, DriverConfig},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Name used when the configured one is blank
pub const DEFAULT_DEVICE_NAME: &str = "walkingpad";

/// Parse a MAC address in `XX:XX:XX:XX:XX:XX` form
///
/// # Errors
///
/// Returns [`WalkingPadError::InvalidParameters`] if the address does not have
/// six colon-separated two-digit hex bytes.
pub fn parse_mac_address(mac_address: &str) -> Result<[u8; 6]> {
    let parts: Vec<&str> = mac_address.split(':').collect();
    if parts.len() != 6 {
        return Err(WalkingPadError::InvalidParameters(format!(
            "Invalid MAC address format: {mac_address}. Expected format: XX:XX:XX:XX:XX:XX"
        )));
    }

    let mut mac_bytes = [0u8; 6];
    for (byte, part) in mac_bytes.iter_mut().zip(&parts) {
        if part.len() != 2 {
            return Err(WalkingPadError::InvalidParameters(format!(
                "Invalid MAC address byte: {part}"
            )));
        }
        *byte = u8::from_str_radix(part, 16).map_err(|_| {
            WalkingPadError::InvalidParameters(format!("Invalid MAC address byte: {part}"))
        })?;
    }

    Ok(mac_bytes)
}

/// Setup of one treadmill
///
/// ```
/// use walkingpad_control::context::DeviceConfig;
///
/// let config: DeviceConfig = serde_json::from_str(
///     r#"{ "name": "Office pad", "mac": "aa:bb:cc:dd:ee:ff", "remote_control_enabled": true }"#,
/// )?;
/// assert_eq!(config.device_info()?.mac_address, "AA:BB:CC:DD:EE:FF");
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Bluetooth address
    pub mac: String,
    /// Whether the belt switch and speed control are offered
    #[serde(default)]
    pub remote_control_enabled: bool,
    /// Variant of the belt switch
    #[serde(default)]
    pub switch_kind: SwitchKind,
    /// Driver timing
    #[serde(default)]
    pub driver: DriverConfig,
    /// Polling timing
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    /// Belt switch timing
    #[serde(default)]
    pub switch: SwitchConfig,
}

impl DeviceConfig {
    /// Configuration with default timings and remote control disabled
    #[must_use]
    pub fn new(name: impl Into<String>, mac: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mac: mac.into(),
            remote_control_enabled: false,
            switch_kind: SwitchKind::default(),
            driver: DriverConfig::default(),
            coordinator: CoordinatorConfig::default(),
            switch: SwitchConfig::default(),
        }
    }

    /// Configured name, or [`DEFAULT_DEVICE_NAME`] if blank
    #[must_use]
    pub fn display_name(&self) -> &str {
        let name = self.name.trim();
        if name.is_empty() {
            DEFAULT_DEVICE_NAME
        } else {
            name
        }
    }

    /// Check the MAC address and timings
    ///
    /// # Errors
    ///
    /// Returns [`WalkingPadError::InvalidParameters`] for a malformed MAC
    /// address or a poll timeout not longer than the connect timeout.
    pub fn validate(&self) -> Result<()> {
        parse_mac_address(&self.mac)?;

        if self.coordinator.poll_timeout_ms <= self.driver.connect_timeout_ms {
            return Err(WalkingPadError::InvalidParameters(format!(
                "Poll timeout {}ms must exceed connect timeout {}ms",
                self.coordinator.poll_timeout_ms, self.driver.connect_timeout_ms
            )));
        }

        Ok(())
    }

    /// Validated identity of the treadmill, with the MAC upper-cased
    ///
    /// # Errors
    ///
    /// See [`DeviceConfig::validate`].
    pub fn device_info(&self) -> Result<DeviceInfo> {
        self.validate()?;
        Ok(DeviceInfo::new(
            self.display_name().to_string(),
            self.mac.to_ascii_uppercase(),
        ))
    }
}

/// Everything set up for one treadmill: driver, coordinator and the
/// entities on top of them
///
/// Must be created inside a tokio runtime.
#[derive(Debug)]
pub struct WalkingPadContext {
    config: DeviceConfig,
    device: Arc<WalkingPad>,
    coordinator: Arc<WalkingPadCoordinator>,
    sensors: Vec<Sensor>,
    belt_switch: Option<BeltSwitch>,
    speed_control: Option<SpeedControl>,
}

impl WalkingPadContext {
    /// Set up a treadmill on `transport`
    ///
    /// # Errors
    ///
    /// Returns [`WalkingPadError::InvalidParameters`] if `config` does not
    /// validate.
    pub fn new(config: DeviceConfig, transport: impl Transport + 'static) -> Result<Self> {
        let info = config.device_info()?;
        info!("Setting up {} ({})", info.name, info.mac_address);

        let device = Arc::new(WalkingPad::with_config(
            info,
            transport,
            config.driver.clone(),
        ));
        let coordinator =
            WalkingPadCoordinator::new(Arc::clone(&device), config.coordinator.clone());
        let sensors = Sensor::all(&coordinator);

        let mut context = Self {
            config,
            device,
            coordinator,
            sensors,
            belt_switch: None,
            speed_control: None,
        };
        context.build_remote_control();
        Ok(context)
    }

    fn build_remote_control(&mut self) {
        if self.config.remote_control_enabled {
            self.belt_switch = Some(BeltSwitch::new(
                self.config.switch_kind,
                Arc::clone(&self.coordinator),
                self.config.switch.clone(),
            ));
            self.speed_control = Some(SpeedControl::new(Arc::clone(&self.coordinator)));
        } else {
            self.belt_switch = None;
            self.speed_control = None;
        }
    }

    /// Enable or disable the belt switch and speed control
    ///
    /// Both are rebuilt, dropping any optimistic switch state.
    pub fn set_remote_control(&mut self, enabled: bool) {
        info!(
            "Remote control for {} {}",
            self.device.name(),
            if enabled { "enabled" } else { "disabled" }
        );
        self.config.remote_control_enabled = enabled;
        self.build_remote_control();
    }

    /// Active configuration
    #[must_use]
    pub const fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// The device driver
    #[must_use]
    pub const fn device(&self) -> &Arc<WalkingPad> {
        &self.device
    }

    /// The polling coordinator
    #[must_use]
    pub const fn coordinator(&self) -> &Arc<WalkingPadCoordinator> {
        &self.coordinator
    }

    /// One sensor per reading
    #[must_use]
    pub fn sensors(&self) -> &[Sensor] {
        &self.sensors
    }

    /// Belt switch, if remote control is enabled
    pub fn belt_switch(&mut self) -> Option<&mut BeltSwitch> {
        self.belt_switch.as_mut()
    }

    /// Speed control, if remote control is enabled
    #[must_use]
    pub const fn speed_control(&self) -> Option<&SpeedControl> {
        self.speed_control.as_ref()
    }
}
