use crate::{
    error::WalkingPadError,
    transport::{FrameHandler, Transport},
    types::{ConnectionStatus, DeviceInfo, DriverConfig, Status, WalkingPadMode},
};
use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, PoisonError, RwLock,
    },
    time::Duration,
};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

/// Callback invoked with every normalized status frame
pub type StatusCallback = Arc<dyn Fn(&Status) + Send + Sync>;

/// Handle returned by [`WalkingPad::register_status_callback`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct StatusSubscribers {
    next_id: AtomicU64,
    callbacks: RwLock<Vec<(SubscriptionId, StatusCallback)>>,
}

impl StatusSubscribers {
    fn register(&self, callback: StatusCallback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, callback));
        id
    }

    fn unregister(&self, id: SubscriptionId) -> bool {
        let mut callbacks = self
            .callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = callbacks.len();
        callbacks.retain(|(existing, _)| *existing != id);
        callbacks.len() != before
    }

    /// Invoke every subscriber in registration order.
    /// The list is snapshotted first so callbacks may (un)register.
    fn publish(&self, status: &Status) {
        let callbacks: Vec<StatusCallback> = self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        for callback in callbacks {
            callback(status);
        }
    }
}

/// Commands serialized behind the command lock
#[derive(Debug, Clone, Copy, PartialEq)]
enum DeviceCommand {
    RequestStats,
    StartBelt,
    StopBelt,
    SetSpeed(u8),
    SwitchMode(WalkingPadMode),
}

impl DeviceCommand {
    /// Whether the command is followed by the command-spacing delay
    const fn needs_delay(self) -> bool {
        !matches!(self, Self::RequestStats)
    }
}

fn set_connection_status(connection: &watch::Sender<ConnectionStatus>, status: ConnectionStatus) {
    connection.send_if_modified(|current| {
        if *current == status {
            false
        } else {
            debug!("Connection status {} -> {}", current, status);
            *current = status;
            true
        }
    });
}

/// Falls back to `NotConnected` unless explicitly settled, so a cancelled
/// connect or disconnect never leaves a stale state behind.
struct ConnectionTransition<'a> {
    connection: &'a watch::Sender<ConnectionStatus>,
    settled: bool,
}

impl<'a> ConnectionTransition<'a> {
    const fn new(connection: &'a watch::Sender<ConnectionStatus>) -> Self {
        Self {
            connection,
            settled: false,
        }
    }

    fn settle(mut self, status: ConnectionStatus) {
        set_connection_status(self.connection, status);
        self.settled = true;
    }
}

impl Drop for ConnectionTransition<'_> {
    fn drop(&mut self) {
        if !self.settled {
            set_connection_status(self.connection, ConnectionStatus::NotConnected);
        }
    }
}

/// Driver for a single WalkingPad treadmill
///
/// `WalkingPad` owns the transport and the connection state machine. Every
/// operation that touches the transport or changes the [`ConnectionStatus`]
/// runs behind one command lock, so at most one command is in flight per
/// device. Commands reconnect lazily and never fail: a transport error or
/// timeout is logged and leaves the driver `NotConnected`, and the next poll
/// or command tries again.
///
/// Status is not returned by any command. The device pushes telemetry
/// frames, which are normalized into [`Status`] and handed to every callback
/// registered with [`register_status_callback`](Self::register_status_callback).
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use walkingpad_control::{ble::BleTransport, DeviceInfo, Status, WalkingPad};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let info = DeviceInfo::new("WalkingPad".to_string(), "57:4C:4E:2B:0E:5A".to_string());
///     let device = WalkingPad::new(info, BleTransport::new().await?);
///
///     device.register_status_callback(Arc::new(|status: &Status| {
///         println!("Belt: {} at {:.1} km/h", status.belt_state, status.speed);
///     }));
///
///     device.start_belt().await;
///     device.set_speed(3.5).await;
///     device.update_state().await;
///     Ok(())
/// }
/// ```
pub struct WalkingPad {
    info: DeviceInfo,
    config: DriverConfig,
    transport: Mutex<Box<dyn Transport>>,
    connection: watch::Sender<ConnectionStatus>,
    subscribers: Arc<StatusSubscribers>,
}

impl fmt::Debug for WalkingPad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalkingPad")
            .field("info", &self.info)
            .field("config", &self.config)
            .field("connection_status", &self.connection_status())
            .finish_non_exhaustive()
    }
}

impl WalkingPad {
    /// Create a driver with default timing
    #[must_use]
    pub fn new(info: DeviceInfo, transport: impl Transport + 'static) -> Self {
        Self::with_config(info, transport, DriverConfig::default())
    }

    /// Create a driver with custom timing
    #[must_use]
    pub fn with_config(
        info: DeviceInfo,
        transport: impl Transport + 'static,
        config: DriverConfig,
    ) -> Self {
        let (connection, _) = watch::channel(ConnectionStatus::NotConnected);
        Self {
            info,
            config,
            transport: Mutex::new(Box::new(transport)),
            connection,
            subscribers: Arc::new(StatusSubscribers::default()),
        }
    }

    /// Bluetooth MAC address
    #[must_use]
    pub fn mac(&self) -> &str {
        &self.info.mac_address
    }

    /// Display name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Device identity
    #[must_use]
    pub const fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Driver timing
    #[must_use]
    pub const fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Current connection status
    #[must_use]
    pub fn connection_status(&self) -> ConnectionStatus {
        *self.connection.borrow()
    }

    /// Whether the link is established
    #[must_use]
    pub fn connected(&self) -> bool {
        self.connection_status() == ConnectionStatus::Connected
    }

    /// Observe connection status transitions
    #[must_use]
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionStatus> {
        self.connection.subscribe()
    }

    /// Register a callback for normalized status frames
    pub fn register_status_callback(&self, callback: StatusCallback) -> SubscriptionId {
        self.subscribers.register(callback)
    }

    /// Remove a previously registered callback, returning whether it existed
    pub fn unregister_status_callback(&self, id: SubscriptionId) -> bool {
        self.subscribers.unregister(id)
    }

    fn frame_handler(&self) -> FrameHandler {
        let subscribers = Arc::clone(&self.subscribers);
        let name = self.info.name.clone();
        Arc::new(move |raw| match Status::from_raw(&raw) {
            Ok(status) => subscribers.publish(&status),
            Err(e) => warn!("Dropping status frame from {}: {}", name, e),
        })
    }

    async fn command_delay(&self) {
        tokio::time::sleep(Duration::from_millis(self.config.command_delay_ms)).await;
    }

    /// Connect to the treadmill
    ///
    /// Does nothing while another connect is in progress or once connected.
    /// Failures are logged and leave the driver `NotConnected`. The command
    /// lock is held through the command delay.
    pub async fn connect(&self) {
        if self.connection_status() == ConnectionStatus::Connecting {
            info!("Already connecting to {}", self.info.name);
            return;
        }

        info!("Connecting to {} ({})", self.info.name, self.info.mac_address);
        let mut transport = self.transport.lock().await;
        if self.connected() {
            debug!("{} connected while waiting for the command lock", self.info.name);
            return;
        }

        let transition = ConnectionTransition::new(&self.connection);
        set_connection_status(&self.connection, ConnectionStatus::Connecting);

        let timeout_ms = self.config.connect_timeout_ms;
        let outcome = match tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            transport.connect(&self.info, self.frame_handler()),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                if let Err(e) = transport.disconnect().await {
                    debug!("Cleanup after connect timeout failed: {}", e);
                }
                Err(WalkingPadError::Timeout { timeout_ms })
            }
        };

        match outcome {
            Ok(()) => {
                transition.settle(ConnectionStatus::Connected);
                info!("Connected to {}", self.info.name);
            }
            Err(e) => {
                warn!("Unable to connect to {}: {}", self.info.name, e);
                transition.settle(ConnectionStatus::NotConnected);
            }
        }

        self.command_delay().await;
    }

    /// Disconnect from the treadmill
    ///
    /// Always ends `NotConnected`, even when the transport fails to tear
    /// down cleanly.
    pub async fn disconnect(&self) {
        if self.connection_status() == ConnectionStatus::NotConnected {
            return;
        }

        let mut transport = self.transport.lock().await;
        if self.connection_status() == ConnectionStatus::NotConnected {
            return;
        }

        info!("Disconnecting from {}", self.info.name);
        let transition = ConnectionTransition::new(&self.connection);
        if let Err(e) = transport.disconnect().await {
            warn!("Error while disconnecting from {}: {}", self.info.name, e);
        }
        transition.settle(ConnectionStatus::NotConnected);

        self.command_delay().await;
    }

    /// Ask the treadmill for a status frame
    ///
    /// The new status is delivered to the registered callbacks, not returned.
    pub async fn update_state(&self) {
        self.execute(DeviceCommand::RequestStats).await;
    }

    /// Start the belt
    pub async fn start_belt(&self) {
        self.execute(DeviceCommand::StartBelt).await;
    }

    /// Stop the belt
    pub async fn stop_belt(&self) {
        self.execute(DeviceCommand::StopBelt).await;
    }

    /// Set the belt speed in km/h
    ///
    /// The value is truncated to tenths. Range checks belong to the caller,
    /// see [`SpeedControl`](crate::speed::SpeedControl).
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub async fn set_speed(&self, speed: f64) {
        let tenths = (speed * 10.0) as u8;
        self.execute(DeviceCommand::SetSpeed(tenths)).await;
    }

    /// Switch the operating mode
    pub async fn switch_mode(&self, mode: WalkingPadMode) {
        self.execute(DeviceCommand::SwitchMode(mode)).await;
    }

    async fn execute(&self, command: DeviceCommand) {
        if self.connection_status() == ConnectionStatus::NotConnected {
            self.connect().await;
        }

        let mut transport = self.transport.lock().await;
        if !self.connected() {
            debug!("Skipping {:?}, {} is not connected", command, self.info.name);
            return;
        }

        debug!("Sending {:?} to {}", command, self.info.name);
        let result = match command {
            DeviceCommand::RequestStats => transport.request_stats().await,
            DeviceCommand::StartBelt => transport.send_start().await,
            DeviceCommand::StopBelt => transport.send_stop().await,
            DeviceCommand::SetSpeed(tenths) => transport.send_speed(tenths).await,
            DeviceCommand::SwitchMode(mode) => transport.send_mode(mode).await,
        };

        if let Err(e) = result {
            warn!("Bluetooth error while sending {:?}: {}", command, e);
            set_connection_status(&self.connection, ConnectionStatus::NotConnected);
        }

        if command.needs_delay() {
            self.command_delay().await;
        }
    }
}
