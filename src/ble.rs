use async_trait::async_trait;
use btleplug::{
    api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType},
    platform::{Adapter, Manager, Peripheral},
};
use futures::stream::StreamExt;
use std::{
    fmt, mem,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::{Result, WalkingPadError},
    protocol::{parse_notification, Command, Notification},
    transport::{FrameHandler, Transport},
    types::{DeviceInfo, WalkingPadMode},
    WALKINGPAD_NOTIFY_CHAR_UUID, WALKINGPAD_SERVICE_UUID, WALKINGPAD_WRITE_CHAR_UUID,
};

const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(500);

fn parse_uuid(uuid: &str, what: &str) -> Result<Uuid> {
    Uuid::parse_str(uuid).map_err(|e| WalkingPadError::Protocol(format!("Invalid {what} UUID: {e}")))
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Stamps received frames in milliseconds
///
/// Anchored to the UNIX epoch once, then advanced by a monotonic clock, so a
/// wall-clock step backwards never makes newer frames look stale.
#[derive(Debug, Clone, Copy)]
struct ReceiveClock {
    base_ms: u64,
    started: Instant,
}

impl ReceiveClock {
    fn new() -> Self {
        let base_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, millis);
        Self {
            base_ms,
            started: Instant::now(),
        }
    }

    fn now(&self) -> u64 {
        self.base_ms.saturating_add(millis(self.started.elapsed()))
    }
}

/// Live link to a treadmill
struct BleSession {
    peripheral: Peripheral,
    write_char: Characteristic,
    notifications: JoinHandle<()>,
}

/// Progress of the link to a treadmill
///
/// `Pending` holds a peripheral whose connect was started but not finished,
/// so an abandoned connect can still be torn down.
enum Link<P, S> {
    Idle,
    Pending(P),
    Established(S),
}

impl<P, S> Link<P, S> {
    const fn session(&self) -> Option<&S> {
        match self {
            Self::Established(session) => Some(session),
            _ => None,
        }
    }

    fn take(&mut self) -> Self {
        mem::replace(self, Self::Idle)
    }
}

/// Bluetooth Low Energy [`Transport`] built on btleplug
///
/// Uses the first Bluetooth adapter of the host. One transport drives one
/// treadmill at a time; connecting again replaces the previous link.
pub struct BleTransport {
    manager: Manager,
    link: Link<Peripheral, BleSession>,
    clock: ReceiveClock,
}

impl fmt::Debug for BleTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BleTransport")
            .field("connected", &self.link.session().is_some())
            .finish_non_exhaustive()
    }
}

impl BleTransport {
    /// Create a transport on the host's Bluetooth stack
    ///
    /// # Errors
    ///
    /// Returns [`WalkingPadError::Ble`] if the Bluetooth manager cannot be initialized.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await?;

        Ok(Self {
            manager,
            link: Link::Idle,
            clock: ReceiveClock::new(),
        })
    }

    async fn adapter(&self) -> Result<Adapter> {
        self.manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(WalkingPadError::DeviceNotFound)
    }

    /// Scan for WalkingPad treadmills for `duration`
    ///
    /// # Errors
    ///
    /// Returns [`WalkingPadError::DeviceNotFound`] if no Bluetooth adapter is available,
    /// or [`WalkingPadError::Ble`] for other Bluetooth-related errors.
    pub async fn scan(&self, duration: Duration) -> Result<Vec<DeviceInfo>> {
        info!("Scanning for WalkingPad devices...");
        let central = self.adapter().await?;
        let service_uuid = parse_uuid(WALKINGPAD_SERVICE_UUID, "service")?;

        central
            .start_scan(ScanFilter {
                services: vec![service_uuid],
            })
            .await?;
        tokio::time::sleep(duration).await;
        central.stop_scan().await?;

        let mut devices = Vec::new();
        for peripheral in central.peripherals().await? {
            let Ok(Some(properties)) = peripheral.properties().await else {
                continue;
            };
            if !properties.services.contains(&service_uuid) {
                continue;
            }

            let name = properties
                .local_name
                .unwrap_or_else(|| "WalkingPad".to_string());
            info!("Found WalkingPad device: {name} ({})", properties.address);
            devices.push(DeviceInfo::new(name, properties.address.to_string()));
        }

        info!("Scan completed. Found {} WalkingPad device(s)", devices.len());
        Ok(devices)
    }

    /// Scan until the peripheral with the target address shows up
    async fn find_peripheral(&self, central: &Adapter, mac_address: &str) -> Result<Peripheral> {
        let service_uuid = parse_uuid(WALKINGPAD_SERVICE_UUID, "service")?;
        central
            .start_scan(ScanFilter {
                services: vec![service_uuid],
            })
            .await?;

        loop {
            let found = central
                .peripherals()
                .await?
                .into_iter()
                .find(|p| p.address().to_string().eq_ignore_ascii_case(mac_address));

            if let Some(peripheral) = found {
                central.stop_scan().await?;
                return Ok(peripheral);
            }

            tokio::time::sleep(SCAN_POLL_INTERVAL).await;
        }
    }

    async fn close_link(&mut self) -> Result<()> {
        let peripheral = match self.link.take() {
            Link::Idle => return Ok(()),
            Link::Pending(peripheral) => {
                debug!("Tearing down unfinished connection");
                peripheral
            }
            Link::Established(session) => {
                session.notifications.abort();
                session.peripheral
            }
        };

        if peripheral.is_connected().await.unwrap_or(false) {
            peripheral.disconnect().await?;
        }
        Ok(())
    }

    async fn write(&self, command: Command) -> Result<()> {
        let session = self.link.session().ok_or(WalkingPadError::Disconnected)?;
        let data = command.to_bytes();
        debug!("Sending command: {:02X?}", data.as_ref());

        session
            .peripheral
            .write(&session.write_char, &data, WriteType::WithoutResponse)
            .await
            .map_err(|e| WalkingPadError::Protocol(format!("Failed to send command: {e}")))
    }
}

/// Forward parsed status frames from `peripheral` to `on_frame`
async fn handle_notifications(
    peripheral: Peripheral,
    notify_uuid: Uuid,
    clock: ReceiveClock,
    on_frame: FrameHandler,
) {
    let mut notification_stream = match peripheral.notifications().await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Failed to open notification stream: {e}");
            return;
        }
    };

    while let Some(data) = notification_stream.next().await {
        if data.uuid != notify_uuid {
            continue;
        }

        match parse_notification(&data.value, clock.now()) {
            Ok(Notification::Status(raw)) => on_frame(raw),
            Ok(Notification::Record) => debug!("Ignoring record frame"),
            Ok(Notification::Other(class)) => debug!("Ignoring frame class {class:#04X}"),
            Err(e) => warn!("Dropping notification {:02X?}: {e}", data.value),
        }
    }

    debug!("Notification stream ended");
}

#[async_trait]
impl Transport for BleTransport {
    async fn connect(&mut self, target: &DeviceInfo, on_frame: FrameHandler) -> Result<()> {
        self.close_link().await?;
        info!("Connecting to device: {}", target.name);

        let notify_uuid = parse_uuid(WALKINGPAD_NOTIFY_CHAR_UUID, "notify characteristic")?;
        let write_uuid = parse_uuid(WALKINGPAD_WRITE_CHAR_UUID, "write characteristic")?;

        let central = self.adapter().await?;
        let peripheral = self.find_peripheral(&central, &target.mac_address).await?;
        self.link = Link::Pending(peripheral.clone());

        peripheral
            .connect()
            .await
            .map_err(|e| WalkingPadError::ConnectionFailed(e.to_string()))?;
        peripheral.discover_services().await?;

        let characteristics = peripheral.characteristics();
        let notify_char = characteristics
            .iter()
            .find(|c| c.uuid == notify_uuid)
            .ok_or_else(|| WalkingPadError::Protocol("Notify characteristic not found".to_string()))?
            .clone();
        let write_char = characteristics
            .iter()
            .find(|c| c.uuid == write_uuid)
            .ok_or_else(|| WalkingPadError::Protocol("Write characteristic not found".to_string()))?
            .clone();

        peripheral.subscribe(&notify_char).await?;
        let notifications = tokio::spawn(handle_notifications(
            peripheral.clone(),
            notify_uuid,
            self.clock,
            on_frame,
        ));

        info!("Successfully connected to {}", target.name);
        self.link = Link::Established(BleSession {
            peripheral,
            write_char,
            notifications,
        });
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Ok(central) = self.adapter().await {
            // an abandoned connect may have left a scan running
            if let Err(e) = central.stop_scan().await {
                debug!("Stopping scan during disconnect failed: {}", e);
            }
        }
        self.close_link().await
    }

    async fn request_stats(&mut self) -> Result<()> {
        self.write(Command::ask_stats()).await
    }

    async fn send_start(&mut self) -> Result<()> {
        self.write(Command::start_belt()).await
    }

    async fn send_stop(&mut self) -> Result<()> {
        self.write(Command::stop_belt()).await
    }

    async fn send_speed(&mut self, tenths: u8) -> Result<()> {
        self.write(Command::set_speed(tenths)).await
    }

    async fn send_mode(&mut self, mode: WalkingPadMode) -> Result<()> {
        self.write(Command::switch_mode(mode)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_parsing() {
        assert!(parse_uuid(WALKINGPAD_SERVICE_UUID, "service").is_ok());
        assert_eq!(
            parse_uuid(WALKINGPAD_NOTIFY_CHAR_UUID, "notify").unwrap(),
            Uuid::from_u128(0x0000_fe01_0000_1000_8000_0080_5f9b_34fb)
        );
        assert!(parse_uuid(WALKINGPAD_WRITE_CHAR_UUID, "write").is_ok());
        assert!(matches!(
            parse_uuid("not-a-uuid", "test"),
            Err(WalkingPadError::Protocol(_))
        ));
    }

    #[test]
    fn test_receive_clock_is_epoch_milliseconds() {
        let clock = ReceiveClock::new();
        let first = clock.now();
        // after 2020-01-01 in ms
        assert!(first > 1_577_836_800_000);
        assert!(clock.now() >= first);
    }

    #[test]
    fn test_receive_clock_ignores_wall_clock() {
        let clock = ReceiveClock {
            base_ms: 5_000,
            started: Instant::now(),
        };
        std::thread::sleep(Duration::from_millis(5));

        let now = clock.now();
        assert!(now >= 5_005);
        assert!(now < 5_000 + 60_000);
    }

    #[test]
    fn test_pending_link_is_handed_back_for_teardown() {
        let mut link: Link<&str, u8> = Link::Idle;
        assert!(matches!(link.take(), Link::Idle));

        link = Link::Pending("peripheral");
        assert!(link.session().is_none());
        assert!(matches!(link.take(), Link::Pending("peripheral")));
        assert!(matches!(link, Link::Idle));

        link = Link::Established(7);
        assert_eq!(link.session(), Some(&7));
        assert!(matches!(link.take(), Link::Established(7)));
        assert!(link.session().is_none());
    }
}
