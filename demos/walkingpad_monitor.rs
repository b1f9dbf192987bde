use std::{sync::Arc, time::Duration};
use tokio::time::{interval, sleep};
use tracing::{error, info, warn};
use walkingpad_control::{
    ble::BleTransport, ConnectionStatus, DeviceConfig, Result, Status, WalkingPadContext,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("🏃 WalkingPad Monitor Example");

    let mut args = std::env::args().skip(1);
    let Some(mac) = args.next() else {
        info!("No address given, scanning for 5 seconds...");
        let transport = BleTransport::new().await?;
        for device in transport.scan(Duration::from_secs(5)).await? {
            info!("  {} ({})", device.name, device.mac_address);
        }
        info!("Usage: walkingpad_monitor <MAC> [NAME]");
        return Ok(());
    };
    let name = args.next().unwrap_or_default();

    let context = WalkingPadContext::new(DeviceConfig::new(name, mac), BleTransport::new().await?)?;
    let coordinator = Arc::clone(context.coordinator());

    let mut connection = context.device().watch_connection();
    tokio::spawn(async move {
        while connection.changed().await.is_ok() {
            let status = *connection.borrow_and_update();
            match status {
                ConnectionStatus::NotConnected => warn!("🔌 {status}"),
                _ => info!("🔌 {status}"),
            }
        }
    });

    // The first listener connects the treadmill and starts polling
    let listener = coordinator.add_listener(Arc::new(|status: &Status| {
        info!(
            "📊 {} ({}) {:.1} km/h, {} steps, {} m, {} s",
            status.belt_state,
            status.mode,
            status.speed,
            status.session_steps,
            status.session_distance,
            status.session_running_time
        );
    }));

    info!("Monitoring {}, press Ctrl+C to stop", context.device().name());

    let mut report = interval(Duration::from_secs(30));
    report.tick().await;
    loop {
        tokio::select! {
            _ = report.tick() => {
                if !coordinator.last_update_success() {
                    warn!("⚠️ Last poll failed");
                }
                for sensor in context.sensors() {
                    if sensor.available() {
                        info!("  {}: {}", sensor.kind().key(), sensor.value());
                    }
                }
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("❌ Failed to listen for Ctrl+C: {}", e);
                }
                break;
            }
        }
    }

    // The last listener leaving disconnects the treadmill
    coordinator.remove_listener(listener);
    sleep(Duration::from_secs(2)).await;
    info!("👋 Disconnected");

    Ok(())
}
