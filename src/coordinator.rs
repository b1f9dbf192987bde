use crate::{
    device::{StatusCallback, SubscriptionId, WalkingPad},
    error::{Result, WalkingPadError},
    types::{ConnectionStatus, CoordinatorConfig, Status},
};
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, PoisonError, RwLock, Weak,
    },
    time::Duration,
};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

/// Handle returned by [`WalkingPadCoordinator::add_listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Work posted to the coordinator's scheduler task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScheduledTask {
    Connect,
    Disconnect,
}

/// Polls a [`WalkingPad`] and publishes its status to listeners
///
/// The coordinator keeps the latest accepted [`Status`]. Telemetry pushed by
/// the driver replaces it only when its `status_timestamp` is strictly newer,
/// so duplicated or reordered frames never reach listeners.
///
/// The Bluetooth link is only held while someone listens: the first
/// listener posts a connect to the scheduler, removing the last one posts a
/// disconnect. Polls run on the same scheduler every
/// [`poll_interval_ms`](CoordinatorConfig::poll_interval_ms) while at least
/// one listener is attached.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use walkingpad_control::{
///     ble::BleTransport, CoordinatorConfig, DeviceInfo, Status, WalkingPad, WalkingPadCoordinator,
/// };
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let info = DeviceInfo::new("WalkingPad".to_string(), "57:4C:4E:2B:0E:5A".to_string());
///     let device = Arc::new(WalkingPad::new(info, BleTransport::new().await?));
///     let coordinator = WalkingPadCoordinator::new(device, CoordinatorConfig::default());
///
///     let id = coordinator.add_listener(Arc::new(|status: &Status| {
///         println!("{} steps", status.session_steps);
///     }));
///     tokio::time::sleep(std::time::Duration::from_secs(60)).await;
///     coordinator.remove_listener(id);
///     Ok(())
/// }
/// ```
pub struct WalkingPadCoordinator {
    device: Arc<WalkingPad>,
    config: CoordinatorConfig,
    data: RwLock<Status>,
    listeners: Mutex<Vec<(ListenerId, StatusCallback)>>,
    next_listener_id: AtomicU64,
    last_update_success: AtomicBool,
    tasks: mpsc::UnboundedSender<ScheduledTask>,
    subscription: SubscriptionId,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for WalkingPadCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalkingPadCoordinator")
            .field("device", &self.device)
            .field("config", &self.config)
            .field("data", &self.data())
            .field("listeners", &self.listener_count())
            .finish_non_exhaustive()
    }
}

impl WalkingPadCoordinator {
    /// Create a coordinator and start its scheduler
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    #[must_use]
    pub fn new(device: Arc<WalkingPad>, config: CoordinatorConfig) -> Arc<Self> {
        let (tasks, task_rx) = mpsc::unbounded_channel();
        let connection = device.watch_connection();

        let coordinator = Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            let subscription = device.register_status_callback(Arc::new(move |status: &Status| {
                if let Some(coordinator) = weak.upgrade() {
                    coordinator.handle_status(status);
                }
            }));

            Self {
                device: Arc::clone(&device),
                config,
                data: RwLock::new(Status::default()),
                listeners: Mutex::new(Vec::new()),
                next_listener_id: AtomicU64::new(0),
                last_update_success: AtomicBool::new(true),
                tasks,
                subscription,
                scheduler: Mutex::new(None),
            }
        });

        let handle = tokio::spawn(Self::run_scheduler(
            Arc::downgrade(&coordinator),
            task_rx,
            connection,
            Duration::from_millis(coordinator.config.poll_interval_ms),
        ));
        *coordinator
            .scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);

        coordinator
    }

    /// The driven device
    #[must_use]
    pub const fn device(&self) -> &Arc<WalkingPad> {
        &self.device
    }

    /// Coordinator timing
    #[must_use]
    pub const fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Latest accepted status
    #[must_use]
    pub fn data(&self) -> Status {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether the device link is established
    #[must_use]
    pub fn connected(&self) -> bool {
        self.device.connected()
    }

    /// Whether the last poll finished within its timeout
    #[must_use]
    pub fn last_update_success(&self) -> bool {
        self.last_update_success.load(Ordering::SeqCst)
    }

    /// Number of attached listeners
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Attach a listener for accepted status updates
    ///
    /// The first listener schedules a connect on the scheduler task.
    pub fn add_listener(&self, listener: StatusCallback) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        if listeners.is_empty() {
            self.schedule(ScheduledTask::Connect);
        }
        listeners.push((id, listener));
        id
    }

    /// Detach a listener, returning whether it was attached
    ///
    /// Removing the last listener schedules a disconnect and pauses polling.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        let removed = listeners.len() != before;
        if removed && listeners.is_empty() {
            self.schedule(ScheduledTask::Disconnect);
        }
        removed
    }

    /// Poll the device once, bounded by the poll timeout
    ///
    /// Returns the current snapshot unchanged: the device answers through
    /// the telemetry callback, not through this call. A poll that outlives
    /// the timeout keeps running in the background; only the wait is
    /// abandoned.
    ///
    /// # Errors
    ///
    /// Returns [`WalkingPadError::Timeout`] if the poll did not finish in
    /// time, or [`WalkingPadError::Other`] if the poll task panicked.
    pub async fn refresh(&self) -> Result<Status> {
        let device = Arc::clone(&self.device);
        let poll = tokio::spawn(async move { device.update_state().await });

        let timeout_ms = self.config.poll_timeout_ms;
        let result = match tokio::time::timeout(Duration::from_millis(timeout_ms), poll).await {
            Ok(Ok(())) => Ok(self.data()),
            Ok(Err(e)) => Err(WalkingPadError::Other(format!("Status poll failed: {e}"))),
            Err(_) => Err(WalkingPadError::Timeout { timeout_ms }),
        };

        self.last_update_success
            .store(result.is_ok(), Ordering::SeqCst);
        result
    }

    fn schedule(&self, task: ScheduledTask) {
        if self.tasks.send(task).is_err() {
            warn!("Scheduler stopped, dropping {:?}", task);
        }
    }

    fn listeners_snapshot(&self) -> Vec<StatusCallback> {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }

    fn notify_listeners(&self, status: &Status) {
        for listener in self.listeners_snapshot() {
            listener(status);
        }
    }

    /// Accept `status` if it is newer than the published one
    fn handle_status(&self, status: &Status) {
        {
            let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
            if status.status_timestamp <= data.status_timestamp {
                return;
            }
            *data = status.clone();
        }

        debug!("WalkingPad status update: {:?}", status);
        self.last_update_success.store(true, Ordering::SeqCst);
        self.notify_listeners(status);
    }

    /// Re-publish the current data so listeners re-check availability
    fn handle_disconnect(&self) {
        info!("{} disconnected", self.device.name());
        self.notify_listeners(&self.data());
    }

    async fn run_task(&self, task: ScheduledTask) {
        match task {
            ScheduledTask::Connect => self.device.connect().await,
            ScheduledTask::Disconnect => self.device.disconnect().await,
        }
    }

    async fn run_scheduler(
        coordinator: Weak<Self>,
        mut tasks: mpsc::UnboundedReceiver<ScheduledTask>,
        mut connection: watch::Receiver<ConnectionStatus>,
        period: Duration,
    ) {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                task = tasks.recv() => {
                    let Some(task) = task else { break };
                    let Some(coordinator) = coordinator.upgrade() else { break };
                    coordinator.run_task(task).await;
                    if task == ScheduledTask::Connect {
                        ticker.reset();
                    }
                }
                _ = ticker.tick() => {
                    let Some(coordinator) = coordinator.upgrade() else { break };
                    if coordinator.listener_count() == 0 {
                        continue;
                    }
                    if let Err(e) = coordinator.refresh().await {
                        warn!("Error refreshing {}: {}", coordinator.device.name(), e);
                    }
                }
                changed = connection.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let status = *connection.borrow_and_update();
                    if status == ConnectionStatus::NotConnected {
                        let Some(coordinator) = coordinator.upgrade() else { break };
                        coordinator.handle_disconnect();
                    }
                }
            }
        }

        debug!("Coordinator scheduler stopped");
    }
}

impl Drop for WalkingPadCoordinator {
    fn drop(&mut self) {
        self.device.unregister_status_callback(self.subscription);
        if let Some(handle) = self
            .scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        transport::mock::{frame, MockTransport, Sent},
        types::DeviceInfo,
    };
    use std::sync::atomic::AtomicUsize;

    fn coordinator() -> (Arc<WalkingPadCoordinator>, MockTransport) {
        let transport = MockTransport::new();
        let info = DeviceInfo::new("WalkingPad".to_string(), "AA:BB:CC:DD:EE:FF".to_string());
        let device = Arc::new(WalkingPad::new(info, transport.clone()));
        (
            WalkingPadCoordinator::new(device, CoordinatorConfig::default()),
            transport,
        )
    }

    fn counting_listener() -> (StatusCallback, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let listener: StatusCallback = Arc::new(move |_: &Status| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (listener, count)
    }

    #[tokio::test(start_paused = true)]
    async fn test_published_status_is_monotonic() {
        let (coordinator, transport) = coordinator();
        coordinator.device().connect().await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&seen);
        coordinator.add_listener(Arc::new(move |status: &Status| {
            recorder.lock().unwrap().push(status.status_timestamp);
        }));

        let mut max_seen = 0;
        for ts in [10, 5, 10, 12, 11, 30, 29, 30, 31] {
            transport.emit(frame(1, 1, ts));
            max_seen = max_seen.max(ts);
            assert_eq!(coordinator.data().status_timestamp, max_seen);
        }

        assert_eq!(*seen.lock().unwrap(), vec![10, 12, 30, 31]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_frame_does_not_change_state() {
        let (coordinator, transport) = coordinator();
        coordinator.device().connect().await;
        let (listener, count) = counting_listener();
        coordinator.add_listener(listener);

        transport.emit(frame(1, 1, 20));
        let published = coordinator.data();
        transport.emit(frame(0, 2, 20));
        transport.emit(frame(0, 2, 19));

        assert_eq!(coordinator.data(), published);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_listener_lifecycle_connects_and_disconnects() {
        let (coordinator, transport) = coordinator();
        let (listener, _) = counting_listener();

        let id = coordinator.add_listener(listener);
        // deferred, nothing happened yet
        assert_eq!(transport.count(Sent::Connect), 0);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(transport.count(Sent::Connect), 1);
        assert!(coordinator.connected());

        assert!(coordinator.remove_listener(id));
        assert_eq!(transport.count(Sent::Disconnect), 0);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(transport.count(Sent::Disconnect), 1);
        assert!(!coordinator.connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_first_and_last_listener_schedule_work() {
        let (coordinator, transport) = coordinator();
        let (first, _) = counting_listener();
        let (second, _) = counting_listener();

        let first = coordinator.add_listener(first);
        let second = coordinator.add_listener(second);
        tokio::time::sleep(Duration::from_secs(1)).await;

        coordinator.remove_listener(first);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(transport.count(Sent::Disconnect), 0);

        coordinator.remove_listener(second);
        assert!(!coordinator.remove_listener(second));
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(transport.count(Sent::Connect), 1);
        assert_eq!(transport.count(Sent::Disconnect), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_while_listening() {
        let (coordinator, transport) = coordinator();
        let (listener, _) = counting_listener();
        let id = coordinator.add_listener(listener);

        tokio::time::sleep(Duration::from_secs(11)).await;
        let polls = transport.count(Sent::RequestStats);
        assert!(polls >= 2, "expected at least two polls, got {polls}");

        coordinator.remove_listener(id);
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(transport.count(Sent::RequestStats), polls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_polls_survive_poll_timeout() {
        let (coordinator, transport) = coordinator();
        let (listener, _) = counting_listener();
        let _id = coordinator.add_listener(listener);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(coordinator.connected());

        // the first scheduled poll hangs past the poll timeout
        transport.set_call_delay(Duration::from_secs(20));
        tokio::time::sleep(Duration::from_secs(16)).await;
        assert!(!coordinator.last_update_success());
        assert_eq!(transport.count(Sent::RequestStats), 0);

        transport.set_call_delay(Duration::ZERO);
        tokio::time::sleep(Duration::from_secs(23)).await;

        let polls = transport.count(Sent::RequestStats);
        assert!(polls >= 3, "expected polling to resume, got {polls} polls");
        assert!(coordinator.last_update_success());
        assert!(coordinator.connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_returns_unchanged_snapshot() {
        let (coordinator, transport) = coordinator();
        coordinator.device().connect().await;
        transport.emit(frame(1, 1, 7));

        let status = coordinator.refresh().await.unwrap();

        assert_eq!(status, coordinator.data());
        assert_eq!(status.status_timestamp, 7);
        assert_eq!(transport.count(Sent::RequestStats), 1);
        assert!(coordinator.last_update_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_timeout_keeps_previous_status() {
        let (coordinator, transport) = coordinator();
        coordinator.device().connect().await;
        transport.emit(frame(1, 1, 7));
        let before = coordinator.data();

        transport.set_call_delay(Duration::from_secs(20));
        let result = coordinator.refresh().await;

        assert!(matches!(
            result,
            Err(WalkingPadError::Timeout { timeout_ms: 11_000 })
        ));
        assert_eq!(coordinator.data(), before);
        assert!(!coordinator.last_update_success());

        // the abandoned poll still completes, and the next one succeeds
        transport.set_call_delay(Duration::ZERO);
        assert!(coordinator.refresh().await.is_ok());
        assert_eq!(transport.count(Sent::RequestStats), 2);
        assert!(coordinator.last_update_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_renotifies_listeners() {
        let (coordinator, transport) = coordinator();
        let (listener, count) = counting_listener();
        coordinator.add_listener(listener);
        tokio::time::sleep(Duration::from_secs(1)).await;

        transport.emit(frame(1, 1, 1));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        transport.fail_commands(true);
        coordinator.device().start_belt().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!coordinator.connected());
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(coordinator.data().status_timestamp, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_coordinator_unsubscribes() {
        let (coordinator, transport) = coordinator();
        let device = Arc::clone(coordinator.device());
        device.connect().await;
        drop(coordinator);

        // no coordinator left to accept the frame
        transport.emit(frame(1, 1, 1));
        assert!(device.connected());
    }
}
