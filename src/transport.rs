use crate::{
    error::Result,
    types::{DeviceInfo, RawStatus, WalkingPadMode},
};
use async_trait::async_trait;
use std::sync::Arc;

/// Sink for telemetry frames pushed by a transport
pub type FrameHandler = Arc<dyn Fn(RawStatus) + Send + Sync>;

/// Link to a single treadmill
///
/// The driver owns exactly one transport and only calls it while holding its
/// command lock, so implementations never see concurrent calls.
#[async_trait]
pub trait Transport: Send {
    /// Bring up the link and start delivering telemetry to `on_frame`
    async fn connect(&mut self, target: &DeviceInfo, on_frame: FrameHandler) -> Result<()>;

    /// Tear down the link
    async fn disconnect(&mut self) -> Result<()>;

    /// Ask the device to push a status frame
    async fn request_stats(&mut self) -> Result<()>;

    /// Start the belt
    async fn send_start(&mut self) -> Result<()>;

    /// Stop the belt
    async fn send_stop(&mut self) -> Result<()>;

    /// Set the belt speed in tenths of km/h
    async fn send_speed(&mut self, tenths: u8) -> Result<()>;

    /// Switch the operating mode
    async fn send_mode(&mut self, mode: WalkingPadMode) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod mock {
    use super::{FrameHandler, Transport};
    use crate::{
        error::{Result, WalkingPadError},
        types::{DeviceInfo, RawStatus, WalkingPadMode},
    };
    use async_trait::async_trait;
    use std::{
        sync::{
            atomic::{AtomicBool, AtomicUsize, Ordering},
            Arc, Mutex,
        },
        time::Duration,
    };

    /// Calls observed by the mock, in order
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Sent {
        Connect,
        Disconnect,
        RequestStats,
        Start,
        Stop,
        Speed(u8),
        Mode(WalkingPadMode),
    }

    #[derive(Default)]
    struct MockState {
        sent: Mutex<Vec<Sent>>,
        on_frame: Mutex<Option<FrameHandler>>,
        fail_connect: AtomicBool,
        fail_commands: AtomicBool,
        fail_disconnect: AtomicBool,
        call_delay_ms: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    /// Scriptable transport; clones share state
    #[derive(Clone, Default)]
    pub struct MockTransport {
        state: Arc<MockState>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn sent(&self) -> Vec<Sent> {
            self.state.sent.lock().unwrap().clone()
        }

        pub fn count(&self, call: Sent) -> usize {
            self.sent().iter().filter(|s| **s == call).count()
        }

        pub fn fail_connect(&self, fail: bool) {
            self.state.fail_connect.store(fail, Ordering::SeqCst);
        }

        pub fn fail_commands(&self, fail: bool) {
            self.state.fail_commands.store(fail, Ordering::SeqCst);
        }

        pub fn fail_disconnect(&self, fail: bool) {
            self.state.fail_disconnect.store(fail, Ordering::SeqCst);
        }

        pub fn set_call_delay(&self, delay: Duration) {
            let ms = usize::try_from(delay.as_millis()).unwrap();
            self.state.call_delay_ms.store(ms, Ordering::SeqCst);
        }

        pub fn max_in_flight(&self) -> usize {
            self.state.max_in_flight.load(Ordering::SeqCst)
        }

        /// Push a frame through the handler installed by the last connect
        pub fn emit(&self, raw: RawStatus) {
            let handler = self.state.on_frame.lock().unwrap().clone();
            if let Some(handler) = handler {
                handler(raw);
            }
        }

        async fn call(&self, sent: Sent, fail: &AtomicBool) -> Result<()> {
            let now = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.state.max_in_flight.fetch_max(now, Ordering::SeqCst);

            let delay = self.state.call_delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay as u64)).await;
            }

            self.state.sent.lock().unwrap().push(sent);
            self.state.in_flight.fetch_sub(1, Ordering::SeqCst);

            if fail.load(Ordering::SeqCst) {
                Err(WalkingPadError::ConnectionFailed(format!("{sent:?} failed")))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn connect(&mut self, _target: &DeviceInfo, on_frame: FrameHandler) -> Result<()> {
            *self.state.on_frame.lock().unwrap() = Some(on_frame);
            self.call(Sent::Connect, &self.state.fail_connect).await
        }

        async fn disconnect(&mut self) -> Result<()> {
            self.call(Sent::Disconnect, &self.state.fail_disconnect).await
        }

        async fn request_stats(&mut self) -> Result<()> {
            self.call(Sent::RequestStats, &self.state.fail_commands).await
        }

        async fn send_start(&mut self) -> Result<()> {
            self.call(Sent::Start, &self.state.fail_commands).await
        }

        async fn send_stop(&mut self) -> Result<()> {
            self.call(Sent::Stop, &self.state.fail_commands).await
        }

        async fn send_speed(&mut self, tenths: u8) -> Result<()> {
            self.call(Sent::Speed(tenths), &self.state.fail_commands).await
        }

        async fn send_mode(&mut self, mode: WalkingPadMode) -> Result<()> {
            self.call(Sent::Mode(mode), &self.state.fail_commands).await
        }
    }

    pub fn frame(belt_state: u8, manual_mode: u8, rtime: u64) -> RawStatus {
        RawStatus {
            belt_state,
            speed_tenths: 20,
            manual_mode,
            distance_raw: 1,
            time: 30,
            steps: 40,
            rtime,
        }
    }
}
