use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::driver::{LocationFix, SchedulerDriver};
use super::reason::TriggerReason;
use super::state::{InFlightSend, SchedulerState};
use super::transport::HeartbeatTransport;
use super::{ClientError, SendResult};
use crate::geo;
use crate::models::{HeartbeatRequest, HeartbeatResponse};

/// Timing and movement thresholds for one device's scheduler.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub device_id: String,
    pub interests: Vec<String>,
    /// Minimum gap between non-forced sends.
    pub min_gap: Duration,
    /// Movement that overrides the minimum gap.
    pub movement_override_m: f64,
    pub booster_min_gap: Duration,
    pub booster_move_m: f64,
    pub loop_interval: Duration,
    pub watchdog_poll: Duration,
    /// Heartbeat age past which the watchdog forces a recovery send.
    pub watchdog_stale: Duration,
}

impl EngineConfig {
    pub fn for_device(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            interests: Vec::new(),
            min_gap: Duration::from_secs(55),
            movement_override_m: 25.0,
            booster_min_gap: Duration::from_secs(45),
            booster_move_m: 60.0,
            loop_interval: Duration::from_secs(45),
            watchdog_poll: Duration::from_secs(30),
            watchdog_stale: Duration::from_secs(180),
        }
    }
}

#[derive(Debug, Clone)]
pub enum SkipReason {
    /// Last success is too recent and the device has not moved enough.
    RateLimited { age: Duration, moved_m: Option<f64> },
    /// Another send is outstanding; carries its reason for diagnostics.
    InFlight(TriggerReason),
    /// No position is available right now.
    NoFix,
}

#[derive(Debug)]
pub enum SendOutcome {
    Sent(HeartbeatResponse),
    Skipped(SkipReason),
    Failed(Arc<ClientError>),
}

impl SendOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, SendOutcome::Sent(_))
    }
}

/// What one background fix produced: the regular attempt, plus a booster
/// attempt when displacement warranted one.
#[derive(Debug)]
pub struct BackgroundOutcome {
    pub heartbeat: SendOutcome,
    pub booster: Option<SendOutcome>,
}

#[derive(Debug, Clone)]
pub struct EngineSnapshot {
    pub heartbeat_age: Option<Duration>,
    pub intervals: Vec<Duration>,
    pub in_flight: Option<TriggerReason>,
}

/// Owns all client-side timing decisions and guarantees at most one
/// heartbeat network call in flight, whatever the trigger sources do.
pub struct HeartbeatEngine {
    transport: Arc<dyn HeartbeatTransport>,
    driver: Arc<dyn SchedulerDriver>,
    config: EngineConfig,
    state: Arc<Mutex<SchedulerState>>,
    updates_tx: mpsc::Sender<LocationFix>,
    updates_rx: Mutex<Option<mpsc::Receiver<LocationFix>>>,
}

impl HeartbeatEngine {
    pub fn new(
        transport: Arc<dyn HeartbeatTransport>,
        driver: Arc<dyn SchedulerDriver>,
        config: EngineConfig,
    ) -> Self {
        let (updates_tx, updates_rx) = mpsc::channel(16);
        Self {
            transport,
            driver,
            config,
            state: Arc::new(Mutex::new(SchedulerState::new())),
            updates_tx,
            updates_rx: Mutex::new(Some(updates_rx)),
        }
    }

    /// Acquire a fix and attempt a send right away. Used by manual and
    /// startup triggers.
    pub async fn send_now(&self, reason: TriggerReason) -> SendOutcome {
        self.attempt(reason, None).await
    }

    /// One send attempt from any trigger source: resolve a fix, run the
    /// coordinate guard, apply rate limiting, then pass the single-flight
    /// gate.
    pub async fn attempt(&self, reason: TriggerReason, fix: Option<LocationFix>) -> SendOutcome {
        let fix = match fix {
            Some(fix) => fix,
            None => match self.driver.acquire_fix().await {
                Some(fix) => fix,
                None => {
                    debug!(%reason, "no fix available");
                    return SendOutcome::Skipped(SkipReason::NoFix);
                }
            },
        };

        let coords = match geo::check_coordinates(fix.lat, fix.lng) {
            Ok(coords) => coords,
            Err(e) => {
                warn!(%reason, lat = fix.lat, lng = fix.lng, "rejecting sample: {}", e);
                return SendOutcome::Failed(Arc::new(ClientError::Coordinates(e)));
            }
        };
        if coords.swapped {
            warn!(%reason, "repaired transposed coordinates before send");
        }

        let now = Instant::now();
        let result_rx = {
            let mut state = self.state.lock().await;

            if let Some(skip) = should_skip(&state, &self.config, reason, now, coords.lat, coords.lng)
            {
                debug!(%reason, ?skip, "skipping heartbeat");
                return SendOutcome::Skipped(skip);
            }

            if let Some(in_flight) = &state.in_flight {
                if reason.is_forced() {
                    debug!(%reason, in_flight = %in_flight.reason, "joining in-flight send");
                    let rx = in_flight.result.clone();
                    drop(state);
                    return await_result(rx).await;
                }
                debug!(%reason, in_flight = %in_flight.reason, "send already in flight, skipping");
                return SendOutcome::Skipped(SkipReason::InFlight(in_flight.reason));
            }

            let (tx, rx) = watch::channel(None);
            state.in_flight = Some(InFlightSend {
                reason,
                result: rx.clone(),
            });
            self.spawn_send(reason, coords.lat, coords.lng, fix.accuracy, tx);
            rx
        };

        await_result(result_rx).await
    }

    /// Background fix entry point: the regular rate-limited attempt, then
    /// the movement booster when displacement since the last booster fire
    /// crosses the threshold.
    pub async fn handle_background_fix(&self, fix: LocationFix) -> BackgroundOutcome {
        let heartbeat = self.attempt(TriggerReason::BgLocation, Some(fix)).await;

        let booster_due = {
            let mut state = self.state.lock().await;
            let now = Instant::now();
            let gap_ok = state
                .last_booster_at
                .map_or(true, |at| now.duration_since(at) >= self.config.booster_min_gap);
            let moved = state
                .booster_anchor
                .map(|(lat, lng)| geo::haversine_meters(lat, lng, fix.lat, fix.lng));
            let due = gap_ok && moved.map_or(false, |m| m >= self.config.booster_move_m);
            if due {
                state.last_booster_at = Some(now);
                state.booster_anchor = Some((fix.lat, fix.lng));
                info!(moved_m = moved.unwrap_or(0.0).round(), "movement booster fired");
            } else if state.booster_anchor.is_none() {
                state.booster_anchor = Some((fix.lat, fix.lng));
            }
            due
        };

        let booster = if booster_due {
            Some(self.attempt(TriggerReason::Booster, Some(fix)).await)
        } else {
            None
        };

        BackgroundOutcome { heartbeat, booster }
    }

    /// One watchdog pass: re-arm background collection if it stopped, then
    /// force a heartbeat when the last success is stale. Returns the send
    /// outcome when a recovery send was attempted.
    pub async fn watchdog_pass(&self) -> Option<SendOutcome> {
        if !self.driver.background_updates_active().await {
            info!("background updates stopped, re-arming");
            if let Err(e) = self
                .driver
                .start_background_updates(self.updates_tx.clone())
                .await
            {
                warn!("failed to re-arm background updates: {}", e);
            }
        }

        let age = {
            let state = self.state.lock().await;
            state.heartbeat_age(Instant::now())
        };
        let stale = age.map_or(true, |a| a >= self.config.watchdog_stale);
        if !stale {
            debug!(age_sec = age.map(|a| a.as_secs()), "heartbeat fresh, watchdog idle");
            return None;
        }

        info!(
            age_sec = age.map(|a| a.as_secs()),
            "stale heartbeat, forcing recovery send"
        );
        Some(self.attempt(TriggerReason::WatchdogRecovery, None).await)
    }

    /// Arm the driver and consume its background fixes. Runs until the
    /// process shuts down.
    pub async fn run_background(&self) -> Result<(), ClientError> {
        let mut rx = {
            let mut slot = self.updates_rx.lock().await;
            slot.take()
                .ok_or_else(|| ClientError::Driver("background consumer already running".into()))?
        };
        self.driver
            .start_background_updates(self.updates_tx.clone())
            .await?;
        info!("background fix consumer started");
        while let Some(fix) = rx.recv().await {
            self.handle_background_fix(fix).await;
        }
        info!("background fix consumer stopped");
        Ok(())
    }

    /// Foreground timer: one attempt immediately, then one per interval.
    pub async fn run_foreground_loop(&self) {
        let mut ticker = tokio::time::interval(self.config.loop_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            interval_sec = self.config.loop_interval.as_secs(),
            "foreground loop started"
        );
        loop {
            ticker.tick().await;
            let outcome = self.attempt(TriggerReason::ForegroundLoop, None).await;
            debug!(?outcome, "foreground tick");
        }
    }

    pub async fn run_watchdog(&self) {
        let mut ticker = tokio::time::interval(self.config.watchdog_poll);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The interval fires immediately; the first pass waits a full period.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            self.watchdog_pass().await;
        }
    }

    pub async fn snapshot(&self) -> EngineSnapshot {
        let state = self.state.lock().await;
        EngineSnapshot {
            heartbeat_age: state.heartbeat_age(Instant::now()),
            intervals: state.intervals.iter().copied().collect(),
            in_flight: state.in_flight.as_ref().map(|f| f.reason),
        }
    }

    /// Start the network call on a detached task. A dropped caller must not
    /// cancel the send, and the in-flight marker has to clear on every
    /// completion path.
    fn spawn_send(
        &self,
        reason: TriggerReason,
        lat: f64,
        lng: f64,
        accuracy: Option<f64>,
        result_tx: watch::Sender<Option<SendResult>>,
    ) {
        let request = HeartbeatRequest {
            device_id: self.config.device_id.clone(),
            lat,
            lng,
            accuracy: accuracy.filter(|a| a.is_finite() && *a >= 0.0),
            ts: Some(Utc::now()),
            interests: if self.config.interests.is_empty() {
                None
            } else {
                Some(self.config.interests.clone())
            },
            battery: None,
            power_state: None,
            source: Some(reason.as_str().to_string()),
        };
        let transport = self.transport.clone();
        let state = self.state.clone();

        tokio::spawn(async move {
            // The guard reopens the gate even if the transport unwinds.
            let mut guard = InFlightGuard::new(state.clone());
            let started = Instant::now();
            let result: SendResult = match transport.send_heartbeat(&request).await {
                Ok(ack) => {
                    let mut state = state.lock().await;
                    state.record_success(Instant::now(), request.lat, request.lng);
                    state.in_flight = None;
                    info!(
                        %reason,
                        latency_ms = started.elapsed().as_millis() as u64,
                        offers = ack.offers.len(),
                        "heartbeat ok"
                    );
                    Ok(ack)
                }
                Err(e) => {
                    let mut state = state.lock().await;
                    state.in_flight = None;
                    warn!(%reason, "heartbeat failed: {}", e);
                    Err(Arc::new(e))
                }
            };
            guard.disarm();
            let _ = result_tx.send(Some(result));
        });
    }
}

/// Backstop for the single-flight marker: cleared inline on the success
/// and failure paths, but a panic inside the transport would otherwise
/// leave the marker set and the gate closed for good.
struct InFlightGuard {
    state: Arc<Mutex<SchedulerState>>,
    armed: bool,
}

impl InFlightGuard {
    fn new(state: Arc<Mutex<SchedulerState>>) -> Self {
        Self { state, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match self.state.try_lock() {
            Ok(mut state) => state.in_flight = None,
            Err(_) => {
                let state = Arc::clone(&self.state);
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    handle.spawn(async move {
                        state.lock().await.in_flight = None;
                    });
                }
            }
        }
    }
}

fn should_skip(
    state: &SchedulerState,
    config: &EngineConfig,
    reason: TriggerReason,
    now: Instant,
    lat: f64,
    lng: f64,
) -> Option<SkipReason> {
    if reason.is_forced() {
        return None;
    }
    // A device that never sent successfully always proceeds.
    let age = state.heartbeat_age(now)?;
    if age >= config.min_gap {
        return None;
    }
    match state.last_sent {
        Some((sent_lat, sent_lng)) => {
            let moved = geo::haversine_meters(sent_lat, sent_lng, lat, lng);
            if moved >= config.movement_override_m {
                // Real movement overrides the time-based dedupe.
                None
            } else {
                Some(SkipReason::RateLimited {
                    age,
                    moved_m: Some(moved),
                })
            }
        }
        None => Some(SkipReason::RateLimited { age, moved_m: None }),
    }
}

async fn await_result(mut rx: watch::Receiver<Option<SendResult>>) -> SendOutcome {
    loop {
        if let Some(result) = rx.borrow_and_update().clone() {
            return match result {
                Ok(ack) => SendOutcome::Sent(ack),
                Err(e) => SendOutcome::Failed(e),
            };
        }
        if rx.changed().await.is_err() {
            return SendOutcome::Failed(Arc::new(ClientError::Interrupted));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RegisterDeviceRequest, RegisterDeviceResponse};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use uuid::Uuid;

    const START: (f64, f64) = (42.88, -8.54);

    fn fix(lat: f64, lng: f64) -> LocationFix {
        LocationFix {
            lat,
            lng,
            accuracy: Some(10.0),
        }
    }

    /// A fix `meters` north of START.
    fn offset_m(meters: f64) -> LocationFix {
        fix(START.0 + meters / 111_195.0, START.1)
    }

    struct FakeTransport {
        delay: Duration,
        fail: AtomicBool,
        panic_once: AtomicBool,
        sources: StdMutex<Vec<String>>,
        coords: StdMutex<Vec<(f64, f64)>>,
    }

    impl FakeTransport {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                fail: AtomicBool::new(false),
                panic_once: AtomicBool::new(false),
                sources: StdMutex::new(Vec::new()),
                coords: StdMutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<String> {
            self.sources.lock().unwrap().clone()
        }

        fn sent_coords(&self) -> Vec<(f64, f64)> {
            self.coords.lock().unwrap().clone()
        }

        fn set_fail(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        fn set_panic_once(&self) {
            self.panic_once.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl HeartbeatTransport for FakeTransport {
        async fn register_device(
            &self,
            _req: &RegisterDeviceRequest,
        ) -> Result<RegisterDeviceResponse, ClientError> {
            unimplemented!("the engine never registers")
        }

        async fn send_heartbeat(
            &self,
            req: &HeartbeatRequest,
        ) -> Result<HeartbeatResponse, ClientError> {
            self.sources
                .lock()
                .unwrap()
                .push(req.source.clone().unwrap_or_default());
            self.coords.lock().unwrap().push((req.lat, req.lng));
            if self.panic_once.swap(false, Ordering::SeqCst) {
                panic!("transport died mid-send");
            }
            tokio::time::sleep(self.delay).await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(ClientError::Api {
                    status: 500,
                    message: "boom".into(),
                });
            }
            Ok(HeartbeatResponse {
                ok: true,
                next_poll_sec: 60,
                saved_id: Uuid::new_v4(),
                offers: vec![],
            })
        }
    }

    struct FakeDriver {
        position: StdMutex<(f64, f64)>,
        active: AtomicBool,
        starts: AtomicUsize,
    }

    impl FakeDriver {
        fn at(lat: f64, lng: f64) -> Arc<Self> {
            Arc::new(Self {
                position: StdMutex::new((lat, lng)),
                active: AtomicBool::new(true),
                starts: AtomicUsize::new(0),
            })
        }

        fn set_active(&self, active: bool) {
            self.active.store(active, Ordering::SeqCst);
        }

        fn starts(&self) -> usize {
            self.starts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SchedulerDriver for FakeDriver {
        async fn start_background_updates(
            &self,
            _updates: mpsc::Sender<LocationFix>,
        ) -> Result<(), ClientError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.active.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn background_updates_active(&self) -> bool {
            self.active.load(Ordering::SeqCst)
        }

        async fn acquire_fix(&self) -> Option<LocationFix> {
            let pos = self.position.lock().unwrap();
            Some(fix(pos.0, pos.1))
        }
    }

    fn engine_with(transport: Arc<FakeTransport>, driver: Arc<FakeDriver>) -> HeartbeatEngine {
        HeartbeatEngine::new(transport, driver, EngineConfig::for_device("TRB-test0001"))
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_attempts_collapse_to_one_send() {
        let transport = FakeTransport::new(Duration::from_secs(1));
        let driver = FakeDriver::at(START.0, START.1);
        let engine = Arc::new(engine_with(transport.clone(), driver));

        let first = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .attempt(TriggerReason::BgLocation, Some(fix(START.0, START.1)))
                    .await
            })
        };
        tokio::task::yield_now().await;

        for _ in 0..3 {
            let outcome = engine
                .attempt(TriggerReason::ForegroundLoop, Some(fix(START.0, START.1)))
                .await;
            assert!(matches!(
                outcome,
                SendOutcome::Skipped(SkipReason::InFlight(TriggerReason::BgLocation))
            ));
        }

        assert!(first.await.unwrap().is_sent());
        assert_eq!(transport.sent(), vec!["bg-location".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn forced_trigger_joins_in_flight_send() {
        let transport = FakeTransport::new(Duration::from_secs(1));
        let driver = FakeDriver::at(START.0, START.1);
        let engine = Arc::new(engine_with(transport.clone(), driver));

        let first = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .attempt(TriggerReason::BgLocation, Some(fix(START.0, START.1)))
                    .await
            })
        };
        tokio::task::yield_now().await;

        let joined = engine.send_now(TriggerReason::Manual).await;
        assert!(joined.is_sent());
        assert!(first.await.unwrap().is_sent());
        // One network call served both triggers.
        assert_eq!(transport.sent(), vec!["bg-location".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn min_gap_skips_then_allows() {
        let transport = FakeTransport::new(Duration::ZERO);
        let driver = FakeDriver::at(START.0, START.1);
        let engine = engine_with(transport.clone(), driver);

        assert!(engine.send_now(TriggerReason::Init).await.is_sent());

        tokio::time::advance(Duration::from_secs(10)).await;
        let outcome = engine
            .attempt(TriggerReason::BgLocation, Some(fix(START.0, START.1)))
            .await;
        assert!(matches!(
            outcome,
            SendOutcome::Skipped(SkipReason::RateLimited { .. })
        ));

        tokio::time::advance(Duration::from_secs(50)).await;
        let outcome = engine
            .attempt(TriggerReason::BgLocation, Some(fix(START.0, START.1)))
            .await;
        assert!(outcome.is_sent());
        assert_eq!(transport.sent().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn movement_overrides_min_gap() {
        let transport = FakeTransport::new(Duration::ZERO);
        let driver = FakeDriver::at(START.0, START.1);
        let engine = engine_with(transport.clone(), driver);

        assert!(engine.send_now(TriggerReason::Init).await.is_sent());

        tokio::time::advance(Duration::from_secs(10)).await;
        let outcome = engine
            .attempt(TriggerReason::BgLocation, Some(offset_m(30.0)))
            .await;
        assert!(outcome.is_sent(), "30m of movement beats the 55s gap");
        assert_eq!(transport.sent().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn forced_reason_bypasses_min_gap() {
        let transport = FakeTransport::new(Duration::ZERO);
        let driver = FakeDriver::at(START.0, START.1);
        let engine = engine_with(transport.clone(), driver);

        assert!(engine.send_now(TriggerReason::Init).await.is_sent());
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(engine.send_now(TriggerReason::Manual).await.is_sent());
        assert_eq!(transport.sent().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_leaves_state_unchanged_for_retry() {
        let transport = FakeTransport::new(Duration::ZERO);
        transport.set_fail(true);
        let driver = FakeDriver::at(START.0, START.1);
        let engine = engine_with(transport.clone(), driver);

        let outcome = engine.send_now(TriggerReason::Manual).await;
        assert!(matches!(outcome, SendOutcome::Failed(_)));

        let snap = engine.snapshot().await;
        assert!(snap.heartbeat_age.is_none());
        assert!(snap.in_flight.is_none());

        // The next trigger retries immediately; no gap applies after failure.
        transport.set_fail(false);
        let outcome = engine
            .attempt(TriggerReason::BgLocation, Some(fix(START.0, START.1)))
            .await;
        assert!(outcome.is_sent());
        assert_eq!(transport.sent().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn send_task_panic_still_releases_the_gate() {
        let transport = FakeTransport::new(Duration::ZERO);
        transport.set_panic_once();
        let driver = FakeDriver::at(START.0, START.1);
        let engine = engine_with(transport.clone(), driver);

        // The send task dies mid-flight; the joining caller sees an
        // interrupted send, not a hang.
        let outcome = engine.send_now(TriggerReason::Manual).await;
        match outcome {
            SendOutcome::Failed(e) => assert!(matches!(*e, ClientError::Interrupted)),
            other => panic!("unexpected outcome: {other:?}"),
        }

        let snap = engine.snapshot().await;
        assert!(snap.in_flight.is_none());

        // The marker was cleared on unwind, so the next trigger sends
        // instead of reporting a heartbeat already in flight.
        let outcome = engine
            .attempt(TriggerReason::BgLocation, Some(fix(START.0, START.1)))
            .await;
        assert!(outcome.is_sent());
        assert_eq!(transport.sent().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn booster_fires_after_large_displacement() {
        let transport = FakeTransport::new(Duration::ZERO);
        // Keep sends failing so the min gap never engages.
        transport.set_fail(true);
        let driver = FakeDriver::at(START.0, START.1);
        let engine = engine_with(transport.clone(), driver);

        let first = engine.handle_background_fix(fix(START.0, START.1)).await;
        assert!(first.booster.is_none(), "first fix only sets the anchor");

        tokio::time::advance(Duration::from_secs(50)).await;
        let second = engine.handle_background_fix(offset_m(70.0)).await;
        assert!(second.booster.is_some(), "70m from the anchor boosts");

        assert_eq!(transport.sent(), vec!["bg-location", "bg-location", "booster"]);
    }

    #[tokio::test(start_paused = true)]
    async fn booster_respects_its_own_gap() {
        let transport = FakeTransport::new(Duration::ZERO);
        transport.set_fail(true);
        let driver = FakeDriver::at(START.0, START.1);
        let engine = engine_with(transport.clone(), driver);

        engine.handle_background_fix(fix(START.0, START.1)).await;
        tokio::time::advance(Duration::from_secs(50)).await;
        let fired = engine.handle_background_fix(offset_m(70.0)).await;
        assert!(fired.booster.is_some());

        // Another large jump 10s later is inside the booster gap.
        tokio::time::advance(Duration::from_secs(10)).await;
        let blocked = engine.handle_background_fix(offset_m(140.0)).await;
        assert!(blocked.booster.is_none());

        // Once the gap has passed, displacement from the anchor counts again.
        tokio::time::advance(Duration::from_secs(45)).await;
        let again = engine.handle_background_fix(offset_m(210.0)).await;
        assert!(again.booster.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn small_displacement_never_boosts() {
        let transport = FakeTransport::new(Duration::ZERO);
        transport.set_fail(true);
        let driver = FakeDriver::at(START.0, START.1);
        let engine = engine_with(transport.clone(), driver);

        engine.handle_background_fix(fix(START.0, START.1)).await;
        tokio::time::advance(Duration::from_secs(50)).await;
        let outcome = engine.handle_background_fix(offset_m(40.0)).await;
        assert!(outcome.booster.is_none(), "40m is under the 60m threshold");
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_forces_send_only_when_stale() {
        let transport = FakeTransport::new(Duration::ZERO);
        let driver = FakeDriver::at(START.0, START.1);
        let engine = engine_with(transport.clone(), driver);

        assert!(engine.send_now(TriggerReason::Init).await.is_sent());

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(engine.watchdog_pass().await.is_none(), "60s old is fresh");

        tokio::time::advance(Duration::from_secs(150)).await;
        let outcome = engine.watchdog_pass().await;
        assert!(matches!(outcome, Some(SendOutcome::Sent(_))));
        assert_eq!(transport.sent(), vec!["init", "watchdog-recovery"]);
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_rearms_stopped_background_updates() {
        let transport = FakeTransport::new(Duration::ZERO);
        let driver = FakeDriver::at(START.0, START.1);
        driver.set_active(false);
        let engine = engine_with(transport.clone(), driver.clone());

        engine.watchdog_pass().await;
        assert!(driver.background_updates_active().await);
        assert_eq!(driver.starts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn foreground_loop_ticks_on_cadence() {
        let transport = FakeTransport::new(Duration::ZERO);
        let driver = FakeDriver::at(START.0, START.1);
        let engine = Arc::new(engine_with(transport.clone(), driver));

        let looper = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run_foreground_loop().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(transport.sent(), vec!["fg-loop"]);

        // The 45s tick lands inside the 55s min gap with no movement.
        tokio::time::sleep(Duration::from_secs(45)).await;
        assert_eq!(transport.sent().len(), 1);

        // By the next tick the last success is 90s old.
        tokio::time::sleep(Duration::from_secs(45)).await;
        assert_eq!(transport.sent().len(), 2);

        looper.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn successful_sends_accumulate_interval_history() {
        let transport = FakeTransport::new(Duration::ZERO);
        let driver = FakeDriver::at(START.0, START.1);
        let engine = engine_with(transport.clone(), driver);

        assert!(engine.send_now(TriggerReason::Init).await.is_sent());
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(engine.send_now(TriggerReason::Manual).await.is_sent());
        tokio::time::advance(Duration::from_secs(90)).await;
        assert!(engine.send_now(TriggerReason::Manual).await.is_sent());

        let snap = engine.snapshot().await;
        assert_eq!(
            snap.intervals,
            vec![Duration::from_secs(60), Duration::from_secs(90)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unrepairable_coordinates_fail_without_sending() {
        let transport = FakeTransport::new(Duration::ZERO);
        let driver = FakeDriver::at(START.0, START.1);
        let engine = engine_with(transport.clone(), driver);

        let outcome = engine
            .attempt(TriggerReason::Manual, Some(fix(200.0, 400.0)))
            .await;
        match outcome {
            SendOutcome::Failed(e) => assert!(matches!(*e, ClientError::Coordinates(_))),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(transport.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn transposed_coordinates_are_repaired_before_send() {
        let transport = FakeTransport::new(Duration::ZERO);
        let driver = FakeDriver::at(START.0, START.1);
        let engine = engine_with(transport.clone(), driver);

        let outcome = engine
            .attempt(TriggerReason::Manual, Some(fix(95.0, 40.4)))
            .await;
        assert!(outcome.is_sent());
        assert_eq!(transport.sent_coords(), vec![(40.4, 95.0)]);
    }
}
