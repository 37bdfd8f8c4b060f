use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use super::ClientError;
use crate::geo;

/// One position sample from whatever produces fixes on this platform.
#[derive(Debug, Clone, Copy)]
pub struct LocationFix {
    pub lat: f64,
    pub lng: f64,
    pub accuracy: Option<f64>,
}

/// Seam between the scheduling policy and the platform's background
/// execution machinery: arm best-effort fix delivery, check whether it is
/// still armed, supply a fix on demand.
#[async_trait]
pub trait SchedulerDriver: Send + Sync {
    /// Start best-effort background fix delivery into `updates`. Calling
    /// again while already active is a no-op.
    async fn start_background_updates(
        &self,
        updates: mpsc::Sender<LocationFix>,
    ) -> Result<(), ClientError>;

    async fn background_updates_active(&self) -> bool;

    /// Last known or freshly acquired fix, `None` when no position is
    /// available right now.
    async fn acquire_fix(&self) -> Option<LocationFix>;
}

/// Driver that walks a bearing at a steady pace, for the demo agent and for
/// exercising the engine without a real location stack.
pub struct SimulatedDriver {
    position: Arc<Mutex<(f64, f64)>>,
    bearing_deg: f64,
    speed_mps: f64,
    interval: Duration,
    active: Arc<AtomicBool>,
}

impl SimulatedDriver {
    pub fn new(
        start_lat: f64,
        start_lng: f64,
        bearing_deg: f64,
        speed_mps: f64,
        interval: Duration,
    ) -> Self {
        Self {
            position: Arc::new(Mutex::new((start_lat, start_lng))),
            bearing_deg,
            speed_mps,
            interval,
            active: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl SchedulerDriver for SimulatedDriver {
    async fn start_background_updates(
        &self,
        updates: mpsc::Sender<LocationFix>,
    ) -> Result<(), ClientError> {
        if self.active.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let position = self.position.clone();
        let active = self.active.clone();
        let bearing = self.bearing_deg;
        let speed = self.speed_mps;
        let interval = self.interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The immediate first tick would report the start position.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let fix = {
                    let mut pos = position.lock().await;
                    let mut rng = rand::thread_rng();
                    let wobble = rng.gen_range(-10.0..10.0);
                    let meters = speed * interval.as_secs_f64();
                    let next = step(pos.0, pos.1, bearing + wobble, meters);
                    *pos = next;
                    LocationFix {
                        lat: next.0,
                        lng: next.1,
                        accuracy: Some(rng.gen_range(6.0..14.0)),
                    }
                };
                if updates.send(fix).await.is_err() {
                    debug!("fix consumer gone, stopping simulated updates");
                    active.store(false, Ordering::SeqCst);
                    break;
                }
            }
        });
        Ok(())
    }

    async fn background_updates_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    async fn acquire_fix(&self) -> Option<LocationFix> {
        let pos = self.position.lock().await;
        Some(LocationFix {
            lat: pos.0,
            lng: pos.1,
            accuracy: Some(rand::thread_rng().gen_range(6.0..14.0)),
        })
    }
}

/// Move `meters` from a point along a compass bearing.
fn step(lat: f64, lng: f64, bearing_deg: f64, meters: f64) -> (f64, f64) {
    let meters_per_deg = geo::EARTH_RADIUS_M * PI / 180.0;
    let bearing = bearing_deg.to_radians();
    let dlat = meters * bearing.cos() / meters_per_deg;
    let cos_lat = lat.to_radians().cos().max(1e-6);
    let dlng = meters * bearing.sin() / (meters_per_deg * cos_lat);
    (lat + dlat, lng + dlng)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn simulated_driver_walks_at_the_configured_pace() {
        let driver = SimulatedDriver::new(42.88, -8.54, 0.0, 1.4, Duration::from_secs(60));
        let (tx, mut rx) = mpsc::channel(8);
        driver.start_background_updates(tx).await.unwrap();
        assert!(driver.background_updates_active().await);

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();

        // 1.4 m/s over 60 s is 84 m per fix, regardless of bearing wobble.
        let d1 = geo::haversine_meters(42.88, -8.54, first.lat, first.lng);
        assert!((83.0..85.0).contains(&d1), "first fix moved {d1}m");
        assert!(second.lat > first.lat, "bearing 0 walks north");

        let d2 = geo::haversine_meters(42.88, -8.54, second.lat, second.lng);
        assert!(d2 > d1, "keeps moving away from the start");
    }

    #[tokio::test]
    async fn acquire_fix_reports_the_current_position() {
        let driver = SimulatedDriver::new(42.88, -8.54, 90.0, 1.4, Duration::from_secs(60));
        let fix = driver.acquire_fix().await.unwrap();
        assert_eq!(fix.lat, 42.88);
        assert_eq!(fix.lng, -8.54);
        assert!(fix.accuracy.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_while_active_is_a_noop() {
        let driver = SimulatedDriver::new(42.88, -8.54, 0.0, 1.4, Duration::from_secs(60));
        let (tx, _rx) = mpsc::channel(8);
        driver.start_background_updates(tx.clone()).await.unwrap();
        driver.start_background_updates(tx).await.unwrap();
        assert!(driver.background_updates_active().await);
    }

    #[test]
    fn step_moves_the_requested_distance() {
        let (lat, lng) = step(42.88, -8.54, 45.0, 100.0);
        let moved = geo::haversine_meters(42.88, -8.54, lat, lng);
        assert!((moved - 100.0).abs() < 1.0, "moved {moved}m");
    }
}
