//! Client-side heartbeat scheduling: trigger sources, rate limiting and the
//! single-flight send gate. Everything here runs on the device/agent.

pub mod driver;
pub mod engine;
pub mod reason;
pub mod state;
pub mod transport;

use std::sync::Arc;

use thiserror::Error;

use crate::geo::CoordinateError;
use crate::models::HeartbeatResponse;

pub use driver::{LocationFix, SchedulerDriver, SimulatedDriver};
pub use engine::{
    BackgroundOutcome, EngineConfig, EngineSnapshot, HeartbeatEngine, SendOutcome, SkipReason,
};
pub use reason::TriggerReason;
pub use state::SchedulerState;
pub use transport::{HeartbeatTransport, HttpTransport};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid coordinates: {0}")]
    Coordinates(#[from] CoordinateError),
    #[error("heartbeat request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server rejected request ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("scheduler driver error: {0}")]
    Driver(String),
    #[error("heartbeat send interrupted")]
    Interrupted,
}

/// Outcome of one network send, shared with every forced trigger that joined
/// the in-flight attempt.
pub type SendResult = Result<HeartbeatResponse, Arc<ClientError>>;
