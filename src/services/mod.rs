pub mod dispatch;
pub mod ingest;
pub mod matching;
pub mod registry;

pub use dispatch::{
    dispatch_channel, run_dispatch_worker, DispatchHandle, DispatchJob, DispatchOutcome,
    NotificationDispatcher,
};
pub use ingest::HeartbeatIngest;
pub use matching::ProximityMatcher;
pub use registry::DeviceRegistry;
