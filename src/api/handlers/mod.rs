pub mod heartbeat;
pub mod metrics;
pub mod register;
