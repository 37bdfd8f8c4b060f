pub mod device;
pub mod heartbeat;
pub mod offer;
pub mod push_event;

pub use device::*;
pub use heartbeat::*;
pub use offer::*;
pub use push_event::*;
