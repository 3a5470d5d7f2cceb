pub mod destination;
pub mod manager;
pub mod poller;
pub mod render;

pub use destination::{DestinationState, DestinationTarget, RelayTunables};
pub use manager::{PageValidity, RelayManager};
pub use poller::SourcePoller;
