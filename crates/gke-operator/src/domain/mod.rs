pub mod bridge;
pub mod control_plane;
pub mod coordinator;
pub mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod pod;
pub mod poller;
pub mod request;
pub mod triggers;
