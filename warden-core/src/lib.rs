pub mod abstractions;
pub mod config;
pub mod consensus;
pub mod error;
pub mod failover;
pub mod observability;
pub mod role;
pub mod timer;
pub mod types;

// Recording collaborators for tests
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use error::{WardenError, WardenResult};
pub use types::{ActivityState, HaRole, NodeId};
