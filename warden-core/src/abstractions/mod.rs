//! Trait abstractions over the operating system
//!
//! Components depend on these interfaces rather than on tokio time, child
//! processes or the reboot command directly, which keeps them testable.

pub mod process;
pub mod reboot;
pub mod time;

pub use process::*;
pub use reboot::*;
pub use time::*;
