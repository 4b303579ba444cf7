//! Audio output subsystem: per-device controllers, their worker threads,
//! and the aggregate the player talks to.

mod control;
mod multiple;
pub mod plugin;
mod source;
mod worker;

pub use control::{OutputClient, OutputControl, OutputListener, OutputStatus};
pub use multiple::MultipleOutputs;
pub use plugin::{Interrupter, NullOutput, OutputPlugin, PlayDelay};
pub use source::{OutputSource, SourceState};
