//! Run lifecycle: status vocabulary, events, the aggregate and multitask policy

mod aggregate;
mod events;
mod multitask;
mod status;

pub use aggregate::{NewRun, Run, RunSnapshot, DEFAULT_RECURSION_LIMIT};
pub use events::RunEvent;
pub use multitask::{MultitaskDecision, MultitaskStrategy};
pub use status::RunStatus;
