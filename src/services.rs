mod entity;
mod orchestrator;
pub mod readiness;

pub use entity::{Entity, STOP_GRACE_SECS, force_remove};
pub use orchestrator::{run, run_all};
pub use readiness::{CancelToken, ProbeTarget, WaitPolicy, wait_ready};
