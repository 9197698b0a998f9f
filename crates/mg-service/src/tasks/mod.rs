//! Background tasks.
//!
//! Every task runs an interval loop under a `CancellationToken` and exits
//! cleanly at shutdown, completing its current iteration first.

mod artifact_sweeper;
mod session_sweeper;

pub use artifact_sweeper::start_artifact_sweeper;
pub use artifact_sweeper::DEFAULT_SWEEP_INTERVAL as ARTIFACT_SWEEP_INTERVAL;
pub use session_sweeper::start_session_sweeper;
pub use session_sweeper::DEFAULT_SWEEP_INTERVAL as SESSION_SWEEP_INTERVAL;
