//! Control plane HTTP client.

mod control_plane;

pub use control_plane::{Command, ControlPlaneClient, FailOutcome, QueueJob, WorkerEvent};
