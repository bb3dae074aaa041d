// SPDX-License-Identifier: GPL-3.0-only
pub mod models;
pub mod progress;
pub mod sink;
pub mod coordinator;

pub use models::{
    JobOutcome, JobPhase, JobRequest, JobResult, JobStatus, OperationKind, PollPolicy,
    RemoteJobHandle, Slot, SlotParseError,
};
pub use progress::ProgressChannel;
pub use sink::CompletionSink;
pub use coordinator::JobCoordinator;
