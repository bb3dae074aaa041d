// SPDX-License-Identifier: GPL-3.0-only

/// Errors returned by a remote executor.
///
/// The coordinator keeps polling on `Transient` and stops on anything else.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Bad parameters or unreachable endpoint. Never retried automatically.
    #[error("Job submission rejected: {0}")]
    Submission(String),

    #[error("Transient remote error: {0}")]
    Transient(String),

    #[error("Remote job failed: {0}")]
    Fatal(String),
}

impl RemoteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
