// SPDX-License-Identifier: GPL-3.0-only
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

use crate::job::models::JobStatus;

type Subscriber = mpsc::UnboundedSender<JobStatus>;

/// Best-effort delivery of job statuses to at most one subscriber.
///
/// Publishing never blocks: statuses go through an unbounded channel, so the
/// subscriber sees them in production order. With no subscriber attached the
/// status is dropped.
#[derive(Clone, Default)]
pub struct ProgressChannel {
    subscriber: Arc<Mutex<Option<Subscriber>>>,
}

impl ProgressChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Subscriber>> {
        self.subscriber.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn publish(&self, status: JobStatus) {
        let mut subscriber = self.lock();
        if let Some(tx) = subscriber.as_ref() {
            if tx.send(status).is_err() {
                // Receiver went away
                *subscriber = None;
            }
        }
    }

    /// Attach a new subscriber, replacing the current one.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<JobStatus> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribe_with(tx);
        rx
    }

    pub fn subscribe_with(&self, tx: mpsc::UnboundedSender<JobStatus>) {
        *self.lock() = Some(tx);
    }

    pub fn has_subscriber(&self) -> bool {
        self.lock().as_ref().is_some_and(|tx| !tx.is_closed())
    }
}
