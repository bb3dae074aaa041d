// SPDX-License-Identifier: GPL-3.0-only
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::job::models::{JobOutcome, JobPhase, JobRequest, JobResult, JobStatus, PollPolicy, RemoteJobHandle, Slot};
use crate::job::progress::ProgressChannel;
use crate::job::sink::CompletionSink;
use crate::remote::{RemoteError, RemoteExecutor};

/// The job currently owning a slot. Replaced as a whole, never mutated.
#[derive(Clone)]
struct ActiveJob {
    generation: u64,
    token: CancellationToken,
    progress: ProgressChannel,
}

type SlotTable = Arc<Mutex<HashMap<Slot, ActiveJob>>>;

fn lock_slots(slots: &SlotTable) -> MutexGuard<'_, HashMap<Slot, ActiveJob>> {
    slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Runs remote jobs, one per slot at a time.
///
/// Starting a job in a busy slot cancels the job already there before the
/// new one is submitted. Every started job reports exactly one outcome to
/// its completion sink.
pub struct JobCoordinator {
    executor: Arc<dyn RemoteExecutor>,
    policy: PollPolicy,
    slots: SlotTable,
    next_generation: AtomicU64,
}

impl JobCoordinator {
    pub fn new(executor: Arc<dyn RemoteExecutor>, policy: PollPolicy) -> Self {
        Self {
            executor,
            policy,
            slots: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Start a job in `slot`, superseding whatever runs there.
    ///
    /// Returns the generation number identifying the job in logs.
    pub fn start_job(
        &self,
        slot: Slot,
        request: JobRequest,
        progress: Option<mpsc::UnboundedSender<JobStatus>>,
        sink: Box<dyn CompletionSink>,
    ) -> u64 {
        let token = CancellationToken::new();
        let channel = ProgressChannel::new();
        if let Some(tx) = progress {
            channel.subscribe_with(tx);
        }

        let generation = {
            let mut slots = lock_slots(&self.slots);
            let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
            let active = ActiveJob {
                generation,
                token: token.clone(),
                progress: channel.clone(),
            };
            if let Some(previous) = slots.insert(slot, active) {
                info!(%slot, superseded = previous.generation, generation, "Superseding active job");
                previous.token.cancel();
            }
            generation
        };

        let run = JobRun {
            slot,
            generation,
            request,
            token,
            progress: channel,
            executor: Arc::clone(&self.executor),
            policy: self.policy.clone(),
            slots: Arc::clone(&self.slots),
        };
        tokio::spawn(run.execute(sink));

        generation
    }

    /// Request cancellation of the job in `slot`. No-op when the slot is idle.
    pub fn cancel_job(&self, slot: Slot) {
        let slots = lock_slots(&self.slots);
        match slots.get(&slot) {
            Some(active) => {
                info!(%slot, generation = active.generation, "Cancellation requested");
                active.token.cancel();
            }
            None => debug!(%slot, "Cancel requested for idle slot"),
        }
    }

    pub fn cancel_all(&self) {
        let slots = lock_slots(&self.slots);
        for (slot, active) in slots.iter() {
            info!(%slot, generation = active.generation, "Cancelling job for shutdown");
            active.token.cancel();
        }
    }

    /// Attach a progress subscriber to the job running in `slot`.
    pub fn subscribe(&self, slot: Slot) -> Option<mpsc::UnboundedReceiver<JobStatus>> {
        lock_slots(&self.slots).get(&slot).map(|active| active.progress.subscribe())
    }

    pub fn is_active(&self, slot: Slot) -> bool {
        lock_slots(&self.slots).contains_key(&slot)
    }

    pub fn active_generation(&self, slot: Slot) -> Option<u64> {
        lock_slots(&self.slots).get(&slot).map(|active| active.generation)
    }
}

/// State captured at job start, owned by the job's task
struct JobRun {
    slot: Slot,
    generation: u64,
    request: JobRequest,
    token: CancellationToken,
    progress: ProgressChannel,
    executor: Arc<dyn RemoteExecutor>,
    policy: PollPolicy,
    slots: SlotTable,
}

impl JobRun {
    async fn execute(self, sink: Box<dyn CompletionSink>) {
        let (outcome, final_status) = self.drive().await;

        // Last look at the token: a result that raced with cancellation is discarded
        let (outcome, final_status) = match outcome {
            JobOutcome::Cancelled => (outcome, final_status),
            _ if self.token.is_cancelled() => {
                info!(slot = %self.slot, generation = self.generation, "Discarding result of cancelled job");
                (JobOutcome::Cancelled, JobStatus::cancelled())
            }
            _ => (outcome, final_status),
        };

        self.progress.publish(final_status);
        self.release_slot();

        match &outcome {
            JobOutcome::Succeeded(result) => {
                info!(slot = %self.slot, generation = self.generation, job_id = %result.job_id, "Job succeeded")
            }
            JobOutcome::Failed(detail) => {
                warn!(slot = %self.slot, generation = self.generation, error = %detail, "Job failed")
            }
            JobOutcome::Cancelled => info!(slot = %self.slot, generation = self.generation, "Job cancelled"),
        }

        sink.complete(outcome);
    }

    /// Submit and poll until a terminal outcome. The terminal status is
    /// returned rather than published so it goes out exactly once.
    async fn drive(&self) -> (JobOutcome, JobStatus) {
        if self.token.is_cancelled() {
            return cancelled();
        }

        debug!(slot = %self.slot, generation = self.generation, operation = ?self.request.operation, "Submitting job");
        let handle = match self.executor.submit(&self.request).await {
            Ok(handle) => handle,
            Err(e) => return failed(e.to_string()),
        };

        if self.token.is_cancelled() {
            return cancelled();
        }

        info!(slot = %self.slot, generation = self.generation, job_id = %handle.job_id, "Job submitted");
        self.progress.publish(JobStatus::pending(format!("Job {} submitted", handle.job_id)));

        self.poll(&handle).await
    }

    async fn poll(&self, handle: &RemoteJobHandle) -> (JobOutcome, JobStatus) {
        let started = Instant::now();
        let mut transient_errors = 0u32;

        loop {
            if self.token.is_cancelled() {
                return cancelled();
            }

            if let Some(max) = self.policy.max_poll_duration {
                if started.elapsed() >= max {
                    return failed(format!("Job {} timed out after {:?}", handle.job_id, max));
                }
            }

            match self.executor.query_status(handle).await {
                Ok(status) => {
                    transient_errors = 0;

                    if self.token.is_cancelled() {
                        return cancelled();
                    }

                    match status.phase {
                        JobPhase::Pending | JobPhase::Running => {
                            debug!(job_id = %handle.job_id, phase = ?status.phase, percent = ?status.percent_complete, "Job in progress");
                            self.progress.publish(status);
                        }
                        JobPhase::Completed => {
                            let result = JobResult {
                                job_id: handle.job_id.clone(),
                                result_locator: status.result_locator.clone(),
                                message: status.message.clone(),
                            };
                            return (JobOutcome::Succeeded(result), status);
                        }
                        JobPhase::Failed => {
                            let detail = if status.message.is_empty() {
                                format!("Job {} failed", handle.job_id)
                            } else {
                                status.message.clone()
                            };
                            return (JobOutcome::Failed(detail), status);
                        }
                        JobPhase::Cancelled => return (JobOutcome::Cancelled, status),
                    }
                }
                Err(RemoteError::Transient(msg)) => {
                    transient_errors += 1;
                    warn!(job_id = %handle.job_id, attempt = transient_errors, error = %msg, "Transient error while polling");
                    if transient_errors > self.policy.max_transient_errors {
                        return failed(format!(
                            "Giving up on job {} after {} consecutive errors: {}",
                            handle.job_id, transient_errors, msg
                        ));
                    }
                }
                Err(e) => return failed(e.to_string()),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.request.poll_interval) => {}
                _ = self.token.cancelled() => {}
            }
        }
    }

    /// Clear the slot unless a newer job has already taken it
    fn release_slot(&self) {
        let mut slots = lock_slots(&self.slots);
        if slots.get(&self.slot).is_some_and(|active| active.generation == self.generation) {
            slots.remove(&self.slot);
        }
    }
}

fn cancelled() -> (JobOutcome, JobStatus) {
    (JobOutcome::Cancelled, JobStatus::cancelled())
}

fn failed(detail: String) -> (JobOutcome, JobStatus) {
    let status = JobStatus::failed(detail.clone());
    (JobOutcome::Failed(detail), status)
}
