//! Failure-isolated activity log writer.
//!
//! Every share mutation appends one [`ActivityRecord`]. The log is purely
//! observational, so a failed append must never undo or fail the mutation
//! that caused it. [`ActivityRecorder::record`] therefore returns nothing:
//! on failure it logs, queues the record for retry and emits an
//! [`ActivityWarning`] that a UI may show or ignore.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use focusflow_proto::activity::{ActivityRecord, ActivityType};
use focusflow_proto::ids::{TaskId, UserId};
use tokio::sync::{Mutex, mpsc};

use crate::backend::ActivityStore;

/// Non-fatal notice that an activity record is not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityWarning {
    /// An append failed and was queued for retry.
    WriteFailed {
        /// Task the record concerns.
        task_id: TaskId,
        /// Kind of record.
        activity_type: ActivityType,
        /// Store error text.
        reason: String,
    },
}

/// Appends activity records, queueing failed writes for background retry.
pub struct ActivityRecorder<S> {
    store: Arc<S>,
    /// Records whose append failed, oldest first.
    pending: Mutex<VecDeque<ActivityRecord>>,
    warning_tx: mpsc::Sender<ActivityWarning>,
}

impl<S: ActivityStore> ActivityRecorder<S> {
    /// Creates a recorder over `store`.
    ///
    /// Returns the recorder and a receiver for [`ActivityWarning`]s. At most
    /// `warning_buffer` warnings are held; further ones are dropped.
    #[must_use]
    pub fn new(store: Arc<S>, warning_buffer: usize) -> (Self, mpsc::Receiver<ActivityWarning>) {
        let (tx, rx) = mpsc::channel(warning_buffer.max(1));
        let recorder = Self {
            store,
            pending: Mutex::new(VecDeque::new()),
            warning_tx: tx,
        };
        (recorder, rx)
    }

    /// Appends a record. Never fails from the caller's point of view.
    pub async fn record(
        &self,
        task_id: TaskId,
        actor_id: UserId,
        activity_type: ActivityType,
        payload: serde_json::Value,
    ) {
        let record = ActivityRecord::new(task_id, actor_id, activity_type, payload);
        if let Err(err) = self.store.append_activity(&record).await {
            tracing::warn!(
                task_id = %task_id,
                activity = %activity_type,
                error = %err,
                "activity append failed, queued for retry"
            );
            self.pending.lock().await.push_back(record);

            let warning = ActivityWarning::WriteFailed {
                task_id,
                activity_type,
                reason: err.to_string(),
            };
            if let Err(dropped) = self.warning_tx.try_send(warning) {
                tracing::debug!(error = %dropped, %task_id, "activity warning dropped");
            }
        }
    }

    /// Retries every queued record once.
    ///
    /// Returns how many were written; the rest stay queued in order.
    pub async fn flush_pending(&self) -> usize {
        let records: Vec<ActivityRecord> = {
            let mut q = self.pending.lock().await;
            q.drain(..).collect()
        };

        let total = records.len();
        let mut succeeded = 0;
        let mut failed = VecDeque::new();
        for record in records {
            if self.store.append_activity(&record).await.is_ok() {
                succeeded += 1;
            } else {
                failed.push_back(record);
            }
        }

        if !failed.is_empty() {
            let mut q = self.pending.lock().await;
            // Anything queued while we were flushing is newer.
            failed.extend(q.drain(..));
            *q = failed;
        }

        if succeeded > 0 {
            tracing::info!(
                succeeded,
                remaining = total - succeeded,
                "flushed pending activity records"
            );
        }
        succeeded
    }

    /// Number of records awaiting retry.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Spawns a task that flushes the queue every `interval`.
    ///
    /// The task runs until the returned handle is aborted or the runtime
    /// shuts down.
    pub fn spawn_retry_task(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()>
    where
        S: 'static,
    {
        let recorder = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            loop {
                tick.tick().await;
                if recorder.pending_count().await > 0 {
                    recorder.flush_pending().await;
                }
            }
        })
    }
}
