use super::{SyncDispatcher, SyncError, SyncJob, SyncTrigger};
use crate::events::{DomainEvent, EventPublisher};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Sending half of the background sync queue.
#[derive(Clone)]
pub struct QueueDispatcher {
    sender: mpsc::Sender<SyncJob>,
}

impl SyncDispatcher for QueueDispatcher {
    fn submit(&self, job: SyncJob) {
        let internal_user_id = job.internal_user_id().to_string();
        let kind = job.kind();
        match self.sender.try_send(job) {
            Ok(()) => debug!(internal_user_id = %internal_user_id, kind, "Sync job queued"),
            Err(TrySendError::Full(_)) => error!(
                internal_user_id = %internal_user_id,
                kind,
                "Sync queue full, dropping job"
            ),
            Err(TrySendError::Closed(_)) => error!(
                internal_user_id = %internal_user_id,
                kind,
                "Sync worker stopped, dropping job"
            ),
        }
    }
}

/// Runs queued sync jobs, each in its own task.
///
/// Failures are logged and announced as `sync_failed`; nothing flows back to
/// whoever submitted the job.
pub struct SyncWorker {
    trigger: Arc<SyncTrigger>,
    publisher: Arc<dyn EventPublisher>,
    receiver: mpsc::Receiver<SyncJob>,
}

impl SyncWorker {
    /// Creates the queue and the worker draining it.
    pub fn channel(
        trigger: Arc<SyncTrigger>,
        publisher: Arc<dyn EventPublisher>,
        capacity: usize,
    ) -> (QueueDispatcher, SyncWorker) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            QueueDispatcher { sender },
            SyncWorker {
                trigger,
                publisher,
                receiver,
            },
        )
    }

    /// Starts the worker loop (non-blocking).
    ///
    /// The loop ends once every [`QueueDispatcher`] clone is dropped and all
    /// in-flight jobs have finished.
    pub fn start(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Sync worker started");
            let mut tasks = JoinSet::new();

            loop {
                tokio::select! {
                    job = self.receiver.recv() => match job {
                        Some(job) => {
                            let trigger = Arc::clone(&self.trigger);
                            let publisher = Arc::clone(&self.publisher);
                            tasks.spawn(run_job(trigger, publisher, job));
                        }
                        None => break,
                    },
                    Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                        if let Err(e) = joined {
                            error!(error = %e, "Sync task panicked");
                        }
                    }
                }
            }

            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "Sync task panicked");
                }
            }
            info!("Sync worker stopped");
        })
    }
}

async fn run_job(trigger: Arc<SyncTrigger>, publisher: Arc<dyn EventPublisher>, job: SyncJob) {
    let internal_user_id = job.internal_user_id().to_string();
    let kind = job.kind();

    let outcome = match job {
        SyncJob::Full {
            internal_user_id,
            credential,
            since,
            max_attempts,
        } => trigger
            .trigger_sync(&credential, since, max_attempts, &internal_user_id)
            .await
            .map(|_| ()),
        SyncJob::Category {
            internal_user_id,
            credential,
            category,
            date,
            max_attempts,
        } => trigger
            .sync_category(&credential, &internal_user_id, category, date, max_attempts)
            .await
            .map(|_| ()),
        SyncJob::AnnounceLastSync {
            internal_user_id,
            last_sync,
        } => trigger
            .publish_last_sync(&internal_user_id, last_sync)
            .await
            .map_err(SyncError::from),
    };

    let Err(err) = outcome else {
        return;
    };

    error!(
        internal_user_id = %internal_user_id,
        kind,
        attempts = err.attempts(),
        error = %err,
        "Background sync failed"
    );

    let failed = DomainEvent::SyncFailed {
        internal_user_id: internal_user_id.clone(),
        category: err.category(),
        attempts: err.attempts(),
        reason: err.to_string(),
    };
    if let Err(e) = publisher.publish(&failed).await {
        warn!(
            internal_user_id = %internal_user_id,
            error = %e,
            "Could not announce sync failure"
        );
    }
}
