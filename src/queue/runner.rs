use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::{error, info};

use super::store::PaymentJobStore;
use super::worker::{JobOutcome, PaymentWorker};

const POLL_INTERVAL_SECS: u64 = 2;

/// Pulls claimed jobs from the durable queue and drives them through the
/// worker.
///
/// Concurrency is bounded by the slot semaphore: multiple runner instances
/// (or processes) can share one queue because claiming is atomic at the
/// store level. Backoff delays live in each job's `run_at`, never in a
/// sleeping worker thread.
pub struct QueueRunner {
    store: Arc<PaymentJobStore>,
    worker: Arc<PaymentWorker>,
    slots: usize,
}

impl QueueRunner {
    pub fn new(store: Arc<PaymentJobStore>, worker: Arc<PaymentWorker>, slots: usize) -> Self {
        Self {
            store,
            worker,
            slots: slots.max(1),
        }
    }

    /// Start the runner loop in the background
    pub fn start(&self) -> JoinHandle<()> {
        let store = self.store.clone();
        let worker = self.worker.clone();
        let semaphore = Arc::new(Semaphore::new(self.slots));

        info!("👷 Queue runner started with {} worker slots", self.slots);

        tokio::spawn(async move {
            let mut poll = interval(Duration::from_secs(POLL_INTERVAL_SECS));

            loop {
                poll.tick().await;

                if let Err(e) = store.reclaim_stalled().await {
                    error!("Failed to reclaim stalled jobs: {:?}", e);
                    continue;
                }

                let free_slots = semaphore.available_permits();
                if free_slots == 0 {
                    continue;
                }

                let jobs = match store.claim_ready(free_slots as i64).await {
                    Ok(jobs) => jobs,
                    Err(e) => {
                        error!("Failed to claim jobs: {:?}", e);
                        continue;
                    }
                };

                for job in jobs {
                    let permit = match semaphore.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => return,
                    };
                    let store = store.clone();
                    let worker = worker.clone();

                    tokio::spawn(async move {
                        let outcome = worker.process(&job).await;

                        let persisted = match outcome {
                            JobOutcome::Completed { transaction_hash } => {
                                store.complete(job.id, &transaction_hash).await
                            }
                            JobOutcome::Retry {
                                error, category, delay,
                            } => {
                                let next_run_at = Utc::now()
                                    + chrono::Duration::from_std(delay)
                                        .unwrap_or(chrono::Duration::seconds(2));
                                store
                                    .retry(job.id, &error, category.as_str(), next_run_at)
                                    .await
                            }
                            JobOutcome::Failed {
                                error, category, user_message,
                            } => {
                                info!("Job {} terminal: {}", job.job_key, user_message);
                                store.fail(job.id, &error, category.as_str()).await
                            }
                        };

                        if let Err(e) = persisted {
                            error!(
                                "Failed to persist outcome for job {}: {:?}",
                                job.job_key, e
                            );
                        }

                        drop(permit);
                    });
                }
            }
        })
    }
}
