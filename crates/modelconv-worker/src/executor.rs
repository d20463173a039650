//! Job executor.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use modelconv_queue::{Delivery, IntakeChannel};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::metrics;
use crate::processor::JobProcessor;
use crate::retry::FailureTracker;

/// Back-off after a failed receive.
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Pool and polling settings.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// Maximum time a receive call blocks
    pub poll_wait: Duration,
    /// Idle time after which an undeleted message is reclaimed
    pub visibility_timeout: Duration,
    /// How often to look for stale messages
    pub reclaim_interval: Duration,
    /// Deliveries after which a message is dead-lettered
    pub max_deliveries: u32,
    /// How long to wait for in-flight jobs on shutdown
    pub shutdown_timeout: Duration,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 1,
            poll_wait: Duration::from_secs(5),
            visibility_timeout: Duration::from_secs(900),
            reclaim_interval: Duration::from_secs(30),
            max_deliveries: 3,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl ExecutorSettings {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            max_concurrent_jobs: config.max_concurrent_jobs.max(1),
            poll_wait: config.poll_wait,
            visibility_timeout: config.visibility_timeout,
            reclaim_interval: config
                .visibility_timeout
                .clamp(Duration::from_secs(1), Duration::from_secs(30)),
            max_deliveries: config.max_deliveries,
            shutdown_timeout: config.shutdown_timeout,
        }
    }
}

/// Delivery IDs this worker is currently processing.
#[derive(Debug, Clone, Default)]
struct InFlight(Arc<Mutex<HashSet<String>>>);

impl InFlight {
    /// Mark `id` as running. `None` if it is already running here.
    fn claim(&self, id: &str) -> Option<InFlightGuard> {
        let mut ids = self.0.lock().unwrap_or_else(|e| e.into_inner());
        if !ids.insert(id.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            ids: self.clone(),
            id: id.to_string(),
        })
    }

    fn contains(&self, id: &str) -> bool {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).contains(id)
    }

    fn ids(&self) -> Vec<String> {
        self.0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}

/// Releases an in-flight ID when the job task ends, including by panic.
struct InFlightGuard {
    ids: InFlight,
    id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.ids
            .0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.id);
    }
}

/// Polls the intake channel and runs jobs on a bounded pool.
pub struct JobExecutor {
    settings: ExecutorSettings,
    intake: Arc<dyn IntakeChannel>,
    processor: Arc<JobProcessor>,
    job_semaphore: Arc<Semaphore>,
    in_flight: InFlight,
    shutdown: watch::Sender<bool>,
}

impl JobExecutor {
    pub fn new(
        settings: ExecutorSettings,
        intake: Arc<dyn IntakeChannel>,
        processor: Arc<JobProcessor>,
    ) -> Self {
        let job_semaphore = Arc::new(Semaphore::new(settings.max_concurrent_jobs));
        let (shutdown, _) = watch::channel(false);

        Self {
            settings,
            intake,
            processor,
            job_semaphore,
            in_flight: InFlight::default(),
            shutdown,
        }
    }

    /// Run until [`JobExecutor::shutdown`] is called, then wait for in-flight
    /// jobs.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting job executor with {} max concurrent jobs",
            self.settings.max_concurrent_jobs
        );

        let reclaim_task = tokio::spawn(Self::reclaim_loop(
            self.settings.clone(),
            Arc::clone(&self.intake),
            Arc::clone(&self.processor),
            Arc::clone(&self.job_semaphore),
            self.in_flight.clone(),
            self.shutdown.subscribe(),
        ));

        let mut shutdown_rx = self.shutdown.subscribe();
        let mut receive_failures = FailureTracker::new(3);

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            // Take a slot before receiving so a received message never waits.
            let permit = tokio::select! {
                _ = shutdown_rx.changed() => continue,
                permit = Arc::clone(&self.job_semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let received = tokio::select! {
                _ = shutdown_rx.changed() => continue,
                received = self.intake.receive(1, self.settings.poll_wait) => received,
            };

            match received {
                Ok(deliveries) => {
                    receive_failures.record_success();
                    match deliveries.into_iter().next() {
                        Some(delivery) => self.dispatch(delivery, permit),
                        None => tokio::task::yield_now().await,
                    }
                }
                Err(e) => {
                    drop(permit);
                    if receive_failures.record_failure() {
                        error!("Error receiving jobs: {}", e);
                    }
                    tokio::select! {
                        _ = shutdown_rx.changed() => {}
                        _ = tokio::time::sleep(RECEIVE_ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        info!("Shutdown signal received, stopping executor");
        reclaim_task.abort();

        info!("Waiting for in-flight jobs to complete...");
        if tokio::time::timeout(self.settings.shutdown_timeout, self.wait_for_jobs())
            .await
            .is_err()
        {
            warn!(
                "In-flight jobs still running after {:?}; their messages will be redelivered",
                self.settings.shutdown_timeout
            );
        }

        info!("Job executor stopped");
        Ok(())
    }

    fn dispatch(&self, delivery: Delivery, permit: OwnedSemaphorePermit) {
        Self::spawn_job(
            Arc::clone(&self.processor),
            delivery,
            permit,
            &self.settings,
            &self.job_semaphore,
            &self.in_flight,
        );
    }

    /// Run one delivery in its own task. A panic inside the task leaves the
    /// message undeleted, so it is redelivered.
    ///
    /// A delivery whose ID is already running on this worker is dropped.
    fn spawn_job(
        processor: Arc<JobProcessor>,
        delivery: Delivery,
        permit: OwnedSemaphorePermit,
        settings: &ExecutorSettings,
        semaphore: &Arc<Semaphore>,
        in_flight: &InFlight,
    ) {
        let Some(guard) = in_flight.claim(&delivery.id) else {
            debug!("Message {} is already being processed", delivery.id);
            return;
        };
        let semaphore = Arc::clone(semaphore);
        let max_jobs = settings.max_concurrent_jobs;
        let max_deliveries = settings.max_deliveries;
        metrics::set_jobs_in_flight(max_jobs.saturating_sub(semaphore.available_permits()));

        tokio::spawn(async move {
            let report = if delivery.delivery_count > max_deliveries {
                processor.dead_letter(&delivery, max_deliveries).await
            } else {
                processor.handle(&delivery).await
            };
            drop(guard);
            drop(permit);
            metrics::set_jobs_in_flight(max_jobs.saturating_sub(semaphore.available_permits()));

            debug!(
                job_id = %report.job_id,
                state = %report.final_state,
                notified = report.notified,
                acknowledged = report.acknowledged,
                "Job finished"
            );
        });
    }

    /// Periodically refresh running messages and take over messages another
    /// consumer left behind.
    async fn reclaim_loop(
        settings: ExecutorSettings,
        intake: Arc<dyn IntakeChannel>,
        processor: Arc<JobProcessor>,
        semaphore: Arc<Semaphore>,
        in_flight: InFlight,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut interval = tokio::time::interval(settings.reclaim_interval);
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    let running = in_flight.ids();
                    if !running.is_empty() {
                        if let Err(e) = intake.touch(&running).await {
                            warn!("Failed to refresh {} in-flight messages: {}", running.len(), e);
                        }
                    }

                    let free = semaphore.available_permits();
                    if free == 0 {
                        continue;
                    }
                    match intake.reclaim_stale(settings.visibility_timeout, free).await {
                        Ok(deliveries) if !deliveries.is_empty() => {
                            info!("Reclaimed {} stale messages", deliveries.len());
                            for delivery in deliveries {
                                if in_flight.contains(&delivery.id) {
                                    debug!("Skipping reclaimed message {} still running here", delivery.id);
                                    continue;
                                }
                                let permit = match Arc::clone(&semaphore).acquire_owned().await {
                                    Ok(permit) => permit,
                                    Err(_) => return,
                                };
                                Self::spawn_job(
                                    Arc::clone(&processor),
                                    delivery,
                                    permit,
                                    &settings,
                                    &semaphore,
                                    &in_flight,
                                );
                            }
                        }
                        Ok(_) => {}
                        Err(e) => warn!("Failed to reclaim stale messages: {}", e),
                    }
                }
            }
        }
    }

    /// Wait for all in-flight jobs to complete.
    async fn wait_for_jobs(&self) {
        loop {
            let available = self.job_semaphore.available_permits();
            if available == self.settings.max_concurrent_jobs {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Jobs currently running.
    pub fn in_flight(&self) -> usize {
        self.settings.max_concurrent_jobs - self.job_semaphore.available_permits()
    }
}
