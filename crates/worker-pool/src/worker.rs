//! Worker lifecycle management.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::client::{ControlPlaneClient, QueueJob};
use crate::config::WorkerConfig;
use crate::executor::{CommandError, CommandExecutor};
use crate::nats::NatsSubscriber;

/// Worker pool that processes commands.
pub struct Worker {
    /// Worker configuration.
    config: WorkerConfig,

    /// NATS subscriber for command notifications.
    subscriber: NatsSubscriber,

    /// Control plane HTTP client.
    client: ControlPlaneClient,

    /// Command executor.
    executor: Arc<CommandExecutor>,

    /// Semaphore for concurrency control.
    semaphore: Arc<Semaphore>,
}

impl Worker {
    /// Create a new worker.
    pub async fn new(config: WorkerConfig) -> Result<Self> {
        // Connect to NATS
        let subscriber = NatsSubscriber::connect(
            &config.nats_url,
            &config.nats_stream,
            &config.nats_consumer,
        )
        .await?;

        // Create HTTP client
        let client = ControlPlaneClient::new(&config.server_url);

        // Create executor
        let executor = Arc::new(CommandExecutor::new(
            client.clone(),
            config.worker_id.clone(),
        ));

        // Create semaphore for concurrency control
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_tasks));

        Ok(Self {
            config,
            subscriber,
            client,
            executor,
            semaphore,
        })
    }

    /// Run the worker.
    pub async fn run(&self) -> Result<()> {
        // Register worker
        self.register().await?;

        // Start heartbeat task
        let heartbeat_handle = self.start_heartbeat();

        // Process commands
        let result = self.process_commands().await;

        // Stop heartbeat
        heartbeat_handle.abort();

        // Deregister worker
        self.deregister().await?;

        result
    }

    /// Register the worker with the control plane.
    async fn register(&self) -> Result<()> {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        self.client
            .register_worker(&self.config.worker_id, &self.config.pool_name, &hostname)
            .await?;

        tracing::info!(
            worker_id = %self.config.worker_id,
            pool_name = %self.config.pool_name,
            hostname = %hostname,
            "Worker registered"
        );

        Ok(())
    }

    /// Deregister the worker.
    async fn deregister(&self) -> Result<()> {
        self.client
            .deregister_worker(&self.config.worker_id, &self.config.pool_name)
            .await?;

        tracing::info!(
            worker_id = %self.config.worker_id,
            "Worker deregistered"
        );

        Ok(())
    }

    /// Start the heartbeat background task.
    fn start_heartbeat(&self) -> tokio::task::JoinHandle<()> {
        let client = self.client.clone();
        let worker_id = self.config.worker_id.clone();
        let pool_name = self.config.pool_name.clone();
        let interval = self.config.heartbeat_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // Skip first immediate tick

            loop {
                ticker.tick().await;

                if let Err(e) = client.heartbeat(&worker_id, &pool_name).await {
                    tracing::warn!(error = %e, "Heartbeat failed");
                } else {
                    tracing::trace!("Heartbeat sent");
                }
            }
        })
    }

    /// Lease and execute commands from the control plane queue.
    ///
    /// HTTP leasing is the primary dispatch path. NATS is consulted only as a
    /// wake-hint: a notification means "something was just enqueued" and
    /// lets us skip the rest of the idle poll interval, but it carries no
    /// command data of its own and is acked immediately regardless of
    /// whether a lease attempt that follows finds anything.
    async fn process_commands(&self) -> Result<()> {
        loop {
            // Wait for available slot before leasing, so we never hold a
            // lease we can't start executing right away.
            let permit = self.semaphore.clone().acquire_owned().await?;

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                woken = self.subscriber.receive() => {
                    match woken {
                        Ok(Some((_, msg))) => {
                            let _ = self.subscriber.ack(&msg).await;
                        }
                        Ok(None) => {}
                        Err(e) => {
                            tracing::warn!(error = %e, "NATS wake-hint receive failed");
                        }
                    }
                }
            }

            match self.client.lease_jobs(&self.config.worker_id, 1).await {
                Ok(jobs) => {
                    if let Some(job) = jobs.into_iter().next() {
                        self.spawn_job(job, permit);
                    } else {
                        drop(permit);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to lease queue jobs");
                    drop(permit);
                }
            }
        }
    }

    /// Run a leased job to completion, renewing its lease periodically, and
    /// report the outcome back to the queue.
    fn spawn_job(&self, job: QueueJob, permit: tokio::sync::OwnedSemaphorePermit) {
        let client = self.client.clone();
        let executor = self.executor.clone();
        let worker_id = self.config.worker_id.clone();
        let lease_duration_secs = self.config.lease_duration_secs;
        let queue_id = job.queue_id;

        tokio::spawn(async move {
            let _permit = permit;

            let command = match job.command() {
                Ok(command) => command,
                Err(e) => {
                    tracing::error!(queue_id, error = %e, "Failed to decode queued command");
                    // A malformed command will fail to decode on every retry: dead-letter immediately.
                    let _ = client.fail_job(queue_id, &worker_id, &e.to_string(), false).await;
                    return;
                }
            };

            let renew_client = client.clone();
            let renew_worker_id = worker_id.clone();
            let renew_interval = std::time::Duration::from_secs(lease_duration_secs / 2);
            let renewal = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(renew_interval.max(std::time::Duration::from_secs(1)));
                ticker.tick().await; // skip the immediate tick
                loop {
                    ticker.tick().await;
                    if let Err(e) = renew_client.renew_lease(queue_id, &renew_worker_id).await {
                        tracing::warn!(queue_id, error = %e, "Failed to renew queue lease");
                    }
                }
            });

            let outcome = executor.execute(&command).await;
            renewal.abort();

            match outcome {
                Ok(()) => {
                    if let Err(e) = client.complete_job(queue_id, &worker_id).await {
                        tracing::error!(queue_id, error = %e, "Failed to report job completion");
                    }
                }
                Err(e) => {
                    tracing::error!(queue_id, command_id = %command.command_id, error = %e, "Command execution failed");
                    // CommandError carries an explicit retry classification;
                    // anything else (e.g. an HTTP error talking to the
                    // control plane) is assumed transient and retryable.
                    let retryable = e
                        .downcast_ref::<CommandError>()
                        .map(|ce| ce.retryable)
                        .unwrap_or(true);
                    if let Err(report_err) =
                        client.fail_job(queue_id, &worker_id, &e.to_string(), retryable).await
                    {
                        tracing::error!(queue_id, error = %report_err, "Failed to report job failure");
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config() {
        let config = WorkerConfig::default();
        assert!(!config.worker_id.is_empty());
        assert_eq!(config.pool_name, "default");
    }
}
