//! Orchestration service: the broker that turns events into queued commands.
//!
//! Bridges the pure [`crate::engine::orchestrator::WorkflowOrchestrator`]
//! evaluation function to the database: it loads the playbook and event
//! history for an execution, runs one evaluation pass, persists the events
//! the orchestrator decided to emit, enqueues the commands it produced into
//! the leased work queue, and finalizes the execution when it completes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::queries::event as event_queries;
use crate::db::queries::event_claim;
use crate::db::DbPool;
use crate::engine::orchestrator::{EventToEmit, WorkflowOrchestrator};
use crate::engine::retry::RetryPolicy;
use crate::error::{AppError, AppResult};
use crate::nats::NatsPublisher;
use crate::playbook::types::Playbook;
use crate::services::event::{EmitEventRequest, EventService};
use crate::services::execution::ExecutionService;
use crate::services::queue::QueueService;

/// Number of snowflake ids pre-allocated for one evaluation pass.
///
/// The orchestrator's id allocator is a synchronous closure, so ids for an
/// evaluation (step/loop/command events) are fetched up front in one query.
/// Pathologically large fan-outs (loops with more iterations than this) fall
/// back to an offset scheme below; see the `allocate_ids` doc.
const ID_BATCH_SIZE: i64 = 1024;

/// Default queue priority for broker-issued commands.
const DEFAULT_PRIORITY: i32 = 0;

/// Result of one dispatch pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub commands_generated: i32,
    pub should_complete: bool,
}

/// Coordinates the orchestrator, event log, and queue for one execution.
#[derive(Clone)]
pub struct OrchestrationService {
    pool: DbPool,
    orchestrator: std::sync::Arc<WorkflowOrchestrator>,
    events: EventService,
    queue: QueueService,
    executions: ExecutionService,
    /// Optional wake-hint publisher. A missed or absent NATS message never
    /// loses work: leasing via `noetl.queue` is the authority and workers
    /// fall back to polling at `poll_interval`, so publish failures here are
    /// logged and swallowed rather than propagated.
    nats: Option<std::sync::Arc<NatsPublisher>>,
    server_url: String,
    /// Identifies this broker instance for the event-claim table. Stable for
    /// the process lifetime, not persisted across restarts.
    broker_id: String,
}

impl OrchestrationService {
    pub fn new(
        pool: DbPool,
        events: EventService,
        queue: QueueService,
        executions: ExecutionService,
    ) -> Self {
        Self {
            pool,
            orchestrator: std::sync::Arc::new(WorkflowOrchestrator::new()),
            events,
            queue,
            executions,
            nats: None,
            server_url: String::new(),
            broker_id: format!("broker-{}", Uuid::new_v4()),
        }
    }

    /// Attach a NATS publisher so dispatched commands also get a wake-hint
    /// notification, shortening the average worker idle-poll latency.
    pub fn with_nats(mut self, nats: std::sync::Arc<NatsPublisher>, server_url: impl Into<String>) -> Self {
        self.nats = Some(nats);
        self.server_url = server_url.into();
        self
    }

    /// Run one evaluation pass for `execution_id`. `trigger_event_id`, when
    /// present, identifies the event (typically `action_completed` or
    /// `action_error`) that prompted this call, and is also the key used to
    /// claim exclusive dispatch rights for this pass.
    pub async fn dispatch(
        &self,
        execution_id: i64,
        trigger_event_id: Option<i64>,
    ) -> AppResult<DispatchOutcome> {
        let events = event_queries::get_events_by_execution(&self.pool, execution_id).await?;
        if events.is_empty() {
            return Err(AppError::NotFound(format!(
                "No events found for execution {}",
                execution_id
            )));
        }

        let catalog_id = events[0].catalog_id;
        let trigger_event = trigger_event_id
            .and_then(|id| events.iter().find(|e| e.event_id == id))
            .cloned();

        // A trigger event may be observed by more than one broker instance
        // (e.g. both a NATS wake-hint handler and a polling sweeper). Only
        // the instance that wins the claim proceeds; everyone else no-ops so
        // the same trigger never enqueues commands twice.
        if let Some(event_id) = trigger_event_id {
            if !event_claim::try_claim(&self.pool, event_id, &self.broker_id).await? {
                return Ok(DispatchOutcome {
                    commands_generated: 0,
                    should_complete: false,
                });
            }
        }

        let playbook = self.load_playbook(catalog_id).await?;

        let ids = self.allocate_ids(ID_BATCH_SIZE).await?;
        let first_id = ids.first().copied().unwrap_or(1);
        let mut cursor = 0usize;
        let mut id_gen = move || {
            if cursor < ids.len() {
                let id = ids[cursor];
                cursor += 1;
                id
            } else {
                // Exhausted the pre-fetched batch (an unusually large loop
                // fan-out in a single pass). Synthesize additional ids with
                // a wide stride; collision with a real snowflake id in the
                // same millisecond window is astronomically unlikely.
                let synthesized = first_id + (cursor as i64) * 1_000_003;
                cursor += 1;
                synthesized
            }
        };

        let result = self.orchestrator.evaluate(
            &events,
            &playbook,
            trigger_event.as_ref(),
            &mut id_gen,
        )?;

        for event in &result.events_to_emit {
            self.persist_event(execution_id, catalog_id, event).await?;
        }

        let mut commands_generated = 0i32;
        for command in &result.commands {
            let policy = playbook
                .get_step(&command.step_name)
                .map(|s| RetryPolicy::from_step(s).0)
                .unwrap_or_default();

            self.persist_event(
                execution_id,
                catalog_id,
                &EventToEmit {
                    event_id: command.command_id,
                    event_type: "command.issued".to_string(),
                    node_name: Some(command.step_name.clone()),
                    status: "PENDING".to_string(),
                    parent_event_id: Some(command.parent_event_id),
                    context: Some(serde_json::json!({
                        "tool": command.tool,
                        "args": command.context,
                    })),
                    result: None,
                    error: None,
                    meta: command.metadata.clone(),
                },
            )
            .await?;

            let queue_id = self.allocate_ids(1).await?.remove(0);
            self.queue
                .enqueue_command(
                    queue_id,
                    command.command_id,
                    command,
                    &policy,
                    DEFAULT_PRIORITY,
                )
                .await?;

            self.notify_workers(command).await;

            commands_generated += 1;
        }

        if result.should_complete {
            if let Some(status) = &result.completion_status {
                if status.status == "COMPLETED" || status.status == "FAILED" {
                    self.executions
                        .finalize(execution_id, &status.status, status.error.as_deref())
                        .await?;
                }
            }
        }

        Ok(DispatchOutcome {
            commands_generated,
            should_complete: result.should_complete,
        })
    }

    /// Best-effort wake-hint for a just-enqueued command. Never fails the
    /// dispatch pass: leasing is what actually hands work to a worker.
    async fn notify_workers(&self, command: &crate::engine::commands::Command) {
        let Some(publisher) = &self.nats else {
            return;
        };

        if let Err(e) = publisher
            .publish(
                command.execution_id,
                command.command_id,
                &command.command_id.to_string(),
                &command.step_name,
                &self.server_url,
            )
            .await
        {
            tracing::debug!(
                execution_id = command.execution_id,
                command_id = command.command_id,
                error = %e,
                "Failed to publish NATS wake-hint"
            );
        }
    }

    async fn persist_event(
        &self,
        execution_id: i64,
        catalog_id: i64,
        event: &EventToEmit,
    ) -> AppResult<()> {
        self.events
            .emit(EmitEventRequest {
                event_id: event.event_id,
                execution_id,
                catalog_id,
                event_type: event.event_type.clone(),
                parent_event_id: event.parent_event_id,
                parent_execution_id: None,
                node_id: event.node_name.clone(),
                node_name: event.node_name.clone(),
                node_type: None,
                status: event.status.clone(),
                context: event.context.clone(),
                meta: event.meta.clone(),
                result: event.result.clone(),
                worker_id: None,
                attempt: None,
            })
            .await?;
        Ok(())
    }

    async fn load_playbook(&self, catalog_id: i64) -> AppResult<Playbook> {
        let row: (Option<String>, Option<serde_json::Value>) = sqlx::query_as(
            "SELECT content, payload FROM noetl.catalog WHERE catalog_id = $1",
        )
        .bind(catalog_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Catalog entry not found: {}", catalog_id)))?;

        let yaml = match row {
            (Some(content), _) if !content.is_empty() => content,
            (_, Some(payload)) => serde_yaml::to_string(&payload)
                .map_err(|e| AppError::Internal(format!("Failed to convert payload: {}", e)))?,
            _ => {
                return Err(AppError::NotFound(format!(
                    "No playbook content for catalog_id {}",
                    catalog_id
                )))
            }
        };

        crate::playbook::parser::parse_playbook(&yaml)
    }

    /// Fetch `count` snowflake ids in one round trip.
    async fn allocate_ids(&self, count: i64) -> AppResult<Vec<i64>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT noetl.snowflake_id() FROM generate_series(1, $1)",
        )
        .bind(count)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}
