//! Workflow orchestration engine.
//!
//! Coordinates workflow execution by:
//! - Analyzing events to determine current state
//! - Evaluating transitions to determine next steps
//! - Publishing commands for workers
//! - Deciding retries and loop iteration fan-out

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::db::models::Event;
use crate::error::{AppError, AppResult};
use crate::playbook::types::{Playbook, Step};

use super::commands::{Command, CommandBuilder, IteratorMetadata};
use super::evaluator::ConditionEvaluator;
use super::loop_exec::LoopState;
use super::retry::{self, RetryDecision, RetryPolicy};
use super::state::{ExecutionState, WorkflowState};

/// Result of orchestration evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationResult {
    /// Current execution state.
    pub state: ExecutionState,
    /// Commands to issue.
    pub commands: Vec<Command>,
    /// Whether the execution should complete.
    pub should_complete: bool,
    /// Completion status if should_complete is true.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_status: Option<CompletionStatus>,
    /// Events to emit.
    pub events_to_emit: Vec<EventToEmit>,
}

/// Completion status for a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionStatus {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_steps: Option<Vec<String>>,
}

/// Event to emit during orchestration.
///
/// `event_id` is pre-assigned by the caller's ID allocator so it can double
/// as a `parent_event_id` for commands derived from it (a `step_started`
/// event's ID becomes the correlation key for its loop iterations) without
/// a round-trip to storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventToEmit {
    pub event_id: i64,
    pub event_type: String,
    pub node_name: Option<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_event_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

/// Allocates IDs for new events/commands produced during one evaluation pass.
pub type IdAllocator<'a> = &'a mut dyn FnMut() -> i64;

/// Workflow orchestrator.
pub struct WorkflowOrchestrator {
    evaluator: ConditionEvaluator,
    command_builder: CommandBuilder,
}

impl Default for WorkflowOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowOrchestrator {
    /// Create a new workflow orchestrator.
    pub fn new() -> Self {
        Self {
            evaluator: ConditionEvaluator::new(),
            command_builder: CommandBuilder::new(),
        }
    }

    /// Evaluate an execution and determine next actions.
    ///
    /// This is the main orchestration entry point, called when:
    /// - A new execution starts
    /// - A worker reports a result (via event)
    ///
    /// `trigger_event`, when present, is the event that caused this
    /// evaluation; its type and payload drive retry and loop-continuation
    /// decisions that a bare event-type string cannot express.
    pub fn evaluate(
        &self,
        events: &[Event],
        playbook: &Playbook,
        trigger_event: Option<&Event>,
        id_gen: IdAllocator,
    ) -> AppResult<OrchestrationResult> {
        let state = WorkflowState::from_events(events)
            .ok_or_else(|| AppError::Validation("No events found for execution".to_string()))?;

        let trigger_event_type = trigger_event.map(|e| e.event_type.as_str());

        debug!(
            "Evaluating execution {}, state: {}, trigger: {:?}",
            state.execution_id, state.state, trigger_event_type
        );

        if matches!(
            state.state,
            ExecutionState::Completed | ExecutionState::Failed | ExecutionState::Cancelled
        ) {
            return Ok(Self::idle_result(state.state));
        }

        if matches!(trigger_event_type, Some("step_started") | Some("step_running")) {
            debug!("Skipping orchestration for progress marker event");
            return Ok(Self::idle_result(state.state));
        }

        let context = value_to_hashmap(&state.build_context());

        let steps: HashMap<&str, &Step> = playbook
            .workflow
            .iter()
            .map(|s| (s.step.as_str(), s))
            .collect();

        if trigger_event_type == Some("action_error") {
            if let Some(trigger) = trigger_event {
                return self.handle_command_failed(&state, &steps, &context, trigger, events, id_gen);
            }
        }

        match state.state {
            ExecutionState::Initial => self.dispatch_initial_steps(&state, playbook, &context, id_gen),
            ExecutionState::InProgress => {
                if state.steps.is_empty() {
                    return self.dispatch_initial_steps(&state, playbook, &context, id_gen);
                }

                if let Some(trigger) = trigger_event {
                    if trigger.event_type == "action_completed" {
                        if let Some(result) =
                            self.continue_loop_if_applicable(&state, &steps, &context, trigger, events, id_gen)?
                        {
                            return Ok(result);
                        }
                    }
                }

                self.process_in_progress(&state, &steps, &context, trigger_event_type, id_gen)
            }
            _ => Ok(Self::idle_result(state.state)),
        }
    }

    fn idle_result(state: ExecutionState) -> OrchestrationResult {
        OrchestrationResult {
            state,
            commands: vec![],
            should_complete: false,
            completion_status: None,
            events_to_emit: vec![],
        }
    }

    /// Dispatch initial workflow steps.
    fn dispatch_initial_steps(
        &self,
        state: &WorkflowState,
        playbook: &Playbook,
        context: &HashMap<String, serde_json::Value>,
        id_gen: IdAllocator,
    ) -> AppResult<OrchestrationResult> {
        let start_step = playbook
            .get_step("start")
            .ok_or_else(|| AppError::Validation("Start step 'start' not found".to_string()))?;

        info!("Dispatching initial step: {}", start_step.step);

        let (events_to_emit, commands) = self.enter_step(state, start_step, context, None, id_gen)?;

        Ok(OrchestrationResult {
            state: ExecutionState::InProgress,
            commands,
            should_complete: false,
            completion_status: None,
            events_to_emit,
        })
    }

    /// Emit a `step_started` event for `step` and build whatever commands follow
    /// from entering it: a single command, or the first dispatch batch of a
    /// loop step.
    fn enter_step(
        &self,
        state: &WorkflowState,
        step: &Step,
        context: &HashMap<String, serde_json::Value>,
        with_params: Option<&serde_json::Value>,
        id_gen: IdAllocator,
    ) -> AppResult<(Vec<EventToEmit>, Vec<Command>)> {
        let step_event_id = id_gen();
        let mut events_to_emit = vec![EventToEmit {
            event_id: step_event_id,
            event_type: "step_started".to_string(),
            node_name: Some(step.step.clone()),
            status: "ENTERED".to_string(),
            parent_event_id: None,
            context: with_params.cloned(),
            result: None,
            error: None,
            meta: None,
        }];

        let mut commands = Vec::new();

        if let Some(loop_cfg) = &step.r#loop {
            let loop_state = LoopState::initialize(&self.evaluator, loop_cfg, &step.step, step_event_id, context)?;
            let total = loop_state.total();

            if total == 0 {
                // Nothing to iterate: the step completes immediately with an empty result set.
                events_to_emit.push(EventToEmit {
                    event_id: id_gen(),
                    event_type: "step_completed".to_string(),
                    node_name: Some(step.step.clone()),
                    status: "COMPLETED".to_string(),
                    parent_event_id: Some(step_event_id),
                    context: None,
                    result: Some(serde_json::json!([])),
                    error: None,
                    meta: None,
                });
                return Ok((events_to_emit, commands));
            }

            for index in loop_state.next_dispatch_indices() {
                let item = loop_state.items[index].clone();
                let iterator = IteratorMetadata {
                    parent_execution_id: state.execution_id,
                    iterator_step: step.step.clone(),
                    index,
                    total,
                    item,
                    item_var: loop_cfg.iterator.clone(),
                };
                let command = self.command_builder.build_iteration_command(
                    id_gen(),
                    state.execution_id,
                    state.catalog_id,
                    step_event_id,
                    step,
                    context,
                    iterator,
                )?;
                commands.push(command);
            }
        } else {
            let command = self.command_builder.build_command(
                id_gen(),
                state.execution_id,
                state.catalog_id,
                step_event_id,
                step,
                context,
                None,
            )?;
            commands.push(command);
        }

        Ok((events_to_emit, commands))
    }

    /// When the triggering `action_completed` event belongs to a loop
    /// iteration, advance that loop: record a `loop.item` event, dispatch
    /// more iterations if concurrency allows, or finalize the step with its
    /// aggregated results once every item has reported.
    fn continue_loop_if_applicable(
        &self,
        state: &WorkflowState,
        steps: &HashMap<&str, &Step>,
        context: &HashMap<String, serde_json::Value>,
        trigger: &Event,
        events: &[Event],
        id_gen: IdAllocator,
    ) -> AppResult<Option<OrchestrationResult>> {
        let Some(step_name) = &trigger.node_name else {
            return Ok(None);
        };
        let Some(step) = steps.get(step_name.as_str()).copied() else {
            return Ok(None);
        };
        let Some(loop_cfg) = &step.r#loop else {
            return Ok(None);
        };

        // The command.issued event that this completion answers carries the
        // iterator metadata the orchestrator attached when it dispatched it.
        let Some(issued) = trigger
            .parent_event_id
            .and_then(|id| events.iter().find(|e| e.event_id == id))
        else {
            return Ok(None);
        };
        let Some(iterator_meta) = issued.meta.as_ref().and_then(|m| m.get("iterator")) else {
            return Ok(None);
        };
        let Some(step_event_id) = iterator_meta.get("step_event_id").and_then(|v| v.as_i64()) else {
            return Ok(None);
        };
        let index = iterator_meta.get("index").and_then(|v| v.as_u64()).unwrap_or(0) as usize;

        let mut loop_state = LoopState::initialize(&self.evaluator, loop_cfg, step_name, step_event_id, context)?;
        loop_state.apply_events(events);

        // Record this completion as a loop.item, in case it hasn't landed in
        // the event log as one yet (the caller persists events_to_emit after
        // this call returns).
        let mut events_to_emit = vec![EventToEmit {
            event_id: id_gen(),
            event_type: "loop.item".to_string(),
            node_name: Some(step_name.clone()),
            status: "COMPLETED".to_string(),
            parent_event_id: Some(step_event_id),
            context: None,
            result: trigger.result.clone(),
            error: None,
            meta: Some(serde_json::json!({"index": index})),
        }];

        loop_state.results.insert(
            index,
            super::loop_exec::LoopItemResult {
                index,
                item: loop_state.items.get(index).cloned().unwrap_or(serde_json::Value::Null),
                result: trigger.result.clone(),
                error: None,
            },
        );
        loop_state.dispatched.insert(index);

        let mut commands = Vec::new();

        if loop_state.is_complete() {
            events_to_emit.push(EventToEmit {
                event_id: id_gen(),
                event_type: "step_completed".to_string(),
                node_name: Some(step_name.clone()),
                status: if loop_state.has_errors() { "FAILED".to_string() } else { "COMPLETED".to_string() },
                parent_event_id: Some(step_event_id),
                context: None,
                result: Some(serde_json::Value::Array(loop_state.aggregated_results())),
                error: None,
                meta: None,
            });
        } else {
            for next_index in loop_state.next_dispatch_indices() {
                let item = loop_state.items[next_index].clone();
                let iterator = IteratorMetadata {
                    parent_execution_id: state.execution_id,
                    iterator_step: step_name.clone(),
                    index: next_index,
                    total: loop_state.total(),
                    item,
                    item_var: loop_cfg.iterator.clone(),
                };
                let command = self.command_builder.build_iteration_command(
                    id_gen(),
                    state.execution_id,
                    state.catalog_id,
                    step_event_id,
                    step,
                    context,
                    iterator,
                )?;
                commands.push(command);
            }
        }

        Ok(Some(OrchestrationResult {
            state: ExecutionState::InProgress,
            commands,
            should_complete: false,
            completion_status: None,
            events_to_emit,
        }))
    }

    /// Handle an `action_error` trigger by consulting the failing step's
    /// retry policy: retry with backoff, or fall through to terminal failure.
    fn handle_command_failed(
        &self,
        state: &WorkflowState,
        steps: &HashMap<&str, &Step>,
        context: &HashMap<String, serde_json::Value>,
        trigger: &Event,
        events: &[Event],
        id_gen: IdAllocator,
    ) -> AppResult<OrchestrationResult> {
        let Some(step_name) = &trigger.node_name else {
            return Ok(Self::idle_result(state.state));
        };
        let Some(step) = steps.get(step_name.as_str()).copied() else {
            return Ok(Self::idle_result(state.state));
        };

        let (policy, stop_when, retry_when) = RetryPolicy::from_step(step);
        let attempt = trigger.attempt.unwrap_or(1);

        let mut eval_context = context.clone();
        if let Some(result) = &trigger.result {
            eval_context.insert("result".to_string(), result.clone());
        }
        if let Some(err) = trigger.result.as_ref().and_then(|r| r.get("error")) {
            eval_context.insert("error".to_string(), err.clone());
        }

        let decision = retry::evaluate(
            &self.evaluator,
            &policy,
            stop_when.as_deref(),
            retry_when.as_deref(),
            attempt,
            true,
            &eval_context,
        )?;

        match decision {
            RetryDecision::Retry { delay, next_attempt } => {
                info!(
                    "Scheduling retry {} for step '{}' after {:?}",
                    next_attempt, step_name, delay
                );

                let issued = trigger
                    .parent_event_id
                    .and_then(|id| events.iter().find(|e| e.event_id == id));

                let events_to_emit = vec![EventToEmit {
                    event_id: id_gen(),
                    event_type: "action_retry".to_string(),
                    node_name: Some(step_name.clone()),
                    status: "SCHEDULED".to_string(),
                    parent_event_id: issued.map(|e| e.event_id),
                    context: issued.and_then(|e| e.context.clone()),
                    result: None,
                    error: trigger.result.as_ref().and_then(|r| r.get("error")).map(|v| v.to_string()),
                    meta: Some(serde_json::json!({
                        "attempt": next_attempt,
                        "delay_seconds": delay.as_secs_f64(),
                        "available_at_offset_seconds": delay.as_secs_f64(),
                    })),
                }];

                Ok(OrchestrationResult {
                    state: ExecutionState::InProgress,
                    commands: vec![],
                    should_complete: false,
                    completion_status: None,
                    events_to_emit,
                })
            }
            RetryDecision::CompleteSuccess => {
                let events_to_emit = vec![EventToEmit {
                    event_id: id_gen(),
                    event_type: "step_completed".to_string(),
                    node_name: Some(step_name.clone()),
                    status: "COMPLETED".to_string(),
                    parent_event_id: None,
                    context: None,
                    result: trigger.result.clone(),
                    error: None,
                    meta: None,
                }];

                Ok(OrchestrationResult {
                    state: ExecutionState::InProgress,
                    commands: vec![],
                    should_complete: false,
                    completion_status: None,
                    events_to_emit,
                })
            }
            RetryDecision::CompleteFailure => {
                warn!("Step '{}' exhausted retries, failing execution", step_name);
                self.handle_failure(state, step_name, "retries exhausted", id_gen)
            }
        }
    }

    /// Process an in-progress execution for non-loop, non-retry triggers.
    fn process_in_progress(
        &self,
        state: &WorkflowState,
        steps: &HashMap<&str, &Step>,
        context: &HashMap<String, serde_json::Value>,
        trigger_event_type: Option<&str>,
        id_gen: IdAllocator,
    ) -> AppResult<OrchestrationResult> {
        let mut commands = Vec::new();
        let mut events_to_emit = Vec::new();

        if !matches!(
            trigger_event_type,
            Some("action_completed") | Some("step_completed") | Some("iterator_completed")
        ) {
            return Ok(OrchestrationResult {
                state: ExecutionState::InProgress,
                commands,
                should_complete: false,
                completion_status: None,
                events_to_emit,
            });
        }

        for step_name in state.steps.keys() {
            if !state.is_step_completed(step_name) {
                continue;
            }

            let step = match steps.get(step_name.as_str()) {
                Some(s) => *s,
                None => continue,
            };

            let eval_results = self.evaluator.evaluate_next(step, context)?;

            for result in eval_results {
                if !result.matched {
                    continue;
                }

                if let Some(next_step_name) = &result.next_step {
                    if next_step_name == "end" {
                        info!("Reached 'end' step, workflow completing");
                        return Ok(OrchestrationResult {
                            state: ExecutionState::InProgress,
                            commands: vec![],
                            should_complete: true,
                            completion_status: Some(CompletionStatus {
                                status: "COMPLETED".to_string(),
                                error: None,
                                failed_steps: None,
                            }),
                            events_to_emit,
                        });
                    }

                    let next_step = match steps.get(next_step_name.as_str()) {
                        Some(s) => *s,
                        None => {
                            warn!("Next step '{}' not found in workflow", next_step_name);
                            continue;
                        }
                    };

                    if state.is_step_done(next_step_name) {
                        debug!("Step '{}' already done, skipping", next_step_name);
                        continue;
                    }

                    if state.running_steps().contains(&next_step_name.as_str()) {
                        debug!("Step '{}' already running, skipping", next_step_name);
                        continue;
                    }

                    let mut step_context = context.clone();
                    if let Some(serde_json::Value::Object(params)) = &result.with_params {
                        for (k, v) in params {
                            step_context.insert(k.clone(), v.clone());
                        }
                    }

                    info!("Transitioning to step: {}", next_step_name);

                    let (mut enter_events, mut next_commands) =
                        self.enter_step(state, next_step, &step_context, result.with_params.as_ref(), id_gen)?;
                    events_to_emit.append(&mut enter_events);
                    commands.append(&mut next_commands);
                }
            }
        }

        let should_complete = self.check_completion(state, steps)?;

        let completion_status = if should_complete {
            let failed_steps: Vec<String> = state
                .steps
                .iter()
                .filter(|(_, info)| info.error.is_some())
                .map(|(name, _)| name.clone())
                .collect();

            if failed_steps.is_empty() {
                Some(CompletionStatus {
                    status: "COMPLETED".to_string(),
                    error: None,
                    failed_steps: None,
                })
            } else {
                Some(CompletionStatus {
                    status: "FAILED".to_string(),
                    error: Some(format!("Failed steps: {}", failed_steps.join(", "))),
                    failed_steps: Some(failed_steps),
                })
            }
        } else {
            None
        };

        Ok(OrchestrationResult {
            state: ExecutionState::InProgress,
            commands,
            should_complete,
            completion_status,
            events_to_emit,
        })
    }

    /// Check if the execution should complete.
    fn check_completion(
        &self,
        state: &WorkflowState,
        steps: &HashMap<&str, &Step>,
    ) -> AppResult<bool> {
        if state.has_running_steps() {
            return Ok(false);
        }

        if state.is_step_completed("end") {
            return Ok(true);
        }

        for (name, step) in steps {
            if step.next.is_none() && state.is_step_completed(name) {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Handle a failed step that cannot be retried further.
    pub fn handle_failure(
        &self,
        _state: &WorkflowState,
        step_name: &str,
        error: &str,
        id_gen: IdAllocator,
    ) -> AppResult<OrchestrationResult> {
        info!("Handling failure for step '{}': {}", step_name, error);

        let events_to_emit = vec![EventToEmit {
            event_id: id_gen(),
            event_type: "step_completed".to_string(),
            node_name: Some(step_name.to_string()),
            status: "FAILED".to_string(),
            parent_event_id: None,
            context: None,
            result: None,
            error: Some(error.to_string()),
            meta: None,
        }];

        Ok(OrchestrationResult {
            state: ExecutionState::Failed,
            commands: vec![],
            should_complete: true,
            completion_status: Some(CompletionStatus {
                status: "FAILED".to_string(),
                error: Some(error.to_string()),
                failed_steps: Some(vec![step_name.to_string()]),
            }),
            events_to_emit,
        })
    }
}

/// Convert a serde_json::Value to HashMap (extracts top-level object keys).
fn value_to_hashmap(value: &serde_json::Value) -> HashMap<String, serde_json::Value> {
    match value {
        serde_json::Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        _ => HashMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playbook::types::{Metadata, ToolDefinition, ToolKind, ToolSpec, NextSpec};
    use chrono::Utc;

    fn id_gen_from(start: i64) -> impl FnMut() -> i64 {
        let mut next = start;
        move || {
            let id = next;
            next += 1;
            id
        }
    }

    fn make_step(name: &str, next: Option<&str>) -> Step {
        Step {
            step: name.to_string(),
            desc: None,
            spec: None,
            when: None,
            args: None,
            vars: None,
            r#loop: None,
            tool: ToolDefinition::Single(ToolSpec {
                kind: ToolKind::Python,
                auth: None,
                libs: None,
                args: None,
                code: Some("return {}".to_string()),
                url: None,
                method: None,
                query: None,
                command: None,
                connection: None,
                params: None,
                headers: None,
                eval: None,
                output_select: None,
                extra: HashMap::new(),
            }),
            next: next.map(|n| NextSpec::Single(n.to_string())),
        }
    }

    fn make_event(event_type: &str, node_name: Option<&str>) -> Event {
        Event {
            id: 1,
            execution_id: 12345,
            catalog_id: 67890,
            event_id: 1,
            parent_event_id: None,
            parent_execution_id: None,
            event_type: event_type.to_string(),
            node_id: None,
            node_name: node_name.map(|s| s.to_string()),
            node_type: None,
            status: "".to_string(),
            context: None,
            meta: None,
            result: None,
            worker_id: None,
            attempt: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_evaluate_initial_state() {
        let orchestrator = WorkflowOrchestrator::new();

        let events = vec![{
            let mut e = make_event("execution_started", None);
            e.context = Some(serde_json::json!({
                "workload": {},
                "path": "test",
                "version": "1"
            }));
            e
        }];

        let playbook = Playbook {
            api_version: "noetl.io/v2".to_string(),
            kind: "Playbook".to_string(),
            metadata: Metadata {
                name: "test_playbook".to_string(),
                path: Some("test/path".to_string()),
                description: None,
                labels: None,
                extra: HashMap::new(),
            },
            workload: None,
            keychain: None,
            workbook: None,
            workflow: vec![
                make_step("start", Some("step2")),
                make_step("step2", Some("end")),
                make_step("end", None),
            ],
        };

        let mut id_gen = id_gen_from(1000);
        let result = orchestrator.evaluate(&events, &playbook, None, &mut id_gen).unwrap();

        assert_eq!(result.state, ExecutionState::InProgress);
        assert!(!result.commands.is_empty());
        assert!(!result.events_to_emit.is_empty());
        assert_eq!(result.commands[0].command_id, 1001);
        assert_eq!(result.events_to_emit[0].event_id, 1000);
    }

    #[test]
    fn test_handle_failure() {
        let orchestrator = WorkflowOrchestrator::new();
        let state = WorkflowState::new(12345, 67890);
        let mut id_gen = id_gen_from(1);

        let result = orchestrator
            .handle_failure(&state, "failed_step", "Something went wrong", &mut id_gen)
            .unwrap();

        assert_eq!(result.state, ExecutionState::Failed);
        assert!(result.should_complete);
        assert!(result.completion_status.is_some());
        let status = result.completion_status.unwrap();
        assert_eq!(status.status, "FAILED");
        assert!(status.error.is_some());
    }

    #[test]
    fn test_command_failed_retries_before_failing() {
        let orchestrator = WorkflowOrchestrator::new();

        let mut spec = crate::playbook::types::StepSpec {
            next_mode: None,
            max_attempts: Some(2),
            retry_delay: Some(0.0),
            retry_backoff: None,
            stop_when: None,
            retry_when: None,
        };
        spec.max_attempts = Some(2);
        let mut failing_step = make_step("start", Some("end"));
        failing_step.spec = Some(spec);

        let playbook = Playbook {
            api_version: "noetl.io/v2".to_string(),
            kind: "Playbook".to_string(),
            metadata: Metadata {
                name: "test_playbook".to_string(),
                path: Some("test/path".to_string()),
                description: None,
                labels: None,
                extra: HashMap::new(),
            },
            workload: None,
            keychain: None,
            workbook: None,
            workflow: vec![failing_step, make_step("end", None)],
        };

        let started = {
            let mut e = make_event("execution_started", None);
            e.event_id = 1;
            e.context = Some(serde_json::json!({"workload": {}, "path": "test", "version": "1"}));
            e
        };
        let entered = {
            let mut e = make_event("step_started", Some("start"));
            e.event_id = 2;
            e
        };
        let issued = {
            let mut e = make_event("command.issued", Some("start"));
            e.event_id = 3;
            e.parent_event_id = Some(2);
            e
        };
        let mut failed = make_event("action_error", Some("start"));
        failed.event_id = 4;
        failed.parent_event_id = Some(3);
        failed.attempt = Some(1);
        failed.result = Some(serde_json::json!({"error": "boom"}));

        let events = vec![started, entered, issued, failed.clone()];

        let mut id_gen = id_gen_from(100);
        let result = orchestrator
            .evaluate(&events, &playbook, Some(&failed), &mut id_gen)
            .unwrap();

        assert!(!result.should_complete);
        assert_eq!(result.events_to_emit.len(), 1);
        assert_eq!(result.events_to_emit[0].event_type, "action_retry");
    }

    #[test]
    fn test_orchestration_result_serialization() {
        let result = OrchestrationResult {
            state: ExecutionState::InProgress,
            commands: vec![],
            should_complete: false,
            completion_status: None,
            events_to_emit: vec![],
        };

        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("in_progress"));
    }
}
