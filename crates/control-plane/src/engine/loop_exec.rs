//! Loop iteration state, reconstructed from the event log.
//!
//! A loop's state is keyed by `(execution_id, step_name, step_event_id)`
//! where `step_event_id` is the `event_id` of the `step_started` event that
//! started this instance of the step. Two invocations of a step that share
//! a name (retry, recursion, DAG reconvergence) never share loop state
//! because they carry distinct `step_event_id`s.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::db::models::Event;
use crate::engine::evaluator::ConditionEvaluator;
use crate::error::AppResult;
use crate::playbook::types::{Loop, LoopMode};

/// One iteration's outcome, recorded by a `loop.item` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopItemResult {
    pub index: usize,
    pub item: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

/// Reconstructed state of one loop instance.
#[derive(Debug, Clone)]
pub struct LoopState {
    pub step_name: String,
    pub step_event_id: i64,
    pub items: Vec<serde_json::Value>,
    pub mode: LoopMode,
    pub concurrency: usize,
    pub order_by: Option<String>,
    /// Results keyed by original item index; `None` until that index completes.
    pub results: HashMap<usize, LoopItemResult>,
    /// Indices already dispatched (claimed a command), whether or not completed.
    pub dispatched: std::collections::HashSet<usize>,
}

impl LoopState {
    /// Build the initial state for a step that is entering its loop for the
    /// first time: evaluate `in`, apply `where`/`order_by`/`limit`/`chunk`.
    pub fn initialize(
        evaluator: &ConditionEvaluator,
        loop_cfg: &Loop,
        step_name: &str,
        step_event_id: i64,
        context: &HashMap<String, serde_json::Value>,
    ) -> AppResult<Self> {
        let mut items = evaluator.evaluate_loop(&loop_cfg.in_expr, context)?;

        let spec = loop_cfg.spec.clone().unwrap_or_default();

        if let Some(where_expr) = spec.r#where.as_ref() {
            let mut filtered = Vec::new();
            for item in items {
                let mut item_ctx = context.clone();
                item_ctx.insert(loop_cfg.iterator.clone(), item.clone());
                if evaluator.evaluate_condition(where_expr, &item_ctx)? {
                    filtered.push(item);
                }
            }
            items = filtered;
        }

        if let Some(limit) = spec.limit {
            items.truncate(limit.max(0) as usize);
        }

        let mode = match spec.mode.as_deref() {
            Some("async") => LoopMode::Async,
            Some("sequential") => LoopMode::Sequential,
            Some("parallel") => LoopMode::Parallel,
            _ => loop_cfg.mode.clone(),
        };

        let concurrency = spec
            .concurrency
            .or(spec.max_in_flight)
            .map(|c| c.max(1) as usize)
            .unwrap_or(match mode {
                LoopMode::Sequential => 1,
                LoopMode::Parallel | LoopMode::Async => 4,
            });

        Ok(Self {
            step_name: step_name.to_string(),
            step_event_id,
            items,
            mode,
            concurrency,
            order_by: spec.order_by.clone(),
            results: HashMap::new(),
            dispatched: std::collections::HashSet::new(),
        })
    }

    /// Reconstruct the running state of a loop from its `loop.item` events.
    ///
    /// A `loop.item` belongs to this instance when its `parent_event_id`
    /// points at this loop's `step_started` event.
    pub fn apply_events(&mut self, events: &[Event]) {
        for event in events {
            if event.event_type != "loop.item" {
                continue;
            }
            if event.parent_event_id != Some(self.step_event_id) {
                continue;
            }
            let Some(index) = event
                .meta
                .as_ref()
                .and_then(|meta| meta.get("index"))
                .and_then(|v| v.as_u64())
            else {
                continue;
            };
            let index = index as usize;
            self.dispatched.insert(index);
            let item = self.items.get(index).cloned().unwrap_or(serde_json::Value::Null);
            let error = event
                .result
                .as_ref()
                .and_then(|r| r.get("error"))
                .and_then(|e| e.as_str())
                .map(|s| s.to_string());
            self.results.insert(
                index,
                LoopItemResult {
                    index,
                    item,
                    result: event.result.clone(),
                    error,
                },
            );
        }
    }

    pub fn total(&self) -> usize {
        self.items.len()
    }

    pub fn completed_count(&self) -> usize {
        self.results.len()
    }

    pub fn is_complete(&self) -> bool {
        self.completed_count() >= self.total()
    }

    /// Indices that still need a command dispatched, respecting concurrency.
    pub fn next_dispatch_indices(&self) -> Vec<usize> {
        if self.total() == 0 {
            return Vec::new();
        }

        let in_flight = self.dispatched.difference(&self.results.keys().copied().collect()).count();

        match self.mode {
            LoopMode::Sequential => {
                if in_flight > 0 {
                    return Vec::new();
                }
                (0..self.total())
                    .find(|i| !self.dispatched.contains(i))
                    .into_iter()
                    .collect()
            }
            LoopMode::Parallel | LoopMode::Async => {
                let slots = self.concurrency.saturating_sub(in_flight);
                (0..self.total())
                    .filter(|i| !self.dispatched.contains(i))
                    .take(slots)
                    .collect()
            }
        }
    }

    /// Aggregate the completed results, honoring `order_by` if configured;
    /// otherwise returns them in original index order for sequential mode,
    /// or completion order for async (index order is used as a stable
    /// approximation since arrival order isn't retained in the event log
    /// beyond insertion order).
    pub fn aggregated_results(&self) -> Vec<serde_json::Value> {
        let mut entries: Vec<&LoopItemResult> = self.results.values().collect();
        entries.sort_by_key(|r| r.index);

        if let Some(field) = &self.order_by {
            entries.sort_by(|a, b| {
                let av = a
                    .result
                    .as_ref()
                    .and_then(|r| r.get(field))
                    .map(|v| v.to_string())
                    .unwrap_or_default();
                let bv = b
                    .result
                    .as_ref()
                    .and_then(|r| r.get(field))
                    .map(|v| v.to_string())
                    .unwrap_or_default();
                av.cmp(&bv)
            });
        }

        entries
            .into_iter()
            .map(|r| {
                r.result
                    .clone()
                    .unwrap_or(serde_json::json!({"error": r.error}))
            })
            .collect()
    }

    pub fn has_errors(&self) -> bool {
        self.results.values().any(|r| r.error.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playbook::types::LoopSpec;
    use chrono::Utc;

    fn make_loop() -> Loop {
        Loop {
            in_expr: "{{ items }}".to_string(),
            iterator: "item".to_string(),
            mode: LoopMode::Sequential,
            spec: Some(LoopSpec {
                mode: Some("async".to_string()),
                concurrency: Some(2),
                ..Default::default()
            }),
        }
    }

    fn make_loop_item_event(step_event_id: i64, index: usize, result: serde_json::Value) -> Event {
        Event {
            id: 1,
            execution_id: 1,
            catalog_id: 1,
            event_id: 100 + index as i64,
            parent_event_id: Some(step_event_id),
            parent_execution_id: None,
            event_type: "loop.item".to_string(),
            node_id: None,
            node_name: Some("fan_out".to_string()),
            node_type: None,
            status: "COMPLETED".to_string(),
            context: None,
            meta: Some(serde_json::json!({"step_event_id": step_event_id, "index": index})),
            result: Some(result),
            worker_id: None,
            attempt: Some(1),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn initialize_evaluates_collection() {
        let evaluator = ConditionEvaluator::new();
        let loop_cfg = make_loop();
        let mut ctx = HashMap::new();
        ctx.insert("items".to_string(), serde_json::json!(["a", "b", "c"]));

        let state = LoopState::initialize(&evaluator, &loop_cfg, "fan_out", 42, &ctx).unwrap();
        assert_eq!(state.total(), 3);
        assert_eq!(state.concurrency, 2);
        assert!(matches!(state.mode, LoopMode::Async));
    }

    #[test]
    fn dispatch_respects_concurrency_until_results_land() {
        let evaluator = ConditionEvaluator::new();
        let loop_cfg = make_loop();
        let mut ctx = HashMap::new();
        ctx.insert("items".to_string(), serde_json::json!(["a", "b", "c"]));
        let mut state = LoopState::initialize(&evaluator, &loop_cfg, "fan_out", 42, &ctx).unwrap();

        let batch = state.next_dispatch_indices();
        assert_eq!(batch.len(), 2);
        for i in &batch {
            state.dispatched.insert(*i);
        }

        // No results yet: no more slots available.
        assert!(state.next_dispatch_indices().is_empty());
    }

    #[test]
    fn isolation_across_distinct_step_event_ids() {
        let evaluator = ConditionEvaluator::new();
        let loop_cfg = make_loop();
        let mut ctx = HashMap::new();
        ctx.insert("items".to_string(), serde_json::json!(["x", "y"]));

        let mut state_a = LoopState::initialize(&evaluator, &loop_cfg, "process", 1, &ctx).unwrap();
        let mut state_b = LoopState::initialize(&evaluator, &loop_cfg, "process", 2, &ctx).unwrap();

        let events = vec![
            make_loop_item_event(1, 0, serde_json::json!({"v": "x-done"})),
            make_loop_item_event(2, 0, serde_json::json!({"v": "y-done"})),
        ];

        state_a.apply_events(&events);
        state_b.apply_events(&events);

        assert_eq!(state_a.results.len(), 1);
        assert_eq!(state_b.results.len(), 1);
        assert_eq!(
            state_a.results.get(&0).unwrap().result,
            Some(serde_json::json!({"v": "x-done"}))
        );
        assert_eq!(
            state_b.results.get(&0).unwrap().result,
            Some(serde_json::json!({"v": "y-done"}))
        );
    }
}
