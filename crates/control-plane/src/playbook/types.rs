//! Playbook DSL v2 types.
//!
//! Canonical format:
//! - `tool.kind` pattern for tool configuration, single tool or task pipeline
//! - `step.when` for transition enable guards, `next[].when` for conditional routing
//! - `step.loop` for iteration, with a `spec` block for concurrency/ordering controls
//! - `tool.eval` for per-task flow control (continue/retry/break/jump/fail)
//! - no `case`/`when`/`then` blocks (deprecated, rejected by the parser)

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Supported tool kinds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Http,
    Postgres,
    Duckdb,
    Ducklake,
    Python,
    Workbook,
    Playbook,
    Playbooks,
    Secrets,
    Iterator,
    Container,
    Script,
    Snowflake,
    Transfer,
    SnowflakeTransfer,
    Gcs,
    Noop,
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ToolKind::Http => "http",
            ToolKind::Postgres => "postgres",
            ToolKind::Duckdb => "duckdb",
            ToolKind::Ducklake => "ducklake",
            ToolKind::Python => "python",
            ToolKind::Workbook => "workbook",
            ToolKind::Playbook => "playbook",
            ToolKind::Playbooks => "playbooks",
            ToolKind::Secrets => "secrets",
            ToolKind::Iterator => "iterator",
            ToolKind::Container => "container",
            ToolKind::Script => "script",
            ToolKind::Snowflake => "snowflake",
            ToolKind::Transfer => "transfer",
            ToolKind::SnowflakeTransfer => "snowflake_transfer",
            ToolKind::Gcs => "gcs",
            ToolKind::Noop => "noop",
        };
        write!(f, "{}", s)
    }
}

/// Flow-control action taken when an `eval` entry matches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EvalAction {
    Continue,
    Retry,
    Break,
    Jump,
    Fail,
}

/// A conditional `eval` clause: `expr` guards the action, absent `expr` always applies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalCondition {
    #[serde(default)]
    pub expr: Option<String>,
    pub action: String,
    #[serde(default)]
    pub target: Option<String>,
}

/// The `else` arm of an `eval` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalElse {
    pub action: String,
    #[serde(default)]
    pub target: Option<String>,
}

/// One entry of a `tool.eval` list: either a guarded condition or the trailing else.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EvalEntry {
    Condition(EvalCondition),
    Else { r#else: EvalElse },
}

/// Tool specification with the `tool.kind` pattern.
/// All execution-specific fields live under the tool block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Tool type.
    pub kind: ToolKind,

    /// Authentication / keychain reference.
    #[serde(default)]
    pub auth: Option<serde_json::Value>,

    /// Libraries/dependencies.
    #[serde(default)]
    pub libs: Option<serde_json::Value>,

    /// Default arguments.
    #[serde(default)]
    pub args: Option<serde_json::Value>,

    /// Python code (for the python tool).
    #[serde(default)]
    pub code: Option<String>,

    /// URL (for the http tool).
    #[serde(default)]
    pub url: Option<String>,

    /// HTTP method (for the http tool).
    #[serde(default)]
    pub method: Option<String>,

    /// Query/SQL (for database tools).
    #[serde(default)]
    pub query: Option<String>,

    /// Shell command (for the script/container tools).
    #[serde(default)]
    pub command: Option<String>,

    /// Connection string or credential reference.
    #[serde(default)]
    pub connection: Option<String>,

    /// Query string / body parameters.
    #[serde(default)]
    pub params: Option<serde_json::Value>,

    /// Request headers (for the http tool).
    #[serde(default)]
    pub headers: Option<serde_json::Value>,

    /// Per-task flow-control conditions, evaluated against the task result.
    #[serde(default)]
    pub eval: Option<Vec<EvalEntry>>,

    /// JSONPath-like selector applied to the raw tool result before it is stored.
    #[serde(default)]
    pub output_select: Option<String>,

    /// Additional tool-specific configuration.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// A step's tool configuration: either a single tool invocation or a labeled pipeline
/// of tasks executed in sequence (`tool: [- label: {kind: ...}, ...]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolDefinition {
    Single(ToolSpec),
    Pipeline(Vec<HashMap<String, ToolSpec>>),
}

/// Loop execution mode.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoopMode {
    #[default]
    Sequential,
    Parallel,
    Async,
}

/// Advanced loop controls nested under `loop.spec`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoopSpec {
    /// Execution mode as a raw string (parsed via `NextMode`-style helpers by the evaluator).
    #[serde(default)]
    pub mode: Option<String>,

    /// Maximum number of iterations in flight at once (async mode).
    #[serde(default)]
    pub concurrency: Option<i64>,

    /// Legacy alias for `concurrency`.
    #[serde(default)]
    pub max_in_flight: Option<i64>,

    /// Jinja expression filtering which items are iterated.
    #[serde(default, rename = "where")]
    pub r#where: Option<String>,

    /// Field/expression to sort the aggregated results by.
    #[serde(default)]
    pub order_by: Option<String>,

    /// Cap on the number of items iterated.
    #[serde(default)]
    pub limit: Option<i64>,

    /// Number of items processed per batch.
    #[serde(default)]
    pub chunk: Option<i64>,
}

/// Step-level loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Loop {
    /// Jinja expression for collection to iterate over.
    #[serde(rename = "in")]
    pub in_expr: String,

    /// Variable name for each item.
    pub iterator: String,

    /// Execution mode (simple form).
    #[serde(default)]
    pub mode: LoopMode,

    /// Advanced concurrency/ordering controls.
    #[serde(default)]
    pub spec: Option<LoopSpec>,
}

/// Target for a next transition (legacy canonical `next: [{step, when, args}]` form).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NextTarget {
    /// Target step name.
    pub step: String,

    /// Conditional routing guard, evaluated after the step completes.
    #[serde(default)]
    pub when: Option<String>,

    /// Arguments to pass to the target step.
    #[serde(default)]
    pub args: Option<HashMap<String, serde_json::Value>>,
}

/// Alias kept for callers that refer to the canonical next-target shape by this name.
pub type CanonicalNextTarget = NextTarget;

/// Mode controls nested under `next.spec`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NextRouterSpec {
    /// "exclusive" (first match wins, default) or "inclusive" (all matches fire).
    #[serde(default)]
    pub mode: Option<String>,
}

/// One routing arc in the `next.arcs` canonical router form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NextArc {
    /// Target step name.
    pub step: String,

    /// Conditional routing guard. Absent guard always matches.
    #[serde(default)]
    pub when: Option<String>,

    /// Arguments to pass to the target step.
    #[serde(default)]
    pub args: Option<HashMap<String, serde_json::Value>>,
}

/// Router form of `next`: `{spec: {mode}, arcs: [...]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NextRouter {
    #[serde(default)]
    pub spec: Option<NextRouterSpec>,
    pub arcs: Vec<NextArc>,
}

/// Next step specification - single name, list of names, router with arcs, or
/// a flat list of targets (legacy canonical shorthand for a router with
/// exclusive-mode arcs).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NextSpec {
    /// Single step name.
    Single(String),

    /// List of step names (unconditional parallel branches).
    List(Vec<String>),

    /// Router with explicit mode and arcs.
    Router(NextRouter),

    /// Flat list of targets with optional `when`/`args` (legacy canonical form).
    Targets(Vec<NextTarget>),
}

/// Step-level settings nested under `step.spec`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StepSpec {
    /// Evaluation mode for `next[].when`/`next.arcs[].when`: "exclusive" or "inclusive".
    #[serde(default)]
    pub next_mode: Option<String>,

    /// Maximum retry attempts for this step's command, overriding the queue default.
    #[serde(default)]
    pub max_attempts: Option<i32>,

    /// Initial retry delay in seconds.
    #[serde(default)]
    pub retry_delay: Option<f64>,

    /// Retry backoff multiplier.
    #[serde(default)]
    pub retry_backoff: Option<f64>,

    /// Jinja expression: if true, stop retrying and complete (successfully).
    #[serde(default)]
    pub stop_when: Option<String>,

    /// Jinja expression: if true (and attempts remain), retry.
    #[serde(default)]
    pub retry_when: Option<String>,
}

/// Workflow step with event-driven control flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Step name (unique identifier).
    pub step: String,

    /// Step description.
    #[serde(default)]
    pub desc: Option<String>,

    /// Step-level settings (retry policy, next-evaluation mode).
    #[serde(default)]
    pub spec: Option<StepSpec>,

    /// Enable guard evaluated before the step runs. Absent guard always runs.
    #[serde(default)]
    pub when: Option<String>,

    /// Input arguments for this step (from previous steps or templates).
    #[serde(default)]
    pub args: Option<HashMap<String, serde_json::Value>>,

    /// Variables to extract from step result.
    #[serde(default)]
    pub vars: Option<HashMap<String, serde_json::Value>>,

    /// Loop configuration.
    #[serde(default)]
    pub r#loop: Option<Loop>,

    /// Tool configuration: single tool or pipeline.
    pub tool: ToolDefinition,

    /// Structural next step(s), optionally conditional.
    #[serde(default)]
    pub next: Option<NextSpec>,
}

/// Reusable task definition in workbook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkbookTask {
    /// Task name.
    pub name: String,

    /// Tool configuration.
    pub tool: ToolSpec,

    /// Optional sink configuration.
    #[serde(default)]
    pub sink: Option<serde_json::Value>,
}

/// Keychain entry for credential/token definitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeychainDef {
    /// Keychain entry name.
    pub name: String,

    /// Credential reference.
    #[serde(default)]
    pub credential: Option<String>,

    /// Token type.
    #[serde(default)]
    pub token_type: Option<String>,

    /// Scope type.
    #[serde(default)]
    pub scope: Option<String>,

    /// Auto-renew flag.
    #[serde(default)]
    pub auto_renew: bool,

    /// Additional configuration.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Playbook metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// Playbook name (required).
    pub name: String,

    /// Resource path.
    #[serde(default)]
    pub path: Option<String>,

    /// Description.
    #[serde(default)]
    pub description: Option<String>,

    /// Labels for filtering.
    #[serde(default)]
    pub labels: Option<HashMap<String, String>>,

    /// Additional metadata.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Complete workflow definition (v2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playbook {
    /// API version (noetl.io/v2).
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (Playbook).
    pub kind: String,

    /// Metadata (name, path, labels).
    pub metadata: Metadata,

    /// Global workflow variables.
    #[serde(default)]
    pub workload: Option<serde_json::Value>,

    /// Keychain definitions for credentials and tokens.
    #[serde(default)]
    pub keychain: Option<Vec<KeychainDef>>,

    /// Reusable tasks.
    #[serde(default)]
    pub workbook: Option<Vec<WorkbookTask>>,

    /// Workflow steps.
    pub workflow: Vec<Step>,
}

impl Playbook {
    /// Check if workflow has a start step.
    pub fn has_start_step(&self) -> bool {
        self.workflow.iter().any(|s| s.step == "start")
    }

    /// Get a step by name.
    pub fn get_step(&self, name: &str) -> Option<&Step> {
        self.workflow.iter().find(|s| s.step == name)
    }

    /// Get all step names.
    pub fn step_names(&self) -> Vec<&str> {
        self.workflow.iter().map(|s| s.step.as_str()).collect()
    }

    /// Get the resource path.
    pub fn path(&self) -> Option<&str> {
        self.metadata.path.as_deref()
    }

    /// Get the playbook name.
    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

// ============================================================================
// Tool Call and Command Models
// ============================================================================

/// Tool invocation details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool kind.
    pub kind: ToolKind,

    /// Tool-specific configuration.
    #[serde(default)]
    pub config: HashMap<String, serde_json::Value>,
}

impl ToolCall {
    /// Create from a ToolSpec.
    pub fn from_spec(spec: &ToolSpec) -> Self {
        let mut config = spec.extra.clone();

        if let Some(ref auth) = spec.auth {
            config.insert("auth".to_string(), auth.clone());
        }
        if let Some(ref libs) = spec.libs {
            config.insert("libs".to_string(), libs.clone());
        }
        if let Some(ref args) = spec.args {
            config.insert("args".to_string(), args.clone());
        }
        if let Some(ref code) = spec.code {
            config.insert("code".to_string(), serde_json::Value::String(code.clone()));
        }
        if let Some(ref url) = spec.url {
            config.insert("url".to_string(), serde_json::Value::String(url.clone()));
        }
        if let Some(ref method) = spec.method {
            config.insert(
                "method".to_string(),
                serde_json::Value::String(method.clone()),
            );
        }
        if let Some(ref query) = spec.query {
            config.insert(
                "query".to_string(),
                serde_json::Value::String(query.clone()),
            );
        }
        if let Some(ref command) = spec.command {
            config.insert(
                "command".to_string(),
                serde_json::Value::String(command.clone()),
            );
        }
        if let Some(ref connection) = spec.connection {
            config.insert(
                "connection".to_string(),
                serde_json::Value::String(connection.clone()),
            );
        }
        if let Some(ref params) = spec.params {
            config.insert("params".to_string(), params.clone());
        }
        if let Some(ref headers) = spec.headers {
            config.insert("headers".to_string(), headers.clone());
        }
        if let Some(ref output_select) = spec.output_select {
            config.insert(
                "output_select".to_string(),
                serde_json::Value::String(output_select.clone()),
            );
        }

        Self {
            kind: spec.kind.clone(),
            config,
        }
    }
}

/// Command to be executed by worker (legacy flat shape kept for the HTTP client/tests;
/// the engine's own `Command` in `engine::commands` is the canonical wire shape).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    /// Execution identifier.
    pub execution_id: String,

    /// Step name.
    pub step: String,

    /// Tool invocation details.
    pub tool: ToolCall,

    /// Step input arguments.
    #[serde(default)]
    pub args: Option<HashMap<String, serde_json::Value>>,

    /// Full render context for Jinja2 templates.
    #[serde(default)]
    pub render_context: HashMap<String, serde_json::Value>,

    /// Attempt number for retries.
    #[serde(default = "default_attempt")]
    pub attempt: i32,

    /// Command priority (higher = more urgent).
    #[serde(default)]
    pub priority: i32,

    /// Retry backoff delay in seconds.
    #[serde(default)]
    pub backoff: Option<f64>,

    /// Maximum retry attempts.
    #[serde(default)]
    pub max_attempts: Option<i32>,

    /// Initial retry delay in seconds.
    #[serde(default)]
    pub retry_delay: Option<f64>,

    /// Retry backoff strategy.
    #[serde(default)]
    pub retry_backoff: Option<String>,

    /// Additional metadata.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

fn default_attempt() -> i32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_playbook() {
        let yaml = r#"
apiVersion: noetl.io/v2
kind: Playbook
metadata:
  name: test_playbook
  path: test/simple
workflow:
  - step: start
    tool:
      kind: python
      code: |
        return {"status": "ok"}
    next:
      - step: end
  - step: end
    tool:
      kind: python
      code: |
        return {"status": "done"}
"#;

        let playbook: Playbook = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(playbook.api_version, "noetl.io/v2");
        assert_eq!(playbook.kind, "Playbook");
        assert_eq!(playbook.name(), "test_playbook");
        assert!(playbook.has_start_step());
        assert_eq!(playbook.workflow.len(), 2);
    }

    #[test]
    fn test_parse_playbook_with_loop() {
        let yaml = r#"
apiVersion: noetl.io/v2
kind: Playbook
metadata:
  name: loop_test
workload:
  items: [1, 2, 3]
workflow:
  - step: start
    loop:
      in: "{{ workload.items }}"
      iterator: item
      mode: sequential
    tool:
      kind: python
      code: |
        return {"item": input_data.get("item")}
    args:
      item: "{{ item }}"
"#;

        let playbook: Playbook = serde_yaml::from_str(yaml).unwrap();
        let step = playbook.get_step("start").unwrap();
        assert!(step.r#loop.is_some());
        let loop_config = step.r#loop.as_ref().unwrap();
        assert_eq!(loop_config.iterator, "item");
        assert_eq!(loop_config.mode, LoopMode::Sequential);
    }

    #[test]
    fn test_parse_playbook_with_router_next() {
        let yaml = r#"
apiVersion: noetl.io/v2
kind: Playbook
metadata:
  name: router_test
workflow:
  - step: start
    tool:
      kind: python
      code: |
        return {"value": 10}
    next:
      arcs:
        - step: high
          when: "{{ start.value > 5 }}"
        - step: low
          when: "{{ start.value <= 5 }}"
  - step: high
    tool:
      kind: noop
  - step: low
    tool:
      kind: noop
"#;

        let playbook: Playbook = serde_yaml::from_str(yaml).unwrap();
        let step = playbook.get_step("start").unwrap();
        match step.next.as_ref().unwrap() {
            NextSpec::Router(router) => assert_eq!(router.arcs.len(), 2),
            other => panic!("expected router next, got {:?}", other),
        }
    }

    #[test]
    fn test_tool_call_from_spec() {
        let spec = ToolSpec {
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
        };

        let call = ToolCall::from_spec(&spec);
        assert_eq!(call.kind, ToolKind::Python);
        assert!(call.config.contains_key("code"));
    }

    #[test]
    fn test_step_names() {
        let yaml = r#"
apiVersion: noetl.io/v2
kind: Playbook
metadata:
  name: test
workflow:
  - step: start
    tool:
      kind: python
      code: ""
  - step: process
    tool:
      kind: python
      code: ""
  - step: end
    tool:
      kind: python
      code: ""
"#;

        let playbook: Playbook = serde_yaml::from_str(yaml).unwrap();
        let names = playbook.step_names();
        assert_eq!(names, vec!["start", "process", "end"]);
    }
}
