//! Workflow state and the typed update/merge policy.
//!
//! [`WorkflowState`] is the single record threaded through every node. The
//! graph owns it exclusively; nodes return a [`StateUpdate`] and the graph
//! applies it as a shallow merge. Append-only containers (messages,
//! research context, accumulated results, errors, generated files) are
//! concatenated; scalar slots are replaced in full. Once a slot holds data
//! it never shrinks.
//!
//! The struct derives `Serialize`/`Deserialize` and carries no live
//! handles, so a snapshot round-trips through the checkpoint encoder
//! unchanged. Ambient collaborators reach nodes through a side-channel
//! context, never through state.

use crate::agent::AgentKind;
use crate::error::{EngineError, ErrorKind, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// One conversational message recorded in state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentMessage {
    /// `user`, `assistant`, or `system`.
    pub role: String,
    pub content: String,
    /// Which node produced this message, if any.
    pub agent: Option<AgentKind>,
    pub timestamp: DateTime<Utc>,
}

impl AgentMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
            agent: None,
            timestamp: Utc::now(),
        }
    }

    pub fn agent(agent: AgentKind, content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
            agent: Some(agent),
            timestamp: Utc::now(),
        }
    }
}

/// The research modes the supervisor can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchKind {
    WebSearch,
    WorkspaceScan,
    BugAnalysis,
}

/// One keyed, append-only research finding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResearchEntry {
    pub kind: ResearchKind,
    pub query: String,
    pub findings: String,
    #[serde(default)]
    pub citations: Vec<String>,
    pub collected_at: DateTime<Utc>,
}

/// One component in the architecture document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Component {
    pub name: String,
    pub responsibility: String,
}

/// The architecture document produced by the architect node.
///
/// Re-invocation replaces the document in full; superseded revisions live
/// on in `accumulated_results`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Architecture {
    pub components: Vec<Component>,
    #[serde(default)]
    pub data_model: String,
    #[serde(default)]
    pub external_interfaces: Vec<String>,
    #[serde(default)]
    pub decisions: Vec<String>,
}

/// Record of one file materialized into the workspace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratedFile {
    /// Workspace-relative path.
    pub path: String,
    pub size: u64,
    /// Hex-encoded sha256 of the contents.
    pub hash: String,
}

/// Severity of a review issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Error,
    Warning,
    Info,
}

/// One issue found during review.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReviewIssue {
    pub severity: IssueSeverity,
    pub file: Option<String>,
    pub message: String,
}

/// Output of the reviewfix node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReviewReport {
    pub issues: Vec<ReviewIssue>,
    /// In `[0, 1]`; clamped to at most 0.50 when a validator fails.
    pub quality_score: f64,
    pub build_passed: bool,
}

/// One entry in the ordered log of per-agent results.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentResult {
    pub agent: AgentKind,
    pub summary: String,
    #[serde(default)]
    pub artifact_refs: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl AgentResult {
    pub fn new(agent: AgentKind, summary: impl Into<String>) -> Self {
        Self {
            agent,
            summary: summary.into(),
            artifact_refs: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_artifacts(mut self, refs: Vec<String>) -> Self {
        self.artifact_refs = refs;
        self
    }
}

/// One recoverable error recorded by a node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentError {
    pub agent: Option<AgentKind>,
    pub kind: ErrorKind,
    pub message: String,
    pub retriable: bool,
}

impl AgentError {
    pub fn new(agent: AgentKind, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            agent: Some(agent),
            kind,
            message: message.into(),
            retriable: kind.default_retriable(),
        }
    }

    pub fn with_retriable(mut self, retriable: bool) -> Self {
        self.retriable = retriable;
        self
    }
}

/// The shared record threaded through every node of a workflow run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowState {
    // Immutable after start.
    pub user_query: String,
    pub workspace_path: PathBuf,
    pub session_id: String,

    // Conversation and routing context.
    #[serde(default)]
    pub messages: Vec<AgentMessage>,
    /// Directive the supervisor wrote for the *next* node.
    #[serde(default)]
    pub instructions: String,

    // Result slots (monotone).
    #[serde(default)]
    pub research_context: Vec<ResearchEntry>,
    pub architecture: Option<Architecture>,
    #[serde(default)]
    pub generated_files: Vec<GeneratedFile>,
    pub review_report: Option<ReviewReport>,
    pub user_response: Option<String>,
    #[serde(default)]
    pub accumulated_results: Vec<AgentResult>,

    // Transition bookkeeping.
    #[serde(default)]
    pub iteration: u32,
    pub last_agent: Option<AgentKind>,
    #[serde(default)]
    pub executed_agents: BTreeMap<AgentKind, u32>,
    #[serde(default)]
    pub can_end_workflow: bool,
    #[serde(default)]
    pub errors: Vec<AgentError>,

    // No-progress tracking for the supervisor's forced-responder rule.
    #[serde(default)]
    pub no_progress_streak: u32,
    pub no_progress_agent: Option<AgentKind>,
}

impl WorkflowState {
    /// Create the state for a fresh run.
    pub fn new(
        user_query: impl Into<String>,
        workspace_path: impl Into<PathBuf>,
        session_id: impl Into<String>,
    ) -> Self {
        let user_query = user_query.into();
        Self {
            messages: vec![AgentMessage::user(user_query.clone())],
            user_query,
            workspace_path: workspace_path.into(),
            session_id: session_id.into(),
            instructions: String::new(),
            research_context: Vec::new(),
            architecture: None,
            generated_files: Vec::new(),
            review_report: None,
            user_response: None,
            accumulated_results: Vec::new(),
            iteration: 0,
            last_agent: None,
            executed_agents: BTreeMap::new(),
            can_end_workflow: false,
            errors: Vec::new(),
            no_progress_streak: 0,
            no_progress_agent: None,
        }
    }

    /// How many times the given node has executed.
    pub fn execution_count(&self, agent: AgentKind) -> u32 {
        self.executed_agents.get(&agent).copied().unwrap_or(0)
    }

    /// Whether any of `{responder, codesmith, reviewfix}` has run, which
    /// is the precondition for a `Finish` decision.
    pub fn finish_precondition_met(&self) -> bool {
        [AgentKind::Responder, AgentKind::Codesmith, AgentKind::ReviewFix]
            .iter()
            .any(|a| self.execution_count(*a) > 0)
    }

    /// Apply a node's update as a shallow merge and record the transition.
    ///
    /// Append-only containers are concatenated in update order; optional
    /// slots are replaced in full, never partially. The iteration counter
    /// advances by exactly one.
    pub fn apply(&mut self, agent: AgentKind, update: StateUpdate) -> Result<()> {
        let progressed = update.is_progress();
        let errored = !update.errors.is_empty();

        self.merge_update(update)?;

        self.iteration += 1;
        self.last_agent = Some(agent);
        *self.executed_agents.entry(agent).or_insert(0) += 1;

        // A return with only errors and no slot update is a no-progress
        // transition; two in a row on the same node force a responder route.
        if !progressed && errored {
            if self.no_progress_agent == Some(agent) {
                self.no_progress_streak += 1;
            } else {
                self.no_progress_agent = Some(agent);
                self.no_progress_streak = 1;
            }
        } else if progressed {
            self.no_progress_streak = 0;
            self.no_progress_agent = None;
        }

        Ok(())
    }

    /// Merge a supervisor command's update without transition bookkeeping:
    /// the iteration counter and execution tallies only move when a node
    /// runs.
    pub fn apply_command_update(&mut self, update: StateUpdate) -> Result<()> {
        self.merge_update(update)
    }

    fn merge_update(&mut self, update: StateUpdate) -> Result<()> {
        self.messages.extend(update.messages);
        self.research_context.extend(update.research_context);
        self.accumulated_results.extend(update.accumulated_results);
        self.errors.extend(update.errors);

        if let Some(instructions) = update.instructions {
            self.instructions = instructions;
        }
        if let Some(architecture) = update.architecture {
            // Replacing a non-empty document with an empty one would shrink
            // the slot; that is an invariant violation, not a merge.
            if self.architecture.as_ref().is_some_and(|a| !a.components.is_empty())
                && architecture.components.is_empty()
            {
                return Err(EngineError::StateInvariant(
                    "architecture replaced with empty document".to_string(),
                ));
            }
            self.architecture = Some(architecture);
        }
        if let Some(report) = update.review_report {
            self.review_report = Some(report);
        }
        if let Some(response) = update.user_response {
            self.user_response = Some(response);
        }
        if let Some(can_end) = update.can_end_workflow {
            self.can_end_workflow = can_end;
        }

        for file in update.generated_files {
            self.merge_generated_file(file);
        }

        Ok(())
    }

    /// Merge one generated-file record: identical `{path, hash}` is a
    /// no-op, same path with a new hash replaces the entry in place.
    fn merge_generated_file(&mut self, file: GeneratedFile) {
        if let Some(existing) = self.generated_files.iter_mut().find(|f| f.path == file.path) {
            if existing.hash != file.hash {
                *existing = file;
            }
        } else {
            self.generated_files.push(file);
        }
    }
}

/// A node's output: the typed shallow-merge patch applied by the graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StateUpdate {
    #[serde(default)]
    pub messages: Vec<AgentMessage>,
    pub instructions: Option<String>,
    #[serde(default)]
    pub research_context: Vec<ResearchEntry>,
    pub architecture: Option<Architecture>,
    #[serde(default)]
    pub generated_files: Vec<GeneratedFile>,
    pub review_report: Option<ReviewReport>,
    pub user_response: Option<String>,
    #[serde(default)]
    pub accumulated_results: Vec<AgentResult>,
    pub can_end_workflow: Option<bool>,
    #[serde(default)]
    pub errors: Vec<AgentError>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// An update carrying only error entries.
    pub fn errors_only(errors: Vec<AgentError>) -> Self {
        Self {
            errors,
            ..Self::default()
        }
    }

    pub fn with_result(mut self, result: AgentResult) -> Self {
        self.accumulated_results.push(result);
        self
    }

    pub fn with_error(mut self, error: AgentError) -> Self {
        self.errors.push(error);
        self
    }

    /// Whether this update writes to any result slot.
    ///
    /// Instruction changes and error entries alone do not count as
    /// progress; the supervisor uses this to detect stuck nodes.
    pub fn is_progress(&self) -> bool {
        !self.research_context.is_empty()
            || self.architecture.is_some()
            || !self.generated_files.is_empty()
            || self.review_report.is_some()
            || self.user_response.is_some()
            || !self.accumulated_results.is_empty()
    }

    /// Merge another update into this one (used for parallel dispatch).
    ///
    /// Append-only containers concatenate in argument order; scalar slots
    /// are last-writer-wins.
    pub fn merge(&mut self, other: StateUpdate) {
        self.messages.extend(other.messages);
        self.research_context.extend(other.research_context);
        self.generated_files.extend(other.generated_files);
        self.accumulated_results.extend(other.accumulated_results);
        self.errors.extend(other.errors);
        if other.instructions.is_some() {
            self.instructions = other.instructions;
        }
        if other.architecture.is_some() {
            self.architecture = other.architecture;
        }
        if other.review_report.is_some() {
            self.review_report = other.review_report;
        }
        if other.user_response.is_some() {
            self.user_response = other.user_response;
        }
        if other.can_end_workflow.is_some() {
            self.can_end_workflow = other.can_end_workflow;
        }
    }
}
