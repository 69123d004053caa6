//! Research node: gathers context before anything is designed or built.
//!
//! The supervisor's instructions select the mode: web search, workspace
//! scan, or bug analysis. Every run appends a keyed entry to
//! `research_context`; earlier entries are never overwritten.

use crate::context::NodeContext;
use crate::node::AgentNode;
use crate::prompts::{truncate, RESEARCH_SYSTEM};
use atelier_core::{
    AgentError, AgentKind, AgentResult, ErrorKind, ResearchEntry, ResearchKind, StateUpdate,
    WorkflowState,
};
use atelier_llm::ChatRequest;
use atelier_toolbus::BusError;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::debug;

pub struct ResearchNode;

/// Pick the research mode from the supervisor's directive.
fn research_mode(instructions: &str) -> ResearchKind {
    let lower = instructions.to_ascii_lowercase();
    if lower.contains("web") || lower.contains("search") {
        ResearchKind::WebSearch
    } else if lower.contains("bug") {
        ResearchKind::BugAnalysis
    } else {
        ResearchKind::WorkspaceScan
    }
}

/// Retriability per the node contract: a missing external service is
/// worth retrying, a malformed payload is not.
fn bus_error_entry(e: &BusError) -> AgentError {
    let retriable = !matches!(e, BusError::CallFailed { .. } | BusError::Protocol { .. });
    AgentError::new(AgentKind::Research, e.error_kind(), e.to_string()).with_retriable(retriable)
}

fn entry(kind: ResearchKind, query: String, findings: String, citations: Vec<String>) -> ResearchEntry {
    ResearchEntry {
        kind,
        query,
        findings,
        citations,
        collected_at: Utc::now(),
    }
}

impl ResearchNode {
    async fn web_search(&self, state: &WorkflowState, ctx: &NodeContext) -> StateUpdate {
        let query = if state.instructions.is_empty() {
            state.user_query.clone()
        } else {
            state.instructions.clone()
        };

        let result = ctx
            .call_tool(
                AgentKind::Research,
                "web-search",
                "search",
                json!({"query": query, "max_results": 5}),
                None,
            )
            .await;

        let raw = match result {
            Ok(raw) => raw,
            Err(e) => {
                let error = bus_error_entry(&e);
                ctx.emit_error(&error);
                return StateUpdate::errors_only(vec![error]);
            }
        };

        let citations = extract_citations(&raw);
        let corpus = flatten_tool_text(&raw);

        let request = ChatRequest::from_prompt(
            RESEARCH_SYSTEM,
            format!(
                "Summarize these web search results for the query `{query}`. \
                 Keep every load-bearing fact.\n\n{}",
                truncate(&corpus, 6000)
            ),
        );
        match ctx.adapter.invoke("research", request).await {
            Ok(response) => {
                finish(ctx, entry(ResearchKind::WebSearch, query, response.content, citations))
            }
            Err(e) => {
                let error = AgentError::new(AgentKind::Research, e.error_kind(), e.to_string());
                ctx.emit_error(&error);
                StateUpdate::errors_only(vec![error])
            }
        }
    }

    async fn workspace_scan(&self, state: &WorkflowState, ctx: &NodeContext) -> StateUpdate {
        let mut errors = Vec::new();

        // Prefer the code-index server; fall back to walking the workspace
        // ourselves so an offline run still produces findings.
        let files: Vec<String> = match ctx
            .call_tool(
                AgentKind::Research,
                "code-index",
                "list_files",
                json!({"path": state.workspace_path.display().to_string()}),
                None,
            )
            .await
        {
            Ok(raw) => raw
                .get("files")
                .and_then(Value::as_array)
                .map(|a| {
                    a.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_else(|| vec![flatten_tool_text(&raw)]),
            Err(e) => {
                debug!(error = %e, "code-index unavailable, scanning workspace locally");
                let error = bus_error_entry(&e);
                ctx.emit_error(&error);
                errors.push(error);
                match ctx.workspace.list_files() {
                    Ok(files) => files,
                    Err(e) => {
                        errors.push(
                            AgentError::new(AgentKind::Research, ErrorKind::Internal, e.to_string())
                                .with_retriable(false),
                        );
                        return StateUpdate::errors_only(errors);
                    }
                }
            }
        };

        let request = ChatRequest::from_prompt(
            RESEARCH_SYSTEM,
            format!(
                "Summarize the structure of this workspace for an engineer \
                 about to modify it. Files:\n{}",
                truncate(&files.join("\n"), 6000)
            ),
        );
        match ctx.adapter.invoke("research", request).await {
            Ok(response) => {
                let mut update = finish(
                    ctx,
                    entry(
                        ResearchKind::WorkspaceScan,
                        "workspace scan".to_string(),
                        response.content,
                        files,
                    ),
                );
                update.errors.extend(errors);
                update
            }
            Err(e) => {
                errors.push(AgentError::new(
                    AgentKind::Research,
                    e.error_kind(),
                    e.to_string(),
                ));
                StateUpdate::errors_only(errors)
            }
        }
    }

    async fn bug_analysis(&self, state: &WorkflowState, ctx: &NodeContext) -> StateUpdate {
        let mut errors = Vec::new();
        let mut sources = String::new();

        // Structure first, raw text as a fallback.
        match ctx
            .call_tool(
                AgentKind::Research,
                "code-parse",
                "parse",
                json!({"path": state.workspace_path.display().to_string()}),
                None,
            )
            .await
        {
            Ok(raw) => sources.push_str(&flatten_tool_text(&raw)),
            Err(e) => {
                let error = bus_error_entry(&e);
                ctx.emit_error(&error);
                errors.push(error);
                if let Ok(files) = ctx.workspace.list_files() {
                    for path in files.iter().take(5) {
                        if let Ok(contents) = ctx.workspace.read_to_string(path) {
                            sources.push_str(&format!("--- {path}\n{}\n", truncate(&contents, 2000)));
                        }
                    }
                }
            }
        }

        let request = ChatRequest::from_prompt(
            RESEARCH_SYSTEM,
            format!(
                "Analyze the following code for the defect described in \
                 `{}`. Identify likely root causes with file references.\n\n{}",
                if state.instructions.is_empty() {
                    &state.user_query
                } else {
                    &state.instructions
                },
                truncate(&sources, 8000)
            ),
        );
        match ctx.adapter.invoke("research", request).await {
            Ok(response) => {
                let mut update = finish(
                    ctx,
                    entry(
                        ResearchKind::BugAnalysis,
                        state.user_query.clone(),
                        response.content,
                        vec![],
                    ),
                );
                update.errors.extend(errors);
                update
            }
            Err(e) => {
                errors.push(AgentError::new(
                    AgentKind::Research,
                    e.error_kind(),
                    e.to_string(),
                ));
                StateUpdate::errors_only(errors)
            }
        }
    }
}

fn finish(ctx: &NodeContext, entry: ResearchEntry) -> StateUpdate {
    let summary = format!(
        "research[{:?}]: {}",
        entry.kind,
        truncate(&entry.findings, 200)
    );
    ctx.emit_complete(AgentKind::Research, summary.clone());

    let mut update = StateUpdate::new();
    update.research_context.push(entry);
    update
        .accumulated_results
        .push(AgentResult::new(AgentKind::Research, summary));
    update
}

/// Join the text parts of an MCP-style `{content: [{type: "text", ...}]}`
/// result; fall back to the raw JSON for anything else.
fn flatten_tool_text(value: &Value) -> String {
    value
        .get("content")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| value.to_string())
}

fn extract_citations(value: &Value) -> Vec<String> {
    value
        .get("results")
        .and_then(Value::as_array)
        .map(|results| {
            results
                .iter()
                .filter_map(|r| r.get("url").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl AgentNode for ResearchNode {
    fn kind(&self) -> AgentKind {
        AgentKind::Research
    }

    async fn run(&self, state: &WorkflowState, ctx: &NodeContext) -> StateUpdate {
        let mode = research_mode(&state.instructions);
        ctx.emit_thinking(AgentKind::Research, format!("starting {mode:?}"));

        match mode {
            ResearchKind::WebSearch => self.web_search(state, ctx).await,
            ResearchKind::WorkspaceScan => self.workspace_scan(state, ctx).await,
            ResearchKind::BugAnalysis => self.bug_analysis(state, ctx).await,
        }
    }
}
