//! ReviewFix node: LLM review plus a build-validation probe.
//!
//! The node itself never loops; it scores the code and lets the supervisor
//! decide whether the codesmith gets another round. Validators are
//! discovered from language markers in the generated files (a `Cargo.toml`
//! triggers the rust validator, extensions trigger the rest) and invoked
//! through the bus when the manifest knows them; any reported failure
//! clamps the quality score to 0.50.

use crate::context::NodeContext;
use crate::node::AgentNode;
use crate::prompts::{truncate, REVIEWFIX_SYSTEM};
use atelier_core::{
    AgentError, AgentKind, AgentResult, ErrorKind, IssueSeverity, ReviewIssue, ReviewReport,
    StateUpdate, WorkflowState,
};
use atelier_llm::ChatRequest;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use tracing::debug;

/// Score ceiling applied when any validator reports failure.
const FAILED_BUILD_SCORE_CAP: f64 = 0.50;

pub struct ReviewFixNode;

/// JSON schema for the review verdict.
pub fn review_schema() -> Value {
    json!({
        "type": "object",
        "required": ["issues", "quality_score"],
        "properties": {
            "issues": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["severity", "message"],
                    "properties": {
                        "severity": { "type": "string", "enum": ["error", "warning", "info"] },
                        "file": { "type": ["string", "null"] },
                        "message": { "type": "string" }
                    }
                }
            },
            "quality_score": { "type": "number", "minimum": 0.0, "maximum": 1.0 }
        }
    })
}

/// Map language markers in the generated files to validator server names.
fn detect_validators(paths: &[&str]) -> Vec<&'static str> {
    let mut validators = BTreeSet::new();
    for path in paths {
        if path.ends_with("Cargo.toml") || path.ends_with(".rs") {
            validators.insert("validator-rust");
        }
        if path.ends_with(".py") || path.ends_with("pyproject.toml") {
            validators.insert("validator-python");
        }
        if path.ends_with(".ts")
            || path.ends_with(".js")
            || path.ends_with("package.json")
        {
            validators.insert("validator-node");
        }
        if path.ends_with(".go") || path.ends_with("go.mod") {
            validators.insert("validator-go");
        }
    }
    validators.into_iter().collect()
}

impl ReviewFixNode {
    fn review_prompt(&self, state: &WorkflowState, ctx: &NodeContext) -> String {
        let mut sections = vec![format!("User request: {}", state.user_query)];
        if !state.instructions.is_empty() {
            sections.push(format!("Supervisor directive: {}", state.instructions));
        }
        if let Some(architecture) = &state.architecture {
            let names: Vec<&str> = architecture.components.iter().map(|c| c.name.as_str()).collect();
            sections.push(format!("Architecture components: [{}]", names.join(", ")));
        }

        for file in &state.generated_files {
            match ctx.workspace.read_to_string(&file.path) {
                Ok(contents) => sections.push(format!(
                    "--- {} ---\n{}",
                    file.path,
                    truncate(&contents, 4000)
                )),
                Err(e) => sections.push(format!("--- {} --- (unreadable: {e})", file.path)),
            }
        }

        sections.push("Review the code and reply with the verdict JSON.".to_string());
        sections.join("\n\n")
    }

    async fn run_validators(
        &self,
        state: &WorkflowState,
        ctx: &NodeContext,
        issues: &mut Vec<ReviewIssue>,
        errors: &mut Vec<AgentError>,
    ) -> bool {
        let paths: Vec<&str> = state.generated_files.iter().map(|f| f.path.as_str()).collect();
        let mut all_passed = true;

        for validator in detect_validators(&paths) {
            if !ctx.bus.knows(validator) {
                debug!(validator, "no such validator configured; skipping");
                continue;
            }
            let result = ctx
                .call_tool(
                    AgentKind::ReviewFix,
                    validator,
                    "validate",
                    json!({"workspace": state.workspace_path.display().to_string()}),
                    None,
                )
                .await;

            match result {
                Ok(verdict) => {
                    let passed = verdict
                        .get("passed")
                        .and_then(Value::as_bool)
                        .unwrap_or(true);
                    if !passed {
                        all_passed = false;
                        let output = verdict
                            .get("output")
                            .and_then(Value::as_str)
                            .unwrap_or("validator reported failure");
                        issues.push(ReviewIssue {
                            severity: IssueSeverity::Error,
                            file: None,
                            message: format!("{validator}: {}", truncate(output, 1500)),
                        });
                    }
                }
                Err(e) => {
                    let error =
                        AgentError::new(AgentKind::ReviewFix, e.error_kind(), e.to_string());
                    ctx.emit_error(&error);
                    errors.push(error);
                }
            }
        }
        all_passed
    }
}

#[async_trait]
impl AgentNode for ReviewFixNode {
    fn kind(&self) -> AgentKind {
        AgentKind::ReviewFix
    }

    async fn run(&self, state: &WorkflowState, ctx: &NodeContext) -> StateUpdate {
        if state.generated_files.is_empty() {
            let error = AgentError::new(
                AgentKind::ReviewFix,
                ErrorKind::Internal,
                "nothing to review: no files have been generated",
            )
            .with_retriable(false);
            ctx.emit_error(&error);
            return StateUpdate::errors_only(vec![error]);
        }

        ctx.emit_thinking(AgentKind::ReviewFix, "reviewing generated files");

        let request = ChatRequest::from_prompt(REVIEWFIX_SYSTEM, self.review_prompt(state, ctx))
            .with_temperature(0.0);

        let verdict = match ctx
            .adapter
            .invoke_structured("reviewfix", request, &review_schema())
            .await
        {
            Ok(verdict) => verdict,
            Err(e) => {
                let error = AgentError::new(AgentKind::ReviewFix, e.error_kind(), e.to_string());
                ctx.emit_error(&error);
                return StateUpdate::errors_only(vec![error]);
            }
        };

        let mut issues: Vec<ReviewIssue> = verdict
            .get("issues")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        let mut quality_score = verdict
            .get("quality_score")
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
            .clamp(0.0, 1.0);

        let mut errors = Vec::new();
        let build_passed = self
            .run_validators(state, ctx, &mut issues, &mut errors)
            .await;
        if !build_passed {
            quality_score = quality_score.min(FAILED_BUILD_SCORE_CAP);
        }

        let summary = format!(
            "review: quality {quality_score:.2}, build_passed={build_passed}, {} issue(s)",
            issues.len()
        );
        ctx.emit_complete(AgentKind::ReviewFix, summary.clone());

        let mut update = StateUpdate::new();
        update.review_report = Some(ReviewReport {
            issues,
            quality_score,
            build_passed,
        });
        update
            .accumulated_results
            .push(AgentResult::new(AgentKind::ReviewFix, summary));
        update.errors = errors;
        update
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_core::{event_stream, CancellationFlag, GeneratedFile, WorkspaceWriter};
    use atelier_llm::{AgentAdapter, ChatResponse, ScriptedModel};
    use atelier_toolbus::ToolBus;
    use std::sync::Arc;

    fn ctx(model: ScriptedModel, dir: &tempfile::TempDir) -> NodeContext {
        let (sink, _sub) = event_stream("sess", 64);
        NodeContext::new(
            Arc::new(AgentAdapter::new(Arc::new(model))),
            Arc::new(ToolBus::new(vec![])),
            sink,
            Arc::new(WorkspaceWriter::bind(dir.path()).unwrap()),
            CancellationFlag::new(),
        )
    }

    fn state_with_file(dir: &tempfile::TempDir, path: &str, contents: &str) -> WorkflowState {
        std::fs::create_dir_all(dir.path().join(path).parent().unwrap()).unwrap();
        std::fs::write(dir.path().join(path), contents).unwrap();
        let mut state = WorkflowState::new("review it", dir.path(), "sess");
        state.generated_files.push(GeneratedFile {
            path: path.to_string(),
            size: contents.len() as u64,
            hash: "h".to_string(),
        });
        state
    }

    #[test]
    fn test_validator_detection() {
        assert_eq!(
            detect_validators(&["src/main.rs", "Cargo.toml"]),
            vec!["validator-rust"]
        );
        assert_eq!(detect_validators(&["app.py"]), vec!["validator-python"]);
        let mixed = detect_validators(&["a.ts", "b.go"]);
        assert!(mixed.contains(&"validator-node"));
        assert!(mixed.contains(&"validator-go"));
        assert!(detect_validators(&["README.md"]).is_empty());
    }

    #[tokio::test]
    async fn test_review_produces_report() {
        let dir = tempfile::TempDir::new().unwrap();
        let ctx = ctx(
            ScriptedModel::new(vec![ChatResponse::text(
                r#"{"issues": [{"severity": "warning", "file": "app.py",
                    "message": "missing docstring"}], "quality_score": 0.85}"#,
            )]),
            &dir,
        );
        let state = state_with_file(&dir, "app.py", "x = 1\n");

        let update = ReviewFixNode.run(&state, &ctx).await;
        let report = update.review_report.unwrap();
        assert_eq!(report.issues.len(), 1);
        assert!((report.quality_score - 0.85).abs() < 1e-9);
        // No validator servers configured: the probe passes vacuously.
        assert!(report.build_passed);
    }

    #[tokio::test]
    async fn test_nothing_to_review_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let ctx = ctx(ScriptedModel::new(vec![]), &dir);
        let state = WorkflowState::new("review", dir.path(), "sess");

        let update = ReviewFixNode.run(&state, &ctx).await;
        assert!(update.review_report.is_none());
        assert_eq!(update.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_score_clamped_into_unit_interval() {
        let dir = tempfile::TempDir::new().unwrap();
        let ctx = ctx(
            ScriptedModel::new(vec![ChatResponse::text(
                r#"{"issues": [], "quality_score": 0.999999}"#,
            )]),
            &dir,
        );
        let state = state_with_file(&dir, "app.py", "x = 1\n");

        let update = ReviewFixNode.run(&state, &ctx).await;
        let score = update.review_report.unwrap().quality_score;
        assert!((0.0..=1.0).contains(&score));
    }
}
