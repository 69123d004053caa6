//! Codesmith node: turns the architecture into files on disk.
//!
//! The model's reply is parsed with the file-block contract; every
//! declared path is validated twice (parser and workspace writer) before
//! anything is written. Identical re-writes are no-ops, replaced contents
//! emit a `file_overwritten` notice, and a rejected path becomes a
//! `path_escape` error without terminating the workflow.

use crate::context::NodeContext;
use crate::file_blocks::{format_instructions, parse_file_blocks};
use crate::node::AgentNode;
use crate::prompts::{truncate, CODESMITH_SYSTEM};
use atelier_core::{
    content_hash, AgentError, AgentKind, AgentResult, EngineError, EngineEvent, ErrorKind,
    GeneratedFile, StateUpdate, WorkflowState,
};
use atelier_llm::ChatRequest;
use async_trait::async_trait;
use tracing::debug;

pub struct CodesmithNode;

impl CodesmithNode {
    fn generation_prompt(&self, state: &WorkflowState) -> String {
        let mut sections = vec![format!("User request: {}", state.user_query)];

        if !state.instructions.is_empty() {
            sections.push(format!("Supervisor directive: {}", state.instructions));
        }
        if let Some(architecture) = &state.architecture {
            sections.push(format!(
                "Architecture:\n{}",
                serde_json::to_string_pretty(architecture).unwrap_or_default()
            ));
        }
        for entry in &state.research_context {
            sections.push(format!(
                "Research [{:?}]: {}",
                entry.kind,
                truncate(&entry.findings, 1200)
            ));
        }
        if !state.generated_files.is_empty() {
            let paths: Vec<&str> = state
                .generated_files
                .iter()
                .map(|f| f.path.as_str())
                .collect();
            sections.push(format!(
                "Files already generated (re-emit any you change): {}",
                paths.join(", ")
            ));
        }
        if let Some(report) = &state.review_report {
            let issues: Vec<String> = report
                .issues
                .iter()
                .map(|i| {
                    format!(
                        "- [{:?}] {}{}",
                        i.severity,
                        i.file.as_deref().map(|f| format!("{f}: ")).unwrap_or_default(),
                        i.message
                    )
                })
                .collect();
            if !issues.is_empty() {
                sections.push(format!("Open review issues to fix:\n{}", issues.join("\n")));
            }
        }

        sections.push(format_instructions().to_string());
        sections.join("\n\n")
    }
}

#[async_trait]
impl AgentNode for CodesmithNode {
    fn kind(&self) -> AgentKind {
        AgentKind::Codesmith
    }

    async fn run(&self, state: &WorkflowState, ctx: &NodeContext) -> StateUpdate {
        ctx.emit_thinking(AgentKind::Codesmith, "generating code");

        let request = ChatRequest::from_prompt(CODESMITH_SYSTEM, self.generation_prompt(state))
            .with_temperature(0.2);

        let response = match ctx.adapter.invoke("codesmith", request).await {
            Ok(response) => response,
            Err(e) => {
                let error = AgentError::new(AgentKind::Codesmith, e.error_kind(), e.to_string());
                ctx.emit_error(&error);
                return StateUpdate::errors_only(vec![error]);
            }
        };

        let (blocks, rejected) = parse_file_blocks(&response.content);
        let mut update = StateUpdate::new();

        for rejection in rejected {
            let kind = if rejection.reason.contains("path") || rejection.reason.contains("..") {
                ErrorKind::PathEscape
            } else {
                ErrorKind::Internal
            };
            let error = AgentError::new(
                AgentKind::Codesmith,
                kind,
                format!("rejected file block `{}`: {}", rejection.path, rejection.reason),
            )
            .with_retriable(false);
            ctx.emit_error(&error);
            update.errors.push(error);
        }

        // Hashes of everything the engine has generated so far, including
        // earlier blocks of this same reply: identical `{path, hash}` is a
        // no-op, a new hash for a known path is an overwrite notice. A file
        // that merely pre-exists in the user's workspace gets a plain
        // `file_written`.
        let mut known: std::collections::HashMap<String, String> = state
            .generated_files
            .iter()
            .map(|f| (f.path.clone(), f.hash.clone()))
            .collect();

        let mut written: Vec<GeneratedFile> = Vec::new();
        for block in blocks {
            let hash = content_hash(block.contents.as_bytes());
            let previously = known.get(&block.path).cloned();
            if previously.as_deref() == Some(hash.as_str()) {
                debug!(path = %block.path, "identical block skipped");
                written.push(GeneratedFile {
                    path: block.path,
                    size: block.contents.len() as u64,
                    hash,
                });
                continue;
            }

            match ctx.workspace.write_block(&block.path, &block.contents) {
                Ok(outcome) => {
                    let file = outcome.file().clone();
                    if previously.is_some() {
                        ctx.events.publish(EngineEvent::FileOverwritten {
                            path: file.path.clone(),
                        });
                    } else {
                        ctx.events.publish(EngineEvent::FileWritten {
                            path: file.path.clone(),
                            bytes: file.size,
                        });
                    }
                    known.insert(file.path.clone(), file.hash.clone());
                    written.push(file);
                }
                Err(e @ EngineError::PathEscape(_)) => {
                    let error =
                        AgentError::new(AgentKind::Codesmith, ErrorKind::PathEscape, e.to_string())
                            .with_retriable(false);
                    ctx.emit_error(&error);
                    update.errors.push(error);
                }
                Err(e) => {
                    let error =
                        AgentError::new(AgentKind::Codesmith, ErrorKind::Internal, e.to_string())
                            .with_retriable(false);
                    ctx.emit_error(&error);
                    update.errors.push(error);
                }
            }
        }

        if written.is_empty() && update.errors.is_empty() {
            let error = AgentError::new(
                AgentKind::Codesmith,
                ErrorKind::Internal,
                "model output contained no file blocks",
            )
            .with_retriable(true);
            ctx.emit_error(&error);
            return StateUpdate::errors_only(vec![error]);
        }

        if !written.is_empty() {
            let paths: Vec<String> = written.iter().map(|f| f.path.clone()).collect();
            let summary = format!("generated {} file(s): {}", paths.len(), paths.join(", "));
            ctx.emit_complete(AgentKind::Codesmith, summary.clone());
            update.accumulated_results.push(
                AgentResult::new(AgentKind::Codesmith, summary).with_artifacts(paths),
            );
        }
        update.generated_files = written;
        update
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_core::{event_stream, CancellationFlag, EventSubscriber, WorkspaceWriter};
    use atelier_llm::{AgentAdapter, ChatResponse, ScriptedModel};
    use atelier_toolbus::ToolBus;
    use std::sync::Arc;

    fn ctx(model: ScriptedModel, dir: &tempfile::TempDir) -> (NodeContext, EventSubscriber) {
        let (sink, sub) = event_stream("sess", 64);
        let ctx = NodeContext::new(
            Arc::new(AgentAdapter::new(Arc::new(model))),
            Arc::new(ToolBus::new(vec![])),
            sink,
            Arc::new(WorkspaceWriter::bind(dir.path()).unwrap()),
            CancellationFlag::new(),
        );
        (ctx, sub)
    }

    fn event_types(sub: &EventSubscriber) -> Vec<String> {
        sub.try_drain()
            .iter()
            .map(|e| e.event.event_type().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_writes_declared_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let reply = "### FILE: src/main.py\n```python\nprint('hi')\n```\n\
                     ### FILE: README.md\n```\n# App\n```";
        let (ctx, sub) = ctx(ScriptedModel::new(vec![ChatResponse::text(reply)]), &dir);
        let state = WorkflowState::new("make an app", dir.path(), "sess");

        let update = CodesmithNode.run(&state, &ctx).await;
        assert_eq!(update.generated_files.len(), 2);
        assert!(dir.path().join("src/main.py").exists());
        assert!(update.errors.is_empty());

        let types = event_types(&sub);
        assert_eq!(types.iter().filter(|t| *t == "file_written").count(), 2);
    }

    #[tokio::test]
    async fn test_path_escape_rejected_without_write() {
        let dir = tempfile::TempDir::new().unwrap();
        let reply = "### FILE: ../evil\n```\nhacked\n```";
        let (ctx, sub) = ctx(ScriptedModel::new(vec![ChatResponse::text(reply)]), &dir);
        let state = WorkflowState::new("attack", dir.path(), "sess");

        let update = CodesmithNode.run(&state, &ctx).await;
        assert!(update.generated_files.is_empty());
        assert_eq!(update.errors.len(), 1);
        assert_eq!(update.errors[0].kind, ErrorKind::PathEscape);
        assert!(!update.errors[0].retriable);
        assert!(!dir.path().parent().unwrap().join("evil").exists());

        let types = event_types(&sub);
        assert!(types.contains(&"error".to_string()));
        assert!(!types.contains(&"file_written".to_string()));
    }

    #[tokio::test]
    async fn test_identical_rewrite_emits_no_overwrite() {
        let dir = tempfile::TempDir::new().unwrap();
        let reply = "### FILE: a.txt\n```\nsame\n```";
        let (ctx, sub) = ctx(
            ScriptedModel::new(vec![
                ChatResponse::text(reply),
                ChatResponse::text(reply),
            ]),
            &dir,
        );
        let mut state = WorkflowState::new("write", dir.path(), "sess");

        let update = CodesmithNode.run(&state, &ctx).await;
        state.apply(AgentKind::Codesmith, update).unwrap();
        CodesmithNode.run(&state, &ctx).await;

        let types = event_types(&sub);
        assert_eq!(types.iter().filter(|t| *t == "file_written").count(), 1);
        assert!(!types.contains(&"file_overwritten".to_string()));
    }

    #[tokio::test]
    async fn test_changed_rewrite_emits_overwritten() {
        let dir = tempfile::TempDir::new().unwrap();
        let (ctx, sub) = ctx(
            ScriptedModel::new(vec![
                ChatResponse::text("### FILE: a.txt\n```\none\n```"),
                ChatResponse::text("### FILE: a.txt\n```\ntwo\n```"),
            ]),
            &dir,
        );
        let mut state = WorkflowState::new("write", dir.path(), "sess");

        let update = CodesmithNode.run(&state, &ctx).await;
        state.apply(AgentKind::Codesmith, update).unwrap();
        let update = CodesmithNode.run(&state, &ctx).await;

        assert_eq!(update.generated_files.len(), 1);
        let types = event_types(&sub);
        assert!(types.contains(&"file_overwritten".to_string()));
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "two\n");
    }

    #[tokio::test]
    async fn test_preexisting_user_file_gets_plain_file_written() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("calculator.py"), "def add(a, b): return a + b\n").unwrap();
        let reply = "### FILE: calculator.py\n```python\n\"\"\"Calculator.\"\"\"\ndef add(a, b): return a + b\n```";
        let (ctx, sub) = ctx(ScriptedModel::new(vec![ChatResponse::text(reply)]), &dir);
        let state = WorkflowState::new("add a docstring", dir.path(), "sess");

        let update = CodesmithNode.run(&state, &ctx).await;
        assert_eq!(update.generated_files.len(), 1);

        let types = event_types(&sub);
        assert_eq!(types.iter().filter(|t| *t == "file_written").count(), 1);
        assert!(!types.contains(&"file_overwritten".to_string()));
    }

    #[tokio::test]
    async fn test_blockless_reply_is_no_progress() {
        let dir = tempfile::TempDir::new().unwrap();
        let (ctx, _sub) = ctx(
            ScriptedModel::new(vec![ChatResponse::text("I cannot write files today.")]),
            &dir,
        );
        let state = WorkflowState::new("write", dir.path(), "sess");

        let update = CodesmithNode.run(&state, &ctx).await;
        assert!(update.generated_files.is_empty());
        assert!(update.accumulated_results.is_empty());
        assert_eq!(update.errors.len(), 1);
    }
}
