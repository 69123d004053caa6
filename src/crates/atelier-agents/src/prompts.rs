//! Prompt construction shared by the supervisor and the worker nodes.

use atelier_core::WorkflowState;

/// Per-slot truncation budget for supervisor prompts.
const SLOT_BUDGET: usize = 600;

pub const SUPERVISOR_SYSTEM: &str = "\
You are the routing supervisor of a multi-agent software engineering team. \
You never write code or prose yourself; you only decide which specialist \
runs next and what it should do. Specialists: research (gather context: \
web search, workspace scan, bug analysis), architect (design or refine the \
architecture), codesmith (generate code files), reviewfix (review code and \
run build validation), responder (write the final answer to the user). \
Finish only when the user's request is satisfied and a final response \
exists. Reply with a single JSON object matching the given schema.";

pub const RESEARCH_SYSTEM: &str = "\
You are a software research specialist. Summarize findings factually and \
concisely, citing sources where available. Do not propose designs or write \
code.";

pub const ARCHITECT_SYSTEM: &str = "\
You are a software architect. Produce a concrete, buildable architecture \
for the user's request: components with responsibilities, the data model, \
external interfaces, and key decisions. Reply with a single JSON object \
matching the given schema.";

pub const CODESMITH_SYSTEM: &str = "\
You are a senior software engineer generating complete, working files. \
Follow the architecture and instructions exactly. Emit every file in the \
declared file-block format and nothing else.";

pub const REVIEWFIX_SYSTEM: &str = "\
You are a meticulous code reviewer. Identify concrete issues (correctness \
first, then robustness, then style) and score overall quality from 0.0 to \
1.0. Reply with a single JSON object matching the given schema.";

pub const RESPONDER_SYSTEM: &str = "\
You write the final message to the user. Reference only work that was \
actually performed and artifacts that actually exist in the provided \
results; never invent files, features, or outcomes.";

/// Truncate a string to `max` characters on a char boundary, marking the
/// cut.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max).collect();
    format!("{cut} ...[truncated]")
}

/// Compact state digest for the supervisor's decision prompt.
pub fn state_digest(state: &WorkflowState) -> String {
    let mut sections = Vec::new();

    sections.push(format!("User request: {}", truncate(&state.user_query, SLOT_BUDGET)));

    if state.research_context.is_empty() {
        sections.push("Research: none yet.".to_string());
    } else {
        let latest = &state.research_context[state.research_context.len() - 1];
        sections.push(format!(
            "Research: {} entr(ies); latest [{:?}] {}",
            state.research_context.len(),
            latest.kind,
            truncate(&latest.findings, SLOT_BUDGET)
        ));
    }

    match &state.architecture {
        Some(architecture) => {
            let components: Vec<&str> = architecture
                .components
                .iter()
                .map(|c| c.name.as_str())
                .collect();
            sections.push(format!("Architecture: components [{}]", components.join(", ")));
        }
        None => sections.push("Architecture: none yet.".to_string()),
    }

    if state.generated_files.is_empty() {
        sections.push("Generated files: none yet.".to_string());
    } else {
        let paths: Vec<&str> = state
            .generated_files
            .iter()
            .map(|f| f.path.as_str())
            .collect();
        sections.push(format!(
            "Generated files ({}): {}",
            paths.len(),
            truncate(&paths.join(", "), SLOT_BUDGET)
        ));
    }

    match &state.review_report {
        Some(report) => sections.push(format!(
            "Review: quality {:.2}, build_passed={}, {} issue(s).",
            report.quality_score,
            report.build_passed,
            report.issues.len()
        )),
        None => sections.push("Review: none yet.".to_string()),
    }

    sections.push(match &state.user_response {
        Some(_) => "Final response: drafted.".to_string(),
        None => "Final response: none yet.".to_string(),
    });

    let executed: Vec<String> = state
        .executed_agents
        .iter()
        .map(|(agent, count)| format!("{agent}={count}"))
        .collect();
    sections.push(format!(
        "Transitions so far: {} (executed: {}). Last agent: {}.",
        state.iteration,
        if executed.is_empty() {
            "none".to_string()
        } else {
            executed.join(", ")
        },
        state
            .last_agent
            .map(|a| a.as_str().to_string())
            .unwrap_or_else(|| "none".to_string())
    ));

    if !state.errors.is_empty() {
        let last = &state.errors[state.errors.len() - 1];
        sections.push(format!(
            "Errors recorded: {}; last: [{}] {}",
            state.errors.len(),
            last.kind,
            truncate(&last.message, 200)
        ));
    }
    if state.can_end_workflow {
        sections.push("A node signalled the goal may be satisfied.".to_string());
    }

    sections.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_core::{AgentKind, StateUpdate};

    #[test]
    fn test_truncate_marks_cut() {
        assert_eq!(truncate("short", 10), "short");
        let long = "x".repeat(20);
        let out = truncate(&long, 10);
        assert!(out.starts_with("xxxxxxxxxx"));
        assert!(out.ends_with("[truncated]"));
    }

    #[test]
    fn test_digest_mentions_missing_slots() {
        let state = WorkflowState::new("build it", "/tmp/ws", "s");
        let digest = state_digest(&state);
        assert!(digest.contains("Research: none yet."));
        assert!(digest.contains("Architecture: none yet."));
        assert!(digest.contains("Last agent: none"));
    }

    #[test]
    fn test_digest_reflects_transitions() {
        let mut state = WorkflowState::new("build it", "/tmp/ws", "s");
        state.apply(AgentKind::Architect, StateUpdate::new()).unwrap();
        let digest = state_digest(&state);
        assert!(digest.contains("architect=1"));
        assert!(digest.contains("Last agent: architect"));
    }
}
