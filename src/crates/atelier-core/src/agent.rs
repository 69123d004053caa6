//! Agent identifiers.

use serde::{Deserialize, Serialize};

/// The five worker nodes the supervisor can route to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// Gathers context: web search, workspace scan, bug analysis.
    Research,
    /// Produces or refines the architecture document.
    Architect,
    /// Generates code and materializes files into the workspace.
    Codesmith,
    /// Reviews generated code and runs build-validation probes.
    #[serde(rename = "reviewfix")]
    ReviewFix,
    /// Synthesizes the final user-facing response.
    Responder,
}

impl AgentKind {
    /// All routable agents, in the order used for prompts and fallbacks.
    pub const ALL: [AgentKind; 5] = [
        AgentKind::Research,
        AgentKind::Architect,
        AgentKind::Codesmith,
        AgentKind::ReviewFix,
        AgentKind::Responder,
    ];

    /// Stable string form used in prompts, events, and decisions.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Research => "research",
            AgentKind::Architect => "architect",
            AgentKind::Codesmith => "codesmith",
            AgentKind::ReviewFix => "reviewfix",
            AgentKind::Responder => "responder",
        }
    }

    /// Parse a decision target back into an agent.
    pub fn parse(s: &str) -> Option<AgentKind> {
        match s.trim().to_ascii_lowercase().as_str() {
            "research" => Some(AgentKind::Research),
            "architect" => Some(AgentKind::Architect),
            "codesmith" => Some(AgentKind::Codesmith),
            "reviewfix" | "review_fix" | "review" => Some(AgentKind::ReviewFix),
            "responder" => Some(AgentKind::Responder),
            _ => None,
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trip() {
        for agent in AgentKind::ALL {
            assert_eq!(AgentKind::parse(agent.as_str()), Some(agent));
        }
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!(AgentKind::parse("Review_Fix"), Some(AgentKind::ReviewFix));
        assert_eq!(AgentKind::parse(" responder "), Some(AgentKind::Responder));
        assert_eq!(AgentKind::parse("unknown"), None);
    }

    #[test]
    fn test_serde_names_match_as_str() {
        for agent in AgentKind::ALL {
            let json = serde_json::to_string(&agent).unwrap();
            assert_eq!(json, format!("\"{}\"", agent.as_str()));
        }
    }
}
