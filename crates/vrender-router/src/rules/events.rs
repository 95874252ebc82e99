//! Rule engine notifications.

use serde::Serialize;
use vrender_models::FallbackAction;

/// Event published on the rule engine's broadcast channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RuleEngineEvent {
    RuleAdded {
        id: String,
        name: String,
        priority: i32,
    },
    RuleRemoved {
        id: String,
        name: String,
        priority: i32,
    },
    DecisionMade {
        should_apply: bool,
        action: FallbackAction,
        confidence: f64,
        matched_rules: Vec<String>,
    },
}

impl RuleEngineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RuleEngineEvent::RuleAdded { .. } => "rule_added",
            RuleEngineEvent::RuleRemoved { .. } => "rule_removed",
            RuleEngineEvent::DecisionMade { .. } => "decision_made",
        }
    }
}
