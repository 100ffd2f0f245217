//! Policy decision audit trail

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use rowguard_common::{Action, Actor};

/// What the engine decided for one (model, action) evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Allow,
    Restrict,
    Deny,
    NotImplemented,
    Timeout,
}

/// Audit record of a policy decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecisionEvent {
    pub id: Uuid,
    pub at: DateTime<Utc>,
    pub model: String,
    pub action: Action,
    pub session_id: Option<String>,
    /// `type:id` of every actor subject, sorted
    pub subjects: Vec<String>,
    pub kind: DecisionKind,
    /// Rules that produced the decision
    pub rules: Vec<String>,
}

impl PolicyDecisionEvent {
    pub fn new(model: &str, action: &Action, actor: &Actor, kind: DecisionKind, rules: Vec<String>) -> Self {
        let mut subjects: Vec<String> = actor
            .subjects
            .values()
            .map(|s| format!("{}:{}", s.subject_type, s.id.to_json()))
            .collect();
        subjects.sort();

        Self {
            id: Uuid::new_v4(),
            at: Utc::now(),
            model: model.to_string(),
            action: action.clone(),
            session_id: actor.session_id.clone(),
            subjects,
            kind,
            rules,
        }
    }
}

/// Receives every policy decision the engine makes
pub trait AuditSink: Send + Sync {
    fn record(&self, event: PolicyDecisionEvent);
}

/// Logs decisions; denials at warn level
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: PolicyDecisionEvent) {
        match event.kind {
            DecisionKind::Allow | DecisionKind::Restrict => debug!(
                model = %event.model,
                action = %event.action,
                kind = ?event.kind,
                rules = ?event.rules,
                "Policy decision"
            ),
            DecisionKind::Deny | DecisionKind::NotImplemented | DecisionKind::Timeout => warn!(
                model = %event.model,
                action = %event.action,
                kind = ?event.kind,
                rules = ?event.rules,
                subjects = ?event.subjects,
                session = ?event.session_id,
                "Policy decision"
            ),
        }
    }
}

/// In-memory audit sink for testing
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    events: Mutex<Vec<PolicyDecisionEvent>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PolicyDecisionEvent> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, event: PolicyDecisionEvent) {
        self.events.lock().push(event);
    }
}
