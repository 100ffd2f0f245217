//! Common types shared by the query and policy layers

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// Values
// ============================================================================

/// A typed scalar used in filter leaves and actor subject ids
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    /// Convert a JSON value into a scalar; arrays, objects and null are rejected
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float)),
            serde_json::Value::String(s) => Some(Self::Text(s.clone())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::Text(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => write!(f, "'{s}'"),
        }
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

// ============================================================================
// Actions
// ============================================================================

/// Action a query is compiled for
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Action {
    Read,
    Create,
    Update,
    Delete,
    Custom(CustomAction),
}

/// Lowercased name of an application-defined action
///
/// Only built through `Action::from`, so a custom action can never spell one
/// of the built-in actions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CustomAction(String);

impl CustomAction {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Action {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Read => "read",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Custom(name) => name.as_str(),
        }
    }
}

impl From<&str> for Action {
    fn from(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "read" | "select" => Self::Read,
            "create" | "insert" => Self::Create,
            "update" => Self::Update,
            "delete" => Self::Delete,
            other => Self::Custom(CustomAction(other.to_string())),
        }
    }
}

impl From<String> for Action {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<Action> for String {
    fn from(value: Action) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Actor
// ============================================================================

/// Reference to the record an actor acts as, e.g. the `customer` row 7
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectRef {
    #[serde(rename = "type")]
    pub subject_type: String,
    pub model: String,
    pub id: Scalar,
}

impl SubjectRef {
    pub fn new(subject_type: &str, model: &str, id: impl Into<Scalar>) -> Self {
        Self {
            subject_type: subject_type.to_string(),
            model: model.to_string(),
            id: id.into(),
        }
    }
}

/// Authenticated caller identity, built by the authentication layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Actor {
    pub is_authenticated: bool,
    /// Subject type name -> subject
    pub subjects: HashMap<String, SubjectRef>,
    pub roles: BTreeSet<String>,
    pub claims: HashMap<String, serde_json::Value>,
    pub session_id: Option<String>,
}

impl Actor {
    /// Create an anonymous actor
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Create an authenticated actor with no subjects yet
    pub fn authenticated() -> Self {
        Self {
            is_authenticated: true,
            ..Default::default()
        }
    }

    /// Attach a subject, keyed by its type
    #[must_use]
    pub fn with_subject(mut self, subject: SubjectRef) -> Self {
        self.subjects.insert(subject.subject_type.clone(), subject);
        self
    }

    #[must_use]
    pub fn with_role(mut self, role: &str) -> Self {
        self.roles.insert(role.to_string());
        self
    }

    #[must_use]
    pub fn with_claim(mut self, name: &str, value: serde_json::Value) -> Self {
        self.claims.insert(name.to_string(), value);
        self
    }

    #[must_use]
    pub fn with_session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    pub fn subject(&self, subject_type: &str) -> Option<&SubjectRef> {
        self.subjects.get(subject_type)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn claim(&self, name: &str) -> Option<&serde_json::Value> {
        self.claims.get(name)
    }
}
