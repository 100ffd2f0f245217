//! Error types for the policy-aware query engine

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Reason a raw query was rejected by the parser
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseReason {
    UnknownModel,
    UnknownField,
    UnknownOperator,
    OperatorNotPermitted,
    InvalidValue,
    UnknownRelation,
    NotSortable,
    InvalidPagination,
    MaxDepthExceeded,
    Malformed,
}

impl ParseReason {
    /// Stable reason code surfaced to callers
    pub fn code(self) -> &'static str {
        match self {
            Self::UnknownModel => "unknown_model",
            Self::UnknownField => "unknown_field",
            Self::UnknownOperator => "unknown_operator",
            Self::OperatorNotPermitted => "operator_not_permitted",
            Self::InvalidValue => "invalid_value",
            Self::UnknownRelation => "unknown_relation",
            Self::NotSortable => "not_sortable",
            Self::InvalidPagination => "invalid_pagination",
            Self::MaxDepthExceeded => "max_depth_exceeded",
            Self::Malformed => "malformed",
        }
    }
}

impl fmt::Display for ParseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Structured parse failure pointing at the offending node
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}{}: {detail}", location(.path))]
pub struct ParseError {
    /// Location inside the raw query, e.g. `filters.and[2].field`
    pub path: String,
    pub reason: ParseReason,
    pub detail: String,
}

impl ParseError {
    pub fn new(path: impl Into<String>, reason: ParseReason, detail: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason,
            detail: detail.into(),
        }
    }
}

fn location(path: &str) -> String {
    if path.is_empty() {
        String::new()
    } else {
        format!(" at {path}")
    }
}

/// Engine error types
#[derive(Error, Debug)]
pub enum Error {
    // Input Errors
    #[error("Query parse error: {0}")]
    QueryParse(#[from] ParseError),

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    // Policy Errors
    #[error("Row level security is required for {model}.{action} but no policy is registered")]
    RlsNotImplemented { model: String, action: String },

    #[error("Access to {model}.{action} denied by policy")]
    PolicyDenied {
        model: String,
        action: String,
        /// Names of the rules that produced the denial
        rules: Vec<String>,
    },

    #[error("Policy rule '{rule}' for {model}.{action} exceeded {timeout:?}")]
    PolicyTimeout {
        model: String,
        action: String,
        rule: String,
        timeout: Duration,
    },

    #[error("Compilation cancelled")]
    Cancelled,

    // Configuration Errors
    #[error("Model already registered: {0}")]
    SchemaConflict(String),

    #[error("Registry is sealed: {0}")]
    RegistrySealed(String),

    #[error("Policy already registered for {model}.{action}")]
    PolicyConflict { model: String, action: String },

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Broad class of an error, used by callers to pick a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed or schema-violating input; recoverable
    Input,
    /// Fail-closed policy outcome; fatal to the current call
    Policy,
    /// Startup-time registration or configuration problem
    Configuration,
    Cancelled,
}

impl Error {
    /// Stable error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::QueryParse(_) => "query_parse_error",
            Self::UnknownModel(_) => "unknown_model",
            Self::RlsNotImplemented { .. } => "rls_not_implemented",
            Self::PolicyDenied { .. } => "policy_denied",
            Self::PolicyTimeout { .. } => "policy_timeout",
            Self::Cancelled => "cancelled",
            Self::SchemaConflict(_) => "schema_conflict",
            Self::RegistrySealed(_) => "registry_sealed",
            Self::PolicyConflict { .. } => "policy_conflict",
            Self::InvalidSchema(_) => "invalid_schema",
            Self::Config(_) => "config_error",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::QueryParse(_) | Self::UnknownModel(_) => ErrorCategory::Input,
            Self::RlsNotImplemented { .. }
            | Self::PolicyDenied { .. }
            | Self::PolicyTimeout { .. } => ErrorCategory::Policy,
            Self::Cancelled => ErrorCategory::Cancelled,
            Self::SchemaConflict(_)
            | Self::RegistrySealed(_)
            | Self::PolicyConflict { .. }
            | Self::InvalidSchema(_)
            | Self::Config(_) => ErrorCategory::Configuration,
        }
    }

    /// The structured parse failure, if this is an input error from the parser
    pub fn parse_error(&self) -> Option<&ParseError> {
        match self {
            Self::QueryParse(e) => Some(e),
            _ => None,
        }
    }
}
