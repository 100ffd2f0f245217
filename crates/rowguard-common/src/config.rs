//! Configuration types for the query engine

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Main engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RowGuardConfig {
    /// Raw query parsing limits
    pub parser: ParserConfig,
    /// Policy evaluation settings
    pub policy: PolicyConfig,
}

/// Parser limits applied to untrusted raw queries
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Maximum include nesting (default: 4)
    pub max_include_depth: usize,
    /// Maximum and/or/not nesting inside one filter tree (default: 32)
    pub max_filter_depth: usize,
    /// Largest accepted page size (default: 1000)
    pub max_limit: u64,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_include_depth: 4,
            max_filter_depth: 32,
            max_limit: 1000,
        }
    }
}

/// How a second registration for the same (model, action) is handled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Last registration wins
    #[default]
    Replace,
    /// Reject with `policy_conflict`
    Error,
}

/// Policy engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Per-rule evaluation timeout in milliseconds (default: 2000)
    pub timeout_ms: u64,
    /// Rules of one composition evaluated concurrently (default: 8)
    pub max_concurrent_rules: usize,
    /// Duplicate registration handling
    pub duplicate_registration: DuplicatePolicy,
    /// Require RLS on every model/action unless the model opts out
    pub require_rls_by_default: bool,
}

impl PolicyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 2000,
            max_concurrent_rules: 8,
            duplicate_registration: DuplicatePolicy::Replace,
            require_rls_by_default: false,
        }
    }
}
