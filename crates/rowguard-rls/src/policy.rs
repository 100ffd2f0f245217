//! RLS policy rules and their registry

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use rowguard_common::config::{DuplicatePolicy, PolicyConfig};
use rowguard_common::error::{Error, Result};
use rowguard_common::{Action, Actor};
use rowguard_query::FilterNode;

/// Result of evaluating a policy rule for an actor
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyOutcome {
    /// No restriction
    Allow,
    /// Zero rows; overrides every other outcome
    Deny,
    /// Rows must also match this filter
    Restrict(FilterNode),
}

/// A row-level security rule bound to one (model, action) pair
///
/// Rules must be idempotent and free of side effects other than read-only
/// lookups. The engine enforces the timeout at the call site; the token is
/// cancelled when the evaluation is abandoned.
#[async_trait]
pub trait PolicyRule: Send + Sync {
    fn name(&self) -> &str;

    /// Overrides the engine-wide timeout for this rule
    fn timeout(&self) -> Option<Duration> {
        None
    }

    async fn evaluate(&self, actor: &Actor, cancel: &CancellationToken) -> PolicyOutcome;
}

pub type SharedRule = Arc<dyn PolicyRule>;

/// Rule backed by a synchronous closure
pub struct FnRule<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F> PolicyRule for FnRule<F>
where
    F: Fn(&Actor) -> PolicyOutcome + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn evaluate(&self, actor: &Actor, _cancel: &CancellationToken) -> PolicyOutcome {
        (self.f)(actor)
    }
}

/// Rule backed by an asynchronous closure, e.g. one that resolves extra
/// subject attributes from another service
pub struct AsyncFnRule<F> {
    name: String,
    f: F,
    timeout: Option<Duration>,
}

impl<F> AsyncFnRule<F> {
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl<F, Fut> PolicyRule for AsyncFnRule<F>
where
    F: Fn(Actor, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = PolicyOutcome> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn evaluate(&self, actor: &Actor, cancel: &CancellationToken) -> PolicyOutcome {
        (self.f)(actor.clone(), cancel.clone()).await
    }
}

/// Build a rule from a synchronous closure
pub fn rule_fn<F>(name: &str, f: F) -> SharedRule
where
    F: Fn(&Actor) -> PolicyOutcome + Send + Sync + 'static,
{
    Arc::new(FnRule {
        name: name.to_string(),
        f,
    })
}

/// Build a rule from an asynchronous closure
pub fn async_rule_fn<F, Fut>(name: &str, f: F) -> AsyncFnRule<F>
where
    F: Fn(Actor, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = PolicyOutcome> + Send + 'static,
{
    AsyncFnRule {
        name: name.to_string(),
        f,
        timeout: None,
    }
}

/// Policy registry: (model, action) -> rules
///
/// Open for registration during startup, read-only once sealed.
pub struct PolicyRegistry {
    rules: HashMap<String, HashMap<Action, Vec<SharedRule>>>,
    required: HashMap<String, HashSet<Action>>,
    exempt: HashMap<String, HashSet<Action>>,
    duplicates: DuplicatePolicy,
    require_by_default: bool,
    sealed: bool,
}

impl PolicyRegistry {
    pub fn new(config: &PolicyConfig) -> Self {
        Self {
            rules: HashMap::new(),
            required: HashMap::new(),
            exempt: HashMap::new(),
            duplicates: config.duplicate_registration,
            require_by_default: config.require_rls_by_default,
            sealed: false,
        }
    }

    /// Register a single rule for (model, action)
    pub fn register(&mut self, model: &str, action: impl Into<Action>, rule: SharedRule) -> Result<()> {
        self.compose(model, action, vec![rule])
    }

    /// Register several rules whose outcomes are combined (deny overrides,
    /// restrictions are ANDed)
    pub fn compose(&mut self, model: &str, action: impl Into<Action>, rules: Vec<SharedRule>) -> Result<()> {
        let action = action.into();
        self.ensure_open(model, &action)?;
        if rules.is_empty() {
            return Err(Error::Config(format!(
                "empty rule composition for {model}.{action}"
            )));
        }

        let by_action = self.rules.entry(model.to_string()).or_default();
        if by_action.contains_key(&action) && self.duplicates == DuplicatePolicy::Error {
            return Err(Error::PolicyConflict {
                model: model.to_string(),
                action: action.to_string(),
            });
        }
        by_action.insert(action, rules);
        Ok(())
    }

    /// Mark actions of a model as requiring a registered policy
    pub fn require_rls(&mut self, model: &str, actions: &[Action]) -> Result<()> {
        for action in actions {
            self.ensure_open(model, action)?;
        }
        self.required
            .entry(model.to_string())
            .or_default()
            .extend(actions.iter().cloned());
        Ok(())
    }

    /// Opt actions of a model out of `require_rls_by_default`
    pub fn exempt(&mut self, model: &str, actions: &[Action]) -> Result<()> {
        for action in actions {
            self.ensure_open(model, action)?;
        }
        self.exempt
            .entry(model.to_string())
            .or_default()
            .extend(actions.iter().cloned());
        Ok(())
    }

    pub fn seal(&mut self) {
        if !self.sealed {
            self.sealed = true;
            info!(
                models = self.rules.len(),
                rules = self.rules.values().map(HashMap::len).sum::<usize>(),
                "Policy registry sealed"
            );
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Rules registered for (model, action)
    pub fn lookup(&self, model: &str, action: &Action) -> Option<&[SharedRule]> {
        self.rules
            .get(model)
            .and_then(|by_action| by_action.get(action))
            .map(Vec::as_slice)
    }

    /// Whether (model, action) must have a registered policy
    pub fn requires_rls(&self, model: &str, action: &Action) -> bool {
        let listed = |set: &HashMap<String, HashSet<Action>>| {
            set.get(model).is_some_and(|actions| actions.contains(action))
        };
        listed(&self.required) || (self.require_by_default && !listed(&self.exempt))
    }

    /// Every model a policy or RLS requirement mentions
    pub fn models(&self) -> impl Iterator<Item = &str> {
        self.rules
            .keys()
            .chain(self.required.keys())
            .chain(self.exempt.keys())
            .map(String::as_str)
    }

    fn ensure_open(&self, model: &str, action: &Action) -> Result<()> {
        if self.sealed {
            Err(Error::RegistrySealed(format!(
                "cannot register policy for {model}.{action}"
            )))
        } else {
            Ok(())
        }
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::new(&PolicyConfig::default())
    }
}
