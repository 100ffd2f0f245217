//! Declarative policy templates with actor substitution
//!
//! A template's restriction is a raw filter whose string values may name
//! actor attributes:
//! - `$subject.<type>.id`, `$subject.<type>.model`
//! - `$claim.<name>`
//! - `$session`
//!
//! A leading `$$` escapes a literal `$`. Any placeholder the actor cannot
//! satisfy turns the outcome into `Deny`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use rowguard_common::{Actor, Scalar};
use rowguard_query::filter::{and_all, or_all, FilterNode, FilterValue, Leaf, Operator};

use crate::policy::{PolicyOutcome, PolicyRule};

/// Effect of a template when it applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateEffect {
    Allow,
    Deny,
    Restrict,
}

/// Declarative policy definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyTemplate {
    pub name: String,
    pub effect: TemplateEffect,
    /// Raw filter for `restrict`
    #[serde(default)]
    pub filter: Option<Value>,
    /// Roles this template applies to (empty = all roles)
    #[serde(default)]
    pub roles: Vec<String>,
    /// Deny actors that are not authenticated
    #[serde(default)]
    pub authenticated: bool,
}

impl PolicyTemplate {
    pub fn restrict(name: &str, filter: Value) -> Self {
        Self {
            name: name.to_string(),
            effect: TemplateEffect::Restrict,
            filter: Some(filter),
            roles: vec![],
            authenticated: false,
        }
    }

    pub fn allow(name: &str) -> Self {
        Self {
            name: name.to_string(),
            effect: TemplateEffect::Allow,
            filter: None,
            roles: vec![],
            authenticated: false,
        }
    }

    #[must_use]
    pub fn for_roles(mut self, roles: &[&str]) -> Self {
        self.roles = roles.iter().map(|r| (*r).to_string()).collect();
        self
    }

    #[must_use]
    pub fn authenticated_only(mut self) -> Self {
        self.authenticated = true;
        self
    }

    /// Check if the template applies to an actor's roles
    pub fn applies_to(&self, actor: &Actor) -> bool {
        self.roles.is_empty() || self.roles.iter().any(|r| actor.has_role(r))
    }
}

/// Actor attribute substitution for template filters
#[derive(Debug, Clone, Copy)]
pub struct ActorFunctions<'a> {
    actor: &'a Actor,
}

impl<'a> ActorFunctions<'a> {
    pub fn new(actor: &'a Actor) -> Self {
        Self { actor }
    }

    /// Resolve a single placeholder (without the leading `$`)
    pub fn resolve(&self, placeholder: &str) -> Option<Value> {
        let mut parts = placeholder.splitn(3, '.');
        match (parts.next(), parts.next(), parts.next()) {
            (Some("subject"), Some(subject_type), Some(attr)) => {
                let subject = self.actor.subject(subject_type)?;
                match attr {
                    "id" => Some(subject.id.to_json()),
                    "model" => Some(Value::String(subject.model.clone())),
                    _ => None,
                }
            }
            (Some("claim"), Some(name), None) => self
                .actor
                .claim(name)
                .filter(|v| !v.is_null())
                .cloned(),
            (Some("session"), None, None) => self.actor.session_id.clone().map(Value::String),
            _ => None,
        }
    }

    /// Substitute every placeholder in a raw filter
    pub fn substitute(&self, raw: &Value) -> Option<Value> {
        match raw {
            Value::String(s) => match s.strip_prefix('$') {
                Some(rest) if rest.starts_with('$') => Some(Value::String(rest.to_string())),
                Some(placeholder) => self.resolve(placeholder),
                None => Some(raw.clone()),
            },
            Value::Array(items) => items
                .iter()
                .map(|item| self.substitute(item))
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
            Value::Object(obj) => obj
                .iter()
                .map(|(k, v)| self.substitute(v).map(|v| (k.clone(), v)))
                .collect::<Option<serde_json::Map<_, _>>>()
                .map(Value::Object),
            other => Some(other.clone()),
        }
    }
}

/// Structural conversion of a raw filter into a filter tree
///
/// Only shapes are checked here; field and type validation happens when the
/// engine checks the restriction against the model's schema.
pub fn filter_from_raw(raw: &Value) -> Option<FilterNode> {
    let obj = raw.as_object()?;
    if let Some(children) = obj.get("and") {
        let nodes = children.as_array()?.iter().map(filter_from_raw).collect::<Option<Vec<_>>>()?;
        return Some(and_all(nodes));
    }
    if let Some(children) = obj.get("or") {
        let nodes = children.as_array()?.iter().map(filter_from_raw).collect::<Option<Vec<_>>>()?;
        return Some(or_all(nodes));
    }
    if let Some(child) = obj.get("not") {
        return filter_from_raw(child).map(FilterNode::negate);
    }

    let field = obj.get("field")?.as_str()?;
    let operator = obj.get("op").or_else(|| obj.get("operator"))?.as_str().and_then(Operator::parse)?;
    let value = match obj.get("value").unwrap_or(&Value::Null) {
        Value::Null => FilterValue::Null,
        Value::Array(items) => FilterValue::List(items.iter().map(Scalar::from_json).collect::<Option<Vec<_>>>()?),
        other => FilterValue::Single(Scalar::from_json(other)?),
    };
    Some(FilterNode::Leaf(Leaf {
        field: field.to_string(),
        operator,
        value,
    }))
}

/// Policy rule evaluated from a template
pub struct TemplateRule {
    template: PolicyTemplate,
}

impl TemplateRule {
    pub fn new(template: PolicyTemplate) -> Self {
        Self { template }
    }

    pub fn template(&self) -> &PolicyTemplate {
        &self.template
    }

    fn outcome(&self, actor: &Actor) -> PolicyOutcome {
        if self.template.authenticated && !actor.is_authenticated {
            return PolicyOutcome::Deny;
        }
        if !self.template.applies_to(actor) {
            return PolicyOutcome::Deny;
        }

        match self.template.effect {
            TemplateEffect::Allow => PolicyOutcome::Allow,
            TemplateEffect::Deny => PolicyOutcome::Deny,
            TemplateEffect::Restrict => {
                let Some(raw) = &self.template.filter else {
                    return PolicyOutcome::Deny;
                };
                let Some(bound) = ActorFunctions::new(actor).substitute(raw) else {
                    debug!(rule = %self.template.name, "Unresolved actor placeholder, denying");
                    return PolicyOutcome::Deny;
                };
                match filter_from_raw(&bound) {
                    Some(filter) => PolicyOutcome::Restrict(filter),
                    None => {
                        debug!(rule = %self.template.name, "Malformed template filter, denying");
                        PolicyOutcome::Deny
                    }
                }
            }
        }
    }
}

#[async_trait]
impl PolicyRule for TemplateRule {
    fn name(&self) -> &str {
        &self.template.name
    }

    async fn evaluate(&self, actor: &Actor, _cancel: &CancellationToken) -> PolicyOutcome {
        self.outcome(actor)
    }
}
