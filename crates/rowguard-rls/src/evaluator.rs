//! RLS policy engine

use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

use rowguard_common::config::{ParserConfig, PolicyConfig, RowGuardConfig};
use rowguard_common::error::{Error, Result};
use rowguard_common::{Action, Actor};
use rowguard_query::filter::and_all;
use rowguard_query::{QueryParser, SchemaRegistry};

use crate::audit::{AuditSink, DecisionKind, PolicyDecisionEvent, TracingAuditSink};
use crate::policy::{PolicyOutcome, PolicyRegistry, SharedRule};

/// Combined outcome of every rule registered for a (model, action) pair
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub outcome: PolicyOutcome,
    /// Rules that determined the outcome
    pub rules: Vec<String>,
}

/// Policy engine for RLS enforcement
pub struct PolicyEngine {
    registry: Arc<PolicyRegistry>,
    schema: Arc<SchemaRegistry>,
    parser: ParserConfig,
    config: PolicyConfig,
    audit: Arc<dyn AuditSink>,
}

impl PolicyEngine {
    pub fn new(registry: Arc<PolicyRegistry>, schema: Arc<SchemaRegistry>, config: &RowGuardConfig) -> Self {
        Self {
            registry,
            schema,
            parser: config.parser.clone(),
            config: config.policy.clone(),
            audit: Arc::new(TracingAuditSink),
        }
    }

    #[must_use]
    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn registry(&self) -> &PolicyRegistry {
        &self.registry
    }

    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    /// Evaluate the policy for (model, action)
    pub async fn evaluate(&self, model: &str, action: &Action, actor: &Actor) -> Result<PolicyOutcome> {
        let cancel = CancellationToken::new();
        self.decide(model, action, actor, &cancel).await.map(|d| d.outcome)
    }

    /// Evaluate the policy for (model, action), reporting which rules decided
    ///
    /// Rules of one composition run concurrently. `Deny` wins over everything,
    /// a timed-out rule fails the call unless another rule denies, and
    /// restrictions are ANDed in registration order.
    #[instrument(skip_all, fields(model = %model, action = %action))]
    pub async fn decide(
        &self,
        model: &str,
        action: &Action,
        actor: &Actor,
        cancel: &CancellationToken,
    ) -> Result<Decision> {
        self.schema.resolve(model)?;

        let Some(rules) = self.registry.lookup(model, action) else {
            if self.registry.requires_rls(model, action) {
                self.record(model, action, actor, DecisionKind::NotImplemented, vec![]);
                return Err(Error::RlsNotImplemented {
                    model: model.to_string(),
                    action: action.to_string(),
                });
            }
            debug!("No policy registered, allowing");
            self.record(model, action, actor, DecisionKind::Allow, vec![]);
            return Ok(Decision {
                outcome: PolicyOutcome::Allow,
                rules: vec![],
            });
        };

        // Cancelled when this evaluation returns, so abandoned rules stop early
        let scope = cancel.child_token();
        let _guard = scope.clone().drop_guard();
        let default_timeout = self.config.timeout();

        let evaluations: Vec<BoxFuture<'_, _>> = rules
            .iter()
            .enumerate()
            .map(|(idx, rule)| {
                let scope = scope.clone();
                async move {
                    let budget = rule.timeout().unwrap_or(default_timeout);
                    let outcome = tokio::time::timeout(budget, rule.evaluate(actor, &scope)).await;
                    (idx, rule, budget, outcome)
                }
                .boxed()
            })
            .collect();
        let mut pending = stream::iter(evaluations).buffer_unordered(self.config.max_concurrent_rules.max(1));

        let mut restrictions = Vec::new();
        let mut timed_out: Option<(&SharedRule, Duration)> = None;

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(Error::Cancelled),
                next = pending.next() => next,
            };
            let Some((idx, rule, budget, outcome)) = next else {
                break;
            };

            match outcome {
                Err(_) => {
                    warn!(rule = %rule.name(), ?budget, "Policy rule timed out");
                    timed_out.get_or_insert((rule, budget));
                }
                Ok(PolicyOutcome::Deny) => {
                    return Ok(self.deny(model, action, actor, rule.name()));
                }
                Ok(PolicyOutcome::Restrict(filter)) => {
                    let parser = QueryParser::new(&self.schema, &self.parser);
                    match parser.check_filter(model, &filter, "restriction") {
                        Ok(filter) => restrictions.push((idx, rule.name().to_string(), filter)),
                        Err(e) => {
                            error!(rule = %rule.name(), error = %e, "Policy restriction is invalid for model");
                            return Ok(self.deny(model, action, actor, rule.name()));
                        }
                    }
                }
                Ok(PolicyOutcome::Allow) => {}
            }
        }

        if let Some((rule, timeout)) = timed_out {
            self.record(model, action, actor, DecisionKind::Timeout, vec![rule.name().to_string()]);
            return Err(Error::PolicyTimeout {
                model: model.to_string(),
                action: action.to_string(),
                rule: rule.name().to_string(),
                timeout,
            });
        }

        restrictions.sort_by_key(|(idx, _, _)| *idx);
        let (names, filters): (Vec<String>, Vec<_>) =
            restrictions.into_iter().map(|(_, name, filter)| (name, filter)).unzip();
        let filter = and_all(filters);

        let decision = if filter.is_match_all() {
            Decision {
                outcome: PolicyOutcome::Allow,
                rules: rules.iter().map(|r| r.name().to_string()).collect(),
            }
        } else {
            Decision {
                outcome: PolicyOutcome::Restrict(filter),
                rules: names,
            }
        };

        let kind = match decision.outcome {
            PolicyOutcome::Restrict(_) => DecisionKind::Restrict,
            _ => DecisionKind::Allow,
        };
        self.record(model, action, actor, kind, decision.rules.clone());
        Ok(decision)
    }

    fn deny(&self, model: &str, action: &Action, actor: &Actor, rule: &str) -> Decision {
        let rules = vec![rule.to_string()];
        self.record(model, action, actor, DecisionKind::Deny, rules.clone());
        Decision {
            outcome: PolicyOutcome::Deny,
            rules,
        }
    }

    fn record(&self, model: &str, action: &Action, actor: &Actor, kind: DecisionKind, rules: Vec<String>) {
        self.audit
            .record(PolicyDecisionEvent::new(model, action, actor, kind, rules));
    }
}
