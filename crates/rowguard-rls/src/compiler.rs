//! Query compiler: merges policy filters into validated queries

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use rowguard_common::error::{Error, Result};
use rowguard_common::{Action, Actor, SubjectRef};
use rowguard_query::{FilterNode, Iqr, Pagination, RelationKind, SortSpec};

use crate::evaluator::PolicyEngine;
use crate::policy::PolicyOutcome;

/// Identity of the actor a query was compiled for
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActorIdentity {
    pub authenticated: bool,
    pub subjects: BTreeMap<String, SubjectRef>,
    pub session_id: Option<String>,
}

impl From<&Actor> for ActorIdentity {
    fn from(actor: &Actor) -> Self {
        Self {
            authenticated: actor.is_authenticated,
            subjects: actor
                .subjects
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            session_id: actor.session_id.clone(),
        }
    }
}

/// Security filter applied to the link rows of a junction model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledJunction {
    pub model: String,
    pub filter: FilterNode,
}

/// Included relation with its own compiled query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledInclude {
    pub relation: String,
    pub kind: RelationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub junction: Option<CompiledJunction>,
    pub query: CompiledQuery,
}

/// Query with every applicable security filter merged in, ready for storage
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledQuery {
    pub model: String,
    pub action: Action,
    pub actor: ActorIdentity,
    pub filter: FilterNode,
    pub includes: Vec<CompiledInclude>,
    pub sort: Vec<SortSpec>,
    pub pagination: Pagination,
}

/// Compiles validated queries under the policy engine
pub struct QueryCompiler {
    engine: Arc<PolicyEngine>,
}

impl QueryCompiler {
    pub fn new(engine: Arc<PolicyEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &PolicyEngine {
        &self.engine
    }

    /// Compile a query for an actor
    pub async fn compile(&self, action: &Action, query: Iqr, actor: &Actor) -> Result<CompiledQuery> {
        self.compile_with_cancel(action, query, actor, &CancellationToken::new())
            .await
    }

    /// Compile a query, aborting outstanding policy evaluation once `cancel`
    /// fires
    pub async fn compile_with_cancel(
        &self,
        action: &Action,
        query: Iqr,
        actor: &Actor,
        cancel: &CancellationToken,
    ) -> Result<CompiledQuery> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Error::Cancelled),
            compiled = self.compile_node(action.clone(), query, actor, cancel) => compiled,
        }
    }

    /// Includes are compiled as reads of their target model, so nesting can
    /// never bypass a model's policy.
    fn compile_node<'a>(
        &'a self,
        action: Action,
        query: Iqr,
        actor: &'a Actor,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<CompiledQuery>> {
        async move {
            let decision = self.engine.decide(&query.model, &action, actor, cancel).await?;
            let filter = match decision.outcome {
                PolicyOutcome::Deny => {
                    return Err(Error::PolicyDenied {
                        model: query.model,
                        action: action.to_string(),
                        rules: decision.rules,
                    })
                }
                PolicyOutcome::Allow => query.filter,
                PolicyOutcome::Restrict(security) => query.filter.and(security),
            };

            let mut includes = Vec::with_capacity(query.includes.len());
            for include in query.includes {
                let junction = match &include.through {
                    Some(model) => Some(self.junction(model, actor, cancel).await?),
                    None => None,
                };
                let compiled = self
                    .compile_node(Action::Read, include.query, actor, cancel)
                    .await?;
                includes.push(CompiledInclude {
                    relation: include.relation,
                    kind: include.kind,
                    junction,
                    query: compiled,
                });
            }

            debug!(model = %query.model, %action, includes = includes.len(), "Query compiled");
            Ok(CompiledQuery {
                model: query.model,
                action,
                actor: ActorIdentity::from(actor),
                filter,
                includes,
                sort: query.sort,
                pagination: query.pagination,
            })
        }
        .boxed()
    }

    async fn junction(&self, model: &str, actor: &Actor, cancel: &CancellationToken) -> Result<CompiledJunction> {
        let decision = self.engine.decide(model, &Action::Read, actor, cancel).await?;
        let filter = match decision.outcome {
            PolicyOutcome::Deny => {
                return Err(Error::PolicyDenied {
                    model: model.to_string(),
                    action: Action::Read.to_string(),
                    rules: decision.rules,
                })
            }
            PolicyOutcome::Allow => FilterNode::match_all(),
            PolicyOutcome::Restrict(security) => security,
        };
        Ok(CompiledJunction {
            model: model.to_string(),
            filter,
        })
    }
}
