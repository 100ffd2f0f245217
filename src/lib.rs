//! Policy-aware query engine
//!
//! Callers describe models declaratively and query them through a structured
//! filter/include/sort/pagination representation. Every query is validated
//! against the schema registry, then compiled under the row-level security
//! policies bound to the caller's [`Actor`](rowguard_common::Actor).
//!
//! # Features
//!
//! - **Schema registry** - fields, relations and junction models, sealed at startup
//! - **Query validation** - untrusted raw queries become typed, canonical filter trees
//! - **Row Level Security** - fail-closed, deny-overrides policy composition
//! - **Recursive enforcement** - includes are compiled under their target's policy
//! - **Declarations** - models and template policies loaded from TOML

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub use rowguard_common as common;
pub use rowguard_query as query;
pub use rowguard_rls as rls;

pub mod declarations;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use rowguard_common::config::RowGuardConfig;
use rowguard_common::error::{Error, Result};
use rowguard_common::{Action, Actor};
use rowguard_query::{FieldDef, Iqr, JunctionLink, QueryParser, RawQuery, RelationDef, SchemaRegistry};
use rowguard_rls::{
    AuditSink, CompiledQuery, PolicyEngine, PolicyOutcome, PolicyRegistry, QueryCompiler, SharedRule,
};

/// Startup-time builder for a [`RowGuard`]
///
/// Both registries are open while the builder is alive and sealed by
/// [`RowGuardBuilder::build`].
pub struct RowGuardBuilder {
    config: RowGuardConfig,
    schema: SchemaRegistry,
    policies: PolicyRegistry,
    audit: Option<Arc<dyn AuditSink>>,
}

impl RowGuardBuilder {
    pub fn new(config: RowGuardConfig) -> Self {
        let policies = PolicyRegistry::new(&config.policy);
        Self {
            config,
            schema: SchemaRegistry::new(),
            policies,
            audit: None,
        }
    }

    /// Register a model
    ///
    /// # Errors
    /// `schema_conflict` if the model exists, `registry_sealed` after
    /// [`seal_schema`](Self::seal_schema).
    pub fn register_model(
        &mut self,
        name: &str,
        fields: Vec<FieldDef>,
        relations: Vec<RelationDef>,
        junction: Option<JunctionLink>,
    ) -> Result<&mut Self> {
        self.schema.register(name, fields, relations, junction)?;
        Ok(self)
    }

    /// Validate and freeze the schema registry
    ///
    /// # Errors
    /// `invalid_schema` if a relation, junction or operator table is inconsistent.
    pub fn seal_schema(&mut self) -> Result<&mut Self> {
        self.schema.seal()?;
        Ok(self)
    }

    /// Register a policy rule for (model, action)
    ///
    /// # Errors
    /// `policy_conflict` when duplicates are configured as errors,
    /// `registry_sealed` after [`seal_policies`](Self::seal_policies).
    pub fn register_policy(&mut self, model: &str, action: impl Into<Action>, rule: SharedRule) -> Result<&mut Self> {
        self.policies.register(model, action, rule)?;
        Ok(self)
    }

    /// Register several rules combined with deny-overrides
    ///
    /// # Errors
    /// Same as [`register_policy`](Self::register_policy), plus `config_error`
    /// for an empty composition.
    pub fn compose_policies(
        &mut self,
        model: &str,
        action: impl Into<Action>,
        rules: Vec<SharedRule>,
    ) -> Result<&mut Self> {
        self.policies.compose(model, action, rules)?;
        Ok(self)
    }

    /// Require a registered policy for the given actions of a model
    ///
    /// # Errors
    /// `registry_sealed` after [`seal_policies`](Self::seal_policies).
    pub fn require_rls(&mut self, model: &str, actions: &[Action]) -> Result<&mut Self> {
        self.policies.require_rls(model, actions)?;
        Ok(self)
    }

    /// Opt actions of a model out of `require_rls_by_default`
    ///
    /// # Errors
    /// `registry_sealed` after [`seal_policies`](Self::seal_policies).
    pub fn exempt(&mut self, model: &str, actions: &[Action]) -> Result<&mut Self> {
        self.policies.exempt(model, actions)?;
        Ok(self)
    }

    pub fn seal_policies(&mut self) -> &mut Self {
        self.policies.seal();
        self
    }

    pub fn with_audit_sink(&mut self, audit: Arc<dyn AuditSink>) -> &mut Self {
        self.audit = Some(audit);
        self
    }

    /// Seal both registries and build the engine
    ///
    /// # Errors
    /// `invalid_schema` if the schema is inconsistent or a policy names an
    /// unregistered model.
    pub fn build(mut self) -> Result<RowGuard> {
        self.schema.seal()?;
        self.policies.seal();

        if let Some(model) = self.policies.models().find(|m| !self.schema.contains(m)) {
            return Err(Error::InvalidSchema(format!(
                "policy references unregistered model '{model}'"
            )));
        }

        let schema = Arc::new(self.schema);
        let mut engine = PolicyEngine::new(Arc::new(self.policies), Arc::clone(&schema), &self.config);
        if let Some(audit) = self.audit {
            engine = engine.with_audit_sink(audit);
        }

        info!(models = schema.model_names().count(), "RowGuard initialized");
        Ok(RowGuard {
            config: self.config,
            schema,
            compiler: QueryCompiler::new(Arc::new(engine)),
        })
    }
}

impl Default for RowGuardBuilder {
    fn default() -> Self {
        Self::new(RowGuardConfig::default())
    }
}

/// Sealed query engine, shared read-only across requests
pub struct RowGuard {
    config: RowGuardConfig,
    schema: Arc<SchemaRegistry>,
    compiler: QueryCompiler,
}

impl RowGuard {
    pub fn builder(config: RowGuardConfig) -> RowGuardBuilder {
        RowGuardBuilder::new(config)
    }

    #[must_use]
    pub fn config(&self) -> &RowGuardConfig {
        &self.config
    }

    #[must_use]
    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    /// Validate a raw query against the schema
    ///
    /// # Errors
    /// `query_parse_error` with the path of the offending node.
    pub fn parse(&self, model: &str, raw: &RawQuery) -> Result<Iqr> {
        Ok(QueryParser::new(&self.schema, &self.config.parser).parse(model, raw)?)
    }

    /// Evaluate the policy for (model, action) without compiling a query
    ///
    /// # Errors
    /// Policy errors as for [`compile`](Self::compile).
    pub async fn evaluate(&self, model: &str, action: impl Into<Action>, actor: &Actor) -> Result<PolicyOutcome> {
        self.compiler.engine().evaluate(model, &action.into(), actor).await
    }

    /// Parse a raw query and compile it for an actor
    ///
    /// # Errors
    /// `query_parse_error` for invalid input; `rls_not_implemented`,
    /// `policy_denied` or `policy_timeout` from the policy engine.
    pub async fn compile(
        &self,
        model: &str,
        action: impl Into<Action>,
        raw: &RawQuery,
        actor: &Actor,
    ) -> Result<CompiledQuery> {
        self.compile_with_cancel(model, action, raw, actor, &CancellationToken::new())
            .await
    }

    /// [`compile`](Self::compile) that yields `cancelled` once `cancel` fires
    ///
    /// # Errors
    /// As for [`compile`](Self::compile), plus `cancelled`.
    pub async fn compile_with_cancel(
        &self,
        model: &str,
        action: impl Into<Action>,
        raw: &RawQuery,
        actor: &Actor,
        cancel: &CancellationToken,
    ) -> Result<CompiledQuery> {
        let action = action.into();
        let query = self.parse(model, raw)?;
        debug!(model, %action, "Query parsed");
        self.compiler
            .compile_with_cancel(&action, query, actor, cancel)
            .await
    }
}
