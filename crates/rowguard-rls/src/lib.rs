//! Row Level Security (RLS) Engine
//!
//! Provides fail-closed policy enforcement for structured queries:
//! - Policy rules, composition and the sealed policy registry
//! - Actor placeholder substitution for declarative templates
//! - Deny-overrides evaluation with per-rule timeouts and cancellation
//! - Query compilation with recursive enforcement on includes
//! - Decision auditing

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod audit;
pub mod compiler;
pub mod context;
pub mod evaluator;
pub mod policy;

pub use audit::{AuditSink, DecisionKind, InMemoryAuditSink, PolicyDecisionEvent, TracingAuditSink};
pub use compiler::{ActorIdentity, CompiledInclude, CompiledJunction, CompiledQuery, QueryCompiler};
pub use context::{PolicyTemplate, TemplateEffect, TemplateRule};
pub use evaluator::{Decision, PolicyEngine};
pub use policy::{async_rule_fn, rule_fn, PolicyOutcome, PolicyRegistry, PolicyRule, SharedRule};
