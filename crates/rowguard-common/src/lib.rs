//! RowGuard Common Types and Utilities
//!
//! Shared types, configuration, and error handling for the policy-aware query engine.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod types;

pub use config::RowGuardConfig;
pub use error::{Error, ErrorCategory, ParseError, ParseReason, Result};
pub use types::{Action, Actor, CustomAction, Scalar, SubjectRef};
