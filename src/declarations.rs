//! TOML declarations of models and template policies
//!
//! ```toml
//! [[models]]
//! name = "customer"
//! require_rls = ["read"]
//! fields = [
//!     { name = "id", type = "id", sortable = true },
//!     { name = "email", type = "text" },
//! ]
//! relations = [{ name = "orders", target = "order" }]
//!
//! [[policies]]
//! model = "customer"
//! action = "read"
//! name = "own_row"
//! effect = "restrict"
//! filter = { field = "id", op = "eq", value = "$subject.customer.id" }
//! ```

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use rowguard_common::error::{Error, Result};
use rowguard_common::Action;
use rowguard_query::{FieldDef, JunctionLink, RelationDef};
use rowguard_rls::{PolicyTemplate, SharedRule, TemplateRule};

use crate::RowGuardBuilder;

/// Declared model
#[derive(Debug, Clone, Deserialize)]
pub struct ModelDeclaration {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub relations: Vec<RelationDef>,
    #[serde(default)]
    pub junction: Option<JunctionLink>,
    /// Actions that must have a registered policy
    #[serde(default)]
    pub require_rls: Vec<Action>,
    /// Actions exempt from `require_rls_by_default`
    #[serde(default)]
    pub exempt_rls: Vec<Action>,
}

/// Declared template policy for (model, action)
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyDeclaration {
    pub model: String,
    pub action: Action,
    #[serde(flatten)]
    pub template: PolicyTemplate,
}

/// Contents of a declarations file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Declarations {
    pub models: Vec<ModelDeclaration>,
    pub policies: Vec<PolicyDeclaration>,
}

impl Declarations {
    /// Parse declarations from TOML
    ///
    /// # Errors
    /// `config_error` if the document is not valid declarations TOML.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("invalid declarations: {e}")))
    }

    /// Read and parse a declarations file
    ///
    /// # Errors
    /// `config_error` if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    /// Register every model and policy on a builder
    ///
    /// Policies declared for the same (model, action) are composed in file
    /// order.
    ///
    /// # Errors
    /// Any registration error from the builder.
    pub fn apply(self, builder: &mut RowGuardBuilder) -> Result<()> {
        for model in self.models {
            builder.register_model(&model.name, model.fields, model.relations, model.junction)?;
            if !model.require_rls.is_empty() {
                builder.require_rls(&model.name, &model.require_rls)?;
            }
            if !model.exempt_rls.is_empty() {
                builder.exempt(&model.name, &model.exempt_rls)?;
            }
        }

        let mut grouped: Vec<((String, Action), Vec<SharedRule>)> = Vec::new();
        for policy in self.policies {
            let key = (policy.model, policy.action);
            let rule: SharedRule = Arc::new(TemplateRule::new(policy.template));
            match grouped.iter_mut().find(|(k, _)| *k == key) {
                Some((_, rules)) => rules.push(rule),
                None => grouped.push((key, vec![rule])),
            }
        }

        for ((model, action), rules) in grouped {
            debug!(%model, %action, rules = rules.len(), "Registering declared policies");
            builder.compose_policies(&model, action, rules)?;
        }
        Ok(())
    }
}
