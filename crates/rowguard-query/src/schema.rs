//! Schema registry: model name -> fields, relations and junction links
//!
//! The registry is open during startup (`&mut` registration) and sealed before
//! it is shared. Once sealed it is read-only and safe behind an `Arc` for any
//! number of concurrent readers.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use rowguard_common::error::{Error, Result};

use crate::filter::{Operator, OperatorSet};

/// Declared field types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Integer,
    Float,
    Boolean,
    /// RFC 3339 timestamp
    Timestamp,
    /// Integer or string identifier
    Id,
}

impl FieldType {
    /// Operators a field of this type may ever use
    pub fn operators(self) -> &'static [Operator] {
        use Operator::{Eq, Gt, Gte, Ilike, In, Is, Like, Lt, Lte, Neq, Nin};
        match self {
            Self::Text => &[Eq, Neq, Gt, Gte, Lt, Lte, In, Nin, Like, Ilike, Is],
            Self::Integer | Self::Float | Self::Timestamp => {
                &[Eq, Neq, Gt, Gte, Lt, Lte, In, Nin, Is]
            }
            Self::Boolean => &[Eq, Neq, Is],
            Self::Id => &[Eq, Neq, In, Nin, Is],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Timestamp => "timestamp",
            Self::Id => "id",
        }
    }
}

/// Field declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub sortable: bool,
    #[serde(default)]
    pub nullable: bool,
    /// Narrows the type's operator table when set
    #[serde(default)]
    pub operators: Option<Vec<Operator>>,
}

impl FieldDef {
    pub fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            sortable: false,
            nullable: false,
            operators: None,
        }
    }

    #[must_use]
    pub fn sortable(mut self) -> Self {
        self.sortable = true;
        self
    }

    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    #[must_use]
    pub fn operators(mut self, ops: &[Operator]) -> Self {
        self.operators = Some(ops.to_vec());
        self
    }
}

/// Relation cardinality
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    One,
    #[default]
    Many,
}

/// Relation declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationDef {
    pub name: String,
    /// Target model
    pub target: String,
    #[serde(default)]
    pub kind: RelationKind,
    /// Junction model for many-to-many links
    #[serde(default)]
    pub through: Option<String>,
}

impl RelationDef {
    pub fn one(name: &str, target: &str) -> Self {
        Self {
            name: name.to_string(),
            target: target.to_string(),
            kind: RelationKind::One,
            through: None,
        }
    }

    pub fn many(name: &str, target: &str) -> Self {
        Self {
            name: name.to_string(),
            target: target.to_string(),
            kind: RelationKind::Many,
            through: None,
        }
    }

    #[must_use]
    pub fn through(mut self, junction: &str) -> Self {
        self.through = Some(junction.to_string());
        self
    }
}

/// Marks a model as the junction between two models
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JunctionLink {
    pub left: String,
    pub right: String,
}

impl JunctionLink {
    pub fn new(left: &str, right: &str) -> Self {
        Self {
            left: left.to_string(),
            right: right.to_string(),
        }
    }

    fn links(&self, a: &str, b: &str) -> bool {
        (self.left == a && self.right == b) || (self.left == b && self.right == a)
    }
}

/// Field with its resolved operator table
#[derive(Debug, Clone)]
pub struct FieldSchema {
    pub def: FieldDef,
    allowed: OperatorSet,
}

impl FieldSchema {
    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn field_type(&self) -> FieldType {
        self.def.field_type
    }

    pub fn allows(&self, op: Operator) -> bool {
        self.allowed.contains(op)
    }
}

/// Registered model
#[derive(Debug, Clone)]
pub struct SchemaDefinition {
    pub name: String,
    fields: Vec<FieldSchema>,
    field_index: HashMap<String, usize>,
    relations: Vec<RelationDef>,
    relation_index: HashMap<String, usize>,
    pub junction: Option<JunctionLink>,
}

impl SchemaDefinition {
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.field_index.get(name).map(|i| &self.fields[*i])
    }

    /// Fields in declaration order
    pub fn fields(&self) -> &[FieldSchema] {
        &self.fields
    }

    pub fn relation(&self, name: &str) -> Option<&RelationDef> {
        self.relation_index.get(name).map(|i| &self.relations[*i])
    }

    pub fn relations(&self) -> &[RelationDef] {
        &self.relations
    }
}

/// Schema registry
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    models: HashMap<String, SchemaDefinition>,
    sealed: bool,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model
    pub fn register(
        &mut self,
        model: &str,
        fields: Vec<FieldDef>,
        relations: Vec<RelationDef>,
        junction: Option<JunctionLink>,
    ) -> Result<()> {
        if self.sealed {
            return Err(Error::RegistrySealed(format!(
                "cannot register model '{model}'"
            )));
        }
        if self.models.contains_key(model) {
            return Err(Error::SchemaConflict(model.to_string()));
        }

        let mut field_index = HashMap::with_capacity(fields.len());
        let mut field_schemas = Vec::with_capacity(fields.len());
        for (i, def) in fields.into_iter().enumerate() {
            if field_index.insert(def.name.clone(), i).is_some() {
                return Err(Error::InvalidSchema(format!(
                    "duplicate field '{}' on model '{model}'",
                    def.name
                )));
            }
            field_schemas.push(FieldSchema {
                def,
                allowed: OperatorSet::default(),
            });
        }

        let mut relation_index = HashMap::with_capacity(relations.len());
        for (i, rel) in relations.iter().enumerate() {
            if field_index.contains_key(&rel.name) || relation_index.insert(rel.name.clone(), i).is_some() {
                return Err(Error::InvalidSchema(format!(
                    "relation '{}' on model '{model}' clashes with another field or relation",
                    rel.name
                )));
            }
        }

        self.models.insert(
            model.to_string(),
            SchemaDefinition {
                name: model.to_string(),
                fields: field_schemas,
                field_index,
                relations,
                relation_index,
                junction,
            },
        );
        Ok(())
    }

    /// Validate cross-model references, resolve operator tables and freeze
    pub fn seal(&mut self) -> Result<()> {
        if self.sealed {
            return Ok(());
        }

        for schema in self.models.values() {
            for rel in &schema.relations {
                if !self.models.contains_key(&rel.target) {
                    return Err(Error::InvalidSchema(format!(
                        "relation '{}.{}' targets unknown model '{}'",
                        schema.name, rel.name, rel.target
                    )));
                }
                if let Some(through) = &rel.through {
                    let linked = self
                        .models
                        .get(through)
                        .and_then(|junction| junction.junction.as_ref())
                        .is_some_and(|link| link.links(&schema.name, &rel.target));
                    if !linked {
                        return Err(Error::InvalidSchema(format!(
                            "relation '{}.{}' is routed through '{through}', which is not a junction of '{}' and '{}'",
                            schema.name, rel.name, schema.name, rel.target
                        )));
                    }
                }
            }
            if let Some(link) = &schema.junction {
                for side in [&link.left, &link.right] {
                    if !self.models.contains_key(side) {
                        return Err(Error::InvalidSchema(format!(
                            "junction '{}' links unknown model '{side}'",
                            schema.name
                        )));
                    }
                }
            }
        }

        for schema in self.models.values_mut() {
            for field in &mut schema.fields {
                let table = OperatorSet::of(field.def.field_type.operators());
                let allowed = match &field.def.operators {
                    Some(narrowed) => {
                        let narrowed = OperatorSet::of(narrowed);
                        if !narrowed.is_subset_of(table) {
                            return Err(Error::InvalidSchema(format!(
                                "field '{}.{}' declares operators not valid for type {}",
                                schema.name,
                                field.def.name,
                                field.def.field_type.as_str()
                            )));
                        }
                        narrowed
                    }
                    None => table,
                };
                field.allowed = allowed;
            }
        }

        self.sealed = true;
        info!(models = self.models.len(), "Schema registry sealed");
        Ok(())
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Look up a model
    pub fn resolve(&self, model: &str) -> Result<&SchemaDefinition> {
        self.models
            .get(model)
            .ok_or_else(|| Error::UnknownModel(model.to_string()))
    }

    pub fn contains(&self, model: &str) -> bool {
        self.models.contains_key(model)
    }

    pub fn model_names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }
}
