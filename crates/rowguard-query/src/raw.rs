//! Raw (untrusted) queries and their validated counterpart

use serde::{Deserialize, Serialize};

use crate::filter::FilterNode;
use crate::schema::RelationKind;

/// Caller-supplied query description, kept as JSON until validated
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawQuery(serde_json::Value);

impl RawQuery {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_json(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_json(self) -> serde_json::Value {
        self.0
    }
}

impl From<serde_json::Value> for RawQuery {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

/// Sort clause
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    pub direction: SortDirection,
}

/// Page window; `offset` and `cursor` are mutually exclusive
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub cursor: Option<String>,
}

impl Pagination {
    pub fn is_empty(&self) -> bool {
        self.limit.is_none() && self.offset.is_none() && self.cursor.is_none()
    }
}

/// Validated include of a relation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Include {
    pub relation: String,
    /// Target model of the relation
    pub target: String,
    /// Whether the relation yields one row or many
    pub kind: RelationKind,
    /// Junction model the relation is routed through
    pub through: Option<String>,
    pub query: Iqr,
}

/// Intermediate query representation
///
/// Only references fields and relations registered for `model`, and every
/// leaf operator is valid for its field's declared type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Iqr {
    pub model: String,
    pub filter: FilterNode,
    pub includes: Vec<Include>,
    pub sort: Vec<SortSpec>,
    pub pagination: Pagination,
}

impl Iqr {
    /// Unfiltered query over a model
    pub fn all(model: &str) -> Self {
        Self {
            model: model.to_string(),
            filter: FilterNode::match_all(),
            includes: Vec::new(),
            sort: Vec::new(),
            pagination: Pagination::default(),
        }
    }

    /// Render back into the raw query shape accepted by the parser
    pub fn to_raw(&self) -> RawQuery {
        RawQuery(self.to_json())
    }

    fn to_json(&self) -> serde_json::Value {
        let mut out = serde_json::Map::new();

        if !self.filter.is_match_all() {
            out.insert("filters".into(), self.filter.to_raw());
        }

        if !self.includes.is_empty() {
            let includes = self
                .includes
                .iter()
                .map(|inc| {
                    serde_json::json!({
                        "relation": inc.relation,
                        "query": inc.query.to_json(),
                    })
                })
                .collect();
            out.insert("include".into(), serde_json::Value::Array(includes));
        }

        if !self.sort.is_empty() {
            let sort = self
                .sort
                .iter()
                .map(|s| serde_json::json!({"field": s.field, "direction": s.direction.as_str()}))
                .collect();
            out.insert("sort".into(), serde_json::Value::Array(sort));
        }

        if !self.pagination.is_empty() {
            let mut page = serde_json::Map::new();
            if let Some(limit) = self.pagination.limit {
                page.insert("limit".into(), limit.into());
            }
            if let Some(offset) = self.pagination.offset {
                page.insert("offset".into(), offset.into());
            }
            if let Some(cursor) = &self.pagination.cursor {
                page.insert("cursor".into(), cursor.clone().into());
            }
            out.insert("pagination".into(), serde_json::Value::Object(page));
        }

        serde_json::Value::Object(out)
    }
}
