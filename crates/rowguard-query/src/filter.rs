//! Typed filter tree of the intermediate query representation
//!
//! Canonical form, relied on by filter merging and by idempotent re-parsing:
//! - `And([])` is "match all", `Or([])` is "match none"
//! - a single-child `And`/`Or` collapses to the child
//! - nested `And` inside `And` (and `Or` inside `Or`) is flattened
//! - a "match none" child makes an `And` match none, a "match all" child makes
//!   an `Or` match all; the neutral element is dropped from its combinator
//! - `Not` of a constant is folded and `Not(Not(x))` is `x`

use std::fmt;

use serde::{Deserialize, Serialize};

use rowguard_common::Scalar;

/// Filter operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Eq,    // equals
    Neq,   // not equals
    Gt,    // greater than
    Gte,   // greater than or equal
    Lt,    // less than
    Lte,   // less than or equal
    In,    // membership
    Nin,   // non-membership
    Like,  // LIKE
    Ilike, // ILIKE (case-insensitive)
    Is,    // IS (NULL, TRUE, FALSE)
}

/// Shape of the value an operator expects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Single,
    List,
    /// `null`, `true` or `false`
    Is,
}

impl Operator {
    pub const ALL: [Operator; 11] = [
        Operator::Eq,
        Operator::Neq,
        Operator::Gt,
        Operator::Gte,
        Operator::Lt,
        Operator::Lte,
        Operator::In,
        Operator::Nin,
        Operator::Like,
        Operator::Ilike,
        Operator::Is,
    ];

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.as_str() == name)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::In => "in",
            Self::Nin => "nin",
            Self::Like => "like",
            Self::Ilike => "ilike",
            Self::Is => "is",
        }
    }

    pub fn arity(self) -> Arity {
        match self {
            Self::In | Self::Nin => Arity::List,
            Self::Is => Arity::Is,
            _ => Arity::Single,
        }
    }

    fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bitset of operators, checked in O(1) per leaf
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperatorSet(u16);

impl OperatorSet {
    pub fn of(ops: &[Operator]) -> Self {
        Self(ops.iter().fold(0, |acc, op| acc | op.bit()))
    }

    pub fn contains(self, op: Operator) -> bool {
        self.0 & op.bit() != 0
    }

    pub fn is_subset_of(self, other: Self) -> bool {
        self.0 & !other.0 == 0
    }
}

/// Leaf operand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterValue {
    Single(Scalar),
    List(Vec<Scalar>),
    Null,
}

impl FilterValue {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Single(s) => s.to_json(),
            Self::List(items) => {
                serde_json::Value::Array(items.iter().map(Scalar::to_json).collect())
            }
            Self::Null => serde_json::Value::Null,
        }
    }
}

/// A single `(field, operator, value)` condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leaf {
    pub field: String,
    pub operator: Operator,
    pub value: FilterValue,
}

/// Filter tree node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterNode {
    And(Vec<FilterNode>),
    Or(Vec<FilterNode>),
    Not(Box<FilterNode>),
    Leaf(Leaf),
}

impl FilterNode {
    /// Matches every row
    pub fn match_all() -> Self {
        Self::And(Vec::new())
    }

    /// Matches no row
    pub fn match_none() -> Self {
        Self::Or(Vec::new())
    }

    pub fn leaf(field: &str, operator: Operator, value: impl Into<Scalar>) -> Self {
        Self::Leaf(Leaf {
            field: field.to_string(),
            operator,
            value: FilterValue::Single(value.into()),
        })
    }

    pub fn is_null(field: &str) -> Self {
        Self::Leaf(Leaf {
            field: field.to_string(),
            operator: Operator::Is,
            value: FilterValue::Null,
        })
    }

    pub fn is_match_all(&self) -> bool {
        matches!(self, Self::And(children) if children.is_empty())
    }

    pub fn is_match_none(&self) -> bool {
        matches!(self, Self::Or(children) if children.is_empty())
    }

    /// Canonical conjunction of two canonical trees
    pub fn and(self, other: FilterNode) -> FilterNode {
        and_all(vec![self, other])
    }

    /// Canonical negation of a canonical tree
    pub fn negate(self) -> FilterNode {
        match self {
            Self::And(children) if children.is_empty() => Self::match_none(),
            Self::Or(children) if children.is_empty() => Self::match_all(),
            Self::Not(inner) => *inner,
            other => Self::Not(Box::new(other)),
        }
    }

    /// Render back into the raw JSON filter shape
    pub fn to_raw(&self) -> serde_json::Value {
        match self {
            Self::And(children) => serde_json::json!({
                "and": children.iter().map(FilterNode::to_raw).collect::<Vec<_>>()
            }),
            Self::Or(children) => serde_json::json!({
                "or": children.iter().map(FilterNode::to_raw).collect::<Vec<_>>()
            }),
            Self::Not(child) => serde_json::json!({ "not": child.to_raw() }),
            Self::Leaf(leaf) => serde_json::json!({
                "field": leaf.field,
                "op": leaf.operator.as_str(),
                "value": leaf.value.to_json(),
            }),
        }
    }

    /// Visit every leaf in the tree
    pub fn leaves(&self) -> Vec<&Leaf> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a Leaf>) {
        match self {
            Self::And(children) | Self::Or(children) => {
                for child in children {
                    child.collect_leaves(out);
                }
            }
            Self::Not(child) => child.collect_leaves(out),
            Self::Leaf(leaf) => out.push(leaf),
        }
    }
}

/// Canonical conjunction of already-canonical children
pub fn and_all(children: Vec<FilterNode>) -> FilterNode {
    let mut flat = Vec::with_capacity(children.len());
    for child in children {
        match child {
            FilterNode::And(grand) => flat.extend(grand),
            FilterNode::Or(ref grand) if grand.is_empty() => return FilterNode::match_none(),
            other => flat.push(other),
        }
    }
    collapse(flat, FilterNode::And)
}

/// Canonical disjunction of already-canonical children
pub fn or_all(children: Vec<FilterNode>) -> FilterNode {
    let mut flat = Vec::with_capacity(children.len());
    for child in children {
        match child {
            FilterNode::Or(grand) => flat.extend(grand),
            FilterNode::And(ref grand) if grand.is_empty() => return FilterNode::match_all(),
            other => flat.push(other),
        }
    }
    collapse(flat, FilterNode::Or)
}

fn collapse(mut children: Vec<FilterNode>, wrap: fn(Vec<FilterNode>) -> FilterNode) -> FilterNode {
    if children.len() == 1 {
        children.pop().unwrap_or_else(|| wrap(Vec::new()))
    } else {
        wrap(children)
    }
}
