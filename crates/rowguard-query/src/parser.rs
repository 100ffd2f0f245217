//! Raw query parsing and validation against the schema registry
//!
//! Recursive descent over the raw JSON. Each leaf validates its
//! `(field, operator, value)` triple in one pass; combinators validate their
//! children before assembling the canonical parent. The parser performs no I/O.

use chrono::DateTime;
use serde_json::{Map, Value};
use tracing::debug;

use rowguard_common::config::ParserConfig;
use rowguard_common::error::{ParseError, ParseReason};
use rowguard_common::Scalar;

use crate::filter::{and_all, or_all, Arity, FilterNode, FilterValue, Leaf, Operator};
use crate::raw::{Include, Iqr, Pagination, RawQuery, SortDirection, SortSpec};
use crate::schema::{FieldSchema, FieldType, SchemaDefinition, SchemaRegistry};

pub type ParseResult<T> = std::result::Result<T, ParseError>;

const QUERY_KEYS: [&str; 4] = ["filters", "include", "sort", "pagination"];
const LEAF_KEYS: [&str; 4] = ["field", "op", "operator", "value"];

/// Parser over a schema registry snapshot
pub struct QueryParser<'a> {
    schema: &'a SchemaRegistry,
    config: &'a ParserConfig,
}

impl<'a> QueryParser<'a> {
    pub fn new(schema: &'a SchemaRegistry, config: &'a ParserConfig) -> Self {
        Self { schema, config }
    }

    /// Parse a raw query for `model` into a validated, canonical IQR
    pub fn parse(&self, model: &str, raw: &RawQuery) -> ParseResult<Iqr> {
        let iqr = self.parse_query(model, raw.as_json(), "", 0)?;
        debug!(
            model,
            includes = iqr.includes.len(),
            "Parsed raw query"
        );
        Ok(iqr)
    }

    /// Parse a standalone filter tree; error paths are rooted at `root`
    pub fn parse_filter(&self, model: &str, raw: &Value, root: &str) -> ParseResult<FilterNode> {
        let schema = self.resolve(model, root)?;
        self.filter_node(schema, raw, root, 1)
    }

    /// Re-validate and canonicalize an already-built filter tree
    pub fn check_filter(&self, model: &str, node: &FilterNode, root: &str) -> ParseResult<FilterNode> {
        self.parse_filter(model, &node.to_raw(), root)
    }

    fn resolve(&self, model: &str, path: &str) -> ParseResult<&'a SchemaDefinition> {
        self.schema.resolve(model).map_err(|_| {
            ParseError::new(path, ParseReason::UnknownModel, format!("unknown model '{model}'"))
        })
    }

    fn parse_query(&self, model: &str, raw: &Value, path: &str, depth: usize) -> ParseResult<Iqr> {
        let schema = self.resolve(model, path)?;
        let mut iqr = Iqr::all(model);

        let obj = match raw {
            Value::Null => return Ok(iqr),
            Value::Object(obj) => obj,
            _ => return Err(malformed(path, "query must be an object")),
        };
        reject_unknown_keys(obj, &QUERY_KEYS, path)?;

        if let Some(filters) = obj.get("filters") {
            iqr.filter = self.filter_node(schema, filters, &key(path, "filters"), 1)?;
        }
        if let Some(include) = obj.get("include") {
            iqr.includes = self.includes(schema, include, &key(path, "include"), depth)?;
        }
        if let Some(sort) = obj.get("sort") {
            iqr.sort = sort_specs(schema, sort, &key(path, "sort"))?;
        }
        if let Some(page) = obj.get("pagination") {
            iqr.pagination = self.pagination(page, &key(path, "pagination"))?;
        }

        Ok(iqr)
    }

    fn filter_node(
        &self,
        schema: &SchemaDefinition,
        raw: &Value,
        path: &str,
        depth: usize,
    ) -> ParseResult<FilterNode> {
        if depth > self.config.max_filter_depth {
            return Err(ParseError::new(
                path,
                ParseReason::MaxDepthExceeded,
                format!("filter nesting exceeds {}", self.config.max_filter_depth),
            ));
        }

        let Value::Object(obj) = raw else {
            return Err(malformed(path, "filter must be an object"));
        };

        for combinator in ["and", "or"] {
            if let Some(children) = obj.get(combinator) {
                if obj.len() != 1 {
                    return Err(malformed(path, format!("'{combinator}' must be the only key")));
                }
                let child_path = key(path, combinator);
                let Value::Array(items) = children else {
                    return Err(malformed(&child_path, "expected a list of filters"));
                };
                let nodes = items
                    .iter()
                    .enumerate()
                    .map(|(i, child)| self.filter_node(schema, child, &index(&child_path, i), depth + 1))
                    .collect::<ParseResult<Vec<_>>>()?;
                return Ok(if combinator == "and" {
                    and_all(nodes)
                } else {
                    or_all(nodes)
                });
            }
        }

        if let Some(child) = obj.get("not") {
            if obj.len() != 1 {
                return Err(malformed(path, "'not' must be the only key"));
            }
            return Ok(self
                .filter_node(schema, child, &key(path, "not"), depth + 1)?
                .negate());
        }

        leaf(schema, obj, path).map(FilterNode::Leaf)
    }

    fn includes(
        &self,
        schema: &SchemaDefinition,
        raw: &Value,
        path: &str,
        depth: usize,
    ) -> ParseResult<Vec<Include>> {
        let Value::Array(items) = raw else {
            return Err(malformed(path, "expected a list of includes"));
        };

        let mut includes: Vec<Include> = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let item_path = index(path, i);
            if depth + 1 > self.config.max_include_depth {
                return Err(ParseError::new(
                    item_path,
                    ParseReason::MaxDepthExceeded,
                    format!("include nesting exceeds {}", self.config.max_include_depth),
                ));
            }

            let (name, name_path, nested) = match item {
                Value::String(name) => (name.as_str(), item_path.clone(), &Value::Null),
                Value::Object(obj) => {
                    reject_unknown_keys(obj, &["relation", "query"], &item_path)?;
                    let name_path = key(&item_path, "relation");
                    let name = obj
                        .get("relation")
                        .and_then(Value::as_str)
                        .ok_or_else(|| malformed(&name_path, "expected a relation name"))?;
                    (name, name_path, obj.get("query").unwrap_or(&Value::Null))
                }
                _ => return Err(malformed(&item_path, "expected a relation name or object")),
            };

            let relation = schema.relation(name).ok_or_else(|| {
                ParseError::new(
                    &name_path,
                    ParseReason::UnknownRelation,
                    format!("model '{}' has no relation '{name}'", schema.name),
                )
            })?;
            if includes.iter().any(|inc| inc.relation == name) {
                return Err(malformed(&name_path, format!("relation '{name}' included twice")));
            }

            let query = self.parse_query(&relation.target, nested, &key(&item_path, "query"), depth + 1)?;
            includes.push(Include {
                relation: relation.name.clone(),
                target: relation.target.clone(),
                kind: relation.kind,
                through: relation.through.clone(),
                query,
            });
        }
        Ok(includes)
    }

    fn pagination(&self, raw: &Value, path: &str) -> ParseResult<Pagination> {
        let Value::Object(obj) = raw else {
            return Err(malformed(path, "pagination must be an object"));
        };
        reject_unknown_keys(obj, &["limit", "offset", "cursor"], path)?;

        let mut page = Pagination::default();
        if let Some(limit) = obj.get("limit") {
            let limit_path = key(path, "limit");
            let limit = non_negative(limit, &limit_path)?;
            if limit > self.config.max_limit {
                return Err(ParseError::new(
                    limit_path,
                    ParseReason::InvalidPagination,
                    format!("limit {limit} exceeds maximum {}", self.config.max_limit),
                ));
            }
            page.limit = Some(limit);
        }
        if let Some(offset) = obj.get("offset") {
            page.offset = Some(non_negative(offset, &key(path, "offset"))?);
        }
        if let Some(cursor) = obj.get("cursor") {
            let cursor_path = key(path, "cursor");
            let cursor = cursor.as_str().ok_or_else(|| {
                ParseError::new(&cursor_path, ParseReason::InvalidPagination, "cursor must be a string")
            })?;
            if page.offset.is_some() {
                return Err(ParseError::new(
                    cursor_path,
                    ParseReason::InvalidPagination,
                    "offset and cursor are mutually exclusive",
                ));
            }
            page.cursor = Some(cursor.to_string());
        }
        Ok(page)
    }
}

fn leaf(schema: &SchemaDefinition, obj: &Map<String, Value>, path: &str) -> ParseResult<Leaf> {
    reject_unknown_keys(obj, &LEAF_KEYS, path)?;

    let field_path = key(path, "field");
    let name = obj
        .get("field")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed(&field_path, "expected a field name"))?;
    let field = schema.field(name).ok_or_else(|| {
        ParseError::new(
            &field_path,
            ParseReason::UnknownField,
            format!("model '{}' has no field '{name}'", schema.name),
        )
    })?;

    let (op_key, op_raw) = match (obj.get("op"), obj.get("operator")) {
        (Some(op), None) => ("op", op),
        (None, Some(op)) => ("operator", op),
        (Some(_), Some(_)) => return Err(malformed(path, "use either 'op' or 'operator'")),
        (None, None) => return Err(malformed(&key(path, "op"), "missing operator")),
    };
    let op_path = key(path, op_key);
    let operator = op_raw.as_str().and_then(Operator::parse).ok_or_else(|| {
        ParseError::new(&op_path, ParseReason::UnknownOperator, format!("unknown operator {op_raw}"))
    })?;
    if !field.allows(operator) {
        return Err(ParseError::new(
            op_path,
            ParseReason::OperatorNotPermitted,
            format!(
                "operator '{operator}' is not permitted on {} field '{name}'",
                field.field_type().as_str()
            ),
        ));
    }

    let value_path = key(path, "value");
    let value = leaf_value(field, operator, obj.get("value").unwrap_or(&Value::Null), &value_path)?;

    Ok(Leaf {
        field: field.name().to_string(),
        operator,
        value,
    })
}

fn leaf_value(field: &FieldSchema, operator: Operator, raw: &Value, path: &str) -> ParseResult<FilterValue> {
    let field_type = field.field_type();
    match operator.arity() {
        Arity::Is => match raw {
            Value::Null if field.def.nullable => Ok(FilterValue::Null),
            Value::Null => Err(invalid_value(path, format!("field '{}' is not nullable", field.name()))),
            Value::Bool(b) if field_type == FieldType::Boolean => Ok(FilterValue::Single(Scalar::Bool(*b))),
            _ => Err(invalid_value(path, "'is' expects null, or true/false on boolean fields")),
        },
        Arity::List => {
            let Value::Array(items) = raw else {
                return Err(invalid_value(path, format!("'{operator}' expects a list")));
            };
            if items.is_empty() {
                return Err(invalid_value(path, format!("'{operator}' expects a non-empty list")));
            }
            items
                .iter()
                .enumerate()
                .map(|(i, item)| scalar(field_type, item, &index(path, i)))
                .collect::<ParseResult<Vec<_>>>()
                .map(FilterValue::List)
        }
        Arity::Single => match raw {
            Value::Null => Err(invalid_value(path, "null comparisons must use 'is'")),
            other => scalar(field_type, other, path).map(FilterValue::Single),
        },
    }
}

/// Coerce a JSON value into a scalar of the declared field type
fn scalar(field_type: FieldType, raw: &Value, path: &str) -> ParseResult<Scalar> {
    let coerced = match (field_type, raw) {
        (FieldType::Text, Value::String(s)) => Some(Scalar::Text(s.clone())),
        (FieldType::Integer, Value::Number(n)) => n.as_i64().map(Scalar::Int),
        (FieldType::Float, Value::Number(n)) => n.as_f64().map(Scalar::Float),
        (FieldType::Boolean, Value::Bool(b)) => Some(Scalar::Bool(*b)),
        (FieldType::Timestamp, Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|_| Scalar::Text(s.clone())),
        (FieldType::Id, Value::Number(n)) => n.as_i64().map(Scalar::Int),
        (FieldType::Id, Value::String(s)) if !s.is_empty() => Some(Scalar::Text(s.clone())),
        _ => None,
    };
    coerced.ok_or_else(|| {
        invalid_value(
            path,
            format!("expected a {} value, got {raw}", field_type.as_str()),
        )
    })
}

fn sort_specs(schema: &SchemaDefinition, raw: &Value, path: &str) -> ParseResult<Vec<SortSpec>> {
    let Value::Array(items) = raw else {
        return Err(malformed(path, "expected a list of sort clauses"));
    };

    let mut specs = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let item_path = index(path, i);
        let (name, field_path, direction) = match item {
            // "created_at" or "created_at.desc"
            Value::String(s) => {
                let (name, dir) = s.split_once('.').unwrap_or((s.as_str(), "asc"));
                (name, item_path.clone(), direction(dir, &item_path)?)
            }
            Value::Object(obj) => {
                reject_unknown_keys(obj, &["field", "direction"], &item_path)?;
                let field_path = key(&item_path, "field");
                let name = obj
                    .get("field")
                    .and_then(Value::as_str)
                    .ok_or_else(|| malformed(&field_path, "expected a field name"))?;
                let dir = match obj.get("direction") {
                    None => SortDirection::Asc,
                    Some(Value::String(d)) => direction(d, &key(&item_path, "direction"))?,
                    Some(_) => return Err(malformed(&key(&item_path, "direction"), "expected 'asc' or 'desc'")),
                };
                (name, field_path, dir)
            }
            _ => return Err(malformed(&item_path, "expected a sort clause")),
        };

        let field = schema.field(name).ok_or_else(|| {
            ParseError::new(
                &field_path,
                ParseReason::UnknownField,
                format!("model '{}' has no field '{name}'", schema.name),
            )
        })?;
        if !field.def.sortable {
            return Err(ParseError::new(
                field_path,
                ParseReason::NotSortable,
                format!("field '{name}' is not sortable"),
            ));
        }
        specs.push(SortSpec {
            field: name.to_string(),
            direction,
        });
    }
    Ok(specs)
}

fn direction(raw: &str, path: &str) -> ParseResult<SortDirection> {
    match raw.to_ascii_lowercase().as_str() {
        "asc" => Ok(SortDirection::Asc),
        "desc" => Ok(SortDirection::Desc),
        other => Err(malformed(path, format!("unknown sort direction '{other}'"))),
    }
}

fn non_negative(raw: &Value, path: &str) -> ParseResult<u64> {
    match raw.as_i64() {
        Some(n) if n >= 0 => Ok(n.unsigned_abs()),
        Some(n) => Err(ParseError::new(
            path,
            ParseReason::InvalidPagination,
            format!("{n} is negative"),
        )),
        None => Err(ParseError::new(
            path,
            ParseReason::InvalidPagination,
            "expected an integer",
        )),
    }
}

fn reject_unknown_keys(obj: &Map<String, Value>, allowed: &[&str], path: &str) -> ParseResult<()> {
    match obj.keys().find(|k| !allowed.contains(&k.as_str())) {
        Some(unknown) => Err(malformed(&key(path, unknown), "unexpected key")),
        None => Ok(()),
    }
}

fn malformed(path: &str, detail: impl Into<String>) -> ParseError {
    ParseError::new(path, ParseReason::Malformed, detail)
}

fn invalid_value(path: &str, detail: impl Into<String>) -> ParseError {
    ParseError::new(path, ParseReason::InvalidValue, detail)
}

fn key(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{path}.{name}")
    }
}

fn index(path: &str, i: usize) -> String {
    format!("{path}[{i}]")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDef, RelationDef, RelationKind};
    use serde_json::json;

    fn registry() -> SchemaRegistry {
        let mut registry = SchemaRegistry::new();
        registry
            .register(
                "customer",
                vec![
                    FieldDef::new("id", FieldType::Id).sortable(),
                    FieldDef::new("email", FieldType::Text).nullable(),
                    FieldDef::new("age", FieldType::Integer).sortable(),
                    FieldDef::new("score", FieldType::Float),
                    FieldDef::new("active", FieldType::Boolean),
                    FieldDef::new("created_at", FieldType::Timestamp).sortable(),
                ],
                vec![RelationDef::many("orders", "order")],
                None,
            )
            .unwrap();
        registry
            .register(
                "order",
                vec![
                    FieldDef::new("id", FieldType::Id),
                    FieldDef::new("customer_id", FieldType::Id),
                    FieldDef::new("total", FieldType::Float).sortable(),
                ],
                vec![
                    RelationDef::one("customer", "customer"),
                ],
                None,
            )
            .unwrap();
        registry.seal().unwrap();
        registry
    }

    fn parse(model: &str, raw: serde_json::Value) -> ParseResult<Iqr> {
        let schema = registry();
        let config = ParserConfig::default();
        QueryParser::new(&schema, &config).parse(model, &RawQuery::new(raw))
    }

    fn parse_err(model: &str, raw: serde_json::Value) -> (String, ParseReason) {
        let err = parse(model, raw).unwrap_err();
        (err.path, err.reason)
    }

    #[test]
    fn test_single_leaf() {
        let iqr = parse(
            "customer",
            json!({"filters": {"field": "email", "op": "eq", "value": "a@b.com"}}),
        )
        .unwrap();
        assert_eq!(iqr.filter, FilterNode::leaf("email", Operator::Eq, "a@b.com"));
    }

    #[test]
    fn test_unknown_field() {
        assert_eq!(
            parse_err("customer", json!({"filters": {"field": "nope", "op": "eq", "value": 1}})),
            ("filters.field".to_string(), ParseReason::UnknownField)
        );
    }

    #[test]
    fn test_unknown_model() {
        let (_, reason) = parse_err("ghost", json!({}));
        assert_eq!(reason, ParseReason::UnknownModel);
    }

    #[test]
    fn test_nested_path() {
        let raw = json!({"filters": {"and": [
            {"field": "email", "op": "eq", "value": "a"},
            {"field": "age", "op": "gt", "value": 3},
            {"field": "missing", "op": "eq", "value": 1}
        ]}});
        assert_eq!(
            parse_err("customer", raw),
            ("filters.and[2].field".to_string(), ParseReason::UnknownField)
        );
    }

    #[test]
    fn test_operator_not_permitted() {
        assert_eq!(
            parse_err("customer", json!({"filters": {"field": "active", "op": "like", "value": "x"}})),
            ("filters.op".to_string(), ParseReason::OperatorNotPermitted)
        );
        assert_eq!(
            parse_err("customer", json!({"filters": {"field": "age", "operator": "~", "value": 1}})),
            ("filters.operator".to_string(), ParseReason::UnknownOperator)
        );
    }

    #[test]
    fn test_malformed_values() {
        let cases = [
            json!({"field": "age", "op": "eq", "value": "ten"}),
            json!({"field": "age", "op": "in", "value": 3}),
            json!({"field": "age", "op": "in", "value": []}),
            json!({"field": "age", "op": "eq", "value": null}),
            json!({"field": "age", "op": "is", "value": true}),
            json!({"field": "created_at", "op": "gt", "value": "yesterday"}),
        ];
        for filter in cases {
            let (path, reason) = parse_err("customer", json!({"filters": filter}));
            assert_eq!(reason, ParseReason::InvalidValue, "{filter}");
            assert_eq!(path, "filters.value");
        }
    }

    #[test]
    fn test_null_check_requires_nullable_field() {
        let iqr = parse("customer", json!({"filters": {"field": "email", "op": "is", "value": null}})).unwrap();
        assert_eq!(iqr.filter, FilterNode::is_null("email"));

        assert_eq!(
            parse_err("customer", json!({"filters": {"field": "id", "op": "is", "value": null}})),
            ("filters.value".to_string(), ParseReason::InvalidValue)
        );
        assert_eq!(
            parse_err("customer", json!({"filters": {"field": "age", "op": "is"}})),
            ("filters.value".to_string(), ParseReason::InvalidValue)
        );
    }

    #[test]
    fn test_list_element_path() {
        assert_eq!(
            parse_err("customer", json!({"filters": {"field": "age", "op": "in", "value": [1, "x"]}})),
            ("filters.value[1]".to_string(), ParseReason::InvalidValue)
        );
    }

    #[test]
    fn test_typed_values() {
        let iqr = parse(
            "customer",
            json!({"filters": {"and": [
                {"field": "score", "op": "gte", "value": 7},
                {"field": "active", "op": "is", "value": true},
                {"field": "created_at", "op": "lt", "value": "2024-01-01T00:00:00Z"},
                {"field": "id", "op": "in", "value": [1, "abc"]}
            ]}}),
        )
        .unwrap();
        let leaves = iqr.filter.leaves();
        assert_eq!(leaves[0].value, FilterValue::Single(Scalar::Float(7.0)));
        assert_eq!(leaves[1].value, FilterValue::Single(Scalar::Bool(true)));
        assert_eq!(
            leaves[3].value,
            FilterValue::List(vec![Scalar::Int(1), Scalar::Text("abc".into())])
        );
    }

    #[test]
    fn test_canonicalization() {
        let iqr = parse("customer", json!({"filters": {"and": []}})).unwrap();
        assert!(iqr.filter.is_match_all());

        let iqr = parse("customer", json!({"filters": {"or": []}})).unwrap();
        assert!(iqr.filter.is_match_none());

        let iqr = parse(
            "customer",
            json!({"filters": {"or": [{"and": [{"field": "age", "op": "eq", "value": 1}]}]}}),
        )
        .unwrap();
        assert_eq!(iqr.filter, FilterNode::leaf("age", Operator::Eq, 1));
    }

    #[test]
    fn test_not_node() {
        let iqr = parse(
            "customer",
            json!({"filters": {"not": {"field": "active", "op": "eq", "value": false}}}),
        )
        .unwrap();
        assert!(matches!(iqr.filter, FilterNode::Not(_)));
    }

    #[test]
    fn test_filter_depth_limit() {
        let mut filter = json!({"field": "age", "op": "eq", "value": 1});
        for _ in 0..40 {
            filter = json!({"not": filter});
        }
        let (_, reason) = parse_err("customer", json!({"filters": filter}));
        assert_eq!(reason, ParseReason::MaxDepthExceeded);
    }

    #[test]
    fn test_include() {
        let iqr = parse(
            "customer",
            json!({"include": [{"relation": "orders", "query": {"sort": ["total.desc"]}}]}),
        )
        .unwrap();
        assert_eq!(iqr.includes.len(), 1);
        assert_eq!(iqr.includes[0].target, "order");
        assert_eq!(iqr.includes[0].query.sort[0].direction, SortDirection::Desc);

        let iqr = parse("customer", json!({"include": ["orders"]})).unwrap();
        assert_eq!(iqr.includes[0].relation, "orders");
        assert_eq!(iqr.includes[0].kind, RelationKind::Many);

        let iqr = parse("order", json!({"include": ["customer"]})).unwrap();
        assert_eq!(iqr.includes[0].kind, RelationKind::One);
    }

    #[test]
    fn test_unknown_relation() {
        assert_eq!(
            parse_err("customer", json!({"include": [{"relation": "invoices"}]})),
            ("include[0].relation".to_string(), ParseReason::UnknownRelation)
        );
    }

    #[test]
    fn test_nested_include_error_path() {
        assert_eq!(
            parse_err(
                "customer",
                json!({"include": [{"relation": "orders", "query": {"filters": {"field": "email", "op": "eq", "value": "x"}}}]})
            ),
            (
                "include[0].query.filters.field".to_string(),
                ParseReason::UnknownField
            )
        );
    }

    #[test]
    fn test_include_depth_limit() {
        // customer -> orders -> customer -> orders -> customer
        let mut query = json!({});
        for relation in ["orders", "customer", "orders", "customer", "orders"].iter().rev() {
            query = json!({"include": [{"relation": relation, "query": query}]});
        }
        let (path, reason) = parse_err("customer", query);
        assert_eq!(reason, ParseReason::MaxDepthExceeded);
        assert!(path.starts_with("include[0].query.include[0]"));
    }

    #[test]
    fn test_sort_validation() {
        assert_eq!(
            parse_err("customer", json!({"sort": [{"field": "email"}]})),
            ("sort[0].field".to_string(), ParseReason::NotSortable)
        );
        let iqr = parse("customer", json!({"sort": [{"field": "age", "direction": "desc"}, "id"]})).unwrap();
        assert_eq!(iqr.sort.len(), 2);
        assert_eq!(iqr.sort[1].direction, SortDirection::Asc);
    }

    #[test]
    fn test_pagination_bounds() {
        assert_eq!(
            parse_err("customer", json!({"pagination": {"limit": -1}})),
            ("pagination.limit".to_string(), ParseReason::InvalidPagination)
        );
        assert_eq!(
            parse_err("customer", json!({"pagination": {"limit": 5000}})),
            ("pagination.limit".to_string(), ParseReason::InvalidPagination)
        );
        assert_eq!(
            parse_err("customer", json!({"pagination": {"offset": 10, "cursor": "abc"}})),
            ("pagination.cursor".to_string(), ParseReason::InvalidPagination)
        );
        let iqr = parse("customer", json!({"pagination": {"limit": 20, "offset": 40}})).unwrap();
        assert_eq!(iqr.pagination.limit, Some(20));
        assert_eq!(iqr.pagination.offset, Some(40));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert_eq!(
            parse_err("customer", json!({"where": {}})),
            ("where".to_string(), ParseReason::Malformed)
        );
        assert_eq!(
            parse_err("customer", json!({"filters": {"and": [], "or": []}})),
            ("filters".to_string(), ParseReason::Malformed)
        );
    }

    #[test]
    fn test_reparse_is_identity() {
        let raw = json!({
            "filters": {"or": [
                {"and": [{"field": "age", "op": "gte", "value": 18}, {"field": "score", "op": "lt", "value": 2}]},
                {"not": {"field": "email", "op": "ilike", "value": "%@test"}}
            ]},
            "include": [{"relation": "orders", "query": {"pagination": {"limit": 5, "cursor": "c1"}}}],
            "sort": ["created_at.desc"],
            "pagination": {"limit": 10}
        });
        let first = parse("customer", raw).unwrap();
        let second = parse("customer", first.to_raw().into_json()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_check_filter() {
        let schema = registry();
        let config = ParserConfig::default();
        let parser = QueryParser::new(&schema, &config);

        let ok = FilterNode::leaf("id", Operator::Eq, 7).and(FilterNode::match_all());
        assert_eq!(
            parser.check_filter("customer", &ok, "restriction").unwrap(),
            FilterNode::leaf("id", Operator::Eq, 7)
        );

        let bad = FilterNode::leaf("owner", Operator::Eq, 7);
        let err = parser.check_filter("customer", &bad, "restriction").unwrap_err();
        assert_eq!(err.path, "restriction.field");
    }
}
