//! Integration tests for the policy-aware query engine

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use rowguard::declarations::Declarations;
use rowguard::{RowGuard, RowGuardBuilder};
use rowguard_common::config::RowGuardConfig;
use rowguard_common::error::ParseReason;
use rowguard_common::{Action, Actor, Scalar, SubjectRef};
use rowguard_query::{FieldDef, FieldType, FilterNode, FilterValue, JunctionLink, Operator, RawQuery, RelationDef};
use rowguard_rls::{
    async_rule_fn, rule_fn, DecisionKind, InMemoryAuditSink, PolicyOutcome, PolicyTemplate, SharedRule,
    TemplateRule,
};

fn builder() -> RowGuardBuilder {
    let mut builder = RowGuardBuilder::default();
    builder
        .register_model(
            "customer",
            vec![
                FieldDef::new("id", FieldType::Id).sortable(),
                FieldDef::new("email", FieldType::Text),
                FieldDef::new("created_at", FieldType::Timestamp).sortable(),
            ],
            vec![
                RelationDef::many("orders", "order"),
                RelationDef::many("groups", "group").through("membership"),
            ],
            None,
        )
        .unwrap()
        .register_model(
            "order",
            vec![
                FieldDef::new("id", FieldType::Id),
                FieldDef::new("customer_id", FieldType::Id),
                FieldDef::new("total", FieldType::Float).sortable(),
            ],
            vec![RelationDef::one("customer", "customer")],
            None,
        )
        .unwrap()
        .register_model("group", vec![FieldDef::new("id", FieldType::Id)], vec![], None)
        .unwrap()
        .register_model(
            "membership",
            vec![FieldDef::new("customer_id", FieldType::Id)],
            vec![],
            Some(JunctionLink::new("customer", "group")),
        )
        .unwrap();
    builder
}

fn own_row(field: &'static str) -> SharedRule {
    Arc::new(TemplateRule::new(PolicyTemplate::restrict(
        "own_row",
        json!({"field": field, "op": "eq", "value": "$subject.customer.id"}),
    )))
}

fn customer(id: i64) -> Actor {
    Actor::authenticated().with_subject(SubjectRef::new("customer", "customer", id))
}

fn raw(value: serde_json::Value) -> RawQuery {
    RawQuery::new(value)
}

#[test]
fn test_parse_single_leaf() {
    let guard = builder().build().unwrap();
    let iqr = guard
        .parse(
            "customer",
            &raw(json!({"filters": {"field": "email", "op": "eq", "value": "a@b.com"}})),
        )
        .unwrap();
    assert_eq!(iqr.filter, FilterNode::leaf("email", Operator::Eq, "a@b.com"));
}

#[test]
fn test_parse_unknown_field_path() {
    let guard = builder().build().unwrap();
    let err = guard
        .parse("customer", &raw(json!({"filters": {"field": "nope", "op": "eq", "value": 1}})))
        .unwrap_err();
    let parse = err.parse_error().unwrap();
    assert_eq!(parse.path, "filters.field");
    assert_eq!(parse.reason, ParseReason::UnknownField);
}

#[test]
fn test_parse_nested_include_path() {
    let guard = builder().build().unwrap();
    let err = guard
        .parse(
            "customer",
            &raw(json!({"include": [{"relation": "orders", "query": {"filters": {"field": "email", "op": "eq", "value": "x"}}}]})),
        )
        .unwrap_err();
    assert_eq!(err.parse_error().unwrap().path, "include[0].query.filters.field");
}

#[tokio::test]
async fn test_restriction_merges_with_user_filter() {
    let mut builder = builder();
    builder.register_policy("customer", "read", own_row("id")).unwrap();
    let guard = builder.build().unwrap();

    let compiled = guard
        .compile(
            "customer",
            "read",
            &raw(json!({"filters": {"field": "email", "op": "eq", "value": "a@b.com"}})),
            &customer(7),
        )
        .await
        .unwrap();

    assert_eq!(
        compiled.filter,
        FilterNode::And(vec![
            FilterNode::leaf("email", Operator::Eq, "a@b.com"),
            FilterNode::leaf("id", Operator::Eq, 7),
        ])
    );
    assert_eq!(compiled.action, Action::Read);
}

#[tokio::test]
async fn test_required_rls_without_policy_fails_closed() {
    let mut builder = builder();
    builder.require_rls("order", &[Action::Read]).unwrap();
    let guard = builder.build().unwrap();

    for actor in [Actor::anonymous(), customer(1), customer(1).with_role("admin")] {
        let err = guard
            .compile("order", "read", &raw(json!({})), &actor)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "rls_not_implemented");
    }

    for spelling in ["READ", "Select", "select"] {
        let err = guard
            .compile("order", Action::from(spelling), &raw(json!({})), &customer(1))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "rls_not_implemented", "{spelling}");
    }
}

#[tokio::test]
async fn test_require_rls_by_default() {
    let config = RowGuardConfig {
        policy: rowguard_common::config::PolicyConfig {
            require_rls_by_default: true,
            ..Default::default()
        },
        ..Default::default()
    };
    let mut builder = RowGuard::builder(config);
    builder
        .register_model("country", vec![FieldDef::new("code", FieldType::Text)], vec![], None)
        .unwrap()
        .register_model("secret", vec![FieldDef::new("id", FieldType::Id)], vec![], None)
        .unwrap()
        .exempt("country", &[Action::Read])
        .unwrap();
    let guard = builder.build().unwrap();

    assert!(guard.compile("country", "read", &raw(json!({})), &Actor::anonymous()).await.is_ok());
    let err = guard
        .compile("secret", "read", &raw(json!({})), &Actor::anonymous())
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "rls_not_implemented");
}

#[tokio::test]
async fn test_deny_overrides_allow_and_restrict() {
    let mut builder = builder();
    builder
        .compose_policies(
            "customer",
            "read",
            vec![
                own_row("id"),
                rule_fn("staff", |_| PolicyOutcome::Allow),
                rule_fn("suspended", |actor: &Actor| {
                    if actor.has_role("suspended") {
                        PolicyOutcome::Deny
                    } else {
                        PolicyOutcome::Allow
                    }
                }),
            ],
        )
        .unwrap();
    let guard = builder.build().unwrap();

    let err = guard
        .compile("customer", "read", &raw(json!({})), &customer(1).with_role("suspended"))
        .await
        .unwrap_err();
    match err {
        rowguard_common::Error::PolicyDenied { rules, .. } => assert_eq!(rules, vec!["suspended"]),
        other => panic!("unexpected error: {other}"),
    }

    let compiled = guard
        .compile("customer", "read", &raw(json!({})), &customer(1))
        .await
        .unwrap();
    assert_eq!(compiled.filter, FilterNode::leaf("id", Operator::Eq, 1));
}

#[tokio::test(start_paused = true)]
async fn test_slow_rule_times_out() {
    let mut builder = builder();
    let slow = async_rule_fn("directory_lookup", |_actor, _cancel| async {
        tokio::time::sleep(Duration::from_secs(30)).await;
        PolicyOutcome::Allow
    })
    .with_timeout(Duration::from_millis(100));
    builder.register_policy("customer", "read", Arc::new(slow)).unwrap();
    let guard = builder.build().unwrap();

    let err = guard
        .compile("customer", "read", &raw(json!({})), &customer(1))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "policy_timeout");
}

#[tokio::test]
async fn test_cancellation_aborts_rule() {
    let mut builder = builder();
    let pending = async_rule_fn("pending", |_actor, cancel: CancellationToken| async move {
        cancel.cancelled().await;
        PolicyOutcome::Allow
    });
    builder.register_policy("customer", "read", Arc::new(pending)).unwrap();
    let guard = builder.build().unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        trigger.cancel();
    });

    let err = guard
        .compile_with_cancel("customer", "read", &raw(json!({})), &customer(1), &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "cancelled");
}

#[tokio::test]
async fn test_include_cannot_bypass_rls() {
    let mut builder = builder();
    builder.register_policy("order", "read", own_row("customer_id")).unwrap();
    let guard = builder.build().unwrap();

    let compiled = guard
        .compile(
            "customer",
            "read",
            &raw(json!({"include": [{"relation": "orders", "query": {"sort": ["total.desc"]}}]})),
            &customer(4),
        )
        .await
        .unwrap();
    let orders = &compiled.includes[0];
    assert_eq!(orders.relation, "orders");
    assert_eq!(orders.query.model, "order");
    assert_eq!(orders.query.filter, FilterNode::leaf("customer_id", Operator::Eq, 4));

    let err = guard
        .compile("customer", "read", &raw(json!({"include": ["orders"]})), &Actor::anonymous())
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "policy_denied");
}

#[tokio::test]
async fn test_junction_rows_are_restricted() {
    let mut builder = builder();
    builder.register_policy("membership", "read", own_row("customer_id")).unwrap();
    let guard = builder.build().unwrap();

    let compiled = guard
        .compile("customer", "read", &raw(json!({"include": ["groups"]})), &customer(9))
        .await
        .unwrap();
    let junction = compiled.includes[0].junction.as_ref().unwrap();
    assert_eq!(junction.model, "membership");
    assert_eq!(junction.filter, FilterNode::leaf("customer_id", Operator::Eq, 9));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_compiles_are_isolated() {
    let mut builder = builder();
    builder.register_policy("customer", "read", own_row("id")).unwrap();
    let guard = Arc::new(builder.build().unwrap());

    let handles: Vec<_> = (1..=32)
        .map(|id| {
            let guard = Arc::clone(&guard);
            tokio::spawn(async move {
                let compiled = guard
                    .compile("customer", "read", &RawQuery::default(), &customer(id))
                    .await
                    .unwrap();
                (id, compiled)
            })
        })
        .collect();

    for (id, compiled) in futures::future::join_all(handles).await.into_iter().map(Result::unwrap) {
        let leaves = compiled.filter.leaves();
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].value, FilterValue::Single(Scalar::Int(id)));
        assert_eq!(compiled.actor.subjects["customer"].id, Scalar::Int(id));
    }
}

#[tokio::test]
async fn test_decisions_are_audited() {
    let sink = Arc::new(InMemoryAuditSink::new());
    let mut builder = builder();
    builder
        .register_policy("customer", "read", own_row("id"))
        .unwrap()
        .with_audit_sink(sink.clone());
    let guard = builder.build().unwrap();

    guard
        .compile("customer", "read", &raw(json!({})), &customer(2).with_session("s-2"))
        .await
        .unwrap();
    guard
        .compile("customer", "read", &raw(json!({})), &Actor::anonymous())
        .await
        .unwrap_err();

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].kind, DecisionKind::Restrict);
    assert_eq!(events[0].session_id.as_deref(), Some("s-2"));
    assert_eq!(events[1].kind, DecisionKind::Deny);
}

#[tokio::test]
async fn test_declarations_end_to_end() {
    let decls = Declarations::from_toml(
        r#"
[[models]]
name = "ticket"
require_rls = ["read", "update"]
fields = [
    { name = "id", type = "id" },
    { name = "tenant", type = "text" },
    { name = "assignee", type = "id", nullable = true },
]

[[policies]]
model = "ticket"
action = "read"
name = "tenant"
effect = "restrict"
filter = { field = "tenant", op = "eq", value = "$claim.tenant" }

[[policies]]
model = "ticket"
action = "read"
name = "agents"
effect = "restrict"
roles = ["agent"]
filter = { or = [{ field = "assignee", op = "eq", value = "$subject.agent.id" }, { field = "assignee", op = "is" }] }
"#,
    )
    .unwrap();

    let mut builder = RowGuard::builder(RowGuardConfig::default());
    decls.apply(&mut builder).unwrap();
    let guard = builder.build().unwrap();

    let agent = Actor::authenticated()
        .with_subject(SubjectRef::new("agent", "staff", 11))
        .with_role("agent")
        .with_claim("tenant", json!("acme"));
    let compiled = guard
        .compile("ticket", "read", &RawQuery::default(), &agent)
        .await
        .unwrap();
    assert_eq!(
        compiled.filter,
        FilterNode::And(vec![
            FilterNode::leaf("tenant", Operator::Eq, "acme"),
            FilterNode::Or(vec![
                FilterNode::leaf("assignee", Operator::Eq, 11),
                FilterNode::is_null("assignee"),
            ]),
        ])
    );

    let customer_err = guard
        .compile("ticket", "read", &RawQuery::default(), &customer(1))
        .await
        .unwrap_err();
    assert_eq!(customer_err.error_code(), "policy_denied");

    let update_err = guard
        .compile("ticket", "update", &RawQuery::default(), &agent)
        .await
        .unwrap_err();
    assert_eq!(update_err.error_code(), "rls_not_implemented");
}
