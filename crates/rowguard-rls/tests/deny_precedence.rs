//! Property tests for rule composition

use std::sync::Arc;

use proptest::prelude::*;

use rowguard_common::config::RowGuardConfig;
use rowguard_common::{Action, Actor};
use rowguard_query::{FieldDef, FieldType, FilterNode, Operator, SchemaRegistry};
use rowguard_rls::{rule_fn, PolicyEngine, PolicyOutcome, PolicyRegistry, SharedRule};

#[derive(Clone, Debug)]
enum Kind {
    Allow,
    Deny,
    Restrict(i64),
}

fn arb_kind() -> impl Strategy<Value = Kind> {
    prop_oneof![
        Just(Kind::Allow),
        Just(Kind::Deny),
        (0i64..5).prop_map(Kind::Restrict),
    ]
}

fn to_rule(idx: usize, kind: Kind) -> SharedRule {
    rule_fn(&format!("rule_{idx}"), move |_| match kind {
        Kind::Allow => PolicyOutcome::Allow,
        Kind::Deny => PolicyOutcome::Deny,
        Kind::Restrict(v) => PolicyOutcome::Restrict(FilterNode::leaf("n", Operator::Eq, v)),
    })
}

fn evaluate(kinds: Vec<Kind>, max_concurrent_rules: usize) -> PolicyOutcome {
    let mut config = RowGuardConfig::default();
    config.policy.max_concurrent_rules = max_concurrent_rules;

    let mut schema = SchemaRegistry::new();
    schema
        .register("item", vec![FieldDef::new("n", FieldType::Integer)], vec![], None)
        .unwrap();
    schema.seal().unwrap();

    let mut registry = PolicyRegistry::new(&config.policy);
    let rules = kinds.into_iter().enumerate().map(|(i, k)| to_rule(i, k)).collect();
    registry.compose("item", "read", rules).unwrap();
    registry.seal();

    let engine = PolicyEngine::new(Arc::new(registry), Arc::new(schema), &config);
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
        .block_on(engine.evaluate("item", &Action::Read, &Actor::authenticated()))
        .unwrap()
}

proptest! {
    #[test]
    fn any_deny_wins(
        mut kinds in prop::collection::vec(arb_kind(), 0..8),
        at in any::<prop::sample::Index>(),
        concurrency in 1usize..4,
    ) {
        let pos = at.index(kinds.len() + 1);
        kinds.insert(pos, Kind::Deny);
        prop_assert_eq!(evaluate(kinds, concurrency), PolicyOutcome::Deny);
    }

    #[test]
    fn restrictions_compose_in_registration_order(
        kinds in prop::collection::vec(
            prop_oneof![Just(Kind::Allow), (0i64..5).prop_map(Kind::Restrict)],
            1..8,
        ),
        concurrency in 1usize..4,
    ) {
        let expected: Vec<FilterNode> = kinds
            .iter()
            .filter_map(|k| match k {
                Kind::Restrict(v) => Some(FilterNode::leaf("n", Operator::Eq, *v)),
                _ => None,
            })
            .collect();

        let outcome = evaluate(kinds, concurrency);
        match expected.len() {
            0 => prop_assert_eq!(outcome, PolicyOutcome::Allow),
            1 => prop_assert_eq!(outcome, PolicyOutcome::Restrict(expected[0].clone())),
            _ => prop_assert_eq!(outcome, PolicyOutcome::Restrict(FilterNode::And(expected))),
        }
    }
}
