//! Property tests for parameter merge and structural keys.

use cadence_core::params::{merge_into, merged, ParamsKey};
use proptest::prelude::*;
use serde_json::Value;

fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[a-z]{0,4}".prop_map(Value::from),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-c]", inner, 0..4)
                .prop_map(|map| Value::Object(map.into_iter().collect())),
        ]
    })
}

proptest! {
    #[test]
    fn merge_with_self_is_identity(value in arb_json()) {
        prop_assert_eq!(merged(&value, &value), value);
    }

    #[test]
    fn merge_reports_change_exactly(base in arb_json(), overlay in arb_json()) {
        let mut target = base.clone();
        let changed = merge_into(&mut target, &overlay);
        prop_assert_eq!(changed, target != base);
    }

    #[test]
    fn merge_is_idempotent(base in arb_json(), overlay in arb_json()) {
        let once = merged(&base, &overlay);
        let mut twice = once.clone();
        prop_assert!(!merge_into(&mut twice, &overlay));
        prop_assert_eq!(twice, once);
    }

    #[test]
    fn key_equality_matches_value_equality(a in arb_json(), b in arb_json()) {
        prop_assert_eq!(ParamsKey::of(&a) == ParamsKey::of(&b), a == b);
    }
}
