// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Property tests for the registry, scheduler and health invariants.

use proptest::prelude::*;
use vigil_core::builtin;
use vigil_core::prelude::*;

fn engine() -> Engine {
    Engine::with_config(EngineConfig {
        workers: 1,
        internal_diagnostics: false,
        ..Default::default()
    })
}

fn severity_strategy() -> impl Strategy<Value = Severity> {
    prop_oneof![
        Just(Severity::Catastrophic),
        Just(Severity::Critical),
        Just(Severity::High),
        Just(Severity::Medium),
        Just(Severity::Low),
        Just(Severity::None),
        Just(Severity::Positive),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Health stays in [0, 1000] under any pass/fail sequence over
    /// rules of any severity mix.
    #[test]
    fn health_is_always_clamped(
        severities in proptest::collection::vec(severity_strategy(), 1..4),
        flips in proptest::collection::vec((0usize..4, any::<bool>()), 0..24),
    ) {
        let engine = engine();
        engine.comp_create("c").unwrap();

        for (i, severity) in severities.iter().enumerate() {
            let test = format!("t{}", i);
            let rule = format!("r{}", i);
            engine.test_create_notification(&test).unwrap();
            engine.rule_create(&rule, &test, builtin::ACTION_NOOP).unwrap();
            engine.rule_set_severity(&rule, *severity).unwrap();
            engine.comp_contains_many("c", &[test.as_str(), rule.as_str()]).unwrap();
            engine.test_chain_ready(&test).unwrap();
        }

        for (idx, fail) in flips {
            let test = format!("t{}", idx % severities.len());
            let result = if fail { DiagResult::Fail } else { DiagResult::Pass };
            engine.notify(&test, None, result).unwrap();

            let health = engine.comp_health_get("c").unwrap();
            prop_assert!((0..=1000).contains(&health), "health {} out of range", health);
        }

        engine.shutdown();
    }

    /// A live name always resolves to an object of the declared kind,
    /// across arbitrary create/delete interleavings.
    #[test]
    fn lookup_returns_declared_kind(
        ops in proptest::collection::vec((0usize..6, 0u8..3), 1..32),
    ) {
        let engine = engine();

        for (slot, op) in ops {
            let name = format!("obj-{}", slot);
            match op {
                0 => {
                    engine.test_create_notification(&name).unwrap();
                }
                1 => {
                    engine.action_create(
                        &name,
                        action_fn(|_, _| DiagResult::Pass),
                        None,
                    ).unwrap();
                }
                _ => {
                    let _ = engine.test_delete(&name);
                }
            }

            if let Some(snap) = engine.object_snapshot(ObjKind::Test, &name) {
                prop_assert_eq!(snap.kind, ObjKind::Test);
            }
            if let Some(snap) = engine.object_snapshot(ObjKind::Action, &name) {
                prop_assert_eq!(snap.kind, ObjKind::Action);
            }
        }

        engine.shutdown();
    }

    /// A polled test sits in at most one scheduler queue no matter how
    /// creation, re-creation, enable and disable interleave.
    #[test]
    fn polled_test_in_at_most_one_queue(
        ops in proptest::collection::vec((0usize..3, 0u8..4), 1..24),
    ) {
        let engine = engine();

        for (slot, op) in ops {
            let name = format!("poll-{}", slot);
            match op {
                0 => {
                    engine.test_create_polled(
                        &name,
                        probe_fn(|_, _| DiagResult::Pass),
                        None,
                        60_000 * (slot as u64 + 1),
                    ).unwrap();
                    engine.test_chain_ready(&name).unwrap();
                }
                1 => {
                    let _ = engine.test_enable(&name, None);
                }
                2 => {
                    let _ = engine.test_disable(&name, None);
                }
                _ => {
                    let _ = engine.test_delete(&name);
                }
            }

            let entries = engine.sched_entries();
            for slot_idx in 0..3 {
                let target = format!("poll-{}", slot_idx);
                let count = entries
                    .iter()
                    .filter(|(test, inst)| *test == target && inst.is_none())
                    .count();
                prop_assert!(count <= 1, "{} queued {} times", target, count);
            }
        }

        engine.shutdown();
    }

    /// set_flags(get_flags(x)) is the identity.
    #[test]
    fn flag_roundtrip_is_identity(bits in 0u32..0x100) {
        let engine = engine();
        engine.test_create_notification("t").unwrap();

        engine.test_set_flags("t", ObjFlags(bits)).unwrap();
        let flags = engine.test_get_flags("t").unwrap();
        engine.test_set_flags("t", flags).unwrap();
        prop_assert_eq!(engine.test_get_flags("t").unwrap(), flags);

        engine.shutdown();
    }
}

#[test]
fn enable_disable_preserves_flags_and_stats() {
    let engine = engine();
    engine.test_create_notification("t").unwrap();
    engine.test_chain_ready("t").unwrap();
    engine.notify("t", None, DiagResult::Fail).unwrap();

    let before = engine.object_snapshot(ObjKind::Test, "t").unwrap();

    engine.test_enable("t", None).unwrap();
    engine.test_disable("t", None).unwrap();
    engine.test_enable("t", None).unwrap();

    let after = engine.object_snapshot(ObjKind::Test, "t").unwrap();
    assert_eq!(after.flags, before.flags);
    assert_eq!(after.instances[0].stats.runs, before.instances[0].stats.runs);
    assert_eq!(
        after.instances[0].stats.failures,
        before.instances[0].stats.failures
    );

    engine.shutdown();
}

#[test]
fn chain_ready_is_idempotent() {
    let engine = engine();
    engine.test_create_notification("t").unwrap();
    engine
        .rule_create("r", "t", builtin::ACTION_NOOP)
        .unwrap();

    engine.test_chain_ready("t").unwrap();
    let first = serde_json::to_value(engine.object_snapshot(ObjKind::Rule, "r").unwrap()).unwrap();

    engine.test_chain_ready("t").unwrap();
    let second = serde_json::to_value(engine.object_snapshot(ObjKind::Rule, "r").unwrap()).unwrap();

    assert_eq!(first, second);
    engine.shutdown();
}

#[test]
fn names_truncate_at_limit() {
    let engine = engine();
    let long = "x".repeat(40);
    engine.test_create_notification(&long).unwrap();

    let truncated: String = long.chars().take(31).collect();
    assert!(engine.object_snapshot(ObjKind::Test, &truncated).is_some());

    // A different long name clipping to the same prefix is rejected.
    let mut other = "x".repeat(39);
    other.push('y');
    assert!(engine.test_create_notification(&other).is_err());

    engine.shutdown();
}

#[test]
fn dependency_cycles_leave_first_edge_only() {
    let engine = engine();
    engine.test_create_notification("ta").unwrap();
    engine.test_create_notification("tb").unwrap();
    engine
        .rule_create("a", "ta", builtin::ACTION_NOOP)
        .unwrap();
    engine
        .rule_create("b", "tb", builtin::ACTION_NOOP)
        .unwrap();

    engine.depend_create("a", "b").unwrap();
    assert!(engine.depend_create("b", "a").is_err());

    // depend_delete is accepted but unsupported.
    assert!(engine.depend_delete("a", "b").is_ok());

    engine.shutdown();
}
