//! Integration tests for RuleSet change events and consistency
//!
//! These tests verify that the RuleSet correctly:
//! - Emits change events on mutations
//! - Supports multiple subscribers
//! - Emits nothing for rejected or no-op operations
//! - Leaves state untouched when a rule is rejected

use mloxmaker::{ChangeKind, EntityRef, ModSource, RuleDraft, RuleError, RuleSet, StoreChange};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::sync::Mutex;
use tokio::time::{Duration, timeout};

#[tokio::test]
async fn test_change_events_emitted() {
    let mut rule_set = RuleSet::new();
    let mut rx = rule_set.subscribe();

    let id = rule_set.upsert_mod("Plugin.esp", None, ModSource::Local).unwrap();

    let event = timeout(Duration::from_millis(100), rx.recv())
        .await
        .expect("Timeout waiting for event")
        .expect("Channel closed");

    assert_eq!(
        event,
        StoreChange {
            entity: EntityRef::Mod(id),
            change: ChangeKind::Created
        }
    );
}

#[tokio::test]
async fn test_multiple_subscribers_receive_events() {
    let mut rule_set = RuleSet::new();
    let mut rx1 = rule_set.subscribe();
    let mut rx2 = rule_set.subscribe();

    rule_set.upsert_mod("A.esp", None, ModSource::Local).unwrap();
    rule_set.upsert_mod("B.esp", None, ModSource::Local).unwrap();
    let rule = rule_set.add_rule(RuleDraft::order("A.esp", "B.esp")).unwrap();

    for rx in [&mut rx1, &mut rx2] {
        let mut last = None;
        for _ in 0..3 {
            last = Some(
                timeout(Duration::from_millis(100), rx.recv())
                    .await
                    .expect("Timeout waiting for event")
                    .expect("Channel closed"),
            );
        }
        assert_eq!(
            last,
            Some(StoreChange {
                entity: EntityRef::Rule(rule),
                change: ChangeKind::Created
            })
        );
    }
}

#[tokio::test]
async fn test_rejected_rule_emits_no_event() {
    let mut rule_set = RuleSet::new();
    rule_set.upsert_mod("A.esp", None, ModSource::Local).unwrap();
    let mut rx = rule_set.subscribe();

    let err = rule_set.add_rule(RuleDraft::requires("A.esp", "Missing.esp")).unwrap_err();
    assert!(matches!(err, RuleError::MissingMod { .. }));

    let result = timeout(Duration::from_millis(50), rx.recv()).await;
    assert!(result.is_err(), "No event expected, got: {:?}", result);
}

#[tokio::test]
async fn test_hash_update_emits_updated() {
    let mut rule_set = RuleSet::new();
    let id = rule_set.upsert_mod("A.esp", None, ModSource::Local).unwrap();
    let mut rx = rule_set.subscribe();

    // Identical upsert is a no-op
    rule_set.upsert_mod("A.esp", None, ModSource::Local).unwrap();
    rule_set.upsert_mod("a.ESP", Some("beef"), ModSource::Local).unwrap();

    let event = timeout(Duration::from_millis(100), rx.recv())
        .await
        .expect("Timeout waiting for event")
        .expect("Channel closed");
    assert_eq!(
        event,
        StoreChange {
            entity: EntityRef::Mod(id),
            change: ChangeKind::Updated
        }
    );
    assert_eq!(rule_set.get_mod(id).unwrap().hash.as_deref(), Some("beef"));
}

#[tokio::test]
async fn test_listener_task_sees_removals() {
    let mut rule_set = RuleSet::new();
    let mut rx = rule_set.subscribe();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let seen_clone = seen.clone();
    let listener = tokio::spawn(async move {
        while let Ok(change) = rx.recv().await {
            let removed = change.change == ChangeKind::Removed;
            seen_clone.lock().await.push(change);
            if removed {
                break;
            }
        }
    });

    rule_set.upsert_mod("A.esp", None, ModSource::Local).unwrap();
    rule_set.upsert_mod("B.esp", None, ModSource::Local).unwrap();
    let rule = rule_set.add_rule(RuleDraft::requires("A.esp", "B.esp")).unwrap();
    rule_set.remove_rule(rule);

    timeout(Duration::from_millis(500), listener)
        .await
        .expect("Listener did not finish")
        .unwrap();

    let seen = seen.lock().await;
    assert_eq!(seen.len(), 4);
    assert_eq!(seen[3].entity, EntityRef::Rule(rule));
}

#[test]
fn test_rejected_rule_leaves_store_unchanged() {
    let mut rule_set = RuleSet::new();
    rule_set.upsert_mod("A.esp", None, ModSource::Local).unwrap();
    rule_set.upsert_mod("B.esp", None, ModSource::Local).unwrap();
    rule_set.add_rule(RuleDraft::requires("A.esp", "B.esp")).unwrap();
    let before = rule_set.clone();

    assert!(rule_set.add_rule(RuleDraft::requires("B.esp", "A.esp")).is_err());
    assert!(rule_set.add_rule(RuleDraft::conflict("B.esp", "A.esp")).is_err());
    assert!(rule_set.add_rule(RuleDraft::order("A.esp", "A.esp")).is_err());

    assert_eq!(rule_set, before);
    assert_eq!(rule_set.metrics().rules_rejected.load(Ordering::Relaxed), 3);
}

#[test]
fn test_mod_in_use_cannot_be_removed() {
    let mut rule_set = RuleSet::new();
    let a = rule_set.upsert_mod("A.esp", None, ModSource::Local).unwrap();
    rule_set.upsert_mod("B.esp", None, ModSource::Local).unwrap();
    let rule = rule_set.add_rule(RuleDraft::order("A.esp", "B.esp")).unwrap();

    let err = rule_set.remove_mod(a).unwrap_err();
    assert!(matches!(err, RuleError::ModInUse { ref rules, .. } if rules == &vec![rule]));

    rule_set.remove_rule(rule);
    assert!(rule_set.remove_mod(a).unwrap().is_some());
    assert!(rule_set.find_mod("A.esp").is_none());
}

#[test]
fn test_rules_affecting_preserves_insertion_order() {
    let mut rule_set = RuleSet::new();
    for name in ["A.esp", "B.esp", "C.esp"] {
        rule_set.upsert_mod(name, None, ModSource::Local).unwrap();
    }
    let first = rule_set.add_rule(RuleDraft::order("C.esp", "A.esp")).unwrap();
    rule_set.add_rule(RuleDraft::order("B.esp", "C.esp")).unwrap();
    let third = rule_set.add_rule(RuleDraft::conflict("A.esp", "B.esp")).unwrap();

    let a = rule_set.find_mod("a.esp").unwrap().id;
    let ids: Vec<_> = rule_set.rules_affecting(a).iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![first, third]);
}
