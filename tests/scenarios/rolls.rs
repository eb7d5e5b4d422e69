//! Roll scenario tests
//!
//! Tests attack/damage chaining, the request queue and its cleanup timer

use crate::harness::{fighter, goblin, rogue, TestTable};
use adjud::dice::DiceRoll;
use adjud::rolls::{AttackRoll, PendingRoll, RollKind, RollRequestSpec, RollStateTracker};
use adjud::{EngineConfig, EngineError};
use chrono::Duration;
use proptest::prelude::*;

fn started() -> TestTable {
    let mut table = TestTable::new(vec![fighter("f"), goblin("g"), rogue("r")]);
    table.start(&[("f", 18), ("g", 12), ("r", 9)]);
    table
}

/// Test: 16 against AC 13 hits; damage clears the wait
#[test]
fn test_hit_then_damage() {
    let mut table = started();
    let (attack_id, report) = table.attack("f", "g", "Longsword", 16, None);

    let attack = report.attack.expect("attack outcome");
    assert!(attack.hit);
    assert!(!attack.critical);
    assert!(attack.needs_damage_roll);
    assert!(table.engine.is_awaiting_damage(&table.id).unwrap());
    assert!(!table.engine.is_awaiting_critical_damage(&table.id).unwrap());

    let damage = table
        .engine
        .record_damage(&table.id, Some(&attack_id), None, None, 7, None, None)
        .unwrap();
    assert!(!damage.record.without_attack);
    assert!(!table.engine.is_awaiting_damage(&table.id).unwrap());

    let action = damage.action.expect("damage logged as an action");
    assert_eq!(action.target_id.as_deref(), Some("g"));
    assert!(action.attack_roll.is_some());
    assert_eq!(table.participant("g").current_hp, 0);
}

/// Test: a natural 20 doubles the damage dice
#[test]
fn test_critical_hit_suggests_doubled_dice() {
    let mut table = started();
    let (attack_id, report) = table.attack("r", "g", "rapier", 25, Some(20));
    assert!(report.attack.unwrap().critical);
    assert!(table.engine.is_awaiting_critical_damage(&table.id).unwrap());

    let suggestion = table
        .engine
        .damage_suggestion(&table.id, &attack_id)
        .unwrap();
    assert_eq!(suggestion, Some(DiceRoll::new(2, 8, 3)));

    let damage = table
        .engine
        .record_damage(&table.id, Some(&attack_id), None, None, 12, None, None)
        .unwrap();
    assert!(damage.record.result.critical);
    assert_eq!(damage.record.result.formula, "2d8+3");
}

/// Test: a miss goes straight into the log and waits for nothing
#[test]
fn test_miss_needs_no_damage() {
    let mut table = started();
    let (_, report) = table.attack("g", "f", "Scimitar", 10, None);
    assert!(!report.attack.unwrap().hit);
    assert!(!table.engine.is_awaiting_damage(&table.id).unwrap());

    let encounter = table.encounter();
    assert!(encounter.log.last().unwrap().description.contains("misses"));
}

/// Test: asking for an attack with a weapon the attacker lacks fails
#[test]
fn test_unknown_weapon_rejected() {
    let mut table = started();
    let err = table
        .engine
        .request_attack(&table.id, "f", "g", "Greataxe")
        .unwrap_err();
    assert!(matches!(err, EngineError::WeaponNotFound { .. }));
}

/// Test: identical requests while the first is pending collapse into one
#[test]
fn test_duplicate_requests_collapse() {
    let mut table = started();
    let spec = RollRequestSpec::new(RollKind::Save, "Dexterity save", "1d20+1")
        .for_actor("r")
        .with_dc(13);

    let first = table
        .engine
        .request_rolls(&table.id, vec![spec.clone()])
        .unwrap();
    let second = table.engine.request_rolls(&table.id, vec![spec]).unwrap();
    assert_eq!(first.ids, second.ids);
    assert_eq!(table.engine.pending_rolls(&table.id).unwrap().len(), 1);
}

/// Test: the batch completes only once every member resolves
#[test]
fn test_batch_completion() {
    let mut table = started();
    let specs = ["f", "g", "r"]
        .iter()
        .map(|actor| {
            RollRequestSpec::new(RollKind::Save, "Fireball save", "1d20")
                .for_actor(actor)
                .with_dc(15)
        })
        .collect();
    let batch = table.engine.request_rolls(&table.id, specs).unwrap();
    assert_eq!(batch.ids.len(), 3);
    assert!(batch.batch_id.is_some());
    assert_eq!(batch.current.as_ref().map(|r| r.id.clone()), Some(batch.ids[0].clone()));
    assert_eq!(batch.prompt.as_deref(), Some("Please roll Fireball save (DC 15)."));

    for (i, id) in batch.ids.iter().enumerate() {
        assert!(!table.engine.is_batch_complete(&table.id).unwrap());
        let report = table
            .engine
            .report_roll(&table.id, id, 10 + i as i32 * 4, None)
            .unwrap();
        assert_eq!(report.batch_complete, i == 2);
    }

    let results = table.engine.batch_results(&table.id).unwrap();
    let successes: Vec<Option<bool>> = results.iter().map(|r| r.success).collect();
    assert_eq!(successes, vec![Some(false), Some(false), Some(true)]);
    assert!(table.engine.current_roll(&table.id).unwrap().is_none());
}

/// Test: a cancelled roll is gone without side effects
#[test]
fn test_cancelled_roll_cannot_be_reported() {
    let mut table = started();
    let batch = table
        .engine
        .request_attack(&table.id, "f", "g", "Longsword")
        .unwrap();
    let id = batch.ids[0].clone();

    table.engine.cancel_roll(&table.id, &id).unwrap();
    let err = table.engine.report_roll(&table.id, &id, 18, None).unwrap_err();
    assert!(matches!(err, EngineError::RollNotPending(_)));
    assert!(!table.engine.is_awaiting_damage(&table.id).unwrap());
    assert_eq!(table.participant("g").current_hp, 7);
}

/// Test: a fully resolved queue is cleared once its delay elapses
#[test]
fn test_resolved_queue_cleared_after_delay() {
    let mut table = TestTable::with_config(
        EngineConfig {
            rng_seed: Some(5),
            roll_cleanup_delay_ms: 1000,
            ..Default::default()
        },
        vec![fighter("f"), goblin("g")],
    );
    table.start(&[("f", 18), ("g", 12)]);

    let batch = table
        .engine
        .request_rolls(
            &table.id,
            vec![RollRequestSpec::new(RollKind::SkillCheck, "Athletics check", "1d20+5")
                .for_actor("f")
                .with_dc(12)],
        )
        .unwrap();
    assert!(table.engine.roll_cleanup_deadline(&table.id).unwrap().is_none());
    table
        .engine
        .report_roll(&table.id, &batch.ids[0], 17, None)
        .unwrap();

    let deadline = table
        .engine
        .roll_cleanup_deadline(&table.id)
        .unwrap()
        .expect("cleanup scheduled");
    assert!(table.engine.poll_timers(deadline - Duration::milliseconds(1)).is_empty());
    assert_eq!(table.engine.poll_timers(deadline), vec![table.id.clone()]);
    assert!(table.engine.roll_cleanup_deadline(&table.id).unwrap().is_none());
}

/// Test: new requests cancel a scheduled cleanup
#[test]
fn test_new_request_cancels_cleanup() {
    let mut table = started();
    let first = table
        .engine
        .request_rolls(
            &table.id,
            vec![RollRequestSpec::new(RollKind::SkillCheck, "Perception check", "1d20").for_actor("r")],
        )
        .unwrap();
    table
        .engine
        .report_roll(&table.id, &first.ids[0], 12, None)
        .unwrap();
    assert!(table.engine.roll_cleanup_deadline(&table.id).unwrap().is_some());

    table
        .engine
        .request_rolls(
            &table.id,
            vec![RollRequestSpec::new(RollKind::SkillCheck, "Stealth check", "1d20+3").for_actor("r")],
        )
        .unwrap();
    assert!(table.engine.roll_cleanup_deadline(&table.id).unwrap().is_none());
}

/// Test: initiative reported before the start fixes the order
#[test]
fn test_reported_initiative_orders_the_fight() {
    let mut table = TestTable::new(vec![fighter("f"), goblin("g")]);
    let batch = table
        .engine
        .request_rolls(
            &table.id,
            vec![RollRequestSpec::new(RollKind::Initiative, "Roll initiative", "1d20+1").for_actor("f")],
        )
        .unwrap();
    assert_eq!(batch.ids.len(), 1);
    assert_eq!(batch.current.unwrap().kind, RollKind::Initiative);
    table
        .engine
        .report_roll(&table.id, &batch.ids[0], 3, None)
        .unwrap();

    table.start(&[("g", 10)]);
    let order = table.turn_order();
    assert_eq!(order[0].actor_id, "g");
    assert_eq!(order[1].initiative, 3);
}

/// Test: an unparseable formula is refused before anything is queued
#[test]
fn test_bad_formula_queues_nothing() {
    let mut table = started();
    let err = table
        .engine
        .request_rolls(
            &table.id,
            vec![
                RollRequestSpec::new(RollKind::SkillCheck, "Arcana check", "1d20+2"),
                RollRequestSpec::new(RollKind::Damage, "Fire damage", "eight d six"),
            ],
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidFormula(_)));
    assert!(table.engine.pending_rolls(&table.id).unwrap().is_empty());
}

proptest! {
    #[test]
    fn test_natural_twenty_always_crits(ac in 1i32..40, modifier in -5i32..15) {
        let mut tracker = RollStateTracker::new();
        let id = tracker.add_pending_roll(PendingRoll::new(RollKind::Attack, "f", "Attack"));
        let outcome = tracker
            .record_attack_roll(&id, AttackRoll::new(20, modifier), ac)
            .unwrap();
        prop_assert!(outcome.critical);
        prop_assert!(outcome.hit);
        prop_assert!(tracker.is_awaiting_critical_damage());
    }

    #[test]
    fn test_damage_after_attack_clears_wait(natural in 1u32..=20, modifier in -2i32..10, ac in 5i32..25) {
        let mut tracker = RollStateTracker::new();
        let id = tracker.add_pending_roll(PendingRoll::new(RollKind::Attack, "f", "Attack"));
        let outcome = tracker
            .record_attack_roll(&id, AttackRoll::new(natural, modifier), ac)
            .unwrap();
        let record = tracker.record_damage_roll(&id, 5, "1d8+3");
        prop_assert_eq!(record.without_attack, !outcome.hit);
        prop_assert!(!tracker.is_awaiting_damage());
    }
}
