//! Audit scenario tests
//!
//! Tests narrator text rules, structured roll sequencing and compliance reports

use crate::harness::{fighter, goblin, TestTable};
use adjud::audit::{Severity, ViolationKind};
use adjud::rolls::{RollKind, RollRequestSpec};
use adjud::{Command, Outcome};

fn started() -> TestTable {
    let mut table = TestTable::new(vec![fighter("f"), goblin("g")]);
    table.start(&[("f", 18), ("g", 12)]);
    table
}

/// Test: damage narrated with no attack roll on record
#[test]
fn test_damage_without_attack_roll_is_critical() {
    let mut table = started();
    let result = table
        .engine
        .validate_narration(&table.id, "Roll 1d8 damage", Some("f"))
        .unwrap();

    assert!(!result.is_valid);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].kind, ViolationKind::MissingAttackRoll);
    assert_eq!(result.errors[0].severity, Severity::Critical);
    assert_eq!(result.errors[0].actor.as_deref(), Some("f"));
}

/// Test: an attack roll asked for without an AC
#[test]
fn test_attack_roll_without_ac_is_high() {
    let mut table = started();
    let result = table
        .engine
        .validate_narration(&table.id, "Make an attack roll", None)
        .unwrap();

    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].kind, ViolationKind::MissingAc);
    assert_eq!(result.errors[0].severity, Severity::High);
    // The current actor is assumed
    assert_eq!(result.errors[0].actor.as_deref(), Some("f"));
}

/// Test: damage called for after a recorded hit is in sequence
#[test]
fn test_damage_after_hit_is_clean() {
    let mut table = started();
    table.attack("f", "g", "Longsword", 18, None);

    let result = table
        .engine
        .validate_narration(&table.id, "That hits! Roll 1d8+3 slashing damage.", Some("f"))
        .unwrap();
    assert!(result.is_valid);
    assert!(result.warnings.is_empty());
}

/// Test: declaring combat before anyone rolled initiative
#[test]
fn test_combat_start_without_initiative() {
    let mut table = TestTable::new(vec![fighter("f"), goblin("g")]);
    let result = table
        .engine
        .validate_narration(&table.id, "Combat begins! The goblin lunges.", None)
        .unwrap();
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].kind, ViolationKind::MissingInitiative);

    let fine = table
        .engine
        .validate_narration(&table.id, "Combat begins, roll initiative!", None)
        .unwrap();
    assert!(fine.is_valid);
}

/// Test: asking for an attack before anyone rolled initiative
#[test]
fn test_attack_before_initiative_is_critical() {
    let mut table = TestTable::new(vec![fighter("f"), goblin("g")]);
    let result = table
        .engine
        .validate_narration(&table.id, "Make an attack roll against AC 13.", Some("f"))
        .unwrap();
    assert!(!result.is_valid);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].kind, ViolationKind::MissingInitiative);
    assert_eq!(result.errors[0].severity, Severity::Critical);
}

/// Test: asking for attacks while initiative is still coming in
#[test]
fn test_attack_during_initiative_is_wrong_sequence() {
    let mut table = TestTable::new(vec![fighter("f"), goblin("g")]);
    let batch = table
        .engine
        .request_rolls(
            &table.id,
            vec![RollRequestSpec::new(RollKind::Initiative, "Initiative", "1d20+1").for_actor("f")],
        )
        .unwrap();
    table
        .engine
        .report_roll(&table.id, &batch.ids[0], 14, None)
        .unwrap();

    let result = table
        .engine
        .validate_narration(&table.id, "Make an attack roll against AC 13.", Some("f"))
        .unwrap();
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].kind, ViolationKind::WrongSequence);
    assert_eq!(result.errors[0].severity, Severity::Critical);
}

/// Test: a hit left without damage is flagged when the turn moves on
#[test]
fn test_hit_without_damage_flagged_at_turn_change() {
    let mut table = started();
    table.attack("f", "g", "Longsword", 18, None);
    assert!(table.engine.violations(&table.id).is_empty());

    table.advance();
    let violations = table.engine.violations(&table.id);
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].kind, ViolationKind::MissingDamageRoll);
    assert_eq!(violations[0].severity, Severity::Medium);
}

/// Test: structured attack requests need an AC and valid dice
#[test]
fn test_attack_request_without_ac_flagged() {
    let mut table = started();
    table
        .engine
        .request_rolls(
            &table.id,
            vec![RollRequestSpec::new(RollKind::Attack, "Longsword attack", "1d20+5").for_actor("f")],
        )
        .unwrap();

    let violations = table.engine.violations(&table.id);
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].kind, ViolationKind::MissingAc);
    assert!(violations[0].auto_fixable);
}

/// Test: the player's own words queue the roll for the current actor
#[test]
fn test_player_attack_message_queues_attack() {
    let mut table = started();
    let batch = table
        .engine
        .player_message(&table.id, "I attack the goblin with my sword")
        .unwrap();
    let request = batch.current.expect("attack queued");
    assert_eq!(request.kind, RollKind::Attack);
    assert_eq!(request.actor_id.as_deref(), Some("f"));
    assert!(request.ac.is_some());
    assert!(table.engine.violations(&table.id).is_empty());
}

/// Test: the report scores what went wrong
#[test]
fn test_compliance_report() {
    let mut table = started();
    table
        .engine
        .validate_narration(&table.id, "Roll 1d8 damage", Some("f"))
        .unwrap();
    table
        .engine
        .validate_narration(&table.id, "Make an attack roll", Some("f"))
        .unwrap();

    let report = table.engine.end_encounter(&table.id).unwrap();
    // Critical 25 + high 15 + the medium missing-modifier warning 10
    assert_eq!(report.score, 50);
    assert_eq!(report.total_violations, 3);
    assert_eq!(report.by_severity[&Severity::Critical], 1);
    assert_eq!(report.by_kind[&ViolationKind::MissingAc], 1);
    assert!(report.initiative_respected);
    assert!(!report.attack_sequencing_respected);
    assert!(!report.formulas_well_formed);
    assert_eq!(report.recommendations.len(), 3);

    assert_eq!(table.engine.report(&table.id), Some(&report));
    assert_eq!(table.engine.end_encounter(&table.id).unwrap(), report);
}

/// Test: an unresolved hit at the end of combat costs points
#[test]
fn test_unfinished_hit_counted_at_end() {
    let mut table = started();
    table.attack("f", "g", "Longsword", 18, None);
    let report = table.engine.end_encounter(&table.id).unwrap();
    assert_eq!(report.by_kind[&ViolationKind::MissingDamageRoll], 1);
    assert_eq!(report.score, 90);
    assert_eq!(report.rolls.attack_requests, 1);
    assert_eq!(report.rolls.attack_results, 1);
}

/// Test: a reported total is read against the narrator's last request
#[test]
fn test_describe_roll_from_history() {
    let mut table = started();
    let command: Command = serde_json::from_value(serde_json::json!({
        "type": "describe_roll",
        "history": [
            {"role": "assistant", "content": "The wall is slick. Make an Athletics check (DC 14)."},
            {"role": "user", "content": "ok rolling"}
        ],
        "text": "I rolled 16"
    }))
    .unwrap();

    match table.engine.dispatch(command).unwrap() {
        Outcome::RollDescribed {
            total,
            inferred,
            text,
        } => {
            assert_eq!(total, Some(16));
            let inferred = inferred.expect("roll inferred");
            assert_eq!(inferred.kind, RollKind::SkillCheck);
            assert_eq!(inferred.dc, Some(14));
            assert!(text.contains("success"));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}
