//! Reaction scenario tests
//!
//! Tests opportunity attacks, Shield, Counterspell and opportunity expiry

use crate::harness::{fighter, goblin, mage, wizard, TestTable};
use adjud::encounter::{ActionType, Position, ReactionType, TriggerKind};
use adjud::EngineError;

/// Fighter at the origin, goblin adjacent, goblin's turn
fn skirmish() -> TestTable {
    let mut table = TestTable::new(vec![
        fighter("f").at(Position::new(0, 0)),
        goblin("g").at(Position::new(5, 0)),
        goblin("g2").at(Position::new(0, 5)),
    ]);
    table.start(&[("f", 18), ("g", 12), ("g2", 6)]);
    table.advance();
    table
}

/// Test: leaving a hostile's reach offers an opportunity attack
#[test]
fn test_leaving_reach_offers_opportunity_attack() {
    let mut table = skirmish();
    let report = table
        .engine
        .move_participant(&table.id, "g", Position::new(30, 0))
        .unwrap();
    assert_eq!(report.movement.distance, 25);
    assert!(!report.movement.over_speed);
    assert_eq!(report.reactions.len(), 1);

    let opportunity = &report.reactions[0];
    assert_eq!(opportunity.reactor_id, "f");
    assert_eq!(opportunity.trigger, TriggerKind::LeftReach);
    assert_eq!(opportunity.eligible, vec![ReactionType::OpportunityAttack]);

    let resolved = table
        .engine
        .resolve_reaction(&table.id, &opportunity.id, ReactionType::OpportunityAttack)
        .unwrap();
    assert_eq!(resolved.action.action_type, ActionType::Reaction);
    assert_eq!(resolved.action.target_id.as_deref(), Some("g"));
    assert!(table.participant("f").flags.reaction_taken);
    assert!(table.reactions().is_empty());
}

/// Test: moving within reach provokes nothing
#[test]
fn test_moving_within_reach_is_free() {
    let mut table = skirmish();
    let report = table
        .engine
        .move_participant(&table.id, "g", Position::new(5, 5))
        .unwrap();
    assert!(report.reactions.is_empty());
}

/// Test: a spent reaction is not offered again
#[test]
fn test_one_reaction_until_next_turn() {
    let mut table = skirmish();
    let report = table
        .engine
        .move_participant(&table.id, "g", Position::new(30, 0))
        .unwrap();
    table
        .engine
        .resolve_reaction(&table.id, &report.reactions[0].id, ReactionType::OpportunityAttack)
        .unwrap();

    let later = table
        .engine
        .move_participant(&table.id, "g2", Position::new(0, 30))
        .unwrap();
    assert!(later.reactions.is_empty());
}

/// Test: open opportunities lapse when the turn ends
#[test]
fn test_opportunities_expire_at_end_of_turn() {
    let mut table = skirmish();
    table
        .engine
        .move_participant(&table.id, "g", Position::new(30, 0))
        .unwrap();
    assert_eq!(table.reactions().len(), 1);

    let turn = table.advance();
    assert_eq!(turn.expired_reactions.len(), 1);
    assert!(table.reactions().is_empty());
    assert!(!table.participant("f").flags.reaction_taken);
}

/// Test: dismissing leaves the reactor's reaction unspent
#[test]
fn test_dismiss_has_no_side_effects() {
    let mut table = skirmish();
    let report = table
        .engine
        .move_participant(&table.id, "g", Position::new(30, 0))
        .unwrap();
    let log_len = table.encounter().log.len();

    let dismissed = table
        .engine
        .dismiss_reaction(&table.id, &report.reactions[0].id)
        .unwrap();
    assert_eq!(dismissed.reactor_id, "f");
    assert!(!table.participant("f").flags.reaction_taken);
    assert_eq!(table.encounter().log.len(), log_len);

    let err = table
        .engine
        .dismiss_reaction(&table.id, &dismissed.id)
        .unwrap_err();
    assert!(matches!(err, EngineError::OpportunityNotFound(_)));
}

/// Test: only the offered reaction may be taken
#[test]
fn test_ineligible_reaction_rejected() {
    let mut table = skirmish();
    let report = table
        .engine
        .move_participant(&table.id, "g", Position::new(30, 0))
        .unwrap();
    let err = table
        .engine
        .resolve_reaction(&table.id, &report.reactions[0].id, ReactionType::Shield)
        .unwrap_err();
    assert!(matches!(err, EngineError::ReactionNotEligible { .. }));
    assert_eq!(table.reactions().len(), 1);
}

/// Test: a hit on a Shield caster offers Shield
#[test]
fn test_hit_offers_shield() {
    let mut table = TestTable::new(vec![goblin("g"), wizard("w")]);
    table.start(&[("g", 15), ("w", 10)]);

    let (_, report) = table.attack("g", "w", "Scimitar", 15, None);
    assert!(report.attack.unwrap().hit);
    assert_eq!(report.reactions.len(), 1);
    assert_eq!(report.reactions[0].reactor_id, "w");
    assert_eq!(report.reactions[0].eligible, vec![ReactionType::Shield]);

    table
        .engine
        .resolve_reaction(&table.id, &report.reactions[0].id, ReactionType::Shield)
        .unwrap();
    assert!(table.participant("w").flags.reaction_taken);
}

/// Test: casting near a hostile counterspeller offers Counterspell
#[test]
fn test_spell_offers_counterspell() {
    let mut table = TestTable::new(vec![wizard("w"), mage("m")]);
    table.start(&[("w", 15), ("m", 10)]);

    let cast = table
        .engine
        .cast_spell(&table.id, "w", "Fireball", 3, Some("m"))
        .unwrap();
    assert!(!cast.action.has_failure());
    assert_eq!(cast.reactions.len(), 1);
    assert_eq!(cast.reactions[0].reactor_id, "m");
    assert_eq!(cast.reactions[0].trigger, TriggerKind::SpellCast);
    assert_eq!(table.participant("w").resources.spell_slots[&3].current, 0);
}

/// Test: a spell without a slot fails softly and provokes nothing
#[test]
fn test_spell_without_slot_fails_softly() {
    let mut table = TestTable::new(vec![wizard("w"), mage("m")]);
    table.start(&[("w", 15), ("m", 10)]);

    let first = table
        .engine
        .cast_spell(&table.id, "w", "Fireball", 3, None)
        .unwrap();
    table
        .engine
        .dismiss_reaction(&table.id, &first.reactions[0].id)
        .unwrap();

    let second = table
        .engine
        .cast_spell(&table.id, "w", "Lightning Bolt", 3, None)
        .unwrap();
    assert!(second.action.has_failure());
    assert!(second.action.description.contains("[failed:"));
    assert!(second.reactions.is_empty());
    assert_eq!(table.encounter().log.last().unwrap().id, second.action.id);
}
