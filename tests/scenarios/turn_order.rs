//! Turn order scenario tests
//!
//! Tests initiative sorting, turn advancement, rounds and the action economy

use crate::harness::{fighter, goblin, rogue, wizard, TestTable};
use adjud::encounter::{
    ActionRequest, ActionType, Condition, Participant, ParticipantKind, TurnAdvance,
};
use proptest::prelude::*;

/// Test: initiatives 18 and 12 give [18, 12]; two advances bring round 2
#[test]
fn test_two_participants_cycle_into_round_two() {
    let mut table = TestTable::new(vec![goblin("g"), fighter("f")]);
    table.start(&[("f", 18), ("g", 12)]);

    let order: Vec<String> = table.turn_order().into_iter().map(|e| e.actor_id).collect();
    assert_eq!(order, vec!["f", "g"]);
    assert_eq!(table.current_actor().as_deref(), Some("f"));

    let first = table.advance();
    assert_eq!(first.round, 1);
    assert_eq!(table.current_actor().as_deref(), Some("g"));

    let second = table.advance();
    assert_eq!(second.round, 2);
    assert!(matches!(
        second.advance,
        TurnAdvance::Advanced { new_round: true, .. }
    ));
    assert_eq!(table.current_actor().as_deref(), Some("f"));
}

/// Test: ties fall to the higher secondary modifier
#[test]
fn test_initiative_ties_use_dexterity() {
    // Rogue DEX 16 (+3) beats fighter DEX 12 (+1) on a tie
    let mut table = TestTable::new(vec![fighter("f"), rogue("r")]);
    table.start(&[("f", 15), ("r", 15)]);
    let order: Vec<String> = table.turn_order().into_iter().map(|e| e.actor_id).collect();
    assert_eq!(order, vec!["r", "f"]);
}

/// Test: the action economy resets when a participant's turn begins
#[test]
fn test_action_economy_resets_each_turn() {
    let mut table = TestTable::new(vec![fighter("f"), goblin("g")]);
    table.start(&[("f", 18), ("g", 12)]);
    assert!(table.participant("f").flags.is_fresh());

    table
        .engine
        .submit_action(
            &table.id,
            ActionRequest::new("f", ActionType::BonusAction, "Fighter uses Second Wind"),
        )
        .unwrap();
    let flags = table.participant("f").flags;
    assert!(flags.bonus_action_taken);
    assert!(!flags.action_taken);

    table.advance();
    table.advance();
    assert!(table.participant("f").flags.is_fresh());
}

/// Test: the dead lose their turns; the unconscious keep theirs
#[test]
fn test_dead_participants_are_skipped() {
    let mut table = TestTable::new(vec![fighter("f"), goblin("g"), wizard("w")]);
    table.start(&[("f", 20), ("g", 15), ("w", 10)]);

    // 14 damage on 7 max HP leaves 7 overflow: dead outright
    let outcome = table
        .engine
        .deal_damage(&table.id, "g", 14, None, false)
        .unwrap()
        .unwrap();
    assert!(outcome.died);

    let report = table.advance();
    assert!(matches!(
        report.advance,
        TurnAdvance::Advanced { ref actor_id, .. } if actor_id == "w"
    ));
    assert!(report.death_save_request.is_none());
}

/// Test: an unconscious participant's turn asks for a death save
#[test]
fn test_unconscious_turn_requests_death_save() {
    let mut table = TestTable::new(vec![fighter("f"), wizard("w")]);
    table.start(&[("f", 20), ("w", 10)]);
    table.engine.deal_damage(&table.id, "w", 14, None, false).unwrap();
    assert!(table.participant("w").has_condition(Condition::Unconscious));

    let report = table.advance();
    let request_id = report.death_save_request.expect("death save requested");
    let roll = table
        .engine
        .report_roll(&table.id, &request_id, 20, None)
        .unwrap();
    assert_eq!(
        roll.death_save,
        Some(adjud::encounter::DeathSaveOutcome::Revived)
    );
    let wizard = table.participant("w");
    assert_eq!(wizard.current_hp, 1);
    assert!(!wizard.has_condition(Condition::Unconscious));
}

/// Test: a late arrival is slotted into the order without taking the turn
#[test]
fn test_participant_joins_mid_combat() {
    let mut table = TestTable::new(vec![fighter("f"), goblin("g")]);
    table.start(&[("f", 18), ("g", 12)]);

    table.engine.add_participant(&table.id, goblin("g2")).unwrap();
    let order = table.turn_order();
    assert_eq!(order.len(), 3);
    assert!(order.iter().any(|e| e.actor_id == "g2"));
    assert_eq!(table.current_actor().as_deref(), Some("f"));
}

/// Test: removing the current actor hands the turn on
#[test]
fn test_removing_current_actor_passes_turn() {
    let mut table = TestTable::new(vec![fighter("f"), goblin("g"), wizard("w")]);
    table.start(&[("f", 20), ("g", 15), ("w", 10)]);
    table.advance();
    assert_eq!(table.current_actor().as_deref(), Some("g"));

    let removed = table.engine.remove_participant(&table.id, "g").unwrap();
    assert_eq!(removed.id, "g");
    assert_eq!(table.current_actor().as_deref(), Some("w"));
    assert_eq!(table.turn_order().len(), 2);
}

/// Test: removing the last actor in the order starts the next round
#[test]
fn test_removing_last_actor_wraps_into_next_round() {
    let mut table = TestTable::new(vec![fighter("f"), goblin("g"), wizard("w")]);
    table.start(&[("f", 20), ("g", 15), ("w", 10)]);
    table.advance();
    table.advance();
    assert_eq!(table.current_actor().as_deref(), Some("w"));

    table.engine.remove_participant(&table.id, "w").unwrap();
    assert_eq!(table.current_actor().as_deref(), Some("f"));
    assert_eq!(table.encounter().round(), 2);
}

/// Test: the turn never passes to the dead when the current actor leaves
#[test]
fn test_removing_current_actor_skips_the_dead() {
    let mut table = TestTable::new(vec![fighter("f"), goblin("g"), wizard("w")]);
    table.start(&[("f", 20), ("g", 15), ("w", 10)]);
    table
        .engine
        .deal_damage(&table.id, "g", 14, None, false)
        .unwrap();
    assert!(table.participant("g").is_dead());

    table.engine.remove_participant(&table.id, "f").unwrap();
    assert_eq!(table.current_actor().as_deref(), Some("w"));
}

/// Test: nothing happens after the encounter ends
#[test]
fn test_ended_encounter_is_frozen() {
    let mut table = TestTable::new(vec![fighter("f"), goblin("g")]);
    table.start(&[("f", 18), ("g", 12)]);
    table.engine.end_encounter(&table.id).unwrap();

    assert!(table.engine.advance_turn(&table.id).is_err());
    assert!(table.engine.heal(&table.id, "f", 1).is_err());
    assert_eq!(table.encounter().phase, adjud::encounter::Phase::Conclusion);
}

fn combatants(initiatives: &[(i32, i32)]) -> (Vec<Participant>, Vec<(String, i32)>) {
    initiatives
        .iter()
        .enumerate()
        .map(|(i, (initiative, bonus))| {
            let id = format!("p{}", i);
            let participant = Participant::new(&id, &id, ParticipantKind::Monster, 10)
                .with_initiative_bonus(*bonus);
            (participant, (id, *initiative))
        })
        .unzip()
}

proptest! {
    #[test]
    fn test_start_sorts_by_initiative_then_modifier(
        rolls in prop::collection::vec((1i32..=25, -2i32..=5), 1..8)
    ) {
        let (participants, preset) = combatants(&rolls);
        let mut table = TestTable::new(participants);
        let preset: Vec<(&str, i32)> = preset.iter().map(|(id, v)| (id.as_str(), *v)).collect();
        table.start(&preset);

        let order = table.turn_order();
        prop_assert_eq!(order.len(), rolls.len());
        for pair in order.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            prop_assert!(
                a.initiative > b.initiative
                    || (a.initiative == b.initiative && a.secondary_modifier >= b.secondary_modifier)
            );
        }
    }

    #[test]
    fn test_round_counts_full_cycles(count in 1usize..6, advances in 0usize..30) {
        let rolls: Vec<(i32, i32)> = (0..count).map(|i| (20 - i as i32, 0)).collect();
        let (participants, preset) = combatants(&rolls);
        let mut table = TestTable::new(participants);
        let preset: Vec<(&str, i32)> = preset.iter().map(|(id, v)| (id.as_str(), *v)).collect();
        table.start(&preset);

        let mut last_round = 1;
        for _ in 0..advances {
            let report = table.advance();
            prop_assert!(report.round >= last_round);
            last_round = report.round;
        }
        prop_assert_eq!(table.encounter().round() as usize, 1 + advances / count);
        let expected = format!("p{}", advances % count);
        prop_assert_eq!(table.current_actor(), Some(expected));
    }
}
