//! Turn scheduling
//!
//! Initiative order, turn pointer and round counter. The order is built once
//! per encounter from the full set of initiative rolls and stays put after
//! that; re-sorting is an explicit call.
//!
//! Ordering: initiative descending, then secondary modifier descending, then
//! insertion order.

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::participant::{Participant, ParticipantKind};
use crate::dice::{roll_d20, RollMode};

/// One slot in the initiative order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiativeEntry {
    pub actor_id: String,
    pub name: String,
    pub initiative: i32,
    /// Tie-breaker, usually the dexterity modifier
    pub secondary_modifier: i32,
    pub is_player: bool,
    pub has_acted: bool,
}

impl InitiativeEntry {
    /// Entry for a participant with an already-known initiative value
    pub fn for_participant(participant: &Participant, initiative: i32) -> Self {
        Self {
            actor_id: participant.id.clone(),
            name: participant.name.clone(),
            initiative,
            secondary_modifier: participant.secondary_modifier(),
            is_player: participant.kind == ParticipantKind::Player,
            has_acted: false,
        }
    }
}

/// Sort entries into turn order (stable)
pub fn sort_initiative(entries: &mut [InitiativeEntry]) {
    entries.sort_by(|a, b| {
        b.initiative
            .cmp(&a.initiative)
            .then_with(|| b.secondary_modifier.cmp(&a.secondary_modifier))
    });
}

/// Roll d20 + the participant's initiative bonus
pub fn roll_initiative<R: Rng + ?Sized>(participant: &Participant, rng: &mut R) -> i32 {
    roll_d20(rng, RollMode::Normal).natural as i32 + participant.initiative_bonus
}

/// What a call to [`TurnOrder::advance`] did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum TurnAdvance {
    /// Empty order, nothing happened
    NoParticipants,
    /// A new participant is up
    Advanced {
        index: usize,
        actor_id: String,
        new_round: bool,
    },
    /// Everyone left is dead; the pointer is cleared
    AllDead { new_round: bool },
}

/// Initiative order with a turn pointer and round counter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnOrder {
    entries: Vec<InitiativeEntry>,
    current: Option<usize>,
    round: u32,
    /// Set once the order has been built from the full set of rolls
    complete: bool,
}

impl Default for TurnOrder {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            current: None,
            round: 1,
            complete: false,
        }
    }
}

impl TurnOrder {
    /// Build the order from every participant's initiative, top entry first up
    pub fn from_entries(mut entries: Vec<InitiativeEntry>) -> Self {
        sort_initiative(&mut entries);
        let current = if entries.is_empty() { None } else { Some(0) };
        Self {
            entries,
            current,
            round: 1,
            complete: true,
        }
    }

    pub fn entries(&self) -> &[InitiativeEntry] {
        &self.entries
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn current_entry(&self) -> Option<&InitiativeEntry> {
        self.current.and_then(|i| self.entries.get(i))
    }

    pub fn current_actor(&self) -> Option<&str> {
        self.current_entry().map(|e| e.actor_id.as_str())
    }

    pub fn position_of(&self, actor_id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.actor_id == actor_id)
    }

    /// Move to the next participant who is not dead.
    ///
    /// The outgoing participant is marked as having acted. Passing the end
    /// of the order wraps to the top, bumps the round and clears every
    /// has-acted flag. Dead participants are never selected.
    pub fn advance(&mut self, is_dead: impl Fn(&str) -> bool) -> TurnAdvance {
        let len = self.entries.len();
        if len == 0 {
            return TurnAdvance::NoParticipants;
        }

        let from = match self.current {
            Some(index) => {
                self.entries[index].has_acted = true;
                index
            }
            None => len - 1,
        };
        self.select_from(from + 1, is_dead)
    }

    /// Point at the first living entry at or after `start`, wrapping into a new round
    fn select_from(&mut self, start: usize, is_dead: impl Fn(&str) -> bool) -> TurnAdvance {
        let len = self.entries.len();
        if len == 0 {
            self.current = None;
            return TurnAdvance::NoParticipants;
        }

        let mut new_round = false;
        for step in 0..len {
            let mut index = start + step;
            if index >= len {
                index -= len;
                if !new_round {
                    new_round = true;
                    self.round += 1;
                    for entry in &mut self.entries {
                        entry.has_acted = false;
                    }
                }
            }
            if !is_dead(&self.entries[index].actor_id) {
                self.current = Some(index);
                return TurnAdvance::Advanced {
                    index,
                    actor_id: self.entries[index].actor_id.clone(),
                    new_round,
                };
            }
        }

        self.current = None;
        TurnAdvance::AllDead { new_round }
    }

    /// Overwrite an actor's initiative without moving anyone
    pub fn set_initiative(&mut self, actor_id: &str, initiative: i32) -> bool {
        match self.entries.iter_mut().find(|e| e.actor_id == actor_id) {
            Some(entry) if entry.initiative != initiative => {
                entry.initiative = initiative;
                true
            }
            _ => false,
        }
    }

    /// Re-sort the order; the same actor stays current
    pub fn resort(&mut self) {
        let current_actor = self.current_actor().map(str::to_string);
        sort_initiative(&mut self.entries);
        self.current = current_actor.and_then(|id| self.position_of(&id));
    }

    /// Slot a late joiner in at its sorted position without reordering anyone else
    pub fn insert(&mut self, entry: InitiativeEntry) -> usize {
        let index = self.entries.partition_point(|e| {
            e.initiative > entry.initiative
                || (e.initiative == entry.initiative
                    && e.secondary_modifier >= entry.secondary_modifier)
        });
        self.entries.insert(index, entry);
        match self.current {
            Some(current) if index <= current => self.current = Some(current + 1),
            None if self.entries.len() == 1 => self.current = Some(0),
            _ => {}
        }
        index
    }

    /// Drop an actor from the order.
    ///
    /// Removing the current actor hands the turn to the next living
    /// participant, exactly as if the turn had advanced.
    pub fn remove(&mut self, actor_id: &str, is_dead: impl Fn(&str) -> bool) -> Option<InitiativeEntry> {
        let index = self.position_of(actor_id)?;
        let entry = self.entries.remove(index);
        match self.current {
            Some(current) if index < current => self.current = Some(current - 1),
            Some(current) if index == current => {
                self.select_from(index, is_dead);
            }
            _ => {}
        }
        Some(entry)
    }
}
