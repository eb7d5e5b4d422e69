//! Reaction broker
//!
//! Watches movement, spellcasting and attacks for reaction triggers and
//! keeps the queue of open opportunities. A watcher gets at most one open
//! opportunity per triggering actor, and only while it still has its
//! reaction. Refreshing reactions is the turn reset's job, not the broker's.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::action::{ActionRequest, ActionType};
use super::participant::{Participant, Position};
use crate::error::{EngineError, Result};

/// Reactions a participant can take
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionType {
    OpportunityAttack,
    Counterspell,
    Shield,
}

impl fmt::Display for ReactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReactionType::OpportunityAttack => "opportunity attack",
            ReactionType::Counterspell => "counterspell",
            ReactionType::Shield => "shield",
        };
        write!(f, "{}", s)
    }
}

/// What set the opportunity off
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// Moved out of the watcher's threatened radius
    LeftReach,
    /// Cast a spell within range of the watcher
    SpellCast,
    /// Hit the watcher with an attack
    AttackHit,
}

/// When an unconsumed opportunity goes away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expiry {
    EndOfTurn,
    None,
}

/// A chance for a participant to act outside their own turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionOpportunity {
    pub id: String,
    pub reactor_id: String,
    pub trigger: TriggerKind,
    pub description: String,
    pub eligible: Vec<ReactionType>,
    pub trigger_actor_id: String,
    pub expiry: Expiry,
}

/// A consumed opportunity and the action it turns into
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedReaction {
    pub opportunity: ReactionOpportunity,
    pub chosen: ReactionType,
    pub request: ActionRequest,
}

/// Open reaction opportunities for one encounter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionBroker {
    opportunities: Vec<ReactionOpportunity>,
    default_reach_ft: u32,
    spell_range_ft: u32,
}

impl ReactionBroker {
    pub fn new(default_reach_ft: u32, spell_range_ft: u32) -> Self {
        Self {
            opportunities: Vec::new(),
            default_reach_ft,
            spell_range_ft,
        }
    }

    /// Open opportunities, oldest first
    pub fn pending(&self) -> &[ReactionOpportunity] {
        &self.opportunities
    }

    pub fn for_reactor<'a>(&'a self, reactor_id: &'a str) -> impl Iterator<Item = &'a ReactionOpportunity> {
        self.opportunities
            .iter()
            .filter(move |o| o.reactor_id == reactor_id)
    }

    fn already_offered(&self, reactor_id: &str, trigger_actor_id: &str) -> bool {
        offered(&self.opportunities, reactor_id, trigger_actor_id)
    }

    /// Hostiles of `actor` that could still react to it
    fn watchers<'p>(&self, actor: &Participant, participants: &'p [Participant]) -> Vec<&'p Participant> {
        participants
            .iter()
            .filter(|w| {
                w.id != actor.id
                    && w.side != actor.side
                    && w.can_react()
                    && !offered(&self.opportunities, &w.id, &actor.id)
            })
            .collect()
    }

    fn offer(
        &mut self,
        reactor: &Participant,
        actor: &Participant,
        trigger: TriggerKind,
        eligible: Vec<ReactionType>,
        description: String,
    ) -> ReactionOpportunity {
        let opportunity = ReactionOpportunity {
            id: uuid::Uuid::new_v4().to_string(),
            reactor_id: reactor.id.clone(),
            trigger,
            description,
            eligible,
            trigger_actor_id: actor.id.clone(),
            expiry: Expiry::EndOfTurn,
        };
        debug!(
            "Reaction opportunity for {}: {}",
            reactor.id, opportunity.description
        );
        self.opportunities.push(opportunity.clone());
        opportunity
    }

    /// Offer opportunity attacks to hostiles whose reach the mover just left
    pub fn on_movement(
        &mut self,
        mover: &Participant,
        from: Position,
        to: Position,
        participants: &[Participant],
    ) -> Vec<ReactionOpportunity> {
        let reach = self.default_reach_ft;
        let triggered: Vec<&Participant> = self
            .watchers(mover, participants)
            .into_iter()
            .filter(|w| {
                w.position.is_some_and(|pos| {
                    let radius = w.reach_ft(reach);
                    pos.distance_to(from) <= radius && pos.distance_to(to) > radius
                })
            })
            .collect();

        triggered
            .into_iter()
            .map(|watcher| {
                let description = format!("{} left {}'s reach", mover.name, watcher.name);
                self.offer(
                    watcher,
                    mover,
                    TriggerKind::LeftReach,
                    vec![ReactionType::OpportunityAttack],
                    description,
                )
            })
            .collect()
    }

    /// Offer counterspells to hostile casters in range with a 3rd-level slot left
    pub fn on_spell_cast(&mut self, caster: &Participant, participants: &[Participant]) -> Vec<ReactionOpportunity> {
        let range = self.spell_range_ft;
        let triggered: Vec<&Participant> = self
            .watchers(caster, participants)
            .into_iter()
            .filter(|w| {
                w.reactions.contains(&ReactionType::Counterspell)
                    && w.resources.has_slot_at_least(3)
                    && within(w.position, caster.position, range)
            })
            .collect();

        triggered
            .into_iter()
            .map(|watcher| {
                let description = format!("{} is casting a spell near {}", caster.name, watcher.name);
                self.offer(
                    watcher,
                    caster,
                    TriggerKind::SpellCast,
                    vec![ReactionType::Counterspell],
                    description,
                )
            })
            .collect()
    }

    /// Offer Shield to a target that was just hit and can still cast it
    pub fn on_attack_hit(&mut self, attacker: &Participant, target: &Participant) -> Option<ReactionOpportunity> {
        let eligible = target.id != attacker.id
            && target.can_react()
            && target.reactions.contains(&ReactionType::Shield)
            && target.resources.has_slot_at_least(1)
            && !self.already_offered(&target.id, &attacker.id);
        if !eligible {
            return None;
        }
        let description = format!("{} was hit by {}", target.name, attacker.name);
        Some(self.offer(
            target,
            attacker,
            TriggerKind::AttackHit,
            vec![ReactionType::Shield],
            description,
        ))
    }

    /// Consume an opportunity. The reactor's other open opportunities go
    /// with it, since their reaction is now spent.
    pub fn resolve(&mut self, opportunity_id: &str, chosen: ReactionType) -> Result<ResolvedReaction> {
        let opportunity = self
            .opportunities
            .iter()
            .find(|o| o.id == opportunity_id)
            .cloned()
            .ok_or_else(|| EngineError::OpportunityNotFound(opportunity_id.to_string()))?;

        if !opportunity.eligible.contains(&chosen) {
            return Err(EngineError::ReactionNotEligible {
                opportunity_id: opportunity_id.to_string(),
                reaction: chosen,
            });
        }

        self.opportunities
            .retain(|o| o.reactor_id != opportunity.reactor_id);

        let request = ActionRequest::new(
            &opportunity.reactor_id,
            ActionType::Reaction,
            &format!("{} ({})", chosen, opportunity.description),
        )
        .targeting(&opportunity.trigger_actor_id);

        Ok(ResolvedReaction {
            opportunity,
            chosen,
            request,
        })
    }

    /// Drop an opportunity without side effects
    pub fn dismiss(&mut self, opportunity_id: &str) -> Result<ReactionOpportunity> {
        let index = self
            .opportunities
            .iter()
            .position(|o| o.id == opportunity_id)
            .ok_or_else(|| EngineError::OpportunityNotFound(opportunity_id.to_string()))?;
        Ok(self.opportunities.remove(index))
    }

    /// Discard everything scoped to the turn that just ended
    pub fn expire_end_of_turn(&mut self) -> Vec<ReactionOpportunity> {
        let (expired, kept) = std::mem::take(&mut self.opportunities)
            .into_iter()
            .partition(|o| o.expiry == Expiry::EndOfTurn);
        self.opportunities = kept;
        if !expired.is_empty() {
            debug!("Expired {} reaction opportunities", expired.len());
        }
        expired
    }

    /// Forget a participant leaving the encounter
    pub fn forget(&mut self, participant_id: &str) {
        self.opportunities
            .retain(|o| o.reactor_id != participant_id && o.trigger_actor_id != participant_id);
    }
}

fn offered(opportunities: &[ReactionOpportunity], reactor_id: &str, trigger_actor_id: &str) -> bool {
    opportunities
        .iter()
        .any(|o| o.reactor_id == reactor_id && o.trigger_actor_id == trigger_actor_id)
}

fn within(a: Option<Position>, b: Option<Position>, range: u32) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.distance_to(b) <= range,
        // Without positions, assume everyone is in range
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dice::DiceRoll;
    use crate::encounter::participant::{Condition, ParticipantKind, Resources, Weapon};

    fn party() -> Vec<Participant> {
        vec![
            Participant::new("hero", "Hero", ParticipantKind::Player, 20).at(Position::new(0, 0)),
            Participant::new("orc", "Orc", ParticipantKind::Monster, 15).at(Position::new(5, 0)),
            Participant::new("goblin", "Goblin", ParticipantKind::Monster, 7).at(Position::new(0, 5)),
        ]
    }

    #[test]
    fn test_leaving_reach_triggers_opportunity_attacks() {
        let participants = party();
        let mut broker = ReactionBroker::new(5, 60);

        let offered = broker.on_movement(
            &participants[0],
            Position::new(0, 0),
            Position::new(-20, 0),
            &participants,
        );
        assert_eq!(offered.len(), 2);
        assert!(offered.iter().all(|o| o.eligible == vec![ReactionType::OpportunityAttack]));
        assert!(offered.iter().all(|o| o.trigger_actor_id == "hero"));
        assert_eq!(offered[0].expiry, Expiry::EndOfTurn);
    }

    #[test]
    fn test_staying_in_reach_or_allies_do_not_trigger() {
        let mut participants = party();
        participants.push(
            Participant::new("cleric", "Cleric", ParticipantKind::Player, 12).at(Position::new(0, -5)),
        );
        let mut broker = ReactionBroker::new(5, 60);

        let offered = broker.on_movement(
            &participants[0],
            Position::new(0, 0),
            Position::new(5, 5),
            &participants,
        );
        assert!(offered.is_empty());

        // The orc moving away from the cleric is not a trigger for the goblin
        let offered = broker.on_movement(
            &participants[1],
            Position::new(5, 0),
            Position::new(40, 0),
            &participants,
        );
        assert_eq!(offered.len(), 1);
        assert_eq!(offered[0].reactor_id, "hero");
    }

    #[test]
    fn test_reach_weapon_extends_threat() {
        let participants = vec![
            Participant::new("hero", "Hero", ParticipantKind::Player, 20).at(Position::new(0, 0)),
            Participant::new("guard", "Guard", ParticipantKind::Npc, 15)
                .at(Position::new(10, 0))
                .with_weapon(Weapon::new("Glaive", DiceRoll::new(1, 10, 0)).reach()),
        ];
        let mut broker = ReactionBroker::new(5, 60);
        let offered = broker.on_movement(
            &participants[0],
            Position::new(0, 0),
            Position::new(-5, 0),
            &participants,
        );
        assert_eq!(offered.len(), 1);
    }

    #[test]
    fn test_no_duplicate_offer_or_spent_reaction() {
        let mut participants = party();
        let mut broker = ReactionBroker::new(5, 60);

        broker.on_movement(&participants[0], Position::new(0, 0), Position::new(-20, 0), &participants);
        let again = broker.on_movement(&participants[0], Position::new(0, 0), Position::new(-20, 0), &participants);
        assert!(again.is_empty());
        assert_eq!(broker.pending().len(), 2);

        broker.expire_end_of_turn();
        participants[1].flags.reaction_taken = true;
        participants[2].apply_condition(Condition::Stunned);
        let offered = broker.on_movement(&participants[0], Position::new(0, 0), Position::new(-20, 0), &participants);
        assert!(offered.is_empty());
    }

    #[test]
    fn test_resolve_consumes_and_clears_moot() {
        let participants = party();
        let mut broker = ReactionBroker::new(5, 60);
        let offered = broker.on_movement(&participants[0], Position::new(0, 0), Position::new(-20, 0), &participants);
        let orc_opp = offered.iter().find(|o| o.reactor_id == "orc").unwrap().clone();

        let err = broker.resolve(&orc_opp.id, ReactionType::Shield).unwrap_err();
        assert!(matches!(err, EngineError::ReactionNotEligible { .. }));

        let resolved = broker.resolve(&orc_opp.id, ReactionType::OpportunityAttack).unwrap();
        assert_eq!(resolved.request.actor_id, "orc");
        assert_eq!(resolved.request.target_id.as_deref(), Some("hero"));
        assert_eq!(resolved.request.action_type, ActionType::Reaction);
        assert!(broker.for_reactor("orc").next().is_none());
        assert_eq!(broker.pending().len(), 1);

        assert!(matches!(
            broker.resolve(&orc_opp.id, ReactionType::OpportunityAttack),
            Err(EngineError::OpportunityNotFound(_))
        ));
    }

    #[test]
    fn test_dismiss_and_expire() {
        let participants = party();
        let mut broker = ReactionBroker::new(5, 60);
        let offered = broker.on_movement(&participants[0], Position::new(0, 0), Position::new(-20, 0), &participants);

        broker.dismiss(&offered[0].id).unwrap();
        assert_eq!(broker.pending().len(), 1);
        assert_eq!(broker.expire_end_of_turn().len(), 1);
        assert!(broker.pending().is_empty());
    }

    #[test]
    fn test_counterspell_and_shield() {
        let participants = vec![
            Participant::new("wizard", "Wizard", ParticipantKind::Player, 12)
                .at(Position::new(0, 0))
                .with_reaction(ReactionType::Counterspell)
                .with_reaction(ReactionType::Shield)
                .with_resources(Resources::default().with_spell_slots(1, 2).with_spell_slots(3, 1)),
            Participant::new("mage", "Mage", ParticipantKind::Monster, 20).at(Position::new(50, 0)),
        ];
        let mut broker = ReactionBroker::new(5, 60);

        let offered = broker.on_spell_cast(&participants[1], &participants);
        assert_eq!(offered.len(), 1);
        assert_eq!(offered[0].eligible, vec![ReactionType::Counterspell]);

        broker.expire_end_of_turn();
        let shield = broker.on_attack_hit(&participants[1], &participants[0]);
        assert!(shield.is_some());
    }
}
