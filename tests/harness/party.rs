//! Stock participants
//!
//! Attack bonuses, for reference when reporting totals:
//! - fighter: longsword +5 (STR 16, proficiency 2), damage 1d8+3
//! - rogue: rapier +5 (finesse, DEX 16), damage 1d8+3
//! - goblin: scimitar +4 (finesse, DEX 14), damage 1d6+2

use adjud::dice::DiceRoll;
use adjud::encounter::{
    AbilityScores, CharacterStats, DamageType, Participant, ParticipantKind, ReactionType,
    Resources, Weapon,
};

fn stats(strength: i32, dexterity: i32, class: Option<&str>) -> CharacterStats {
    CharacterStats {
        abilities: AbilityScores {
            strength,
            dexterity,
            ..Default::default()
        },
        proficiency_bonus: 2,
        class: class.map(str::to_string),
    }
}

pub fn fighter(id: &str) -> Participant {
    Participant::new(id, "Fighter", ParticipantKind::Player, 28)
        .with_armor_class(16)
        .with_stats(stats(16, 12, Some("fighter")))
        .with_resources(Resources::default().with_feature("Second Wind", "fighter", 1))
        .with_weapon(
            Weapon::new("Longsword", DiceRoll::new(1, 8, 0)).with_damage_type(DamageType::Slashing),
        )
        .with_reaction(ReactionType::OpportunityAttack)
}

pub fn rogue(id: &str) -> Participant {
    Participant::new(id, "Rogue", ParticipantKind::Player, 20)
        .with_armor_class(14)
        .with_stats(stats(10, 16, Some("rogue")))
        .with_weapon(
            Weapon::new("Rapier", DiceRoll::new(1, 8, 0))
                .with_damage_type(DamageType::Piercing)
                .finesse(),
        )
        .with_reaction(ReactionType::OpportunityAttack)
}

pub fn wizard(id: &str) -> Participant {
    Participant::new(id, "Wizard", ParticipantKind::Player, 14)
        .with_armor_class(12)
        .with_stats(stats(8, 14, Some("wizard")))
        .with_resources(
            Resources::default()
                .with_spell_slots(1, 3)
                .with_spell_slots(3, 1),
        )
        .with_reaction(ReactionType::Shield)
        .with_reaction(ReactionType::Counterspell)
}

pub fn goblin(id: &str) -> Participant {
    Participant::new(id, "Goblin", ParticipantKind::Monster, 7)
        .with_armor_class(13)
        .with_stats(stats(8, 14, None))
        .with_weapon(
            Weapon::new("Scimitar", DiceRoll::new(1, 6, 0))
                .with_damage_type(DamageType::Slashing)
                .finesse(),
        )
        .with_reaction(ReactionType::OpportunityAttack)
}

pub fn mage(id: &str) -> Participant {
    Participant::new(id, "Mage", ParticipantKind::Monster, 40)
        .with_armor_class(12)
        .with_resources(Resources::default().with_spell_slots(3, 3))
        .with_reaction(ReactionType::Counterspell)
}
