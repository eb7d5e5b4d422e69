//! Narration heuristics
//!
//! Deterministic helpers for the text exchanged with the narrator:
//! - Read a reported roll total out of a player message
//! - Work out which roll the narrator last asked for
//! - Phrase the outcome of a roll
//! - Suggest roll requests from what a player says they do

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::rolls::{RollKind, RollRequestSpec};

/// How many recent messages are searched for a roll prompt
const HISTORY_WINDOW: usize = 8;

const DEFAULT_CHECK_DC: i32 = 12;
const DEFAULT_SAVE_DC: i32 = 13;
const DEFAULT_ATTACK_AC: i32 = 13;

static TOTAL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)\bi\s*rolled\s*(\d+)\b").unwrap(),
        Regex::new(r"(?i)rolled[^\d]*(\d+)\b").unwrap(),
        Regex::new(r"(?i)\btotal\s*[:=]\s*(\d+)\b").unwrap(),
    ]
});

static DC_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:dc|difficulty\s*class)\s*(\d+)\b").unwrap());

static AC_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bac\s*(\d+)\b").unwrap());

static ROLLED_FORMULA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)rolled\s*\d*d\d+\s*(?:[+-]\s*\d+)?\s*=\s*(\d+)").unwrap());

const SKILLS: &[&str] = &[
    "stealth",
    "perception",
    "investigation",
    "athletics",
    "acrobatics",
    "insight",
    "persuasion",
    "deception",
    "intimidation",
    "survival",
    "arcana",
    "history",
    "religion",
    "nature",
    "medicine",
    "performance",
    "sleight of hand",
    "animal handling",
];

const ABILITIES: &[&str] = &[
    "strength",
    "dexterity",
    "constitution",
    "intelligence",
    "wisdom",
    "charisma",
];

/// Everyday words that imply a skill
const SKILL_SYNONYMS: &[(&str, &[&str])] = &[
    (
        "stealth",
        &["sneak", "sneaking", "sneakily", "quiet", "quietly", "hide", "hidden", "shadows", "creep", "silently", "tiptoe"],
    ),
    ("deception", &["diversion", "distract", "distracting", "bluff", "mislead", "decoy"]),
    ("athletics", &["throw", "toss", "hurl", "shove", "lift", "climb", "jump", "grapple"]),
    ("acrobatics", &["tumble", "flip", "balance", "dodge", "roll away"]),
    ("persuasion", &["persuade", "convince", "appeal", "negotiate", "bargain", "charm"]),
    ("intimidation", &["intimidate", "threaten", "menace", "coerce", "scare"]),
    ("investigation", &["search", "examine", "inspect", "analyze", "study", "look over"]),
    ("perception", &["look", "listen", "scan", "spot", "notice", "observe", "hear"]),
    ("sleight of hand", &["pickpocket", "palm", "conceal", "snatch", "nimble fingers"]),
    ("survival", &["track", "forage", "navigate", "trail"]),
];

/// Who said a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message in the narration history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn narrator(content: &str) -> Self {
        Self {
            role: Role::Assistant,
            content: content.to_string(),
        }
    }

    pub fn player(content: &str) -> Self {
        Self {
            role: Role::User,
            content: content.to_string(),
        }
    }
}

/// The roll the narrator most recently asked for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferredRoll {
    pub kind: RollKind,
    /// Skill or ability name, lowercase
    pub skill: Option<String>,
    pub dc: Option<i32>,
    pub ac: Option<i32>,
}

impl InferredRoll {
    /// Whether a total beats the target, when there is one
    pub fn success(&self, total: i32) -> Option<bool> {
        match self.kind {
            RollKind::Attack => self.ac.map(|ac| total >= ac),
            RollKind::SkillCheck | RollKind::Save => self.dc.map(|dc| total >= dc),
            RollKind::Damage | RollKind::Initiative => None,
        }
    }
}

/// Lowercase words separated by single spaces, padded so phrases match on word edges
fn normalize(text: &str) -> String {
    let words: Vec<String> = text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect();
    format!(" {} ", words.join(" "))
}

fn has_phrase(normalized: &str, phrase: &str) -> bool {
    normalized.contains(&format!(" {} ", phrase))
}

fn capture_number(regex: &Regex, text: &str) -> Option<i32> {
    regex
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn title_case(s: &str) -> String {
    s.split(' ')
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Read a reported roll total: "I rolled 12", "Rolled 1d20+3 = 15", "total: 10"
pub fn extract_reported_total(text: &str) -> Option<i32> {
    if let Some(total) = capture_number(&ROLLED_FORMULA, text) {
        return Some(total);
    }
    TOTAL_PATTERNS
        .iter()
        .find_map(|pattern| capture_number(pattern, text))
}

fn classify_prompt(content: &str) -> Option<(RollKind, Option<String>)> {
    let lower = content.to_lowercase();
    if lower.contains("initiative") {
        return Some((RollKind::Initiative, None));
    }

    let skill = SKILLS.iter().find(|s| {
        lower.contains(&format!("{} check", s))
            || lower.contains(&format!("roll {}", s))
            || lower.contains(&format!("roll for {}", s))
    });
    if let Some(skill) = skill {
        return Some((RollKind::SkillCheck, Some(skill.to_string())));
    }

    let save = ABILITIES
        .iter()
        .find(|a| lower.contains(&format!("{} saving throw", a)));
    if let Some(ability) = save {
        return Some((RollKind::Save, Some(ability.to_string())));
    }

    if ["attack roll", "make an attack", "please roll attack"]
        .iter()
        .any(|p| lower.contains(p))
    {
        return Some((RollKind::Attack, None));
    }
    None
}

/// Find the roll the narrator asked for in the recent history, newest first
pub fn infer_pending_roll(history: &[ChatMessage]) -> Option<InferredRoll> {
    let start = history.len().saturating_sub(HISTORY_WINDOW);
    history[start..]
        .iter()
        .rev()
        .filter(|m| m.role == Role::Assistant)
        .find_map(|m| {
            let (kind, skill) = classify_prompt(&m.content)?;
            let dc = capture_number(&DC_REGEX, &m.content);
            let ac = capture_number(&AC_REGEX, &m.content);
            let (dc, ac) = match kind {
                RollKind::SkillCheck => (dc.or(Some(DEFAULT_CHECK_DC)), ac),
                RollKind::Save => (dc.or(Some(DEFAULT_SAVE_DC)), ac),
                RollKind::Attack => (dc, ac.or(Some(DEFAULT_ATTACK_AC))),
                _ => (dc, ac),
            };
            Some(InferredRoll { kind, skill, dc, ac })
        })
}

/// One-line outcome for a reported total
pub fn describe_outcome(pending: Option<&InferredRoll>, total: i32) -> String {
    let Some(pending) = pending else {
        return format!("Roll total recorded: {}.", total);
    };
    let verdict = |ok: bool, yes: &str, no: &str| if ok { yes.to_string() } else { no.to_string() };
    let skill = pending.skill.as_deref();

    match pending.kind {
        RollKind::Initiative => format!("Initiative noted: {}.", total),
        RollKind::Attack => match pending.success(total) {
            Some(hit) => format!("Your attack roll is {} ({}).", total, verdict(hit, "hit", "miss")),
            None => format!("Your attack roll is {}.", total),
        },
        RollKind::Save => match pending.success(total) {
            Some(ok) => format!(
                "Your {} saving throw is {} ({}).",
                skill.unwrap_or("ability"),
                total,
                verdict(ok, "success", "failure")
            ),
            None => format!("Your saving throw total is {}.", total),
        },
        RollKind::SkillCheck => match pending.success(total) {
            Some(ok) => format!(
                "Your {} check is {} ({}).",
                skill.unwrap_or("ability"),
                total,
                verdict(ok, "success", "failure")
            ),
            None => format!("Your {} check totals {}.", skill.unwrap_or("ability"), total),
        },
        RollKind::Damage => format!("Damage roll: {}.", total),
    }
}

/// Roll requests implied by a player's message
pub fn suggest_roll_requests(message: &str) -> Vec<RollRequestSpec> {
    let normalized = normalize(message);
    let dc = capture_number(&DC_REGEX, message);
    let with_dc = |spec: RollRequestSpec| match dc {
        Some(dc) => spec.with_dc(dc),
        None => spec,
    };

    let mut requests = Vec::new();
    if has_phrase(&normalized, "initiative") {
        requests.push(RollRequestSpec::new(RollKind::Initiative, "Roll initiative", "1d20+2"));
    }
    if has_phrase(&normalized, "attack") {
        requests.push(RollRequestSpec::new(RollKind::Attack, "Attack roll", "1d20+5").with_ac(DEFAULT_ATTACK_AC));
    }

    let skill = SKILLS
        .iter()
        .copied()
        .find(|s| has_phrase(&normalized, s))
        .or_else(|| {
            SKILL_SYNONYMS
                .iter()
                .find(|(_, words)| words.iter().any(|w| has_phrase(&normalized, w)))
                .map(|(skill, _)| *skill)
        });
    if let Some(skill) = skill {
        let purpose = format!("{} check", title_case(skill));
        requests.push(with_dc(RollRequestSpec::new(RollKind::SkillCheck, &purpose, "1d20+3")));
    } else if has_phrase(&normalized, "check") {
        requests.push(with_dc(RollRequestSpec::new(RollKind::SkillCheck, "Ability check", "1d20+3")));
    }

    if has_phrase(&normalized, "save") {
        requests.push(with_dc(RollRequestSpec::new(RollKind::Save, "Saving throw", "1d20+2")));
    }
    requests
}

/// "Please roll Stealth check (DC 14)."
pub fn roll_prompt(spec: &RollRequestSpec) -> String {
    let purpose = if spec.purpose.is_empty() {
        match spec.kind {
            RollKind::SkillCheck => "Check",
            RollKind::Save => "Saving Throw",
            RollKind::Attack => "Attack",
            RollKind::Damage => "Damage",
            RollKind::Initiative => "Initiative",
        }
    } else {
        spec.purpose.as_str()
    };
    let target = match (spec.dc, spec.ac) {
        (Some(dc), _) => format!(" (DC {})", dc),
        (None, Some(ac)) => format!(" (AC {})", ac),
        (None, None) => String::new(),
    };
    format!("Please roll {}{}.", purpose, target)
}
