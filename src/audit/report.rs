//! Compliance reports
//!
//! The score starts at 100 and loses a severity-weighted amount per
//! violation, bottoming out at 0.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::violation::{Severity, ViolationKind, ViolationRecord};

/// Points deducted per violation of each severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityWeights {
    pub critical: u32,
    pub high: u32,
    pub medium: u32,
    pub low: u32,
}

impl Default for SeverityWeights {
    fn default() -> Self {
        Self {
            critical: 25,
            high: 15,
            medium: 10,
            low: 5,
        }
    }
}

impl SeverityWeights {
    pub fn weight(&self, severity: Severity) -> u32 {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
        }
    }
}

/// Structured roll records seen during the combat
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollCounts {
    pub attack_requests: usize,
    pub attack_results: usize,
    pub damage_rolls: usize,
}

/// End-of-combat audit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub combat_id: String,
    /// 0-100
    pub score: u32,
    pub total_violations: usize,
    pub by_severity: BTreeMap<Severity, usize>,
    pub by_kind: BTreeMap<ViolationKind, usize>,
    pub initiative_respected: bool,
    pub attack_sequencing_respected: bool,
    pub formulas_well_formed: bool,
    pub recommendations: Vec<String>,
    pub rolls: RollCounts,
    pub generated_at: DateTime<Utc>,
}

impl ComplianceReport {
    pub fn build(
        combat_id: &str,
        violations: &[ViolationRecord],
        weights: &SeverityWeights,
        rolls: RollCounts,
    ) -> Self {
        let mut by_severity = BTreeMap::new();
        let mut by_kind = BTreeMap::new();
        let mut deducted: u32 = 0;
        for v in violations {
            *by_severity.entry(v.severity).or_insert(0) += 1;
            *by_kind.entry(v.kind).or_insert(0) += 1;
            deducted = deducted.saturating_add(weights.weight(v.severity));
        }

        let seen = |kinds: &[ViolationKind]| kinds.iter().any(|k| by_kind.contains_key(k));
        let initiative_respected =
            !seen(&[ViolationKind::MissingInitiative, ViolationKind::WrongSequence]);
        let attack_sequencing_respected = !seen(&[
            ViolationKind::MissingAttackRoll,
            ViolationKind::MissingDamageRoll,
            ViolationKind::DamageWithoutAttack,
            ViolationKind::MissingAc,
        ]);
        let formulas_well_formed =
            !seen(&[ViolationKind::InvalidFormula, ViolationKind::MissingModifier]);

        let recommendations = by_kind
            .keys()
            .map(|kind| kind.recommendation().to_string())
            .collect();

        Self {
            combat_id: combat_id.to_string(),
            score: 100u32.saturating_sub(deducted),
            total_violations: violations.len(),
            by_severity,
            by_kind,
            initiative_respected,
            attack_sequencing_respected,
            formulas_well_formed,
            recommendations,
            rolls,
            generated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn violation(kind: ViolationKind, severity: Severity) -> ViolationRecord {
        ViolationRecord::new("c1", None, kind, severity, kind.to_string())
    }

    #[test]
    fn test_clean_combat_scores_100() {
        let report = ComplianceReport::build("c1", &[], &SeverityWeights::default(), RollCounts::default());
        assert_eq!(report.score, 100);
        assert!(report.initiative_respected);
        assert!(report.attack_sequencing_respected);
        assert!(report.formulas_well_formed);
        assert!(report.recommendations.is_empty());
    }

    #[test]
    fn test_weighted_deductions() {
        let violations = vec![
            violation(ViolationKind::MissingAttackRoll, Severity::Critical),
            violation(ViolationKind::MissingModifier, Severity::Medium),
            violation(ViolationKind::MissingAc, Severity::High),
            violation(ViolationKind::MissingAc, Severity::High),
        ];
        let report = ComplianceReport::build("c1", &violations, &SeverityWeights::default(), RollCounts::default());
        assert_eq!(report.score, 100 - 25 - 10 - 15 - 15);
        assert_eq!(report.by_kind[&ViolationKind::MissingAc], 2);
        assert_eq!(report.by_severity[&Severity::High], 2);
        assert!(report.initiative_respected);
        assert!(!report.attack_sequencing_respected);
        assert!(!report.formulas_well_formed);
        // One recommendation per distinct kind
        assert_eq!(report.recommendations.len(), 3);
    }

    #[test]
    fn test_score_floors_at_zero() {
        let violations: Vec<_> = (0..6)
            .map(|_| violation(ViolationKind::MissingInitiative, Severity::Critical))
            .collect();
        let report = ComplianceReport::build("c1", &violations, &SeverityWeights::default(), RollCounts::default());
        assert_eq!(report.score, 0);
        assert!(!report.initiative_respected);
    }

    #[test]
    fn test_custom_weights() {
        let weights = SeverityWeights {
            critical: 50,
            ..Default::default()
        };
        let violations = vec![violation(ViolationKind::WrongSequence, Severity::Critical)];
        let report = ComplianceReport::build("c1", &violations, &weights, RollCounts::default());
        assert_eq!(report.score, 50);
    }
}
