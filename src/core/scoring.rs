use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::core::bands::{AttributeBands, BandConfig, FamilyKind};
use crate::models::{Attribute, MatchRecord, ScoreBreakdown, SubjectProperty};

/// Penalty scorer: every compared attribute contributes a normalized
/// deviation in [0, 1], and the composite is their weighted average.
///
/// Deviation per family kind:
/// - geography: distance / largest radius tier
/// - percentage families: |candidate - subject| / subject
/// - absolute families: |candidate - subject| / loosest tolerance
/// - ordinal classes: steps × class step penalty
/// - presence flags: presence penalty on mismatch
///
/// Attributes missing on either side are left out of both numerator and
/// denominator.
#[derive(Debug, Clone, Copy)]
pub struct SimilarityScorer<'a> {
    bands: &'a BandConfig,
}

impl<'a> SimilarityScorer<'a> {
    pub fn new(bands: &'a BandConfig) -> Self {
        Self { bands }
    }

    pub fn score(&self, subject: &SubjectProperty, record: &MatchRecord) -> ScoreBreakdown {
        let mut deviations = BTreeMap::new();

        if let Some(distance) = record.distance_miles {
            let ceiling = self.bands.max_radius();
            if ceiling > 0.0 {
                deviations.insert(Attribute::Geography, (distance / ceiling).min(1.0));
            }
        }

        for family in self.bands.families() {
            let attribute = family.attribute;
            let (Some(s), Some(c)) = (subject.attribute(attribute), record.candidate.attribute(attribute)) else {
                continue;
            };
            if let Some(deviation) = self.deviation(family, s, c) {
                deviations.insert(attribute, deviation.clamp(0.0, 1.0));
            }
        }

        let (weighted, total_weight) = deviations
            .iter()
            .map(|(attribute, deviation)| (self.bands.weight(*attribute), *deviation))
            .filter(|(weight, _)| *weight > 0.0)
            .fold((0.0, 0.0), |(sum, total), (weight, deviation)| {
                (sum + weight * deviation, total + weight)
            });

        let composite = if total_weight > 0.0 {
            (weighted / total_weight).clamp(0.0, 1.0)
        } else {
            0.0
        };

        ScoreBreakdown { deviations, composite }
    }

    fn deviation(&self, family: &AttributeBands, subject: f64, candidate: f64) -> Option<f64> {
        let diff = (candidate - subject).abs();

        match family.kind() {
            Some(FamilyKind::Presence) => {
                let mismatch = (candidate > 0.0) != (subject > 0.0);
                Some(if mismatch { self.bands.presence_penalty().min(1.0) } else { 0.0 })
            }
            Some(FamilyKind::Percentage) => {
                if subject > 0.0 {
                    Some((diff / subject).min(1.0))
                } else {
                    None
                }
            }
            _ if family.attribute.is_ordinal() => Some(self.step_penalty(diff)),
            Some(FamilyKind::Absolute) => match family.absolute_ceiling() {
                Some(ceiling) => Some((diff / ceiling).min(1.0)),
                // Exact-only family
                None => Some(self.step_penalty(diff)),
            },
            // Family never filters; still comparable by class steps
            None => Some(self.step_penalty(diff)),
        }
    }

    fn step_penalty(&self, diff: f64) -> f64 {
        (diff.round() * self.bands.class_step_penalty()).min(1.0)
    }

    /// Score every record and sort best-first.
    ///
    /// Ties on the composite are broken by geography tier of admission,
    /// then absolute living-area delta, then account, which makes the
    /// order total and independent of input order.
    pub fn rank(&self, subject: &SubjectProperty, records: Vec<MatchRecord>) -> Vec<(MatchRecord, ScoreBreakdown)> {
        let mut scored: Vec<(MatchRecord, ScoreBreakdown)> = records
            .into_iter()
            .map(|record| {
                let breakdown = self.score(subject, &record);
                (record, breakdown)
            })
            .collect();

        scored.sort_by(|(a, sa), (b, sb)| compare_ranked(a, sa, b, sb));
        scored
    }
}

fn living_area_gap(record: &MatchRecord) -> f64 {
    record
        .deltas
        .get(&Attribute::LivingArea)
        .map(|d| d.absolute.abs())
        .unwrap_or(f64::INFINITY)
}

fn compare_ranked(a: &MatchRecord, sa: &ScoreBreakdown, b: &MatchRecord, sb: &ScoreBreakdown) -> Ordering {
    sa.composite
        .total_cmp(&sb.composite)
        .then_with(|| a.tier.geography_tier.cmp(&b.tier.geography_tier))
        .then_with(|| living_area_gap(a).total_cmp(&living_area_gap(b)))
        .then_with(|| a.candidate.account.cmp(&b.candidate.account))
}
