//! Tier-by-tier relaxation search.
//!
//! The driver walks a fixed sequence of (physical tier, geography tier)
//! steps: with the physical vector held at its strictest tier, geography
//! relaxes from neighborhood outwards; once the geography ladder is spent,
//! the physical vector advances one tier and geography starts over. The
//! sequence depends only on the subject's shape and the band table, never
//! on what the pool returns.
//!
//! Candidates are accumulated by account; the first admitting step wins.

use std::collections::{BTreeMap, HashMap};

use crate::core::bands::{BandConfig, PhysicalTier};
use crate::core::distance::property_distance;
use crate::core::filters::{geography_ladder, CandidateFilter, GeoTier, PoolQuery};
use crate::models::{
    AdmissionTier, Attribute, AttributeDelta, CandidateProperty, MatchRecord, SubjectProperty,
};

/// Position in the relaxation sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TierStep {
    pub step: usize,
    pub geography: usize,
    pub physical: usize,
}

/// Where the driver stopped and what it found
#[derive(Debug, Clone)]
pub struct RelaxationOutcome {
    /// Admitted records in admission order
    pub records: Vec<MatchRecord>,
    pub steps_evaluated: usize,
    pub steps_available: usize,
    pub min_comps: usize,
    /// Last step evaluated, if any
    pub terminal: Option<TierStep>,
    pub terminal_geography: Option<String>,
    pub terminal_physical: Option<PhysicalTier>,
}

impl RelaxationOutcome {
    pub fn floor_met(&self) -> bool {
        self.records.len() >= self.min_comps
    }
}

/// State machine over the relaxation sequence.
///
/// Pure: it never touches storage. Callers ask for the next query, run it
/// wherever the pool lives, and hand the rows back through [`admit`].
///
/// [`admit`]: RelaxationDriver::admit
pub struct RelaxationDriver<'a> {
    subject: &'a SubjectProperty,
    filter: CandidateFilter<'a>,
    bands: &'a BandConfig,
    ladder: Vec<GeoTier>,
    min_comps: usize,
    cursor: usize,
    steps_evaluated: usize,
    terminal: Option<TierStep>,
    records: Vec<MatchRecord>,
    index: HashMap<String, usize>,
}

impl<'a> RelaxationDriver<'a> {
    pub fn new(
        subject: &'a SubjectProperty,
        bands: &'a BandConfig,
        land_use: &'a str,
        radius_tiers: &[f64],
        min_comps: usize,
    ) -> Self {
        Self {
            subject,
            filter: CandidateFilter::new(subject, land_use),
            bands,
            ladder: geography_ladder(subject, radius_tiers),
            min_comps,
            cursor: 0,
            steps_evaluated: 0,
            terminal: None,
            records: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Total number of steps in the sequence
    pub fn steps_available(&self) -> usize {
        self.ladder.len() * self.bands.physical_tier_count()
    }

    pub fn admitted(&self) -> usize {
        self.records.len()
    }

    pub fn is_satisfied(&self) -> bool {
        self.records.len() >= self.min_comps
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.steps_available()
    }

    pub fn geography_tier(&self, index: usize) -> Option<&GeoTier> {
        self.ladder.get(index)
    }

    fn step_at(&self, cursor: usize) -> TierStep {
        let width = self.ladder.len().max(1);
        TierStep {
            step: cursor,
            geography: cursor % width,
            physical: cursor / width,
        }
    }

    /// Next step and its pool query, or `None` once satisfied or exhausted
    pub fn next_query(&mut self) -> Option<(TierStep, PoolQuery)> {
        if self.is_satisfied() || self.is_exhausted() {
            return None;
        }

        let step = self.step_at(self.cursor);
        self.cursor += 1;

        let geo = &self.ladder[step.geography];
        let physical = self.bands.physical_tier(step.physical);
        let query = self.filter.query(geo, &physical, self.index.keys().cloned());

        Some((step, query))
    }

    /// Accept the rows returned for `step`.
    ///
    /// Rows are re-checked against `query`, so stores may over-return
    /// (e.g. bounding box instead of exact radius). Returns how many were
    /// newly admitted.
    pub fn admit(&mut self, step: TierStep, query: &PoolQuery, mut rows: Vec<CandidateProperty>) -> usize {
        self.steps_evaluated += 1;
        self.terminal = Some(step);

        rows.sort_by(|a, b| a.account.cmp(&b.account));

        let geography_label = self.ladder[step.geography].label();
        let mut admitted = 0;

        for candidate in rows {
            if self.index.contains_key(&candidate.account) || !query.matches(&candidate) {
                continue;
            }

            let record = MatchRecord {
                distance_miles: property_distance(self.subject, &candidate),
                deltas: attribute_deltas(self.subject, &candidate),
                tier: AdmissionTier {
                    step: step.step,
                    geography_tier: step.geography,
                    physical_tier: step.physical,
                    geography_label: geography_label.clone(),
                },
                candidate,
            };

            self.index.insert(record.candidate.account.clone(), self.records.len());
            self.records.push(record);
            admitted += 1;
        }

        tracing::debug!(
            "Relaxation step {} ({}, physical tier {}): {} new, {} total",
            step.step,
            geography_label,
            step.physical,
            admitted,
            self.records.len()
        );

        admitted
    }

    /// Run the whole sequence against an in-memory pool
    pub fn run_in_memory(mut self, pool: &[CandidateProperty]) -> RelaxationOutcome {
        while let Some((step, query)) = self.next_query() {
            let rows = query.filter(pool);
            self.admit(step, &query, rows);
        }
        self.finish()
    }

    pub fn finish(self) -> RelaxationOutcome {
        let steps_available = self.steps_available();
        let terminal_geography = self.terminal.map(|t| self.ladder[t.geography].label());
        let terminal_physical = self.terminal.map(|t| self.bands.physical_tier(t.physical));

        RelaxationOutcome {
            records: self.records,
            steps_evaluated: self.steps_evaluated,
            steps_available,
            min_comps: self.min_comps,
            terminal: self.terminal,
            terminal_geography,
            terminal_physical,
        }
    }
}

/// Absolute and percentage deltas for every attribute present on both sides
pub fn attribute_deltas(
    subject: &SubjectProperty,
    candidate: &CandidateProperty,
) -> BTreeMap<Attribute, AttributeDelta> {
    Attribute::PHYSICAL
        .iter()
        .filter_map(|attribute| {
            let s = subject.attribute(*attribute)?;
            let c = candidate.attribute(*attribute)?;
            let absolute = c - s;
            let percent = if s != 0.0 { Some(absolute / s * 100.0) } else { None };
            Some((*attribute, AttributeDelta { absolute, percent }))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_subject() -> SubjectProperty {
        SubjectProperty {
            account: "subject".to_string(),
            land_use: Some("A1".to_string()),
            neighborhood_code: Some("N100".to_string()),
            zip_code: Some("77005".to_string()),
            city: Some("Houston".to_string()),
            latitude: Some(29.7174),
            longitude: Some(-95.4018),
            living_area: Some(2000.0),
            year_built: Some(1995),
            bedrooms: Some(3),
            market_value: Some(400000.0),
            ..Default::default()
        }
    }

    fn create_candidate(account: &str, miles_north: f64, living_area: f64) -> CandidateProperty {
        CandidateProperty {
            account: account.to_string(),
            neighborhood_code: Some("N200".to_string()),
            latitude: Some(29.7174 + miles_north / 69.0),
            living_area: Some(living_area),
            ..create_subject()
        }
    }

    #[test]
    fn test_step_order_is_geography_first() {
        let subject = create_subject();
        let bands = BandConfig::default();
        let radius = [1.5, 3.0];
        let mut driver = RelaxationDriver::new(&subject, &bands, "A1", &radius, usize::MAX);

        // neighborhood, 1.5, 3, zip, city
        let mut steps = Vec::new();
        while let Some((step, query)) = driver.next_query() {
            steps.push((step.geography, step.physical));
            driver.admit(step, &query, vec![]);
        }

        assert_eq!(steps.len(), 5 * bands.physical_tier_count());
        assert_eq!(&steps[..6], &[(0, 0), (1, 0), (2, 0), (3, 0), (4, 0), (0, 1)]);
    }

    #[test]
    fn test_stops_once_floor_met() {
        let subject = create_subject();
        let bands = BandConfig::default();
        let pool = vec![
            create_candidate("a", 0.5, 2010.0),
            create_candidate("b", 0.6, 1990.0),
            create_candidate("c", 2.5, 2000.0),
        ];

        let driver = RelaxationDriver::new(&subject, &bands, "A1", &bands.radius_tiers(None), 2);
        let outcome = driver.run_in_memory(&pool);

        // Neighborhood finds nothing, 1.5mi finds a and b
        assert_eq!(outcome.steps_evaluated, 2);
        assert_eq!(outcome.records.len(), 2);
        assert!(outcome.floor_met());
        assert_eq!(outcome.terminal_geography.as_deref(), Some("radius 1.5mi"));
    }

    #[test]
    fn test_first_admission_tier_is_kept() {
        let subject = create_subject();
        let bands = BandConfig::default();
        let pool = vec![
            create_candidate("near", 0.5, 2000.0),
            create_candidate("far", 4.0, 2000.0),
        ];

        let driver = RelaxationDriver::new(&subject, &bands, "A1", &bands.radius_tiers(None), 2);
        let outcome = driver.run_in_memory(&pool);

        let near = outcome.records.iter().find(|r| r.account() == "near").unwrap();
        let far = outcome.records.iter().find(|r| r.account() == "far").unwrap();
        assert_eq!(near.tier.geography_label, "radius 1.5mi");
        assert_eq!(far.tier.geography_label, "radius 5mi");
        assert!(near.tier.step < far.tier.step);
    }

    #[test]
    fn test_exhaustion_returns_partial_result() {
        let subject = create_subject();
        let bands = BandConfig::default();
        let pool = vec![create_candidate("only", 1.0, 2500.0)];

        let driver = RelaxationDriver::new(&subject, &bands, "A1", &bands.radius_tiers(None), 3);
        let steps_available = driver.steps_available();
        let outcome = driver.run_in_memory(&pool);

        assert_eq!(outcome.records.len(), 1);
        assert!(!outcome.floor_met());
        assert_eq!(outcome.steps_evaluated, steps_available);
    }

    #[test]
    fn test_readmission_is_ignored() {
        let subject = create_subject();
        let bands = BandConfig::default();
        let mut driver = RelaxationDriver::new(&subject, &bands, "A1", &[1.5], 10);

        let candidate = create_candidate("dup", 0.2, 2000.0);
        let (step, query) = driver.next_query().unwrap();
        // Neighborhood tier: N200 does not match N100
        assert_eq!(driver.admit(step, &query, vec![candidate.clone()]), 0);

        let (step, query) = driver.next_query().unwrap();
        assert_eq!(driver.admit(step, &query, vec![candidate.clone(), candidate.clone()]), 1);

        let (step, query) = driver.next_query().unwrap();
        assert!(query.exclude_accounts.contains("dup"));
        assert_eq!(driver.admit(step, &query, vec![candidate]), 0);
        assert_eq!(driver.admitted(), 1);
    }

    #[test]
    fn test_empty_ladder_finds_nothing() {
        let subject = SubjectProperty {
            account: "lonely".to_string(),
            living_area: Some(1500.0),
            ..Default::default()
        };
        let bands = BandConfig::default();
        let driver = RelaxationDriver::new(&subject, &bands, "A1", &bands.radius_tiers(None), 3);
        assert_eq!(driver.steps_available(), 0);

        let outcome = driver.run_in_memory(&[create_candidate("x", 0.1, 1500.0)]);
        assert!(outcome.records.is_empty());
        assert!(outcome.terminal.is_none());
    }

    #[test]
    fn test_attribute_deltas() {
        let subject = create_subject();
        let candidate = create_candidate("c", 0.1, 2200.0);
        let deltas = attribute_deltas(&subject, &candidate);

        let living = deltas[&Attribute::LivingArea];
        assert_eq!(living.absolute, 200.0);
        assert!((living.percent.unwrap() - 10.0).abs() < 1e-9);
        assert!(!deltas.contains_key(&Attribute::LotArea));
    }
}
