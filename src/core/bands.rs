//! Relaxation tiers per attribute family.
//!
//! A [`BandConfig`] is immutable once built: every family's tier list is
//! checked at construction so that tier *k+1* admits everything tier *k*
//! admits for the same subject.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::models::Attribute;

const EPSILON: f64 = 1e-9;

/// Errors raised while building or loading a band table
#[derive(Debug, Error)]
pub enum BandConfigError {
    #[error("attribute family '{0}' has no tiers")]
    EmptyFamily(Attribute),

    #[error("attribute family '{0}' is listed more than once")]
    DuplicateFamily(Attribute),

    #[error("tier {index} of '{family}' is tighter than the tier before it")]
    NonMonotonic { family: Attribute, index: usize },

    #[error("attribute family '{family}' mixes incompatible comparison kinds")]
    MixedKinds { family: Attribute },

    #[error("invalid tolerance in '{family}': {message}")]
    InvalidTolerance { family: Attribute, message: String },

    #[error("invalid weight for '{0}': weights must be finite and non-negative")]
    InvalidWeight(Attribute),

    #[error("geography needs at least one radius tier")]
    NoRadiusTiers,

    #[error("failed to read band table {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse band table: {0}")]
    Parse(#[from] toml::de::Error),
}

/// How a single tier compares a candidate value against the subject's
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Comparison {
    /// Candidate within subject × (1 ± fraction)
    PercentageWindow(f64),
    /// Candidate within subject ± offset
    AbsoluteWindow(f64),
    ExactMatch,
    /// Both present or both absent (value > 0)
    PresenceMatch,
    /// Attribute ignored at this tier
    Unbounded,
}

impl Comparison {
    /// Whether `candidate` passes this tier for `subject`
    pub fn admits(&self, subject: f64, candidate: f64) -> bool {
        match *self {
            Comparison::PercentageWindow(fraction) => {
                candidate >= subject * (1.0 - fraction) - EPSILON
                    && candidate <= subject * (1.0 + fraction) + EPSILON
            }
            Comparison::AbsoluteWindow(offset) => (candidate - subject).abs() <= offset + EPSILON,
            Comparison::ExactMatch => (candidate - subject).abs() <= EPSILON,
            Comparison::PresenceMatch => (candidate > 0.0) == (subject > 0.0),
            Comparison::Unbounded => true,
        }
    }

    /// Inclusive value range admitted around `subject`, for range-style comparisons
    pub fn range(&self, subject: f64) -> Option<(f64, f64)> {
        match *self {
            Comparison::PercentageWindow(fraction) => {
                Some((subject * (1.0 - fraction), subject * (1.0 + fraction)))
            }
            Comparison::AbsoluteWindow(offset) => Some((subject - offset, subject + offset)),
            Comparison::ExactMatch => Some((subject, subject)),
            Comparison::PresenceMatch | Comparison::Unbounded => None,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        matches!(self, Comparison::Unbounded)
    }

    /// Human-readable label, e.g. `±5%`, `±10`, `exact`, `match`, `any`
    pub fn label(&self) -> String {
        match *self {
            Comparison::PercentageWindow(fraction) => format!("±{}%", trim_float(fraction * 100.0)),
            Comparison::AbsoluteWindow(offset) => format!("±{}", trim_float(offset)),
            Comparison::ExactMatch => "exact".to_string(),
            Comparison::PresenceMatch => "match".to_string(),
            Comparison::Unbounded => "any".to_string(),
        }
    }

    fn kind(&self) -> Option<FamilyKind> {
        match self {
            Comparison::PercentageWindow(_) => Some(FamilyKind::Percentage),
            Comparison::AbsoluteWindow(_) | Comparison::ExactMatch => Some(FamilyKind::Absolute),
            Comparison::PresenceMatch => Some(FamilyKind::Presence),
            Comparison::Unbounded => None,
        }
    }

    /// Width used for the monotonicity check
    fn width(&self) -> f64 {
        match *self {
            Comparison::PercentageWindow(v) | Comparison::AbsoluteWindow(v) => v,
            Comparison::ExactMatch | Comparison::PresenceMatch => 0.0,
            Comparison::Unbounded => f64::INFINITY,
        }
    }
}

fn trim_float(v: f64) -> String {
    let rounded = (v * 100.0).round() / 100.0;
    if rounded.fract() == 0.0 {
        format!("{}", rounded as i64)
    } else {
        format!("{}", rounded)
    }
}

/// How deviations of a family are measured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FamilyKind {
    Percentage,
    Absolute,
    Presence,
}

/// Ordered tiers for one attribute family, strictest first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeBands {
    pub attribute: Attribute,
    pub weight: f64,
    pub tiers: Vec<Comparison>,
}

impl AttributeBands {
    pub fn new(attribute: Attribute, weight: f64, tiers: Vec<Comparison>) -> Self {
        Self { attribute, weight, tiers }
    }

    /// Tier at `index`, holding at the loosest tier once the list runs out
    pub fn tier(&self, index: usize) -> Comparison {
        let last = self.tiers.len().saturating_sub(1);
        self.tiers.get(index.min(last)).copied().unwrap_or(Comparison::Unbounded)
    }

    /// Comparison kind shared by the family's bounded tiers
    pub fn kind(&self) -> Option<FamilyKind> {
        self.tiers.iter().find_map(Comparison::kind)
    }

    /// Loosest finite absolute tolerance, the normalizer for absolute deviations
    pub fn absolute_ceiling(&self) -> Option<f64> {
        self.tiers
            .iter()
            .filter_map(|t| match t {
                Comparison::AbsoluteWindow(v) if *v > 0.0 => Some(*v),
                _ => None,
            })
            .reduce(f64::max)
    }

    fn validate(&self) -> Result<(), BandConfigError> {
        let family = self.attribute;

        if self.tiers.is_empty() {
            return Err(BandConfigError::EmptyFamily(family));
        }
        if !self.weight.is_finite() || self.weight < 0.0 {
            return Err(BandConfigError::InvalidWeight(family));
        }

        let mut kind = None;
        for tier in &self.tiers {
            let width = tier.width();
            if width.is_nan() || width < 0.0 {
                return Err(BandConfigError::InvalidTolerance {
                    family,
                    message: format!("{:?} must be non-negative", tier),
                });
            }
            if let Some(k) = tier.kind() {
                match kind {
                    None => kind = Some(k),
                    Some(existing) if existing != k => {
                        return Err(BandConfigError::MixedKinds { family });
                    }
                    _ => {}
                }
            }
        }
        if kind == Some(FamilyKind::Presence)
            && self.tiers.iter().filter(|t| matches!(t, Comparison::PresenceMatch)).count() > 1
        {
            return Err(BandConfigError::InvalidTolerance {
                family,
                message: "presence match may appear only once".to_string(),
            });
        }

        for (index, pair) in self.tiers.windows(2).enumerate() {
            if pair[1].width() < pair[0].width() {
                return Err(BandConfigError::NonMonotonic { family, index: index + 1 });
            }
        }

        Ok(())
    }
}

/// Radius tiers for the geography family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeographyBands {
    pub weight: f64,
    /// Increasing radii in miles
    pub radius_miles: Vec<f64>,
}

/// The complete, validated band table.
///
/// Physical tier `p` applies every family's tier `min(p, len - 1)`, so all
/// families relax together as one vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BandTable", into = "BandTable")]
pub struct BandConfig {
    geography: GeographyBands,
    families: Vec<AttributeBands>,
    class_step_penalty: f64,
    presence_penalty: f64,
}

/// Unvalidated serde shape of [`BandConfig`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BandTable {
    pub geography: GeographyBands,
    pub families: Vec<AttributeBands>,
    #[serde(default = "default_class_step_penalty")]
    pub class_step_penalty: f64,
    #[serde(default = "default_presence_penalty")]
    pub presence_penalty: f64,
}

fn default_class_step_penalty() -> f64 { 0.5 }
fn default_presence_penalty() -> f64 { 1.0 }

impl TryFrom<BandTable> for BandConfig {
    type Error = BandConfigError;

    fn try_from(table: BandTable) -> Result<Self, Self::Error> {
        BandConfig::new(
            table.geography,
            table.families,
            table.class_step_penalty,
            table.presence_penalty,
        )
    }
}

impl From<BandConfig> for BandTable {
    fn from(config: BandConfig) -> Self {
        BandTable {
            geography: config.geography,
            families: config.families,
            class_step_penalty: config.class_step_penalty,
            presence_penalty: config.presence_penalty,
        }
    }
}

impl BandConfig {
    pub fn new(
        geography: GeographyBands,
        families: Vec<AttributeBands>,
        class_step_penalty: f64,
        presence_penalty: f64,
    ) -> Result<Self, BandConfigError> {
        if geography.radius_miles.is_empty() {
            return Err(BandConfigError::NoRadiusTiers);
        }
        if !geography.weight.is_finite() || geography.weight < 0.0 {
            return Err(BandConfigError::InvalidWeight(Attribute::Geography));
        }
        for pair in geography.radius_miles.windows(2) {
            if !(pair[1] > pair[0]) {
                return Err(BandConfigError::NonMonotonic {
                    family: Attribute::Geography,
                    index: 1,
                });
            }
        }
        if geography.radius_miles.iter().any(|r| !r.is_finite() || *r <= 0.0) {
            return Err(BandConfigError::InvalidTolerance {
                family: Attribute::Geography,
                message: "radius tiers must be positive".to_string(),
            });
        }

        let mut seen = Vec::with_capacity(families.len());
        for family in &families {
            if family.attribute == Attribute::Geography || seen.contains(&family.attribute) {
                return Err(BandConfigError::DuplicateFamily(family.attribute));
            }
            seen.push(family.attribute);
            family.validate()?;
        }

        for (name, penalty) in [("class_step_penalty", class_step_penalty), ("presence_penalty", presence_penalty)] {
            if !penalty.is_finite() || penalty < 0.0 {
                return Err(BandConfigError::InvalidTolerance {
                    family: Attribute::Geography,
                    message: format!("{} must be non-negative", name),
                });
            }
        }

        Ok(Self { geography, families, class_step_penalty, presence_penalty })
    }

    /// Parse and validate a TOML band table
    pub fn from_toml_str(raw: &str) -> Result<Self, BandConfigError> {
        let table: BandTable = toml::from_str(raw)?;
        BandConfig::try_from(table)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, BandConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| BandConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Copy with every family's weight replaced from `weights`; unnamed families keep theirs
    pub fn with_weights<I>(&self, weights: I) -> Result<Self, BandConfigError>
    where
        I: IntoIterator<Item = (Attribute, f64)>,
    {
        let mut geography = self.geography.clone();
        let mut families = self.families.clone();
        for (attribute, weight) in weights {
            if attribute == Attribute::Geography {
                geography.weight = weight;
            } else if let Some(family) = families.iter_mut().find(|f| f.attribute == attribute) {
                family.weight = weight;
            }
        }
        Self::new(geography, families, self.class_step_penalty, self.presence_penalty)
    }

    pub fn with_penalties(&self, class_step_penalty: f64, presence_penalty: f64) -> Result<Self, BandConfigError> {
        Self::new(self.geography.clone(), self.families.clone(), class_step_penalty, presence_penalty)
    }

    /// Radius tiers no wider than `max_radius`; the full list when the cap removes all of them
    pub fn radius_tiers(&self, max_radius: Option<f64>) -> Vec<f64> {
        let all = &self.geography.radius_miles;
        match max_radius {
            Some(cap) => {
                let capped: Vec<f64> = all.iter().copied().filter(|r| *r <= cap).collect();
                if capped.is_empty() { all.clone() } else { capped }
            }
            None => all.clone(),
        }
    }

    /// Largest configured radius, the normalizer for geographic deviation
    pub fn max_radius(&self) -> f64 {
        self.geography.radius_miles.iter().copied().fold(0.0, f64::max)
    }

    pub fn geography_weight(&self) -> f64 {
        self.geography.weight
    }

    pub fn families(&self) -> &[AttributeBands] {
        &self.families
    }

    pub fn family(&self, attribute: Attribute) -> Option<&AttributeBands> {
        self.families.iter().find(|f| f.attribute == attribute)
    }

    pub fn weight(&self, attribute: Attribute) -> f64 {
        match attribute {
            Attribute::Geography => self.geography.weight,
            other => self.family(other).map(|f| f.weight).unwrap_or(0.0),
        }
    }

    pub fn class_step_penalty(&self) -> f64 {
        self.class_step_penalty
    }

    pub fn presence_penalty(&self) -> f64 {
        self.presence_penalty
    }

    /// Number of physical tier vectors (the longest family)
    pub fn physical_tier_count(&self) -> usize {
        self.families.iter().map(|f| f.tiers.len()).max().unwrap_or(1).max(1)
    }

    /// Tier vector at `index`, clamped to the loosest vector
    pub fn physical_tier(&self, index: usize) -> PhysicalTier {
        let index = index.min(self.physical_tier_count() - 1);
        PhysicalTier {
            index,
            windows: self.families.iter().map(|f| (f.attribute, f.tier(index))).collect(),
        }
    }
}

/// One combined physical tier: a comparison per family
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalTier {
    pub index: usize,
    pub windows: Vec<(Attribute, Comparison)>,
}

impl PhysicalTier {
    pub fn comparison(&self, attribute: Attribute) -> Comparison {
        self.windows
            .iter()
            .find(|(a, _)| *a == attribute)
            .map(|(_, c)| *c)
            .unwrap_or(Comparison::Unbounded)
    }
}

impl Default for BandConfig {
    fn default() -> Self {
        use Comparison::*;

        let families = vec![
            AttributeBands::new(
                Attribute::LivingArea,
                0.25,
                vec![
                    PercentageWindow(0.05),
                    PercentageWindow(0.10),
                    PercentageWindow(0.15),
                    PercentageWindow(0.20),
                    PercentageWindow(0.25),
                    PercentageWindow(0.35),
                    Unbounded,
                ],
            ),
            AttributeBands::new(
                Attribute::LotArea,
                0.08,
                vec![
                    PercentageWindow(0.10),
                    PercentageWindow(0.20),
                    PercentageWindow(0.30),
                    PercentageWindow(0.40),
                    PercentageWindow(0.50),
                    Unbounded,
                ],
            ),
            AttributeBands::new(
                Attribute::YearBuilt,
                0.10,
                vec![
                    AbsoluteWindow(5.0),
                    AbsoluteWindow(10.0),
                    AbsoluteWindow(15.0),
                    AbsoluteWindow(20.0),
                    AbsoluteWindow(30.0),
                    Unbounded,
                ],
            ),
            AttributeBands::new(
                Attribute::Stories,
                0.04,
                vec![ExactMatch, AbsoluteWindow(1.0), AbsoluteWindow(2.0), Unbounded],
            ),
            AttributeBands::new(Attribute::Quality, 0.06, vec![ExactMatch, AbsoluteWindow(1.0), Unbounded]),
            AttributeBands::new(Attribute::Condition, 0.05, vec![ExactMatch, AbsoluteWindow(1.0), Unbounded]),
            AttributeBands::new(
                Attribute::Bedrooms,
                0.04,
                vec![AbsoluteWindow(1.0), AbsoluteWindow(2.0), AbsoluteWindow(3.0), Unbounded],
            ),
            AttributeBands::new(
                Attribute::Bathrooms,
                0.04,
                vec![AbsoluteWindow(1.0), AbsoluteWindow(2.0), AbsoluteWindow(3.0), Unbounded],
            ),
            AttributeBands::new(Attribute::Garage, 0.02, vec![PresenceMatch, Unbounded]),
            AttributeBands::new(Attribute::Pool, 0.02, vec![PresenceMatch, Unbounded]),
        ];

        Self {
            geography: GeographyBands {
                weight: 0.30,
                radius_miles: vec![1.5, 3.0, 5.0, 10.0, 15.0, 20.0, 25.0],
            },
            families,
            class_step_penalty: default_class_step_penalty(),
            presence_penalty: default_presence_penalty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_is_valid() {
        let config = BandConfig::default();
        let table: BandTable = config.clone().into();
        let rebuilt = BandConfig::try_from(table).expect("default table should validate");
        assert_eq!(rebuilt, config);
        assert_eq!(config.physical_tier_count(), 7);
    }

    #[test]
    fn test_default_weights_sum_to_one() {
        let config = BandConfig::default();
        let total: f64 = config.geography_weight() + config.families().iter().map(|f| f.weight).sum::<f64>();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_tightening_tier() {
        let result = BandConfig::new(
            GeographyBands { weight: 0.3, radius_miles: vec![1.0, 2.0] },
            vec![AttributeBands::new(
                Attribute::LivingArea,
                0.2,
                vec![Comparison::PercentageWindow(0.10), Comparison::PercentageWindow(0.05)],
            )],
            0.5,
            1.0,
        );
        assert!(matches!(
            result,
            Err(BandConfigError::NonMonotonic { family: Attribute::LivingArea, index: 1 })
        ));
    }

    #[test]
    fn test_rejects_mixed_kinds() {
        let result = BandConfig::new(
            GeographyBands { weight: 0.3, radius_miles: vec![1.0] },
            vec![AttributeBands::new(
                Attribute::LotArea,
                0.1,
                vec![Comparison::PercentageWindow(0.10), Comparison::AbsoluteWindow(500.0)],
            )],
            0.5,
            1.0,
        );
        assert!(matches!(result, Err(BandConfigError::MixedKinds { .. })));
    }

    #[test]
    fn test_rejects_bounded_after_unbounded() {
        let result = BandConfig::new(
            GeographyBands { weight: 0.3, radius_miles: vec![1.0] },
            vec![AttributeBands::new(
                Attribute::YearBuilt,
                0.1,
                vec![Comparison::Unbounded, Comparison::AbsoluteWindow(5.0)],
            )],
            0.5,
            1.0,
        );
        assert!(matches!(result, Err(BandConfigError::NonMonotonic { .. })));
    }

    #[test]
    fn test_rejects_unsorted_radius() {
        let result = BandConfig::new(
            GeographyBands { weight: 0.3, radius_miles: vec![3.0, 1.5] },
            vec![],
            0.5,
            1.0,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_physical_tier_clamps_short_families() {
        let config = BandConfig::default();
        let tier = config.physical_tier(5);
        assert_eq!(tier.comparison(Attribute::LivingArea), Comparison::PercentageWindow(0.35));
        assert_eq!(tier.comparison(Attribute::Pool), Comparison::Unbounded);
        assert_eq!(tier.comparison(Attribute::Stories), Comparison::Unbounded);

        let beyond = config.physical_tier(99);
        assert_eq!(beyond.index, 6);
        assert_eq!(beyond.comparison(Attribute::LivingArea), Comparison::Unbounded);
    }

    #[test]
    fn test_tiers_are_supersets() {
        let config = BandConfig::default();
        let subject = 2000.0;
        for candidate in [1850.0, 1900.0, 2100.0, 2300.0, 2600.0, 3000.0] {
            let mut admitted = false;
            for index in 0..config.physical_tier_count() {
                let ok = config.physical_tier(index).comparison(Attribute::LivingArea).admits(subject, candidate);
                assert!(!admitted || ok, "{} admitted then rejected at tier {}", candidate, index);
                admitted |= ok;
            }
            assert!(admitted);
        }
    }

    #[test]
    fn test_radius_cap() {
        let config = BandConfig::default();
        assert_eq!(config.radius_tiers(Some(5.0)), vec![1.5, 3.0, 5.0]);
        assert_eq!(config.radius_tiers(Some(1.0)).len(), 7);
        assert_eq!(config.max_radius(), 25.0);
    }

    #[test]
    fn test_labels() {
        assert_eq!(Comparison::PercentageWindow(0.05).label(), "±5%");
        assert_eq!(Comparison::AbsoluteWindow(10.0).label(), "±10");
        assert_eq!(Comparison::AbsoluteWindow(1.5).label(), "±1.5");
        assert_eq!(Comparison::Unbounded.label(), "any");
    }

    #[test]
    fn test_from_toml() {
        let raw = r#"
            class_step_penalty = 0.25

            [geography]
            weight = 0.5
            radius_miles = [1.0, 2.0, 4.0]

            [[families]]
            attribute = "living_area"
            weight = 0.5
            tiers = [
                { kind = "percentage_window", value = 0.1 },
                { kind = "unbounded" },
            ]

            [[families]]
            attribute = "pool"
            weight = 0.0
            tiers = [{ kind = "presence_match" }, { kind = "unbounded" }]
        "#;

        let config = BandConfig::from_toml_str(raw).expect("table should parse");
        assert_eq!(config.radius_tiers(None), vec![1.0, 2.0, 4.0]);
        assert_eq!(config.class_step_penalty(), 0.25);
        assert_eq!(config.presence_penalty(), 1.0);
        assert_eq!(config.physical_tier_count(), 2);
        assert_eq!(config.weight(Attribute::LotArea), 0.0);
    }

    #[test]
    fn test_from_toml_rejects_invalid_table() {
        let raw = r#"
            [geography]
            weight = 0.5
            radius_miles = [1.0]

            [[families]]
            attribute = "year_built"
            weight = 0.5
            tiers = [
                { kind = "absolute_window", value = 10.0 },
                { kind = "absolute_window", value = 5.0 },
            ]
        "#;

        assert!(BandConfig::from_toml_str(raw).is_err());
    }
}
