use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Construction quality grade, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum QualityClass {
    #[serde(rename = "E")]
    Poor,
    #[serde(rename = "D")]
    Fair,
    #[serde(rename = "C")]
    Average,
    #[serde(rename = "B")]
    Good,
    #[serde(rename = "A")]
    Excellent,
    #[serde(rename = "X")]
    Superior,
}

impl QualityClass {
    pub const ALL: [QualityClass; 6] = [
        QualityClass::Poor,
        QualityClass::Fair,
        QualityClass::Average,
        QualityClass::Good,
        QualityClass::Excellent,
        QualityClass::Superior,
    ];

    pub fn rank(self) -> u8 {
        self as u8
    }

    /// Single-letter code used by the appraisal district
    pub fn code(self) -> &'static str {
        match self {
            QualityClass::Poor => "E",
            QualityClass::Fair => "D",
            QualityClass::Average => "C",
            QualityClass::Good => "B",
            QualityClass::Excellent => "A",
            QualityClass::Superior => "X",
        }
    }
}

impl QualityClass {
    /// Every spelling accepted for this class, in normalized form
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            QualityClass::Poor => &["e", "poor", "low"],
            QualityClass::Fair => &["d", "fair"],
            QualityClass::Average => &["c", "average"],
            QualityClass::Good => &["b", "good"],
            QualityClass::Excellent => &["a", "excellent"],
            QualityClass::Superior => &["x", "superior"],
        }
    }
}

impl FromStr for QualityClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = normalize_code(s);
        QualityClass::ALL
            .into_iter()
            .find(|q| q.aliases().contains(&normalized.as_str()))
            .ok_or_else(|| format!("unknown quality class '{}'", s.trim()))
    }
}

/// Canonical form of a grade code before alias lookup: trimmed, lowercase,
/// spaces and hyphens as underscores. Stores must normalize the same way.
pub fn normalize_code(raw: &str) -> String {
    raw.trim().to_ascii_lowercase().replace([' ', '-'], "_")
}

/// Physical condition grade, worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Unsound,
    Poor,
    Fair,
    Average,
    Good,
    VeryGood,
    Excellent,
}

impl Condition {
    pub const ALL: [Condition; 7] = [
        Condition::Unsound,
        Condition::Poor,
        Condition::Fair,
        Condition::Average,
        Condition::Good,
        Condition::VeryGood,
        Condition::Excellent,
    ];

    pub fn rank(self) -> u8 {
        self as u8
    }

    pub fn code(self) -> &'static str {
        match self {
            Condition::Unsound => "unsound",
            Condition::Poor => "poor",
            Condition::Fair => "fair",
            Condition::Average => "average",
            Condition::Good => "good",
            Condition::VeryGood => "very_good",
            Condition::Excellent => "excellent",
        }
    }
}

impl Condition {
    /// Every spelling accepted for this grade, in normalized form
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            Condition::Unsound => &["unsound"],
            Condition::Poor => &["poor"],
            Condition::Fair => &["fair"],
            Condition::Average => &["average"],
            Condition::Good => &["good"],
            Condition::VeryGood => &["very_good"],
            Condition::Excellent => &["excellent"],
        }
    }
}

impl FromStr for Condition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = normalize_code(s);
        Condition::ALL
            .into_iter()
            .find(|c| c.aliases().contains(&normalized.as_str()))
            .ok_or_else(|| format!("unknown condition '{}'", s.trim()))
    }
}

/// Attribute families that take part in filtering and scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    Geography,
    LivingArea,
    LotArea,
    YearBuilt,
    Stories,
    Quality,
    Condition,
    Bedrooms,
    Bathrooms,
    Garage,
    Pool,
}

impl Attribute {
    /// Physical families in the order they appear in the default band table
    pub const PHYSICAL: [Attribute; 10] = [
        Attribute::LivingArea,
        Attribute::LotArea,
        Attribute::YearBuilt,
        Attribute::Stories,
        Attribute::Quality,
        Attribute::Condition,
        Attribute::Bedrooms,
        Attribute::Bathrooms,
        Attribute::Garage,
        Attribute::Pool,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Attribute::Geography => "geography",
            Attribute::LivingArea => "living_area",
            Attribute::LotArea => "lot_area",
            Attribute::YearBuilt => "year_built",
            Attribute::Stories => "stories",
            Attribute::Quality => "quality",
            Attribute::Condition => "condition",
            Attribute::Bedrooms => "bedrooms",
            Attribute::Bathrooms => "bathrooms",
            Attribute::Garage => "garage",
            Attribute::Pool => "pool",
        }
    }

    /// Graded classes scored by step distance rather than magnitude
    pub fn is_ordinal(self) -> bool {
        matches!(self, Attribute::Quality | Attribute::Condition)
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which value a comparison is priced on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Assessed/market value, ignoring exemption caps
    #[default]
    Equity,
    /// Recorded transaction price, where one exists
    Sales,
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "equity" => Ok(Strategy::Equity),
            "sales" => Ok(Strategy::Sales),
            other => Err(format!("unknown strategy '{}', expected equity or sales", other)),
        }
    }
}

/// Real-property record, used both for the subject and for pool candidates
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    pub account: String,
    #[serde(default)]
    pub land_use: Option<String>,
    #[serde(default)]
    pub neighborhood_code: Option<String>,
    #[serde(default)]
    pub site_address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub zip_code: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    /// Living area in square feet
    #[serde(default)]
    pub living_area: Option<f64>,
    /// Lot area in square feet
    #[serde(default)]
    pub lot_area: Option<f64>,
    #[serde(default)]
    pub year_built: Option<i32>,
    #[serde(default)]
    pub stories: Option<f64>,
    #[serde(default)]
    pub quality: Option<QualityClass>,
    #[serde(default)]
    pub condition: Option<Condition>,
    #[serde(default)]
    pub bedrooms: Option<u32>,
    #[serde(default)]
    pub bathrooms: Option<f64>,
    #[serde(default)]
    pub garage_spaces: Option<u32>,
    #[serde(default)]
    pub has_pool: Option<bool>,
    #[serde(default)]
    pub market_value: Option<f64>,
    #[serde(default)]
    pub sale_price: Option<f64>,
}

/// The record comparables are searched for
pub type SubjectProperty = Property;

/// A record from the candidate pool
pub type CandidateProperty = Property;

impl Property {
    /// Both coordinates, when present and finite
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => Some((lat, lon)),
            _ => None,
        }
    }

    /// Numeric projection of an attribute family.
    ///
    /// Zero or negative magnitudes (areas, years, stories) are treated as
    /// unknown. Ordinals project to their rank, booleans to 0/1.
    pub fn attribute(&self, attribute: Attribute) -> Option<f64> {
        let positive = |v: f64| if v > 0.0 && v.is_finite() { Some(v) } else { None };

        match attribute {
            Attribute::Geography => None,
            Attribute::LivingArea => self.living_area.and_then(positive),
            Attribute::LotArea => self.lot_area.and_then(positive),
            Attribute::YearBuilt => self.year_built.map(f64::from).and_then(positive),
            Attribute::Stories => self.stories.and_then(positive),
            Attribute::Quality => self.quality.map(|q| f64::from(q.rank())),
            Attribute::Condition => self.condition.map(|c| f64::from(c.rank())),
            Attribute::Bedrooms => self.bedrooms.map(f64::from),
            Attribute::Bathrooms => self.bathrooms.filter(|v| v.is_finite() && *v >= 0.0),
            Attribute::Garage => self.garage_spaces.map(f64::from),
            Attribute::Pool => self.has_pool.map(|p| if p { 1.0 } else { 0.0 }),
        }
    }

    pub fn has_garage(&self) -> Option<bool> {
        self.garage_spaces.map(|n| n > 0)
    }

    /// Value used for pricing under the given strategy
    pub fn value(&self, strategy: Strategy) -> Option<f64> {
        let raw = match strategy {
            Strategy::Equity => self.market_value,
            Strategy::Sales => self.sale_price,
        };
        raw.filter(|v| *v > 0.0 && v.is_finite())
    }

    /// Value per square foot of living area
    pub fn value_per_sqft(&self, strategy: Strategy) -> Option<f64> {
        let value = self.value(strategy)?;
        let area = self.attribute(Attribute::LivingArea)?;
        Some(value / area)
    }
}

/// Monotonic marker of the underlying data; any write moves it forward.
///
/// Cached results are only served while the version they were computed
/// against is still current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct DataVersion(pub i64);

impl fmt::Display for DataVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Geospatial bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

/// Relaxation step at which a candidate was first admitted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionTier {
    /// Position in the overall relaxation sequence, starting at 0
    pub step: usize,
    pub geography_tier: usize,
    pub physical_tier: usize,
    pub geography_label: String,
}

/// Difference between a candidate attribute and the subject's
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeDelta {
    /// candidate - subject
    pub absolute: f64,
    /// Relative to the subject value, in percent; absent when the subject value is 0
    pub percent: Option<f64>,
}

/// An admitted candidate with its admission tier and deltas against the subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRecord {
    pub candidate: CandidateProperty,
    pub tier: AdmissionTier,
    pub distance_miles: Option<f64>,
    pub deltas: BTreeMap<Attribute, AttributeDelta>,
}

impl MatchRecord {
    pub fn account(&self) -> &str {
        &self.candidate.account
    }
}

/// Per-attribute normalized penalties plus the weighted composite.
///
/// Attributes missing on either side are absent from `deviations`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    pub deviations: BTreeMap<Attribute, f64>,
    /// Weighted average of `deviations`, in [0, 1]; lower is more similar
    pub composite: f64,
}

/// Descriptive statistics over a series of values
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueStats {
    pub count: usize,
    pub mean: Option<f64>,
    pub median: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub p25: Option<f64>,
    pub p75: Option<f64>,
    pub iqr: Option<f64>,
    pub range: Option<f64>,
    pub std_dev: Option<f64>,
    /// Coefficient of variation (std_dev / mean)
    pub cv: Option<f64>,
}

/// Subject value relative to a comparable distribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectComparison {
    pub diff_vs_median: Option<f64>,
    pub pct_vs_median: Option<f64>,
    pub diff_vs_mean: Option<f64>,
    pub pct_vs_mean: Option<f64>,
}

/// Comparables whose PPSF lies within a band around the subject's PPSF
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PpsfBandCounts {
    pub within_5pct: usize,
    pub within_10pct: usize,
    pub within_15pct: usize,
}

/// Pricing dispersion over the ranked comparables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingSummary {
    pub strategy: Strategy,
    /// Comparables that contributed a value
    pub count: usize,
    pub median: Option<f64>,
    pub p25: Option<f64>,
    pub p75: Option<f64>,
    pub subject_value: Option<f64>,
    /// (subject - median) / median * 100
    pub subject_deviation_pct: Option<f64>,
    pub value_stats: ValueStats,
    pub ppsf_stats: ValueStats,
    pub subject_ppsf: Option<f64>,
    pub subject_vs_value: Option<SubjectComparison>,
    pub subject_vs_ppsf: Option<SubjectComparison>,
    pub ppsf_band_counts: Option<PpsfBandCounts>,
    pub pool_match_rate: Option<f64>,
    pub garage_match_rate: Option<f64>,
    pub trimmed_ppsf_median: Option<f64>,
}
