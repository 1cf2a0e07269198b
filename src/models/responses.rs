use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::domain::{
    Attribute, DataVersion, MatchRecord, PricingSummary, ScoreBreakdown, SubjectProperty,
};
use crate::models::requests::SearchParameters;

/// One ranked comparable, 1-based
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedComparable {
    pub rank: usize,
    pub record: MatchRecord,
    pub score: ScoreBreakdown,
}

/// How the relaxation search went
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchSummary {
    pub parameters: SearchParameters,
    pub steps_evaluated: usize,
    pub steps_available: usize,
    /// Distinct candidates admitted before truncation to `max_comps`
    pub admitted: usize,
    /// False when every tier was exhausted below `min_comps`
    pub floor_met: bool,
    pub terminal_geography: Option<String>,
    pub terminal_physical_tier: Option<usize>,
    /// Per-family band labels at the strictest tier
    pub baseline: BTreeMap<Attribute, String>,
    /// Per-family band labels at the terminal tier
    pub terminal: BTreeMap<Attribute, String>,
    /// Families whose terminal band is looser than baseline
    pub relaxed: BTreeMap<Attribute, bool>,
    pub data_version: DataVersion,
    pub generated_at: DateTime<Utc>,
}

/// Full pipeline output for one subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparablesResult {
    pub subject: SubjectProperty,
    pub comparables: Vec<RankedComparable>,
    pub pricing: PricingSummary,
    pub search: SearchSummary,
}

/// Flat row for export collaborators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRow {
    pub rank: usize,
    pub account: String,
    pub score: f64,
    pub site_address: Option<String>,
    pub value: Option<f64>,
    pub living_area: Option<f64>,
    pub lot_area: Option<f64>,
    pub value_per_sqft: Option<f64>,
    pub year_built: Option<i32>,
    pub bedrooms: Option<u32>,
    pub bathrooms: Option<f64>,
    pub stories: Option<f64>,
    pub has_pool: Option<bool>,
    pub garage_spaces: Option<u32>,
    pub distance_miles: Option<f64>,
    pub geography_tier: String,
}

impl ComparablesResult {
    /// Every tier was exhausted without reaching `min_comps`
    pub fn insufficient(&self) -> bool {
        !self.search.floor_met
    }

    pub fn len(&self) -> usize {
        self.comparables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.comparables.is_empty()
    }

    pub fn accounts(&self) -> Vec<&str> {
        self.comparables.iter().map(|c| c.record.account()).collect()
    }

    /// Ranked comparables as flat rows, values per the search strategy
    pub fn export_rows(&self) -> Vec<ExportRow> {
        let strategy = self.search.parameters.strategy;
        let round = |v: f64| (v * 100.0).round() / 100.0;

        self.comparables
            .iter()
            .map(|ranked| {
                let c = &ranked.record.candidate;
                ExportRow {
                    rank: ranked.rank,
                    account: c.account.clone(),
                    score: (ranked.score.composite * 10000.0).round() / 10000.0,
                    site_address: c.site_address.clone(),
                    value: c.value(strategy),
                    living_area: c.living_area,
                    lot_area: c.lot_area,
                    value_per_sqft: c.value_per_sqft(strategy).map(round),
                    year_built: c.year_built,
                    bedrooms: c.bedrooms,
                    bathrooms: c.bathrooms,
                    stories: c.stories,
                    has_pool: c.has_pool,
                    garage_spaces: c.garage_spaces,
                    distance_miles: ranked.record.distance_miles.map(round),
                    geography_tier: ranked.record.tier.geography_label.clone(),
                }
            })
            .collect()
    }
}
