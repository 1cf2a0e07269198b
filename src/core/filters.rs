use std::collections::BTreeSet;

use serde::Serialize;

use crate::core::bands::{Comparison, PhysicalTier};
use crate::core::distance::{calculate_bounding_box, haversine_miles, is_within_bounding_box};
use crate::models::{Attribute, BoundingBox, CandidateProperty, SubjectProperty};

/// One geographic admission rule
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "rule", content = "value", rename_all = "snake_case")]
pub enum GeoRule {
    /// Same neighborhood code; both sides must have one
    Neighborhood(String),
    /// Within this many miles; both sides must have coordinates
    Radius(f64),
    /// Same ZIP, only when coordinates are absent on either side
    ZipCode(String),
    /// Same city, only when coordinates are absent on either side
    City(String),
}

impl GeoRule {
    pub fn label(&self) -> String {
        match self {
            GeoRule::Neighborhood(_) => "neighborhood".to_string(),
            GeoRule::Radius(miles) => format!("radius {}mi", miles),
            GeoRule::ZipCode(_) => "zip".to_string(),
            GeoRule::City(_) => "city".to_string(),
        }
    }

    fn matches(&self, origin: Option<(f64, f64)>, candidate: &CandidateProperty) -> bool {
        let target = candidate.coordinates();
        match self {
            GeoRule::Neighborhood(code) => candidate
                .neighborhood_code
                .as_deref()
                .map(|c| c.trim() == code)
                .unwrap_or(false),
            GeoRule::Radius(miles) => match (origin, target) {
                (Some((lat1, lon1)), Some((lat2, lon2))) => haversine_miles(lat1, lon1, lat2, lon2) <= *miles,
                _ => false,
            },
            GeoRule::ZipCode(zip) => {
                (origin.is_none() || target.is_none())
                    && candidate.zip_code.as_deref().map(|z| z.trim() == zip).unwrap_or(false)
            }
            GeoRule::City(city) => {
                (origin.is_none() || target.is_none())
                    && candidate
                        .city
                        .as_deref()
                        .map(|c| c.trim().eq_ignore_ascii_case(city))
                        .unwrap_or(false)
            }
        }
    }
}

/// A geography tier. Rules accumulate down the ladder and are OR-ed, so
/// each tier admits everything the tier before it admits.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoTier {
    pub index: usize,
    pub rules: Vec<GeoRule>,
}

impl GeoTier {
    /// Label of the rule this tier introduced
    pub fn label(&self) -> String {
        self.rules.last().map(GeoRule::label).unwrap_or_else(|| "none".to_string())
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

/// Build the geography ladder for a subject, strictest tier first.
///
/// Neighborhood (if the subject has a code), one tier per radius (if the
/// subject has coordinates), then ZIP and city fallbacks.
pub fn geography_ladder(subject: &SubjectProperty, radius_tiers: &[f64]) -> Vec<GeoTier> {
    let mut steps = Vec::new();

    if let Some(code) = non_blank(&subject.neighborhood_code) {
        steps.push(GeoRule::Neighborhood(code));
    }
    if subject.coordinates().is_some() {
        steps.extend(radius_tiers.iter().map(|r| GeoRule::Radius(*r)));
    }
    if let Some(zip) = non_blank(&subject.zip_code) {
        steps.push(GeoRule::ZipCode(zip));
    }
    if let Some(city) = non_blank(&subject.city) {
        steps.push(GeoRule::City(city));
    }

    (0..steps.len())
        .map(|index| GeoTier { index, rules: steps[..=index].to_vec() })
        .collect()
}

/// A bounded comparison for one attribute, anchored at the subject's value
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeWindow {
    pub attribute: Attribute,
    pub comparison: Comparison,
    pub subject_value: f64,
}

impl AttributeWindow {
    /// Missing candidate values always pass
    pub fn admits(&self, candidate: &CandidateProperty) -> bool {
        candidate
            .attribute(self.attribute)
            .map(|value| self.comparison.admits(self.subject_value, value))
            .unwrap_or(true)
    }
}

/// Predicate description handed to the storage collaborator.
///
/// Conjunction of: land use, exclusions, any geography rule, and every
/// attribute window.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolQuery {
    pub land_use: String,
    pub exclude_accounts: BTreeSet<String>,
    pub origin: Option<(f64, f64)>,
    pub geography: Vec<GeoRule>,
    /// Covers the widest radius rule, for index-friendly pre-filtering
    pub bounding_box: Option<BoundingBox>,
    pub windows: Vec<AttributeWindow>,
}

impl PoolQuery {
    /// Evaluate the full predicate against one candidate
    pub fn matches(&self, candidate: &CandidateProperty) -> bool {
        if self.exclude_accounts.contains(&candidate.account) {
            return false;
        }

        let land_use_ok = candidate
            .land_use
            .as_deref()
            .map(|l| l.trim().eq_ignore_ascii_case(&self.land_use))
            .unwrap_or(false);
        if !land_use_ok {
            return false;
        }

        if !self.geography.iter().any(|rule| rule.matches(self.origin, candidate)) {
            return false;
        }

        self.windows.iter().all(|window| window.admits(candidate))
    }

    /// Cheap rectangular check used before exact distances
    pub fn within_bounding_box(&self, candidate: &CandidateProperty) -> bool {
        match (self.bounding_box, candidate.coordinates()) {
            (Some(bbox), Some((lat, lon))) => is_within_bounding_box(lat, lon, &bbox),
            _ => false,
        }
    }

    /// Apply the predicate to an in-memory pool
    pub fn filter<'p, I>(&self, pool: I) -> Vec<CandidateProperty>
    where
        I: IntoIterator<Item = &'p CandidateProperty>,
    {
        pool.into_iter().filter(|c| self.matches(c)).cloned().collect()
    }
}

/// Builds tier predicates for one subject. Stateless: the same inputs
/// always produce the same query.
#[derive(Debug, Clone, Copy)]
pub struct CandidateFilter<'a> {
    subject: &'a SubjectProperty,
    land_use: &'a str,
}

impl<'a> CandidateFilter<'a> {
    pub fn new(subject: &'a SubjectProperty, land_use: &'a str) -> Self {
        Self { subject, land_use }
    }

    pub fn subject(&self) -> &SubjectProperty {
        self.subject
    }

    /// Predicate for a (geography tier, physical tier) pair.
    ///
    /// The subject is always excluded, plus anything in `already_admitted`.
    pub fn query<I>(&self, geo: &GeoTier, physical: &PhysicalTier, already_admitted: I) -> PoolQuery
    where
        I: IntoIterator<Item = String>,
    {
        let origin = self.subject.coordinates();

        let mut exclude_accounts: BTreeSet<String> = already_admitted.into_iter().collect();
        exclude_accounts.insert(self.subject.account.clone());

        let widest_radius = geo
            .rules
            .iter()
            .filter_map(|r| match r {
                GeoRule::Radius(miles) => Some(*miles),
                _ => None,
            })
            .reduce(f64::max);
        let bounding_box = match (origin, widest_radius) {
            (Some((lat, lon)), Some(miles)) => Some(calculate_bounding_box(lat, lon, miles)),
            _ => None,
        };

        // Attributes missing on the subject are skipped entirely
        let windows = physical
            .windows
            .iter()
            .filter(|(_, comparison)| !comparison.is_unbounded())
            .filter_map(|(attribute, comparison)| {
                self.subject.attribute(*attribute).map(|subject_value| AttributeWindow {
                    attribute: *attribute,
                    comparison: *comparison,
                    subject_value,
                })
            })
            .collect();

        PoolQuery {
            land_use: self.land_use.trim().to_string(),
            exclude_accounts,
            origin,
            geography: geo.rules.clone(),
            bounding_box,
            windows,
        }
    }

    /// Tier predicate applied directly to an in-memory pool
    pub fn filter(
        &self,
        pool: &[CandidateProperty],
        geo: &GeoTier,
        physical: &PhysicalTier,
    ) -> Vec<CandidateProperty> {
        self.query(geo, physical, std::iter::empty()).filter(pool)
    }
}
