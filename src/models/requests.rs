use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::models::domain::Strategy;

/// Caller-supplied overrides for a comparables lookup.
///
/// Unset counts fall back to the engine defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_comp_bounds"))]
#[serde(rename_all = "camelCase")]
pub struct ComparablesOptions {
    #[validate(range(min = 1, max = 100))]
    #[serde(default)]
    pub min_comps: Option<usize>,
    #[validate(range(min = 1, max = 100))]
    #[serde(default)]
    pub max_comps: Option<usize>,
    #[serde(default)]
    pub strategy: Strategy,
    /// Drops radius tiers wider than this many miles
    #[validate(range(exclusive_min = 0.0))]
    #[serde(default)]
    pub max_radius_miles: Option<f64>,
}

impl ComparablesOptions {
    pub fn with_min_comps(mut self, min_comps: usize) -> Self {
        self.min_comps = Some(min_comps);
        self
    }

    pub fn with_max_comps(mut self, max_comps: usize) -> Self {
        self.max_comps = Some(max_comps);
        self
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_max_radius(mut self, miles: f64) -> Self {
        self.max_radius_miles = Some(miles);
        self
    }
}

/// Options with defaults applied. Feeds the cache fingerprint and is
/// echoed back in the search summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParameters {
    pub min_comps: usize,
    pub max_comps: usize,
    pub strategy: Strategy,
    pub max_radius_miles: Option<f64>,
    pub land_use_code: String,
}

impl ComparablesOptions {
    /// Fill unset fields from engine defaults.
    ///
    /// An unset `max_comps` never falls below the requested `min_comps`.
    pub fn resolve(
        &self,
        default_min: usize,
        default_max: usize,
        default_radius: Option<f64>,
        land_use_code: &str,
    ) -> SearchParameters {
        let min_comps = self.min_comps.unwrap_or(default_min);
        let max_comps = self.max_comps.unwrap_or_else(|| default_max.max(min_comps));

        SearchParameters {
            min_comps,
            max_comps,
            strategy: self.strategy,
            max_radius_miles: self.max_radius_miles.or(default_radius),
            land_use_code: land_use_code.trim().to_string(),
        }
    }
}

fn validate_comp_bounds(options: &ComparablesOptions) -> Result<(), ValidationError> {
    if let (Some(min), Some(max)) = (options.min_comps, options.max_comps) {
        if max < min {
            return Err(ValidationError::new("max_comps_below_min_comps"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_are_valid() {
        assert!(ComparablesOptions::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_inverted_bounds() {
        let options = ComparablesOptions::default().with_min_comps(8).with_max_comps(4);
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_min_comps() {
        let options = ComparablesOptions::default().with_min_comps(0);
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_resolve_applies_defaults() {
        let params = ComparablesOptions::default().resolve(3, 7, None, " A1 ");
        assert_eq!(params.min_comps, 3);
        assert_eq!(params.max_comps, 7);
        assert_eq!(params.strategy, Strategy::Equity);
        assert_eq!(params.land_use_code, "A1");

        let raised = ComparablesOptions::default().with_min_comps(10).resolve(3, 7, Some(5.0), "A1");
        assert_eq!(raised.max_comps, 10);
        assert_eq!(raised.max_radius_miles, Some(5.0));

        let explicit = ComparablesOptions::default().with_max_radius(3.0).resolve(3, 7, Some(5.0), "A1");
        assert_eq!(explicit.max_radius_miles, Some(3.0));
    }

    #[test]
    fn test_deserializes_camel_case() {
        let options: ComparablesOptions =
            serde_json::from_str(r#"{"minComps": 5, "maxComps": 9, "strategy": "sales"}"#).unwrap();
        assert_eq!(options.min_comps, Some(5));
        assert_eq!(options.max_comps, Some(9));
        assert_eq!(options.strategy, Strategy::Sales);
        assert_eq!(options.max_radius_miles, None);
    }
}
