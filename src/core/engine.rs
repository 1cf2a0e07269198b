//! Comparables pipeline: fetch subject, relax tier by tier against the
//! store, rank, truncate, price, and cache.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use validator::Validate;

use crate::config::{MatchingSettings, ScoringSettings};
use crate::core::bands::{BandConfig, BandConfigError, PhysicalTier};
use crate::core::pricing;
use crate::core::relaxation::{RelaxationDriver, RelaxationOutcome};
use crate::core::scoring::SimilarityScorer;
use crate::models::{
    Attribute, ComparablesOptions, ComparablesResult, DataVersion, RankedComparable, SearchParameters,
    SearchSummary, SubjectProperty,
};
use crate::services::cache::{fingerprint, CacheKey, ResultCache};
use crate::services::store::{PropertyStore, StoreError};

/// Errors surfaced by [`ComparablesEngine::get_comparables`]
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Subject not found: {0}")]
    SubjectNotFound(String),

    #[error("Data source unavailable: {0}")]
    DataSourceUnavailable(#[from] StoreError),

    #[error("Invalid options: {0}")]
    InvalidOptions(#[from] validator::ValidationErrors),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] BandConfigError),
}

/// Everything that shapes a result apart from the request options
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub bands: BandConfig,
    pub land_use_code: String,
    pub default_min_comps: usize,
    pub default_max_comps: usize,
    pub max_radius_miles: Option<f64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bands: BandConfig::default(),
            land_use_code: "A1".to_string(),
            default_min_comps: 3,
            default_max_comps: 7,
            max_radius_miles: None,
        }
    }
}

impl EngineConfig {
    /// Build from settings: band table file (or built-in), then weight and
    /// penalty overrides
    pub fn from_settings(matching: &MatchingSettings, scoring: &ScoringSettings) -> Result<Self, EngineError> {
        let mut bands = match &matching.bands_file {
            Some(path) => {
                tracing::info!("Loading band table from {}", path);
                BandConfig::from_file(path)?
            }
            None => BandConfig::default(),
        };

        if let Some(weights) = &scoring.weights {
            bands = bands.with_weights(weights.pairs())?;
        }
        if scoring.class_step_penalty.is_some() || scoring.presence_penalty.is_some() {
            bands = bands.with_penalties(
                scoring.class_step_penalty.unwrap_or_else(|| bands.class_step_penalty()),
                scoring.presence_penalty.unwrap_or_else(|| bands.presence_penalty()),
            )?;
        }

        let defaults = Self::default();
        Ok(Self {
            bands,
            land_use_code: matching.land_use_code.trim().to_string(),
            default_min_comps: matching.min_comps.unwrap_or(defaults.default_min_comps),
            default_max_comps: matching.max_comps.unwrap_or(defaults.default_max_comps),
            max_radius_miles: matching.max_radius_miles,
        })
    }

    pub fn resolve(&self, options: &ComparablesOptions) -> SearchParameters {
        options.resolve(
            self.default_min_comps,
            self.default_max_comps,
            self.max_radius_miles,
            &self.land_use_code,
        )
    }
}

#[derive(Serialize)]
struct FingerprintInput<'a> {
    parameters: &'a SearchParameters,
    bands: &'a BandConfig,
}

/// Entry point for comparables lookups.
///
/// Holds no per-request state; one engine serves concurrent requests.
pub struct ComparablesEngine<S: PropertyStore> {
    store: Arc<S>,
    config: Arc<EngineConfig>,
    cache: Option<Arc<ResultCache>>,
}

impl<S: PropertyStore> Clone for ComparablesEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            config: self.config.clone(),
            cache: self.cache.clone(),
        }
    }
}

impl<S: PropertyStore> ComparablesEngine<S> {
    pub fn new(store: Arc<S>, config: EngineConfig) -> Self {
        Self {
            store,
            config: Arc::new(config),
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn cache(&self) -> Option<&ResultCache> {
        self.cache.as_deref()
    }

    /// Ranked comparables and pricing summary for one subject.
    ///
    /// Falling short of `min_comps` is not an error: the result carries
    /// whatever was found with `search.floor_met = false`.
    pub async fn get_comparables(
        &self,
        subject_id: &str,
        options: &ComparablesOptions,
    ) -> Result<ComparablesResult, EngineError> {
        options.validate()?;
        let params = self.config.resolve(options);
        let subject_id = subject_id.trim();

        let version = self.store.data_version().await?;

        let Some(cache) = &self.cache else {
            return self.compute(subject_id, &params, version).await;
        };

        let input = FingerprintInput { parameters: &params, bands: &self.config.bands };
        let key = match fingerprint(&input) {
            Ok(fp) => CacheKey::new(subject_id, fp),
            Err(e) => {
                tracing::warn!("Bypassing cache, fingerprint failed: {}", e);
                return self.compute(subject_id, &params, version).await;
            }
        };

        cache
            .get_or_compute(&key, version, || self.compute(subject_id, &params, version))
            .await
    }

    async fn compute(
        &self,
        subject_id: &str,
        params: &SearchParameters,
        version: DataVersion,
    ) -> Result<ComparablesResult, EngineError> {
        let subject = self
            .store
            .fetch_subject(subject_id)
            .await?
            .ok_or_else(|| EngineError::SubjectNotFound(subject_id.to_string()))?;

        tracing::info!(
            "Searching comparables for {} (min {}, max {}, {:?})",
            subject.account,
            params.min_comps,
            params.max_comps,
            params.strategy
        );

        let outcome = self.relax(&subject, params).await?;
        Ok(self.assemble(subject, params, outcome, version))
    }

    async fn relax(
        &self,
        subject: &SubjectProperty,
        params: &SearchParameters,
    ) -> Result<RelaxationOutcome, StoreError> {
        let bands = &self.config.bands;
        let radius_tiers = bands.radius_tiers(params.max_radius_miles);
        let mut driver = RelaxationDriver::new(
            subject,
            bands,
            &params.land_use_code,
            &radius_tiers,
            params.min_comps,
        );

        while let Some((step, query)) = driver.next_query() {
            let rows = self.store.query_pool(&query).await?;
            driver.admit(step, &query, rows);
        }

        let outcome = driver.finish();
        if outcome.floor_met() {
            tracing::debug!(
                "Floor of {} met after {} of {} steps",
                outcome.min_comps,
                outcome.steps_evaluated,
                outcome.steps_available
            );
        } else {
            tracing::info!(
                "Tiers exhausted with {} of {} comparables for {}",
                outcome.records.len(),
                outcome.min_comps,
                subject.account
            );
        }
        Ok(outcome)
    }

    fn assemble(
        &self,
        subject: SubjectProperty,
        params: &SearchParameters,
        outcome: RelaxationOutcome,
        version: DataVersion,
    ) -> ComparablesResult {
        let bands = &self.config.bands;
        let floor_met = outcome.floor_met();
        let admitted = outcome.records.len();

        let mut ranked = SimilarityScorer::new(bands).rank(&subject, outcome.records);
        ranked.truncate(params.max_comps);

        let comparables: Vec<RankedComparable> = ranked
            .into_iter()
            .enumerate()
            .map(|(i, (record, score))| RankedComparable { rank: i + 1, record, score })
            .collect();

        let pricing = pricing::summarize(
            &subject,
            comparables.iter().map(|c| &c.record.candidate),
            params.strategy,
        );

        let labels = |tier: &PhysicalTier| -> BTreeMap<Attribute, String> {
            tier.windows.iter().map(|(a, c)| (*a, c.label())).collect()
        };
        let baseline_tier = bands.physical_tier(0);
        let terminal_tier = outcome.terminal_physical.clone().unwrap_or_else(|| baseline_tier.clone());
        let relaxed = baseline_tier
            .windows
            .iter()
            .map(|(a, c)| (*a, terminal_tier.comparison(*a) != *c))
            .collect();

        let search = SearchSummary {
            parameters: params.clone(),
            steps_evaluated: outcome.steps_evaluated,
            steps_available: outcome.steps_available,
            admitted,
            floor_met,
            terminal_geography: outcome.terminal_geography,
            terminal_physical_tier: outcome.terminal.map(|t| t.physical),
            baseline: labels(&baseline_tier),
            terminal: labels(&terminal_tier),
            relaxed,
            data_version: version,
            generated_at: chrono::Utc::now(),
        };

        tracing::info!(
            "Returning {} comparables for {} (median {:?})",
            comparables.len(),
            subject.account,
            pricing.median
        );

        ComparablesResult { subject, comparables, pricing, search }
    }
}
