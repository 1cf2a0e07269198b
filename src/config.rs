use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

use crate::models::Attribute;

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub matching: MatchingSettings,
    #[serde(default)]
    pub scoring: ScoringSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: Option<u32>,
    pub min_connections: Option<u32>,
    pub acquire_timeout_secs: Option<u64>,
    pub idle_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    /// Shared L2 tier; in-process only when unset
    pub redis_url: Option<String>,
    pub ttl_secs: Option<u64>,
    pub l1_cache_size: Option<u64>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            redis_url: None,
            ttl_secs: None,
            l1_cache_size: None,
        }
    }
}

fn default_cache_enabled() -> bool { true }

#[derive(Debug, Clone, Deserialize)]
pub struct MatchingSettings {
    pub min_comps: Option<usize>,
    pub max_comps: Option<usize>,
    /// Land-use code of the comparable class (single-family residential)
    #[serde(default = "default_land_use_code")]
    pub land_use_code: String,
    /// TOML band table replacing the built-in one
    pub bands_file: Option<String>,
    pub max_radius_miles: Option<f64>,
}

impl Default for MatchingSettings {
    fn default() -> Self {
        Self {
            min_comps: None,
            max_comps: None,
            land_use_code: default_land_use_code(),
            bands_file: None,
            max_radius_miles: None,
        }
    }
}

fn default_land_use_code() -> String { "A1".to_string() }

/// Scoring overrides; anything unset keeps the band table's values
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScoringSettings {
    pub weights: Option<WeightsConfig>,
    pub class_step_penalty: Option<f64>,
    pub presence_penalty: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeightsConfig {
    #[serde(default = "default_geography_weight")]
    pub geography: f64,
    #[serde(default = "default_living_area_weight")]
    pub living_area: f64,
    #[serde(default = "default_year_built_weight")]
    pub year_built: f64,
    #[serde(default = "default_lot_area_weight")]
    pub lot_area: f64,
    #[serde(default = "default_quality_weight")]
    pub quality: f64,
    #[serde(default = "default_condition_weight")]
    pub condition: f64,
    #[serde(default = "default_room_weight")]
    pub bedrooms: f64,
    #[serde(default = "default_room_weight")]
    pub bathrooms: f64,
    #[serde(default = "default_room_weight")]
    pub stories: f64,
    #[serde(default = "default_amenity_weight")]
    pub garage: f64,
    #[serde(default = "default_amenity_weight")]
    pub pool: f64,
}

impl Default for WeightsConfig {
    fn default() -> Self {
        Self {
            geography: default_geography_weight(),
            living_area: default_living_area_weight(),
            year_built: default_year_built_weight(),
            lot_area: default_lot_area_weight(),
            quality: default_quality_weight(),
            condition: default_condition_weight(),
            bedrooms: default_room_weight(),
            bathrooms: default_room_weight(),
            stories: default_room_weight(),
            garage: default_amenity_weight(),
            pool: default_amenity_weight(),
        }
    }
}

impl WeightsConfig {
    pub fn pairs(&self) -> Vec<(Attribute, f64)> {
        vec![
            (Attribute::Geography, self.geography),
            (Attribute::LivingArea, self.living_area),
            (Attribute::YearBuilt, self.year_built),
            (Attribute::LotArea, self.lot_area),
            (Attribute::Quality, self.quality),
            (Attribute::Condition, self.condition),
            (Attribute::Bedrooms, self.bedrooms),
            (Attribute::Bathrooms, self.bathrooms),
            (Attribute::Stories, self.stories),
            (Attribute::Garage, self.garage),
            (Attribute::Pool, self.pool),
        ]
    }
}

fn default_geography_weight() -> f64 { 0.30 }
fn default_living_area_weight() -> f64 { 0.25 }
fn default_year_built_weight() -> f64 { 0.10 }
fn default_lot_area_weight() -> f64 { 0.08 }
fn default_quality_weight() -> f64 { 0.06 }
fn default_condition_weight() -> f64 { 0.05 }
fn default_room_weight() -> f64 { 0.04 }
fn default_amenity_weight() -> f64 { 0.02 }

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "compact".to_string() }

fn environment() -> Environment {
    // e.g., COMPS__MATCHING__MIN_COMPS -> matching.min_comps
    Environment::with_prefix("COMPS")
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}

impl Settings {
    /// Load configuration from file and environment variables
    ///
    /// Configuration is loaded in the following order (later overrides earlier):
    /// 1. Default values in the struct
    /// 2. Configuration file (config/default.toml)
    /// 3. Local overrides (config/local.toml)
    /// 4. Environment variables (prefixed with COMPS__)
    /// 5. DATABASE_URL / REDIS_URL
    pub fn load() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(environment())
            .build()?;

        let settings: Settings = substitute_env_vars(settings)?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load configuration from a custom path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(environment())
            .build()?;

        let settings: Settings = substitute_env_vars(settings)?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Cross-field checks the serde shape cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        let matching = &self.matching;
        if matching.min_comps == Some(0) || matching.max_comps == Some(0) {
            return Err(ConfigError::Message("matching.min_comps and max_comps must be at least 1".to_string()));
        }
        if let (Some(min), Some(max)) = (matching.min_comps, matching.max_comps) {
            if max < min {
                return Err(ConfigError::Message(format!(
                    "matching.max_comps ({}) is below matching.min_comps ({})",
                    max, min
                )));
            }
        }
        if let Some(radius) = matching.max_radius_miles {
            if !(radius > 0.0) {
                return Err(ConfigError::Message("matching.max_radius_miles must be positive".to_string()));
            }
        }
        if matching.land_use_code.trim().is_empty() {
            return Err(ConfigError::Message("matching.land_use_code must not be empty".to_string()));
        }
        if self.cache.l1_cache_size == Some(0) {
            return Err(ConfigError::Message("cache.l1_cache_size must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Apply the conventional unprefixed variables on top of the layered config
fn substitute_env_vars(settings: Config) -> Result<Config, ConfigError> {
    use std::env;

    // DATABASE_URL wins over COMPS__DATABASE__URL and the files
    let database_url = env::var("DATABASE_URL").ok().or_else(|| settings.get_string("database.url").ok());
    let redis_url = env::var("REDIS_URL").ok();

    let mut builder = Config::builder()
        .add_source(settings)
        .set_default("database.url", "postgres://localhost:5432/comps")?;

    if let Some(url) = database_url {
        builder = builder.set_override("database.url", url)?;
    }
    if let Some(url) = redis_url {
        builder = builder.set_override("cache.redis_url", url)?;
    }

    builder.build()
}
