// Core algorithm exports
pub mod bands;
pub mod distance;
pub mod engine;
pub mod filters;
pub mod pricing;
pub mod relaxation;
pub mod scoring;

pub use bands::{AttributeBands, BandConfig, BandConfigError, Comparison, GeographyBands, PhysicalTier};
pub use distance::{calculate_bounding_box, haversine_miles, is_within_bounding_box, property_distance};
pub use engine::{ComparablesEngine, EngineConfig, EngineError};
pub use filters::{geography_ladder, CandidateFilter, GeoRule, GeoTier, PoolQuery};
pub use relaxation::{RelaxationDriver, RelaxationOutcome, TierStep};
pub use scoring::SimilarityScorer;
