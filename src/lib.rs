//! Comps Engine - comparable property search for real-property valuation
//!
//! Given a subject property, finds similar properties in a candidate pool
//! by relaxing geography and physical similarity bands tier by tier until
//! enough comparables are found, ranks them by a weighted penalty score,
//! and summarizes their pricing.

pub mod config;
pub mod core;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use core::{BandConfig, ComparablesEngine, EngineConfig, EngineError};
pub use models::{ComparablesOptions, ComparablesResult, Property, Strategy};
pub use services::{MemoryStore, PostgresStore, PropertyStore, ResultCache};
