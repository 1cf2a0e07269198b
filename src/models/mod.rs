// Model exports
pub mod domain;
pub mod requests;
pub mod responses;

pub use domain::{
    AdmissionTier, Attribute, AttributeDelta, BoundingBox, CandidateProperty, Condition, DataVersion, MatchRecord,
    PpsfBandCounts, PricingSummary, Property, QualityClass, ScoreBreakdown, Strategy, SubjectComparison,
    SubjectProperty, ValueStats,
};
pub use requests::{ComparablesOptions, SearchParameters};
pub use responses::{ComparablesResult, ExportRow, RankedComparable, SearchSummary};
