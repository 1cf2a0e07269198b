use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use std::time::Duration;

use crate::config::DatabaseSettings;
use crate::core::bands::Comparison;
use crate::core::distance::calculate_bounding_box;
use crate::core::filters::{AttributeWindow, GeoRule, PoolQuery};
use crate::models::{Attribute, CandidateProperty, Condition, Property, QualityClass, SubjectProperty};
use crate::services::store::{DataVersion, PropertyStore, StoreError};

/// Slack added to range bounds so float rounding never drops a row;
/// the engine re-checks every row exactly.
const RANGE_SLACK: f64 = 1e-6;

const PROPERTY_COLUMNS: &str = r#"
    account, land_use, neighborhood_code, site_address, city, zip_code,
    latitude, longitude, living_area, lot_area, year_built, stories,
    quality_code, condition_code, bedrooms, bathrooms, garage_spaces,
    has_pool, market_value, sale_price
"#;

/// Raw row of the `comparable_properties` view
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PropertyRow {
    pub account: String,
    pub land_use: Option<String>,
    pub neighborhood_code: Option<String>,
    pub site_address: Option<String>,
    pub city: Option<String>,
    pub zip_code: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub living_area: Option<f64>,
    pub lot_area: Option<f64>,
    pub year_built: Option<i32>,
    pub stories: Option<f64>,
    pub quality_code: Option<String>,
    pub condition_code: Option<String>,
    pub bedrooms: Option<i32>,
    pub bathrooms: Option<f64>,
    pub garage_spaces: Option<i32>,
    pub has_pool: Option<bool>,
    pub market_value: Option<f64>,
    pub sale_price: Option<f64>,
}

fn parse_code<T: std::str::FromStr<Err = String>>(
    account: &str,
    code: Option<String>,
) -> Result<Option<T>, StoreError> {
    match code.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        Some(code) => code.parse().map(Some).map_err(|message| StoreError::InvalidRow {
            account: account.to_string(),
            message,
        }),
        None => Ok(None),
    }
}

fn non_negative(account: &str, field: &str, value: Option<i32>) -> Result<Option<u32>, StoreError> {
    value
        .map(|v| {
            u32::try_from(v).map_err(|_| StoreError::InvalidRow {
                account: account.to_string(),
                message: format!("negative {}: {}", field, v),
            })
        })
        .transpose()
}

impl TryFrom<PropertyRow> for Property {
    type Error = StoreError;

    fn try_from(row: PropertyRow) -> Result<Self, Self::Error> {
        let account = row.account.trim().to_string();
        Ok(Property {
            quality: parse_code::<QualityClass>(&account, row.quality_code)?,
            condition: parse_code::<Condition>(&account, row.condition_code)?,
            bedrooms: non_negative(&account, "bedrooms", row.bedrooms)?,
            garage_spaces: non_negative(&account, "garage_spaces", row.garage_spaces)?,
            land_use: row.land_use,
            neighborhood_code: row.neighborhood_code,
            site_address: row.site_address,
            city: row.city,
            zip_code: row.zip_code,
            latitude: row.latitude,
            longitude: row.longitude,
            living_area: row.living_area,
            lot_area: row.lot_area,
            year_built: row.year_built,
            stories: row.stories,
            bathrooms: row.bathrooms,
            has_pool: row.has_pool,
            market_value: row.market_value,
            sale_price: row.sale_price,
            account,
        })
    }
}

/// Column and missing-value rule for a numeric attribute
fn attribute_column(attribute: Attribute) -> Option<(&'static str, &'static str)> {
    match attribute {
        Attribute::LivingArea => Some(("living_area", "living_area IS NULL OR living_area <= 0")),
        Attribute::LotArea => Some(("lot_area", "lot_area IS NULL OR lot_area <= 0")),
        Attribute::YearBuilt => Some(("year_built", "year_built IS NULL OR year_built <= 0")),
        Attribute::Stories => Some(("stories", "stories IS NULL OR stories <= 0")),
        Attribute::Bedrooms => Some(("bedrooms", "bedrooms IS NULL")),
        Attribute::Bathrooms => Some(("bathrooms", "bathrooms IS NULL OR bathrooms < 0")),
        _ => None,
    }
}

/// Normalized spellings of every code whose rank falls inside `[lo, hi]`
fn ordinal_codes(attribute: Attribute, lo: f64, hi: f64) -> Vec<String> {
    let inside = |rank: u8| f64::from(rank) >= lo - RANGE_SLACK && f64::from(rank) <= hi + RANGE_SLACK;
    let aliases: Vec<&'static str> = match attribute {
        Attribute::Quality => QualityClass::ALL
            .into_iter()
            .filter(|q| inside(q.rank()))
            .flat_map(|q| q.aliases().iter().copied())
            .collect(),
        Attribute::Condition => Condition::ALL
            .into_iter()
            .filter(|c| inside(c.rank()))
            .flat_map(|c| c.aliases().iter().copied())
            .collect(),
        _ => Vec::new(),
    };
    aliases.into_iter().map(str::to_string).collect()
}

/// SQL twin of `normalize_code`
fn normalized_code_sql(column: &str) -> String {
    format!("REPLACE(REPLACE(LOWER(TRIM({})), ' ', '_'), '-', '_')", column)
}

fn push_window(builder: &mut QueryBuilder<'_, Postgres>, window: &AttributeWindow) {
    let subject_present = window.subject_value > 0.0;

    match (window.attribute, window.comparison) {
        (_, Comparison::Unbounded) => {}
        (Attribute::Garage, Comparison::PresenceMatch) => {
            builder.push(" AND (garage_spaces IS NULL OR (garage_spaces > 0) = ");
            builder.push_bind(subject_present);
            builder.push(")");
        }
        (Attribute::Pool, Comparison::PresenceMatch) => {
            builder.push(" AND (has_pool IS NULL OR has_pool = ");
            builder.push_bind(subject_present);
            builder.push(")");
        }
        (attribute, comparison) if attribute.is_ordinal() => {
            if let Some((lo, hi)) = comparison.range(window.subject_value) {
                let column = if attribute == Attribute::Quality { "quality_code" } else { "condition_code" };
                builder.push(format!(" AND ({} IS NULL OR {} = ANY(", column, normalized_code_sql(column)));
                builder.push_bind(ordinal_codes(attribute, lo, hi));
                builder.push("))");
            }
        }
        (attribute, comparison) => {
            let (Some((column, missing)), Some((lo, hi))) =
                (attribute_column(attribute), comparison.range(window.subject_value))
            else {
                return;
            };
            builder.push(format!(" AND ({} OR {} BETWEEN ", missing, column));
            builder.push_bind(lo - RANGE_SLACK);
            builder.push(" AND ");
            builder.push_bind(hi + RANGE_SLACK);
            builder.push(")");
        }
    }
}

fn push_geo_rule(builder: &mut QueryBuilder<'_, Postgres>, origin: Option<(f64, f64)>, rule: &GeoRule) {
    let no_coordinates = if origin.is_some() { "(latitude IS NULL OR longitude IS NULL) AND " } else { "" };

    match rule {
        GeoRule::Neighborhood(code) => {
            builder.push("TRIM(neighborhood_code) = ");
            builder.push_bind(code.clone());
        }
        GeoRule::Radius(miles) => match origin {
            Some((lat, lon)) => {
                let bbox = calculate_bounding_box(lat, lon, *miles);
                builder.push("(latitude BETWEEN ");
                builder.push_bind(bbox.min_lat);
                builder.push(" AND ");
                builder.push_bind(bbox.max_lat);
                builder.push(" AND longitude BETWEEN ");
                builder.push_bind(bbox.min_lon);
                builder.push(" AND ");
                builder.push_bind(bbox.max_lon);
                builder.push(")");
            }
            None => {
                builder.push("FALSE");
            }
        },
        GeoRule::ZipCode(zip) => {
            builder.push(format!("({}TRIM(zip_code) = ", no_coordinates));
            builder.push_bind(zip.clone());
            builder.push(")");
        }
        GeoRule::City(city) => {
            builder.push(format!("({}LOWER(TRIM(city)) = LOWER(", no_coordinates));
            builder.push_bind(city.clone());
            builder.push("))");
        }
    }
}

/// Translate a pool predicate into SQL.
///
/// Radius rules become bounding boxes, so the result is a superset of
/// the predicate; everything else is exact.
pub fn build_pool_query(query: &PoolQuery) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new(format!(
        "SELECT {} FROM comparable_properties WHERE UPPER(TRIM(land_use)) = UPPER(",
        PROPERTY_COLUMNS
    ));
    builder.push_bind(query.land_use.clone());
    builder.push(")");

    if !query.exclude_accounts.is_empty() {
        builder.push(" AND NOT (account = ANY(");
        builder.push_bind(query.exclude_accounts.iter().cloned().collect::<Vec<String>>());
        builder.push("))");
    }

    builder.push(" AND (");
    if query.geography.is_empty() {
        builder.push("FALSE");
    }
    for (i, rule) in query.geography.iter().enumerate() {
        if i > 0 {
            builder.push(" OR ");
        }
        push_geo_rule(&mut builder, query.origin, rule);
    }
    builder.push(")");

    for window in &query.windows {
        push_window(&mut builder, window);
    }

    builder.push(" ORDER BY account");
    builder
}

/// PostgreSQL-backed property store over the `comparable_properties` view
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new store from a connection string
    pub async fn new(database_url: &str, max_connections: u32, min_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Duration::from_secs(600))
            .test_before_acquire(true)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Create a new store from settings
    pub async fn from_settings(settings: &DatabaseSettings) -> Result<Self, StoreError> {
        tracing::info!(
            "Connecting to PostgreSQL (max {} connections)",
            settings.max_connections.unwrap_or(10)
        );

        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections.unwrap_or(10))
            .min_connections(settings.min_connections.unwrap_or(1))
            .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs.unwrap_or(5)))
            .idle_timeout(Duration::from_secs(settings.idle_timeout_secs.unwrap_or(600)))
            .test_before_acquire(true)
            .connect(&settings.url)
            .await?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Health check for the database connection
    pub async fn health_check(&self) -> Result<bool, StoreError> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map(|_| true)
            .map_err(Into::into)
    }
}

impl PropertyStore for PostgresStore {
    async fn fetch_subject(&self, account: &str) -> Result<Option<SubjectProperty>, StoreError> {
        let query = format!(
            "SELECT {} FROM comparable_properties WHERE TRIM(account) = $1",
            PROPERTY_COLUMNS
        );

        let row: Option<PropertyRow> = sqlx::query_as(&query)
            .bind(account.trim())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Property::try_from).transpose()
    }

    async fn query_pool(&self, query: &PoolQuery) -> Result<Vec<CandidateProperty>, StoreError> {
        let mut builder = build_pool_query(query);
        let rows: Vec<PropertyRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        let returned = rows.len();

        // A malformed candidate row is skipped, not fatal
        let candidates: Vec<CandidateProperty> = rows
            .into_iter()
            .filter_map(|row| match Property::try_from(row) {
                Ok(property) => Some(property),
                Err(e) => {
                    tracing::warn!("Skipping candidate: {}", e);
                    None
                }
            })
            .collect();

        tracing::debug!("Pool query returned {} rows ({} usable)", returned, candidates.len());
        Ok(candidates)
    }

    /// Milliseconds since epoch of the newest `updated_at`.
    ///
    /// Deletions must be soft (touching `updated_at`) to move the version.
    async fn data_version(&self) -> Result<DataVersion, StoreError> {
        let row = sqlx::query(
            "SELECT COALESCE((EXTRACT(EPOCH FROM MAX(updated_at)) * 1000)::BIGINT, 0) AS version \
             FROM comparable_properties",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(DataVersion(row.try_get("version")?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bands::BandConfig;
    use crate::core::filters::{geography_ladder, CandidateFilter};
    use crate::models::domain::normalize_code;

    fn create_subject() -> SubjectProperty {
        Property {
            account: "1001".to_string(),
            land_use: Some("A1".to_string()),
            neighborhood_code: Some("N100".to_string()),
            zip_code: Some("77001".to_string()),
            latitude: Some(29.76),
            longitude: Some(-95.37),
            living_area: Some(2000.0),
            quality: Some(QualityClass::Average),
            has_pool: Some(false),
            ..Default::default()
        }
    }

    fn row(account: &str) -> PropertyRow {
        PropertyRow {
            account: account.to_string(),
            land_use: Some("A1".to_string()),
            neighborhood_code: None,
            site_address: None,
            city: None,
            zip_code: None,
            latitude: None,
            longitude: None,
            living_area: Some(1500.0),
            lot_area: None,
            year_built: Some(1990),
            stories: None,
            quality_code: Some("B".to_string()),
            condition_code: Some("very_good".to_string()),
            bedrooms: Some(3),
            bathrooms: Some(2.5),
            garage_spaces: Some(2),
            has_pool: None,
            market_value: Some(250000.0),
            sale_price: None,
        }
    }

    #[test]
    fn test_row_conversion() {
        let property = Property::try_from(row(" 42 ")).unwrap();
        assert_eq!(property.account, "42");
        assert_eq!(property.quality, Some(QualityClass::Good));
        assert_eq!(property.condition, Some(Condition::VeryGood));
        assert_eq!(property.bedrooms, Some(3));
    }

    #[test]
    fn test_row_conversion_rejects_bad_codes() {
        let mut bad = row("42");
        bad.quality_code = Some("Q".to_string());
        assert!(matches!(Property::try_from(bad), Err(StoreError::InvalidRow { .. })));

        let mut negative = row("43");
        negative.bedrooms = Some(-1);
        assert!(matches!(Property::try_from(negative), Err(StoreError::InvalidRow { .. })));
    }

    #[test]
    fn test_ordinal_codes() {
        assert_eq!(
            ordinal_codes(Attribute::Quality, 1.0, 3.0),
            vec!["d", "fair", "c", "average", "b", "good"]
        );
        assert_eq!(ordinal_codes(Attribute::Condition, 3.0, 3.0), vec!["average"]);
    }

    #[test]
    fn test_sql_codes_cover_every_accepted_spelling() {
        // Any spelling row conversion accepts must survive the SQL window
        // for its own rank, after the same normalization the SQL applies
        for spelling in ["B", " b ", "Good", "GOOD", "good"] {
            let quality: QualityClass = spelling.parse().unwrap();
            let rank = f64::from(quality.rank());
            let codes = ordinal_codes(Attribute::Quality, rank, rank);
            assert!(codes.contains(&normalize_code(spelling)), "{} not matched", spelling);
        }
        for spelling in ["very_good", "Very Good", "very-good"] {
            let condition: Condition = spelling.parse().unwrap();
            let rank = f64::from(condition.rank());
            let codes = ordinal_codes(Attribute::Condition, rank, rank);
            assert!(codes.contains(&normalize_code(spelling)), "{} not matched", spelling);
        }
    }

    #[test]
    fn test_build_pool_query_sql() {
        let subject = create_subject();
        let bands = BandConfig::default();
        let ladder = geography_ladder(&subject, &bands.radius_tiers(None));
        let query = CandidateFilter::new(&subject, "A1").query(
            &ladder[2],
            &bands.physical_tier(0),
            vec!["2002".to_string()],
        );

        let builder = build_pool_query(&query);
        let sql = builder.sql();

        assert!(sql.contains("FROM comparable_properties"));
        assert!(sql.contains("NOT (account = ANY("));
        assert!(sql.contains("TRIM(neighborhood_code) = "));
        assert!(sql.contains("latitude BETWEEN"));
        assert!(sql.contains("living_area IS NULL OR living_area <= 0 OR living_area BETWEEN"));
        assert!(sql.contains("quality_code IS NULL OR REPLACE(REPLACE(LOWER(TRIM(quality_code)), ' ', '_'), '-', '_') = ANY("));
        assert!(sql.contains("has_pool IS NULL OR has_pool = "));
        // Subject has no lot area, so no lot window
        assert!(!sql.contains("lot_area BETWEEN"));
        assert!(sql.ends_with("ORDER BY account"));
    }

    #[test]
    fn test_fallback_rules_require_missing_coordinates() {
        let subject = create_subject();
        let bands = BandConfig::default();
        let ladder = geography_ladder(&subject, &bands.radius_tiers(None));
        let last = ladder.last().unwrap();
        let query = CandidateFilter::new(&subject, "A1").query(last, &bands.physical_tier(0), Vec::new());

        let builder = build_pool_query(&query);
        assert!(builder.sql().contains("((latitude IS NULL OR longitude IS NULL) AND TRIM(zip_code) = "));
    }

    #[tokio::test]
    #[ignore = "Requires PostgreSQL"]
    async fn test_health_check() {
        let url = std::env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/comps".to_string());
        let store = PostgresStore::new(&url, 2, 1).await.expect("Failed to connect");
        assert!(store.health_check().await.unwrap());
    }
}
