//! Postgres access: pool construction, optional migrations, and the venue
//! writer used by the ingestion pipeline.

use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::{PgPool, Row};
use thiserror::Error;
use tracing::{info, instrument};

use crate::pipeline::NormalizedVenue;
use crate::util::env::env_flag;

#[derive(Clone)]
pub struct Db {
    pub pool: PgPool,
}

impl Db {
    // SECURITY: never include raw DSNs in tracing spans (they may contain credentials).
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let mut connect_options = PgConnectOptions::from_str(database_url)?;

        // Be explicit about TLS when the DSN requires it.
        if database_url.contains("sslmode=require") && !database_url.contains("sslmode=disable") {
            connect_options = connect_options.ssl_mode(PgSslMode::Require);
        }

        // PgBouncer txn mode safe
        connect_options = connect_options.statement_cache_capacity(0);

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect_with(connect_options)
            .await?;
        info!("connected to db");

        if env_flag("AUTO_MIGRATE", false) {
            info!("running migrations (AUTO_MIGRATE=on)");
            Self::run_migrations(&pool).await?;
        } else {
            info!("AUTO_MIGRATE disabled; skipping migrations");
        }
        Ok(Self { pool })
    }

    /// Minimal migration runner: numerically-prefixed .sql files under
    /// ./migrations, applied in order, tracked in schema_migrations.
    async fn run_migrations(pool: &PgPool) -> Result<()> {
        use std::collections::HashSet;
        use std::{fs, path::Path};

        let dir = Path::new("./migrations");
        if !dir.exists() {
            return Ok(());
        }

        sqlx::raw_sql(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version BIGINT PRIMARY KEY,
                description TEXT,
                installed_at TIMESTAMPTZ DEFAULT now()
             )",
        )
        .execute(pool)
        .await?;

        let applied_rows = sqlx::raw_sql("SELECT version FROM schema_migrations")
            .fetch_all(pool)
            .await?;
        let mut applied: HashSet<i64> = HashSet::new();
        for r in applied_rows {
            applied.insert(r.try_get::<i64, _>(0)?);
        }

        let mut candidates: Vec<(i64, String, std::path::PathBuf)> = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let Some(fname) = path.file_name().and_then(|s| s.to_str()) else {
                continue;
            };
            let Some(stem) = fname.strip_suffix(".sql") else {
                continue;
            };
            let digits: String = stem.chars().take_while(|c| c.is_ascii_digit()).collect();
            let Ok(version) = digits.parse::<i64>() else {
                continue;
            };
            let desc = stem
                .strip_prefix(&digits)
                .unwrap_or("")
                .trim_start_matches('_')
                .to_string();
            candidates.push((version, desc, path));
        }
        candidates.sort_by_key(|(v, _, _)| *v);

        for (version, desc, path) in candidates {
            if applied.contains(&version) {
                continue;
            }
            let sql = fs::read_to_string(&path)?;
            info!(version, file = ?path, "applying migration");
            sqlx::raw_sql(&sql).execute(pool).await?;
            let desc_escaped = desc.replace('\'', "''");
            let stmt = format!(
                "INSERT INTO schema_migrations(version, description) VALUES ({version}, '{desc_escaped}')"
            );
            sqlx::raw_sql(&stmt).execute(pool).await?;
            applied.insert(version);
        }
        Ok(())
    }

    /// Row count of the venues table, for operational sanity checks.
    pub async fn venue_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT count(*) FROM venues")
            .persistent(false)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

/// Row-level persistence failure: the message plus whatever diagnostic the
/// database handed back (SQLSTATE, violated constraint).
#[derive(Debug, Error)]
#[error("{message}")]
pub struct PersistError {
    pub message: String,
    pub diag: Option<String>,
}

impl From<sqlx::Error> for PersistError {
    fn from(err: sqlx::Error) -> Self {
        let diag = err.as_database_error().map(|db_err| {
            let code = db_err
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            match db_err.constraint() {
                Some(constraint) => format!("sqlstate={code} constraint={constraint}"),
                None => format!("sqlstate={code}"),
            }
        });
        Self {
            message: err.to_string(),
            diag,
        }
    }
}

#[async_trait]
pub trait VenueStore: Send + Sync {
    async fn insert_venue(&self, venue: &NormalizedVenue) -> Result<(), PersistError>;
}

// The geography point is only built when both coordinates are present; a
// half-set pair never reaches this statement (see normalize::parse_lat_lon).
const INSERT_VENUE_SQL: &str = "
    INSERT INTO venues (
        id, name, website, location, area, coordinates, opening_times, rating, description,
        student_discount_present, student_discount, points
    )
    VALUES (
        $1, $2, $3, $4, $5,
        CASE
            WHEN $6::double precision IS NULL OR $7::double precision IS NULL THEN NULL
            ELSE ST_SetSRID(ST_MakePoint($7::double precision, $6::double precision), 4326)::geography
        END,
        $8, $9::numeric, $10, $11, $12, $13
    )
";

#[async_trait]
impl VenueStore for Db {
    async fn insert_venue(&self, venue: &NormalizedVenue) -> Result<(), PersistError> {
        sqlx::query(INSERT_VENUE_SQL)
            .persistent(false)
            .bind(&venue.id)
            .bind(&venue.name)
            .bind(&venue.website)
            .bind(&venue.location)
            .bind(&venue.area)
            .bind(venue.latitude)
            .bind(venue.longitude)
            .bind(&venue.opening_times)
            .bind(&venue.rating)
            .bind(&venue.description)
            .bind(venue.student_discount_present)
            .bind(&venue.student_discount)
            .bind(venue.points)
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(PersistError::from)
    }
}
