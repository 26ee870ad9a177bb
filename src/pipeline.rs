//! Row-by-row ingestion: CSV stream -> normalization -> media acquisition ->
//! storage push/verify -> persistence, folded into a single run report.
//!
//! Rows are processed one at a time, end to end. A row's failure never
//! aborts the run; only an unreadable or headerless source does.

use std::collections::HashMap;
use std::fs::File;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::VenueStore;
use crate::media::MediaAcquirer;
use crate::normalize::{normalize_nullable_string, parse_boolean, parse_lat_lon, parse_rating};
use crate::points::pick_venue_points;
use crate::storage::{push_and_verify, ObjectStore, StorageCheck};

/// Aborts the whole run before any row is touched.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("CSV file not readable: {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV has no header row")]
    NoHeader,
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub csv_path: PathBuf,
    /// Processing ceiling: data rows beyond this are never read.
    pub row_limit: usize,
    /// Storage namespace ahead of the per-row folder key.
    pub folder_prefix: String,
}

impl IngestConfig {
    pub fn new(csv_path: impl Into<PathBuf>, row_limit: usize) -> Self {
        Self {
            csv_path: csv_path.into(),
            row_limit,
            folder_prefix: "venues".to_string(),
        }
    }
}

/// A fully normalized venue row, ready for persistence.
#[derive(Debug, Clone, Serialize)]
pub struct NormalizedVenue {
    pub id: String,
    pub name: String,
    pub website: Option<String>,
    pub location: Option<String>,
    pub area: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub opening_times: Option<String>,
    pub rating: Option<String>,
    pub description: Option<String>,
    pub student_discount_present: bool,
    pub student_discount: Option<String>,
    pub points: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct MediaIssueDetail {
    pub id: String,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DbFailure {
    pub id: String,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diag: Option<String>,
}

/// Per-run outcome aggregation, serialized as the final report.
#[derive(Debug, Serialize)]
pub struct IngestReport {
    pub result: &'static str,
    pub generated_at: String,
    pub processed: usize,
    pub inserted: usize,
    pub bucket: String,
    pub unsuccessful: Vec<String>,
    pub unsuccessful_details: Vec<MediaIssueDetail>,
    pub storage_checks: Vec<StorageCheck>,
    pub db_failed_count: usize,
    pub db_failed: Vec<DbFailure>,
}

impl IngestReport {
    fn new(bucket: String) -> Self {
        Self {
            result: "success",
            generated_at: chrono::Utc::now().to_rfc3339(),
            processed: 0,
            inserted: 0,
            bucket,
            unsuccessful: Vec::new(),
            unsuccessful_details: Vec::new(),
            storage_checks: Vec::new(),
            db_failed_count: 0,
            db_failed: Vec::new(),
        }
    }
}

/// Failure-shaped response for fatal input errors, mirroring the success
/// report's envelope.
pub fn failure_response(message: &str) -> serde_json::Value {
    serde_json::json!({
        "result": "failure",
        "status": 500,
        "message": message,
    })
}

/// Header-name -> column-index lookup built once per run.
struct HeaderIndex(HashMap<String, usize>);

impl HeaderIndex {
    fn new(headers: &csv::StringRecord) -> Self {
        Self(
            headers
                .iter()
                .enumerate()
                .map(|(idx, name)| (name.to_string(), idx))
                .collect(),
        )
    }

    fn get<'r>(&self, record: &'r csv::StringRecord, name: &str) -> Option<&'r str> {
        self.0.get(name).and_then(|&idx| record.get(idx))
    }
}

/// Run the ingestion pipeline over a CSV source.
///
/// The store and writer are trait objects-by-generics so tests can observe
/// every collaborator call without a network or database.
pub async fn run_ingest<S, W>(
    config: &IngestConfig,
    acquirer: &MediaAcquirer,
    store: &S,
    writer: &W,
) -> Result<IngestReport, FatalError>
where
    S: ObjectStore,
    W: VenueStore,
{
    let file = File::open(&config.csv_path).map_err(|source| FatalError::Unreadable {
        path: config.csv_path.clone(),
        source,
    })?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(file);
    let headers = reader.headers().map_err(|_| FatalError::NoHeader)?.clone();
    if headers.is_empty() {
        return Err(FatalError::NoHeader);
    }
    let index = HeaderIndex::new(&headers);

    info!(
        path = %config.csv_path.display(),
        row_limit = config.row_limit,
        "starting ingest run"
    );

    let mut report = IngestReport::new(store.bucket().to_string());
    let mut records = reader.records();
    // The ceiling is checked before pulling the next record, so rows past it
    // are never read from the source at all.
    while report.processed < config.row_limit {
        let Some(record) = records.next() else {
            break;
        };
        let record = match record {
            Ok(r) => r,
            Err(err) => {
                warn!(error = %err, "skipping malformed CSV record");
                continue;
            }
        };

        // Blank-line padding: a single empty cell, not a data row.
        if record.len() == 1 && record.get(0).map(str::trim).unwrap_or("").is_empty() {
            continue;
        }

        report.processed += 1;
        process_row(config, acquirer, store, writer, &index, &record, &mut report).await;
    }
    report.db_failed_count = report.db_failed.len();

    info!(
        processed = report.processed,
        inserted = report.inserted,
        media_issues = report.unsuccessful.len(),
        db_failed = report.db_failed_count,
        "ingest run finished"
    );
    Ok(report)
}

async fn process_row<S, W>(
    config: &IngestConfig,
    acquirer: &MediaAcquirer,
    store: &S,
    writer: &W,
    index: &HeaderIndex,
    record: &csv::StringRecord,
    report: &mut IngestReport,
) where
    S: ObjectStore,
    W: VenueStore,
{
    // The id exists before anything else happens to the row and stays stable
    // for its whole lifetime.
    let venue_id = Uuid::new_v4().simple().to_string();

    let name = index.get(record, "name").unwrap_or("").trim().to_string();
    if name.is_empty() {
        debug!(%venue_id, "row rejected: missing name");
        report.db_failed.push(DbFailure {
            id: venue_id,
            error: "Missing name".to_string(),
            diag: None,
        });
        return;
    }

    let area = normalize_nullable_string(index.get(record, "area"));
    let (latitude, longitude) =
        parse_lat_lon(normalize_nullable_string(index.get(record, "langlat")).as_deref());
    let student_discount_present = parse_boolean(index.get(record, "student_discount_present"));
    let points = pick_venue_points(
        student_discount_present,
        area.as_deref(),
        &mut rand::thread_rng(),
    );

    let venue = NormalizedVenue {
        id: venue_id,
        name,
        website: normalize_nullable_string(index.get(record, "website")),
        location: normalize_nullable_string(index.get(record, "location")),
        area,
        latitude,
        longitude,
        opening_times: normalize_nullable_string(index.get(record, "opening_times")),
        rating: parse_rating(index.get(record, "rating")),
        description: normalize_nullable_string(index.get(record, "description")),
        student_discount_present,
        student_discount: normalize_nullable_string(index.get(record, "student_discount")),
        points,
    };

    let photo_urls = [
        normalize_nullable_string(index.get(record, "photo_1")),
        normalize_nullable_string(index.get(record, "photo_2")),
    ];

    let mut media_issues: Vec<String> = Vec::new();
    let (items, download_errors) = acquirer.acquire_batch(&photo_urls).await;
    media_issues.extend(download_errors);

    if !items.is_empty() {
        let folder = format!("{}/{}", config.folder_prefix, venue.id);
        let (issues, check) = push_and_verify(store, &venue.id, &items, &folder).await;
        media_issues.extend(issues);
        if let Some(check) = check {
            report.storage_checks.push(check);
        }
    }

    // Scratch files are released here, before persistence is attempted, so a
    // failed insert never leaks temp files.
    drop(items);

    match writer.insert_venue(&venue).await {
        Ok(()) => {
            report.inserted += 1;
            info!(venue_id = %venue.id, name = %venue.name, "venue inserted");
            if !media_issues.is_empty() {
                report.unsuccessful.push(venue.id.clone());
                report.unsuccessful_details.push(MediaIssueDetail {
                    id: venue.id.clone(),
                    errors: media_issues,
                });
            }
        }
        Err(err) => {
            warn!(venue_id = %venue.id, error = %err, "venue insert failed");
            report.db_failed.push(DbFailure {
                id: venue.id.clone(),
                error: err.message,
                diag: err.diag,
            });
        }
    }
}
