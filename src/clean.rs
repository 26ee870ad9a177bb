//! Pre-processing pass over structured venue CSVs: strips URLs out of the
//! free-text columns before ingestion, rewriting the file in place.

use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::info;

const URL_PATTERN: &str = r"(?i)https?://\S*|www\.\S+";
const TARGET_COLUMNS: [&str; 2] = ["description", "student_discount"];

fn strip_urls(pattern: &Regex, input: &str) -> String {
    pattern.replace_all(input, "").to_string()
}

/// Remove URL tokens from the description/student_discount columns of a
/// structured CSV, in place. Returns the number of data rows rewritten.
pub fn clean_csv(path: &Path) -> Result<usize> {
    let pattern = Regex::new(URL_PATTERN).context("compiling URL pattern")?;

    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let headers = reader.headers().context("reading CSV header")?.clone();
    let targets: Vec<usize> = headers
        .iter()
        .enumerate()
        .filter(|(_, name)| TARGET_COLUMNS.contains(name))
        .map(|(idx, _)| idx)
        .collect();

    let mut rows: Vec<csv::StringRecord> = Vec::new();
    for record in reader.records() {
        let record = record.context("reading CSV record")?;
        let cleaned: csv::StringRecord = record
            .iter()
            .enumerate()
            .map(|(idx, cell)| {
                if targets.contains(&idx) {
                    strip_urls(&pattern, cell)
                } else {
                    cell.to_string()
                }
            })
            .collect();
        rows.push(cleaned);
    }
    drop(reader);

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("rewriting {}", path.display()))?;
    writer.write_record(&headers)?;
    for row in &rows {
        writer.write_record(row)?;
    }
    writer.flush()?;

    info!(path = %path.display(), rows = rows.len(), "stripped URLs from CSV");
    Ok(rows.len())
}
