//! Cell-level normalization for raw CSV values.
//!
//! Every function here is total: bad input degrades to `None` or a default
//! rather than an error, so one ugly cell never sinks a row.

use std::path::Path;

/// Trim a nullable cell; empty collapses to `None`.
pub fn normalize_nullable_string(value: Option<&str>) -> Option<String> {
    let trimmed = value?.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Truthy cell values. Anything else, including unparseable input, is false.
pub fn parse_boolean(value: Option<&str>) -> bool {
    match value {
        Some(v) => matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "t" | "yes" | "y"
        ),
        None => false,
    }
}

/// Parse a 0-5 rating, rendered with exactly one fractional digit.
///
/// Non-numeric or out-of-range input is treated as absent, not an error.
pub fn parse_rating(value: Option<&str>) -> Option<String> {
    let trimmed = value?.trim();
    if trimmed.is_empty() {
        return None;
    }
    let rating: f64 = trimmed.parse().ok()?;
    if !(0.0..=5.0).contains(&rating) {
        return None;
    }
    Some(format!("{rating:.1}"))
}

/// Split a "lat,lon" cell into a coordinate pair.
///
/// Anything other than exactly two finite numeric tokens yields
/// `(None, None)`; a partial pair is never produced.
pub fn parse_lat_lon(value: Option<&str>) -> (Option<f64>, Option<f64>) {
    let Some(raw) = value else {
        return (None, None);
    };
    let mut parts = raw.split(',');
    let (Some(lat_raw), Some(lon_raw), None) = (parts.next(), parts.next(), parts.next()) else {
        return (None, None);
    };
    match (
        lat_raw.trim().parse::<f64>(),
        lon_raw.trim().parse::<f64>(),
    ) {
        (Ok(lat), Ok(lon)) if lat.is_finite() && lon.is_finite() => (Some(lat), Some(lon)),
        _ => (None, None),
    }
}

/// Lower-cased file extension of a URL's path component; "jpg" when the URL
/// is unparseable or carries no extension.
pub fn extension_from_url(url: &str) -> String {
    const DEFAULT: &str = "jpg";
    let Ok(parsed) = url::Url::parse(url) else {
        return DEFAULT.to_string();
    };
    match Path::new(parsed.path())
        .extension()
        .and_then(|e| e.to_str())
    {
        Some(ext) if !ext.is_empty() => ext.to_ascii_lowercase(),
        _ => DEFAULT.to_string(),
    }
}
