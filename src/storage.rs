//! Object storage: Supabase Storage client and post-upload verification.
//!
//! The pipeline only ever talks to the [`ObjectStore`] trait, so tests can
//! substitute a recording store and the verification logic stays independent
//! of the HTTP client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::media::MediaItem;
use crate::util::env::{env_opt, env_parse, env_req};

const DEFAULT_BUCKET: &str = "venue-media";

#[derive(Debug, Error)]
pub enum StorageError {
    /// A specific object failed to upload.
    #[error("upload failed for file {file}: {message}")]
    Upload { file: String, message: String },
    /// The folder listing used for verification could not be retrieved.
    #[error("listing failed: {message}")]
    List { message: String },
}

/// Minimal view of a stored object as returned by the list endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageObject {
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Audit record of one verification listing, kept whether or not it turned
/// into a media issue.
#[derive(Debug, Clone, Serialize)]
pub struct StorageCheck {
    pub id: String,
    pub bucket: String,
    pub folder: String,
    pub expected: usize,
    /// None when the listing itself failed.
    pub actual: Option<usize>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn bucket(&self) -> &str;

    /// Push a row's media batch into `folder`. Fails on the first object the
    /// store rejects, naming that object.
    async fn upload_batch(&self, items: &[MediaItem], folder: &str) -> Result<(), StorageError>;

    /// List a folder's contents for verification.
    async fn list_folder(&self, folder: &str) -> Result<Vec<StorageObject>, StorageError>;
}

/// Supabase Storage over its HTTP API, authenticated with the service role
/// key (bulk ingestion bypasses RLS).
pub struct SupabaseStorage {
    http: reqwest::Client,
    base_url: String,
    service_key: String,
    bucket: String,
}

impl SupabaseStorage {
    pub fn from_env() -> anyhow::Result<Self> {
        let base_url = env_req("SUPABASE_URL")?;
        let service_key = env_req("SUPABASE_SERVICE_ROLE_KEY")?;
        let bucket = env_opt("STORAGE_BUCKET").unwrap_or_else(|| DEFAULT_BUCKET.to_string());
        Self::new(&base_url, service_key, bucket)
    }

    pub fn new(
        base_url: &str,
        service_key: impl Into<String>,
        bucket: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(env_parse("STORAGE_HTTP_TIMEOUT_SECS", 30u64)))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key: service_key.into(),
            bucket: bucket.into(),
        })
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    fn object_url(&self, folder: &str, object_name: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}/{}",
            self.base_url, self.bucket, folder, object_name
        )
    }
}

fn content_type_for(extension: &str) -> &'static str {
    match extension {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "avif" => "image/avif",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl ObjectStore for SupabaseStorage {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn upload_batch(&self, items: &[MediaItem], folder: &str) -> Result<(), StorageError> {
        for item in items {
            let object_name = item.object_name();
            let body = tokio::fs::read(&item.local_path).await.map_err(|err| {
                StorageError::Upload {
                    file: object_name.clone(),
                    message: format!("reading scratch file: {err}"),
                }
            })?;
            let resp = self
                .http
                .post(self.object_url(folder, &object_name))
                .bearer_auth(&self.service_key)
                .header("x-upsert", "true")
                .header(header::CONTENT_TYPE, content_type_for(&item.extension))
                .body(body)
                .send()
                .await
                .map_err(|err| StorageError::Upload {
                    file: object_name.clone(),
                    message: err.to_string(),
                })?;
            let status = resp.status();
            if !status.is_success() {
                let detail = resp.text().await.unwrap_or_default();
                return Err(StorageError::Upload {
                    file: object_name,
                    message: format!("http {status}: {detail}"),
                });
            }
            info!(bucket = %self.bucket, folder, object = %object_name, "object uploaded");
        }
        Ok(())
    }

    async fn list_folder(&self, folder: &str) -> Result<Vec<StorageObject>, StorageError> {
        let url = format!("{}/storage/v1/object/list/{}", self.base_url, self.bucket);
        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.service_key)
            .json(&serde_json::json!({ "prefix": folder, "limit": 1000 }))
            .send()
            .await
            .map_err(|err| StorageError::List {
                message: err.to_string(),
            })?;
        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(StorageError::List {
                message: format!("http {status}: {detail}"),
            });
        }
        resp.json::<Vec<StorageObject>>()
            .await
            .map_err(|err| StorageError::List {
                message: format!("decoding listing: {err}"),
            })
    }
}

/// Push one row's media batch and verify delivery by re-listing the folder.
///
/// Returns the media issues produced by this stage plus the audit record of
/// the verification listing (None when the batch was empty and nothing was
/// attempted). Under-delivery is an issue; extra objects left by an earlier
/// partial run are logged but not flagged.
pub async fn push_and_verify<S: ObjectStore + ?Sized>(
    store: &S,
    venue_id: &str,
    items: &[MediaItem],
    folder: &str,
) -> (Vec<String>, Option<StorageCheck>) {
    if items.is_empty() {
        return (Vec::new(), None);
    }

    let mut issues = Vec::new();
    if let Err(err) = store.upload_batch(items, folder).await {
        issues.push(format!("Storage upload failed: {err}"));
        return (issues, None);
    }

    let expected = items.len();
    let check = match store.list_folder(folder).await {
        Err(err) => {
            issues.push(format!("Storage verification failed: {err}"));
            StorageCheck {
                id: venue_id.to_string(),
                bucket: store.bucket().to_string(),
                folder: folder.to_string(),
                expected,
                actual: None,
            }
        }
        Ok(objects) => {
            let actual = objects.len();
            if actual < expected {
                issues.push(format!(
                    "Storage verification mismatch: expected {expected}, found {actual}"
                ));
            } else if actual > expected {
                warn!(
                    venue_id,
                    folder,
                    expected,
                    actual,
                    "folder holds more objects than this batch; not treated as an error"
                );
            }
            StorageCheck {
                id: venue_id.to_string(),
                bucket: store.bucket().to_string(),
                folder: folder.to_string(),
                expected,
                actual: Some(actual),
            }
        }
    };
    (issues, Some(check))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;

    fn item(name: &str) -> MediaItem {
        // Points at nothing; these tests never read the file.
        MediaItem {
            local_path: PathBuf::from(format!("/nonexistent/{name}")),
            remote_name: name.to_string(),
            extension: "jpg".to_string(),
        }
    }

    struct FakeStore {
        uploads: Mutex<Vec<(String, Vec<String>)>>,
        upload_error: Option<String>,
        list_result: Result<usize, String>,
    }

    impl FakeStore {
        fn delivering(count: usize) -> Self {
            Self {
                uploads: Mutex::new(Vec::new()),
                upload_error: None,
                list_result: Ok(count),
            }
        }
    }

    #[async_trait]
    impl ObjectStore for FakeStore {
        fn bucket(&self) -> &str {
            "test-bucket"
        }

        async fn upload_batch(
            &self,
            items: &[MediaItem],
            folder: &str,
        ) -> Result<(), StorageError> {
            if let Some(message) = &self.upload_error {
                return Err(StorageError::Upload {
                    file: items[0].object_name(),
                    message: message.clone(),
                });
            }
            self.uploads.lock().unwrap().push((
                folder.to_string(),
                items.iter().map(|i| i.object_name()).collect(),
            ));
            Ok(())
        }

        async fn list_folder(&self, _folder: &str) -> Result<Vec<StorageObject>, StorageError> {
            match &self.list_result {
                Ok(count) => Ok((0..*count)
                    .map(|i| StorageObject {
                        name: format!("obj_{i}"),
                        id: None,
                        updated_at: None,
                    })
                    .collect()),
                Err(message) => Err(StorageError::List {
                    message: message.clone(),
                }),
            }
        }
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let store = FakeStore::delivering(0);
        let (issues, check) = push_and_verify(&store, "v1", &[], "venues/v1").await;
        assert!(issues.is_empty());
        assert!(check.is_none());
        assert!(store.uploads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn full_delivery_produces_a_clean_check() {
        let store = FakeStore::delivering(2);
        let items = vec![item("logo"), item("cover")];
        let (issues, check) = push_and_verify(&store, "v1", &items, "venues/v1").await;
        assert!(issues.is_empty());
        let check = check.expect("listing recorded");
        assert_eq!(check.expected, 2);
        assert_eq!(check.actual, Some(2));
        assert_eq!(check.bucket, "test-bucket");
        assert_eq!(check.folder, "venues/v1");
    }

    #[tokio::test]
    async fn under_delivery_is_flagged() {
        let store = FakeStore::delivering(1);
        let items = vec![item("logo"), item("cover")];
        let (issues, check) = push_and_verify(&store, "v1", &items, "venues/v1").await;
        assert_eq!(issues.len(), 1);
        assert!(issues[0].contains("expected 2, found 1"), "{}", issues[0]);
        assert_eq!(check.unwrap().actual, Some(1));
    }

    #[tokio::test]
    async fn over_delivery_is_audited_but_not_flagged() {
        let store = FakeStore::delivering(3);
        let items = vec![item("logo")];
        let (issues, check) = push_and_verify(&store, "v1", &items, "venues/v1").await;
        assert!(issues.is_empty());
        assert_eq!(check.unwrap().actual, Some(3));
    }

    #[tokio::test]
    async fn upload_failure_names_the_file_and_skips_verification() {
        let store = FakeStore {
            uploads: Mutex::new(Vec::new()),
            upload_error: Some("http 403 Forbidden".to_string()),
            list_result: Ok(0),
        };
        let items = vec![item("logo")];
        let (issues, check) = push_and_verify(&store, "v1", &items, "venues/v1").await;
        assert_eq!(issues.len(), 1);
        assert!(issues[0].contains("logo.jpg"), "{}", issues[0]);
        assert!(check.is_none());
    }

    #[tokio::test]
    async fn listing_failure_is_recorded_with_unknown_actual() {
        let store = FakeStore {
            uploads: Mutex::new(Vec::new()),
            upload_error: None,
            list_result: Err("http 500".to_string()),
        };
        let items = vec![item("logo")];
        let (issues, check) = push_and_verify(&store, "v1", &items, "venues/v1").await;
        assert_eq!(issues.len(), 1);
        assert!(issues[0].starts_with("Storage verification failed"), "{}", issues[0]);
        assert_eq!(check.unwrap().actual, None);
    }

    #[test]
    fn content_types_cover_common_image_extensions() {
        assert_eq!(content_type_for("jpg"), "image/jpeg");
        assert_eq!(content_type_for("png"), "image/png");
        assert_eq!(content_type_for("bin"), "application/octet-stream");
    }
}
