// Storage collaborators behind trait seams
//
// The pipeline only ever talks to these traits; the REST implementations
// below target a Supabase-style backend (object buckets + PostgREST
// tables). Tests inject the in-memory fakes instead.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use crate::core::config::StorageConfig;
use crate::core::errors::{StorageError, StorageResult};
use crate::core::types::CachedImageRecord;

/// Object store: durable image bytes addressed by path.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Idempotent upload; uploading an existing path is success.
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> StorageResult<()>;

    /// Public URL for a stored path. Deterministic, no I/O.
    fn public_url(&self, path: &str) -> String;

    /// List object names under a prefix.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;
}

/// Relational store for cached-image metadata rows.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn insert_record(&self, record: &CachedImageRecord) -> StorageResult<()>;

    async fn find_by_normalized_name(
        &self,
        normalized_name: &str,
        limit: usize,
    ) -> StorageResult<Vec<CachedImageRecord>>;

    async fn find_by_category(
        &self,
        category: &str,
        limit: usize,
    ) -> StorageResult<Vec<CachedImageRecord>>;

    async fn find_by_content_hash(&self, hash: &str)
        -> StorageResult<Option<CachedImageRecord>>;

    /// Best-effort log of a dish no stage could match from the curated
    /// library; feeds the library curation workflow.
    async fn log_missing_dish(&self, title: &str, description: Option<&str>) -> StorageResult<()>;
}

/// REST object storage client.
pub struct HttpObjectStorage {
    client: Client,
    base_url: String,
    bucket: String,
    api_key: String,
}

impl HttpObjectStorage {
    pub fn new(
        config: &StorageConfig,
        bucket: impl Into<String>,
        timeout: Duration,
    ) -> Option<Self> {
        let (base_url, api_key) = match (&config.base_url, &config.api_key) {
            (Some(url), Some(key)) => (url.clone(), key.clone()),
            _ => return None,
        };
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .ok()?;
        Some(Self {
            client,
            base_url,
            bucket: bucket.into(),
            api_key,
        })
    }
}

#[async_trait]
impl ObjectStorage for HttpObjectStorage {
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> StorageResult<()> {
        let url = format!("{}/storage/v1/object/{}/{}", self.base_url, self.bucket, path);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("Content-Type", content_type)
            .header("x-upsert", "true")
            .header("Cache-Control", "public, max-age=31536000")
            .body(bytes)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() || status.as_u16() == 409 {
            // 409 means the object already exists, which upload treats as done
            debug!("Uploaded object {} ({})", path, status);
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(StorageError::UploadRejected {
            path: path.to_string(),
            status: status.as_u16(),
            body,
        })
    }

    fn public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, self.bucket, path
        )
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let url = format!("{}/storage/v1/object/list/{}", self.base_url, self.bucket);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "prefix": prefix }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::QueryFailed(format!(
                "list {} failed: {} - {}",
                prefix, status, body
            )));
        }

        let entries: Vec<serde_json::Value> = response.json().await?;
        Ok(entries
            .into_iter()
            .filter_map(|e| e["name"].as_str().map(str::to_string))
            .collect())
    }
}

/// PostgREST metadata table client.
pub struct HttpMetadataStore {
    client: Client,
    base_url: String,
    api_key: String,
}

const IMAGES_TABLE: &str = "cached_food_images";
const MISSING_TABLE: &str = "items_without_pictures";

impl HttpMetadataStore {
    pub fn new(config: &StorageConfig, timeout: Duration) -> Option<Self> {
        let (base_url, api_key) = match (&config.base_url, &config.api_key) {
            (Some(url), Some(key)) => (url.clone(), key.clone()),
            _ => return None,
        };
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .ok()?;
        Some(Self {
            client,
            base_url,
            api_key,
        })
    }

    async fn select(&self, table: &str, query: &[(&str, String)]) -> StorageResult<Vec<CachedImageRecord>> {
        let url = format!("{}/rest/v1/{}", self.base_url, table);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .header("apikey", &self.api_key)
            .query(query)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::QueryFailed(format!(
                "select from {} failed: {} - {}",
                table, status, body
            )));
        }

        let rows: Vec<CachedImageRecord> = response
            .json()
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        Ok(rows)
    }

    async fn insert(&self, table: &str, body: serde_json::Value) -> StorageResult<()> {
        let url = format!("{}/rest/v1/{}", self.base_url, table);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("apikey", &self.api_key)
            .header("Prefer", "return=minimal")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(StorageError::QueryFailed(format!(
                "insert into {} failed: {} - {}",
                table, status, text
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for HttpMetadataStore {
    async fn insert_record(&self, record: &CachedImageRecord) -> StorageResult<()> {
        self.insert(
            IMAGES_TABLE,
            serde_json::to_value(record).map_err(|e| StorageError::QueryFailed(e.to_string()))?,
        )
        .await
    }

    async fn find_by_normalized_name(
        &self,
        normalized_name: &str,
        limit: usize,
    ) -> StorageResult<Vec<CachedImageRecord>> {
        self.select(
            IMAGES_TABLE,
            &[
                ("normalized_name", format!("eq.{}", normalized_name)),
                ("is_active", "eq.true".to_string()),
                ("limit", limit.to_string()),
            ],
        )
        .await
    }

    async fn find_by_category(
        &self,
        category: &str,
        limit: usize,
    ) -> StorageResult<Vec<CachedImageRecord>> {
        self.select(
            IMAGES_TABLE,
            &[
                ("category", format!("eq.{}", category)),
                ("is_active", "eq.true".to_string()),
                ("limit", limit.to_string()),
            ],
        )
        .await
    }

    async fn find_by_content_hash(
        &self,
        hash: &str,
    ) -> StorageResult<Option<CachedImageRecord>> {
        let rows = self
            .select(
                IMAGES_TABLE,
                &[
                    ("content_hash", format!("eq.{}", hash)),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn log_missing_dish(&self, title: &str, description: Option<&str>) -> StorageResult<()> {
        self.insert(
            MISSING_TABLE,
            serde_json::json!({
                "title": title,
                "description": description.unwrap_or(""),
            }),
        )
        .await
    }
}

/// Placeholder backend for deployments without storage credentials. Reads
/// come back empty and writes fail, so cache lookup degrades to a miss and
/// write-through is skipped.
pub struct DisabledStorage;

#[async_trait]
impl ObjectStorage for DisabledStorage {
    async fn upload(&self, path: &str, _bytes: Vec<u8>, _content_type: &str) -> StorageResult<()> {
        Err(StorageError::QueryFailed(format!(
            "storage not configured, cannot upload {}",
            path
        )))
    }

    fn public_url(&self, path: &str) -> String {
        path.to_string()
    }

    async fn list(&self, _prefix: &str) -> StorageResult<Vec<String>> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl MetadataStore for DisabledStorage {
    async fn insert_record(&self, record: &CachedImageRecord) -> StorageResult<()> {
        Err(StorageError::QueryFailed(format!(
            "storage not configured, cannot record {}",
            record.storage_path
        )))
    }

    async fn find_by_normalized_name(
        &self,
        _normalized_name: &str,
        _limit: usize,
    ) -> StorageResult<Vec<CachedImageRecord>> {
        Ok(Vec::new())
    }

    async fn find_by_category(
        &self,
        _category: &str,
        _limit: usize,
    ) -> StorageResult<Vec<CachedImageRecord>> {
        Ok(Vec::new())
    }

    async fn find_by_content_hash(
        &self,
        _hash: &str,
    ) -> StorageResult<Option<CachedImageRecord>> {
        Ok(None)
    }

    async fn log_missing_dish(
        &self,
        _title: &str,
        _description: Option<&str>,
    ) -> StorageResult<()> {
        Ok(())
    }
}

#[cfg(test)]
pub mod fakes {
    //! In-memory storage fakes shared by the service tests.

    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    pub struct MemoryObjectStorage {
        pub objects: Mutex<HashMap<String, Vec<u8>>>,
        pub upload_calls: Mutex<usize>,
    }

    #[async_trait]
    impl ObjectStorage for MemoryObjectStorage {
        async fn upload(
            &self,
            path: &str,
            bytes: Vec<u8>,
            _content_type: &str,
        ) -> StorageResult<()> {
            *self.upload_calls.lock() += 1;
            self.objects.lock().entry(path.to_string()).or_insert(bytes);
            Ok(())
        }

        fn public_url(&self, path: &str) -> String {
            format!("https://storage.test/public/{}", path)
        }

        async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
            Ok(self
                .objects
                .lock()
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect())
        }
    }

    #[derive(Default)]
    pub struct MemoryMetadataStore {
        pub records: Mutex<Vec<CachedImageRecord>>,
        pub missing: Mutex<Vec<String>>,
        pub insert_calls: Mutex<usize>,
    }

    #[async_trait]
    impl MetadataStore for MemoryMetadataStore {
        async fn insert_record(&self, record: &CachedImageRecord) -> StorageResult<()> {
            *self.insert_calls.lock() += 1;
            self.records.lock().push(record.clone());
            Ok(())
        }

        async fn find_by_normalized_name(
            &self,
            normalized_name: &str,
            limit: usize,
        ) -> StorageResult<Vec<CachedImageRecord>> {
            Ok(self
                .records
                .lock()
                .iter()
                .filter(|r| r.normalized_name == normalized_name && r.is_active)
                .take(limit)
                .cloned()
                .collect())
        }

        async fn find_by_category(
            &self,
            category: &str,
            limit: usize,
        ) -> StorageResult<Vec<CachedImageRecord>> {
            Ok(self
                .records
                .lock()
                .iter()
                .filter(|r| r.category == category && r.is_active)
                .take(limit)
                .cloned()
                .collect())
        }

        async fn find_by_content_hash(
            &self,
            hash: &str,
        ) -> StorageResult<Option<CachedImageRecord>> {
            Ok(self
                .records
                .lock()
                .iter()
                .find(|r| r.content_hash == hash)
                .cloned())
        }

        async fn log_missing_dish(
            &self,
            title: &str,
            _description: Option<&str>,
        ) -> StorageResult<()> {
            self.missing.lock().push(title.to_string());
            Ok(())
        }
    }
}
