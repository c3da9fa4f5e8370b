//! Object storage for uploaded files (avatars).
//!
//! Both backends expose objects under the same public URL shape,
//! `<base>/storage/v1/object/public/<bucket>/<path>`.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Method;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::config::{Config, IdentityType};
use crate::store::StoreType;
use crate::supabase::SupabaseClient;

/// Route prefix under which the local backend's objects are served.
pub const PUBLIC_OBJECT_PREFIX: &str = "/storage/v1/object/public";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid object path: {0}")]
    InvalidPath(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Backend(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Write an object, replacing any existing one at the same path.
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        data: Bytes,
        content_type: &str,
    ) -> StorageResult<()>;

    fn public_url(&self, bucket: &str, path: &str) -> String;

    /// Directory the portal serves under `PUBLIC_OBJECT_PREFIX`, if objects
    /// live on local disk.
    fn local_root(&self) -> Option<&Path> {
        None
    }
}

pub type SharedStorage = Arc<dyn ObjectStorage>;

/// Reject absolute paths, `..` and empty segments.
fn relative_path(bucket: &str, path: &str) -> StorageResult<PathBuf> {
    let joined = format!("{}/{}", bucket, path);
    if bucket.is_empty() || path.is_empty() || joined.split('/').any(|s| s.is_empty()) {
        return Err(StorageError::InvalidPath(joined));
    }
    let rel = PathBuf::from(&joined);
    if !rel.components().all(|c| matches!(c, Component::Normal(_))) {
        return Err(StorageError::InvalidPath(joined));
    }
    Ok(rel)
}

/// Files under `<data_dir>/storage`, served by the portal itself.
pub struct LocalStorage {
    root: PathBuf,
    public_base: String,
}

impl LocalStorage {
    pub fn new(root: PathBuf, public_url: &str) -> Self {
        Self {
            root,
            public_base: format!("{}{}", public_url.trim_end_matches('/'), PUBLIC_OBJECT_PREFIX),
        }
    }
}

#[async_trait]
impl ObjectStorage for LocalStorage {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        data: Bytes,
        _content_type: &str,
    ) -> StorageResult<()> {
        let target = self.root.join(relative_path(bucket, path)?);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, &data).await?;
        tracing::debug!("Stored {} bytes at {}", data.len(), target.display());
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/{}/{}", self.public_base, bucket, path)
    }

    fn local_root(&self) -> Option<&Path> {
        Some(&self.root)
    }
}

/// Supabase Storage buckets.
pub struct SupabaseStorage {
    client: SupabaseClient,
}

impl SupabaseStorage {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStorage for SupabaseStorage {
    fn name(&self) -> &'static str {
        "supabase"
    }

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        data: Bytes,
        content_type: &str,
    ) -> StorageResult<()> {
        relative_path(bucket, path)?;
        let url = format!("{}/object/{}/{}", self.client.storage_url(), bucket, path);
        let request = self
            .client
            .service_request(Method::POST, &url)
            .header("Content-Type", content_type)
            .header("x-upsert", "true")
            .body(data);
        SupabaseClient::send(request)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to upload file: {}", e)))?;
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        self.client.public_object_url(bucket, path)
    }
}

/// Supabase Storage whenever a Supabase backend is in use, local files otherwise.
pub fn create_storage(config: &Config) -> StorageResult<SharedStorage> {
    if config.store == StoreType::Supabase || config.identity == IdentityType::Supabase {
        let client = SupabaseClient::new(&config.supabase)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        return Ok(Arc::new(SupabaseStorage::new(client)));
    }
    Ok(Arc::new(LocalStorage::new(
        config.data_dir.join("storage"),
        &config.public_url,
    )))
}
