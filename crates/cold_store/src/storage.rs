//! A small object-store interface, generalized from the teacher's
//! `Storage` trait: `get`/`put`/`list` by key, with two implementations --
//! a local-disk backend for tests and single-node deployments, and an S3
//! backend for production. Everything above this layer (the chunk codec,
//! the cold-tier append/read logic) is written against the trait and
//! never knows which backend it's talking to.

use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use errors::ErrorMetadata;

/// Custom metadata carried alongside an object, per the persisted-state
/// layout: `sample_count`, `compressed_size`, `original_size`,
/// `created_at`.
pub type ObjectMetadata = std::collections::BTreeMap<String, String>;

#[async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<(Bytes, ObjectMetadata)>>;
    async fn put(&self, key: &str, body: Bytes, metadata: ObjectMetadata) -> anyhow::Result<()>;
    async fn list_prefix(&self, prefix: &str) -> anyhow::Result<Vec<String>>;
}

/// Lets callers pick a concrete backend at startup (local disk vs. S3) and
/// hand `ColdStore` a single trait object, instead of making every binary
/// monomorphize over the backend type -- the same shape the teacher's
/// `Arc<dyn Persistence>` takes for its own pluggable storage backends.
#[async_trait]
impl Storage for std::sync::Arc<dyn Storage> {
    async fn get(&self, key: &str) -> anyhow::Result<Option<(Bytes, ObjectMetadata)>> {
        (**self).get(key).await
    }

    async fn put(&self, key: &str, body: Bytes, metadata: ObjectMetadata) -> anyhow::Result<()> {
        (**self).put(key, body, metadata).await
    }

    async fn list_prefix(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        (**self).list_prefix(prefix).await
    }
}

/// Local filesystem-backed storage. The object key becomes a relative
/// path under `root`; metadata is stored as a JSON sidecar file
/// `{key}.meta.json` since plain files have no custom-header concept.
pub struct LocalDiskStorage {
    root: PathBuf,
}

impl LocalDiskStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        let mut p = self.object_path(key);
        let mut name = p.file_name().unwrap_or_default().to_os_string();
        name.push(".meta.json");
        p.set_file_name(name);
        p
    }
}

#[async_trait]
impl Storage for LocalDiskStorage {
    async fn get(&self, key: &str) -> anyhow::Result<Option<(Bytes, ObjectMetadata)>> {
        let path = self.object_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let body = tokio::fs::read(&path).await?;
        let meta_path = self.meta_path(key);
        let metadata = if meta_path.exists() {
            let raw = tokio::fs::read(&meta_path).await?;
            serde_json::from_slice(&raw).unwrap_or_default()
        } else {
            ObjectMetadata::default()
        };
        Ok(Some((Bytes::from(body), metadata)))
    }

    async fn put(&self, key: &str, body: Bytes, metadata: ObjectMetadata) -> anyhow::Result<()> {
        let path = self.object_path(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &body).await?;
        let meta_path = self.meta_path(key);
        tokio::fs::write(&meta_path, serde_json::to_vec(&metadata)?).await?;
        Ok(())
    }

    async fn list_prefix(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        let root = self.root.clone();
        let prefix_path = root.join(prefix);
        let mut out = Vec::new();
        let mut stack = vec![prefix_path.clone()];
        while let Some(dir) = stack.pop() {
            if !dir.exists() {
                continue;
            }
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(e) => e,
                Err(_) => continue,
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if let Some(name) = path.to_str() {
                    if name.ends_with(".meta.json") {
                        continue;
                    }
                    if let Ok(rel) = path.strip_prefix(&root) {
                        if let Some(rel_str) = rel.to_str() {
                            out.push(rel_str.to_string());
                        }
                    }
                }
            }
        }
        Ok(out)
    }
}

/// S3-backed storage for production deployments. `bucket`/`prefix` select
/// where chunk objects land; `prefix` is prepended to every key so
/// multiple deployments can share one bucket.
pub struct S3Storage {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: String,
}

impl S3Storage {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self { client, bucket: bucket.into(), prefix: prefix.into() }
    }

    pub async fn from_env(bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        let config = aws_config::load_from_env().await;
        let client = aws_sdk_s3::Client::new(&config);
        Self::new(client, bucket, prefix)
    }

    fn full_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.prefix.trim_end_matches('/'), key)
        }
    }
}

#[async_trait]
impl Storage for S3Storage {
    async fn get(&self, key: &str) -> anyhow::Result<Option<(Bytes, ObjectMetadata)>> {
        let resp = self.client.get_object().bucket(&self.bucket).key(self.full_key(key)).send().await;
        let output = match resp {
            Ok(o) => o,
            Err(e) => {
                if is_not_found(&e) {
                    return Ok(None);
                }
                return Err(anyhow::anyhow!(e).context(ErrorMetadata::unavailable(
                    "ColdStoreUnreachable",
                    "failed to read cold-tier object from S3",
                )));
            },
        };
        let metadata: ObjectMetadata = output.metadata().cloned().unwrap_or_default().into_iter().collect();
        let body = output.body.collect().await?.into_bytes();
        Ok(Some((body, metadata)))
    }

    async fn put(&self, key: &str, body: Bytes, metadata: ObjectMetadata) -> anyhow::Result<()> {
        let mut req = self.client.put_object().bucket(&self.bucket).key(self.full_key(key)).body(body.into());
        for (k, v) in metadata {
            req = req.metadata(k, v);
        }
        req.send().await.map_err(|e| {
            anyhow::anyhow!(e).context(ErrorMetadata::unavailable("ColdStoreUnreachable", "failed to write cold-tier object to S3"))
        })?;
        Ok(())
    }

    async fn list_prefix(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        let mut out = Vec::new();
        let mut continuation = None;
        loop {
            let mut req = self.client.list_objects_v2().bucket(&self.bucket).prefix(self.full_key(prefix));
            if let Some(token) = continuation.take() {
                req = req.continuation_token(token);
            }
            let resp = req.send().await.map_err(|e| {
                anyhow::anyhow!(e).context(ErrorMetadata::unavailable("ColdStoreUnreachable", "failed to list cold-tier objects"))
            })?;
            for obj in resp.contents() {
                if let Some(k) = obj.key() {
                    let relative = if self.prefix.is_empty() {
                        k.to_string()
                    } else {
                        k.strip_prefix(self.prefix.trim_end_matches('/')).and_then(|s| s.strip_prefix('/')).unwrap_or(k).to_string()
                    };
                    out.push(relative);
                }
            }
            if resp.is_truncated().unwrap_or(false) {
                continuation = resp.next_continuation_token().map(|s| s.to_string());
            } else {
                break;
            }
        }
        Ok(out)
    }
}

fn is_not_found(err: &aws_sdk_s3::error::SdkError<aws_sdk_s3::operation::get_object::GetObjectError>) -> bool {
    err.as_service_error().map(|e| e.is_no_such_key()).unwrap_or(false)
}
