//! Blob store for webhook payloads too large for a job record.
//!
//! Backends:
//! - S3-compatible storage in production/staging
//! - On-disk storage for local dev
//! - In-memory storage for tests
//!
//! This is a small wrapper around `object_store`, which already provides
//! S3, local filesystem, and in-memory backends. Payload objects are written
//! once and never mutated.

use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use object_store::path::Path;
use object_store::{ObjectStore, ObjectStoreExt, PutMode, PutOptions, PutPayload};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid storage config: {0}")]
    InvalidConfig(String),

    #[error("object {0} already exists")]
    AlreadyExists(String),

    #[error("object {0} not found")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object_store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    S3,
    Filesystem,
    Memory,
}

impl StorageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageKind::S3 => "s3",
            StorageKind::Filesystem => "filesystem",
            StorageKind::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub allow_http: bool,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub virtual_hosted_style: bool,
}

#[derive(Debug, Clone)]
pub enum StorageBackendConfig {
    S3(S3Config),
    Filesystem { root: PathBuf },
    Memory,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackendConfig,
    /// Optional key prefix applied to all object keys.
    pub prefix: Option<String>,
}

const DEFAULT_FS_ROOT: &str = "./data/payloads";

impl StorageConfig {
    pub fn memory() -> Self {
        Self {
            backend: StorageBackendConfig::Memory,
            prefix: None,
        }
    }

    pub fn filesystem(root: impl Into<PathBuf>) -> Self {
        Self {
            backend: StorageBackendConfig::Filesystem { root: root.into() },
            prefix: None,
        }
    }

    pub fn s3(cfg: S3Config) -> Self {
        Self {
            backend: StorageBackendConfig::S3(cfg),
            prefix: None,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = non_empty(prefix.into());
        self
    }

    /// Build a config from environment variables.
    ///
    /// Selection rules:
    /// - If `STORAGE_BACKEND` is set: use it (`s3`, `filesystem`, `memory`)
    /// - Otherwise: default to filesystem (`./data/payloads`)
    ///
    /// S3 env vars (S3-compatible):
    /// - `S3_BUCKET` (required when backend is `s3`)
    /// - `AWS_REGION` (default: `us-east-1`)
    /// - `S3_ENDPOINT` (optional, e.g. `http://localhost:9000`)
    /// - `S3_ALLOW_HTTP` (`true`/`false`, default: auto true if endpoint is http://)
    /// - `S3_VIRTUAL_HOSTED_STYLE` (`true`/`false`, default: false)
    /// - `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, `AWS_SESSION_TOKEN` (optional)
    ///
    /// Filesystem env vars:
    /// - `STORAGE_FS_ROOT` (default: `./data/payloads`)
    ///
    /// Common:
    /// - `STORAGE_PREFIX` (optional; defaults to the deployment key passed in)
    pub fn from_env(deployment_key: &str) -> Result<Self, StorageError> {
        Self::from_lookup(deployment_key, |name| std::env::var(name).ok())
    }

    /// Same as [`StorageConfig::from_env`] with an injectable variable source.
    pub fn from_lookup(
        deployment_key: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, StorageError> {
        let var = |name: &str| lookup(name).and_then(non_empty);

        let fs_root = || {
            var("STORAGE_FS_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_FS_ROOT))
        };

        let cfg = match var("STORAGE_BACKEND").as_deref() {
            Some("s3") => Self::s3(read_s3_config(&var)?),
            Some("filesystem") | Some("fs") | None => Self::filesystem(fs_root()),
            Some("memory") | Some("mem") => Self::memory(),
            Some(other) => {
                return Err(StorageError::InvalidConfig(format!(
                    "unsupported STORAGE_BACKEND={other} (expected s3|filesystem|memory)"
                )));
            }
        };

        let prefix = var("STORAGE_PREFIX").unwrap_or_else(|| deployment_key.to_string());
        Ok(cfg.with_prefix(prefix))
    }
}

/// Handle to the blob store. Cloning shares the backend.
#[derive(Clone)]
pub struct Storage {
    kind: StorageKind,
    store: Arc<dyn ObjectStore>,
    prefix: Option<String>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("kind", &self.kind)
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl Storage {
    pub fn kind_str(&self) -> &'static str {
        self.kind.as_str()
    }

    pub async fn new(cfg: StorageConfig) -> Result<Self, StorageError> {
        let (kind, store) = match cfg.backend {
            StorageBackendConfig::S3(s3) => (StorageKind::S3, Arc::new(build_s3(s3)?) as _),
            StorageBackendConfig::Filesystem { root } => {
                ensure_dir(&root)?;
                let fs = object_store::local::LocalFileSystem::new_with_prefix(&root)?;
                (StorageKind::Filesystem, Arc::new(fs) as _)
            }
            StorageBackendConfig::Memory => {
                let mem = object_store::memory::InMemory::new();
                (StorageKind::Memory, Arc::new(mem) as _)
            }
        };

        Ok(Self {
            kind,
            store,
            prefix: cfg.prefix.and_then(non_empty),
        })
    }

    pub async fn from_env(deployment_key: &str) -> Result<Self, StorageError> {
        Self::new(StorageConfig::from_env(deployment_key)?).await
    }

    fn to_path(&self, key: &str) -> Result<Path, StorageError> {
        let key = key.trim_start_matches('/');
        if key.is_empty() {
            return Err(StorageError::InvalidConfig(
                "object key must not be empty".to_string(),
            ));
        }

        let joined = match self.prefix.as_deref() {
            Some(prefix) => {
                let prefix = prefix.trim_matches('/');
                if prefix.is_empty() {
                    key.to_string()
                } else {
                    format!("{prefix}/{key}")
                }
            }
            None => key.to_string(),
        };

        Ok(Path::from(joined))
    }

    /// Write `bytes` only if nothing is stored under `key` yet.
    pub async fn put_bytes_once(&self, key: &str, bytes: Bytes) -> Result<(), StorageError> {
        let path = self.to_path(key)?;
        match self
            .store
            .put_opts(&path, PutPayload::from(bytes), PutOptions::from(PutMode::Create))
            .await
        {
            Ok(_) => Ok(()),
            Err(object_store::Error::AlreadyExists { .. }) => {
                Err(StorageError::AlreadyExists(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_bytes(&self, key: &str) -> Result<Bytes, StorageError> {
        let path = self.to_path(key)?;
        let res = match self.store.get(&path).await {
            Ok(res) => res,
            Err(object_store::Error::NotFound { .. }) => {
                return Err(StorageError::NotFound(key.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(res.bytes().await?)
    }

    /// Store a payload body under `key`; fails if the key is taken.
    pub async fn put_payload(&self, key: &str, value: &serde_json::Value) -> Result<u64, StorageError> {
        let bytes = serde_json::to_vec(value)?;
        let len = bytes.len() as u64;
        self.put_bytes_once(key, Bytes::from(bytes)).await?;
        Ok(len)
    }

    pub async fn get_payload(&self, key: &str) -> Result<serde_json::Value, StorageError> {
        let bytes = self.get_bytes(key).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Blob key holding the payload body of job `job_id`.
pub fn payload_key(job_id: &str) -> String {
    format!("payloads/{job_id}.json")
}

fn ensure_dir(root: &FsPath) -> Result<(), StorageError> {
    std::fs::create_dir_all(root)?;
    Ok(())
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_bool(
    var: &impl Fn(&str) -> Option<String>,
    var_name: &str,
) -> Result<Option<bool>, StorageError> {
    let Some(v) = var(var_name) else {
        return Ok(None);
    };

    let parsed = match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" => true,
        "0" | "false" | "no" | "n" => false,
        _ => {
            return Err(StorageError::InvalidConfig(format!(
                "invalid boolean for {var_name}={v} (expected true/false)"
            )));
        }
    };
    Ok(Some(parsed))
}

fn read_s3_config(var: &impl Fn(&str) -> Option<String>) -> Result<S3Config, StorageError> {
    let bucket = var("S3_BUCKET").ok_or_else(|| {
        StorageError::InvalidConfig("S3_BUCKET is required for s3 backend".into())
    })?;

    let region = var("AWS_REGION").unwrap_or_else(|| "us-east-1".to_string());

    let endpoint = var("S3_ENDPOINT");
    let allow_http = match parse_bool(var, "S3_ALLOW_HTTP")? {
        Some(v) => v,
        None => endpoint
            .as_deref()
            .is_some_and(|e| e.to_ascii_lowercase().starts_with("http://")),
    };

    let virtual_hosted_style = parse_bool(var, "S3_VIRTUAL_HOSTED_STYLE")?.unwrap_or(false);

    Ok(S3Config {
        bucket,
        region,
        endpoint,
        allow_http,
        access_key_id: var("AWS_ACCESS_KEY_ID"),
        secret_access_key: var("AWS_SECRET_ACCESS_KEY"),
        session_token: var("AWS_SESSION_TOKEN"),
        virtual_hosted_style,
    })
}

fn build_s3(cfg: S3Config) -> Result<object_store::aws::AmazonS3, StorageError> {
    let mut builder = object_store::aws::AmazonS3Builder::new()
        .with_bucket_name(cfg.bucket)
        .with_region(cfg.region)
        .with_virtual_hosted_style_request(cfg.virtual_hosted_style);

    if let Some(endpoint) = cfg.endpoint {
        builder = builder.with_endpoint(endpoint);
    }
    if cfg.allow_http {
        builder = builder.with_allow_http(true);
    }
    if let Some(access_key_id) = cfg.access_key_id {
        builder = builder.with_access_key_id(access_key_id);
    }
    if let Some(secret_access_key) = cfg.secret_access_key {
        builder = builder.with_secret_access_key(secret_access_key);
    }
    if let Some(session_token) = cfg.session_token {
        builder = builder.with_token(session_token);
    }

    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn payloads_are_write_once() -> Result<(), StorageError> {
        let storage = Storage::new(StorageConfig::memory().with_prefix("shop-1")).await?;
        let key = payload_key("01HZX");
        let body = serde_json::json!({"line_items": [1, 2, 3]});

        storage.put_payload(&key, &body).await?;
        assert_eq!(storage.get_payload(&key).await?, body);

        let again = storage.put_payload(&key, &serde_json::json!({})).await;
        assert!(matches!(again, Err(StorageError::AlreadyExists(_))));
        assert_eq!(storage.get_payload(&key).await?, body);
        Ok(())
    }

    #[tokio::test]
    async fn missing_payload_is_not_found() -> Result<(), StorageError> {
        let storage = Storage::new(StorageConfig::memory()).await?;
        let missing = storage.get_payload(&payload_key("nope")).await;
        assert!(matches!(missing, Err(StorageError::NotFound(_))));
        Ok(())
    }

    #[tokio::test]
    async fn filesystem_round_trip() -> Result<(), StorageError> {
        let dir = tempfile::tempdir()?;
        let storage = Storage::new(StorageConfig::filesystem(dir.path())).await?;

        let mut map = serde_json::Map::new();
        map.insert("a".to_string(), serde_json::Value::Number(1.into()));
        map.insert(
            "b".to_string(),
            serde_json::Value::String("two".to_string()),
        );
        let value = serde_json::Value::Object(map);
        storage.put_payload("obj.json", &value).await?;
        let got = storage.get_payload("obj.json").await?;
        assert_eq!(got, value);
        Ok(())
    }

    #[test]
    fn env_selection_scopes_prefix_by_deployment_key() -> Result<(), StorageError> {
        let vars: HashMap<&str, &str> = HashMap::from([("STORAGE_BACKEND", "memory")]);
        let cfg = StorageConfig::from_lookup("shop-9", |k| vars.get(k).map(|v| v.to_string()))?;
        assert!(matches!(cfg.backend, StorageBackendConfig::Memory));
        assert_eq!(cfg.prefix.as_deref(), Some("shop-9"));

        let vars: HashMap<&str, &str> = HashMap::from([("STORAGE_BACKEND", "s3")]);
        let missing_bucket =
            StorageConfig::from_lookup("shop-9", |k| vars.get(k).map(|v| v.to_string()));
        assert!(matches!(missing_bucket, Err(StorageError::InvalidConfig(_))));
        Ok(())
    }

    #[test]
    fn s3_http_endpoint_allows_http_by_default() -> Result<(), StorageError> {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("STORAGE_BACKEND", "s3"),
            ("S3_BUCKET", "payloads"),
            ("S3_ENDPOINT", "http://localhost:9000"),
        ]);
        let cfg = StorageConfig::from_lookup("k", |k| vars.get(k).map(|v| v.to_string()))?;
        let StorageBackendConfig::S3(s3) = cfg.backend else {
            panic!("expected s3 backend");
        };
        assert!(s3.allow_http);
        assert_eq!(s3.region, "us-east-1");
        Ok(())
    }
}
