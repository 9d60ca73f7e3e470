use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use imageforge_contracts::generation::{
    generated_asset_path, reference_asset_path, StoredAsset, STORED_IMAGE_CONTENT_TYPE,
};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::config::normalize_base;
use crate::transport::{http_client, truncate_text};

/// A private bucket that can hand out signed read links.
pub trait ObjectStore: Send + Sync {
    fn name(&self) -> &str;
    fn put_object(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<()>;
    fn set_metadata(&self, path: &str, metadata: &Map<String, Value>) -> Result<()>;
    fn signed_read_url(&self, path: &str, expires_at: DateTime<Utc>) -> Result<String>;
}

/// Signs `<public_base>/<path>?expires=<unix>&signature=<hex>` links.
#[derive(Clone)]
pub struct UrlSigner {
    secret: String,
    public_base: String,
}

impl std::fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlSigner")
            .field("public_base", &self.public_base)
            .finish()
    }
}

impl UrlSigner {
    pub fn new(secret: impl Into<String>, public_base: &str) -> Self {
        Self {
            secret: secret.into(),
            public_base: normalize_base(public_base),
        }
    }

    pub fn sign(&self, path: &str, expires_at: DateTime<Utc>) -> String {
        let expires = expires_at.timestamp();
        format!(
            "{}/{}?expires={expires}&signature={}",
            self.public_base,
            path.trim_start_matches('/'),
            self.signature(path, expires)
        )
    }

    pub fn verify(&self, path: &str, expires: i64, signature: &str, now: DateTime<Utc>) -> bool {
        if now.timestamp() > expires {
            return false;
        }
        self.signature(path, expires) == signature.trim().to_ascii_lowercase()
    }

    fn signature(&self, path: &str, expires: i64) -> String {
        // Secret on both sides of the message; a bare prefix would allow length extension.
        let mut hasher = Sha256::new();
        hasher.update(self.secret.as_bytes());
        hasher.update(b"\n");
        hasher.update(path.trim_start_matches('/').as_bytes());
        hasher.update(b"\n");
        hasher.update(expires.to_string().as_bytes());
        hasher.update(b"\n");
        hasher.update(self.secret.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Directory-backed bucket. Metadata lives in a `<object>.meta.json` sidecar.
#[derive(Debug, Clone)]
pub struct LocalBucket {
    root: PathBuf,
    signer: UrlSigner,
}

impl LocalBucket {
    pub fn new(root: impl Into<PathBuf>, signer: UrlSigner) -> Self {
        Self {
            root: root.into(),
            signer,
        }
    }

    pub fn object_path(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        if path.trim().is_empty()
            || !relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)))
        {
            bail!("invalid object path '{path}'");
        }
        Ok(self.root.join(relative))
    }

    pub fn sidecar_path(&self, path: &str) -> Result<PathBuf> {
        let object = self.object_path(path)?;
        let mut name = object
            .file_name()
            .map(|value| value.to_os_string())
            .ok_or_else(|| anyhow!("invalid object path '{path}'"))?;
        name.push(".meta.json");
        Ok(object.with_file_name(name))
    }

    pub fn read_sidecar(&self, path: &str) -> Result<Map<String, Value>> {
        let sidecar = self.sidecar_path(path)?;
        if !sidecar.exists() {
            return Ok(Map::new());
        }
        let raw = fs::read_to_string(&sidecar)
            .with_context(|| format!("failed reading {}", sidecar.display()))?;
        let parsed: Value = serde_json::from_str(&raw)
            .with_context(|| format!("invalid metadata sidecar {}", sidecar.display()))?;
        Ok(parsed.as_object().cloned().unwrap_or_default())
    }

    fn write_sidecar(&self, path: &str, sidecar: &Map<String, Value>) -> Result<()> {
        let target = self.sidecar_path(path)?;
        let raw = serde_json::to_string_pretty(sidecar)?;
        fs::write(&target, raw).with_context(|| format!("failed to write {}", target.display()))
    }
}

impl ObjectStore for LocalBucket {
    fn name(&self) -> &str {
        "local"
    }

    fn put_object(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<()> {
        let target = self.object_path(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(&target, bytes).with_context(|| format!("failed to write {}", target.display()))?;
        let mut sidecar = Map::new();
        sidecar.insert("contentType".to_string(), json!(content_type));
        sidecar.insert("size".to_string(), json!(bytes.len()));
        self.write_sidecar(path, &sidecar)
    }

    fn set_metadata(&self, path: &str, metadata: &Map<String, Value>) -> Result<()> {
        if !self.object_path(path)?.exists() {
            bail!("object '{path}' does not exist");
        }
        let mut sidecar = self.read_sidecar(path)?;
        let merged = sidecar
            .entry("metadata".to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(existing) = merged {
            for (key, value) in metadata {
                existing.insert(key.clone(), value.clone());
            }
        }
        self.write_sidecar(path, &sidecar)
    }

    fn signed_read_url(&self, path: &str, expires_at: DateTime<Utc>) -> Result<String> {
        self.object_path(path)?;
        Ok(self.signer.sign(path, expires_at))
    }
}

/// Google Cloud Storage over its JSON API with a bearer access token.
pub struct GcsBucket {
    api_base: String,
    bucket: String,
    access_token: String,
    http: HttpClient,
    signer: UrlSigner,
}

impl GcsBucket {
    /// `timeout` bounds each upload and metadata call, as for vendor requests.
    pub fn new(
        api_base: &str,
        bucket: impl Into<String>,
        access_token: impl Into<String>,
        signer: UrlSigner,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        Ok(Self {
            api_base: normalize_base(api_base),
            bucket: bucket.into(),
            access_token: access_token.into(),
            http: http_client(timeout)?,
            signer,
        })
    }

    fn upload_url(&self, path: &str) -> Result<Url> {
        let base = format!("{}/upload/storage/v1/b/{}/o", self.api_base, self.bucket);
        Url::parse_with_params(&base, &[("uploadType", "media"), ("name", path)])
            .with_context(|| format!("invalid upload url for '{path}'"))
    }

    fn object_url(&self, path: &str) -> Result<Url> {
        let base = format!("{}/storage/v1/b/{}/o", self.api_base, self.bucket);
        let mut url = Url::parse(&base).with_context(|| format!("invalid object url '{base}'"))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("GCS api base cannot carry object paths"))?
            .push(path);
        Ok(url)
    }

    fn check(&self, action: &str, response: reqwest::blocking::Response) -> Result<()> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().unwrap_or_default();
        bail!(
            "GCS {action} failed ({}): {}",
            status.as_u16(),
            truncate_text(&body, 512)
        );
    }
}

impl ObjectStore for GcsBucket {
    fn name(&self) -> &str {
        "gcs"
    }

    fn put_object(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<()> {
        let url = self.upload_url(path)?;
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.access_token)
            .header(CONTENT_TYPE, content_type)
            .body(bytes.to_vec())
            .send()
            .with_context(|| format!("GCS upload request failed ({path})"))?;
        self.check("upload", response)
    }

    fn set_metadata(&self, path: &str, metadata: &Map<String, Value>) -> Result<()> {
        let url = self.object_url(path)?;
        let response = self
            .http
            .patch(url)
            .bearer_auth(&self.access_token)
            .json(&json!({ "metadata": metadata }))
            .send()
            .with_context(|| format!("GCS metadata request failed ({path})"))?;
        self.check("metadata update", response)
    }

    fn signed_read_url(&self, path: &str, expires_at: DateTime<Utc>) -> Result<String> {
        Ok(self.signer.sign(path, expires_at))
    }
}

/// Writes generated and reference images under their per-user prefixes.
pub struct AssetStore {
    store: Box<dyn ObjectStore>,
    expires_at: DateTime<Utc>,
}

impl AssetStore {
    pub fn new(store: Box<dyn ObjectStore>, expires_at: DateTime<Utc>) -> Self {
        Self { store, expires_at }
    }

    pub fn backend(&self) -> &str {
        self.store.name()
    }

    pub fn persist_generated(&self, uid: &str, prompt: &str, bytes: &[u8]) -> Result<StoredAsset> {
        let path = generated_asset_path(uid, timestamp_millis());
        let mut metadata = Map::new();
        metadata.insert("prompt".to_string(), Value::String(prompt.to_string()));
        self.persist(path, bytes, metadata)
    }

    pub fn persist_reference(&self, uid: &str, bytes: &[u8]) -> Result<StoredAsset> {
        let path = reference_asset_path(uid, timestamp_millis());
        self.persist(path, bytes, Map::new())
    }

    fn persist(
        &self,
        path: String,
        bytes: &[u8],
        metadata: Map<String, Value>,
    ) -> Result<StoredAsset> {
        self.store
            .put_object(&path, bytes, STORED_IMAGE_CONTENT_TYPE)
            .with_context(|| format!("failed to store {path}"))?;
        if !metadata.is_empty() {
            self.store
                .set_metadata(&path, &metadata)
                .with_context(|| format!("failed to set metadata on {path}"))?;
        }
        let url = self.store.signed_read_url(&path, self.expires_at)?;
        debug!(path = %path, backend = self.store.name(), "signed read url issued");
        info!(path = %path, bytes = bytes.len(), "asset stored");
        Ok(StoredAsset {
            path,
            content_type: STORED_IMAGE_CONTENT_TYPE.to_string(),
            metadata,
            url,
        })
    }
}

fn timestamp_millis() -> i64 {
    Utc::now().timestamp_millis()
}
