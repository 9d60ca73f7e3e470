use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use imageforge_contracts::generation::ProviderKeys;

pub const DEFAULT_OPENAI_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_FIREWORKS_API_BASE: &str = "https://api.fireworks.ai/inference/v1";
pub const DEFAULT_STABILITY_API_BASE: &str = "https://api.stability.ai";
pub const DEFAULT_GCS_API_BASE: &str = "https://storage.googleapis.com";
pub const DEFAULT_BUCKET_DIR: &str = "imageforge-bucket";
pub const DEFAULT_MIN_CREDITS: u64 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiBases {
    pub openai: String,
    pub fireworks: String,
    pub stability: String,
}

impl Default for ApiBases {
    fn default() -> Self {
        Self {
            openai: DEFAULT_OPENAI_API_BASE.to_string(),
            fireworks: DEFAULT_FIREWORKS_API_BASE.to_string(),
            stability: DEFAULT_STABILITY_API_BASE.to_string(),
        }
    }
}

impl ApiBases {
    /// Points every vendor at one host, e.g. a local mock server.
    pub fn all(base: &str) -> Self {
        let base = normalize_base(base);
        Self {
            openai: base.clone(),
            fireworks: base.clone(),
            stability: base,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BucketConfig {
    Local {
        root: PathBuf,
    },
    Gcs {
        api_base: String,
        bucket: String,
        access_token: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SigningConfig {
    /// Unset means a per-process secret; URLs then stop verifying on restart.
    pub secret: Option<String>,
    pub public_base_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub api_bases: ApiBases,
    pub platform_keys: ProviderKeys,
    pub min_credits: u64,
    pub http_timeout: Option<Duration>,
    pub bucket: BucketConfig,
    pub signing: SigningConfig,
    pub signed_url_expires_at: DateTime<Utc>,
    pub events_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_bases: ApiBases::default(),
            platform_keys: ProviderKeys::default(),
            min_credits: DEFAULT_MIN_CREDITS,
            http_timeout: None,
            bucket: BucketConfig::Local {
                root: PathBuf::from(DEFAULT_BUCKET_DIR),
            },
            signing: SigningConfig::default(),
            signed_url_expires_at: signed_url_expiry(),
            events_path: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let base = |key: &str, default: &str| {
            value(key)
                .map(|raw| normalize_base(&raw))
                .filter(|raw| !raw.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let mut config = Self {
            api_bases: ApiBases {
                openai: base("OPENAI_API_BASE", DEFAULT_OPENAI_API_BASE),
                fireworks: base("FIREWORKS_API_BASE", DEFAULT_FIREWORKS_API_BASE),
                stability: base("STABILITY_API_BASE", DEFAULT_STABILITY_API_BASE),
            },
            platform_keys: ProviderKeys {
                openai: value("OPENAI_API_KEY"),
                fireworks: value("FIREWORKS_API_KEY"),
                stability: value("STABILITY_API_KEY"),
            },
            signing: SigningConfig {
                secret: value("IMAGEFORGE_SIGNING_SECRET"),
                public_base_url: value("IMAGEFORGE_PUBLIC_BASE_URL").map(|raw| normalize_base(&raw)),
            },
            events_path: value("IMAGEFORGE_EVENTS").map(PathBuf::from),
            ..Self::default()
        };

        if let Some(raw) = value("IMAGEFORGE_MIN_CREDITS") {
            config.min_credits = raw
                .parse()
                .with_context(|| format!("invalid IMAGEFORGE_MIN_CREDITS '{raw}'"))?;
        }
        if let Some(raw) = value("IMAGEFORGE_HTTP_TIMEOUT_SECS") {
            let secs: u64 = raw
                .parse()
                .with_context(|| format!("invalid IMAGEFORGE_HTTP_TIMEOUT_SECS '{raw}'"))?;
            config.http_timeout = Some(Duration::from_secs(secs));
        }

        if let Some(bucket) = value("IMAGEFORGE_GCS_BUCKET") {
            let access_token = value("IMAGEFORGE_GCS_TOKEN")
                .context("IMAGEFORGE_GCS_TOKEN must be set when IMAGEFORGE_GCS_BUCKET is")?;
            config.bucket = BucketConfig::Gcs {
                api_base: base("IMAGEFORGE_GCS_API_BASE", DEFAULT_GCS_API_BASE),
                bucket,
                access_token,
            };
        } else if let Some(root) = value("IMAGEFORGE_BUCKET_DIR") {
            config.bucket = BucketConfig::Local {
                root: PathBuf::from(root),
            };
        }

        Ok(config)
    }

    pub fn with_bucket_dir(mut self, root: impl Into<PathBuf>) -> Self {
        self.bucket = BucketConfig::Local { root: root.into() };
        self
    }

    pub fn with_events_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.events_path = Some(path.into());
        self
    }

    pub fn with_platform_keys(mut self, keys: ProviderKeys) -> Self {
        self.platform_keys = keys;
        self
    }
}

/// Fixed expiry stamped on every signed read URL: 2125-03-17T00:00:00Z.
pub fn signed_url_expiry() -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(2125, 3, 17)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

pub(crate) fn normalize_base(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}
