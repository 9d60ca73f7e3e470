use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const GENERATED_PREFIX: &str = "generated";
pub const REFERENCE_PREFIX: &str = "image-references";
pub const STORED_IMAGE_CONTENT_TYPE: &str = "image/jpeg";

/// Caller-supplied vendor keys, used only when the caller is not spending
/// platform credits.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProviderKeys {
    pub openai: Option<String>,
    pub fireworks: Option<String>,
    pub stability: Option<String>,
}

impl ProviderKeys {
    pub fn for_provider(&self, provider: &str) -> Option<&str> {
        let key = match provider {
            "openai" => self.openai.as_deref(),
            "fireworks" => self.fireworks.as_deref(),
            "stability" => self.stability.as_deref(),
            _ => None,
        };
        key.map(str::trim).filter(|value| !value.is_empty())
    }
}

impl fmt::Debug for ProviderKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = |key: &Option<String>| if key.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("ProviderKeys")
            .field("openai", &mark(&self.openai))
            .field("fireworks", &mark(&self.fireworks))
            .field("stability", &mark(&self.stability))
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct ReferenceImage {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub mime_type: String,
}

impl fmt::Debug for ReferenceImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceImage")
            .field("bytes", &self.bytes.len())
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub uid: String,
    /// Wire name of the target model, e.g. `dall-e`.
    pub model: String,
    /// Spend platform credits (platform-held vendor key) instead of `keys`.
    pub use_credits: bool,
    pub credits: Option<u64>,
    pub keys: ProviderKeys,
    pub reference: Option<ReferenceImage>,
}

impl GenerationRequest {
    pub fn new(
        prompt: impl Into<String>,
        uid: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            prompt: prompt.into(),
            uid: uid.into(),
            model: model.into(),
            use_credits: false,
            credits: None,
            keys: ProviderKeys::default(),
            reference: None,
        }
    }

    pub fn with_credits(mut self, credits: Option<u64>) -> Self {
        self.use_credits = true;
        self.credits = credits;
        self
    }

    pub fn with_keys(mut self, keys: ProviderKeys) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_reference(mut self, reference: ReferenceImage) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn capability(&self) -> &'static str {
        if self.reference.is_some() {
            "edit"
        } else {
            "image"
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.prompt.trim().is_empty() {
            return Err("Prompt is required.".to_string());
        }
        let uid = self.uid.trim();
        if uid.is_empty() {
            return Err("User id is required.".to_string());
        }
        if uid.contains('/') || uid.contains('\\') || uid == "." || uid == ".." {
            return Err(format!("Invalid user id '{uid}'."));
        }
        if let Some(reference) = &self.reference {
            if reference.bytes.is_empty() {
                return Err("Reference image is empty.".to_string());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    pub image_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredAsset {
    pub path: String,
    pub content_type: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub url: String,
}

pub fn generated_asset_path(uid: &str, stamp_millis: i64) -> String {
    format!("{GENERATED_PREFIX}/{}/{stamp_millis}.jpg", uid.trim())
}

pub fn reference_asset_path(uid: &str, stamp_millis: i64) -> String {
    format!("{REFERENCE_PREFIX}/{}/{stamp_millis}.jpg", uid.trim())
}
