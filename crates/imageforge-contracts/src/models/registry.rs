use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// The fixed set of image models a request can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageModel {
    #[serde(rename = "dall-e")]
    DallE,
    #[serde(rename = "stable-diffusion-xl")]
    StableDiffusionXl,
    #[serde(rename = "stability-sd3-turbo")]
    StabilitySd3Turbo,
    #[serde(rename = "playground-v2")]
    PlaygroundV2,
}

impl ImageModel {
    pub const ALL: [ImageModel; 4] = [
        ImageModel::DallE,
        ImageModel::StableDiffusionXl,
        ImageModel::StabilitySd3Turbo,
        ImageModel::PlaygroundV2,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ImageModel::DallE => "dall-e",
            ImageModel::StableDiffusionXl => "stable-diffusion-xl",
            ImageModel::StabilitySd3Turbo => "stability-sd3-turbo",
            ImageModel::PlaygroundV2 => "playground-v2",
        }
    }
}

impl fmt::Display for ImageModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageModel {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        ImageModel::ALL
            .into_iter()
            .find(|model| model.as_str() == trimmed)
            .ok_or_else(|| format!("Unsupported model '{trimmed}'."))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub model: ImageModel,
    pub provider: String,
    pub vendor_model: String,
    pub capabilities: Vec<String>,
}

impl ModelSpec {
    pub fn name(&self) -> &'static str {
        self.model.as_str()
    }

    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<ImageModel, ModelSpec>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<ImageModel, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, model: ImageModel) -> Option<&ModelSpec> {
        self.models.get(&model)
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }
}

fn default_models() -> IndexMap<ImageModel, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |model: ImageModel, provider: &str, vendor_model: &str| {
        map.insert(
            model,
            ModelSpec {
                model,
                provider: provider.to_string(),
                vendor_model: vendor_model.to_string(),
                capabilities: vec!["image".to_string(), "edit".to_string()],
            },
        );
    };

    insert(ImageModel::DallE, "openai", "dall-e-2");
    insert(
        ImageModel::StableDiffusionXl,
        "fireworks",
        "stable-diffusion-xl-1024-v1-0",
    );
    insert(ImageModel::StabilitySd3Turbo, "stability", "sd3-turbo");
    insert(
        ImageModel::PlaygroundV2,
        "fireworks",
        "playground-v2-1024px-aesthetic",
    );

    map
}
