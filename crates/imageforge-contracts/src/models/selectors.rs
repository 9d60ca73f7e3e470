use super::registry::{ImageModel, ModelRegistry, ModelSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub requested: String,
    pub capability: String,
}

/// Resolves a requested model name against the registry.
///
/// Unlike a chat model picker there is no fallback: a request either names
/// one known model that has the needed capability, or it fails.
#[derive(Debug, Clone, Default)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_default(),
        }
    }

    pub fn select(&self, requested: &str, capability: &str) -> Result<ModelSelection, String> {
        let model: ImageModel = requested.parse()?;
        let Some(spec) = self.registry.get(model) else {
            return Err(format!("Unsupported model '{model}'."));
        };
        if !spec.supports(capability) {
            return Err(format!(
                "Model '{model}' unavailable for capability '{capability}'."
            ));
        }
        Ok(ModelSelection {
            model: spec.clone(),
            requested: requested.trim().to_string(),
            capability: capability.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::*;

    #[test]
    fn resolves_every_known_model() {
        let selector = ModelSelector::new(None);
        for model in ImageModel::ALL {
            let Ok(selection) = selector.select(model.as_str(), "image") else {
                panic!("{model} should resolve");
            };
            assert_eq!(selection.model.model, model);
            assert_eq!(selection.requested, model.as_str());
        }
    }

    #[test]
    fn default_models_map_to_vendors() {
        let registry = ModelRegistry::default();
        let provider = |model| registry.get(model).map(|spec| spec.provider.clone());
        assert_eq!(provider(ImageModel::DallE).as_deref(), Some("openai"));
        assert_eq!(
            provider(ImageModel::StableDiffusionXl).as_deref(),
            Some("fireworks")
        );
        assert_eq!(
            provider(ImageModel::PlaygroundV2).as_deref(),
            Some("fireworks")
        );
        assert_eq!(
            provider(ImageModel::StabilitySd3Turbo).as_deref(),
            Some("stability")
        );
    }

    #[test]
    fn unknown_model_has_no_fallback() {
        let err = ModelSelector::new(None)
            .select("midjourney-v6", "image")
            .err()
            .unwrap_or_default();
        assert_eq!(err, "Unsupported model 'midjourney-v6'.");
    }

    #[test]
    fn model_missing_capability_is_rejected() {
        let mut models = IndexMap::new();
        models.insert(
            ImageModel::DallE,
            ModelSpec {
                model: ImageModel::DallE,
                provider: "openai".to_string(),
                vendor_model: "dall-e-2".to_string(),
                capabilities: vec!["image".to_string()],
            },
        );
        let selector = ModelSelector::new(Some(ModelRegistry::new(Some(models))));
        assert!(selector.select("dall-e", "image").is_ok());
        let err = selector.select("dall-e", "edit").err().unwrap_or_default();
        assert_eq!(err, "Model 'dall-e' unavailable for capability 'edit'.");
        let err = selector
            .select("playground-v2", "image")
            .err()
            .unwrap_or_default();
        assert_eq!(err, "Unsupported model 'playground-v2'.");
    }

    #[test]
    fn model_names_are_case_sensitive_but_trimmed() {
        assert_eq!(" dall-e ".parse::<ImageModel>(), Ok(ImageModel::DallE));
        assert!("DALL-E".parse::<ImageModel>().is_err());
        assert_eq!(ImageModel::PlaygroundV2.to_string(), "playground-v2");
    }
}
