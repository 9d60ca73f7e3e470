use anyhow::{anyhow, Result};
use imageforge_contracts::generation::ReferenceImage;
use imageforge_contracts::models::{ImageModel, ModelSelector, ModelSpec};
use imageforge_contracts::providers::{NamedProvider, ProviderRegistry};
use serde_json::{json, Map, Value};

use crate::config::ApiBases;

pub const DALLE_SIZE: &str = "1024x1024";
pub const FIREWORKS_CFG_SCALE: u32 = 7;
pub const FIREWORKS_DIMENSION: u32 = 1024;
pub const FIREWORKS_STEPS: u32 = 30;
pub const FIREWORKS_IMAGE_STRENGTH: &str = "0.5";
pub const SD3_IMAGE_STRENGTH: &str = "0.7";

#[derive(Clone, PartialEq, Eq)]
pub enum FormField {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        file_name: String,
        mime_type: String,
        bytes: Vec<u8>,
    },
}

impl FormField {
    fn text(name: &str, value: impl Into<String>) -> Self {
        FormField::Text {
            name: name.to_string(),
            value: value.into(),
        }
    }

    fn file(name: &str, reference: &ReferenceImage) -> Self {
        FormField::File {
            name: name.to_string(),
            file_name: reference.file_name.clone(),
            mime_type: reference.mime_type.clone(),
            bytes: reference.bytes.clone(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            FormField::Text { name, .. } | FormField::File { name, .. } => name,
        }
    }

    fn manifest(&self) -> Value {
        match self {
            FormField::Text { name, value } => json!({
                "field": name,
                "value": value,
            }),
            FormField::File {
                name,
                file_name,
                mime_type,
                bytes,
            } => json!({
                "field": name,
                "file_name": file_name,
                "mime_type": mime_type,
                "bytes": bytes.len(),
            }),
        }
    }
}

impl std::fmt::Debug for FormField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.manifest())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(Value),
    Form(Vec<FormField>),
}

/// How the vendor response turns into image bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseDecoding {
    /// `{"data": [{"url" | "b64_json": ...}]}`; URLs cost a second request.
    OpenAiImageData,
    RawBytes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VendorRequest {
    pub model: ImageModel,
    pub provider: String,
    pub endpoint: String,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
    pub decoding: ResponseDecoding,
}

impl VendorRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn form_text(&self, name: &str) -> Option<&str> {
        let RequestBody::Form(fields) = &self.body else {
            return None;
        };
        fields.iter().find_map(|field| match field {
            FormField::Text { name: key, value } if key == name => Some(value.as_str()),
            _ => None,
        })
    }

    /// Loggable description of the request with credentials masked and file
    /// parts reduced to their sizes.
    pub fn manifest(&self) -> Map<String, Value> {
        let headers = self
            .headers
            .iter()
            .map(|(key, value)| {
                let shown = if key.eq_ignore_ascii_case("authorization") {
                    "Bearer ***".to_string()
                } else {
                    value.clone()
                };
                (key.clone(), Value::String(shown))
            })
            .collect::<Map<String, Value>>();
        let (encoding, payload) = match &self.body {
            RequestBody::Json(value) => ("json", value.clone()),
            RequestBody::Form(fields) => (
                "multipart",
                Value::Array(fields.iter().map(FormField::manifest).collect()),
            ),
        };
        let mut manifest = Map::new();
        manifest.insert("model".to_string(), json!(self.model.as_str()));
        manifest.insert("provider".to_string(), json!(self.provider));
        manifest.insert("method".to_string(), json!("POST"));
        manifest.insert("endpoint".to_string(), json!(self.endpoint));
        manifest.insert("headers".to_string(), Value::Object(headers));
        manifest.insert("encoding".to_string(), json!(encoding));
        manifest.insert("payload".to_string(), payload);
        manifest
    }
}

pub struct RouteContext<'a> {
    pub bases: &'a ApiBases,
    pub spec: &'a ModelSpec,
    pub prompt: &'a str,
    pub api_key: &'a str,
}

pub struct Route {
    pub endpoint: String,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

type TextRoute = fn(&RouteContext<'_>) -> Route;
type ReferenceRoute = fn(&RouteContext<'_>, &ReferenceImage) -> Route;

/// One row of the dispatch table.
#[derive(Clone)]
pub struct VendorProfile {
    pub model: ImageModel,
    pub decoding: ResponseDecoding,
    text_to_image: TextRoute,
    image_to_image: ReferenceRoute,
}

impl NamedProvider for VendorProfile {
    fn name(&self) -> &str {
        self.model.as_str()
    }
}

impl std::fmt::Debug for VendorProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VendorProfile")
            .field("model", &self.model)
            .field("decoding", &self.decoding)
            .finish()
    }
}

pub fn default_dispatch_table() -> ProviderRegistry<VendorProfile> {
    ProviderRegistry::new(vec![
        VendorProfile {
            model: ImageModel::DallE,
            decoding: ResponseDecoding::OpenAiImageData,
            text_to_image: openai_generations,
            image_to_image: openai_edits,
        },
        VendorProfile {
            model: ImageModel::StableDiffusionXl,
            decoding: ResponseDecoding::RawBytes,
            text_to_image: fireworks_text_to_image,
            image_to_image: fireworks_image_to_image,
        },
        VendorProfile {
            model: ImageModel::StabilitySd3Turbo,
            decoding: ResponseDecoding::RawBytes,
            text_to_image: stability_text_to_image,
            image_to_image: stability_image_to_image,
        },
        VendorProfile {
            model: ImageModel::PlaygroundV2,
            decoding: ResponseDecoding::RawBytes,
            text_to_image: fireworks_text_to_image,
            image_to_image: fireworks_image_to_image,
        },
    ])
}

pub struct Dispatcher {
    selector: ModelSelector,
    table: ProviderRegistry<VendorProfile>,
    bases: ApiBases,
}

pub struct ResolvedModel<'a> {
    pub spec: ModelSpec,
    profile: &'a VendorProfile,
    bases: &'a ApiBases,
}

impl Dispatcher {
    pub fn new(bases: ApiBases) -> Self {
        Self {
            selector: ModelSelector::new(None),
            table: default_dispatch_table(),
            bases,
        }
    }

    /// Registered models that also have a dispatch route.
    pub fn models(&self) -> Vec<ModelSpec> {
        self.selector
            .registry
            .list()
            .filter(|spec| self.table.contains(spec.name()))
            .cloned()
            .collect()
    }

    pub fn resolve(&self, requested: &str, capability: &str) -> Result<ResolvedModel<'_>> {
        let selection = self
            .selector
            .select(requested, capability)
            .map_err(|err| anyhow!(err))?;
        let profile = self
            .table
            .get(selection.model.name())
            .ok_or_else(|| anyhow!("Unsupported model '{}'.", selection.model.name()))?;
        Ok(ResolvedModel {
            spec: selection.model,
            profile,
            bases: &self.bases,
        })
    }
}

impl ResolvedModel<'_> {
    pub fn provider(&self) -> &str {
        self.spec.provider.as_str()
    }

    pub fn build(
        &self,
        prompt: &str,
        reference: Option<&ReferenceImage>,
        api_key: &str,
    ) -> VendorRequest {
        let ctx = RouteContext {
            bases: self.bases,
            spec: &self.spec,
            prompt,
            api_key,
        };
        let route = match reference {
            Some(reference) => (self.profile.image_to_image)(&ctx, reference),
            None => (self.profile.text_to_image)(&ctx),
        };
        VendorRequest {
            model: self.profile.model,
            provider: self.spec.provider.clone(),
            endpoint: route.endpoint,
            headers: route.headers,
            body: route.body,
            decoding: self.profile.decoding,
        }
    }
}

fn bearer(api_key: &str) -> (String, String) {
    ("Authorization".to_string(), format!("Bearer {api_key}"))
}

fn header(name: &str, value: &str) -> (String, String) {
    (name.to_string(), value.to_string())
}

fn openai_generations(ctx: &RouteContext<'_>) -> Route {
    Route {
        endpoint: format!("{}/images/generations", ctx.bases.openai),
        headers: vec![
            header("Content-Type", "application/json"),
            bearer(ctx.api_key),
        ],
        body: RequestBody::Json(json!({
            "prompt": ctx.prompt,
            "n": 1,
            "size": DALLE_SIZE,
        })),
    }
}

fn openai_edits(ctx: &RouteContext<'_>, reference: &ReferenceImage) -> Route {
    Route {
        endpoint: format!("{}/images/edits", ctx.bases.openai),
        headers: vec![bearer(ctx.api_key)],
        body: RequestBody::Form(vec![
            FormField::file("image", reference),
            FormField::text("prompt", ctx.prompt),
            FormField::text("n", "1"),
            FormField::text("size", DALLE_SIZE),
        ]),
    }
}

fn fireworks_model_endpoint(ctx: &RouteContext<'_>) -> String {
    format!(
        "{}/image_generation/accounts/fireworks/models/{}",
        ctx.bases.fireworks, ctx.spec.vendor_model
    )
}

fn fireworks_text_to_image(ctx: &RouteContext<'_>) -> Route {
    Route {
        endpoint: fireworks_model_endpoint(ctx),
        headers: vec![
            header("Content-Type", "application/json"),
            header("Accept", "image/jpeg"),
            bearer(ctx.api_key),
        ],
        body: RequestBody::Json(json!({
            "cfg_scale": FIREWORKS_CFG_SCALE,
            "height": FIREWORKS_DIMENSION,
            "width": FIREWORKS_DIMENSION,
            "samples": 1,
            "steps": FIREWORKS_STEPS,
            "seed": 0,
            "safety_check": false,
            "prompt": ctx.prompt,
        })),
    }
}

fn fireworks_image_to_image(ctx: &RouteContext<'_>, reference: &ReferenceImage) -> Route {
    Route {
        endpoint: format!("{}/image_to_image", fireworks_model_endpoint(ctx)),
        headers: vec![header("Accept", "image/jpeg"), bearer(ctx.api_key)],
        body: RequestBody::Form(vec![
            FormField::file("init_image", reference),
            FormField::text("prompt", ctx.prompt),
            FormField::text("init_image_mode", "IMAGE_STRENGTH"),
            FormField::text("image_strength", FIREWORKS_IMAGE_STRENGTH),
            FormField::text("cfg_scale", FIREWORKS_CFG_SCALE.to_string()),
            FormField::text("seed", "1"),
            FormField::text("steps", FIREWORKS_STEPS.to_string()),
            FormField::text("safety_check", "false"),
        ]),
    }
}

fn stability_route(ctx: &RouteContext<'_>, mut fields: Vec<FormField>) -> Route {
    fields.push(FormField::text("prompt", ctx.prompt));
    fields.push(FormField::text("output_format", "png"));
    fields.push(FormField::text("model", ctx.spec.vendor_model.clone()));
    fields.push(FormField::text("isValidPrompt", "true"));
    Route {
        endpoint: format!("{}/v2beta/stable-image/generate/sd3", ctx.bases.stability),
        headers: vec![header("Accept", "image/*"), bearer(ctx.api_key)],
        body: RequestBody::Form(fields),
    }
}

fn stability_text_to_image(ctx: &RouteContext<'_>) -> Route {
    stability_route(
        ctx,
        vec![
            FormField::text("mode", "text-to-image"),
            FormField::text("aspect_ratio", "1:1"),
        ],
    )
}

fn stability_image_to_image(ctx: &RouteContext<'_>, reference: &ReferenceImage) -> Route {
    stability_route(
        ctx,
        vec![
            FormField::text("mode", "image-to-image"),
            FormField::file("image", reference),
            FormField::text("strength", SD3_IMAGE_STRENGTH),
        ],
    )
}
