pub mod config;
pub mod credentials;
pub mod dispatch;
pub mod storage;
pub mod transport;

use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use imageforge_contracts::events::{EventPayload, EventWriter};
use imageforge_contracts::generation::{
    GenerationRequest, GenerationResult, ProviderKeys, ReferenceImage,
};
use imageforge_contracts::models::ModelSpec;
use serde_json::{json, Map, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use config::{BucketConfig, EngineConfig};
use credentials::{ensure_credits, resolve_credential, CredentialSource};
use dispatch::{Dispatcher, VendorRequest};
use storage::{AssetStore, GcsBucket, LocalBucket, ObjectStore, UrlSigner};
use transport::{fetch_image, HttpTransport, Transport};

/// What `preview` reports: the vendor request that `generate` would send.
#[derive(Debug, Clone)]
pub struct VendorRequestPreview {
    pub model: String,
    pub provider: String,
    pub credential_source: CredentialSource,
    pub request: Map<String, Value>,
}

/// Single-shot image generation: dispatch to one vendor, store the result,
/// hand back signed links.
pub struct ImageForge {
    dispatcher: Dispatcher,
    transport: Box<dyn Transport>,
    assets: AssetStore,
    events: EventWriter,
    platform_keys: ProviderKeys,
    min_credits: u64,
}

impl ImageForge {
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        let transport = HttpTransport::new(config.http_timeout)?;
        let store = object_store_from_config(&config)?;
        Ok(Self::with_parts(config, Box::new(transport), store))
    }

    pub fn with_parts(
        config: EngineConfig,
        transport: Box<dyn Transport>,
        store: Box<dyn ObjectStore>,
    ) -> Self {
        let events = config
            .events_path
            .clone()
            .map(EventWriter::new)
            .unwrap_or_else(EventWriter::disabled);
        Self {
            dispatcher: Dispatcher::new(config.api_bases),
            transport,
            assets: AssetStore::new(store, config.signed_url_expires_at),
            events,
            platform_keys: config.platform_keys,
            min_credits: config.min_credits,
        }
    }

    pub fn models(&self) -> Vec<ModelSpec> {
        self.dispatcher.models()
    }

    /// Everything `generate` does before the network: validation, credit
    /// gate, model lookup, key selection and request building.
    pub fn preview(&self, request: &GenerationRequest) -> Result<VendorRequestPreview> {
        let (vendor_request, source) = self.prepare(request)?;
        Ok(VendorRequestPreview {
            model: vendor_request.model.as_str().to_string(),
            provider: vendor_request.provider.clone(),
            credential_source: source,
            request: vendor_request.manifest(),
        })
    }

    /// Runs one generation. Every failure comes back as a single error whose
    /// message is the full cause chain.
    pub fn generate(&self, request: GenerationRequest) -> Result<GenerationResult> {
        let generation_id = Uuid::new_v4().to_string();
        match self.run_generation(&generation_id, &request) {
            Ok(result) => Ok(result),
            Err(err) => {
                let message = error_chain_text(&err, 1024);
                error!(
                    generation_id = %generation_id,
                    model = %request.model,
                    "Error generating image: {message}"
                );
                let mut payload = EventPayload::new();
                payload.insert("error".to_string(), Value::String(message.clone()));
                self.record("generation_failed", &generation_id, payload);
                Err(anyhow!(message))
            }
        }
    }

    fn prepare(&self, request: &GenerationRequest) -> Result<(VendorRequest, CredentialSource)> {
        request.validate().map_err(|err| anyhow!(err))?;
        ensure_credits(request.use_credits, request.credits, self.min_credits)?;
        let resolved = self
            .dispatcher
            .resolve(&request.model, request.capability())?;
        let credential = resolve_credential(
            resolved.provider(),
            request.use_credits,
            &self.platform_keys,
            &request.keys,
        )?;
        let vendor_request = resolved.build(
            request.prompt.trim(),
            request.reference.as_ref(),
            &credential.api_key,
        );
        Ok((vendor_request, credential.source))
    }

    fn run_generation(
        &self,
        generation_id: &str,
        request: &GenerationRequest,
    ) -> Result<GenerationResult> {
        self.record(
            "generation_started",
            generation_id,
            map_object(json!({
                "model": request.model,
                "uid": request.uid,
                "has_reference": request.reference.is_some(),
                "use_credits": request.use_credits,
            })),
        );

        let (vendor_request, source) = self.prepare(request)?;
        info!(
            generation_id,
            model = %vendor_request.model,
            provider = %vendor_request.provider,
            endpoint = %vendor_request.endpoint,
            credentials = source.as_str(),
            "dispatching image request"
        );
        let mut request_event = vendor_request.manifest();
        request_event.insert("credential_source".to_string(), json!(source.as_str()));
        request_event.remove("payload");
        self.record("provider_request", generation_id, request_event);

        let image = fetch_image(self.transport.as_ref(), &vendor_request)?;
        let uid = request.uid.trim();
        let generated = self
            .assets
            .persist_generated(uid, request.prompt.trim(), &image.bytes)?;
        self.record_stored(generation_id, "generated", &generated.path);

        let mut image_reference = None;
        if let Some(reference) = request.reference.as_ref() {
            let stored = self.assets.persist_reference(uid, &reference.bytes)?;
            self.record_stored(generation_id, "reference", &stored.path);
            image_reference = Some(stored.url);
        }

        self.record(
            "generation_finished",
            generation_id,
            map_object(json!({
                "path": generated.path,
                "has_reference": image_reference.is_some(),
            })),
        );
        info!(generation_id, path = %generated.path, "image generated");

        Ok(GenerationResult {
            image_url: generated.url,
            image_reference,
        })
    }

    fn record_stored(&self, generation_id: &str, kind: &str, path: &str) {
        self.record(
            "asset_stored",
            generation_id,
            map_object(json!({
                "kind": kind,
                "path": path,
                "backend": self.assets.backend(),
            })),
        );
    }

    /// The event log is advisory: a failed write is logged and the generation
    /// carries on.
    fn record(&self, event_type: &str, generation_id: &str, payload: EventPayload) {
        if let Err(err) = self.events.emit(event_type, generation_id, payload) {
            warn!(
                generation_id,
                event = event_type,
                error = %format!("{err:#}"),
                "failed to record event"
            );
        }
    }
}

pub fn object_store_from_config(config: &EngineConfig) -> Result<Box<dyn ObjectStore>> {
    let secret = config.signing.secret.clone().unwrap_or_else(|| {
        warn!("IMAGEFORGE_SIGNING_SECRET not set; signed URLs are valid for this process only");
        Uuid::new_v4().to_string()
    });
    match &config.bucket {
        BucketConfig::Local { root } => {
            let public_base = config
                .signing
                .public_base_url
                .clone()
                .unwrap_or_else(|| format!("file://{}", absolute_display(root)));
            Ok(Box::new(LocalBucket::new(
                root.clone(),
                UrlSigner::new(secret, &public_base),
            )))
        }
        BucketConfig::Gcs {
            api_base,
            bucket,
            access_token,
        } => {
            let public_base = config
                .signing
                .public_base_url
                .clone()
                .unwrap_or_else(|| format!("{}/{bucket}", config::DEFAULT_GCS_API_BASE));
            Ok(Box::new(GcsBucket::new(
                api_base,
                bucket.clone(),
                access_token.clone(),
                UrlSigner::new(secret, &public_base),
                config.http_timeout,
            )?))
        }
    }
}

/// Loads a reference image from disk, sniffing its type from the bytes.
pub fn reference_image_from_path(path: &Path) -> Result<ReferenceImage> {
    let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
    let format = image::guess_format(&bytes)
        .with_context(|| format!("{} is not a recognized image", path.display()))?;
    let file_name = path
        .file_name()
        .and_then(|value| value.to_str())
        .unwrap_or("image.png")
        .to_string();
    Ok(ReferenceImage {
        bytes,
        file_name,
        mime_type: format.to_mime_type().to_string(),
    })
}

fn absolute_display(path: &Path) -> String {
    std::path::absolute(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .trim_end_matches('/')
        .to_string()
}

fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts.iter().any(|existing| existing == trimmed) {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return transport::truncate_text("An unknown error occurred", max_chars);
    }
    transport::truncate_text(&parts.join(": "), max_chars)
}

fn map_object(value: Value) -> EventPayload {
    value.as_object().cloned().unwrap_or_default()
}
