use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, warn};

use crate::dispatch::{FormField, RequestBody, ResponseDecoding, VendorRequest};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn reason(&self) -> &'static str {
        StatusCode::from_u16(self.status)
            .ok()
            .and_then(|status| status.canonical_reason())
            .unwrap_or("")
    }

    /// `"<code> <reason>"`, or just the code when there is no standard reason.
    pub fn status_line(&self) -> String {
        match self.reason() {
            "" => self.status.to_string(),
            reason => format!("{} {reason}", self.status),
        }
    }
}

/// Outbound HTTP seam: one POST to a vendor, or one GET of a hosted image.
pub trait Transport: Send + Sync {
    fn send(&self, request: &VendorRequest) -> Result<TransportResponse>;
    fn download(&self, url: &str) -> Result<TransportResponse>;
}

pub struct HttpTransport {
    http: HttpClient,
}

impl HttpTransport {
    pub fn new(timeout: Option<Duration>) -> Result<Self> {
        Ok(Self {
            http: http_client(timeout)?,
        })
    }

    fn multipart(fields: &[FormField]) -> Result<MultipartForm> {
        let mut form = MultipartForm::new();
        for field in fields {
            form = match field {
                FormField::Text { name, value } => form.text(name.clone(), value.clone()),
                FormField::File {
                    name,
                    file_name,
                    mime_type,
                    bytes,
                } => {
                    let part = MultipartPart::bytes(bytes.clone())
                        .file_name(file_name.clone())
                        .mime_str(mime_type)
                        .with_context(|| format!("invalid mime '{mime_type}' for {file_name}"))?;
                    form.part(name.clone(), part)
                }
            };
        }
        Ok(form)
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: &VendorRequest) -> Result<TransportResponse> {
        let mut builder = self.http.post(&request.endpoint);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match &request.body {
            RequestBody::Json(payload) => builder.json(payload),
            RequestBody::Form(fields) => builder.multipart(Self::multipart(fields)?),
        };
        let response = builder
            .send()
            .with_context(|| format!("{} request failed ({})", request.provider, request.endpoint))?;
        read_response(response)
    }

    fn download(&self, url: &str) -> Result<TransportResponse> {
        let response = self
            .http
            .get(url)
            .send()
            .with_context(|| format!("failed downloading generated image ({url})"))?;
        read_response(response)
    }
}

/// Blocking client shared by vendor calls and bucket uploads.
///
/// reqwest's blocking client defaults to a 30s timeout; `None` means unbounded.
pub(crate) fn http_client(timeout: Option<Duration>) -> Result<HttpClient> {
    HttpClient::builder()
        .timeout(timeout)
        .build()
        .context("failed to build HTTP client")
}

fn read_response(response: HttpResponse) -> Result<TransportResponse> {
    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_ascii_lowercase());
    let body = response
        .bytes()
        .context("failed reading response body")?
        .to_vec();
    Ok(TransportResponse {
        status,
        content_type,
        body,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

/// Sends the vendor request and normalizes whatever comes back into raw
/// image bytes.
pub fn fetch_image(transport: &dyn Transport, request: &VendorRequest) -> Result<FetchedImage> {
    let response = transport.send(request)?;
    debug!(
        provider = %request.provider,
        status = response.status,
        bytes = response.body.len(),
        "vendor responded"
    );
    if !response.is_success() {
        warn!(
            provider = %request.provider,
            status = response.status,
            body = %truncate_text(&String::from_utf8_lossy(&response.body), 512),
            "vendor rejected image request"
        );
        bail!("Error from Image API: {}", response.status_line());
    }

    match request.decoding {
        ResponseDecoding::RawBytes => {
            if response.body.is_empty() {
                bail!("Image API returned an empty body");
            }
            Ok(FetchedImage {
                bytes: response.body,
                mime_type: response.content_type,
            })
        }
        ResponseDecoding::OpenAiImageData => decode_openai_image(transport, &response.body),
    }
}

fn decode_openai_image(transport: &dyn Transport, body: &[u8]) -> Result<FetchedImage> {
    let payload: Value =
        serde_json::from_slice(body).context("Image API returned invalid JSON payload")?;
    let Some(first) = payload
        .get("data")
        .and_then(Value::as_array)
        .and_then(|rows| rows.first())
    else {
        bail!("Image API response contained no images");
    };

    if let Some(b64) = first.get("b64_json").and_then(Value::as_str) {
        let bytes = BASE64
            .decode(b64.trim().as_bytes())
            .context("Image API base64 decode failed")?;
        return Ok(FetchedImage {
            bytes,
            mime_type: Some("image/png".to_string()),
        });
    }

    let Some(url) = first
        .get("url")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
    else {
        bail!("Image API response missing image url");
    };
    debug!(url, "downloading hosted image");
    let downloaded = transport.download(url)?;
    if !downloaded.is_success() {
        bail!(
            "Error downloading generated image: {}",
            downloaded.status_line()
        );
    }
    Ok(FetchedImage {
        bytes: downloaded.body,
        mime_type: downloaded.content_type,
    })
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use imageforge_contracts::generation::ReferenceImage;
    use mockito::Matcher;
    use serde_json::json;

    use super::*;
    use crate::config::ApiBases;
    use crate::dispatch::Dispatcher;

    fn vendor_request(base: &str, model: &str, reference: Option<&ReferenceImage>) -> VendorRequest {
        let dispatcher = Dispatcher::new(ApiBases::all(base));
        let capability = if reference.is_some() { "edit" } else { "image" };
        match dispatcher.resolve(model, capability) {
            Ok(resolved) => resolved.build("lighthouse", reference, "test-key"),
            Err(err) => panic!("{model} should resolve: {err}"),
        }
    }

    #[test]
    fn dalle_generation_posts_json_then_downloads_hosted_image() -> anyhow::Result<()> {
        let mut server = mockito::Server::new();
        let image_url = format!("{}/hosted/img-1.png", server.url());
        let generate = server
            .mock("POST", "/images/generations")
            .match_header("authorization", "Bearer test-key")
            .match_header("content-type", "application/json")
            .match_body(Matcher::Json(json!({
                "prompt": "lighthouse",
                "n": 1,
                "size": "1024x1024",
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"created": 1, "data": [{"url": image_url}]}).to_string())
            .create();
        let hosted = server
            .mock("GET", "/hosted/img-1.png")
            .with_status(200)
            .with_header("content-type", "image/png")
            .with_body("png-bytes")
            .create();

        let transport = HttpTransport::new(None)?;
        let request = vendor_request(&server.url(), "dall-e", None);
        let image = fetch_image(&transport, &request)?;

        generate.assert();
        hosted.assert();
        assert_eq!(image.bytes, b"png-bytes".to_vec());
        assert_eq!(image.mime_type.as_deref(), Some("image/png"));
        Ok(())
    }

    #[test]
    fn dalle_b64_payload_skips_download() -> anyhow::Result<()> {
        let mut server = mockito::Server::new();
        let generate = server
            .mock("POST", "/images/generations")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"data": [{"b64_json": BASE64.encode(b"inline")}]}).to_string())
            .create();

        let transport = HttpTransport::new(None)?;
        let request = vendor_request(&server.url(), "dall-e", None);
        let image = fetch_image(&transport, &request)?;

        generate.assert();
        assert_eq!(image.bytes, b"inline".to_vec());
        Ok(())
    }

    #[test]
    fn fireworks_image_to_image_sends_multipart_fields() -> anyhow::Result<()> {
        let mut server = mockito::Server::new();
        let reference = ReferenceImage {
            bytes: b"reference-bytes".to_vec(),
            file_name: "ref.png".to_string(),
            mime_type: "image/png".to_string(),
        };
        let mock = server
            .mock(
                "POST",
                "/image_generation/accounts/fireworks/models/stable-diffusion-xl-1024-v1-0/image_to_image",
            )
            .match_header("authorization", "Bearer test-key")
            .match_header("accept", "image/jpeg")
            .match_header(
                "content-type",
                Matcher::Regex("^multipart/form-data; boundary=".to_string()),
            )
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex(r#"name="init_image"; filename="ref.png""#.to_string()),
                Matcher::Regex(r#"name="init_image_mode"\r\n\r\nIMAGE_STRENGTH"#.to_string()),
                Matcher::Regex(r#"name="image_strength"\r\n\r\n0\.5"#.to_string()),
                Matcher::Regex(r#"name="prompt"\r\n\r\nlighthouse"#.to_string()),
            ]))
            .with_status(200)
            .with_header("content-type", "image/jpeg")
            .with_body("jpeg-bytes")
            .create();

        let transport = HttpTransport::new(None)?;
        let request = vendor_request(&server.url(), "stable-diffusion-xl", Some(&reference));
        let image = fetch_image(&transport, &request)?;

        mock.assert();
        assert_eq!(image.bytes, b"jpeg-bytes".to_vec());
        assert_eq!(image.mime_type.as_deref(), Some("image/jpeg"));
        Ok(())
    }

    #[test]
    fn stability_text_to_image_returns_raw_bytes() -> anyhow::Result<()> {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/v2beta/stable-image/generate/sd3")
            .match_header("accept", "image/*")
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex(r#"name="mode"\r\n\r\ntext-to-image"#.to_string()),
                Matcher::Regex(r#"name="model"\r\n\r\nsd3-turbo"#.to_string()),
            ]))
            .with_status(200)
            .with_header("content-type", "image/png")
            .with_body("sd3-png")
            .create();

        let transport = HttpTransport::new(None)?;
        let request = vendor_request(&server.url(), "stability-sd3-turbo", None);
        let image = fetch_image(&transport, &request)?;

        mock.assert();
        assert_eq!(image.bytes, b"sd3-png".to_vec());
        Ok(())
    }

    #[test]
    fn vendor_error_status_is_surfaced_with_code_and_reason() -> anyhow::Result<()> {
        let mut server = mockito::Server::new();
        let mock = server
            .mock(
                "POST",
                "/image_generation/accounts/fireworks/models/playground-v2-1024px-aesthetic",
            )
            .with_status(429)
            .with_body(r#"{"error":"slow down"}"#)
            .create();

        let transport = HttpTransport::new(None)?;
        let request = vendor_request(&server.url(), "playground-v2", None);
        let err = fetch_image(&transport, &request)
            .err()
            .map(|err| err.to_string())
            .unwrap_or_default();

        mock.assert();
        assert_eq!(err, "Error from Image API: 429 Too Many Requests");
        Ok(())
    }

    #[test]
    fn failed_download_is_an_error() -> anyhow::Result<()> {
        let mut server = mockito::Server::new();
        let image_url = format!("{}/hosted/missing.png", server.url());
        let _generate = server
            .mock("POST", "/images/generations")
            .with_status(200)
            .with_body(json!({"data": [{"url": image_url}]}).to_string())
            .create();
        let _hosted = server
            .mock("GET", "/hosted/missing.png")
            .with_status(404)
            .create();

        let transport = HttpTransport::new(None)?;
        let request = vendor_request(&server.url(), "dall-e", None);
        let err = fetch_image(&transport, &request)
            .err()
            .map(|err| err.to_string())
            .unwrap_or_default();
        assert_eq!(err, "Error downloading generated image: 404 Not Found");
        Ok(())
    }

    #[test]
    fn empty_openai_data_is_an_error() -> anyhow::Result<()> {
        let mut server = mockito::Server::new();
        let _generate = server
            .mock("POST", "/images/generations")
            .with_status(200)
            .with_body(r#"{"data": []}"#)
            .create();

        let transport = HttpTransport::new(None)?;
        let request = vendor_request(&server.url(), "dall-e", None);
        let err = fetch_image(&transport, &request)
            .err()
            .map(|err| err.to_string())
            .unwrap_or_default();
        assert_eq!(err, "Image API response contained no images");
        Ok(())
    }

    #[test]
    fn reason_phrase_falls_back_to_empty() {
        let response = TransportResponse {
            status: 599,
            content_type: None,
            body: Vec::new(),
        };
        assert!(!response.is_success());
        assert_eq!(response.reason(), "");
        assert_eq!(response.status_line(), "599");
    }

    #[test]
    fn nonstandard_status_has_no_trailing_reason() -> anyhow::Result<()> {
        let mut server = mockito::Server::new();
        let _generate = server
            .mock(
                "POST",
                "/image_generation/accounts/fireworks/models/stable-diffusion-xl-1024-v1-0",
            )
            .with_status(599)
            .create();

        let transport = HttpTransport::new(None)?;
        let request = vendor_request(&server.url(), "stable-diffusion-xl", None);
        let err = fetch_image(&transport, &request)
            .err()
            .map(|err| err.to_string())
            .unwrap_or_default();
        assert_eq!(err, "Error from Image API: 599");
        Ok(())
    }
}
