//! HTTP client for the inpainting backend

use crate::config::{ClientConfig, QualityPreset};
use crate::connection::{normalize_endpoint, HealthProbe};
use crate::error::{InpaintError, Result};
use crate::orchestrator::{EditRequest, JobBackend, JobId, StatusResponse, SubmitResponse};
use crate::types::{DeviceInfo, ImagePayload, OutpaintExtents};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use std::time::Duration;
use tracing::instrument;

/// Header that suppresses tunnel interstitial pages
pub const TUNNEL_WARNING_HEADER: &str = "ngrok-skip-browser-warning";

/// Synchronous image operations exposed by the backend
#[async_trait]
pub trait ImageOperations: Send + Sync {
    /// Detect the main subject and return a mask
    async fn auto_mask(&self, image: &ImagePayload, invert: bool) -> Result<Vec<u8>>;

    /// Snap a rough mask to object edges
    async fn refine_edges(&self, image: &ImagePayload, mask: &ImagePayload) -> Result<Vec<u8>>;

    async fn remove_background(&self, image: &ImagePayload) -> Result<Vec<u8>>;

    async fn replace_background(
        &self,
        image: &ImagePayload,
        background: &ImagePayload,
    ) -> Result<Vec<u8>>;

    /// Extend the canvas and fill the new border
    async fn outpaint(&self, image: &ImagePayload, extents: OutpaintExtents) -> Result<Vec<u8>>;

    /// Inpaint several images in one request; returns a zip archive
    async fn batch_inpaint(
        &self,
        images: &[ImagePayload],
        quality: QualityPreset,
    ) -> Result<Vec<u8>>;
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: Option<String>,
}

/// reqwest-backed client bound to one base endpoint
#[derive(Debug, Clone)]
pub struct BackendClient {
    http: Client,
    base_url: String,
    request_timeout: Duration,
    batch_timeout: Duration,
    probe_timeout: Duration,
}

impl BackendClient {
    /// Create a client for `base_url`
    ///
    /// # Errors
    /// - Failed to create HTTP client
    pub fn new(base_url: &str, config: &ClientConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(TUNNEL_WARNING_HEADER, HeaderValue::from_static("true"));

        let http = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| {
                InpaintError::invalid_config(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            http,
            base_url: normalize_endpoint(base_url),
            request_timeout: config.request_timeout,
            batch_timeout: config.batch_timeout,
            probe_timeout: config.probe_timeout,
        })
    }

    /// Same HTTP pool and timeouts, different endpoint
    #[must_use]
    pub fn with_base_url(&self, base_url: &str) -> Self {
        Self {
            base_url: normalize_endpoint(base_url),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn post(&self, path: &str, timeout: Duration) -> RequestBuilder {
        self.http.post(self.url(path)).timeout(timeout)
    }

    async fn send_for_bytes(path: &str, request: RequestBuilder) -> Result<Vec<u8>> {
        let response = check_status(path, request.send().await?).await?;
        Ok(response.bytes().await?.to_vec())
    }
}

fn part(payload: &ImagePayload) -> Result<Part> {
    Part::bytes(payload.bytes.clone())
        .file_name(payload.file_name.clone())
        .mime_str(&payload.content_type)
        .map_err(|e| {
            InpaintError::validation(format!(
                "Invalid content type {}: {}",
                payload.content_type, e
            ))
        })
}

async fn check_status(path: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let detail = response
        .text()
        .await
        .ok()
        .and_then(|body| serde_json::from_str::<ErrorBody>(&body).ok())
        .and_then(|body| body.detail);

    Err(match detail {
        Some(detail) => {
            InpaintError::transient(format!("HTTP {} from {}: {}", status, path, detail))
        },
        None => InpaintError::http_status(path, status),
    })
}

#[async_trait]
impl JobBackend for BackendClient {
    #[instrument(skip(self, request), fields(base = %self.base_url))]
    async fn submit(&self, request: &EditRequest) -> Result<JobId> {
        let path = "/inpaint";
        let form = Form::new()
            .part("image", part(&request.image)?)
            .part("mask", part(&request.mask)?);

        let response = self
            .post(path, self.request_timeout)
            .query(&[("quality", request.quality.as_query_value())])
            .multipart(form)
            .send()
            .await?;
        let body: SubmitResponse = check_status(path, response).await?.json().await?;
        log::debug!("Submitted job {}", body.job_id);
        Ok(body.job_id)
    }

    async fn poll(&self, job_id: &JobId) -> Result<StatusResponse> {
        let path = format!("/jobs/{}", job_id);
        let response = self
            .http
            .get(self.url(&path))
            .timeout(self.request_timeout)
            .send()
            .await?;
        let text = check_status(&path, response).await?.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn fetch_result(&self, job_id: &JobId) -> Result<Vec<u8>> {
        let path = format!("/results/{}", job_id);
        let request = self.http.get(self.url(&path)).timeout(self.request_timeout);
        Self::send_for_bytes(&path, request).await
    }
}

#[async_trait]
impl HealthProbe for BackendClient {
    async fn probe(&self, endpoint: &str) -> Result<DeviceInfo> {
        let path = "/device";
        let url = format!("{}{}", normalize_endpoint(endpoint), path);
        let response = self
            .http
            .get(url)
            .timeout(self.probe_timeout)
            .send()
            .await?;
        Ok(check_status(path, response).await?.json().await?)
    }
}

#[async_trait]
impl ImageOperations for BackendClient {
    async fn auto_mask(&self, image: &ImagePayload, invert: bool) -> Result<Vec<u8>> {
        let path = "/auto-mask";
        let request = self
            .post(path, self.request_timeout)
            .query(&[("invert", invert)])
            .multipart(Form::new().part("image", part(image)?));
        Self::send_for_bytes(path, request).await
    }

    async fn refine_edges(&self, image: &ImagePayload, mask: &ImagePayload) -> Result<Vec<u8>> {
        let path = "/refine-edges";
        let form = Form::new()
            .part("image", part(image)?)
            .part("mask", part(mask)?);
        let request = self.post(path, self.request_timeout).multipart(form);
        Self::send_for_bytes(path, request).await
    }

    async fn remove_background(&self, image: &ImagePayload) -> Result<Vec<u8>> {
        let path = "/remove-background";
        let request = self
            .post(path, self.request_timeout)
            .multipart(Form::new().part("image", part(image)?));
        Self::send_for_bytes(path, request).await
    }

    async fn replace_background(
        &self,
        image: &ImagePayload,
        background: &ImagePayload,
    ) -> Result<Vec<u8>> {
        let path = "/replace-background";
        let form = Form::new()
            .part("image", part(image)?)
            .part("background", part(background)?);
        let request = self.post(path, self.request_timeout).multipart(form);
        Self::send_for_bytes(path, request).await
    }

    async fn outpaint(&self, image: &ImagePayload, extents: OutpaintExtents) -> Result<Vec<u8>> {
        let path = "/outpaint";
        let request = self
            .post(path, self.request_timeout)
            .query(&extents.query_pairs())
            .multipart(Form::new().part("image", part(image)?));
        Self::send_for_bytes(path, request).await
    }

    #[instrument(skip(self, images), fields(count = images.len(), quality = %quality))]
    async fn batch_inpaint(
        &self,
        images: &[ImagePayload],
        quality: QualityPreset,
    ) -> Result<Vec<u8>> {
        if images.is_empty() {
            return Err(InpaintError::validation("Batch requires at least one image"));
        }

        let path = "/batch-inpaint";
        let form = images.iter().try_fold(Form::new(), |form, image| {
            Ok::<_, InpaintError>(form.part("images", part(image)?))
        })?;
        let request = self
            .post(path, self.batch_timeout)
            .query(&[("quality", quality.as_query_value())])
            .multipart(form);
        Self::send_for_bytes(path, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls_are_joined_without_double_slash() {
        let client = BackendClient::new("https://gpu.example/", &ClientConfig::default()).unwrap();
        assert_eq!(client.base_url(), "https://gpu.example");
        assert_eq!(client.url("/jobs/abc"), "https://gpu.example/jobs/abc");

        let other = client.with_base_url("http://127.0.0.1:3000/api");
        assert_eq!(other.url("/device"), "http://127.0.0.1:3000/api/device");
    }

    #[test]
    fn test_part_rejects_bad_mime() {
        let payload = ImagePayload::new("x.png", "not a mime type", vec![1]);
        assert!(matches!(part(&payload), Err(InpaintError::Validation(_))));
        assert!(part(&ImagePayload::png("x.png", vec![1])).is_ok());
    }

    #[tokio::test]
    async fn test_empty_batch_is_rejected_before_network() {
        let client = BackendClient::new("http://127.0.0.1:9", &ClientConfig::default()).unwrap();
        let err = client
            .batch_inpaint(&[], QualityPreset::High)
            .await
            .unwrap_err();
        assert!(matches!(err, InpaintError::Validation(_)));
    }

    #[tokio::test]
    async fn test_unreachable_probe_is_transient() {
        let client = BackendClient::new("http://127.0.0.1:9", &ClientConfig::default()).unwrap();
        let err = client.probe("http://127.0.0.1:9").await.unwrap_err();
        assert!(err.is_transient());
    }
}
