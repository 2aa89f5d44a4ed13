//! Virtual try-on rendering
//!
//! The render API is asynchronous: submitting a job returns a prediction id
//! which is then polled until it reaches a terminal state. Every failure on
//! this path collapses into `RenderFailed` naming the source image, so
//! callers have a single error to map to their fallback response. The
//! underlying cause is logged here.

use crate::catalog::CatalogError;
use crate::config;
use serde_json::{Value, json};
use tracing::{info, warn};

/// Produces try-on renders for a garment image on a model image.
#[async_trait::async_trait]
pub trait RenderProvider: Send + Sync {
    /// Returns the URLs of the generated render images, at least one on
    /// success.
    async fn render(
        &self,
        source_image_url: &str,
        model_image_url: &str,
    ) -> Result<Vec<String>, CatalogError>;
}

/// Client for a FASHN-compatible try-on rendering service.
pub struct TryOnRenderClient {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
}

impl TryOnRenderClient {
    pub fn new(api_key: impl Into<String>, api_base: &str) -> Result<Self, CatalogError> {
        // Per-request timeout: the render deadline only ticks between polls,
        // so a hung connection must fail on its own.
        let client = reqwest::Client::builder()
            .timeout(config::RENDER_HTTP_TIMEOUT)
            .build()
            .map_err(|e| CatalogError::Upstream(format!("render client init failed: {e}")))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    fn render_failed(&self, source_image_url: &str, reason: &str) -> CatalogError {
        warn!("❌ Try-on render failed for {source_image_url}: {reason}");
        CatalogError::RenderFailed {
            source_image_url: source_image_url.to_string(),
        }
    }

    async fn submit(
        &self,
        source_image_url: &str,
        model_image_url: &str,
    ) -> Result<String, String> {
        let response = self
            .client
            .post(format!("{}/v1/run", self.api_base))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({
                "model_name": "tryon-v1.6",
                "inputs": {
                    "model_image": model_image_url,
                    "garment_image": source_image_url,
                }
            }))
            .send()
            .await
            .map_err(|e| format!("submit request failed: {e}"))?;

        if !response.status().is_success() {
            return Err(format!("submit returned status {}", response.status()));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| format!("submit response unreadable: {e}"))?;
        body.get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| "submit response missing prediction id".to_string())
    }

    async fn poll_status(&self, prediction_id: &str) -> Result<Value, String> {
        let response = self
            .client
            .get(format!("{}/v1/status/{prediction_id}", self.api_base))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| format!("status request failed: {e}"))?;

        if !response.status().is_success() {
            return Err(format!("status returned {}", response.status()));
        }
        response
            .json()
            .await
            .map_err(|e| format!("status response unreadable: {e}"))
    }
}

#[async_trait::async_trait]
impl RenderProvider for TryOnRenderClient {
    async fn render(
        &self,
        source_image_url: &str,
        model_image_url: &str,
    ) -> Result<Vec<String>, CatalogError> {
        let prediction_id = self
            .submit(source_image_url, model_image_url)
            .await
            .map_err(|reason| self.render_failed(source_image_url, &reason))?;
        info!("🎨 Submitted try-on render {prediction_id} for {source_image_url}");

        let deadline = tokio::time::Instant::now() + config::RENDER_TIMEOUT;
        loop {
            tokio::time::sleep(config::RENDER_POLL_INTERVAL).await;
            if tokio::time::Instant::now() > deadline {
                return Err(self.render_failed(source_image_url, "timed out waiting for render"));
            }

            let body = self
                .poll_status(&prediction_id)
                .await
                .map_err(|reason| self.render_failed(source_image_url, &reason))?;
            let status = body.get("status").and_then(Value::as_str).unwrap_or("unknown");

            match status {
                "completed" => {
                    let urls = extract_output_urls(&body);
                    if urls.is_empty() {
                        return Err(
                            self.render_failed(source_image_url, "completed with no output")
                        );
                    }
                    info!("✅ Render {prediction_id} completed with {} image(s)", urls.len());
                    return Ok(urls);
                }
                "failed" | "canceled" => {
                    let detail = body
                        .get("error")
                        .map(Value::to_string)
                        .unwrap_or_else(|| status.to_string());
                    return Err(self.render_failed(source_image_url, &detail));
                }
                // starting / in_queue / processing
                _ => continue,
            }
        }
    }
}

fn extract_output_urls(body: &Value) -> Vec<String> {
    body.get("output")
        .and_then(Value::as_array)
        .map(|urls| {
            urls.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
