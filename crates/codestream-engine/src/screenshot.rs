use std::time::Duration;

use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};
use thiserror::Error;

const SCREENSHOT_TIMEOUT_SECONDS: u64 = 60;

#[derive(Debug, Error)]
pub enum ScreenshotError {
    #[error("a page URL is required")]
    MissingUrl,
    #[error("a screenshot API key is required")]
    MissingApiKey,
    #[error("screenshot request failed ({status}): {body}")]
    Status { status: u16, body: String },
    #[error("screenshot response did not contain an image url")]
    MissingImage,
    #[error("screenshot request failed")]
    Http(#[from] reqwest::Error),
}

/// Turns a public page URL into a reference image through the service's
/// screenshot endpoint.
pub struct ScreenshotClient {
    endpoint: String,
    http: HttpClient,
}

impl ScreenshotClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            http: HttpClient::new(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns the captured image as a URL or data URL.
    pub fn capture(&self, url: &str, api_key: &str) -> Result<String, ScreenshotError> {
        let body = request_body(url, api_key)?;
        tracing::info!(endpoint = %self.endpoint, page = url.trim(), "capturing screenshot");
        let response = self
            .http
            .post(&self.endpoint)
            .timeout(Duration::from_secs(SCREENSHOT_TIMEOUT_SECONDS))
            .json(&body)
            .send()?;
        let status = response.status();
        let text = response.text()?;
        if !status.is_success() {
            return Err(ScreenshotError::Status {
                status: status.as_u16(),
                body: truncate_text(&text, 512),
            });
        }
        let parsed: Value = serde_json::from_str(&text).map_err(|_| ScreenshotError::MissingImage)?;
        image_url(&parsed)
    }
}

fn request_body(url: &str, api_key: &str) -> Result<Value, ScreenshotError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(ScreenshotError::MissingUrl);
    }
    let api_key = api_key.trim();
    if api_key.is_empty() {
        return Err(ScreenshotError::MissingApiKey);
    }
    Ok(json!({"url": url, "apiKey": api_key}))
}

fn image_url(payload: &Value) -> Result<String, ScreenshotError> {
    payload
        .get("url")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or(ScreenshotError::MissingImage)
}

fn truncate_text(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}
