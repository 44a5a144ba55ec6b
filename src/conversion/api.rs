// src/conversion/api.rs
// HTTP submission adapter

use super::errors::ConversionError;
use super::request::{ConversionRequest, UploadProgressFn, UploadTracker};
use super::response::{BatchResponse, ConversionResponse, SubmitOutcome};
use crate::config::{normalize_base_url, ClientConfig, ConfigError};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use uuid::Uuid;

const REQUEST_ID_HEADER: &str = "X-Request-ID";

#[async_trait]
pub trait ConversionApi: Send + Sync {
    /// Upload the request and return the server's immediate answer.
    /// `on_upload` receives non-decreasing upload percentages.
    async fn submit(
        &self,
        request: &ConversionRequest,
        on_upload: UploadProgressFn,
    ) -> Result<SubmitOutcome, ConversionError>;
}

pub struct HttpConversionApi {
    base_url: String,
    client: reqwest::Client,
}

impl HttpConversionApi {
    pub fn new(base_url: &str, timeout: Option<Duration>) -> Result<Self, ConfigError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        let base_url = normalize_base_url(base_url);
        tracing::info!("Conversion API client initialized: {}", base_url);

        Ok(Self { base_url, client })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, ConfigError> {
        Self::new(&config.api_base_url, config.request_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ConversionApi for HttpConversionApi {
    async fn submit(
        &self,
        request: &ConversionRequest,
        on_upload: UploadProgressFn,
    ) -> Result<SubmitOutcome, ConversionError> {
        let url = format!("{}{}", self.base_url, request.endpoint_path());
        let tracker = UploadTracker::new(request.total_bytes(), on_upload);
        let form = request.to_multipart(&tracker)?;
        let request_id = Uuid::new_v4().to_string();

        tracing::info!(
            "Submitting {} file(s) ({} bytes) to {} as {} [{}]",
            request.files().len(),
            request.total_bytes(),
            url,
            request.output_format(),
            request_id
        );

        let response = self
            .client
            .post(&url)
            .header(REQUEST_ID_HEADER, &request_id)
            .multipart(form)
            .send()
            .await
            .map_err(network_error)?;
        tracker.finish();

        let status = response.status();
        let body = response.text().await.map_err(network_error)?;

        if !status.is_success() {
            let detail = extract_detail(&body, status);
            tracing::warn!("Conversion request {} rejected: HTTP {}: {}", request_id, status.as_u16(), detail);
            return Err(ConversionError::Server {
                status: status.as_u16(),
                detail,
            });
        }

        let outcome = if request.is_batch() {
            serde_json::from_str::<BatchResponse>(&body).map(SubmitOutcome::Batch)
        } else {
            serde_json::from_str::<ConversionResponse>(&body).map(SubmitOutcome::Single)
        }
        .map_err(|e| ConversionError::InvalidResponse(e.to_string()))?;

        tracing::info!(
            "Conversion request {} accepted: session={}",
            request_id,
            outcome.session_id().unwrap_or("-")
        );
        Ok(outcome)
    }
}

fn network_error(err: reqwest::Error) -> ConversionError {
    if err.is_timeout() {
        ConversionError::Network(format!("Request timed out: {}", err))
    } else {
        ConversionError::Network(err.to_string())
    }
}

/// Human-readable reason from an error body
fn extract_detail(body: &str, status: StatusCode) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["detail", "error", "message"] {
            match value.get(key) {
                Some(serde_json::Value::String(text)) if !text.trim().is_empty() => {
                    return text.trim().to_string();
                }
                Some(serde_json::Value::Null) | None => {}
                Some(serde_json::Value::String(_)) => {}
                Some(other) => return other.to_string(),
            }
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("Unknown error")
            .to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_detail_prefers_json_fields() {
        assert_eq!(
            extract_detail(r#"{"detail":"File too large"}"#, StatusCode::PAYLOAD_TOO_LARGE),
            "File too large"
        );
        assert_eq!(
            extract_detail(r#"{"error":"bad codec","message":"ignored"}"#, StatusCode::BAD_REQUEST),
            "bad codec"
        );
        assert_eq!(
            extract_detail(r#"{"detail":[{"loc":["file"]}]}"#, StatusCode::UNPROCESSABLE_ENTITY),
            r#"[{"loc":["file"]}]"#
        );
    }

    #[test]
    fn test_extract_detail_falls_back_to_body_then_reason() {
        assert_eq!(
            extract_detail("upstream exploded", StatusCode::BAD_GATEWAY),
            "upstream exploded"
        );
        assert_eq!(
            extract_detail("", StatusCode::PAYLOAD_TOO_LARGE),
            "Payload Too Large"
        );
        assert_eq!(
            extract_detail(r#"{"detail":""}"#, StatusCode::INTERNAL_SERVER_ERROR),
            r#"{"detail":""}"#
        );
    }

    #[test]
    fn test_new_normalizes_base_url() {
        let api = HttpConversionApi::new("http://localhost:8000/", None).unwrap();
        assert_eq!(api.base_url(), "http://localhost:8000");
    }
}
