//! HTTP implementation of the inspection gateway
//!
//! Posts JSON to the inspection service with a bearer credential. Binary
//! payloads (image, audio) travel base64-encoded. Transient failures are
//! retried with a doubling backoff; 4xx responses fail immediately.

use super::{GatewayError, GeneratedStatement, InspectionGateway};
use crate::config::ServiceConfig;
use anyhow::Context;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, instrument, warn};
use url::Url;
use zeroize::Zeroize;

/// Maximum number of retry attempts for transient failures.
const MAX_RETRIES: u32 = 3;

/// Initial delay between retries (doubles with each attempt).
const INITIAL_RETRY_DELAY_MS: u64 = 1000;

/// Client for the inspection generation/persistence service.
pub(crate) struct HttpGateway {
    base_url: Url,
    api_token: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeRequest<'a> {
    image_base64: String,
    description: &'a str,
    jurisdiction: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeResponse {
    analysis_text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadImageRequest {
    image_base64: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadImageResponse {
    image_url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    image_base64: String,
    description: &'a str,
    jurisdiction: &'a str,
    image_url: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    statement_text: String,
    record_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateStatementRequest<'a> {
    record_id: &'a str,
    statement_text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LogEditRequest<'a> {
    record_id: &'a str,
    original_text: &'a str,
    edited_text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TranscribeRequest {
    audio_base64: String,
}

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    text: String,
}

impl HttpGateway {
    /// Create a gateway client from service config and an optional token.
    ///
    /// A missing token does not fail construction; each call raises
    /// `AuthUnavailable` instead, so the user can fix the environment and
    /// retry without restarting.
    pub(crate) fn new(config: &ServiceConfig, api_token: Option<String>) -> anyhow::Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .with_context(|| format!("Invalid service base URL: {}", config.base_url))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client for HttpGateway")?;

        Ok(Self {
            base_url,
            api_token,
            client,
        })
    }

    fn bearer(&self) -> Result<&str, GatewayError> {
        self.api_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(GatewayError::AuthUnavailable)
    }

    fn endpoint(&self, path: &str) -> Result<Url, GatewayError> {
        self.base_url
            .join(path)
            .map_err(|e| GatewayError::InvalidResponse(format!("Invalid endpoint {}: {}", path, e)))
    }

    /// POST a JSON body and parse a JSON response, retrying transient failures.
    async fn post_json<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, GatewayError> {
        // Credential check must precede any network I/O
        let token = self.bearer()?.to_string();
        let url = self.endpoint(path)?;

        let mut last_error: Option<GatewayError> = None;
        let mut retry_delay = Duration::from_millis(INITIAL_RETRY_DELAY_MS);

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                warn!(
                    attempt = attempt,
                    max_retries = MAX_RETRIES,
                    delay_ms = retry_delay.as_millis(),
                    path = path,
                    "Retrying request after transient failure"
                );
                tokio::time::sleep(retry_delay).await;
                retry_delay *= 2;
            }

            let result = self
                .client
                .post(url.clone())
                .header("Authorization", format!("Bearer {}", token))
                .header("Content-Type", "application/json")
                .json(body)
                .send()
                .await;

            match result {
                Ok(response) => {
                    if response.status().is_success() {
                        let parsed: R = response.json().await.map_err(|e| {
                            GatewayError::InvalidResponse(format!(
                                "Failed to parse response from {}: {}",
                                path, e
                            ))
                        })?;

                        if attempt > 0 {
                            info!(attempt = attempt, path = path, "Request succeeded after retry");
                        }

                        return Ok(parsed);
                    }

                    let status = response.status().as_u16();
                    let message = response.text().await.unwrap_or_default();
                    let error = GatewayError::Server { status, message };

                    if is_retryable_status(status) && attempt < MAX_RETRIES {
                        warn!(status = status, attempt = attempt, "Server error, will retry");
                        last_error = Some(error);
                        continue;
                    }

                    return Err(error);
                }
                Err(e) => {
                    if is_retryable_error(&e) && attempt < MAX_RETRIES {
                        warn!(error = %e, attempt = attempt, "Network error, will retry");
                        last_error = Some(GatewayError::Network(e));
                        continue;
                    }

                    return Err(GatewayError::Network(e));
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| GatewayError::InvalidResponse("Unexpected retry loop exit".into())))
    }
}

impl InspectionGateway for HttpGateway {
    #[instrument(skip(self, image, description), fields(image_len = image.len()))]
    async fn analyze(
        &self,
        image: &[u8],
        description: &str,
        jurisdiction: &str,
    ) -> Result<String, GatewayError> {
        let request = AnalyzeRequest {
            image_base64: BASE64.encode(image),
            description,
            jurisdiction,
        };
        let response: AnalyzeResponse = self.post_json("v1/inspections/analyze", &request).await?;
        if response.analysis_text.is_empty() {
            return Err(GatewayError::InvalidResponse(
                "No analysis text in response".into(),
            ));
        }
        Ok(response.analysis_text)
    }

    #[instrument(skip(self, image), fields(image_len = image.len()))]
    async fn upload_image(&self, image: &[u8]) -> Result<String, GatewayError> {
        let request = UploadImageRequest {
            image_base64: BASE64.encode(image),
        };
        let response: UploadImageResponse = self.post_json("v1/images", &request).await?;
        if response.image_url.is_empty() {
            return Err(GatewayError::InvalidResponse(
                "No image URL in response".into(),
            ));
        }
        Ok(response.image_url)
    }

    #[instrument(skip(self, image, description), fields(image_len = image.len()))]
    async fn generate_final(
        &self,
        image: &[u8],
        description: &str,
        jurisdiction: &str,
        image_url: &str,
    ) -> Result<GeneratedStatement, GatewayError> {
        let request = GenerateRequest {
            image_base64: BASE64.encode(image),
            description,
            jurisdiction,
            image_url,
        };
        let response: GenerateResponse = self.post_json("v1/inspections/generate", &request).await?;
        if response.statement_text.is_empty() {
            return Err(GatewayError::InvalidResponse(
                "No statement text in response".into(),
            ));
        }
        Ok(GeneratedStatement {
            statement_text: response.statement_text,
            record_id: response.record_id.filter(|id| !id.is_empty()),
        })
    }

    #[instrument(skip(self, statement_text))]
    async fn update_statement(
        &self,
        record_id: &str,
        statement_text: &str,
    ) -> Result<(), GatewayError> {
        let request = UpdateStatementRequest {
            record_id,
            statement_text,
        };
        let _: serde_json::Value = self.post_json("v1/inspections/update", &request).await?;
        Ok(())
    }

    #[instrument(skip(self, original, edited))]
    async fn log_edit(
        &self,
        record_id: &str,
        original: &str,
        edited: &str,
    ) -> Result<(), GatewayError> {
        let request = LogEditRequest {
            record_id,
            original_text: original,
            edited_text: edited,
        };
        let _: serde_json::Value = self.post_json("v1/inspections/edits", &request).await?;
        Ok(())
    }

    #[instrument(skip(self, audio_wav), fields(audio_len = audio_wav.len()))]
    async fn transcribe(&self, audio_wav: &[u8]) -> Result<String, GatewayError> {
        let request = TranscribeRequest {
            audio_base64: BASE64.encode(audio_wav),
        };
        let response: TranscribeResponse = self.post_json("v1/transcriptions", &request).await?;
        Ok(response.text)
    }
}

/// Check if an HTTP status warrants a retry (5xx server errors).
fn is_retryable_status(status: u16) -> bool {
    (500..600).contains(&status)
}

/// Check if a reqwest error is retryable (transient).
fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

impl Drop for HttpGateway {
    fn drop(&mut self) {
        // Clear bearer token from memory
        if let Some(token) = self.api_token.as_mut() {
            token.zeroize();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ServiceConfig {
        ServiceConfig {
            base_url: "https://inspections.example.com".to_string(),
            request_timeout_secs: 30,
            two_stage: true,
        }
    }

    #[test]
    fn test_generate_request_serialization() {
        let request = GenerateRequest {
            image_base64: BASE64.encode(b"img"),
            description: "Crack in foundation",
            jurisdiction: "WA",
            image_url: "https://cdn.example.com/img.jpg",
        };

        let json = serde_json::to_string(&request).expect("Failed to serialize");
        assert!(json.contains("\"imageBase64\""));
        assert!(json.contains("\"jurisdiction\":\"WA\""));
        assert!(json.contains("\"imageUrl\""));
    }

    #[test]
    fn test_generate_response_deserialization() {
        let json = r#"{"statementText": "Statement body", "recordId": "abc123"}"#;
        let response: GenerateResponse = serde_json::from_str(json).expect("Failed to deserialize");
        assert_eq!(response.statement_text, "Statement body");
        assert_eq!(response.record_id.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_generate_response_without_record_id() {
        let json = r#"{"statementText": "Statement body"}"#;
        let response: GenerateResponse = serde_json::from_str(json).expect("Failed to deserialize");
        assert!(response.record_id.is_none());
    }

    #[test]
    fn test_retryable_status_classification() {
        assert!(is_retryable_status(500));
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(400));
        assert!(!is_retryable_status(401));
        assert!(!is_retryable_status(404));
    }

    #[tokio::test]
    async fn test_missing_token_short_circuits_before_network() {
        let gateway = HttpGateway::new(&test_config(), None).expect("Failed to build gateway");
        let result = gateway.analyze(b"img", "desc", "WA").await;
        assert!(matches!(result, Err(GatewayError::AuthUnavailable)));
    }

    #[tokio::test]
    async fn test_empty_token_counts_as_missing() {
        let gateway = HttpGateway::new(&test_config(), Some(String::new()))
            .expect("Failed to build gateway");
        let result = gateway.upload_image(b"img").await;
        assert!(matches!(result, Err(GatewayError::AuthUnavailable)));
    }
}
