//! Remote generation/persistence gateway
//!
//! Boundary abstraction over the AI-completion and storage collaborators the
//! orchestrator calls through a fixed contract. The production implementation
//! is [`HttpGateway`]; tests drive the workflow with a scripted mock.

mod http;

pub(crate) use http::HttpGateway;

use thiserror::Error;

/// Final statement returned by the generation service
///
/// A well-behaved service returns the persisted record id alongside the text.
/// `record_id` is optional because some deployments return only the text; the
/// workflow then marks the result not-editable rather than losing the save
/// silently.
#[derive(Debug, Clone)]
pub(crate) struct GeneratedStatement {
    pub(crate) statement_text: String,
    pub(crate) record_id: Option<String>,
}

/// Operations the workflow core consumes from the remote collaborators
///
/// Every call carries the caller's bearer credential; a missing credential
/// fails with [`GatewayError::AuthUnavailable`] before any network I/O.
pub(crate) trait InspectionGateway {
    /// Preliminary defect analysis of the image and free-text description.
    async fn analyze(
        &self,
        image: &[u8],
        description: &str,
        jurisdiction: &str,
    ) -> Result<String, GatewayError>;

    /// Durably store the normalized image; returns its remote URL.
    async fn upload_image(&self, image: &[u8]) -> Result<String, GatewayError>;

    /// Generate and persist the final structured statement.
    async fn generate_final(
        &self,
        image: &[u8],
        description: &str,
        jurisdiction: &str,
        image_url: &str,
    ) -> Result<GeneratedStatement, GatewayError>;

    /// Replace the statement text of an existing record.
    async fn update_statement(
        &self,
        record_id: &str,
        statement_text: &str,
    ) -> Result<(), GatewayError>;

    /// Record an edit-audit entry pairing original and edited text.
    /// Best-effort from the caller's point of view: the workflow never
    /// surfaces its failure.
    async fn log_edit(
        &self,
        record_id: &str,
        original: &str,
        edited: &str,
    ) -> Result<(), GatewayError>;

    /// Speech-to-text for a recorded WAV buffer.
    async fn transcribe(&self, audio_wav: &[u8]) -> Result<String, GatewayError>;
}

/// Gateway-level errors
#[derive(Debug, Error)]
pub(crate) enum GatewayError {
    #[error("no API credential available")]
    AuthUnavailable,

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("invalid response from server: {0}")]
    InvalidResponse(String),

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },
}
