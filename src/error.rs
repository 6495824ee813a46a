use crate::audio::AudioCaptureError;
use crate::gateway::GatewayError;
use crate::media::MediaError;
use thiserror::Error;

/// Workflow-level errors surfaced to the user
///
/// Every variant is recoverable: the orchestrator returns to the stage it
/// departed from and the same transition can be retried.
#[derive(Debug, Error)]
pub(crate) enum WorkflowError {
    #[error("microphone permission denied")]
    PermissionDenied,

    #[error("audio capture failed: {0}")]
    AudioCapture(#[source] AudioCaptureError),

    #[error("image processing failed: {0}")]
    ImageProcessing(#[from] MediaError),

    #[error("transcription failed: {0}")]
    TranscriptionFailed(#[source] GatewayError),

    #[error("defect analysis failed: {0}")]
    AnalysisFailed(#[source] GatewayError),

    #[error("image upload failed: {0}")]
    UploadFailed(#[source] GatewayError),

    #[error("statement generation failed: {0}")]
    GenerationFailed(#[source] GatewayError),

    #[error("failed to save edited statement: {0}")]
    SaveFailed(#[source] GatewayError),

    #[error("no API credential available")]
    AuthUnavailable,

    #[error("another operation is already in flight")]
    Busy,

    #[error("{0}")]
    InvalidTransition(&'static str),

    #[error("response for a superseded draft was discarded")]
    Stale,
}

impl WorkflowError {
    /// Map a gateway failure from the analyze call.
    ///
    /// A missing credential short-circuits before any network I/O, so it is
    /// surfaced as `AuthUnavailable` regardless of which call raised it.
    pub(crate) fn analysis(e: GatewayError) -> Self {
        match e {
            GatewayError::AuthUnavailable => Self::AuthUnavailable,
            other => Self::AnalysisFailed(other),
        }
    }

    pub(crate) fn upload(e: GatewayError) -> Self {
        match e {
            GatewayError::AuthUnavailable => Self::AuthUnavailable,
            other => Self::UploadFailed(other),
        }
    }

    pub(crate) fn generation(e: GatewayError) -> Self {
        match e {
            GatewayError::AuthUnavailable => Self::AuthUnavailable,
            other => Self::GenerationFailed(other),
        }
    }

    pub(crate) fn save(e: GatewayError) -> Self {
        match e {
            GatewayError::AuthUnavailable => Self::AuthUnavailable,
            other => Self::SaveFailed(other),
        }
    }

    pub(crate) fn transcription(e: GatewayError) -> Self {
        match e {
            GatewayError::AuthUnavailable => Self::AuthUnavailable,
            other => Self::TranscriptionFailed(other),
        }
    }

    /// Map audio session failures into the workflow taxonomy.
    pub(crate) fn audio(e: AudioCaptureError) -> Self {
        match e {
            AudioCaptureError::PermissionDenied | AudioCaptureError::NoInputDevice => {
                Self::PermissionDenied
            }
            AudioCaptureError::AlreadyRecording => {
                Self::InvalidTransition("a recording is already in progress")
            }
            other => Self::AudioCapture(other),
        }
    }
}
