//! Draft inspection data model

use crate::media::NormalizedImage;

/// Stable stages of the generation workflow
///
/// In-flight work is tracked separately by [`InFlightOp`]; a failed
/// transition simply never leaves its departure stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    /// No image selected yet
    Empty,
    /// Normalized image attached, description may still be blank
    ImageSelected,
    /// Preliminary analysis shown for correction before final generation
    AnalysisPreview,
    /// Final statement generated and (normally) persisted
    Final,
    /// Final statement copied into an edit buffer
    Editing,
}

/// Network-bound transition currently awaiting its response
///
/// At most one of these exists per draft; a second request is rejected, not
/// queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InFlightOp {
    Analyze,
    GenerateFinal,
    SaveEdit,
    Transcribe,
}

/// Generation policy: one machine shape, two variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GenerationMode {
    /// Generate the final statement directly from image + description
    SingleStage,
    /// Run a correctable preliminary analysis first
    TwoStage,
}

/// In-memory record of one in-progress defect report
///
/// Owned exclusively by the orchestrator for the lifetime of one workflow
/// run; the durable record lives behind the gateway once `remote_id` is
/// assigned.
#[derive(Debug, Clone)]
pub(crate) struct DraftInspection {
    pub(crate) image: Option<NormalizedImage>,
    pub(crate) description: String,
    /// Two-letter region code used to localize generated wording
    pub(crate) jurisdiction: String,
    /// Intermediate AI output; cleared once the final statement exists
    pub(crate) analysis_text: Option<String>,
    pub(crate) final_statement: Option<String>,
    /// Durable text retained while an edit is pending, for the audit pairing
    pub(crate) original_statement: Option<String>,
    pub(crate) edit_buffer: Option<String>,
    /// Assigned by the persistence gateway on first save
    pub(crate) remote_id: Option<String>,
    pub(crate) uploaded_image_url: Option<String>,
    /// False when the service returned a statement without a record id
    pub(crate) editable: bool,
}

impl DraftInspection {
    pub(crate) fn new(jurisdiction: String) -> Self {
        Self {
            image: None,
            description: String::new(),
            jurisdiction,
            analysis_text: None,
            final_statement: None,
            original_statement: None,
            edit_buffer: None,
            remote_id: None,
            uploaded_image_url: None,
            editable: false,
        }
    }

    pub(crate) fn has_image(&self) -> bool {
        self.image.is_some()
    }

    pub(crate) fn has_description(&self) -> bool {
        !self.description.trim().is_empty()
    }

    /// Additive transcript merge: concatenates with one separating space,
    /// never overwrites existing text.
    pub(crate) fn append_transcript(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if self.description.is_empty() {
            self.description = text.to_string();
        } else {
            self.description.push(' ');
            self.description.push_str(text);
        }
    }
}
