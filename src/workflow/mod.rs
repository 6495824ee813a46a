//! Inspection generation workflow orchestrator
//!
//! Owns the state machine that sequences image normalization, voice
//! transcription, two-stage AI generation (preliminary analysis -> final
//! statement), remote persistence, and the edit/regenerate cycle.
//!
//! # Architecture
//! One workflow run owns one [`DraftInspection`]. Every transition is a
//! method here; the UI (the command loop in `main`) is a pure observer of
//! [`Snapshot`]s. A single in-flight marker guards all network-bound
//! transitions: a second request is rejected with `Busy`, never queued, and
//! `reset`/`select image` are refused while one is pending so a late
//! response can never land on a newer draft. A monotonically increasing
//! epoch backs that guard up: responses resolved against a superseded draft
//! are discarded.
//!
//! The shared state lives in `Arc<Mutex<..>>`; the lock is held only for
//! synchronous begin/resolve sections, never across an await.

mod draft;

pub(crate) use draft::{DraftInspection, GenerationMode, InFlightOp, Stage};

use crate::audio::{AudioCaptureSession, RecordedAudio, SessionState};
use crate::error::WorkflowError;
use crate::gateway::InspectionGateway;
use crate::media::{self, NormalizedImage};
use chrono::{DateTime, Local};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

/// Read-only view of the workflow for display
#[derive(Debug, Clone)]
pub(crate) struct Snapshot {
    pub(crate) stage: Stage,
    pub(crate) in_flight: Option<InFlightOp>,
    pub(crate) has_image: bool,
    /// Human-readable summary of the attached image, e.g. "1024x768 from a.png"
    pub(crate) image_summary: Option<String>,
    pub(crate) description: String,
    pub(crate) jurisdiction: String,
    pub(crate) analysis_text: Option<String>,
    pub(crate) final_statement: Option<String>,
    pub(crate) edit_buffer: Option<String>,
    pub(crate) remote_id: Option<String>,
    pub(crate) uploaded_image_url: Option<String>,
    pub(crate) editable: bool,
    pub(crate) audio_state: SessionState,
    pub(crate) recording_since: Option<DateTime<Local>>,
}

/// Result of a successful generate-final transition
#[derive(Debug, Clone)]
pub(crate) struct FinalOutcome {
    pub(crate) statement: String,
    pub(crate) record_id: Option<String>,
    /// False when the service omitted the record id: the statement is
    /// visible but edit/regenerate are disabled
    pub(crate) editable: bool,
}

struct Inner {
    draft: DraftInspection,
    stage: Stage,
    in_flight: Option<InFlightOp>,
    epoch: u64,
    audio: AudioCaptureSession,
}

/// The workflow orchestrator
///
/// Cheap to clone; clones share the same draft and guard.
pub(crate) struct Orchestrator<G> {
    gateway: Arc<G>,
    mode: GenerationMode,
    inner: Arc<Mutex<Inner>>,
}

impl<G> Clone for Orchestrator<G> {
    fn clone(&self) -> Self {
        Self {
            gateway: self.gateway.clone(),
            mode: self.mode,
            inner: self.inner.clone(),
        }
    }
}

impl<G: InspectionGateway> Orchestrator<G> {
    pub(crate) fn new(gateway: G, mode: GenerationMode, jurisdiction: String) -> Self {
        Self {
            gateway: Arc::new(gateway),
            mode,
            inner: Arc::new(Mutex::new(Inner {
                draft: DraftInspection::new(jurisdiction),
                stage: Stage::Empty,
                in_flight: None,
                epoch: 0,
                audio: AudioCaptureSession::new(),
            })),
        }
    }

    pub(crate) fn mode(&self) -> GenerationMode {
        self.mode
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means a panicking test observer; the state
        // itself is still consistent between transitions
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        let inner = self.lock();
        Snapshot {
            stage: inner.stage,
            in_flight: inner.in_flight,
            has_image: inner.draft.has_image(),
            image_summary: inner.draft.image.as_ref().map(|img| match &img.display_path {
                Some(path) => format!("{}x{} from {}", img.width, img.height, path.display()),
                None => format!("{}x{}", img.width, img.height),
            }),
            description: inner.draft.description.clone(),
            jurisdiction: inner.draft.jurisdiction.clone(),
            analysis_text: inner.draft.analysis_text.clone(),
            final_statement: inner.draft.final_statement.clone(),
            edit_buffer: inner.draft.edit_buffer.clone(),
            remote_id: inner.draft.remote_id.clone(),
            uploaded_image_url: inner.draft.uploaded_image_url.clone(),
            editable: inner.draft.editable,
            audio_state: inner.audio.state(),
            recording_since: inner.audio.started_at(),
        }
    }

    // ---- image selection ----

    /// Select and normalize an image from a file on disk
    pub(crate) fn select_image_file(&self, path: &Path) -> Result<(), WorkflowError> {
        self.ensure_not_in_flight()?;
        match media::normalize_file(path) {
            Ok(image) => self.apply_image(image),
            Err(e) => {
                self.discard_image();
                Err(e.into())
            }
        }
    }

    /// Select and normalize an image from raw bytes (dropped file)
    pub(crate) fn select_image_bytes(&self, bytes: &[u8]) -> Result<(), WorkflowError> {
        self.ensure_not_in_flight()?;
        match media::normalize_bytes(bytes) {
            Ok(image) => self.apply_image(image),
            Err(e) => {
                self.discard_image();
                Err(e.into())
            }
        }
    }

    fn ensure_not_in_flight(&self) -> Result<(), WorkflowError> {
        if self.lock().in_flight.is_some() {
            return Err(WorkflowError::Busy);
        }
        Ok(())
    }

    /// Attach a freshly normalized image, superseding any prior artifacts
    fn apply_image(&self, image: NormalizedImage) -> Result<(), WorkflowError> {
        let mut inner = self.lock();
        // Re-checked: normalization ran outside the lock
        if inner.in_flight.is_some() {
            return Err(WorkflowError::Busy);
        }
        inner.epoch += 1;
        let draft = &mut inner.draft;
        draft.image = Some(image);
        draft.analysis_text = None;
        draft.final_statement = None;
        draft.original_statement = None;
        draft.edit_buffer = None;
        draft.remote_id = None;
        draft.uploaded_image_url = None;
        draft.editable = false;
        inner.stage = Stage::ImageSelected;
        info!("Image selected, prior analysis/statement cleared");
        Ok(())
    }

    /// A failed normalization discards the prior asset, forcing re-selection
    fn discard_image(&self) {
        let mut inner = self.lock();
        if inner.in_flight.is_some() {
            return;
        }
        inner.draft.image = None;
        inner.draft.uploaded_image_url = None;
        if inner.stage == Stage::ImageSelected {
            inner.stage = Stage::Empty;
        }
    }

    // ---- description ----

    pub(crate) fn set_description(&self, text: &str) -> Result<(), WorkflowError> {
        let mut inner = self.lock();
        if inner.in_flight.is_some() {
            return Err(WorkflowError::Busy);
        }
        inner.draft.description = text.to_string();
        Ok(())
    }

    pub(crate) fn set_jurisdiction(&self, code: &str) -> Result<(), WorkflowError> {
        let mut inner = self.lock();
        if inner.in_flight.is_some() {
            return Err(WorkflowError::Busy);
        }
        inner.draft.jurisdiction = code.to_uppercase();
        Ok(())
    }

    // ---- voice capture ----

    /// Start a microphone recording for this draft
    pub(crate) fn start_recording(&self) -> Result<(), WorkflowError> {
        let mut inner = self.lock();
        // A released session is terminal; recording after a reset gets a
        // fresh one
        if inner.audio.state() == SessionState::Released {
            inner.audio = AudioCaptureSession::new();
        }
        inner.audio.start().map_err(WorkflowError::audio)
    }

    /// Stop the recording and return the captured take, if any
    pub(crate) fn stop_recording(&self) -> Result<Option<RecordedAudio>, WorkflowError> {
        let mut inner = self.lock();
        inner.audio.stop().map_err(WorkflowError::audio)
    }

    /// Transcribe a captured take and merge it into the description
    ///
    /// The merge is additive: existing text is never replaced. On failure the
    /// description is untouched and the caller still owns the audio, so the
    /// inspector can retry or type manually.
    pub(crate) async fn transcribe(&self, audio: &RecordedAudio) -> Result<String, WorkflowError> {
        let epoch = {
            let mut inner = self.lock();
            if inner.in_flight.is_some() {
                return Err(WorkflowError::Busy);
            }
            inner.in_flight = Some(InFlightOp::Transcribe);
            inner.epoch
        };

        let result = self.gateway.transcribe(&audio.wav_bytes).await;

        let mut inner = self.lock();
        // The marker is still this call's own; it must be released on every
        // resolution path, discarded or not, or no later transition could run
        inner.in_flight = None;
        if inner.epoch != epoch {
            warn!("Discarding transcription for a superseded draft");
            return Err(WorkflowError::Stale);
        }
        match result {
            Ok(text) => {
                inner.draft.append_transcript(&text);
                info!("Transcript merged ({} chars)", text.len());
                Ok(text)
            }
            Err(e) => Err(WorkflowError::transcription(e)),
        }
    }

    // ---- analysis (two-stage only) ----

    /// Run the preliminary defect analysis
    pub(crate) async fn analyze(&self) -> Result<String, WorkflowError> {
        if self.mode != GenerationMode::TwoStage {
            return Err(WorkflowError::InvalidTransition(
                "analysis is not part of the single-stage workflow",
            ));
        }

        let (image_bytes, description, jurisdiction, epoch) = {
            let mut inner = self.lock();
            if inner.in_flight.is_some() {
                return Err(WorkflowError::Busy);
            }
            if inner.stage == Stage::Editing {
                return Err(WorkflowError::InvalidTransition(
                    "finish or cancel the edit first",
                ));
            }
            let Some(image) = inner.draft.image.as_ref() else {
                return Err(WorkflowError::InvalidTransition(
                    "select an image before analyzing",
                ));
            };
            if !inner.draft.has_description() {
                return Err(WorkflowError::InvalidTransition(
                    "describe the defect before analyzing",
                ));
            }
            let captured = (
                image.bytes.clone(),
                inner.draft.description.clone(),
                inner.draft.jurisdiction.clone(),
                inner.epoch,
            );
            inner.in_flight = Some(InFlightOp::Analyze);
            captured
        };

        let result = self
            .gateway
            .analyze(&image_bytes, &description, &jurisdiction)
            .await;

        let mut inner = self.lock();
        inner.in_flight = None;
        if inner.epoch != epoch {
            warn!("Discarding analysis for a superseded draft");
            return Err(WorkflowError::Stale);
        }
        match result {
            Ok(text) => {
                // The preview supersedes any earlier final statement
                inner.draft.analysis_text = Some(text.clone());
                inner.draft.final_statement = None;
                inner.draft.remote_id = None;
                inner.draft.editable = false;
                inner.stage = Stage::AnalysisPreview;
                info!("Analysis ready ({} chars)", text.len());
                Ok(text)
            }
            Err(e) => Err(WorkflowError::analysis(e)),
        }
    }

    /// Fold the inspector's corrections into the preliminary analysis
    pub(crate) fn set_analysis_text(&self, text: &str) -> Result<(), WorkflowError> {
        let mut inner = self.lock();
        if inner.in_flight.is_some() {
            return Err(WorkflowError::Busy);
        }
        if inner.stage != Stage::AnalysisPreview {
            return Err(WorkflowError::InvalidTransition(
                "no analysis preview to edit",
            ));
        }
        inner.draft.analysis_text = Some(text.to_string());
        Ok(())
    }

    // ---- final generation ----

    /// Generate (and persist) the final structured statement
    ///
    /// Uploads the image first if it has not been uploaded yet; upload is
    /// strictly ordered before the generate call, never parallelized. A
    /// generate failure after a successful upload keeps the uploaded URL, so
    /// a retry skips straight to generation.
    pub(crate) async fn generate_final(&self) -> Result<FinalOutcome, WorkflowError> {
        let (image_bytes, payload, jurisdiction, existing_url, epoch) = {
            let mut inner = self.lock();
            if inner.in_flight.is_some() {
                return Err(WorkflowError::Busy);
            }
            let payload = match self.mode {
                GenerationMode::TwoStage => {
                    if inner.stage != Stage::AnalysisPreview {
                        return Err(WorkflowError::InvalidTransition(
                            "run the analysis before generating the final statement",
                        ));
                    }
                    match inner.draft.analysis_text.as_ref() {
                        Some(text) if !text.trim().is_empty() => text.clone(),
                        _ => {
                            return Err(WorkflowError::InvalidTransition(
                                "the analysis preview is empty",
                            ))
                        }
                    }
                }
                GenerationMode::SingleStage => {
                    if !inner.draft.has_description() {
                        return Err(WorkflowError::InvalidTransition(
                            "describe the defect before generating",
                        ));
                    }
                    inner.draft.description.clone()
                }
            };
            let Some(image) = inner.draft.image.as_ref() else {
                return Err(WorkflowError::InvalidTransition(
                    "select an image before generating",
                ));
            };
            let captured = (
                image.bytes.clone(),
                payload,
                inner.draft.jurisdiction.clone(),
                inner.draft.uploaded_image_url.clone(),
                inner.epoch,
            );
            inner.in_flight = Some(InFlightOp::GenerateFinal);
            captured
        };

        self.run_generation(image_bytes, payload, jurisdiction, existing_url, epoch)
            .await
    }

    /// Discard the current final text and re-run generation with the same
    /// image and description
    ///
    /// The old statement is kept until the new one arrives, so a failed
    /// regeneration leaves the draft exactly as it was.
    pub(crate) async fn regenerate(&self) -> Result<FinalOutcome, WorkflowError> {
        let (image_bytes, payload, jurisdiction, existing_url, epoch) = {
            let mut inner = self.lock();
            if inner.in_flight.is_some() {
                return Err(WorkflowError::Busy);
            }
            if inner.stage != Stage::Final {
                return Err(WorkflowError::InvalidTransition(
                    "no final statement to regenerate",
                ));
            }
            if !inner.draft.editable {
                return Err(WorkflowError::InvalidTransition(
                    "statement has no record id; regeneration is disabled",
                ));
            }
            let Some(image) = inner.draft.image.as_ref() else {
                return Err(WorkflowError::InvalidTransition(
                    "no image attached to this draft",
                ));
            };
            if !inner.draft.has_description() {
                return Err(WorkflowError::InvalidTransition(
                    "no description attached to this draft",
                ));
            }
            let captured = (
                image.bytes.clone(),
                inner.draft.description.clone(),
                inner.draft.jurisdiction.clone(),
                inner.draft.uploaded_image_url.clone(),
                inner.epoch,
            );
            inner.in_flight = Some(InFlightOp::GenerateFinal);
            captured
        };

        self.run_generation(image_bytes, payload, jurisdiction, existing_url, epoch)
            .await
    }

    /// Upload-then-generate sequence shared by generate-final and regenerate.
    /// Expects the in-flight marker to be set by the caller.
    async fn run_generation(
        &self,
        image_bytes: Vec<u8>,
        payload: String,
        jurisdiction: String,
        existing_url: Option<String>,
        epoch: u64,
    ) -> Result<FinalOutcome, WorkflowError> {
        let image_url = match existing_url {
            Some(url) => url,
            None => match self.gateway.upload_image(&image_bytes).await {
                Ok(url) => {
                    let mut inner = self.lock();
                    if inner.epoch != epoch {
                        warn!("Discarding upload for a superseded draft");
                        inner.in_flight = None;
                        return Err(WorkflowError::Stale);
                    }
                    // The URL survives a later generate failure; retries
                    // must not re-upload
                    inner.draft.uploaded_image_url = Some(url.clone());
                    url
                }
                Err(e) => {
                    self.lock().in_flight = None;
                    return Err(WorkflowError::upload(e));
                }
            },
        };

        let result = self
            .gateway
            .generate_final(&image_bytes, &payload, &jurisdiction, &image_url)
            .await;

        let mut inner = self.lock();
        inner.in_flight = None;
        if inner.epoch != epoch {
            warn!("Discarding generated statement for a superseded draft");
            return Err(WorkflowError::Stale);
        }
        match result {
            Ok(generated) => {
                let editable = generated.record_id.is_some();
                if !editable {
                    warn!(
                        "Service returned a statement without a record id; \
                         editing and regeneration are disabled"
                    );
                }
                let draft = &mut inner.draft;
                draft.final_statement = Some(generated.statement_text.clone());
                draft.remote_id = generated.record_id.clone();
                draft.analysis_text = None;
                draft.original_statement = None;
                draft.edit_buffer = None;
                draft.editable = editable;
                inner.stage = Stage::Final;
                info!(
                    record_id = generated.record_id.as_deref().unwrap_or("<none>"),
                    "Final statement generated"
                );
                Ok(FinalOutcome {
                    statement: generated.statement_text,
                    record_id: generated.record_id,
                    editable,
                })
            }
            Err(e) => Err(WorkflowError::generation(e)),
        }
    }

    // ---- editing ----

    /// Copy the final statement into an edit buffer
    pub(crate) fn begin_edit(&self) -> Result<(), WorkflowError> {
        let mut inner = self.lock();
        if inner.in_flight.is_some() {
            return Err(WorkflowError::Busy);
        }
        if inner.stage != Stage::Final {
            return Err(WorkflowError::InvalidTransition(
                "no final statement to edit",
            ));
        }
        if !inner.draft.editable {
            return Err(WorkflowError::InvalidTransition(
                "statement has no record id; editing is disabled",
            ));
        }
        let current = inner.draft.final_statement.clone();
        inner.draft.edit_buffer = current.clone();
        inner.draft.original_statement = current;
        inner.stage = Stage::Editing;
        Ok(())
    }

    pub(crate) fn set_edited_text(&self, text: &str) -> Result<(), WorkflowError> {
        let mut inner = self.lock();
        if inner.in_flight.is_some() {
            return Err(WorkflowError::Busy);
        }
        if inner.stage != Stage::Editing {
            return Err(WorkflowError::InvalidTransition("no edit in progress"));
        }
        inner.draft.edit_buffer = Some(text.to_string());
        Ok(())
    }

    pub(crate) fn cancel_edit(&self) -> Result<(), WorkflowError> {
        let mut inner = self.lock();
        if inner.in_flight.is_some() {
            return Err(WorkflowError::Busy);
        }
        if inner.stage != Stage::Editing {
            return Err(WorkflowError::InvalidTransition("no edit in progress"));
        }
        inner.draft.edit_buffer = None;
        inner.draft.original_statement = None;
        inner.stage = Stage::Final;
        Ok(())
    }

    /// Persist the edited statement
    ///
    /// The edit becomes durable only once the update round-trip completes.
    /// The audit entry pairing original and edited text is best-effort: its
    /// failure is logged and never blocks the save.
    pub(crate) async fn save_edit(&self) -> Result<(), WorkflowError> {
        let (record_id, original, edited, epoch) = {
            let mut inner = self.lock();
            if inner.in_flight.is_some() {
                return Err(WorkflowError::Busy);
            }
            if inner.stage != Stage::Editing {
                return Err(WorkflowError::InvalidTransition("no edit in progress"));
            }
            let Some(record_id) = inner.draft.remote_id.clone() else {
                return Err(WorkflowError::InvalidTransition(
                    "statement has no record id; saving is disabled",
                ));
            };
            let Some(edited) = inner.draft.edit_buffer.clone() else {
                return Err(WorkflowError::InvalidTransition("no edited text to save"));
            };
            let original = inner.draft.original_statement.clone().unwrap_or_default();
            inner.in_flight = Some(InFlightOp::SaveEdit);
            (record_id, original, edited, inner.epoch)
        };

        let result = self.gateway.update_statement(&record_id, &edited).await;

        {
            let mut inner = self.lock();
            inner.in_flight = None;
            if inner.epoch != epoch {
                warn!("Discarding save for a superseded draft");
                return Err(WorkflowError::Stale);
            }
            if let Err(e) = result {
                // Stay in Editing so the inspector can retry or cancel
                return Err(WorkflowError::save(e));
            }
            inner.draft.final_statement = Some(edited.clone());
            inner.draft.edit_buffer = None;
            inner.draft.original_statement = None;
            inner.stage = Stage::Final;
            info!(record_id = %record_id, "Edited statement saved");
        }

        // Off the critical path: the edit is already committed
        if let Err(e) = self.gateway.log_edit(&record_id, &original, &edited).await {
            warn!("Failed to record edit audit entry: {}", e);
        }

        Ok(())
    }

    // ---- reset ----

    /// Discard the draft and release any open audio session
    ///
    /// Refused while a transition is in flight; the re-entrancy guard
    /// doubles as the cancellation barrier.
    pub(crate) fn reset(&self) -> Result<(), WorkflowError> {
        let mut inner = self.lock();
        if inner.in_flight.is_some() {
            return Err(WorkflowError::Busy);
        }
        inner.epoch += 1;
        inner.audio.release();
        let jurisdiction = inner.draft.jurisdiction.clone();
        inner.draft = DraftInspection::new(jurisdiction);
        inner.stage = Stage::Empty;
        info!("Draft discarded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{GatewayError, GeneratedStatement};
    use image::{DynamicImage, RgbImage};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Notify;

    fn server_error() -> GatewayError {
        GatewayError::Server {
            status: 500,
            message: "boom".to_string(),
        }
    }

    #[derive(Default)]
    struct MockGateway {
        fail_upload: AtomicBool,
        fail_generate: AtomicBool,
        fail_save: AtomicBool,
        fail_log_edit: AtomicBool,
        fail_transcribe: AtomicBool,
        omit_record_id: AtomicBool,
        calls: Mutex<Vec<&'static str>>,
        /// When set, analyze signals the first notify and blocks on the second
        analyze_gate: Option<(Arc<Notify>, Arc<Notify>)>,
    }

    impl MockGateway {
        fn record(&self, call: &'static str) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl InspectionGateway for MockGateway {
        async fn analyze(
            &self,
            _image: &[u8],
            description: &str,
            _jurisdiction: &str,
        ) -> Result<String, GatewayError> {
            self.record("analyze");
            if let Some((started, release)) = &self.analyze_gate {
                started.notify_one();
                release.notified().await;
            }
            Ok(format!("Preliminary analysis: {}", description))
        }

        async fn upload_image(&self, _image: &[u8]) -> Result<String, GatewayError> {
            self.record("upload_image");
            if self.fail_upload.load(Ordering::SeqCst) {
                return Err(server_error());
            }
            Ok("https://cdn.example.com/defect.jpg".to_string())
        }

        async fn generate_final(
            &self,
            _image: &[u8],
            description: &str,
            jurisdiction: &str,
            _image_url: &str,
        ) -> Result<GeneratedStatement, GatewayError> {
            self.record("generate_final");
            if self.fail_generate.load(Ordering::SeqCst) {
                return Err(server_error());
            }
            Ok(GeneratedStatement {
                statement_text: format!("[{}] {}", jurisdiction, description),
                record_id: if self.omit_record_id.load(Ordering::SeqCst) {
                    None
                } else {
                    Some("abc123".to_string())
                },
            })
        }

        async fn update_statement(
            &self,
            _record_id: &str,
            _statement_text: &str,
        ) -> Result<(), GatewayError> {
            self.record("update_statement");
            if self.fail_save.load(Ordering::SeqCst) {
                return Err(server_error());
            }
            Ok(())
        }

        async fn log_edit(
            &self,
            _record_id: &str,
            _original: &str,
            _edited: &str,
        ) -> Result<(), GatewayError> {
            self.record("log_edit");
            if self.fail_log_edit.load(Ordering::SeqCst) {
                return Err(server_error());
            }
            Ok(())
        }

        async fn transcribe(&self, _audio_wav: &[u8]) -> Result<String, GatewayError> {
            self.record("transcribe");
            if self.fail_transcribe.load(Ordering::SeqCst) {
                return Err(server_error());
            }
            Ok("southeast corner".to_string())
        }
    }

    fn png_bytes() -> Vec<u8> {
        let img = RgbImage::from_pixel(8, 8, image::Rgb([90, 90, 90]));
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, image::ImageFormat::Png)
            .expect("Failed to encode test image");
        buf.into_inner()
    }

    fn two_stage(gateway: MockGateway) -> Orchestrator<MockGateway> {
        Orchestrator::new(gateway, GenerationMode::TwoStage, "WA".to_string())
    }

    fn take() -> RecordedAudio {
        RecordedAudio {
            wav_bytes: vec![0; 64],
            sample_rate: 16000,
            duration_secs: 0.002,
        }
    }

    /// Drive a draft to AnalysisPreview
    async fn to_preview(orch: &Orchestrator<MockGateway>) {
        orch.select_image_bytes(&png_bytes()).expect("select image");
        orch.set_description("Crack in foundation").expect("describe");
        orch.analyze().await.expect("analyze");
    }

    #[tokio::test]
    async fn test_two_stage_happy_path() {
        let orch = two_stage(MockGateway::default());
        to_preview(&orch).await;

        let snap = orch.snapshot();
        assert_eq!(snap.stage, Stage::AnalysisPreview);
        assert_eq!(
            snap.analysis_text.as_deref(),
            Some("Preliminary analysis: Crack in foundation")
        );

        let outcome = orch.generate_final().await.expect("generate");
        assert!(outcome.editable);
        assert_eq!(outcome.record_id.as_deref(), Some("abc123"));

        let snap = orch.snapshot();
        assert_eq!(snap.stage, Stage::Final);
        assert!(snap.analysis_text.is_none(), "preview must be superseded");
        assert_eq!(snap.remote_id.as_deref(), Some("abc123"));
        assert!(snap.editable);

        // Upload is strictly ordered before generation
        let calls = orch.gateway.calls();
        assert_eq!(calls, vec!["analyze", "upload_image", "generate_final"]);
    }

    #[tokio::test]
    async fn test_corrected_analysis_feeds_generation() {
        let orch = two_stage(MockGateway::default());
        to_preview(&orch).await;
        orch.set_analysis_text("Hairline crack, no structural concern")
            .expect("correct analysis");

        let outcome = orch.generate_final().await.expect("generate");
        assert_eq!(outcome.statement, "[WA] Hairline crack, no structural concern");
    }

    #[tokio::test]
    async fn test_upload_failure_returns_to_preview() {
        let gateway = MockGateway::default();
        gateway.fail_upload.store(true, Ordering::SeqCst);
        let orch = two_stage(gateway);
        to_preview(&orch).await;

        let err = orch.generate_final().await.unwrap_err();
        assert!(matches!(err, WorkflowError::UploadFailed(_)));

        let snap = orch.snapshot();
        assert_eq!(snap.stage, Stage::AnalysisPreview);
        assert!(snap.final_statement.is_none());
        assert!(snap.in_flight.is_none(), "guard must be cleared for retry");
        // The generate call must never have been attempted
        assert!(!orch.gateway.calls().contains(&"generate_final"));
    }

    #[tokio::test]
    async fn test_generate_failure_keeps_uploaded_image() {
        let gateway = MockGateway::default();
        gateway.fail_generate.store(true, Ordering::SeqCst);
        let orch = two_stage(gateway);
        to_preview(&orch).await;

        let err = orch.generate_final().await.unwrap_err();
        assert!(matches!(err, WorkflowError::GenerationFailed(_)));
        let snap = orch.snapshot();
        assert_eq!(snap.stage, Stage::AnalysisPreview);
        assert!(snap.uploaded_image_url.is_some());

        // Retry succeeds without a second upload
        orch.gateway.fail_generate.store(false, Ordering::SeqCst);
        orch.generate_final().await.expect("retry generate");
        let uploads = orch
            .gateway
            .calls()
            .iter()
            .filter(|c| **c == "upload_image")
            .count();
        assert_eq!(uploads, 1);
    }

    #[tokio::test]
    async fn test_missing_record_id_disables_editing() {
        let gateway = MockGateway::default();
        gateway.omit_record_id.store(true, Ordering::SeqCst);
        let orch = two_stage(gateway);
        to_preview(&orch).await;

        let outcome = orch.generate_final().await.expect("generate");
        assert!(!outcome.editable);
        assert!(outcome.record_id.is_none());

        let snap = orch.snapshot();
        assert_eq!(snap.stage, Stage::Final);
        assert!(snap.final_statement.is_some(), "statement stays visible");

        assert!(matches!(
            orch.begin_edit(),
            Err(WorkflowError::InvalidTransition(_))
        ));
        assert!(matches!(
            orch.regenerate().await,
            Err(WorkflowError::InvalidTransition(_))
        ));
    }

    #[tokio::test]
    async fn test_save_edit_commits_despite_log_edit_failure() {
        let gateway = MockGateway::default();
        gateway.fail_log_edit.store(true, Ordering::SeqCst);
        let orch = two_stage(gateway);
        to_preview(&orch).await;
        orch.generate_final().await.expect("generate");

        orch.begin_edit().expect("begin edit");
        orch.set_edited_text("Amended statement text").expect("edit");
        orch.save_edit().await.expect("save must not surface log_edit failure");

        let snap = orch.snapshot();
        assert_eq!(snap.stage, Stage::Final);
        assert_eq!(snap.final_statement.as_deref(), Some("Amended statement text"));
        assert!(snap.edit_buffer.is_none());

        let calls = orch.gateway.calls();
        assert!(calls.contains(&"update_statement"));
        assert!(calls.contains(&"log_edit"));
    }

    #[tokio::test]
    async fn test_save_failure_stays_in_editing() {
        let gateway = MockGateway::default();
        gateway.fail_save.store(true, Ordering::SeqCst);
        let orch = two_stage(gateway);
        to_preview(&orch).await;
        let outcome = orch.generate_final().await.expect("generate");

        orch.begin_edit().expect("begin edit");
        orch.set_edited_text("Amended").expect("edit");
        let err = orch.save_edit().await.unwrap_err();
        assert!(matches!(err, WorkflowError::SaveFailed(_)));

        let snap = orch.snapshot();
        assert_eq!(snap.stage, Stage::Editing);
        // The durable value is untouched until the save round-trip completes
        assert_eq!(snap.final_statement.as_deref(), Some(outcome.statement.as_str()));
        assert_eq!(snap.edit_buffer.as_deref(), Some("Amended"));
    }

    #[tokio::test]
    async fn test_cancel_edit_discards_buffer() {
        let orch = two_stage(MockGateway::default());
        to_preview(&orch).await;
        let outcome = orch.generate_final().await.expect("generate");

        orch.begin_edit().expect("begin edit");
        orch.set_edited_text("Scrapped change").expect("edit");
        orch.cancel_edit().expect("cancel");

        let snap = orch.snapshot();
        assert_eq!(snap.stage, Stage::Final);
        assert_eq!(snap.final_statement.as_deref(), Some(outcome.statement.as_str()));
        assert!(snap.edit_buffer.is_none());
    }

    #[tokio::test]
    async fn test_transcript_appends_to_existing_description() {
        let orch = two_stage(MockGateway::default());
        orch.set_description("Crack in foundation").expect("describe");
        orch.transcribe(&take()).await.expect("transcribe");
        assert_eq!(
            orch.snapshot().description,
            "Crack in foundation southeast corner"
        );
    }

    #[tokio::test]
    async fn test_transcribe_failure_leaves_description_untouched() {
        let gateway = MockGateway::default();
        gateway.fail_transcribe.store(true, Ordering::SeqCst);
        let orch = two_stage(gateway);
        orch.set_description("Crack in foundation").expect("describe");

        let err = orch.transcribe(&take()).await.unwrap_err();
        assert!(matches!(err, WorkflowError::TranscriptionFailed(_)));
        let snap = orch.snapshot();
        assert_eq!(snap.description, "Crack in foundation");
        assert!(snap.in_flight.is_none());
    }

    #[tokio::test]
    async fn test_second_transition_is_rejected_while_one_is_in_flight() {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let gateway = MockGateway {
            analyze_gate: Some((started.clone(), release.clone())),
            ..MockGateway::default()
        };
        let orch = two_stage(gateway);
        orch.select_image_bytes(&png_bytes()).expect("select image");
        orch.set_description("Crack in foundation").expect("describe");

        let background = tokio::spawn({
            let orch = orch.clone();
            async move { orch.analyze().await }
        });
        started.notified().await;

        // Everything that touches the draft is refused, with no side effects
        assert!(matches!(orch.analyze().await, Err(WorkflowError::Busy)));
        assert!(matches!(
            orch.generate_final().await,
            Err(WorkflowError::Busy)
        ));
        assert!(matches!(orch.reset(), Err(WorkflowError::Busy)));
        assert!(matches!(
            orch.select_image_bytes(&png_bytes()),
            Err(WorkflowError::Busy)
        ));
        assert!(matches!(
            orch.set_description("x"),
            Err(WorkflowError::Busy)
        ));

        release.notify_one();
        background
            .await
            .expect("task panicked")
            .expect("gated analyze should succeed");
        assert_eq!(orch.snapshot().stage, Stage::AnalysisPreview);
        assert_eq!(
            orch.gateway
                .calls()
                .iter()
                .filter(|c| **c == "analyze")
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_superseded_resolution_releases_the_guard() {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let gateway = MockGateway {
            analyze_gate: Some((started.clone(), release.clone())),
            ..MockGateway::default()
        };
        let orch = two_stage(gateway);
        orch.select_image_bytes(&png_bytes()).expect("select image");
        orch.set_description("Crack in foundation").expect("describe");

        let background = tokio::spawn({
            let orch = orch.clone();
            async move { orch.analyze().await }
        });
        started.notified().await;

        // Supersede the draft while the response is pending
        orch.lock().epoch += 1;
        release.notify_one();

        let err = background
            .await
            .expect("task panicked")
            .expect_err("stale resolution must be discarded");
        assert!(matches!(err, WorkflowError::Stale));

        let snap = orch.snapshot();
        assert!(snap.analysis_text.is_none(), "stale result must not be applied");
        assert!(snap.in_flight.is_none(), "guard must be released");

        // The machine is not wedged: the same transition runs again
        // (a stored permit lets the gated mock pass straight through)
        release.notify_one();
        orch.analyze().await.expect("retry after discard");
        assert_eq!(orch.snapshot().stage, Stage::AnalysisPreview);
        assert!(orch.reset().is_ok());
    }

    #[tokio::test]
    async fn test_reset_yields_empty_draft_and_released_audio() {
        let orch = two_stage(MockGateway::default());
        to_preview(&orch).await;

        orch.reset().expect("reset");
        let snap = orch.snapshot();
        assert_eq!(snap.stage, Stage::Empty);
        assert!(!snap.has_image);
        assert!(snap.description.is_empty());
        assert!(snap.analysis_text.is_none());
        assert_eq!(snap.audio_state, SessionState::Released);
        assert_eq!(snap.jurisdiction, "WA");
    }

    #[tokio::test]
    async fn test_analyze_preconditions() {
        let orch = two_stage(MockGateway::default());

        // No image
        orch.set_description("Crack").expect("describe");
        assert!(matches!(
            orch.analyze().await,
            Err(WorkflowError::InvalidTransition(_))
        ));

        // Whitespace-only description
        orch.select_image_bytes(&png_bytes()).expect("select image");
        orch.set_description("   ").expect("describe");
        assert!(matches!(
            orch.analyze().await,
            Err(WorkflowError::InvalidTransition(_))
        ));
        assert!(orch.gateway.calls().is_empty(), "no network side effects");
    }

    #[tokio::test]
    async fn test_single_stage_skips_preview() {
        let orch = Orchestrator::new(
            MockGateway::default(),
            GenerationMode::SingleStage,
            "OR".to_string(),
        );
        orch.select_image_bytes(&png_bytes()).expect("select image");
        orch.set_description("Broken gutter bracket").expect("describe");

        assert!(matches!(
            orch.analyze().await,
            Err(WorkflowError::InvalidTransition(_))
        ));

        let outcome = orch.generate_final().await.expect("generate");
        assert_eq!(outcome.statement, "[OR] Broken gutter bracket");
        assert_eq!(orch.snapshot().stage, Stage::Final);
    }

    #[tokio::test]
    async fn test_regenerate_keeps_old_statement_on_failure() {
        let orch = two_stage(MockGateway::default());
        to_preview(&orch).await;
        let outcome = orch.generate_final().await.expect("generate");

        orch.gateway.fail_generate.store(true, Ordering::SeqCst);
        let err = orch.regenerate().await.unwrap_err();
        assert!(matches!(err, WorkflowError::GenerationFailed(_)));

        let snap = orch.snapshot();
        assert_eq!(snap.stage, Stage::Final);
        assert_eq!(snap.final_statement.as_deref(), Some(outcome.statement.as_str()));

        orch.gateway.fail_generate.store(false, Ordering::SeqCst);
        let second = orch.regenerate().await.expect("regenerate");
        // Regeneration goes back to the raw description, not the analysis
        assert_eq!(second.statement, "[WA] Crack in foundation");
    }

    #[tokio::test]
    async fn test_select_image_clears_prior_artifacts() {
        let orch = two_stage(MockGateway::default());
        to_preview(&orch).await;
        orch.generate_final().await.expect("generate");

        orch.select_image_bytes(&png_bytes()).expect("reselect");
        let snap = orch.snapshot();
        assert_eq!(snap.stage, Stage::ImageSelected);
        assert!(snap.analysis_text.is_none());
        assert!(snap.final_statement.is_none());
        assert!(snap.remote_id.is_none());
        assert!(snap.uploaded_image_url.is_none());
        // Description survives an image swap
        assert_eq!(snap.description, "Crack in foundation");
    }

    #[tokio::test]
    async fn test_failed_normalization_discards_prior_asset() {
        let orch = two_stage(MockGateway::default());
        orch.select_image_bytes(&png_bytes()).expect("select image");

        let err = orch.select_image_bytes(b"not an image").unwrap_err();
        assert!(matches!(err, WorkflowError::ImageProcessing(_)));
        let snap = orch.snapshot();
        assert!(!snap.has_image, "prior asset must not be retained");
        assert_eq!(snap.stage, Stage::Empty);
    }
}
