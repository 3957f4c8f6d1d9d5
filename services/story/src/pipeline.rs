use crate::artifact_store::ArtifactStore;
use crate::encoder::ImageEncoder;
use crate::error::{PipelineError, SynthesisError, ValidationError};
use crate::speech::{AudioAsset, AudioSynthesizer};
use crate::story::StoryGenerator;
use crate::validator::{ImageValidator, RawUpload, UploadedImage};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Position of a request in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Validating,
    Encoding,
    GeneratingStory,
    SynthesizingAudio,
}

impl PipelineStage {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStage::Validating => "validating",
            PipelineStage::Encoding => "encoding",
            PipelineStage::GeneratingStory => "generating_story",
            PipelineStage::SynthesizingAudio => "synthesizing_audio",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Facts about the image a story was generated from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMetadata {
    pub image_size_bytes: u64,
    pub file_name: String,
    pub generated_at: DateTime<Utc>,
}

/// Story with its audio reading
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineResult {
    pub story: String,
    pub audio_url: String,
    pub metadata: ResultMetadata,
}

/// Terminal state of a pipeline run that produced a story
#[derive(Debug)]
pub enum PipelineOutcome {
    /// Story and audio both produced
    Assembled(PipelineResult),
    /// Story produced, audio not
    PartiallyAssembled {
        story: String,
        metadata: ResultMetadata,
        synthesis_error: SynthesisError,
    },
}

impl PipelineOutcome {
    pub fn story(&self) -> &str {
        match self {
            PipelineOutcome::Assembled(result) => &result.story,
            PipelineOutcome::PartiallyAssembled { story, .. } => story,
        }
    }

    pub fn audio_url(&self) -> Option<&str> {
        match self {
            PipelineOutcome::Assembled(result) => Some(&result.audio_url),
            PipelineOutcome::PartiallyAssembled { .. } => None,
        }
    }

    pub fn metadata(&self) -> &ResultMetadata {
        match self {
            PipelineOutcome::Assembled(result) => &result.metadata,
            PipelineOutcome::PartiallyAssembled { metadata, .. } => metadata,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, PipelineOutcome::Assembled(_))
    }
}

/// Runs validate → encode → generate → synthesize for one request at a time.
///
/// Stages of a request never overlap and nothing is retried. Requests share
/// only the artifact store.
pub struct PipelineOrchestrator {
    validator: ImageValidator,
    encoder: ImageEncoder,
    story_generator: Arc<dyn StoryGenerator>,
    audio_synthesizer: Arc<dyn AudioSynthesizer>,
    store: Arc<ArtifactStore>,
}

impl PipelineOrchestrator {
    pub fn new(
        validator: ImageValidator,
        story_generator: Arc<dyn StoryGenerator>,
        audio_synthesizer: Arc<dyn AudioSynthesizer>,
        store: Arc<ArtifactStore>,
    ) -> Self {
        Self {
            validator,
            encoder: ImageEncoder,
            story_generator,
            audio_synthesizer,
            store,
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn validator(&self) -> &ImageValidator {
        &self.validator
    }

    /// Full pipeline for one upload
    #[instrument(skip(self, upload), fields(request_id = %Uuid::new_v4(), original_name = %upload.original_name))]
    pub async fn run(&self, upload: RawUpload) -> Result<PipelineOutcome, PipelineError> {
        let started = Instant::now();
        let result = self.run_stages(upload).await;

        match &result {
            Ok(outcome) => {
                let label = if outcome.is_complete() {
                    "assembled"
                } else {
                    "partially_assembled"
                };
                metrics::counter!("story_pipeline_outcomes_total", "outcome" => label).increment(1);
                info!(
                    outcome = label,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Pipeline finished"
                );
            }
            Err(e) => {
                metrics::counter!("story_pipeline_outcomes_total", "outcome" => "failed", "kind" => e.kind())
                    .increment(1);
            }
        }

        result
    }

    async fn run_stages(&self, upload: RawUpload) -> Result<PipelineOutcome, PipelineError> {
        let image = self
            .stage(PipelineStage::Validating, None, self.validator.validate(upload, &self.store))
            .await?;

        let encoded = self
            .stage(
                PipelineStage::Encoding,
                Some(&image),
                self.encoder.encode(&image, &self.store),
            )
            .await?;

        let story = self
            .stage(PipelineStage::GeneratingStory, Some(&image), async {
                self.story_generator
                    .generate(&encoded)
                    .await
                    .map_err(PipelineError::from)
            })
            .await?;
        drop(encoded);

        let metadata = ResultMetadata {
            image_size_bytes: image.size_bytes,
            file_name: image.file_name(),
            generated_at: Utc::now(),
        };

        let audio = self
            .stage(PipelineStage::SynthesizingAudio, Some(&image), async {
                self.audio_synthesizer
                    .synthesize(&story)
                    .await
                    .map_err(PipelineError::from)
            })
            .await;

        match audio {
            Ok(asset) => Ok(PipelineOutcome::Assembled(PipelineResult {
                story,
                audio_url: asset.public_url,
                metadata,
            })),
            Err(PipelineError::Synthesis(synthesis_error)) => {
                warn!(
                    error = %synthesis_error,
                    "Returning story without audio"
                );
                Ok(PipelineOutcome::PartiallyAssembled {
                    story,
                    metadata,
                    synthesis_error,
                })
            }
            Err(other) => Err(other),
        }
    }

    /// Audio-only flow for caller-supplied text
    #[instrument(skip(self, text), fields(request_id = %Uuid::new_v4(), text_chars = text.chars().count()))]
    pub async fn narrate(&self, text: &str) -> Result<AudioAsset, PipelineError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ValidationError::EmptyText.into());
        }

        self.stage(PipelineStage::SynthesizingAudio, None, async {
            self.audio_synthesizer
                .synthesize(text)
                .await
                .map_err(PipelineError::from)
        })
        .await
    }

    /// Validate and persist without calling any provider
    #[instrument(skip(self, upload), fields(request_id = %Uuid::new_v4(), original_name = %upload.original_name))]
    pub async fn accept(&self, upload: RawUpload) -> Result<UploadedImage, PipelineError> {
        self.stage(
            PipelineStage::Validating,
            None,
            self.validator.validate(upload, &self.store),
        )
        .await
    }

    /// Run one stage, recording its latency and logging failures with full detail
    async fn stage<T, F>(
        &self,
        stage: PipelineStage,
        image: Option<&UploadedImage>,
        fut: F,
    ) -> Result<T, PipelineError>
    where
        F: std::future::Future<Output = Result<T, PipelineError>>,
    {
        info!(stage = %stage, "Pipeline stage started");
        let started = Instant::now();
        let result = fut.await;

        metrics::histogram!("story_pipeline_stage_seconds", "stage" => stage.as_str())
            .record(started.elapsed().as_secs_f64());

        if let Err(e) = &result {
            let file = image
                .map(|i| i.path.display().to_string())
                .unwrap_or_else(|| "no file stored".to_string());

            if e.status_code().is_client_error() {
                warn!(stage = %stage, kind = e.kind(), error = %e, file = %file, "Pipeline stage rejected input");
            } else {
                error!(
                    stage = %stage,
                    kind = e.kind(),
                    error = %e,
                    error_debug = ?e,
                    file = %file,
                    "Pipeline stage failed"
                );
            }
        }

        result
    }
}
