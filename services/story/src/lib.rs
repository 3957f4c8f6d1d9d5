//! PixTale Story Service
//!
//! Turns an uploaded picture into a short family-friendly story and a spoken
//! reading of it. Each request runs the same fixed pipeline: the upload is
//! checked against the configured policy and persisted, re-read as a data URI,
//! narrated by a multimodal chat model and finally read aloud by a
//! text-to-speech provider.
//!
//! ## Features
//!
//! - **Upload Policy**: Strict (5MB, JPEG/PNG) or relaxed presets with
//!   per-field overrides
//! - **Story Generation**: OpenAI-compatible chat completions (Groq by default)
//!   with an image content part
//! - **Audio Synthesis**: Segmented Google Translate TTS, concatenated into a
//!   single MP3
//! - **Partial Success**: The story is still returned when audio fails
//!
//! ## Architecture
//!
//! ```text
//!  POST /api/generate
//!        │
//!        ▼
//! ┌──────────────┐    ┌──────────────┐    ┌──────────────┐    ┌──────────────┐
//! │ Image        │───▶│ Image        │───▶│ Story        │───▶│ Audio        │
//! │ Validator    │    │ Encoder      │    │ Generator    │    │ Synthesizer  │
//! └──────────────┘    └──────────────┘    └──────────────┘    └──────────────┘
//!        │                   ▲                                       │
//!        ▼                   │                                       ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │ Artifact Store (uploads/, served under /uploads)                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod artifact_store;
pub mod config;
pub mod encoder;
pub mod error;
pub mod pipeline;
pub mod speech;
pub mod story;
pub mod validator;

pub use api::{AppState, GenerateResponse};
pub use artifact_store::{ArtifactStore, StoredArtifact};
pub use config::Config;
pub use encoder::{EncodedImage, ImageEncoder, ImageMime};
pub use error::{PipelineError, ProviderError, SynthesisError, ValidationError};
pub use pipeline::{PipelineOrchestrator, PipelineOutcome, PipelineResult, ResultMetadata};
pub use speech::{AudioAsset, AudioSynthesizer, TranslateTtsSynthesizer};
pub use story::{ChatStoryGenerator, StoryGenerator};
pub use validator::{ImageValidator, RawUpload, UploadPolicy, UploadedImage};
