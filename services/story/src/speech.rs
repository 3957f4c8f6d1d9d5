//! Text-to-speech through the Google Translate TTS endpoint.
//!
//! The endpoint only accepts short inputs, so the story is read out in
//! segments of at most [`MAX_SEGMENT_CHARS`] characters which are fetched in
//! order and concatenated into one MP3 file before anything is returned.

use crate::artifact_store::ArtifactStore;
use crate::config::SpeechConfig;
use crate::error::{ProviderError, SynthesisError};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Longest input the endpoint accepts per request
pub const MAX_SEGMENT_CHARS: usize = 100;

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// Generated audio file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioAsset {
    pub file_path: PathBuf,
    pub public_url: String,
}

/// Reads a story aloud into a new artifact
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AudioSynthesizer: Send + Sync {
    /// The whole file is written before this returns
    async fn synthesize(&self, story: &str) -> Result<AudioAsset, SynthesisError>;
}

/// Synthesizer backed by `translate_tts`
pub struct TranslateTtsSynthesizer {
    client: reqwest::Client,
    base_url: String,
    lang: String,
    slow: bool,
    store: Arc<ArtifactStore>,
}

impl TranslateTtsSynthesizer {
    pub fn new(
        config: &SpeechConfig,
        timeout: Duration,
        store: Arc<ArtifactStore>,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ProviderError::Service(format!("Failed to build HTTP client: {}", e)))?;

        info!(base_url = %config.base_url, lang = %config.lang, "Speech synthesizer initialized");

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            lang: config.lang.clone(),
            slow: config.slow,
            store,
        })
    }

    async fn fetch_segment(
        &self,
        segment: &str,
        idx: usize,
        total: usize,
    ) -> Result<Vec<u8>, ProviderError> {
        let idx = idx.to_string();
        let total = total.to_string();
        let textlen = segment.chars().count().to_string();
        let speed = if self.slow { "0.24" } else { "1" };

        let response = self
            .client
            .get(format!("{}/translate_tts", self.base_url))
            .query(&[
                ("ie", "UTF-8"),
                ("client", "tw-ob"),
                ("tl", self.lang.as_str()),
                ("q", segment),
                ("idx", idx.as_str()),
                ("total", total.as_str()),
                ("textlen", textlen.as_str()),
                ("ttsspeed", speed),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::classify(format!(
                "HTTP {}: {}",
                status.as_u16(),
                error_text
            )));
        }

        let audio = response.bytes().await?;
        if audio.is_empty() {
            return Err(ProviderError::Service(format!(
                "Speech provider returned no audio for segment {}",
                idx
            )));
        }

        Ok(audio.to_vec())
    }
}

#[async_trait]
impl AudioSynthesizer for TranslateTtsSynthesizer {
    #[instrument(skip(self, story), fields(lang = %self.lang, story_chars = story.chars().count()))]
    async fn synthesize(&self, story: &str) -> Result<AudioAsset, SynthesisError> {
        let segments = segment_text(story, MAX_SEGMENT_CHARS);
        if segments.is_empty() {
            return Err(SynthesisError::new(
                story,
                ProviderError::Service("Nothing to synthesize".to_string()),
            ));
        }

        let mut audio = Vec::new();
        for (idx, segment) in segments.iter().enumerate() {
            let chunk = self
                .fetch_segment(segment, idx, segments.len())
                .await
                .map_err(|e| SynthesisError::new(story, e))?;
            debug!(idx, chunk_bytes = chunk.len(), "Segment synthesized");
            audio.extend_from_slice(&chunk);
        }

        let stored = self
            .store
            .store("story", "mp3", &audio)
            .await
            .map_err(|e| SynthesisError::new(story, e))?;

        info!(
            path = %stored.path.display(),
            segments = segments.len(),
            size_bytes = audio.len(),
            "Audio file saved"
        );

        Ok(AudioAsset {
            file_path: stored.path,
            public_url: stored.public_url,
        })
    }
}

/// Split text into pieces of at most `max_chars` characters.
///
/// Sentences are kept whole where they fit and packed together while the
/// limit allows; longer sentences break between words, and single words longer
/// than the limit are cut.
pub fn segment_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();

    for sentence in split_sentences(text) {
        for piece in fit_sentence(&sentence, max_chars) {
            let joined_len = if current.is_empty() {
                piece.chars().count()
            } else {
                current.chars().count() + 1 + piece.chars().count()
            };

            if joined_len <= max_chars {
                if !current.is_empty() {
                    current.push(' ');
                }
                current.push_str(&piece);
            } else {
                segments.push(std::mem::take(&mut current));
                current = piece;
            }
        }
    }

    if !current.is_empty() {
        segments.push(current);
    }
    segments
}

/// Whitespace-normalized sentences, terminators kept
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);

        if word.ends_with(&['.', '!', '?', ';', ':'][..]) {
            sentences.push(std::mem::take(&mut current));
        }
    }

    if !current.is_empty() {
        sentences.push(current);
    }
    sentences
}

fn fit_sentence(sentence: &str, max_chars: usize) -> Vec<String> {
    if sentence.chars().count() <= max_chars {
        return vec![sentence.to_string()];
    }

    let mut pieces = Vec::new();
    let mut current = String::new();

    for word in sentence.split(' ') {
        let words: Vec<String> = if word.chars().count() > max_chars {
            let chars: Vec<char> = word.chars().collect();
            chars.chunks(max_chars).map(|c| c.iter().collect()).collect()
        } else {
            vec![word.to_string()]
        };

        for word in words {
            let joined_len = if current.is_empty() {
                word.chars().count()
            } else {
                current.chars().count() + 1 + word.chars().count()
            };

            if joined_len <= max_chars {
                if !current.is_empty() {
                    current.push(' ');
                }
                current.push_str(&word);
            } else {
                pieces.push(std::mem::take(&mut current));
                current = word;
            }
        }
    }

    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SynthesisFailure;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn synthesizer(base_url: &str, store: Arc<ArtifactStore>) -> TranslateTtsSynthesizer {
        let config = SpeechConfig {
            base_url: base_url.to_string(),
            ..Default::default()
        };
        TranslateTtsSynthesizer::new(&config, Duration::from_secs(5), store).unwrap()
    }

    #[test]
    fn test_segment_short_text() {
        assert_eq!(segment_text("  Hello   world.  ", 100), vec!["Hello world."]);
        assert!(segment_text("   ", 100).is_empty());
    }

    #[test]
    fn test_segments_respect_limit() {
        let story = "The little fox hopped over the silver stream. ".repeat(12);
        let segments = segment_text(&story, MAX_SEGMENT_CHARS);

        assert!(segments.len() > 1);
        assert!(segments.iter().all(|s| s.chars().count() <= MAX_SEGMENT_CHARS));
        assert_eq!(segments.join(" "), story.split_whitespace().collect::<Vec<_>>().join(" "));
    }

    #[test]
    fn test_segment_packs_sentences() {
        let segments = segment_text("One. Two. Three.", 10);
        assert_eq!(segments, vec!["One. Two.", "Three."]);
    }

    #[test]
    fn test_segment_cuts_long_words() {
        let word = "a".repeat(25);
        let segments = segment_text(&word, 10);
        assert_eq!(segments, vec!["a".repeat(10), "a".repeat(10), "a".repeat(5)]);
    }

    #[tokio::test]
    async fn test_synthesize_writes_concatenated_audio() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ArtifactStore::new(dir.path(), "/uploads"));
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/translate_tts"))
            .and(query_param("tl", "en"))
            .and(query_param("idx", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"AAA".to_vec()))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/translate_tts"))
            .and(query_param("idx", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"BBB".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let story = format!("{} {}", "word ".repeat(15).trim(), "more ".repeat(15).trim());
        let asset = synthesizer(&server.uri(), store)
            .synthesize(&story)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&asset.file_path).unwrap(), b"AAABBB");
        let name = asset.file_path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("story-") && name.ends_with(".mp3"));
        assert_eq!(asset.public_url, format!("/uploads/{}", name));
    }

    #[tokio::test]
    async fn test_failure_keeps_story_and_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ArtifactStore::new(dir.path(), "/uploads"));
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("tts down"))
            .mount(&server)
            .await;

        let err = synthesizer(&server.uri(), store)
            .synthesize("A tiny tale.")
            .await
            .unwrap_err();

        assert_eq!(err.story, "A tiny tale.");
        assert!(matches!(err.cause, SynthesisFailure::Provider(ProviderError::Service(_))));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
