//! Story generation through an OpenAI-compatible multimodal chat API.

use crate::config::ProviderConfig;
use crate::encoder::EncodedImage;
use crate::error::ProviderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Fixed system persona sent with every request
pub const STORY_PERSONA: &str = "You are a creative storyteller that creates imaginative, engaging, \
and family-friendly short stories of about 150 to 400 words based on images. \
Create a whimsical, positive narrative that captures the essence of the image. \
Your stories should have a clear beginning, middle, and end, with vivid descriptions. \
Never include violent, political, adult, or otherwise controversial themes.";

const STORY_INSTRUCTION: &str = "Generate a creative short story based on this image:";

/// Produces narrative text for an encoded image
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StoryGenerator: Send + Sync {
    /// One round trip to the provider; no retries
    async fn generate(&self, image: &EncodedImage) -> Result<String, ProviderError>;
}

/// Chat completion request
#[derive(Debug, Clone, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: MessageContent,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Story generator backed by a chat completions endpoint (Groq by default)
pub struct ChatStoryGenerator {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl ChatStoryGenerator {
    /// The credential is only checked per call, so a generator without one
    /// reports a configuration error on every attempt
    pub fn new(config: &ProviderConfig, timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Service(format!("Failed to build HTTP client: {}", e)))?;

        info!(
            base_url = %config.base_url,
            model = %config.model,
            "Story generator initialized"
        );

        Ok(Self {
            client,
            api_key: config.credential().map(str::to_string),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_request(&self, image: &EncodedImage) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: MessageContent::Text(STORY_PERSONA.to_string()),
                },
                ChatMessage {
                    role: "user",
                    content: MessageContent::Parts(vec![
                        ContentPart::Text {
                            text: STORY_INSTRUCTION.to_string(),
                        },
                        ContentPart::ImageUrl {
                            image_url: ImageUrl {
                                url: image.data_uri.clone(),
                            },
                        },
                    ]),
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: false,
        }
    }
}

#[async_trait]
impl StoryGenerator for ChatStoryGenerator {
    #[instrument(skip(self, image), fields(model = %self.model, mime_type = image.mime_type.as_str()))]
    async fn generate(&self, image: &EncodedImage) -> Result<String, ProviderError> {
        let Some(api_key) = self.api_key.as_deref() else {
            warn!("Story generation attempted without an API key");
            return Err(ProviderError::MissingCredential);
        };

        let body = self.build_request(image);
        debug!("Sending story generation request");

        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorEnvelope>(&error_text)
                .map(|e| e.error.message)
                .unwrap_or(error_text);
            return Err(ProviderError::classify(format!(
                "HTTP {}: {}",
                status.as_u16(),
                message
            )));
        }

        let parsed: ChatResponse = response.json().await?;
        let story = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .unwrap_or_default();

        if story.is_empty() {
            return Err(ProviderError::Service(
                "Provider returned an empty story".to_string(),
            ));
        }

        info!(words = story.split_whitespace().count(), "Story generated");
        Ok(story)
    }
}
