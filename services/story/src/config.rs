use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the story service
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
    /// Upload policy and artifact directory
    #[serde(default)]
    pub upload: UploadConfig,
    /// Text generation provider
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Speech synthesis provider
    #[serde(default)]
    pub speech: SpeechConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// API configuration for the story endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
    /// Multipart field carrying the image
    #[serde(default = "default_upload_field")]
    pub upload_field: String,
    /// URL prefix under which artifacts are served
    #[serde(default = "default_public_prefix")]
    pub public_prefix: String,
}

/// Named upload policy presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyPreset {
    /// 5MB, JPEG and PNG only
    Strict,
    /// 10MB, JPEG, PNG, GIF and WebP
    Relaxed,
}

/// Upload configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Directory holding uploaded images and generated audio
    #[serde(default = "default_upload_dir")]
    pub dir: PathBuf,
    /// Base policy
    #[serde(default = "default_policy")]
    pub policy: PolicyPreset,
    /// Overrides the preset's size ceiling
    pub max_size_bytes: Option<u64>,
    /// Overrides the preset's MIME set
    pub allowed_types: Option<Vec<String>>,
}

/// Multimodal chat completion provider (OpenAI-compatible)
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// API credential; required
    #[serde(default)]
    pub api_key: Option<String>,
    /// Base URL of the chat completions API
    #[serde(default = "default_provider_base_url")]
    pub base_url: String,
    /// Vision-capable model
    #[serde(default = "default_provider_model")]
    pub model: String,
    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Completion token cap
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Request timeout in seconds
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
}

/// Text-to-speech provider
#[derive(Debug, Clone, Deserialize)]
pub struct SpeechConfig {
    /// Base URL of the translate TTS host
    #[serde(default = "default_speech_base_url")]
    pub base_url: String,
    /// Fixed locale for synthesis
    #[serde(default = "default_speech_lang")]
    pub lang: String,
    /// Slow reading speed
    #[serde(default)]
    pub slow: bool,
    /// Per-segment request timeout in seconds
    #[serde(default = "default_speech_timeout_secs")]
    pub timeout_secs: u64,
}

/// Configuration problems detected at startup
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

// Default value functions
fn default_service_name() -> String {
    "story-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    5000
}

fn default_true() -> bool {
    true
}

fn default_cors_origins() -> Vec<String> {
    vec!["http://localhost:5173".to_string()]
}

fn default_upload_field() -> String {
    "image".to_string()
}

fn default_public_prefix() -> String {
    "/uploads".to_string()
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_policy() -> PolicyPreset {
    PolicyPreset::Strict
}

fn default_provider_base_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}

fn default_provider_model() -> String {
    "meta-llama/llama-4-scout-17b-16e-instruct".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_provider_timeout_secs() -> u64 {
    60
}

fn default_speech_base_url() -> String {
    "https://translate.google.com".to_string()
}

fn default_speech_lang() -> String {
    "en".to_string()
}

fn default_speech_timeout_secs() -> u64 {
    30
}

impl PolicyPreset {
    /// Size ceiling in bytes
    pub fn max_size_bytes(self) -> u64 {
        match self {
            PolicyPreset::Strict => 5 * 1024 * 1024,
            PolicyPreset::Relaxed => 10 * 1024 * 1024,
        }
    }

    /// Accepted MIME types
    pub fn allowed_types(self) -> BTreeSet<String> {
        let types: &[&str] = match self {
            PolicyPreset::Strict => &["image/jpeg", "image/png"],
            PolicyPreset::Relaxed => &["image/jpeg", "image/png", "image/gif", "image/webp"],
        };
        types.iter().map(|t| t.to_string()).collect()
    }
}

impl UploadConfig {
    /// Effective size ceiling after overrides
    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
            .unwrap_or_else(|| self.policy.max_size_bytes())
    }

    /// Effective MIME set after overrides
    pub fn allowed_types(&self) -> BTreeSet<String> {
        match &self.allowed_types {
            Some(types) => types.iter().map(|t| t.trim().to_ascii_lowercase()).collect(),
            None => self.policy.allowed_types(),
        }
    }
}

impl Config {
    /// Load configuration from `.env`, config files and environment
    pub fn load() -> anyhow::Result<Self> {
        // A missing .env file is the normal case in deployed environments
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "story-service")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            // Add config file if present
            .add_source(config::File::with_name("config/story").required(false))
            .add_source(config::File::with_name("/etc/pixtale/story").required(false))
            // Override with environment variables
            // STORY__PROVIDER__API_KEY -> provider.api_key
            .add_source(
                config::Environment::with_prefix("STORY")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("upload.allowed_types")
                    .with_list_parse_key("api.cors_origins"),
            )
            // Conventional provider variable when the prefixed one is unset
            .set_override_option(
                "provider.api_key",
                legacy_api_key(|key| std::env::var(key).ok()),
            )?
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Reject configurations the service cannot start with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.credential().is_none() {
            return Err(ConfigError::Missing("provider.api_key (or GROQ_API_KEY)"));
        }
        if self.upload.max_size_bytes() == 0 {
            return Err(ConfigError::Invalid {
                field: "upload.max_size_bytes",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.upload.allowed_types().is_empty() {
            return Err(ConfigError::Invalid {
                field: "upload.allowed_types",
                message: "at least one MIME type is required".to_string(),
            });
        }
        if self.api.upload_field.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "api.upload_field",
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Get provider request timeout as Duration
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider.timeout_secs)
    }

    /// Get speech request timeout as Duration
    pub fn speech_timeout(&self) -> Duration {
        Duration::from_secs(self.speech.timeout_secs)
    }
}

impl ProviderConfig {
    /// Non-blank credential, if configured
    pub fn credential(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}

/// `GROQ_API_KEY` only applies when the prefixed variable is absent
fn legacy_api_key(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    if lookup("STORY__PROVIDER__API_KEY").is_some() {
        return None;
    }
    lookup("GROQ_API_KEY")
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: true,
            cors_origins: default_cors_origins(),
            upload_field: default_upload_field(),
            public_prefix: default_public_prefix(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            dir: default_upload_dir(),
            policy: default_policy(),
            max_size_bytes: None,
            allowed_types: None,
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_provider_base_url(),
            model: default_provider_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_provider_timeout_secs(),
        }
    }
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            base_url: default_speech_base_url(),
            lang: default_speech_lang(),
            slow: false,
            timeout_secs: default_speech_timeout_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        assert_eq!(default_upload_field(), "image");
        assert_eq!(default_public_prefix(), "/uploads");
        assert_eq!(default_speech_lang(), "en");
    }

    #[test]
    fn test_policy_presets() {
        assert_eq!(PolicyPreset::Strict.max_size_bytes(), 5 * 1024 * 1024);
        assert_eq!(PolicyPreset::Relaxed.max_size_bytes(), 10 * 1024 * 1024);
        assert_eq!(PolicyPreset::Strict.allowed_types().len(), 2);
        assert!(PolicyPreset::Relaxed.allowed_types().contains("image/webp"));
    }

    #[test]
    fn test_upload_overrides() {
        let upload = UploadConfig {
            max_size_bytes: Some(1024),
            allowed_types: Some(vec![" IMAGE/PNG ".to_string()]),
            ..Default::default()
        };

        assert_eq!(upload.max_size_bytes(), 1024);
        let types = upload.allowed_types();
        assert_eq!(types.len(), 1);
        assert!(types.contains("image/png"));
    }

    #[test]
    fn test_validate_requires_credential() {
        let mut config = Config::default();
        assert!(matches!(config.validate(), Err(ConfigError::Missing(_))));

        config.provider.api_key = Some("   ".to_string());
        assert!(matches!(config.validate(), Err(ConfigError::Missing(_))));

        config.provider.api_key = Some("gsk_test".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_groq_key_used_when_prefixed_key_unset() {
        let env = |key: &str| match key {
            "GROQ_API_KEY" => Some("gsk_legacy".to_string()),
            _ => None,
        };
        assert_eq!(legacy_api_key(env), Some("gsk_legacy".to_string()));
        assert_eq!(legacy_api_key(|_| None), None);
    }

    #[test]
    fn test_prefixed_key_wins_over_groq_key() {
        let env = |key: &str| match key {
            "STORY__PROVIDER__API_KEY" => Some("gsk_prefixed".to_string()),
            "GROQ_API_KEY" => Some("gsk_legacy".to_string()),
            _ => None,
        };
        assert_eq!(legacy_api_key(env), None);
    }

    #[test]
    fn test_validate_rejects_empty_type_set() {
        let mut config = Config::default();
        config.provider.api_key = Some("gsk_test".to_string());
        config.upload.allowed_types = Some(vec![]);

        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "upload.allowed_types", .. })
        ));
    }
}
