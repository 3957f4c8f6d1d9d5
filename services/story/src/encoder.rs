use crate::artifact_store::ArtifactStore;
use crate::error::{PipelineError, UnsupportedFormatError};
use crate::validator::UploadedImage;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::path::Path;
use tracing::{debug, instrument};

/// MIME tags accepted inside a data URI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageMime {
    Png,
    Jpeg,
}

impl ImageMime {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageMime::Png => "image/png",
            ImageMime::Jpeg => "image/jpeg",
        }
    }

    /// Fixed extension table; matching ignores case
    pub fn from_path(path: &Path) -> Result<Self, UnsupportedFormatError> {
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "png" => Ok(ImageMime::Png),
            "jpg" | "jpeg" => Ok(ImageMime::Jpeg),
            _ => Err(UnsupportedFormatError { extension }),
        }
    }
}

/// Image ready to embed in a generation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub mime_type: ImageMime,
    /// `data:<mime>;base64,<payload>`
    pub data_uri: String,
}

impl EncodedImage {
    pub fn from_bytes(mime_type: ImageMime, bytes: &[u8]) -> Self {
        Self {
            mime_type,
            data_uri: format!("data:{};base64,{}", mime_type.as_str(), STANDARD.encode(bytes)),
        }
    }
}

/// Turns stored uploads into data URIs, bytes untouched
pub struct ImageEncoder;

impl ImageEncoder {
    /// The extension decides the MIME tag, regardless of what the client declared
    #[instrument(skip(self, image, store), fields(path = %image.path.display()))]
    pub async fn encode(
        &self,
        image: &UploadedImage,
        store: &ArtifactStore,
    ) -> Result<EncodedImage, PipelineError> {
        let mime_type = ImageMime::from_path(&image.path)?;
        let bytes = store.read(&image.path).await?;
        let encoded = EncodedImage::from_bytes(mime_type, &bytes);

        debug!(
            mime_type = mime_type.as_str(),
            data_uri_bytes = encoded.data_uri.len(),
            "Image encoded"
        );

        Ok(encoded)
    }
}
