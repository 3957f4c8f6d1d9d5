use crate::artifact_store::ArtifactStore;
use crate::config::UploadConfig;
use crate::error::{PipelineError, ValidationError};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// Upload as handed over by the HTTP layer, whatever its field name
#[derive(Debug, Clone)]
pub struct RawUpload {
    pub bytes: Vec<u8>,
    pub declared_mime_type: String,
    /// Bytes seen on the wire; may exceed `bytes.len()` when buffering stopped at the ceiling
    pub size_bytes: u64,
    pub original_name: String,
}

impl RawUpload {
    pub fn new(
        bytes: Vec<u8>,
        declared_mime_type: impl Into<String>,
        original_name: impl Into<String>,
    ) -> Self {
        Self {
            size_bytes: bytes.len() as u64,
            bytes,
            declared_mime_type: declared_mime_type.into(),
            original_name: original_name.into(),
        }
    }
}

/// Accepted upload, persisted in the artifact store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedImage {
    pub path: PathBuf,
    pub declared_mime_type: String,
    pub size_bytes: u64,
    pub original_name: String,
}

impl UploadedImage {
    /// Stored file name
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Upload acceptance rules
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPolicy {
    pub max_size_bytes: u64,
    pub allowed_types: BTreeSet<String>,
}

impl UploadPolicy {
    pub fn new<I, S>(max_size_bytes: u64, allowed_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            max_size_bytes,
            allowed_types: allowed_types
                .into_iter()
                .map(|t| normalize_mime(t.as_ref()))
                .collect(),
        }
    }

    pub fn from_config(config: &UploadConfig) -> Self {
        Self::new(config.max_size_bytes(), config.allowed_types())
    }

    /// Human label such as `JPG and PNG`
    fn allowed_label(&self) -> String {
        let labels: Vec<String> = self
            .allowed_types
            .iter()
            .map(|t| match t.as_str() {
                "image/jpeg" => "JPG".to_string(),
                other => other
                    .rsplit('/')
                    .next()
                    .unwrap_or(other)
                    .to_ascii_uppercase(),
            })
            .collect();

        match labels.split_last() {
            Some((last, rest)) if !rest.is_empty() => format!("{} and {}", rest.join(", "), last),
            Some((last, _)) => last.clone(),
            None => String::new(),
        }
    }
}

/// Checks uploads against the policy and persists accepted ones
pub struct ImageValidator {
    policy: UploadPolicy,
}

impl ImageValidator {
    pub fn new(policy: UploadPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &UploadPolicy {
        &self.policy
    }

    /// Policy check only; nothing is written
    pub fn check(&self, upload: &RawUpload) -> Result<(), ValidationError> {
        if upload.size_bytes == 0 {
            return Err(ValidationError::MissingImage);
        }

        let declared = normalize_mime(&upload.declared_mime_type);
        if !self.policy.allowed_types.contains(&declared) {
            return Err(ValidationError::UnsupportedType {
                declared: upload.declared_mime_type.clone(),
                allowed: self.policy.allowed_label(),
            });
        }

        if upload.size_bytes > self.policy.max_size_bytes {
            return Err(ValidationError::TooLarge {
                size_bytes: upload.size_bytes,
                max_bytes: self.policy.max_size_bytes,
            });
        }

        Ok(())
    }

    /// Validate and store as `image-<millis><original extension>`
    #[instrument(skip(self, upload, store), fields(original_name = %upload.original_name, size_bytes = upload.size_bytes))]
    pub async fn validate(
        &self,
        upload: RawUpload,
        store: &ArtifactStore,
    ) -> Result<UploadedImage, PipelineError> {
        self.check(&upload)?;

        let extension = Path::new(&upload.original_name)
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();

        let stored = store.store("image", &extension, &upload.bytes).await?;
        debug!(path = %stored.path.display(), "Upload accepted");

        Ok(UploadedImage {
            path: stored.path,
            declared_mime_type: upload.declared_mime_type,
            size_bytes: upload.size_bytes,
            original_name: upload.original_name,
        })
    }
}

/// Lowercase, strip parameters, fold the `image/jpg` alias
fn normalize_mime(mime: &str) -> String {
    let essence = mime
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    match essence.as_str() {
        "image/jpg" | "image/pjpeg" => "image/jpeg".to_string(),
        _ => essence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationReason;

    fn strict() -> ImageValidator {
        ImageValidator::new(UploadPolicy::new(5 * 1024 * 1024, ["image/jpeg", "image/png"]))
    }

    fn upload(mime: &str, name: &str, size: usize) -> RawUpload {
        RawUpload::new(vec![7u8; size], mime, name)
    }

    #[test]
    fn test_accepts_allowed_types() {
        let validator = strict();
        assert!(validator.check(&upload("image/png", "cat.png", 480 * 1024)).is_ok());
        assert!(validator.check(&upload("image/jpeg", "cat.jpg", 1024)).is_ok());
        assert!(validator.check(&upload("image/jpg", "cat.jpg", 1024)).is_ok());
        assert!(validator.check(&upload("IMAGE/PNG", "cat.png", 1024)).is_ok());
    }

    #[test]
    fn test_rejects_unsupported_type() {
        let err = strict()
            .check(&upload("video/mp4", "movie.mp4", 1024))
            .unwrap_err();
        assert_eq!(err.reason(), ValidationReason::UnsupportedType);
        assert_eq!(err.to_string(), "Only JPG and PNG image files are allowed");
    }

    #[test]
    fn test_rejects_oversized_upload() {
        let err = strict()
            .check(&upload("image/png", "big.png", 5 * 1024 * 1024 + 1))
            .unwrap_err();
        assert_eq!(err.reason(), ValidationReason::TooLarge);
    }

    #[test]
    fn test_size_ceiling_is_inclusive() {
        assert!(strict()
            .check(&upload("image/png", "edge.png", 5 * 1024 * 1024))
            .is_ok());
    }

    #[test]
    fn test_truncated_upload_uses_wire_size() {
        let mut raw = upload("image/png", "big.png", 16);
        raw.size_bytes = 6 * 1024 * 1024;
        let err = strict().check(&raw).unwrap_err();
        assert_eq!(err.reason(), ValidationReason::TooLarge);
    }

    #[test]
    fn test_rejects_empty_upload() {
        let err = strict().check(&upload("image/png", "empty.png", 0)).unwrap_err();
        assert_eq!(err, ValidationError::MissingImage);
    }

    #[test]
    fn test_relaxed_label() {
        let policy = UploadPolicy::new(
            10 * 1024 * 1024,
            ["image/jpeg", "image/png", "image/gif", "image/webp"],
        );
        assert_eq!(policy.allowed_label(), "GIF, JPG, PNG and WEBP");
    }

    #[tokio::test]
    async fn test_validate_persists_with_original_extension() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path(), "/uploads");

        let image = strict()
            .validate(upload("image/jpeg", "holiday.JPEG", 64), &store)
            .await
            .unwrap();

        let name = image.file_name();
        assert!(name.starts_with("image-"));
        assert!(name.ends_with(".jpeg"));
        assert_eq!(image.size_bytes, 64);
        assert_eq!(image.original_name, "holiday.JPEG");
        assert_eq!(std::fs::read(&image.path).unwrap().len(), 64);
    }

    #[tokio::test]
    async fn test_rejected_upload_is_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path(), "/uploads");

        let err = strict()
            .validate(upload("video/mp4", "movie.mp4", 64), &store)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Validation(_)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
