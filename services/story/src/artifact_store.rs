use crate::error::StorageError;
use chrono::Utc;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

const MAX_CREATE_ATTEMPTS: usize = 3;

/// A file persisted in the artifact directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub file_name: String,
    pub path: PathBuf,
    pub public_url: String,
}

/// Local directory for uploaded images and generated audio
///
/// The namespace is append-only: every artifact gets a fresh
/// `<prefix>-<unix millis>.<ext>` name and existing files are never
/// overwritten, so concurrent requests need no locking.
#[derive(Debug)]
pub struct ArtifactStore {
    root: PathBuf,
    public_prefix: String,
    /// Last millisecond handed out; allocations within one process are strictly increasing
    last_millis: AtomicU64,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>, public_prefix: impl Into<String>) -> Self {
        let public_prefix = public_prefix.into();
        Self {
            root: root.into(),
            public_prefix: public_prefix.trim_end_matches('/').to_string(),
            last_millis: AtomicU64::new(0),
        }
    }

    /// Create the directory if needed and check that it accepts writes
    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub async fn ensure_ready(&self) -> Result<(), StorageError> {
        let unavailable = |source| StorageError::Unavailable {
            path: self.root.clone(),
            source,
        };

        fs::create_dir_all(&self.root).await.map_err(unavailable)?;

        let probe = self.root.join(format!(".write-probe-{}", std::process::id()));
        fs::write(&probe, b"").await.map_err(unavailable)?;
        if let Err(e) = fs::remove_file(&probe).await {
            warn!(error = %e, probe = %probe.display(), "Failed to remove write probe");
        }

        info!("Artifact directory ready");
        Ok(())
    }

    /// Allocate a name of the form `<prefix>-<unix millis>.<extension>`
    pub fn allocate_name(&self, prefix: &str, extension: &str) -> String {
        let millis = self.next_millis();
        let prefix = sanitize_name_component(prefix);
        let extension = sanitize_extension(extension);

        if extension.is_empty() {
            format!("{}-{}", prefix, millis)
        } else {
            format!("{}-{}.{}", prefix, millis, extension)
        }
    }

    /// Externally reachable path for a stored file
    pub fn to_public_url(&self, file_name: &str) -> String {
        format!("{}/{}", self.public_prefix, file_name)
    }

    /// Location of a stored file on disk
    pub fn path_for(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist bytes under a freshly allocated name
    #[instrument(skip(self, bytes), fields(size_bytes = bytes.len()))]
    pub async fn store(
        &self,
        prefix: &str,
        extension: &str,
        bytes: &[u8],
    ) -> Result<StoredArtifact, StorageError> {
        let mut attempt = 0;

        loop {
            attempt += 1;
            let file_name = self.allocate_name(prefix, extension);
            let path = self.path_for(&file_name);

            match self.write_new(&path, bytes).await {
                Ok(()) => {
                    debug!(path = %path.display(), "Artifact written");
                    return Ok(StoredArtifact {
                        public_url: self.to_public_url(&file_name),
                        file_name,
                        path,
                    });
                }
                // Another process sharing the directory took the name
                Err(e) if e.kind() == ErrorKind::AlreadyExists && attempt < MAX_CREATE_ATTEMPTS => {
                    warn!(path = %path.display(), attempt, "Artifact name taken, reallocating");
                }
                Err(source) => return Err(StorageError::Write { path, source }),
            }
        }
    }

    /// Read a stored artifact back
    pub async fn read(&self, path: &Path) -> Result<Vec<u8>, StorageError> {
        fs::read(path).await.map_err(|source| StorageError::Read {
            path: path.to_path_buf(),
            source,
        })
    }

    async fn write_new(&self, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await?;
        file.write_all(bytes).await?;
        file.flush().await
    }

    fn next_millis(&self) -> u64 {
        let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default();
        let mut previous = self.last_millis.load(Ordering::Relaxed);

        loop {
            let next = now.max(previous + 1);
            match self.last_millis.compare_exchange_weak(
                previous,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(actual) => previous = actual,
            }
        }
    }
}

/// Sanitize a name component to prevent path traversal
fn sanitize_name_component(component: &str) -> String {
    component
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}

/// Lowercase alphanumeric extension without the leading dot
fn sanitize_extension(extension: &str) -> String {
    extension
        .trim_start_matches('.')
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn is_timestamped(name: &str, prefix: &str, extension: &str) -> bool {
        let Some(rest) = name.strip_prefix(&format!("{}-", prefix)) else {
            return false;
        };
        let Some(digits) = rest.strip_suffix(&format!(".{}", extension)) else {
            return false;
        };
        !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
    }

    #[test]
    fn test_allocate_name_format() {
        let store = ArtifactStore::new("/tmp/unused", "/uploads");
        let name = store.allocate_name("story", "mp3");
        assert!(is_timestamped(&name, "story", "mp3"), "unexpected name {name}");
    }

    #[test]
    fn test_allocate_name_never_repeats() {
        let store = ArtifactStore::new("/tmp/unused", "/uploads");
        let names: HashSet<_> = (0..1000).map(|_| store.allocate_name("story", "mp3")).collect();
        assert_eq!(names.len(), 1000);
    }

    #[test]
    fn test_allocate_name_sanitizes() {
        let store = ArtifactStore::new("/tmp/unused", "/uploads");
        let name = store.allocate_name("../image", ".PNG");
        assert!(is_timestamped(&name, "___image", "png"), "unexpected name {name}");

        let bare = store.allocate_name("image", "");
        assert!(!bare.contains('.'));
    }

    #[test]
    fn test_to_public_url() {
        let store = ArtifactStore::new("/tmp/unused", "/uploads/");
        assert_eq!(store.to_public_url("story-1.mp3"), "/uploads/story-1.mp3");
    }

    #[tokio::test]
    async fn test_ensure_ready_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("nested/uploads"), "/uploads");

        store.ensure_ready().await.unwrap();
        store.ensure_ready().await.unwrap();

        assert!(store.root().is_dir());
        assert_eq!(std::fs::read_dir(store.root()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_ensure_ready_fails_on_file_path() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();

        let store = ArtifactStore::new(blocker.join("uploads"), "/uploads");
        let err = store.ensure_ready().await.unwrap_err();
        assert!(matches!(err, StorageError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn test_store_writes_unique_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path(), "/uploads");

        let first = store.store("story", "mp3", b"one").await.unwrap();
        let second = store.store("story", "mp3", b"two").await.unwrap();

        assert_ne!(first.file_name, second.file_name);
        assert_eq!(std::fs::read(&first.path).unwrap(), b"one");
        assert_eq!(std::fs::read(&second.path).unwrap(), b"two");
        assert_eq!(first.public_url, format!("/uploads/{}", first.file_name));
    }
}
