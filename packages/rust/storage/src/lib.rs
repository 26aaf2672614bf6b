//! Filesystem storage for Pencraft documents.
//!
//! [`FsStorage`] implements the [`Storage`] port: reads map a missing file to
//! `NotFound`, writes go to a sibling temp file and are renamed into place.
//! [`discover_documents`] finds the files an enhancement batch works on.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use glob::Pattern;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use pencraft_shared::{PencraftError, Result, Storage};

/// Extension appended to a document's file name for its pre-enhancement copy.
pub const BACKUP_EXTENSION: &str = "bak";

// ---------------------------------------------------------------------------
// FsStorage
// ---------------------------------------------------------------------------

/// Local filesystem implementation of the storage port.
#[derive(Debug, Clone, Default)]
pub struct FsStorage;

impl FsStorage {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Storage for FsStorage {
    async fn read(&self, path: &Path) -> Result<String> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(PencraftError::NotFound {
                path: path.to_path_buf(),
            }),
            Err(e) => Err(PencraftError::io(path, e)),
        }
    }

    #[instrument(skip_all, fields(path = %path.display(), bytes = content.len()))]
    async fn write(&self, path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PencraftError::io(parent, e))?;
        }

        let temp = temp_path(path)?;
        tokio::fs::write(&temp, content)
            .await
            .map_err(|e| PencraftError::io(&temp, e))?;

        if let Err(e) = tokio::fs::rename(&temp, path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(PencraftError::io(path, e));
        }

        debug!("wrote document");
        Ok(())
    }
}

/// `dir/.name.tmp` next to the target.
fn temp_path(path: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| PencraftError::validation(format!("not a file path: {}", path.display())))?;
    Ok(path.with_file_name(format!(".{}.tmp", name.to_string_lossy())))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// `post.md` → `post.md.bak`
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(BACKUP_EXTENSION);
    PathBuf::from(name)
}

/// Hex SHA-256 of a document's content.
pub fn content_digest(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Find documents under `dir` whose file name matches `pattern`.
///
/// `recursive = false` only looks at the top level. Backup copies and hidden
/// temp files are never returned. The result is sorted for stable batch order.
#[instrument(skip(dir), fields(dir = %dir.display()))]
pub fn discover_documents(dir: &Path, pattern: &str, recursive: bool) -> Result<Vec<PathBuf>> {
    let pattern = Pattern::new(pattern)
        .map_err(|e| PencraftError::validation(format!("invalid glob pattern '{pattern}': {e}")))?;

    if !dir.is_dir() {
        return Err(PencraftError::NotFound {
            path: dir.to_path_buf(),
        });
    }

    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut found = Vec::new();

    for entry in WalkDir::new(dir).min_depth(1).max_depth(max_depth) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let is_backup = path.extension().is_some_and(|ext| ext == BACKUP_EXTENSION);
        if is_backup || name.starts_with('.') {
            continue;
        }
        if pattern.matches(name) {
            found.push(path.to_path_buf());
        }
    }

    found.sort();
    info!(count = found.len(), "discovered documents");
    Ok(found)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("pencraft_storage_{}", Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn write_then_read() {
        let dir = temp_dir();
        let path = dir.join("nested/post.md");
        let storage = FsStorage::new();

        storage.write(&path, "hello").await.unwrap();
        assert_eq!(storage.read(&path).await.unwrap(), "hello");
        assert!(path.exists());
        assert!(!dir.join("nested/.post.md.tmp").exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn write_overwrites_existing() {
        let dir = temp_dir();
        let path = dir.join("post.md");
        let storage = FsStorage::new();

        storage.write(&path, "v1").await.unwrap();
        storage.write(&path, "v2").await.unwrap();
        assert_eq!(storage.read(&path).await.unwrap(), "v2");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let storage = FsStorage::new();
        let path = std::env::temp_dir().join(format!("missing_{}.md", Uuid::now_v7()));
        let err = storage.read(&path).await.unwrap_err();
        assert!(matches!(err, PencraftError::NotFound { .. }));
    }

    #[test]
    fn backup_path_appends_extension() {
        assert_eq!(
            backup_path(Path::new("/blog/post.md")),
            PathBuf::from("/blog/post.md.bak")
        );
    }

    #[test]
    fn digest_is_stable() {
        assert_eq!(content_digest("abc"), content_digest("abc"));
        assert_ne!(content_digest("abc"), content_digest("abd"));
        assert_eq!(content_digest("").len(), 64);
    }

    #[test]
    fn discovery_respects_pattern_depth_and_backups() {
        let dir = temp_dir();
        std::fs::create_dir_all(dir.join("sub")).unwrap();
        for name in ["b.md", "a.md", "a.md.bak", "notes.txt", ".hidden.md", "sub/c.md"] {
            std::fs::write(dir.join(name), "x").unwrap();
        }

        let top = discover_documents(&dir, "*.md", false).unwrap();
        assert_eq!(top, vec![dir.join("a.md"), dir.join("b.md")]);

        let all = discover_documents(&dir, "*.md", true).unwrap();
        assert_eq!(all, vec![dir.join("a.md"), dir.join("b.md"), dir.join("sub/c.md")]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn discovery_rejects_bad_pattern_and_missing_dir() {
        let dir = temp_dir();
        assert!(matches!(
            discover_documents(&dir, "[", false),
            Err(PencraftError::Validation { .. })
        ));
        assert!(matches!(
            discover_documents(&dir.join("nope"), "*.md", false),
            Err(PencraftError::NotFound { .. })
        ));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
