pub mod retention;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use tracing::{debug, warn};

use crate::core::error::StorageError;
use crate::core::sanitize::is_safe_file_name;
use crate::core::types::JobId;

// ---------------------------------------------------------------------------
// Publish store
// ---------------------------------------------------------------------------

/// Name of the per-request scratch area inside the store directory.
///
/// Starts with a dot so it can never collide with a published name.
pub const STAGING_DIR_NAME: &str = ".staging";

/// Content type for every served file.
pub const SERVE_CONTENT_TYPE: &str = "application/octet-stream";

/// A published file as seen by a directory listing.
#[derive(Debug, Clone)]
pub struct ArtifactInfo {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// The shared directory holding published media, keyed by sanitized file name.
///
/// There is no index: a name is published iff a regular file with that name
/// exists in the directory. Concurrent writers to the same name race and the
/// last rename wins.
#[derive(Debug, Clone)]
pub struct PublishStore {
    root: PathBuf,
    /// Staging directories owned by a live `StagingDir` guard in this process.
    active_staging: Arc<DashSet<PathBuf>>,
}

impl PublishStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            active_staging: Arc::new(DashSet::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn staging_root(&self) -> PathBuf {
        self.root.join(STAGING_DIR_NAME)
    }

    /// Create the store and staging directories if absent.
    pub async fn ensure_dir(&self) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(self.staging_root()).await?;
        Ok(())
    }

    /// Whether the store directory currently exists and is a directory.
    pub async fn is_available(&self) -> bool {
        tokio::fs::metadata(&self.root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Create a fresh staging directory for one download job.
    ///
    /// The returned guard removes the directory and anything left inside it
    /// when dropped.
    pub async fn create_staging_dir(&self, job_id: JobId) -> Result<StagingDir, StorageError> {
        let path = self.staging_root().join(job_id.simple());
        tokio::fs::create_dir_all(&path).await?;
        self.active_staging.insert(path.clone());
        Ok(StagingDir {
            path,
            active: Arc::clone(&self.active_staging),
            removed: false,
        })
    }

    /// Whether a staging directory still belongs to an in-flight job.
    pub fn is_staging_active(&self, path: &Path) -> bool {
        self.active_staging.contains(path)
    }

    /// Resolve a published name to its path, refusing anything outside the
    /// safe name space.
    pub fn path_for(&self, name: &str) -> Result<PathBuf, StorageError> {
        if !is_safe_file_name(name) {
            return Err(StorageError::InvalidName {
                name: name.to_string(),
            });
        }
        Ok(self.root.join(name))
    }

    /// Move a finished file into the store under `name`.
    ///
    /// `src` must live on the same filesystem (the staging area does), so the
    /// rename is atomic. An existing file with the same name is replaced.
    pub async fn publish(&self, src: &Path, name: &str) -> Result<ArtifactInfo, StorageError> {
        let dest = self.path_for(name)?;

        tokio::fs::rename(src, &dest)
            .await
            .map_err(|source| StorageError::PublishFailed {
                name: name.to_string(),
                source,
            })?;

        // The retention clock starts at publish time, whatever mtime the
        // extractor left on the file.
        if let Err(e) = touch(&dest).await {
            warn!(name, error = %e, "failed to reset mtime of published file");
        }

        let meta = tokio::fs::metadata(&dest).await?;
        debug!(name, size = meta.len(), "file published");
        Ok(ArtifactInfo {
            name: name.to_string(),
            path: dest,
            size: meta.len(),
            last_modified: modified_at(&meta),
        })
    }

    /// Look up a published regular file by name.
    ///
    /// Unsafe names, missing files, directories and symlinks all report
    /// `NotFound`.
    pub async fn stat(&self, name: &str) -> Result<ArtifactInfo, StorageError> {
        let not_found = || StorageError::NotFound {
            name: name.to_string(),
        };
        let path = self.path_for(name).map_err(|_| not_found())?;

        match tokio::fs::symlink_metadata(&path).await {
            Ok(meta) if meta.file_type().is_file() => Ok(ArtifactInfo {
                name: name.to_string(),
                path,
                size: meta.len(),
                last_modified: modified_at(&meta),
            }),
            Ok(_) => Err(not_found()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(not_found()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// Open a published file for streaming.
    pub async fn open(&self, name: &str) -> Result<(tokio::fs::File, ArtifactInfo), StorageError> {
        let info = self.stat(name).await?;
        match tokio::fs::File::open(&info.path).await {
            Ok(file) => Ok((file, info)),
            // Removed between stat and open (reaper race).
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound {
                name: name.to_string(),
            }),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// List every regular file directly inside the store directory.
    ///
    /// Subdirectories (including the staging area) and symlinks are skipped.
    /// Entries that vanish while listing are skipped too.
    pub async fn list(&self) -> Result<Vec<ArtifactInfo>, StorageError> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut artifacts = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let file_type = match entry.file_type().await {
                Ok(ft) => ft,
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "failed to stat store entry");
                    continue;
                }
            };
            if !file_type.is_file() {
                continue;
            }
            let meta = match entry.metadata().await {
                Ok(m) => m,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "failed to read store entry metadata");
                    continue;
                }
            };
            artifacts.push(ArtifactInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: entry.path(),
                size: meta.len(),
                last_modified: modified_at(&meta),
            });
        }

        artifacts.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(artifacts)
    }

    /// List the per-job staging directories with their mtimes.
    pub async fn list_staging(&self) -> Result<Vec<(PathBuf, DateTime<Utc>)>, StorageError> {
        let mut entries = match tokio::fs::read_dir(self.staging_root()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::Io(e)),
        };

        let mut dirs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Ok(meta) = entry.metadata().await {
                if meta.is_dir() {
                    dirs.push((entry.path(), modified_at(&meta)));
                }
            }
        }
        Ok(dirs)
    }

    /// Delete a listed artifact.
    pub async fn delete(&self, artifact: &ArtifactInfo) -> Result<(), StorageError> {
        match tokio::fs::remove_file(&artifact.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound {
                name: artifact.name.clone(),
            }),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}

/// Filesystem mtime as UTC. Platforms without mtime report the epoch, which
/// makes such files immediately eligible for retention.
fn modified_at(meta: &std::fs::Metadata) -> DateTime<Utc> {
    meta.modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| DateTime::<Utc>::from(std::time::UNIX_EPOCH))
}

/// Set a file's mtime to now.
async fn touch(path: &Path) -> std::io::Result<()> {
    let file = tokio::fs::OpenOptions::new().write(true).open(path).await?;
    let file = file.into_std().await;
    tokio::task::spawn_blocking(move || file.set_modified(std::time::SystemTime::now()))
        .await
        .map_err(std::io::Error::other)?
}

// ---------------------------------------------------------------------------
// Staging directory guard
// ---------------------------------------------------------------------------

/// RAII guard for one job's staging directory.
///
/// Whatever the extractor left behind (partial downloads, pre-transcode
/// sources, thumbnails) must go once the job ends. Completed jobs call
/// [`StagingDir::cleanup`]; a guard dropped without it (early return, timeout,
/// cancelled request) falls back to a blocking removal in `Drop`.
///
/// While the guard lives, the retention reaper leaves the directory alone
/// regardless of its age.
#[derive(Debug)]
pub struct StagingDir {
    path: PathBuf,
    active: Arc<DashSet<PathBuf>>,
    removed: bool,
}

impl StagingDir {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the directory and its contents without blocking the runtime.
    pub async fn cleanup(mut self) {
        if let Err(e) = tokio::fs::remove_dir_all(&self.path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to clean up staging directory");
            }
        }
        self.removed = true;
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if !self.removed {
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %self.path.display(), error = %e, "failed to clean up staging directory");
                }
            }
        }
        self.active.remove(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> (tempfile::TempDir, PublishStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = PublishStore::new(dir.path().join("downloads"));
        store.ensure_dir().await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_ensure_dir_creates_root_and_staging() {
        let (_dir, store) = store().await;
        assert!(store.root().is_dir());
        assert!(store.staging_root().is_dir());
        assert!(store.is_available().await);
    }

    #[tokio::test]
    async fn test_publish_then_stat() {
        let (_dir, store) = store().await;
        let staging = store.create_staging_dir(JobId::new()).await.unwrap();
        let src = staging.path().join("My Title.mp3");
        tokio::fs::write(&src, b"ID3-audio").await.unwrap();

        let info = store.publish(&src, "My-Title.mp3").await.unwrap();
        assert_eq!(info.name, "My-Title.mp3");
        assert_eq!(info.size, 9);
        assert!(!src.exists());

        let stat = store.stat("My-Title.mp3").await.unwrap();
        assert_eq!(stat.size, 9);
    }

    #[tokio::test]
    async fn test_publish_overwrites_existing() {
        let (_dir, store) = store().await;
        tokio::fs::write(store.root().join("song.mp3"), b"old").await.unwrap();

        let staging = store.create_staging_dir(JobId::new()).await.unwrap();
        let src = staging.path().join("song.mp3");
        tokio::fs::write(&src, b"newer bytes").await.unwrap();
        store.publish(&src, "song.mp3").await.unwrap();

        let contents = tokio::fs::read(store.root().join("song.mp3")).await.unwrap();
        assert_eq!(contents, b"newer bytes");
    }

    #[tokio::test]
    async fn test_publish_resets_mtime() {
        let (_dir, store) = store().await;
        let staging = store.create_staging_dir(JobId::new()).await.unwrap();
        let src = staging.path().join("old-upload.mp4");
        std::fs::write(&src, b"video").unwrap();
        let day_ago = std::time::SystemTime::now() - std::time::Duration::from_secs(86_400);
        std::fs::File::options()
            .write(true)
            .open(&src)
            .unwrap()
            .set_modified(day_ago)
            .unwrap();

        let info = store.publish(&src, "old-upload.mp4").await.unwrap();
        let age = Utc::now().signed_duration_since(info.last_modified);
        assert!(age < chrono::Duration::minutes(5));
    }

    #[tokio::test]
    async fn test_publish_rejects_unsafe_name() {
        let (_dir, store) = store().await;
        let src = store.root().join("src.bin");
        tokio::fs::write(&src, b"x").await.unwrap();
        let err = store.publish(&src, "../escape.bin").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidName { .. }));
        assert!(src.exists());
    }

    #[tokio::test]
    async fn test_stat_not_found_cases() {
        let (dir, store) = store().await;
        tokio::fs::write(dir.path().join("secret"), b"top secret").await.unwrap();

        for name in ["missing.mp3", "../secret", "..", ".staging", "", "a/b"] {
            let err = store.stat(name).await.unwrap_err();
            assert!(matches!(err, StorageError::NotFound { .. }), "name {name:?}");
        }
    }

    #[tokio::test]
    async fn test_list_skips_directories() {
        let (_dir, store) = store().await;
        tokio::fs::write(store.root().join("b.mp3"), b"b").await.unwrap();
        tokio::fs::write(store.root().join("a.mp4"), b"aa").await.unwrap();
        tokio::fs::create_dir(store.root().join("nested")).await.unwrap();
        let _staging = store.create_staging_dir(JobId::new()).await.unwrap();

        let names: Vec<String> = store.list().await.unwrap().into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["a.mp4".to_string(), "b.mp3".to_string()]);
    }

    #[tokio::test]
    async fn test_staging_dir_removed_on_drop() {
        let (_dir, store) = store().await;
        let staging = store.create_staging_dir(JobId::new()).await.unwrap();
        let path = staging.path().to_path_buf();
        tokio::fs::write(path.join("partial.webm.part"), b"half").await.unwrap();
        assert_eq!(store.list_staging().await.unwrap().len(), 1);

        drop(staging);

        assert!(!path.exists());
        assert!(store.list_staging().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_staging_cleanup_removes_directory_and_releases_it() {
        let (_dir, store) = store().await;
        let staging = store.create_staging_dir(JobId::new()).await.unwrap();
        let path = staging.path().to_path_buf();
        tokio::fs::write(path.join("leftover.webm"), b"source").await.unwrap();
        assert!(store.is_staging_active(&path));

        staging.cleanup().await;

        assert!(!path.exists());
        assert!(!store.is_staging_active(&path));
        assert!(store.staging_root().is_dir());
    }

    #[tokio::test]
    async fn test_staging_dir_is_active_until_dropped() {
        let (_dir, store) = store().await;
        let staging = store.create_staging_dir(JobId::new()).await.unwrap();
        let path = staging.path().to_path_buf();
        assert!(store.clone().is_staging_active(&path));

        drop(staging);
        assert!(!store.is_staging_active(&path));
    }

    #[tokio::test]
    async fn test_delete_missing_reports_not_found() {
        let (_dir, store) = store().await;
        tokio::fs::write(store.root().join("gone.mp3"), b"x").await.unwrap();
        let listed = store.list().await.unwrap();
        store.delete(&listed[0]).await.unwrap();
        let err = store.delete(&listed[0]).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }
}
