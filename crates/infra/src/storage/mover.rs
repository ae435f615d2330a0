//! Moves media files between lifecycle folders.
//!
//! Layout: `{base}/{model_slug}/{lifecycle}/{file}` with lifecycle folders
//! `media-temp`, `media/approved`, `media/rejected`, `media/quarantine`,
//! `media/originals` (pre-rejection backups) and `media/thumbs` (approved
//! thumbnails).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};

use folio_core::{MediaId, ModelSlug};
use folio_moderation::ModerationStatus;

/// One move request: a media file plus its optional thumbnail.
#[derive(Debug, Clone)]
pub struct MoveRequest {
    pub model_slug: ModelSlug,
    pub media_id: MediaId,
    pub file_name: String,
    pub thumb_name: Option<String>,
    pub target_status: ModerationStatus,
}

/// What actually happened during a move.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MoveOutcome {
    pub files_moved: u32,
    pub backed_up: bool,
    /// Non-fatal problems (e.g. the thumbnail could not be moved).
    pub partial_errors: Vec<String>,
}

/// File move failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MoveError {
    /// The main file does not exist in any lifecycle folder. Retrying will
    /// not make it appear.
    #[error("source file missing: {0}")]
    SourceMissing(String),
    #[error("io error: {0}")]
    Io(String),
}

impl MoveError {
    pub fn is_transient(&self) -> bool {
        matches!(self, MoveError::Io(_))
    }
}

/// Moves a media file and its thumbnail between lifecycle folders.
#[async_trait]
pub trait FileMover: Send + Sync {
    async fn move_media(&self, request: &MoveRequest) -> Result<MoveOutcome, MoveError>;
}

/// Filesystem implementation of [`FileMover`].
#[derive(Debug, Clone)]
pub struct FsFileMover {
    base: PathBuf,
}

/// Folders probed for the current location of a file, in order. The upload
/// staging area first, then places a file may sit after an earlier outcome.
const SOURCE_FOLDERS: &[&str] = &[
    "media-temp",
    "media/quarantine",
    "media/approved",
    "media/rejected",
];

impl FsFileMover {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn folder(&self, slug: &ModelSlug, lifecycle: &str) -> PathBuf {
        self.base.join(slug.as_str()).join(lifecycle)
    }

    async fn locate(
        &self,
        slug: &ModelSlug,
        file_name: &str,
        target_folder: &str,
    ) -> Option<PathBuf> {
        for folder in SOURCE_FOLDERS {
            if *folder == target_folder {
                continue;
            }
            let candidate = self.folder(slug, folder).join(file_name);
            if tokio::fs::metadata(&candidate).await.is_ok() {
                return Some(candidate);
            }
        }
        None
    }

    async fn move_file(&self, from: &Path, to: &Path) -> Result<(), MoveError> {
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| MoveError::Io(format!("create {}: {e}", parent.display())))?;
        }
        tokio::fs::rename(from, to)
            .await
            .map_err(|e| MoveError::Io(format!("move {} -> {}: {e}", from.display(), to.display())))
    }
}

#[async_trait]
impl FileMover for FsFileMover {
    async fn move_media(&self, request: &MoveRequest) -> Result<MoveOutcome, MoveError> {
        let target_folder = request.target_status.lifecycle_folder();
        let slug = &request.model_slug;
        let mut outcome = MoveOutcome::default();

        // Main file must exist somewhere; a vanished upload is a hard
        // failure, not something to retry.
        let source = self
            .locate(slug, &request.file_name, target_folder)
            .await
            .ok_or_else(|| MoveError::SourceMissing(request.file_name.clone()))?;

        // Keep the original around before a rejection removes it from view.
        if request.target_status == ModerationStatus::Rejected {
            let backup = self.folder(slug, "media/originals").join(&request.file_name);
            if let Some(parent) = backup.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| MoveError::Io(format!("create {}: {e}", parent.display())))?;
            }
            tokio::fs::copy(&source, &backup)
                .await
                .map_err(|e| MoveError::Io(format!("backup {}: {e}", source.display())))?;
            outcome.backed_up = true;
        }

        let target = self.folder(slug, target_folder).join(&request.file_name);
        self.move_file(&source, &target).await?;
        outcome.files_moved += 1;
        debug!(media_id = %request.media_id, target = %target.display(), "moved media file");

        // Thumbnail moves independently; failure only reduces the count.
        if let Some(thumb_name) = &request.thumb_name {
            let thumb_target_folder = if request.target_status == ModerationStatus::Approved {
                "media/thumbs"
            } else {
                target_folder
            };
            match self.locate(slug, thumb_name, thumb_target_folder).await {
                Some(thumb_source) => {
                    let thumb_target = self.folder(slug, thumb_target_folder).join(thumb_name);
                    match self.move_file(&thumb_source, &thumb_target).await {
                        Ok(()) => outcome.files_moved += 1,
                        Err(e) => {
                            warn!(media_id = %request.media_id, error = %e, "thumbnail move failed");
                            outcome.partial_errors.push(format!("thumbnail: {e}"));
                        }
                    }
                }
                None => {
                    warn!(media_id = %request.media_id, thumb = %thumb_name, "thumbnail not found");
                    outcome
                        .partial_errors
                        .push(format!("thumbnail not found: {thumb_name}"));
                }
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slug() -> ModelSlug {
        ModelSlug::new("ava").unwrap()
    }

    async fn stage(base: &Path, lifecycle: &str, name: &str) -> PathBuf {
        let dir = base.join("ava").join(lifecycle);
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join(name);
        tokio::fs::write(&path, b"jpeg bytes").await.unwrap();
        path
    }

    fn request(file: &str, thumb: Option<&str>, target: ModerationStatus) -> MoveRequest {
        MoveRequest {
            model_slug: slug(),
            media_id: MediaId::new(),
            file_name: file.to_string(),
            thumb_name: thumb.map(str::to_string),
            target_status: target,
        }
    }

    #[tokio::test]
    async fn approves_move_main_and_thumb() {
        let tmp = tempfile::tempdir().unwrap();
        stage(tmp.path(), "media-temp", "p.jpg").await;
        stage(tmp.path(), "media-temp", "p_thumb.jpg").await;

        let mover = FsFileMover::new(tmp.path());
        let outcome = mover
            .move_media(&request("p.jpg", Some("p_thumb.jpg"), ModerationStatus::Approved))
            .await
            .unwrap();

        assert_eq!(outcome.files_moved, 2);
        assert!(!outcome.backed_up);
        assert!(outcome.partial_errors.is_empty());
        assert!(tmp.path().join("ava/media/approved/p.jpg").exists());
        assert!(tmp.path().join("ava/media/thumbs/p_thumb.jpg").exists());
        assert!(!tmp.path().join("ava/media-temp/p.jpg").exists());
    }

    #[tokio::test]
    async fn rejection_backs_up_the_original_first() {
        let tmp = tempfile::tempdir().unwrap();
        stage(tmp.path(), "media-temp", "p.jpg").await;

        let mover = FsFileMover::new(tmp.path());
        let outcome = mover
            .move_media(&request("p.jpg", None, ModerationStatus::Rejected))
            .await
            .unwrap();

        assert_eq!(outcome.files_moved, 1);
        assert!(outcome.backed_up);
        assert!(tmp.path().join("ava/media/rejected/p.jpg").exists());
        assert!(tmp.path().join("ava/media/originals/p.jpg").exists());
    }

    #[tokio::test]
    async fn missing_main_file_is_a_hard_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let mover = FsFileMover::new(tmp.path());

        let err = mover
            .move_media(&request("ghost.jpg", None, ModerationStatus::Approved))
            .await
            .unwrap_err();
        assert!(matches!(err, MoveError::SourceMissing(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn missing_thumbnail_is_tolerated() {
        let tmp = tempfile::tempdir().unwrap();
        stage(tmp.path(), "media-temp", "p.jpg").await;

        let mover = FsFileMover::new(tmp.path());
        let outcome = mover
            .move_media(&request("p.jpg", Some("ghost_thumb.jpg"), ModerationStatus::Approved))
            .await
            .unwrap();

        assert_eq!(outcome.files_moved, 1);
        assert_eq!(outcome.partial_errors.len(), 1);
        assert!(tmp.path().join("ava/media/approved/p.jpg").exists());
    }

    #[tokio::test]
    async fn flagged_media_is_quarantined() {
        let tmp = tempfile::tempdir().unwrap();
        stage(tmp.path(), "media-temp", "p.jpg").await;

        let mover = FsFileMover::new(tmp.path());
        let outcome = mover
            .move_media(&request("p.jpg", None, ModerationStatus::Flagged))
            .await
            .unwrap();

        assert_eq!(outcome.files_moved, 1);
        assert!(tmp.path().join("ava/media/quarantine/p.jpg").exists());
    }

    #[tokio::test]
    async fn finds_source_outside_the_staging_folder() {
        let tmp = tempfile::tempdir().unwrap();
        // File was quarantined earlier; review approved it.
        stage(tmp.path(), "media/quarantine", "p.jpg").await;

        let mover = FsFileMover::new(tmp.path());
        let outcome = mover
            .move_media(&request("p.jpg", None, ModerationStatus::Approved))
            .await
            .unwrap();

        assert_eq!(outcome.files_moved, 1);
        assert!(tmp.path().join("ava/media/approved/p.jpg").exists());
        assert!(!tmp.path().join("ava/media/quarantine/p.jpg").exists());
    }
}
