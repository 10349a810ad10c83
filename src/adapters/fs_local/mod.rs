// Local filesystem adapter - Temp output placement and in-place replacement

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{CompressError, CompressResult};

/// Filesystem operations around one compression job
#[derive(Debug, Clone)]
pub struct LocalFs {
    temp_prefix: String,
}

impl LocalFs {
    pub fn new(temp_prefix: impl Into<String>) -> Self {
        Self {
            temp_prefix: temp_prefix.into(),
        }
    }

    /// Check the source exists and is a regular file
    pub fn check_source(&self, source: &Path) -> CompressResult<u64> {
        match fs::metadata(source) {
            Ok(metadata) if metadata.is_file() => Ok(metadata.len()),
            Ok(_) => Err(CompressError::SourceUnreadable {
                path: source.display().to_string(),
                message: "not a regular file".to_string(),
            }),
            Err(_) => Err(CompressError::SourceNotFound {
                path: source.display().to_string(),
            }),
        }
    }

    /// Temp output path next to the source: `<prefix><file name>`
    pub fn temp_path_for(&self, source: &Path) -> CompressResult<PathBuf> {
        let name = source.file_name().ok_or_else(|| CompressError::Replace {
            message: format!("source path has no file name: {}", source.display()),
        })?;
        let mut temp_name = self.temp_prefix.clone();
        temp_name.push_str(&name.to_string_lossy());
        Ok(source.with_file_name(temp_name))
    }

    pub fn file_size(&self, path: &Path) -> CompressResult<u64> {
        Ok(fs::metadata(path)?.len())
    }

    /// Delete the original and move the finished output onto its path.
    /// Returns the size of the new file.
    pub fn replace_source(&self, source: &Path, compressed: &Path) -> CompressResult<u64> {
        let compressed_size = fs::metadata(compressed)
            .map_err(|e| CompressError::Replace {
                message: format!("compressed output missing at {}: {}", compressed.display(), e),
            })?
            .len();

        fs::remove_file(source).map_err(|e| CompressError::Replace {
            message: format!("failed to delete original {}: {}", source.display(), e),
        })?;
        fs::rename(compressed, source).map_err(|e| CompressError::Replace {
            message: format!(
                "failed to move {} to {}: {}",
                compressed.display(),
                source.display(),
                e
            ),
        })?;

        info!(path = %source.display(), compressed_size, "original replaced with compressed file");
        Ok(compressed_size)
    }

    /// Best-effort removal of a partially written output
    pub fn discard_partial(&self, path: &Path) {
        match fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "partial output removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove partial output"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_temp_path_sits_next_to_source() {
        let fs = LocalFs::new("temp_compressed_");
        let temp = fs.temp_path_for(Path::new("/videos/clip.mp4")).unwrap();
        assert_eq!(temp, PathBuf::from("/videos/temp_compressed_clip.mp4"));
    }

    #[test]
    fn test_check_source_reports_missing_file() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("absent.mp4");
        let err = LocalFs::new("t_").check_source(&missing).unwrap_err();
        assert!(matches!(err, CompressError::SourceNotFound { .. }));
        assert!(err.to_string().contains("absent.mp4"));
    }

    #[test]
    fn test_replace_source_moves_output_over_original() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("clip.mp4");
        let fs_adapter = LocalFs::new("temp_compressed_");
        let temp = fs_adapter.temp_path_for(&source).unwrap();
        fs::write(&source, vec![0u8; 100]).unwrap();
        fs::write(&temp, vec![1u8; 40]).unwrap();

        let size = fs_adapter.replace_source(&source, &temp).unwrap();

        assert_eq!(size, 40);
        assert!(!temp.exists());
        assert_eq!(fs::read(&source).unwrap(), vec![1u8; 40]);
    }

    #[test]
    fn test_replace_without_output_keeps_original() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("clip.mp4");
        fs::write(&source, b"original").unwrap();
        let fs_adapter = LocalFs::new("temp_compressed_");
        let temp = fs_adapter.temp_path_for(&source).unwrap();

        let err = fs_adapter.replace_source(&source, &temp).unwrap_err();

        assert!(matches!(err, CompressError::Replace { .. }));
        assert_eq!(fs::read(&source).unwrap(), b"original");
    }

    #[test]
    fn test_discard_partial_tolerates_missing_file() {
        let dir = TempDir::new().unwrap();
        let partial = dir.path().join("temp_compressed_clip.mp4");
        fs::write(&partial, b"half").unwrap();
        let fs_adapter = LocalFs::new("temp_compressed_");

        fs_adapter.discard_partial(&partial);
        fs_adapter.discard_partial(&partial);

        assert!(!partial.exists());
    }
}
