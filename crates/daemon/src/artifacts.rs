//! Artifact helpers
//!
//! Naming and validation for uploaded and compressed files, plus deletion that
//! treats an already-missing file as success. Several cleanup paths (lifecycle
//! completion, explicit delete, sweep) may race on the same path.

use crate::error::JobError;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Remove a file, returning whether it existed.
///
/// A missing file is not an error.
pub fn remove_artifact(path: &Path) -> io::Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Best-effort removal used on cleanup paths; failures are logged, not returned.
pub fn discard_artifact(job_id: &str, path: &Path) {
    match remove_artifact(path) {
        Ok(true) => tracing::debug!(job_id, path = %path.display(), "Removed artifact"),
        Ok(false) => {}
        Err(e) => tracing::warn!(
            job_id,
            path = %path.display(),
            error = %e,
            "Failed to remove artifact"
        ),
    }
}

/// Lowercased extension of a client-supplied file name, without the dot
pub fn extension_of(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(|e| e.to_ascii_lowercase())
}

/// Check a client file name against the extension allow-list.
///
/// Returns the normalized extension on success.
pub fn validate_extension(file_name: &str, allowed: &[String]) -> Result<String, JobError> {
    let ext = extension_of(file_name)
        .ok_or_else(|| JobError::UnsupportedFileType(file_name.to_string()))?;
    if allowed.iter().any(|a| a.eq_ignore_ascii_case(&ext)) {
        Ok(ext)
    } else {
        Err(JobError::UnsupportedFileType(ext))
    }
}

/// Check the mime type the client sent, when it sent one
pub fn validate_content_type(
    content_type: Option<&str>,
    allowed: &[String],
) -> Result<(), JobError> {
    let Some(ct) = content_type else {
        return Ok(());
    };
    let ct = ct.to_ascii_lowercase();
    if ct.starts_with("video/")
        || ct == "application/octet-stream"
        || allowed.iter().any(|a| ct.contains(a.as_str()))
    {
        Ok(())
    } else {
        Err(JobError::UnsupportedFileType(ct))
    }
}

/// Unique on-disk name for a fresh upload: `video-<ms>-<rand>.<ext>`
pub fn upload_file_name(ext: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let suffix: u32 = rand::random::<u32>() % 1_000_000_000;
    format!("video-{}-{}.{}", millis, suffix, ext)
}

/// Output location for a job: `<outputs_dir>/compressed-<id>.<ext>`.
///
/// Falls back to `mp4` when the input has no usable extension.
pub fn output_path_for(outputs_dir: &Path, job_id: &str, input_path: &Path) -> PathBuf {
    let ext = input_path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("mp4");
    outputs_dir.join(format!("compressed-{}.{}", job_id, ext))
}

/// Suggested download name derived from the client's original name
pub fn download_file_name(original_name: &str) -> String {
    let base = Path::new(original_name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("video.mp4");
    let cleaned: String = base
        .chars()
        .map(|c| if c == '"' || c == '\\' || c.is_control() { '_' } else { c })
        .collect();
    format!("compressed-{}", cleaned)
}

/// Number of regular files directly inside `dir`; 0 if it cannot be read
pub fn count_files(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
                .count()
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn allowed() -> Vec<String> {
        ["mp4", "mov", "mkv"].iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_remove_artifact_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.mp4");
        std::fs::write(&path, b"data").unwrap();

        assert!(remove_artifact(&path).unwrap());
        assert!(!path.exists());
        assert!(!remove_artifact(&path).unwrap());
        assert!(!remove_artifact(&dir.path().join("never-existed.mp4")).unwrap());
    }

    #[test]
    fn test_validate_extension() {
        assert_eq!(validate_extension("Clip.MP4", &allowed()).unwrap(), "mp4");
        assert_eq!(validate_extension("a.b.mkv", &allowed()).unwrap(), "mkv");
        assert!(matches!(
            validate_extension("notes.txt", &allowed()),
            Err(JobError::UnsupportedFileType(ref e)) if e == "txt"
        ));
        assert!(validate_extension("noext", &allowed()).is_err());
    }

    #[test]
    fn test_validate_content_type() {
        assert!(validate_content_type(None, &allowed()).is_ok());
        assert!(validate_content_type(Some("video/mp4"), &allowed()).is_ok());
        assert!(validate_content_type(Some("application/octet-stream"), &allowed()).is_ok());
        assert!(validate_content_type(Some("image/png"), &allowed()).is_err());
    }

    #[test]
    fn test_upload_file_name_shape() {
        let name = upload_file_name("mov");
        assert!(name.starts_with("video-"));
        assert!(name.ends_with(".mov"));
        assert_ne!(upload_file_name("mov"), upload_file_name("mov"));
    }

    #[test]
    fn test_output_path_keeps_input_extension() {
        let out = output_path_for(Path::new("/out"), "abc", Path::new("/in/video-1-2.mkv"));
        assert_eq!(out, PathBuf::from("/out/compressed-abc.mkv"));
        let out = output_path_for(Path::new("/out"), "abc", Path::new("/in/noext"));
        assert_eq!(out, PathBuf::from("/out/compressed-abc.mp4"));
    }

    #[test]
    fn test_download_file_name() {
        assert_eq!(download_file_name("holiday.mp4"), "compressed-holiday.mp4");
        assert_eq!(download_file_name("../../etc/x.mp4"), "compressed-x.mp4");
        assert_eq!(download_file_name("we\"ird.mov"), "compressed-we_ird.mov");
    }

    #[test]
    fn test_count_files() {
        let dir = TempDir::new().unwrap();
        assert_eq!(count_files(dir.path()), 0);
        std::fs::write(dir.path().join("a"), b"").unwrap();
        std::fs::write(dir.path().join("b"), b"").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        assert_eq!(count_files(dir.path()), 2);
        assert_eq!(count_files(&dir.path().join("missing")), 0);
    }
}
