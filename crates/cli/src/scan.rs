//! Input discovery for the CLI.
//!
//! Command-line arguments may be video files or directories; directories are
//! walked recursively, skipping hidden subdirectories and non-video files.

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Video file extensions accepted as inputs (case-insensitive matching).
pub const VIDEO_EXTENSIONS: &[&str] = &[
    ".mp4", ".mkv", ".avi", ".mov", ".m4v", ".webm", ".ts", ".m2ts",
];

/// Checks if a file has a video extension (case-insensitive).
pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext_lower = format!(".{}", ext.to_lowercase());
            VIDEO_EXTENSIONS.contains(&ext_lower.as_str())
        })
        .unwrap_or(false)
}

/// Expands the CLI input arguments into a sorted list of video files.
///
/// Plain files are kept when they carry a video extension; directories are
/// walked recursively with hidden subdirectories skipped. Non-video inputs
/// are dropped with a warning.
pub fn collect_video_files(inputs: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for input in inputs {
        if input.is_file() {
            if is_video_file(input) {
                files.push(input.clone());
            } else {
                tracing::warn!("skipping non-video input '{}'", input.display());
            }
            continue;
        }

        if input.is_dir() {
            let walker = WalkDir::new(input).into_iter().filter_entry(|entry| {
                if entry.file_type().is_dir() {
                    if let Some(name) = entry.file_name().to_str() {
                        // Allow the root directory even if it starts with '.'
                        if name.starts_with('.') && entry.depth() > 0 {
                            return false;
                        }
                    }
                }
                true
            });

            for entry in walker.filter_map(|e| e.ok()) {
                if entry.file_type().is_file() && is_video_file(entry.path()) {
                    files.push(entry.path().to_path_buf());
                }
            }
            continue;
        }

        tracing::warn!("input '{}' does not exist", input.display());
    }

    files.sort();
    files.dedup();
    files
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use tempfile::TempDir;

    #[test]
    fn test_is_video_file() {
        assert!(is_video_file(Path::new("/v/clip.mp4")));
        assert!(is_video_file(Path::new("/v/CLIP.MKV")));
        assert!(!is_video_file(Path::new("/v/notes.txt")));
        assert!(!is_video_file(Path::new("/v/no-extension")));
    }

    #[test]
    fn test_collect_mixes_files_and_directories() {
        let dir = TempDir::new().expect("tempdir");
        let nested = dir.path().join("season1");
        fs::create_dir(&nested).expect("mkdir");
        File::create(dir.path().join("a.mp4")).expect("create");
        File::create(nested.join("b.mkv")).expect("create");
        File::create(nested.join("notes.txt")).expect("create");

        let single = dir.path().join("a.mp4");
        let files = collect_video_files(&[single.clone(), dir.path().to_path_buf()]);

        assert_eq!(files.len(), 2);
        assert!(files.contains(&single));
        assert!(files.contains(&nested.join("b.mkv")));
    }

    #[test]
    fn test_hidden_directories_skipped() {
        let dir = TempDir::new().expect("tempdir");
        let hidden = dir.path().join(".cache");
        fs::create_dir(&hidden).expect("mkdir");
        File::create(hidden.join("c.mp4")).expect("create");
        File::create(dir.path().join("a.mp4")).expect("create");

        let files = collect_video_files(&[dir.path().to_path_buf()]);

        assert_eq!(files, vec![dir.path().join("a.mp4")]);
    }

    #[test]
    fn test_missing_input_yields_nothing() {
        let files = collect_video_files(&[PathBuf::from("/definitely/not/here")]);
        assert!(files.is_empty());
    }
}
