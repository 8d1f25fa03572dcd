//! Repository file discovery: extension-based language detection and
//! gitignore-aware directory walking (§4.1).

use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use sha2::{Digest, Sha256};

use crate::language::{self, Language};

const IGNORED_DIRS: &[&str] = &[".git", "node_modules", "dist", "build", "__pycache__", ".xtrc", ".ainav"];
const IGNORED_FILES: &[&str] = &[".DS_Store"];

/// Language for a file path, from its extension. `None` for unsupported files.
pub fn detect_language(path: &Path) -> Option<Language> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    language::from_extension(&ext)
}

/// sha256 hex digest of UTF-8 text, used as both the file content hash and
/// the seed for deterministic chunk ids.
pub fn sha256_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Walks `repo_path`, honoring `.gitignore`/`.git/info/exclude`/global
/// excludes via `ignore::WalkBuilder`, and returns every file whose
/// extension maps to a supported language. Paths are absolute; callers
/// relativize against `repo_path` for storage (§9, POSIX-relative paths).
pub fn walk_source_files(repo_path: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut builder = WalkBuilder::new(repo_path);
    builder
        .git_ignore(true)
        .git_global(true)
        .git_exclude(true)
        .hidden(true)
        .follow_links(false)
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            if entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false) {
                !IGNORED_DIRS.contains(&name.as_ref())
            } else {
                !IGNORED_FILES.contains(&name.as_ref())
            }
        });

    let mut files = Vec::new();
    for entry in builder.build() {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                tracing::debug!(error = %err, "skipping unreadable directory entry during walk");
                continue;
            }
        };
        if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            continue;
        }
        if detect_language(entry.path()).is_some() {
            files.push(entry.path().to_path_buf());
        }
    }
    Ok(files)
}

/// Relative, forward-slash path of `path` under `repo_path`, per the
/// POSIX-relative-path invariant (§9).
pub fn relative_posix_path(repo_path: &Path, path: &Path) -> String {
    path.strip_prefix(repo_path)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_supported_extensions() {
        assert!(detect_language(Path::new("src/app.py")).is_some());
        assert!(detect_language(Path::new("src/app.tsx")).is_some());
        assert!(detect_language(Path::new("README.md")).is_none());
    }

    #[test]
    fn sha256_is_deterministic() {
        assert_eq!(sha256_text("hello"), sha256_text("hello"));
        assert_ne!(sha256_text("hello"), sha256_text("world"));
    }

    #[test]
    fn relative_posix_path_strips_prefix_and_normalizes_separators() {
        let root = Path::new("/repo");
        let path = Path::new("/repo/src/app.py");
        assert_eq!(relative_posix_path(root, path), "src/app.py");
    }

    #[test]
    fn walk_skips_ignored_dirs_and_unsupported_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules")).unwrap();
        std::fs::write(dir.path().join("node_modules/x.py"), "x=1").unwrap();
        std::fs::write(dir.path().join("main.py"), "x=1").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hi").unwrap();

        let files = walk_source_files(dir.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("main.py"));
    }
}
