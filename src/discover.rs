//! Source file discovery
//!
//! Walks a cloned workspace, skips dependency/build/VCS directories at any
//! depth, and keeps files whose extension maps to a supported language.

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Extension -> language tag. Anything not listed is ignored.
const SUPPORTED_EXTENSIONS: &[(&str, &str)] = &[
    ("py", "python"),
    ("js", "javascript"),
    ("jsx", "javascript"),
    ("ts", "typescript"),
    ("tsx", "typescript"),
    ("java", "java"),
    ("go", "go"),
    ("rs", "rust"),
    ("cpp", "cpp"),
    ("c", "c"),
    ("rb", "ruby"),
    ("php", "php"),
];

/// Directory names never descended into
const SKIP_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    "__pycache__",
    "venv",
    "env",
    ".venv",
    "dist",
    "build",
    "target",
    ".idea",
    ".vscode",
    "coverage",
    ".next",
    "out",
    ".cache",
    "vendor",
    "pkg",
];

/// One file selected for analysis
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    /// Path relative to the workspace root, `/`-separated
    pub relative_path: String,
    pub language: &'static str,
}

/// Language tag for a file path, by extension only
pub fn language_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    SUPPORTED_EXTENSIONS
        .iter()
        .find(|(candidate, _)| *candidate == ext)
        .map(|(_, language)| *language)
}

pub struct FileDiscoverer {
    max_files: usize,
}

impl FileDiscoverer {
    pub fn new(max_files: usize) -> Self {
        Self { max_files }
    }

    /// List analyzable files under `root` in a deterministic order.
    ///
    /// Never fails: unreadable entries are skipped. The result is cut to the
    /// configured maximum, keeping the first files in traversal order.
    pub fn discover(&self, root: &Path) -> Vec<DiscoveredFile> {
        let mut files = Vec::new();

        for entry in WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_skipped_dir(e))
        {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let Some(language) = language_for(path) else {
                continue;
            };

            let relative_path = path
                .strip_prefix(root)
                .unwrap_or(path)
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            files.push(DiscoveredFile {
                path: path.to_path_buf(),
                relative_path,
                language,
            });
        }

        if files.len() > self.max_files {
            tracing::warn!(
                "Repository has {} files, limiting to {}",
                files.len(),
                self.max_files
            );
            files.truncate(self.max_files);
        }

        files
    }
}

fn is_skipped_dir(entry: &walkdir::DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| SKIP_DIRS.contains(&name))
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn relative_paths(files: &[DiscoveredFile]) -> Vec<(&str, &str)> {
        files
            .iter()
            .map(|f| (f.relative_path.as_str(), f.language))
            .collect()
    }

    #[test]
    fn test_skips_dependencies_and_unknown_extensions() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "src/app.py", "print('hi')\n");
        write(dir.path(), "node_modules/lib.js", "module.exports = 1;\n");
        write(dir.path(), "README.md", "# readme\n");

        let files = FileDiscoverer::new(100).discover(dir.path());
        assert_eq!(relative_paths(&files), vec![("src/app.py", "python")]);
    }

    #[test]
    fn test_skip_dirs_apply_at_any_depth() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "web/node_modules/pkg/index.js", "");
        write(dir.path(), "svc/target/debug/build.rs", "");
        write(dir.path(), "svc/src/main.rs", "fn main() {}\n");
        write(dir.path(), "lib/.venv/site.py", "");

        let files = FileDiscoverer::new(100).discover(dir.path());
        assert_eq!(relative_paths(&files), vec![("svc/src/main.rs", "rust")]);
    }

    #[test]
    fn test_skip_names_only_apply_to_directories() {
        let dir = TempDir::new().unwrap();
        // a file literally named like a skipped directory is still a file
        write(dir.path(), "tools/build.go", "package tools\n");

        let files = FileDiscoverer::new(100).discover(dir.path());
        assert_eq!(relative_paths(&files), vec![("tools/build.go", "go")]);
    }

    #[test]
    fn test_order_is_deterministic_and_truncated() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "c.ts", "");
        write(dir.path(), "a.js", "");
        write(dir.path(), "b/inner.tsx", "");
        write(dir.path(), "b.rb", "");

        let all = FileDiscoverer::new(100).discover(dir.path());
        assert_eq!(
            relative_paths(&all),
            vec![
                ("a.js", "javascript"),
                ("b/inner.tsx", "typescript"),
                ("b.rb", "ruby"),
                ("c.ts", "typescript"),
            ]
        );

        let capped = FileDiscoverer::new(2).discover(dir.path());
        assert_eq!(relative_paths(&capped), relative_paths(&all[..2]));
    }

    #[test]
    fn test_language_for_is_case_insensitive() {
        assert_eq!(language_for(Path::new("Main.JAVA")), Some("java"));
        assert_eq!(language_for(Path::new("lib.cpp")), Some("cpp"));
        assert_eq!(language_for(Path::new("header.h")), None);
        assert_eq!(language_for(Path::new("Makefile")), None);
    }

    #[test]
    fn test_missing_root_yields_nothing() {
        let dir = TempDir::new().unwrap();
        let files = FileDiscoverer::new(10).discover(&dir.path().join("missing"));
        assert!(files.is_empty());
    }
}
