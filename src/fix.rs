//! Exact-text fix application
//!
//! Each fixable issue replaces the first verbatim occurrence of its original
//! snippet with the fixed snippet. No fuzzy matching: a snippet that is no
//! longer present is skipped and not counted.

use crate::models::Issue;
use std::path::{Component, Path, PathBuf};

/// Why a single fix was not applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixSkip {
    NoFix,
    UnsafePath,
    FileNotFound(PathBuf),
    SnippetNotFound,
    Io(String),
}

/// Resolve an issue path inside the workspace. Absolute paths, `..`
/// components and symlinks anywhere below the workspace are refused so a
/// response cannot write outside the clone.
fn resolve_in_workspace(workspace: &Path, rel_path: &str) -> Option<PathBuf> {
    let rel = Path::new(rel_path);
    let mut resolved = workspace.to_path_buf();
    for component in rel.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => continue,
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
        let is_link = std::fs::symlink_metadata(&resolved)
            .map(|meta| meta.file_type().is_symlink())
            .unwrap_or(false);
        if is_link {
            return None;
        }
    }
    (resolved != workspace).then_some(resolved)
}

/// Apply one issue's fix to the working tree
pub fn apply_fix(workspace: &Path, issue: &Issue) -> Result<(), FixSkip> {
    if !issue.has_applicable_fix() {
        return Err(FixSkip::NoFix);
    }
    let original = match issue.original_code.as_deref() {
        Some(code) if !code.is_empty() => code,
        _ => return Err(FixSkip::SnippetNotFound),
    };
    let fixed = issue.fixed_code.as_deref().unwrap_or_default();

    let path = resolve_in_workspace(workspace, &issue.file_path).ok_or(FixSkip::UnsafePath)?;
    if !path.is_file() {
        return Err(FixSkip::FileNotFound(path));
    }

    let content = std::fs::read_to_string(&path).map_err(|e| FixSkip::Io(e.to_string()))?;
    if !content.contains(original) {
        return Err(FixSkip::SnippetNotFound);
    }

    let updated = content.replacen(original, fixed, 1);
    std::fs::write(&path, updated).map_err(|e| FixSkip::Io(e.to_string()))?;
    Ok(())
}

/// Applies fixes for a batch of issues. Never fails as a whole.
#[derive(Debug, Default)]
pub struct FixApplier;

impl FixApplier {
    pub fn new() -> Self {
        Self
    }

    /// Returns the number of fixes written to disk
    pub fn apply(&self, workspace: &Path, issues: &[Issue]) -> u32 {
        let mut applied = 0;

        for issue in issues {
            match apply_fix(workspace, issue) {
                Ok(()) => {
                    applied += 1;
                    tracing::info!("Applied fix to {}", issue.file_path);
                }
                Err(FixSkip::NoFix) | Err(FixSkip::SnippetNotFound) => {}
                Err(FixSkip::UnsafePath) => {
                    tracing::warn!("Refusing fix outside workspace: {}", issue.file_path);
                }
                Err(FixSkip::FileNotFound(path)) => {
                    tracing::warn!("File not found: {}", path.display());
                }
                Err(FixSkip::Io(e)) => {
                    tracing::error!("Failed to apply fix to {}: {}", issue.file_path, e);
                }
            }
        }

        applied
    }
}
