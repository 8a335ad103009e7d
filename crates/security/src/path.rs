//! Path confinement: every sandbox path must resolve under the workspace root.
//!
//! Paths are normalized lexically first (`.` and `..` folded without touching
//! disk, so not-yet-created files resolve too). The nearest existing
//! ancestor is then canonicalized, which catches symlinks that point outside
//! the root even when the final component does not exist yet.

use std::path::{Component, Path, PathBuf};

/// Error returned when path resolution fails.
#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("Path '{path}' resolves outside the workspace root")]
    OutsideWorkspace { path: String },

    #[error("No workspace root configured")]
    NoWorkspace,
}

/// Fold `.` and `..` components without consulting the filesystem.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(name) => out.push(name),
        }
    }
    out
}

/// Resolve `raw` (relative to `root`, or absolute) and require it to stay
/// under `root`. An empty `raw` is the root itself.
pub fn resolve_under_workspace(root: &Path, raw: &str) -> Result<PathBuf, PathError> {
    if root.as_os_str().is_empty() {
        return Err(PathError::NoWorkspace);
    }
    let base = normalize_lexically(root);
    let cleaned = raw.trim().replace('\\', "/");
    let candidate = if cleaned.is_empty() {
        base.clone()
    } else {
        let p = Path::new(&cleaned);
        if p.is_absolute() { p.to_path_buf() } else { base.join(p) }
    };
    let normalized = normalize_lexically(&candidate);
    if !normalized.starts_with(&base) {
        return Err(PathError::OutsideWorkspace { path: raw.into() });
    }

    // Symlinks can escape even when the lexical path looks fine.
    let real_root = base.canonicalize().unwrap_or_else(|_| base.clone());
    match canonicalize_existing_prefix(&normalized) {
        Some(real) if real.starts_with(&real_root) => Ok(normalized),
        _ => Err(PathError::OutsideWorkspace { path: raw.into() }),
    }
}

/// Canonicalize the nearest ancestor that exists on disk and re-append the
/// components that do not exist yet. `None` when that ancestor cannot be
/// resolved (a dangling symlink, for instance).
fn canonicalize_existing_prefix(path: &Path) -> Option<PathBuf> {
    let mut existing = path;
    let mut missing = Vec::new();
    // symlink_metadata so a dangling link counts as existing
    while existing.symlink_metadata().is_err() {
        missing.push(existing.file_name()?);
        existing = existing.parent()?;
    }
    let mut real = existing.canonicalize().ok()?;
    for name in missing.iter().rev() {
        real.push(name);
    }
    Some(real)
}

/// `abs` relative to `root`, with forward slashes. Empty for the root itself.
pub fn relative_unix(root: &Path, abs: &Path) -> Option<String> {
    let rel = abs.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

/// Canonical form of a workspace-relative path used as a store key:
/// forward slashes, no leading `./`, no trailing `/`.
pub fn normalize_rel_path(path: &str) -> String {
    let mut p = path.trim().replace('\\', "/");
    while let Some(rest) = p.strip_prefix("./") {
        p = rest.to_string();
    }
    while p.len() > 1 && p.ends_with('/') {
        p.pop();
    }
    p
}
