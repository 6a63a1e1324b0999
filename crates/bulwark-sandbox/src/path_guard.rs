//! PathGuard
//!
//! Ogni percorso fornito dall'agente passa di qui prima di toccare il disco.
//! Il controllo avviene sul percorso reale: i symlink vengono espansi (anche
//! quelli pendenti), quindi un link creato dentro la sandbox che punta fuori
//! viene rifiutato.

use bulwark_core::error::SandboxError;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Symlink hops followed before giving up
const MAX_LINK_HOPS: usize = 40;

#[derive(Debug, Clone)]
pub struct PathGuard {
    root: PathBuf,
}

impl PathGuard {
    /// `root` must exist; it is canonicalized once here.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, SandboxError> {
        let root = root.as_ref();
        let canonical = root
            .canonicalize()
            .map_err(|_| SandboxError::NotARepository(root.display().to_string()))?;
        Ok(Self { root: canonical })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a root-relative path to an absolute path inside the root.
    ///
    /// Leading slashes are stripped, so `/etc/passwd` means `<root>/etc/passwd`.
    /// Empty input and literal `..` segments are `InvalidPath`; anything whose
    /// real location falls outside the root is `PathEscape`.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, SandboxError> {
        let segments = segments(relative)?;
        let mut candidate = self.root.clone();
        candidate.extend(&segments);
        self.contain(&candidate, relative)
    }

    /// Like [`resolve`](Self::resolve) but the last component is not followed.
    ///
    /// The parent is resolved and checked as usual; a symlink in final position
    /// is returned as the link itself, wherever it points.
    pub fn resolve_entry(&self, relative: &str) -> Result<PathBuf, SandboxError> {
        let mut segments = segments(relative)?;
        let name = segments
            .pop()
            .ok_or_else(|| SandboxError::InvalidPath("path is required".to_string()))?;
        let mut parent = self.root.clone();
        parent.extend(&segments);
        Ok(self.contain(&parent, relative)?.join(name))
    }

    fn contain(&self, candidate: &Path, relative: &str) -> Result<PathBuf, SandboxError> {
        let real = real_path(candidate).map_err(|_| SandboxError::PathEscape(relative.to_string()))?;
        if !real.starts_with(&self.root) {
            return Err(SandboxError::PathEscape(relative.to_string()));
        }
        Ok(real)
    }

    /// Root-relative form of an absolute path inside the root, `/`-separated
    pub fn relative(&self, absolute: &Path) -> Option<String> {
        let rel = absolute.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = rel
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        Some(parts.join("/"))
    }

    pub fn contains(&self, absolute: &Path) -> bool {
        absolute.starts_with(&self.root)
    }
}

/// Convenience wrapper: `PathGuard::new(root)?.resolve(relative)`
pub fn resolve(root: impl AsRef<Path>, relative: &str) -> Result<PathBuf, SandboxError> {
    PathGuard::new(root)?.resolve(relative)
}

/// Normal segments of a root-relative path; `..` and NUL are refused
fn segments(relative: &str) -> Result<Vec<&str>, SandboxError> {
    let trimmed = relative.trim().trim_start_matches(['/', '\\']);
    if trimmed.is_empty() {
        return Err(SandboxError::InvalidPath("path is required".to_string()));
    }
    if trimmed.contains('\0') {
        return Err(SandboxError::InvalidPath(format!("{:?} contains a NUL byte", relative)));
    }
    let mut out = Vec::new();
    for segment in trimmed.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => return Err(SandboxError::InvalidPath(format!("{} contains '..'", relative))),
            other => out.push(other),
        }
    }
    Ok(out)
}

/// Canonical form of `path`, tolerating a non-existent tail.
///
/// The deepest existing ancestor is canonicalized and the missing components
/// are appended. Dangling symlinks along the way are followed by hand since
/// `canonicalize` refuses them.
fn real_path(path: &Path) -> std::io::Result<PathBuf> {
    let mut existing = path.to_path_buf();
    let mut tail: Vec<std::ffi::OsString> = Vec::new();
    let mut hops = 0;

    loop {
        match fs::symlink_metadata(&existing) {
            Ok(meta) if meta.file_type().is_symlink() && fs::metadata(&existing).is_err() => {
                hops += 1;
                if hops > MAX_LINK_HOPS {
                    return Err(std::io::Error::new(std::io::ErrorKind::Other, "too many symlinks"));
                }
                let target = fs::read_link(&existing)?;
                existing = match existing.parent() {
                    Some(parent) if target.is_relative() => parent.join(target),
                    _ => target,
                };
            }
            Ok(_) => break,
            Err(_) => {
                let name = existing
                    .file_name()
                    .map(|n| n.to_os_string())
                    .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no existing ancestor"))?;
                tail.push(name);
                if !existing.pop() {
                    return Err(std::io::Error::new(std::io::ErrorKind::NotFound, "no existing ancestor"));
                }
            }
        }
    }

    let mut real = existing.canonicalize()?;
    for part in tail.into_iter().rev() {
        real.push(part);
    }
    Ok(real)
}
