//! Backup Ledger
//!
//! Snapshot pre-mutazione di file e directory, conservati in
//! `<root>/<backup_dir>` come `<nome>_<timestamp>_<suffisso>.bak` più un
//! file di metadati `.bak.json`. Ogni scrittura passa da un file temporaneo
//! rinominato al suo posto: un crash a metà non lascia mai una copia parziale
//! che sembri valida. I metadati vengono scritti per ultimi.
//!
//! Backups are append-only: restoring never deletes the snapshot.

use crate::path_guard::PathGuard;
use bulwark_core::error::{BulwarkError, LedgerError, Result, SandboxError};
use bulwark_core::types::{now, Blake3Hash, Timestamp};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const BACKUP_EXT: &str = "bak";
const META_SUFFIX: &str = ".bak.json";

/// Handle to one snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRef {
    /// Root-relative path that was backed up
    pub original: String,
    /// Root-relative path of the copy
    pub location: String,
    pub created_at: Timestamp,
    pub is_directory: bool,
    /// blake3 of the file content; directories carry none
    pub content_hash: Option<String>,
    /// Set when the snapshot is a symlink; the copy holds the link text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_target: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BackupLedger {
    guard: PathGuard,
    dir: PathBuf,
}

impl BackupLedger {
    pub fn new(guard: PathGuard, dir_name: &str) -> Self {
        let dir = guard.root().join(dir_name);
        Self { guard, dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Snapshot `relative`. `Ok(None)` when there is nothing on disk to preserve.
    pub fn backup(&self, relative: &str) -> Result<Option<BackupRef>> {
        let source = self.guard.resolve(relative)?;
        let meta = match fs::symlink_metadata(&source) {
            Ok(meta) => meta,
            Err(_) => {
                debug!(path = relative, "nothing to back up");
                return Ok(None);
            }
        };
        if source.starts_with(&self.dir) {
            return Err(SandboxError::InvalidPath(format!("{} is inside the backup directory", relative)).into());
        }
        let original = self.relative(&source)?;
        fs::create_dir_all(&self.dir)?;

        let created_at = now();
        let stem = stem_for(&original, &created_at);
        let copy_path = self.dir.join(format!("{}.{}", stem, BACKUP_EXT));

        let content_hash = if meta.is_dir() {
            let staging = tempfile::Builder::new().prefix(".staging-").tempdir_in(&self.dir)?;
            copy_tree(&source, staging.path())?;
            fs::rename(staging.path(), &copy_path)?;
            None
        } else {
            let bytes = fs::read(&source)?;
            write_atomic(&copy_path, &bytes, Some(meta.permissions()))?;
            Some(Blake3Hash::of(&bytes).to_hex())
        };

        let backup = BackupRef {
            original,
            location: self.relative(&copy_path)?,
            created_at,
            is_directory: meta.is_dir(),
            content_hash,
            link_target: None,
        };
        self.record(&stem, &backup)?;

        info!(original = %backup.original, backup = %backup.location, "backup created");
        Ok(Some(backup))
    }

    /// Snapshot the symlink at `relative` itself, not what it points to.
    /// `Ok(None)` when the entry is missing or not a link.
    pub fn backup_link(&self, relative: &str) -> Result<Option<BackupRef>> {
        let entry = self.guard.resolve_entry(relative)?;
        match fs::symlink_metadata(&entry) {
            Ok(meta) if meta.file_type().is_symlink() => {}
            _ => return Ok(None),
        }
        if entry.starts_with(&self.dir) {
            return Err(SandboxError::InvalidPath(format!("{} is inside the backup directory", relative)).into());
        }
        let original = self.relative(&entry)?;
        let link_target = fs::read_link(&entry)?.to_string_lossy().into_owned();
        fs::create_dir_all(&self.dir)?;

        let created_at = now();
        let stem = stem_for(&original, &created_at);
        let copy_path = self.dir.join(format!("{}.{}", stem, BACKUP_EXT));
        write_atomic(&copy_path, link_target.as_bytes(), None)?;

        let backup = BackupRef {
            original,
            location: self.relative(&copy_path)?,
            created_at,
            is_directory: false,
            content_hash: Some(Blake3Hash::of(link_target.as_bytes()).to_hex()),
            link_target: Some(link_target),
        };
        self.record(&stem, &backup)?;

        info!(original = %backup.original, backup = %backup.location, "link backup created");
        Ok(Some(backup))
    }

    /// Metadata goes last so a half-written snapshot is never listed
    fn record(&self, stem: &str, backup: &BackupRef) -> Result<()> {
        let meta_path = self.dir.join(format!("{}{}", stem, META_SUFFIX));
        write_atomic(&meta_path, &serde_json::to_vec_pretty(backup)?, None)
    }

    /// Every recorded snapshot, oldest first
    pub fn list(&self) -> Result<Vec<BackupRef>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut backups = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_meta = path
                .file_name()
                .map(|n| n.to_string_lossy().ends_with(META_SUFFIX))
                .unwrap_or(false);
            if !is_meta {
                continue;
            }
            match fs::read(&path).map_err(BulwarkError::from).and_then(|raw| {
                serde_json::from_slice::<BackupRef>(&raw).map_err(BulwarkError::from)
            }) {
                Ok(backup) => backups.push(backup),
                Err(err) => warn!(path = %path.display(), error = %err, "skipping unreadable backup metadata"),
            }
        }
        backups.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.location.cmp(&b.location)));
        Ok(backups)
    }

    /// Most recent snapshot of `original`
    pub fn latest(&self, original: &str) -> Result<Option<BackupRef>> {
        let key = self.relative(&self.guard.resolve(original)?)?;
        // a link is recorded under its own name, not under what it points to
        let entry_key = self.relative(&self.guard.resolve_entry(original)?)?;
        Ok(self
            .list()?
            .into_iter()
            .filter(|b| b.original == key || (b.link_target.is_some() && b.original == entry_key))
            .last())
    }

    /// Put back the most recent snapshot of `original`
    pub fn restore(&self, original: &str) -> Result<BackupRef> {
        let backup = self
            .latest(original)?
            .ok_or_else(|| LedgerError::NoBackupFound(original.to_string()))?;
        self.restore_from(&backup)?;
        Ok(backup)
    }

    pub fn restore_from(&self, backup: &BackupRef) -> Result<()> {
        self.restore_to(backup, &backup.original)
    }

    /// Copy `backup` over `target`, replacing whatever is there now
    pub fn restore_to(&self, backup: &BackupRef, target: &str) -> Result<()> {
        let location = self.guard.root().join(&backup.location);
        if fs::symlink_metadata(&location).is_err() {
            return Err(LedgerError::NoBackupFound(backup.original.clone()).into());
        }
        if let Some(link) = &backup.link_target {
            return self.restore_link(backup, link, target);
        }
        let destination = self.guard.resolve(target)?;
        let parent = destination
            .parent()
            .ok_or_else(|| SandboxError::InvalidPath(target.to_string()))?;
        fs::create_dir_all(parent)?;

        if backup.is_directory {
            let staging = tempfile::Builder::new().prefix(".bulwark-restore-").tempdir_in(parent)?;
            copy_tree(&location, staging.path())?;
            remove_existing(&destination)?;
            fs::rename(staging.path(), &destination)?;
        } else {
            let bytes = fs::read(&location)?;
            if let Some(expected) = &backup.content_hash {
                let actual = Blake3Hash::of(&bytes).to_hex();
                if &actual != expected {
                    return Err(LedgerError::Corrupt(format!("{} does not match its recorded hash", backup.location)).into());
                }
            }
            let permissions = fs::metadata(&location).ok().map(|m| m.permissions());
            if destination.is_dir() {
                fs::remove_dir_all(&destination)?;
            }
            write_atomic(&destination, &bytes, permissions)?;
        }

        info!(original = %backup.original, target, backup = %backup.location, "backup restored");
        Ok(())
    }

    fn restore_link(&self, backup: &BackupRef, link: &str, target: &str) -> Result<()> {
        let destination = self.guard.resolve_entry(target)?;
        let parent = destination
            .parent()
            .ok_or_else(|| SandboxError::InvalidPath(target.to_string()))?;
        fs::create_dir_all(parent)?;
        remove_existing(&destination)?;
        make_link(Path::new(link), &destination)?;
        info!(original = %backup.original, target, link, "link restored");
        Ok(())
    }

    fn relative(&self, absolute: &Path) -> Result<String> {
        self.guard
            .relative(absolute)
            .ok_or_else(|| SandboxError::PathEscape(absolute.display().to_string()).into())
    }
}

fn stem_for(original: &str, created_at: &Timestamp) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_{}",
        original.replace('/', "_"),
        created_at.format("%Y%m%d_%H%M%S_%6f"),
        &suffix[..6]
    )
}

/// Write through a temp file in the destination directory, then rename into place
pub(crate) fn write_atomic(path: &Path, bytes: &[u8], permissions: Option<fs::Permissions>) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| SandboxError::InvalidPath(path.display().to_string()))?;
    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    if let Some(permissions) = permissions {
        fs::set_permissions(tmp.path(), permissions)?;
    }
    tmp.persist(path).map_err(|e| BulwarkError::Io(e.error))?;
    Ok(())
}

fn remove_existing(path: &Path) -> std::io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(_) => Ok(()),
    }
}

#[cfg(unix)]
fn make_link(points_to: &Path, at: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(points_to, at)
}

#[cfg(not(unix))]
fn make_link(_points_to: &Path, at: &Path) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        format!("cannot recreate symlink {}", at.display()),
    ))
}

/// Recursive copy that recreates symlinks instead of following them
fn copy_tree(source: &Path, destination: &Path) -> Result<()> {
    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.map_err(|e| BulwarkError::Io(e.into()))?;
        let rel = entry
            .path()
            .strip_prefix(source)
            .map_err(|_| SandboxError::InvalidPath(entry.path().display().to_string()))?;
        let target = destination.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            make_link(&fs::read_link(entry.path())?, &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
