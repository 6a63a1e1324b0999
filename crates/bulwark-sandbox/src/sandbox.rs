//! Sandbox - operazioni su file confinate alla radice del repository
//!
//! Every path goes through the [`PathGuard`] first. Mutations back up the
//! previous state through the [`BackupLedger`] unless the caller opts out.
//! Search, git and command execution live in sibling modules as further
//! `impl Sandbox` blocks.

use crate::backup::{write_atomic, BackupLedger, BackupRef};
use crate::path_guard::PathGuard;
use bulwark_core::config::SandboxSettings;
use bulwark_core::error::{BulwarkError, Result, SandboxError};
use bulwark_core::risk::SafetyGate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteResult {
    pub path: String,
    pub backup: Option<BackupRef>,
    pub created: bool,
    pub bytes_written: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditResult {
    pub path: String,
    pub backup: Option<BackupRef>,
    pub replacements: usize,
    pub original_content: String,
    pub new_content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResult {
    pub path: String,
    pub backup: Option<BackupRef>,
    pub was_directory: bool,
}

/// Knobs for [`Sandbox::edit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditOptions {
    /// Replace every occurrence instead of requiring a unique match
    pub replace_all: bool,
    pub backup: bool,
}

impl Default for EditOptions {
    fn default() -> Self {
        Self {
            replace_all: false,
            backup: true,
        }
    }
}

impl EditOptions {
    pub fn replace_all() -> Self {
        Self {
            replace_all: true,
            ..Self::default()
        }
    }

    pub fn without_backup(mut self) -> Self {
        self.backup = false;
        self
    }
}

/// Ambiente confinato a una singola radice versionata
#[derive(Debug, Clone)]
pub struct Sandbox {
    pub(crate) guard: PathGuard,
    pub(crate) backups: BackupLedger,
    pub(crate) gate: SafetyGate,
    pub(crate) settings: SandboxSettings,
}

impl Sandbox {
    /// Open `root` with default settings
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        Self::new(root, SandboxSettings::default())
    }

    /// Fails with `NotARepository` when `root` is missing, not a directory,
    /// or (with `require_git`) has no `.git`.
    pub fn new(root: impl AsRef<Path>, settings: SandboxSettings) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(SandboxError::NotARepository(format!("{} is not a directory", root.display())).into());
        }
        if settings.require_git && !root.join(".git").exists() {
            return Err(SandboxError::NotARepository(root.display().to_string()).into());
        }

        let guard = PathGuard::new(root)?;
        let backups = BackupLedger::new(guard.clone(), &settings.backup_dir_name);
        info!(root = %guard.root().display(), "sandbox opened");
        Ok(Self {
            guard,
            backups,
            gate: SafetyGate::new(),
            settings,
        })
    }

    pub fn root(&self) -> &Path {
        self.guard.root()
    }

    pub fn guard(&self) -> &PathGuard {
        &self.guard
    }

    pub fn backups(&self) -> &BackupLedger {
        &self.backups
    }

    pub fn gate(&self) -> &SafetyGate {
        &self.gate
    }

    pub fn settings(&self) -> &SandboxSettings {
        &self.settings
    }

    /// Resolve a path through the guard
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        Ok(self.guard.resolve(path)?)
    }

    /// Resolve a path that is about to be mutated. The backup directory is off limits.
    fn resolve_mutable(&self, path: &str) -> Result<PathBuf> {
        let resolved = self.resolve(path)?;
        if resolved.starts_with(self.backups.dir()) {
            return Err(SandboxError::InvalidPath(format!("{} is inside the backup directory", path)).into());
        }
        Ok(resolved)
    }

    pub fn exists(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.exists()).unwrap_or(false)
    }

    /// Read a file, optionally only lines `start..=end` (1-indexed)
    pub fn read(&self, path: &str, start: Option<usize>, end: Option<usize>) -> Result<String> {
        let resolved = self.resolve(path)?;
        let meta = fs::metadata(&resolved).map_err(|_| SandboxError::NotFound(path.to_string()))?;
        if meta.is_dir() {
            return Err(SandboxError::IsDirectory(path.to_string()).into());
        }
        let content = fs::read_to_string(&resolved)?;
        if start.is_none() && end.is_none() {
            return Ok(content);
        }

        let first = start.unwrap_or(1).max(1) - 1;
        let lines: Vec<&str> = content.split_inclusive('\n').collect();
        let last = end.unwrap_or(lines.len()).min(lines.len());
        if first >= last {
            return Ok(String::new());
        }
        Ok(lines[first..last].concat())
    }

    pub fn read_file(&self, path: &str) -> Result<String> {
        self.read(path, None, None)
    }

    /// Create or overwrite `path`, creating parent directories
    pub fn write(&self, path: &str, content: &str, backup: bool) -> Result<WriteResult> {
        let resolved = self.resolve_mutable(path)?;
        if resolved.is_dir() {
            return Err(SandboxError::IsDirectory(path.to_string()).into());
        }
        let created = !resolved.exists();
        let backup = if backup && !created {
            self.backups.backup(path)?
        } else {
            None
        };

        self.put(&resolved, content)?;
        info!(path, created, bytes = content.len(), "file written");
        Ok(WriteResult {
            path: path.to_string(),
            backup,
            created,
            bytes_written: content.len(),
        })
    }

    /// Create a new file. Never overwrites.
    pub fn create(&self, path: &str, content: &str) -> Result<WriteResult> {
        let resolved = self.resolve_mutable(path)?;
        if fs::symlink_metadata(&resolved).is_ok() {
            return Err(SandboxError::AlreadyExists(path.to_string()).into());
        }
        self.put(&resolved, content)?;
        info!(path, bytes = content.len(), "file created");
        Ok(WriteResult {
            path: path.to_string(),
            backup: None,
            created: true,
            bytes_written: content.len(),
        })
    }

    /// Replace `old_text` with `new_text`.
    ///
    /// Without `replace_all` the text must occur exactly once, otherwise the
    /// edit fails with `AmbiguousMatch` and the file is untouched.
    pub fn edit(&self, path: &str, old_text: &str, new_text: &str, options: EditOptions) -> Result<EditResult> {
        if old_text.is_empty() {
            return Err(BulwarkError::InvalidInput("old text must not be empty".to_string()));
        }
        let resolved = self.resolve_mutable(path)?;
        if !resolved.exists() {
            return Err(SandboxError::NotFound(path.to_string()).into());
        }
        if resolved.is_dir() {
            return Err(SandboxError::IsDirectory(path.to_string()).into());
        }

        let original = fs::read_to_string(&resolved)?;
        let count = original.matches(old_text).count();
        if count == 0 {
            return Err(SandboxError::TextNotFound(path.to_string()).into());
        }
        if count > 1 && !options.replace_all {
            return Err(SandboxError::AmbiguousMatch {
                path: path.to_string(),
                count,
            }
            .into());
        }

        let backup = if options.backup { self.backups.backup(path)? } else { None };
        let (new_content, replacements) = if options.replace_all {
            (original.replace(old_text, new_text), count)
        } else {
            (original.replacen(old_text, new_text, 1), 1)
        };
        self.put(&resolved, &new_content)?;

        info!(path, replacements, "file edited");
        Ok(EditResult {
            path: path.to_string(),
            backup,
            replacements,
            original_content: original,
            new_content,
        })
    }

    /// Remove a file or a whole directory tree. A symlink is removed as
    /// itself; whatever it points to is left alone.
    pub fn delete(&self, path: &str, backup: bool) -> Result<DeleteResult> {
        let entry = self.guard.resolve_entry(path)?;
        if entry.starts_with(self.backups.dir()) {
            return Err(SandboxError::InvalidPath(format!("{} is inside the backup directory", path)).into());
        }
        let is_link = fs::symlink_metadata(&entry)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);
        if is_link {
            let backup = if backup { self.backups.backup_link(path)? } else { None };
            fs::remove_file(&entry)?;
            info!(path, "deleted link");
            return Ok(DeleteResult {
                path: path.to_string(),
                backup,
                was_directory: false,
            });
        }

        let resolved = self.resolve_mutable(path)?;
        if resolved == self.guard.root() {
            return Err(SandboxError::InvalidPath("refusing to delete the sandbox root".to_string()).into());
        }
        let meta = fs::symlink_metadata(&resolved).map_err(|_| SandboxError::NotFound(path.to_string()))?;
        let was_directory = meta.is_dir();
        let backup = if backup { self.backups.backup(path)? } else { None };

        if was_directory {
            fs::remove_dir_all(&resolved)?;
        } else {
            fs::remove_file(&resolved)?;
        }
        info!(path, was_directory, "deleted");
        Ok(DeleteResult {
            path: path.to_string(),
            backup,
            was_directory,
        })
    }

    fn put(&self, resolved: &Path, content: &str) -> Result<()> {
        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent)?;
        }
        let permissions = fs::metadata(resolved).ok().map(|m| m.permissions());
        write_atomic(resolved, content.as_bytes(), permissions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{sandbox, sandbox_err};
    use tempfile::TempDir;

    #[test]
    fn test_open_requires_git() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            sandbox_err(Sandbox::open(dir.path())),
            SandboxError::NotARepository(_)
        ));
        assert!(matches!(
            sandbox_err(Sandbox::open(dir.path().join("missing"))),
            SandboxError::NotARepository(_)
        ));

        let relaxed = SandboxSettings {
            require_git: false,
            ..SandboxSettings::default()
        };
        assert!(Sandbox::new(dir.path(), relaxed).is_ok());
    }

    #[test]
    fn test_read_ranges() {
        let (dir, sb) = sandbox();
        fs::write(dir.path().join("a.txt"), "one\ntwo\nthree\n").unwrap();
        assert_eq!(sb.read("a.txt", None, None).unwrap(), "one\ntwo\nthree\n");
        assert_eq!(sb.read("a.txt", Some(2), Some(2)).unwrap(), "two\n");
        assert_eq!(sb.read("a.txt", Some(2), None).unwrap(), "two\nthree\n");
        assert_eq!(sb.read("a.txt", Some(9), None).unwrap(), "");
    }

    #[test]
    fn test_read_errors() {
        let (dir, sb) = sandbox();
        fs::create_dir(dir.path().join("pkg")).unwrap();
        assert!(matches!(sandbox_err(sb.read_file("nope.txt")), SandboxError::NotFound(_)));
        assert!(matches!(sandbox_err(sb.read_file("pkg")), SandboxError::IsDirectory(_)));
        assert!(matches!(sandbox_err(sb.read_file("../x")), SandboxError::InvalidPath(_)));
    }

    #[test]
    fn test_write_backs_up_existing_file() {
        let (dir, sb) = sandbox();
        let first = sb.write("src/app.py", "A", true).unwrap();
        assert!(first.created);
        assert!(first.backup.is_none());

        let second = sb.write("src/app.py", "B", true).unwrap();
        assert!(!second.created);
        assert_eq!(second.bytes_written, 1);
        let backup = second.backup.unwrap();

        sb.backups().restore_from(&backup).unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("src/app.py")).unwrap(), "A");
    }

    #[test]
    fn test_create_never_overwrites() {
        let (_dir, sb) = sandbox();
        sb.create("new.rs", "fn main() {}").unwrap();
        assert!(matches!(
            sandbox_err(sb.create("new.rs", "")),
            SandboxError::AlreadyExists(_)
        ));
        assert_eq!(sb.read_file("new.rs").unwrap(), "fn main() {}");
    }

    #[test]
    fn test_edit_uniqueness_and_replace_all() {
        let (_dir, sb) = sandbox();
        sb.write("dup.py", "x = 1\nx = 1\n", false).unwrap();

        let err = sandbox_err(sb.edit("dup.py", "x = 1", "x = 2", EditOptions::default()));
        assert_eq!(
            err,
            SandboxError::AmbiguousMatch {
                path: "dup.py".into(),
                count: 2
            }
        );
        assert_eq!(sb.read_file("dup.py").unwrap(), "x = 1\nx = 1\n");

        let result = sb.edit("dup.py", "x = 1", "x = 2", EditOptions::replace_all()).unwrap();
        assert_eq!(result.replacements, 2);
        assert_eq!(sb.read_file("dup.py").unwrap(), "x = 2\nx = 2\n");
        assert!(result.backup.is_some());
    }

    #[test]
    fn test_edit_errors() {
        let (_dir, sb) = sandbox();
        sb.write("a.py", "print(1)\n", false).unwrap();
        assert!(matches!(
            sandbox_err(sb.edit("a.py", "print(2)", "x", EditOptions::default())),
            SandboxError::TextNotFound(_)
        ));
        assert!(matches!(
            sandbox_err(sb.edit("b.py", "x", "y", EditOptions::default())),
            SandboxError::NotFound(_)
        ));
    }

    #[test]
    fn test_delete_file_and_directory() {
        let (dir, sb) = sandbox();
        sb.write("pkg/a.py", "a", false).unwrap();
        sb.write("single.py", "s", false).unwrap();

        let file = sb.delete("single.py", true).unwrap();
        assert!(!file.was_directory);
        assert!(file.backup.is_some());

        let tree = sb.delete("pkg", true).unwrap();
        assert!(tree.was_directory);
        assert!(!dir.path().join("pkg").exists());

        sb.backups().restore("pkg").unwrap();
        assert_eq!(sb.read_file("pkg/a.py").unwrap(), "a");
        assert!(matches!(sandbox_err(sb.delete("single.py", true)), SandboxError::NotFound(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_delete_removes_link_not_target() {
        let (dir, sb) = sandbox();
        sb.write("src/lib.rs", "pub fn a() {}", false).unwrap();
        std::os::unix::fs::symlink(dir.path().join("src"), dir.path().join("alias")).unwrap();

        let removed = sb.delete("alias", false).unwrap();
        assert!(!removed.was_directory);
        assert!(fs::symlink_metadata(dir.path().join("alias")).is_err());
        assert_eq!(sb.read_file("src/lib.rs").unwrap(), "pub fn a() {}");

        std::os::unix::fs::symlink("src/lib.rs", dir.path().join("lib_alias")).unwrap();
        let removed = sb.delete("lib_alias", true).unwrap();
        let backup = removed.backup.unwrap();
        assert_eq!(backup.link_target.as_deref(), Some("src/lib.rs"));
        assert!(dir.path().join("src/lib.rs").exists());

        sb.backups().restore("lib_alias").unwrap();
        let meta = fs::symlink_metadata(dir.path().join("lib_alias")).unwrap();
        assert!(meta.file_type().is_symlink());
        assert_eq!(sb.read_file("lib_alias").unwrap(), "pub fn a() {}");
    }

    #[test]
    fn test_delete_refuses_root() {
        let (_dir, sb) = sandbox();
        assert!(matches!(sandbox_err(sb.delete(".", false)), SandboxError::InvalidPath(_)));
        assert!(matches!(sandbox_err(sb.delete("/", false)), SandboxError::InvalidPath(_)));
    }

    #[test]
    fn test_backup_directory_is_not_writable() {
        let (_dir, sb) = sandbox();
        assert!(matches!(
            sandbox_err(sb.write(".bulwark_backups/evil.bak", "x", false)),
            SandboxError::InvalidPath(_)
        ));
    }
}
