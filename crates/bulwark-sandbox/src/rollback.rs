//! Rollback Stack
//!
//! Registro LIFO delle azioni annullabili, salvato come array JSON ordinato
//! nella directory dei backup. `rollback_last` prova prima il comando inverso
//! (dopo averlo ripassato dal safety gate) e poi il ripristino dal backup.
//! Un rollback fallito viene riportato come valore, mai come errore.

use crate::backup::{write_atomic, BackupLedger, BackupRef};
use crate::sandbox::Sandbox;
use bulwark_core::config::RollbackSettings;
use bulwark_core::error::{LedgerError, Result};
use bulwark_core::executor::SandboxExecutor;
use bulwark_core::risk::SafetyGate;
use bulwark_core::types::{now, Blake3Hash, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Key in `original_state` naming the path a backup restores to
pub const ORIGINAL_PATH_KEY: &str = "original_path";

/// One undoable event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackAction {
    pub id: String,
    pub timestamp: Timestamp,
    pub description: String,
    pub reverse_command: Option<String>,
    pub backup: Option<BackupRef>,
    #[serde(default)]
    pub original_state: Map<String, Value>,
    #[serde(default)]
    pub completed: bool,
}

impl RollbackAction {
    fn new(
        description: String,
        reverse_command: Option<String>,
        backup: Option<BackupRef>,
        original_state: Map<String, Value>,
    ) -> Self {
        let timestamp = now();
        let digest = Blake3Hash::of(format!("{}{}", timestamp.to_rfc3339(), description).as_bytes()).to_hex();
        Self {
            id: digest[..12].to_string(),
            timestamp,
            description,
            reverse_command,
            backup,
            original_state,
            completed: false,
        }
    }

    /// Where a backup restore writes to: `original_state["original_path"]`,
    /// else the path the backup was taken from.
    pub fn restore_target(&self) -> Option<&str> {
        self.original_state
            .get(ORIGINAL_PATH_KEY)
            .and_then(Value::as_str)
            .or_else(|| self.backup.as_ref().map(|b| b.original.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackOutcome {
    pub success: bool,
    pub message: String,
}

impl RollbackOutcome {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[derive(Debug)]
pub struct RollbackStack {
    path: PathBuf,
    entries: Vec<RollbackAction>,
    gate: SafetyGate,
    backups: BackupLedger,
    command_timeout: Duration,
}

/// Per-session handle; all mutation goes through the lock
pub type SharedRollbackStack = Arc<tokio::sync::Mutex<RollbackStack>>;

impl RollbackStack {
    /// Load the ledger of `sandbox`, or start an empty one.
    ///
    /// A ledger file that does not parse is `LedgerError::Corrupt`; it is
    /// never silently replaced.
    pub fn open(sandbox: &Sandbox, settings: &RollbackSettings) -> Result<Self> {
        let backups = sandbox.backups().clone();
        let path = backups.dir().join(&settings.ledger_file);
        let entries = load(&path)?;
        info!(path = %path.display(), entries = entries.len(), "rollback stack loaded");
        Ok(Self {
            path,
            entries,
            gate: *sandbox.gate(),
            backups,
            command_timeout: Duration::from_secs(settings.command_timeout_secs),
        })
    }

    pub fn shared(self) -> SharedRollbackStack {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All entries, oldest first
    pub fn entries(&self) -> &[RollbackAction] {
        &self.entries
    }

    pub fn last(&self) -> Option<&RollbackAction> {
        self.entries.last()
    }

    /// Uncompleted entries, most recent first
    pub fn pending(&self) -> Vec<&RollbackAction> {
        self.entries.iter().rev().filter(|a| !a.completed).collect()
    }

    /// Push an entry and persist the stack
    pub fn record(
        &mut self,
        description: impl Into<String>,
        reverse_command: Option<String>,
        backup: Option<BackupRef>,
        original_state: Map<String, Value>,
    ) -> Result<RollbackAction> {
        let action = RollbackAction::new(description.into(), reverse_command, backup, original_state);
        self.entries.push(action.clone());
        if let Err(err) = self.save() {
            self.entries.pop();
            return Err(err);
        }
        info!(id = %action.id, description = %action.description, "recorded rollback entry");
        Ok(action)
    }

    /// Undo the most recent entry.
    ///
    /// Reverse command first, backup restore as fallback. A reverse command the
    /// gate rejects is never run.
    pub async fn rollback_last(&mut self, runner: &dyn SandboxExecutor) -> RollbackOutcome {
        let Some(action) = self.entries.last().cloned() else {
            return RollbackOutcome::failed(LedgerError::NothingToRollback.to_string());
        };
        if action.completed {
            return RollbackOutcome::failed(format!("Action already rolled back: {}", action.description));
        }

        let mut problems = Vec::new();

        if let Some(reverse) = &action.reverse_command {
            match self.gate.check(reverse) {
                Err(err) => {
                    warn!(id = %action.id, command = %reverse, "rollback command blocked");
                    problems.push(format!("Rollback command blocked: {}", err));
                }
                Ok(_) => match runner.run_command(reverse, self.command_timeout).await {
                    Ok(out) if out.success() => {
                        return self.complete(&action.id, format!("Rolled back: {}", action.description));
                    }
                    Ok(out) => problems.push(format!("Rollback command failed: {}", out.combined().trim())),
                    Err(err) => problems.push(format!("Rollback command error: {}", err)),
                },
            }
        }

        if let (Some(backup), Some(target)) = (&action.backup, action.restore_target()) {
            match self.backups.restore_to(backup, target) {
                Ok(()) => {
                    return self.complete(&action.id, format!("Restored from backup: {}", action.description));
                }
                Err(err) => problems.push(format!("Failed to restore from backup {}: {}", backup.location, err)),
            }
        }

        if problems.is_empty() {
            problems.push(format!("{}: no reverse command or backup", LedgerError::NothingToRollback));
        }
        let message = problems.join("; ");
        warn!(id = %action.id, %message, "rollback failed");
        RollbackOutcome::failed(message)
    }

    /// Drop completed entries older than `older_than_days`. Pending entries stay.
    pub fn prune_completed(&mut self, older_than_days: i64) -> Result<usize> {
        let cutoff = now() - chrono::Duration::days(older_than_days);
        let before = self.entries.len();
        self.entries.retain(|a| !a.completed || a.timestamp > cutoff);
        let removed = before - self.entries.len();
        if removed > 0 {
            self.save()?;
            info!(removed, "pruned completed rollback entries");
        }
        Ok(removed)
    }

    fn complete(&mut self, id: &str, message: String) -> RollbackOutcome {
        if let Some(entry) = self.entries.iter_mut().rev().find(|a| a.id == id) {
            entry.completed = true;
        }
        info!(id, %message, "rollback complete");
        match self.save() {
            Ok(()) => RollbackOutcome::ok(message),
            Err(err) => {
                warn!(id, error = %err, "rollback applied but ledger not saved");
                RollbackOutcome::ok(format!("{} (ledger not saved: {})", message, err))
            }
        }
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(&self.entries)?;
        write_atomic(&self.path, &json, None)
    }
}

fn load(path: &Path) -> Result<Vec<RollbackAction>> {
    match fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map_err(|e| LedgerError::Corrupt(format!("{}: {}", path.display(), e)).into()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(err.into()),
    }
}

/// `original_state` recording where a backup belongs
pub fn original_state_for(path: &str) -> Map<String, Value> {
    let mut state = Map::new();
    state.insert(ORIGINAL_PATH_KEY.to_string(), Value::String(path.to_string()));
    state
}
