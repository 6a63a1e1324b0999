//! Bulwark Sandbox - Mutazioni sicure dentro la radice di un repository
//!
//! Tutto ciò che tocca il disco passa da qui: il PathGuard confina i percorsi
//! alla radice, il Backup Ledger salva lo stato prima di ogni modifica, il
//! Rollback Stack permette di annullare l'ultima azione e `AgentSession`
//! collega il tutto al motore di rischio, verifica e fiducia di
//! `bulwark-core`.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms, missing_debug_implementations)]

mod adapter;
pub mod backup;
pub mod command;
pub mod git;
pub mod path_guard;
pub mod rollback;
pub mod sandbox;
pub mod search;
pub mod session;

#[cfg(test)]
mod test_support;

pub use backup::{BackupLedger, BackupRef};
pub use git::{Commit, GitStatus};
pub use path_guard::PathGuard;
pub use rollback::{RollbackAction, RollbackOutcome, RollbackStack, SharedRollbackStack};
pub use sandbox::{DeleteResult, EditOptions, EditResult, Sandbox, WriteResult};
pub use search::TreeEntry;
pub use session::{ActionReport, AgentSession};
