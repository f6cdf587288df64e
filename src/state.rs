//! State backend selection

use anyhow::{Context, Result};
use clap::ValueEnum;
use declarative::{FileSystemBackend, MemoryBackend, SqliteBackend, StateBackend};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// File name of the sqlite database inside the state directory
pub const SQLITE_FILE: &str = "state.db";

/// Where resource records are persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// One JSON file per resource
    #[default]
    Fs,
    /// A single sqlite database
    Sqlite,
    /// In-process only; nothing survives the run
    Memory,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Fs => write!(f, "fs"),
            BackendKind::Sqlite => write!(f, "sqlite"),
            BackendKind::Memory => write!(f, "memory"),
        }
    }
}

/// Open the backend of `kind` rooted at `state_dir`
pub fn open(kind: BackendKind, state_dir: &Path) -> Result<Box<dyn StateBackend>> {
    log::debug!("Opening {kind} state in {}", state_dir.display());
    let backend: Box<dyn StateBackend> = match kind {
        BackendKind::Fs => Box::new(FileSystemBackend::new(state_dir)),
        BackendKind::Sqlite => {
            let db_path = state_dir.join(SQLITE_FILE);
            Box::new(
                SqliteBackend::open(&db_path)
                    .with_context(|| format!("Could not open {}", db_path.display()))?,
            )
        }
        BackendKind::Memory => Box::new(MemoryBackend::new()),
    };
    Ok(backend)
}
