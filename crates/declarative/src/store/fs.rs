//! Local filesystem state backend
//!
//! Layout: `<root>/<escaped scope segment>/.../<escaped id>.json`, one
//! pretty-printed JSON record per file. A resource's nested scope is a
//! directory next to its record file, so the two never collide.

use super::{StateBackend, StateStore, escape_key, unescape_key};
use crate::error::Result;
use crate::types::ResourceRecord;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::rc::Rc;

const RECORD_EXT: &str = "json";

/// Stores records as JSON files under a root directory
#[derive(Debug, Clone)]
pub struct FileSystemBackend {
    root: PathBuf,
}

impl FileSystemBackend {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

impl StateBackend for FileSystemBackend {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    fn scoped(&self, path: &[String]) -> Result<Rc<dyn StateStore>> {
        let dir = path
            .iter()
            .fold(self.root.clone(), |dir, segment| dir.join(escape_key(segment)));
        Ok(Rc::new(FileSystemStore { dir }))
    }
}

struct FileSystemStore {
    dir: PathBuf,
}

impl FileSystemStore {
    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.{RECORD_EXT}", escape_key(id)))
    }

    fn read(path: &Path) -> Result<Option<ResourceRecord>> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&content)?))
    }
}

impl StateStore for FileSystemStore {
    fn get(&self, id: &str) -> Result<Option<ResourceRecord>> {
        Self::read(&self.record_path(id))
    }

    fn set(&self, id: &str, record: &ResourceRecord) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.record_path(id);
        let content = serde_json::to_string_pretty(record)?;

        // Write-then-rename so an interrupted write never leaves a torn record
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &path)?;

        log::trace!("Saved {} to {}", record.fqn, path.display());
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<()> {
        match fs::remove_file(self.record_path(id)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        // Drop the scope directory once nothing is left in it
        if fs::read_dir(&self.dir).is_ok_and(|mut entries| entries.next().is_none()) {
            let _ = fs::remove_dir(&self.dir);
        }
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if !path.is_file() || path.extension().is_none_or(|ext| ext != RECORD_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem() {
                ids.push(unescape_key(&stem.to_string_lossy()));
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn get_batch(&self, ids: &[String]) -> Result<BTreeMap<String, ResourceRecord>> {
        let loaded: Vec<(String, Option<ResourceRecord>)> = ids
            .par_iter()
            .map(|id| Self::read(&self.record_path(id)).map(|record| (id.clone(), record)))
            .collect::<Result<_>>()?;

        Ok(loaded
            .into_iter()
            .filter_map(|(id, record)| record.map(|r| (id, r)))
            .collect())
    }
}
