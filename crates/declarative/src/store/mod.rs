//! State storage - persisted key → record repositories
//!
//! A [`StateBackend`] owns the persisted data. Each scope asks it for a
//! [`StateStore`] bound to the scope's path, so store keys are plain
//! resource ids and never carry the scope path themselves.

mod fs;
mod memory;
mod sqlite;

pub use fs::FileSystemBackend;
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

use crate::error::Result;
use crate::types::ResourceRecord;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Path-scoped view of persisted records
pub trait StateStore {
    /// Load a record, or `None` if the id was never stored
    fn get(&self, id: &str) -> Result<Option<ResourceRecord>>;

    /// Insert or overwrite a record
    fn set(&self, id: &str, record: &ResourceRecord) -> Result<()>;

    /// Remove a record; removing a missing id is not an error
    fn delete(&self, id: &str) -> Result<()>;

    /// Ids of every record in this scope, sorted
    fn list(&self) -> Result<Vec<String>>;

    /// Load several records; missing ids are left out of the map
    fn get_batch(&self, ids: &[String]) -> Result<BTreeMap<String, ResourceRecord>> {
        let mut out = BTreeMap::new();
        for id in ids {
            if let Some(record) = self.get(id)? {
                out.insert(id.clone(), record);
            }
        }
        Ok(out)
    }

    /// Load every record in this scope
    fn all(&self) -> Result<BTreeMap<String, ResourceRecord>> {
        let ids = self.list()?;
        self.get_batch(&ids)
    }

    /// Number of records in this scope
    fn count(&self) -> Result<usize> {
        Ok(self.list()?.len())
    }
}

/// Source of path-scoped stores
pub trait StateBackend {
    /// Short name used in log output
    fn name(&self) -> &'static str;

    /// Open the store for a scope path such as `["app", "dev", "site"]`
    fn scoped(&self, path: &[String]) -> Result<Rc<dyn StateStore>>;
}

impl<B: StateBackend + ?Sized> StateBackend for Box<B> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn scoped(&self, path: &[String]) -> Result<Rc<dyn StateStore>> {
        (**self).scoped(path)
    }
}

/// Escape a key or path segment so it cannot collide with path delimiters
///
/// `%`, `/`, `\` and `:` are percent-encoded, as are the whole-segment
/// names `.` and `..`.
pub fn escape_key(key: &str) -> String {
    match key {
        "." => return "%2E".to_string(),
        ".." => return "%2E%2E".to_string(),
        _ => {}
    }
    let mut out = String::with_capacity(key.len());
    for c in key.chars() {
        match c {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            '\\' => out.push_str("%5C"),
            ':' => out.push_str("%3A"),
            _ => out.push(c),
        }
    }
    out
}

/// Reverse [`escape_key`]
pub fn unescape_key(escaped: &str) -> String {
    let mut out = String::with_capacity(escaped.len());
    let mut rest = escaped;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let code = rest.get(pos + 1..pos + 3);
        let decoded = match code {
            Some("25") => Some('%'),
            Some("2F") => Some('/'),
            Some("5C") => Some('\\'),
            Some("3A") => Some(':'),
            Some("2E") => Some('.'),
            _ => None,
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &rest[pos + 3..];
            }
            None => {
                out.push('%');
                rest = &rest[pos + 1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Join a scope path into a single namespace string with escaped segments
pub fn namespace(path: &[String]) -> String {
    path.iter()
        .map(|segment| escape_key(segment))
        .collect::<Vec<_>>()
        .join("/")
}
