//! SQLite state backend
//!
//! All scopes share one table keyed by `(namespace, id)`, where the
//! namespace is the escaped scope path.

use super::{StateBackend, StateStore, namespace};
use crate::error::Result;
use crate::types::ResourceRecord;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::rc::Rc;

/// Stores records as JSON text in a single SQLite table
pub struct SqliteBackend {
    conn: Rc<Connection>,
}

impl SqliteBackend {
    /// Open or create a state database at the given path
    ///
    /// Creates the database file and the table if they don't exist.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(db_path)?)
    }

    /// A throwaway in-memory database
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS resources (
                namespace TEXT NOT NULL,
                id TEXT NOT NULL,
                record TEXT NOT NULL,
                PRIMARY KEY (namespace, id)
            );
            ",
        )?;
        Ok(Self {
            conn: Rc::new(conn),
        })
    }

    /// Total number of records across every scope
    pub fn total(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM resources", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

impl StateBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn scoped(&self, path: &[String]) -> Result<Rc<dyn StateStore>> {
        Ok(Rc::new(SqliteStore {
            conn: Rc::clone(&self.conn),
            namespace: namespace(path),
        }))
    }
}

struct SqliteStore {
    conn: Rc<Connection>,
    namespace: String,
}

impl StateStore for SqliteStore {
    fn get(&self, id: &str) -> Result<Option<ResourceRecord>> {
        let text: Option<String> = self
            .conn
            .query_row(
                "SELECT record FROM resources WHERE namespace = ?1 AND id = ?2",
                params![self.namespace, id],
                |row| row.get(0),
            )
            .optional()?;
        match text {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    fn set(&self, id: &str, record: &ResourceRecord) -> Result<()> {
        let text = serde_json::to_string(record)?;
        self.conn.execute(
            "INSERT INTO resources (namespace, id, record) VALUES (?1, ?2, ?3)
             ON CONFLICT(namespace, id) DO UPDATE SET record = excluded.record",
            params![self.namespace, id, text],
        )?;
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM resources WHERE namespace = ?1 AND id = ?2",
            params![self.namespace, id],
        )?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM resources WHERE namespace = ?1 ORDER BY id")?;
        let ids = stmt
            .query_map(params![self.namespace], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    fn count(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM resources WHERE namespace = ?1",
            params![self.namespace],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Status;
    use tempfile::TempDir;

    fn path(segments: &[&str]) -> Vec<String> {
        segments.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_upsert_and_list() {
        let backend = SqliteBackend::in_memory().unwrap();
        let store = backend.scoped(&path(&["app"])).unwrap();

        let mut record = ResourceRecord::new("file", "a", "app/a", 0);
        store.set("a", &record).unwrap();
        record.status = Status::Created;
        store.set("a", &record).unwrap();
        store
            .set("b", &ResourceRecord::new("file", "b", "app/b", 1))
            .unwrap();

        assert_eq!(store.get("a").unwrap().unwrap().status, Status::Created);
        assert_eq!(store.list().unwrap(), vec!["a", "b"]);
        assert_eq!(store.count().unwrap(), 2);

        store.delete("a").unwrap();
        assert!(store.get("a").unwrap().is_none());
        assert_eq!(backend.total().unwrap(), 1);
    }

    #[test]
    fn test_namespaces_do_not_leak() {
        let backend = SqliteBackend::in_memory().unwrap();
        let parent = backend.scoped(&path(&["app"])).unwrap();
        let child = backend.scoped(&path(&["app", "site"])).unwrap();

        child
            .set("index", &ResourceRecord::new("file", "index", "app/site/index", 0))
            .unwrap();

        assert!(parent.list().unwrap().is_empty());
        assert_eq!(child.count().unwrap(), 1);
    }

    #[test]
    fn test_persists_across_open() {
        let tmp = TempDir::new().unwrap();
        let db = tmp.path().join("state").join("conjure.db");
        {
            let backend = SqliteBackend::open(&db).unwrap();
            let store = backend.scoped(&path(&["app"])).unwrap();
            store
                .set("a", &ResourceRecord::new("file", "a", "app/a", 0))
                .unwrap();
        }

        let backend = SqliteBackend::open(&db).unwrap();
        let store = backend.scoped(&path(&["app"])).unwrap();
        assert_eq!(store.get("a").unwrap().unwrap().fqn, "app/a");
    }
}
