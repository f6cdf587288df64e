//! In-process state backend

use super::{StateBackend, StateStore, namespace};
use crate::error::Result;
use crate::types::ResourceRecord;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

type Namespaces = BTreeMap<String, BTreeMap<String, ResourceRecord>>;

/// Keeps every record in memory; clones share the same data
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    data: Rc<RefCell<Namespaces>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a record directly, bypassing any scope
    pub fn record(&self, path: &[&str], id: &str) -> Option<ResourceRecord> {
        let path: Vec<String> = path.iter().map(ToString::to_string).collect();
        self.data
            .borrow()
            .get(&namespace(&path))
            .and_then(|records| records.get(id).cloned())
    }

    /// Total number of records across every scope
    pub fn total(&self) -> usize {
        self.data.borrow().values().map(BTreeMap::len).sum()
    }
}

impl StateBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn scoped(&self, path: &[String]) -> Result<Rc<dyn StateStore>> {
        Ok(Rc::new(MemoryStore {
            data: Rc::clone(&self.data),
            namespace: namespace(path),
        }))
    }
}

struct MemoryStore {
    data: Rc<RefCell<Namespaces>>,
    namespace: String,
}

impl StateStore for MemoryStore {
    fn get(&self, id: &str) -> Result<Option<ResourceRecord>> {
        Ok(self
            .data
            .borrow()
            .get(&self.namespace)
            .and_then(|records| records.get(id).cloned()))
    }

    fn set(&self, id: &str, record: &ResourceRecord) -> Result<()> {
        self.data
            .borrow_mut()
            .entry(self.namespace.clone())
            .or_default()
            .insert(id.to_string(), record.clone());
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<()> {
        let mut data = self.data.borrow_mut();
        if let Some(records) = data.get_mut(&self.namespace) {
            records.remove(id);
            if records.is_empty() {
                data.remove(&self.namespace);
            }
        }
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>> {
        Ok(self
            .data
            .borrow()
            .get(&self.namespace)
            .map(|records| records.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn count(&self) -> Result<usize> {
        Ok(self
            .data
            .borrow()
            .get(&self.namespace)
            .map_or(0, BTreeMap::len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(segments: &[&str]) -> Vec<String> {
        segments.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_scopes_are_isolated() {
        let backend = MemoryBackend::new();
        let app = backend.scoped(&path(&["app"])).unwrap();
        let nested = backend.scoped(&path(&["app", "site"])).unwrap();

        app.set("a", &ResourceRecord::new("file", "a", "app/a", 0))
            .unwrap();
        nested
            .set("a", &ResourceRecord::new("file", "a", "app/site/a", 0))
            .unwrap();

        assert_eq!(app.get("a").unwrap().unwrap().fqn, "app/a");
        assert_eq!(nested.get("a").unwrap().unwrap().fqn, "app/site/a");
        assert_eq!(backend.total(), 2);
        assert_eq!(
            backend.record(&["app", "site"], "a").unwrap().fqn,
            "app/site/a"
        );
    }

    #[test]
    fn test_contract_operations() {
        let backend = MemoryBackend::new();
        let store = backend.scoped(&path(&["app"])).unwrap();
        for id in ["b", "a", "c"] {
            store
                .set(id, &ResourceRecord::new("file", id, id, 0))
                .unwrap();
        }

        assert_eq!(store.list().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(store.count().unwrap(), 3);

        let batch = store
            .get_batch(&["a".to_string(), "zz".to_string()])
            .unwrap();
        assert_eq!(batch.len(), 1);

        store.delete("b").unwrap();
        store.delete("missing").unwrap();
        assert_eq!(store.all().unwrap().len(), 2);
        assert!(store.get("b").unwrap().is_none());
    }
}
