//! Scope tree
//!
//! Scopes mirror declaration nesting. Each scope owns a path-scoped
//! view of the state store, the nodes declared in it, and its child
//! scopes. A resource's own scope is the child named after its id, so
//! resources declared inside a handler are nested under their parent.
//! Group scopes share that namespace, so a group may not take the name
//! of a resource in the same scope.
//!
//! Children hold their parent weakly; the root handle keeps the whole
//! tree alive.

use crate::destroy;
use crate::engine::EngineShared;
use crate::error::{Error, Result};
use crate::input::Input;
use crate::resource::{Node, Resource};
use crate::store::StateStore;
use crate::types::Phase;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::{Rc, Weak};

#[derive(Default)]
struct Nodes {
    by_id: HashMap<String, Rc<Node>>,
    order: Vec<String>,
}

pub(crate) struct ScopeInner {
    name: String,
    path: Vec<String>,
    parent: Option<Weak<ScopeInner>>,
    /// Nested scope of the resource with this name, rather than a group
    owned: bool,
    phase: Phase,
    store: Rc<dyn StateStore>,
    engine: Rc<EngineShared>,
    children: RefCell<Vec<Scope>>,
    nodes: RefCell<Nodes>,
    failed: Cell<bool>,
    finalized: Cell<bool>,
    next_sequence: Cell<Option<u64>>,
    in_flight: RefCell<HashSet<String>>,
}

/// A node in the scope tree
#[derive(Clone)]
pub struct Scope {
    inner: Rc<ScopeInner>,
}

impl Scope {
    pub(crate) fn root(name: &str, phase: Phase, engine: Rc<EngineShared>) -> Result<Self> {
        let path = vec![name.to_string()];
        let store = engine.backend.scoped(&path)?;
        Ok(Self::build(name, path, None, false, phase, store, engine))
    }

    fn build(
        name: &str,
        path: Vec<String>,
        parent: Option<Weak<ScopeInner>>,
        owned: bool,
        phase: Phase,
        store: Rc<dyn StateStore>,
        engine: Rc<EngineShared>,
    ) -> Self {
        Self {
            inner: Rc::new(ScopeInner {
                name: name.to_string(),
                path,
                parent,
                owned,
                phase,
                store,
                engine,
                children: RefCell::new(Vec::new()),
                nodes: RefCell::new(Nodes::default()),
                failed: Cell::new(false),
                finalized: Cell::new(false),
                next_sequence: Cell::new(None),
                in_flight: RefCell::new(HashSet::new()),
            }),
        }
    }

    pub(crate) fn upgrade(weak: &Weak<ScopeInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub(crate) fn downgrade(&self) -> Weak<ScopeInner> {
        Rc::downgrade(&self.inner)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Segments from the root, the root's name first
    pub fn path(&self) -> &[String] {
        &self.inner.path
    }

    pub fn path_string(&self) -> String {
        self.inner.path.join("/")
    }

    pub fn phase(&self) -> Phase {
        self.inner.phase
    }

    pub fn is_root(&self) -> bool {
        self.inner.parent.is_none()
    }

    pub fn parent(&self) -> Option<Self> {
        self.inner.parent.as_ref().and_then(Self::upgrade)
    }

    pub(crate) fn fqn_for(&self, id: &str) -> String {
        format!("{}/{id}", self.path_string())
    }

    pub(crate) fn store(&self) -> Rc<dyn StateStore> {
        Rc::clone(&self.inner.store)
    }

    pub(crate) fn engine(&self) -> &EngineShared {
        &self.inner.engine
    }

    /// The group scope `name`, created on first use
    ///
    /// Fails when a resource with the same id is declared or stored in
    /// this scope, since its nested scope would live under that name.
    pub fn child(&self, name: &str) -> Result<Self> {
        if let Some(existing) = self.find_child(name) {
            if existing.inner.owned {
                return Err(self.conflict(name));
            }
            return Ok(existing);
        }
        if self.inner.nodes.borrow().by_id.contains_key(name)
            || self.inner.store.get(name)?.is_some()
        {
            return Err(self.conflict(name));
        }
        self.add_child(name, false)
    }

    /// The nested scope owned by resource `id`
    pub(crate) fn nested(&self, id: &str) -> Result<Self> {
        if let Some(existing) = self.find_child(id) {
            if !existing.inner.owned {
                return Err(self.conflict(id));
            }
            return Ok(existing);
        }
        self.add_child(id, true)
    }

    fn find_child(&self, name: &str) -> Option<Self> {
        self.inner
            .children
            .borrow()
            .iter()
            .find(|c| c.name() == name)
            .cloned()
    }

    fn add_child(&self, name: &str, owned: bool) -> Result<Self> {
        let mut path = self.inner.path.clone();
        path.push(name.to_string());
        let store = self.inner.engine.backend.scoped(&path)?;
        let child = Self::build(
            name,
            path,
            Some(self.downgrade()),
            owned,
            self.inner.phase,
            store,
            Rc::clone(&self.inner.engine),
        );
        self.inner.children.borrow_mut().push(child.clone());
        Ok(child)
    }

    fn conflict(&self, name: &str) -> Error {
        Error::ScopeConflict {
            path: self.path_string(),
            name: name.to_string(),
        }
    }

    /// Run `f` with this scope as the declaration context
    pub fn run<T>(&self, f: impl FnOnce(&Self) -> T) -> T {
        f(self)
    }

    /// Run `f` inside the child scope `name`
    pub fn group<T>(&self, name: &str, f: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        self.child(name)?.run(f)
    }

    /// Child scopes in creation order
    pub fn children(&self) -> Vec<Self> {
        self.inner.children.borrow().clone()
    }

    /// Declare a resource of `kind`
    ///
    /// Nothing is applied yet. The resource applies when its output is
    /// read or when the root scope finalizes.
    pub fn declare(&self, kind: &str, id: &str, props: impl Into<Input>) -> Result<Resource> {
        let provider = self
            .inner
            .engine
            .registry
            .get(kind)
            .ok_or_else(|| Error::MissingProvider {
                kind: kind.to_string(),
                fqn: self.fqn_for(id),
            })?;
        if self.find_child(id).is_some_and(|child| !child.inner.owned) {
            return Err(self.conflict(id));
        }

        let sequence = self.next_sequence()?;
        let node = Node::new(self, id, sequence, provider, props.into());

        let previous = {
            let mut nodes = self.inner.nodes.borrow_mut();
            let previous = nodes.by_id.insert(id.to_string(), Rc::clone(&node));
            if previous.is_none() {
                nodes.order.push(id.to_string());
            }
            previous
        };
        if let Some(previous) = previous {
            log::warn!(
                "{} declared more than once; the later declaration wins",
                node.fqn
            );
            previous.supersede(&node);
        }

        log::trace!("Declared {} ({kind}, sequence {sequence})", node.fqn);
        Ok(Resource::new(node))
    }

    /// Look up the current declaration of `id`
    pub fn resource(&self, id: &str) -> Option<Resource> {
        self.inner
            .nodes
            .borrow()
            .by_id
            .get(id)
            .map(|node| Resource::new(Rc::clone(node)))
    }

    /// Drop the declaration of `id` so finalize no longer treats it as live
    pub(crate) fn forget(&self, id: &str) {
        let mut nodes = self.inner.nodes.borrow_mut();
        if nodes.by_id.remove(id).is_some() {
            nodes.order.retain(|declared| declared != id);
        }
    }

    /// Ids declared in this scope, in declaration order
    pub fn node_ids(&self) -> Vec<String> {
        self.inner.nodes.borrow().order.clone()
    }

    /// Sequence numbers continue after the highest one already stored
    fn next_sequence(&self) -> Result<u64> {
        let next = match self.inner.next_sequence.get() {
            Some(next) => next,
            None => self
                .inner
                .store
                .all()?
                .values()
                .map(|record| record.sequence + 1)
                .max()
                .unwrap_or(0),
        };
        self.inner.next_sequence.set(Some(next + 1));
        Ok(next)
    }

    /// Mark this scope and every ancestor failed
    pub fn fail(&self) {
        let mut current = Some(self.clone());
        while let Some(scope) = current {
            scope.inner.failed.set(true);
            current = scope.parent();
        }
    }

    pub fn is_failed(&self) -> bool {
        self.inner.failed.get()
    }

    /// Whether this scope or any ancestor has failed
    pub(crate) fn is_blocked(&self) -> bool {
        let mut current = Some(self.clone());
        while let Some(scope) = current {
            if scope.is_failed() {
                return true;
            }
            current = scope.parent();
        }
        false
    }

    /// Apply every declared node that has not applied yet
    ///
    /// Stops at the first failure.
    pub fn flush(&self) -> Result<()> {
        loop {
            let pending: Vec<Resource> = {
                let nodes = self.inner.nodes.borrow();
                nodes
                    .order
                    .iter()
                    .filter_map(|id| nodes.by_id.get(id))
                    .filter(|node| node.is_pending())
                    .map(|node| Resource::new(Rc::clone(node)))
                    .collect()
            };
            if pending.is_empty() {
                return Ok(());
            }
            for resource in pending {
                resource.value()?;
            }
        }
    }

    /// Finish the run
    ///
    /// Applies whatever is still pending, then walks the tree children
    /// first. In the up phase, records that were not declared again are
    /// destroyed and pending replacements are deleted; in the destroy
    /// phase every record is destroyed. Only acts on the root; once a
    /// finalize succeeds, later calls do nothing.
    pub fn finalize(&self) -> Result<()> {
        if !self.is_root() {
            log::trace!("Skipping finalize of nested scope {}", self.path_string());
            return Ok(());
        }
        if self.inner.finalized.get() {
            return Ok(());
        }
        log::debug!("Finalizing {} ({})", self.path_string(), self.phase());
        self.finalize_tree()?;
        self.inner.finalized.set(true);
        Ok(())
    }

    fn finalize_tree(&self) -> Result<()> {
        self.flush()?;
        if self.is_failed() {
            return Err(Error::ScopeFailed {
                path: self.path_string(),
            });
        }

        for child in self.children() {
            child.finalize_tree()?;
        }

        match self.phase() {
            Phase::Up => {
                destroy::destroy_orphans(self)?;
                destroy::process_replacements(self)
            }
            Phase::Destroy => destroy::destroy_records(self),
            Phase::Read => Ok(()),
        }
    }

    /// Guard against a second apply of `id` while one is running
    pub(crate) fn enter(&self, id: &str, fqn: &str) -> Result<InFlight<'_>> {
        if !self.inner.in_flight.borrow_mut().insert(id.to_string()) {
            return Err(Error::InFlight {
                fqn: fqn.to_string(),
            });
        }
        Ok(InFlight {
            scope: self,
            id: id.to_string(),
        })
    }
}

/// Clears the in-flight mark on drop
pub(crate) struct InFlight<'a> {
    scope: &'a Scope,
    id: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.scope.inner.in_flight.borrow_mut().remove(&self.id);
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("path", &self.inner.path)
            .field("phase", &self.inner.phase)
            .field("failed", &self.inner.failed.get())
            .field("nodes", &self.node_ids())
            .finish()
    }
}
