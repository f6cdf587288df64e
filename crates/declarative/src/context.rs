//! Handler context and progress callbacks
//!
//! [`HandlerContext`] is what a provider sees while its create, update
//! or delete body runs. [`ProgressCallback`] lets the driver observe a
//! run without the engine depending on any UI.

use crate::diff::reveal_secrets;
use crate::error::{Error, Result};
use crate::scope::Scope;
use crate::store::StateStore;
use crate::types::{Event, Outcome, ResourceRecord};
use serde_json::Value;
use std::collections::BTreeSet;

/// Progress callback for reconciliation
///
/// Every method has a no-op default so implementors pick what they need.
pub trait ProgressCallback {
    /// Called before a handler is invoked
    fn on_resource_start(&mut self, _fqn: &str, _event: Event) {}

    /// Called before an update, with the last applied props and the new ones
    fn on_props_changed(&mut self, _fqn: &str, _old: Option<&Value>, _new: &Value) {}

    /// Called once a resource settles, is skipped, or fails
    fn on_resource_complete(&mut self, _fqn: &str, _outcome: &Outcome) {}
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {}

/// Context passed to provider handlers
pub struct HandlerContext<'a> {
    event: Event,
    scope: &'a Scope,
    store: &'a dyn StateStore,
    record: ResourceRecord,
    prior_props: Option<Value>,
    replaced: bool,
    replace_refused: Option<usize>,
    /// Whether scratch writes are persisted under the record's id
    persist: bool,
}

impl<'a> HandlerContext<'a> {
    pub(crate) fn new(
        event: Event,
        scope: &'a Scope,
        store: &'a dyn StateStore,
        record: ResourceRecord,
        prior_props: Option<Value>,
    ) -> Self {
        Self {
            event,
            scope,
            store,
            record,
            prior_props,
            replaced: false,
            replace_refused: None,
            persist: true,
        }
    }

    /// A context whose scratch writes stay in memory
    ///
    /// Used for instances that no longer own the record's id, such as
    /// one superseded by `replace()`.
    pub(crate) fn detached(
        event: Event,
        scope: &'a Scope,
        store: &'a dyn StateStore,
        record: ResourceRecord,
        prior_props: Option<Value>,
    ) -> Self {
        Self {
            persist: false,
            ..Self::new(event, scope, store, record, prior_props)
        }
    }

    pub fn event(&self) -> Event {
        self.event
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn kind(&self) -> &str {
        &self.record.kind
    }

    pub fn fqn(&self) -> &str {
        &self.record.fqn
    }

    /// Output of the last successful create or update
    pub fn prior_output(&self) -> Option<&Value> {
        self.record.output.as_ref()
    }

    /// Props of the last successful apply, with secrets revealed
    pub fn prior_props(&self) -> Option<Value> {
        self.prior_props.as_ref().map(reveal_secrets)
    }

    /// The resource's own nested scope
    ///
    /// Resources declared here are children of this resource: they are
    /// applied before it settles and destroyed before it is.
    pub fn scope(&self) -> &Scope {
        self.scope
    }

    /// Request replacement of the existing instance
    ///
    /// The handler is expected to build a fresh instance and return its
    /// output; the superseded one is deleted when the root scope
    /// finalizes. A no-op on create. Refused while the resource owns
    /// children, declared this run or recorded in its nested scope.
    pub fn replace(&mut self) -> Result<()> {
        if self.event != Event::Update {
            return Ok(());
        }

        let mut children: BTreeSet<String> = self.scope.node_ids().into_iter().collect();
        children.extend(self.scope.store().list()?);
        if !children.is_empty() {
            self.replace_refused = Some(children.len());
            return Err(Error::ReplaceWithChildren {
                fqn: self.record.fqn.clone(),
                children: children.len(),
            });
        }

        log::debug!("{} will be replaced", self.record.fqn);
        self.replaced = true;
        Ok(())
    }

    /// Read a scratch value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.record.data.get(key)
    }

    /// Write a scratch value; persisted immediately
    pub fn set(&mut self, key: &str, value: Value) -> Result<()> {
        self.record.data.insert(key.to_string(), value);
        if !self.persist {
            return Ok(());
        }
        self.store.set(&self.record.id, &self.record)
    }

    /// Remove a scratch value; persisted immediately
    pub fn delete(&mut self, key: &str) -> Result<Option<Value>> {
        let removed = self.record.data.remove(key);
        if removed.is_some() && self.persist {
            self.store.set(&self.record.id, &self.record)?;
        }
        Ok(removed)
    }

    pub(crate) fn replaced(&self) -> bool {
        self.replaced
    }

    /// Number of children that blocked a `replace()` call, if one was refused
    pub(crate) fn replace_refused(&self) -> Option<usize> {
        self.replace_refused
    }

    pub(crate) fn into_record(self) -> ResourceRecord {
        self.record
    }
}
