//! Declared resources
//!
//! Declaring a resource registers a [`Node`] in its scope and hands the
//! caller a [`Resource`]. Identity fields are available at once; the
//! output is a [`Deferred`] whose producer is the node itself.

use crate::deferred::{Deferred, Force};
use crate::error::{Error, Result};
use crate::executor;
use crate::input::Input;
use crate::provider::ProviderDefinition;
use crate::scope::{Scope, ScopeInner};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeState {
    Declared,
    Applying,
    Applied,
    Failed,
}

pub(crate) struct Node {
    pub(crate) id: String,
    pub(crate) kind: String,
    pub(crate) fqn: String,
    pub(crate) sequence: u64,
    pub(crate) provider: Rc<ProviderDefinition>,
    pub(crate) props: Input,
    pub(crate) output: Deferred,
    scope: Weak<ScopeInner>,
    state: Cell<NodeState>,
    /// A later declaration of the same id, which applies in our place
    superseded_by: RefCell<Option<Rc<Node>>>,
}

impl Node {
    pub(crate) fn new(
        scope: &Scope,
        id: &str,
        sequence: u64,
        provider: Rc<ProviderDefinition>,
        props: Input,
    ) -> Rc<Self> {
        Rc::new_cyclic(|weak: &Weak<Self>| {
            let producer: Weak<dyn Force> = weak.clone();
            Self {
                id: id.to_string(),
                kind: provider.kind.clone(),
                fqn: scope.fqn_for(id),
                sequence,
                provider,
                props,
                output: Deferred::produced_by(producer),
                scope: scope.downgrade(),
                state: Cell::new(NodeState::Declared),
                superseded_by: RefCell::new(None),
            }
        })
    }

    /// The scope this node was declared in, if the tree is still alive
    pub(crate) fn scope(&self) -> Result<Scope> {
        Scope::upgrade(&self.scope).ok_or_else(|| Error::NoScope(self.fqn.clone()))
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.state.get() == NodeState::Declared && self.superseded_by.borrow().is_none()
    }

    /// Hand this node's work to a newer declaration of the same id
    pub(crate) fn supersede(&self, next: &Rc<Self>) {
        if self.state.get() != NodeState::Declared {
            return;
        }
        let output = self.output.clone();
        let fqn = self.fqn.clone();
        next.output.on_resolved(move |value| {
            if let Err(err) = output.resolve(value.clone()) {
                log::debug!("Superseded declaration of {fqn} not forwarded: {err}");
            }
        });
        *self.superseded_by.borrow_mut() = Some(Rc::clone(next));
    }
}

impl Force for Node {
    fn force(&self) -> Result<()> {
        let next = self.superseded_by.borrow().clone();
        if let Some(next) = next {
            return next.force();
        }

        match self.state.get() {
            NodeState::Applied => Ok(()),
            NodeState::Failed => Err(Error::DependencyFailed {
                fqn: self.fqn.clone(),
            }),
            NodeState::Applying => Err(Error::DependencyCycle {
                fqn: self.fqn.clone(),
            }),
            NodeState::Declared => {
                self.state.set(NodeState::Applying);
                let result = executor::apply(self);
                self.state.set(if result.is_ok() {
                    NodeState::Applied
                } else {
                    NodeState::Failed
                });
                result
            }
        }
    }
}

/// Handle to a declared resource
#[derive(Clone)]
pub struct Resource {
    node: Rc<Node>,
}

impl Resource {
    pub(crate) fn new(node: Rc<Node>) -> Self {
        Self { node }
    }

    pub fn id(&self) -> &str {
        &self.node.id
    }

    pub fn kind(&self) -> &str {
        &self.node.kind
    }

    /// Scope path and id joined with `/`
    pub fn fqn(&self) -> &str {
        &self.node.fqn
    }

    /// Declaration order within the owning scope
    pub fn sequence(&self) -> u64 {
        self.node.sequence
    }

    /// The owning scope; fails once the scope tree has been dropped
    pub fn scope(&self) -> Result<Scope> {
        self.node.scope()
    }

    /// The eventual output
    pub fn output(&self) -> Deferred {
        self.node.output.clone()
    }

    /// A field of the eventual output
    pub fn get(&self, field: &str) -> Deferred {
        self.node.output.get(field)
    }

    /// Apply the resource if needed and return its output
    pub fn value(&self) -> Result<Value> {
        self.node.output.value()
    }

    pub fn value_as<T: DeserializeOwned>(&self) -> Result<T> {
        self.node.output.value_as()
    }

    pub(crate) fn node(&self) -> &Rc<Node> {
        &self.node
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("fqn", &self.node.fqn)
            .field("kind", &self.node.kind)
            .field("sequence", &self.node.sequence)
            .field("state", &self.node.state.get())
            .field("output", &self.node.output)
            .finish()
    }
}

impl From<&Resource> for Input {
    fn from(resource: &Resource) -> Self {
        Self::Deferred(resource.output())
    }
}
