//! Deferred values - lazy references to a resource's eventual output
//!
//! A [`Deferred`] is either a root slot (`Pending` → `Resolved` or
//! `Failed`) or a projection of another deferred. Projections never
//! block: `get`, `index` and `map` return a new handle immediately and
//! the projection runs when the value is actually read.
//!
//! Reading a pending root asks its producer to apply. That is the only
//! suspension point: a dependent waits for a producer by pulling it.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

/// Something that can bring a pending deferred to resolution
pub(crate) trait Force {
    fn force(&self) -> Result<()>;
}

type Subscriber = Box<dyn FnOnce(&Value)>;

enum Slot {
    Pending(Vec<Subscriber>),
    Resolved(Value),
    /// Producer failed; holds the producer's name
    Failed(String),
}

#[derive(Clone)]
enum Projection {
    Field(String),
    Index(usize),
    Map(Rc<dyn Fn(&Value) -> Value>),
}

impl Projection {
    fn apply(&self, value: &Value) -> Value {
        match self {
            Self::Field(name) => value.get(name).cloned().unwrap_or(Value::Null),
            Self::Index(i) => value.get(i).cloned().unwrap_or(Value::Null),
            Self::Map(f) => f(value),
        }
    }
}

enum Origin {
    Root {
        slot: RefCell<Slot>,
        producer: Option<Weak<dyn Force>>,
    },
    Projected {
        parent: Deferred,
        projection: Projection,
    },
}

/// A lazily resolved JSON value
#[derive(Clone)]
pub struct Deferred {
    inner: Rc<Origin>,
}

impl Deferred {
    /// A pending value with no producer; someone must call [`Deferred::resolve`]
    pub fn pending() -> Self {
        Self::root(Slot::Pending(Vec::new()), None)
    }

    /// An already-resolved value
    pub fn resolved(value: Value) -> Self {
        Self::root(Slot::Resolved(value), None)
    }

    pub(crate) fn produced_by(producer: Weak<dyn Force>) -> Self {
        Self::root(Slot::Pending(Vec::new()), Some(producer))
    }

    fn root(slot: Slot, producer: Option<Weak<dyn Force>>) -> Self {
        Self {
            inner: Rc::new(Origin::Root {
                slot: RefCell::new(slot),
                producer,
            }),
        }
    }

    fn project(&self, projection: Projection) -> Self {
        Self {
            inner: Rc::new(Origin::Projected {
                parent: self.clone(),
                projection,
            }),
        }
    }

    /// Project a field of the eventual value (`null` if absent)
    pub fn get(&self, field: &str) -> Self {
        self.project(Projection::Field(field.to_string()))
    }

    /// Project an array element of the eventual value (`null` if absent)
    pub fn index(&self, index: usize) -> Self {
        self.project(Projection::Index(index))
    }

    /// Project the eventual value through an arbitrary function
    pub fn map<F>(&self, f: F) -> Self
    where
        F: Fn(&Value) -> Value + 'static,
    {
        self.project(Projection::Map(Rc::new(f)))
    }

    /// Follow a dotted path such as `"endpoint.host"`
    pub fn path(&self, dotted: &str) -> Self {
        dotted
            .split('.')
            .filter(|s| !s.is_empty())
            .fold(self.clone(), |acc, segment| match segment.parse::<usize>() {
                Ok(i) => acc.index(i),
                Err(_) => acc.get(segment),
            })
    }

    /// Resolve a root value
    ///
    /// Subscribers registered so far fire in registration order, after
    /// the value is stored. Resolving a second time is an error.
    pub fn resolve(&self, value: Value) -> Result<()> {
        let Origin::Root { slot, .. } = self.inner.as_ref() else {
            return Err(Error::AlreadyResolved);
        };

        let subscribers = {
            let mut slot = slot.borrow_mut();
            match &mut *slot {
                Slot::Pending(subs) => {
                    let subs = std::mem::take(subs);
                    *slot = Slot::Resolved(value.clone());
                    subs
                }
                Slot::Resolved(_) | Slot::Failed(_) => return Err(Error::AlreadyResolved),
            }
        };

        for subscriber in subscribers {
            subscriber(&value);
        }
        Ok(())
    }

    /// Mark a pending root as failed; pending subscribers are dropped
    pub(crate) fn fail(&self, producer: &str) {
        if let Origin::Root { slot, .. } = self.inner.as_ref() {
            let mut slot = slot.borrow_mut();
            if matches!(*slot, Slot::Pending(_)) {
                *slot = Slot::Failed(producer.to_string());
            }
        }
    }

    /// Register a callback for the resolved value
    ///
    /// Fires immediately if already resolved, never if the producer failed.
    pub fn on_resolved<F>(&self, f: F)
    where
        F: FnOnce(&Value) + 'static,
    {
        self.subscribe(Box::new(f));
    }

    // Boxed so projections chain without instantiating a closure type per level
    fn subscribe(&self, f: Subscriber) {
        match self.inner.as_ref() {
            Origin::Root { slot, .. } => {
                let resolved = {
                    let mut slot = slot.borrow_mut();
                    match &mut *slot {
                        Slot::Pending(subs) => {
                            subs.push(f);
                            return;
                        }
                        Slot::Resolved(value) => value.clone(),
                        Slot::Failed(_) => return,
                    }
                };
                f(&resolved);
            }
            Origin::Projected { parent, projection } => {
                let projection = projection.clone();
                parent.subscribe(Box::new(move |value| f(&projection.apply(value))));
            }
        }
    }

    /// The value if it is available without applying anything
    pub fn peek(&self) -> Option<Value> {
        match self.inner.as_ref() {
            Origin::Root { slot, .. } => match &*slot.borrow() {
                Slot::Resolved(value) => Some(value.clone()),
                _ => None,
            },
            Origin::Projected { parent, projection } => {
                parent.peek().map(|v| projection.apply(&v))
            }
        }
    }

    /// Check if the value is available
    pub fn is_resolved(&self) -> bool {
        match self.inner.as_ref() {
            Origin::Root { slot, .. } => matches!(*slot.borrow(), Slot::Resolved(_)),
            Origin::Projected { parent, .. } => parent.is_resolved(),
        }
    }

    /// Read the value, applying its producer first if needed
    pub fn value(&self) -> Result<Value> {
        match self.inner.as_ref() {
            Origin::Root { slot, producer } => {
                if let Some(value) = Self::settled(slot)? {
                    return Ok(value);
                }
                let producer = producer
                    .as_ref()
                    .and_then(Weak::upgrade)
                    .ok_or(Error::Unresolved)?;
                producer.force()?;
                Self::settled(slot)?.ok_or(Error::Unresolved)
            }
            Origin::Projected { parent, projection } => {
                parent.value().map(|v| projection.apply(&v))
            }
        }
    }

    fn settled(slot: &RefCell<Slot>) -> Result<Option<Value>> {
        match &*slot.borrow() {
            Slot::Resolved(value) => Ok(Some(value.clone())),
            Slot::Failed(producer) => Err(Error::DependencyFailed {
                fqn: producer.clone(),
            }),
            Slot::Pending(_) => Ok(None),
        }
    }

    /// Read and deserialize the value
    pub fn value_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.value()?)?)
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.peek() {
            Some(value) => f.debug_tuple("Deferred::Resolved").field(&value).finish(),
            None => f.write_str("Deferred::Pending"),
        }
    }
}

impl From<Value> for Deferred {
    fn from(value: Value) -> Self {
        Self::resolved(value)
    }
}
