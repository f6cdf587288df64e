//! # Declarative
//!
//! A framework for declarative resource reconciliation.
//!
//! User code declares resources inside a tree of scopes. The engine
//! compares each declaration with the record it persisted last time,
//! invokes the provider's create, update or delete body only when
//! something changed, and stores the result so repeated runs are
//! idempotent.
//!
//! ## Core Concepts
//!
//! - **Scope**: a node of the declaration tree with its own path-scoped
//!   view of the state store
//! - **Provider**: the create/update/delete body for one resource kind,
//!   registered on a [`Registry`]
//! - **Resource**: handle returned by [`Scope::declare`]; its output is a
//!   [`Deferred`] value
//! - **Deferred**: a lazy reference to an output. Reading it applies the
//!   producing resource first, which is how dependencies are ordered
//! - **StateBackend**: where records live ([`MemoryBackend`],
//!   [`FileSystemBackend`], [`SqliteBackend`])
//!
//! ## Example
//!
//! ```no_run
//! use declarative::{Engine, Input, MemoryBackend, Phase, ProviderOptions, Registry};
//! use serde_json::json;
//!
//! let mut registry = Registry::new();
//! registry.define("bucket", ProviderOptions::default(), |ctx, input| {
//!     match ctx.event() {
//!         declarative::Event::Delete => Ok(None),
//!         _ => Ok(Some(json!({ "arn": format!("arn:bucket:{}", input["name"]) }))),
//!     }
//! })?;
//! registry.define("site", ProviderOptions::default(), |_, input| Ok(Some(input.clone())))?;
//!
//! let engine = Engine::builder(registry, MemoryBackend::new()).build();
//! let root = engine.root("app", Phase::Up)?;
//!
//! let bucket = root.declare("bucket", "assets", Input::object().with("name", "assets"))?;
//! root.declare("site", "www", Input::object().with("bucket", bucket.get("arn")))?;
//!
//! root.finalize()?;
//! println!("{} change(s)", engine.summary().total_changes());
//! # Ok::<(), declarative::Error>(())
//! ```
//!
//! ## Phases
//!
//! - [`Phase::Up`]: apply declarations, then destroy records that were
//!   not declared again
//! - [`Phase::Read`]: return stored outputs without side effects
//! - [`Phase::Destroy`]: tear everything down, children before parents

pub mod context;
pub mod deferred;
pub mod destroy;
pub mod diff;
pub mod engine;
pub mod error;
mod executor;
pub mod input;
pub mod provider;
pub mod resource;
pub mod scope;
pub mod store;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export main types at crate root
pub use context::{HandlerContext, NoProgress, ProgressCallback};
pub use deferred::Deferred;
pub use destroy::{destroy_resource, destroy_scope};
pub use diff::{canonical_json, display_json, props_unchanged, reveal_secrets};
pub use engine::{Engine, EngineBuilder};
pub use error::{BoxError, Error, Result};
pub use input::Input;
pub use provider::{
    FieldType, Handler, Provider, ProviderDefinition, ProviderOptions, Registry, Schema,
};
pub use resource::Resource;
pub use scope::Scope;
pub use store::{FileSystemBackend, MemoryBackend, SqliteBackend, StateBackend, StateStore};
pub use types::{
    Event, Outcome, Phase, ReplacedInstance, ResourceRecord, RunSummary, Status,
};
