//! Error types for the reconciliation engine

use crate::types::Event;
use thiserror::Error;

/// Boxed provider error carried by [`Error::Handler`]
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while declaring, applying or destroying resources
#[derive(Error, Debug)]
pub enum Error {
    /// A provider kind was registered twice
    #[error("provider kind '{0}' is already registered")]
    DuplicateKind(String),

    /// A resource was declared (or found in state) with an unknown kind
    #[error("no provider registered for kind '{kind}' (needed by {fqn})")]
    MissingProvider { kind: String, fqn: String },

    /// Read phase found no usable record
    #[error("cannot read {fqn}: {reason}")]
    InvalidPhase { fqn: String, reason: String },

    /// `replace()` was called on a resource that owns children
    #[error("{fqn} cannot be replaced while it owns {children} child resource(s)")]
    ReplaceWithChildren { fqn: String, children: usize },

    /// A provider's create/update/delete body failed
    #[error("{fqn} failed during {event}: {source}")]
    Handler {
        fqn: String,
        event: Event,
        #[source]
        source: BoxError,
    },

    /// A dependency failed earlier in this run
    #[error("dependency {fqn} failed earlier in this run")]
    DependencyFailed { fqn: String },

    /// A resource depends on itself through its inputs
    #[error("dependency cycle detected at {fqn}")]
    DependencyCycle { fqn: String },

    /// The owning scope (or one of its descendants) already failed
    #[error("scope '{path}' failed earlier in this run")]
    ScopeFailed { path: String },

    /// A group scope and a resource's own scope would share one namespace
    #[error("'{name}' in scope '{path}' is both a group and a resource")]
    ScopeConflict { path: String, name: String },

    /// A second apply of the same id started while the first was running
    #[error("{fqn} is already being reconciled")]
    InFlight { fqn: String },

    /// A deferred value was resolved twice
    #[error("deferred value is already resolved")]
    AlreadyResolved,

    /// A deferred value was read before anything could produce it
    #[error("deferred value is not resolved and has no producer")]
    Unresolved,

    /// A handle outlived the scope tree it was declared in
    #[error("no live scope for {0}")]
    NoScope(String),

    /// Input or output did not match the provider's schema
    #[error("{fqn}: {direction} does not match schema: {violations}")]
    Schema {
        fqn: String,
        direction: &'static str,
        violations: String,
    },

    /// Create/update returned nothing
    #[error("{fqn}: provider returned no output for {event}")]
    MissingOutput { fqn: String, event: Event },

    /// Filesystem error in a state backend
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record (de)serialization failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// SQLite state backend failure
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl Error {
    /// Wrap a provider error for the given resource
    pub fn handler(fqn: &str, event: Event, source: anyhow::Error) -> Self {
        Self::Handler {
            fqn: fqn.to_string(),
            event,
            source: source.into(),
        }
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_error_names_resource() {
        let err = Error::handler("app/a", Event::Update, anyhow::anyhow!("disk full"));
        assert_eq!(err.to_string(), "app/a failed during update: disk full");
        assert!(std::error::Error::source(&err).is_some());
    }
}
