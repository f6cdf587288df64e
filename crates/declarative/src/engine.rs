//! Engine - the driver-facing entry point
//!
//! An [`Engine`] bundles the provider registry, the state backend and a
//! progress reporter. Each call to [`Engine::root`] opens a fresh scope
//! tree for one run.

use crate::context::{NoProgress, ProgressCallback};
use crate::error::Result;
use crate::provider::Registry;
use crate::scope::Scope;
use crate::store::StateBackend;
use crate::types::{Event, Outcome, Phase, RunSummary};
use serde_json::Value;
use std::cell::RefCell;
use std::rc::Rc;

/// State shared by every scope of a tree
pub(crate) struct EngineShared {
    pub(crate) registry: Registry,
    pub(crate) backend: Box<dyn StateBackend>,
    reporter: RefCell<Box<dyn ProgressCallback>>,
    summary: RefCell<RunSummary>,
    quiet: bool,
}

impl EngineShared {
    pub(crate) fn report_start(&self, fqn: &str, event: Event) {
        log::info!("{event} {fqn}");
        if !self.quiet {
            self.reporter.borrow_mut().on_resource_start(fqn, event);
        }
    }

    pub(crate) fn report_props_changed(&self, fqn: &str, old: Option<&Value>, new: &Value) {
        if !self.quiet {
            self.reporter.borrow_mut().on_props_changed(fqn, old, new);
        }
    }

    pub(crate) fn report_complete(&self, fqn: &str, outcome: &Outcome) {
        match outcome {
            Outcome::Failed { error } => log::debug!("{fqn} failed: {error}"),
            other => log::debug!("{fqn}: {other:?}"),
        }
        self.summary.borrow_mut().add(outcome);
        if !self.quiet {
            self.reporter.borrow_mut().on_resource_complete(fqn, outcome);
        }
    }
}

/// Reconciliation engine
#[derive(Clone)]
pub struct Engine {
    shared: Rc<EngineShared>,
}

impl Engine {
    pub fn builder(registry: Registry, backend: impl StateBackend + 'static) -> EngineBuilder {
        EngineBuilder {
            registry,
            backend: Box::new(backend),
            reporter: None,
            quiet: false,
        }
    }

    /// Open the root scope of a run
    pub fn root(&self, name: &str, phase: Phase) -> Result<Scope> {
        log::debug!(
            "Opening root scope '{name}' ({phase}) on {} state",
            self.shared.backend.name()
        );
        Scope::root(name, phase, Rc::clone(&self.shared))
    }

    /// Outcome counts accumulated so far
    pub fn summary(&self) -> RunSummary {
        self.shared.summary.borrow().clone()
    }
}

/// Builder for [`Engine`]
pub struct EngineBuilder {
    registry: Registry,
    backend: Box<dyn StateBackend>,
    reporter: Option<Box<dyn ProgressCallback>>,
    quiet: bool,
}

impl EngineBuilder {
    pub fn reporter(mut self, reporter: impl ProgressCallback + 'static) -> Self {
        self.reporter = Some(Box::new(reporter));
        self
    }

    /// Suppress progress reporting; logging is unaffected
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn build(self) -> Engine {
        let reporter = self
            .reporter
            .unwrap_or_else(|| Box::new(NoProgress));
        Engine {
            shared: Rc::new(EngineShared {
                registry: self.registry,
                backend: self.backend,
                reporter: RefCell::new(reporter),
                summary: RefCell::new(RunSummary::default()),
                quiet: self.quiet,
            }),
        }
    }
}
