//! Test support: recording providers over an in-memory engine

use crate::context::HandlerContext;
use crate::engine::Engine;
use crate::error::Result;
use crate::input::Input;
use crate::provider::{Handler, ProviderDefinition, Registry};
use crate::scope::Scope;
use crate::store::MemoryBackend;
use crate::types::{Event, Phase, RunSummary};
use serde_json::{Value, json};
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Clone)]
pub(crate) struct Call {
    pub event: Event,
    pub fqn: String,
    pub input: Value,
    pub prior_output: Option<Value>,
}

/// Shared log of handler invocations, with optional injected failures
#[derive(Clone, Default)]
pub(crate) struct Calls {
    log: Rc<RefCell<Vec<Call>>>,
    failure: Rc<RefCell<Option<(Option<Event>, String)>>>,
}

impl Calls {
    /// Fail any invocation whose input mentions `needle`
    pub fn fail_on(&self, needle: &str) {
        *self.failure.borrow_mut() = Some((None, needle.to_string()));
    }

    pub fn fail_on_event(&self, event: Event, needle: &str) {
        *self.failure.borrow_mut() = Some((Some(event), needle.to_string()));
    }

    pub fn clear_failures(&self) {
        *self.failure.borrow_mut() = None;
    }

    pub fn count(&self) -> usize {
        self.log.borrow().len()
    }

    pub fn all(&self) -> Vec<Call> {
        self.log.borrow().clone()
    }

    pub fn last(&self) -> Option<Call> {
        self.log.borrow().last().cloned()
    }

    fn record(&self, ctx: &HandlerContext<'_>, input: &Value) -> anyhow::Result<()> {
        self.log.borrow_mut().push(Call {
            event: ctx.event(),
            fqn: ctx.fqn().to_string(),
            input: input.clone(),
            prior_output: ctx.prior_output().cloned(),
        });

        if let Some((event, needle)) = &*self.failure.borrow() {
            let event_matches = event.is_none_or(|e| e == ctx.event());
            if event_matches && input.to_string().contains(needle.as_str()) {
                anyhow::bail!("injected failure for {}", ctx.fqn());
            }
        }
        Ok(())
    }
}

/// Echoes its input as output
pub(crate) struct RecordingHandler(pub Calls);

impl Handler for RecordingHandler {
    fn handle(&self, ctx: &mut HandlerContext<'_>, input: &Value) -> anyhow::Result<Option<Value>> {
        self.0.record(ctx, input)?;
        match ctx.event() {
            Event::Delete => Ok(None),
            Event::Create | Event::Update => Ok(Some(input.clone())),
        }
    }
}

/// Declares `pages` nested `file` resources; calls `replace()` when asked
pub(crate) struct ParentHandler(pub Calls);

impl Handler for ParentHandler {
    fn handle(&self, ctx: &mut HandlerContext<'_>, input: &Value) -> anyhow::Result<Option<Value>> {
        self.0.record(ctx, input)?;
        if ctx.event() == Event::Delete {
            return Ok(None);
        }

        if input["replace"].as_bool().unwrap_or(false) {
            ctx.replace()?;
        }

        let pages = input["pages"].as_i64().unwrap_or(0);
        for page in 0..pages {
            ctx.scope().declare(
                "file",
                &format!("page-{page}"),
                Input::object().with("page", page),
            )?;
        }
        Ok(Some(json!({ "children": pages })))
    }
}

/// Engine over a shared in-memory backend
pub(crate) struct TestEngine {
    pub engine: Engine,
    pub backend: MemoryBackend,
    pub calls: Calls,
}

impl TestEngine {
    /// Registers `file` (recording) and `parent` (nested pages)
    pub fn new() -> Self {
        let calls = Calls::default();
        let mut registry = Registry::new();
        registry
            .register_definition(ProviderDefinition::new("file", RecordingHandler(calls.clone())))
            .unwrap();
        registry
            .register_definition(ProviderDefinition::new("parent", ParentHandler(calls.clone())))
            .unwrap();
        Self::with_registry(registry, calls)
    }

    pub fn with_registry(registry: Registry, calls: Calls) -> Self {
        let backend = MemoryBackend::new();
        let engine = Engine::builder(registry, backend.clone()).build();
        Self {
            engine,
            backend,
            calls,
        }
    }

    /// One up-phase run: declare, then finalize the root
    pub fn run(&self, f: impl FnOnce(&Scope) -> Result<()>) -> Result<()> {
        self.run_phase(Phase::Up, f)
    }

    pub fn run_phase(&self, phase: Phase, f: impl FnOnce(&Scope) -> Result<()>) -> Result<()> {
        let root = self.engine.root("app", phase)?;
        f(&root)?;
        root.finalize()
    }

    pub fn summary(&self) -> RunSummary {
        self.engine.summary()
    }
}
