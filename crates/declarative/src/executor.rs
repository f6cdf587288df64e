//! Reconciliation - applies one declared resource
//!
//! Called when a node's output is first read. Decides the lifecycle
//! event from the stored record, skips unchanged resources, invokes the
//! provider, applies nested declarations, then persists and resolves.

use crate::context::HandlerContext;
use crate::diff::{props_unchanged, reveal_secrets};
use crate::error::{Error, Result};
use crate::resource::Node;
use crate::scope::Scope;
use crate::types::{Event, Outcome, Phase, ReplacedInstance, ResourceRecord, Status};
use serde_json::Value;
use std::collections::BTreeMap;

/// Apply a node, failing its scope and output on error
pub(crate) fn apply(node: &Node) -> Result<()> {
    let scope = node.scope()?;
    match reconcile(&scope, node) {
        Ok(()) => Ok(()),
        Err(err) => {
            node.output.fail(&node.fqn);
            scope.fail();
            scope.engine().report_complete(
                &node.fqn,
                &Outcome::Failed {
                    error: err.to_string(),
                },
            );
            Err(err)
        }
    }
}

fn reconcile(scope: &Scope, node: &Node) -> Result<()> {
    if scope.is_blocked() {
        return Err(Error::ScopeFailed {
            path: scope.path_string(),
        });
    }
    let _guard = scope.enter(&node.id, &node.fqn)?;

    match scope.phase() {
        Phase::Read => read(scope, node),
        Phase::Destroy => {
            let stored = scope.store().get(&node.id)?;
            node.output
                .resolve(stored.and_then(|r| r.output).unwrap_or(Value::Null))
        }
        Phase::Up => up(scope, node),
    }
}

fn read(scope: &Scope, node: &Node) -> Result<()> {
    let record = scope
        .store()
        .get(&node.id)?
        .ok_or_else(|| Error::InvalidPhase {
            fqn: node.fqn.clone(),
            reason: "no stored state".to_string(),
        })?;

    if record.status == Status::Creating && record.output.is_none() {
        return Err(Error::InvalidPhase {
            fqn: node.fqn.clone(),
            reason: "resource was never created".to_string(),
        });
    }
    let output = record.output.unwrap_or(Value::Null);

    scope.engine().report_complete(&node.fqn, &Outcome::Read);
    node.output.resolve(output)
}

fn up(scope: &Scope, node: &Node) -> Result<()> {
    let engine = scope.engine();
    let store = scope.store();
    let provider = &node.provider;

    let props = node.props.resolve()?;

    let stored = store.get(&node.id)?;
    let existed = stored.is_some();
    let mut record = stored.unwrap_or_else(|| {
        ResourceRecord::new(&node.kind, &node.id, &node.fqn, node.sequence)
    });
    let event = if record.status == Status::Creating {
        Event::Create
    } else {
        Event::Update
    };

    if record.status.is_settled()
        && !provider.options.always_update
        && props_unchanged(record.props.as_ref(), &props)
    {
        log::debug!("{} unchanged, skipping", node.fqn);
        engine.report_complete(&node.fqn, &Outcome::Skipped);
        return node
            .output
            .resolve(record.output.unwrap_or(Value::Null));
    }

    let input = reveal_secrets(&props);
    if let Some(schema) = &provider.input_schema {
        schema.validate(&input).map_err(|violations| Error::Schema {
            fqn: node.fqn.clone(),
            direction: "input",
            violations: violations.join("; "),
        })?;
    }

    let prior = record.clone();
    let prior_props = if record.status.is_settled() {
        record.props.clone()
    } else {
        record.old_props.clone()
    };
    if record.status.is_settled() {
        record.old_props = record.props.take();
    }
    record.kind.clone_from(&node.kind);
    record.fqn.clone_from(&node.fqn);
    record.status = event.in_progress_status();
    record.props = Some(props.clone());
    store.set(&node.id, &record)?;

    engine.report_start(&node.fqn, event);
    if event == Event::Update {
        engine.report_props_changed(&node.fqn, prior_props.as_ref(), &props);
    }

    let child = scope.nested(&node.id)?;
    let mut ctx = HandlerContext::new(
        event,
        &child,
        store.as_ref(),
        record,
        prior_props.clone(),
    );
    let returned = provider.handler().handle(&mut ctx, &input);

    if let (Some(children), Err(_)) = (ctx.replace_refused(), &returned) {
        log::debug!("{}: replacement refused, restoring prior record", node.fqn);
        if existed {
            store.set(&node.id, &prior)?;
        } else {
            store.delete(&node.id)?;
        }
        return Err(Error::ReplaceWithChildren {
            fqn: node.fqn.clone(),
            children,
        });
    }

    let replaced = ctx.replaced();
    let mut record = ctx.into_record();
    let output = returned
        .map_err(|e| Error::handler(&node.fqn, event, e))?
        .ok_or_else(|| Error::MissingOutput {
            fqn: node.fqn.clone(),
            event,
        })?;

    // Nested declarations the handler did not consume
    child.flush()?;

    if replaced {
        if record.replace.is_some() {
            log::warn!(
                "{} already had a replacement pending; the older instance is no longer tracked",
                node.fqn
            );
        }
        record.replace = Some(ReplacedInstance {
            output: prior.output.clone(),
            props: prior_props,
            data: BTreeMap::new(),
        });
    }

    let checked = provider
        .output_schema
        .as_ref()
        .map_or(Ok(()), |schema| schema.validate(&output));
    if let Err(violations) = checked {
        // The instance exists now, so the next run updates it
        record.status = Status::Updating;
        record.output = Some(output);
        store.set(&node.id, &record)?;
        return Err(Error::Schema {
            fqn: node.fqn.clone(),
            direction: "output",
            violations: violations.join("; "),
        });
    }

    record.status = event.settled_status();
    record.output = Some(output.clone());
    store.set(&node.id, &record)?;

    let outcome = match event {
        Event::Create => Outcome::Created,
        _ => Outcome::Updated,
    };
    engine.report_complete(&node.fqn, &outcome);
    node.output.resolve(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::Input;
    use crate::provider::{FieldType, ProviderDefinition, ProviderOptions, Registry, Schema};
    use crate::store::MemoryBackend;
    use crate::testing::{Calls, RecordingHandler, TestEngine};
    use anyhow::Context as _;
    use serde_json::json;

    fn file_props(content: &str) -> Input {
        Input::object()
            .with("path", "/tmp/a.txt")
            .with("content", content)
    }

    #[test]
    fn test_apply_is_idempotent() {
        let env = TestEngine::new();

        env.run(|root| {
            root.declare("file", "a", file_props("hi"))?;
            Ok(())
        })
        .unwrap();
        env.run(|root| {
            root.declare("file", "a", file_props("hi"))?;
            Ok(())
        })
        .unwrap();

        assert_eq!(env.calls.count(), 1);
        let record = env.backend.record(&["app"], "a").unwrap();
        assert_eq!(record.status, Status::Created);
        assert_eq!(record.props, Some(json!({"path": "/tmp/a.txt", "content": "hi"})));

        env.run(|root| {
            root.declare("file", "a", file_props("bye"))?;
            Ok(())
        })
        .unwrap();

        assert_eq!(env.calls.count(), 2);
        let last = env.calls.last().unwrap();
        assert_eq!(last.event, Event::Update);
        assert_eq!(last.input["content"], "bye");
        assert_eq!(last.prior_output.unwrap()["content"], "hi");

        let record = env.backend.record(&["app"], "a").unwrap();
        assert_eq!(record.status, Status::Updated);
        assert_eq!(record.old_props.unwrap()["content"], "hi");
    }

    #[test]
    fn test_create_then_update_events() {
        let env = TestEngine::new();
        for n in 0..3_i64 {
            env.run(|root| {
                root.declare("file", "a", Input::object().with("n", n))?;
                Ok(())
            })
            .unwrap();
        }

        let events: Vec<Event> = env.calls.all().iter().map(|c| c.event).collect();
        assert_eq!(events, vec![Event::Create, Event::Update, Event::Update]);
        assert!(env.calls.all()[0].prior_output.is_none());
    }

    #[test]
    fn test_always_update_runs_every_time() {
        let calls = Calls::default();
        let mut registry = Registry::new();
        registry
            .register_definition(
                ProviderDefinition::new("exec", RecordingHandler(calls.clone()))
                    .with_options(ProviderOptions { always_update: true }),
            )
            .unwrap();
        let env = TestEngine::with_registry(registry, calls);

        for _ in 0..2 {
            env.run(|root| {
                root.declare("exec", "x", Input::object().with("cmd", "true"))?;
                Ok(())
            })
            .unwrap();
        }
        assert_eq!(env.calls.count(), 2);
    }

    #[test]
    fn test_secret_change_alone_is_skipped() {
        let env = TestEngine::new();
        for token in ["one", "two"] {
            env.run(|root| {
                root.declare(
                    "file",
                    "a",
                    Input::object().with("token", Input::secret(token)),
                )?;
                Ok(())
            })
            .unwrap();
        }

        assert_eq!(env.calls.count(), 1);
        assert_eq!(env.calls.all()[0].input, json!({"token": "one"}));
        let stored = env.backend.record(&["app"], "a").unwrap().props.unwrap();
        assert_eq!(stored["token"]["@secret"], "one");
    }

    #[test]
    fn test_deferred_reference_between_resources() {
        let env = TestEngine::new();
        env.run(|root| {
            let x = root.declare("file", "x", Input::object().with("host", "db.internal"))?;
            let y = root.declare("file", "y", Input::object().with("upstream", x.get("host")))?;

            // Declaring y did not apply anything
            assert_eq!(env.calls.count(), 0);

            assert_eq!(y.get("upstream").value()?, json!("db.internal"));
            Ok(())
        })
        .unwrap();

        let order: Vec<String> = env.calls.all().iter().map(|c| c.fqn.clone()).collect();
        assert_eq!(order, vec!["app/x", "app/y"]);
        assert_eq!(env.calls.all()[1].input["upstream"], "db.internal");
    }

    #[test]
    fn test_cycle_detected() {
        let calls = Calls::default();
        let mut registry = Registry::new();
        registry
            .define("link", ProviderOptions::default(), |ctx, input| {
                if let Some(after) = input.get("after").and_then(Value::as_str) {
                    let declaring = ctx.scope().parent().context("no declaring scope")?;
                    if let Some(dependency) = declaring.resource(after) {
                        dependency.value()?;
                    }
                }
                Ok(Some(json!({})))
            })
            .unwrap();
        let env = TestEngine::with_registry(registry, calls);

        let err = env
            .run(|root| {
                root.declare("link", "a", Input::object().with("after", "b"))?;
                root.declare("link", "b", Input::object().with("after", "a"))?;
                Ok(())
            })
            .unwrap_err();
        assert!(
            err.to_string().contains("dependency cycle detected at app/a"),
            "{err}"
        );
        assert_eq!(
            env.backend.record(&["app"], "a").unwrap().status,
            Status::Creating
        );
    }

    #[test]
    fn test_failure_marks_scope_and_resumes() {
        let env = TestEngine::new();
        env.calls.fail_on("boom");

        let err = env
            .run(|root| {
                root.declare("file", "a", Input::object().with("v", "boom"))?;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, Error::Handler { ref fqn, event: Event::Create, .. } if fqn == "app/a"));

        let record = env.backend.record(&["app"], "a").unwrap();
        assert_eq!(record.status, Status::Creating);
        assert!(record.output.is_none());

        // A later run resumes with a create
        env.calls.fail_on("never");
        env.run(|root| {
            root.declare("file", "a", Input::object().with("v", "ok"))?;
            Ok(())
        })
        .unwrap();
        let last = env.calls.last().unwrap();
        assert_eq!(last.event, Event::Create);
        assert_eq!(
            env.backend.record(&["app"], "a").unwrap().status,
            Status::Created
        );
    }

    #[test]
    fn test_failed_dependency_propagates() {
        let env = TestEngine::new();
        env.calls.fail_on("boom");
        let err = env
            .run(|root| {
                let x = root.declare("file", "x", Input::object().with("v", "boom"))?;
                let y = root.declare("file", "y", Input::object().with("x", x.get("v")))?;
                assert!(x.value().is_err());
                match y.value() {
                    Err(Error::ScopeFailed { .. } | Error::DependencyFailed { .. }) => {}
                    other => panic!("unexpected {other:?}"),
                }
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, Error::ScopeFailed { .. }));
        assert!(env.summary().failed >= 1);
        assert!(env.backend.record(&["app"], "y").is_none());
    }

    #[test]
    fn test_read_phase_strictness() {
        let env = TestEngine::new();

        let err = env
            .run_phase(Phase::Read, |root| {
                root.declare("file", "a", Input::object())?.value()?;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPhase { .. }));
        assert_eq!(env.backend.total(), 0);

        env.run(|root| {
            root.declare("file", "a", Input::object().with("v", 1_i64))?;
            Ok(())
        })
        .unwrap();

        env.run_phase(Phase::Read, |root| {
            // Props are ignored in the read phase
            let a = root.declare("file", "a", Input::object().with("v", 2_i64))?;
            assert_eq!(a.get("v").value()?, json!(1));
            Ok(())
        })
        .unwrap();
        assert_eq!(env.calls.count(), 1);
    }

    #[test]
    fn test_read_rejects_interrupted_create() {
        let env = TestEngine::new();
        env.calls.fail_on("boom");
        let _ = env.run(|root| {
            root.declare("file", "a", Input::object().with("v", "boom"))?;
            Ok(())
        });

        let err = env
            .run_phase(Phase::Read, |root| {
                root.declare("file", "a", Input::object())?.value()?;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPhase { .. }));
    }

    #[test]
    fn test_missing_provider() {
        let env = TestEngine::new();
        let err = env
            .run(|root| {
                root.declare("bucket", "b", Input::object())?;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, Error::MissingProvider { ref kind, .. } if kind == "bucket"));
    }

    #[test]
    fn test_missing_output_rejected() {
        let mut registry = Registry::new();
        registry
            .define("noop", ProviderOptions::default(), |_, _| Ok(None))
            .unwrap();
        let env = TestEngine::with_registry(registry, Calls::default());

        let err = env
            .run(|root| {
                root.declare("noop", "n", Input::object())?;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, Error::MissingOutput { event: Event::Create, .. }));
    }

    #[test]
    fn test_schema_checked_before_handler() {
        let calls = Calls::default();
        let mut registry = Registry::new();
        registry
            .register_definition(
                ProviderDefinition::new("file", RecordingHandler(calls.clone()))
                    .with_input_schema(Schema::new().required("path", FieldType::String)),
            )
            .unwrap();
        let env = TestEngine::with_registry(registry, calls);

        let err = env
            .run(|root| {
                root.declare("file", "a", Input::object().with("path", 3_i64))?;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, Error::Schema { direction: "input", .. }));
        assert_eq!(env.calls.count(), 0);
    }

    #[test]
    fn test_invalid_output_resumes_with_update() {
        let calls = Calls::default();
        let mut registry = Registry::new();
        registry
            .register_definition(
                ProviderDefinition::new("file", RecordingHandler(calls.clone()))
                    .with_output_schema(Schema::new().required("path", FieldType::String)),
            )
            .unwrap();
        let env = TestEngine::with_registry(registry, calls);

        let err = env
            .run(|root| {
                root.declare("file", "a", Input::object().with("size", 1_i64))?;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, Error::Schema { direction: "output", .. }));

        let record = env.backend.record(&["app"], "a").unwrap();
        assert_eq!(record.status, Status::Updating);
        assert_eq!(record.output, Some(json!({"size": 1})));

        env.run(|root| {
            root.declare("file", "a", Input::object().with("path", "/tmp/a.txt"))?;
            Ok(())
        })
        .unwrap();

        let events: Vec<Event> = env.calls.all().iter().map(|c| c.event).collect();
        assert_eq!(events, vec![Event::Create, Event::Update]);
        assert_eq!(env.calls.last().unwrap().prior_output, Some(json!({"size": 1})));
        assert_eq!(
            env.backend.record(&["app"], "a").unwrap().status,
            Status::Updated
        );
    }

    #[test]
    fn test_scratch_data_survives_failure() {
        let mut registry = Registry::new();
        registry
            .define("flaky", ProviderOptions::default(), |ctx, _| {
                ctx.set("attempted", json!(true))?;
                anyhow::bail!("remote API timed out")
            })
            .unwrap();
        let env = TestEngine::with_registry(registry, Calls::default());

        assert!(
            env.run(|root| {
                root.declare("flaky", "f", Input::object())?;
                Ok(())
            })
            .is_err()
        );
        let record = env.backend.record(&["app"], "f").unwrap();
        assert_eq!(record.data.get("attempted"), Some(&json!(true)));
    }

    #[test]
    fn test_nested_resources_apply_before_parent_settles() {
        let env = TestEngine::new();
        let backend: MemoryBackend = env.backend.clone();
        env.run(|root| {
            let parent = root.declare("parent", "site", Input::object().with("pages", 2_i64))?;
            assert_eq!(parent.get("children").value()?, json!(2));
            Ok(())
        })
        .unwrap();

        let fqns: Vec<String> = env.calls.all().iter().map(|c| c.fqn.clone()).collect();
        assert_eq!(fqns, vec!["app/site", "app/site/page-0", "app/site/page-1"]);
        assert!(backend.record(&["app", "site"], "page-1").is_some());
        assert_eq!(
            backend.record(&["app"], "site").unwrap().status,
            Status::Created
        );
    }

    #[test]
    fn test_redeclare_later_wins() {
        let env = TestEngine::new();
        env.run(|root| {
            let first = root.declare("file", "a", Input::object().with("v", 1_i64))?;
            let second = root.declare("file", "a", Input::object().with("v", 2_i64))?;
            assert!(second.sequence() > first.sequence());
            assert_eq!(first.get("v").value()?, json!(2));
            Ok(())
        })
        .unwrap();
        assert_eq!(env.calls.count(), 1);
        assert_eq!(env.calls.last().unwrap().input["v"], 2);
    }

    #[test]
    fn test_handle_outliving_tree() {
        let env = TestEngine::new();
        let root = env.engine.root("app", Phase::Up).unwrap();
        let a = root.declare("file", "a", Input::object()).unwrap();
        drop(root);
        assert!(matches!(a.value(), Err(Error::NoScope(_))));
        assert!(a.scope().is_err());
    }
}
