//! Destroy - ordered teardown of recorded resources
//!
//! Teardown is depth first: a resource's nested scope is emptied before
//! the resource itself is deleted, and records within one scope go in
//! descending sequence so later resources are removed before the ones
//! they were declared after.

use crate::context::HandlerContext;
use crate::diff::reveal_secrets;
use crate::error::{Error, Result};
use crate::provider::ProviderDefinition;
use crate::resource::Resource;
use crate::scope::Scope;
use crate::store::StateStore;
use crate::types::{Event, Outcome, ReplacedInstance, ResourceRecord, Status};
use serde_json::Value;
use std::collections::HashSet;

/// Tear down a single declared resource and everything nested in it
pub fn destroy_resource(resource: &Resource) -> Result<()> {
    let scope = resource.scope()?;
    scope.forget(resource.id());
    match scope.store().get(resource.id())? {
        Some(record) => destroy_record(&scope, record),
        None => Ok(()),
    }
}

/// Tear down every record in a scope and its descendants
pub fn destroy_scope(scope: &Scope) -> Result<()> {
    for child in scope.children() {
        destroy_scope(&child)?;
    }
    for id in scope.node_ids() {
        scope.forget(&id);
    }
    destroy_records(scope)
}

/// Destroy records of `scope` that were not declared in this run
pub(crate) fn destroy_orphans(scope: &Scope) -> Result<()> {
    let declared: HashSet<String> = scope.node_ids().into_iter().collect();
    for record in by_descending_sequence(scope)? {
        if declared.contains(&record.id) {
            continue;
        }
        log::info!("{} is no longer declared", record.fqn);
        destroy_record(scope, record)?;
    }
    Ok(())
}

/// Destroy every record of `scope`
pub(crate) fn destroy_records(scope: &Scope) -> Result<()> {
    for record in by_descending_sequence(scope)? {
        destroy_record(scope, record)?;
    }
    Ok(())
}

/// Delete instances superseded by `replace()` once their replacements settled
pub(crate) fn process_replacements(scope: &Scope) -> Result<()> {
    let store = scope.store();
    for (id, mut record) in store.all()? {
        if record.replace.is_none() || !record.status.is_settled() {
            continue;
        }

        log::info!("Deleting replaced instance of {}", record.fqn);
        let result = provider_for(scope, &record).and_then(|provider| {
            let nested = scope.nested(&id)?;
            delete_replaced(&provider, &nested, store.as_ref(), &mut record)
        });

        match result {
            Ok(()) => scope
                .engine()
                .report_complete(&record.fqn, &Outcome::Replaced),
            Err(err) => {
                scope.fail();
                scope.engine().report_complete(
                    &record.fqn,
                    &Outcome::Failed {
                        error: err.to_string(),
                    },
                );
                return Err(err);
            }
        }
    }
    Ok(())
}

fn by_descending_sequence(scope: &Scope) -> Result<Vec<ResourceRecord>> {
    let mut records: Vec<ResourceRecord> = scope.store().all()?.into_values().collect();
    records.sort_by(|a, b| b.sequence.cmp(&a.sequence).then_with(|| b.id.cmp(&a.id)));
    Ok(records)
}

fn provider_for(scope: &Scope, record: &ResourceRecord) -> Result<std::rc::Rc<ProviderDefinition>> {
    scope
        .engine()
        .registry
        .get(&record.kind)
        .ok_or_else(|| Error::MissingProvider {
            kind: record.kind.clone(),
            fqn: record.fqn.clone(),
        })
}

fn destroy_record(scope: &Scope, mut record: ResourceRecord) -> Result<()> {
    match teardown(scope, &mut record) {
        Ok(()) => {
            scope
                .engine()
                .report_complete(&record.fqn, &Outcome::Deleted);
            Ok(())
        }
        Err(err) => {
            scope.fail();
            scope.engine().report_complete(
                &record.fqn,
                &Outcome::Failed {
                    error: err.to_string(),
                },
            );
            Err(err)
        }
    }
}

fn teardown(scope: &Scope, record: &mut ResourceRecord) -> Result<()> {
    let store = scope.store();
    let provider = provider_for(scope, record)?;

    if record.status != Status::Deleting {
        record.status = Status::Deleting;
        store.set(&record.id, record)?;
    }
    scope.engine().report_start(&record.fqn, Event::Delete);

    // Children before parents
    let nested = scope.nested(&record.id)?;
    for child in nested.children() {
        destroy_scope(&child)?;
    }
    destroy_records(&nested)?;

    delete_replaced(&provider, &nested, store.as_ref(), record)?;

    let mut ctx = HandlerContext::new(
        Event::Delete,
        &nested,
        store.as_ref(),
        record.clone(),
        record.props.clone(),
    );
    call_delete(&provider, &mut ctx, record.props.as_ref())?;
    store.delete(&record.id)
}

/// Delete the instance a pending `replace()` left behind, if any
///
/// The handler sees a detached copy of the record, so scratch writes
/// never land on the live instance. On failure the replacement stays
/// pending, carrying whatever scratch data the handler wrote.
fn delete_replaced(
    provider: &ProviderDefinition,
    nested: &Scope,
    store: &dyn StateStore,
    record: &mut ResourceRecord,
) -> Result<()> {
    let Some(replaced) = record.replace.take() else {
        return Ok(());
    };

    let mut instance = record.clone();
    instance.status = Status::Deleting;
    instance.props.clone_from(&replaced.props);
    instance.output.clone_from(&replaced.output);
    instance.data.clone_from(&replaced.data);

    let mut ctx = HandlerContext::detached(
        Event::Delete,
        nested,
        store,
        instance,
        replaced.props.clone(),
    );
    let result = call_delete(provider, &mut ctx, replaced.props.as_ref());
    let data = ctx.into_record().data;

    if result.is_err() {
        record.replace = Some(ReplacedInstance { data, ..replaced });
    }
    store.set(&record.id, record)?;
    result
}

fn call_delete(
    provider: &ProviderDefinition,
    ctx: &mut HandlerContext<'_>,
    props: Option<&Value>,
) -> Result<()> {
    let fqn = ctx.fqn().to_string();
    let input = props.map_or(Value::Null, reveal_secrets);
    provider
        .handler()
        .handle(ctx, &input)
        .map_err(|e| Error::handler(&fqn, Event::Delete, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::Input;
    use crate::provider::{ProviderOptions, Registry};
    use crate::testing::{Calls, TestEngine};
    use crate::types::Phase;
    use serde_json::json;
    use std::cell::Cell;
    use std::rc::Rc;

    fn deletes(env: &TestEngine) -> Vec<String> {
        env.calls
            .all()
            .into_iter()
            .filter(|c| c.event == Event::Delete)
            .map(|c| c.fqn)
            .collect()
    }

    #[test]
    fn test_children_destroyed_before_parent() {
        let env = TestEngine::new();
        env.run(|root| {
            root.declare("file", "a", Input::object().with("path", "/tmp/a.txt"))?;
            root.declare("parent", "site", Input::object().with("pages", 2_i64))?;
            Ok(())
        })
        .unwrap();
        assert_eq!(env.backend.total(), 4);

        env.run_phase(Phase::Destroy, |_| Ok(())).unwrap();

        assert_eq!(
            deletes(&env),
            vec!["app/site/page-1", "app/site/page-0", "app/site", "app/a"]
        );
        assert_eq!(env.backend.total(), 0);
        assert_eq!(env.summary().deleted, 4);
    }

    #[test]
    fn test_delete_receives_stored_props_and_output() {
        let env = TestEngine::new();
        env.run(|root| {
            root.declare(
                "file",
                "a",
                Input::object()
                    .with("path", "/tmp/a.txt")
                    .with("token", Input::secret("s3cret")),
            )?;
            Ok(())
        })
        .unwrap();

        env.run(|_| Ok(())).unwrap();

        let call = env.calls.last().unwrap();
        assert_eq!(call.event, Event::Delete);
        assert_eq!(call.input, json!({"path": "/tmp/a.txt", "token": "s3cret"}));
        assert_eq!(call.prior_output.unwrap()["path"], "/tmp/a.txt");
        assert!(env.backend.record(&["app"], "a").is_none());
    }

    #[test]
    fn test_orphans_removed_on_up() {
        let env = TestEngine::new();
        env.run(|root| {
            root.declare("file", "a", Input::object().with("v", 1_i64))?;
            root.declare("file", "b", Input::object().with("v", 2_i64))?;
            Ok(())
        })
        .unwrap();

        env.run(|root| {
            root.declare("file", "a", Input::object().with("v", 1_i64))?;
            Ok(())
        })
        .unwrap();

        assert_eq!(deletes(&env), vec!["app/b"]);
        assert!(env.backend.record(&["app"], "a").is_some());
        assert!(env.backend.record(&["app"], "b").is_none());
    }

    #[test]
    fn test_nested_orphan_removed_when_parent_updates() {
        let env = TestEngine::new();
        for pages in [2_i64, 1] {
            env.run(|root| {
                root.declare("parent", "site", Input::object().with("pages", pages))?;
                Ok(())
            })
            .unwrap();
        }

        assert_eq!(deletes(&env), vec!["app/site/page-1"]);
        assert!(env.backend.record(&["app", "site"], "page-0").is_some());
    }

    #[test]
    fn test_skipped_parent_keeps_children() {
        let env = TestEngine::new();
        for _ in 0..2 {
            env.run(|root| {
                root.declare("parent", "site", Input::object().with("pages", 2_i64))?;
                Ok(())
            })
            .unwrap();
        }
        assert!(deletes(&env).is_empty());
        assert_eq!(env.backend.total(), 3);
    }

    #[test]
    fn test_failed_delete_keeps_record() {
        let env = TestEngine::new();
        env.run(|root| {
            root.declare("file", "a", Input::object().with("path", "/tmp/stuck"))?;
            Ok(())
        })
        .unwrap();

        env.calls.fail_on_event(Event::Delete, "stuck");
        let err = env.run_phase(Phase::Destroy, |_| Ok(())).unwrap_err();
        assert!(matches!(err, Error::Handler { event: Event::Delete, .. }));

        let record = env.backend.record(&["app"], "a").unwrap();
        assert_eq!(record.status, Status::Deleting);

        // Retry succeeds once the provider recovers
        env.calls.clear_failures();
        env.run_phase(Phase::Destroy, |_| Ok(())).unwrap();
        assert!(env.backend.record(&["app"], "a").is_none());
    }

    #[test]
    fn test_destroy_phase_resolves_stored_outputs() {
        let env = TestEngine::new();
        env.run(|root| {
            root.declare("file", "a", Input::object().with("v", 1_i64))?;
            Ok(())
        })
        .unwrap();

        env.run_phase(Phase::Destroy, |root| {
            let a = root.declare("file", "a", Input::object().with("v", 99_i64))?;
            assert_eq!(a.get("v").value()?, json!(1));
            Ok(())
        })
        .unwrap();

        let events: Vec<Event> = env.calls.all().iter().map(|c| c.event).collect();
        assert_eq!(events, vec![Event::Create, Event::Delete]);
    }

    #[test]
    fn test_replacement_deleted_at_finalize() {
        let env = TestEngine::new();
        env.run(|root| {
            root.declare("parent", "db", Input::object().with("pages", 0_i64).with("engine", "v1"))?;
            Ok(())
        })
        .unwrap();

        env.run(|root| {
            root.declare(
                "parent",
                "db",
                Input::object()
                    .with("pages", 0_i64)
                    .with("engine", "v2")
                    .with("replace", true),
            )?;
            Ok(())
        })
        .unwrap();

        let call = env.calls.last().unwrap();
        assert_eq!(call.event, Event::Delete);
        assert_eq!(call.input["engine"], "v1");

        let record = env.backend.record(&["app"], "db").unwrap();
        assert!(record.replace.is_none());
        assert_eq!(record.status, Status::Updated);
        assert_eq!(record.props.unwrap()["engine"], "v2");
        assert_eq!(env.summary().replaced, 1);
    }

    #[test]
    fn test_failed_replacement_delete_keeps_live_record() {
        let draining = Rc::new(Cell::new(true));
        let flag = Rc::clone(&draining);
        let mut registry = Registry::new();
        registry
            .define("db", ProviderOptions::default(), move |ctx, input| {
                match ctx.event() {
                    Event::Create => {}
                    Event::Update => ctx.replace()?,
                    Event::Delete => {
                        ctx.set("attempt", input["engine"].clone())?;
                        if flag.get() {
                            anyhow::bail!("instance is still draining");
                        }
                        return Ok(None);
                    }
                }
                Ok(Some(input.clone()))
            })
            .unwrap();
        let env = TestEngine::with_registry(registry, Calls::default());
        let declare = |engine: &'static str| {
            move |root: &Scope| -> Result<()> {
                root.declare("db", "main", Input::object().with("engine", engine))?;
                Ok(())
            }
        };

        env.run(declare("v1")).unwrap();
        let err = env.run(declare("v2")).unwrap_err();
        assert!(matches!(err, Error::Handler { event: Event::Delete, .. }));

        let record = env.backend.record(&["app"], "main").unwrap();
        assert_eq!(record.status, Status::Updated);
        assert_eq!(record.props.unwrap()["engine"], "v2");
        assert_eq!(record.output.unwrap()["engine"], "v2");
        assert!(record.data.is_empty());
        let pending = record.replace.unwrap();
        assert_eq!(pending.props.unwrap()["engine"], "v1");
        assert_eq!(pending.data.get("attempt"), Some(&json!("v1")));

        // The next run retries the delete
        draining.set(false);
        env.run(declare("v2")).unwrap();
        let record = env.backend.record(&["app"], "main").unwrap();
        assert!(record.replace.is_none());
        assert_eq!(record.props.unwrap()["engine"], "v2");
        assert!(record.data.is_empty());
        assert_eq!(env.summary().replaced, 1);
    }

    #[test]
    fn test_replace_refused_with_children() {
        let env = TestEngine::new();
        env.run(|root| {
            root.declare("parent", "site", Input::object().with("pages", 1_i64))?;
            Ok(())
        })
        .unwrap();
        let before = env.backend.record(&["app"], "site").unwrap();

        let err = env
            .run(|root| {
                root.declare(
                    "parent",
                    "site",
                    Input::object().with("pages", 1_i64).with("replace", true),
                )?;
                Ok(())
            })
            .unwrap_err();

        assert!(matches!(err, Error::ReplaceWithChildren { children: 1, .. }));
        assert_eq!(env.backend.record(&["app"], "site").unwrap(), before);
        assert!(env.backend.record(&["app", "site"], "page-0").is_some());
        assert!(deletes(&env).is_empty());
    }

    #[test]
    fn test_explicit_destroy_resource() {
        let env = TestEngine::new();
        env.run(|root| {
            let site = root.declare("parent", "site", Input::object().with("pages", 1_i64))?;
            site.value()?;
            destroy_resource(&site)?;
            Ok(())
        })
        .unwrap();

        assert_eq!(deletes(&env), vec!["app/site/page-0", "app/site"]);
        assert_eq!(env.backend.total(), 0);
    }

    #[test]
    fn test_explicit_destroy_scope() {
        let env = TestEngine::new();
        env.run(|root| {
            root.group("dev", |dev| {
                dev.declare("file", "a", Input::object())?.value()?;
                dev.declare("file", "b", Input::object())?.value()?;
                Ok(())
            })
        })
        .unwrap();
        assert_eq!(env.backend.total(), 2);

        env.run(|root| {
            let dev = root.child("dev")?;
            dev.declare("file", "a", Input::object())?.value()?;
            destroy_scope(&dev)
        })
        .unwrap();

        assert_eq!(deletes(&env), vec!["app/dev/b", "app/dev/a"]);
        assert_eq!(env.backend.total(), 0);
    }
}
