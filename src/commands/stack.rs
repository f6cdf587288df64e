//! Stack commands
//!
//! - `up` - apply the stack, deleting resources no longer declared
//! - `read` - print stored outputs without side effects
//! - `destroy` - delete every resource of the stage

use anyhow::{Context as AnyhowContext, Result};
use colored::Colorize;
use declarative::{Engine, Phase, Resource, Scope};
use std::path::Path;

use crate::Context;
use crate::cli::RunArgs;
use crate::config::{ConjureConfig, Overrides, Settings};
use crate::providers;
use crate::stack::Stack;
use crate::state;
use crate::ui;

/// Everything a run needs, loaded before any scope is opened
struct Prepared {
    stack: Stack,
    settings: Settings,
    engine: Engine,
}

fn prepare(ctx: &Context, args: &RunArgs) -> Result<Prepared> {
    let (config, config_path) = ConjureConfig::load(ctx.config.as_deref())?;
    if let Some(path) = &config_path {
        log::info!("Using config {}", path.display());
    }

    let stack = Stack::load(&args.stack)?;
    log::info!(
        "{} resource(s) declared in {}",
        stack.resources().len(),
        stack.path().display()
    );
    let settings = Settings::resolve(
        &config,
        Overrides {
            stage: args.stage.clone(),
            backend: args.backend,
            state_dir: args.state_dir.clone(),
        },
        stack.app(),
        &args.stack,
    )?;
    log::debug!("Settings: {settings:?}");

    let backend = state::open(settings.backend, &settings.state_dir)?;
    let engine = Engine::builder(providers::registry()?, backend)
        .reporter(ui::Reporter::new(ctx.verbose))
        .quiet(ctx.quiet)
        .build();

    Ok(Prepared {
        stack,
        settings,
        engine,
    })
}

/// Declare the stack under `<app>/<stage>`, let `inspect` look at the
/// handles, then finalize
fn run_phase(
    prepared: &Prepared,
    phase: Phase,
    inspect: impl FnOnce(&[Resource]) -> Result<()>,
) -> Result<()> {
    let Prepared {
        stack,
        settings,
        engine,
    } = prepared;

    let root = engine
        .root(&settings.app, phase)
        .with_context(|| format!("Could not open state for {}", settings.app))?;
    let stage: Scope = root.child(&settings.stage)?;
    let resources = stack.declare(&stage)?;
    inspect(&resources)?;
    root.finalize()
        .with_context(|| format!("{phase} of {}/{} failed", settings.app, settings.stage))
}

fn title(phase: &str, settings: &Settings, stack: &Path) -> String {
    format!(
        "{phase} {}/{} ({}, {} state)",
        settings.app,
        settings.stage,
        stack.display(),
        settings.backend
    )
}

/// Apply the stack
pub fn up(ctx: &Context, args: &RunArgs) -> Result<()> {
    let prepared = prepare(ctx, args)?;
    if !ctx.quiet {
        ui::header(&title("Up", &prepared.settings, prepared.stack.path()));
    }

    let result = run_phase(&prepared, Phase::Up, |_| Ok(()));
    if !ctx.quiet {
        ui::summary(&prepared.engine.summary());
    }
    result
}

/// Print stored outputs
pub fn read(ctx: &Context, args: &RunArgs) -> Result<()> {
    let prepared = prepare(ctx, args)?;

    run_phase(&prepared, Phase::Read, |resources| {
        for resource in resources {
            let output = resource
                .value()
                .with_context(|| format!("Could not read {}", resource.fqn()))?;
            if ctx.quiet {
                println!("{}", serde_json::to_string(&output)?);
            } else {
                ui::section(resource.fqn());
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
        }
        Ok(())
    })
}

/// Delete every resource of the stage
pub fn destroy(ctx: &Context, args: &RunArgs, yes: bool) -> Result<()> {
    let prepared = prepare(ctx, args)?;
    let target = format!("{}/{}", prepared.settings.app, prepared.settings.stage);

    if !yes {
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(format!("Destroy every resource of {}?", target.bold()))
            .default(false)
            .interact()
            .context("Failed to read confirmation")?;

        if !confirmed {
            ui::info("Aborted");
            return Ok(());
        }
    }

    if !ctx.quiet {
        ui::header(&title("Destroy", &prepared.settings, prepared.stack.path()));
    }

    let result = run_phase(&prepared, Phase::Destroy, |_| Ok(()));
    if !ctx.quiet {
        ui::summary(&prepared.engine.summary());
    }
    result
}
