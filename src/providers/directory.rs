//! Directory resource - a directory and the files it holds
//!
//! Every entry of `files` becomes a nested `file` resource, so entries
//! removed from the map are deleted on the next run and the directory
//! itself is only removed after its files.

use super::file::FileProvider;
use anyhow::{Context, Result, bail};
use declarative::{FieldType, HandlerContext, Input, Provider, Schema};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DirectoryProps {
    pub path: String,
    /// Relative file name → content
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryOutput {
    pub path: String,
    pub files: Vec<String>,
}

/// The `directory` kind
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectoryProvider;

impl DirectoryProvider {
    pub const KIND: &'static str = "directory";

    fn reconcile(ctx: &HandlerContext<'_>, props: &DirectoryProps) -> Result<DirectoryOutput> {
        let root = crate::paths::expand(&props.path);
        for name in props.files.keys() {
            check_entry(name)?;
        }

        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create directory: {}", root.display()))?;

        for (name, content) in &props.files {
            let path = root.join(name);
            ctx.scope().declare(
                FileProvider::KIND,
                name,
                Input::object()
                    .with("path", path.to_string_lossy().to_string())
                    .with("content", content.as_str()),
            )?;
        }

        Ok(DirectoryOutput {
            path: root.to_string_lossy().to_string(),
            files: props.files.keys().cloned().collect(),
        })
    }
}

impl Provider for DirectoryProvider {
    type Props = DirectoryProps;
    type Output = DirectoryOutput;

    fn kind(&self) -> &str {
        Self::KIND
    }

    fn input_schema(&self) -> Option<Schema> {
        Some(
            Schema::new()
                .required("path", FieldType::String)
                .optional("files", FieldType::Object),
        )
    }

    fn create(&self, ctx: &mut HandlerContext<'_>, props: DirectoryProps) -> Result<DirectoryOutput> {
        Self::reconcile(ctx, &props)
    }

    fn update(
        &self,
        ctx: &mut HandlerContext<'_>,
        props: DirectoryProps,
        _prior: Option<DirectoryOutput>,
    ) -> Result<DirectoryOutput> {
        Self::reconcile(ctx, &props)
    }

    /// Nested files are already gone when this runs
    fn delete(
        &self,
        ctx: &mut HandlerContext<'_>,
        props: DirectoryProps,
        output: Option<DirectoryOutput>,
    ) -> Result<()> {
        let root = output.map_or_else(
            || crate::paths::expand(&props.path),
            |output| PathBuf::from(output.path),
        );

        match prune_empty_dirs(&root) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to clean up {}", root.display()));
            }
        }

        match fs::remove_dir(&root) {
            Ok(()) => {
                log::debug!("Removed {}", root.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::DirectoryNotEmpty => {
                log::warn!(
                    "{}: {} still holds unmanaged files, leaving it in place",
                    ctx.fqn(),
                    root.display()
                );
                Ok(())
            }
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", root.display())),
        }
    }
}

/// Remove subdirectories left empty by nested entries, deepest first
fn prune_empty_dirs(dir: &Path) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let path = entry.path();
        prune_empty_dirs(&path)?;
        match fs::remove_dir(&path) {
            Ok(()) => log::debug!("Removed {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::DirectoryNotEmpty => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Entries must stay inside the directory
fn check_entry(name: &str) -> Result<()> {
    let path = Path::new(name);
    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));
    if name.is_empty() || escapes {
        bail!("Invalid file entry '{name}': must be a relative path inside the directory");
    }
    Ok(())
}
