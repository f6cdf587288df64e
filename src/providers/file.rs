//! File resource - writes a file with fixed content

use anyhow::{Context, Result, bail};
use declarative::{FieldType, HandlerContext, Provider, Schema};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileProps {
    pub path: String,
    pub content: String,
    /// Octal permission bits such as `"644"` or `"0o600"`
    #[serde(default)]
    pub mode: Option<String>,
}

impl FileProps {
    fn target(&self) -> PathBuf {
        crate::paths::expand(&self.path)
    }

    fn mode_bits(&self) -> Result<Option<u32>> {
        let Some(mode) = &self.mode else {
            return Ok(None);
        };
        let digits = mode.trim().trim_start_matches("0o");
        let bits = u32::from_str_radix(digits, 8)
            .with_context(|| format!("Invalid file mode '{mode}'; expected octal like \"644\""))?;
        if bits > 0o7777 {
            bail!("Invalid file mode '{mode}'; out of range");
        }
        Ok(Some(bits))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOutput {
    pub path: String,
    pub size: u64,
    /// BLAKE3 of the content, hex encoded
    pub hash: String,
}

/// The `file` kind
#[derive(Debug, Clone, Copy, Default)]
pub struct FileProvider;

impl FileProvider {
    pub const KIND: &'static str = "file";

    fn write(props: &FileProps) -> Result<FileOutput> {
        let target = props.target();
        let mode = props.mode_bits()?;

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create parent directory: {}", parent.display())
            })?;
        }
        fs::write(&target, &props.content)
            .with_context(|| format!("Failed to write {}", target.display()))?;

        if let Some(bits) = mode {
            set_mode(&target, bits)?;
        }

        log::debug!("Wrote {} ({} bytes)", target.display(), props.content.len());
        Ok(FileOutput {
            path: target.to_string_lossy().to_string(),
            size: props.content.len() as u64,
            hash: blake3::hash(props.content.as_bytes()).to_hex().to_string(),
        })
    }
}

impl Provider for FileProvider {
    type Props = FileProps;
    type Output = FileOutput;

    fn kind(&self) -> &str {
        Self::KIND
    }

    fn input_schema(&self) -> Option<Schema> {
        Some(
            Schema::new()
                .required("path", FieldType::String)
                .required("content", FieldType::String)
                .optional("mode", FieldType::String),
        )
    }

    fn output_schema(&self) -> Option<Schema> {
        Some(
            Schema::new()
                .required("path", FieldType::String)
                .required("size", FieldType::Integer)
                .required("hash", FieldType::String),
        )
    }

    fn create(&self, _ctx: &mut HandlerContext<'_>, props: FileProps) -> Result<FileOutput> {
        Self::write(&props)
    }

    fn update(
        &self,
        ctx: &mut HandlerContext<'_>,
        props: FileProps,
        prior: Option<FileOutput>,
    ) -> Result<FileOutput> {
        let output = Self::write(&props)?;

        // A changed path moves the file
        if let Some(prior) = prior.filter(|prior| prior.path != output.path) {
            log::debug!("{} moved from {}", ctx.fqn(), prior.path);
            remove_file(Path::new(&prior.path))?;
        }
        Ok(output)
    }

    fn delete(
        &self,
        _ctx: &mut HandlerContext<'_>,
        props: FileProps,
        output: Option<FileOutput>,
    ) -> Result<()> {
        let target = output.map_or_else(|| props.target(), |output| PathBuf::from(output.path));
        remove_file(&target)
    }
}

/// Remove a file; a file that is already gone is fine
fn remove_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            log::debug!("Removed {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, bits: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(bits);
    fs::set_permissions(path, perms)
        .with_context(|| format!("Failed to set mode {bits:o} on {}", path.display()))
}

#[cfg(not(unix))]
fn set_mode(path: &Path, _bits: u32) -> Result<()> {
    log::warn!("File modes are not supported here; ignoring for {}", path.display());
    Ok(())
}
