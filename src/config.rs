use crate::paths;
use crate::state::BackendKind;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the optional config file
pub const CONFIG_FILE: &str = "conjure.toml";

const DEFAULT_STAGE: &str = "dev";

// ============================================================================
// Config File
// ============================================================================

/// Defaults for every run, read from `conjure.toml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConjureConfig {
    #[serde(default)]
    pub app: Option<String>,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub backend: Option<BackendKind>,
    #[serde(default)]
    pub state_dir: Option<String>,
}

impl ConjureConfig {
    /// Load the config file
    ///
    /// An explicit path must exist. Otherwise `./conjure.toml` is tried,
    /// then the config dir; no file at all means defaults.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            return Ok((Self::from_file(path)?, Some(path.to_path_buf())));
        }

        let mut candidates = vec![PathBuf::from(CONFIG_FILE)];
        if let Ok(dir) = paths::config_dir() {
            candidates.push(dir.join(CONFIG_FILE));
        }

        for path in candidates {
            if path.is_file() {
                log::debug!("Using config file {}", path.display());
                return Ok((Self::from_file(&path)?, Some(path)));
            }
        }

        log::debug!("No {CONFIG_FILE} found, using defaults");
        Ok((Self::default(), None))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Invalid TOML format in {}", path.display()))
    }
}

// ============================================================================
// Effective Settings
// ============================================================================

/// Options given on the command line; each overrides the config file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub stage: Option<String>,
    pub backend: Option<BackendKind>,
    pub state_dir: Option<PathBuf>,
}

/// The settings a run actually uses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub app: String,
    pub stage: String,
    pub backend: BackendKind,
    pub state_dir: PathBuf,
}

impl Settings {
    /// Merge command line, stack file and config file
    ///
    /// The app name comes from the stack file, then the config file,
    /// then the stack file's stem.
    pub fn resolve(
        config: &ConjureConfig,
        overrides: Overrides,
        stack_app: Option<&str>,
        stack_path: &Path,
    ) -> Result<Self> {
        let app = stack_app
            .map(str::to_string)
            .or_else(|| config.app.clone())
            .or_else(|| {
                stack_path
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
            })
            .context("Could not determine the app name; set `app` in the stack file")?;

        let stage = overrides
            .stage
            .or_else(|| config.stage.clone())
            .unwrap_or_else(|| DEFAULT_STAGE.to_string());

        let backend = overrides.backend.or(config.backend).unwrap_or_default();

        let state_dir = match (overrides.state_dir, &config.state_dir) {
            (Some(dir), _) => dir,
            (None, Some(dir)) => paths::expand(dir),
            (None, None) => paths::state_dir()?,
        };

        Ok(Self {
            app,
            stage,
            backend,
            state_dir,
        })
    }
}
