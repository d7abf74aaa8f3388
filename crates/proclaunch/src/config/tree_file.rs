//! Process tree descriptor YAML schema

use crate::config::SubstitutionContext;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Default descriptor name, looked up next to the supervisor executable
pub const DEFAULT_DESCRIPTOR: &str = "proclaunch.yaml";

/// Root descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TreeFile {
    /// Descriptor format version
    #[serde(default = "default_version")]
    pub version: String,

    /// Argument definitions with defaults
    #[serde(default)]
    pub args: IndexMap<String, ArgDefinition>,

    /// Supervisor timings
    #[serde(default)]
    pub settings: Settings,

    /// Top-level processes, launched in this order
    pub processes: Vec<ParentEntry>,

    /// Directory the descriptor was read from (not part of the YAML)
    #[serde(skip)]
    pub source_dir: Option<PathBuf>,
}

fn default_version() -> String {
    "1.0".to_string()
}

/// Argument definition with default value
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArgDefinition {
    pub default: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Supervisor timings and process options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Delay before each dependent is started
    pub launch_delay_ms: u64,
    /// Wait after the whole tree is started before liveness polling begins
    pub grace_period_ms: u64,
    /// Liveness poll interval
    pub poll_interval_ms: u64,
    /// Start each top-level process as leader of its own process group, so
    /// workers it leaves behind are still found after being re-parented.
    /// On by default on Unix.
    pub process_groups: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            launch_delay_ms: 100,
            grace_period_ms: 2500,
            poll_interval_ms: 5000,
            process_groups: cfg!(unix),
        }
    }
}

/// A top-level process and the dependents it owns
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParentEntry {
    pub path: String,
    #[serde(default, alias = "workingDir")]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
    /// Has no effect on a top-level process
    #[serde(default)]
    pub restart: bool,
    #[serde(default)]
    pub dependencies: Vec<DependentEntry>,
}

/// A dependent process. Dependents cannot own further dependents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DependentEntry {
    pub path: String,
    #[serde(default, alias = "workingDir")]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
    #[serde(default)]
    pub restart: bool,
}

impl TreeFile {
    /// Load a descriptor from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TreeFileError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| TreeFileError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut tree_file = Self::from_yaml(&content)?;
        tree_file.source_dir = path
            .canonicalize()
            .ok()
            .and_then(|p| p.parent().map(Path::to_path_buf));
        Ok(tree_file)
    }

    /// Parse a descriptor from a YAML string
    pub fn from_yaml(content: &str) -> Result<Self, TreeFileError> {
        let tree_file: TreeFile = serde_yaml::from_str(content)?;
        tree_file.validate()?;
        Ok(tree_file)
    }

    /// Structural checks; path existence is verified later, at setup.
    pub fn validate(&self) -> Result<(), TreeFileError> {
        if self.processes.is_empty() {
            return Err(TreeFileError::Validation(
                "at least one process must be declared".to_string(),
            ));
        }

        for (i, parent) in self.processes.iter().enumerate() {
            if parent.path.trim().is_empty() {
                return Err(TreeFileError::Validation(format!(
                    "process #{} has an empty 'path'",
                    i + 1
                )));
            }
            for (j, dep) in parent.dependencies.iter().enumerate() {
                if dep.path.trim().is_empty() {
                    return Err(TreeFileError::Validation(format!(
                        "dependency #{} of process '{}' has an empty 'path'",
                        j + 1,
                        parent.path
                    )));
                }
            }
        }

        if self.settings.poll_interval_ms == 0 {
            return Err(TreeFileError::Validation(
                "'poll_interval_ms' must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Substitution context for this descriptor: arg defaults, then
    /// `overrides`, plus `$(dir)` when the descriptor came from a file.
    ///
    /// Overriding an arg the descriptor does not declare is an error.
    pub fn substitution_context(
        &self,
        overrides: &HashMap<String, String>,
    ) -> Result<SubstitutionContext, TreeFileError> {
        let mut args: HashMap<String, String> = self
            .args
            .iter()
            .map(|(name, def)| (name.clone(), def.default.clone()))
            .collect();

        for (name, value) in overrides {
            if !self.args.contains_key(name) {
                return Err(TreeFileError::UnknownArgument(name.clone()));
            }
            args.insert(name.clone(), value.clone());
        }

        let ctx = SubstitutionContext::new().with_args(args);
        Ok(match &self.source_dir {
            Some(dir) => ctx.with_descriptor_dir(dir),
            None => ctx,
        })
    }

    /// Total number of processes, dependents included
    pub fn process_count(&self) -> usize {
        self.processes
            .iter()
            .map(|p| 1 + p.dependencies.len())
            .sum()
    }
}

/// Errors that can occur when loading a descriptor
#[derive(Debug, thiserror::Error)]
pub enum TreeFileError {
    #[error("Failed to read descriptor '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse descriptor: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown argument: {0}")]
    UnknownArgument(String),
}
