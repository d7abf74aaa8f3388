//! Substitution engine for `$(arg NAME)`, `$(env NAME)` and `$(dir)` patterns

use regex::{Captures, Regex};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Matches `$(kind)` and `$(kind value)`
static SUBSTITUTION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\((\w+)(?:\s+([^)]+))?\)").unwrap());

/// Args may reference other args; this bounds the expansion depth.
const MAX_DEPTH: usize = 8;

/// Values available to descriptor strings
#[derive(Debug, Clone, Default)]
pub struct SubstitutionContext {
    /// Descriptor arguments (defaults merged with command line overrides)
    pub args: HashMap<String, String>,
    /// Local environment overrides, consulted before the process environment
    pub env: HashMap<String, String>,
    /// Directory holding the descriptor, exposed as `$(dir)`
    pub descriptor_dir: Option<PathBuf>,
}

impl SubstitutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }

    pub fn with_args(mut self, args: HashMap<String, String>) -> Self {
        self.args.extend(args);
        self
    }

    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    pub fn with_descriptor_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.descriptor_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Expand every pattern in `input`.
    ///
    /// Values pulled from `args` are expanded again, so an argument can be
    /// defined in terms of another one.
    pub fn substitute(&self, input: &str) -> Result<String, SubstitutionError> {
        self.expand(input, 0).map_err(|e| e.in_context(input))
    }

    fn expand(&self, input: &str, depth: usize) -> Result<String, SubstitutionError> {
        if depth > MAX_DEPTH {
            return Err(SubstitutionError::TooDeep(input.to_string()));
        }

        let mut out = String::with_capacity(input.len());
        let mut last = 0;
        for caps in SUBSTITUTION_PATTERN.captures_iter(input) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            out.push_str(&input[last..whole.start()]);
            out.push_str(&self.resolve(&caps, depth)?);
            last = whole.end();
        }
        out.push_str(&input[last..]);
        Ok(out)
    }

    fn resolve(&self, caps: &Captures, depth: usize) -> Result<String, SubstitutionError> {
        let kind = &caps[1];
        let value = caps.get(2).map(|m| m.as_str().trim());

        match (kind, value) {
            ("arg", Some(name)) => {
                let raw = self
                    .args
                    .get(name)
                    .ok_or_else(|| SubstitutionError::UndefinedArg(name.to_string()))?;
                self.expand(raw, depth + 1)
            }
            ("env", Some(name)) => self
                .env
                .get(name)
                .cloned()
                .or_else(|| std::env::var(name).ok())
                .ok_or_else(|| SubstitutionError::UndefinedEnv(name.to_string())),
            ("dir", None) => self
                .descriptor_dir
                .as_ref()
                .map(|d| d.to_string_lossy().into_owned())
                .ok_or(SubstitutionError::NoDescriptorDir),
            ("arg" | "env", None) | ("dir", Some(_)) => {
                Err(SubstitutionError::InvalidPattern(caps[0].to_string()))
            }
            (other, _) => Err(SubstitutionError::UnknownType(other.to_string())),
        }
    }
}

/// Errors that can occur during substitution
#[derive(Debug, thiserror::Error)]
pub enum SubstitutionError {
    #[error("Unknown substitution type: {0}")]
    UnknownType(String),

    #[error("Undefined argument: {0}")]
    UndefinedArg(String),

    #[error("Undefined environment variable: {0}")]
    UndefinedEnv(String),

    #[error("Invalid substitution pattern: {0}")]
    InvalidPattern(String),

    #[error("$(dir) used but the descriptor was not loaded from a file")]
    NoDescriptorDir,

    #[error("Argument expansion nested too deeply in: {0}")]
    TooDeep(String),

    #[error("In '{input}': {source}")]
    Context {
        input: String,
        #[source]
        source: Box<SubstitutionError>,
    },
}

impl SubstitutionError {
    fn in_context(self, input: &str) -> Self {
        if matches!(self, SubstitutionError::Context { .. }) {
            return self;
        }
        SubstitutionError::Context {
            input: input.to_string(),
            source: Box::new(self),
        }
    }

    /// The innermost error, without the input context wrapper
    pub fn root(&self) -> &SubstitutionError {
        match self {
            SubstitutionError::Context { source, .. } => source.root(),
            other => other,
        }
    }
}
