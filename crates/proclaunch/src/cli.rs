//! Command-line interface for proclaunch

use crate::config::DEFAULT_DESCRIPTOR;
use argh::FromArgs;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Launch and supervise a tree of processes described in a YAML file
#[derive(FromArgs, Debug)]
pub struct LaunchArgs {
    /// path to the descriptor (default: proclaunch.yaml next to the executable)
    #[argh(positional)]
    pub descriptor: Option<String>,

    /// override descriptor arguments (format: key:=value)
    #[argh(option, short = 'a', from_str_fn(parse_arg_override))]
    pub arg: Vec<(String, String)>,

    /// show launch plan without starting anything
    #[argh(switch)]
    pub dry_run: bool,

    /// validate descriptor and exit
    #[argh(switch)]
    pub validate: bool,

    /// log level (error, warn, info, debug, trace)
    #[argh(option, short = 'l', default = "String::from(\"info\")")]
    pub log_level: String,
}

/// Parse argument override in format "key:=value"
fn parse_arg_override(s: &str) -> Result<(String, String), String> {
    match s.split_once(":=") {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!(
            "Invalid argument format '{}'. Expected 'key:=value'",
            s
        )),
    }
}

impl LaunchArgs {
    /// Convert argument overrides to a HashMap
    pub fn arg_overrides(&self) -> HashMap<String, String> {
        self.arg.iter().cloned().collect()
    }

    /// The descriptor given on the command line when it exists, otherwise
    /// [`DEFAULT_DESCRIPTOR`] in `default_dir`
    pub fn resolve_descriptor(&self, default_dir: &Path) -> PathBuf {
        match &self.descriptor {
            Some(path) if Path::new(path).is_file() => PathBuf::from(path),
            Some(path) => {
                log::warn!(
                    "Descriptor '{}' not found, falling back to {}",
                    path,
                    DEFAULT_DESCRIPTOR
                );
                default_dir.join(DEFAULT_DESCRIPTOR)
            }
            None => default_dir.join(DEFAULT_DESCRIPTOR),
        }
    }

    /// Log filter, `info` for unrecognized levels
    pub fn log_filter(&self) -> &'static str {
        match self.log_level.to_lowercase().as_str() {
            "error" => "error",
            "warn" => "warn",
            "debug" => "debug",
            "trace" => "trace",
            _ => "info",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> LaunchArgs {
        LaunchArgs::from_args(&["proclaunch"], args).unwrap()
    }

    #[test]
    fn test_parse_arg_override() {
        let result = parse_arg_override("root:=/opt/app");
        assert_eq!(result, Ok(("root".to_string(), "/opt/app".to_string())));
    }

    #[test]
    fn test_parse_arg_override_with_separator_in_value() {
        let result = parse_arg_override("url:=http://localhost:8080/?a:=b");
        assert_eq!(
            result,
            Ok(("url".to_string(), "http://localhost:8080/?a:=b".to_string()))
        );
    }

    #[test]
    fn test_parse_arg_override_invalid() {
        assert!(parse_arg_override("invalid").is_err());
        assert!(parse_arg_override(":=value").is_err());
    }

    #[test]
    fn test_defaults() {
        let args = parse(&[]);
        assert!(args.descriptor.is_none());
        assert!(args.arg_overrides().is_empty());
        assert!(!args.dry_run);
        assert!(!args.validate);
        assert_eq!(args.log_filter(), "info");
    }

    #[test]
    fn test_full_command_line() {
        let args = parse(&[
            "tree.yaml", "-a", "root:=/srv", "-a", "port:=9090", "--dry-run", "-l", "DEBUG",
        ]);
        assert_eq!(args.descriptor.as_deref(), Some("tree.yaml"));
        assert!(args.dry_run);
        assert_eq!(args.log_filter(), "debug");

        let overrides = args.arg_overrides();
        assert_eq!(overrides.get("root").map(String::as_str), Some("/srv"));
        assert_eq!(overrides.get("port").map(String::as_str), Some("9090"));
    }

    #[test]
    fn test_resolve_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("tree.yaml");
        std::fs::write(&existing, "processes: []").unwrap();
        let fallback = dir.path().join(DEFAULT_DESCRIPTOR);

        let args = parse(&[existing.to_str().unwrap()]);
        assert_eq!(args.resolve_descriptor(dir.path()), existing);

        let args = parse(&["/nonexistent/tree.yaml"]);
        assert_eq!(args.resolve_descriptor(dir.path()), fallback);

        assert_eq!(parse(&[]).resolve_descriptor(dir.path()), fallback);
    }
}
