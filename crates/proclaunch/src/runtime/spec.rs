//! Static process specifications consumed by the supervisor

use crate::config::{SubstitutionContext, SubstitutionError, TreeFile};
use std::fmt;
use std::path::PathBuf;

/// Position of a node in the process tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeId {
    /// Top-level process, by index in descriptor order
    TopLevel(usize),
    /// Dependent `index` of top-level process `parent`
    Dependent { parent: usize, index: usize },
}

impl NodeId {
    /// Index of the top-level entry this node belongs to
    pub fn entry(&self) -> usize {
        match *self {
            NodeId::TopLevel(i) => i,
            NodeId::Dependent { parent, .. } => parent,
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeId::TopLevel(i) => write!(f, "parent #{}", i + 1),
            NodeId::Dependent { parent, index } => {
                write!(f, "child #{} of parent #{}", index + 1, parent + 1)
            }
        }
    }
}

/// Immutable description of one process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub path: PathBuf,
    pub working_dir: Option<PathBuf>,
    /// Raw command line text, split at setup
    pub arguments: Option<String>,
    pub restart: bool,
    /// Index of the owning top-level spec, `None` for top-level specs
    pub parent: Option<usize>,
}

impl ProcessSpec {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            working_dir: None,
            arguments: None,
            restart: false,
            parent: None,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_arguments(mut self, arguments: impl Into<String>) -> Self {
        self.arguments = Some(arguments.into());
        self
    }

    pub fn with_restart(mut self, restart: bool) -> Self {
        self.restart = restart;
        self
    }

    /// Short label for log lines: the executable's file name
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.to_string_lossy().into_owned())
    }

    pub fn is_top_level(&self) -> bool {
        self.parent.is_none()
    }
}

/// A top-level spec with its dependents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentSpec {
    pub spec: ProcessSpec,
    pub dependents: Vec<ProcessSpec>,
}

/// The validated tree the supervisor is built from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeSpec {
    pub parents: Vec<ParentSpec>,
}

impl TreeSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a top-level spec and its dependents, fixing up parent links.
    pub fn with_parent(mut self, spec: ProcessSpec, dependents: Vec<ProcessSpec>) -> Self {
        let index = self.parents.len();
        let dependents = dependents
            .into_iter()
            .map(|mut d| {
                d.parent = Some(index);
                d
            })
            .collect();
        self.parents.push(ParentSpec {
            spec: ProcessSpec {
                parent: None,
                ..spec
            },
            dependents,
        });
        self
    }

    /// Build from a descriptor, expanding substitutions in every string field
    pub fn from_tree_file(
        tree_file: &TreeFile,
        ctx: &SubstitutionContext,
    ) -> Result<Self, SpecError> {
        let mut tree = TreeSpec::new();

        for (i, parent) in tree_file.processes.iter().enumerate() {
            let id = NodeId::TopLevel(i);
            let spec = resolve(
                id,
                ctx,
                &parent.path,
                parent.working_dir.as_deref(),
                parent.arguments.as_deref(),
            )?
            .with_restart(parent.restart);

            let mut dependents = Vec::with_capacity(parent.dependencies.len());
            for (j, dep) in parent.dependencies.iter().enumerate() {
                let id = NodeId::Dependent { parent: i, index: j };
                let spec = resolve(
                    id,
                    ctx,
                    &dep.path,
                    dep.working_dir.as_deref(),
                    dep.arguments.as_deref(),
                )?
                .with_restart(dep.restart);
                dependents.push(spec);
            }

            tree = tree.with_parent(spec, dependents);
        }

        Ok(tree)
    }

    /// Total number of specs, dependents included
    pub fn len(&self) -> usize {
        self.parents.iter().map(|p| 1 + p.dependents.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }

    /// Every spec with its position, in launch order
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &ProcessSpec)> {
        self.parents.iter().enumerate().flat_map(|(i, p)| {
            std::iter::once((NodeId::TopLevel(i), &p.spec)).chain(
                p.dependents
                    .iter()
                    .enumerate()
                    .map(move |(j, d)| (NodeId::Dependent { parent: i, index: j }, d)),
            )
        })
    }
}

fn resolve(
    node: NodeId,
    ctx: &SubstitutionContext,
    path: &str,
    working_dir: Option<&str>,
    arguments: Option<&str>,
) -> Result<ProcessSpec, SpecError> {
    let subst = |field: &'static str, value: &str| {
        ctx.substitute(value).map_err(|source| SpecError::Substitution {
            node,
            field,
            source,
        })
    };

    let mut spec = ProcessSpec::new(subst("path", path)?);
    if let Some(dir) = working_dir.filter(|d| !d.is_empty()) {
        spec.working_dir = Some(PathBuf::from(subst("working_dir", dir)?));
    }
    if let Some(args) = arguments {
        spec.arguments = Some(subst("arguments", args)?);
    }
    Ok(spec)
}

/// Errors building a [`TreeSpec`] from a descriptor
#[derive(Debug, thiserror::Error)]
pub enum SpecError {
    #[error("Substitution failed in {node} '{field}': {source}")]
    Substitution {
        node: NodeId,
        field: &'static str,
        #[source]
        source: SubstitutionError,
    },
}
