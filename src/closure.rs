//! Transitive dependency closure of a set of root artifacts.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::analyze::DependencyReference;
use crate::error::Result;
use crate::paths::{PathResolver, Resolution};
use crate::platform::{IdentityScheme, Platform};

/// Where an artifact lands in the bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    Binary,
    Library,
}

impl Role {
    /// Output directory name for this role.
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Binary => "bin",
            Self::Library => "lib",
        }
    }
}

/// A file the caller asked to bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Root {
    pub path: PathBuf,
    pub role: Role,
}

impl Root {
    pub fn binary(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            role: Role::Binary,
        }
    }

    pub fn library(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            role: Role::Library,
        }
    }
}

/// A resolved reference from one artifact to another in the closure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    /// The reference as recorded in the referring artifact.
    pub reference: String,
    /// Identity key of the referenced artifact.
    pub target: String,
}

/// One file in the closure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// How the artifact was first referred to (root path or dependency reference).
    pub original_reference: String,
    pub real_path: PathBuf,
    /// File name used inside the bundle.
    pub name: String,
    pub role: Role,
    /// Resolved outgoing references. Excluded and unresolved references are
    /// not recorded.
    pub dependencies: Vec<Edge>,
}

/// Every artifact reachable from the roots, keyed by identity.
#[derive(Debug, Clone, Default)]
pub struct ClosureSet {
    artifacts: BTreeMap<String, Artifact>,
}

impl ClosureSet {
    pub fn get(&self, key: &str) -> Option<&Artifact> {
        self.artifacts.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.artifacts.contains_key(key)
    }

    /// Artifacts in identity-key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Artifact)> {
        self.artifacts.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn insert_for_test(&mut self, key: &str, artifact: Artifact) {
        self.artifacts.insert(key.to_string(), artifact);
    }
}

/// Walks dependency references from a list of roots.
pub struct ClosureBuilder<'a> {
    platform: &'a dyn Platform,
    resolver: &'a PathResolver,
}

impl<'a> ClosureBuilder<'a> {
    pub fn new(platform: &'a dyn Platform, resolver: &'a PathResolver) -> Self {
        Self { platform, resolver }
    }

    fn identity(&self, name: &str, real_path: &Path) -> String {
        match self.platform.identity_scheme() {
            IdentityScheme::Name => name.to_string(),
            IdentityScheme::RealPath => real_path.to_string_lossy().into_owned(),
        }
    }

    /// Build the closure of `roots`.
    ///
    /// Each artifact is inspected at most once. Cycles and diamonds are
    /// handled by marking an artifact before its references are followed.
    ///
    /// # Errors
    ///
    /// Returns the first inspection failure. No partial closure is returned.
    pub fn build(&self, roots: &[Root]) -> Result<ClosureSet> {
        let root_roles: HashMap<String, Role> = roots
            .iter()
            .map(|root| {
                let name = file_name(&root.path);
                (self.identity(&name, &root.path), root.role)
            })
            .collect();

        let mut to_process: Vec<Artifact> = roots
            .iter()
            .rev()
            .map(|root| Artifact {
                original_reference: root.path.to_string_lossy().into_owned(),
                name: file_name(&root.path),
                real_path: root.path.clone(),
                role: root.role,
                dependencies: Vec::new(),
            })
            .collect();

        let mut closure = ClosureSet::default();

        while let Some(artifact) = to_process.pop() {
            let key = self.identity(&artifact.name, &artifact.real_path);

            match closure.artifacts.entry(key.clone()) {
                Entry::Occupied(existing) => {
                    if existing.get().real_path != artifact.real_path {
                        warn!(
                            "{} and {} share the name {}; keeping the first",
                            existing.get().real_path.display(),
                            artifact.real_path.display(),
                            artifact.name
                        );
                    }
                    continue;
                }
                Entry::Vacant(slot) => {
                    slot.insert(artifact.clone());
                }
            }

            let mut edges = Vec::new();
            for reference in self.platform.inspect_dependencies(&artifact.real_path)? {
                let real_path = match self.resolver.resolve(&reference) {
                    Resolution::Found(path) => path,
                    Resolution::Excluded => {
                        debug!("{}: skipping system library {}", artifact.name, reference.raw);
                        continue;
                    }
                    Resolution::NotFound => {
                        debug!("{}: {} not found, skipping", artifact.name, reference.raw);
                        continue;
                    }
                };

                let name = bundled_name(&reference, &real_path);
                let target = self.identity(&name, &real_path);
                edges.push(Edge {
                    reference: reference.raw.clone(),
                    target: target.clone(),
                });

                if !closure.contains(&target) {
                    to_process.push(Artifact {
                        original_reference: reference.raw,
                        real_path,
                        name,
                        role: root_roles.get(&target).copied().unwrap_or(Role::Library),
                        dependencies: Vec::new(),
                    });
                }
            }

            if let Some(entry) = closure.artifacts.get_mut(&key) {
                entry.dependencies = edges;
            }
        }

        debug!("closure has {} artifacts", closure.len());
        Ok(closure)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Bare sonames keep the name the loader asks for; anything path-like is
/// bundled under the resolved file's name.
fn bundled_name(reference: &DependencyReference, real_path: &Path) -> String {
    if reference.raw.contains('/') {
        file_name(real_path)
    } else {
        reference.raw.clone()
    }
}
