//! Resolving dependency references to files on disk.

use std::path::{Path, PathBuf};

use crate::analyze::DependencyReference;

/// Ordered list of directories searched for libraries. First match wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPath {
    dirs: Vec<PathBuf>,
}

impl SearchPath {
    pub fn new<I, P>(dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            dirs: dirs.into_iter().map(Into::into).collect(),
        }
    }

    /// Find `name` in the search directories.
    ///
    /// Returns `None` if the file is not present in any of them.
    #[must_use = "found library path should be used"]
    pub fn locate(&self, name: &str) -> Option<PathBuf> {
        self.dirs
            .iter()
            .map(|dir| dir.join(name))
            .find(|p| p.is_file())
    }
}

/// Path prefixes of libraries assumed present on every host of the same
/// platform. References under these are never bundled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemRoots {
    prefixes: Vec<PathBuf>,
}

impl SystemRoots {
    pub fn new<I, P>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn extend<I, P>(&mut self, more: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.prefixes.extend(more.into_iter().map(Into::into));
    }

    /// Component-wise prefix match, so `/usr/lib` covers
    /// `/usr/lib/libSystem.B.dylib` but not `/usr/libexec/foo`.
    pub fn contains(&self, path: &Path) -> bool {
        self.prefixes.iter().any(|root| path.starts_with(root))
    }
}

/// Outcome of resolving one reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The reference maps to this existing file.
    Found(PathBuf),
    /// The reference names a system library and is left alone.
    Excluded,
    /// No file could be found. The reference is dropped from the closure.
    NotFound,
}

/// Maps raw dependency references to real paths.
#[derive(Debug, Clone)]
pub struct PathResolver {
    search_path: SearchPath,
    system_roots: SystemRoots,
}

impl PathResolver {
    pub fn new(search_path: SearchPath, system_roots: SystemRoots) -> Self {
        Self {
            search_path,
            system_roots,
        }
    }

    /// Resolve `reference` against the configured search path.
    ///
    /// - `@token/...` references are looked up by basename in the search path.
    /// - References under a system root are [`Resolution::Excluded`], whether or
    ///   not they exist.
    /// - Absolute references are used as-is when the file exists.
    /// - Bare names use the loader-resolved path when the inspector supplied
    ///   one, otherwise the search path.
    pub fn resolve(&self, reference: &DependencyReference) -> Resolution {
        if reference.is_symbolic() {
            return self.lookup(reference.basename());
        }

        if reference.is_absolute() {
            let path = Path::new(&reference.raw);
            if self.system_roots.contains(path) {
                return Resolution::Excluded;
            }
            return if path.is_file() {
                Resolution::Found(path.to_path_buf())
            } else {
                Resolution::NotFound
            };
        }

        match &reference.inline_path {
            Some(path) if self.system_roots.contains(path) => Resolution::Excluded,
            Some(path) if path.is_file() => Resolution::Found(path.clone()),
            _ => self.lookup(&reference.raw),
        }
    }

    fn lookup(&self, name: &str) -> Resolution {
        match self.search_path.locate(name) {
            Some(path) if self.system_roots.contains(&path) => Resolution::Excluded,
            Some(path) => Resolution::Found(path),
            None => Resolution::NotFound,
        }
    }
}
