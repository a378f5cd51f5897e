//! Writing a closure into a flat `bin/` + `lib/` layout.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::closure::{Artifact, ClosureSet, Role};
use crate::error::{BundleError, Result};
use crate::platform::Platform;

/// Mode applied to every bundled file.
pub const BUNDLE_MODE: u32 = 0o755;

/// Make a file executable (chmod 755).
pub fn make_executable(path: &Path) -> Result<()> {
    let permission_error = |source| BundleError::Permission {
        path: path.to_path_buf(),
        source,
    };
    let mut perms = fs::metadata(path).map_err(permission_error)?.permissions();
    perms.set_mode(BUNDLE_MODE);
    fs::set_permissions(path, perms).map_err(permission_error)?;
    Ok(())
}

/// Copy one file, following symlinks on the source side.
pub fn copy_file(src: &Path, dst: &Path) -> Result<()> {
    fs::copy(src, dst).map_err(|source| BundleError::Copy {
        src: src.to_path_buf(),
        dst: dst.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// The two output directories under one root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleLayout {
    root: PathBuf,
}

impl BundleLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.root.join(Role::Binary.dir_name())
    }

    pub fn lib_dir(&self) -> PathBuf {
        self.root.join(Role::Library.dir_name())
    }

    pub fn dir_for(&self, role: Role) -> PathBuf {
        self.root.join(role.dir_name())
    }

    /// Delete and recreate `bin/` and `lib/`.
    pub fn prepare(&self) -> Result<()> {
        for dir in [self.bin_dir(), self.lib_dir()] {
            let layout_error = |source| BundleError::Layout {
                path: dir.clone(),
                source,
            };
            if dir.exists() || dir.is_symlink() {
                fs::remove_dir_all(&dir).map_err(layout_error)?;
            }
            fs::create_dir_all(&dir).map_err(layout_error)?;
        }
        Ok(())
    }
}

/// One reference rewrite inside a bundled artifact.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Change {
    pub from: String,
    pub to: String,
}

/// Original reference -> flat bundle-relative reference, for every
/// reference that resolved into the closure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeMap {
    changes: BTreeMap<String, String>,
}

impl ChangeMap {
    /// Computed from the finished closure; targets must all be known.
    pub fn from_closure(closure: &ClosureSet) -> Self {
        let mut changes = BTreeMap::new();
        for (_, artifact) in closure.iter() {
            for edge in &artifact.dependencies {
                if let Some(target) = closure.get(&edge.target) {
                    changes
                        .entry(edge.reference.clone())
                        .or_insert_with(|| flat_reference(target));
                }
            }
        }
        Self { changes }
    }

    pub fn get(&self, reference: &str) -> Option<&str> {
        self.changes.get(reference).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// The rewrites that apply to `artifact`'s own references.
    pub fn changes_for(&self, artifact: &Artifact) -> Vec<Change> {
        let mut out: Vec<Change> = artifact
            .dependencies
            .iter()
            .filter_map(|edge| {
                self.get(&edge.reference).map(|to| Change {
                    from: edge.reference.clone(),
                    to: to.to_string(),
                })
            })
            .filter(|change| change.from != change.to)
            .collect();
        out.sort();
        out.dedup();
        out
    }
}

/// `lib/<name>` (or `bin/<name>` for a binary root referenced as a library).
pub fn flat_reference(artifact: &Artifact) -> String {
    format!("{}/{}", artifact.role.dir_name(), artifact.name)
}

/// A file placed in the bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundledFile {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub role: Role,
    /// Number of references rewritten in the copy.
    pub rewritten: usize,
}

/// What a successful write produced.
#[derive(Debug, Clone, Default)]
pub struct BundleReport {
    pub files: Vec<BundledFile>,
}

/// Copies a closure into a [`BundleLayout`] and relocates it.
pub struct BundleWriter<'a> {
    platform: &'a dyn Platform,
    layout: BundleLayout,
}

impl<'a> BundleWriter<'a> {
    pub fn new(platform: &'a dyn Platform, layout: BundleLayout) -> Self {
        Self { platform, layout }
    }

    /// Write `closure` into the layout.
    ///
    /// Every artifact is copied before any is rewritten, since the flat
    /// names of all artifacts must be known first.
    ///
    /// # Errors
    ///
    /// Returns the first copy, permission or rewrite failure. Files already
    /// written are left in place; the next run's pre-clean removes them.
    pub fn write(&self, closure: &ClosureSet) -> Result<BundleReport> {
        self.layout.prepare()?;

        let mut placed: HashSet<PathBuf> = HashSet::new();
        let mut copied: Vec<(&Artifact, BundledFile)> = Vec::with_capacity(closure.len());

        for (_, artifact) in closure.iter() {
            let destination = self.layout.dir_for(artifact.role).join(&artifact.name);
            if !placed.insert(destination.clone()) {
                warn!(
                    "{} collides with an earlier artifact at {}; skipping",
                    artifact.real_path.display(),
                    destination.display()
                );
                continue;
            }

            copy_file(&artifact.real_path, &destination)?;
            make_executable(&destination)?;
            info!("copy {} -> {}", artifact.real_path.display(), destination.display());

            copied.push((
                artifact,
                BundledFile {
                    source: artifact.real_path.clone(),
                    destination,
                    role: artifact.role,
                    rewritten: 0,
                },
            ));
        }

        let change_map = ChangeMap::from_closure(closure);
        let mut report = BundleReport::default();

        for (artifact, mut file) in copied {
            let changes = change_map.changes_for(artifact);
            self.platform.finalize_artifact(&file.destination, &changes)?;
            file.rewritten = changes.len();
            report.files.push(file);
        }

        self.platform.finalize_bundle(&self.layout)?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::closure::Edge;
    use tempfile::TempDir;

    fn artifact(name: &str, role: Role, deps: &[(&str, &str)]) -> Artifact {
        Artifact {
            original_reference: format!("/src/{name}"),
            real_path: PathBuf::from(format!("/src/{name}")),
            name: name.to_string(),
            role,
            dependencies: deps
                .iter()
                .map(|(reference, target)| Edge {
                    reference: (*reference).to_string(),
                    target: (*target).to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_make_executable() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("lib.so");
        fs::write(&file, b"x").unwrap();
        fs::set_permissions(&file, fs::Permissions::from_mode(0o444)).unwrap();

        make_executable(&file).unwrap();
        let mode = fs::metadata(&file).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, BUNDLE_MODE);
    }

    #[test]
    fn test_make_executable_missing_file() {
        let err = make_executable(Path::new("/nonexistent/lib.so")).unwrap_err();
        assert!(matches!(err, BundleError::Permission { .. }));
    }

    #[test]
    fn test_prepare_wipes_previous_output() {
        let temp = TempDir::new().unwrap();
        let layout = BundleLayout::new(temp.path());
        fs::create_dir_all(layout.lib_dir().join("nested")).unwrap();
        fs::write(layout.lib_dir().join("stale.so"), b"old").unwrap();
        fs::write(temp.path().join("keep.txt"), b"keep").unwrap();

        layout.prepare().unwrap();

        assert!(layout.bin_dir().is_dir());
        assert!(layout.lib_dir().is_dir());
        assert_eq!(fs::read_dir(layout.lib_dir()).unwrap().count(), 0);
        assert!(temp.path().join("keep.txt").exists());
    }

    #[test]
    fn test_flat_reference() {
        assert_eq!(
            flat_reference(&artifact("libfoo.dylib", Role::Library, &[])),
            "lib/libfoo.dylib"
        );
    }

    #[test]
    fn test_changes_only_cover_own_references() {
        let mut closure = ClosureSet::default();
        closure.insert_for_test(
            "/src/server",
            artifact("server", Role::Binary, &[("@rpath/libfoo.dylib", "/src/libfoo.dylib")]),
        );
        closure.insert_for_test(
            "/src/libfoo.dylib",
            artifact(
                "libfoo.dylib",
                Role::Library,
                &[("/opt/x/libbar.dylib", "/src/libbar.dylib")],
            ),
        );
        closure.insert_for_test(
            "/src/libbar.dylib",
            artifact("libbar.dylib", Role::Library, &[]),
        );

        let map = ChangeMap::from_closure(&closure);
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("@rpath/libfoo.dylib"), Some("lib/libfoo.dylib"));
        assert_eq!(map.get("/usr/lib/libSystem.B.dylib"), None);

        let server = closure.get("/src/server").unwrap();
        assert_eq!(
            map.changes_for(server),
            vec![Change {
                from: "@rpath/libfoo.dylib".into(),
                to: "lib/libfoo.dylib".into(),
            }]
        );
        assert!(map.changes_for(closure.get("/src/libbar.dylib").unwrap()).is_empty());
    }
}
