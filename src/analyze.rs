//! Parsing dependency reports from the platform inspection tools.
//!
//! Linux artifacts are inspected with `ldd`, which asks the host dynamic
//! linker to resolve every NEEDED entry and print where it found it. Mach-O
//! artifacts are inspected with `otool -L`, which prints the raw load commands
//! without resolving them.

use std::path::{Path, PathBuf};

/// Entries `ldd` reports that are provided by the kernel, never by a file.
const VIRTUAL_OBJECTS: &[&str] = &["linux-vdso.so.1", "linux-gate.so.1"];

/// One direct dependency as an artifact's metadata names it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DependencyReference {
    /// The reference exactly as recorded (`libfoo.so.1`, `@rpath/libfoo.dylib`,
    /// `/opt/lib/libbar.dylib`).
    pub raw: String,
    /// The path the loader resolved the reference to, when the inspector
    /// reports one.
    pub inline_path: Option<PathBuf>,
}

impl DependencyReference {
    /// A reference with no loader-resolved path.
    pub fn new(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            inline_path: None,
        }
    }

    /// A reference the loader already resolved to `path`.
    pub fn resolved(raw: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            raw: raw.into(),
            inline_path: Some(path.into()),
        }
    }

    /// True when the reference starts with a runtime token such as
    /// `@rpath/` or `@loader_path/`.
    pub fn is_symbolic(&self) -> bool {
        self.raw.starts_with('@')
    }

    /// True when the reference is an absolute filesystem path.
    pub fn is_absolute(&self) -> bool {
        Path::new(&self.raw).is_absolute()
    }

    /// The final path component of the reference.
    pub fn basename(&self) -> &str {
        self.raw.rsplit('/').next().unwrap_or(&self.raw)
    }
}

/// Parse `ldd` output into NEEDED references.
///
/// Example:
/// ```text
///         linux-vdso.so.1 (0x00007ffc4b5f2000)
///         libfoo.so.1 => /opt/libs/libfoo.so.1 (0x00007f8a1c000000)
///         libbar.so => not found
///         /lib64/ld-linux-x86-64.so.2 (0x00007f8a1c400000)
/// ```
///
/// The virtual dynamic shared object and the dynamic linker's own record
/// (`loader`) are skipped. Entries without a resolved path carry no
/// `inline_path`. NEEDED entries recorded as absolute paths appear without
/// `=>` and are kept as absolute references.
pub fn parse_ldd_output(output: &str, loader: &Path) -> Vec<DependencyReference> {
    let mut refs = Vec::new();

    for line in output.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            [name, "=>", target, ..] => {
                let skipped = name.ends_with(':') || VIRTUAL_OBJECTS.contains(name);
                if skipped || Path::new(name) == loader {
                    continue;
                }
                if !target.starts_with('/') {
                    refs.push(DependencyReference::new(*name));
                } else if Path::new(target) != loader {
                    refs.push(DependencyReference::resolved(*name, *target));
                }
            }
            [name, address] if address.starts_with("(0x") => {
                if name.starts_with('/') && Path::new(name) != loader {
                    refs.push(DependencyReference::new(*name));
                }
            }
            _ => {}
        }
    }

    refs
}

/// Parse `otool -L` output into load-command references.
///
/// Example:
/// ```text
/// /opt/app/bin/server:
///         @rpath/libfoo.dylib (compatibility version 1.0.0, current version 1.0.0)
///         /usr/lib/libSystem.B.dylib (compatibility version 1.0.0, current version 1311.0.0)
/// ```
///
/// The first line names the inspected file and is skipped. A dylib also lists
/// its own install name; pass it as `own_id` (see [`parse_otool_id`]) to drop
/// that entry. Universal binaries list the same load commands once per
/// architecture; duplicates are collapsed.
pub fn parse_otool_output(output: &str, own_id: Option<&str>) -> Vec<DependencyReference> {
    let mut refs: Vec<DependencyReference> = Vec::new();

    for line in output.lines().skip(1) {
        let Some(idx) = line.find(" (compatibility version") else {
            continue;
        };
        let path = line[..idx].trim();
        if path.is_empty() || own_id == Some(path) || refs.iter().any(|r| r.raw == path) {
            continue;
        }
        refs.push(DependencyReference::new(path));
    }

    refs
}

/// Parse `otool -D` output into the artifact's install name.
///
/// Executables and bundles have none and print only the header line.
pub fn parse_otool_id(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.ends_with(':'))
        .map(str::to_string)
        .next()
}
