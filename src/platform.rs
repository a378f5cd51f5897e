//! Host-specific inspection and relocation.
//!
//! Two loaders, two strategies:
//!
//! - **Mach-O** records every dependency as an install path inside the
//!   artifact's load commands. Relocation rewrites those paths in place with
//!   `install_name_tool -change`.
//! - **ELF** records bare sonames and leaves resolution to the dynamic linker.
//!   Relocation ships the host's dynamic linker as `lib/ld-linux.so`; bundled
//!   binaries are launched through it with `--library-path lib`.
//!
//! [`host_platform`] picks the implementation once at start-up.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::analyze::{parse_ldd_output, parse_otool_id, parse_otool_output, DependencyReference};
use crate::copy::{copy_file, make_executable, BundleLayout, Change};
use crate::error::{BundleError, Result};
use crate::paths::SystemRoots;
use crate::tool::{self, ToolError};

/// File name of the bundled dynamic linker on Linux.
pub const LOADER_STUB_NAME: &str = "ld-linux.so";

/// How artifacts are told apart in a closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityScheme {
    /// By file name. The loader reports dependencies by soname.
    Name,
    /// By resolved path. The loader reports dependencies by install path.
    RealPath,
}

/// Platform capability used by the closure builder and the bundle writer.
pub trait Platform {
    /// Short platform label for logs.
    fn name(&self) -> &'static str;

    fn identity_scheme(&self) -> IdentityScheme;

    /// Library roots that are never bundled on this platform.
    fn system_roots(&self) -> SystemRoots;

    /// List the direct dependency references of the artifact at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the artifact does not exist, is not a dynamic
    /// artifact, or the inspection tool cannot be run.
    fn inspect_dependencies(&self, path: &Path) -> Result<Vec<DependencyReference>>;

    /// Patch a copied artifact so its references point into the bundle.
    ///
    /// `changes` holds `(original, flat)` pairs for every reference of this
    /// artifact that was bundled.
    fn finalize_artifact(&self, copied: &Path, changes: &[Change]) -> Result<()>;

    /// Last step after every artifact was copied and finalized.
    fn finalize_bundle(&self, layout: &BundleLayout) -> Result<()>;
}

/// Select the implementation for the platform this process runs on.
///
/// `loader` overrides the dynamic linker bundled on Linux.
///
/// # Errors
///
/// Returns [`BundleError::Unsupported`] on hosts other than Linux and macOS.
pub fn host_platform(loader: Option<PathBuf>) -> Result<Box<dyn Platform>> {
    match std::env::consts::OS {
        "macos" => Ok(Box::new(DarwinPlatform)),
        "linux" => Ok(Box::new(LinuxPlatform::new(
            loader.unwrap_or_else(default_loader),
        ))),
        other => Err(BundleError::Unsupported(other)),
    }
}

/// The dynamic linker path for the host architecture.
pub fn default_loader() -> PathBuf {
    let path = match std::env::consts::ARCH {
        "aarch64" => "/lib/ld-linux-aarch64.so.1",
        "x86" => "/lib/ld-linux.so.2",
        "riscv64" => "/lib/ld-linux-riscv64-lp64d.so.1",
        _ => "/lib64/ld-linux-x86-64.so.2",
    };
    PathBuf::from(path)
}

fn tool_error(tool: &'static str, hint: &'static str, path: &Path, err: ToolError) -> BundleError {
    match err {
        ToolError::Missing => BundleError::ToolMissing { tool, hint },
        other => BundleError::inspection(path, format!("{tool}: {other}")),
    }
}

const LDD_HINT: &str = "Install the C library tools (libc-bin or glibc-common).";

/// ELF hosts: `ldd` for inspection, a bundled loader stub for relocation.
#[derive(Debug, Clone)]
pub struct LinuxPlatform {
    loader: PathBuf,
}

impl LinuxPlatform {
    pub fn new(loader: impl Into<PathBuf>) -> Self {
        Self {
            loader: loader.into(),
        }
    }

    pub fn loader(&self) -> &Path {
        &self.loader
    }
}

impl Platform for LinuxPlatform {
    fn name(&self) -> &'static str {
        "linux"
    }

    fn identity_scheme(&self) -> IdentityScheme {
        IdentityScheme::Name
    }

    fn system_roots(&self) -> SystemRoots {
        // libc must travel with the bundled loader, so nothing is excluded by default
        SystemRoots::default()
    }

    fn inspect_dependencies(&self, path: &Path) -> Result<Vec<DependencyReference>> {
        if !path.exists() {
            return Err(BundleError::inspection(path, "file does not exist"));
        }

        let stdout = tool::run("ldd", [path]).map_err(|e| tool_error("ldd", LDD_HINT, path, e))?;

        if stdout.contains("not a dynamic executable") {
            return Err(BundleError::inspection(path, "not a dynamic executable"));
        }

        let refs = parse_ldd_output(&stdout, &self.loader);
        debug!("{}: {} NEEDED entries", path.display(), refs.len());
        Ok(refs)
    }

    fn finalize_artifact(&self, _copied: &Path, _changes: &[Change]) -> Result<()> {
        Ok(())
    }

    fn finalize_bundle(&self, layout: &BundleLayout) -> Result<()> {
        let stub = layout.lib_dir().join(LOADER_STUB_NAME);
        copy_file(&self.loader, &stub)?;
        make_executable(&stub)?;
        info!("copy {} -> {}", self.loader.display(), stub.display());
        Ok(())
    }
}

/// `install_name_tool` arguments: one `-change from to` per change, then the
/// file. Empty when there is nothing to change.
fn change_args(changes: &[Change], copied: &Path) -> Vec<OsString> {
    if changes.is_empty() {
        return Vec::new();
    }

    let mut args = Vec::with_capacity(changes.len() * 3 + 1);
    for change in changes {
        args.push(OsString::from("-change"));
        args.push(OsString::from(&change.from));
        args.push(OsString::from(&change.to));
    }
    args.push(copied.as_os_str().to_os_string());
    args
}

/// Mach-O hosts: `otool -L` for inspection, `install_name_tool` for relocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct DarwinPlatform;

const XCODE_HINT: &str = "Install Xcode Command Line Tools: xcode-select --install";

impl DarwinPlatform {
    /// Re-apply an ad-hoc signature after patching. Best effort: unsigned
    /// hosts and older toolchains simply skip it.
    fn resign(path: &Path) {
        if let Err(e) = tool::run(
            "codesign",
            [
                OsStr::new("-s"),
                OsStr::new("-"),
                OsStr::new("--force"),
                OsStr::new("--preserve-metadata=entitlements,requirements,flags,runtime"),
                path.as_os_str(),
            ],
        ) {
            debug!("codesign skipped for {}: {e}", path.display());
        }
    }
}

impl Platform for DarwinPlatform {
    fn name(&self) -> &'static str {
        "macos"
    }

    fn identity_scheme(&self) -> IdentityScheme {
        IdentityScheme::RealPath
    }

    fn system_roots(&self) -> SystemRoots {
        SystemRoots::new(["/usr/lib", "/System"])
    }

    fn inspect_dependencies(&self, path: &Path) -> Result<Vec<DependencyReference>> {
        if !path.exists() {
            return Err(BundleError::inspection(path, "file does not exist"));
        }

        let stdout = tool::run("otool", [OsStr::new("-L"), path.as_os_str()])
            .map_err(|e| tool_error("otool", XCODE_HINT, path, e))?;

        if stdout.contains("is not an object file") {
            return Err(BundleError::inspection(path, "not a Mach-O file"));
        }

        // A dylib lists its own install name among its load commands
        let own_id = tool::run("otool", [OsStr::new("-D"), path.as_os_str()])
            .map_err(|e| tool_error("otool", XCODE_HINT, path, e))?;
        let own_id = parse_otool_id(&own_id);

        let refs = parse_otool_output(&stdout, own_id.as_deref());
        debug!("{}: {} load commands", path.display(), refs.len());
        Ok(refs)
    }

    fn finalize_artifact(&self, copied: &Path, changes: &[Change]) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }

        tool::run("install_name_tool", change_args(changes, copied)).map_err(|e| match e {
            ToolError::Missing => BundleError::ToolMissing {
                tool: "install_name_tool",
                hint: XCODE_HINT,
            },
            other => BundleError::Rewrite {
                path: copied.to_path_buf(),
                message: other.to_string(),
            },
        })?;

        Self::resign(copied);
        Ok(())
    }

    fn finalize_bundle(&self, _layout: &BundleLayout) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_identity_schemes() {
        assert_eq!(LinuxPlatform::new("/x").identity_scheme(), IdentityScheme::Name);
        assert_eq!(DarwinPlatform.identity_scheme(), IdentityScheme::RealPath);
    }

    #[test]
    fn test_darwin_excludes_system_libraries() {
        let roots = DarwinPlatform.system_roots();
        assert!(roots.contains(Path::new("/usr/lib/libSystem.B.dylib")));
        assert!(roots.contains(Path::new(
            "/System/Library/Frameworks/CoreFoundation.framework/CoreFoundation"
        )));
        assert!(!roots.contains(Path::new("/opt/homebrew/lib/libssl.3.dylib")));
    }

    #[test]
    fn test_linux_excludes_nothing_by_default() {
        let roots = LinuxPlatform::new("/x").system_roots();
        assert!(!roots.contains(Path::new("/lib/x86_64-linux-gnu/libc.so.6")));
    }

    #[test]
    fn test_missing_artifact_is_inspection_error() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("nope");
        for platform in [
            Box::new(LinuxPlatform::new("/x")) as Box<dyn Platform>,
            Box::new(DarwinPlatform) as Box<dyn Platform>,
        ] {
            let err = platform.inspect_dependencies(&missing).unwrap_err();
            assert!(matches!(err, BundleError::Inspection { .. }));
            assert!(err.to_string().contains("does not exist"));
        }
    }

    #[test]
    fn test_linux_loader_stub_installed() {
        let temp = TempDir::new().unwrap();
        let loader = temp.path().join("ld-linux-x86-64.so.2");
        std::fs::write(&loader, b"loader").unwrap();

        let layout = BundleLayout::new(temp.path().join("out"));
        layout.prepare().unwrap();
        LinuxPlatform::new(&loader).finalize_bundle(&layout).unwrap();

        let stub = layout.lib_dir().join(LOADER_STUB_NAME);
        assert_eq!(std::fs::read(stub).unwrap(), b"loader");
    }

    #[test]
    fn test_linux_missing_loader_fails() {
        let temp = TempDir::new().unwrap();
        let layout = BundleLayout::new(temp.path().join("out"));
        layout.prepare().unwrap();
        let err = LinuxPlatform::new(temp.path().join("missing-ld.so"))
            .finalize_bundle(&layout)
            .unwrap_err();
        assert!(matches!(err, BundleError::Copy { .. }));
    }

    #[test]
    fn test_change_args() {
        let changes = vec![
            Change {
                from: "/opt/lib/libbar.dylib".into(),
                to: "lib/libbar.dylib".into(),
            },
            Change {
                from: "@rpath/libfoo.dylib".into(),
                to: "lib/libfoo.dylib".into(),
            },
        ];
        let args = change_args(&changes, Path::new("out/bin/server"));
        assert_eq!(
            args,
            [
                "-change",
                "/opt/lib/libbar.dylib",
                "lib/libbar.dylib",
                "-change",
                "@rpath/libfoo.dylib",
                "lib/libfoo.dylib",
                "out/bin/server",
            ]
            .map(OsString::from)
        );
    }

    #[test]
    fn test_change_args_empty() {
        assert!(change_args(&[], Path::new("out/bin/server")).is_empty());
    }

    #[test]
    fn test_darwin_without_changes_is_noop() {
        DarwinPlatform
            .finalize_artifact(Path::new("/nonexistent/bin/server"), &[])
            .unwrap();
    }
}
