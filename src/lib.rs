//! Bundle native binaries together with their dynamic-library closure.
//!
//! Given root executables and libraries, finds every shared library they need
//! (transitively), copies everything into a flat `bin/` + `lib/` layout and
//! relocates the copies so the bundle runs without the original install
//! locations:
//!
//! - on macOS, load commands are rewritten to `lib/<name>`;
//! - on Linux, the host dynamic linker is bundled as `lib/ld-linux.so` and
//!   binaries are launched through it with `--library-path lib`.

mod analyze;
mod closure;
mod copy;
mod error;
mod paths;
mod platform;
mod tool;

use std::path::PathBuf;

use tracing::info;

pub use analyze::{parse_ldd_output, parse_otool_id, parse_otool_output, DependencyReference};
pub use closure::{Artifact, ClosureBuilder, ClosureSet, Edge, Role, Root};
pub use copy::{
    copy_file, flat_reference, make_executable, BundleLayout, BundleReport, BundleWriter,
    BundledFile, Change, ChangeMap, BUNDLE_MODE,
};
pub use error::{BundleError, Result};
pub use paths::{PathResolver, Resolution, SearchPath, SystemRoots};
pub use platform::{
    default_loader, host_platform, DarwinPlatform, IdentityScheme, LinuxPlatform, Platform,
    LOADER_STUB_NAME,
};

/// Inputs for one bundling run.
#[derive(Debug, Clone)]
pub struct BundleConfig {
    pub roots: Vec<Root>,
    pub search_path: SearchPath,
    pub output_root: PathBuf,
    /// Prefixes excluded in addition to the platform's system roots.
    pub extra_system_roots: Vec<PathBuf>,
}

impl BundleConfig {
    /// The resolver for this run: its search path plus every system root.
    pub fn resolver(&self, platform: &dyn Platform) -> PathResolver {
        let mut roots = platform.system_roots();
        roots.extend(self.extra_system_roots.iter().cloned());
        PathResolver::new(self.search_path.clone(), roots)
    }
}

/// Resolve the closure of `config.roots` and write it under `config.output_root`.
///
/// Discovery finishes before anything is written, so an inspection failure
/// leaves the output untouched.
///
/// # Errors
///
/// Returns the first fatal error; see [`BundleError`].
pub fn bundle(config: &BundleConfig, platform: &dyn Platform) -> Result<BundleReport> {
    info!(
        "bundling {} roots for {} into {}",
        config.roots.len(),
        platform.name(),
        config.output_root.display()
    );

    let resolver = config.resolver(platform);
    let closure = ClosureBuilder::new(platform, &resolver).build(&config.roots)?;

    let writer = BundleWriter::new(platform, BundleLayout::new(&config.output_root));
    let report = writer.write(&closure)?;

    info!("bundled {} files", report.files.len());
    Ok(report)
}
