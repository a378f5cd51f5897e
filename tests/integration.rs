//! Integration tests for libpack using real system binaries.

#![cfg(target_os = "linux")]

use libpack::{
    bundle, default_loader, BundleConfig, BundleError, LinuxPlatform, Platform, Root, SearchPath,
    LOADER_STUB_NAME,
};
use std::path::Path;
use tempfile::TempDir;

fn host() -> Option<LinuxPlatform> {
    // Hosts without ldd (static or minimal images) cannot run these
    which::which("ldd").ok()?;
    Some(LinuxPlatform::new(default_loader()))
}

#[test]
fn test_get_deps_of_real_binary() {
    let Some(platform) = host() else { return };
    // /bin/sh exists on all Linux systems and is usually dynamically linked
    let Ok(deps) = platform.inspect_dependencies(Path::new("/bin/sh")) else {
        return;
    };
    assert!(
        deps.iter().any(|d| d.raw.contains("libc")),
        "Expected libc dependency in /bin/sh, got: {:?}",
        deps
    );
}

#[test]
fn test_nonexistent_binary() {
    let Some(platform) = host() else { return };
    let result = platform.inspect_dependencies(Path::new("/nonexistent/path/to/binary"));
    let err_msg = result.unwrap_err().to_string();
    assert!(
        err_msg.contains("does not exist"),
        "Expected 'does not exist' in error message, got: {}",
        err_msg
    );
}

#[test]
fn test_non_elf_file() {
    let Some(platform) = host() else { return };
    let temp = TempDir::new().unwrap();
    let text = temp.path().join("notes.txt");
    std::fs::write(&text, "not a binary\n").unwrap();

    let result = platform.inspect_dependencies(&text);
    assert!(
        matches!(result, Err(BundleError::Inspection { .. })),
        "Expected an inspection error for a text file, got: {:?}",
        result
    );
}

#[test]
fn test_bundle_real_shell() {
    let Some(platform) = host() else { return };
    if !platform.loader().exists() || platform.inspect_dependencies(Path::new("/bin/sh")).is_err() {
        return;
    }

    let temp = TempDir::new().unwrap();
    let config = BundleConfig {
        roots: vec![Root::binary("/bin/sh")],
        search_path: SearchPath::default(),
        output_root: temp.path().to_path_buf(),
        extra_system_roots: Vec::new(),
    };

    let report = bundle(&config, &platform).unwrap();
    assert!(temp.path().join("bin/sh").exists());
    assert!(temp.path().join("lib").join(LOADER_STUB_NAME).exists());
    assert!(report.files.len() >= 2, "Expected sh plus its libraries");
}
