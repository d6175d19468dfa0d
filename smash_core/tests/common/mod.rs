use std::fs;
use std::path::{Path, PathBuf};

/// Path of a script under the workspace `test_targets/` directory, made
/// executable in case the checkout dropped the mode bits.
pub fn get_test_target_path(name: &str) -> PathBuf {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../test_targets")
        .join(name);
    if !path.exists() {
        panic!("Test target missing: {path:?}");
    }
    set_mode(&path, 0o755);
    path
}

#[allow(dead_code)]
pub fn write_script(dir: &Path, name: &str, body: &str, mode: u32) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    set_mode(&path, mode);
    path
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).unwrap();
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) {}
