//! Shared fixtures for the integration tests

#![allow(dead_code)]

use remote_test_harness::{HarnessConfig, TargetSettings};
use std::path::Path;

/// Fake daemon: prints its arguments, registers ramsh, echoes every command
pub const FAKE_DAEMON: &str = r#"#!/bin/sh
echo "args: $*"
echo "Ramsh commands registered"
while read -r line; do
    echo "ramsh: $line"
    if [ "$line" = "fail" ]; then
        echo "command failed" >&2
    fi
done
"#;

/// Install `script` as `<install_dir>/bin/<name>`
#[cfg(unix)]
pub fn install_executable(install_dir: &Path, name: &str, script: &str) {
    use std::os::unix::fs::PermissionsExt;

    let bin = install_dir.join("bin");
    std::fs::create_dir_all(&bin).unwrap();
    let path = bin.join(name);
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

/// Configuration with everything below `root`
pub fn config_in(root: &Path) -> HarnessConfig {
    HarnessConfig {
        result_dir: root.join("results"),
        install_dir: root.join("install").to_string_lossy().into_owned(),
        ..HarnessConfig::default()
    }
}

/// Target settings with everything below `root`
pub fn settings_in(root: &Path) -> TargetSettings {
    config_in(root).target_settings()
}
