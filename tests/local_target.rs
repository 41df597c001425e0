//! Local target driving real processes

#![cfg(unix)]

mod common;

use common::{install_executable, settings_in, FAKE_DAEMON};
use remote_test_harness::{ExecOptions, LaunchOptions, Target, TargetInfo};
use std::path::Path;
use std::time::Duration;

const TIMEOUT: Option<Duration> = Some(Duration::from_secs(10));

fn local_target(root: &Path) -> Target {
    install_executable(&root.join("install"), "ramses-daemon", FAKE_DAEMON);
    let mut target = Target::local(TargetInfo::local(), settings_in(root));
    assert!(target.setup(false));
    target
}

#[test]
fn test_daemon_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let mut target = local_target(dir.path());

    let mut daemon = target.start_daemon(&LaunchOptions::default());
    assert!(daemon.is_started());
    assert!(daemon.wait_for_initialisation(Duration::from_secs(10)));
    assert!(daemon.send_ramsh_command("help", Some("ramsh: help"), TIMEOUT));

    let watch = daemon.start_watch_stderr();
    assert!(daemon.send_ramsh_command("fail", None, None));
    assert!(daemon.wait_for_msg_in_stderr(Some(watch), "command failed", TIMEOUT));
    // the watch was consumed by the match
    assert!(!daemon.wait_for_msg_in_stderr(Some(watch), "command failed", TIMEOUT));

    target.kill_application(&mut daemon);
    assert!(!daemon.is_started());

    let stdout = daemon.get_stdout_data();
    assert!(stdout[0].contains("-myport 6001"));
    assert!(stdout[0].contains("-dai SMGR"));
    assert!(stdout[0].contains("--enableSmokeTestContext"));
    assert!(stdout.contains(&"ramsh: help".to_string()));

    target
        .save_application_output(&daemon, "Daemon", "lifecycle", None)
        .unwrap();
    let saved = dir.path().join("results/Daemon/lifecycle/ramses-daemon_local.txt");
    assert!(std::fs::read_to_string(saved).unwrap().contains("Ramsh commands registered"));
    assert!(dir
        .path()
        .join("results/Daemon/lifecycle/ramses-daemon_local_STDERR.txt")
        .exists());

    target.tear_down(false);
    assert!(!target.is_connected());
}

#[test]
fn test_missing_executable_is_not_started() {
    let dir = tempfile::tempdir().unwrap();
    let mut target = local_target(dir.path());

    let mut client = target.start_client("no-such-client", &LaunchOptions::default());
    // the shell starts, but exec fails right away
    if client.is_started() {
        assert!(!client.wait_for_msg_in_stdout_from_beginning("anything", Some(Duration::from_millis(500))));
        target.kill_application(&mut client);
        assert!(client.get_stderr_data().iter().any(|l| l.contains("no-such-client")));
    }
    target.tear_down(false);
}

#[test]
fn test_execute_with_default_environment() {
    let dir = tempfile::tempdir().unwrap();
    let mut target = local_target(dir.path());
    target
        .default_environment_mut()
        .insert("HARNESS_TARGET".to_string(), "local".to_string());

    let output = target
        .execute_on_target("echo $HARNESS_TARGET $EXTRA", &ExecOptions::default().env("EXTRA", "1"))
        .unwrap();
    assert_eq!(output.stdout, vec!["local 1"]);
    assert!(output.success());

    let processes = target.get_process_list(None).unwrap();
    assert!(!processes.is_empty());
    target.tear_down(false);
}

#[test]
fn test_copy_between_host_and_target() {
    let dir = tempfile::tempdir().unwrap();
    let mut target = local_target(dir.path());

    let source = dir.path().join("payload.txt");
    std::fs::write(&source, "payload").unwrap();
    target.copy_file_to_target(&source, "payload.txt", None).unwrap();
    assert!(dir.path().join("install/bin/payload.txt").exists());

    let back = dir.path().join("back.txt");
    target.copy_file_from_target("payload.txt", &back, None).unwrap();
    assert_eq!(std::fs::read_to_string(back).unwrap(), "payload");

    let install_bin = dir.path().join("install/bin");
    target
        .delete_files_on_target("payload*", &install_bin.to_string_lossy())
        .unwrap();
    assert!(!install_bin.join("payload.txt").exists());
    target.tear_down(false);
}
