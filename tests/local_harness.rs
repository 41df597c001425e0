//! Complete runs on the local target

#![cfg(unix)]

mod common;

use common::{config_in, install_executable, FAKE_DAEMON};
use remote_test_harness::{
    Core, CoreMode, DistributionPolicy, ExecOptions, HarnessError, IntegrationTest, LaunchOptions, Result,
    RunOptions, TestContext, TestDescriptor, TestOutcome,
};
use std::time::Duration;

struct DaemonAnswers;

impl IntegrationTest for DaemonAnswers {
    fn descriptor(&self) -> TestDescriptor {
        TestDescriptor::new("Daemon", "answers", DistributionPolicy::AllDefaultTargets)
    }

    fn run(&mut self, ctx: &mut TestContext<'_>) -> Result<()> {
        let daemon = ctx.start_daemon(0, &LaunchOptions::default())?;
        let second = ctx.start_daemon(0, &LaunchOptions::default().name_extension("_2"))?;
        for id in [daemon, second] {
            let app = ctx.application(id)?;
            if !app.send_ramsh_command("ping", Some("ramsh: ping"), Some(Duration::from_secs(10))) {
                return Err(HarnessError::assertion("daemon did not answer"));
            }
        }
        ctx.kill(second)
    }
}

struct ShellWorks;

impl IntegrationTest for ShellWorks {
    fn descriptor(&self) -> TestDescriptor {
        TestDescriptor::new("Shell", "works", DistributionPolicy::AllDefaultTargets)
    }

    fn run(&mut self, ctx: &mut TestContext<'_>) -> Result<()> {
        let output = ctx.execute(0, "printf 'a\\nb\\n'", &ExecOptions::default())?;
        if output.stdout == ["a", "b"] {
            Ok(())
        } else {
            Err(HarnessError::assertion(format!("unexpected output {:?}", output.stdout)))
        }
    }
}

struct AlwaysFails;

impl IntegrationTest for AlwaysFails {
    fn descriptor(&self) -> TestDescriptor {
        TestDescriptor::new("Shell", "fails", DistributionPolicy::Plain)
    }

    fn run(&mut self, _ctx: &mut TestContext<'_>) -> Result<()> {
        Err(HarnessError::assertion("expected failure"))
    }
}

struct NeedsTwoTargets;

impl IntegrationTest for NeedsTwoTargets {
    fn descriptor(&self) -> TestDescriptor {
        TestDescriptor::new("Pairs", "connect", DistributionPolicy::MultipleConnections { targets: 2 })
    }

    fn run(&mut self, _ctx: &mut TestContext<'_>) -> Result<()> {
        Ok(())
    }
}

#[test]
fn test_local_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config
        .test_to_target
        .insert("Pairs".to_string(), vec![vec!["local".to_string()]]);
    install_executable(&dir.path().join("install"), "ramses-daemon", FAKE_DAEMON);

    let mut core = Core::new(&config, CoreMode::Local).unwrap();
    core.register(|| DaemonAnswers);
    core.register(|| ShellWorks);
    core.register(|| AlwaysFails);
    core.register(|| NeedsTwoTargets);

    let report = core.run_all(&RunOptions {
        seed: Some(11),
        ..RunOptions::default()
    });

    let outcome = |id: &str| report.results.iter().find(|r| r.id == id).map(|r| r.outcome);
    assert_eq!(outcome("Daemon.answers[local]"), Some(TestOutcome::Passed));
    assert_eq!(outcome("Shell.works[local]"), Some(TestOutcome::Passed));
    assert_eq!(outcome("Shell.fails"), Some(TestOutcome::Failed));
    assert_eq!(report.results.len(), 3);
    assert_eq!(report.dropped.len(), 1);
    assert_eq!(report.dropped[0].test_id, "Pairs.connect");
    assert!(!report.was_successful());

    // both daemon instances keep their output, numbered
    let run_dir = dir.path().join("results/Daemon/answers_local");
    assert!(run_dir.join("ramses-daemon0_local.txt").exists());
    assert!(run_dir.join("ramses-daemon1_local.txt").exists());

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("results/report.json")).unwrap()).unwrap();
    assert_eq!(json["seed"], 11);
    assert_eq!(json["results"].as_array().unwrap().len(), 3);
}

#[test]
fn test_same_seed_same_order() {
    let order = |seed| {
        let dir = tempfile::tempdir().unwrap();
        let mut core = Core::new(&config_in(dir.path()), CoreMode::Local).unwrap();
        core.register(|| ShellWorks);
        core.register(|| AlwaysFails);
        core.register(|| NeedsTwoTargets);
        let report = core.run_all(&RunOptions {
            seed: Some(seed),
            ..RunOptions::default()
        });
        report.results.into_iter().map(|r| r.id).collect::<Vec<_>>()
    };
    assert_eq!(order(5), order(5));
}
