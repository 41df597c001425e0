//! Test execution
//!
//! [`Core`] owns the targets of a run. It sets them up, expands the
//! registered tests over the connected ones, runs every instance in seeded
//! order and tears the targets down again, whatever happened.

use super::error::{HarnessError, Result};
use super::helper::result_dir_subdirectory;
use super::power::PowerDevice;
use super::report::{RunReport, TestOutcome, TestRecord};
use super::suite::{
    expand, order_instances, ExpansionPlan, IntegrationTest, TargetAvailability, TestContext, TestDescriptor,
    TestInstance,
};
use super::target::{Target, TargetInfo, TargetSettings};
use crate::config::HarnessConfig;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;
use tracing::{error, info, warn};

/// Where tests run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoreMode {
    /// A single target named `local` on the test host
    #[default]
    Local,
    /// The targets of the configuration, over SSH
    Remote,
}

/// Options of one run
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Install the binary package during setup
    pub transfer_binaries: bool,
    /// Shut targets down and power them off afterwards
    pub shutdown_targets: bool,
    /// Seed of the test order; overrides the configured one
    pub seed: Option<u64>,
    /// Only run instances whose id contains this
    pub filter: Option<String>,
}

type TestFactory = Box<dyn Fn() -> Box<dyn IntegrationTest>>;

struct Registration {
    descriptor: TestDescriptor,
    factory: TestFactory,
}

/// Runs registered tests on a set of targets
pub struct Core {
    mode: CoreMode,
    settings: TargetSettings,
    targets: Vec<Target>,
    registrations: Vec<Registration>,
    test_to_target: BTreeMap<String, Vec<Vec<String>>>,
    seed: Option<u64>,
}

impl Core {
    /// Build the targets described by `config`
    pub fn new(config: &HarnessConfig, mode: CoreMode) -> Result<Self> {
        let settings = config.target_settings();
        let targets = match mode {
            CoreMode::Local => vec![Target::local(TargetInfo::local(), settings.clone())],
            CoreMode::Remote => config
                .targets
                .iter()
                .map(|info| {
                    let power = match &info.power_device {
                        Some(name) => Some(PowerDevice::new(
                            config
                                .power_device(name)
                                .cloned()
                                .ok_or_else(|| HarnessError::Config(format!("unknown power device {name}")))?,
                        )),
                        None => None,
                    };
                    Ok(Target::remote(info.clone(), settings.clone(), power))
                })
                .collect::<Result<Vec<_>>>()?,
        };

        let mut core = Self::with_targets(settings, targets, config.test_to_target.clone());
        core.mode = mode;
        core.seed = config.seed;
        Ok(core)
    }

    /// Use already built targets
    pub fn with_targets(
        settings: TargetSettings,
        targets: Vec<Target>,
        test_to_target: BTreeMap<String, Vec<Vec<String>>>,
    ) -> Self {
        Self {
            mode: CoreMode::Local,
            settings,
            targets,
            registrations: Vec::new(),
            test_to_target,
            seed: None,
        }
    }

    /// Where tests run
    pub fn mode(&self) -> CoreMode {
        self.mode
    }

    /// The targets of this run
    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// Register a test; `factory` builds a fresh test object per instance
    pub fn register<F, T>(&mut self, factory: F)
    where
        F: Fn() -> T + 'static,
        T: IntegrationTest + 'static,
    {
        let descriptor = factory().descriptor();
        self.registrations.push(Registration {
            descriptor,
            factory: Box::new(move || -> Box<dyn IntegrationTest> { Box::new(factory()) }),
        });
    }

    /// Registered test descriptors
    pub fn descriptors(&self) -> Vec<TestDescriptor> {
        self.registrations.iter().map(|r| r.descriptor.clone()).collect()
    }

    /// Set up every target; returns how many are connected
    pub fn setup(&mut self, transfer_binaries: bool) -> usize {
        let mut connected = 0;
        for target in &mut self.targets {
            if target.setup(transfer_binaries) {
                connected += 1;
            } else {
                warn!("target {} is excluded from this run", target.name());
            }
        }
        info!("{} of {} target(s) ready", connected, self.targets.len());
        connected
    }

    /// Expand the registered tests over the connected targets
    ///
    /// Every dropped pairing is logged.
    pub fn expand(&self) -> ExpansionPlan {
        let availability: Vec<TargetAvailability> = self
            .targets
            .iter()
            .map(|t| TargetAvailability {
                name: t.name().to_string(),
                is_default: t.info().default,
                connected: t.is_connected(),
            })
            .collect();
        let plan = expand(&self.descriptors(), &availability, &self.test_to_target);
        for dropped in &plan.dropped {
            warn!(
                "dropping {} on [{}]: {}",
                dropped.test_id,
                dropped.targets.join(","),
                dropped.reason
            );
        }
        plan
    }

    /// Run the expanded tests on already set-up targets
    pub fn run(&mut self, options: &RunOptions) -> RunReport {
        let plan = self.expand();
        let mut instances = plan.instances;
        if let Some(filter) = &options.filter {
            instances.retain(|i| i.id().contains(filter.as_str()));
        }
        let (instances, seed) = order_instances(instances, options.seed.or(self.seed));

        let mut report = RunReport::new(seed, plan.dropped);
        for instance in &instances {
            let record = self.run_instance(instance);
            match record.outcome {
                TestOutcome::Passed => info!("{} ... ok", record.id),
                TestOutcome::Skipped => info!("{} ... skipped", record.id),
                TestOutcome::Failed | TestOutcome::Error => error!(
                    "{} ... {:?}: {}",
                    record.id,
                    record.outcome,
                    record.message.as_deref().unwrap_or_default()
                ),
            }
            report.record(record);
        }
        report.finish();

        let summary = report.summary();
        info!(
            "ran {} test(s): {} passed, {} failed, {} errors, {} skipped, {} dropped (seed {})",
            report.results.len(),
            summary.passed,
            summary.failed,
            summary.errors,
            summary.skipped,
            summary.dropped,
            seed
        );
        match report.write_json(&self.settings.result_dir) {
            Ok(path) => info!("report written to {}", path.display()),
            Err(e) => error!("writing report failed: {}", e),
        }
        report
    }

    fn instance_targets<'a>(targets: &'a mut [Target], names: &[String]) -> Vec<&'a mut Target> {
        let mut picked: Vec<(usize, &'a mut Target)> = targets
            .iter_mut()
            .filter_map(|t| names.iter().position(|n| n == t.name()).map(|p| (p, t)))
            .collect();
        picked.sort_by_key(|(p, _)| *p);
        picked.into_iter().map(|(_, t)| t).collect()
    }

    fn run_instance(&mut self, instance: &TestInstance) -> TestRecord {
        let started = Instant::now();
        let descriptor = &instance.descriptor;
        let run_name = instance.run_name();
        let record = |outcome, message| TestRecord {
            id: instance.id(),
            class_name: descriptor.class_name.clone(),
            name: descriptor.name.clone(),
            targets: instance.targets.clone(),
            outcome,
            message,
            duration: started.elapsed(),
        };

        let Some(registration) = self.registrations.get(instance.test_index) else {
            return record(TestOutcome::Error, Some(format!("no test registered at {}", instance.test_index)));
        };
        let result_dir =
            match result_dir_subdirectory(&self.settings.result_dir, &[descriptor.class_name.as_str(), run_name.as_str()]) {
                Ok(dir) => dir,
                Err(e) => return record(TestOutcome::Error, Some(format!("result directory: {e}"))),
            };

        let targets = Self::instance_targets(&mut self.targets, &instance.targets);
        if targets.len() != instance.targets.len() {
            return record(TestOutcome::Error, Some("targets of the instance are missing".to_string()));
        }

        info!("running {}", instance.id());
        let mut test = (registration.factory)();
        let mut ctx = TestContext::new(targets, &descriptor.class_name, &run_name, result_dir);
        let body = catch_unwind(AssertUnwindSafe(|| {
            test.set_up(&mut ctx)?;
            test.run(&mut ctx)
        }));
        let down = catch_unwind(AssertUnwindSafe(|| test.tear_down(&mut ctx)));
        let finished = catch_unwind(AssertUnwindSafe(|| ctx.finish()));

        let (outcome, message) = classify(body, down);
        match finished {
            Ok(()) => record(outcome, message),
            Err(payload) => {
                let panicked = format!("finishing: panicked: {}", panic_message(payload.as_ref()));
                error!("{} {}", instance.id(), panicked);
                match outcome {
                    TestOutcome::Passed | TestOutcome::Skipped => record(TestOutcome::Error, Some(panicked)),
                    _ => record(outcome, message),
                }
            }
        }
    }

    /// Tear every target down
    pub fn tear_down(&mut self, shutdown: bool) {
        for target in &mut self.targets {
            target.tear_down(shutdown);
        }
    }

    /// Set up, run and tear down
    ///
    /// Targets are torn down even when nothing could be run.
    pub fn run_all(&mut self, options: &RunOptions) -> RunReport {
        if self.setup(options.transfer_binaries) == 0 && !self.targets.is_empty() {
            warn!("no target could be set up");
        }
        let report = self.run(options);
        self.tear_down(options.shutdown_targets);
        report
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn outcome_of(result: std::thread::Result<Result<()>>) -> Option<(TestOutcome, String)> {
    match result {
        Ok(Ok(())) => None,
        Ok(Err(e @ HarnessError::Assertion(_))) => Some((TestOutcome::Failed, e.to_string())),
        Ok(Err(HarnessError::Skipped(reason))) => Some((TestOutcome::Skipped, reason)),
        Ok(Err(e)) => Some((TestOutcome::Error, e.to_string())),
        Err(payload) => Some((TestOutcome::Error, format!("panicked: {}", panic_message(payload.as_ref())))),
    }
}

/// Outcome of the test body, else of its tear-down
fn classify(
    body: std::thread::Result<Result<()>>,
    tear_down: std::thread::Result<Result<()>>,
) -> (TestOutcome, Option<String>) {
    match (outcome_of(body), outcome_of(tear_down)) {
        (None, None) => (TestOutcome::Passed, None),
        (Some((outcome, message)), down) => {
            if let Some((_, down_message)) = down {
                warn!("tear-down failed as well: {}", down_message);
            }
            (outcome, Some(message))
        }
        (None, Some((TestOutcome::Skipped, message))) => (TestOutcome::Passed, Some(message)),
        (None, Some((_, message))) => (TestOutcome::Error, Some(format!("tear-down: {message}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::application::Application;
    use crate::core::suite::DistributionPolicy;
    use crate::core::target::{ExecOptions, MockTargetBackend, RetryPolicy};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn settings(dir: &std::path::Path) -> TargetSettings {
        TargetSettings {
            result_dir: dir.to_path_buf(),
            retry: RetryPolicy {
                attempts: 1,
                retry_sleep_secs: 0,
                power_cycles: 0,
                ..RetryPolicy::default()
            },
            ..TargetSettings::default()
        }
    }

    fn target(name: &str, reachable: bool, settings: &TargetSettings) -> Target {
        let mut backend = MockTargetBackend::new();
        backend.expect_description().return_const(format!("mock {name}"));
        backend.expect_connect().returning(move |_| {
            if reachable {
                Ok(())
            } else {
                Err(HarnessError::ConnectionFailed("unreachable".to_string()))
            }
        });
        backend.expect_disconnect().return_const(());
        backend
            .expect_execute()
            .returning(|_, _| Ok(crate::core::target::CommandOutput::default()));
        Target::new(TargetInfo::new(name, "mock").unwrap(), settings.clone(), Box::new(backend), None)
    }

    struct Scripted {
        name: &'static str,
        policy: DistributionPolicy,
        body: fn(&mut TestContext<'_>) -> Result<()>,
        tear_downs: Arc<AtomicUsize>,
    }

    impl IntegrationTest for Scripted {
        fn descriptor(&self) -> TestDescriptor {
            TestDescriptor::new("Scripted", self.name, self.policy)
        }

        fn run(&mut self, ctx: &mut TestContext<'_>) -> Result<()> {
            (self.body)(ctx)
        }

        fn tear_down(&mut self, _ctx: &mut TestContext<'_>) -> Result<()> {
            self.tear_downs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn register(
        core: &mut Core,
        name: &'static str,
        policy: DistributionPolicy,
        body: fn(&mut TestContext<'_>) -> Result<()>,
    ) -> Arc<AtomicUsize> {
        let tear_downs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&tear_downs);
        core.register(move || Scripted {
            name,
            policy,
            body,
            tear_downs: Arc::clone(&counter),
        });
        tear_downs
    }

    #[test]
    fn test_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let targets = vec![target("a", true, &settings), target("b", false, &settings)];
        let mut core = Core::with_targets(settings, targets, BTreeMap::new());

        register(&mut core, "passes", DistributionPolicy::AllDefaultTargets, |ctx| {
            ctx.execute(0, "true", &ExecOptions::default()).map(|_| ())
        });
        register(&mut core, "fails", DistributionPolicy::Plain, |_| {
            Err(HarnessError::assertion("wrong pixels"))
        });
        register(&mut core, "skips", DistributionPolicy::Plain, |_| Err(HarnessError::skipped("no dlt")));
        let panics = register(&mut core, "panics", DistributionPolicy::Plain, |_| panic!("boom"));

        let report = core.run_all(&RunOptions {
            seed: Some(3),
            ..RunOptions::default()
        });

        let outcome = |name: &str| {
            report
                .results
                .iter()
                .find(|r| r.name == name)
                .map(|r| (r.outcome, r.message.clone()))
                .unwrap()
        };
        assert_eq!(outcome("passes"), (TestOutcome::Passed, None));
        assert_eq!(outcome("fails").0, TestOutcome::Failed);
        assert_eq!(outcome("skips"), (TestOutcome::Skipped, Some("no dlt".to_string())));
        assert_eq!(outcome("panics"), (TestOutcome::Error, Some("panicked: boom".to_string())));
        assert_eq!(panics.load(Ordering::SeqCst), 1);

        assert_eq!(report.seed, 3);
        assert_eq!(report.dropped.len(), 1);
        assert_eq!(report.dropped[0].targets, vec!["b"]);
        assert!(!report.was_successful());
        assert!(dir.path().join("report.json").exists());
        assert!(dir.path().join("Scripted").join("passes_a").is_dir());
        assert!(core.targets().iter().all(|t| !t.is_connected()));
    }

    #[test]
    fn test_multiple_connections_get_targets_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let targets = vec![
            target("a", true, &settings),
            target("b", true, &settings),
            target("c", true, &settings),
        ];
        let map = BTreeMap::from([("Scripted".to_string(), vec![vec!["c".to_string(), "a".to_string()]])]);
        let mut core = Core::with_targets(settings, targets, map);
        register(&mut core, "pair", DistributionPolicy::MultipleConnections { targets: 2 }, |ctx| {
            if ctx.target_count() == 2 && ctx.target(0)?.name() == "c" && ctx.target(1)?.name() == "a" {
                Ok(())
            } else {
                Err(HarnessError::assertion("unexpected targets"))
            }
        });

        let report = core.run_all(&RunOptions::default());
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].id, "Scripted.pair[c,a]");
        assert!(report.was_successful());
    }

    #[test]
    fn test_filter() {
        let dir = tempfile::tempdir().unwrap();
        let mut core = Core::with_targets(settings(dir.path()), Vec::new(), BTreeMap::new());
        register(&mut core, "first", DistributionPolicy::Plain, |_| Ok(()));
        register(&mut core, "second", DistributionPolicy::Plain, |_| Ok(()));

        let report = core.run(&RunOptions {
            filter: Some("second".to_string()),
            ..RunOptions::default()
        });
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].name, "second");
    }

    #[test]
    fn test_panic_while_finishing_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        // no terminate expectation: killing the leftover application panics
        let mut core = Core::with_targets(settings.clone(), vec![target("a", true, &settings)], BTreeMap::new());
        register(&mut core, "leaves_app", DistributionPolicy::AllDefaultTargets, |ctx| {
            ctx.launch(0, |_| {
                let io = crate::core::test_support::scripted_process(&["ready"], |_| Vec::new());
                Application::launch("ramses-daemon", "", io).unwrap()
            })
            .map(|_| ())
        });
        register(&mut core, "after", DistributionPolicy::Plain, |_| Ok(()));

        let report = core.run_all(&RunOptions {
            seed: Some(1),
            ..RunOptions::default()
        });
        assert_eq!(report.results.len(), 2);
        let leaves_app = report.results.iter().find(|r| r.name == "leaves_app").unwrap();
        assert_eq!(leaves_app.outcome, TestOutcome::Error);
        assert!(leaves_app.message.as_deref().unwrap().starts_with("finishing: panicked"));
        let after = report.results.iter().find(|r| r.name == "after").unwrap();
        assert_eq!(after.outcome, TestOutcome::Passed);
    }

    #[test]
    fn test_classify_tear_down() {
        let ok: std::thread::Result<Result<()>> = Ok(Ok(()));
        let failed: std::thread::Result<Result<()>> = Ok(Err(HarnessError::assertion("x")));
        let broken: std::thread::Result<Result<()>> = Ok(Err(HarnessError::Config("y".to_string())));

        assert_eq!(classify(Ok(Ok(())), Ok(Ok(()))), (TestOutcome::Passed, None));
        assert_eq!(classify(failed, broken).0, TestOutcome::Failed);
        let (outcome, message) = classify(ok, Ok(Err(HarnessError::Config("y".to_string()))));
        assert_eq!(outcome, TestOutcome::Error);
        assert!(message.unwrap().starts_with("tear-down: "));
    }

    #[test]
    fn test_remote_core_from_config() {
        let config = HarnessConfig::parse(
            r#"
            [[power_devices]]
            name = "pdu"
            host = "10.0.0.50"
            username = "admin"

            [[targets]]
            name = "board-1"
            hostname = "10.0.0.2"
            power_device = "pdu"
            power_outlet = 2
            "#,
        )
        .unwrap();
        let core = Core::new(&config, CoreMode::Remote).unwrap();
        assert_eq!(core.mode(), CoreMode::Remote);
        assert_eq!(core.targets().len(), 1);
        assert_eq!(core.targets()[0].name(), "board-1");

        let local = Core::new(&HarnessConfig::default(), CoreMode::Local).unwrap();
        assert_eq!(local.targets()[0].name(), "local");
    }
}
