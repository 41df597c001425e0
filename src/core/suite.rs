//! Test descriptors, expansion across targets, and the per-test context
//!
//! Every registered test declares a [`DistributionPolicy`]. Expansion turns
//! each test into one [`TestInstance`] per suitable target or target set;
//! pairings that cannot run are returned as [`DroppedPairing`]s so nothing
//! disappears silently.

use super::application::Application;
use super::error::{HarnessError, Result};
use super::target::{CommandOutput, ExecOptions, LaunchOptions, ScreenshotOptions, Target};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// How a test is spread over targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum DistributionPolicy {
    /// Once on every connected default target
    AllDefaultTargets,
    /// Once per single-target set configured for the test class
    SelectedTargets,
    /// Once per configured set of exactly `targets` targets
    MultipleConnections {
        /// Number of targets per set
        targets: usize,
    },
    /// Once, without targets
    Plain,
}

/// Identity and distribution of a test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestDescriptor {
    /// Name of the test class (group)
    pub class_name: String,
    /// Name of the test within its class
    pub name: String,
    /// Target distribution
    pub policy: DistributionPolicy,
}

impl TestDescriptor {
    /// Create a descriptor
    pub fn new(class_name: impl Into<String>, name: impl Into<String>, policy: DistributionPolicy) -> Self {
        Self {
            class_name: class_name.into(),
            name: name.into(),
            policy,
        }
    }

    /// `class_name.name`
    pub fn id(&self) -> String {
        format!("{}.{}", self.class_name, self.name)
    }
}

/// Availability of a configured target at expansion time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetAvailability {
    /// Target name
    pub name: String,
    /// Part of all-default-targets tests?
    pub is_default: bool,
    /// Did setup succeed?
    pub connected: bool,
}

/// One runnable pairing of a test with its targets
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestInstance {
    /// Index of the registered test
    pub test_index: usize,
    /// The test
    pub descriptor: TestDescriptor,
    /// Targets in the order the test receives them
    pub targets: Vec<String>,
}

impl TestInstance {
    /// `class.name` or `class.name[t1,t2]`
    pub fn id(&self) -> String {
        if self.targets.is_empty() {
            self.descriptor.id()
        } else {
            format!("{}[{}]", self.descriptor.id(), self.targets.join(","))
        }
    }

    /// Directory name for this instance's results
    pub fn run_name(&self) -> String {
        if self.targets.is_empty() {
            self.descriptor.name.clone()
        } else {
            format!("{}_{}", self.descriptor.name, self.targets.join("_"))
        }
    }
}

/// A pairing that was not expanded, and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DroppedPairing {
    /// Test id
    pub test_id: String,
    /// Targets of the pairing; empty when no pairing existed at all
    pub targets: Vec<String>,
    /// Why it was dropped
    pub reason: String,
}

/// Result of [`expand`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpansionPlan {
    /// Runnable instances
    pub instances: Vec<TestInstance>,
    /// Pairings that will not run
    pub dropped: Vec<DroppedPairing>,
}

/// Expand `descriptors` over `targets`
///
/// `test_to_target` maps a class name to the target sets configured for
/// its selected-target and multiple-connection tests.
pub fn expand(
    descriptors: &[TestDescriptor],
    targets: &[TargetAvailability],
    test_to_target: &BTreeMap<String, Vec<Vec<String>>>,
) -> ExpansionPlan {
    let mut plan = ExpansionPlan::default();
    let by_name: HashMap<&str, &TargetAvailability> = targets.iter().map(|t| (t.name.as_str(), t)).collect();

    for (test_index, descriptor) in descriptors.iter().enumerate() {
        let mut reject = |targets: Vec<String>, reason: String| {
            plan.dropped.push(DroppedPairing {
                test_id: descriptor.id(),
                targets,
                reason,
            });
        };
        let mut runnable = Vec::new();

        match descriptor.policy {
            DistributionPolicy::Plain => runnable.push(Vec::new()),
            DistributionPolicy::AllDefaultTargets => {
                for target in targets.iter().filter(|t| t.is_default) {
                    if target.connected {
                        runnable.push(vec![target.name.clone()]);
                    } else {
                        reject(vec![target.name.clone()], "target not connected".to_string());
                    }
                }
            }
            DistributionPolicy::SelectedTargets | DistributionPolicy::MultipleConnections { .. } => {
                let arity = match descriptor.policy {
                    DistributionPolicy::MultipleConnections { targets } => targets,
                    _ => 1,
                };
                let Some(sets) = test_to_target.get(&descriptor.class_name) else {
                    reject(Vec::new(), format!("no targets configured for {}", descriptor.class_name));
                    continue;
                };
                for set in sets {
                    if set.len() != arity {
                        reject(set.clone(), format!("test needs {} target(s), set has {}", arity, set.len()));
                        continue;
                    }
                    if let Some((_, twice)) = set.iter().enumerate().find(|&(i, n)| set[..i].contains(n)) {
                        reject(set.clone(), format!("target {twice} listed twice"));
                        continue;
                    }
                    match set.iter().find(|name| !by_name.get(name.as_str()).is_some_and(|t| t.connected)) {
                        Some(name) if !by_name.contains_key(name.as_str()) => {
                            reject(set.clone(), format!("unknown target {name}"));
                        }
                        Some(name) => reject(set.clone(), format!("target {name} not connected")),
                        None => runnable.push(set.clone()),
                    }
                }
            }
        }

        plan.instances.extend(runnable.into_iter().map(|targets| TestInstance {
            test_index,
            descriptor: descriptor.clone(),
            targets,
        }));
    }
    plan
}

/// Sort by id, then shuffle deterministically
///
/// Without a `seed` a random one is drawn. The seed in use is logged and
/// returned so a run can be repeated.
pub fn order_instances(mut instances: Vec<TestInstance>, seed: Option<u64>) -> (Vec<TestInstance>, u64) {
    let seed = seed.unwrap_or_else(rand::random);
    info!("test order seed: {}", seed);
    instances.sort_by_key(TestInstance::id);
    instances.shuffle(&mut StdRng::seed_from_u64(seed));
    (instances, seed)
}

/// A test case run by the harness
pub trait IntegrationTest {
    /// Identity and distribution
    fn descriptor(&self) -> TestDescriptor;

    /// Prepare the test; a failure skips `run` but not `tear_down`
    fn set_up(&mut self, _ctx: &mut TestContext<'_>) -> Result<()> {
        Ok(())
    }

    /// The test body
    fn run(&mut self, ctx: &mut TestContext<'_>) -> Result<()>;

    /// Clean up; always called
    fn tear_down(&mut self, _ctx: &mut TestContext<'_>) -> Result<()> {
        Ok(())
    }
}

/// Handle of an application registered with a [`TestContext`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AppId(usize);

struct RegisteredApp {
    target_index: usize,
    application: Application,
}

/// Everything a running test instance may use
pub struct TestContext<'a> {
    targets: Vec<&'a mut Target>,
    class_name: String,
    run_name: String,
    result_dir: PathBuf,
    applications: Vec<RegisteredApp>,
}

impl<'a> TestContext<'a> {
    /// Context for one test instance
    pub fn new(targets: Vec<&'a mut Target>, class_name: &str, run_name: &str, result_dir: PathBuf) -> Self {
        Self {
            targets,
            class_name: class_name.to_string(),
            run_name: run_name.to_string(),
            result_dir,
            applications: Vec::new(),
        }
    }

    /// Number of targets of this instance
    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    /// Target at `index`
    pub fn target(&mut self, index: usize) -> Result<&mut Target> {
        let count = self.targets.len();
        self.targets
            .get_mut(index)
            .map(|t| &mut **t)
            .ok_or_else(|| HarnessError::Config(format!("test has {count} target(s), no index {index}")))
    }

    /// Name of the test class
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Name of this run
    pub fn run_name(&self) -> &str {
        &self.run_name
    }

    /// `<result_dir>/<class>/<run>`
    pub fn result_dir(&self) -> &Path {
        &self.result_dir
    }

    /// Start an application with `start` and keep it for clean-up
    ///
    /// An application that did not start is an assertion failure.
    pub fn launch<F>(&mut self, target_index: usize, start: F) -> Result<AppId>
    where
        F: FnOnce(&mut Target) -> Application,
    {
        let application = start(self.target(target_index)?);
        let started = check_that_application_was_started(&application);
        self.applications.push(RegisteredApp {
            target_index,
            application,
        });
        started?;
        Ok(AppId(self.applications.len() - 1))
    }

    /// Start the daemon on a target and wait for it
    pub fn start_daemon(&mut self, target_index: usize, options: &LaunchOptions) -> Result<AppId> {
        let id = self.launch(target_index, |t| t.start_daemon(options))?;
        self.wait_for_initialisation(id)?;
        Ok(id)
    }

    /// Start the default renderer on a target and wait for it
    pub fn start_default_renderer(&mut self, target_index: usize, options: &LaunchOptions) -> Result<AppId> {
        let id = self.launch(target_index, |t| t.start_default_renderer(options))?;
        self.wait_for_initialisation(id)?;
        Ok(id)
    }

    /// Start a client on a target
    pub fn start_client(&mut self, target_index: usize, name: &str, options: &LaunchOptions) -> Result<AppId> {
        self.launch(target_index, |t| t.start_client(name, options))
    }

    fn wait_for_initialisation(&mut self, id: AppId) -> Result<()> {
        let application = self.application(id)?;
        if application.wait_for_initialisation(INITIALISATION_TIMEOUT) {
            Ok(())
        } else {
            Err(HarnessError::assertion(format!(
                "{} did not print '{}'",
                application.extended_name(),
                application.initialisation_message().unwrap_or_default()
            )))
        }
    }

    /// A registered application
    pub fn application(&mut self, id: AppId) -> Result<&mut Application> {
        self.applications
            .get_mut(id.0)
            .map(|r| &mut r.application)
            .ok_or_else(|| HarnessError::Config(format!("no application with id {}", id.0)))
    }

    /// Kill a registered application
    pub fn kill(&mut self, id: AppId) -> Result<()> {
        let registered = self
            .applications
            .get_mut(id.0)
            .ok_or_else(|| HarnessError::Config(format!("no application with id {}", id.0)))?;
        let target = self
            .targets
            .get_mut(registered.target_index)
            .ok_or_else(|| HarnessError::Config(format!("no target {}", registered.target_index)))?;
        target.kill_application(&mut registered.application);
        Ok(())
    }

    /// Run a command on a target
    pub fn execute(&mut self, target_index: usize, command: &str, options: &ExecOptions) -> Result<CommandOutput> {
        self.target(target_index)?.execute_on_target(command, options)
    }

    /// Take a screenshot with a registered renderer and compare it
    pub fn take_screenshot_and_compare(
        &mut self,
        renderer: AppId,
        image_name: &str,
        options: &ScreenshotOptions,
    ) -> Result<()> {
        let registered = self
            .applications
            .get_mut(renderer.0)
            .ok_or_else(|| HarnessError::Config(format!("no application with id {}", renderer.0)))?;
        let target = self
            .targets
            .get_mut(registered.target_index)
            .ok_or_else(|| HarnessError::Config(format!("no target {}", registered.target_index)))?;
        target.take_screenshot_and_compare(
            &mut registered.application,
            image_name,
            &self.class_name,
            &self.run_name,
            options,
        )
    }

    /// Kill whatever still runs and save the output of every application
    ///
    /// Several instances of one application on one target get numbered
    /// output files.
    pub fn finish(mut self) {
        let mut counts: HashMap<(usize, String), u32> = HashMap::new();
        for registered in &self.applications {
            *counts
                .entry((registered.target_index, registered.application.name().to_string()))
                .or_default() += 1;
        }
        let mut seen: HashMap<(usize, String), u32> = HashMap::new();

        for registered in &mut self.applications {
            let Some(target) = self.targets.get_mut(registered.target_index) else {
                continue;
            };
            if registered.application.is_started() {
                target.kill_application(&mut registered.application);
            }
            let key = (registered.target_index, registered.application.name().to_string());
            let nr = if counts.get(&key).copied().unwrap_or(0) > 1 {
                let next = seen.entry(key).or_default();
                let nr = *next;
                *next += 1;
                Some(nr)
            } else {
                None
            };
            if let Err(e) =
                target.save_application_output(&registered.application, &self.class_name, &self.run_name, nr)
            {
                warn!("saving output of {} failed: {}", registered.application.extended_name(), e);
            }
        }
    }
}

/// How long started SDK applications may take to initialise
pub const INITIALISATION_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);

/// Assertion failure unless `application` was started
pub fn check_that_application_was_started(application: &Application) -> Result<()> {
    if application.is_started() {
        Ok(())
    } else {
        Err(HarnessError::assertion(format!(
            "Application {} could not be started",
            application.extended_name()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn available(name: &str, is_default: bool, connected: bool) -> TargetAvailability {
        TargetAvailability {
            name: name.to_string(),
            is_default,
            connected,
        }
    }

    fn sets(raw: &[&[&str]]) -> Vec<Vec<String>> {
        raw.iter().map(|s| s.iter().map(|n| n.to_string()).collect()).collect()
    }

    #[test]
    fn test_all_default_targets() {
        let descriptors = [TestDescriptor::new("Screens", "red", DistributionPolicy::AllDefaultTargets)];
        let targets = [
            available("a", true, true),
            available("b", true, false),
            available("c", false, true),
        ];
        let plan = expand(&descriptors, &targets, &BTreeMap::new());

        assert_eq!(plan.instances.len(), 1);
        assert_eq!(plan.instances[0].targets, vec!["a"]);
        assert_eq!(plan.instances[0].id(), "Screens.red[a]");
        assert_eq!(plan.dropped.len(), 1);
        assert_eq!(plan.dropped[0].targets, vec!["b"]);
        assert_eq!(plan.dropped[0].reason, "target not connected");
    }

    #[test]
    fn test_selected_and_multiple_connections() {
        let descriptors = [
            TestDescriptor::new("Selected", "one", DistributionPolicy::SelectedTargets),
            TestDescriptor::new("Multi", "two", DistributionPolicy::MultipleConnections { targets: 2 }),
        ];
        let targets = [available("a", true, true), available("b", false, true), available("c", true, false)];
        let map = BTreeMap::from([
            ("Selected".to_string(), sets(&[&["b"], &["a", "b"], &["c"]])),
            ("Multi".to_string(), sets(&[&["a", "b"], &["a"], &["a", "zz"], &["b", "b"]])),
        ]);
        let plan = expand(&descriptors, &targets, &map);

        let ids: Vec<String> = plan.instances.iter().map(TestInstance::id).collect();
        assert_eq!(ids, vec!["Selected.one[b]", "Multi.two[a,b]"]);

        let reasons: Vec<&str> = plan.dropped.iter().map(|d| d.reason.as_str()).collect();
        assert_eq!(
            reasons,
            vec![
                "test needs 1 target(s), set has 2",
                "target c not connected",
                "test needs 2 target(s), set has 1",
                "unknown target zz",
                "target b listed twice",
            ]
        );
    }

    #[test]
    fn test_missing_configuration_and_plain() {
        let descriptors = [
            TestDescriptor::new("Unmapped", "x", DistributionPolicy::SelectedTargets),
            TestDescriptor::new("Host", "y", DistributionPolicy::Plain),
        ];
        let plan = expand(&descriptors, &[], &BTreeMap::new());
        assert_eq!(plan.instances.len(), 1);
        assert_eq!(plan.instances[0].id(), "Host.y");
        assert_eq!(plan.instances[0].run_name(), "y");
        assert_eq!(plan.dropped[0].test_id, "Unmapped.x");
        assert!(plan.dropped[0].targets.is_empty());
    }

    fn instances(n: usize) -> Vec<TestInstance> {
        (0..n)
            .map(|i| TestInstance {
                test_index: i,
                descriptor: TestDescriptor::new("C", format!("t{i:02}"), DistributionPolicy::Plain),
                targets: Vec::new(),
            })
            .collect()
    }

    #[test]
    fn test_order_is_reproducible() {
        let (first, seed) = order_instances(instances(20), Some(7));
        assert_eq!(seed, 7);
        let mut reversed = instances(20);
        reversed.reverse();
        let (second, _) = order_instances(reversed, Some(7));
        assert_eq!(first, second);
    }

    #[test]
    fn test_random_seed_is_reported() {
        let (ordered, seed) = order_instances(instances(10), None);
        let (again, _) = order_instances(instances(10), Some(seed));
        assert_eq!(ordered, again);
    }

    proptest! {
        #[test]
        fn prop_ordering_is_a_permutation(n in 0usize..30, seed in any::<u64>()) {
            let (ordered, _) = order_instances(instances(n), Some(seed));
            let mut indices: Vec<usize> = ordered.iter().map(|i| i.test_index).collect();
            indices.sort_unstable();
            prop_assert_eq!(indices, (0..n).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_started_check() {
        let app = Application::not_started("ramses-daemon", "");
        let err = check_that_application_was_started(&app).unwrap_err();
        assert!(err.is_assertion());
        assert!(err.to_string().contains("ramses-daemon could not be started"));
    }
}
