//! Test targets
//!
//! A [`TargetInfo`] is the static description of a device from the
//! configuration. A [`Target`] is the live handle used by tests: it combines
//! the description with a platform ([`PlatformKind`]) and a backend
//! ([`TargetBackend`]) that either runs processes locally or over SSH.

mod command;
mod local;
mod platform;
mod remote;
mod retry;
mod screenshot;

pub use command::{CommandOutput, ExecOptions, SpawnRequest};
pub use local::LocalBackend;
pub use platform::{Capability, CapabilitySet, PlatformKind, Tolerances};
pub use remote::{compose_remote_command, RemoteBackend, RemoteEndpoint, SftpClient};
pub use retry::{connect_with_retries, RetryPolicy};
pub use screenshot::{ScreenshotOptions, FIXED_SCREENSHOT_PREFIX, SYSTEM_COMPOSITOR_SCREENSHOT_TIMEOUT};

use super::application::{Application, ProcessIo};
use super::error::{HarnessError, Result};
use super::helper;
use super::power::PowerDevice;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

/// Control port used by every started SDK application
pub const CUSTOM_DAEMON_PORT: u16 = 6001;
/// ivi layer id used unless a test passes its own
pub const DEFAULT_TEST_LAYER: u32 = 1_000_000;
/// ivi surface id used unless a test passes its own
pub const DEFAULT_TEST_SURFACE: u32 = 1_000_000;

/// Authentication for SSH targets
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credentials {
    /// Password authentication
    Password {
        /// The password; an empty string is sent as is
        password: String,
    },
    /// Public key authentication
    PrivateKey {
        /// Path to private key file
        path: PathBuf,
        /// Optional passphrase for encrypted keys
        #[serde(default)]
        passphrase: Option<String>,
    },
    /// SSH agent authentication
    #[default]
    Agent,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password { .. } => f.write_str("Password(***)"),
            Self::PrivateKey { path, .. } => f.debug_tuple("PrivateKey").field(path).finish(),
            Self::Agent => f.write_str("Agent"),
        }
    }
}

fn default_hostname() -> String {
    "localhost".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_true() -> bool {
    true
}

fn default_renderer_platform() -> String {
    "x11-egl-es-3-0".to_string()
}

/// Static description of a test device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetInfo {
    /// Unique name, `[\w-]+`
    pub name: String,
    /// Host to connect to
    #[serde(default = "default_hostname")]
    pub hostname: String,
    /// Login user
    #[serde(default)]
    pub username: String,
    /// How to authenticate
    #[serde(default)]
    pub credentials: Credentials,
    /// SSH port
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    /// Name of the CI job whose package gets installed
    #[serde(default)]
    pub build_job_name: String,
    /// Name of the power relay feeding this target
    #[serde(default)]
    pub power_device: Option<String>,
    /// Outlet on the power relay
    #[serde(default)]
    pub power_outlet: Option<u32>,
    /// Target this one is reached through
    #[serde(default)]
    pub bridge_target: Option<String>,
    /// Address used by TCP communication tests
    #[serde(default)]
    pub tcp_tests_interface_ip: Option<String>,
    /// Operating system family
    #[serde(default)]
    pub platform: PlatformKind,
    /// Part of tests that run on all default targets?
    #[serde(default = "default_true")]
    pub default: bool,
    /// Optional features
    #[serde(default)]
    pub capabilities: CapabilitySet,
    /// Minimum screenshot tolerances
    #[serde(default)]
    pub tolerances: Tolerances,
    /// Environment for every started application
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Platform part of the default renderer name
    #[serde(default = "default_renderer_platform")]
    pub renderer_platform: String,
}

impl TargetInfo {
    /// Describe a target; fails for names outside `[\w-]+`
    pub fn new(name: &str, hostname: &str) -> Result<Self> {
        Self::validate_name(name)?;
        Ok(Self {
            name: name.to_string(),
            hostname: hostname.to_string(),
            ..Self::blank()
        })
    }

    /// The test host itself
    pub fn local() -> Self {
        Self {
            name: "local".to_string(),
            ..Self::blank()
        }
    }

    fn blank() -> Self {
        Self {
            name: String::new(),
            hostname: default_hostname(),
            username: String::new(),
            credentials: Credentials::default(),
            ssh_port: default_ssh_port(),
            build_job_name: String::new(),
            power_device: None,
            power_outlet: None,
            bridge_target: None,
            tcp_tests_interface_ip: None,
            platform: PlatformKind::default(),
            default: true,
            capabilities: CapabilitySet::default(),
            tolerances: Tolerances::default(),
            environment: BTreeMap::new(),
            renderer_platform: default_renderer_platform(),
        }
    }

    /// Check a target name against `[\w-]+`
    pub fn validate_name(name: &str) -> Result<()> {
        let pattern = Regex::new(r"^[\w-]+$").map_err(|e| HarnessError::Config(e.to_string()))?;
        if pattern.is_match(name) {
            Ok(())
        } else {
            Err(HarnessError::InvalidTargetName(name.to_string()))
        }
    }
}

/// Run-wide settings every target needs
#[derive(Debug, Clone, PartialEq)]
pub struct TargetSettings {
    /// Installation directory of the SDK on the target
    pub install_dir: String,
    /// Local directory for screenshots, logs and reports
    pub result_dir: PathBuf,
    /// Local directories holding reference images
    pub reference_image_dirs: Vec<PathBuf>,
    /// Multiplier for the scaled diff image
    pub image_diff_scale_factor: f64,
    /// SDK log level passed with `-l`
    pub log_level: u8,
    /// Local directory holding `<build job>*.tar.gz` packages
    pub package_dir: Option<PathBuf>,
    /// Connection retries
    pub retry: RetryPolicy,
}

impl Default for TargetSettings {
    fn default() -> Self {
        Self {
            install_dir: "/opt/ramses".to_string(),
            result_dir: PathBuf::from("results"),
            reference_image_dirs: Vec::new(),
            image_diff_scale_factor: 10.0,
            log_level: 3,
            package_dir: None,
            retry: RetryPolicy::default(),
        }
    }
}

/// Process, command and file access on a target
#[cfg_attr(test, mockall::automock)]
pub trait TargetBackend: Send {
    /// Establish the connection
    fn connect(&mut self, timeout: Duration) -> Result<()>;

    /// Close the connection; never fails
    fn disconnect(&mut self);

    /// Run a shell command
    fn execute(&mut self, command: &str, options: &ExecOptions) -> Result<CommandOutput>;

    /// Start a long-running process with piped stdio
    fn spawn(&mut self, request: &SpawnRequest) -> Result<ProcessIo>;

    /// Stop a started process; `kill_command` is used where no pid is known
    fn terminate(&mut self, pid: Option<u32>, kill_command: &str) -> Result<()>;

    /// Copy a target file to the test host
    fn copy_from_target(&mut self, remote_path: &str, local_path: &Path) -> Result<()>;

    /// Copy a test host file to the target
    fn copy_to_target(&mut self, local_path: &Path, remote_path: &str) -> Result<()>;

    /// Human-readable address
    fn description(&self) -> String;
}

/// A power relay outlet feeding a target
#[derive(Debug, Clone)]
pub struct PowerHandle {
    /// The relay
    pub device: PowerDevice,
    /// Outlet number
    pub outlet: u32,
}

/// How to start an SDK application
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchOptions {
    /// Command line arguments
    pub args: String,
    /// Directory below the base working directory; `None` for the base itself
    pub working_directory: Option<String>,
    /// Appended to the name to tell instances apart
    pub name_extension: String,
    /// Extra environment
    pub env: BTreeMap<String, String>,
    /// DLT application id, passed with `-dai`
    pub dlt_app_id: Option<String>,
}

impl LaunchOptions {
    /// Options with the given arguments
    pub fn with_args(args: impl Into<String>) -> Self {
        Self {
            args: args.into(),
            ..Self::default()
        }
    }

    /// Set the name extension
    #[must_use]
    pub fn name_extension(mut self, extension: impl Into<String>) -> Self {
        self.name_extension = extension.into();
        self
    }

    /// Set the working directory below the base working directory
    #[must_use]
    pub fn working_directory(mut self, dir: impl Into<String>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    /// Add an environment variable
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// `base/name`, or `name` alone when it is absolute
fn posix_join(base: &str, name: &str) -> String {
    if name.starts_with('/') {
        name.to_string()
    } else {
        format!("{}/{}", base.trim_end_matches('/'), name)
    }
}

/// Live handle to a test device
pub struct Target {
    info: TargetInfo,
    settings: TargetSettings,
    backend: Box<dyn TargetBackend>,
    power: Option<PowerHandle>,
    connected: bool,
    default_environment: BTreeMap<String, String>,
    default_platform: String,
    base_working_directory: String,
    tmp_dir: String,
    main_screen_id: i32,
    unique_screenshot_prefix: String,
    screenshot_counter: u32,
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("name", &self.info.name)
            .field("backend", &self.backend.description())
            .field("connected", &self.connected)
            .finish_non_exhaustive()
    }
}

impl Target {
    /// Create a target with an explicit backend
    pub fn new(
        info: TargetInfo,
        settings: TargetSettings,
        backend: Box<dyn TargetBackend>,
        power: Option<PowerHandle>,
    ) -> Self {
        Self {
            default_environment: info.environment.clone(),
            default_platform: info.renderer_platform.clone(),
            base_working_directory: format!("{}/bin", settings.install_dir.trim_end_matches('/')),
            tmp_dir: "/tmp".to_string(),
            main_screen_id: -1,
            unique_screenshot_prefix: helper::random_prefix(10),
            screenshot_counter: 0,
            connected: false,
            info,
            settings,
            backend,
            power,
        }
    }

    /// The test host itself
    pub fn local(info: TargetInfo, settings: TargetSettings) -> Self {
        Self::new(info, settings, Box::new(LocalBackend::new()), None)
    }

    /// A device reached over SSH, optionally fed by a power relay
    pub fn remote(info: TargetInfo, settings: TargetSettings, power_device: Option<PowerDevice>) -> Self {
        let endpoint = RemoteEndpoint {
            host: info.hostname.clone(),
            port: info.ssh_port,
            username: info.username.clone(),
            credentials: info.credentials.clone(),
        };
        let power = match (power_device, info.power_outlet) {
            (Some(device), Some(outlet)) => Some(PowerHandle { device, outlet }),
            (Some(device), None) => {
                warn!("target {} has power device {} but no outlet", info.name, device.name());
                None
            }
            _ => None,
        };
        Self::new(info, settings, Box::new(RemoteBackend::new(endpoint)), power)
    }

    /// Target name
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Static description
    pub fn info(&self) -> &TargetInfo {
        &self.info
    }

    /// Run-wide settings
    pub fn settings(&self) -> &TargetSettings {
        &self.settings
    }

    /// Is the target connected?
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Does the target have `capability`?
    pub fn supports(&self, capability: Capability) -> bool {
        self.info.capabilities.supports(capability)
    }

    /// Minimum screenshot tolerances
    pub fn tolerances(&self) -> Tolerances {
        self.info.tolerances
    }

    /// Platform part of the default renderer name
    pub fn default_platform(&self) -> &str {
        &self.default_platform
    }

    /// Change the default renderer platform
    pub fn set_default_platform(&mut self, platform: impl Into<String>) {
        self.default_platform = platform.into();
    }

    /// Environment every started application gets
    pub fn default_environment_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.default_environment
    }

    /// `<install_dir>/bin`
    pub fn base_working_directory(&self) -> &str {
        &self.base_working_directory
    }

    /// Directory for temporary files on the target
    pub fn tmp_dir(&self) -> &str {
        &self.tmp_dir
    }

    /// Screen used for system compositor screenshots
    pub fn set_main_screen_id(&mut self, id: i32) {
        self.main_screen_id = id;
    }

    /// Target this one is reached through
    pub fn bridge_target(&self) -> Option<&str> {
        self.info.bridge_target.as_deref()
    }

    fn merged_working_directory(&self, working_directory: Option<&str>) -> String {
        match working_directory {
            Some(dir) if !dir.is_empty() => posix_join(&self.base_working_directory, dir),
            _ => self.base_working_directory.clone(),
        }
    }

    fn power_cycle(power: Option<&PowerHandle>, policy: &RetryPolicy) -> bool {
        let Some(power) = power else {
            return false;
        };
        match power
            .device
            .power_cycle(power.outlet, Duration::from_secs(policy.power_off_secs))
        {
            Ok(()) => {
                std::thread::sleep(Duration::from_secs(policy.boot_wait_secs));
                true
            }
            Err(e) => {
                error!("power cycle via {} failed: {}", power.device.name(), e);
                false
            }
        }
    }

    /// Connect and optionally install the binary package
    ///
    /// Returns false when the target stays unreachable or the package could
    /// not be installed; the reason is logged.
    pub fn setup(&mut self, transfer_binaries: bool) -> bool {
        info!("setting up target {} ({})", self.info.name, self.backend.description());
        let policy = self.settings.retry.clone();
        let backend = &mut self.backend;
        let power = self.power.as_ref();
        self.connected = connect_with_retries(
            &self.info.name,
            &policy,
            |timeout| backend.connect(timeout),
            || Self::power_cycle(power, &policy),
            std::thread::sleep,
        );
        if !self.connected {
            error!("target {} could not be connected", self.info.name);
            return false;
        }

        if transfer_binaries {
            if let Err(e) = self.transfer_binary_package() {
                error!("installing package on {} failed: {}", self.info.name, e);
                return false;
            }
        }
        true
    }

    fn find_package(&self) -> Result<PathBuf> {
        let dir = self
            .settings
            .package_dir
            .as_ref()
            .ok_or_else(|| HarnessError::Config("no package directory configured".to_string()))?;
        let mut matches = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if file_name.starts_with(&self.info.build_job_name) && file_name.ends_with(".tar.gz") {
                matches.push(path);
            }
        }
        match matches.len() {
            1 => Ok(matches.remove(0)),
            0 => Err(HarnessError::Transfer(format!(
                "no {}*.tar.gz in {}",
                self.info.build_job_name,
                dir.display()
            ))),
            n => Err(HarnessError::Transfer(format!(
                "{} packages match {}*.tar.gz in {}",
                n,
                self.info.build_job_name,
                dir.display()
            ))),
        }
    }

    /// Upload `<build_job_name>*.tar.gz` and extract it into the install directory
    pub fn transfer_binary_package(&mut self) -> Result<()> {
        let package = self.find_package()?;
        let file_name = package
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let remote = posix_join(&self.tmp_dir, &file_name);
        info!("transferring {} to {}:{}", package.display(), self.info.name, remote);
        self.backend.copy_to_target(&package, &remote)?;

        let extract = format!(
            "mkdir -p {install} && tar -xzf {remote} -C {install}",
            install = helper::shell_quote(&self.settings.install_dir),
            remote = helper::shell_quote(&remote)
        );
        let output = self.backend.execute(&extract, &ExecOptions::default())?;
        let cleanup = self
            .backend
            .execute(&format!("rm -f {}", helper::shell_quote(&remote)), &ExecOptions::default());
        if let Err(e) = cleanup {
            warn!("could not remove {} on {}: {}", remote, self.info.name, e);
        }
        if !output.success() {
            return Err(HarnessError::Transfer(format!(
                "extracting {} failed ({:?}): {}",
                file_name,
                output.exit_code,
                output.stderr.join("\n")
            )));
        }
        Ok(())
    }

    /// Delete screenshots, disconnect, and optionally power the target down
    pub fn tear_down(&mut self, shutdown: bool) {
        if self.connected {
            let tmp_dir = self.tmp_dir.clone();
            if let Err(e) = self.delete_files_on_target(&format!("{FIXED_SCREENSHOT_PREFIX}*"), &tmp_dir) {
                warn!("could not delete screenshots on {}: {}", self.info.name, e);
            }
            if shutdown && self.power.is_some() {
                let command = self.info.platform.shutdown_command();
                if let Err(e) = self.backend.execute(command, &ExecOptions::detached()) {
                    warn!("shutdown of {} failed: {}", self.info.name, e);
                }
            }
        }
        self.backend.disconnect();
        self.connected = false;

        if shutdown {
            if let Some(power) = &self.power {
                info!("powering off {}", self.info.name);
                if let Err(e) = power.device.switch(power.outlet, false) {
                    error!("power off of {} failed: {}", self.info.name, e);
                }
            }
        }
    }

    /// Start the daemon
    pub fn start_daemon(&mut self, options: &LaunchOptions) -> Application {
        let mut options = options.clone();
        options.args = format!("{} -myport {}", options.args, CUSTOM_DAEMON_PORT);
        if options.dlt_app_id.is_none() {
            options.dlt_app_id = Some("SMGR".to_string());
        }
        let mut daemon = self.start_sdk_application("ramses-daemon", &options);
        daemon.initialisation_message_to_look_for("Ramsh commands registered");
        daemon
    }

    /// Start a renderer with visible window and ramsh enabled
    ///
    /// Default ivi layer/surface ids are added unless `options.args` names
    /// its own.
    pub fn start_renderer(
        &mut self,
        application_name: &str,
        options: &LaunchOptions,
        wait_for_display_manager: bool,
    ) -> Application {
        let mut options = options.clone();
        let given = options.args.clone();
        let mut args = format!("--startVisible -scc {given}");
        if !given.contains("--waylandIviLayerId") && !given.contains("-lid") {
            args.push_str(&format!(" -lid {DEFAULT_TEST_LAYER}"));
        }
        if !given.contains("--waylandIviSurfaceID") && !given.contains("-sid") {
            args.push_str(&format!(" -sid {DEFAULT_TEST_SURFACE}"));
        }
        options.args = args;
        if options.dlt_app_id.is_none() {
            options.dlt_app_id = Some("REND".to_string());
        }

        let mut renderer = self.start_sdk_application(application_name, &options);
        renderer.initialisation_message_to_look_for(if wait_for_display_manager {
            "Ramsh commands registered from DisplayManager"
        } else {
            "Ramsh commands registered from RamsesRenderer"
        });
        renderer
    }

    /// Start `ramses-renderer-<default platform>`
    pub fn start_default_renderer(&mut self, options: &LaunchOptions) -> Application {
        let name = format!("ramses-renderer-{}", self.default_platform);
        self.start_renderer(&name, options, true)
    }

    /// Start a client application
    pub fn start_client(&mut self, application_name: &str, options: &LaunchOptions) -> Application {
        self.start_sdk_application(application_name, options)
    }

    fn start_sdk_application(&mut self, application_name: &str, options: &LaunchOptions) -> Application {
        let binary_dir = self.merged_working_directory(options.working_directory.as_deref());
        let mut args = options.args.trim().to_string();
        if let Some(id) = &options.dlt_app_id {
            args.push_str(&format!(" -dai {id}"));
        }
        args.push_str(&format!(
            " -l {} --enableSmokeTestContext --enableProtocolVersionOffset -p {}",
            self.settings.log_level, CUSTOM_DAEMON_PORT
        ));

        let mut options = options.clone();
        options.args = args;
        options.env.insert("DISABLE_CONSOLE_COLORS".to_string(), "1".to_string());
        options
            .env
            .insert("DISABLE_RAMSH_INTERACTIVE_MODE".to_string(), "1".to_string());
        self.start_application(application_name, Some(&binary_dir), &options)
    }

    /// Start any executable
    ///
    /// `binary_dir` of `None` means the executable is found through `PATH`.
    /// Failures are logged and produce an application that is not started.
    pub fn start_application(
        &mut self,
        application_name: &str,
        binary_dir: Option<&str>,
        options: &LaunchOptions,
    ) -> Application {
        if !self.connected {
            error!("cannot start {} on {}: not connected", application_name, self.info.name);
            return Application::not_started(application_name, &options.name_extension);
        }

        let executable = match binary_dir {
            Some(dir) => posix_join(dir, application_name),
            None => application_name.to_string(),
        };
        let request = SpawnRequest {
            command_line: format!("{} {}", executable, options.args.trim()).trim_end().to_string(),
            working_dir: binary_dir.map(str::to_string),
            env: helper::merge_environment(&self.default_environment, &options.env),
        };
        info!("starting on {}: {}", self.info.name, request.command_line);

        let launched = self
            .backend
            .spawn(&request)
            .and_then(|io| Application::launch(application_name, &options.name_extension, io));
        match launched {
            Ok(app) => app,
            Err(e) => {
                error!("starting {} on {} failed: {}", application_name, self.info.name, e);
                Application::not_started(application_name, &options.name_extension)
            }
        }
    }

    /// Kill an application and drain its remaining output
    pub fn kill_application(&mut self, application: &mut Application) {
        if !application.is_started() {
            warn!("{} is not running on {}", application.extended_name(), self.info.name);
            return;
        }
        let kill_command = self.info.platform.kill_command(application.name());
        if let Err(e) = self.backend.terminate(application.pid(), &kill_command) {
            error!("killing {} on {} failed: {}", application.extended_name(), self.info.name, e);
        }
        application.mark_stopped();
    }

    /// Run a command on the target
    pub fn execute_on_target(&mut self, command: &str, options: &ExecOptions) -> Result<CommandOutput> {
        if !self.connected {
            return Err(HarnessError::NotConnected(self.info.name.clone()));
        }
        let mut options = options.clone();
        options.env = helper::merge_environment(&self.default_environment, &options.env);
        self.backend.execute(command, &options)
    }

    /// Copy `file_name` (relative to the working directory) to `dest`
    pub fn copy_file_from_target(
        &mut self,
        file_name: &str,
        dest: &Path,
        working_directory: Option<&str>,
    ) -> Result<()> {
        if !self.connected {
            return Err(HarnessError::NotConnected(self.info.name.clone()));
        }
        let remote = posix_join(&self.merged_working_directory(working_directory), file_name);
        self.backend.copy_from_target(&remote, dest)
    }

    /// Copy `source` to `file_name` (relative to the working directory)
    pub fn copy_file_to_target(
        &mut self,
        source: &Path,
        file_name: &str,
        working_directory: Option<&str>,
    ) -> Result<()> {
        if !self.connected {
            return Err(HarnessError::NotConnected(self.info.name.clone()));
        }
        let remote = posix_join(&self.merged_working_directory(working_directory), file_name);
        self.backend.copy_to_target(source, &remote)
    }

    /// Delete files matching a shell pattern in `directory`
    pub fn delete_files_on_target(&mut self, pattern: &str, directory: &str) -> Result<()> {
        let command = self.info.platform.delete_files_command(directory, pattern);
        let output = self.execute_on_target(&command, &ExecOptions::default())?;
        if !output.success() {
            warn!("'{}' on {} exited with {:?}", command, self.info.name, output.exit_code);
        }
        Ok(())
    }

    /// Save stdout/stderr of a stopped application into the result directory
    ///
    /// Writes `<name>[nr]_<target>.txt` and `<name>[nr]_<target>_STDERR.txt`
    /// below `<result_dir>/<class>/<run>`; empty streams produce no file.
    pub fn save_application_output(
        &self,
        application: &Application,
        test_class: &str,
        test_run: &str,
        nr: Option<u32>,
    ) -> Result<()> {
        if application.is_started() {
            error!("output of {} can only be saved after it was stopped", application.extended_name());
            return Ok(());
        }
        let dir = self.settings.result_dir.join(test_class).join(test_run);
        let file_name = match nr {
            Some(nr) => format!("{}{}_{}", application.name(), nr, self.info.name),
            None => format!("{}_{}", application.name(), self.info.name),
        };

        let stdout = application.get_stdout_data();
        if !stdout.is_empty() {
            helper::save_text_file(&dir.join(format!("{file_name}.txt")), &stdout)?;
        }
        let stderr = application.get_stderr_data();
        if !stderr.is_empty() {
            helper::save_text_file(&dir.join(format!("{file_name}_STDERR.txt")), &stderr)?;
        }
        Ok(())
    }

    /// Processes on the target, optionally only lines containing `filter`
    pub fn get_process_list(&mut self, filter: Option<&str>) -> Result<Vec<String>> {
        let command = self.info.platform.process_list_command();
        let output = self.execute_on_target(command, &ExecOptions::default())?;
        Ok(match filter {
            Some(filter) => output.stdout.into_iter().filter(|l| l.contains(filter)).collect(),
            None => output.stdout,
        })
    }
}
