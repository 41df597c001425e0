//! Harness CLI - Command-line interface
//!
//! Exposes the harness operations to CI scripts: configuration checks,
//! target setup, remote commands, image comparison and power control.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use remote_test_harness::cli::{print_exit_codes, CliResult, OutputFormat};
use remote_test_harness::core::image_utils::compare_image_files;
use remote_test_harness::logging;
use remote_test_harness::{
    ComparisonMode, EqualityTolerance, ExecOptions, HarnessConfig, HarnessError, InequalityRequirement, PowerDevice,
    Target, TargetInfo,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

/// Harness CLI
#[derive(Parser, Debug)]
#[command(
    name = "harness-cli",
    version,
    about = "Integration test harness for local and remote SSH targets",
    long_about = None
)]
struct Cli {
    /// Configuration file (default: harness.toml in the user config directory)
    #[arg(short, long, env = "HARNESS_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    format: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode (warnings and errors only)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    json_log: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the configuration and print all findings
    CheckConfig,

    /// List configured targets
    ListTargets,

    /// Connect a target, optionally install the binary package, then tear it down
    Setup {
        /// Target name, or `local`
        #[arg(short, long)]
        target: String,

        /// Skip the binary package transfer
        #[arg(long)]
        no_transfer: bool,

        /// Shut the target down and power it off afterwards
        #[arg(long)]
        shutdown: bool,
    },

    /// Run one command on a target
    Exec {
        /// Target name, or `local`
        #[arg(short, long)]
        target: String,

        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Working directory on the target
        #[arg(long)]
        cwd: Option<String>,

        /// Command and arguments
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },

    /// Compare a screenshot with a reference image
    Compare {
        /// Screenshot to check
        candidate: PathBuf,

        /// Reference image
        reference: PathBuf,

        /// Require the images to differ instead
        #[arg(long)]
        unequal: bool,

        /// Share of wrong pixels allowed (0.0 - 1.0)
        #[arg(long, default_value_t = 0.0)]
        wrong_pixels_allowed: f64,

        /// Per-channel difference allowed per pixel (0.0 - 1.0)
        #[arg(long, default_value_t = 0.0)]
        rgb_difference_allowed: f64,

        /// Pixels that must differ (with --unequal)
        #[arg(long, default_value_t = 1)]
        required_unequal_pixels: u64,

        /// Per-channel difference a differing pixel needs (with --unequal)
        #[arg(long, default_value_t = 0.0)]
        rgb_difference_required: f64,

        /// Where diff images go (default: next to the candidate)
        #[arg(long)]
        diff_dir: Option<PathBuf>,

        /// Multiplier of the scaled diff image
        #[arg(long, default_value_t = 10.0)]
        scale: f64,
    },

    /// Switch a power relay outlet
    Power {
        /// Power device name from the configuration
        #[arg(short, long)]
        device: String,

        /// Outlet number
        #[arg(short, long)]
        outlet: u32,

        /// What to do
        #[arg(value_enum)]
        action: PowerAction,

        /// Off time of a power cycle (seconds)
        #[arg(long, default_value_t = 5)]
        off_time: u64,
    },

    /// Print the exit code table
    ExitCodes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PowerAction {
    On,
    Off,
    Cycle,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = logging::level_for(cli.verbose, cli.quiet);

    // a readable configuration decides where the run log goes
    let run_log_dir = match &cli.command {
        Commands::Setup { .. } | Commands::Exec { .. } => HarnessConfig::read(cli.config.as_deref())
            .ok()
            .map(|c| c.result_dir),
        _ => None,
    };
    let _guard = match logging::init(level, cli.json_log, run_log_dir.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Could not open run log: {e}");
            None
        }
    };
    tracing::debug!("harness-cli v{}", remote_test_harness::VERSION);

    let result = match run(&cli) {
        Ok(result) => result,
        Err(e) => match e.downcast::<HarnessError>() {
            Ok(harness_error) => CliResult::from(harness_error),
            Err(other) => CliResult::setup_error(format!("{other:#}")),
        },
    };

    match (&result, result.message()) {
        (CliResult::Success(_), Some(msg)) if !cli.quiet => println!("{msg}"),
        (CliResult::Error(..), Some(msg)) => eprintln!("Error: {msg}"),
        _ => {}
    }
    result.to_exit_code()
}

fn run(cli: &Cli) -> anyhow::Result<CliResult> {
    match &cli.command {
        Commands::CheckConfig => check_config(cli),
        Commands::ListTargets => list_targets(cli),
        Commands::Setup {
            target,
            no_transfer,
            shutdown,
        } => setup_target(cli, target, !*no_transfer, *shutdown),
        Commands::Exec {
            target,
            timeout,
            cwd,
            command,
        } => exec(cli, target, *timeout, cwd.as_deref(), command),
        Commands::Compare {
            candidate,
            reference,
            unequal,
            wrong_pixels_allowed,
            rgb_difference_allowed,
            required_unequal_pixels,
            rgb_difference_required,
            diff_dir,
            scale,
        } => {
            let mode = if *unequal {
                ComparisonMode::Unequal(InequalityRequirement {
                    required_unequal_pixels: *required_unequal_pixels,
                    rgb_difference_required: *rgb_difference_required,
                })
            } else {
                ComparisonMode::Equal(EqualityTolerance {
                    wrong_pixels_allowed: *wrong_pixels_allowed,
                    rgb_difference_allowed: *rgb_difference_allowed,
                })
            };
            compare(candidate, reference, mode, diff_dir.as_deref(), *scale)
        }
        Commands::Power {
            device,
            outlet,
            action,
            off_time,
        } => power(cli, device, *outlet, *action, Duration::from_secs(*off_time)),
        Commands::ExitCodes => {
            print_exit_codes();
            Ok(CliResult::success())
        }
    }
}

fn check_config(cli: &Cli) -> anyhow::Result<CliResult> {
    let config = HarnessConfig::read(cli.config.as_deref())?;
    let findings = config.validate();

    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&findings)?),
        OutputFormat::Text => {
            for finding in &findings {
                println!("{finding}");
            }
        }
    }

    if findings.is_empty() {
        Ok(CliResult::success_with_message(format!(
            "Configuration OK: {} target(s), {} power device(s)",
            config.targets.len(),
            config.power_devices.len()
        )))
    } else {
        Ok(CliResult::failure(format!("{} finding(s)", findings.len())))
    }
}

fn list_targets(cli: &Cli) -> anyhow::Result<CliResult> {
    let config = HarnessConfig::load(cli.config.as_deref())?;

    match cli.format {
        OutputFormat::Json => {
            let json: Vec<serde_json::Value> = config
                .targets
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "name": t.name,
                        "hostname": t.hostname,
                        "ssh_port": t.ssh_port,
                        "platform": t.platform,
                        "default": t.default,
                        "capabilities": t.capabilities,
                        "power_device": t.power_device,
                        "power_outlet": t.power_outlet,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            for t in &config.targets {
                println!(
                    "{:<20} {}@{}:{} [{:?}]{}",
                    t.name,
                    t.username,
                    t.hostname,
                    t.ssh_port,
                    t.platform,
                    if t.default { "" } else { " (not default)" }
                );
            }
        }
    }
    Ok(CliResult::success())
}

fn build_target(config: &HarnessConfig, name: &str) -> anyhow::Result<Target> {
    let settings = config.target_settings();
    if name == "local" && config.target(name).is_err() {
        return Ok(Target::local(TargetInfo::local(), settings));
    }

    let info = config.target(name)?.clone();
    let power = match &info.power_device {
        Some(device) => Some(PowerDevice::new(
            config
                .power_device(device)
                .cloned()
                .with_context(|| format!("unknown power device {device}"))?,
        )),
        None => None,
    };
    Ok(Target::remote(info, settings, power))
}

fn setup_target(cli: &Cli, name: &str, transfer: bool, shutdown: bool) -> anyhow::Result<CliResult> {
    let config = HarnessConfig::load(cli.config.as_deref())?;
    let mut target = build_target(&config, name)?;

    let ready = target.setup(transfer);
    target.tear_down(shutdown);
    if ready {
        Ok(CliResult::success_with_message(format!("Target {name} is ready")))
    } else {
        Ok(CliResult::failure(format!("Target {name} could not be set up")))
    }
}

fn exec(
    cli: &Cli,
    name: &str,
    timeout: Option<u64>,
    cwd: Option<&str>,
    command: &[String],
) -> anyhow::Result<CliResult> {
    let config = HarnessConfig::load(cli.config.as_deref())?;
    let mut target = build_target(&config, name)?;
    if !target.setup(false) {
        target.tear_down(false);
        return Ok(CliResult::failure(format!("Target {name} could not be connected")));
    }

    let mut options = ExecOptions::default();
    if let Some(secs) = timeout {
        options = options.timeout(Duration::from_secs(secs));
    }
    if let Some(cwd) = cwd {
        options = options.cwd(cwd);
    }
    let output = target.execute_on_target(&command.join(" "), &options);
    target.tear_down(false);
    let output = output?;

    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
        OutputFormat::Text => {
            for line in &output.stdout {
                println!("{line}");
            }
            for line in &output.stderr {
                eprintln!("{line}");
            }
        }
    }

    if output.success() {
        Ok(CliResult::success())
    } else {
        Ok(CliResult::failure(format!("Command exited with {:?}", output.exit_code)))
    }
}

fn compare(
    candidate: &Path,
    reference: &Path,
    mode: ComparisonMode,
    diff_dir: Option<&Path>,
    scale: f64,
) -> anyhow::Result<CliResult> {
    let diff_dir = diff_dir
        .map(Path::to_path_buf)
        .or_else(|| candidate.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));

    match compare_image_files(candidate, reference, mode, &diff_dir, scale) {
        Ok(()) => Ok(CliResult::success_with_message("Images match")),
        Err(e @ HarnessError::Assertion(_)) => Ok(CliResult::failure(format!(
            "{e} (diff images in {})",
            diff_dir.display()
        ))),
        Err(e) => Ok(CliResult::setup_error(e.to_string())),
    }
}

fn power(cli: &Cli, name: &str, outlet: u32, action: PowerAction, off_time: Duration) -> anyhow::Result<CliResult> {
    let config = HarnessConfig::load(cli.config.as_deref())?;
    let device = config
        .power_device(name)
        .cloned()
        .with_context(|| format!("unknown power device {name}"))?;
    let device = PowerDevice::new(device);

    let switched = match action {
        PowerAction::On => device.switch(outlet, true),
        PowerAction::Off => device.switch(outlet, false),
        PowerAction::Cycle => device.power_cycle(outlet, off_time),
    };
    match switched {
        Ok(()) => Ok(CliResult::success_with_message(format!(
            "{name} outlet {outlet}: {action:?} done"
        ))),
        Err(e) => Ok(CliResult::failure(format!("{name} outlet {outlet}: {e}"))),
    }
}
