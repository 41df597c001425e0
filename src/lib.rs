//! # Remote Test Harness
//!
//! Drives integration tests of a rendering SDK on one or more targets:
//! - the local machine or remote devices reached over SSH
//! - started applications with drained stdout/stderr and a ramsh command channel
//! - blocking waits for log messages
//! - screenshots compared against reference images
//! - power cycling through a telnet power relay
//! - test expansion over targets with seeded ordering and a JSON report
//!
//! ## Example
//!
//! ```rust,no_run
//! use remote_test_harness::{
//!     Core, CoreMode, DistributionPolicy, HarnessConfig, IntegrationTest, LaunchOptions, RunOptions,
//!     TestContext, TestDescriptor,
//! };
//!
//! struct DaemonStarts;
//!
//! impl IntegrationTest for DaemonStarts {
//!     fn descriptor(&self) -> TestDescriptor {
//!         TestDescriptor::new("Daemon", "starts", DistributionPolicy::AllDefaultTargets)
//!     }
//!
//!     fn run(&mut self, ctx: &mut TestContext<'_>) -> remote_test_harness::Result<()> {
//!         ctx.start_daemon(0, &LaunchOptions::default())?;
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = HarnessConfig::load(None)?;
//!     let mut core = Core::new(&config, CoreMode::Remote)?;
//!     core.register(|| DaemonStarts);
//!     let report = core.run_all(&RunOptions::default());
//!     std::process::exit(if report.was_successful() { 0 } else { 1 });
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;
pub mod logging;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes, OutputFormat};
pub use crate::config::{ConfigFinding, HarnessConfig};
pub use crate::core::application::{Application, ProcessIo};
pub use crate::core::buffer::{Buffer, BufferWatcher, WatchId};
pub use crate::core::image_utils::{ComparisonMode, EqualityTolerance, InequalityRequirement};
pub use crate::core::power::{PowerDevice, PowerDeviceConfig, PowerError};
pub use crate::core::report::{RunReport, TestOutcome, TestRecord};
pub use crate::core::runner::{Core, CoreMode, RunOptions};
pub use crate::core::suite::{DistributionPolicy, IntegrationTest, TestContext, TestDescriptor};
pub use crate::core::target::{
    Capability, CommandOutput, Credentials, ExecOptions, LaunchOptions, PlatformKind, ScreenshotOptions, Target,
    TargetInfo, TargetSettings,
};
pub use crate::core::{HarnessError, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
