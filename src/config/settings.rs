//! Harness configuration file

use crate::core::power::PowerDeviceConfig;
use crate::core::target::{RetryPolicy, TargetInfo, TargetSettings};
use crate::core::{HarnessError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

/// Contents of `harness.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Local directory for screenshots, logs and reports
    pub result_dir: PathBuf,
    /// Local directories holding reference images
    pub reference_image_dirs: Vec<PathBuf>,
    /// Multiplier for the scaled diff image
    pub image_diff_scale_factor: f64,
    /// SDK log level passed to started applications
    pub log_level: u8,
    /// Installation directory of the SDK on targets
    pub install_dir: String,
    /// Local directory holding binary packages
    pub package_dir: Option<PathBuf>,
    /// Fixed seed for the test order
    pub seed: Option<u64>,
    /// Connection retries
    pub retry: RetryPolicy,
    /// Test devices
    pub targets: Vec<TargetInfo>,
    /// Power relays
    pub power_devices: Vec<PowerDeviceConfig>,
    /// Test class -> target sets
    pub test_to_target: BTreeMap<String, Vec<Vec<String>>>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        let settings = TargetSettings::default();
        Self {
            result_dir: settings.result_dir,
            reference_image_dirs: settings.reference_image_dirs,
            image_diff_scale_factor: settings.image_diff_scale_factor,
            log_level: settings.log_level,
            install_dir: settings.install_dir,
            package_dir: settings.package_dir,
            seed: None,
            retry: settings.retry,
            targets: Vec::new(),
            power_devices: Vec::new(),
            test_to_target: BTreeMap::new(),
        }
    }
}

/// One problem found by [`HarnessConfig::validate`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigFinding {
    /// Where the problem is, e.g. `targets[1].name`
    pub location: String,
    /// What is wrong
    pub message: String,
}

impl ConfigFinding {
    fn new(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.location, self.message)
    }
}

impl HarnessConfig {
    /// Parse a TOML document without validating it
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| HarnessError::Config(e.to_string()))
    }

    /// Read a configuration file without validating it
    ///
    /// `None` reads `harness.toml` from the user config directory; a missing
    /// default file yields the default configuration.
    pub fn read(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::read_file(path),
            None => match super::default_config_path() {
                Some(path) if path.exists() => Self::read_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    fn read_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| HarnessError::Config(format!("{}: {e}", path.display())))?;
        Self::parse(&content)
    }

    /// [`HarnessConfig::read`] and refuse a file with findings
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = Self::read(path)?;
        let findings = config.validate();
        if let Some(first) = findings.first() {
            return Err(HarnessError::Config(format!(
                "{} problem(s), first: {}",
                findings.len(),
                first
            )));
        }
        Ok(config)
    }

    /// Save to `path`, creating its directory
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| HarnessError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Every problem in the configuration
    pub fn validate(&self) -> Vec<ConfigFinding> {
        let mut findings = Vec::new();

        if self.image_diff_scale_factor <= 0.0 {
            findings.push(ConfigFinding::new("image_diff_scale_factor", "must be positive"));
        }
        if self.retry.attempts == 0 {
            findings.push(ConfigFinding::new("retry.attempts", "must be at least 1"));
        }

        let mut power_names = HashSet::new();
        for (i, device) in self.power_devices.iter().enumerate() {
            if !power_names.insert(device.name.as_str()) {
                findings.push(ConfigFinding::new(
                    format!("power_devices[{i}].name"),
                    format!("duplicate power device {}", device.name),
                ));
            }
        }

        let mut target_names = HashSet::new();
        for (i, target) in self.targets.iter().enumerate() {
            if let Err(e) = TargetInfo::validate_name(&target.name) {
                findings.push(ConfigFinding::new(format!("targets[{i}].name"), e.to_string()));
            }
            if !target_names.insert(target.name.as_str()) {
                findings.push(ConfigFinding::new(
                    format!("targets[{i}].name"),
                    format!("duplicate target {}", target.name),
                ));
            }
            match (&target.power_device, target.power_outlet) {
                (Some(device), _) if !power_names.contains(device.as_str()) => findings.push(ConfigFinding::new(
                    format!("targets[{i}].power_device"),
                    format!("unknown power device {device}"),
                )),
                (Some(_), None) => findings.push(ConfigFinding::new(
                    format!("targets[{i}].power_outlet"),
                    "power device without outlet",
                )),
                _ => {}
            }
        }

        for (i, target) in self.targets.iter().enumerate() {
            if let Some(bridge) = &target.bridge_target {
                if !target_names.contains(bridge.as_str()) {
                    findings.push(ConfigFinding::new(
                        format!("targets[{i}].bridge_target"),
                        format!("unknown target {bridge}"),
                    ));
                }
            }
        }

        for (class, sets) in &self.test_to_target {
            for (i, set) in sets.iter().enumerate() {
                if set.is_empty() {
                    findings.push(ConfigFinding::new(format!("test_to_target.{class}[{i}]"), "empty target set"));
                }
                for name in set.iter().filter(|n| !target_names.contains(n.as_str())) {
                    findings.push(ConfigFinding::new(
                        format!("test_to_target.{class}[{i}]"),
                        format!("unknown target {name}"),
                    ));
                }
            }
        }

        findings
    }

    /// Settings shared by every target
    pub fn target_settings(&self) -> TargetSettings {
        TargetSettings {
            install_dir: self.install_dir.clone(),
            result_dir: self.result_dir.clone(),
            reference_image_dirs: self.reference_image_dirs.clone(),
            image_diff_scale_factor: self.image_diff_scale_factor,
            log_level: self.log_level,
            package_dir: self.package_dir.clone(),
            retry: self.retry.clone(),
        }
    }

    /// Target description by name
    pub fn target(&self, name: &str) -> Result<&TargetInfo> {
        self.targets
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| HarnessError::UnknownTarget(name.to_string()))
    }

    /// Power relay by name
    pub fn power_device(&self, name: &str) -> Option<&PowerDeviceConfig> {
        self.power_devices.iter().find(|d| d.name == name)
    }
}
