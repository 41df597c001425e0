//! Screenshots on a target and their comparison with reference images

use super::{posix_join, ExecOptions, Target};
use crate::core::application::Application;
use crate::core::error::{HarnessError, Result};
use crate::core::helper;
use crate::core::image_utils::{self, ComparisonMode};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Prefix of every screenshot file on a target
pub const FIXED_SCREENSHOT_PREFIX: &str = "ramsestlst_";
/// How long a system compositor screenshot may take to appear
pub const SYSTEM_COMPOSITOR_SCREENSHOT_TIMEOUT: Duration = Duration::from_secs(30);

const SCREENSHOT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const RENDERER_CONFIRMATION: &str = "screenshot successfully saved to file";
const SYSTEM_COMPOSITOR_CONFIRMATION: &str =
    "SystemCompositorController_Wayland_IVI::screenshot: Saved screenshot for screen";

/// How to take and judge a screenshot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenshotOptions {
    /// Display to capture; the renderer default when `None`
    pub display: Option<u32>,
    /// Tells several screenshots of one test apart
    pub screenshot_number: u32,
    /// Equality with tolerances, or required difference
    pub mode: ComparisonMode,
    /// Capture the whole screen through the system compositor
    pub use_system_compositor: bool,
    /// How long to wait for the application to confirm the screenshot
    pub confirmation_timeout: Duration,
}

impl Default for ScreenshotOptions {
    fn default() -> Self {
        Self {
            display: None,
            screenshot_number: 0,
            mode: ComparisonMode::default(),
            use_system_compositor: false,
            confirmation_timeout: Duration::from_secs(60),
        }
    }
}

/// `<stem>_<nr>_<target><.ext>`
fn local_screenshot_name(image_name: &str, screenshot_number: u32, target_name: &str) -> String {
    let path = Path::new(image_name);
    let stem = path
        .file_stem()
        .map_or_else(|| image_name.to_string(), |s| s.to_string_lossy().into_owned());
    let extension = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    format!("{stem}_{screenshot_number}_{target_name}{extension}")
}

impl Target {
    /// Locate `image_name` in the reference directories
    ///
    /// Exactly one directory must contain it; none or several is an
    /// assertion failure.
    pub fn find_reference_image(&self, image_name: &str) -> Result<PathBuf> {
        let mut found = self
            .settings
            .reference_image_dirs
            .iter()
            .map(|dir| dir.join(image_name))
            .filter(|path| path.is_file());
        match (found.next(), found.next()) {
            (Some(path), None) => Ok(path),
            (None, _) => Err(HarnessError::assertion(format!(
                "No reference image found for image name '{image_name}'"
            ))),
            (Some(_), Some(_)) => Err(HarnessError::assertion(format!(
                "Multiple reference images found for image name '{image_name}'"
            ))),
        }
    }

    /// Take a screenshot through `renderer`, fetch it and compare it to the reference
    ///
    /// The screenshot is stored as `<result>/<class>/<run>/<stem>_<nr>_<target><.ext>`.
    /// Screenshots smaller than the reference fail; larger ones are cropped
    /// to the reference size. Tolerances below the target's minimum are
    /// raised to it.
    pub fn take_screenshot_and_compare(
        &mut self,
        renderer: &mut Application,
        image_name: &str,
        test_class: &str,
        test_run: &str,
        options: &ScreenshotOptions,
    ) -> Result<()> {
        info!("taking screenshot...");
        let reference_path = self.find_reference_image(image_name)?;
        let reference = image::open(&reference_path)?.to_rgba8();

        let screenshot_path = self.take_and_transfer_screenshot(renderer, image_name, test_class, test_run, options)?;
        let mut screenshot = image::open(&screenshot_path)?.to_rgba8();

        let (min_width, min_height) = reference.dimensions();
        if screenshot.width() < min_width || screenshot.height() < min_height {
            return Err(HarnessError::assertion(format!(
                "Screenshot too small: expected >= {}x{}, got {}x{}",
                min_width,
                min_height,
                screenshot.width(),
                screenshot.height()
            )));
        }
        if screenshot.dimensions() != reference.dimensions() {
            screenshot = image_utils::crop_to(&screenshot, min_width, min_height);
        }

        info!("comparing images...");
        let mode = self.raise_to_target_tolerances(options.mode);
        let diff_dir = screenshot_path.parent().map_or_else(|| self.settings.result_dir.clone(), Path::to_path_buf);
        let base_name = screenshot_path
            .file_stem()
            .map_or_else(|| image_name.to_string(), |s| s.to_string_lossy().into_owned());
        image_utils::assert_images_match(
            &screenshot,
            &reference,
            mode,
            &diff_dir,
            &base_name,
            self.settings.image_diff_scale_factor,
        )
    }

    fn raise_to_target_tolerances(&self, mode: ComparisonMode) -> ComparisonMode {
        let ComparisonMode::Equal(mut tolerance) = mode else {
            return mode;
        };
        let minimum = self.info.tolerances;
        if minimum.rgb_difference_allowed > tolerance.rgb_difference_allowed {
            info!(
                "Allowing higher difference per pixel because of target value: {}%",
                minimum.rgb_difference_allowed * 100.0
            );
            tolerance.rgb_difference_allowed = minimum.rgb_difference_allowed;
        }
        if minimum.wrong_pixels_allowed > tolerance.wrong_pixels_allowed {
            info!(
                "Allowing higher number of wrong pixels because of target value: {}%",
                minimum.wrong_pixels_allowed * 100.0
            );
            tolerance.wrong_pixels_allowed = minimum.wrong_pixels_allowed;
        }
        ComparisonMode::Equal(tolerance)
    }

    fn take_and_transfer_screenshot(
        &mut self,
        renderer: &mut Application,
        image_name: &str,
        test_class: &str,
        test_run: &str,
        options: &ScreenshotOptions,
    ) -> Result<PathBuf> {
        if !self.connected {
            return Err(HarnessError::NotConnected(self.info.name.clone()));
        }
        let local_name = local_screenshot_name(image_name, options.screenshot_number, &self.info.name);
        let target_name = format!(
            "{}{}_{:04}_{}",
            FIXED_SCREENSHOT_PREFIX, self.unique_screenshot_prefix, self.screenshot_counter, local_name
        );
        self.screenshot_counter += 1;
        let target_path = posix_join(&self.tmp_dir, &target_name);

        if options.use_system_compositor {
            self.take_system_compositor_screenshot(&target_path, renderer, options.confirmation_timeout);
        } else {
            Self::take_renderer_screenshot(&target_path, renderer, options.display, options.confirmation_timeout);
        }

        let result_dir = helper::result_dir_subdirectory(&self.settings.result_dir, &[test_class, test_run])?;
        let local_path = result_dir.join(&local_name);
        info!("Store remote {} as local {}", target_name, local_path.display());
        if let Err(e) = self.backend.copy_from_target(&target_path, &local_path) {
            return Err(HarnessError::assertion(format!("Screenshot not found at {target_path}: {e}")));
        }
        if !local_path.is_file() {
            return Err(HarnessError::assertion(format!(
                "Screenshot not found at {}",
                local_path.display()
            )));
        }
        Ok(local_path)
    }

    fn take_renderer_screenshot(
        target_path: &str,
        renderer: &mut Application,
        display: Option<u32>,
        timeout: Duration,
    ) {
        info!("Make screenshot of renderer");
        let mut command = format!("screenshot -filename \"{target_path}\"");
        if let Some(display) = display {
            command.push_str(&format!(" -displayId {display}"));
        }
        if !renderer.send_ramsh_command(&command, Some(RENDERER_CONFIRMATION), Some(timeout)) {
            warn!("Screenshot confirmation not received from the renderer, check renderer application output");
            renderer.send_ramsh_command("rinfo all -v", None, None);
        }
    }

    fn take_system_compositor_screenshot(
        &mut self,
        target_path: &str,
        renderer: &mut Application,
        timeout: Duration,
    ) -> bool {
        info!("Make screenshot of screen using system compositor");
        let command = format!("scScreenshot \"{}\" {}", target_path, self.main_screen_id);
        renderer.send_ramsh_command(&command, Some(SYSTEM_COMPOSITOR_CONFIRMATION), Some(timeout));

        let start = Instant::now();
        let find = format!("find {target_path}");
        while start.elapsed() < SYSTEM_COMPOSITOR_SCREENSHOT_TIMEOUT {
            match self.execute_on_target(&find, &ExecOptions::default()) {
                Ok(output) if output.success() => {
                    info!("system_compositor_screenshot: found {}", target_path);
                    return true;
                }
                Ok(output) => info!(
                    "system_compositor_screenshot: find result {:?} since {:.1}s",
                    output.exit_code,
                    start.elapsed().as_secs_f64()
                ),
                Err(e) => warn!("system_compositor_screenshot: {}", e),
            }
            std::thread::sleep(SCREENSHOT_POLL_INTERVAL);
        }
        warn!("system_compositor_screenshot: failed to take screenshot {}", target_path);
        false
    }
}
