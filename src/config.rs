// config.rs

use crate::error::{ExperimentError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// RGB color triple, 0-255 per channel.
pub type Rgb = [u8; 3];

/// Supported eye-tracker drivers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackerType {
    Dummy,
    EyeLink,
    Tobii,
}

impl fmt::Display for TrackerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrackerType::Dummy => "dummy",
            TrackerType::EyeLink => "eyelink",
            TrackerType::Tobii => "tobii",
        };
        f.write_str(name)
    }
}

/// How long each timed screen stays up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub welcome_ms: u64,
    pub stimulus_ms: u64,
    pub blank_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            welcome_ms: 4000,
            stimulus_ms: 3000,
            blank_ms: 3000,
        }
    }
}

/// Experiment configuration parameters.
///
/// Loaded once at start-up and handed around by reference; nothing mutates
/// it after [`ExperimentConfig::load`] returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub dummy_mode: bool,
    pub tracker_type: TrackerType,
    pub tracker_serial: Option<String>,

    /// Display resolution in pixels (width, height).
    pub disp_size: (u32, u32),
    /// Eye to display distance in centimeters.
    pub screen_dist: f64,
    /// Physical display size in centimeters (width, height).
    pub screen_size: (f64, f64),
    /// Visible image width in centimeters, used for visual angle.
    pub monitor_width: f64,
    pub fullscreen: bool,

    pub result_folder: PathBuf,
    pub data_root: PathBuf,

    pub bgc: Rgb,
    pub fgc: Rgb,
    pub color_screen_bgc: Rgb,
    pub font: String,
    pub font_path: Option<PathBuf>,
    pub font_size: f32,

    pub keylist: Vec<String>,
    pub response_keys: Vec<String>,
    pub drift_tolerance_px: f32,

    pub timing: TimingConfig,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            dummy_mode: true,
            tracker_type: TrackerType::Dummy,
            tracker_serial: None,
            disp_size: (1536, 864),
            screen_dist: 90.0,
            screen_size: (33.8, 27.1),
            monitor_width: 53.0,
            fullscreen: true,
            result_folder: PathBuf::from("results"),
            data_root: PathBuf::from("data"),
            bgc: [220, 220, 220],
            fgc: [0, 0, 0],
            color_screen_bgc: [45, 45, 150],
            font: "Courier New".to_string(),
            font_path: None,
            font_size: 22.0,
            keylist: ["space", "a", "b", "c"].map(String::from).to_vec(),
            response_keys: vec!["space".to_string()],
            drift_tolerance_px: 60.0,
            timing: TimingConfig::default(),
        }
    }
}

impl ExperimentConfig {
    /// Reads a JSON config file; keys missing from the file keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self =
            serde_json::from_str(&text).map_err(|source| ExperimentError::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.disp_size.0 == 0 || self.disp_size.1 == 0 {
            return Err(ExperimentError::Config(format!(
                "disp_size must be non-zero, got {}x{}",
                self.disp_size.0, self.disp_size.1
            )));
        }
        if !(self.screen_dist > 0.0) {
            return Err(ExperimentError::Config(
                "screen_dist must be positive".to_string(),
            ));
        }
        if !(self.screen_size.0 > 0.0 && self.screen_size.1 > 0.0) {
            return Err(ExperimentError::Config(
                "screen_size must be positive".to_string(),
            ));
        }
        if !(self.monitor_width > 0.0) {
            return Err(ExperimentError::Config(
                "monitor_width must be positive".to_string(),
            ));
        }
        if !(self.drift_tolerance_px > 0.0) {
            return Err(ExperimentError::Config(format!(
                "drift_tolerance_px must be positive, got {}",
                self.drift_tolerance_px
            )));
        }
        if !(self.font_size > 0.0) {
            return Err(ExperimentError::Config(
                "font_size must be positive".to_string(),
            ));
        }
        if self.keylist.is_empty() {
            return Err(ExperimentError::Config("keylist is empty".to_string()));
        }
        if let Some(key) = self
            .response_keys
            .iter()
            .find(|k| !self.keylist.contains(k))
        {
            return Err(ExperimentError::Config(format!(
                "response key `{key}` is not in keylist"
            )));
        }
        if self.response_keys.is_empty() {
            return Err(ExperimentError::Config("response_keys is empty".to_string()));
        }
        Ok(())
    }

    /// The tracker that will actually be driven: dummy mode wins over the
    /// configured type.
    pub fn effective_tracker(&self) -> TrackerType {
        if self.dummy_mode {
            TrackerType::Dummy
        } else {
            self.tracker_type
        }
    }

    pub fn pixels_per_cm(&self) -> f64 {
        self.disp_size.0 as f64 / self.screen_size.0
    }

    /// Pixels subtended by one degree of visual angle at `screen_dist`,
    /// with the horizontal resolution spread over `monitor_width`.
    pub fn pixels_per_degree(&self) -> f64 {
        let cm_per_degree = 2.0 * self.screen_dist * 0.5_f64.to_radians().tan();
        cm_per_degree * self.disp_size.0 as f64 / self.monitor_width
    }

    /// Default welcome image under `data_root`.
    pub fn welcome_screen_path(&self) -> PathBuf {
        self.data_root.join("welcome_screen.png")
    }
}
