//! Player settings
//!
//! Stored as XML in the user's config directory, or at a path given on the
//! command line. A missing file means defaults.

use quick_xml::de::from_str;
use quick_xml::se::to_string;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::graph::FilterSettings;
use crate::render::ColorStandard;

/// Where YUV to RGB conversion runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BackendChoice {
    #[default]
    #[serde(rename = "gpu")]
    Gpu,
    #[serde(rename = "cpu")]
    Cpu,
}

/// Settings stored in `settings.xml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename = "FilterPlayerSettings")]
pub struct PlayerSettings {
    /// YCbCr matrix and range used for conversion
    #[serde(rename = "colorStandard", default)]
    pub color_standard: ColorStandard,

    #[serde(rename = "backend", default)]
    pub backend: BackendChoice,

    /// Whether VSYNC is enabled (syncs to display refresh rate)
    /// - true:  Fifo present mode, the display paces ticks
    /// - false: manual pacing at `target_fps`
    #[serde(rename = "vsyncEnabled", default)]
    pub vsync_enabled: bool,

    /// Target tick rate (24-240)
    #[serde(rename = "targetFps", default = "default_target_fps")]
    pub target_fps: u32,

    #[serde(rename = "looping", default)]
    pub looping: bool,

    /// Initial volume (0.0-1.0)
    #[serde(rename = "volume", default = "default_unit")]
    pub volume: f64,

    /// Initial playback rate
    #[serde(rename = "playbackRate", default = "default_unit")]
    pub playback_rate: f64,

    /// Decoded frames buffered ahead of presentation
    #[serde(rename = "frameQueueDepth", default = "default_frame_queue_depth")]
    pub frame_queue_depth: usize,

    /// Idle textures kept per size/format in the framebuffer cache
    #[serde(rename = "maxIdleTextures", default = "default_max_idle")]
    pub max_idle_per_key: usize,

    /// Filter chain, applied in order
    #[serde(rename = "filter", default)]
    pub filters: Vec<FilterSettings>,

    #[serde(rename = "windowWidth", default = "default_window_width")]
    pub window_width: u32,

    #[serde(rename = "windowHeight", default = "default_window_height")]
    pub window_height: u32,
}

fn default_target_fps() -> u32 {
    60
}

fn default_unit() -> f64 {
    1.0
}

fn default_frame_queue_depth() -> usize {
    8
}

fn default_max_idle() -> usize {
    4
}

fn default_window_width() -> u32 {
    1280
}

fn default_window_height() -> u32 {
    720
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            color_standard: ColorStandard::default(),
            backend: BackendChoice::default(),
            vsync_enabled: false,
            target_fps: default_target_fps(),
            looping: false,
            volume: default_unit(),
            playback_rate: default_unit(),
            frame_queue_depth: default_frame_queue_depth(),
            max_idle_per_key: default_max_idle(),
            filters: vec![FilterSettings::new("pixellate")],
            window_width: default_window_width(),
            window_height: default_window_height(),
        }
    }
}

impl PlayerSettings {
    /// Clamp FPS to valid range (24-240)
    pub fn clamp_fps(&mut self) {
        self.target_fps = self.target_fps.clamp(24, 240);
    }

    /// Bring every field into its valid range
    pub fn sanitize(&mut self) {
        self.clamp_fps();
        self.volume = self.volume.clamp(0.0, 1.0);
        self.frame_queue_depth = self.frame_queue_depth.clamp(2, 120);
        self.window_width = self.window_width.max(1);
        self.window_height = self.window_height.max(1);
        if !self.playback_rate.is_finite() || self.playback_rate <= 0.0 {
            self.playback_rate = 1.0;
        }
    }

    pub fn from_xml(contents: &str) -> Result<Self, SettingsError> {
        let mut settings: Self = from_str(contents).map_err(SettingsError::XmlParse)?;
        settings.sanitize();
        Ok(settings)
    }

    pub fn to_xml(&self) -> Result<String, SettingsError> {
        let xml = to_string(self).map_err(SettingsError::XmlWrite)?;
        Ok(format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{}", xml))
    }

    /// Load settings from an XML file
    pub fn load_from_file(path: &Path) -> Result<Self, SettingsError> {
        let contents = fs::read_to_string(path).map_err(SettingsError::Io)?;
        Self::from_xml(&contents)
    }

    /// Save settings to an XML file, creating parent directories
    pub fn save_to_file(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(SettingsError::Io)?;
        }
        fs::write(path, self.to_xml()?).map_err(SettingsError::Io)?;
        Ok(())
    }

    /// Default settings file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push("FilterPlayer");
            p.push("settings.xml");
            p
        })
    }

    /// Load from `path`, or the default location; defaults if the file is missing
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) => path,
                None => {
                    tracing::warn!("No config directory, using default settings");
                    return Ok(Self::default());
                }
            },
        };

        if !path.exists() {
            tracing::info!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let settings = Self::load_from_file(&path)?;
        tracing::info!("Loaded settings from {}", path.display());
        Ok(settings)
    }
}

/// Settings-related errors
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("XML parse error: {0}")]
    XmlParse(#[from] quick_xml::DeError),
    #[error("XML write error: {0}")]
    XmlWrite(#[from] quick_xml::SeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = PlayerSettings::default();
        assert_eq!(settings.target_fps, 60);
        assert_eq!(settings.color_standard, ColorStandard::Bt601FullRange);
        assert_eq!(settings.backend, BackendChoice::Gpu);
        assert_eq!(settings.frame_queue_depth, 8);
        assert_eq!(settings.filters, vec![FilterSettings::new("pixellate")]);
        assert!(!settings.looping);
    }

    #[test]
    fn test_fps_clamping() {
        let mut settings = PlayerSettings::default();
        settings.target_fps = 300;
        settings.clamp_fps();
        assert_eq!(settings.target_fps, 240);

        settings.target_fps = 10;
        settings.clamp_fps();
        assert_eq!(settings.target_fps, 24);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let xml = "<FilterPlayerSettings><targetFps>500</targetFps><volume>3.0</volume></FilterPlayerSettings>";
        let settings = PlayerSettings::from_xml(xml).unwrap();
        assert_eq!(settings.target_fps, 240);
        assert_eq!(settings.volume, 1.0);
        assert_eq!(settings.window_width, 1280);
        assert!(settings.filters.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir()
            .join(format!("filter-player-settings-{}", std::process::id()))
            .join("settings.xml");
        let mut settings = PlayerSettings::default();
        settings.backend = BackendChoice::Cpu;
        settings.filters = vec![FilterSettings::new("invert").with_amount(0.5)];
        settings.save_to_file(&path).unwrap();

        let loaded = PlayerSettings::load(Some(&path)).unwrap();
        assert_eq!(loaded, settings);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let err = PlayerSettings::from_xml("<FilterPlayerSettings><targetFps>fast</targetFps>").unwrap_err();
        assert!(matches!(err, SettingsError::XmlParse(_)));
        assert!(err.to_string().starts_with("XML parse error"));

        let io: SettingsError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert_eq!(io.to_string(), "IO error: gone");
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let path = std::env::temp_dir().join("filter-player-does-not-exist.xml");
        assert_eq!(PlayerSettings::load(Some(&path)).unwrap(), PlayerSettings::default());
    }
}
