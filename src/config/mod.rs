//! Application Configuration
//!
//! User settings and preferences stored in TOML format. Every section has
//! full defaults, so a missing or partial file still yields a working
//! configuration.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capture::CaptureConfig;
use crate::engine::{CapturePolicy, EngineConfig};
use crate::geometry::{Orientation, Rotation, Viewport};
use crate::rectify::{DocumentFormat, RectifyConfig};
use crate::vision::{EmptyFramePolicy, FilterConfig};

/// Application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Frame delivery settings
    pub capture: CaptureSettings,
    /// Detection filtering and throttling
    pub vision: VisionSettings,
    /// Rectification settings
    pub rectify: RectifySettings,
    /// Session and display settings
    pub engine: EngineSettings,
    /// Extraction settings
    pub extraction: ExtractionSettings,
    /// Vendor SDK credentials
    pub sdk: SdkSettings,
}

impl AppConfig {
    /// Assemble the engine's runtime configuration from the settings.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            capture: CaptureConfig {
                max_fps: self.capture.max_fps,
                orientation: self.capture.orientation(),
            },
            filter: FilterConfig {
                min_confidence: self.vision.min_confidence,
                min_relative_area: self.vision.min_relative_area,
                top_k: self.vision.top_k,
                interval: Duration::from_millis(self.vision.throttle_ms),
                empty_frames: self.vision.empty_frames,
                max_hold: Duration::from_millis(self.vision.max_hold_ms),
            },
            rectify: RectifyConfig {
                format: self.rectify.format,
                min_area_fraction: self.rectify.min_area_fraction,
            },
            capture_policy: self.engine.capture_policy,
            viewport: Viewport::new(
                self.engine.display_width,
                self.engine.display_height,
                self.engine.display_scale,
            ),
        }
    }
}

/// Frame-delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Folder of images to replay, or empty for the synthetic pattern.
    pub source_dir: Option<PathBuf>,
    /// Maximum frames per second delivered to the pipeline.
    pub max_fps: u32,
    /// Buffer rotation to upright, in degrees (0, 90, 180 or 270).
    pub rotation_degrees: u32,
    /// Whether frames are mirrored (front cameras).
    pub mirrored: bool,
}

impl CaptureSettings {
    pub fn orientation(&self) -> Orientation {
        let rotation = Rotation::from_degrees(self.rotation_degrees).unwrap_or_default();
        Orientation::new(rotation, self.mirrored)
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            source_dir: None,
            max_fps: 30,
            rotation_degrees: 0,
            mirrored: false,
        }
    }
}

/// Detection filtering and throttling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionSettings {
    /// Minimum detector confidence (0.0 - 1.0).
    pub min_confidence: f32,
    /// Minimum detection area as a fraction of the frame.
    pub min_relative_area: f32,
    /// Detections kept per published batch.
    pub top_k: usize,
    /// Minimum milliseconds between published batches.
    pub throttle_ms: u64,
    /// Hold or clear the overlay on empty-detection frames.
    pub empty_frames: EmptyFramePolicy,
    /// Maximum milliseconds a held batch survives without redetection.
    pub max_hold_ms: u64,
}

impl Default for VisionSettings {
    fn default() -> Self {
        Self {
            min_confidence: 0.7,
            min_relative_area: 0.01,
            top_k: 1,
            throttle_ms: 150,
            empty_frames: EmptyFramePolicy::HoldLast,
            max_hold_ms: 500,
        }
    }
}

/// Rectification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RectifySettings {
    /// Target document shape, or free to follow the detected quad.
    pub format: DocumentFormat,
    /// Minimum quad area (fraction of the image) to attempt a warp.
    pub min_area_fraction: f32,
}

impl Default for RectifySettings {
    fn default() -> Self {
        Self {
            format: DocumentFormat::Free,
            min_area_fraction: 1e-4,
        }
    }
}

/// Session and display settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// What to do with a capture request while another is outstanding.
    pub capture_policy: CapturePolicy,
    /// Display surface width in layout points.
    pub display_width: f32,
    /// Display surface height in layout points.
    pub display_height: f32,
    /// Physical pixels per layout point.
    pub display_scale: f32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            capture_policy: CapturePolicy::Reject,
            display_width: 390.0,
            display_height: 844.0,
            display_scale: 1.0,
        }
    }
}

/// Extraction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionSettings {
    /// Language hint passed to the text recognizer (e.g. "en-US").
    pub language: String,
    /// Try to parse an MRZ block from recognized text; fall back to free
    /// text when none is found.
    pub parse_mrz: bool,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
            parse_mrz: true,
        }
    }
}

/// Where to find vendor SDK credentials. License material is injected at
/// startup from the environment or a file, never embedded in source or in
/// this config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SdkSettings {
    /// Environment variable holding the license key.
    pub license_env: String,
    /// Fallback file containing the license key.
    pub license_path: Option<PathBuf>,
}

impl Default for SdkSettings {
    fn default() -> Self {
        Self {
            license_env: "DOCUSCAN_LICENSE".to_string(),
            license_path: None,
        }
    }
}

impl SdkSettings {
    /// Resolve the license key, environment first, then the file.
    pub fn load_license(&self) -> Option<String> {
        if let Ok(value) = std::env::var(&self.license_env) {
            let value = value.trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
        let path = self.license_path.as_ref()?;
        let content = std::fs::read_to_string(path).ok()?;
        let content = content.trim();
        if content.is_empty() {
            None
        } else {
            Some(content.to_string())
        }
    }
}

/// Load configuration from file.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file.
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Get the configuration directory.
pub fn get_config_dir() -> Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("io", "docuscan", "DocuScan")
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

    let config_dir = proj_dirs.config_dir().to_path_buf();
    std::fs::create_dir_all(&config_dir)?;

    Ok(config_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_app_config() {
        let config = AppConfig::default();

        assert!(config.capture.source_dir.is_none());
        assert_eq!(config.capture.max_fps, 30);
        assert_eq!(config.capture.rotation_degrees, 0);
        assert!(!config.capture.mirrored);

        assert!((config.vision.min_confidence - 0.7).abs() < 0.01);
        assert_eq!(config.vision.top_k, 1);
        assert_eq!(config.vision.throttle_ms, 150);
        assert_eq!(config.vision.empty_frames, EmptyFramePolicy::HoldLast);

        assert_eq!(config.rectify.format, DocumentFormat::Free);
        assert_eq!(config.engine.capture_policy, CapturePolicy::Reject);
        assert_eq!(config.extraction.language, "en-US");
        assert!(config.extraction.parse_mrz);
        assert_eq!(config.sdk.license_env, "DOCUSCAN_LICENSE");
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = AppConfig::default();

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.capture.max_fps, parsed.capture.max_fps);
        assert_eq!(config.vision.throttle_ms, parsed.vision.throttle_ms);
        assert_eq!(config.rectify.format, parsed.rectify.format);
        assert_eq!(config.engine.capture_policy, parsed.engine.capture_policy);
    }

    #[test]
    fn test_config_with_custom_values() {
        let mut config = AppConfig::default();
        config.capture.rotation_degrees = 90;
        config.vision.empty_frames = EmptyFramePolicy::Clear;
        config.rectify.format = DocumentFormat::Id1;
        config.engine.capture_policy = CapturePolicy::Replace;

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed.capture.rotation_degrees, 90);
        assert_eq!(parsed.vision.empty_frames, EmptyFramePolicy::Clear);
        assert_eq!(parsed.rectify.format, DocumentFormat::Id1);
        assert_eq!(parsed.engine.capture_policy, CapturePolicy::Replace);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let parsed: AppConfig = toml::from_str(
            r#"
            [vision]
            throttle_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(parsed.vision.throttle_ms, 250);
        assert_eq!(parsed.capture.max_fps, 30);
    }

    #[test]
    fn test_save_and_load_config() {
        let config = AppConfig::default();

        let temp_file = NamedTempFile::new().unwrap();
        save_config(&config, temp_file.path()).unwrap();
        let loaded = load_config(temp_file.path()).unwrap();

        assert_eq!(config.capture.max_fps, loaded.capture.max_fps);
        assert_eq!(config.vision.throttle_ms, loaded.vision.throttle_ms);
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "this is not valid toml {{{{").unwrap();

        let result = load_config(temp_file.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_orientation_from_settings() {
        let mut settings = CaptureSettings::default();
        settings.rotation_degrees = 90;
        settings.mirrored = true;
        let orientation = settings.orientation();
        assert_eq!(orientation.rotation, Rotation::Deg90);
        assert!(orientation.mirrored);

        // Unsupported angles fall back to no rotation.
        settings.rotation_degrees = 45;
        assert_eq!(settings.orientation().rotation, Rotation::Deg0);
    }

    #[test]
    fn test_license_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "  LICENSE-KEY-123  ").unwrap();

        let settings = SdkSettings {
            // An env var name that is certainly unset.
            license_env: "DOCUSCAN_TEST_LICENSE_UNSET_7F3A".to_string(),
            license_path: Some(temp_file.path().to_path_buf()),
        };
        assert_eq!(settings.load_license().as_deref(), Some("LICENSE-KEY-123"));
    }

    #[test]
    fn test_license_missing_everywhere() {
        let settings = SdkSettings {
            license_env: "DOCUSCAN_TEST_LICENSE_UNSET_9C1B".to_string(),
            license_path: None,
        };
        assert!(settings.load_license().is_none());
    }
}
