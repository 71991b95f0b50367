// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// This module handles loading and parsing configuration from config.toml.
// Provides sensible defaults if config file is missing or has errors.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::backend::RendererSettings;
use crate::scene::{DrawTopology, SceneKind};

/// Frames in flight accepted from the config file
pub const FRAMES_IN_FLIGHT_RANGE: std::ops::RangeInclusive<usize> = 1..=4;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub shaders: ShaderConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Triangle Renderer".to_string(),
            width: 800,
            height: 600,
            fullscreen: false,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
    pub clear_color: [f32; 4],
    pub max_frames_in_flight: usize,
    pub scene: String,
    pub topology: String,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "mailbox".to_string(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            max_frames_in_flight: 2,
            scene: "spin".to_string(),
            topology: "triangle_list".to_string(),
        }
    }
}

/// Shader location and reload behaviour
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    pub directory: PathBuf,
    pub hot_reload: bool,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("shaders"),
            hot_reload: true,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_to_file: bool,
    pub log_file: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: cfg!(debug_assertions),
            log_to_file: false,
            log_file: "renderer.log".to_string(),
            show_fps: true,
        }
    }
}

/// Where the active configuration came from.
///
/// Loading happens before the logger exists, so the outcome is kept here and
/// reported once logging is up.
#[derive(Debug)]
pub enum ConfigSource {
    File(PathBuf),
    Missing(PathBuf),
    /// Unreadable or malformed; defaults are in use
    Invalid(anyhow::Error),
}

impl ConfigSource {
    pub fn report(&self) {
        match self {
            ConfigSource::File(path) => log::info!("Loaded configuration from {:?}", path),
            ConfigSource::Missing(path) => {
                log::info!("Config file not found at {:?}, using defaults", path)
            }
            ConfigSource::Invalid(e) => log::warn!("{:#}. Using defaults.", e),
        }
    }
}

impl Config {
    /// Load config.toml from the working directory, falling back to defaults
    pub fn load() -> (Self, ConfigSource) {
        Self::load_or_default("config.toml")
    }

    /// Never fails; a bad file yields defaults and `ConfigSource::Invalid`
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> (Self, ConfigSource) {
        let path = path.as_ref();
        if !path.exists() {
            return (Config::default(), ConfigSource::Missing(path.to_path_buf()));
        }

        match Self::load_from_path(path) {
            Ok(config) => (config, ConfigSource::File(path.to_path_buf())),
            Err(e) => (Config::default(), ConfigSource::Invalid(e)),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::parse(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Get present mode as Vulkan enum
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => vk::PresentModeKHR::MAILBOX,
            "fifo" => vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to MAILBOX",
                    self.graphics.present_mode
                );
                vk::PresentModeKHR::MAILBOX
            }
        }
    }

    pub fn scene(&self) -> SceneKind {
        match self.graphics.scene.to_lowercase().as_str() {
            "triangle" => SceneKind::Triangle,
            "spin" => SceneKind::Spin,
            _ => {
                log::warn!("Unknown scene '{}', defaulting to spin", self.graphics.scene);
                SceneKind::Spin
            }
        }
    }

    pub fn topology(&self) -> DrawTopology {
        match self.graphics.topology.to_lowercase().as_str() {
            "triangle_list" | "triangles" => DrawTopology::TriangleList,
            "point_list" | "points" => DrawTopology::PointList,
            _ => {
                log::warn!(
                    "Unknown topology '{}', defaulting to triangle_list",
                    self.graphics.topology
                );
                DrawTopology::TriangleList
            }
        }
    }

    /// Frames in flight, clamped into the supported range
    pub fn frames_in_flight(&self) -> usize {
        let requested = self.graphics.max_frames_in_flight;
        let clamped = requested.clamp(*FRAMES_IN_FLIGHT_RANGE.start(), *FRAMES_IN_FLIGHT_RANGE.end());
        if clamped != requested {
            log::warn!("max_frames_in_flight {} out of range, using {}", requested, clamped);
        }
        clamped
    }

    pub fn renderer_settings(&self) -> RendererSettings {
        RendererSettings {
            present_mode: self.present_mode(),
            clear_color: self.graphics.clear_color,
            frames_in_flight: self.frames_in_flight(),
            scene: self.scene(),
            topology: self.topology(),
            shader_dir: self.shaders.directory.clone(),
            hot_reload: self.shaders.hot_reload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.present_mode(), vk::PresentModeKHR::MAILBOX);
        assert_eq!(config.scene(), SceneKind::Spin);
        assert_eq!(config.topology(), DrawTopology::TriangleList);
        assert_eq!(config.frames_in_flight(), 2);
        assert_eq!(config.shaders.directory, PathBuf::from("shaders"));
        assert!(config.shaders.hot_reload);
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config = Config::parse(
            r#"
            [window]
            title = "Hello"

            [graphics]
            present_mode = "FIFO"
            scene = "triangle"
            clear_color = [0.1, 0.2, 0.3, 1.0]
            "#,
        )
        .unwrap();

        assert_eq!(config.window.title, "Hello");
        assert_eq!(config.window.width, 800);
        assert_eq!(config.present_mode(), vk::PresentModeKHR::FIFO);
        assert_eq!(config.scene(), SceneKind::Triangle);
        assert_eq!(config.graphics.clear_color, [0.1, 0.2, 0.3, 1.0]);
        assert_eq!(config.graphics.max_frames_in_flight, 2);
    }

    #[test]
    fn test_unknown_names_fall_back() {
        let config = Config::parse(
            r#"
            [graphics]
            present_mode = "vsync-please"
            scene = "teapot"
            topology = "line_strip"
            "#,
        )
        .unwrap();

        assert_eq!(config.present_mode(), vk::PresentModeKHR::MAILBOX);
        assert_eq!(config.scene(), SceneKind::Spin);
        assert_eq!(config.topology(), DrawTopology::TriangleList);
    }

    #[test]
    fn test_frames_in_flight_clamped() {
        for (requested, expected) in [(0, 1), (1, 1), (3, 3), (4, 4), (16, 4)] {
            let config = Config::parse(&format!("[graphics]\nmax_frames_in_flight = {requested}")).unwrap();
            assert_eq!(config.frames_in_flight(), expected, "requested {requested}");
        }
    }

    #[test]
    fn test_point_topology_and_shader_section() {
        let config = Config::parse(
            r#"
            [graphics]
            topology = "point_list"

            [shaders]
            directory = "assets/spv"
            hot_reload = false
            "#,
        )
        .unwrap();

        let settings = config.renderer_settings();
        assert_eq!(settings.topology, DrawTopology::PointList);
        assert_eq!(settings.shader_dir, PathBuf::from("assets/spv"));
        assert!(!settings.hot_reload);
    }

    #[test]
    fn test_malformed_toml_is_an_error() {
        assert!(Config::parse("[graphics\npresent_mode = ").is_err());
        assert!(Config::parse("[window]\nwidth = \"wide\"").is_err());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = Config::load_from_path("no/such/config.toml").unwrap();
        assert_eq!(config.window.title, "Triangle Renderer");
    }

    #[test]
    fn test_malformed_file_falls_back_and_keeps_error() {
        let path = std::env::temp_dir().join(format!("triangle-renderer-{}-bad.toml", std::process::id()));
        std::fs::write(&path, "[window]\nwidth = \"wide\"").unwrap();

        let (config, source) = Config::load_or_default(&path);
        std::fs::remove_file(&path).ok();

        assert_eq!(config.window.width, 800);
        match source {
            ConfigSource::Invalid(e) => assert!(format!("{:#}", e).contains("Failed to parse config file")),
            other => panic!("expected Invalid, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_file_is_reported_as_missing() {
        let (config, source) = Config::load_or_default("no/such/config.toml");
        assert_eq!(config.window.title, "Triangle Renderer");
        assert!(matches!(source, ConfigSource::Missing(path) if path == PathBuf::from("no/such/config.toml")));
    }
}
