pub mod capture;
pub mod error;
pub mod inspect;
pub mod render;

use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use capture::{Format, StreamKind};
use render::{FilterMode, StreamRequest, ThreadingMode};

pub use error::{Error, Result};

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// Prefix of environment variables overriding the config file
pub const ENV_PREFIX: &str = "STREAMTEX";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub renderer: RendererConfig,
    pub display: DisplayConfig,
}

/// Synthetic capture source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub device_name: String,
    pub fps: u32,
    pub streams: Vec<StreamConfig>,
    /// Switch every stream to `alternate_size` after this many frames
    pub resize_after: Option<u64>,
    pub alternate_size: (u32, u32),
    /// Emit one motion sample every N frames, 0 disables
    pub motion_every: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub stream: StreamKind,
    pub format: Format,
    #[serde(default)]
    pub index: u32,
    pub width: u32,
    pub height: u32,
    /// Extra bytes at the end of every row
    #[serde(default)]
    pub row_padding: u32,
}

/// What one renderer displays and how
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub stream: StreamKind,
    pub format: Format,
    /// 0 accepts any index
    pub index: u32,
    /// 0 lets the first frame decide
    pub width: u32,
    pub height: u32,
    pub filter: FilterMode,
    pub threading: ThreadingMode,
}

impl RendererConfig {
    pub fn request(&self) -> StreamRequest {
        StreamRequest::new(self.stream, self.format, self.index).with_size(self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageBackendKind {
    Memory,
    Wgpu,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub backend: ImageBackendKind,
    pub tick_hz: u32,
    /// 0 runs until interrupted
    pub run_seconds: u64,
    pub stats_interval_secs: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_name: "Synthetic D400".into(),
            fps: 30,
            streams: vec![
                StreamConfig {
                    stream: StreamKind::Depth,
                    format: Format::Z16,
                    index: 0,
                    width: 640,
                    height: 480,
                    row_padding: 0,
                },
                StreamConfig {
                    stream: StreamKind::Color,
                    format: Format::Rgb8,
                    index: 0,
                    width: 640,
                    height: 480,
                    row_padding: 0,
                },
            ],
            resize_after: Some(150),
            alternate_size: (1280, 720),
            motion_every: 10,
        }
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            stream: StreamKind::Depth,
            format: Format::Z16,
            index: 0,
            width: 0,
            height: 0,
            filter: FilterMode::Nearest,
            threading: ThreadingMode::Worker,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            backend: if cfg!(feature = "gpu-display") {
                ImageBackendKind::Wgpu
            } else {
                ImageBackendKind::Memory
            },
            tick_hz: 60,
            run_seconds: 0,
            stats_interval_secs: 2,
        }
    }
}

impl Config {
    /// Defaults, overlaid by an optional TOML file, overlaid by
    /// `STREAMTEX__SECTION__KEY` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Make this the configuration returned by [`Config::current`]
    pub fn install(self) {
        CONFIG.store(Arc::new(self));
    }

    pub fn current() -> Arc<Self> {
        CONFIG.load_full()
    }

    pub fn from_toml(source: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.capture.streams.len(), 2);
        assert_eq!(config.renderer.threading, ThreadingMode::Worker);
        assert_eq!(config.display.tick_hz, 60);
    }

    #[test]
    fn renderer_section_overrides() {
        let config = Config::from_toml(
            r#"
            [renderer]
            stream = "Color"
            format = "Rgba8"
            index = 2
            width = 1280
            height = 720
            filter = "linear"
            threading = "direct"
            "#,
        )
        .unwrap();

        let request = config.renderer.request();
        assert_eq!(request.stream, StreamKind::Color);
        assert_eq!(request.format, Format::Rgba8);
        assert_eq!(request.index, 2);
        assert_eq!((request.width, request.height), (1280, 720));
        assert_eq!(config.renderer.filter, FilterMode::Linear);
        assert_eq!(config.renderer.threading, ThreadingMode::Direct);
    }

    #[test]
    fn installed_config_is_current() {
        let mut config = Config::default();
        config.display.tick_hz = 24;
        config.install();
        assert_eq!(Config::current().display.tick_hz, 24);
        assert_eq!(CONFIG.load().display.tick_hz, 24);
    }

    #[test]
    fn unknown_format_is_a_config_error() {
        let err = Config::from_toml("[renderer]\nformat = \"Nv12\"").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
