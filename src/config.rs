use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::Path;

use crate::pose::ModelKind;

/// Video input selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    Webcam,
    File,
}

impl InputMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "webcam" => Some(Self::Webcam),
            "file" => Some(Self::File),
            _ => None,
        }
    }
}

impl fmt::Display for InputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Webcam => write!(f, "webcam"),
            Self::File => write!(f, "file"),
        }
    }
}

/// Telemetry wire encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendMode {
    Bundle,
    Legacy,
}

impl SendMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bundle" => Some(Self::Bundle),
            "legacy" => Some(Self::Legacy),
            _ => None,
        }
    }
}

impl fmt::Display for SendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bundle => write!(f, "bundle"),
            Self::Legacy => write!(f, "legacy"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub video: VideoConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub app: AppConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InputConfig {
    #[serde(default = "default_input_mode")]
    pub mode: InputMode,
    /// OpenCV device index for webcam mode.
    #[serde(default)]
    pub camera_id: i32,
    /// Path to the video file for file mode.
    #[serde(default)]
    pub video_file: Option<String>,
    /// Seek back to the first frame when a file reaches end-of-stream.
    #[serde(default)]
    pub loop_video: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    #[serde(default = "default_model")]
    pub model: ModelKind,
    /// Directory holding the ONNX model files.
    #[serde(default = "default_models_dir")]
    pub models_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_osc_ip")]
    pub osc_ip: String,
    #[serde(default = "default_osc_port")]
    pub osc_port: u16,
    #[serde(default = "default_send_mode")]
    pub send_mode: SendMode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VideoConfig {
    #[serde(default = "default_stream_name")]
    pub stream_name: String,
    /// Address the JPEG stream publisher listens on for subscribers.
    #[serde(default = "default_video_bind")]
    pub bind_addr: String,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: i32,
    /// Draw the skeleton overlay onto the published frames.
    #[serde(default = "default_true")]
    pub draw_overlay: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControlConfig {
    /// UDP port for inbound /posecam/... control messages.
    #[serde(default = "default_control_port")]
    pub listen_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Upper bound on loop iterations per second. Must be positive.
    #[serde(default = "default_fps_limit")]
    pub fps_limit: u32,
    /// Where the landmark_map.csv side-channel file is written.
    #[serde(default = "default_mapping_file")]
    pub mapping_file: String,
}

fn default_input_mode() -> InputMode { InputMode::Webcam }
fn default_model() -> ModelKind { ModelKind::MoveNet }
fn default_models_dir() -> String { "models".to_string() }
fn default_osc_ip() -> String { "127.0.0.1".to_string() }
fn default_osc_port() -> u16 { 5005 }
fn default_send_mode() -> SendMode { SendMode::Bundle }
fn default_stream_name() -> String { "posecam".to_string() }
fn default_video_bind() -> String { "0.0.0.0:5961".to_string() }
fn default_jpeg_quality() -> i32 { 80 }
fn default_true() -> bool { true }
fn default_control_port() -> u16 { 9000 }
fn default_fps_limit() -> u32 { 30 }
fn default_mapping_file() -> String { "landmark_map.csv".to_string() }

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            mode: default_input_mode(),
            camera_id: 0,
            video_file: None,
            loop_video: false,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            models_dir: default_models_dir(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            osc_ip: default_osc_ip(),
            osc_port: default_osc_port(),
            send_mode: default_send_mode(),
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            stream_name: default_stream_name(),
            bind_addr: default_video_bind(),
            jpeg_quality: default_jpeg_quality(),
            draw_overlay: default_true(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            listen_port: default_control_port(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            fps_limit: default_fps_limit(),
            mapping_file: default_mapping_file(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input: InputConfig::default(),
            detector: DetectorConfig::default(),
            telemetry: TelemetryConfig::default(),
            video: VideoConfig::default(),
            control: ControlConfig::default(),
            app: AppConfig::default(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read {}", path.as_ref().display()))?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the config file, falling back to defaults when it does not exist.
    /// A file that exists but fails to parse or validate is still an error.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            log::info!("[config] {} not found, using defaults", path.as_ref().display());
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.app.fps_limit == 0 {
            bail!("app.fps_limit must be positive");
        }
        if !(1..=100).contains(&self.video.jpeg_quality) {
            bail!("video.jpeg_quality must be in 1..=100");
        }
        Ok(())
    }

    /// Telemetry destination as a socket address string.
    pub fn osc_target(&self) -> String {
        format!("{}:{}", self.telemetry.osc_ip, self.telemetry.osc_port)
    }

    /// Loop tick budget derived from fps_limit.
    pub fn tick(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / self.app.fps_limit as f64)
    }
}
