use anyhow::{bail, Context, Result};
use opencv::{
    core::Mat,
    prelude::*,
    videoio::{self, VideoCapture, CAP_ANY},
};

use crate::config::{Config, InputMode};

/// Read timeout passed to backends that support it, so a Stop command is
/// observed within one tick even when the device stalls.
const READ_TIMEOUT_MS: f64 = 1000.0;

/// Capture boundary: sequential frames from a camera or file, with
/// seek-to-start for looping. `read` returns `Ok(None)` at end-of-stream.
pub trait FrameSource: Send {
    fn read(&mut self) -> Result<Option<Mat>>;
    fn rewind(&mut self) -> Result<()>;
    fn resolution(&self) -> (u32, u32);
    /// Release the underlying device/file handle. Also runs on drop; exists
    /// so the controller can tear down on an explicit Stop and surface errors.
    fn close(&mut self) -> Result<()>;
}

/// OpenCV-backed capture for both webcam devices and video files.
pub struct OpenCvSource {
    capture: VideoCapture,
    seekable: bool,
    width: u32,
    height: u32,
}

impl OpenCvSource {
    /// Open a webcam by device index.
    pub fn open_webcam(index: i32) -> Result<Self> {
        let mut capture = VideoCapture::new(index, CAP_ANY)
            .with_context(|| format!("failed to open camera {index}"))?;
        if !capture.is_opened()? {
            bail!("camera {index} is not available");
        }
        // Keep the driver queue shallow so reads track live frames
        capture.set(videoio::CAP_PROP_BUFFERSIZE, 1.0)?;
        Self::finish_open(capture, false)
    }

    /// Open a video file.
    pub fn open_file(path: &str) -> Result<Self> {
        let capture = VideoCapture::from_file(path, CAP_ANY)
            .with_context(|| format!("failed to open video file {path}"))?;
        if !capture.is_opened()? {
            bail!("video file {path} could not be opened (missing or unsupported codec)");
        }
        Self::finish_open(capture, true)
    }

    /// Open whatever source the config selects.
    pub fn open(config: &Config) -> Result<Self> {
        match config.input.mode {
            InputMode::Webcam => Self::open_webcam(config.input.camera_id),
            InputMode::File => {
                let path = config
                    .input
                    .video_file
                    .as_deref()
                    .context("file input selected but no video file configured")?;
                Self::open_file(path)
            }
        }
    }

    fn finish_open(mut capture: VideoCapture, seekable: bool) -> Result<Self> {
        // Not every backend honors this; best effort
        let _ = capture.set(videoio::CAP_PROP_READ_TIMEOUT_MSEC, READ_TIMEOUT_MS);

        let width = capture.get(videoio::CAP_PROP_FRAME_WIDTH)? as u32;
        let height = capture.get(videoio::CAP_PROP_FRAME_HEIGHT)? as u32;
        Ok(Self {
            capture,
            seekable,
            width,
            height,
        })
    }
}

impl FrameSource for OpenCvSource {
    fn read(&mut self) -> Result<Option<Mat>> {
        let mut frame = Mat::default();
        let ok = self
            .capture
            .read(&mut frame)
            .context("frame read failed")?;
        if !ok || frame.empty() {
            return Ok(None);
        }
        Ok(Some(frame))
    }

    fn rewind(&mut self) -> Result<()> {
        if !self.seekable {
            bail!("source does not support seeking");
        }
        self.capture.set(videoio::CAP_PROP_POS_FRAMES, 0.0)?;
        Ok(())
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn close(&mut self) -> Result<()> {
        self.capture.release()?;
        Ok(())
    }
}

/// One probed camera device.
#[derive(Debug, Clone)]
pub struct CameraInfo {
    pub index: i32,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub backend: String,
}

/// Probe device indices 0..max_probe and report the ones that open.
/// Probing stops at the first unavailable index.
pub fn enumerate_cameras(max_probe: i32) -> Vec<CameraInfo> {
    let mut cameras = Vec::new();
    for index in 0..max_probe {
        let mut cap = match VideoCapture::new(index, CAP_ANY) {
            Ok(c) => c,
            Err(_) => break,
        };
        if !cap.is_opened().unwrap_or(false) {
            break;
        }
        cameras.push(CameraInfo {
            index,
            width: cap.get(videoio::CAP_PROP_FRAME_WIDTH).unwrap_or(0.0) as u32,
            height: cap.get(videoio::CAP_PROP_FRAME_HEIGHT).unwrap_or(0.0) as u32,
            fps: cap.get(videoio::CAP_PROP_FPS).unwrap_or(0.0),
            backend: cap.get_backend_name().unwrap_or_default(),
        });
        let _ = cap.release();
    }
    cameras
}
