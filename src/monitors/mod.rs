//! Monitoring loops
//!
//! Watches a video source:
//! - `detection`: submits a frame per second to the detection endpoint and raises its alerts
//! - `blackout`: classifies a frame per second as dark or normal and alerts on sustained darkness
//! - `source`: frame sources (camera snapshot URL, local video file)

pub mod blackout;
pub mod detection;
pub mod source;

use async_trait::async_trait;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::RgbaImage;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// Both loops sample once per second.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// JPEG quality for frames sent to the detection endpoint.
pub const JPEG_QUALITY: u8 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SourceKind {
    Camera,
    File,
}

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("source not ready")]
    NotReady,

    #[error("frame capture failed: {0}")]
    Capture(String),

    #[error("frame decode failed: {0}")]
    Decode(#[from] image::ImageError),

    #[error("ffmpeg/ffprobe binary not found: {0}")]
    ToolNotFound(std::io::Error),

    #[error("ffmpeg/ffprobe failed (exit code {exit_code:?}): {stderr}")]
    ToolFailed { exit_code: Option<i32>, stderr: String },

    #[error("video file not found: {0}")]
    VideoNotFound(String),
}

#[derive(Error, Debug, PartialEq)]
pub enum MonitorError {
    #[error("video source unavailable: {0}")]
    SourceUnavailable(String),
}

/// Where frames come from. Read-only: loops sharing a source never contend.
#[async_trait]
pub trait FrameSource: Send + Sync {
    fn kind(&self) -> SourceKind;
    fn describe(&self) -> String;
    /// Is there a handle at all (camera configured, file present)?
    fn is_available(&self) -> bool;
    /// Can a frame be drawn right now?
    fn is_ready(&self) -> bool;
    async fn capture(&self) -> Result<RgbaImage, FrameError>;
}

/// A frame encoded for the detection endpoint as a `data:image/jpeg;base64,` URI.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedFrame {
    data_uri: String,
}

impl EncodedFrame {
    pub fn from_image(frame: &RgbaImage) -> Result<Self, FrameError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(FrameError::Capture("empty frame".to_string()));
        }
        let rgb = image::DynamicImage::ImageRgba8(frame.clone()).to_rgb8();
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY).encode_image(&rgb)?;
        let b64 = base64::engine::general_purpose::STANDARD.encode(&jpeg);
        Ok(Self {
            data_uri: format!("data:image/jpeg;base64,{}", b64),
        })
    }

    pub fn data_uri(&self) -> &str {
        &self.data_uri
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Transient user-facing message (start/stop, per-tick warnings, alert toasts).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

pub type NoticeSender = broadcast::Sender<Notice>;

pub fn notice_channel() -> NoticeSender {
    broadcast::channel(64).0
}

/// Fire-and-forget: having no listener is fine.
pub(crate) fn notify(tx: &NoticeSender, level: NoticeLevel, message: impl Into<String>) {
    let _ = tx.send(Notice {
        level,
        message: message.into(),
    });
}

/// Periodic ticker whose first tick lands one period after start.
/// Late ticks are delayed rather than bunched.
pub(crate) fn ticker(period: Duration) -> Interval {
    let mut t = interval_at(Instant::now() + period, period);
    t.set_missed_tick_behavior(MissedTickBehavior::Delay);
    t
}
