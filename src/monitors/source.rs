//! Frame sources.
//!
//! `SnapshotCamera` pulls still images from a camera's HTTP snapshot endpoint.
//! `VideoFileSource` steps through a local video file 100 ms per capture,
//! looping at the end, and rasterizes the frame at the cursor with ffmpeg.

use super::{FrameError, FrameSource, SourceKind};
use async_trait::async_trait;
use image::RgbaImage;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, trace};

/// Playback advance per captured file frame.
pub const FILE_STEP: Duration = Duration::from_millis(100);

/// Snapshot fetch timeout. A hung camera surfaces as a failed capture.
const SNAPSHOT_TIMEOUT_SECS: u64 = 5;

pub struct SnapshotCamera {
    url: String,
    client: reqwest::Client,
    // Set after the first frame arrives; until then the camera is warming up.
    warmed_up: AtomicBool,
}

impl SnapshotCamera {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(SNAPSHOT_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            url: url.into(),
            client,
            warmed_up: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl FrameSource for SnapshotCamera {
    fn kind(&self) -> SourceKind {
        SourceKind::Camera
    }

    fn describe(&self) -> String {
        format!("camera {}", self.url)
    }

    fn is_available(&self) -> bool {
        url::Url::parse(&self.url).is_ok()
    }

    fn is_ready(&self) -> bool {
        self.warmed_up.load(Ordering::Relaxed)
    }

    async fn capture(&self) -> Result<RgbaImage, FrameError> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| FrameError::Capture(format!("snapshot request failed: {}", e)))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FrameError::Capture(format!("snapshot HTTP {}", status.as_u16())));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| FrameError::Capture(format!("snapshot body: {}", e)))?;
        let frame = image::load_from_memory(&bytes)?.to_rgba8();
        if !self.warmed_up.swap(true, Ordering::Relaxed) {
            debug!("Source: camera {} produced its first frame", self.url);
        }
        Ok(frame)
    }
}

/// Playback position over a file of known length.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackCursor {
    position: Duration,
    duration: Duration,
    step: Duration,
}

impl PlaybackCursor {
    pub fn new(duration: Duration, step: Duration) -> Self {
        Self {
            position: Duration::ZERO,
            duration,
            step,
        }
    }

    /// Step forward (clamped to the end); once at the end, wrap to the start.
    pub fn advance(&mut self) -> Duration {
        if self.position < self.duration {
            self.position = (self.position + self.step).min(self.duration);
        } else {
            self.position = Duration::ZERO;
        }
        self.position
    }

    pub fn position(&self) -> Duration {
        self.position
    }
}

pub struct VideoFileSource {
    path: PathBuf,
    duration: Duration,
    cursor: Mutex<PlaybackCursor>,
}

impl VideoFileSource {
    pub fn new(path: impl Into<PathBuf>, duration: Duration) -> Self {
        Self {
            path: path.into(),
            duration,
            cursor: Mutex::new(PlaybackCursor::new(duration, FILE_STEP)),
        }
    }

    /// Probe the file's duration with ffprobe.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, FrameError> {
        let path = path.into();
        let duration = probe_duration(&path).await?;
        debug!("Source: {:?} runs {:.2}s", path, duration.as_secs_f64());
        Ok(Self::new(path, duration))
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    fn next_position(&self) -> Duration {
        match self.cursor.lock() {
            Ok(mut c) => c.advance(),
            Err(poisoned) => poisoned.into_inner().advance(),
        }
    }
}

#[async_trait]
impl FrameSource for VideoFileSource {
    fn kind(&self) -> SourceKind {
        SourceKind::File
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }

    fn is_available(&self) -> bool {
        self.path.is_file()
    }

    fn is_ready(&self) -> bool {
        self.duration > Duration::ZERO
    }

    async fn capture(&self) -> Result<RgbaImage, FrameError> {
        if !self.is_ready() {
            return Err(FrameError::NotReady);
        }
        let position = self.next_position();
        // ffmpeg yields nothing when seeking exactly to the end; back off slightly.
        let seek = position.min(self.duration.saturating_sub(Duration::from_millis(50)));
        trace!("Source: {:?} frame at {:.3}s", self.path, seek.as_secs_f64());
        extract_frame_png(&self.path, seek).await
    }
}

async fn probe_duration(path: &Path) -> Result<Duration, FrameError> {
    if !path.is_file() {
        return Err(FrameError::VideoNotFound(path.to_string_lossy().to_string()));
    }
    let output = tokio::process::Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .output()
        .await
        .map_err(FrameError::ToolNotFound)?;

    if !output.status.success() {
        return Err(FrameError::ToolFailed {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }
    parse_probe_duration(&String::from_utf8_lossy(&output.stdout))
}

fn parse_probe_duration(stdout: &str) -> Result<Duration, FrameError> {
    let secs: f64 = stdout
        .trim()
        .parse()
        .map_err(|_| FrameError::Capture(format!("unparsable duration from ffprobe: {:?}", stdout.trim())))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(FrameError::Capture(format!("invalid duration {}", secs)));
    }
    Ok(Duration::from_secs_f64(secs))
}

async fn extract_frame_png(path: &Path, at: Duration) -> Result<RgbaImage, FrameError> {
    let seek = format!("{:.3}", at.as_secs_f64());
    let output = tokio::process::Command::new("ffmpeg")
        .args(["-v", "error", "-ss", seek.as_str(), "-i"])
        .arg(path)
        .args(["-frames:v", "1", "-f", "image2pipe", "-vcodec", "png", "-"])
        .output()
        .await
        .map_err(FrameError::ToolNotFound)?;

    if !output.status.success() {
        return Err(FrameError::ToolFailed {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }
    if output.stdout.is_empty() {
        return Err(FrameError::Capture(format!(
            "no frame at {:.3}s",
            at.as_secs_f64()
        )));
    }
    Ok(image::load_from_memory_with_format(&output.stdout, image::ImageFormat::Png)?.to_rgba8())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_steps_clamps_and_loops() {
        let mut c = PlaybackCursor::new(Duration::from_millis(250), FILE_STEP);
        assert_eq!(c.advance(), Duration::from_millis(100));
        assert_eq!(c.advance(), Duration::from_millis(200));
        assert_eq!(c.advance(), Duration::from_millis(250));
        assert_eq!(c.advance(), Duration::ZERO);
        assert_eq!(c.advance(), Duration::from_millis(100));
    }

    #[test]
    fn probe_output_parsing() {
        assert_eq!(parse_probe_duration("12.500000\n").unwrap(), Duration::from_millis(12_500));
        assert!(parse_probe_duration("N/A").is_err());
        assert!(parse_probe_duration("-1").is_err());
    }

    #[test]
    fn missing_file_is_unavailable() {
        let src = VideoFileSource::new("/definitely/not/here.mp4", Duration::from_secs(3));
        assert!(!src.is_available());
        assert!(src.is_ready());
        assert_eq!(src.kind(), SourceKind::File);
    }

    #[tokio::test]
    async fn open_missing_file_fails_fast() {
        let err = VideoFileSource::open("/definitely/not/here.mp4").await.err().unwrap();
        assert!(matches!(err, FrameError::VideoNotFound(_)));
    }

    #[test]
    fn camera_needs_a_valid_url_and_warms_up() {
        let cam = SnapshotCamera::new("http://10.0.0.5/snapshot.jpg");
        assert!(cam.is_available());
        assert!(!cam.is_ready());
        assert!(!SnapshotCamera::new("not a url").is_available());
    }
}
