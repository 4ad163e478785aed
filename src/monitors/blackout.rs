//! Camera blackout watchdog
//!
//! Samples the live source once per second and classifies each frame by
//! pixel brightness. A run of dark frames lasting at least the configured
//! threshold raises one camera-blackout alert, after which the streak starts
//! over. A single normal frame clears the streak.

use super::{ticker, FrameSource, TICK_INTERVAL};
use crate::alerts::dispatch::{AlertDispatcher, Channels};
use crate::alerts::AlertRecord;
use crate::config::SettingsHandle;
use chrono::{DateTime, Utc};
use image::RgbaImage;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Bytes between sampled pixels in an RGBA buffer (every 4th pixel).
pub const SAMPLE_STRIDE: usize = 16;
/// A sampled pixel whose mean channel value is below this is dark.
pub const DARK_LEVEL: f64 = 30.0;
/// A sampled pixel whose mean channel value is above this is bright.
pub const BRIGHT_LEVEL: f64 = 200.0;
pub const DARK_RATIO_MIN: f64 = 0.8;
pub const BRIGHT_RATIO_MAX: f64 = 0.05;

/// Brightness buckets of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FrameStats {
    pub sampled: usize,
    pub dark_ratio: f64,
    pub bright_ratio: f64,
}

impl FrameStats {
    pub fn is_blackout(&self) -> bool {
        is_blackout(self.dark_ratio, self.bright_ratio)
    }
}

pub fn is_blackout(dark_ratio: f64, bright_ratio: f64) -> bool {
    dark_ratio > DARK_RATIO_MIN && bright_ratio < BRIGHT_RATIO_MAX
}

/// Bucket every 4th pixel of an RGBA8 buffer. `None` when nothing could be sampled.
pub fn analyze_rgba(buf: &[u8]) -> Option<FrameStats> {
    let mut sampled = 0usize;
    let mut dark = 0usize;
    let mut bright = 0usize;
    for px in buf.chunks_exact(4).step_by(SAMPLE_STRIDE / 4) {
        let mean = (px[0] as f64 + px[1] as f64 + px[2] as f64) / 3.0;
        if mean < DARK_LEVEL {
            dark += 1;
        } else if mean > BRIGHT_LEVEL {
            bright += 1;
        }
        sampled += 1;
    }
    if sampled == 0 {
        return None;
    }
    Some(FrameStats {
        sampled,
        dark_ratio: dark as f64 / sampled as f64,
        bright_ratio: bright as f64 / sampled as f64,
    })
}

/// A frame that cannot be analyzed counts as dark.
pub fn classify_frame(frame: &RgbaImage) -> bool {
    match analyze_rgba(frame.as_raw()) {
        Some(stats) => {
            trace!(
                "Blackout: dark {:.2} bright {:.2} over {} samples",
                stats.dark_ratio,
                stats.bright_ratio,
                stats.sampled
            );
            stats.is_blackout()
        }
        None => true,
    }
}

#[derive(Debug, Clone, Copy)]
struct Streak {
    started: Instant,
    started_at: DateTime<Utc>,
}

/// Two-state machine: clear, or a dark streak with its start time.
#[derive(Debug, Clone)]
pub struct BlackoutTracker {
    threshold: Duration,
    streak: Option<Streak>,
}

impl BlackoutTracker {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            streak: None,
        }
    }

    /// Feed one sample. Returns the streak length when it reaches the
    /// threshold; the tracker is clear again afterwards.
    pub fn observe(&mut self, blackout: bool, now: Instant) -> Option<Duration> {
        if !blackout {
            if self.streak.take().is_some() {
                debug!("Blackout: normal frame, streak cleared");
            }
            return None;
        }
        match self.streak {
            None => {
                self.streak = Some(Streak {
                    started: now,
                    started_at: Utc::now(),
                });
                None
            }
            Some(s) => {
                let elapsed = now.saturating_duration_since(s.started);
                if elapsed >= self.threshold {
                    self.streak = None;
                    Some(elapsed)
                } else {
                    None
                }
            }
        }
    }

    pub fn reset(&mut self) {
        self.streak = None;
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    pub fn set_threshold(&mut self, threshold: Duration) {
        self.threshold = threshold;
    }

    pub fn streak_started_at(&self) -> Option<DateTime<Utc>> {
        self.streak.map(|s| s.started_at)
    }

    pub fn streak_length(&self, now: Instant) -> Option<Duration> {
        self.streak.map(|s| now.saturating_duration_since(s.started))
    }
}

/// Camera identity and threshold a watchdog reports in its alerts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WatchdogSettings {
    pub camera_id: String,
    pub location: String,
    pub threshold: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WatchdogStatus {
    pub running: bool,
    pub blackout_started_at: Option<DateTime<Utc>>,
    pub streak_secs: Option<f64>,
    pub camera_id: String,
    pub location: String,
    pub threshold_secs: f64,
}

struct Session {
    token: CancellationToken,
    _task: JoinHandle<()>,
}

struct WatchdogState {
    session: Option<Session>,
    tracker: BlackoutTracker,
    camera_id: String,
    location: String,
}

fn lock(state: &Mutex<WatchdogState>) -> MutexGuard<'_, WatchdogState> {
    match state.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// One watchdog per monitored camera. Dropping it stops the session.
pub struct BlackoutWatchdog {
    dispatcher: Arc<AlertDispatcher>,
    settings: SettingsHandle,
    state: Arc<Mutex<WatchdogState>>,
}

impl BlackoutWatchdog {
    pub fn new(dispatcher: Arc<AlertDispatcher>, settings: SettingsHandle) -> Self {
        let s = settings.snapshot();
        let state = WatchdogState {
            session: None,
            tracker: BlackoutTracker::new(s.blackout_threshold()),
            camera_id: s.camera_id,
            location: s.location,
        };
        Self {
            dispatcher,
            settings,
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Begin sampling `source`. Returns false (and changes nothing) when already running.
    pub fn start(&self, source: Arc<dyn FrameSource>, camera_id: &str, location: &str) -> bool {
        let mut st = lock(&self.state);
        if st.session.is_some() {
            debug!("Blackout: watchdog already running for {}", st.camera_id);
            return false;
        }
        st.camera_id = camera_id.to_string();
        st.location = location.to_string();
        st.tracker.reset();

        let token = CancellationToken::new();
        let task = tokio::spawn(run(
            source,
            self.state.clone(),
            self.dispatcher.clone(),
            self.settings.clone(),
            token.clone(),
        ));
        st.session = Some(Session { token, _task: task });
        info!(
            "Blackout: watching camera {} at {} (threshold {}s)",
            st.camera_id,
            st.location,
            st.tracker.threshold().as_secs_f64()
        );
        true
    }

    /// Cancel the session and clear the streak. Safe to call repeatedly.
    pub fn stop(&self) {
        let mut st = lock(&self.state);
        st.tracker.reset();
        if let Some(session) = st.session.take() {
            session.token.cancel();
            info!("Blackout: stopped watching camera {}", st.camera_id);
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).session.is_some()
    }

    pub fn status(&self) -> WatchdogStatus {
        let st = lock(&self.state);
        WatchdogStatus {
            running: st.session.is_some(),
            blackout_started_at: st.tracker.streak_started_at(),
            streak_secs: st.tracker.streak_length(Instant::now()).map(|d| d.as_secs_f64()),
            camera_id: st.camera_id.clone(),
            location: st.location.clone(),
            threshold_secs: st.tracker.threshold().as_secs_f64(),
        }
    }

    pub fn watchdog_settings(&self) -> WatchdogSettings {
        let st = lock(&self.state);
        WatchdogSettings {
            camera_id: st.camera_id.clone(),
            location: st.location.clone(),
            threshold: st.tracker.threshold(),
        }
    }

    /// Applies from the next sample; a streak in progress keeps its start time.
    pub fn update_settings(&self, settings: WatchdogSettings) {
        let mut st = lock(&self.state);
        st.camera_id = settings.camera_id;
        st.location = settings.location;
        st.tracker.set_threshold(settings.threshold);
        debug!(
            "Blackout: settings now camera {} at {} (threshold {}s)",
            st.camera_id,
            st.location,
            settings.threshold.as_secs_f64()
        );
    }
}

impl Drop for BlackoutWatchdog {
    fn drop(&mut self) {
        if let Some(session) = lock(&self.state).session.take() {
            session.token.cancel();
        }
    }
}

async fn run(
    source: Arc<dyn FrameSource>,
    state: Arc<Mutex<WatchdogState>>,
    dispatcher: Arc<AlertDispatcher>,
    settings: SettingsHandle,
    token: CancellationToken,
) {
    let mut tick = ticker(TICK_INTERVAL);
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = tick.tick() => {}
        }

        if !source.is_ready() {
            trace!("Blackout: {} not ready, skipping sample", source.describe());
            continue;
        }

        let frame = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            frame = source.capture() => frame,
        };
        let blackout = match frame {
            Ok(frame) => classify_frame(&frame),
            Err(e) => {
                debug!("Blackout: could not sample {}, counting as dark: {}", source.describe(), e);
                true
            }
        };

        let fired = {
            let mut st = lock(&state);
            // stop() may have raced the capture; a cancelled session records nothing.
            if token.is_cancelled() {
                break;
            }
            st.tracker
                .observe(blackout, Instant::now())
                .map(|duration| (duration, st.camera_id.clone(), st.location.clone()))
        };

        if let Some((duration, camera_id, location)) = fired {
            warn!(
                "Blackout: camera {} at {} dark for {:.1}s",
                camera_id,
                location,
                duration.as_secs_f64()
            );
            let record = AlertRecord::camera_blackout(&camera_id, &location, duration);
            let channels = Channels {
                notification: true,
                email: settings.snapshot().email_alerts_enabled,
            };
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher.dispatch_with(&record, channels).await;
            });
        }
    }
    trace!("Blackout: sampling task for {} exited", source.describe());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{AlertDetails, AlertKind};
    use crate::monitors::SourceKind;
    use crate::testing::{solid_frame, Harness, StaticSource};

    /// RGBA buffer of `n` pixels, the first `dark` black, the next `bright` white, rest mid-grey.
    fn buffer(n: usize, dark: usize, bright: usize) -> Vec<u8> {
        let mut buf = Vec::with_capacity(n * 4);
        for i in 0..n {
            let v = if i < dark {
                0
            } else if i < dark + bright {
                255
            } else {
                128
            };
            buf.extend_from_slice(&[v, v, v, 255]);
        }
        buf
    }

    /// Buffer whose sampled pixels (every 4th) have the given dark/bright counts out of 100.
    fn sampled_buffer(dark: usize, bright: usize) -> Vec<u8> {
        let mut buf = Vec::new();
        for i in 0..100 {
            let v: u8 = if i < dark {
                10
            } else if i < dark + bright {
                240
            } else {
                120
            };
            buf.extend_from_slice(&[v, v, v, 255]);
            // three unsampled pixels, deliberately the opposite brightness
            for _ in 0..3 {
                buf.extend_from_slice(&[255 - v, 255 - v, 255 - v, 255]);
            }
        }
        buf
    }

    #[test]
    fn classification_thresholds() {
        let stats = analyze_rgba(&sampled_buffer(90, 1)).unwrap();
        assert_eq!(stats.sampled, 100);
        assert!((stats.dark_ratio - 0.9).abs() < 1e-9);
        assert!((stats.bright_ratio - 0.01).abs() < 1e-9);
        assert!(stats.is_blackout());

        let stats = analyze_rgba(&sampled_buffer(50, 30)).unwrap();
        assert!(!stats.is_blackout());

        assert!(is_blackout(0.9, 0.01));
        assert!(!is_blackout(0.5, 0.3));
        assert!(!is_blackout(0.8, 0.0));
        assert!(!is_blackout(0.95, 0.05));
    }

    #[test]
    fn only_every_fourth_pixel_counts() {
        // 8 pixels: sampled are 0 and 4
        let stats = analyze_rgba(&buffer(8, 1, 0)).unwrap();
        assert_eq!(stats.sampled, 2);
        assert!((stats.dark_ratio - 0.5).abs() < 1e-9);
    }

    #[test]
    fn unreadable_frames_count_as_dark() {
        assert!(analyze_rgba(&[]).is_none());
        assert!(classify_frame(&RgbaImage::new(0, 0)));
        assert!(classify_frame(&solid_frame(8, 8, 5)));
        assert!(!classify_frame(&solid_frame(8, 8, 128)));
    }

    fn feed(tracker: &mut BlackoutTracker, t0: Instant, seconds: std::ops::Range<u64>, blackout: bool) -> Vec<Duration> {
        seconds
            .filter_map(|s| tracker.observe(blackout, t0 + Duration::from_secs(s)))
            .collect()
    }

    #[test]
    fn twenty_nine_dark_samples_do_not_fire() {
        let t0 = Instant::now();
        let mut tracker = BlackoutTracker::new(Duration::from_secs(30));
        assert!(feed(&mut tracker, t0, 0..29, true).is_empty());
        assert!(tracker.streak_started_at().is_some());
    }

    #[test]
    fn thirty_one_dark_samples_fire_once_then_restart() {
        let t0 = Instant::now();
        let mut tracker = BlackoutTracker::new(Duration::from_secs(30));
        let fired = feed(&mut tracker, t0, 0..31, true);
        assert_eq!(fired, vec![Duration::from_secs(30)]);
        assert!(tracker.streak_started_at().is_none());

        // A fresh streak needs another full threshold.
        assert!(feed(&mut tracker, t0, 31..61, true).is_empty());
        assert_eq!(feed(&mut tracker, t0, 61..62, true), vec![Duration::from_secs(30)]);
    }

    #[test]
    fn one_normal_sample_resets_the_streak() {
        let t0 = Instant::now();
        let mut tracker = BlackoutTracker::new(Duration::from_secs(30));
        assert!(feed(&mut tracker, t0, 0..15, true).is_empty());
        assert!(feed(&mut tracker, t0, 15..16, false).is_empty());
        assert!(tracker.streak_started_at().is_none());
        assert!(feed(&mut tracker, t0, 16..36, true).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sustained_blackout_raises_one_alert() {
        let h = Harness::new();
        let watchdog = BlackoutWatchdog::new(h.dispatcher.clone(), h.settings.clone());
        let source = Arc::new(StaticSource::new(SourceKind::Camera, solid_frame(16, 16, 0)));
        assert!(watchdog.start(source.clone(), "CAM_1", "Lobby"));

        tokio::time::sleep(Duration::from_millis(31_500)).await;
        let alerts = h.dispatcher.log().by_kind(AlertKind::CameraBlackout);
        assert_eq!(alerts.len(), 1);
        match alerts[0].details() {
            AlertDetails::CameraBlackout {
                camera_id,
                location,
                duration_secs,
            } => {
                assert_eq!(camera_id, "CAM_1");
                assert_eq!(location, "Lobby");
                assert!(*duration_secs >= 30.0);
            }
            other => panic!("unexpected details {:?}", other),
        }
        assert_eq!(h.notifier.shown()[0].0, "Camera Blackout Alert");
        assert_eq!(h.email.sent().len(), 1);
        watchdog.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn email_toggle_gates_blackout_email_only() {
        let h = Harness::new();
        h.settings.update(|s| s.email_alerts_enabled = false);
        let watchdog = BlackoutWatchdog::new(h.dispatcher.clone(), h.settings.clone());
        let source = Arc::new(StaticSource::new(SourceKind::Camera, solid_frame(16, 16, 0)));
        watchdog.start(source, "CAM_1", "Lobby");

        tokio::time::sleep(Duration::from_millis(31_500)).await;
        assert_eq!(h.dispatcher.log().len(), 1);
        assert_eq!(h.notifier.shown().len(), 1);
        assert!(h.email.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn capture_failures_count_toward_the_streak() {
        let h = Harness::new();
        let watchdog = BlackoutWatchdog::new(h.dispatcher.clone(), h.settings.clone());
        let source = Arc::new(StaticSource::new(SourceKind::Camera, solid_frame(16, 16, 200)));
        source.set_failing(true);
        watchdog.start(source, "CAM_1", "Lobby");

        tokio::time::sleep(Duration::from_millis(31_500)).await;
        assert_eq!(h.dispatcher.log().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn not_ready_source_is_skipped() {
        let h = Harness::new();
        let watchdog = BlackoutWatchdog::new(h.dispatcher.clone(), h.settings.clone());
        let source = Arc::new(StaticSource::new(SourceKind::Camera, solid_frame(16, 16, 0)));
        source.set_ready(false);
        watchdog.start(source.clone(), "CAM_1", "Lobby");

        tokio::time::sleep(Duration::from_secs(45)).await;
        assert_eq!(source.captures(), 0);
        assert!(h.dispatcher.log().is_empty());
        assert!(watchdog.status().blackout_started_at.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent_and_stop_clears_state() {
        let h = Harness::new();
        let watchdog = BlackoutWatchdog::new(h.dispatcher.clone(), h.settings.clone());
        let source = Arc::new(StaticSource::new(SourceKind::Camera, solid_frame(16, 16, 0)));
        assert!(watchdog.start(source.clone(), "CAM_1", "Lobby"));

        tokio::time::sleep(Duration::from_millis(10_500)).await;
        let before = watchdog.status();
        assert!(before.running);
        assert!(before.blackout_started_at.is_some());

        assert!(!watchdog.start(source.clone(), "CAM_2", "Elsewhere"));
        let after = watchdog.status();
        assert_eq!(after.camera_id, "CAM_1");
        assert_eq!(after.blackout_started_at, before.blackout_started_at);

        watchdog.stop();
        let stopped = watchdog.status();
        assert!(!stopped.running);
        assert!(stopped.blackout_started_at.is_none());
        watchdog.stop();
        assert!(!watchdog.is_running());

        let captured = source.captures();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(source.captures(), captured);
        assert!(h.dispatcher.log().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn update_settings_applies_to_next_alert() {
        let h = Harness::new();
        let watchdog = BlackoutWatchdog::new(h.dispatcher.clone(), h.settings.clone());
        let source = Arc::new(StaticSource::new(SourceKind::Camera, solid_frame(16, 16, 0)));
        watchdog.start(source, "CAM_1", "Lobby");
        watchdog.update_settings(WatchdogSettings {
            camera_id: "CAM_9".into(),
            location: "Vestibule".into(),
            threshold: Duration::from_secs(5),
        });
        assert_eq!(watchdog.status().threshold_secs, 5.0);

        tokio::time::sleep(Duration::from_millis(6_500)).await;
        let alerts = h.dispatcher.log().all();
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].message().contains("CAM_9"));
    }
}
