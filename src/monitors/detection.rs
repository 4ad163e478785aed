//! Detection loop
//!
//! Once per second: capture a frame, encode it, and hand it to a detached task
//! that submits it to the detection endpoint and raises whatever alerts come
//! back. A slow endpoint never delays the next capture.

use super::blackout::{BlackoutWatchdog, WatchdogSettings};
use super::{notify, ticker, EncodedFrame, FrameSource, MonitorError, Notice, NoticeLevel, NoticeSender, SourceKind, TICK_INTERVAL};
use crate::alerts::dispatch::{AlertDispatcher, Channels};
use crate::alerts::rules::{CooldownPolicy, CooldownState};
use crate::alerts::{AlertKind, AlertRecord};
use crate::config::SettingsHandle;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// How many detection alerts `recent_alerts` keeps.
pub const RECENT_ALERTS: usize = 10;

const DETECT_TIMEOUT_SECS: u64 = 30;

/// Per-category indicators returned by the detection endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionResults {
    pub people_count: u32,
    pub helmet_violation: bool,
    pub face_cover_violation: bool,
    pub loitering: bool,
    pub posture_violation: bool,
    pub alerts: Vec<DetectionAlert>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionAlert {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub confidence: f64,
}

#[derive(Debug, Deserialize)]
struct DetectionResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    results: Option<DetectionResults>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectError {
    #[error("detection endpoint unreachable: {0}")]
    Transport(String),

    #[error("detection endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("detection response unreadable: {0}")]
    Parse(String),

    #[error("detection failed: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(&self, frame: &EncodedFrame) -> Result<DetectionResults, DetectError>;
}

/// Posts frames to `<detectionEndpoint>/api/process-video`. The endpoint is
/// read from the live settings on every call.
pub struct HttpDetector {
    client: reqwest::Client,
    settings: SettingsHandle,
}

impl HttpDetector {
    pub fn new(settings: SettingsHandle) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DETECT_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, settings }
    }

    pub fn endpoint_url(&self) -> String {
        process_video_url(&self.settings.snapshot().detection_endpoint)
    }
}

fn process_video_url(base: &str) -> String {
    format!("{}/api/process-video", base.trim_end_matches('/'))
}

fn parse_response(body: &str) -> Result<DetectionResults, DetectError> {
    let response: DetectionResponse =
        serde_json::from_str(body).map_err(|e| DetectError::Parse(e.to_string()))?;
    if !response.success {
        return Err(DetectError::Rejected(
            response.error.unwrap_or_else(|| "endpoint reported failure".to_string()),
        ));
    }
    Ok(response.results.unwrap_or_default())
}

#[async_trait]
impl Detector for HttpDetector {
    async fn detect(&self, frame: &EncodedFrame) -> Result<DetectionResults, DetectError> {
        let url = self.endpoint_url();
        let body = serde_json::json!({ "frame": frame.data_uri() });
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| DetectError::Transport(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| DetectError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(DetectError::Status {
                status: status.as_u16(),
                body: crate::logging::ellipse(&text, 200),
            });
        }
        parse_response(&text)
    }
}

/// A detection alert as shown in the recent-alerts list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentAlert {
    pub kind: String,
    pub message: String,
    pub confidence: f64,
    pub seen_at: DateTime<Utc>,
}

struct Session {
    token: CancellationToken,
    _task: JoinHandle<()>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// State reachable from in-flight frame tasks. Nothing here assumes the
/// session that submitted the frame is still running.
struct LoopShared {
    detector: Arc<dyn Detector>,
    dispatcher: Arc<AlertDispatcher>,
    settings: SettingsHandle,
    policy: CooldownPolicy,
    cooldowns: Mutex<CooldownState>,
    latest: Mutex<Option<DetectionResults>>,
    recent: Mutex<VecDeque<RecentAlert>>,
    notices: NoticeSender,
}

impl LoopShared {
    async fn process(&self, frame: EncodedFrame) {
        match self.detector.detect(&frame).await {
            Ok(results) => self.handle_results(results).await,
            Err(e) => {
                warn!("Detection: {}", e);
                notify(&self.notices, NoticeLevel::Error, "Error processing video frame");
            }
        }
    }

    async fn handle_results(&self, results: DetectionResults) {
        trace!(
            "Detection: people {} helmet {} face_cover {} loitering {} posture {} alerts {}",
            results.people_count,
            results.helmet_violation,
            results.face_cover_violation,
            results.loitering,
            results.posture_violation,
            results.alerts.len()
        );
        let alerts = results.alerts.clone();
        *lock(&self.latest) = Some(results);
        for alert in &alerts {
            self.handle_alert(alert).await;
        }
    }

    async fn handle_alert(&self, alert: &DetectionAlert) {
        {
            let mut recent = lock(&self.recent);
            recent.push_front(RecentAlert {
                kind: alert.kind.clone(),
                message: alert.message.clone(),
                confidence: alert.confidence,
                seen_at: Utc::now(),
            });
            recent.truncate(RECENT_ALERTS);
        }
        notify(&self.notices, NoticeLevel::Error, alert.message.clone());

        let kind = match alert.kind.parse::<AlertKind>() {
            Ok(kind) if kind.is_detection_kind() => kind,
            _ => {
                warn!("Detection: ignoring alert of unknown type {:?}", alert.kind);
                return;
            }
        };
        let Some(record) = AlertRecord::detection(kind, &alert.message, alert.confidence) else {
            return;
        };

        // The cooldown is only consumed when an email would actually go out.
        let email = self.settings.snapshot().email_alerts_enabled
            && match self.policy.window(kind) {
                Some(window) => lock(&self.cooldowns).try_acquire(kind, window, Instant::now()),
                None => false,
            };
        if !email && self.policy.window(kind).is_some() {
            debug!("Detection: {} email suppressed", kind);
        }

        let report = self
            .dispatcher
            .dispatch_with(
                &record,
                Channels {
                    notification: true,
                    email,
                },
            )
            .await;

        if email {
            if report.success {
                notify(&self.notices, NoticeLevel::Success, "Email alert sent to security team");
            } else {
                notify(&self.notices, NoticeLevel::Error, "Failed to send email alert");
            }
        }
    }
}

/// Drives detection for one source, plus the blackout watchdog when the
/// source is a live camera and blackout detection is enabled.
pub struct DetectionLoop {
    shared: Arc<LoopShared>,
    watchdog: Arc<BlackoutWatchdog>,
    session: Arc<Mutex<Option<Session>>>,
}

impl DetectionLoop {
    pub fn new(detector: Arc<dyn Detector>, dispatcher: Arc<AlertDispatcher>, settings: SettingsHandle) -> Self {
        Self::with_policy(detector, dispatcher, settings, CooldownPolicy::default())
    }

    pub fn with_policy(
        detector: Arc<dyn Detector>,
        dispatcher: Arc<AlertDispatcher>,
        settings: SettingsHandle,
        policy: CooldownPolicy,
    ) -> Self {
        let watchdog = Arc::new(BlackoutWatchdog::new(dispatcher.clone(), settings.clone()));
        let shared = Arc::new(LoopShared {
            detector,
            dispatcher,
            settings,
            policy,
            cooldowns: Mutex::new(CooldownState::new()),
            latest: Mutex::new(None),
            recent: Mutex::new(VecDeque::with_capacity(RECENT_ALERTS)),
            notices: super::notice_channel(),
        });
        Self {
            shared,
            watchdog,
            session: Arc::new(Mutex::new(None)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.shared.notices.subscribe()
    }

    pub fn start(&self, source: Arc<dyn FrameSource>) -> Result<(), MonitorError> {
        if !source.is_available() {
            let what = match source.kind() {
                SourceKind::Camera => "No camera available",
                SourceKind::File => "No video file loaded",
            };
            warn!("Detection: cannot start, {} ({})", what.to_lowercase(), source.describe());
            notify(&self.shared.notices, NoticeLevel::Error, what);
            return Err(MonitorError::SourceUnavailable(source.describe()));
        }

        let mut session = lock(&self.session);
        if session.is_some() {
            debug!("Detection: already running");
            return Ok(());
        }

        let token = CancellationToken::new();
        let task = tokio::spawn(run(
            source.clone(),
            self.shared.clone(),
            self.watchdog.clone(),
            self.session.clone(),
            token.clone(),
        ));
        *session = Some(Session { token, _task: task });

        let settings = self.shared.settings.snapshot();
        if source.kind() == SourceKind::Camera && settings.blackout_detection_enabled {
            self.watchdog.start(source.clone(), &settings.camera_id, &settings.location);
        }
        info!("Detection: started on {}", source.describe());
        notify(&self.shared.notices, NoticeLevel::Success, "Detection started");
        Ok(())
    }

    /// Cancel the tick timer and the watchdog. In-flight frame tasks finish on their own.
    pub fn stop(&self) {
        let mut session = lock(&self.session);
        if let Some(s) = session.take() {
            s.token.cancel();
            info!("Detection: stopped");
            notify(&self.shared.notices, NoticeLevel::Success, "Detection stopped");
        }
        self.watchdog.stop();
    }

    pub fn is_running(&self) -> bool {
        lock(&self.session).is_some()
    }

    pub fn watchdog(&self) -> &BlackoutWatchdog {
        &self.watchdog
    }

    pub fn latest_results(&self) -> Option<DetectionResults> {
        lock(&self.shared.latest).clone()
    }

    /// Newest first.
    pub fn recent_alerts(&self) -> Vec<RecentAlert> {
        lock(&self.shared.recent).iter().cloned().collect()
    }

    pub(crate) async fn handle_results(&self, results: DetectionResults) {
        self.shared.handle_results(results).await;
    }
}

impl Drop for DetectionLoop {
    fn drop(&mut self) {
        if let Some(s) = lock(&self.session).take() {
            s.token.cancel();
        }
        self.watchdog.stop();
    }
}

/// Keep the watchdog in line with the blackout toggle for camera sources.
fn reconcile_watchdog(source: &Arc<dyn FrameSource>, watchdog: &BlackoutWatchdog, settings: &SettingsHandle) {
    if source.kind() != SourceKind::Camera {
        return;
    }
    let s = settings.snapshot();
    if s.blackout_detection_enabled && !watchdog.is_running() {
        watchdog.start(source.clone(), &s.camera_id, &s.location);
    } else if !s.blackout_detection_enabled && watchdog.is_running() {
        watchdog.stop();
    }

    let wanted = WatchdogSettings {
        camera_id: s.camera_id.clone(),
        location: s.location.clone(),
        threshold: s.blackout_threshold(),
    };
    if watchdog.watchdog_settings() != wanted {
        watchdog.update_settings(wanted);
    }
}

async fn run(
    source: Arc<dyn FrameSource>,
    shared: Arc<LoopShared>,
    watchdog: Arc<BlackoutWatchdog>,
    session: Arc<Mutex<Option<Session>>>,
    token: CancellationToken,
) {
    let mut tick = ticker(TICK_INTERVAL);
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = tick.tick() => {}
        }

        {
            // Serialized with stop(), so a stopped loop never restarts its watchdog.
            let _guard = lock(&session);
            if token.is_cancelled() {
                break;
            }
            reconcile_watchdog(&source, &watchdog, &shared.settings);
        }

        let frame = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            frame = source.capture() => frame,
        };
        let encoded = match frame.and_then(|f| EncodedFrame::from_image(&f)) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("Detection: frame capture from {} failed: {}", source.describe(), e);
                notify(&shared.notices, NoticeLevel::Warning, format!("Could not capture frame: {}", e));
                continue;
            }
        };

        let shared = shared.clone();
        tokio::spawn(async move {
            shared.process(encoded).await;
        });
    }
    trace!("Detection: tick task for {} exited", source.describe());
}
