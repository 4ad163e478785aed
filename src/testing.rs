//! In-process fakes for the alert channels, the detector and frame sources.

use crate::alerts::channels::{EmailError, EmailParams, EmailReceipt, EmailSender, Notifier, Permission};
use crate::alerts::dispatch::AlertDispatcher;
use crate::alerts::log::AlertLog;
use crate::alerts::store::{KeyValueStore, MemoryStore, StoreError};
use crate::config::{EmailConfig, MonitorSettings, SettingsHandle};
use crate::monitors::detection::{DetectError, DetectionResults, Detector};
use crate::monitors::{EncodedFrame, FrameError, FrameSource, SourceKind};
use async_trait::async_trait;
use image::RgbaImage;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn solid_frame(width: u32, height: u32, level: u8) -> RgbaImage {
    RgbaImage::from_pixel(width, height, image::Rgba([level, level, level, 255]))
}

/// Every write fails; reads find nothing.
pub struct FailingStore;

impl KeyValueStore for FailingStore {
    fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Ok(None)
    }

    fn set(&self, key: &str, _value: &str) -> Result<(), StoreError> {
        Err(StoreError::Io {
            key: key.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        Err(StoreError::Io {
            key: key.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::Other, "read-only"),
        })
    }
}

pub struct RecordingNotifier {
    permission: Mutex<Permission>,
    answer: Permission,
    requests: AtomicUsize,
    shown: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn granted() -> Self {
        Self {
            permission: Mutex::new(Permission::Granted),
            answer: Permission::Granted,
            requests: AtomicUsize::new(0),
            shown: Mutex::new(Vec::new()),
        }
    }

    /// Starts unasked; the first request yields `answer`.
    pub fn asking(answer: Permission) -> Self {
        Self {
            permission: Mutex::new(Permission::Default),
            answer,
            ..Self::granted()
        }
    }

    pub fn shown(&self) -> Vec<(String, String)> {
        self.shown.lock().unwrap().clone()
    }

    pub fn permission_requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        "Recording"
    }

    fn permission(&self) -> Permission {
        *self.permission.lock().unwrap()
    }

    async fn request_permission(&self) -> Permission {
        self.requests.fetch_add(1, Ordering::SeqCst);
        *self.permission.lock().unwrap() = self.answer;
        self.answer
    }

    async fn show(&self, title: &str, body: &str) -> anyhow::Result<()> {
        self.shown.lock().unwrap().push((title.to_string(), body.to_string()));
        Ok(())
    }
}

/// Records every send and answers with the scripted outcome (200 by default).
#[derive(Default)]
pub struct ScriptedEmail {
    sent: Mutex<Vec<EmailParams>>,
    failure: Mutex<Option<EmailError>>,
}

impl ScriptedEmail {
    pub fn sent(&self) -> Vec<EmailParams> {
        self.sent.lock().unwrap().clone()
    }

    pub fn fail_with(&self, status: u16) {
        *self.failure.lock().unwrap() = Some(EmailError::from_status(status, "scripted".to_string()));
    }

    pub fn fail_transport(&self) {
        *self.failure.lock().unwrap() = Some(EmailError::Transport("connection reset".to_string()));
    }
}

#[async_trait]
impl EmailSender for ScriptedEmail {
    async fn send(&self, _config: &EmailConfig, params: &EmailParams) -> Result<EmailReceipt, EmailError> {
        self.sent.lock().unwrap().push(params.clone());
        match self.failure.lock().unwrap().clone() {
            Some(e) => Err(e),
            None => Ok(EmailReceipt {
                status: 200,
                body: "OK".to_string(),
            }),
        }
    }
}

pub fn valid_settings() -> MonitorSettings {
    MonitorSettings {
        email: EmailConfig {
            service_id: "service_test".to_string(),
            template_id: "template_test".to_string(),
            public_key: "pk_test".to_string(),
            recipient: "ops@example.com".to_string(),
            ..EmailConfig::default()
        },
        ..MonitorSettings::default()
    }
}

/// A dispatcher wired to fakes, with a usable email config.
pub struct Harness {
    pub dispatcher: Arc<AlertDispatcher>,
    pub notifier: Arc<RecordingNotifier>,
    pub email: Arc<ScriptedEmail>,
    pub settings: SettingsHandle,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(RecordingNotifier::granted(), Arc::new(MemoryStore::new()))
    }

    pub fn with_notifier(notifier: RecordingNotifier) -> Self {
        Self::build(notifier, Arc::new(MemoryStore::new()))
    }

    pub fn with_failing_store() -> Self {
        Self::build(RecordingNotifier::granted(), Arc::new(FailingStore))
    }

    fn build(notifier: RecordingNotifier, store: Arc<dyn KeyValueStore>) -> Self {
        let notifier = Arc::new(notifier);
        let email = Arc::new(ScriptedEmail::default());
        let settings = SettingsHandle::new(valid_settings());
        let dispatcher = Arc::new(AlertDispatcher::new(
            AlertLog::new(store),
            notifier.clone(),
            email.clone(),
            settings.clone(),
        ));
        Self {
            dispatcher,
            notifier,
            email,
            settings,
        }
    }
}

/// Returns the same results (or error) for every frame, optionally after a delay.
pub struct ScriptedDetector {
    response: Mutex<Result<DetectionResults, DetectError>>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
}

impl ScriptedDetector {
    pub fn empty() -> Arc<Self> {
        Self::returning(DetectionResults::default())
    }

    pub fn returning(results: DetectionResults) -> Arc<Self> {
        Arc::new(Self {
            response: Mutex::new(Ok(results)),
            delay: Mutex::new(None),
            calls: AtomicUsize::new(0),
        })
    }

    /// Every later call sleeps this long before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn fail_with(&self, error: DetectError) {
        *self.response.lock().unwrap() = Err(error);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Detector for ScriptedDetector {
    async fn detect(&self, frame: &EncodedFrame) -> Result<DetectionResults, DetectError> {
        assert!(frame.data_uri().starts_with("data:image/jpeg;base64,"));
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.response.lock().unwrap().clone()
    }
}

/// Serves one fixed frame; availability, readiness and failure are switchable.
pub struct StaticSource {
    kind: SourceKind,
    frame: RgbaImage,
    available: AtomicBool,
    ready: AtomicBool,
    failing: AtomicBool,
    captures: AtomicUsize,
}

impl StaticSource {
    pub fn new(kind: SourceKind, frame: RgbaImage) -> Self {
        Self {
            kind,
            frame,
            available: AtomicBool::new(true),
            ready: AtomicBool::new(true),
            failing: AtomicBool::new(false),
            captures: AtomicUsize::new(0),
        }
    }

    pub fn set_available(&self, v: bool) {
        self.available.store(v, Ordering::SeqCst);
    }

    pub fn set_ready(&self, v: bool) {
        self.ready.store(v, Ordering::SeqCst);
    }

    pub fn set_failing(&self, v: bool) {
        self.failing.store(v, Ordering::SeqCst);
    }

    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameSource for StaticSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn describe(&self) -> String {
        format!("static {:?} source", self.kind)
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn capture(&self) -> Result<RgbaImage, FrameError> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(FrameError::Capture("scripted failure".to_string()));
        }
        Ok(self.frame.clone())
    }
}
