//! `run`: monitor one source until Ctrl-C, printing notices as they arrive.

use super::{build_dispatcher, load_settings};
use crate::config::watch::spawn_config_watcher;
use crate::config::Config;
use crate::monitors::detection::{DetectionLoop, HttpDetector};
use crate::monitors::source::{SnapshotCamera, VideoFileSource};
use crate::monitors::{FrameSource, Notice, NoticeLevel};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

pub fn format_notice(notice: &Notice) -> String {
    let tag = match notice.level {
        NoticeLevel::Info => "info",
        NoticeLevel::Success => "ok",
        NoticeLevel::Warning => "warn",
        NoticeLevel::Error => "ALERT",
    };
    format!("[{}] {}", tag, notice.message)
}

async fn open_source(camera: Option<String>, file: Option<PathBuf>) -> Result<Arc<dyn FrameSource>, String> {
    match (camera, file) {
        (Some(url), _) => Ok(Arc::new(SnapshotCamera::new(url))),
        (None, Some(path)) => VideoFileSource::open(path)
            .await
            .map(|s| Arc::new(s) as Arc<dyn FrameSource>)
            .map_err(|e| e.to_string()),
        (None, None) => Err("either --camera or --file is required".to_string()),
    }
}

pub async fn run_monitoring(camera: Option<String>, file: Option<PathBuf>) -> Result<(), i32> {
    let settings = load_settings();
    spawn_config_watcher(settings.clone(), Config::config_file_path());

    let source = match open_source(camera, file).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            return Err(1);
        }
    };

    let dispatcher = build_dispatcher(settings.clone());
    let detector = Arc::new(HttpDetector::new(settings.clone()));
    let detection = DetectionLoop::new(detector, dispatcher.clone(), settings);
    let mut notices = detection.subscribe();

    if let Err(e) = detection.start(source.clone()) {
        eprintln!("Error: {}", e);
        return Err(1);
    }
    println!("Monitoring {} (Ctrl-C to stop)", source.describe());

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Detection: Ctrl-C received, stopping");
                break;
            }
            notice = notices.recv() => match notice {
                Ok(n) => println!("{}", format_notice(&n)),
                Err(RecvError::Lagged(skipped)) => warn!("Detection: {} notices dropped", skipped),
                Err(RecvError::Closed) => break,
            },
        }
    }

    // Read before stop(), which clears the streak.
    let status = detection.watchdog().status();
    detection.stop();
    println!("Stopped. {} alert(s) in log.", dispatcher.log().len());
    if status.blackout_started_at.is_some() {
        println!("Note: camera {} was dark when monitoring stopped.", status.camera_id);
    }
    Ok(())
}
