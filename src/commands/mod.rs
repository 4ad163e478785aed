//! Command-line handlers. Parsed by main and passed to `run()`.

pub mod alerts;
pub mod monitors;

use crate::alerts::channels::{DesktopNotifier, EmailJsClient};
use crate::alerts::dispatch::AlertDispatcher;
use crate::alerts::log::AlertLog;
use crate::alerts::store::FileStore;
use crate::config::{Config, MonitorSettings, SettingsHandle};
use clap::Subcommand;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Monitor a camera snapshot URL or a local video file until Ctrl-C
    Run {
        /// HTTP snapshot URL of the camera
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        camera: Option<String>,
        /// Local video file (looped)
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Send a test email with the configured email settings
    TestEmail,
    /// Push a synthetic camera-blackout alert through every channel
    SimulateBlackout,
    /// Inspect or clear the alert log
    #[command(subcommand)]
    Alerts(AlertsCmd),
}

#[derive(Subcommand, Debug)]
pub enum AlertsCmd {
    /// List stored alerts, oldest first
    List {
        /// Only this kind (people_count, helmet, face_cover, loitering, posture, camera_blackout)
        #[arg(long)]
        kind: Option<String>,
    },
    /// Remove every stored alert
    Clear,
}

/// Settings from `config.json`, kept live by the config watcher.
pub(crate) fn load_settings() -> SettingsHandle {
    SettingsHandle::new(MonitorSettings::load())
}

/// Dispatcher backed by the on-disk store, desktop popups and EmailJS.
pub(crate) fn build_dispatcher(settings: SettingsHandle) -> Arc<AlertDispatcher> {
    let store = Arc::new(FileStore::new(Config::store_dir()));
    Arc::new(AlertDispatcher::new(
        AlertLog::new(store),
        Arc::new(DesktopNotifier::new()),
        Arc::new(EmailJsClient::new()),
        settings,
    ))
}

/// Run one command. Prints to stdout/stderr. Err carries the process exit code.
pub async fn run(cmd: Command) -> Result<(), i32> {
    match cmd {
        Command::Run { camera, file } => monitors::run_monitoring(camera, file).await,
        Command::TestEmail => alerts::test_email().await,
        Command::SimulateBlackout => alerts::simulate_blackout().await,
        Command::Alerts(AlertsCmd::List { kind }) => alerts::list(kind.as_deref()),
        Command::Alerts(AlertsCmd::Clear) => alerts::clear(),
    }
}
