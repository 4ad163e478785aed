//! Watch ~/.atm-watch/config.json and push edits into the live settings,
//! so camera id, location and the toggles change without restarting a loop.

use super::{MonitorSettings, SettingsHandle};
use notify::{RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Debounce interval: wait this long after the last filesystem event before reloading.
const DEBOUNCE_MS: u64 = 500;

/// Re-read `path` into `handle`. Returns true when the live settings changed.
/// A file that fails to parse leaves the current settings untouched.
pub fn reload_into(handle: &SettingsHandle, path: &Path) -> bool {
    match MonitorSettings::load_from(path) {
        Ok(settings) => {
            if handle.snapshot() == settings {
                return false;
            }
            handle.replace(settings);
            info!("Config watch: reloaded settings from {:?}", path);
            true
        }
        Err(e) => {
            warn!("Config watch: ignoring edit: {}", e);
            false
        }
    }
}

/// Spawn a background thread that watches the directory holding `config_path`.
/// Any change touching the config file triggers a debounced reload into `handle`.
pub fn spawn_config_watcher(handle: SettingsHandle, config_path: PathBuf) {
    thread::spawn(move || {
        let dir = match config_path.parent() {
            Some(d) => d.to_path_buf(),
            None => {
                warn!("Config watch: {:?} has no parent directory, not watching", config_path);
                return;
            }
        };

        let (tx, rx) = mpsc::channel();
        let mut watcher = match notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let _ = tx.send(res);
        }) {
            Ok(w) => w,
            Err(e) => {
                warn!("Config watch: failed to create watcher: {}", e);
                return;
            }
        };

        if !dir.exists() {
            debug!("Config watch: config dir does not exist yet {:?}", dir);
            return;
        }
        if watcher.watch(&dir, RecursiveMode::NonRecursive).is_err() {
            warn!("Config watch: failed to watch {:?}", dir);
            return;
        }
        info!("Config watch: watching {:?}", config_path);

        let mut last_event = Instant::now();
        let mut pending = false;

        loop {
            let timeout = if pending {
                let elapsed = last_event.elapsed();
                if elapsed >= Duration::from_millis(DEBOUNCE_MS) {
                    pending = false;
                    reload_into(&handle, &config_path);
                    Duration::from_millis(DEBOUNCE_MS)
                } else {
                    Duration::from_millis(DEBOUNCE_MS) - elapsed
                }
            } else {
                Duration::from_millis(DEBOUNCE_MS)
            };

            match rx.recv_timeout(timeout) {
                Ok(Ok(event)) => {
                    if event.paths.iter().any(|p| p.file_name() == config_path.file_name()) {
                        last_event = Instant::now();
                        pending = true;
                    }
                }
                Ok(Err(e)) => {
                    debug!("Config watch: event error: {:?}", e);
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
    });
}
