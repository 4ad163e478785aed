//! Alert commands: log inspection, test email, synthetic blackout.

use super::{build_dispatcher, load_settings};
use crate::alerts::dispatch::{AlertDispatcher, DispatchReport};
use crate::alerts::log::AlertLog;
use crate::alerts::store::FileStore;
use crate::alerts::{AlertKind, AlertRecord};
use crate::config::Config;
use chrono::Local;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Duration reported by the synthetic blackout alert.
const SIMULATED_BLACKOUT: Duration = Duration::from_millis(30_500);

fn open_log() -> AlertLog {
    AlertLog::new(Arc::new(FileStore::new(Config::store_dir())))
}

/// One line per record: local time, kind, confidence, message.
pub fn format_record(record: &AlertRecord) -> String {
    let mut line = format!(
        "{}  {:<15} {:>6}  {}",
        record.created_at().with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
        record.kind().as_str(),
        record.confidence_label(),
        record.message()
    );
    if let Some(duration) = record.duration_label() {
        line.push_str(&format!(" ({})", duration));
    }
    line
}

pub fn list(kind: Option<&str>) -> Result<(), i32> {
    let log = open_log();
    let records = match kind {
        Some(k) => match k.parse::<AlertKind>() {
            Ok(kind) => log.by_kind(kind),
            Err(e) => {
                eprintln!("Error: {}", e);
                return Err(2);
            }
        },
        None => log.all(),
    };
    if records.is_empty() {
        println!("No alerts stored.");
        return Ok(());
    }
    for record in &records {
        println!("{}", format_record(record));
    }
    println!("{} alert(s), capacity {}", records.len(), log.capacity());
    Ok(())
}

pub fn clear() -> Result<(), i32> {
    let log = open_log();
    let count = log.len();
    log.clear();
    println!("Cleared {} alert(s).", count);
    Ok(())
}

pub async fn test_email() -> Result<(), i32> {
    let dispatcher = build_dispatcher(load_settings());
    match dispatcher.send_test_email().await {
        Ok(receipt) => {
            println!("Test email sent (HTTP {}).", receipt.status);
            Ok(())
        }
        Err(e) => {
            eprintln!("Failed to send test email: {}", e);
            Err(1)
        }
    }
}

/// Synthetic blackout record for the configured camera.
pub fn simulated_blackout_record(camera_id: &str, location: &str) -> AlertRecord {
    AlertRecord::camera_blackout(camera_id, location, SIMULATED_BLACKOUT)
}

pub async fn simulate_with(dispatcher: &AlertDispatcher) -> DispatchReport {
    let settings = dispatcher.settings().snapshot();
    let record = simulated_blackout_record(&settings.camera_id, &settings.location);
    info!("Alerts: simulating camera blackout for {}", settings.camera_id);
    dispatcher.dispatch(&record).await
}

pub async fn simulate_blackout() -> Result<(), i32> {
    let dispatcher = build_dispatcher(load_settings());
    let report = simulate_with(&dispatcher).await;
    println!(
        "Blackout alert logged: {}, notification shown: {}, email sent: {}",
        report.alert_logged, report.notification_sent, report.success
    );
    if let Some(err) = report.error {
        eprintln!("Email: {}", err);
    }
    Ok(())
}
