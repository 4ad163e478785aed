//! Notification titles and email bodies per alert kind.

use super::channels::EmailParams;
use super::{AlertDetails, AlertKind, AlertRecord};
use crate::config::EmailConfig;
use chrono::{DateTime, Local, Utc};

/// Short title for the desktop popup.
pub fn notification_title(kind: AlertKind) -> String {
    match kind {
        AlertKind::CameraBlackout => "Camera Blackout Alert".to_string(),
        other => format!("{} Alert", other.label()),
    }
}

/// Popup body. Loitering gets the confidence spelled out; everything else uses the record message.
pub fn notification_body(record: &AlertRecord) -> String {
    match record.details() {
        AlertDetails::Loitering { .. } => {
            let confidence = match record.confidence() {
                Some(c) => format!("{:.1}%", c * 100.0),
                None => "high".to_string(),
            };
            format!("Suspicious loitering detected with {} confidence", confidence)
        }
        _ => record.message().to_string(),
    }
}

fn local_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

fn iso(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub fn email_subject(kind: AlertKind, sender: &str) -> String {
    match kind {
        AlertKind::Loitering => format!("{} Alert - Loitering Detected", sender),
        AlertKind::CameraBlackout => format!("{} Alert - Camera Blackout Detected", sender),
        other => format!("{} Alert - {} Violation Detected", sender, other.label()),
    }
}

pub fn email_body(record: &AlertRecord, sender: &str) -> String {
    let at = record.created_at();
    match record.details() {
        AlertDetails::Loitering { duration } => format!(
            "LOITERING ALERT\n\n\
             {sender} has detected suspicious loitering activity.\n\n\
             Detection Details:\n\
             - Time: {time}\n\
             - Location: {sender}\n\
             - Alert Type: Loitering Detection\n\
             - Confidence: {confidence}\n\
             - Duration: {duration}\n\n\
             This is an automated alert from the {sender}.\n\
             Please investigate the situation immediately.\n\n\
             System Status: ACTIVE\n\
             Timestamp: {ts}",
            sender = sender,
            time = local_time(at),
            confidence = record.confidence_label(),
            duration = duration,
            ts = iso(at),
        ),
        AlertDetails::CameraBlackout {
            camera_id,
            location,
            duration_secs,
        } => format!(
            "CAMERA BLACKOUT ALERT\n\n\
             {sender} has detected a camera blackout condition.\n\n\
             Detection Details:\n\
             - Time Detected: {time}\n\
             - Location: {location}\n\
             - Camera ID: {camera_id}\n\
             - Duration: {duration}\n\
             - Confidence: {confidence}\n\n\
             This could indicate:\n\
             - Camera malfunction\n\
             - Camera disconnected\n\
             - Camera lens covered\n\
             - Power failure\n\
             - Network issues\n\n\
             Please investigate the camera system immediately.\n\n\
             System Status: ACTIVE\n\
             Timestamp: {ts}",
            sender = sender,
            time = local_time(at),
            location = location,
            camera_id = camera_id,
            duration = super::format_duration_secs(*duration_secs),
            confidence = record.confidence_label(),
            ts = iso(at),
        ),
        _ => format!(
            "{label} ALERT\n\n\
             {sender} raised an alert: {message}\n\n\
             Detection Details:\n\
             - Time: {time}\n\
             - Alert Type: {label}\n\
             - Confidence: {confidence}\n\n\
             System Status: ACTIVE\n\
             Timestamp: {ts}",
            label = record.kind().label().to_uppercase(),
            sender = sender,
            message = record.message(),
            time = local_time(at),
            confidence = record.confidence_label(),
            ts = iso(at),
        ),
    }
}

pub fn alert_email(record: &AlertRecord, config: &EmailConfig) -> EmailParams {
    EmailParams::new(
        config,
        email_subject(record.kind(), &config.sender_name),
        email_body(record, &config.sender_name),
    )
}

pub fn test_email(config: &EmailConfig) -> EmailParams {
    let now = Utc::now();
    EmailParams::new(
        config,
        format!("{} - Test Email", config.sender_name),
        format!(
            "This is a test email from the {}.\n\n\
             System Status: OPERATIONAL\n\
             Test Time: {}\n\n\
             If you receive this email, the notification system is working correctly.",
            config.sender_name,
            local_time(now)
        ),
    )
}
