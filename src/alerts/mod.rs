//! Alert system module
//!
//! Alert records and the machinery that delivers them:
//! - `store`: durable key-value persistence
//! - `log`: capacity-bounded alert history on top of the store
//! - `rules`: per-kind email cooldowns
//! - `channels`: desktop notifications and the email service
//! - `templates`: subject/body composition per alert kind
//! - `dispatch`: fan-out of one record to every channel

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub mod channels;
pub mod dispatch;
pub mod log;
pub mod rules;
pub mod store;
pub mod templates;

/// Confidence attached to watchdog-raised blackout alerts.
pub const BLACKOUT_CONFIDENCE: f64 = 0.95;

/// Alert categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    PeopleCount,
    Helmet,
    FaceCover,
    Loitering,
    Posture,
    CameraBlackout,
}

impl AlertKind {
    pub const ALL: [AlertKind; 6] = [
        AlertKind::PeopleCount,
        AlertKind::Helmet,
        AlertKind::FaceCover,
        AlertKind::Loitering,
        AlertKind::Posture,
        AlertKind::CameraBlackout,
    ];

    /// Wire name, as used by the detection endpoint and in the stored log.
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::PeopleCount => "people_count",
            AlertKind::Helmet => "helmet",
            AlertKind::FaceCover => "face_cover",
            AlertKind::Loitering => "loitering",
            AlertKind::Posture => "posture",
            AlertKind::CameraBlackout => "camera_blackout",
        }
    }

    /// Human-readable name for notification titles and email bodies.
    pub fn label(&self) -> &'static str {
        match self {
            AlertKind::PeopleCount => "People Count",
            AlertKind::Helmet => "Helmet",
            AlertKind::FaceCover => "Face Cover",
            AlertKind::Loitering => "Loitering",
            AlertKind::Posture => "Posture",
            AlertKind::CameraBlackout => "Camera Blackout",
        }
    }

    /// Kinds the detection endpoint may report. Camera blackout is raised locally only.
    pub fn is_detection_kind(&self) -> bool {
        !matches!(self, AlertKind::CameraBlackout)
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace('-', "_");
        AlertKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == wanted)
            .ok_or_else(|| format!("unknown alert kind: {}", s))
    }
}

/// Kind-specific payload. Each variant carries only the fields that kind uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertDetails {
    PeopleCount,
    Helmet,
    FaceCover,
    Posture,
    Loitering {
        duration: String,
    },
    CameraBlackout {
        camera_id: String,
        location: String,
        duration_secs: f64,
    },
}

impl AlertDetails {
    pub fn kind(&self) -> AlertKind {
        match self {
            AlertDetails::PeopleCount => AlertKind::PeopleCount,
            AlertDetails::Helmet => AlertKind::Helmet,
            AlertDetails::FaceCover => AlertKind::FaceCover,
            AlertDetails::Posture => AlertKind::Posture,
            AlertDetails::Loitering { .. } => AlertKind::Loitering,
            AlertDetails::CameraBlackout { .. } => AlertKind::CameraBlackout,
        }
    }

    /// Details for an alert reported by the detection endpoint.
    /// Loitering from a live detection has no known end, hence "Ongoing".
    fn for_detection(kind: AlertKind) -> Option<Self> {
        match kind {
            AlertKind::PeopleCount => Some(AlertDetails::PeopleCount),
            AlertKind::Helmet => Some(AlertDetails::Helmet),
            AlertKind::FaceCover => Some(AlertDetails::FaceCover),
            AlertKind::Posture => Some(AlertDetails::Posture),
            AlertKind::Loitering => Some(AlertDetails::Loitering {
                duration: "Ongoing".to_string(),
            }),
            AlertKind::CameraBlackout => None,
        }
    }
}

/// One alert. Immutable once built: fields are private and only read through accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    #[serde(flatten)]
    details: AlertDetails,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    confidence: Option<f64>,
    message: String,
    created_at: DateTime<Utc>,
}

fn clamp_confidence(c: f64) -> f64 {
    if c.is_nan() {
        0.0
    } else {
        c.clamp(0.0, 1.0)
    }
}

/// "30.5 seconds"
pub fn format_duration_secs(secs: f64) -> String {
    format!("{:.1} seconds", secs)
}

impl AlertRecord {
    /// Alert reported by the detection endpoint. Returns None for kinds the
    /// endpoint cannot raise (camera blackout).
    pub fn detection(kind: AlertKind, message: impl Into<String>, confidence: f64) -> Option<Self> {
        let details = AlertDetails::for_detection(kind)?;
        Some(Self {
            details,
            confidence: Some(clamp_confidence(confidence)),
            message: message.into(),
            created_at: Utc::now(),
        })
    }

    /// Alert raised by the blackout watchdog after a sustained dark streak.
    pub fn camera_blackout(camera_id: &str, location: &str, duration: Duration) -> Self {
        let duration_secs = duration.as_secs_f64();
        Self {
            message: format!(
                "Camera {} has been black for {}",
                camera_id,
                format_duration_secs(duration_secs)
            ),
            details: AlertDetails::CameraBlackout {
                camera_id: camera_id.to_string(),
                location: location.to_string(),
                duration_secs,
            },
            confidence: Some(BLACKOUT_CONFIDENCE),
            created_at: Utc::now(),
        }
    }

    /// Hand-built alert (drills, manual tests). Confidence is optional here.
    pub fn synthetic(details: AlertDetails, message: impl Into<String>, confidence: Option<f64>) -> Self {
        Self {
            details,
            confidence: confidence.map(clamp_confidence),
            message: message.into(),
            created_at: Utc::now(),
        }
    }

    pub fn kind(&self) -> AlertKind {
        self.details.kind()
    }

    pub fn details(&self) -> &AlertDetails {
        &self.details
    }

    pub fn confidence(&self) -> Option<f64> {
        self.confidence
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Duration text for kinds that carry one.
    pub fn duration_label(&self) -> Option<String> {
        match &self.details {
            AlertDetails::Loitering { duration } => Some(duration.clone()),
            AlertDetails::CameraBlackout { duration_secs, .. } => Some(format_duration_secs(*duration_secs)),
            _ => None,
        }
    }

    /// Confidence as "87.5%", or "High" when the record has none.
    pub fn confidence_label(&self) -> String {
        match self.confidence {
            Some(c) => format!("{:.1}%", c * 100.0),
            None => "High".to_string(),
        }
    }
}
