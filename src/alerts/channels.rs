//! Alert channel implementations: desktop notifications and the email service.

use crate::config::EmailConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Permission state of the desktop notification surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    /// Not asked yet.
    Default,
    Granted,
    Denied,
}

/// Native OS notification popups.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;
    fn permission(&self) -> Permission;
    /// Ask once; the answer sticks for the lifetime of the notifier.
    async fn request_permission(&self) -> Permission;
    async fn show(&self, title: &str, body: &str) -> Result<()>;
}

/// Desktop popups through `notify-send` (Linux) or `osascript` (macOS).
/// "Permission" is granted when the helper tool is present and runnable.
pub struct DesktopNotifier {
    permission: Mutex<Permission>,
}

impl DesktopNotifier {
    pub fn new() -> Self {
        Self {
            permission: Mutex::new(Permission::Default),
        }
    }

    fn set_permission(&self, p: Permission) {
        if let Ok(mut guard) = self.permission.lock() {
            *guard = p;
        }
    }
}

impl Default for DesktopNotifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Escape a string for use inside an AppleScript double-quoted literal.
fn applescript_quote(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

#[async_trait]
impl Notifier for DesktopNotifier {
    fn name(&self) -> &str {
        "Desktop"
    }

    fn permission(&self) -> Permission {
        self.permission
            .lock()
            .map(|p| *p)
            .unwrap_or(Permission::Denied)
    }

    async fn request_permission(&self) -> Permission {
        let current = self.permission();
        if current != Permission::Default {
            return current;
        }

        let probe = if cfg!(target_os = "macos") {
            tokio::process::Command::new("osascript")
                .args(["-e", "return 1"])
                .output()
                .await
        } else if cfg!(target_os = "linux") {
            tokio::process::Command::new("notify-send")
                .arg("--version")
                .output()
                .await
        } else {
            Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "no desktop notification helper for this platform",
            ))
        };

        let granted = match probe {
            Ok(out) => out.status.success(),
            Err(e) => {
                debug!("Notifications: helper probe failed: {}", e);
                false
            }
        };
        let p = if granted {
            Permission::Granted
        } else {
            Permission::Denied
        };
        info!("Notifications: desktop permission {:?}", p);
        self.set_permission(p);
        p
    }

    async fn show(&self, title: &str, body: &str) -> Result<()> {
        let output = if cfg!(target_os = "macos") {
            let script = format!(
                "display notification \"{}\" with title \"{}\"",
                applescript_quote(body),
                applescript_quote(title)
            );
            tokio::process::Command::new("osascript")
                .args(["-e", &script])
                .output()
                .await
                .context("Failed to run osascript")?
        } else {
            tokio::process::Command::new("notify-send")
                .args(["-a", "atm_watch", title, body])
                .output()
                .await
                .context("Failed to run notify-send")?
        };
        if !output.status.success() {
            anyhow::bail!(
                "notification helper exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

/// Coarse classification of email-dispatch failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmailError {
    #[error("email service bad request (400) - check service configuration: {0}")]
    BadRequest(String),

    #[error("email service unauthorized ({status}) - check public key")]
    Unauthorized { status: u16 },

    #[error("email template parameters mismatch (422) - check template configuration: {0}")]
    TemplateMismatch(String),

    #[error("email service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("email service unreachable: {0}")]
    Transport(String),

    #[error("email configuration incomplete: {}", .0.join(", "))]
    Misconfigured(Vec<String>),
}

impl EmailError {
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            400 => EmailError::BadRequest(body),
            401 | 403 => EmailError::Unauthorized { status },
            422 => EmailError::TemplateMismatch(body),
            _ => EmailError::Status { status, body },
        }
    }

    /// HTTP-style status code when the service answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            EmailError::BadRequest(_) => Some(400),
            EmailError::Unauthorized { status } => Some(*status),
            EmailError::TemplateMismatch(_) => Some(422),
            EmailError::Status { status, .. } => Some(*status),
            EmailError::Transport(_) | EmailError::Misconfigured(_) => None,
        }
    }
}

/// Template parameter bag. The recipient and sender appear under several
/// names because templates differ in which one they reference.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailParams {
    pub to_email: String,
    pub to_name: String,
    pub user_email: String,
    pub email: String,
    pub from_name: String,
    pub user_name: String,
    pub subject: String,
    pub message: String,
    pub reply_to: String,
    pub reply_email: String,
}

impl EmailParams {
    pub fn new(config: &EmailConfig, subject: String, message: String) -> Self {
        let to = config.recipient.clone();
        Self {
            to_email: to.clone(),
            to_name: to.clone(),
            user_email: to.clone(),
            email: to.clone(),
            from_name: config.sender_name.clone(),
            user_name: config.sender_name.clone(),
            subject,
            message,
            reply_to: to.clone(),
            reply_email: to,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmailReceipt {
    pub status: u16,
    pub body: String,
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, config: &EmailConfig, params: &EmailParams) -> Result<EmailReceipt, EmailError>;
}

#[derive(Serialize)]
struct EmailJsRequest<'a> {
    service_id: &'a str,
    template_id: &'a str,
    user_id: &'a str,
    template_params: &'a EmailParams,
}

/// EmailJS REST client (`POST /api/v1.0/email/send`).
pub struct EmailJsClient {
    client: reqwest::Client,
}

impl EmailJsClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for EmailJsClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmailSender for EmailJsClient {
    async fn send(&self, config: &EmailConfig, params: &EmailParams) -> Result<EmailReceipt, EmailError> {
        let payload = EmailJsRequest {
            service_id: &config.service_id,
            template_id: &config.template_id,
            user_id: &config.public_key,
            template_params: params,
        };

        debug!("Email: sending '{}' to {}", params.subject, params.to_email);
        let resp = self
            .client
            .post(&config.endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|e| EmailError::Transport(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            let body: String = body.chars().take(200).collect();
            warn!("Email: service answered HTTP {}: {}", status.as_u16(), body);
            return Err(EmailError::from_status(status.as_u16(), body));
        }
        info!("Email: '{}' accepted (HTTP {})", params.subject, status.as_u16());
        Ok(EmailReceipt {
            status: status.as_u16(),
            body,
        })
    }
}
