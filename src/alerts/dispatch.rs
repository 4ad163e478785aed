//! Alert fan-out: one record goes to the alert log, the desktop notifier and
//! the email service. Each channel fails on its own; none of them can stop the others.

use super::channels::{EmailError, EmailReceipt, EmailSender, Notifier, Permission};
use super::log::AlertLog;
use super::templates;
use super::AlertRecord;
use crate::config::SettingsHandle;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Which outbound channels a dispatch may use. The log is always written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Channels {
    pub notification: bool,
    pub email: bool,
}

impl Channels {
    pub const ALL: Channels = Channels {
        notification: true,
        email: true,
    };

    pub const NO_EMAIL: Channels = Channels {
        notification: true,
        email: false,
    };
}

/// Outcome of one dispatch. `alert_logged` is always true: logging never fails
/// from the caller's point of view. `success` means the email went out.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchReport {
    pub success: bool,
    pub alert_logged: bool,
    pub notification_sent: bool,
    pub email_attempted: bool,
    pub error: Option<String>,
    pub status: Option<u16>,
}

impl DispatchReport {
    fn logged() -> Self {
        Self {
            success: false,
            alert_logged: true,
            notification_sent: false,
            email_attempted: false,
            error: None,
            status: None,
        }
    }
}

pub struct AlertDispatcher {
    log: AlertLog,
    notifier: Arc<dyn Notifier>,
    email: Arc<dyn EmailSender>,
    settings: SettingsHandle,
}

impl AlertDispatcher {
    pub fn new(
        log: AlertLog,
        notifier: Arc<dyn Notifier>,
        email: Arc<dyn EmailSender>,
        settings: SettingsHandle,
    ) -> Self {
        Self {
            log,
            notifier,
            email,
            settings,
        }
    }

    pub fn log(&self) -> &AlertLog {
        &self.log
    }

    pub fn settings(&self) -> &SettingsHandle {
        &self.settings
    }

    /// Deliver through every channel.
    pub async fn dispatch(&self, record: &AlertRecord) -> DispatchReport {
        self.dispatch_with(record, Channels::ALL).await
    }

    pub async fn dispatch_with(&self, record: &AlertRecord, channels: Channels) -> DispatchReport {
        info!(
            "Alerts: {} alert: {} (confidence {})",
            record.kind(),
            record.message(),
            record.confidence_label()
        );

        self.log.append(record.clone());
        let mut report = DispatchReport::logged();

        if channels.notification {
            report.notification_sent = self
                .notify_system(
                    &templates::notification_title(record.kind()),
                    &templates::notification_body(record),
                )
                .await;
        }

        if channels.email {
            report.email_attempted = true;
            let config = self.settings.snapshot().email;
            let issues = config.validate();
            let result = if issues.is_empty() {
                let params = templates::alert_email(record, &config);
                self.email.send(&config, &params).await
            } else {
                Err(EmailError::Misconfigured(issues))
            };
            match result {
                Ok(receipt) => {
                    report.success = true;
                    report.status = Some(receipt.status);
                }
                Err(e) => {
                    warn!("Alerts: email for {} alert failed, alert logged locally: {}", record.kind(), e);
                    report.status = e.status();
                    report.error = Some(e.to_string());
                }
            }
        }

        report
    }

    /// Ask for permission on first use, fire directly once granted, no-op when denied.
    async fn notify_system(&self, title: &str, body: &str) -> bool {
        let permission = match self.notifier.permission() {
            Permission::Default => self.notifier.request_permission().await,
            p => p,
        };
        if permission != Permission::Granted {
            debug!("Alerts: {} notifications not permitted, skipping", self.notifier.name());
            return false;
        }
        match self.notifier.show(title, body).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Alerts: {} notification failed: {}", self.notifier.name(), e);
                false
            }
        }
    }

    /// Validate the email config and send a fixed test message.
    pub async fn send_test_email(&self) -> Result<EmailReceipt, EmailError> {
        let config = self.settings.snapshot().email;
        let issues = config.validate();
        if !issues.is_empty() {
            warn!("Email: configuration issues: {:?}", issues);
            return Err(EmailError::Misconfigured(issues));
        }
        let params = templates::test_email(&config);
        self.email.send(&config, &params).await
    }
}
