//! Email cooldown rules
//!
//! Cooldowns only gate the outbound email channel. Logging and desktop
//! notifications are never throttled.

use super::AlertKind;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Minimum gap between loitering emails.
pub const LOITERING_EMAIL_COOLDOWN: Duration = Duration::from_secs(30);

/// Which detection kinds may email, and how often.
/// Kinds without an entry never use the email channel from the detection path.
#[derive(Debug, Clone)]
pub struct CooldownPolicy {
    windows: HashMap<AlertKind, Duration>,
}

impl CooldownPolicy {
    /// No kind emails.
    pub fn none() -> Self {
        Self {
            windows: HashMap::new(),
        }
    }

    pub fn with_window(mut self, kind: AlertKind, window: Duration) -> Self {
        self.windows.insert(kind, window);
        self
    }

    pub fn window(&self, kind: AlertKind) -> Option<Duration> {
        self.windows.get(&kind).copied()
    }
}

impl Default for CooldownPolicy {
    fn default() -> Self {
        Self::none().with_window(AlertKind::Loitering, LOITERING_EMAIL_COOLDOWN)
    }
}

/// Last initiated email dispatch per kind.
#[derive(Debug, Default)]
pub struct CooldownState {
    last_dispatch: HashMap<AlertKind, Instant>,
}

impl CooldownState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the email slot for `kind` at `now`. Succeeds (and records `now`)
    /// when nothing was sent yet or at least `window` has elapsed since the last claim.
    pub fn try_acquire(&mut self, kind: AlertKind, window: Duration, now: Instant) -> bool {
        if let Some(last) = self.last_dispatch.get(&kind) {
            if now.saturating_duration_since(*last) < window {
                return false;
            }
        }
        self.last_dispatch.insert(kind, now);
        true
    }

    pub fn last_dispatch(&self, kind: AlertKind) -> Option<Instant> {
        self.last_dispatch.get(&kind).copied()
    }
}
