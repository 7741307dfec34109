// src/subscription.rs
use crate::error::{AlertError, Result};
use crate::model::{AlarmLevel, SERVICES_ZONE};
use serde::{Deserialize, Serialize};

/// Web push encryption keys of a subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PushKeys {
    pub p256dh: String,
    pub auth: String,
}

/// What a subscriber wants to be notified about.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NotificationSettings {
    /// Receive alarms of every zone
    pub subscribe_to_all: bool,
    /// Zones to receive alarms of when not subscribed to all
    pub subscriptions: Vec<String>,
    /// Also receive warnings, not only emergencies
    pub notify_on_warning: bool,
    /// Receive service events that were not a graceful shutdown
    pub notify_non_graceful: bool,
}

/// A registered push endpoint and its settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushSubscription {
    pub endpoint: String,
    pub keys: PushKeys,
    #[serde(default)]
    pub settings: NotificationSettings,
}

impl PushSubscription {
    pub fn new(endpoint: impl Into<String>, keys: PushKeys, settings: NotificationSettings) -> Self {
        Self {
            endpoint: endpoint.into(),
            keys,
            settings,
        }
    }

    /// A subscription is usable only with an endpoint and both push keys.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.is_empty() {
            return Err(AlertError::InvalidSubscription("endpoint is empty".into()));
        }
        if self.keys.p256dh.is_empty() || self.keys.auth.is_empty() {
            return Err(AlertError::InvalidSubscription(format!(
                "missing push keys for {}",
                self.endpoint
            )));
        }
        Ok(())
    }
}

/// Whether `settings` ask for an alarm of `level` in `zone`.
///
/// Service events are gated solely by `notify_non_graceful`. Warnings
/// additionally require `notify_on_warning`.
pub fn is_subscribed_to(zone: &str, level: AlarmLevel, settings: &NotificationSettings) -> bool {
    if zone == SERVICES_ZONE {
        return settings.notify_non_graceful;
    }
    if level == AlarmLevel::Warning && !settings.notify_on_warning {
        return false;
    }
    settings.subscribe_to_all || settings.subscriptions.iter().any(|z| z == zone)
}

/// Whether `settings` could match `zone` at any level.
pub fn might_care(zone: &str, settings: &NotificationSettings) -> bool {
    is_subscribed_to(zone, AlarmLevel::Emergency, settings)
}
