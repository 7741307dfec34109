//! farmalert - alerting core of a farm-monitoring service
//!
//! Status updates from remote stations flow through two independent
//! branches:
//!
//! - a per-zone [`AlarmLogger`] that records every update and serves the
//!   on/off history of each alarm, and
//! - a notification branch where an [`UpdateFilter`] debounces alarms, a
//!   [`Notifier`] routes them to interested push subscribers, and a
//!   per-subscriber [`Batcher`] coalesces bursts.
//!
//! # Examples
//!
//! ```no_run
//! use farmalert::{AlarmLevel, AlarmStatus, AlarmUpdate, AlertConfig, AlertService, Domain};
//!
//! # async fn demo() -> farmalert::Result<()> {
//! farmalert::init_logging();
//!
//! let config = AlertConfig::from_file("alerts.yaml")?;
//! let store = AlertService::open_store(&config).await?;
//! let (service, notifications) = AlertService::start(&config, store).await?;
//! tokio::spawn(farmalert::deliver(notifications, farmalert::LogSender));
//!
//! let barn = service.zones().register("barn", Domain::Climate);
//! barn.push(&[AlarmUpdate::new(
//!     "temperature",
//!     AlarmLevel::Emergency,
//!     AlarmStatus::On,
//!     chrono::Utc::now(),
//! )])
//! .await?;
//!
//! service.shutdown().await;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// CORE MODULES
// ============================================================================

/// Error type shared by every stage
pub mod error;

/// Alarm update types
pub mod model;

/// Runtime-anchored wall clock
pub mod clock;

/// Unfiltered alarm history per zone
pub mod alarm_log;

/// YAML configuration
pub mod config;

// ============================================================================
// NOTIFICATION PIPELINE
// ============================================================================

/// Debounce and hysteresis stage
pub mod filter;

/// Leading-edge batching
pub mod batcher;

/// Push subscription settings and eligibility rules
pub mod subscription;

/// Subscription persistence
pub mod store;

/// Routing of filtered updates to subscribers
pub mod notifier;

/// Delivery of notification batches
pub mod sender;

/// Zone registration and shared loggers
pub mod zones;

/// Pipeline wiring and lifecycle
pub mod service;

// ============================================================================
// PUBLIC API EXPORTS
// ============================================================================

pub use alarm_log::{AlarmEvent, AlarmLog, AlarmLogger, AlarmReport, AlarmTimepoint, SharedLogger};
pub use batcher::Batcher;
pub use clock::{Clock, TokioClock};
pub use config::AlertConfig;
pub use error::{AlertError, Result};
pub use filter::UpdateFilter;
pub use model::{AlarmLevel, AlarmStatus, AlarmUpdate, Domain, FilterInput, ZonedAlarmUpdate, SERVICES_ZONE};
pub use notifier::{NotificationFor, Notifier};
pub use sender::{deliver, LogSender, NotificationSender};
pub use service::AlertService;
pub use store::{JsonFileStore, MemoryStore, SubscriptionStore};
pub use subscription::{is_subscribed_to, NotificationSettings, PushKeys, PushSubscription};
pub use zones::{ZoneFeed, ZoneRegistry};

// ============================================================================
// VERSION INFORMATION
// ============================================================================

/// Crate version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides the default `farmalert=info` filter. An already
/// installed subscriber is left in place.
pub fn init_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("farmalert=info"));
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false));

    if subscriber.try_init().is_err() {
        // Already initialized
    }

    tracing::info!("farmalert v{} logging initialized", VERSION);
}
