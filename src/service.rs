// src/service.rs
//
// Wires the notification branch together:
//
//   ZoneFeed ──► UpdateFilter ──► Notifier ──► Batcher per subscriber ──► NotificationFor
//      │
//      └──► zone AlarmLogger (unfiltered history)

use crate::clock::{Clock, TokioClock};
use crate::config::AlertConfig;
use crate::error::Result;
use crate::filter::UpdateFilter;
use crate::notifier::{NotificationFor, Notifier};
use crate::store::{JsonFileStore, MemoryStore, SubscriptionStore};
use crate::zones::ZoneRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

pub struct AlertService {
    zones: ZoneRegistry,
    notifier: Notifier,
    stages: JoinSet<()>,
    pruner: Option<JoinHandle<()>>,
}

impl AlertService {
    /// The subscription store selected by `config.store`.
    pub async fn open_store(config: &AlertConfig) -> Result<Arc<dyn SubscriptionStore>> {
        match &config.store.path {
            Some(path) => Ok(Arc::new(JsonFileStore::open(path).await?)),
            None => Ok(Arc::new(MemoryStore::new())),
        }
    }

    /// Restore stored subscriptions and spawn every stage. Returns the
    /// service and the stream of notifications to deliver.
    pub async fn start(
        config: &AlertConfig,
        store: Arc<dyn SubscriptionStore>,
    ) -> Result<(Self, mpsc::Receiver<NotificationFor>)> {
        config.validate()?;
        let capacity = config.channels.capacity;
        let clock = TokioClock::new();

        let (notifier, notifications) =
            Notifier::new(store, config.batcher.batch_period(), capacity);
        notifier.restore().await?;

        let (filter_tx, filter_rx) = mpsc::channel(capacity);
        let (dispatch_tx, dispatch_rx) = mpsc::channel(capacity);

        let mut stages = JoinSet::new();
        stages.spawn(
            UpdateFilter::with_clock(config.filter.minimum_on(), clock).run(filter_rx, dispatch_tx),
        );
        let dispatcher = notifier.clone();
        stages.spawn(async move { dispatcher.run(dispatch_rx).await });

        let zones = ZoneRegistry::new(filter_tx);
        let pruner = config.history.retention().map(|retention| {
            tokio::spawn(prune_history(
                zones.clone(),
                clock,
                retention,
                config.history.prune_interval(),
            ))
        });

        info!(
            "Alert service started ({} subscriptions, minimum on {}ms, batch period {}ms)",
            notifier.subscription_count(),
            config.filter.minimum_on_ms,
            config.batcher.batch_period_ms
        );

        Ok((
            Self {
                zones,
                notifier,
                stages,
                pruner,
            },
            notifications,
        ))
    }

    pub fn zones(&self) -> &ZoneRegistry {
        &self.zones
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Close the filter input and wait for the closure to reach the
    /// notification stream. Staged and buffered updates are discarded.
    pub async fn shutdown(mut self) {
        if let Some(pruner) = self.pruner.take() {
            pruner.abort();
            match pruner.await {
                Err(e) if !e.is_cancelled() => error!("History pruning task failed: {}", e),
                _ => {}
            }
        }

        self.zones.close();
        while let Some(finished) = self.stages.join_next().await {
            if let Err(e) = finished {
                error!("Pipeline stage failed: {}", e);
            }
        }
        info!("Alert service stopped");
    }
}

async fn prune_history(
    zones: ZoneRegistry,
    clock: TokioClock,
    retention: chrono::Duration,
    every: Duration,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let cutoff = clock.now() - retention;
        zones.prune_before(cutoff);
        debug!("Pruned alarm history before {}", cutoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AlarmLevel, AlarmStatus, AlarmUpdate, Domain};
    use crate::subscription::{NotificationSettings, PushKeys, PushSubscription};

    fn config(yaml: &str) -> AlertConfig {
        AlertConfig::from_yaml(yaml).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_closes_notifications() {
        let store: Arc<dyn SubscriptionStore> = Arc::new(MemoryStore::new());
        let (service, mut notifications) = AlertService::start(&AlertConfig::default(), store)
            .await
            .unwrap();
        let feed = service.zones().register("barn", Domain::Climate);

        service.shutdown().await;
        assert!(notifications.recv().await.is_none());

        let update = AlarmUpdate::new("temp", AlarmLevel::Emergency, AlarmStatus::On, chrono::Utc::now());
        assert!(feed.push(&[update]).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restores_stored_subscriptions() {
        let store = MemoryStore::new();
        store
            .save(&PushSubscription::new(
                "https://push.example/1",
                PushKeys {
                    p256dh: "k".into(),
                    auth: "a".into(),
                },
                NotificationSettings::default(),
            ))
            .await
            .unwrap();

        let (service, _notifications) = AlertService::start(&AlertConfig::default(), Arc::new(store))
            .await
            .unwrap();
        assert!(service.notifier().subscription("https://push.example/1").is_some());
        service.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_pruned_periodically() {
        let config = config("history:\n  retention_hours: 1\n  prune_interval_secs: 60\n");
        let (service, _notifications) =
            AlertService::start(&config, Arc::new(MemoryStore::new())).await.unwrap();

        let feed = service.zones().register("barn", Domain::Climate);
        let start = chrono::Utc::now() - chrono::Duration::hours(3);
        feed.push(&[
            AlarmUpdate::new("temp", AlarmLevel::Warning, AlarmStatus::On, start),
            AlarmUpdate::new("temp", AlarmLevel::Warning, AlarmStatus::Off, start + chrono::Duration::minutes(5)),
        ])
        .await
        .unwrap();
        assert_eq!(service.zones().alarm_report("barn").unwrap().len(), 1);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(service.zones().alarm_report("barn").unwrap().is_empty());
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_open_store_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subs.json");
        let yaml = format!("store:\n  path: {}\n", path.display());
        let store = AlertService::open_store(&config(&yaml)).await.unwrap();
        assert!(store.load_all().await.unwrap().is_empty());

        let memory = AlertService::open_store(&AlertConfig::default()).await.unwrap();
        assert!(memory.load_all().await.unwrap().is_empty());
    }
}
