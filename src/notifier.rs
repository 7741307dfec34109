// File: src/notifier.rs
// Push subscriber routing
//
// Each push subscription owns a pipeline: an input channel feeding a
// Batcher whose batches are forwarded, tagged with the subscription, onto
// one aggregated output consumed by the push sender. Routing keeps a
// per-zone cache of "could this endpoint ever care about this zone" so that
// dispatch only evaluates the exact rule for plausible endpoints.

use crate::batcher;
use crate::error::{AlertError, Result};
use crate::model::ZonedAlarmUpdate;
use crate::store::SubscriptionStore;
use crate::subscription::{is_subscribed_to, might_care, NotificationSettings, PushKeys, PushSubscription};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// One batch of updates to deliver to one push subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationFor {
    pub endpoint: String,
    pub keys: PushKeys,
    pub updates: Vec<ZonedAlarmUpdate>,
}

struct Subscriber {
    subscription: PushSubscription,
    /// `None` once the notifier has shut down
    input: Option<mpsc::Sender<ZonedAlarmUpdate>>,
}

/// Endpoint -> might care, computed per zone on first use.
type ZoneRegistration = HashMap<String, bool>;

#[derive(Default)]
struct Routing {
    subscribers: HashMap<String, Subscriber>,
    zones: HashMap<String, ZoneRegistration>,
}

impl Routing {
    fn patch_registrations(&mut self, endpoint: &str, settings: &NotificationSettings) {
        for (zone, registration) in self.zones.iter_mut() {
            registration.insert(endpoint.to_string(), might_care(zone, settings));
        }
    }
}

struct Inner {
    routing: RwLock<Routing>,
    store: Arc<dyn SubscriptionStore>,
    output: Mutex<Option<mpsc::Sender<NotificationFor>>>,
    pipelines: Mutex<Vec<JoinHandle<()>>>,
    batch_period: Duration,
    capacity: usize,
}

/// Routes filtered alarm updates to the pipelines of interested subscribers.
#[derive(Clone)]
pub struct Notifier {
    inner: Arc<Inner>,
}

impl Notifier {
    /// Create a notifier and the receiving end of its aggregated output.
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        batch_period: Duration,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<NotificationFor>) {
        let (output, output_rx) = mpsc::channel(capacity);
        let notifier = Self {
            inner: Arc::new(Inner {
                routing: RwLock::new(Routing::default()),
                store,
                output: Mutex::new(Some(output)),
                pipelines: Mutex::new(Vec::new()),
                batch_period,
                capacity,
            }),
        };
        (notifier, output_rx)
    }

    /// Register every subscription found in the store.
    pub async fn restore(&self) -> Result<usize> {
        let stored = self.inner.store.load_all().await?;
        let mut restored = 0;
        for subscription in stored {
            let endpoint = subscription.endpoint.clone();
            match self.install(subscription) {
                Ok(()) => restored += 1,
                Err(e) => warn!("Skipping stored subscription {}: {}", endpoint, e),
            }
        }
        info!("Restored {} push subscriptions", restored);
        Ok(restored)
    }

    /// Validate, store and persist a subscription, starting its pipeline.
    pub async fn register_push_subscription(&self, subscription: PushSubscription) -> Result<()> {
        self.install(subscription.clone())?;
        info!("Registered push subscription {}", subscription.endpoint);
        self.persist(&subscription).await;
        Ok(())
    }

    /// Replace the settings of a registered endpoint.
    pub async fn update_push_subscription(
        &self,
        endpoint: &str,
        settings: NotificationSettings,
    ) -> Result<()> {
        let subscription = {
            let mut guard = self.inner.routing.write();
            let routing = &mut *guard;
            let subscriber = routing
                .subscribers
                .get_mut(endpoint)
                .ok_or_else(|| AlertError::SubscriptionNotFound(endpoint.to_string()))?;
            subscriber.subscription.settings = settings;
            let subscription = subscriber.subscription.clone();
            routing.patch_registrations(endpoint, &subscription.settings);
            subscription
        };
        debug!("Updated settings of {}", endpoint);
        self.persist(&subscription).await;
        Ok(())
    }

    /// Remove an endpoint, closing its pipeline.
    pub async fn unregister_push_subscription(&self, endpoint: &str) -> Result<()> {
        {
            let mut routing = self.inner.routing.write();
            if routing.subscribers.remove(endpoint).is_none() {
                return Err(AlertError::SubscriptionNotFound(endpoint.to_string()));
            }
            for registration in routing.zones.values_mut() {
                registration.remove(endpoint);
            }
        }
        info!("Unregistered push subscription {}", endpoint);
        if let Err(e) = self.inner.store.remove(endpoint).await {
            warn!("Failed to remove subscription {} from store: {}", endpoint, e);
        }
        Ok(())
    }

    pub fn subscription(&self, endpoint: &str) -> Option<PushSubscription> {
        self.inner
            .routing
            .read()
            .subscribers
            .get(endpoint)
            .map(|s| s.subscription.clone())
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.routing.read().subscribers.len()
    }

    fn install(&self, subscription: PushSubscription) -> Result<()> {
        subscription.validate()?;

        let mut routing = self.inner.routing.write();
        let existing = routing
            .subscribers
            .get(&subscription.endpoint)
            .filter(|s| s.subscription.keys == subscription.keys)
            .and_then(|s| s.input.clone());
        let input = match existing {
            Some(input) => Some(input),
            None => self.spawn_pipeline(&subscription),
        };

        routing.patch_registrations(&subscription.endpoint, &subscription.settings);
        routing.subscribers.insert(
            subscription.endpoint.clone(),
            Subscriber {
                subscription,
                input,
            },
        );
        Ok(())
    }

    fn spawn_pipeline(&self, subscription: &PushSubscription) -> Option<mpsc::Sender<ZonedAlarmUpdate>> {
        let Some(output) = self.inner.output.lock().clone() else {
            warn!("Notifier is shut down, no pipeline for {}", subscription.endpoint);
            return None;
        };

        let (input, mut batches, batcher) =
            batcher::spawn(self.inner.batch_period, self.inner.capacity);
        let endpoint = subscription.endpoint.clone();
        let keys = subscription.keys.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(updates) = batches.recv().await {
                let notification = NotificationFor {
                    endpoint: endpoint.clone(),
                    keys: keys.clone(),
                    updates,
                };
                if output.send(notification).await.is_err() {
                    break;
                }
            }
            debug!("Pipeline for {} closed", endpoint);
        });

        let mut pipelines = self.inner.pipelines.lock();
        pipelines.retain(|handle| !handle.is_finished());
        pipelines.push(batcher);
        pipelines.push(forwarder);
        Some(input)
    }

    async fn persist(&self, subscription: &PushSubscription) {
        if let Err(e) = self.inner.store.save(subscription).await {
            warn!("Failed to persist subscription {}: {}", subscription.endpoint, e);
        }
    }

    /// Dispatch every incoming update until `incoming` closes, then close
    /// all subscriber pipelines and wait for them to drain. The aggregated
    /// output is closed when this returns.
    pub async fn run(&self, mut incoming: mpsc::Receiver<ZonedAlarmUpdate>) {
        info!("Notifier started");
        let mut handlers = JoinSet::new();

        loop {
            tokio::select! {
                received = incoming.recv() => match received {
                    Some(update) => {
                        handlers.spawn(handle(self.inner.clone(), update));
                    }
                    None => break,
                },
                Some(finished) = handlers.join_next(), if !handlers.is_empty() => {
                    if let Err(e) = finished {
                        error!("Notification dispatch failed: {}", e);
                    }
                }
            }
        }

        while let Some(finished) = handlers.join_next().await {
            if let Err(e) = finished {
                error!("Notification dispatch failed: {}", e);
            }
        }

        drop(self.inner.output.lock().take());
        for subscriber in self.inner.routing.write().subscribers.values_mut() {
            subscriber.input = None;
        }
        let pipelines = std::mem::take(&mut *self.inner.pipelines.lock());
        for pipeline in pipelines {
            if let Err(e) = pipeline.await {
                error!("Subscriber pipeline failed: {}", e);
            }
        }
        info!("Notifier stopped");
    }
}

/// Route one update to every eligible subscriber pipeline.
async fn handle(inner: Arc<Inner>, update: ZonedAlarmUpdate) {
    let zone = update.zone.as_str();

    let registered = inner.routing.read().zones.contains_key(zone);
    if !registered {
        let mut guard = inner.routing.write();
        let routing = &mut *guard;
        routing.zones.entry(zone.to_string()).or_insert_with(|| {
            debug!("Building registration for zone {}", zone);
            routing
                .subscribers
                .iter()
                .map(|(endpoint, s)| (endpoint.clone(), might_care(zone, &s.subscription.settings)))
                .collect()
        });
    }

    let targets: Vec<mpsc::Sender<ZonedAlarmUpdate>> = {
        let routing = inner.routing.read();
        let Some(registration) = routing.zones.get(zone) else {
            return;
        };
        registration
            .iter()
            .filter(|(_, care)| **care)
            .filter_map(|(endpoint, _)| routing.subscribers.get(endpoint))
            .filter(|s| is_subscribed_to(zone, update.update.level, &s.subscription.settings))
            .filter_map(|s| s.input.clone())
            .collect()
    };

    for target in targets {
        if target.send(update.clone()).await.is_err() {
            debug!("Subscriber pipeline closed while dispatching {}", update.composite_id());
        }
    }
}
