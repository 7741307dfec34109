// src/zones.rs
//
// One alarm namespace per zone: the climate and tracking producers of a
// zone share a single AlarmLogger, created by the first registration and
// dropped when the last producer unregisters.

use crate::alarm_log::{AlarmLogger, AlarmReport, SharedLogger};
use crate::error::{AlertError, Result};
use crate::model::{AlarmUpdate, Domain, FilterInput, ZonedAlarmUpdate};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

struct ZoneEntry {
    logger: SharedLogger,
    producers: HashSet<Domain>,
}

struct Inner {
    zones: RwLock<HashMap<String, ZoneEntry>>,
    filter: Mutex<Option<mpsc::Sender<FilterInput>>>,
}

impl Inner {
    fn filter(&self) -> Result<mpsc::Sender<FilterInput>> {
        self.filter
            .lock()
            .clone()
            .ok_or(AlertError::ChannelClosed("filter input"))
    }
}

/// Registry of the zones currently fed by remote stations.
#[derive(Clone)]
pub struct ZoneRegistry {
    inner: Arc<Inner>,
}

impl ZoneRegistry {
    pub fn new(filter: mpsc::Sender<FilterInput>) -> Self {
        Self {
            inner: Arc::new(Inner {
                zones: RwLock::new(HashMap::new()),
                filter: Mutex::new(Some(filter)),
            }),
        }
    }

    /// Attach a producer of `domain` to `zone`.
    ///
    /// A domain registering again for a zone it already feeds starts over:
    /// its previous history in the zone logger is discarded.
    pub fn register(&self, zone: &str, domain: Domain) -> ZoneFeed {
        let mut zones = self.inner.zones.write();
        let entry = zones.entry(zone.to_string()).or_insert_with(|| {
            info!("Zone {} registered", zone);
            ZoneEntry {
                logger: AlarmLogger::shared(),
                producers: HashSet::new(),
            }
        });

        if !entry.producers.insert(domain) {
            let cleared = entry.logger.write().clear_domain(domain);
            debug!("Re-registration of {:?} in {} cleared {} logs", domain, zone, cleared);
        }

        ZoneFeed {
            zone: zone.to_string(),
            domain,
            logger: entry.logger.clone(),
            registry: self.inner.clone(),
        }
    }

    /// Detach a producer. Returns true when this tore the zone down, in
    /// which case the filter is told to forget the zone.
    pub async fn unregister(&self, zone: &str, domain: Domain) -> Result<bool> {
        let torn_down = {
            let mut zones = self.inner.zones.write();
            let Some(entry) = zones.get_mut(zone) else {
                return Ok(false);
            };
            entry.producers.remove(&domain);
            if entry.producers.is_empty() {
                zones.remove(zone);
                true
            } else {
                false
            }
        };

        if torn_down {
            info!("Zone {} unregistered", zone);
            self.inner
                .filter()?
                .send(FilterInput::ClearZone(zone.to_string()))
                .await
                .map_err(|_| AlertError::ChannelClosed("filter input"))?;
        }
        Ok(torn_down)
    }

    /// Forward a station service event to the filter. Service events have
    /// no history of their own.
    pub async fn push_service_event(&self, update: AlarmUpdate) -> Result<()> {
        self.inner
            .filter()?
            .send(ZonedAlarmUpdate::service(update).into())
            .await
            .map_err(|_| AlertError::ChannelClosed("filter input"))
    }

    pub fn logger(&self, zone: &str) -> Option<SharedLogger> {
        self.inner.zones.read().get(zone).map(|e| e.logger.clone())
    }

    pub fn alarm_report(&self, zone: &str) -> Option<Vec<AlarmReport>> {
        self.logger(zone).map(|logger| logger.read().report())
    }

    /// Active (warnings, emergencies) of a zone.
    pub fn active_alarms_count(&self, zone: &str) -> Option<(usize, usize)> {
        self.logger(zone).map(|logger| logger.read().active_alarms_count())
    }

    pub fn zones(&self) -> Vec<String> {
        let mut zones: Vec<String> = self.inner.zones.read().keys().cloned().collect();
        zones.sort();
        zones
    }

    /// Drop history that ended before `cutoff` in every zone.
    pub fn prune_before(&self, cutoff: DateTime<Utc>) {
        let loggers: Vec<SharedLogger> = self
            .inner
            .zones
            .read()
            .values()
            .map(|e| e.logger.clone())
            .collect();
        for logger in loggers {
            logger.write().prune_before(cutoff);
        }
    }

    /// Release the filter input. Feeds fail with `ChannelClosed` afterwards.
    pub(crate) fn close(&self) {
        self.inner.filter.lock().take();
    }
}

/// Handle through which one producer reports the alarms of its zone.
pub struct ZoneFeed {
    zone: String,
    domain: Domain,
    logger: SharedLogger,
    registry: Arc<Inner>,
}

impl ZoneFeed {
    pub fn zone(&self) -> &str {
        &self.zone
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    pub fn logger(&self) -> &SharedLogger {
        &self.logger
    }

    /// Record a batch into the zone history and forward every update to
    /// the filter.
    ///
    /// A feed whose zone was unregistered, or whose producer was replaced
    /// by a newer zone entry, is stale: nothing is recorded or forwarded.
    pub async fn push(&self, updates: &[AlarmUpdate]) -> Result<()> {
        {
            let zones = self.registry.zones.read();
            let registered = zones.get(&self.zone).is_some_and(|entry| {
                entry.producers.contains(&self.domain) && Arc::ptr_eq(&entry.logger, &self.logger)
            });
            if !registered {
                debug!("Dropping push on stale feed {}/{:?}", self.zone, self.domain);
                return Err(AlertError::ChannelClosed("zone unregistered"));
            }
            self.logger.write().push_alarms_from(Some(self.domain), updates);
        }

        let filter = self.registry.filter()?;
        for update in updates {
            let zoned = ZonedAlarmUpdate::new(self.zone.clone(), update.clone());
            filter
                .send(zoned.into())
                .await
                .map_err(|_| AlertError::ChannelClosed("filter input"))?;
        }
        Ok(())
    }
}
