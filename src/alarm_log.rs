// File: src/alarm_log.rs
// Alarm history for a zone
//
// Every alarm update is recorded here, unfiltered. Each identification keeps
// a time-sorted list of on/off transitions from which the on/off intervals
// served to the query layer are derived.

use crate::model::{AlarmLevel, AlarmUpdate, Domain};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::trace;

/// Alarm logger shared by the producers of one zone.
pub type SharedLogger = Arc<RwLock<AlarmLogger>>;

// ==========================================
// SECTION 1: TIMEPOINTS AND EVENTS
// ==========================================

/// A single state transition of one alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmTimepoint {
    pub time: DateTime<Utc>,
    pub on: bool,
}

/// An interval during which an alarm was active. `end` is `None` while the
/// alarm is still on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AlarmEvent {
    pub start: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

/// Historical view of one alarm for the query layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlarmReport {
    pub identification: String,
    pub level: AlarmLevel,
    pub description: String,
    pub events: Vec<AlarmEvent>,
}

// ==========================================
// SECTION 2: PER-ALARM LOG
// ==========================================

#[derive(Debug, Clone)]
pub struct AlarmLog {
    identification: String,
    level: AlarmLevel,
    domain: Option<Domain>,
    description: String,
    timepoints: Vec<AlarmTimepoint>,
}

impl AlarmLog {
    pub fn new(identification: impl Into<String>, level: AlarmLevel) -> Self {
        Self {
            identification: identification.into(),
            level,
            domain: None,
            description: String::new(),
            timepoints: Vec::new(),
        }
    }

    pub fn identification(&self) -> &str {
        &self.identification
    }

    pub fn level(&self) -> AlarmLevel {
        self.level
    }

    pub fn domain(&self) -> Option<Domain> {
        self.domain
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn timepoints(&self) -> &[AlarmTimepoint] {
        &self.timepoints
    }

    /// Whether the chronologically last transition switched the alarm on.
    pub fn on(&self) -> bool {
        self.timepoints.last().map(|tp| tp.on).unwrap_or(false)
    }

    /// Record an update at its chronological position.
    ///
    /// Updates with equal timestamps keep their arrival order. The
    /// description only changes when the update carries one and either no
    /// description is known yet or the update is the newest entry, so a
    /// late backfill cannot overwrite the current text.
    pub fn push_update(&mut self, update: &AlarmUpdate) {
        let position = self.timepoints.partition_point(|tp| tp.time <= update.time);
        self.timepoints.insert(
            position,
            AlarmTimepoint {
                time: update.time,
                on: update.is_on(),
            },
        );

        let newest = position + 1 == self.timepoints.len();
        if !update.description.is_empty() && (self.description.is_empty() || newest) {
            self.description = update.description.clone();
        }
    }

    /// Pair transitions into intervals in a single scan.
    ///
    /// Transitions that do not flip the state (an "off" with no open start,
    /// an "on" while one is already open) are ignored.
    pub fn build_events(&self) -> Vec<AlarmEvent> {
        let mut events = Vec::new();
        let mut start: Option<DateTime<Utc>> = None;

        for tp in &self.timepoints {
            match (tp.on, start) {
                (true, None) => start = Some(tp.time),
                (false, Some(s)) => {
                    events.push(AlarmEvent {
                        start: s,
                        end: Some(tp.time),
                    });
                    start = None;
                }
                _ => {}
            }
        }

        if let Some(s) = start {
            events.push(AlarmEvent { start: s, end: None });
        }
        events
    }

    /// Minimal form: starts with "on" and strictly alternates.
    fn is_alternating(&self) -> bool {
        match self.timepoints.first() {
            None => true,
            Some(first) if !first.on => false,
            Some(_) => self.timepoints.windows(2).all(|w| w[0].on != w[1].on),
        }
    }

    /// Collapse repeated states into the minimal alternating list.
    pub fn decimate(&mut self) {
        if self.is_alternating() {
            return;
        }
        let before = self.timepoints.len();
        self.timepoints = timepoints_from_events(&self.build_events());
        trace!(
            "Decimated alarm {} from {} to {} timepoints",
            self.identification,
            before,
            self.timepoints.len()
        );
    }

    /// Drop intervals that closed before `cutoff`. The open interval, if
    /// any, is always kept.
    pub fn prune_before(&mut self, cutoff: DateTime<Utc>) {
        let events: Vec<AlarmEvent> = self
            .build_events()
            .into_iter()
            .filter(|e| e.end.map_or(true, |end| end >= cutoff))
            .collect();
        self.timepoints = timepoints_from_events(&events);
    }

    pub fn report(&self) -> AlarmReport {
        AlarmReport {
            identification: self.identification.clone(),
            level: self.level,
            description: self.description.clone(),
            events: self.build_events(),
        }
    }
}

fn timepoints_from_events(events: &[AlarmEvent]) -> Vec<AlarmTimepoint> {
    let mut timepoints = Vec::with_capacity(events.len() * 2);
    for event in events {
        timepoints.push(AlarmTimepoint {
            time: event.start,
            on: true,
        });
        if let Some(end) = event.end {
            timepoints.push(AlarmTimepoint { time: end, on: false });
        }
    }
    timepoints
}

// ==========================================
// SECTION 3: ZONE LOGGER
// ==========================================

/// All alarm logs of one zone, keyed by identification.
#[derive(Debug, Default)]
pub struct AlarmLogger {
    logs: HashMap<String, AlarmLog>,
    active_warnings: usize,
    active_emergencies: usize,
}

impl AlarmLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedLogger {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Record a batch of updates without any filtering.
    pub fn push_alarms(&mut self, updates: &[AlarmUpdate]) {
        self.push_alarms_from(None, updates);
    }

    /// Record a batch of updates reported by `domain`.
    ///
    /// Updates without an identification are dropped. Logs are created on
    /// first sight with the level of that first update.
    pub fn push_alarms_from(&mut self, domain: Option<Domain>, updates: &[AlarmUpdate]) {
        let mut grouped: BTreeMap<&str, Vec<&AlarmUpdate>> = BTreeMap::new();
        for update in updates {
            if update.identification.is_empty() {
                continue;
            }
            grouped.entry(update.identification.as_str()).or_default().push(update);
        }

        for (identification, updates) in &grouped {
            let log = self
                .logs
                .entry((*identification).to_string())
                .or_insert_with(|| AlarmLog::new(*identification, updates[0].level));
            if log.domain.is_none() {
                log.domain = domain;
            }
            for update in updates {
                log.push_update(update);
            }
        }

        self.recount();

        for identification in grouped.keys() {
            if let Some(log) = self.logs.get_mut(*identification) {
                log.decimate();
            }
        }
    }

    fn recount(&mut self) {
        let mut warnings = 0;
        let mut emergencies = 0;
        for log in self.logs.values().filter(|log| log.on()) {
            match log.level {
                AlarmLevel::Warning => warnings += 1,
                AlarmLevel::Emergency => emergencies += 1,
            }
        }
        self.active_warnings = warnings;
        self.active_emergencies = emergencies;
    }

    /// `(active warnings, active emergencies)`
    pub fn active_alarms_count(&self) -> (usize, usize) {
        (self.active_warnings, self.active_emergencies)
    }

    pub fn log(&self, identification: &str) -> Option<&AlarmLog> {
        self.logs.get(identification)
    }

    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }

    /// Reports for every alarm, sorted by identification.
    pub fn report(&self) -> Vec<AlarmReport> {
        let mut reports: Vec<AlarmReport> = self.logs.values().map(AlarmLog::report).collect();
        reports.sort_by(|a, b| a.identification.cmp(&b.identification));
        reports
    }

    /// Forget every alarm reported by `domain`.
    pub fn clear_domain(&mut self, domain: Domain) -> usize {
        let before = self.logs.len();
        self.logs.retain(|_, log| log.domain != Some(domain));
        self.recount();
        before - self.logs.len()
    }

    /// Drop history that ended before `cutoff`; alarms left without any
    /// history are forgotten.
    pub fn prune_before(&mut self, cutoff: DateTime<Utc>) {
        for log in self.logs.values_mut() {
            log.prune_before(cutoff);
        }
        self.logs.retain(|_, log| !log.timepoints.is_empty());
        self.recount();
    }
}

// ==========================================
// SECTION 4: TESTS
// ==========================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AlarmStatus;
    use chrono::{Duration, TimeZone};

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn update(id: &str, status: AlarmStatus, minute: i64) -> AlarmUpdate {
        AlarmUpdate::new(id, AlarmLevel::Warning, status, at(minute))
    }

    #[test]
    fn test_out_of_order_insertion() {
        let mut log = AlarmLog::new("temp", AlarmLevel::Warning);
        log.push_update(&update("temp", AlarmStatus::On, 0));
        log.push_update(&update("temp", AlarmStatus::On, 20));
        log.push_update(&update("temp", AlarmStatus::Off, 10));

        let times: Vec<_> = log.timepoints().iter().map(|tp| tp.time).collect();
        assert_eq!(times, vec![at(0), at(10), at(20)]);
        assert!(log.on());
        assert_eq!(
            log.build_events(),
            vec![
                AlarmEvent { start: at(0), end: Some(at(10)) },
                AlarmEvent { start: at(20), end: None },
            ]
        );
    }

    #[test]
    fn test_build_events_ignores_repeated_states() {
        let mut log = AlarmLog::new("door", AlarmLevel::Emergency);
        for (status, minute) in [
            (AlarmStatus::Off, 0),
            (AlarmStatus::On, 1),
            (AlarmStatus::On, 2),
            (AlarmStatus::Off, 3),
            (AlarmStatus::Off, 4),
        ] {
            log.push_update(&update("door", status, minute));
        }
        assert_eq!(log.build_events(), vec![AlarmEvent { start: at(1), end: Some(at(3)) }]);
        assert!(!log.on());
    }

    #[test]
    fn test_decimate_collapses_duplicates() {
        let mut log = AlarmLog::new("door", AlarmLevel::Warning);
        for (status, minute) in [
            (AlarmStatus::Off, 0),
            (AlarmStatus::On, 1),
            (AlarmStatus::On, 2),
            (AlarmStatus::Off, 3),
            (AlarmStatus::On, 5),
        ] {
            log.push_update(&update("door", status, minute));
        }
        let events = log.build_events();
        log.decimate();
        assert_eq!(log.timepoints().len(), 3);
        assert_eq!(log.build_events(), events);

        let once = log.timepoints().to_vec();
        log.decimate();
        assert_eq!(log.timepoints(), once.as_slice());
    }

    #[test]
    fn test_description_backfill_does_not_clobber() {
        let mut log = AlarmLog::new("humidity", AlarmLevel::Warning);
        log.push_update(&update("humidity", AlarmStatus::On, 10).with_description("current"));
        log.push_update(&update("humidity", AlarmStatus::On, 5).with_description("stale"));
        assert_eq!(log.description(), "current");

        log.push_update(&update("humidity", AlarmStatus::On, 15));
        assert_eq!(log.description(), "current");

        log.push_update(&update("humidity", AlarmStatus::Off, 20).with_description("newest"));
        assert_eq!(log.description(), "newest");
    }

    #[test]
    fn test_description_fills_when_missing() {
        let mut log = AlarmLog::new("humidity", AlarmLevel::Warning);
        log.push_update(&update("humidity", AlarmStatus::On, 10));
        log.push_update(&update("humidity", AlarmStatus::On, 5).with_description("backfill"));
        assert_eq!(log.description(), "backfill");
    }

    #[test]
    fn test_logger_counts_by_level() {
        let mut logger = AlarmLogger::new();
        logger.push_alarms(&[
            update("a", AlarmStatus::On, 0),
            AlarmUpdate::new("b", AlarmLevel::Emergency, AlarmStatus::On, at(0)),
            AlarmUpdate::new("c", AlarmLevel::Emergency, AlarmStatus::On, at(0)),
            update("", AlarmStatus::On, 0),
        ]);
        assert_eq!(logger.len(), 3);
        assert_eq!(logger.active_alarms_count(), (1, 2));

        logger.push_alarms(&[AlarmUpdate::new("c", AlarmLevel::Emergency, AlarmStatus::Off, at(1))]);
        assert_eq!(logger.active_alarms_count(), (1, 1));
    }

    #[test]
    fn test_log_keeps_seeded_level() {
        let mut logger = AlarmLogger::new();
        logger.push_alarms(&[update("a", AlarmStatus::On, 0)]);
        logger.push_alarms(&[AlarmUpdate::new("a", AlarmLevel::Emergency, AlarmStatus::On, at(1))]);
        assert_eq!(logger.log("a").unwrap().level(), AlarmLevel::Warning);
        assert_eq!(logger.active_alarms_count(), (1, 0));
    }

    #[test]
    fn test_push_decimates_touched_logs() {
        let mut logger = AlarmLogger::new();
        logger.push_alarms(&[
            update("a", AlarmStatus::On, 0),
            update("a", AlarmStatus::On, 1),
            update("a", AlarmStatus::On, 2),
        ]);
        assert_eq!(logger.log("a").unwrap().timepoints().len(), 1);
    }

    #[test]
    fn test_clear_domain() {
        let mut logger = AlarmLogger::new();
        logger.push_alarms_from(Some(Domain::Climate), &[update("temp", AlarmStatus::On, 0)]);
        logger.push_alarms_from(Some(Domain::Tracking), &[update("gps", AlarmStatus::On, 0)]);
        assert_eq!(logger.active_alarms_count(), (2, 0));

        assert_eq!(logger.clear_domain(Domain::Climate), 1);
        assert!(logger.log("temp").is_none());
        assert!(logger.log("gps").is_some());
        assert_eq!(logger.active_alarms_count(), (1, 0));
    }

    #[test]
    fn test_prune_keeps_open_and_recent_events() {
        let mut logger = AlarmLogger::new();
        logger.push_alarms(&[
            update("old", AlarmStatus::On, 0),
            update("old", AlarmStatus::Off, 5),
            update("mixed", AlarmStatus::On, 0),
            update("mixed", AlarmStatus::Off, 5),
            update("mixed", AlarmStatus::On, 30),
            update("mixed", AlarmStatus::Off, 40),
            update("open", AlarmStatus::On, 0),
        ]);
        logger.prune_before(at(20));

        assert!(logger.log("old").is_none());
        assert_eq!(
            logger.log("mixed").unwrap().build_events(),
            vec![AlarmEvent { start: at(30), end: Some(at(40)) }]
        );
        assert!(logger.log("open").unwrap().on());
        assert_eq!(logger.active_alarms_count(), (1, 0));
    }

    #[test]
    fn test_report_sorted_and_serializable() {
        let mut logger = AlarmLogger::new();
        logger.push_alarms(&[
            update("zeta", AlarmStatus::On, 0).with_description("Fan stopped"),
            update("alpha", AlarmStatus::On, 0),
            update("alpha", AlarmStatus::Off, 1),
        ]);
        let reports = logger.report();
        assert_eq!(reports[0].identification, "alpha");
        assert_eq!(reports[1].description, "Fan stopped");

        let json = serde_json::to_value(&reports[1]).unwrap();
        assert_eq!(json["level"], "warning");
        assert!(json["events"][0].get("end").is_none());
    }
}
