// File: src/filter.rs
// Debounce and hysteresis stage of the notification branch
//
// An ON update is held back ("staged") until it has been on for the minimum
// duration, then forwarded and remembered as fired. While fired, repeats at
// the same or a lower level are dropped; only an escalation notifies again.
// An OFF update forgets the alarm, so the next episode notifies afresh.
//
//          ON                 age >= minimum_on
//  Idle ───────► Staged ─────────────────────────► Fired
//   ▲              │                                 │
//   │   OFF/clear  │            OFF/clear            │
//   └──────────────┴─────────────────────────────────┘

use crate::clock::{Clock, TokioClock};
use crate::model::{AlarmLevel, FilterInput, ZonedAlarmUpdate};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace, warn};

pub struct UpdateFilter<C: Clock = TokioClock> {
    minimum_on: chrono::Duration,
    clock: C,
    /// Composite id -> newest not yet forwarded update
    staged: HashMap<String, ZonedAlarmUpdate>,
    /// Composite id -> level last forwarded downstream
    fired: HashMap<String, AlarmLevel>,
    deadline: Option<Instant>,
}

impl UpdateFilter<TokioClock> {
    pub fn new(minimum_on: Duration) -> Self {
        Self::with_clock(minimum_on, TokioClock::new())
    }
}

impl<C: Clock> UpdateFilter<C> {
    pub fn with_clock(minimum_on: Duration, clock: C) -> Self {
        let minimum_on = chrono::Duration::from_std(minimum_on)
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        Self {
            minimum_on,
            clock,
            staged: HashMap::new(),
            fired: HashMap::new(),
            deadline: None,
        }
    }

    /// Run until `input` closes, forwarding updates that proved persistent.
    ///
    /// On shutdown `output` is closed and staged updates are discarded.
    pub async fn run(
        mut self,
        mut input: mpsc::Receiver<FilterInput>,
        output: mpsc::Sender<ZonedAlarmUpdate>,
    ) {
        info!("Update filter started (minimum on: {}s)", self.minimum_on.num_seconds());

        loop {
            let deadline = self.deadline;
            let timer = async move {
                match deadline {
                    Some(deadline) => sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                received = input.recv() => match received {
                    Some(event) => self.handle(event),
                    None => break,
                },
                _ = timer => {
                    if !self.fire_ripe(&output).await {
                        warn!("Update filter output closed, stopping");
                        return;
                    }
                }
            }
        }

        info!(
            "Update filter stopped, discarding {} staged updates",
            self.staged.len()
        );
    }

    fn handle(&mut self, event: FilterInput) {
        match event {
            FilterInput::Update(update) => self.handle_update(update),
            FilterInput::ClearZone(zone) => self.clear_zone(&zone),
        }
    }

    fn handle_update(&mut self, update: ZonedAlarmUpdate) {
        let id = update.composite_id();

        if !update.update.is_on() {
            let staged = self.staged.remove(&id).is_some();
            let fired = self.fired.remove(&id).is_some();
            if staged || fired {
                debug!("Alarm {} went off, forgetting it", id);
            }
            return;
        }

        if let Some(&fired_level) = self.fired.get(&id) {
            if update.update.level <= fired_level {
                trace!("Suppressing repeat of {} at {}", id, update.update.level);
                return;
            }
            debug!("Alarm {} escalated from {} to {}", id, fired_level, update.update.level);
        }

        if let Some(staged) = self.staged.get_mut(&id) {
            staged.update.level = update.update.level;
            if !update.update.description.is_empty() {
                staged.update.description = update.update.description;
            }
            return;
        }

        let deadline = self.clock.instant_at(update.update.time + self.minimum_on);
        if self.deadline.map_or(true, |armed| deadline < armed) {
            self.deadline = Some(deadline);
        }
        debug!("Staged alarm {} at {}", id, update.update.level);
        self.staged.insert(id, update);
    }

    fn clear_zone(&mut self, zone: &str) {
        let prefix = format!("{}/", zone);
        self.fired.retain(|id, _| !id.starts_with(&prefix));
        self.staged.retain(|id, _| !id.starts_with(&prefix));
        debug!("Cleared filter memory of zone {}", zone);
    }

    /// Forward every staged update older than the minimum duration and
    /// re-arm the timer for the earliest one still waiting. Returns `false`
    /// once the output is closed.
    async fn fire_ripe(&mut self, output: &mpsc::Sender<ZonedAlarmUpdate>) -> bool {
        self.deadline = None;
        let now = self.clock.now();

        let mut ripe: Vec<String> = self
            .staged
            .iter()
            .filter(|(_, staged)| now - staged.update.time >= self.minimum_on)
            .map(|(id, _)| id.clone())
            .collect();
        ripe.sort_by_key(|id| self.staged[id].update.time);

        for id in ripe {
            let Some(update) = self.staged.remove(&id) else {
                continue;
            };
            let level = update.update.level;
            if output.send(update).await.is_err() {
                return false;
            }
            debug!("Fired alarm {} at {}", id, level);
            self.fired.insert(id, level);
        }

        self.deadline = self
            .staged
            .values()
            .map(|staged| staged.update.time)
            .min()
            .map(|earliest| self.clock.instant_at(earliest + self.minimum_on));
        true
    }
}
