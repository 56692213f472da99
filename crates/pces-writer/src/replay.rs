use crate::config::PcesConfig;
use chrono::{DateTime, TimeDelta, Utc};
use pces_common::Time;
use pces_core::{PcesEvent, Result};
use std::sync::Arc;
use std::time::Duration;

/// Outcome of a replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayStats {
    pub event_count: u64,
    pub elapsed: Duration,
}

/// Pushes the events persisted before a restart to downstream consumers.
pub struct PcesReplayer {
    time: Arc<dyn Time>,
    minimum_interval: Option<TimeDelta>,
}

impl PcesReplayer {
    pub fn new(time: Arc<dyn Time>) -> Self {
        Self {
            time,
            minimum_interval: None,
        }
    }

    pub fn from_config(config: &PcesConfig, time: Arc<dyn Time>) -> Self {
        let replayer = Self::new(time);
        if config.limit_replay_frequency {
            replayer.with_max_frequency(config.max_event_replay_frequency)
        } else {
            replayer
        }
    }

    /// Replays at most `events_per_second` events, as measured by the clock.
    pub fn with_max_frequency(mut self, events_per_second: u64) -> Self {
        self.minimum_interval = (events_per_second > 0).then(|| {
            let nanos = 1_000_000_000 / events_per_second.min(1_000_000_000);
            TimeDelta::nanoseconds(nanos as i64)
        });
        self
    }

    /// Hands every event to `sink` in stream order, then runs each flush
    /// barrier so downstream stages have drained the replayed events before
    /// this returns.
    pub fn replay<I, S>(
        &self,
        events: I,
        mut sink: S,
        flush_barriers: &mut [&mut dyn FnMut() -> Result<()>],
    ) -> Result<ReplayStats>
    where
        I: IntoIterator<Item = Result<PcesEvent>>,
        S: FnMut(PcesEvent) -> Result<()>,
    {
        let start = self.time.now();
        let mut next_allowed: Option<DateTime<Utc>> = None;
        let mut event_count = 0u64;

        for event in events {
            let event = event?;

            if let Some(interval) = self.minimum_interval {
                let now = self.time.now();
                if let Some(allowed) = next_allowed {
                    if let Ok(wait) = (allowed - now).to_std() {
                        self.time.sleep(wait);
                    }
                }
                next_allowed = Some(next_allowed.map_or(now, |allowed| allowed.max(now)) + interval);
            }

            sink(event)?;
            event_count += 1;
        }

        for barrier in flush_barriers.iter_mut() {
            barrier()?;
        }

        let elapsed = (self.time.now() - start).to_std().unwrap_or_default();
        let rate = if elapsed.is_zero() {
            0.0
        } else {
            event_count as f64 / elapsed.as_secs_f64()
        };
        tracing::info!(
            event_count,
            elapsed = %humantime::format_duration(elapsed),
            events_per_second = rate,
            "replayed preconsensus events"
        );

        Ok(ReplayStats {
            event_count,
            elapsed,
        })
    }
}
