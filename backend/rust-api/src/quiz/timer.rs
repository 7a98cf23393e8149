use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wall-clock bookkeeping for one session.
///
/// Every reading takes `now` explicitly; clocks that go backwards read as
/// zero elapsed time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClock {
    pub started_at: DateTime<Utc>,
    pub question_started_at: DateTime<Utc>,
    /// Countdown length, simulated exams only.
    pub time_limit_seconds: Option<u32>,
    /// Frozen end of the session once it is finished.
    #[serde(default)]
    pub stopped_at: Option<DateTime<Utc>>,
}

impl SessionClock {
    pub fn start(now: DateTime<Utc>, time_limit_seconds: Option<u32>) -> Self {
        Self {
            started_at: now,
            question_started_at: now,
            time_limit_seconds,
            stopped_at: None,
        }
    }

    fn reading(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.stopped_at.unwrap_or(now)
    }

    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> u64 {
        seconds_between(self.started_at, self.reading(now))
    }

    pub fn question_elapsed_seconds(&self, now: DateTime<Utc>) -> u64 {
        seconds_between(self.question_started_at, self.reading(now))
    }

    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> Option<u32> {
        self.time_limit_seconds.map(|limit| {
            let elapsed = self.elapsed_seconds(now).min(u64::from(u32::MAX)) as u32;
            limit.saturating_sub(elapsed)
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.remaining_seconds(now) == Some(0)
    }

    /// Restarts per-question timing when a different question becomes current.
    pub fn restart_question(&mut self, now: DateTime<Utc>) {
        self.question_started_at = now;
    }

    pub fn stop(&mut self, now: DateTime<Utc>) {
        if self.stopped_at.is_none() {
            self.stopped_at = Some(now);
        }
    }
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    (to - from).num_seconds().max(0) as u64
}
