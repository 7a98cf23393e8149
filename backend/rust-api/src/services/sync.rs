use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use crate::config::{SyncConfig, SyncMode};
use crate::metrics::PERSISTENCE_FAILURES_TOTAL;
use crate::models::{AnswerAttempt, StudySessionRecord, SyncOutcome};
use crate::store::{to_row, Query, Row, Store, StoreError, STUDY_SESSIONS, USER_ANSWERS};
use crate::utils::{retry_if, RetryPolicy};

/// Per-session count of writes that never reached the store.
///
/// Entries go away once the session's final write ran, or after `ttl`
/// without a new failure (the session cache lifetime).
#[derive(Debug)]
pub struct SyncLedger {
    failures: Mutex<HashMap<String, (u32, Instant)>>,
    ttl: Duration,
}

impl SyncLedger {
    pub fn new(ttl: Duration) -> Self {
        Self {
            failures: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, (u32, Instant)>> {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record_failure(&self, session_id: &str) {
        let now = Instant::now();
        let mut entries = self.entries();
        entries.retain(|_, (_, touched)| now.duration_since(*touched) < self.ttl);
        let entry = entries.entry(session_id.to_string()).or_insert((0, now));
        entry.0 += 1;
        entry.1 = now;
    }

    pub fn failures(&self, session_id: &str) -> u32 {
        match self.entries().get(session_id) {
            Some((count, touched)) if touched.elapsed() < self.ttl => *count,
            _ => 0,
        }
    }

    pub fn forget(&self, session_id: &str) {
        self.entries().remove(session_id);
    }
}

/// A change of local session state that must be mirrored in the store.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    Answer {
        attempt: AnswerAttempt,
        progress: StudySessionRecord,
    },
    Progress(StudySessionRecord),
}

impl SyncEvent {
    fn session_id(&self) -> &str {
        match self {
            SyncEvent::Answer { progress, .. } | SyncEvent::Progress(progress) => &progress.id,
        }
    }

    /// Whether no write for this session follows this one.
    fn is_final(&self) -> bool {
        matches!(self, SyncEvent::Progress(_))
    }

    fn operation(&self) -> &'static str {
        match self {
            SyncEvent::Answer { .. } => "answer",
            SyncEvent::Progress(p) if p.completed_at.is_some() => "complete",
            SyncEvent::Progress(_) => "progress",
        }
    }
}

/// Target of a progress patch. Writes may land out of order (retries,
/// concurrent background tasks), so a patch only applies to a row that has
/// not seen a later state: answer patches need fewer recorded answers, final
/// patches need an open row with no more answers than they carry.
fn progress_target(event: &SyncEvent) -> Query {
    let (progress, is_final) = match event {
        SyncEvent::Answer { progress, .. } => (progress, false),
        SyncEvent::Progress(progress) => (progress, true),
    };
    let query = Query::table(STUDY_SESSIONS).eq("id", progress.id.as_str());
    if is_final {
        query
            .is_null("completed_at")
            .lte("questions_answered", progress.questions_answered)
    } else {
        query.lt("questions_answered", progress.questions_answered)
    }
}

fn progress_patch(progress: &StudySessionRecord) -> Row {
    let mut patch = Row::new();
    patch.insert("questions_answered".into(), json!(progress.questions_answered));
    patch.insert("correct_answers".into(), json!(progress.correct_answers));
    patch.insert("total_time_seconds".into(), json!(progress.total_time_seconds));
    if let Some(completed_at) = progress.completed_at {
        patch.insert("completed_at".into(), json!(completed_at));
    }
    patch
}

/// Pushes session progress to the store, in the background or inline
/// depending on [`SyncMode`].
#[derive(Clone)]
pub struct PersistenceSync {
    store: Arc<dyn Store>,
    ledger: Arc<SyncLedger>,
    mode: SyncMode,
    policy: RetryPolicy,
}

impl PersistenceSync {
    pub fn new(store: Arc<dyn Store>, ledger: Arc<SyncLedger>, config: &SyncConfig) -> Self {
        Self {
            store,
            ledger,
            mode: config.mode,
            policy: RetryPolicy::from_sync(config),
        }
    }

    /// Inserts the row of a new session. Always awaited: a session that
    /// could not be recorded is not opened.
    pub async fn open_session(&self, record: &StudySessionRecord) -> Result<(), StoreError> {
        let row = to_row(record)?;
        retry_if(&self.policy, StoreError::is_transient, || {
            self.store.insert(STUDY_SESSIONS, row.clone())
        })
        .await?;
        Ok(())
    }

    pub async fn push(&self, event: SyncEvent) -> SyncOutcome {
        match self.mode {
            SyncMode::Background => {
                self.spawn(event);
                SyncOutcome::Queued
            }
            SyncMode::Blocking => match self.run(&event).await {
                Ok(()) => SyncOutcome::Persisted,
                Err(e) => SyncOutcome::Failed {
                    error: e.code().to_string(),
                },
            },
        }
    }

    /// Runs the write on its own task. Failures are logged and counted.
    pub fn spawn(&self, event: SyncEvent) -> JoinHandle<Result<(), StoreError>> {
        let sync = self.clone();
        tokio::spawn(async move { sync.run(&event).await })
    }

    async fn run(&self, event: &SyncEvent) -> Result<(), StoreError> {
        let result = self.write(event).await;
        if let Err(e) = &result {
            PERSISTENCE_FAILURES_TOTAL
                .with_label_values(&[event.operation()])
                .inc();
            tracing::error!(
                session_id = event.session_id(),
                operation = event.operation(),
                backend = self.store.backend(),
                "Failed to persist session progress: {}",
                e
            );
        }

        if event.is_final() {
            self.ledger.forget(event.session_id());
        } else if result.is_err() {
            self.ledger.record_failure(event.session_id());
        }
        result
    }

    async fn write(&self, event: &SyncEvent) -> Result<(), StoreError> {
        let progress = match event {
            SyncEvent::Answer { attempt, progress } => {
                let row = to_row(attempt)?;
                retry_if(&self.policy, StoreError::is_transient, || {
                    self.store.insert(USER_ANSWERS, row.clone())
                })
                .await?;
                progress
            }
            SyncEvent::Progress(progress) => progress,
        };

        let query = progress_target(event);
        let patch = progress_patch(progress);
        let updated = retry_if(&self.policy, StoreError::is_transient, || {
            self.store.update(&query, patch.clone())
        })
        .await?;

        if updated.is_empty() {
            tracing::debug!(
                session_id = progress.id.as_str(),
                operation = event.operation(),
                answered = progress.questions_answered,
                "Stale session progress skipped"
            );
        } else {
            tracing::debug!(
                session_id = progress.id.as_str(),
                operation = event.operation(),
                "Session progress persisted"
            );
        }
        Ok(())
    }
}
