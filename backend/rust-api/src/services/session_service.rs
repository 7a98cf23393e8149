use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use validator::Validate;

use super::favorite_service::favorite_question_ids;
use super::session_cache::SessionCache;
use super::stats_service::missed_question_ids;
use super::sync::{PersistenceSync, SyncEvent, SyncLedger};
use super::AppState;
use crate::config::QuizSettings;
use crate::errors::QuizError;
use crate::metrics::{ANSWERS_SUBMITTED_TOTAL, SESSIONS_TOTAL};
use crate::models::{
    AnswerAttempt, AnswerResponse, CompletionResponse, CreateSessionRequest,
    CurrentQuestionResponse, NavigationResponse, SessionMode, SessionView, SubmitAnswerRequest,
    SyncOutcome,
};
use crate::quiz::{draw_questions, ActiveSession, Pool, SessionPlan, Step};
use crate::store::Store;

/// Orchestrates the quiz engine, the session cache and persistence.
pub struct SessionService {
    store: Arc<dyn Store>,
    cache: Arc<dyn SessionCache>,
    sync: PersistenceSync,
    ledger: Arc<SyncLedger>,
    settings: QuizSettings,
    ttl: Duration,
}

impl SessionService {
    pub fn new(state: &AppState) -> Self {
        Self {
            store: state.store.clone(),
            cache: state.cache.clone(),
            sync: PersistenceSync::new(
                state.store.clone(),
                state.sync_ledger.clone(),
                &state.config.sync,
            ),
            ledger: state.sync_ledger.clone(),
            settings: state.config.quiz.clone(),
            ttl: state.config.cache.session_ttl(),
        }
    }

    pub async fn create_session(
        &self,
        user_id: &str,
        req: CreateSessionRequest,
        now: DateTime<Utc>,
    ) -> Result<SessionView, QuizError> {
        req.validate()?;
        let plan = SessionPlan::new(req.mode, req.filter, req.limit, req.order, &self.settings)?;

        let pool = match plan.mode {
            SessionMode::Favorites => {
                Pool::Only(favorite_question_ids(self.store.as_ref(), user_id).await?)
            }
            SessionMode::ReviewErrors => {
                Pool::Only(missed_question_ids(self.store.as_ref(), user_id).await?)
            }
            _ => Pool::All,
        };
        let questions = draw_questions(self.store.as_ref(), &plan, &pool).await?;

        let session = ActiveSession::open(
            Uuid::new_v4().to_string(),
            user_id.to_string(),
            &plan,
            questions,
            now,
        )?;

        self.sync.open_session(&session.record(now)).await?;
        self.cache.save(&session, self.ttl).await?;

        SESSIONS_TOTAL
            .with_label_values(&[plan.mode.as_str(), "created"])
            .inc();

        tracing::info!(
            session_id = session.id.as_str(),
            user_id,
            mode = plan.mode.as_str(),
            questions = session.run.len(),
            "Session created"
        );

        Ok(session.view(now, 0))
    }

    /// Loads a session owned by `user_id`, moving it to `Expired` when its
    /// countdown ran out since the last request.
    pub async fn load(
        &self,
        session_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ActiveSession, QuizError> {
        let mut session = self
            .cache
            .load(session_id)
            .await?
            .ok_or_else(|| QuizError::SessionNotFound(session_id.to_string()))?;

        if !session.belongs_to(user_id) {
            tracing::warn!(session_id, user_id, "Session accessed by another user");
            return Err(QuizError::Forbidden(
                "session belongs to another user".to_string(),
            ));
        }

        if session.refresh(now) {
            SESSIONS_TOTAL
                .with_label_values(&[session.mode.as_str(), "expired"])
                .inc();
            tracing::info!(session_id, "Session time limit reached");
            self.cache.save(&session, self.ttl).await?;
        }
        Ok(session)
    }

    pub async fn get_session(
        &self,
        session_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<SessionView, QuizError> {
        let session = self.load(session_id, user_id, now).await?;
        Ok(session.view(now, self.ledger.failures(session_id)))
    }

    pub async fn current_question(
        &self,
        session_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<CurrentQuestionResponse, QuizError> {
        let session = self.load(session_id, user_id, now).await?;
        Ok(session.current_question())
    }

    pub async fn submit_answer(
        &self,
        session_id: &str,
        user_id: &str,
        req: &SubmitAnswerRequest,
        now: DateTime<Utc>,
    ) -> Result<AnswerResponse, QuizError> {
        req.validate()?;
        let mut session = self.load(session_id, user_id, now).await?;

        let outcome = session.answer(&req.question_id, req.answer, now)?;
        self.cache.save(&session, self.ttl).await?;

        ANSWERS_SUBMITTED_TOTAL
            .with_label_values(&[if outcome.answer.correct { "true" } else { "false" }])
            .inc();

        let attempt = AnswerAttempt {
            id: Uuid::new_v4().to_string(),
            session_id: session.id.clone(),
            user_id: user_id.to_string(),
            question_id: outcome.answer.question_id.clone(),
            selected_answer: outcome.answer.selected,
            is_correct: outcome.answer.correct,
            time_spent_seconds: outcome.answer.time_spent_seconds,
            created_at: now,
        };
        let sync = self
            .sync
            .push(SyncEvent::Answer {
                attempt,
                progress: session.record(now),
            })
            .await;

        tracing::info!(
            session_id,
            question_id = req.question_id.as_str(),
            correct = outcome.answer.correct,
            streak = outcome.score.streak,
            "Answer recorded"
        );

        let (correct_answer, explanation) = session
            .run
            .question(&req.question_id)
            .map(|q| (q.correct_answer, q.explanation.clone()))
            .unwrap_or((req.answer, None));

        Ok(AnswerResponse {
            question_id: outcome.answer.question_id,
            selected: outcome.answer.selected,
            correct: outcome.answer.correct,
            correct_answer,
            explanation,
            time_spent_seconds: outcome.answer.time_spent_seconds,
            is_last_question: session.run.is_last(),
            score: outcome.score,
            sync,
        })
    }

    pub async fn next_question(
        &self,
        session_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<NavigationResponse, QuizError> {
        let mut session = self.load(session_id, user_id, now).await?;
        let step = session.advance(now)?;
        self.cache.save(&session, self.ttl).await?;

        let sync = match step {
            Step::Moved(_) => None,
            Step::Finished => Some(self.finalize(&session, now).await),
        };
        Ok(navigation(&session, now, sync))
    }

    pub async fn previous_question(
        &self,
        session_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<NavigationResponse, QuizError> {
        let mut session = self.load(session_id, user_id, now).await?;
        session.retreat(now)?;
        self.cache.save(&session, self.ttl).await?;
        Ok(navigation(&session, now, None))
    }

    pub async fn jump_to(
        &self,
        session_id: &str,
        user_id: &str,
        index: usize,
        now: DateTime<Utc>,
    ) -> Result<NavigationResponse, QuizError> {
        let mut session = self.load(session_id, user_id, now).await?;
        session.jump(index, now)?;
        self.cache.save(&session, self.ttl).await?;
        Ok(navigation(&session, now, None))
    }

    /// Completes the session; repeated calls return the same summary.
    pub async fn complete_session(
        &self,
        session_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<CompletionResponse, QuizError> {
        let mut session = self.load(session_id, user_id, now).await?;
        let sync = if session.complete(now)? {
            self.cache.save(&session, self.ttl).await?;
            Some(self.finalize(&session, now).await)
        } else {
            None
        };

        Ok(CompletionResponse {
            summary: session.summary(now),
            sync,
        })
    }

    pub async fn abandon_session(
        &self,
        session_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<SyncOutcome, QuizError> {
        let mut session = self.load(session_id, user_id, now).await?;
        session.abandon(now)?;
        self.cache.remove(session_id).await?;

        SESSIONS_TOTAL
            .with_label_values(&[session.mode.as_str(), "abandoned"])
            .inc();
        tracing::info!(session_id, "Session abandoned");

        Ok(self.sync.push(SyncEvent::Progress(session.record(now))).await)
    }

    async fn finalize(&self, session: &ActiveSession, now: DateTime<Utc>) -> SyncOutcome {
        SESSIONS_TOTAL
            .with_label_values(&[session.mode.as_str(), "completed"])
            .inc();

        let score = session.run.scoreboard().snapshot();
        tracing::info!(
            session_id = session.id.as_str(),
            answered = score.answered,
            correct = score.correct,
            "Session completed"
        );

        self.sync.push(SyncEvent::Progress(session.record(now))).await
    }
}

fn navigation(
    session: &ActiveSession,
    now: DateTime<Utc>,
    sync: Option<SyncOutcome>,
) -> NavigationResponse {
    let completed = session.is_finished();
    NavigationResponse {
        current_index: session.run.index(),
        total_questions: session.run.len(),
        completed,
        summary: completed.then(|| session.summary(now)),
        sync,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, SyncMode};
    use crate::models::Choice;
    use crate::quiz::{QuestionOrder, SessionFilter};
    use crate::services::session_cache::MemorySessionCache;
    use crate::store::{MemoryStore, QUESTIONS, STUDY_SESSIONS, USER_ANSWERS};
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    async fn state(mode: SyncMode) -> (AppState, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let questions: Vec<_> = (1..=3)
            .map(|i| {
                json!({
                    "id": format!("q{}", i),
                    "year": 2023,
                    "exam": "XXXVIII Exame",
                    "number": i,
                    "area": "Direito Administrativo",
                    "statement": "Enunciado",
                    "alternative_a": "a",
                    "alternative_b": "b",
                    "alternative_c": "c",
                    "alternative_d": "d",
                    "correct_answer": "B"
                })
            })
            .collect();
        store.seed(QUESTIONS, &questions).await.unwrap();

        let mut config = Config::in_memory("secret");
        config.sync.mode = mode;
        let state = AppState::with_backends(config, store.clone(), Arc::new(MemorySessionCache::new()));
        (state, store)
    }

    fn sequential() -> CreateSessionRequest {
        CreateSessionRequest {
            mode: SessionMode::Practice,
            filter: SessionFilter::default(),
            limit: None,
            order: Some(QuestionOrder::Sequential),
        }
    }

    fn answer(question_id: &str, choice: Choice) -> SubmitAnswerRequest {
        SubmitAnswerRequest {
            question_id: question_id.to_string(),
            answer: choice,
        }
    }

    #[tokio::test]
    async fn answer_flow_persists_in_blocking_mode() {
        let (state, store) = state(SyncMode::Blocking).await;
        let service = SessionService::new(&state);
        let now = Utc::now();

        let view = service.create_session("u1", sequential(), now).await.unwrap();
        assert_eq!(view.total_questions, 3);
        assert_eq!(store.rows(STUDY_SESSIONS).await.len(), 1);

        let response = service
            .submit_answer(&view.session_id, "u1", &answer("q1", Choice::B), now)
            .await
            .unwrap();
        assert!(response.correct);
        assert_eq!(response.sync, SyncOutcome::Persisted);
        assert_eq!(store.rows(USER_ANSWERS).await.len(), 1);

        let err = service
            .submit_answer(&view.session_id, "u1", &answer("q1", Choice::A), now)
            .await
            .unwrap_err();
        assert!(matches!(err, QuizError::AlreadyAnswered(_)));
        assert_eq!(store.rows(USER_ANSWERS).await.len(), 1);
    }

    #[tokio::test]
    async fn blocking_failure_keeps_local_answer() {
        let (state, store) = state(SyncMode::Blocking).await;
        let service = SessionService::new(&state);
        let now = Utc::now();
        let view = service.create_session("u1", sequential(), now).await.unwrap();

        store.fail_writes(true);
        let response = service
            .submit_answer(&view.session_id, "u1", &answer("q1", Choice::C), now)
            .await
            .unwrap();
        assert!(matches!(response.sync, SyncOutcome::Failed { .. }));
        assert_eq!(response.score.answered, 1);

        let view = service.get_session(&view.session_id, "u1", now).await.unwrap();
        assert_eq!(view.score.answered, 1);
        assert_eq!(view.pending_sync_failures, 1);
    }

    #[tokio::test]
    async fn finished_sessions_leave_no_sync_ledger_entry() {
        let (state, store) = state(SyncMode::Blocking).await;
        let service = SessionService::new(&state);
        let now = Utc::now();
        let view = service.create_session("u1", sequential(), now).await.unwrap();
        let id = view.session_id;

        store.fail_writes(true);
        service
            .submit_answer(&id, "u1", &answer("q1", Choice::B), now)
            .await
            .unwrap();
        assert_eq!(state.sync_ledger.failures(&id), 1);

        let completion = service.complete_session(&id, "u1", now).await.unwrap();
        assert!(matches!(completion.sync, Some(SyncOutcome::Failed { .. })));
        state.cache.remove(&id).await.unwrap();
        assert_eq!(state.sync_ledger.failures(&id), 0);
    }

    #[tokio::test]
    async fn failed_session_insert_opens_nothing() {
        let (state, store) = state(SyncMode::Background).await;
        let service = SessionService::new(&state);
        store.fail_writes(true);

        let result = service.create_session("u1", sequential(), Utc::now()).await;
        assert!(matches!(result, Err(QuizError::Store(_))));
        assert!(store.rows(STUDY_SESSIONS).await.is_empty());
    }

    #[tokio::test]
    async fn other_users_cannot_touch_a_session() {
        let (state, _) = state(SyncMode::Background).await;
        let service = SessionService::new(&state);
        let now = Utc::now();
        let view = service.create_session("u1", sequential(), now).await.unwrap();

        assert!(matches!(
            service.get_session(&view.session_id, "u2", now).await,
            Err(QuizError::Forbidden(_))
        ));
        assert!(matches!(
            service.get_session("missing", "u1", now).await,
            Err(QuizError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn advancing_past_last_question_completes() {
        let (state, store) = state(SyncMode::Blocking).await;
        let service = SessionService::new(&state);
        let now = Utc::now();
        let view = service.create_session("u1", sequential(), now).await.unwrap();
        let id = view.session_id;

        service.next_question(&id, "u1", now).await.unwrap();
        service.next_question(&id, "u1", now).await.unwrap();
        let last = service
            .next_question(&id, "u1", now + ChronoDuration::seconds(90))
            .await
            .unwrap();
        assert!(last.completed);
        assert_eq!(last.sync, Some(SyncOutcome::Persisted));
        assert_eq!(last.summary.unwrap().total_time_seconds, 90);
        assert!(store.rows(STUDY_SESSIONS).await[0]["completed_at"].is_string());

        assert!(matches!(
            service.previous_question(&id, "u1", now).await,
            Err(QuizError::SessionCompleted)
        ));

        let again = service.complete_session(&id, "u1", now).await.unwrap();
        assert!(again.sync.is_none());
    }

    #[tokio::test]
    async fn favorites_mode_without_favorites_has_no_questions() {
        let (state, _) = state(SyncMode::Background).await;
        let service = SessionService::new(&state);
        let req = CreateSessionRequest {
            mode: SessionMode::Favorites,
            ..sequential()
        };
        assert!(matches!(
            service.create_session("u1", req, Utc::now()).await,
            Err(QuizError::NoQuestions)
        ));
    }

    #[tokio::test]
    async fn abandon_removes_session() {
        let (state, _) = state(SyncMode::Blocking).await;
        let service = SessionService::new(&state);
        let now = Utc::now();
        let view = service.create_session("u1", sequential(), now).await.unwrap();

        let sync = service
            .abandon_session(&view.session_id, "u1", now)
            .await
            .unwrap();
        assert_eq!(sync, SyncOutcome::Persisted);
        assert!(matches!(
            service.get_session(&view.session_id, "u1", now).await,
            Err(QuizError::SessionNotFound(_))
        ));
    }
}
