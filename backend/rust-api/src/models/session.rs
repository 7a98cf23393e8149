use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::Validate;

use super::question::{id_from_string_or_number, Choice, QuestionView};
use crate::quiz::{QuestionOrder, ScoreSnapshot, SessionFilter};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    #[default]
    Practice,
    Area,
    SimulatedExam,
    Favorites,
    ReviewErrors,
}

impl SessionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionMode::Practice => "practice",
            SessionMode::Area => "area",
            SessionMode::SimulatedExam => "simulated_exam",
            SessionMode::Favorites => "favorites",
            SessionMode::ReviewErrors => "review_errors",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Expired,
    Abandoned,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Expired => "expired",
            SessionStatus::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row of the `study_sessions` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudySessionRecord {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
    pub user_id: String,
    pub mode: SessionMode,
    #[serde(default)]
    pub area: Option<String>,
    #[serde(default)]
    pub questions_answered: u32,
    #[serde(default)]
    pub correct_answers: u32,
    #[serde(default)]
    pub total_time_seconds: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Row of the append-only `user_answers` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerAttempt {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
    pub session_id: String,
    pub user_id: String,
    pub question_id: String,
    pub selected_answer: Choice,
    pub is_correct: bool,
    #[serde(default)]
    pub time_spent_seconds: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub mode: SessionMode,
    #[serde(default)]
    #[validate(nested)]
    pub filter: SessionFilter,
    #[validate(range(min = 1, max = 500))]
    pub limit: Option<u32>,
    pub order: Option<QuestionOrder>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SubmitAnswerRequest {
    #[validate(length(min = 1, max = 64))]
    pub question_id: String,
    pub answer: Choice,
}

#[derive(Debug, Deserialize)]
pub struct JumpRequest {
    pub index: usize,
}

/// Result of pushing a change to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncOutcome {
    Persisted,
    Queued,
    /// `error` is a [`StoreError::code`](crate::store::StoreError::code).
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub session_id: String,
    pub mode: SessionMode,
    pub area: Option<String>,
    pub status: SessionStatus,
    pub current_index: usize,
    pub total_questions: usize,
    pub current_question_id: String,
    pub score: ScoreSnapshot,
    pub started_at: DateTime<Utc>,
    pub elapsed_seconds: u64,
    pub question_elapsed_seconds: u64,
    pub remaining_seconds: Option<u32>,
    pub pending_sync_failures: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnsweredState {
    pub selected: Choice,
    pub correct: bool,
    pub correct_answer: Choice,
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CurrentQuestionResponse {
    pub session_id: String,
    pub index: usize,
    pub total_questions: usize,
    pub question: QuestionView,
    pub answered: Option<AnsweredState>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnswerResponse {
    pub question_id: String,
    pub selected: Choice,
    pub correct: bool,
    pub correct_answer: Choice,
    pub explanation: Option<String>,
    pub time_spent_seconds: u64,
    pub is_last_question: bool,
    pub score: ScoreSnapshot,
    pub sync: SyncOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub mode: SessionMode,
    pub area: Option<String>,
    pub status: SessionStatus,
    pub total_questions: usize,
    pub answered: u32,
    pub correct: u32,
    pub incorrect: u32,
    pub unanswered: u32,
    pub accuracy: f64,
    pub best_streak: u32,
    pub total_time_seconds: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NavigationResponse {
    pub current_index: usize,
    pub total_questions: usize,
    pub completed: bool,
    pub summary: Option<SessionSummary>,
    /// Present when the move finished the session and its final state was pushed.
    pub sync: Option<SyncOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionResponse {
    pub summary: SessionSummary,
    pub sync: Option<SyncOutcome>,
}
