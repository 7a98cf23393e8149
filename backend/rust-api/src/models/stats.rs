use chrono::{DateTime, Utc};
use serde::Serialize;

use super::session::{AnswerAttempt, SessionMode};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AreaPerformance {
    pub area: String,
    pub answered: u32,
    pub correct: u32,
    pub accuracy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentSession {
    pub session_id: String,
    pub mode: SessionMode,
    pub area: Option<String>,
    pub questions_answered: u32,
    pub correct_answers: u32,
    pub total_time_seconds: u64,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceOverview {
    pub sessions_started: u32,
    pub sessions_completed: u32,
    pub questions_answered: u32,
    pub distinct_questions: u32,
    pub correct_answers: u32,
    pub accuracy: f64,
    pub total_time_seconds: u64,
    pub average_time_per_answer_seconds: f64,
    /// Weakest areas first.
    pub areas: Vec<AreaPerformance>,
    pub recent_sessions: Vec<RecentSession>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuestionHistory {
    pub question_id: String,
    pub attempts: Vec<AnswerAttempt>,
    pub times_correct: u32,
    pub times_wrong: u32,
}
