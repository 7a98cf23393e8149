use thiserror::Error;

use crate::store::StoreError;

/// Failures of the quiz engine and the services built on it.
#[derive(Debug, Error)]
pub enum QuizError {
    #[error("no questions match the requested filters")]
    NoQuestions,
    #[error("session {0} not found")]
    SessionNotFound(String),
    #[error("question {0} was already answered in this session")]
    AlreadyAnswered(String),
    #[error("question {given} is not the current question ({current})")]
    NotCurrentQuestion { given: String, current: String },
    #[error("session is already finished")]
    SessionCompleted,
    #[error("time limit reached for this session")]
    TimeExpired,
    #[error("index {index} is out of range for {len} questions")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("choice {0} is not offered by this question")]
    InvalidChoice(String),
    #[error("a favorite toggle for this question is already in progress")]
    ToggleInProgress,
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("session cache failure: {0}")]
    Cache(String),
}

impl QuizError {
    /// Stable machine readable code used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            QuizError::NoQuestions => "no_questions",
            QuizError::SessionNotFound(_) => "session_not_found",
            QuizError::AlreadyAnswered(_) => "already_answered",
            QuizError::NotCurrentQuestion { .. } => "not_current_question",
            QuizError::SessionCompleted => "session_completed",
            QuizError::TimeExpired => "time_expired",
            QuizError::IndexOutOfRange { .. } => "index_out_of_range",
            QuizError::InvalidChoice(_) => "invalid_choice",
            QuizError::ToggleInProgress => "toggle_in_progress",
            QuizError::Forbidden(_) => "forbidden",
            QuizError::NotFound(_) => "not_found",
            QuizError::Validation(_) => "validation_error",
            QuizError::Store(_) => "store_error",
            QuizError::Cache(_) => "cache_error",
        }
    }
}

impl From<validator::ValidationErrors> for QuizError {
    fn from(errors: validator::ValidationErrors) -> Self {
        QuizError::Validation(errors.to_string())
    }
}

impl From<redis::RedisError> for QuizError {
    fn from(err: redis::RedisError) -> Self {
        QuizError::Cache(err.to_string())
    }
}
