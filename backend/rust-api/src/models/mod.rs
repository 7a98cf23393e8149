pub mod favorite;
pub mod question;
pub mod session;
pub mod stats;
pub mod timer;

pub use favorite::{Favorite, FavoriteEntry, FavoriteToggle, Note, UpsertNoteRequest};
pub use question::{Alternative, AreaSummary, Choice, Question, QuestionView};
pub use session::{
    AnswerAttempt, AnswerResponse, AnsweredState, CompletionResponse, CreateSessionRequest,
    CurrentQuestionResponse, JumpRequest, NavigationResponse, SessionMode, SessionStatus,
    SessionSummary, SessionView, StudySessionRecord, SubmitAnswerRequest, SyncOutcome,
};
pub use stats::{AreaPerformance, PerformanceOverview, QuestionHistory, RecentSession};
