//! The quiz engine: question sequencing, scoring and timing of a study
//! session. Nothing in here talks to the store or the cache; services load
//! an [`ActiveSession`], call into it with an explicit `now` and persist
//! the result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod initializer;
pub mod scorer;
pub mod sequencer;
pub mod timer;

pub use initializer::{draw_questions, Pool, QuestionOrder, SessionFilter, SessionPlan};
pub use scorer::{AnswerOutcome, RecordedAnswer, ScoreSnapshot, Scoreboard};
pub use sequencer::{Sequencer, Step};
pub use timer::SessionClock;

use crate::errors::QuizError;
use crate::models::{
    AnsweredState, Choice, CurrentQuestionResponse, Question, QuestionView, SessionMode,
    SessionStatus, SessionSummary, SessionView, StudySessionRecord,
};

/// Ordered questions of a session together with its position and score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizRun {
    questions: Vec<Question>,
    sequencer: Sequencer,
    scoreboard: Scoreboard,
}

impl QuizRun {
    pub fn new(questions: Vec<Question>) -> Result<Self, QuizError> {
        let sequencer = Sequencer::new(questions.len())?;
        Ok(Self {
            questions,
            sequencer,
            scoreboard: Scoreboard::new(),
        })
    }

    pub fn current(&self) -> &Question {
        &self.questions[self.sequencer.index()]
    }

    pub fn index(&self) -> usize {
        self.sequencer.index()
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_last(&self) -> bool {
        self.sequencer.is_last()
    }

    pub fn is_completed(&self) -> bool {
        self.sequencer.is_completed()
    }

    pub fn scoreboard(&self) -> &Scoreboard {
        &self.scoreboard
    }

    pub fn question(&self, question_id: &str) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == question_id)
    }

    /// Records an answer to the current question.
    pub fn answer(
        &mut self,
        question_id: &str,
        selected: Choice,
        time_spent_seconds: u64,
        now: DateTime<Utc>,
    ) -> Result<AnswerOutcome, QuizError> {
        if self.sequencer.is_completed() {
            return Err(QuizError::SessionCompleted);
        }
        if self.scoreboard.answer_for(question_id).is_some() {
            return Err(QuizError::AlreadyAnswered(question_id.to_string()));
        }

        let current = self.current();
        if current.id != question_id {
            return Err(QuizError::NotCurrentQuestion {
                given: question_id.to_string(),
                current: current.id.clone(),
            });
        }
        if !current.offers(selected) {
            return Err(QuizError::InvalidChoice(selected.to_string()));
        }

        let answer_key = current.correct_answer;
        self.scoreboard
            .record(question_id, selected, answer_key, time_spent_seconds, now)
    }

    pub fn advance(&mut self) -> Result<Step, QuizError> {
        self.sequencer.advance()
    }

    pub fn retreat(&mut self) -> Result<usize, QuizError> {
        self.sequencer.retreat()
    }

    pub fn jump(&mut self, index: usize) -> Result<usize, QuizError> {
        self.sequencer.jump(index)
    }

    pub fn complete(&mut self) {
        self.sequencer.complete();
    }
}

/// Live state of one study session, stored whole in the session cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveSession {
    pub id: String,
    pub user_id: String,
    pub mode: SessionMode,
    pub area: Option<String>,
    pub status: SessionStatus,
    pub run: QuizRun,
    pub clock: SessionClock,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ActiveSession {
    pub fn open(
        id: String,
        user_id: String,
        plan: &SessionPlan,
        questions: Vec<Question>,
        now: DateTime<Utc>,
    ) -> Result<Self, QuizError> {
        Ok(Self {
            id,
            user_id,
            mode: plan.mode,
            area: plan.filter.area.clone(),
            status: SessionStatus::Active,
            run: QuizRun::new(questions)?,
            clock: SessionClock::start(now, plan.time_limit_seconds),
            completed_at: None,
        })
    }

    pub fn belongs_to(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }

    /// Moves an active session past its countdown into `Expired`.
    /// Returns true when the status changed.
    pub fn refresh(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != SessionStatus::Active || !self.clock.is_expired(now) {
            return false;
        }
        let deadline = self.clock.time_limit_seconds.map(|limit| {
            self.clock.started_at + chrono::Duration::seconds(i64::from(limit))
        });
        self.clock.stop(deadline.unwrap_or(now));
        self.status = SessionStatus::Expired;
        true
    }

    fn ensure_active(&mut self, now: DateTime<Utc>) -> Result<(), QuizError> {
        self.refresh(now);
        match self.status {
            SessionStatus::Active => Ok(()),
            SessionStatus::Expired => Err(QuizError::TimeExpired),
            SessionStatus::Completed | SessionStatus::Abandoned => {
                Err(QuizError::SessionCompleted)
            }
        }
    }

    pub fn answer(
        &mut self,
        question_id: &str,
        selected: Choice,
        now: DateTime<Utc>,
    ) -> Result<AnswerOutcome, QuizError> {
        self.ensure_active(now)?;
        let time_spent = self.clock.question_elapsed_seconds(now);
        self.run.answer(question_id, selected, time_spent, now)
    }

    pub fn advance(&mut self, now: DateTime<Utc>) -> Result<Step, QuizError> {
        self.ensure_active(now)?;
        let step = self.run.advance()?;
        match step {
            Step::Moved(_) => self.clock.restart_question(now),
            Step::Finished => self.finish(now),
        }
        Ok(step)
    }

    pub fn retreat(&mut self, now: DateTime<Utc>) -> Result<usize, QuizError> {
        self.ensure_active(now)?;
        let before = self.run.index();
        let index = self.run.retreat()?;
        if index != before {
            self.clock.restart_question(now);
        }
        Ok(index)
    }

    pub fn jump(&mut self, index: usize, now: DateTime<Utc>) -> Result<usize, QuizError> {
        self.ensure_active(now)?;
        let before = self.run.index();
        let index = self.run.jump(index)?;
        if index != before {
            self.clock.restart_question(now);
        }
        Ok(index)
    }

    fn finish(&mut self, now: DateTime<Utc>) {
        self.run.complete();
        self.clock.stop(now);
        self.status = SessionStatus::Completed;
        self.completed_at = Some(now);
    }

    /// Completes the session. Completing twice is a no-op; returns whether
    /// this call changed anything.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<bool, QuizError> {
        self.refresh(now);
        match self.status {
            SessionStatus::Completed => Ok(false),
            SessionStatus::Abandoned => Err(QuizError::SessionCompleted),
            SessionStatus::Active | SessionStatus::Expired => {
                self.finish(now);
                Ok(true)
            }
        }
    }

    pub fn abandon(&mut self, now: DateTime<Utc>) -> Result<(), QuizError> {
        match self.status {
            SessionStatus::Completed | SessionStatus::Abandoned => {
                Err(QuizError::SessionCompleted)
            }
            SessionStatus::Active | SessionStatus::Expired => {
                self.run.complete();
                self.clock.stop(now);
                self.status = SessionStatus::Abandoned;
                Ok(())
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.status,
            SessionStatus::Completed | SessionStatus::Abandoned
        )
    }

    /// Session row reflecting the local progress.
    pub fn record(&self, now: DateTime<Utc>) -> StudySessionRecord {
        let board = self.run.scoreboard();
        StudySessionRecord {
            id: self.id.clone(),
            user_id: self.user_id.clone(),
            mode: self.mode,
            area: self.area.clone(),
            questions_answered: board.answered(),
            correct_answers: board.correct(),
            total_time_seconds: self.clock.elapsed_seconds(now),
            created_at: self.clock.started_at,
            completed_at: self.completed_at,
        }
    }

    pub fn view(&self, now: DateTime<Utc>, pending_sync_failures: u32) -> SessionView {
        SessionView {
            session_id: self.id.clone(),
            mode: self.mode,
            area: self.area.clone(),
            status: self.status,
            current_index: self.run.index(),
            total_questions: self.run.len(),
            current_question_id: self.run.current().id.clone(),
            score: self.run.scoreboard().snapshot(),
            started_at: self.clock.started_at,
            elapsed_seconds: self.clock.elapsed_seconds(now),
            question_elapsed_seconds: self.clock.question_elapsed_seconds(now),
            remaining_seconds: self.clock.remaining_seconds(now),
            pending_sync_failures,
        }
    }

    pub fn current_question(&self) -> CurrentQuestionResponse {
        let question = self.run.current();
        let answered = self
            .run
            .scoreboard()
            .answer_for(&question.id)
            .map(|answer| AnsweredState {
                selected: answer.selected,
                correct: answer.correct,
                correct_answer: question.correct_answer,
                explanation: question.explanation.clone(),
            });

        CurrentQuestionResponse {
            session_id: self.id.clone(),
            index: self.run.index(),
            total_questions: self.run.len(),
            question: QuestionView::from(question),
            answered,
        }
    }

    pub fn summary(&self, now: DateTime<Utc>) -> SessionSummary {
        let score = self.run.scoreboard().snapshot();
        let total = self.run.len();
        SessionSummary {
            session_id: self.id.clone(),
            mode: self.mode,
            area: self.area.clone(),
            status: self.status,
            total_questions: total,
            answered: score.answered,
            correct: score.correct,
            incorrect: score.incorrect,
            unanswered: (total as u32).saturating_sub(score.answered),
            accuracy: score.accuracy,
            best_streak: score.best_streak,
            total_time_seconds: self.clock.elapsed_seconds(now),
            started_at: self.clock.started_at,
            completed_at: self.completed_at,
        }
    }
}
