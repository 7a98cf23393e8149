use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::QuizError;
use crate::models::Choice;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedAnswer {
    pub question_id: String,
    pub selected: Choice,
    pub correct: bool,
    pub time_spent_seconds: u64,
    pub answered_at: DateTime<Utc>,
}

/// Running totals exposed to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSnapshot {
    pub answered: u32,
    pub correct: u32,
    pub incorrect: u32,
    pub streak: u32,
    pub best_streak: u32,
    /// Percentage with one decimal, 0 when nothing was answered.
    pub accuracy: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnswerOutcome {
    pub answer: RecordedAnswer,
    pub score: ScoreSnapshot,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scoreboard {
    answers: Vec<RecordedAnswer>,
    correct: u32,
    streak: u32,
    best_streak: u32,
}

impl Scoreboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        question_id: &str,
        selected: Choice,
        answer_key: Choice,
        time_spent_seconds: u64,
        now: DateTime<Utc>,
    ) -> Result<AnswerOutcome, QuizError> {
        if self.answer_for(question_id).is_some() {
            return Err(QuizError::AlreadyAnswered(question_id.to_string()));
        }

        let correct = selected == answer_key;
        if correct {
            self.correct += 1;
            self.streak += 1;
            self.best_streak = self.best_streak.max(self.streak);
        } else {
            self.streak = 0;
        }

        let answer = RecordedAnswer {
            question_id: question_id.to_string(),
            selected,
            correct,
            time_spent_seconds,
            answered_at: now,
        };
        self.answers.push(answer.clone());

        Ok(AnswerOutcome {
            answer,
            score: self.snapshot(),
        })
    }

    pub fn answer_for(&self, question_id: &str) -> Option<&RecordedAnswer> {
        self.answers.iter().find(|a| a.question_id == question_id)
    }

    pub fn answered(&self) -> u32 {
        self.answers.len() as u32
    }

    pub fn correct(&self) -> u32 {
        self.correct
    }

    pub fn snapshot(&self) -> ScoreSnapshot {
        let answered = self.answered();
        ScoreSnapshot {
            answered,
            correct: self.correct,
            incorrect: answered - self.correct,
            streak: self.streak,
            best_streak: self.best_streak,
            accuracy: accuracy(self.correct, answered),
        }
    }
}

pub fn accuracy(correct: u32, answered: u32) -> f64 {
    if answered == 0 {
        return 0.0;
    }
    (f64::from(correct) * 1000.0 / f64::from(answered)).round() / 10.0
}
