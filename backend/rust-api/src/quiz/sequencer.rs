use serde::{Deserialize, Serialize};

use crate::errors::QuizError;

/// Result of [`Sequencer::advance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Moved(usize),
    /// Advanced past the last question; the run is now complete.
    Finished,
}

/// Position within an ordered question list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequencer {
    index: usize,
    len: usize,
    completed: bool,
}

impl Sequencer {
    pub fn new(len: usize) -> Result<Self, QuizError> {
        if len == 0 {
            return Err(QuizError::NoQuestions);
        }
        Ok(Self {
            index: 0,
            len,
            completed: false,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_last(&self) -> bool {
        self.index + 1 == self.len
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    fn ensure_open(&self) -> Result<(), QuizError> {
        if self.completed {
            return Err(QuizError::SessionCompleted);
        }
        Ok(())
    }

    pub fn advance(&mut self) -> Result<Step, QuizError> {
        self.ensure_open()?;
        if self.is_last() {
            self.completed = true;
            return Ok(Step::Finished);
        }
        self.index += 1;
        Ok(Step::Moved(self.index))
    }

    /// Moves back one question; stays on the first one.
    pub fn retreat(&mut self) -> Result<usize, QuizError> {
        self.ensure_open()?;
        self.index = self.index.saturating_sub(1);
        Ok(self.index)
    }

    pub fn jump(&mut self, index: usize) -> Result<usize, QuizError> {
        self.ensure_open()?;
        if index >= self.len {
            return Err(QuizError::IndexOutOfRange {
                index,
                len: self.len,
            });
        }
        self.index = index;
        Ok(self.index)
    }

    pub fn complete(&mut self) {
        self.completed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sequence_is_rejected() {
        assert!(matches!(Sequencer::new(0), Err(QuizError::NoQuestions)));
    }

    #[test]
    fn advance_past_last_question_finishes() {
        let mut seq = Sequencer::new(2).unwrap();
        assert_eq!(seq.advance().unwrap(), Step::Moved(1));
        assert!(seq.is_last());
        assert_eq!(seq.advance().unwrap(), Step::Finished);
        assert!(seq.is_completed());
        assert_eq!(seq.index(), 1);
    }

    #[test]
    fn navigation_after_completion_is_rejected() {
        let mut seq = Sequencer::new(1).unwrap();
        assert_eq!(seq.advance().unwrap(), Step::Finished);
        assert!(matches!(seq.advance(), Err(QuizError::SessionCompleted)));
        assert!(matches!(seq.retreat(), Err(QuizError::SessionCompleted)));
        assert!(matches!(seq.jump(0), Err(QuizError::SessionCompleted)));
    }

    #[test]
    fn retreat_stops_at_first_question() {
        let mut seq = Sequencer::new(3).unwrap();
        assert_eq!(seq.retreat().unwrap(), 0);
        seq.jump(2).unwrap();
        assert_eq!(seq.retreat().unwrap(), 1);
    }

    #[test]
    fn jump_is_bounds_checked() {
        let mut seq = Sequencer::new(3).unwrap();
        assert!(matches!(
            seq.jump(3),
            Err(QuizError::IndexOutOfRange { index: 3, len: 3 })
        ));
        assert_eq!(seq.index(), 0);
        assert_eq!(seq.jump(2).unwrap(), 2);
    }
}
