use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::errors::QuizError;
use crate::models::{
    AnswerAttempt, AreaPerformance, PerformanceOverview, Question, QuestionHistory,
    RecentSession, StudySessionRecord,
};
use crate::quiz::scorer::accuracy;
use crate::store::{
    fetch_by_ids, fetch_paged, Query, Store, StoreError, QUESTIONS, STUDY_SESSIONS, USER_ANSWERS,
};

const RECENT_SESSIONS: usize = 5;
const UNKNOWN_AREA: &str = "unknown";

/// Rows of `user_id` in `table`, newest first, with a unique tiebreak for paging.
fn newest_first(table: &str, user_id: &str) -> Query {
    Query::table(table)
        .eq("user_id", user_id)
        .order_by("created_at", false)
        .order_by("id", true)
}

/// Questions whose most recent attempt by the user was wrong.
pub async fn missed_question_ids(
    store: &dyn Store,
    user_id: &str,
) -> Result<Vec<String>, StoreError> {
    let attempts: Vec<AnswerAttempt> = fetch_paged(store, &newest_first(USER_ANSWERS, user_id)).await?;

    let mut seen = HashSet::new();
    Ok(attempts
        .into_iter()
        .filter(|attempt| seen.insert(attempt.question_id.clone()))
        .filter(|attempt| !attempt.is_correct)
        .map(|attempt| attempt.question_id)
        .collect())
}

/// Builds the performance overview from raw rows.
pub fn summarize(
    sessions: &[StudySessionRecord],
    answers: &[AnswerAttempt],
    question_areas: &HashMap<String, String>,
) -> PerformanceOverview {
    let correct_answers = answers.iter().filter(|a| a.is_correct).count() as u32;
    let questions_answered = answers.len() as u32;
    let distinct_questions = answers
        .iter()
        .map(|a| a.question_id.as_str())
        .collect::<HashSet<_>>()
        .len() as u32;
    let answer_time: u64 = answers.iter().map(|a| a.time_spent_seconds).sum();
    let average_time_per_answer_seconds = if answers.is_empty() {
        0.0
    } else {
        (answer_time as f64 * 10.0 / answers.len() as f64).round() / 10.0
    };

    let mut per_area: BTreeMap<&str, (u32, u32)> = BTreeMap::new();
    for answer in answers {
        let area = question_areas
            .get(&answer.question_id)
            .map(String::as_str)
            .unwrap_or(UNKNOWN_AREA);
        let entry = per_area.entry(area).or_insert((0, 0));
        entry.0 += 1;
        if answer.is_correct {
            entry.1 += 1;
        }
    }
    let mut areas: Vec<AreaPerformance> = per_area
        .into_iter()
        .map(|(area, (answered, correct))| AreaPerformance {
            area: area.to_string(),
            answered,
            correct,
            accuracy: accuracy(correct, answered),
        })
        .collect();
    areas.sort_by(|a, b| {
        a.accuracy
            .total_cmp(&b.accuracy)
            .then_with(|| b.answered.cmp(&a.answered))
    });

    let mut recent: Vec<&StudySessionRecord> = sessions.iter().collect();
    recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let recent_sessions = recent
        .into_iter()
        .take(RECENT_SESSIONS)
        .map(|s| RecentSession {
            session_id: s.id.clone(),
            mode: s.mode,
            area: s.area.clone(),
            questions_answered: s.questions_answered,
            correct_answers: s.correct_answers,
            total_time_seconds: s.total_time_seconds,
            created_at: s.created_at,
            completed_at: s.completed_at,
        })
        .collect();

    PerformanceOverview {
        sessions_started: sessions.len() as u32,
        sessions_completed: sessions.iter().filter(|s| s.completed_at.is_some()).count() as u32,
        questions_answered,
        distinct_questions,
        correct_answers,
        accuracy: accuracy(correct_answers, questions_answered),
        total_time_seconds: sessions.iter().map(|s| s.total_time_seconds).sum(),
        average_time_per_answer_seconds,
        areas,
        recent_sessions,
    }
}

pub struct StatsService {
    store: Arc<dyn Store>,
}

impl StatsService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn overview(&self, user_id: &str) -> Result<PerformanceOverview, QuizError> {
        let store = self.store.as_ref();
        let sessions: Vec<StudySessionRecord> =
            fetch_paged(store, &newest_first(STUDY_SESSIONS, user_id)).await?;
        let answers: Vec<AnswerAttempt> =
            fetch_paged(store, &newest_first(USER_ANSWERS, user_id)).await?;

        let ids: HashSet<&str> = answers.iter().map(|a| a.question_id.as_str()).collect();
        let question_areas: HashMap<String, String> = if ids.is_empty() {
            HashMap::new()
        } else {
            let questions: Vec<Question> = fetch_by_ids(store, QUESTIONS, ids).await?;
            questions.into_iter().map(|q| (q.id, q.area)).collect()
        };

        Ok(summarize(&sessions, &answers, &question_areas))
    }

    pub async fn question_history(
        &self,
        user_id: &str,
        question_id: &str,
    ) -> Result<QuestionHistory, QuizError> {
        let attempts: Vec<AnswerAttempt> = fetch_paged(
            self.store.as_ref(),
            &newest_first(USER_ANSWERS, user_id).eq("question_id", question_id),
        )
        .await?;

        let times_correct = attempts.iter().filter(|a| a.is_correct).count() as u32;
        let times_wrong = attempts.len() as u32 - times_correct;
        Ok(QuestionHistory {
            question_id: question_id.to_string(),
            attempts,
            times_correct,
            times_wrong,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Choice, SessionMode};
    use crate::store::MemoryStore;
    use chrono::{Duration, Utc};

    fn attempt(question_id: &str, correct: bool, minutes_ago: i64) -> AnswerAttempt {
        AnswerAttempt {
            id: format!("{}-{}", question_id, minutes_ago),
            session_id: "s1".to_string(),
            user_id: "u1".to_string(),
            question_id: question_id.to_string(),
            selected_answer: Choice::A,
            is_correct: correct,
            time_spent_seconds: 30,
            created_at: Utc::now() - Duration::minutes(minutes_ago),
        }
    }

    fn session(id: &str, completed: bool, days_ago: i64) -> StudySessionRecord {
        StudySessionRecord {
            id: id.to_string(),
            user_id: "u1".to_string(),
            mode: SessionMode::Practice,
            area: None,
            questions_answered: 2,
            correct_answers: 1,
            total_time_seconds: 120,
            created_at: Utc::now() - Duration::days(days_ago),
            completed_at: completed.then(Utc::now),
        }
    }

    #[test]
    fn summary_ranks_weakest_area_first() {
        let answers = vec![
            attempt("q1", true, 5),
            attempt("q2", false, 4),
            attempt("q3", true, 3),
            attempt("q3", true, 2),
        ];
        let areas = HashMap::from([
            ("q1".to_string(), "Civil".to_string()),
            ("q2".to_string(), "Penal".to_string()),
            ("q3".to_string(), "Civil".to_string()),
        ]);
        let sessions = vec![session("old", true, 3), session("new", false, 1)];

        let overview = summarize(&sessions, &answers, &areas);
        assert_eq!(overview.questions_answered, 4);
        assert_eq!(overview.distinct_questions, 3);
        assert_eq!(overview.accuracy, 75.0);
        assert_eq!(overview.sessions_completed, 1);
        assert_eq!(overview.total_time_seconds, 240);
        assert_eq!(overview.average_time_per_answer_seconds, 30.0);
        assert_eq!(overview.areas[0].area, "Penal");
        assert_eq!(overview.areas[1].accuracy, 100.0);
        assert_eq!(overview.recent_sessions[0].session_id, "new");
    }

    #[test]
    fn empty_history_has_zero_accuracy() {
        let overview = summarize(&[], &[], &HashMap::new());
        assert_eq!(overview.accuracy, 0.0);
        assert_eq!(overview.average_time_per_answer_seconds, 0.0);
        assert!(overview.areas.is_empty());
    }

    #[tokio::test]
    async fn missed_questions_use_latest_attempt() {
        let store = MemoryStore::new();
        store
            .seed(
                USER_ANSWERS,
                &[
                    attempt("q1", false, 10),
                    attempt("q1", true, 1),
                    attempt("q2", true, 10),
                    attempt("q2", false, 2),
                    attempt("q3", false, 3),
                ],
            )
            .await
            .unwrap();

        let mut missed = missed_question_ids(&store, "u1").await.unwrap();
        missed.sort();
        assert_eq!(missed, vec!["q2".to_string(), "q3".to_string()]);
    }

    #[tokio::test]
    async fn overview_reads_every_page_of_history() {
        let store = MemoryStore::with_max_rows(3);
        let answers: Vec<AnswerAttempt> = (0..8)
            .map(|i| attempt(&format!("q{}", i % 4), i % 2 == 0, i))
            .collect();
        store.seed(USER_ANSWERS, &answers).await.unwrap();
        store
            .seed(
                STUDY_SESSIONS,
                &(0..5).map(|i| session(&format!("s{}", i), true, i)).collect::<Vec<_>>(),
            )
            .await
            .unwrap();

        let overview = StatsService::new(Arc::new(store)).overview("u1").await.unwrap();
        assert_eq!(overview.questions_answered, 8);
        assert_eq!(overview.correct_answers, 4);
        assert_eq!(overview.sessions_started, 5);
    }

    #[tokio::test]
    async fn question_history_counts_attempts() {
        let store = MemoryStore::new();
        store
            .seed(
                USER_ANSWERS,
                &[attempt("q1", false, 10), attempt("q1", true, 1), attempt("q2", true, 1)],
            )
            .await
            .unwrap();
        let service = StatsService::new(Arc::new(store));

        let history = service.question_history("u1", "q1").await.unwrap();
        assert_eq!(history.attempts.len(), 2);
        assert_eq!(history.times_correct, 1);
        assert_eq!(history.times_wrong, 1);
        assert!(history.attempts[0].is_correct);
    }
}
