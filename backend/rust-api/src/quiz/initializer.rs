use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::config::QuizSettings;
use crate::errors::QuizError;
use crate::models::question::id_from_string_or_number;
use crate::models::{Question, SessionMode};
use crate::store::{fetch_by_ids, fetch_paged, Query, Store, QUESTIONS};

/// Question bank filters shared by session creation and search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct SessionFilter {
    #[validate(length(min = 1, max = 200))]
    pub area: Option<String>,
    #[validate(length(min = 1, max = 200))]
    pub theme: Option<String>,
    #[validate(length(min = 1, max = 200))]
    pub subject: Option<String>,
    #[validate(length(min = 1, max = 200))]
    pub exam: Option<String>,
    #[validate(range(min = 1990, max = 2100))]
    pub year: Option<i32>,
}

impl SessionFilter {
    pub fn apply(&self, mut query: Query) -> Query {
        for (column, value) in [
            ("area", &self.area),
            ("theme", &self.theme),
            ("subject", &self.subject),
            ("exam", &self.exam),
        ] {
            if let Some(value) = value {
                query = query.eq(column, value.as_str());
            }
        }
        if let Some(year) = self.year {
            query = query.eq("year", year);
        }
        query
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionOrder {
    #[default]
    Shuffled,
    /// Exam year descending, then question number ascending.
    Sequential,
}

/// Which questions a session may draw from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pool {
    All,
    Only(Vec<String>),
}

/// Resolved parameters of a session about to be opened.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionPlan {
    pub mode: SessionMode,
    pub filter: SessionFilter,
    pub question_count: usize,
    pub order: QuestionOrder,
    pub time_limit_seconds: Option<u32>,
}

impl SessionPlan {
    pub fn new(
        mode: SessionMode,
        filter: SessionFilter,
        limit: Option<u32>,
        order: Option<QuestionOrder>,
        settings: &QuizSettings,
    ) -> Result<Self, QuizError> {
        if mode == SessionMode::Area && filter.area.is_none() {
            return Err(QuizError::Validation(
                "area mode requires filter.area".to_string(),
            ));
        }

        let plan = match mode {
            SessionMode::SimulatedExam => Self {
                mode,
                filter,
                question_count: settings.simulated_exam_questions as usize,
                order: order.unwrap_or_default(),
                time_limit_seconds: Some(settings.simulated_exam_minutes.saturating_mul(60)),
            },
            _ => Self {
                mode,
                filter,
                question_count: limit
                    .unwrap_or(settings.default_question_count)
                    .min(settings.max_question_count) as usize,
                order: order.unwrap_or_default(),
                time_limit_seconds: None,
            },
        };
        Ok(plan)
    }

    /// Questions the session may draw from, unordered and unlimited.
    pub fn pool_query(&self, pool: &Pool) -> Query {
        let query = self.filter.apply(Query::table(QUESTIONS));
        match pool {
            Pool::All => query,
            Pool::Only(ids) => query.is_in("id", ids.iter().map(String::as_str)),
        }
    }

    pub fn arrange<R: Rng + ?Sized>(&self, mut questions: Vec<Question>, rng: &mut R) -> Vec<Question> {
        match self.order {
            QuestionOrder::Shuffled => questions.shuffle(rng),
            QuestionOrder::Sequential => questions.sort_by(|a, b| {
                b.year.cmp(&a.year).then_with(|| a.number.cmp(&b.number))
            }),
        }
        questions.truncate(self.question_count);
        questions
    }
}

#[derive(Deserialize)]
struct QuestionId {
    #[serde(deserialize_with = "id_from_string_or_number")]
    id: String,
}

/// Picks `count` ids uniformly from the whole pool.
fn sample_ids<R: Rng + ?Sized>(pool: Vec<QuestionId>, count: usize, rng: &mut R) -> Vec<String> {
    let mut ids: Vec<String> = pool.into_iter().map(|row| row.id).collect();
    ids.shuffle(rng);
    ids.truncate(count);
    ids
}

/// Fetches and orders the questions of a new session.
///
/// Shuffled sessions read the ids of the entire pool page by page, sample
/// them, then load only the chosen rows.
pub async fn draw_questions(
    store: &dyn Store,
    plan: &SessionPlan,
    pool: &Pool,
) -> Result<Vec<Question>, QuizError> {
    if matches!(pool, Pool::Only(ids) if ids.is_empty()) {
        return Err(QuizError::NoQuestions);
    }

    let rows: Vec<Question> = match plan.order {
        QuestionOrder::Sequential => {
            let query = plan
                .pool_query(pool)
                .order_by("year", false)
                .order_by("number", true)
                .order_by("id", true)
                .limit(plan.question_count);
            fetch_paged(store, &query).await?
        }
        QuestionOrder::Shuffled => {
            let query = plan.pool_query(pool).columns(&["id"]).order_by("id", true);
            let candidates: Vec<QuestionId> = fetch_paged(store, &query).await?;
            let pool_size = candidates.len();
            let chosen = sample_ids(candidates, plan.question_count, &mut rand::rng());
            tracing::debug!(pool_size, drawn = chosen.len(), "Sampled question pool");
            fetch_by_ids(store, QUESTIONS, chosen.iter().map(String::as_str)).await?
        }
    };

    let questions = plan.arrange(rows, &mut rand::rng());
    if questions.is_empty() {
        return Err(QuizError::NoQuestions);
    }

    tracing::debug!(
        mode = plan.mode.as_str(),
        count = questions.len(),
        "Questions drawn for new session"
    );
    Ok(questions)
}
