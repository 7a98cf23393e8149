use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use validator::Validate;

use crate::errors::QuizError;
use crate::models::{AreaSummary, Question, QuestionView};
use crate::quiz::SessionFilter;
use crate::store::{
    escape_like, fetch_all, fetch_optional, fetch_paged, Query, Row, Store, QUESTIONS,
};

pub const DEFAULT_SEARCH_LIMIT: usize = 20;
pub const MAX_SEARCH_LIMIT: usize = 100;

/// Query string of `GET /api/v1/questions`.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct QuestionSearch {
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
    /// Free text matched against the statement.
    #[validate(length(min = 2, max = 200))]
    pub q: Option<String>,
    #[validate(range(min = 1, max = 100))]
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl QuestionSearch {
    pub fn filter(&self) -> SessionFilter {
        SessionFilter {
            area: self.area.clone(),
            theme: self.theme.clone(),
            subject: self.subject.clone(),
            exam: self.exam.clone(),
            year: self.year,
        }
    }

    pub fn query(&self) -> Query {
        let mut query = self.filter().apply(Query::table(QUESTIONS));
        if let Some(text) = self.q.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            query = query.ilike("statement", format!("%{}%", escape_like(text)));
        }
        query
            .order_by("year", false)
            .order_by("number", true)
            .limit(self.limit.unwrap_or(DEFAULT_SEARCH_LIMIT).min(MAX_SEARCH_LIMIT))
            .offset(self.offset.unwrap_or(0))
    }
}

pub struct QuestionService {
    store: Arc<dyn Store>,
}

impl QuestionService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn get(&self, question_id: &str) -> Result<Question, QuizError> {
        fetch_optional(self.store.as_ref(), Query::table(QUESTIONS).eq("id", question_id))
            .await?
            .ok_or_else(|| QuizError::NotFound(format!("question {} not found", question_id)))
    }

    pub async fn search(&self, search: &QuestionSearch) -> Result<Vec<QuestionView>, QuizError> {
        search.validate()?;
        let questions: Vec<Question> = fetch_all(self.store.as_ref(), &search.query()).await?;
        Ok(questions.iter().map(QuestionView::from).collect())
    }

    /// Areas of the question bank with their question counts, by name.
    pub async fn areas(&self) -> Result<Vec<AreaSummary>, QuizError> {
        let query = Query::table(QUESTIONS)
            .columns(&["area"])
            .order_by("id", true);
        let rows: Vec<Row> = fetch_paged(self.store.as_ref(), &query).await?;

        let mut counts: BTreeMap<String, u32> = BTreeMap::new();
        for row in rows {
            if let Some(area) = row.get("area").and_then(|v| v.as_str()) {
                *counts.entry(area.to_string()).or_insert(0) += 1;
            }
        }

        Ok(counts
            .into_iter()
            .map(|(area, question_count)| AreaSummary {
                area,
                question_count,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Condition, MemoryStore};
    use serde_json::json;

    async fn service() -> QuestionService {
        let store = MemoryStore::new();
        let rows: Vec<_> = [
            (1, "Direito Civil", 2021, "Usucapião extraordinária"),
            (2, "Direito Civil", 2023, "Posse de boa-fé"),
            (3, "Direito Penal", 2023, "Legítima defesa putativa"),
        ]
        .into_iter()
        .map(|(id, area, year, statement)| {
            json!({
                "id": id,
                "year": year,
                "exam": "Exame",
                "number": id,
                "area": area,
                "statement": statement,
                "alternative_a": "a",
                "alternative_b": "b",
                "alternative_c": "c",
                "alternative_d": "d",
                "correct_answer": "A",
                "explanation": "..."
            })
        })
        .collect();
        store.seed(QUESTIONS, &rows).await.unwrap();
        QuestionService::new(Arc::new(store))
    }

    #[test]
    fn free_text_becomes_escaped_ilike() {
        let search = QuestionSearch {
            q: Some(" 100% _culpa ".to_string()),
            limit: Some(500),
            ..QuestionSearch::default()
        };
        let query = search.query();
        assert_eq!(
            query.conditions[0],
            Condition::ILike("statement".to_string(), "%100\\% \\_culpa%".to_string())
        );
        assert_eq!(query.limit, Some(MAX_SEARCH_LIMIT));
    }

    #[tokio::test]
    async fn search_filters_and_hides_keys() {
        let service = service().await;
        let found = service
            .search(&QuestionSearch {
                area: Some("Direito Civil".to_string()),
                q: Some("posse".to_string()),
                ..QuestionSearch::default()
            })
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "2");
    }

    #[tokio::test]
    async fn wildcard_characters_in_search_text_are_literal() {
        let store = MemoryStore::new();
        let rows: Vec<_> = [(1, "Nos termos do art_5 da lei"), (2, "Nos termos do art. 5 da lei")]
            .into_iter()
            .map(|(id, statement)| {
                json!({
                    "id": id, "year": 2022, "exam": "Exame", "number": id,
                    "area": "Direito Civil", "statement": statement,
                    "alternative_a": "a", "alternative_b": "b",
                    "alternative_c": "c", "alternative_d": "d",
                    "correct_answer": "A"
                })
            })
            .collect();
        store.seed(QUESTIONS, &rows).await.unwrap();
        let service = QuestionService::new(Arc::new(store));

        let found = service
            .search(&QuestionSearch {
                q: Some("ART_5".to_string()),
                ..QuestionSearch::default()
            })
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "1");
    }

    #[tokio::test]
    async fn areas_are_counted_across_pages() {
        let store = MemoryStore::with_max_rows(2);
        let rows: Vec<_> = (1..=5)
            .map(|id| {
                json!({
                    "id": id, "year": 2022, "exam": "Exame", "number": id,
                    "area": if id % 2 == 0 { "Direito Penal" } else { "Direito Civil" },
                    "statement": "Enunciado",
                    "alternative_a": "a", "alternative_b": "b",
                    "alternative_c": "c", "alternative_d": "d",
                    "correct_answer": "A"
                })
            })
            .collect();
        store.seed(QUESTIONS, &rows).await.unwrap();

        let areas = QuestionService::new(Arc::new(store)).areas().await.unwrap();
        let counts: Vec<(&str, u32)> = areas
            .iter()
            .map(|a| (a.area.as_str(), a.question_count))
            .collect();
        assert_eq!(counts, vec![("Direito Civil", 3), ("Direito Penal", 2)]);
    }

    #[tokio::test]
    async fn invalid_search_is_rejected() {
        let service = service().await;
        let result = service
            .search(&QuestionSearch {
                year: Some(1800),
                ..QuestionSearch::default()
            })
            .await;
        assert!(matches!(result, Err(QuizError::Validation(_))));
    }

    #[tokio::test]
    async fn areas_are_counted() {
        let service = service().await;
        let areas = service.areas().await.unwrap();
        assert_eq!(
            areas,
            vec![
                AreaSummary {
                    area: "Direito Civil".to_string(),
                    question_count: 2
                },
                AreaSummary {
                    area: "Direito Penal".to_string(),
                    question_count: 1
                },
            ]
        );
    }

    #[tokio::test]
    async fn missing_question_is_not_found() {
        let service = service().await;
        assert_eq!(service.get("3").await.unwrap().area, "Direito Penal");
        assert!(matches!(service.get("99").await, Err(QuizError::NotFound(_))));
    }
}
