use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;

use crate::errors::QuizError;
use crate::models::Note;
use crate::store::{
    fetch_all, fetch_optional, from_row, insert_record, Query, Row, Store, QUESTION_NOTES,
};

pub struct NoteService {
    store: Arc<dyn Store>,
}

impl NoteService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    fn note_query(user_id: &str, question_id: &str) -> Query {
        Query::table(QUESTION_NOTES)
            .eq("user_id", user_id)
            .eq("question_id", question_id)
    }

    pub async fn get(&self, user_id: &str, question_id: &str) -> Result<Option<Note>, QuizError> {
        Ok(fetch_optional(self.store.as_ref(), Self::note_query(user_id, question_id)).await?)
    }

    pub async fn upsert(
        &self,
        user_id: &str,
        question_id: &str,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<Note, QuizError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(QuizError::Validation("note content must not be blank".to_string()));
        }

        let mut patch = Row::new();
        patch.insert("content".into(), json!(content));
        patch.insert("updated_at".into(), json!(now));

        let updated = self
            .store
            .update(&Self::note_query(user_id, question_id), patch)
            .await?;
        if let Some(row) = updated.into_iter().next() {
            tracing::debug!(user_id, question_id, "Note updated");
            return Ok(from_row(row)?);
        }

        let note = Note {
            user_id: user_id.to_string(),
            question_id: question_id.to_string(),
            content: content.to_string(),
            updated_at: now,
        };
        insert_record(self.store.as_ref(), QUESTION_NOTES, &note).await?;
        tracing::debug!(user_id, question_id, "Note created");
        Ok(note)
    }

    /// Returns false when there was no note to delete.
    pub async fn delete(&self, user_id: &str, question_id: &str) -> Result<bool, QuizError> {
        let deleted = self
            .store
            .delete(&Self::note_query(user_id, question_id))
            .await?;
        Ok(deleted > 0)
    }

    pub async fn list(&self, user_id: &str) -> Result<Vec<Note>, QuizError> {
        Ok(fetch_all(
            self.store.as_ref(),
            &Query::table(QUESTION_NOTES)
                .eq("user_id", user_id)
                .order_by("updated_at", false),
        )
        .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Duration;

    #[tokio::test]
    async fn upsert_creates_then_updates() {
        let store = Arc::new(MemoryStore::new());
        let service = NoteService::new(store.clone());
        let now = Utc::now();

        let created = service.upsert("u1", "q1", "  Súmula 331 TST ", now).await.unwrap();
        assert_eq!(created.content, "Súmula 331 TST");

        let later = now + Duration::minutes(5);
        let updated = service.upsert("u1", "q1", "Revisar", later).await.unwrap();
        assert_eq!(updated.content, "Revisar");
        assert_eq!(updated.updated_at, later);
        assert_eq!(store.rows(QUESTION_NOTES).await.len(), 1);

        let fetched = service.get("u1", "q1").await.unwrap().unwrap();
        assert_eq!(fetched.content, "Revisar");
        assert!(service.get("u2", "q1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn blank_content_is_rejected() {
        let service = NoteService::new(Arc::new(MemoryStore::new()));
        assert!(matches!(
            service.upsert("u1", "q1", "   ", Utc::now()).await,
            Err(QuizError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn list_is_newest_first_and_delete_reports_absence() {
        let service = NoteService::new(Arc::new(MemoryStore::new()));
        let now = Utc::now();
        service.upsert("u1", "q1", "first", now).await.unwrap();
        service
            .upsert("u1", "q2", "second", now + Duration::seconds(1))
            .await
            .unwrap();

        let notes = service.list("u1").await.unwrap();
        assert_eq!(notes[0].question_id, "q2");

        assert!(service.delete("u1", "q1").await.unwrap());
        assert!(!service.delete("u1", "q1").await.unwrap());
    }
}
