use chrono::Utc;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::errors::QuizError;
use crate::metrics::FAVORITE_TOGGLES_TOTAL;
use crate::models::{Favorite, FavoriteEntry, FavoriteToggle, Question, QuestionView};
use crate::store::{
    fetch_by_ids, fetch_optional, fetch_paged, insert_record, Query, Store, StoreError, FAVORITES,
    QUESTIONS,
};

const TOGGLE_RPC: &str = "toggle_favorite";

/// Keys of favorite toggles currently being applied.
#[derive(Debug, Default)]
pub struct InFlight {
    keys: Mutex<HashSet<(String, String)>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock leaves the set itself consistent
    fn keys(&self) -> MutexGuard<'_, HashSet<(String, String)>> {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claims `(user_id, question_id)`; `None` while another claim is held.
    pub fn try_acquire(
        self: &Arc<Self>,
        user_id: &str,
        question_id: &str,
    ) -> Option<InFlightGuard> {
        let key = (user_id.to_string(), question_id.to_string());
        if !self.keys().insert(key.clone()) {
            return None;
        }
        Some(InFlightGuard {
            owner: Arc::clone(self),
            key,
        })
    }

}

pub struct InFlightGuard {
    owner: Arc<InFlight>,
    key: (String, String),
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.owner.keys().remove(&self.key);
    }
}

fn user_favorites(user_id: &str) -> Query {
    Query::table(FAVORITES)
        .eq("user_id", user_id)
        .order_by("created_at", false)
        .order_by("question_id", true)
}

/// Question ids the user marked as favorite, newest first.
pub async fn favorite_question_ids(
    store: &dyn Store,
    user_id: &str,
) -> Result<Vec<String>, StoreError> {
    let favorites: Vec<Favorite> = fetch_paged(store, &user_favorites(user_id)).await?;
    Ok(favorites.into_iter().map(|f| f.question_id).collect())
}

pub struct FavoriteService {
    store: Arc<dyn Store>,
    in_flight: Arc<InFlight>,
}

impl FavoriteService {
    pub fn new(store: Arc<dyn Store>, in_flight: Arc<InFlight>) -> Self {
        Self { store, in_flight }
    }

    pub async fn toggle(&self, user_id: &str, question_id: &str) -> Result<FavoriteToggle, QuizError> {
        let _guard = self
            .in_flight
            .try_acquire(user_id, question_id)
            .ok_or(QuizError::ToggleInProgress)?;

        let exists: Option<Question> = fetch_optional(
            self.store.as_ref(),
            Query::table(QUESTIONS).eq("id", question_id),
        )
        .await?;
        if exists.is_none() {
            return Err(QuizError::NotFound(format!(
                "question {} not found",
                question_id
            )));
        }

        let args = json!({ "p_user_id": user_id, "p_question_id": question_id });
        let favorited = match self.store.rpc(TOGGLE_RPC, args).await {
            Ok(value) => match rpc_state(&value) {
                Some(state) => state,
                None => {
                    tracing::warn!("Unexpected {} response: {}", TOGGLE_RPC, value);
                    self.toggle_rows(user_id, question_id).await?
                }
            },
            Err(StoreError::Unsupported(_)) | Err(StoreError::NotFound(_)) => {
                self.toggle_rows(user_id, question_id).await?
            }
            Err(e) => return Err(e.into()),
        };

        FAVORITE_TOGGLES_TOTAL
            .with_label_values(&[if favorited { "added" } else { "removed" }])
            .inc();
        tracing::info!(
            user_id,
            question_id,
            favorited,
            "Favorite toggled"
        );

        Ok(FavoriteToggle {
            question_id: question_id.to_string(),
            favorited,
        })
    }

    async fn toggle_rows(&self, user_id: &str, question_id: &str) -> Result<bool, StoreError> {
        let query = Query::table(FAVORITES)
            .eq("user_id", user_id)
            .eq("question_id", question_id);

        if self.store.delete(&query).await? > 0 {
            return Ok(false);
        }

        let favorite = Favorite {
            user_id: user_id.to_string(),
            question_id: question_id.to_string(),
            created_at: Utc::now(),
        };
        insert_record(self.store.as_ref(), FAVORITES, &favorite).await?;
        Ok(true)
    }

    pub async fn is_favorite(&self, user_id: &str, question_id: &str) -> Result<bool, QuizError> {
        let found: Option<Favorite> = fetch_optional(
            self.store.as_ref(),
            Query::table(FAVORITES)
                .eq("user_id", user_id)
                .eq("question_id", question_id),
        )
        .await?;
        Ok(found.is_some())
    }

    pub async fn list(&self, user_id: &str) -> Result<Vec<FavoriteEntry>, QuizError> {
        let favorites: Vec<Favorite> =
            fetch_paged(self.store.as_ref(), &user_favorites(user_id)).await?;
        if favorites.is_empty() {
            return Ok(Vec::new());
        }

        let questions: Vec<Question> = fetch_by_ids(
            self.store.as_ref(),
            QUESTIONS,
            favorites.iter().map(|f| f.question_id.as_str()),
        )
        .await?;
        let by_id: HashMap<&str, &Question> =
            questions.iter().map(|q| (q.id.as_str(), q)).collect();

        Ok(favorites
            .iter()
            .filter_map(|favorite| {
                by_id
                    .get(favorite.question_id.as_str())
                    .map(|question| FavoriteEntry {
                        question: QuestionView::from(*question),
                        favorited_at: favorite.created_at,
                    })
            })
            .collect())
    }
}

/// Reads the new state from `true`, `{"favorited": true}` or a one-row array.
fn rpc_state(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(state) => Some(*state),
        Value::Object(map) => map
            .get("favorited")
            .or_else(|| map.get(TOGGLE_RPC))
            .and_then(Value::as_bool),
        Value::Array(rows) if rows.len() == 1 => rpc_state(&rows[0]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    async fn service() -> (FavoriteService, Arc<MemoryStore>, Arc<InFlight>) {
        let store = Arc::new(MemoryStore::new());
        store
            .seed(
                QUESTIONS,
                &[json!({
                    "id": "q1",
                    "year": 2020,
                    "exam": "XXXI Exame",
                    "number": 10,
                    "area": "Direito do Trabalho",
                    "statement": "...",
                    "alternative_a": "a",
                    "alternative_b": "b",
                    "alternative_c": "c",
                    "alternative_d": "d",
                    "correct_answer": "D"
                })],
            )
            .await
            .unwrap();
        let in_flight = Arc::new(InFlight::new());
        (
            FavoriteService::new(store.clone(), in_flight.clone()),
            store,
            in_flight,
        )
    }

    #[tokio::test]
    async fn toggling_twice_restores_original_state() {
        let (service, store, _) = service().await;

        assert!(service.toggle("u1", "q1").await.unwrap().favorited);
        assert!(service.is_favorite("u1", "q1").await.unwrap());
        assert_eq!(service.list("u1").await.unwrap().len(), 1);

        assert!(!service.toggle("u1", "q1").await.unwrap().favorited);
        assert!(!service.is_favorite("u1", "q1").await.unwrap());
        assert!(store.rows(FAVORITES).await.is_empty());
    }

    #[tokio::test]
    async fn concurrent_toggle_is_rejected() {
        let (service, _, in_flight) = service().await;
        let guard = in_flight.try_acquire("u1", "q1").unwrap();

        assert!(matches!(
            service.toggle("u1", "q1").await,
            Err(QuizError::ToggleInProgress)
        ));

        drop(guard);
        assert!(service.toggle("u1", "q1").await.is_ok());
    }

    #[tokio::test]
    async fn unknown_question_is_not_found_and_releases_guard() {
        let (service, _, in_flight) = service().await;
        assert!(matches!(
            service.toggle("u1", "missing").await,
            Err(QuizError::NotFound(_))
        ));
        assert!(in_flight.try_acquire("u1", "missing").is_some());
    }

    #[test]
    fn poisoned_lock_still_releases_claims() {
        let in_flight = Arc::new(InFlight::new());
        let held = in_flight.clone();
        let _ = std::thread::spawn(move || {
            let _keys = held.keys.lock().unwrap();
            panic!("panic while holding the toggle set");
        })
        .join();
        assert!(in_flight.keys.is_poisoned());

        let guard = in_flight.try_acquire("u1", "q1").expect("claim after poisoning");
        assert!(in_flight.try_acquire("u1", "q1").is_none());
        drop(guard);
        assert!(in_flight.try_acquire("u1", "q1").is_some());
    }

    #[test]
    fn rpc_responses_are_understood() {
        assert_eq!(rpc_state(&json!(true)), Some(true));
        assert_eq!(rpc_state(&json!({ "favorited": false })), Some(false));
        assert_eq!(rpc_state(&json!([{ "toggle_favorite": true }])), Some(true));
        assert_eq!(rpc_state(&json!("yes")), None);
    }
}
