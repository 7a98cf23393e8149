use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::question::{id_from_string_or_number, QuestionView};

/// Row of the `favorites` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Favorite {
    pub user_id: String,
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub question_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FavoriteToggle {
    pub question_id: String,
    pub favorited: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FavoriteEntry {
    pub question: QuestionView,
    pub favorited_at: DateTime<Utc>,
}

/// Row of the `question_notes` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub user_id: String,
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub question_id: String,
    pub content: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpsertNoteRequest {
    #[validate(length(min = 1, max = 5000))]
    pub content: String,
}
