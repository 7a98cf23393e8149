use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, to_bson, to_document, Bson, Document},
    error::{ErrorKind, WriteFailure},
    Collection, Database,
};
use serde_json::Value;

use super::{like_to_regex, Condition, Query, Row, Store, StoreError};
use crate::metrics::track_store_operation;

const BACKEND: &str = "mongo";

/// Row store backed by MongoDB: one collection per table, one document per row.
pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn collection(&self, table: &str) -> Collection<Document> {
        self.db.collection::<Document>(table)
    }

    async fn find(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        let filter = filter_document(&query.conditions)?;
        let mut sort = Document::new();
        for order in &query.order {
            sort.insert(order.column.clone(), if order.ascending { 1 } else { -1 });
        }

        let collection = self.collection(&query.table);
        let mut find = collection.find(filter);
        if !query.columns.is_empty() {
            let mut projection = doc! { "_id": 0 };
            for column in &query.columns {
                projection.insert(column.clone(), 1);
            }
            find = find.projection(projection);
        }
        if !sort.is_empty() {
            find = find.sort(sort);
        }
        if let Some(limit) = query.limit {
            find = find.limit(limit as i64);
        }
        if let Some(offset) = query.offset {
            find = find.skip(offset as u64);
        }

        let cursor = find.await.map_err(classify)?;
        cursor.try_collect().await.map_err(classify)
    }
}

#[async_trait]
impl Store for MongoStore {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn select(&self, query: &Query) -> Result<Vec<Row>, StoreError> {
        track_store_operation(BACKEND, "select", &query.table, async {
            self.find(query)
                .await?
                .into_iter()
                .map(row_from_document)
                .collect()
        })
        .await
    }

    async fn insert(&self, table: &str, row: Row) -> Result<Row, StoreError> {
        track_store_operation(BACKEND, "insert", table, async {
            let document = to_document(&row).map_err(|e| StoreError::Decode(e.to_string()))?;
            self.collection(table)
                .insert_one(document)
                .await
                .map_err(classify)?;
            Ok(row)
        })
        .await
    }

    async fn update(&self, query: &Query, patch: Row) -> Result<Vec<Row>, StoreError> {
        track_store_operation(BACKEND, "update", &query.table, async {
            let patch = to_document(&patch).map_err(|e| StoreError::Decode(e.to_string()))?;
            let filter = filter_document(&query.conditions)?;
            let collection = self.collection(&query.table);

            let cursor = collection
                .find(filter.clone())
                .projection(doc! { "_id": 1 })
                .await
                .map_err(classify)?;
            let ids: Vec<Bson> = cursor
                .try_collect::<Vec<Document>>()
                .await
                .map_err(classify)?
                .into_iter()
                .filter_map(|mut document| document.remove("_id"))
                .collect();
            if ids.is_empty() {
                return Ok(Vec::new());
            }

            // Re-checked: rows may have changed since the lookup
            let target = doc! { "$and": [{ "_id": { "$in": ids.clone() } }, filter] };
            collection
                .update_many(target, doc! { "$set": patch })
                .await
                .map_err(classify)?;

            let cursor = collection
                .find(doc! { "_id": { "$in": ids } })
                .await
                .map_err(classify)?;
            let documents: Vec<Document> = cursor.try_collect().await.map_err(classify)?;
            documents.into_iter().map(row_from_document).collect()
        })
        .await
    }

    async fn delete(&self, query: &Query) -> Result<u64, StoreError> {
        track_store_operation(BACKEND, "delete", &query.table, async {
            let filter = filter_document(&query.conditions)?;
            let result = self
                .collection(&query.table)
                .delete_many(filter)
                .await
                .map_err(classify)?;
            Ok(result.deleted_count)
        })
        .await
    }

    async fn rpc(&self, _function: &str, _args: Value) -> Result<Value, StoreError> {
        Err(StoreError::Unsupported(BACKEND))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.db
            .run_command(doc! { "ping": 1 })
            .await
            .map(|_| ())
            .map_err(classify)
    }
}

fn classify(err: mongodb::error::Error) -> StoreError {
    match err.kind.as_ref() {
        ErrorKind::Io(_) | ErrorKind::ServerSelection { .. } => {
            StoreError::Network(err.to_string())
        }
        ErrorKind::Authentication { .. } => StoreError::Unauthorized(err.to_string()),
        ErrorKind::Write(WriteFailure::WriteError(write_error)) if write_error.code == 11000 => {
            StoreError::Conflict(write_error.message.clone())
        }
        ErrorKind::BsonDeserialization(_) | ErrorKind::BsonSerialization(_) => {
            StoreError::Decode(err.to_string())
        }
        _ => StoreError::Rejected {
            status: 500,
            message: err.to_string(),
        },
    }
}

fn bson_value(value: &Value) -> Result<Bson, StoreError> {
    to_bson(value).map_err(|e| StoreError::Decode(e.to_string()))
}

fn filter_document(conditions: &[Condition]) -> Result<Document, StoreError> {
    let clauses = conditions
        .iter()
        .map(|condition| {
            let column = condition.column().to_string();
            let clause = match condition {
                Condition::Eq(_, v) => doc! { column: bson_value(v)? },
                Condition::Lt(_, v) => doc! { column: { "$lt": bson_value(v)? } },
                Condition::Lte(_, v) => doc! { column: { "$lte": bson_value(v)? } },
                Condition::In(_, values) => {
                    let values = values.iter().map(bson_value).collect::<Result<Vec<_>, _>>()?;
                    doc! { column: { "$in": values } }
                }
                Condition::ILike(_, pattern) => {
                    doc! { column: { "$regex": like_to_regex(pattern), "$options": "i" } }
                }
                Condition::IsNull(_) => doc! { column: Bson::Null },
            };
            Ok(clause)
        })
        .collect::<Result<Vec<Document>, StoreError>>()?;

    Ok(match clauses.len() {
        0 => Document::new(),
        1 => clauses.into_iter().next().unwrap_or_default(),
        _ => doc! { "$and": clauses },
    })
}

fn row_from_document(mut document: Document) -> Result<Row, StoreError> {
    document.remove("_id");
    match Bson::Document(document).into_relaxed_extjson() {
        Value::Object(row) => Ok(row),
        other => Err(StoreError::Decode(format!(
            "expected a document, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn like_patterns_become_case_insensitive_regexes() {
        let filter = filter_document(&[Condition::ILike("statement".into(), "%50\\%%".into())])
            .unwrap();
        assert_eq!(
            filter,
            doc! { "statement": { "$regex": "^.*50%.*$", "$options": "i" } }
        );
    }

    #[test]
    fn single_condition_is_not_wrapped() {
        let filter = filter_document(&[Condition::Eq("area".into(), json!("Penal"))]).unwrap();
        assert_eq!(filter, doc! { "area": "Penal" });
    }

    #[test]
    fn several_conditions_are_combined_with_and() {
        let filter = filter_document(&[
            Condition::Lt("questions_answered".into(), json!(3)),
            Condition::IsNull("completed_at".into()),
        ])
        .unwrap();
        let clauses = filter.get_array("$and").unwrap();
        assert_eq!(clauses.len(), 2);
        assert!(filter.keys().all(|key| key == "$and"));
    }

    #[test]
    fn documents_lose_their_object_id() {
        let row = row_from_document(doc! {
            "_id": mongodb::bson::oid::ObjectId::new(),
            "id": "q1",
            "year": 2022,
        })
        .unwrap();
        assert!(row.get("_id").is_none());
        assert_eq!(row["id"], json!("q1"));
        assert_eq!(row["year"], json!(2022));
    }
}
