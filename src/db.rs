use std::sync::Arc;

use anyhow::anyhow;
use mongodb::bson::{doc, oid::ObjectId};
use mongodb::options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument};
use mongodb::Collection;

use crate::connection::{is_connection_error, ConnectionManager};
use crate::dto::{CreateTodo, UpdateTodo};
use crate::model::Todo;

const COLLECTION_NAME: &str = "todos";

/// CRUD operations against the todos collection. Borrows the active client
/// from the connection manager per call and reports connection-level failures
/// back to it so reconnection kicks in.
pub struct TodoStore {
    manager: Arc<ConnectionManager>,
}

impl TodoStore {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }

    pub async fn create(&self, payload: CreateTodo) -> Result<Todo, anyhow::Error> {
        let collection = self.collection()?;
        let todo = Todo::new(payload);
        let inserted = self.track(collection.insert_one(&todo, None).await)?;
        let id = inserted
            .inserted_id
            .as_object_id()
            .ok_or_else(|| anyhow!("insert did not return an ObjectId"))?;
        let created = self
            .track(collection.find_one(doc! { "_id": id }, None).await)?
            .ok_or_else(|| anyhow!("todo {id} missing right after insert"))?;
        Ok(created)
    }

    /// Newest first, with the total computed independently of the page window.
    pub async fn list(&self, page: i64, limit: i64) -> Result<(Vec<Todo>, u64), anyhow::Error> {
        let collection = self.collection()?;
        let skip = ((page - 1) * limit).max(0) as u64;
        let options = FindOptions::builder()
            .sort(doc! { "createdAt": -1 })
            .skip(skip)
            .limit(limit)
            .build();
        let mut cursor = self.track(collection.find(doc! {}, options).await)?;
        let mut items = Vec::new();
        while self.track(cursor.advance().await)? {
            items.push(cursor.deserialize_current()?);
        }
        let total = self.track(collection.count_documents(doc! {}, None).await)?;
        Ok((items, total))
    }

    pub async fn update(
        &self,
        id: ObjectId,
        update: UpdateTodo,
    ) -> Result<Option<Todo>, anyhow::Error> {
        let collection = self.collection()?;
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        let updated = self.track(
            collection
                .find_one_and_update(
                    doc! { "_id": id },
                    doc! { "$set": update.into_set_document() },
                    options,
                )
                .await,
        )?;
        Ok(updated)
    }

    /// Hard delete. Returns whether a document was actually removed.
    pub async fn delete(&self, id: ObjectId) -> Result<bool, anyhow::Error> {
        let collection = self.collection()?;
        let result = self.track(collection.delete_one(doc! { "_id": id }, None).await)?;
        Ok(result.deleted_count > 0)
    }

    fn collection(&self) -> Result<Collection<Todo>, anyhow::Error> {
        let client = self
            .manager
            .client()
            .ok_or_else(|| anyhow!("no active database connection"))?;
        Ok(client
            .database(&self.manager.database_name())
            .collection(COLLECTION_NAME))
    }

    fn track<T>(
        &self,
        result: Result<T, mongodb::error::Error>,
    ) -> Result<T, mongodb::error::Error> {
        if let Err(err) = &result {
            if is_connection_error(err) {
                self.manager.mark_disconnected(err);
            }
        }
        result
    }
}
