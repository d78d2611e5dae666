use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};

use crate::dto::CreateTodo;

/// A single todo document as stored in MongoDB. Field names are camelCase on
/// the wire so the collection stays compatible with clients sorting on
/// `createdAt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Todo {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub completed: bool,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl Todo {
    /// Builds a fresh document from a validated create payload. The id is
    /// left for the driver to assign on insert.
    pub fn new(payload: CreateTodo) -> Self {
        let now = DateTime::now();
        Self {
            id: None,
            title: payload.title,
            description: payload.description,
            completed: payload.completed.unwrap_or(false),
            created_at: now,
            updated_at: now,
        }
    }
}
