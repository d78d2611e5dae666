use chrono::{DateTime, Utc};
use mongodb::bson::{doc, oid::ObjectId, Bson, DateTime as BsonDateTime, Document};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::Todo;

pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_DESCRIPTION_LEN: usize = 2000;

const DEFAULT_PAGE: i64 = 1;
const DEFAULT_LIMIT: i64 = 20;
const MAX_LIMIT: i64 = 100;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoResponse {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Todo> for TodoResponse {
    fn from(value: &Todo) -> Self {
        Self {
            id: value.id.map_or_else(String::new, |id| id.to_hex()),
            title: value.title.clone(),
            description: value.description.clone(),
            completed: value.completed,
            created_at: value.created_at.to_chrono(),
            updated_at: value.updated_at.to_chrono(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TodoPage {
    pub items: Vec<TodoResponse>,
    pub total: u64,
    pub page: i64,
    pub limit: i64,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error: None,
            details: None,
        }
    }

    pub fn with_error(message: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error: Some(error.into()),
            details: None,
        }
    }

    pub fn service_unavailable() -> Self {
        Self {
            message: "Service temporarily unavailable".to_string(),
            error: Some("Cannot reach the database, please retry shortly".to_string()),
            details: Some("Database connection unavailable".to_string()),
        }
    }
}

/// A validated create payload. `completed` stays optional so the document
/// default applies when the caller omitted it.
#[derive(Debug, PartialEq)]
pub struct CreateTodo {
    pub title: String,
    pub description: Option<String>,
    pub completed: Option<bool>,
}

pub fn parse_create(body: &Value) -> Result<CreateTodo, String> {
    let obj = body
        .as_object()
        .ok_or_else(|| "request body must be a JSON object".to_string())?;

    let title = match obj.get("title") {
        None | Some(Value::Null) => return Err("title is required".to_string()),
        Some(Value::String(raw)) => validate_title(raw)?,
        Some(_) => return Err("title must be a string".to_string()),
    };

    let description = match obj.get("description") {
        None | Some(Value::Null) => None,
        Some(Value::String(raw)) => Some(validate_description(raw)?),
        Some(_) => return Err("description must be a string".to_string()),
    };

    let completed = match obj.get("completed") {
        None => None,
        Some(Value::Bool(flag)) => Some(*flag),
        Some(_) => return Err("completed must be a boolean".to_string()),
    };

    Ok(CreateTodo {
        title,
        description,
        completed,
    })
}

/// A validated partial update. `description: Some(None)` means the caller
/// explicitly sent `null` and the stored field is cleared.
#[derive(Debug, Default, PartialEq)]
pub struct UpdateTodo {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub completed: Option<bool>,
}

pub fn parse_update(body: &Value) -> Result<UpdateTodo, String> {
    let obj = body
        .as_object()
        .ok_or_else(|| "request body must be a JSON object".to_string())?;

    let mut update = UpdateTodo::default();

    if let Some(value) = obj.get("title") {
        match value {
            Value::String(raw) => update.title = Some(validate_title(raw)?),
            _ => return Err("title must be a non-empty string".to_string()),
        }
    }

    if let Some(value) = obj.get("description") {
        match value {
            Value::Null => update.description = Some(None),
            Value::String(raw) => update.description = Some(Some(validate_description(raw)?)),
            _ => return Err("description must be a string or null".to_string()),
        }
    }

    if let Some(value) = obj.get("completed") {
        match value {
            Value::Bool(flag) => update.completed = Some(*flag),
            _ => return Err("completed must be a boolean".to_string()),
        }
    }

    if update == UpdateTodo::default() {
        return Err("no updatable fields in request body".to_string());
    }

    Ok(update)
}

impl UpdateTodo {
    /// Turns the validated fields into a `$set` document, refreshing
    /// `updatedAt` alongside whatever the caller changed.
    pub fn into_set_document(self) -> Document {
        let mut set = doc! { "updatedAt": BsonDateTime::now() };
        if let Some(title) = self.title {
            set.insert("title", title);
        }
        if let Some(description) = self.description {
            set.insert("description", description.map_or(Bson::Null, Bson::String));
        }
        if let Some(completed) = self.completed {
            set.insert("completed", completed);
        }
        set
    }
}

fn validate_title(raw: &str) -> Result<String, String> {
    let title = raw.trim();
    if title.is_empty() {
        return Err("title must not be empty".to_string());
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(format!("title must be at most {MAX_TITLE_LEN} characters"));
    }
    Ok(title.to_string())
}

fn validate_description(raw: &str) -> Result<String, String> {
    let description = raw.trim();
    if description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(format!(
            "description must be at most {MAX_DESCRIPTION_LEN} characters"
        ));
    }
    Ok(description.to_string())
}

pub fn parse_object_id(raw: &str) -> Result<ObjectId, String> {
    ObjectId::parse_str(raw.trim())
        .map_err(|_| "id must be a 24-character hexadecimal string".to_string())
}

/// Raw pagination query. Values are kept as strings so anything that does not
/// parse falls back to the defaults instead of failing extraction.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
}

impl ListQuery {
    pub fn page(&self) -> i64 {
        match parse_param(&self.page) {
            Some(page) if page >= 1 => page,
            _ => DEFAULT_PAGE,
        }
    }

    pub fn limit(&self) -> i64 {
        match parse_param(&self.limit) {
            Some(limit) if limit >= 1 => limit.min(MAX_LIMIT),
            _ => DEFAULT_LIMIT,
        }
    }
}

fn parse_param(raw: &Option<String>) -> Option<i64> {
    raw.as_deref().and_then(|v| v.trim().parse().ok())
}
