use std::sync::Arc;

use actix_web::dev::HttpServiceFactory;
use actix_web::{delete, get, patch, post, web, HttpResponse};
use log::error;
use serde_json::Value;

use crate::connection::ConnectionManager;
use crate::db::TodoStore;
use crate::dto::{
    parse_create, parse_object_id, parse_update, ErrorBody, ListQuery, TodoPage, TodoResponse,
};
use crate::middleware::ConnectionGate;

/// The `/todos` scope, gated on the store connection.
pub fn routes(manager: Arc<ConnectionManager>) -> impl HttpServiceFactory {
    web::scope("/todos")
        .wrap(ConnectionGate::new(manager))
        .service(create_todo)
        .service(list_todos)
        .service(update_todo)
        .service(delete_todo)
}

#[post("")]
pub async fn create_todo(store: web::Data<TodoStore>, body: web::Json<Value>) -> HttpResponse {
    let payload = match parse_create(&body) {
        Ok(payload) => payload,
        Err(message) => return bad_request(message),
    };
    match store.create(payload).await {
        Ok(todo) => HttpResponse::Created().json(TodoResponse::from(&todo)),
        Err(err) => backend_error("failed to create todo", err),
    }
}

#[get("")]
pub async fn list_todos(store: web::Data<TodoStore>, query: web::Query<ListQuery>) -> HttpResponse {
    let page = query.page();
    let limit = query.limit();
    match store.list(page, limit).await {
        Ok((todos, total)) => HttpResponse::Ok().json(TodoPage {
            items: todos.iter().map(TodoResponse::from).collect(),
            total,
            page,
            limit,
        }),
        Err(err) => backend_error("failed to list todos", err),
    }
}

#[patch("/{id}")]
pub async fn update_todo(
    store: web::Data<TodoStore>,
    id: web::Path<String>,
    body: web::Json<Value>,
) -> HttpResponse {
    let id = match parse_object_id(&id) {
        Ok(id) => id,
        Err(message) => return bad_request(message),
    };
    let update = match parse_update(&body) {
        Ok(update) => update,
        Err(message) => return bad_request(message),
    };
    match store.update(id, update).await {
        Ok(Some(todo)) => HttpResponse::Ok().json(TodoResponse::from(&todo)),
        Ok(None) => todo_not_found(),
        Err(err) => backend_error("failed to update todo", err),
    }
}

#[delete("/{id}")]
pub async fn delete_todo(store: web::Data<TodoStore>, id: web::Path<String>) -> HttpResponse {
    let id = match parse_object_id(&id) {
        Ok(id) => id,
        Err(message) => return bad_request(message),
    };
    match store.delete(id).await {
        Ok(true) => HttpResponse::NoContent().finish(),
        Ok(false) => todo_not_found(),
        Err(err) => backend_error("failed to delete todo", err),
    }
}

fn bad_request(message: String) -> HttpResponse {
    HttpResponse::BadRequest().json(ErrorBody::new(message))
}

fn todo_not_found() -> HttpResponse {
    HttpResponse::NotFound().json(ErrorBody::new("no todo with that id"))
}

fn backend_error(message: &str, err: anyhow::Error) -> HttpResponse {
    error!("{message}: {err:#}");
    HttpResponse::InternalServerError().json(ErrorBody::with_error(message, err.to_string()))
}
