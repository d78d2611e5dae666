use std::sync::Arc;

use actix_web::http::Method;
use actix_web::middleware::{DefaultHeaders, Logger};
use actix_web::{get, web, App, HttpResponse, HttpServer, Responder};
use log::{error, info};
use serde_json::json;

mod api;
mod config;
mod connection;
mod db;
mod dto;
mod middleware;
mod model;

use config::Config;
use connection::ConnectionManager;
use db::TodoStore;
use dto::ErrorBody;

#[get("/")]
async fn index() -> impl Responder {
    HttpResponse::Ok().json(json!({
        "message": "Todo Backend API",
        "status": "running",
        "endpoints": {
            "health": "/health",
            "todos": "/todos"
        }
    }))
}

/// Always 200, even while disconnected: the body carries the connection state
/// so orchestrators can tell "degraded" from "down".
#[get("/health")]
async fn health(manager: web::Data<ConnectionManager>) -> impl Responder {
    let status = manager.status();
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "mongodb": {
            "status": status.state.as_str(),
            "readyState": status.ready_state,
            "connected": status.connected,
            "host": status.host,
            "name": status.database,
            "lastError": status.last_error,
        },
        "connectionAttempts": status.attempts,
        "hasMongoUri": status.has_uri,
    }))
}

async fn preflight() -> HttpResponse {
    HttpResponse::NoContent().finish()
}

async fn not_found() -> HttpResponse {
    HttpResponse::NotFound().json(ErrorBody::new("resource not found"))
}

fn cors_headers() -> DefaultHeaders {
    DefaultHeaders::new()
        .add(("Access-Control-Allow-Origin", "*"))
        .add(("Access-Control-Allow-Methods", "GET, POST, PATCH, DELETE, OPTIONS"))
        .add(("Access-Control-Allow-Headers", "Content-Type, Authorization"))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let config = Config::from_env();
    let port = config.port;
    let manager = Arc::new(ConnectionManager::new(&config));
    {
        // The server comes up regardless of the store; the gate rejects CRUD
        // requests until this initial connect (or a later retry) succeeds.
        let manager = manager.clone();
        actix_web::rt::spawn(async move { manager.connect().await });
    }

    let manager_data = web::Data::from(manager.clone());
    let store_data = web::Data::new(TodoStore::new(manager.clone()));

    let server = HttpServer::new(move || {
        App::new()
            .app_data(manager_data.clone())
            .app_data(store_data.clone())
            .wrap(Logger::default())
            .wrap(cors_headers())
            .route("/{path:.*}", web::method(Method::OPTIONS).to(preflight))
            .service(index)
            .service(health)
            .service(api::routes(manager.clone()))
            .default_service(web::route().to(not_found))
    });

    let server = match server.bind(("0.0.0.0", port)) {
        Ok(server) => server,
        Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
            error!(
                "port {port} is already in use, set PORT to a free port or stop \
                 the process currently bound to it"
            );
            std::process::exit(1);
        }
        Err(err) => return Err(err),
    };

    info!("listening on 0.0.0.0:{port}");
    server.run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;
    use actix_web::test::{self, TestRequest};
    use serde_json::Value;

    fn offline_state() -> (Arc<ConnectionManager>, web::Data<TodoStore>) {
        let config = Config::with_uri("mongodb://localhost:27017/todo".to_string());
        let manager = Arc::new(ConnectionManager::new(&config));
        let store = web::Data::new(TodoStore::new(manager.clone()));
        (manager, store)
    }

    #[actix_web::test]
    async fn index_describes_the_api() {
        let app = test::init_service(App::new().service(index)).await;
        let resp = test::call_service(&app, TestRequest::default().to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["endpoints"]["todos"], "/todos");
    }

    #[actix_web::test]
    async fn health_reports_disconnected_state() {
        let (manager, _store) = offline_state();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::from(manager))
                .service(health),
        )
        .await;
        let resp =
            test::call_service(&app, TestRequest::default().uri("/health").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["mongodb"]["status"], "disconnected");
        assert_eq!(body["mongodb"]["readyState"], 0);
        assert_eq!(body["mongodb"]["connected"], false);
        assert_eq!(body["connectionAttempts"], 0);
        assert_eq!(body["hasMongoUri"], true);
    }

    #[actix_web::test]
    async fn gate_rejects_every_verb_while_disconnected() {
        let (manager, store) = offline_state();
        let app = test::init_service(
            App::new()
                .app_data(store)
                .service(api::routes(manager.clone())),
        )
        .await;

        let requests = vec![
            TestRequest::post()
                .uri("/todos")
                .set_json(json!({ "title": "t" })),
            TestRequest::get().uri("/todos"),
            TestRequest::patch()
                .uri("/todos/507f1f77bcf86cd799439011")
                .set_json(json!({ "completed": true })),
            TestRequest::delete().uri("/todos/507f1f77bcf86cd799439011"),
        ];
        for request in requests {
            let resp = test::call_service(&app, request.to_request()).await;
            assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
            let body: Value = test::read_body_json(resp).await;
            assert_eq!(body["details"], "Database connection unavailable");
            assert!(body["message"].is_string());
        }
    }

    #[actix_web::test]
    async fn malformed_id_is_rejected_before_any_store_access() {
        // No gate here: the handlers must 400 on the id without ever touching
        // the (absent) connection.
        let (_manager, store) = offline_state();
        let app = test::init_service(
            App::new().app_data(store).service(
                web::scope("/todos")
                    .service(api::update_todo)
                    .service(api::delete_todo),
            ),
        )
        .await;

        let resp = test::call_service(
            &app,
            TestRequest::patch()
                .uri("/todos/not-an-id")
                .set_json(json!({ "completed": true }))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = test::call_service(
            &app,
            TestRequest::delete().uri("/todos/123abc").to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert!(body["message"].as_str().unwrap().contains("id"));
    }

    #[actix_web::test]
    async fn invalid_update_body_is_rejected_before_any_store_access() {
        let (_manager, store) = offline_state();
        let app = test::init_service(
            App::new()
                .app_data(store)
                .service(web::scope("/todos").service(api::update_todo)),
        )
        .await;
        let resp = test::call_service(
            &app,
            TestRequest::patch()
                .uri("/todos/507f1f77bcf86cd799439011")
                .set_json(json!({}))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn options_preflight_short_circuits_with_cors_headers() {
        let app = test::init_service(
            App::new()
                .wrap(cors_headers())
                .route("/{path:.*}", web::method(Method::OPTIONS).to(preflight)),
        )
        .await;
        let resp = test::call_service(
            &app,
            TestRequest::default()
                .method(Method::OPTIONS)
                .uri("/todos")
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        let headers = resp.headers();
        assert_eq!(headers.get("Access-Control-Allow-Origin").unwrap(), "*");
        assert_eq!(
            headers.get("Access-Control-Allow-Methods").unwrap(),
            "GET, POST, PATCH, DELETE, OPTIONS"
        );
    }

    #[actix_web::test]
    async fn responses_carry_cors_headers() {
        let app = test::init_service(App::new().wrap(cors_headers()).service(index)).await;
        let resp = test::call_service(&app, TestRequest::default().to_request()).await;
        assert_eq!(
            resp.headers().get("Access-Control-Allow-Origin").unwrap(),
            "*"
        );
    }

    #[actix_web::test]
    async fn unknown_routes_get_a_json_404() {
        let app = test::init_service(
            App::new()
                .service(index)
                .default_service(web::route().to(not_found)),
        )
        .await;
        let resp =
            test::call_service(&app, TestRequest::default().uri("/nowhere").to_request()).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["message"], "resource not found");
    }
}
