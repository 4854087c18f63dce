use actix_web::{test, web, App};
use serde_json::json;
use std::sync::Arc;

use pulse_social::api::{self, AppState};
use pulse_social::auth::AuthService;
use pulse_social::news::NewsFeed;
use pulse_social::rank::RankEngine;
use pulse_social::store::Store;

fn create_app_state(store: Arc<Store>, auth_service: Arc<AuthService>) -> AppState {
    AppState {
        store: store.clone(),
        auth_service: auth_service.clone(),
        rank_engine: Arc::new(RankEngine::new(store)),
        news: Arc::new(NewsFeed::new(None, None)),
    }
}

/// Helper macro to register a user and get (token, user_id)
macro_rules! register_user {
    ($app:expr, $username:expr) => {{
        let req = test::TestRequest::post()
            .uri("/api/auth/register")
            .set_json(json!({
                "username": $username,
                "email": format!("{}@example.com", $username),
                "password": "password123"
            }))
            .to_request();

        let resp: serde_json::Value = test::call_and_read_body_json(&$app, req).await;
        (
            resp["data"]["token"].as_str().unwrap().to_string(),
            resp["data"]["user"]["id"].as_str().unwrap().to_string(),
        )
    }};
}

#[actix_web::test]
async fn test_upload_and_fetch_roundtrip() {
    let store = Arc::new(Store::in_memory().unwrap());
    let auth_service = Arc::new(AuthService::new("test_secret".to_string()));

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(auth_service.clone()))
            .app_data(web::Data::new(create_app_state(store.clone(), auth_service.clone())))
            .configure(api::configure_routes),
    )
    .await;

    let (token, _) = register_user!(app, "alice");

    let req = test::TestRequest::post()
        .uri("/api/files?filename=avatar.png")
        .insert_header(("Authorization", format!("Bearer {}", token)))
        .insert_header(("Content-Type", "image/png"))
        .set_payload(vec![1u8, 2, 3, 4])
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);

    let body: serde_json::Value = test::read_body_json(resp).await;
    let url = body["data"]["url"].as_str().unwrap().to_string();
    assert!(url.starts_with("/api/files/"));

    let req = test::TestRequest::get().uri(&url).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers().get("Content-Type").unwrap().to_str().unwrap(),
        "image/png"
    );
    let bytes = test::read_body(resp).await;
    assert_eq!(bytes.as_ref(), &[1u8, 2, 3, 4][..]);
}

#[actix_web::test]
async fn test_upload_requires_auth() {
    let store = Arc::new(Store::in_memory().unwrap());
    let auth_service = Arc::new(AuthService::new("test_secret".to_string()));

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(auth_service.clone()))
            .app_data(web::Data::new(create_app_state(store.clone(), auth_service.clone())))
            .configure(api::configure_routes),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/files?filename=sneaky.bin")
        .set_payload(vec![1u8])
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
}

#[actix_web::test]
async fn test_empty_upload_rejected() {
    let store = Arc::new(Store::in_memory().unwrap());
    let auth_service = Arc::new(AuthService::new("test_secret".to_string()));

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(auth_service.clone()))
            .app_data(web::Data::new(create_app_state(store.clone(), auth_service.clone())))
            .configure(api::configure_routes),
    )
    .await;

    let (token, _) = register_user!(app, "alice");

    let req = test::TestRequest::post()
        .uri("/api/files?filename=empty.bin")
        .insert_header(("Authorization", format!("Bearer {}", token)))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}

#[actix_web::test]
async fn test_missing_file_not_found() {
    let store = Arc::new(Store::in_memory().unwrap());
    let auth_service = Arc::new(AuthService::new("test_secret".to_string()));

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(auth_service.clone()))
            .app_data(web::Data::new(create_app_state(store.clone(), auth_service.clone())))
            .configure(api::configure_routes),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/api/files/nonexistent")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}
