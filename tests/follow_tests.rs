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
async fn test_follow_updates_both_sides() {
    let store = Arc::new(Store::in_memory().unwrap());
    let auth_service = Arc::new(AuthService::new("test_secret".to_string()));

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(auth_service.clone()))
            .app_data(web::Data::new(create_app_state(store.clone(), auth_service.clone())))
            .configure(api::configure_routes),
    )
    .await;

    let (alice_token, alice_id) = register_user!(app, "alice");
    let (_bob_token, bob_id) = register_user!(app, "bob");

    let req = test::TestRequest::post()
        .uri(&format!("/api/users/{}/follow", bob_id))
        .insert_header(("Authorization", format!("Bearer {}", alice_token)))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

    // Followee's profile comes back with the new follower and count
    assert_eq!(body["data"]["followers_count"], 1);
    assert_eq!(body["data"]["followers"][0], alice_id.as_str());

    // The same single edge shows up in alice's following list
    let req = test::TestRequest::get()
        .uri(&format!("/api/users/{}", alice_id))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["following"][0], bob_id.as_str());
    assert_eq!(body["data"]["followers_count"], 0);
}

#[actix_web::test]
async fn test_self_follow_rejected() {
    let store = Arc::new(Store::in_memory().unwrap());
    let auth_service = Arc::new(AuthService::new("test_secret".to_string()));

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(auth_service.clone()))
            .app_data(web::Data::new(create_app_state(store.clone(), auth_service.clone())))
            .configure(api::configure_routes),
    )
    .await;

    let (token, user_id) = register_user!(app, "alice");

    let req = test::TestRequest::post()
        .uri(&format!("/api/users/{}/follow", user_id))
        .insert_header(("Authorization", format!("Bearer {}", token)))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}

#[actix_web::test]
async fn test_duplicate_follow_rejected() {
    let store = Arc::new(Store::in_memory().unwrap());
    let auth_service = Arc::new(AuthService::new("test_secret".to_string()));

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(auth_service.clone()))
            .app_data(web::Data::new(create_app_state(store.clone(), auth_service.clone())))
            .configure(api::configure_routes),
    )
    .await;

    let (alice_token, _) = register_user!(app, "alice");
    let (_bob_token, bob_id) = register_user!(app, "bob");

    for expected_status in [200, 400] {
        let req = test::TestRequest::post()
            .uri(&format!("/api/users/{}/follow", bob_id))
            .insert_header(("Authorization", format!("Bearer {}", alice_token)))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), expected_status);
    }

    // Count did not double up
    let req = test::TestRequest::get()
        .uri(&format!("/api/users/{}", bob_id))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["followers_count"], 1);
}

#[actix_web::test]
async fn test_follow_missing_user_not_found() {
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
        .uri("/api/users/nonexistent/follow")
        .insert_header(("Authorization", format!("Bearer {}", token)))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}

#[actix_web::test]
async fn test_unfollow_removes_edge_and_count() {
    let store = Arc::new(Store::in_memory().unwrap());
    let auth_service = Arc::new(AuthService::new("test_secret".to_string()));

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(auth_service.clone()))
            .app_data(web::Data::new(create_app_state(store.clone(), auth_service.clone())))
            .configure(api::configure_routes),
    )
    .await;

    let (alice_token, _) = register_user!(app, "alice");
    let (_bob_token, bob_id) = register_user!(app, "bob");

    let req = test::TestRequest::post()
        .uri(&format!("/api/users/{}/follow", bob_id))
        .insert_header(("Authorization", format!("Bearer {}", alice_token)))
        .to_request();
    test::call_service(&app, req).await;

    let req = test::TestRequest::delete()
        .uri(&format!("/api/users/{}/follow", bob_id))
        .insert_header(("Authorization", format!("Bearer {}", alice_token)))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["followers_count"], 0);
    assert_eq!(body["data"]["followers"].as_array().unwrap().len(), 0);
}

#[actix_web::test]
async fn test_unfollow_without_follow_not_found() {
    let store = Arc::new(Store::in_memory().unwrap());
    let auth_service = Arc::new(AuthService::new("test_secret".to_string()));

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(auth_service.clone()))
            .app_data(web::Data::new(create_app_state(store.clone(), auth_service.clone())))
            .configure(api::configure_routes),
    )
    .await;

    let (alice_token, _) = register_user!(app, "alice");
    let (_bob_token, bob_id) = register_user!(app, "bob");

    let req = test::TestRequest::delete()
        .uri(&format!("/api/users/{}/follow", bob_id))
        .insert_header(("Authorization", format!("Bearer {}", alice_token)))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}

#[actix_web::test]
async fn test_profile_includes_post_count() {
    let store = Arc::new(Store::in_memory().unwrap());
    let auth_service = Arc::new(AuthService::new("test_secret".to_string()));

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(auth_service.clone()))
            .app_data(web::Data::new(create_app_state(store.clone(), auth_service.clone())))
            .configure(api::configure_routes),
    )
    .await;

    let (token, user_id) = register_user!(app, "alice");

    for content in ["one", "two"] {
        let req = test::TestRequest::post()
            .uri("/api/posts")
            .insert_header(("Authorization", format!("Bearer {}", token)))
            .set_json(json!({ "content": content }))
            .to_request();
        test::call_service(&app, req).await;
    }

    let req = test::TestRequest::get()
        .uri(&format!("/api/users/{}", user_id))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["post_count"], 2);
}

#[actix_web::test]
async fn test_update_profile_self_only_fields() {
    let store = Arc::new(Store::in_memory().unwrap());
    let auth_service = Arc::new(AuthService::new("test_secret".to_string()));

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(auth_service.clone()))
            .app_data(web::Data::new(create_app_state(store.clone(), auth_service.clone())))
            .configure(api::configure_routes),
    )
    .await;

    let (token, user_id) = register_user!(app, "alice");

    let req = test::TestRequest::put()
        .uri("/api/users/me")
        .insert_header(("Authorization", format!("Bearer {}", token)))
        .set_json(json!({
            "bio": "hello there",
            "avatar_url": "/api/files/some-avatar"
        }))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["bio"], "hello there");
    assert_eq!(body["data"]["avatar_url"], "/api/files/some-avatar");
    // Untouched fields survive
    assert_eq!(body["data"]["display_name"], "alice");
    assert_eq!(body["data"]["id"], user_id.as_str());
}
