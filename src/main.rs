mod api;
mod auth;
mod models;
mod news;
mod rank;
mod store;

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use std::env;
use std::sync::Arc;

use api::AppState;
use auth::AuthService;
use news::NewsFeed;
use rank::RankEngine;
use store::Store;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    // Load environment variables
    dotenvy::dotenv().ok();

    // Get configuration from environment
    let port: u16 = env::var("PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .expect("PORT must be a number");

    let db_path = env::var("DATABASE_PATH").unwrap_or_else(|_| "pulse.db".to_string());

    let jwt_secret = env::var("JWT_SECRET").unwrap_or_else(|_| {
        log::warn!("JWT_SECRET not set, using default (not secure for production!)");
        "default_jwt_secret_change_me".to_string()
    });

    // Initialize store
    let store = Arc::new(Store::new(&db_path).expect("Failed to initialize database"));

    // Initialize auth service
    let auth_service = Arc::new(AuthService::new(jwt_secret));

    // Initialize leaderboard engine and bring the materialized totals in
    // line with the posts table before serving
    let rank_engine = Arc::new(RankEngine::new(store.clone()));
    match rank_engine.rebuild() {
        Ok(users) => log::info!("Leaderboard totals rebuilt for {} users", users),
        Err(e) => log::error!("Leaderboard rebuild failed: {}", e),
    }

    // News feed proxy (optional, env-configured)
    let news = Arc::new(NewsFeed::from_env());

    log::info!("Database: {}", db_path);
    log::info!("Starting pulse-social server on port {}", port);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            // Register AuthService individually for the auth extractor
            .app_data(web::Data::new(auth_service.clone()))
            .app_data(web::Data::new(AppState {
                store: store.clone(),
                auth_service: auth_service.clone(),
                rank_engine: rank_engine.clone(),
                news: news.clone(),
            }))
            // Payload size limit for media uploads (50MB)
            .app_data(web::PayloadConfig::new(50 * 1024 * 1024))
            .configure(api::configure_routes)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
