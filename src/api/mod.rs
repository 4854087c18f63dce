use actix_web::{web, HttpRequest, HttpResponse, Responder};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

use crate::auth::{AuthService, AuthUser};
use crate::models::*;
use crate::news::{NewsError, NewsFeed};
use crate::rank::RankEngine;
use crate::store::{Store, StoreError, StoreResult};

pub struct AppState {
    pub store: Arc<Store>,
    pub auth_service: Arc<AuthService>,
    pub rank_engine: Arc<RankEngine>,
    pub news: Arc<NewsFeed>,
}

fn error_response(e: StoreError) -> HttpResponse {
    match e {
        StoreError::NotFound(what) => {
            HttpResponse::NotFound().json(ApiResponse::<()>::error(format!("{} not found", what)))
        }
        StoreError::Invalid(msg) => HttpResponse::BadRequest().json(ApiResponse::<()>::error(msg)),
        e => HttpResponse::InternalServerError().json(ApiResponse::<()>::error(e.to_string())),
    }
}

// ==================== Health Check ====================

pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339()
    }))
}

// ==================== Auth Endpoints ====================

pub async fn register(
    state: web::Data<AppState>,
    body: web::Json<RegisterRequest>,
) -> impl Responder {
    if body.username.trim().is_empty() || body.email.trim().is_empty() {
        return HttpResponse::BadRequest()
            .json(ApiResponse::<()>::error("Username and email are required"));
    }

    let password_hash = match state.auth_service.hash_password(&body.password) {
        Ok(hash) => hash,
        Err(_) => {
            return HttpResponse::InternalServerError()
                .json(ApiResponse::<()>::error("Failed to hash password"))
        }
    };

    let mut user = User {
        id: String::new(),
        username: body.username.clone(),
        email: body.email.clone(),
        password_hash,
        display_name: body
            .display_name
            .clone()
            .unwrap_or_else(|| body.username.clone()),
        bio: String::new(),
        avatar_url: String::new(),
        is_admin: false,
        followers_count: 0,
        total_views: 0,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };

    if let Err(e) = state.store.create_user(&mut user) {
        return HttpResponse::BadRequest()
            .json(ApiResponse::<()>::error(format!("Failed to create user: {}", e)));
    }

    let token = match state.auth_service.generate_token(&user.id) {
        Ok(t) => t,
        Err(_) => {
            return HttpResponse::InternalServerError()
                .json(ApiResponse::<()>::error("Failed to generate token"))
        }
    };

    HttpResponse::Created().json(ApiResponse::success(LoginResponse { token, user }))
}

pub async fn login(state: web::Data<AppState>, body: web::Json<LoginRequest>) -> impl Responder {
    let user = match state.store.get_user_by_username(&body.username) {
        Ok(u) => u,
        Err(StoreError::NotFound(_)) => {
            return HttpResponse::Unauthorized()
                .json(ApiResponse::<()>::error("Invalid credentials"));
        }
        Err(_) => {
            return HttpResponse::InternalServerError()
                .json(ApiResponse::<()>::error("Database error"));
        }
    };

    let valid = state
        .auth_service
        .verify_password(&body.password, &user.password_hash)
        .unwrap_or(false);

    if !valid {
        return HttpResponse::Unauthorized().json(ApiResponse::<()>::error("Invalid credentials"));
    }

    let token = match state.auth_service.generate_token(&user.id) {
        Ok(t) => t,
        Err(_) => {
            return HttpResponse::InternalServerError()
                .json(ApiResponse::<()>::error("Failed to generate token"))
        }
    };

    HttpResponse::Ok().json(ApiResponse::success(LoginResponse { token, user }))
}

pub async fn get_current_user(
    state: web::Data<AppState>,
    auth_user: AuthUser,
) -> impl Responder {
    match state.store.get_user(&auth_user.user_id) {
        Ok(user) => HttpResponse::Ok().json(ApiResponse::success(user)),
        Err(_) => HttpResponse::NotFound().json(ApiResponse::<()>::error("User not found")),
    }
}

// ==================== User Endpoints ====================

pub async fn get_user_profile(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let id = path.into_inner();
    match state.store.get_profile(&id) {
        Ok(profile) => HttpResponse::Ok().json(ApiResponse::success(profile)),
        Err(e) => error_response(e),
    }
}

pub async fn update_profile(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    body: web::Json<UpdateProfileRequest>,
) -> impl Responder {
    match state.store.update_profile(
        &auth_user.user_id,
        body.display_name.as_deref(),
        body.bio.as_deref(),
        body.avatar_url.as_deref(),
    ) {
        Ok(user) => HttpResponse::Ok().json(ApiResponse::success(user)),
        Err(e) => error_response(e),
    }
}

pub async fn follow_user(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> impl Responder {
    let followee_id = path.into_inner();
    match state.store.follow(&auth_user.user_id, &followee_id) {
        Ok(_) => match state.store.get_profile(&followee_id) {
            Ok(profile) => HttpResponse::Ok().json(ApiResponse::success(profile)),
            Err(e) => error_response(e),
        },
        Err(e) => error_response(e),
    }
}

pub async fn unfollow_user(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> impl Responder {
    let followee_id = path.into_inner();
    match state.store.unfollow(&auth_user.user_id, &followee_id) {
        Ok(_) => match state.store.get_profile(&followee_id) {
            Ok(profile) => HttpResponse::Ok().json(ApiResponse::success(profile)),
            Err(e) => error_response(e),
        },
        Err(e) => error_response(e),
    }
}

pub async fn get_user_rank(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let id = path.into_inner();
    match state.rank_engine.user_rank(&id) {
        Ok(rank) => HttpResponse::Ok().json(ApiResponse::success(rank)),
        Err(e) => error_response(e),
    }
}

pub async fn list_user_posts(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let author_id = path.into_inner();
    let posts = match state.store.list_posts_by_author(&author_id) {
        Ok(posts) => posts,
        Err(e) => return error_response(e),
    };
    match assemble_details(&state.store, posts) {
        Ok(details) => HttpResponse::Ok().json(ApiResponse::success(details)),
        Err(e) => error_response(e),
    }
}

// ==================== Post Endpoints ====================

#[derive(Deserialize)]
pub struct ListPostsQuery {
    limit: Option<i64>,
    offset: Option<i64>,
}

pub async fn create_post(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    body: web::Json<CreatePostRequest>,
) -> impl Responder {
    if body.content.trim().is_empty()
        && body.image_urls.is_empty()
        && body.video_urls.is_empty()
        && body.link.is_none()
    {
        return HttpResponse::BadRequest().json(ApiResponse::<()>::error("Post cannot be empty"));
    }

    let mut post = Post {
        id: String::new(),
        author_id: auth_user.user_id.clone(),
        content: body.content.clone(),
        image_urls: body.image_urls.clone(),
        video_urls: body.video_urls.clone(),
        link: body.link.clone(),
        likes_count: 0,
        comments_count: 0,
        shares_count: 0,
        views_count: 0,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };

    match state.store.create_post(&mut post) {
        Ok(_) => HttpResponse::Created().json(ApiResponse::success(post)),
        Err(e) => error_response(e),
    }
}

pub async fn list_posts(
    state: web::Data<AppState>,
    query: web::Query<ListPostsQuery>,
) -> impl Responder {
    let limit = query.limit.unwrap_or(50).min(100);
    let offset = query.offset.unwrap_or(0);

    let posts = match state.store.list_posts(limit, offset) {
        Ok(posts) => posts,
        Err(e) => return error_response(e),
    };
    match assemble_details(&state.store, posts) {
        Ok(details) => HttpResponse::Ok().json(ApiResponse::success(details)),
        Err(e) => error_response(e),
    }
}

pub async fn get_post(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let id = path.into_inner();
    let post = match state.store.get_post(&id) {
        Ok(post) => post,
        Err(e) => return error_response(e),
    };
    match assemble_detail(&state.store, post) {
        Ok(detail) => HttpResponse::Ok().json(ApiResponse::success(detail)),
        Err(e) => error_response(e),
    }
}

pub async fn delete_post(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> impl Responder {
    let id = path.into_inner();

    match state.store.get_post(&id) {
        Ok(post) => {
            if post.author_id != auth_user.user_id {
                return HttpResponse::NotFound().json(ApiResponse::<()>::error("Post not found"));
            }
        }
        Err(e) => return error_response(e),
    }

    match state.store.delete_post(&id) {
        Ok(_) => HttpResponse::NoContent().finish(),
        Err(e) => error_response(e),
    }
}

pub async fn like_post(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> impl Responder {
    let id = path.into_inner();
    match state.store.toggle_like(&id, &auth_user.user_id) {
        Ok((liked, likes_count)) => HttpResponse::Ok().json(ApiResponse::success(
            serde_json::json!({ "liked": liked, "likes_count": likes_count }),
        )),
        Err(e) => error_response(e),
    }
}

pub async fn view_post(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> impl Responder {
    let id = path.into_inner();
    match state.store.record_view(&id, &auth_user.user_id) {
        Ok((counted, views_count)) => HttpResponse::Ok().json(ApiResponse::success(
            serde_json::json!({ "counted": counted, "views_count": views_count }),
        )),
        Err(e) => error_response(e),
    }
}

pub async fn share_post(
    state: web::Data<AppState>,
    _auth_user: AuthUser,
    path: web::Path<String>,
) -> impl Responder {
    let id = path.into_inner();
    match state.store.increment_shares(&id) {
        Ok(shares_count) => HttpResponse::Ok().json(ApiResponse::success(
            serde_json::json!({ "shares_count": shares_count }),
        )),
        Err(e) => error_response(e),
    }
}

// ==================== Comment Endpoints ====================

pub async fn add_comment(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
    body: web::Json<CreateCommentRequest>,
) -> impl Responder {
    if body.content.trim().is_empty() {
        return HttpResponse::BadRequest()
            .json(ApiResponse::<()>::error("Comment cannot be empty"));
    }

    // Snapshot the author's identity at creation time
    let author = match state.store.get_user(&auth_user.user_id) {
        Ok(user) => user,
        Err(e) => return error_response(e),
    };

    let mut comment = Comment {
        id: String::new(),
        post_id: path.into_inner(),
        parent_id: body.parent_id.clone(),
        author_id: author.id,
        author_name: author.username,
        author_avatar: author.avatar_url,
        content: body.content.clone(),
        created_at: Utc::now(),
    };

    match state.store.add_comment(&mut comment) {
        Ok(_) => HttpResponse::Created().json(ApiResponse::success(comment)),
        Err(e) => error_response(e),
    }
}

pub async fn list_post_comments(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let post_id = path.into_inner();
    match state.store.list_comments(&post_id) {
        Ok(threads) => HttpResponse::Ok().json(ApiResponse::success(threads)),
        Err(e) => error_response(e),
    }
}

pub async fn delete_comment(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> impl Responder {
    let id = path.into_inner();

    let comment = match state.store.get_comment(&id) {
        Ok(comment) => comment,
        Err(e) => return error_response(e),
    };

    // Only the original comment author may delete
    if comment.author_id != auth_user.user_id {
        return HttpResponse::Forbidden()
            .json(ApiResponse::<()>::error("Only the comment author can delete it"));
    }

    match state.store.delete_comment(&comment) {
        Ok(_) => HttpResponse::NoContent().finish(),
        Err(e) => error_response(e),
    }
}

// ==================== Leaderboard Endpoints ====================

#[derive(Deserialize)]
pub struct LeaderboardQuery {
    limit: Option<i64>,
}

pub async fn get_leaderboard(
    state: web::Data<AppState>,
    query: web::Query<LeaderboardQuery>,
) -> impl Responder {
    let limit = query.limit.unwrap_or(10).min(100);
    match state.rank_engine.leaderboard(limit) {
        Ok(board) => HttpResponse::Ok().json(ApiResponse::success(board)),
        Err(e) => error_response(e),
    }
}

pub async fn rebuild_leaderboard(
    state: web::Data<AppState>,
    auth_user: AuthUser,
) -> impl Responder {
    let caller = match state.store.get_user(&auth_user.user_id) {
        Ok(user) => user,
        Err(e) => return error_response(e),
    };
    if !caller.is_admin {
        return HttpResponse::Forbidden().json(ApiResponse::<()>::error("Admin access required"));
    }

    match state.rank_engine.rebuild() {
        Ok(users) => HttpResponse::Ok().json(ApiResponse::success(
            serde_json::json!({ "users": users }),
        )),
        Err(e) => error_response(e),
    }
}

// ==================== Message Endpoints ====================

#[derive(Deserialize)]
pub struct InboxQuery {
    after: Option<i64>,
}

pub async fn send_message(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    body: web::Json<SendMessageRequest>,
) -> impl Responder {
    if body.content.trim().is_empty() {
        return HttpResponse::BadRequest()
            .json(ApiResponse::<()>::error("Message cannot be empty"));
    }

    if let Err(e) = state.store.get_user(&body.receiver_id) {
        return error_response(e);
    }

    let mut message = Message {
        seq: 0,
        id: String::new(),
        sender_id: auth_user.user_id.clone(),
        receiver_id: body.receiver_id.clone(),
        content: body.content.clone(),
        sent_at: Utc::now(),
    };

    match state.store.create_message(&mut message) {
        Ok(_) => HttpResponse::Created().json(ApiResponse::success(message)),
        Err(e) => error_response(e),
    }
}

pub async fn get_conversation(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> impl Responder {
    let other_id = path.into_inner();
    match state.store.conversation(&auth_user.user_id, &other_id) {
        Ok(messages) => HttpResponse::Ok().json(ApiResponse::success(messages)),
        Err(e) => error_response(e),
    }
}

pub async fn get_inbox(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    query: web::Query<InboxQuery>,
) -> impl Responder {
    let after = query.after.unwrap_or(0);
    match state.store.inbox_after(&auth_user.user_id, after) {
        Ok(items) => {
            let next_cursor = items.last().map(|m| m.seq).unwrap_or(after);
            HttpResponse::Ok().json(ApiResponse::success(InboxPage { items, next_cursor }))
        }
        Err(e) => error_response(e),
    }
}

pub async fn delete_message(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    path: web::Path<String>,
) -> impl Responder {
    let id = path.into_inner();

    let message = match state.store.get_message(&id) {
        Ok(message) => message,
        Err(e) => return error_response(e),
    };

    // Participants only; outsiders see the same 404 as a missing id
    if message.sender_id != auth_user.user_id && message.receiver_id != auth_user.user_id {
        return HttpResponse::NotFound().json(ApiResponse::<()>::error("Message not found"));
    }

    match state.store.delete_message(&id) {
        Ok(_) => HttpResponse::NoContent().finish(),
        Err(e) => error_response(e),
    }
}

// ==================== Search Endpoint ====================

#[derive(Deserialize)]
pub struct SearchQuery {
    q: String,
}

pub async fn search(
    state: web::Data<AppState>,
    query: web::Query<SearchQuery>,
) -> impl Responder {
    let term = query.q.trim();
    if term.is_empty() {
        return HttpResponse::Ok().json(ApiResponse::success(serde_json::json!({
            "posts": [],
            "users": [],
        })));
    }

    let posts = match state.store.search_posts(term) {
        Ok(posts) => posts,
        Err(e) => return error_response(e),
    };
    let posts = match assemble_details(&state.store, posts) {
        Ok(details) => details,
        Err(e) => return error_response(e),
    };

    let users = match state.store.search_users(term) {
        Ok(users) => users,
        Err(e) => return error_response(e),
    };
    let users: Vec<AuthorSnapshot> = users
        .into_iter()
        .map(|user| AuthorSnapshot {
            id: user.id,
            username: user.username,
            avatar_url: user.avatar_url,
        })
        .collect();

    HttpResponse::Ok().json(ApiResponse::success(serde_json::json!({
        "posts": posts,
        "users": users,
    })))
}

// ==================== News Endpoint ====================

pub async fn get_news(state: web::Data<AppState>) -> impl Responder {
    match state.news.headlines().await {
        Ok(body) => HttpResponse::Ok().json(ApiResponse::success(body)),
        Err(NewsError::NotConfigured) => HttpResponse::ServiceUnavailable()
            .json(ApiResponse::<()>::error("News feed not configured")),
        Err(e) => HttpResponse::BadGateway().json(ApiResponse::<()>::error(e.to_string())),
    }
}

// ==================== File Endpoints ====================

#[derive(Deserialize)]
pub struct UploadQuery {
    filename: String,
}

pub async fn upload_file(
    state: web::Data<AppState>,
    auth_user: AuthUser,
    query: web::Query<UploadQuery>,
    req: HttpRequest,
    body: web::Bytes,
) -> impl Responder {
    if body.is_empty() {
        return HttpResponse::BadRequest().json(ApiResponse::<()>::error("Empty upload"));
    }

    let content_type = req
        .headers()
        .get("Content-Type")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    let mut file = StoredFile {
        id: String::new(),
        owner_id: auth_user.user_id.clone(),
        filename: query.filename.clone(),
        content_type,
        size: body.len() as i64,
        data: body.to_vec(),
        created_at: Utc::now(),
    };

    match state.store.create_file(&mut file) {
        Ok(_) => HttpResponse::Created().json(ApiResponse::success(serde_json::json!({
            "id": file.id,
            "url": format!("/api/files/{}", file.id),
        }))),
        Err(e) => error_response(e),
    }
}

pub async fn get_file(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let id = path.into_inner();
    match state.store.get_file(&id) {
        Ok(file) => HttpResponse::Ok()
            .content_type(file.content_type)
            .body(file.data),
        Err(StoreError::NotFound(_)) => HttpResponse::NotFound().finish(),
        Err(_) => HttpResponse::InternalServerError().finish(),
    }
}

// ==================== Assembly Helpers ====================

fn assemble_detail(store: &Store, post: Post) -> StoreResult<PostDetail> {
    let author = store.get_user(&post.author_id)?;
    let liked_by = store.get_liked_by(&post.id)?;
    let comments = store.list_comments(&post.id)?;
    Ok(PostDetail {
        post,
        author: AuthorSnapshot {
            id: author.id,
            username: author.username,
            avatar_url: author.avatar_url,
        },
        liked_by,
        comments,
    })
}

fn assemble_details(store: &Store, posts: Vec<Post>) -> StoreResult<Vec<PostDetail>> {
    posts
        .into_iter()
        .map(|post| assemble_detail(store, post))
        .collect()
}

// ==================== Route Configuration ====================

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg
        // Health check
        .route("/health", web::get().to(health))
        // Auth
        .route("/api/auth/register", web::post().to(register))
        .route("/api/auth/login", web::post().to(login))
        .route("/api/auth/me", web::get().to(get_current_user))
        // Users
        .route("/api/users/me", web::put().to(update_profile))
        .route("/api/users/{id}", web::get().to(get_user_profile))
        .route("/api/users/{id}/follow", web::post().to(follow_user))
        .route("/api/users/{id}/follow", web::delete().to(unfollow_user))
        .route("/api/users/{id}/rank", web::get().to(get_user_rank))
        .route("/api/users/{id}/posts", web::get().to(list_user_posts))
        // Posts
        .route("/api/posts", web::get().to(list_posts))
        .route("/api/posts", web::post().to(create_post))
        .route("/api/posts/{id}", web::get().to(get_post))
        .route("/api/posts/{id}", web::delete().to(delete_post))
        .route("/api/posts/{id}/like", web::post().to(like_post))
        .route("/api/posts/{id}/view", web::post().to(view_post))
        .route("/api/posts/{id}/share", web::post().to(share_post))
        .route("/api/posts/{id}/comments", web::post().to(add_comment))
        .route("/api/posts/{id}/comments", web::get().to(list_post_comments))
        .route("/api/comments/{id}", web::delete().to(delete_comment))
        // Leaderboard
        .route("/api/leaderboard", web::get().to(get_leaderboard))
        .route("/api/leaderboard/rebuild", web::post().to(rebuild_leaderboard))
        // Messages
        .route("/api/messages", web::post().to(send_message))
        .route("/api/messages/inbox", web::get().to(get_inbox))
        .route(
            "/api/messages/conversation/{user_id}",
            web::get().to(get_conversation),
        )
        .route("/api/messages/{id}", web::delete().to(delete_message))
        // Search
        .route("/api/search", web::get().to(search))
        // News
        .route("/api/news", web::get().to(get_news))
        // Files
        .route("/api/files", web::post().to(upload_file))
        .route("/api/files/{id}", web::get().to(get_file));
}
