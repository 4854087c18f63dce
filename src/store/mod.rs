use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use uuid::Uuid;

use crate::models::*;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid request: {0}")]
    Invalid(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Thread-safe SQLite store. Every multi-step mutation (like + count,
/// comment + count, view + aggregate, follow + count) runs inside one
/// transaction so concurrent writers cannot lose each other's updates.
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path
    pub fn new(db_path: &str) -> StoreResult<Self> {
        let conn = Connection::open(db_path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store for testing
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT UNIQUE NOT NULL,
                email TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                display_name TEXT DEFAULT '',
                bio TEXT DEFAULT '',
                avatar_url TEXT DEFAULT '',
                is_admin INTEGER DEFAULT 0,
                followers_count INTEGER DEFAULT 0,
                total_views INTEGER DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS posts (
                id TEXT PRIMARY KEY,
                author_id TEXT NOT NULL,
                content TEXT DEFAULT '',
                image_urls TEXT DEFAULT '[]',
                video_urls TEXT DEFAULT '[]',
                link TEXT,
                likes_count INTEGER DEFAULT 0,
                comments_count INTEGER DEFAULT 0,
                shares_count INTEGER DEFAULT 0,
                views_count INTEGER DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (author_id) REFERENCES users(id)
            );

            CREATE TABLE IF NOT EXISTS post_likes (
                post_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                liked_at TEXT NOT NULL,
                PRIMARY KEY (post_id, user_id),
                FOREIGN KEY (post_id) REFERENCES posts(id),
                FOREIGN KEY (user_id) REFERENCES users(id)
            );

            CREATE TABLE IF NOT EXISTS post_views (
                post_id TEXT NOT NULL,
                viewer_id TEXT NOT NULL,
                viewed_at TEXT NOT NULL,
                PRIMARY KEY (post_id, viewer_id),
                FOREIGN KEY (post_id) REFERENCES posts(id),
                FOREIGN KEY (viewer_id) REFERENCES users(id)
            );

            CREATE TABLE IF NOT EXISTS comments (
                id TEXT PRIMARY KEY,
                post_id TEXT NOT NULL,
                parent_id TEXT,
                author_id TEXT NOT NULL,
                author_name TEXT NOT NULL,
                author_avatar TEXT DEFAULT '',
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (post_id) REFERENCES posts(id),
                FOREIGN KEY (author_id) REFERENCES users(id)
            );

            CREATE TABLE IF NOT EXISTS follows (
                follower_id TEXT NOT NULL,
                followee_id TEXT NOT NULL,
                followed_at TEXT NOT NULL,
                PRIMARY KEY (follower_id, followee_id),
                FOREIGN KEY (follower_id) REFERENCES users(id),
                FOREIGN KEY (followee_id) REFERENCES users(id)
            );

            CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT UNIQUE NOT NULL,
                sender_id TEXT NOT NULL,
                receiver_id TEXT NOT NULL,
                content TEXT NOT NULL,
                sent_at TEXT NOT NULL,
                FOREIGN KEY (sender_id) REFERENCES users(id),
                FOREIGN KEY (receiver_id) REFERENCES users(id)
            );

            CREATE TABLE IF NOT EXISTS files (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                filename TEXT NOT NULL,
                content_type TEXT NOT NULL,
                data BLOB,
                size INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (owner_id) REFERENCES users(id)
            );

            CREATE INDEX IF NOT EXISTS idx_posts_author_id ON posts(author_id);
            CREATE INDEX IF NOT EXISTS idx_posts_created_at ON posts(created_at);
            CREATE INDEX IF NOT EXISTS idx_comments_post_id ON comments(post_id);
            CREATE INDEX IF NOT EXISTS idx_messages_receiver ON messages(receiver_id);
            CREATE INDEX IF NOT EXISTS idx_users_total_views ON users(total_views);
            "#,
        )?;
        Ok(())
    }

    // ==================== User Operations ====================

    pub fn create_user(&self, user: &mut User) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        user.id = Uuid::new_v4().to_string();
        let now = Utc::now();
        user.created_at = now;
        user.updated_at = now;

        conn.execute(
            r#"INSERT INTO users (id, username, email, password_hash, display_name, bio,
                avatar_url, is_admin, followers_count, total_views, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"#,
            params![
                &user.id,
                &user.username,
                &user.email,
                &user.password_hash,
                &user.display_name,
                &user.bio,
                &user.avatar_url,
                user.is_admin,
                user.followers_count,
                user.total_views,
                user.created_at.to_rfc3339(),
                user.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_user(&self, id: &str) -> StoreResult<User> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM users WHERE id = ?1", params![id], |row| {
            row_to_user(row)
        })
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(format!("User {}", id)),
            _ => StoreError::Database(e),
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> StoreResult<User> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM users WHERE username = ?1",
            params![username],
            |row| row_to_user(row),
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                StoreError::NotFound(format!("User {}", username))
            }
            _ => StoreError::Database(e),
        })
    }

    pub fn update_profile(
        &self,
        user_id: &str,
        display_name: Option<&str>,
        bio: Option<&str>,
        avatar_url: Option<&str>,
    ) -> StoreResult<User> {
        {
            let conn = self.conn.lock().unwrap();
            let now = Utc::now().to_rfc3339();
            let rows = conn.execute(
                r#"UPDATE users SET
                     display_name = COALESCE(?1, display_name),
                     bio = COALESCE(?2, bio),
                     avatar_url = COALESCE(?3, avatar_url),
                     updated_at = ?4
                   WHERE id = ?5"#,
                params![display_name, bio, avatar_url, now, user_id],
            )?;
            if rows == 0 {
                return Err(StoreError::NotFound(format!("User {}", user_id)));
            }
        }
        self.get_user(user_id)
    }

    pub fn list_user_ids(&self) -> StoreResult<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id FROM users ORDER BY rowid ASC")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    pub fn get_profile(&self, user_id: &str) -> StoreResult<UserProfile> {
        let user = self.get_user(user_id)?;
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            "SELECT follower_id FROM follows WHERE followee_id = ?1 ORDER BY rowid ASC",
        )?;
        let followers = stmt
            .query_map(params![user_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;

        let mut stmt = conn.prepare(
            "SELECT followee_id FROM follows WHERE follower_id = ?1 ORDER BY rowid ASC",
        )?;
        let following = stmt
            .query_map(params![user_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;

        let post_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM posts WHERE author_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;

        Ok(UserProfile {
            user,
            followers,
            following,
            post_count,
        })
    }

    // ==================== Follow Operations ====================

    /// Create the follower -> followee edge. One row carries both directions
    /// of the relationship, so the two users' lists can never diverge.
    pub fn follow(&self, follower_id: &str, followee_id: &str) -> StoreResult<()> {
        if follower_id == followee_id {
            return Err(StoreError::Invalid("cannot follow yourself".to_string()));
        }

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let exists: i64 = tx.query_row(
            "SELECT COUNT(*) FROM users WHERE id = ?1",
            params![followee_id],
            |row| row.get(0),
        )?;
        if exists == 0 {
            return Err(StoreError::NotFound(format!("User {}", followee_id)));
        }

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO follows (follower_id, followee_id, followed_at) VALUES (?1, ?2, ?3)",
            params![follower_id, followee_id, Utc::now().to_rfc3339()],
        )?;
        if inserted == 0 {
            return Err(StoreError::Invalid("already following".to_string()));
        }

        refresh_followers_count(&tx, followee_id)?;
        tx.commit()?;
        Ok(())
    }

    pub fn unfollow(&self, follower_id: &str, followee_id: &str) -> StoreResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let removed = tx.execute(
            "DELETE FROM follows WHERE follower_id = ?1 AND followee_id = ?2",
            params![follower_id, followee_id],
        )?;
        if removed == 0 {
            return Err(StoreError::NotFound(format!(
                "Follow of {} by {}",
                followee_id, follower_id
            )));
        }

        refresh_followers_count(&tx, followee_id)?;
        tx.commit()?;
        Ok(())
    }

    // ==================== Post Operations ====================

    pub fn create_post(&self, post: &mut Post) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        post.id = Uuid::new_v4().to_string();
        let now = Utc::now();
        post.created_at = now;
        post.updated_at = now;

        let image_urls = serde_json::to_string(&post.image_urls)?;
        let video_urls = serde_json::to_string(&post.video_urls)?;

        conn.execute(
            r#"INSERT INTO posts (id, author_id, content, image_urls, video_urls, link,
                likes_count, comments_count, shares_count, views_count, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"#,
            params![
                &post.id,
                &post.author_id,
                &post.content,
                &image_urls,
                &video_urls,
                &post.link,
                post.likes_count,
                post.comments_count,
                post.shares_count,
                post.views_count,
                post.created_at.to_rfc3339(),
                post.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_post(&self, id: &str) -> StoreResult<Post> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM posts WHERE id = ?1", params![id], |row| {
            row_to_post(row)
        })
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(format!("Post {}", id)),
            _ => StoreError::Database(e),
        })
    }

    /// Feed listing: newest first across all authors.
    pub fn list_posts(&self, limit: i64, offset: i64) -> StoreResult<Vec<Post>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM posts ORDER BY created_at DESC, rowid DESC LIMIT ?1 OFFSET ?2",
        )?;
        let posts = stmt
            .query_map(params![limit, offset], |row| row_to_post(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(posts)
    }

    pub fn list_posts_by_author(&self, author_id: &str) -> StoreResult<Vec<Post>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM posts WHERE author_id = ?1 ORDER BY created_at DESC, rowid DESC",
        )?;
        let posts = stmt
            .query_map(params![author_id], |row| row_to_post(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(posts)
    }

    /// Delete a post and everything hanging off it. The author's view
    /// aggregate drops by the post's views so the leaderboard stays in sync
    /// with the live posts, matching a recompute from scratch.
    pub fn delete_post(&self, id: &str) -> StoreResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let row: Option<(String, i64)> = tx
            .query_row(
                "SELECT author_id, views_count FROM posts WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (author_id, views_count) = match row {
            Some(r) => r,
            None => return Err(StoreError::NotFound(format!("Post {}", id))),
        };

        tx.execute("DELETE FROM post_likes WHERE post_id = ?1", params![id])?;
        tx.execute("DELETE FROM post_views WHERE post_id = ?1", params![id])?;
        tx.execute("DELETE FROM comments WHERE post_id = ?1", params![id])?;
        tx.execute("DELETE FROM posts WHERE id = ?1", params![id])?;
        tx.execute(
            "UPDATE users SET total_views = MAX(total_views - ?1, 0) WHERE id = ?2",
            params![views_count, author_id],
        )?;

        tx.commit()?;
        Ok(())
    }

    // ==================== Like Operations ====================

    /// Toggle the acting user's membership in the post's liked-by set and
    /// re-derive likes_count from the set in the same transaction, so the
    /// count always equals the set size after the write.
    pub fn toggle_like(&self, post_id: &str, user_id: &str) -> StoreResult<(bool, i64)> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let exists: i64 = tx.query_row(
            "SELECT COUNT(*) FROM posts WHERE id = ?1",
            params![post_id],
            |row| row.get(0),
        )?;
        if exists == 0 {
            return Err(StoreError::NotFound(format!("Post {}", post_id)));
        }

        let already_liked: i64 = tx.query_row(
            "SELECT COUNT(*) FROM post_likes WHERE post_id = ?1 AND user_id = ?2",
            params![post_id, user_id],
            |row| row.get(0),
        )?;

        if already_liked > 0 {
            tx.execute(
                "DELETE FROM post_likes WHERE post_id = ?1 AND user_id = ?2",
                params![post_id, user_id],
            )?;
        } else {
            tx.execute(
                "INSERT INTO post_likes (post_id, user_id, liked_at) VALUES (?1, ?2, ?3)",
                params![post_id, user_id, Utc::now().to_rfc3339()],
            )?;
        }

        tx.execute(
            "UPDATE posts SET likes_count = (SELECT COUNT(*) FROM post_likes WHERE post_id = ?1) WHERE id = ?1",
            params![post_id],
        )?;
        let likes_count: i64 = tx.query_row(
            "SELECT likes_count FROM posts WHERE id = ?1",
            params![post_id],
            |row| row.get(0),
        )?;

        tx.commit()?;
        Ok((already_liked == 0, likes_count))
    }

    pub fn get_liked_by(&self, post_id: &str) -> StoreResult<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT user_id FROM post_likes WHERE post_id = ?1 ORDER BY rowid ASC")?;
        let ids = stmt
            .query_map(params![post_id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    // ==================== View Operations ====================

    /// Register a view. Counts once per distinct non-author viewer; repeat
    /// views and author self-views are acknowledged no-ops. A counted view
    /// bumps the post's views_count and the author's leaderboard aggregate
    /// together.
    pub fn record_view(&self, post_id: &str, viewer_id: &str) -> StoreResult<(bool, i64)> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let row: Option<(String, i64)> = tx
            .query_row(
                "SELECT author_id, views_count FROM posts WHERE id = ?1",
                params![post_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (author_id, views_count) = match row {
            Some(r) => r,
            None => return Err(StoreError::NotFound(format!("Post {}", post_id))),
        };

        if author_id == viewer_id {
            return Ok((false, views_count));
        }

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO post_views (post_id, viewer_id, viewed_at) VALUES (?1, ?2, ?3)",
            params![post_id, viewer_id, Utc::now().to_rfc3339()],
        )?;

        if inserted == 0 {
            return Ok((false, views_count));
        }

        tx.execute(
            "UPDATE posts SET views_count = views_count + 1 WHERE id = ?1",
            params![post_id],
        )?;
        tx.execute(
            "UPDATE users SET total_views = total_views + 1 WHERE id = ?1",
            params![author_id],
        )?;

        tx.commit()?;
        Ok((true, views_count + 1))
    }

    pub fn increment_shares(&self, post_id: &str) -> StoreResult<i64> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            "UPDATE posts SET shares_count = shares_count + 1 WHERE id = ?1",
            params![post_id],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("Post {}", post_id)));
        }
        let count: i64 = conn.query_row(
            "SELECT shares_count FROM posts WHERE id = ?1",
            params![post_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ==================== Comment Operations ====================

    /// Append a comment or reply. Replies must point at a top-level comment
    /// on the same post; further nesting is rejected. comments_count tracks
    /// top-level comments only.
    pub fn add_comment(&self, comment: &mut Comment) -> StoreResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        comment.id = Uuid::new_v4().to_string();
        comment.created_at = Utc::now();

        let post_exists: i64 = tx.query_row(
            "SELECT COUNT(*) FROM posts WHERE id = ?1",
            params![&comment.post_id],
            |row| row.get(0),
        )?;
        if post_exists == 0 {
            return Err(StoreError::NotFound(format!("Post {}", comment.post_id)));
        }

        if let Some(parent_id) = &comment.parent_id {
            let parent: Option<(String, Option<String>)> = tx
                .query_row(
                    "SELECT post_id, parent_id FROM comments WHERE id = ?1",
                    params![parent_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            match parent {
                None => {
                    return Err(StoreError::NotFound(format!("Comment {}", parent_id)));
                }
                Some((parent_post, _)) if parent_post != comment.post_id => {
                    return Err(StoreError::Invalid(
                        "parent comment belongs to a different post".to_string(),
                    ));
                }
                Some((_, Some(_))) => {
                    return Err(StoreError::Invalid(
                        "replies cannot be nested further".to_string(),
                    ));
                }
                Some(_) => {}
            }
        }

        tx.execute(
            r#"INSERT INTO comments (id, post_id, parent_id, author_id, author_name, author_avatar, content, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
            params![
                &comment.id,
                &comment.post_id,
                &comment.parent_id,
                &comment.author_id,
                &comment.author_name,
                &comment.author_avatar,
                &comment.content,
                comment.created_at.to_rfc3339(),
            ],
        )?;

        refresh_comments_count(&tx, &comment.post_id)?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_comment(&self, id: &str) -> StoreResult<Comment> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM comments WHERE id = ?1", params![id], |row| {
            row_to_comment(row)
        })
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                StoreError::NotFound(format!("Comment {}", id))
            }
            _ => StoreError::Database(e),
        })
    }

    /// Delete a comment. A top-level comment takes its replies with it;
    /// a reply is removed alone, leaving siblings and parent untouched.
    pub fn delete_comment(&self, comment: &Comment) -> StoreResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let removed = if comment.parent_id.is_none() {
            tx.execute(
                "DELETE FROM comments WHERE id = ?1 OR parent_id = ?1",
                params![&comment.id],
            )?
        } else {
            tx.execute("DELETE FROM comments WHERE id = ?1", params![&comment.id])?
        };
        if removed == 0 {
            return Err(StoreError::NotFound(format!("Comment {}", comment.id)));
        }

        refresh_comments_count(&tx, &comment.post_id)?;
        tx.commit()?;
        Ok(())
    }

    /// Assemble the comment tree: top-level comments in insertion order,
    /// each carrying its replies in insertion order.
    pub fn list_comments(&self, post_id: &str) -> StoreResult<Vec<CommentThread>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT * FROM comments WHERE post_id = ?1 ORDER BY rowid ASC")?;
        let all = stmt
            .query_map(params![post_id], |row| row_to_comment(row))?
            .collect::<Result<Vec<Comment>, _>>()?;

        let mut threads: Vec<CommentThread> = Vec::new();
        for comment in &all {
            if comment.parent_id.is_none() {
                threads.push(CommentThread {
                    comment: comment.clone(),
                    replies: Vec::new(),
                });
            }
        }
        for comment in &all {
            if let Some(parent_id) = &comment.parent_id {
                if let Some(thread) = threads.iter_mut().find(|t| &t.comment.id == parent_id) {
                    thread.replies.push(comment.clone());
                }
            }
        }
        Ok(threads)
    }

    // ==================== Message Operations ====================

    pub fn create_message(&self, message: &mut Message) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        message.id = Uuid::new_v4().to_string();
        message.sent_at = Utc::now();

        conn.execute(
            r#"INSERT INTO messages (id, sender_id, receiver_id, content, sent_at)
               VALUES (?1, ?2, ?3, ?4, ?5)"#,
            params![
                &message.id,
                &message.sender_id,
                &message.receiver_id,
                &message.content,
                message.sent_at.to_rfc3339(),
            ],
        )?;
        message.seq = conn.last_insert_rowid();
        Ok(())
    }

    pub fn get_message(&self, id: &str) -> StoreResult<Message> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM messages WHERE id = ?1", params![id], |row| {
            row_to_message(row)
        })
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                StoreError::NotFound(format!("Message {}", id))
            }
            _ => StoreError::Database(e),
        })
    }

    /// Both directions of a two-party conversation, oldest first.
    pub fn conversation(&self, user_a: &str, user_b: &str) -> StoreResult<Vec<Message>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"SELECT * FROM messages
               WHERE (sender_id = ?1 AND receiver_id = ?2)
                  OR (sender_id = ?2 AND receiver_id = ?1)
               ORDER BY sent_at ASC, seq ASC"#,
        )?;
        let messages = stmt
            .query_map(params![user_a, user_b], |row| row_to_message(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    /// Received messages strictly after the given cursor, ascending seq.
    /// Consumers keep the highest seq they have seen and never get a
    /// duplicate delivery.
    pub fn inbox_after(&self, receiver_id: &str, after_seq: i64) -> StoreResult<Vec<Message>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM messages WHERE receiver_id = ?1 AND seq > ?2 ORDER BY seq ASC",
        )?;
        let messages = stmt
            .query_map(params![receiver_id, after_seq], |row| row_to_message(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    pub fn delete_message(&self, id: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute("DELETE FROM messages WHERE id = ?1", params![id])?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("Message {}", id)));
        }
        Ok(())
    }

    // ==================== Search Operations ====================

    /// Case-insensitive substring match over post content, newest first.
    pub fn search_posts(&self, term: &str) -> StoreResult<Vec<Post>> {
        let conn = self.conn.lock().unwrap();
        let pattern = format!("%{}%", term);
        let mut stmt = conn.prepare(
            "SELECT * FROM posts WHERE content LIKE ?1 ORDER BY created_at DESC, rowid DESC",
        )?;
        let posts = stmt
            .query_map(params![pattern], |row| row_to_post(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(posts)
    }

    /// Case-insensitive substring match over usernames.
    pub fn search_users(&self, term: &str) -> StoreResult<Vec<User>> {
        let conn = self.conn.lock().unwrap();
        let pattern = format!("%{}%", term);
        let mut stmt =
            conn.prepare("SELECT * FROM users WHERE username LIKE ?1 ORDER BY username ASC")?;
        let users = stmt
            .query_map(params![pattern], |row| row_to_user(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    // ==================== Leaderboard Support ====================

    /// Users ordered for the leaderboard. Ties keep insertion order, which
    /// is arbitrary as far as callers are concerned. limit of -1 means all.
    pub fn list_users_by_total_views(&self, limit: i64) -> StoreResult<Vec<User>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM users ORDER BY total_views DESC, rowid ASC LIMIT ?1",
        )?;
        let users = stmt
            .query_map(params![limit], |row| row_to_user(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    pub fn sum_views_for_author(&self, author_id: &str) -> StoreResult<i64> {
        let conn = self.conn.lock().unwrap();
        let total: i64 = conn.query_row(
            "SELECT COALESCE(SUM(views_count), 0) FROM posts WHERE author_id = ?1",
            params![author_id],
            |row| row.get(0),
        )?;
        Ok(total)
    }

    pub fn set_total_views(&self, user_id: &str, total: i64) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE users SET total_views = ?1 WHERE id = ?2",
            params![total, user_id],
        )?;
        Ok(())
    }

    // ==================== File Operations ====================

    pub fn create_file(&self, file: &mut StoredFile) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        file.id = Uuid::new_v4().to_string();
        file.created_at = Utc::now();

        conn.execute(
            r#"INSERT INTO files (id, owner_id, filename, content_type, data, size, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
            params![
                &file.id,
                &file.owner_id,
                &file.filename,
                &file.content_type,
                &file.data,
                file.size,
                file.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_file(&self, id: &str) -> StoreResult<StoredFile> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM files WHERE id = ?1", params![id], |row| {
            row_to_file(row)
        })
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(format!("File {}", id)),
            _ => StoreError::Database(e),
        })
    }
}

fn refresh_followers_count(tx: &rusqlite::Transaction, user_id: &str) -> rusqlite::Result<()> {
    tx.execute(
        "UPDATE users SET followers_count = (SELECT COUNT(*) FROM follows WHERE followee_id = ?1) WHERE id = ?1",
        params![user_id],
    )?;
    Ok(())
}

// Top-level comments only; replies are deliberately excluded from the
// persisted count even though the assembled thread contains them.
fn refresh_comments_count(tx: &rusqlite::Transaction, post_id: &str) -> rusqlite::Result<()> {
    tx.execute(
        "UPDATE posts SET comments_count = (SELECT COUNT(*) FROM comments WHERE post_id = ?1 AND parent_id IS NULL) WHERE id = ?1",
        params![post_id],
    )?;
    Ok(())
}

fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get("id")?,
        username: row.get("username")?,
        email: row.get("email")?,
        password_hash: row.get("password_hash")?,
        display_name: row.get("display_name")?,
        bio: row.get("bio")?,
        avatar_url: row.get("avatar_url")?,
        is_admin: row.get("is_admin")?,
        followers_count: row.get("followers_count")?,
        total_views: row.get("total_views")?,
        created_at: parse_datetime(row.get::<_, String>("created_at")?),
        updated_at: parse_datetime(row.get::<_, String>("updated_at")?),
    })
}

fn row_to_post(row: &rusqlite::Row) -> rusqlite::Result<Post> {
    let image_urls: String = row.get("image_urls")?;
    let video_urls: String = row.get("video_urls")?;

    Ok(Post {
        id: row.get("id")?,
        author_id: row.get("author_id")?,
        content: row.get("content")?,
        image_urls: serde_json::from_str(&image_urls).unwrap_or_default(),
        video_urls: serde_json::from_str(&video_urls).unwrap_or_default(),
        link: row.get("link")?,
        likes_count: row.get("likes_count")?,
        comments_count: row.get("comments_count")?,
        shares_count: row.get("shares_count")?,
        views_count: row.get("views_count")?,
        created_at: parse_datetime(row.get::<_, String>("created_at")?),
        updated_at: parse_datetime(row.get::<_, String>("updated_at")?),
    })
}

fn row_to_comment(row: &rusqlite::Row) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: row.get("id")?,
        post_id: row.get("post_id")?,
        parent_id: row.get("parent_id")?,
        author_id: row.get("author_id")?,
        author_name: row.get("author_name")?,
        author_avatar: row.get("author_avatar")?,
        content: row.get("content")?,
        created_at: parse_datetime(row.get::<_, String>("created_at")?),
    })
}

fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<Message> {
    Ok(Message {
        seq: row.get("seq")?,
        id: row.get("id")?,
        sender_id: row.get("sender_id")?,
        receiver_id: row.get("receiver_id")?,
        content: row.get("content")?,
        sent_at: parse_datetime(row.get::<_, String>("sent_at")?),
    })
}

fn row_to_file(row: &rusqlite::Row) -> rusqlite::Result<StoredFile> {
    Ok(StoredFile {
        id: row.get("id")?,
        owner_id: row.get("owner_id")?,
        filename: row.get("filename")?,
        content_type: row.get("content_type")?,
        data: row.get("data")?,
        size: row.get("size")?,
        created_at: parse_datetime(row.get::<_, String>("created_at")?),
    })
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
