//! Leaderboard engine.
//!
//! Ranks users by total views across their authored posts. The running
//! total is materialized on the user row and bumped incrementally as views
//! are recorded, so the leaderboard read is a single ordered query instead
//! of a fan-out over every user's posts.
//!
//! `rebuild` is the full recompute over the posts table. It runs at startup
//! and on demand, and is the source of truth the incremental path converges
//! to: one user's summation failing logs and leaves that user at zero
//! rather than aborting the whole pass.

use serde::Serialize;
use std::sync::Arc;

use crate::models::LeaderboardEntry;
use crate::store::{Store, StoreResult};

pub struct RankEngine {
    store: Arc<Store>,
}

/// A single user's standing. rank is 0 when the user is unknown.
#[derive(Debug, Serialize)]
pub struct UserRank {
    pub rank: i64,
    pub total_views: i64,
}

impl RankEngine {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Ordered leaderboard, rank assigned as 1-based position. Ties land in
    /// whatever order the store returned them.
    pub fn leaderboard(&self, limit: i64) -> StoreResult<Vec<LeaderboardEntry>> {
        let users = self.store.list_users_by_total_views(limit)?;
        Ok(users
            .into_iter()
            .enumerate()
            .map(|(i, user)| LeaderboardEntry {
                user_id: user.id,
                username: user.username,
                avatar_url: user.avatar_url,
                total_views: user.total_views,
                rank: i as i64 + 1,
            })
            .collect())
    }

    /// One user's position in the full ordering.
    pub fn user_rank(&self, user_id: &str) -> StoreResult<UserRank> {
        let users = self.store.list_users_by_total_views(-1)?;
        for (i, user) in users.iter().enumerate() {
            if user.id == user_id {
                return Ok(UserRank {
                    rank: i as i64 + 1,
                    total_views: user.total_views,
                });
            }
        }
        Ok(UserRank {
            rank: 0,
            total_views: 0,
        })
    }

    /// Recompute every user's total from their posts. Returns the number of
    /// users written. A user whose summation fails is logged and written as
    /// zero; the rebuild itself keeps going.
    pub fn rebuild(&self) -> StoreResult<usize> {
        let user_ids = self.store.list_user_ids()?;
        let mut written = 0;

        for user_id in &user_ids {
            let total = match self.store.sum_views_for_author(user_id) {
                Ok(total) => total,
                Err(e) => {
                    log::error!("leaderboard rebuild: summing views for {} failed: {}", user_id, e);
                    0
                }
            };
            self.store.set_total_views(user_id, total)?;
            written += 1;
        }

        Ok(written)
    }
}
