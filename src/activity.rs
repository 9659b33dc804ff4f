//! Append-only audit trail of enrollment events.
//!
//! Writes happen after the owning transaction committed and never fail the
//! caller: a lost audit entry is logged and dropped.

use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use time::OffsetDateTime;
use tracing::warn;

use crate::utils::now_utc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    CoursePurchased,
    CourseEnrolled,
    CourseUnenrolled,
}

impl ActivityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityAction::CoursePurchased => "course_purchased",
            ActivityAction::CourseEnrolled => "course_enrolled",
            ActivityAction::CourseUnenrolled => "course_unenrolled",
        }
    }
}

impl fmt::Display for ActivityAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ActivityEntry {
    pub id: i64,
    pub user_id: i64,
    /// Stored as text so entries written by other services still load
    pub action: String,
    pub description: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct ActivityRecorder {
    database: SqlitePool,
}

impl ActivityRecorder {
    pub fn new(database: SqlitePool) -> Self {
        Self { database }
    }

    /// Best-effort append. Returns whether the entry was written.
    pub async fn record(&self, user_id: i64, action: ActivityAction, description: &str) -> bool {
        let result = sqlx::query(
            "INSERT INTO activity_log (user_id, action, description, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(action.as_str())
        .bind(description)
        .bind(now_utc())
        .execute(&self.database)
        .await;
        match result {
            Ok(_) => true,
            Err(e) => {
                warn!(user_id, %action, "failed to record activity: {}", e);
                false
            }
        }
    }

    /// Most recent first.
    pub async fn list_for_user(
        &self,
        user_id: i64,
        limit: i64,
    ) -> Result<Vec<ActivityEntry>, sqlx::Error> {
        sqlx::query_as::<_, ActivityEntry>(
            "SELECT id, user_id, action, description, created_at FROM activity_log WHERE user_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.database)
        .await
    }
}
