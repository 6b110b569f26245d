//! Ban audit repository.
//!
//! Bans are *enforced* through the persisted permission rank on the users
//! table; rows here are the audit trail of who banned whom, when and why.
//! Unban removes the active row but enforcement always follows the rank.

use sqlx::SqlitePool;

use super::DbError;

/// One recorded ban.
#[derive(Debug, Clone)]
#[allow(dead_code)] // Fields surface through the audit queries
pub struct BanRecord {
    pub id: i64,
    pub username: String,
    pub banned_by: Option<i64>,
    pub reason: Option<String>,
    /// 0 means indefinite; expiry is not enforced automatically, an
    /// administrator lifts the ban explicitly.
    pub duration_minutes: i64,
    pub created_at: i64,
}

/// Repository for ban audit operations.
pub struct BanRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> BanRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Record a ban. Returns the audit row id.
    pub async fn record(
        &self,
        username: &str,
        banned_by: Option<i64>,
        reason: &str,
        duration_minutes: i64,
    ) -> Result<i64, DbError> {
        let result = sqlx::query(
            r#"
            INSERT INTO bans (username, banned_by, reason, duration_minutes, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(username)
        .bind(banned_by)
        .bind(if reason.is_empty() { None } else { Some(reason) })
        .bind(duration_minutes)
        .bind(chrono::Utc::now().timestamp())
        .execute(self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Delete the recorded bans for a user. Returns false when there were
    /// none.
    pub async fn clear(&self, username: &str) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM bans WHERE username = ?")
            .bind(username)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// All recorded bans for a user, newest first.
    #[allow(dead_code)] // Audit trail; no admin surface reads it back yet
    pub async fn history(&self, username: &str) -> Result<Vec<BanRecord>, DbError> {
        let rows = sqlx::query_as::<_, (i64, String, Option<i64>, Option<String>, i64, i64)>(
            r#"
            SELECT id, username, banned_by, reason, duration_minutes, created_at
            FROM bans WHERE username = ? ORDER BY id DESC
            "#,
        )
        .bind(username)
        .fetch_all(self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(id, username, banned_by, reason, duration_minutes, created_at)| BanRecord {
                    id,
                    username,
                    banned_by,
                    reason,
                    duration_minutes,
                    created_at,
                },
            )
            .collect())
    }
}
