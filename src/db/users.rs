//! User account repository.
//!
//! Credentials, persisted permission ranks and activity timestamps. The
//! persisted rank is the durable truth; the session authority holds the
//! live copy for connected users.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use sqlx::SqlitePool;

use super::DbError;
use crate::permission::Permission;

/// A persisted user account. The password hash never leaves this module.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    pub permission: Permission,
    pub online: bool,
    pub email: Option<String>,
    pub created_at: i64,
    pub last_login: Option<i64>,
    pub last_seen: Option<i64>,
}

/// Repository for account operations.
pub struct UserRepository<'a> {
    pool: &'a SqlitePool,
}

type UserRow = (
    i64,
    String,
    i64,
    bool,
    Option<String>,
    i64,
    Option<i64>,
    Option<i64>,
);

const USER_COLUMNS: &str =
    "id, username, permission, is_online, email, created_at, last_login, last_seen";

fn row_to_record(row: UserRow) -> UserRecord {
    let (id, username, permission, online, email, created_at, last_login, last_seen) = row;
    UserRecord {
        id,
        username,
        permission: Permission::from_rank(permission as i32).unwrap_or(Permission::Guest),
        online,
        email,
        created_at,
        last_login,
        last_seen,
    }
}

impl<'a> UserRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Create an account with a freshly hashed password. Returns the new
    /// row id, or [`DbError::UserExists`] on a duplicate username.
    pub async fn create(
        &self,
        username: &str,
        password: &str,
        email: Option<&str>,
        permission: Permission,
    ) -> Result<i64, DbError> {
        let password_hash = hash_password(password)?;
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO users (username, password_hash, email, permission, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(username)
        .bind(&password_hash)
        .bind(email)
        .bind(permission.rank())
        .bind(now)
        .execute(self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return DbError::UserExists(username.to_string());
            }
            DbError::from(e)
        })?;

        Ok(result.last_insert_rowid())
    }

    pub async fn exists(&self, username: &str) -> Result<bool, DbError> {
        let row = sqlx::query_scalar::<_, i64>("SELECT 1 FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Check a username/password pair.
    ///
    /// When the account does not exist a dummy Argon2 verification still
    /// runs, so response time does not reveal which usernames are taken.
    pub async fn validate_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<bool, DbError> {
        let hash = sqlx::query_scalar::<_, String>(
            "SELECT password_hash FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(self.pool)
        .await?;

        match hash {
            Some(hash) => Ok(verify_password(password, &hash)),
            None => {
                dummy_password_verify(password);
                Ok(false)
            }
        }
    }

    pub async fn id_of(&self, username: &str) -> Result<Option<i64>, DbError> {
        let id = sqlx::query_scalar::<_, i64>("SELECT id FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(self.pool)
            .await?;
        Ok(id)
    }

    /// Persisted permission rank, or `None` for an unknown account.
    pub async fn permission_of(&self, username: &str) -> Result<Option<Permission>, DbError> {
        let rank = sqlx::query_scalar::<_, i64>(
            "SELECT permission FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(self.pool)
        .await?;
        Ok(rank.map(|r| Permission::from_rank(r as i32).unwrap_or(Permission::Guest)))
    }

    /// Persist a new permission rank. Returns false when no such user.
    pub async fn set_permission(
        &self,
        username: &str,
        permission: Permission,
    ) -> Result<bool, DbError> {
        let result = sqlx::query("UPDATE users SET permission = ? WHERE username = ?")
            .bind(permission.rank())
            .bind(username)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[allow(dead_code)] // Wire surfaces read list_all; kept for row-level lookups
    pub async fn get(&self, username: &str) -> Result<Option<UserRecord>, DbError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = ?"
        ))
        .bind(username)
        .fetch_optional(self.pool)
        .await?;
        Ok(row.map(row_to_record))
    }

    pub async fn list_all(&self) -> Result<Vec<UserRecord>, DbError> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY username"
        ))
        .fetch_all(self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_record).collect())
    }

    pub async fn count(&self) -> Result<i64, DbError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
            .fetch_one(self.pool)
            .await?;
        Ok(count)
    }

    /// Flip the persisted online flag; going offline also stamps
    /// `last_seen`.
    pub async fn mark_online(&self, username: &str, online: bool) -> Result<(), DbError> {
        if online {
            sqlx::query("UPDATE users SET is_online = 1 WHERE username = ?")
                .bind(username)
                .execute(self.pool)
                .await?;
        } else {
            sqlx::query("UPDATE users SET is_online = 0, last_seen = ? WHERE username = ?")
                .bind(chrono::Utc::now().timestamp())
                .bind(username)
                .execute(self.pool)
                .await?;
        }
        Ok(())
    }

    pub async fn touch_last_login(&self, username: &str) -> Result<(), DbError> {
        sqlx::query("UPDATE users SET last_login = ? WHERE username = ?")
            .bind(chrono::Utc::now().timestamp())
            .bind(username)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Install the stock demo accounts when they are missing. Idempotent,
    /// so safe to run at every startup.
    pub async fn seed_defaults(&self) -> Result<(), DbError> {
        const SEEDS: [(&str, &str, Permission); 4] = [
            ("admin", "admin123", Permission::Admin),
            ("moderator", "mod456", Permission::Moderator),
            ("user", "user789", Permission::User),
            ("guest", "guest999", Permission::Guest),
        ];

        for (username, password, permission) in SEEDS {
            if !self.exists(username).await? {
                self.create(username, password, None, permission).await?;
                tracing::info!(username = %username, permission = %permission, "seeded default account");
            }
        }
        Ok(())
    }
}

/// Hash a password using Argon2.
fn hash_password(password: &str) -> Result<String, DbError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|_| DbError::InvalidPassword)?;
    Ok(hash.to_string())
}

/// Verify a password against a stored hash.
fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed_hash) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Burn the CPU time of a real Argon2 verification against a hash that can
/// never match, keeping unknown-username rejections indistinguishable from
/// wrong-password rejections.
fn dummy_password_verify(password: &str) {
    const DUMMY_HASH: &str = "$argon2id$v=19$m=19456,t=2,p=1$bmF0dGVyZC1kdW1teS1zYWx0$QkJCQkJCQkJCQkJCQkJCQkJCQkJCQkJCQkJCQkJCQkI";

    if let Ok(parsed) = PasswordHash::new(DUMMY_HASH) {
        let _ = Argon2::default().verify_password(password.as_bytes(), &parsed);
    }
}
