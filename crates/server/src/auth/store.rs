use anyhow::{Result, anyhow};
use async_trait::async_trait;
use git_http::auth::{
    AccessMode, AccessStore, AccessToken, Account, RepositoryRecord, Unit, token_digest,
};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::password::{hash_password, verify_password, verify_unknown_account};
use crate::validation::slug::validate_name;

const ACCOUNT_COLUMNS: &str =
    "id, name, email, is_active, prohibit_login, is_admin, keep_email_private";

#[derive(Clone, Debug)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password: String,
    pub is_admin: bool,
}

/// SQLite-backed accounts, tokens and repository permissions.
#[derive(Clone)]
pub struct SqliteAccessStore {
    pool: SqlitePool,
}

fn account_from_row(r: &SqliteRow) -> Account {
    Account {
        id: r.get::<i64, _>(0),
        name: r.get::<String, _>(1),
        email: r.get::<String, _>(2),
        is_active: r.get::<bool, _>(3),
        prohibit_login: r.get::<bool, _>(4),
        is_admin: r.get::<bool, _>(5),
        keep_email_private: r.get::<bool, _>(6),
    }
}

impl SqliteAccessStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn create_user(&self, input: NewUser) -> Result<Account> {
        validate_name(&input.name)?;
        if input.password.is_empty() {
            return Err(anyhow!("password must not be empty"));
        }
        if self.find_account_by_name(&input.name).await?.is_some() {
            return Err(anyhow!("user {} already exists", input.name));
        }

        let password_hash = hash_password(&input.password)?;
        let result = sqlx::query(
            "INSERT INTO users (name, email, password_hash, is_admin) VALUES (?, ?, ?, ?)",
        )
        .bind(&input.name)
        .bind(&input.email)
        .bind(&password_hash)
        .bind(input.is_admin)
        .execute(&self.pool)
        .await?;

        Ok(Account {
            id: result.last_insert_rowid(),
            name: input.name,
            email: input.email,
            is_active: true,
            prohibit_login: false,
            is_admin: input.is_admin,
            keep_email_private: false,
        })
    }

    /// Returns `false` when no such user exists.
    pub async fn set_user_active(&self, name: &str, active: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE users SET is_active = ? WHERE name = ?")
            .bind(active)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_two_factor(&self, name: &str, enabled: bool) -> Result<()> {
        let account = self
            .find_account_by_name(name)
            .await?
            .ok_or_else(|| anyhow!("user {name} not found"))?;

        let query = if enabled {
            "INSERT OR IGNORE INTO two_factor (user_id) VALUES (?)"
        } else {
            "DELETE FROM two_factor WHERE user_id = ?"
        };
        sqlx::query(query)
            .bind(account.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Issues a personal access token and returns the raw value. Only its
    /// digest is stored.
    pub async fn create_access_token(&self, user: &str, name: &str) -> Result<String> {
        let account = self
            .find_account_by_name(user)
            .await?
            .ok_or_else(|| anyhow!("user {user} not found"))?;

        let bytes: [u8; 20] = rand::random();
        let token: String = bytes.iter().map(|b| format!("{b:02x}")).collect();

        sqlx::query("INSERT INTO access_tokens (user_id, name, token_hash) VALUES (?, ?, ?)")
            .bind(account.id)
            .bind(name)
            .bind(token_digest(&token))
            .execute(&self.pool)
            .await?;
        Ok(token)
    }

    pub async fn token_last_used(&self, token_id: i64) -> Result<Option<i64>> {
        let row = sqlx::query("SELECT last_used_at FROM access_tokens WHERE id = ?")
            .bind(token_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(|r| r.get::<Option<i64>, _>(0)))
    }

    async fn collaborator_mode(&self, repository_id: i64, user_id: i64) -> Result<AccessMode> {
        let row = sqlx::query("SELECT mode FROM collaborators WHERE repository_id = ? AND user_id = ?")
            .bind(repository_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row
            .and_then(|r| AccessMode::parse(&r.get::<String, _>(0)))
            .unwrap_or(AccessMode::None))
    }

    /// Effective permission of `account` on `repo`, ignoring units.
    pub async fn permission(
        &self,
        account: Option<&Account>,
        repo: &RepositoryRecord,
    ) -> Result<AccessMode> {
        let granted = match account {
            Some(a) if a.is_admin || a.name.eq_ignore_ascii_case(&repo.owner_name) => {
                AccessMode::Admin
            }
            Some(a) => self.collaborator_mode(repo.id, a.id).await?,
            None => AccessMode::None,
        };

        Ok(if repo.is_private {
            granted
        } else {
            granted.max(AccessMode::Read)
        })
    }
}

#[async_trait]
impl AccessStore for SqliteAccessStore {
    async fn find_repository(&self, owner: &str, name: &str) -> Result<Option<RepositoryRecord>> {
        let row = sqlx::query(
            r#"SELECT r.id, u.name, r.name, r.is_private, r.is_mirror, r.is_archived, r.has_wiki
               FROM repositories r JOIN users u ON u.id = r.owner_id
               WHERE u.name = ? AND r.name = ?"#,
        )
        .bind(owner)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| RepositoryRecord {
            id: r.get::<i64, _>(0),
            owner_name: r.get::<String, _>(1),
            name: r.get::<String, _>(2),
            is_private: r.get::<bool, _>(3),
            is_mirror: r.get::<bool, _>(4),
            is_archived: r.get::<bool, _>(5),
            has_wiki: r.get::<bool, _>(6),
        }))
    }

    async fn find_account_by_id(&self, id: i64) -> Result<Option<Account>> {
        let row = sqlx::query(&format!("SELECT {ACCOUNT_COLUMNS} FROM users WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(account_from_row))
    }

    async fn find_account_by_name(&self, name: &str) -> Result<Option<Account>> {
        let row = sqlx::query(&format!("SELECT {ACCOUNT_COLUMNS} FROM users WHERE name = ?"))
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(account_from_row))
    }

    async fn verify_password(&self, name: &str, password: &str) -> Result<Option<Account>> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS}, password_hash FROM users WHERE name = ?"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        let password = password.to_string();
        // PBKDF2 is deliberately slow; keep it off the async workers
        let Some(row) = row else {
            tokio::task::spawn_blocking(move || verify_unknown_account(&password)).await?;
            return Ok(None);
        };
        let stored = row.get::<String, _>(7);
        let matches = tokio::task::spawn_blocking(move || verify_password(&stored, &password)).await?;
        Ok(matches.then(|| account_from_row(&row)))
    }

    async fn two_factor_enrolled(&self, user_id: i64) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM two_factor WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn find_access_token(&self, digest: &str) -> Result<Option<AccessToken>> {
        let row = sqlx::query("SELECT id, user_id FROM access_tokens WHERE token_hash = ?")
            .bind(digest)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| AccessToken {
            id: r.get::<i64, _>(0),
            user_id: r.get::<i64, _>(1),
        }))
    }

    async fn touch_access_token(&self, token_id: i64) -> Result<()> {
        sqlx::query("UPDATE access_tokens SET last_used_at = strftime('%s','now') WHERE id = ?")
            .bind(token_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn has_access(
        &self,
        account: Option<&Account>,
        repo: &RepositoryRecord,
        unit: Unit,
        mode: AccessMode,
    ) -> Result<bool> {
        if unit == Unit::Wiki && !repo.has_wiki {
            return Ok(false);
        }
        Ok(self.permission(account, repo).await? >= mode)
    }
}
