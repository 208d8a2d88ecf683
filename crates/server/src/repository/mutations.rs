use git_http::auth::{AccessMode, AccessStore, RepositoryRecord};
use sqlx::{Row, SqlitePool};

use crate::auth::SqliteAccessStore;
use crate::validation::slug::validate_name;

#[derive(Clone, Debug)]
pub struct CreateRepositoryInput {
    pub owner: String,
    pub name: String,
    pub is_private: bool,
    pub is_mirror: bool,
    pub is_archived: bool,
    pub has_wiki: bool,
}

async fn owner_id(pool: &SqlitePool, owner: &str) -> anyhow::Result<i64> {
    let row = sqlx::query("SELECT id FROM users WHERE name = ?")
        .bind(owner)
        .fetch_optional(pool)
        .await?;
    row.map(|r| r.get::<i64, _>(0))
        .ok_or_else(|| anyhow::anyhow!("user {owner} not found"))
}

pub async fn create_repository_raw(
    pool: &SqlitePool,
    input: CreateRepositoryInput,
) -> anyhow::Result<RepositoryRecord> {
    validate_name(&input.owner)?;
    validate_name(&input.name)?;

    let owner_id = owner_id(pool, &input.owner).await?;
    let store = SqliteAccessStore::new(pool.clone());
    if store.find_repository(&input.owner, &input.name).await?.is_some() {
        return Err(anyhow::anyhow!(
            "repository {}/{} already exists",
            input.owner,
            input.name
        ));
    }

    let result = sqlx::query(
        "INSERT INTO repositories (owner_id, name, is_private, is_mirror, is_archived, has_wiki) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(owner_id)
    .bind(&input.name)
    .bind(input.is_private)
    .bind(input.is_mirror)
    .bind(input.is_archived)
    .bind(input.has_wiki)
    .execute(pool)
    .await?;

    Ok(RepositoryRecord {
        id: result.last_insert_rowid(),
        owner_name: input.owner,
        name: input.name,
        is_private: input.is_private,
        is_mirror: input.is_mirror,
        is_archived: input.is_archived,
        has_wiki: input.has_wiki,
    })
}

/// Records (or replaces) a collaborator's access mode.
pub async fn grant_access_raw(
    pool: &SqlitePool,
    owner: &str,
    name: &str,
    user: &str,
    mode: AccessMode,
) -> anyhow::Result<()> {
    if mode == AccessMode::None {
        return Err(anyhow::anyhow!("mode must be read, write or admin"));
    }

    let store = SqliteAccessStore::new(pool.clone());
    let repository = store
        .find_repository(owner, name)
        .await?
        .ok_or_else(|| anyhow::anyhow!("repository {owner}/{name} not found"))?;
    let account = store
        .find_account_by_name(user)
        .await?
        .ok_or_else(|| anyhow::anyhow!("user {user} not found"))?;

    sqlx::query(
        "INSERT INTO collaborators (repository_id, user_id, mode) VALUES (?, ?, ?) \
         ON CONFLICT (repository_id, user_id) DO UPDATE SET mode = excluded.mode",
    )
    .bind(repository.id)
    .bind(account.id)
    .bind(mode.as_str())
    .execute(pool)
    .await?;

    Ok(())
}
