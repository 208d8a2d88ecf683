use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub is_active: bool,
    pub prohibit_login: bool,
    pub is_admin: bool,
    pub keep_email_private: bool,
}

impl Account {
    pub fn is_disabled(&self) -> bool {
        !self.is_active || self.prohibit_login
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryRecord {
    pub id: i64,
    pub owner_name: String,
    pub name: String,
    pub is_private: bool,
    pub is_mirror: bool,
    pub is_archived: bool,
    pub has_wiki: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub id: i64,
    pub user_id: i64,
}

/// Ordered permission levels; a higher level implies the lower ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AccessMode {
    None,
    Read,
    Write,
    Admin,
}

impl AccessMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "none" => Some(AccessMode::None),
            "read" => Some(AccessMode::Read),
            "write" => Some(AccessMode::Write),
            "admin" => Some(AccessMode::Admin),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            AccessMode::None => "none",
            AccessMode::Read => "read",
            AccessMode::Write => "write",
            AccessMode::Admin => "admin",
        }
    }
}

/// Repository unit a request touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Code,
    Wiki,
}

/// Accounts, tokens and permissions backing the access gate.
#[async_trait]
pub trait AccessStore: Send + Sync + 'static {
    async fn find_repository(&self, owner: &str, name: &str) -> Result<Option<RepositoryRecord>>;

    async fn find_account_by_id(&self, id: i64) -> Result<Option<Account>>;

    async fn find_account_by_name(&self, name: &str) -> Result<Option<Account>>;

    /// Password sign-in. `None` for an unknown user or a wrong password.
    async fn verify_password(&self, name: &str, password: &str) -> Result<Option<Account>>;

    async fn two_factor_enrolled(&self, user_id: i64) -> Result<bool>;

    /// Looks a personal access token up by its [`token_digest`].
    async fn find_access_token(&self, digest: &str) -> Result<Option<AccessToken>>;

    async fn touch_access_token(&self, token_id: i64) -> Result<()>;

    /// Whether `account` (anonymous when `None`) may use `unit` of `repo`
    /// at `mode`.
    async fn has_access(
        &self,
        account: Option<&Account>,
        repo: &RepositoryRecord,
        unit: Unit,
        mode: AccessMode,
    ) -> Result<bool>;
}

/// Lowercase hex SHA-256 of a raw token. Only digests are ever stored.
pub fn token_digest(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}
