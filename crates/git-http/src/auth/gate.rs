use axum::http::{HeaderMap, Method};
use metrics::counter;

use super::resolver::{Credential, Identity, resolve_identity, resolver_chain};
use super::store::{AccessMode, AccessStore, Account, RepositoryRecord, Unit};
use crate::errors::GitHttpError;
use crate::repo::RepoLocator;
use crate::settings::GatewaySettings;

pub const ENV_REPO_USER_NAME: &str = "FORGE_REPO_USER_NAME";
pub const ENV_REPO_NAME: &str = "FORGE_REPO_NAME";
pub const ENV_PUSHER_NAME: &str = "FORGE_PUSHER_NAME";
pub const ENV_PUSHER_ID: &str = "FORGE_PUSHER_ID";
pub const ENV_REPO_ID: &str = "FORGE_REPO_ID";
pub const ENV_REPO_IS_WIKI: &str = "FORGE_REPO_IS_WIKI";
pub const ENV_PUSHER_EMAIL: &str = "FORGE_PUSHER_EMAIL";

const ARCHIVED_REJECTION: &str =
    "This repo is archived. You can view files and clone it, but cannot push or open issues/pull-requests.";

/// Derives the requested mode from the `service` query value, the path
/// suffix and finally the method.
pub fn requested_mode(method: &Method, path: &str, service: Option<&str>) -> AccessMode {
    let path = path.to_ascii_lowercase();
    let names = |suffix: &str| service == Some(suffix) || path.ends_with(suffix);

    if names("git-receive-pack") {
        AccessMode::Write
    } else if names("git-upload-pack") || names("git-upload-archive") {
        AccessMode::Read
    } else if method == Method::GET {
        AccessMode::Read
    } else {
        AccessMode::Write
    }
}

/// Outcome of the gate for a request allowed to proceed.
#[derive(Debug, Clone)]
pub struct ResolvedIdentity {
    /// `None` for an anonymous read.
    pub account: Option<Account>,
    /// How the account proved itself; `None` when anonymous.
    pub credential: Option<Credential>,
    pub access_mode: AccessMode,
}

impl ResolvedIdentity {
    pub fn is_authenticated(&self) -> bool {
        self.account.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct Authorized {
    pub repository: RepositoryRecord,
    pub identity: ResolvedIdentity,
    /// `KEY=value` hook environment describing the request.
    pub environment: Vec<String>,
}

pub struct AccessRequest<'a> {
    pub locator: &'a RepoLocator,
    pub mode: AccessMode,
    pub headers: &'a HeaderMap,
}

fn reject(reason: &'static str, err: GitHttpError) -> GitHttpError {
    counter!("git_http.auth_rejections", "reason" => reason).increment(1);
    err
}

/// Decides whether a request may reach a handler, and with which identity.
pub async fn authorize(
    store: &dyn AccessStore,
    settings: &GatewaySettings,
    request: AccessRequest<'_>,
) -> Result<Authorized, GitHttpError> {
    let AccessRequest {
        locator,
        mode,
        headers,
    } = request;
    let unit = if locator.is_wiki { Unit::Wiki } else { Unit::Code };
    let is_pull = mode == AccessMode::Read;

    let repository = store
        .find_repository(&locator.owner, &locator.name)
        .await
        .map_err(|err| GitHttpError::Internal(format!("repository lookup: {err:#}")))?
        .ok_or(GitHttpError::RepositoryNotFound)?;

    if repository.is_archived && !is_pull {
        return Err(reject(
            "archived",
            GitHttpError::Forbidden(ARCHIVED_REJECTION.to_string()),
        ));
    }

    let public_pull = !repository.is_private && is_pull;
    let ask_auth = !public_pull || settings.require_sign_in_view;

    if !ask_auth {
        ensure_wiki_enabled(&repository, unit)?;
        if !check_access(store, None, &repository, unit, AccessMode::Read).await? {
            return Err(reject("anonymous", GitHttpError::CredentialsRequired));
        }
        return Ok(Authorized {
            environment: vec![format!("{ENV_REPO_ID}={}", repository.id)],
            repository,
            identity: ResolvedIdentity {
                account: None,
                credential: None,
                access_mode: AccessMode::Read,
            },
        });
    }

    let chain = resolver_chain(&settings.identity);
    let Identity { account, credential } = resolve_identity(&chain, headers, store)
        .await
        .map_err(|err| reject("credentials", err))?;

    if account.is_disabled() {
        return Err(reject(
            "disabled",
            GitHttpError::Forbidden("Your account is disabled.".to_string()),
        ));
    }

    let mut granted = check_access(store, Some(&account), &repository, unit, mode).await?;
    if !granted && is_pull {
        // write access implies the right to fetch
        granted = check_access(store, Some(&account), &repository, unit, AccessMode::Write).await?;
    }
    if !granted {
        return Err(reject(
            "permission",
            GitHttpError::Forbidden("User permission denied".to_string()),
        ));
    }

    if !is_pull && repository.is_mirror {
        return Err(reject(
            "mirror",
            GitHttpError::Forbidden("mirror repository is read-only".to_string()),
        ));
    }
    ensure_wiki_enabled(&repository, unit)?;

    let environment = hook_environment(locator, &repository, &account);
    Ok(Authorized {
        repository,
        identity: ResolvedIdentity {
            account: Some(account),
            credential: Some(credential),
            access_mode: mode,
        },
        environment,
    })
}

async fn check_access(
    store: &dyn AccessStore,
    account: Option<&Account>,
    repository: &RepositoryRecord,
    unit: Unit,
    mode: AccessMode,
) -> Result<bool, GitHttpError> {
    store
        .has_access(account, repository, unit, mode)
        .await
        .map_err(|err| GitHttpError::Internal(format!("permission lookup: {err:#}")))
}

fn ensure_wiki_enabled(repository: &RepositoryRecord, unit: Unit) -> Result<(), GitHttpError> {
    if unit == Unit::Wiki && !repository.has_wiki {
        return Err(reject(
            "wiki-disabled",
            GitHttpError::Forbidden("repository wiki is disabled".to_string()),
        ));
    }
    Ok(())
}

/// Identity environment for hooks, in a fixed key order.
pub fn hook_environment(
    locator: &RepoLocator,
    repository: &RepositoryRecord,
    account: &Account,
) -> Vec<String> {
    let mut env = vec![
        format!("{ENV_REPO_USER_NAME}={}", locator.owner),
        format!("{ENV_REPO_NAME}={}", locator.name),
        format!("{ENV_PUSHER_NAME}={}", account.name),
        format!("{ENV_PUSHER_ID}={}", account.id),
        format!("{ENV_REPO_ID}={}", repository.id),
        format!("{ENV_REPO_IS_WIKI}={}", locator.is_wiki),
    ];
    if !account.keep_email_private {
        env.push(format!("{ENV_PUSHER_EMAIL}={}", account.email));
    }
    env
}

/// True when `env` names a pusher, required before running receive-pack.
pub fn has_pusher(env: &[String]) -> bool {
    let prefix = format!("{ENV_PUSHER_ID}=");
    env.iter()
        .any(|entry| entry.strip_prefix(&prefix).is_some_and(|id| !id.is_empty()))
}
