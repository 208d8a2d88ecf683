//! Identity resolver chain.
//!
//! Each resolver either produces an identity, passes to the next resolver,
//! or ends the request. Running off the end of the chain is a generic 401.

use async_trait::async_trait;
use axum::http::{HeaderMap, header};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use super::store::{AccessStore, Account, token_digest};
use crate::errors::GitHttpError;
use crate::settings::IdentitySource;

pub const INVALID_CREDENTIALS: &str = "invalid credentials";

pub const TWO_FACTOR_REJECTION: &str = "Users with two-factor authentication enabled cannot perform HTTP/HTTPS operations via plain username and password. Please create and use a personal access token on the user settings page";

/// Password that marks the username field as carrying a token.
const OAUTH_BASIC_PASSWORD: &str = "x-oauth-basic";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Credential {
    Password,
    AccessToken,
    ReverseProxy,
}

#[derive(Debug, Clone)]
pub struct Identity {
    pub account: Account,
    pub credential: Credential,
}

#[derive(Debug)]
pub enum Resolution {
    Resolved(Identity),
    Next,
    Reject(GitHttpError),
}

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    fn name(&self) -> &'static str;

    async fn resolve(&self, headers: &HeaderMap, store: &dyn AccessStore) -> Resolution;
}

pub fn resolver_chain(source: &IdentitySource) -> Vec<Box<dyn IdentityResolver>> {
    match source {
        IdentitySource::ReverseProxy { header } => vec![Box::new(ReverseProxyResolver {
            header: header.clone(),
        })],
        IdentitySource::Basic => vec![Box::new(PasswordResolver), Box::new(AccessTokenResolver)],
    }
}

/// Runs `chain` in order until a resolver decides.
pub async fn resolve_identity(
    chain: &[Box<dyn IdentityResolver>],
    headers: &HeaderMap,
    store: &dyn AccessStore,
) -> Result<Identity, GitHttpError> {
    for resolver in chain {
        match resolver.resolve(headers, store).await {
            Resolution::Resolved(identity) => {
                tracing::debug!(
                    resolver = resolver.name(),
                    user = %identity.account.name,
                    "identity resolved"
                );
                return Ok(identity);
            }
            Resolution::Next => continue,
            Resolution::Reject(err) => {
                tracing::debug!(resolver = resolver.name(), status = %err.status(), "identity rejected");
                return Err(err);
            }
        }
    }
    Err(invalid_credentials())
}

fn invalid_credentials() -> GitHttpError {
    GitHttpError::Unauthorized(INVALID_CREDENTIALS.to_string())
}

#[derive(Debug, PartialEq, Eq)]
struct BasicCredentials {
    username: String,
    password: String,
}

impl BasicCredentials {
    /// The username doubles as the token when no real password was sent.
    fn token_in_username(&self) -> bool {
        self.password.is_empty() || self.password == OAUTH_BASIC_PASSWORD
    }
}

/// `Ok(None)` when no `Authorization` header is present, `Err` when it is
/// not well-formed Basic credentials.
fn basic_credentials(headers: &HeaderMap) -> Result<Option<BasicCredentials>, GitHttpError> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value.to_str().map_err(|_| invalid_credentials())?;
    let (scheme, encoded) = value.trim().split_once(' ').ok_or_else(invalid_credentials)?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return Err(invalid_credentials());
    }
    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|_| invalid_credentials())?;
    let decoded = String::from_utf8(decoded).map_err(|_| invalid_credentials())?;
    let (username, password) = decoded.split_once(':').ok_or_else(invalid_credentials)?;
    Ok(Some(BasicCredentials {
        username: username.to_string(),
        password: password.to_string(),
    }))
}

/// Trusts a username set by a fronting proxy. There is no fallback.
pub struct ReverseProxyResolver {
    pub header: String,
}

#[async_trait]
impl IdentityResolver for ReverseProxyResolver {
    fn name(&self) -> &'static str {
        "reverse-proxy"
    }

    async fn resolve(&self, headers: &HeaderMap, store: &dyn AccessStore) -> Resolution {
        let username = headers
            .get(self.header.as_str())
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        let Some(username) = username else {
            return Resolution::Reject(GitHttpError::CredentialsRequired);
        };

        match store.find_account_by_name(username).await {
            Ok(Some(account)) => Resolution::Resolved(Identity {
                account,
                credential: Credential::ReverseProxy,
            }),
            Ok(None) => Resolution::Reject(invalid_credentials()),
            Err(err) => Resolution::Reject(GitHttpError::Internal(format!(
                "reverse proxy user lookup: {err:#}"
            ))),
        }
    }
}

/// Username/password sign-in. Accounts enrolled in two-factor
/// authentication are refused here and must use a token.
pub struct PasswordResolver;

#[async_trait]
impl IdentityResolver for PasswordResolver {
    fn name(&self) -> &'static str {
        "password"
    }

    async fn resolve(&self, headers: &HeaderMap, store: &dyn AccessStore) -> Resolution {
        let credentials = match basic_credentials(headers) {
            Ok(Some(credentials)) => credentials,
            Ok(None) => return Resolution::Reject(GitHttpError::CredentialsRequired),
            Err(err) => return Resolution::Reject(err),
        };
        if credentials.token_in_username() {
            return Resolution::Next;
        }

        let account = match store
            .verify_password(&credentials.username, &credentials.password)
            .await
        {
            Ok(Some(account)) => account,
            Ok(None) => return Resolution::Next,
            Err(err) => {
                return Resolution::Reject(GitHttpError::Internal(format!("sign in: {err:#}")));
            }
        };

        match store.two_factor_enrolled(account.id).await {
            Ok(true) => Resolution::Reject(GitHttpError::Unauthorized(
                TWO_FACTOR_REJECTION.to_string(),
            )),
            Ok(false) => Resolution::Resolved(Identity {
                account,
                credential: Credential::Password,
            }),
            Err(err) => Resolution::Reject(GitHttpError::Internal(format!(
                "two-factor lookup: {err:#}"
            ))),
        }
    }
}

/// Personal access token, sent as the password or, with an empty or
/// `x-oauth-basic` password, as the username.
pub struct AccessTokenResolver;

impl AccessTokenResolver {
    async fn lookup(
        &self,
        credentials: &BasicCredentials,
        store: &dyn AccessStore,
    ) -> anyhow::Result<Option<Account>> {
        let token = if credentials.token_in_username() {
            &credentials.username
        } else {
            &credentials.password
        };
        if token.is_empty() {
            return Ok(None);
        }

        let Some(access_token) = store.find_access_token(&token_digest(token)).await? else {
            return Ok(None);
        };
        let Some(account) = store.find_account_by_id(access_token.user_id).await? else {
            return Ok(None);
        };
        if !credentials.token_in_username()
            && !account.name.eq_ignore_ascii_case(&credentials.username)
        {
            tracing::debug!(token_id = access_token.id, "token owner does not match username");
            return Ok(None);
        }

        if let Err(err) = store.touch_access_token(access_token.id).await {
            tracing::warn!(token_id = access_token.id, error = %err, "failed to record token use");
        }
        Ok(Some(account))
    }
}

#[async_trait]
impl IdentityResolver for AccessTokenResolver {
    fn name(&self) -> &'static str {
        "access-token"
    }

    async fn resolve(&self, headers: &HeaderMap, store: &dyn AccessStore) -> Resolution {
        let credentials = match basic_credentials(headers) {
            Ok(Some(credentials)) => credentials,
            Ok(None) => return Resolution::Reject(GitHttpError::CredentialsRequired),
            Err(err) => return Resolution::Reject(err),
        };

        match self.lookup(&credentials, store).await {
            Ok(Some(account)) => Resolution::Resolved(Identity {
                account,
                credential: Credential::AccessToken,
            }),
            Ok(None) => Resolution::Reject(invalid_credentials()),
            Err(err) => {
                tracing::warn!(error = %err, "access token lookup failed");
                Resolution::Reject(invalid_credentials())
            }
        }
    }
}
