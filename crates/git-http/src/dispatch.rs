//! Path dispatcher: route match, method check, repository resolution and
//! the access gate, then exactly one terminal handler.

use axum::Router;
use axum::extract::{Query, Request, State};
use axum::http::Version;
use axum::response::{IntoResponse, Response};
use metrics::counter;
use serde::Deserialize;

use crate::advertise;
use crate::auth::{AccessRequest, authorize, requested_mode};
use crate::context::RequestContext;
use crate::errors::GitHttpError;
use crate::files::{file_kind, send_file};
use crate::repo::{RepoLocator, resolve_repo_dir};
use crate::routes::{Endpoint, match_path};
use crate::rpc;
use crate::service::{Service, ServiceConfig};
use crate::state::GitHttpState;

#[derive(Debug, Default, Deserialize)]
pub struct ServiceQuery {
    pub service: Option<String>,
}

/// Router whose fallback serves every git route.
pub fn router<S: GitHttpState>(state: S) -> Router {
    Router::new().fallback(dispatch::<S>).with_state(state)
}

async fn dispatch<S: GitHttpState>(State(state): State<S>, request: Request) -> Response {
    match handle(&state, request).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

pub async fn handle<S: GitHttpState>(state: &S, request: Request) -> Result<Response, GitHttpError> {
    let (parts, body) = request.into_parts();
    let path = parts.uri.path().to_string();
    let route = match_path(&path).ok_or(GitHttpError::RouteNotFound)?;
    counter!("git_http.requests", "endpoint" => route.endpoint.name()).increment(1);

    let settings = state.settings();
    if settings.disable_http_git {
        return Err(GitHttpError::HttpGitDisabled);
    }
    if parts.method != *route.method {
        tracing::debug!(method = %parts.method, path = %path, "git route method mismatch");
        return Err(GitHttpError::MethodMismatch {
            http11: parts.version == Version::HTTP_11,
        });
    }

    let locator = RepoLocator::parse(route.prefix)?;
    let repository_dir = resolve_repo_dir(&settings.repo_root, &locator.storage_name())?;

    let query = Query::<ServiceQuery>::try_from_uri(&parts.uri)
        .map(|Query(q)| q)
        .unwrap_or_default();
    let mode = requested_mode(&parts.method, &path, query.service.as_deref());
    let authorized = authorize(
        state.store(),
        settings,
        AccessRequest {
            locator: &locator,
            mode,
            headers: &parts.headers,
        },
    )
    .await?;
    tracing::debug!(
        endpoint = route.endpoint.name(),
        repo = %locator.storage_name(),
        repo_id = authorized.repository.id,
        user = authorized.identity.account.as_ref().map(|a| a.name.as_str()),
        credential = ?authorized.identity.credential,
        authenticated = authorized.identity.is_authenticated(),
        mode = authorized.identity.access_mode.as_str(),
        "git request authorized"
    );

    let endpoint = route.endpoint;
    let ctx = RequestContext {
        config: ServiceConfig {
            allow_upload_pack: settings.allow_upload_pack,
            allow_receive_pack: settings.allow_receive_pack,
            environment: authorized.environment.clone(),
        },
        parts,
        body,
        repository_dir,
        relative_file: route.relative_file,
        environment: authorized.environment,
    };

    match endpoint {
        Endpoint::UploadPack => rpc::service_rpc(state, ctx, Service::UploadPack).await,
        Endpoint::ReceivePack => rpc::service_rpc(state, ctx, Service::ReceivePack).await,
        Endpoint::InfoRefs => {
            let service = query.service.as_deref().and_then(Service::from_query);
            advertise::info_refs(state, ctx, service).await
        }
        file => {
            let (content_type, policy) =
                file_kind(file).ok_or(GitHttpError::RouteNotFound)?;
            send_file(&ctx.repository_dir, &ctx.relative_file, content_type, policy).await
        }
    }
}
