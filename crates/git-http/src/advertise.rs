use std::path::Path;
use std::time::Instant;

use axum::body::Body;
use axum::http::{StatusCode, header};
use axum::response::Response;
use metrics::{counter, histogram};
use time::OffsetDateTime;

use crate::auth::has_pusher;
use crate::context::RequestContext;
use crate::errors::GitHttpError;
use crate::files::{CachePolicy, TEXT_PLAIN_UTF8, send_file};
use crate::pkt::service_announcement;
use crate::process::{GitBackend, Invocation};
use crate::rpc::{process_environment, service_enabled, timeout_of};
use crate::service::Service;
use crate::state::GitHttpState;

// GET .../info/refs[?service=git-<name>]
pub async fn info_refs<S: GitHttpState>(
    state: &S,
    ctx: RequestContext,
    service: Option<Service>,
) -> Result<Response, GitHttpError> {
    let start = Instant::now();
    let accessible = match service {
        Some(service) => service_enabled(state, &ctx.config, &ctx.repository_dir, service)
            .await
            .then_some(service),
        None => None,
    };
    let Some(service) = accessible else {
        return dumb_info_refs(state, &ctx.repository_dir, &ctx.relative_file).await;
    };

    if service == Service::ReceivePack && !has_pusher(&ctx.environment) {
        return Err(GitHttpError::CredentialsRequired);
    }
    let env = process_environment(service, &ctx.environment, &ctx.parts.headers);
    let invocation = Invocation {
        service,
        dir: &ctx.repository_dir,
        env: &env,
    };

    let _permit = state
        .git_semaphore()
        .clone()
        .acquire_owned()
        .await
        .map_err(|err| GitHttpError::Internal(format!("git semaphore: {err}")))?;
    let output = match tokio::time::timeout(
        timeout_of(state),
        state.backend().advertise_refs(&invocation),
    )
    .await
    {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => {
            return Err(GitHttpError::Internal(format!(
                "spawn git {} --advertise-refs: {err}",
                service.name()
            )));
        }
        Err(_) => {
            return Err(GitHttpError::Internal(format!(
                "git {} --advertise-refs timed out",
                service.name()
            )));
        }
    };
    if !output.exit.success() {
        tracing::error!(
            service = service.name(),
            dir = %ctx.repository_dir.display(),
            code = ?output.exit.code,
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "git advertise-refs failed"
        );
    }

    let mut body = service_announcement(service);
    body.extend_from_slice(&output.stdout);

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, service.advertisement_content_type())
        .body(Body::from(body))?;
    CachePolicy::NoCache.apply(response.headers_mut(), OffsetDateTime::now_utc());

    counter!("git_http.info_refs", "service" => service.name()).increment(1);
    histogram!("git_http.info_refs_ms").record(start.elapsed().as_millis() as f64);
    Ok(response)
}

/// Dumb-protocol discovery: refresh `info/refs` and serve it as a file.
async fn dumb_info_refs<S: GitHttpState>(
    state: &S,
    repository_dir: &Path,
    relative_file: &str,
) -> Result<Response, GitHttpError> {
    let refresh = state.backend().update_server_info(repository_dir);
    match tokio::time::timeout(timeout_of(state), refresh).await {
        Ok(Ok(output)) if output.exit.success() => {}
        Ok(Ok(output)) => tracing::error!(
            dir = %repository_dir.display(),
            code = ?output.exit.code,
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "git update-server-info failed"
        ),
        Ok(Err(err)) => tracing::error!(dir = %repository_dir.display(), error = %err, "spawn git update-server-info"),
        Err(_) => tracing::error!(dir = %repository_dir.display(), "git update-server-info timed out"),
    }

    counter!("git_http.info_refs", "service" => "dumb").increment(1);
    send_file(repository_dir, relative_file, TEXT_PLAIN_UTF8, CachePolicy::NoCache).await
}
