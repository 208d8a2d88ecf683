//! Stateless-RPC proxying for `git-upload-pack` and `git-receive-pack`.

use std::io::{self, Read};
use std::path::Path;
use std::time::{Duration, Instant};

use axum::body::{Body, BodyDataStream};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::Response;
use bytes::Bytes;
use flate2::read::GzDecoder;
use futures::{StreamExt, future, stream};
use metrics::{counter, histogram};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::io::{ReaderStream, StreamReader, SyncIoBridge};

use crate::auth::has_pusher;
use crate::context::RequestContext;
use crate::errors::GitHttpError;
use crate::process::{GitBackend, Invocation, ProcessReader, ProcessWriter, ServiceProcess};
use crate::service::{Service, ServiceConfig, git_protocol};
use crate::state::GitHttpState;

/// Whether `service` may run for this repository: the gateway toggle, or
/// failing that the repository's own `http.*` config.
pub async fn service_enabled<S: GitHttpState>(
    state: &S,
    config: &ServiceConfig,
    dir: &Path,
    service: Service,
) -> bool {
    if config.allows(service) {
        return true;
    }
    let lookup = state.backend().config_value(dir, service.config_key());
    let value = match tokio::time::timeout(timeout_of(state), lookup).await {
        Ok(Ok(value)) => value,
        Ok(Err(err)) => {
            tracing::warn!(key = service.config_key(), error = %err, "git config lookup failed");
            None
        }
        Err(_) => {
            tracing::warn!(key = service.config_key(), "git config lookup timed out");
            None
        }
    };
    service.enabled_by_repo_config(value.as_deref())
}

pub(crate) fn timeout_of<S: GitHttpState>(state: &S) -> Duration {
    Duration::from_millis(state.settings().git_timeout_ms)
}

/// Environment handed to the subprocess. Only receive-pack sees the
/// identity entries; both services get a safe `Git-Protocol` value.
pub(crate) fn process_environment(
    service: Service,
    environment: &[String],
    headers: &HeaderMap,
) -> Vec<String> {
    let mut env = match service {
        Service::ReceivePack => environment.to_vec(),
        Service::UploadPack => Vec::new(),
    };
    if let Some(protocol) = git_protocol(headers) {
        env.push(format!("GIT_PROTOCOL={protocol}"));
    }
    env
}

fn is_gzip(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("gzip") || v.eq_ignore_ascii_case("x-gzip"))
}

/// Largest chunk the gzip decoder hands out at once.
const DECODE_CHUNK: usize = 32 * 1024;
/// Decoded chunks buffered ahead of the git stdin pump.
const DECODE_QUEUE: usize = 4;

enum BodySource {
    Plain(BodyDataStream),
    Gzip(mpsc::Receiver<io::Result<Bytes>>),
}

/// Request body as a chunk source, gunzipped on the fly when needed.
struct RequestBody {
    source: BodySource,
}

/// Pulls the body through a blocking gzip reader in fixed-size reads, so a
/// highly compressed body never expands further than the queue holds.
fn spawn_gunzip(stream: BodyDataStream) -> mpsc::Receiver<io::Result<Bytes>> {
    let (tx, rx) = mpsc::channel(DECODE_QUEUE);
    let reader = SyncIoBridge::new(StreamReader::new(stream.map(|r| r.map_err(io::Error::other))));
    tokio::task::spawn_blocking(move || {
        let mut decoder = GzDecoder::new(reader);
        let mut buf = vec![0u8; DECODE_CHUNK];
        loop {
            let item = match decoder.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => Ok(Bytes::copy_from_slice(&buf[..n])),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => Err(err),
            };
            let failed = item.is_err();
            // a closed receiver means the request was abandoned
            if tx.blocking_send(item).is_err() || failed {
                break;
            }
        }
    });
    rx
}

impl RequestBody {
    fn new(body: Body, gzip: bool) -> Self {
        let stream = body.into_data_stream();
        let source = if gzip {
            BodySource::Gzip(spawn_gunzip(stream))
        } else {
            BodySource::Plain(stream)
        };
        Self { source }
    }

    async fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        match &mut self.source {
            BodySource::Plain(stream) => stream.next().await.transpose().map_err(io::Error::other),
            BodySource::Gzip(decoded) => decoded.recv().await.transpose(),
        }
    }

    /// Copies the remaining body into `stdin`, starting with `first`, then
    /// closes it so the subprocess sees end of input.
    async fn pump_into(mut self, first: Option<Bytes>, mut stdin: ProcessWriter) -> io::Result<u64> {
        let mut written = 0u64;
        let mut next = first;
        while let Some(chunk) = next {
            stdin.write_all(&chunk).await?;
            written += chunk.len() as u64;
            next = self.next_chunk().await?;
        }
        stdin.shutdown().await?;
        Ok(written)
    }
}

async fn drain_stderr(mut stderr: ProcessReader) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Err(err) = stderr.read_to_end(&mut buf).await {
        tracing::debug!(error = %err, "reading git stderr failed");
    }
    buf
}

/// Runs the stateless-RPC exchange, streaming the request body into git
/// and git's stdout back out as the response body.
pub async fn service_rpc<S: GitHttpState>(
    state: &S,
    ctx: RequestContext,
    service: Service,
) -> Result<Response, GitHttpError> {
    let RequestContext {
        config,
        parts,
        body,
        repository_dir,
        environment,
        ..
    } = ctx;

    // A wrong content type is answered 401, which is what git clients have
    // always seen from this endpoint.
    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    if content_type != Some(service.request_content_type()) {
        tracing::debug!(service = service.name(), ?content_type, "unexpected rpc content type");
        return Err(GitHttpError::PreconditionFailed);
    }
    if !service_enabled(state, &config, &repository_dir, service).await {
        tracing::debug!(service = service.name(), "rpc service disabled");
        return Err(GitHttpError::PreconditionFailed);
    }

    let mut environment = environment;
    environment.push(format!("SSH_ORIGINAL_COMMAND={}", service.name()));
    if service == Service::ReceivePack && !has_pusher(&environment) {
        tracing::warn!(dir = %repository_dir.display(), "receive-pack without a pusher identity");
        return Err(GitHttpError::CredentialsRequired);
    }
    let env = process_environment(service, &environment, &parts.headers);

    let mut request_body = RequestBody::new(body, is_gzip(&parts.headers));
    let first = request_body
        .next_chunk()
        .await
        .map_err(|err| GitHttpError::Internal(format!("read {} request: {err}", service.name())))?;

    let permit = state
        .git_semaphore()
        .clone()
        .acquire_owned()
        .await
        .map_err(|err| GitHttpError::Internal(format!("git semaphore: {err}")))?;

    let invocation = Invocation {
        service,
        dir: &repository_dir,
        env: &env,
    };
    let ServiceProcess {
        stdin,
        stdout,
        stderr,
        exit,
    } = state.backend().spawn_rpc(&invocation).map_err(|err| {
        GitHttpError::Internal(format!("spawn git {}: {err}", service.name()))
    })?;

    let dir = repository_dir.display().to_string();
    let started = Instant::now();
    counter!("git_http.rpc", "service" => service.name()).increment(1);

    let pump_dir = dir.clone();
    tokio::spawn(async move {
        match request_body.pump_into(first, stdin).await {
            Ok(bytes) => tracing::debug!(service = service.name(), dir = %pump_dir, bytes, "request body forwarded"),
            Err(err) => tracing::warn!(service = service.name(), dir = %pump_dir, error = %err, "forwarding request body failed"),
        }
    });
    let stderr = tokio::spawn(drain_stderr(stderr));

    // Runs once stdout is exhausted. Dropping the response body before that
    // drops `exit`, which kills the subprocess.
    let finish = stream::once(async move {
        let _permit = permit;
        let outcome = exit.await;
        let stderr = stderr.await.unwrap_or_default();
        let stderr = String::from_utf8_lossy(&stderr);
        match outcome {
            Ok(outcome) if outcome.success() => {
                tracing::debug!(service = service.name(), dir = %dir, "git rpc finished");
            }
            Ok(outcome) => {
                tracing::error!(
                    service = service.name(),
                    dir = %dir,
                    code = ?outcome.code,
                    stderr = %stderr.trim(),
                    "git rpc exited with failure"
                );
            }
            Err(err) => {
                tracing::error!(service = service.name(), dir = %dir, error = %err, "waiting for git rpc failed");
            }
        }
        histogram!("git_http.rpc_ms", "service" => service.name())
            .record(started.elapsed().as_millis() as f64);
        None::<io::Result<Bytes>>
    })
    .filter_map(future::ready);

    let body = Body::from_stream(ReaderStream::new(stdout).chain(finish));
    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, service.result_content_type())
        .body(body)?;
    Ok(response)
}
