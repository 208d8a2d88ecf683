//! Dumb-protocol file serving and the two cache classes.

use std::io;
use std::path::{Component, Path};

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::Response;
use time::macros::format_description;
use time::{Duration, OffsetDateTime, UtcOffset};
use tokio_util::io::ReaderStream;

use crate::errors::GitHttpError;
use crate::routes::Endpoint;

pub const TEXT_PLAIN: &str = "text/plain";
pub const TEXT_PLAIN_UTF8: &str = "text/plain; charset=utf-8";
pub const LOOSE_OBJECT: &str = "application/x-git-loose-object";
pub const PACKED_OBJECTS: &str = "application/x-git-packed-objects";
pub const PACKED_OBJECTS_TOC: &str = "application/x-git-packed-objects-toc";

const NO_CACHE_EXPIRES: &str = "Fri, 01 Jan 1980 00:00:00 GMT";
const ONE_YEAR_SECS: i64 = 31_536_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Mutable files: refs, HEAD, alternates lists.
    NoCache,
    /// Content-addressed objects and packs.
    Forever,
}

impl CachePolicy {
    pub fn apply(self, headers: &mut HeaderMap, now: OffsetDateTime) {
        match self {
            CachePolicy::NoCache => {
                headers.insert(header::EXPIRES, HeaderValue::from_static(NO_CACHE_EXPIRES));
                headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
                headers.insert(
                    header::CACHE_CONTROL,
                    HeaderValue::from_static("no-cache, max-age=0, must-revalidate"),
                );
            }
            CachePolicy::Forever => {
                let expires = now + Duration::seconds(ONE_YEAR_SECS);
                insert_date(headers, header::DATE, now);
                insert_date(headers, header::EXPIRES, expires);
                headers.insert(
                    header::CACHE_CONTROL,
                    HeaderValue::from_static("public, max-age=31536000"),
                );
            }
        }
    }
}

/// Content type and cache class for a file endpoint, `None` for the
/// smart-protocol endpoints.
pub fn file_kind(endpoint: Endpoint) -> Option<(&'static str, CachePolicy)> {
    match endpoint {
        Endpoint::Head | Endpoint::Alternates | Endpoint::HttpAlternates | Endpoint::InfoFile => {
            Some((TEXT_PLAIN, CachePolicy::NoCache))
        }
        Endpoint::InfoPacks => Some((TEXT_PLAIN_UTF8, CachePolicy::NoCache)),
        Endpoint::LooseObject => Some((LOOSE_OBJECT, CachePolicy::Forever)),
        Endpoint::PackFile => Some((PACKED_OBJECTS, CachePolicy::Forever)),
        Endpoint::PackIndex => Some((PACKED_OBJECTS_TOC, CachePolicy::Forever)),
        Endpoint::UploadPack | Endpoint::ReceivePack | Endpoint::InfoRefs => None,
    }
}

/// IMF-fixdate as used by `Date`, `Expires` and `Last-Modified`.
pub fn http_date(at: OffsetDateTime) -> String {
    let format = format_description!(
        "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
    );
    at.to_offset(UtcOffset::UTC)
        .format(format)
        .unwrap_or_default()
}

fn insert_date(headers: &mut HeaderMap, name: header::HeaderName, at: OffsetDateTime) {
    if let Ok(value) = HeaderValue::from_str(&http_date(at)) {
        headers.insert(name, value);
    }
}

fn is_confined(relative: &str) -> bool {
    Path::new(relative)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Streams `relative_file` from `repository_dir`.
pub async fn send_file(
    repository_dir: &Path,
    relative_file: &str,
    content_type: &'static str,
    policy: CachePolicy,
) -> Result<Response, GitHttpError> {
    if !is_confined(relative_file) {
        return Err(GitHttpError::BadRequest("invalid path".to_string()));
    }

    let path = repository_dir.join(relative_file);
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "git file not found");
            return Err(GitHttpError::FileNotFound);
        }
        Err(err) => {
            return Err(GitHttpError::Internal(format!("open {}: {err}", path.display())));
        }
    };
    let metadata = file
        .metadata()
        .await
        .map_err(|err| GitHttpError::Internal(format!("stat {}: {err}", path.display())))?;
    if !metadata.is_file() {
        return Err(GitHttpError::FileNotFound);
    }

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, metadata.len())
        .body(Body::from_stream(ReaderStream::new(file)))?;

    let headers = response.headers_mut();
    policy.apply(headers, OffsetDateTime::now_utc());
    if let Ok(modified) = metadata.modified() {
        insert_date(headers, header::LAST_MODIFIED, OffsetDateTime::from(modified));
    }
    Ok(response)
}
