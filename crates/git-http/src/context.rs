use std::path::PathBuf;

use axum::body::Body;
use axum::http::request::Parts;

use crate::service::ServiceConfig;

/// Everything a terminal handler needs for one request. Owned by the
/// handling task and dropped with it.
pub struct RequestContext {
    pub config: ServiceConfig,
    pub parts: Parts,
    pub body: Body,
    pub repository_dir: PathBuf,
    /// Path of the requested file relative to `repository_dir`.
    pub relative_file: String,
    pub environment: Vec<String>,
}
