use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Process-wide gateway configuration, built once at startup and handed to
/// the dispatcher through [`crate::GitHttpState`].
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct GatewaySettings {
    /// Directory holding `<owner>/<name>.git` bare repositories.
    pub repo_root: PathBuf,

    /// Where request identities come from.
    pub identity: IdentitySource,

    /// Ask for credentials even for anonymous reads of public repositories.
    pub require_sign_in_view: bool,

    /// Service toggles. When a toggle is off the repository's own
    /// `http.uploadpack` / `http.receivepack` config decides.
    pub allow_upload_pack: bool,
    pub allow_receive_pack: bool,

    /// Answer every git route with 403.
    pub disable_http_git: bool,

    pub git_executable: PathBuf,

    /// Upper bound for buffered git invocations (ref advertisement,
    /// `update-server-info`, config lookups).
    pub git_timeout_ms: u64,

    /// Maximum number of git subprocesses running at once.
    pub max_concurrent_git: usize,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            repo_root: PathBuf::from("data/repositories"),
            identity: IdentitySource::default(),
            require_sign_in_view: false,
            allow_upload_pack: true,
            allow_receive_pack: true,
            disable_http_git: false,
            git_executable: PathBuf::from("git"),
            git_timeout_ms: 30_000,
            max_concurrent_git: 64,
        }
    }
}

/// Identity source for requests that must be authenticated.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
pub enum IdentitySource {
    /// HTTP Basic credentials: password sign-in, then personal access token.
    #[default]
    Basic,

    /// Trust a username injected by a fronting reverse proxy.
    ReverseProxy { header: String },
}
