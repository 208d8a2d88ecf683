use std::sync::LazyLock;

use axum::http::HeaderMap;
use regex::Regex;

/// The two stateless-RPC services git speaks over HTTP.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Service {
    UploadPack,
    ReceivePack,
}

impl Service {
    /// Subcommand name, e.g. `upload-pack`.
    pub const fn name(self) -> &'static str {
        match self {
            Service::UploadPack => "upload-pack",
            Service::ReceivePack => "receive-pack",
        }
    }

    /// Parses the `service` query value (`git-upload-pack`).
    pub fn from_query(value: &str) -> Option<Self> {
        match value.strip_prefix("git-")? {
            "upload-pack" => Some(Service::UploadPack),
            "receive-pack" => Some(Service::ReceivePack),
            _ => None,
        }
    }

    pub const fn request_content_type(self) -> &'static str {
        match self {
            Service::UploadPack => "application/x-git-upload-pack-request",
            Service::ReceivePack => "application/x-git-receive-pack-request",
        }
    }

    pub const fn result_content_type(self) -> &'static str {
        match self {
            Service::UploadPack => "application/x-git-upload-pack-result",
            Service::ReceivePack => "application/x-git-receive-pack-result",
        }
    }

    pub const fn advertisement_content_type(self) -> &'static str {
        match self {
            Service::UploadPack => "application/x-git-upload-pack-advertisement",
            Service::ReceivePack => "application/x-git-receive-pack-advertisement",
        }
    }

    /// Per-repository git config key that can enable the service.
    pub const fn config_key(self) -> &'static str {
        match self {
            Service::UploadPack => "http.uploadpack",
            Service::ReceivePack => "http.receivepack",
        }
    }

    /// Decides availability from the repository config value when the
    /// gateway toggle is off: upload-pack unless explicitly `false`,
    /// receive-pack only when explicitly `true`.
    pub fn enabled_by_repo_config(self, value: Option<&str>) -> bool {
        match self {
            Service::UploadPack => value != Some("false"),
            Service::ReceivePack => value == Some("true"),
        }
    }
}

/// Service toggles plus the hook environment, assembled per request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceConfig {
    pub allow_upload_pack: bool,
    pub allow_receive_pack: bool,
    /// `KEY=value` entries describing the resolved identity.
    pub environment: Vec<String>,
}

impl ServiceConfig {
    pub fn allows(&self, service: Service) -> bool {
        match service {
            Service::UploadPack => self.allow_upload_pack,
            Service::ReceivePack => self.allow_receive_pack,
        }
    }
}

// one or more key=value pairs separated by colons
static SAFE_GIT_PROTOCOL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-zA-Z]+=[0-9a-zA-Z]+(:[0-9a-zA-Z]+=[0-9a-zA-Z]+)*$")
        .expect("valid Git-Protocol pattern")
});

/// Returns the `Git-Protocol` header when it is safe to hand to git.
pub fn git_protocol(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Git-Protocol")
        .and_then(|v| v.to_str().ok())
        .filter(|v| SAFE_GIT_PROTOCOL.is_match(v))
}
