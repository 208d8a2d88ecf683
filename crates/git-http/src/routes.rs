//! Ordered git route table.
//!
//! Entries are tried in declaration order and the first structural match
//! wins, so specific files (HEAD, the alternates lists, `objects/info/packs`)
//! must stay ahead of the generic `objects/info/*` entry.

use std::sync::LazyLock;

use axum::http::Method;
use regex::Regex;

/// Terminal handler selected by a route.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endpoint {
    UploadPack,
    ReceivePack,
    InfoRefs,
    Head,
    Alternates,
    HttpAlternates,
    InfoPacks,
    InfoFile,
    LooseObject,
    PackFile,
    PackIndex,
}

impl Endpoint {
    pub const fn name(self) -> &'static str {
        match self {
            Endpoint::UploadPack => "upload-pack",
            Endpoint::ReceivePack => "receive-pack",
            Endpoint::InfoRefs => "info-refs",
            Endpoint::Head => "head",
            Endpoint::Alternates => "alternates",
            Endpoint::HttpAlternates => "http-alternates",
            Endpoint::InfoPacks => "info-packs",
            Endpoint::InfoFile => "info-file",
            Endpoint::LooseObject => "loose-object",
            Endpoint::PackFile => "pack-file",
            Endpoint::PackIndex => "pack-index",
        }
    }

    /// Canonical on-disk spelling of the matched file. Git names these
    /// files in lowercase, except `HEAD`.
    fn canonical_file(self, file: &str) -> String {
        match self {
            Endpoint::Head => "HEAD".to_string(),
            Endpoint::InfoFile => file.to_string(),
            _ => file.to_ascii_lowercase(),
        }
    }
}

pub struct RouteEntry {
    pub pattern: Regex,
    pub method: Method,
    pub endpoint: Endpoint,
}

fn entry(pattern: &str, method: Method, endpoint: Endpoint) -> RouteEntry {
    let pattern = Regex::new(&format!("(?i)^(.*?)/{pattern}$")).expect("valid route pattern");
    RouteEntry {
        pattern,
        method,
        endpoint,
    }
}

pub static ROUTES: LazyLock<Vec<RouteEntry>> = LazyLock::new(|| {
    vec![
        entry("git-upload-pack", Method::POST, Endpoint::UploadPack),
        entry("git-receive-pack", Method::POST, Endpoint::ReceivePack),
        entry("info/refs", Method::GET, Endpoint::InfoRefs),
        entry("HEAD", Method::GET, Endpoint::Head),
        entry("objects/info/alternates", Method::GET, Endpoint::Alternates),
        entry("objects/info/http-alternates", Method::GET, Endpoint::HttpAlternates),
        entry("objects/info/packs", Method::GET, Endpoint::InfoPacks),
        entry("objects/info/[^/]*", Method::GET, Endpoint::InfoFile),
        entry("objects/[0-9a-f]{2}/[0-9a-f]{38}", Method::GET, Endpoint::LooseObject),
        entry(r"objects/pack/pack-[0-9a-f]{40}\.pack", Method::GET, Endpoint::PackFile),
        entry(r"objects/pack/pack-[0-9a-f]{40}\.idx", Method::GET, Endpoint::PackIndex),
    ]
});

/// Result of matching a request path against [`ROUTES`].
#[derive(Debug)]
pub struct RouteMatch<'a> {
    pub endpoint: Endpoint,
    pub method: &'static Method,
    /// Path in front of the matched suffix, the repository locator.
    pub prefix: &'a str,
    /// File inside the repository directory.
    pub relative_file: String,
}

pub fn match_path(path: &str) -> Option<RouteMatch<'_>> {
    ROUTES.iter().find_map(|route| {
        let captures = route.pattern.captures(path)?;
        let prefix = captures.get(1).map_or("", |m| m.as_str());
        let file = path[prefix.len()..].trim_start_matches('/');
        Some(RouteMatch {
            endpoint: route.endpoint,
            method: &route.method,
            prefix,
            relative_file: route.endpoint.canonical_file(file),
        })
    })
}
