#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Request, StatusCode};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use git_http::auth::{
    AccessMode, AccessStore, AccessToken, Account, RepositoryRecord, Unit, token_digest,
};
use git_http::process::{CommandOutput, ExitOutcome, Invocation, ServiceProcess};
use git_http::service::Service;
use git_http::{GatewaySettings, GatewayState, GitBackend};
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tower::ServiceExt;

pub const ADVERTISEMENT: &[u8] = b"003f0123456789abcdef0123456789abcdef01234567 refs/heads/main\n0000";
pub const RPC_RESULT: &[u8] = b"0008NAK\n0000";
pub const DUMB_REFS: &str = "0123456789abcdef0123456789abcdef01234567\trefs/heads/main\n";

#[derive(Default)]
struct StoreInner {
    accounts: Vec<(Account, String)>,
    two_factor: HashSet<i64>,
    tokens: HashMap<String, AccessToken>,
    touched: Vec<i64>,
    repositories: Vec<RepositoryRecord>,
    grants: HashMap<(i64, i64), AccessMode>,
}

/// In-memory accounts, tokens and grants.
#[derive(Clone, Default)]
pub struct FakeStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl FakeStore {
    pub fn add_account(&self, id: i64, name: &str, password: &str) -> Account {
        let account = Account {
            id,
            name: name.to_string(),
            email: format!("{name}@example.com"),
            is_active: true,
            prohibit_login: false,
            is_admin: false,
            keep_email_private: false,
        };
        self.inner
            .lock()
            .unwrap()
            .accounts
            .push((account.clone(), password.to_string()));
        account
    }

    pub fn update_account(&self, name: &str, f: impl FnOnce(&mut Account)) {
        let mut inner = self.inner.lock().unwrap();
        if let Some((account, _)) = inner.accounts.iter_mut().find(|(a, _)| a.name == name) {
            f(account);
        }
    }

    pub fn enroll_two_factor(&self, user_id: i64) {
        self.inner.lock().unwrap().two_factor.insert(user_id);
    }

    pub fn add_token(&self, id: i64, user_id: i64, token: &str) {
        self.inner
            .lock()
            .unwrap()
            .tokens
            .insert(token_digest(token), AccessToken { id, user_id });
    }

    pub fn touched_tokens(&self) -> Vec<i64> {
        self.inner.lock().unwrap().touched.clone()
    }

    pub fn add_repository(&self, record: RepositoryRecord) {
        self.inner.lock().unwrap().repositories.push(record);
    }

    pub fn grant(&self, repo_id: i64, user_id: i64, mode: AccessMode) {
        self.inner
            .lock()
            .unwrap()
            .grants
            .insert((repo_id, user_id), mode);
    }

    fn permission(&self, account: Option<&Account>, repo: &RepositoryRecord) -> AccessMode {
        let inner = self.inner.lock().unwrap();
        let granted = match account {
            Some(a) if a.is_admin || a.name == repo.owner_name => AccessMode::Admin,
            Some(a) => inner
                .grants
                .get(&(repo.id, a.id))
                .copied()
                .unwrap_or(AccessMode::None),
            None => AccessMode::None,
        };
        if repo.is_private {
            granted
        } else {
            granted.max(AccessMode::Read)
        }
    }
}

#[async_trait]
impl AccessStore for FakeStore {
    async fn find_repository(&self, owner: &str, name: &str) -> Result<Option<RepositoryRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .repositories
            .iter()
            .find(|r| r.owner_name == owner && r.name == name)
            .cloned())
    }

    async fn find_account_by_id(&self, id: i64) -> Result<Option<Account>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.accounts.iter().find(|(a, _)| a.id == id).map(|(a, _)| a.clone()))
    }

    async fn find_account_by_name(&self, name: &str) -> Result<Option<Account>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .accounts
            .iter()
            .find(|(a, _)| a.name.eq_ignore_ascii_case(name))
            .map(|(a, _)| a.clone()))
    }

    async fn verify_password(&self, name: &str, password: &str) -> Result<Option<Account>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .accounts
            .iter()
            .find(|(a, p)| a.name == name && p == password)
            .map(|(a, _)| a.clone()))
    }

    async fn two_factor_enrolled(&self, user_id: i64) -> Result<bool> {
        Ok(self.inner.lock().unwrap().two_factor.contains(&user_id))
    }

    async fn find_access_token(&self, digest: &str) -> Result<Option<AccessToken>> {
        Ok(self.inner.lock().unwrap().tokens.get(digest).cloned())
    }

    async fn touch_access_token(&self, token_id: i64) -> Result<()> {
        self.inner.lock().unwrap().touched.push(token_id);
        Ok(())
    }

    async fn has_access(
        &self,
        account: Option<&Account>,
        repo: &RepositoryRecord,
        unit: Unit,
        mode: AccessMode,
    ) -> Result<bool> {
        if unit == Unit::Wiki && !repo.has_wiki {
            return Ok(false);
        }
        Ok(self.permission(account, repo) >= mode)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Rpc,
    Advertise,
    UpdateServerInfo,
    Config,
}

#[derive(Debug, Clone)]
pub struct Call {
    pub kind: CallKind,
    pub service: Option<Service>,
    pub dir: PathBuf,
    pub env: Vec<String>,
}

#[derive(Default)]
struct BackendInner {
    calls: Vec<Call>,
    stdin: Vec<u8>,
    config: HashMap<String, String>,
    advertise_exit: Option<i32>,
}

/// Counts an RPC process as running until its exit future is dropped.
struct RunningGuard(Arc<AtomicUsize>);

impl RunningGuard {
    fn start(running: &Arc<AtomicUsize>) -> Self {
        running.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(running))
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Scripted stand-in for the `git` executable.
#[derive(Clone, Default)]
pub struct FakeBackend {
    inner: Arc<Mutex<BackendInner>>,
    running: Arc<AtomicUsize>,
}

impl FakeBackend {
    /// RPC processes whose exit future is still alive. `GitCli` kills the
    /// child when that future is dropped.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn calls_of(&self, kind: CallKind) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.kind == kind).collect()
    }

    pub fn stdin(&self) -> Vec<u8> {
        self.inner.lock().unwrap().stdin.clone()
    }

    pub fn set_config(&self, key: &str, value: &str) {
        self.inner
            .lock()
            .unwrap()
            .config
            .insert(key.to_string(), value.to_string());
    }

    pub fn fail_advertisement(&self, code: i32) {
        self.inner.lock().unwrap().advertise_exit = Some(code);
    }

    fn record(&self, kind: CallKind, service: Option<Service>, dir: &Path, env: &[String]) {
        self.inner.lock().unwrap().calls.push(Call {
            kind,
            service,
            dir: dir.to_path_buf(),
            env: env.to_vec(),
        });
    }
}

#[async_trait]
impl GitBackend for FakeBackend {
    fn spawn_rpc(&self, invocation: &Invocation<'_>) -> io::Result<ServiceProcess> {
        self.record(CallKind::Rpc, Some(invocation.service), invocation.dir, invocation.env);

        let (stdin, mut reader) = tokio::io::duplex(64 * 1024);
        let running = RunningGuard::start(&self.running);
        let inner = Arc::clone(&self.inner);
        let consumed = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = reader.read_to_end(&mut buf).await;
            inner.lock().unwrap().stdin = buf;
        });

        Ok(ServiceProcess {
            stdin: Box::pin(stdin),
            stdout: Box::pin(io::Cursor::new(RPC_RESULT.to_vec())),
            stderr: Box::pin(io::Cursor::new(Vec::new())),
            exit: Box::pin(async move {
                let _running = running;
                consumed.await.map_err(io::Error::other)?;
                Ok(ExitOutcome { code: Some(0) })
            }),
        })
    }

    async fn advertise_refs(&self, invocation: &Invocation<'_>) -> io::Result<CommandOutput> {
        self.record(CallKind::Advertise, Some(invocation.service), invocation.dir, invocation.env);
        let code = self.inner.lock().unwrap().advertise_exit.unwrap_or(0);
        Ok(CommandOutput {
            stdout: ADVERTISEMENT.to_vec(),
            stderr: Vec::new(),
            exit: ExitOutcome { code: Some(code) },
        })
    }

    async fn update_server_info(&self, dir: &Path) -> io::Result<CommandOutput> {
        self.record(CallKind::UpdateServerInfo, None, dir, &[]);
        tokio::fs::create_dir_all(dir.join("info")).await?;
        tokio::fs::write(dir.join("info/refs"), DUMB_REFS).await?;
        Ok(CommandOutput {
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit: ExitOutcome { code: Some(0) },
        })
    }

    async fn config_value(&self, dir: &Path, key: &str) -> io::Result<Option<String>> {
        self.record(CallKind::Config, None, dir, &[]);
        Ok(self.inner.lock().unwrap().config.get(key).cloned())
    }
}

pub struct TestGateway {
    pub router: Router,
    pub store: FakeStore,
    pub backend: FakeBackend,
    pub root: TempDir,
}

impl TestGateway {
    pub fn repo_dir(&self, locator: &str) -> PathBuf {
        self.root.path().join(format!("{locator}.git"))
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, body)
    }
}

pub const ALICE: i64 = 1;
pub const BOB: i64 = 2;
pub const CAROL: i64 = 3;
pub const DAVE: i64 = 4;

pub const DEMO: i64 = 10;
pub const PUBLIC: i64 = 11;
pub const MIRROR: i64 = 12;
pub const ARCHIVE: i64 = 13;

pub const DAVE_TOKEN: &str = "d4e5f6a7b8c9d0e1f2a3b4c5d6e7f8a9b0c1d2e3";
pub const BOB_TOKEN: &str = "0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b";

fn repository(id: i64, name: &str, is_private: bool) -> RepositoryRecord {
    RepositoryRecord {
        id,
        owner_name: "alice".to_string(),
        name: name.to_string(),
        is_private,
        is_mirror: false,
        is_archived: false,
        has_wiki: true,
    }
}

/// Fixture world:
/// - `alice/demo` private; bob reads, carol writes
/// - `alice/public` public, with a wiki
/// - `alice/mirror` public mirror, carol writes
/// - `alice/archive` public and archived, carol writes
/// - dave is enrolled in two-factor authentication and owns a token
pub fn gateway(configure: impl FnOnce(&mut GatewaySettings)) -> TestGateway {
    let root = tempfile::tempdir().unwrap();
    for dir in ["demo", "public", "public.wiki", "mirror", "archive"] {
        let path = root.path().join(format!("alice/{dir}.git"));
        std::fs::create_dir_all(path.join("objects/pack")).unwrap();
        std::fs::create_dir_all(path.join("objects/info")).unwrap();
        std::fs::write(path.join("HEAD"), "ref: refs/heads/main\n").unwrap();
    }

    let store = FakeStore::default();
    store.add_account(ALICE, "alice", "alice-password");
    store.add_account(BOB, "bob", "bob-password");
    store.add_account(CAROL, "carol", "carol-password");
    store.add_account(DAVE, "dave", "dave-password");
    store.enroll_two_factor(DAVE);
    store.add_token(100, DAVE, DAVE_TOKEN);
    store.add_token(101, BOB, BOB_TOKEN);

    store.add_repository(repository(DEMO, "demo", true));
    store.add_repository(repository(PUBLIC, "public", false));
    store.add_repository(RepositoryRecord {
        is_mirror: true,
        ..repository(MIRROR, "mirror", false)
    });
    store.add_repository(RepositoryRecord {
        is_archived: true,
        ..repository(ARCHIVE, "archive", false)
    });
    store.grant(DEMO, BOB, AccessMode::Read);
    store.grant(DEMO, CAROL, AccessMode::Write);
    store.grant(DEMO, DAVE, AccessMode::Read);
    store.grant(MIRROR, CAROL, AccessMode::Write);
    store.grant(ARCHIVE, CAROL, AccessMode::Write);

    let mut settings = GatewaySettings {
        repo_root: root.path().to_path_buf(),
        ..GatewaySettings::default()
    };
    configure(&mut settings);

    let backend = FakeBackend::default();
    let state = GatewayState::new(store.clone(), backend.clone(), settings);
    TestGateway {
        router: git_http::router(state),
        store,
        backend,
        root,
    }
}

pub fn basic(username: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
}

pub fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

pub fn get_as(uri: &str, authorization: &str) -> Request<Body> {
    Request::get(uri)
        .header("Authorization", authorization)
        .body(Body::empty())
        .unwrap()
}

pub fn rpc(uri: &str, service: Service, authorization: Option<&str>, body: impl Into<Body>) -> Request<Body> {
    let mut builder = Request::post(uri).header("Content-Type", service.request_content_type());
    if let Some(authorization) = authorization {
        builder = builder.header("Authorization", authorization);
    }
    builder.body(body.into()).unwrap()
}
