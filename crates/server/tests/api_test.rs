use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use git_http::{GatewaySettings, GatewayState, GitCli};
use server::api::build_router;
use server::auth::{NewUser, SqliteAccessStore};
use server::repository::{CreateRepositoryInput, create_repository_raw};
use server::test_helpers::create_test_pool;
use tempfile::TempDir;
use tower::ServiceExt;

struct Harness {
    router: axum::Router,
    _root: TempDir,
}

async fn harness(allow_origin: Option<&str>) -> Harness {
    let pool = create_test_pool().await.unwrap();
    let store = SqliteAccessStore::new(pool.clone());
    for name in ["alice", "bob"] {
        store
            .create_user(NewUser {
                name: name.to_string(),
                email: format!("{name}@example.com"),
                password: "hunter2".to_string(),
                is_admin: false,
            })
            .await
            .unwrap();
    }
    create_repository_raw(
        &pool,
        CreateRepositoryInput {
            owner: "alice".to_string(),
            name: "secret".to_string(),
            is_private: true,
            is_mirror: false,
            is_archived: false,
            has_wiki: false,
        },
    )
    .await
    .unwrap();

    let root = TempDir::new().unwrap();
    std::fs::create_dir_all(root.path().join("alice/secret.git")).unwrap();
    let settings = GatewaySettings {
        repo_root: root.path().to_path_buf(),
        ..GatewaySettings::default()
    };
    // no test here reaches a git subprocess
    let backend = GitCli::new("/nonexistent/git");
    let state = GatewayState::new(store, backend, settings);

    Harness {
        router: build_router(state, allow_origin).unwrap(),
        _root: root,
    }
}

fn info_refs(auth: Option<(&str, &str)>) -> Request<Body> {
    let mut builder =
        Request::get("/alice/secret.git/info/refs?service=git-upload-pack");
    if let Some((user, password)) = auth {
        let encoded = STANDARD.encode(format!("{user}:{password}"));
        builder = builder.header(header::AUTHORIZATION, format!("Basic {encoded}"));
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_metrics_route_is_mounted() {
    let h = harness(None).await;
    let response = h
        .router
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_non_git_paths_are_not_found() {
    let h = harness(None).await;
    let response = h
        .router
        .oneshot(Request::get("/alice/secret").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_private_repository_challenges_anonymous_clients() {
    let h = harness(None).await;
    let response = h.router.oneshot(info_refs(None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers()[header::WWW_AUTHENTICATE],
        "Basic realm=\".\""
    );
}

#[tokio::test]
async fn test_wrong_password_is_rejected() {
    let h = harness(None).await;
    let response = h
        .router
        .oneshot(info_refs(Some(("alice", "nope"))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_user_without_grant_is_forbidden() {
    let h = harness(None).await;
    let response = h
        .router
        .oneshot(info_refs(Some(("bob", "hunter2"))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"User permission denied");
}

#[tokio::test]
async fn test_cors_preflight_when_origin_configured() {
    let h = harness(Some("https://forge.example.com")).await;
    let response = h
        .router
        .oneshot(
            Request::options("/alice/secret.git/git-upload-pack")
                .header(header::ORIGIN, "https://forge.example.com")
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "authorization")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "https://forge.example.com"
    );
}
