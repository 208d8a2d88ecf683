use git_http::auth::{AccessMode, AccessStore, Unit, token_digest};
use server::auth::{NewUser, SqliteAccessStore};
use server::repository::{CreateRepositoryInput, create_repository_raw, grant_access_raw};
use server::test_helpers::create_test_pool;

fn user(name: &str, admin: bool) -> NewUser {
    NewUser {
        name: name.to_string(),
        email: format!("{name}@example.com"),
        password: format!("{name}-secret"),
        is_admin: admin,
    }
}

fn repo(owner: &str, name: &str, is_private: bool) -> CreateRepositoryInput {
    CreateRepositoryInput {
        owner: owner.to_string(),
        name: name.to_string(),
        is_private,
        is_mirror: false,
        is_archived: false,
        has_wiki: true,
    }
}

async fn seeded() -> SqliteAccessStore {
    let pool = create_test_pool().await.unwrap();
    let store = SqliteAccessStore::new(pool.clone());
    for (name, admin) in [("alice", false), ("bob", false), ("root", true)] {
        store.create_user(user(name, admin)).await.unwrap();
    }
    create_repository_raw(&pool, repo("alice", "secret", true)).await.unwrap();
    create_repository_raw(&pool, repo("alice", "open", false)).await.unwrap();
    store
}

#[tokio::test]
async fn test_password_verification() {
    let store = seeded().await;

    let alice = store.verify_password("alice", "alice-secret").await.unwrap();
    assert_eq!(alice.map(|a| a.name), Some("alice".to_string()));
    assert!(store.verify_password("alice", "wrong").await.unwrap().is_none());
    assert!(store.verify_password("nobody", "alice-secret").await.unwrap().is_none());
}

#[tokio::test]
async fn test_unknown_user_sign_in_runs_full_check() {
    let store = seeded().await;
    for (name, password) in [("nobody", "alice-secret"), ("nobody", ""), ("ALICE2", "alice-secret")] {
        let started = std::time::Instant::now();
        assert!(store.verify_password(name, password).await.unwrap().is_none());
        // one PBKDF2 derivation at 100k iterations never finishes instantly
        assert!(started.elapsed() >= std::time::Duration::from_micros(500));
    }
}

#[tokio::test]
async fn test_user_names_are_unique_and_validated() {
    let store = seeded().await;

    assert!(store.create_user(user("alice", false)).await.is_err());
    assert!(store.create_user(user("ALICE", false)).await.is_err());
    assert!(store.create_user(user("bad.git", false)).await.is_err());
}

#[tokio::test]
async fn test_disable_and_two_factor() {
    let store = seeded().await;

    assert!(store.set_user_active("bob", false).await.unwrap());
    assert!(!store.set_user_active("nobody", false).await.unwrap());
    let bob = store.find_account_by_name("bob").await.unwrap().unwrap();
    assert!(bob.is_disabled());

    assert!(!store.two_factor_enrolled(bob.id).await.unwrap());
    store.set_two_factor("bob", true).await.unwrap();
    store.set_two_factor("bob", true).await.unwrap();
    assert!(store.two_factor_enrolled(bob.id).await.unwrap());
    store.set_two_factor("bob", false).await.unwrap();
    assert!(!store.two_factor_enrolled(bob.id).await.unwrap());
}

#[tokio::test]
async fn test_access_tokens_store_only_digest() {
    let store = seeded().await;

    let raw = store.create_access_token("bob", "laptop").await.unwrap();
    assert_eq!(raw.len(), 40);
    assert!(raw.chars().all(|c| c.is_ascii_hexdigit()));

    let stored: String = sqlx::query_scalar("SELECT token_hash FROM access_tokens")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_ne!(stored, raw);
    assert_eq!(stored, token_digest(&raw));

    let token = store.find_access_token(&token_digest(&raw)).await.unwrap().unwrap();
    let bob = store.find_account_by_name("bob").await.unwrap().unwrap();
    assert_eq!(token.user_id, bob.id);
    assert!(store.find_access_token(&token_digest("other")).await.unwrap().is_none());

    assert_eq!(store.token_last_used(token.id).await.unwrap(), None);
    store.touch_access_token(token.id).await.unwrap();
    assert!(store.token_last_used(token.id).await.unwrap().is_some());

    assert!(store.create_access_token("bob", "laptop").await.is_err());
}

#[tokio::test]
async fn test_permission_rules() {
    let store = seeded().await;
    let alice = store.find_account_by_name("alice").await.unwrap();
    let bob = store.find_account_by_name("bob").await.unwrap();
    let root = store.find_account_by_name("root").await.unwrap();
    let secret = store.find_repository("alice", "secret").await.unwrap().unwrap();
    let open = store.find_repository("alice", "open").await.unwrap().unwrap();

    assert!(secret.is_private);
    assert_eq!(secret.owner_name, "alice");

    assert!(store.has_access(alice.as_ref(), &secret, Unit::Code, AccessMode::Admin).await.unwrap());
    assert!(store.has_access(root.as_ref(), &secret, Unit::Code, AccessMode::Admin).await.unwrap());
    assert!(!store.has_access(bob.as_ref(), &secret, Unit::Code, AccessMode::Read).await.unwrap());
    assert!(!store.has_access(None, &secret, Unit::Code, AccessMode::Read).await.unwrap());

    assert!(store.has_access(None, &open, Unit::Code, AccessMode::Read).await.unwrap());
    assert!(!store.has_access(None, &open, Unit::Code, AccessMode::Write).await.unwrap());
    assert!(!store.has_access(bob.as_ref(), &open, Unit::Code, AccessMode::Write).await.unwrap());

    grant_access_raw(store.pool(), "alice", "secret", "bob", AccessMode::Read).await.unwrap();
    assert!(store.has_access(bob.as_ref(), &secret, Unit::Code, AccessMode::Read).await.unwrap());
    assert!(!store.has_access(bob.as_ref(), &secret, Unit::Code, AccessMode::Write).await.unwrap());

    grant_access_raw(store.pool(), "alice", "secret", "bob", AccessMode::Write).await.unwrap();
    assert!(store.has_access(bob.as_ref(), &secret, Unit::Code, AccessMode::Write).await.unwrap());
}

#[tokio::test]
async fn test_wiki_unit_follows_repository_setting() {
    let store = seeded().await;
    let mut input = repo("alice", "nowiki", false);
    input.has_wiki = false;
    create_repository_raw(store.pool(), input).await.unwrap();

    let open = store.find_repository("alice", "open").await.unwrap().unwrap();
    let nowiki = store.find_repository("alice", "nowiki").await.unwrap().unwrap();
    let alice = store.find_account_by_name("alice").await.unwrap();

    assert!(store.has_access(None, &open, Unit::Wiki, AccessMode::Read).await.unwrap());
    assert!(!store.has_access(alice.as_ref(), &nowiki, Unit::Wiki, AccessMode::Read).await.unwrap());
}

#[tokio::test]
async fn test_repository_creation_errors() {
    let store = seeded().await;

    assert!(create_repository_raw(store.pool(), repo("nobody", "x", false)).await.is_err());
    assert!(create_repository_raw(store.pool(), repo("alice", "open", true)).await.is_err());
    assert!(create_repository_raw(store.pool(), repo("alice", "x.wiki", false)).await.is_err());
    assert!(grant_access_raw(store.pool(), "alice", "missing", "bob", AccessMode::Read).await.is_err());
    assert!(grant_access_raw(store.pool(), "alice", "open", "bob", AccessMode::None).await.is_err());
}
