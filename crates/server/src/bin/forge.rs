use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use git_http::auth::AccessMode;
use git_http::{GatewayState, GitCli};
use server::api::{build_router, run_api};
use server::auth::{NewUser, SqliteAccessStore};
use server::config::{Config, loader};
use server::repository::{
    CreateRepositoryInput, RepositoryStorage, create_repository_raw, grant_access_raw,
};
use server::validation::slug::parse_full_name;
use server::{db, metrics_exporter};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "forge")]
#[command(about = "Forge git server - serve repositories over HTTP and manage access", long_about = None)]
struct Cli {
    /// Config file; defaults to FORGE_CONFIG_PATH, forge.ron, .forge/config.ron
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the git HTTP gateway
    Serve,
    #[command(subcommand)]
    User(UserCommands),
    #[command(subcommand)]
    Token(TokenCommands),
    #[command(subcommand)]
    Repo(RepoCommands),
}

#[derive(Subcommand)]
enum UserCommands {
    /// Create a user account
    Add {
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        /// Grant site administrator rights
        #[arg(long)]
        admin: bool,
    },
    /// Disable a user account
    Disable { name: String },
    /// Toggle two-factor enrollment, which blocks password auth over HTTP
    TwoFactor {
        name: String,
        #[arg(long, conflicts_with = "disable")]
        enable: bool,
        #[arg(long)]
        disable: bool,
    },
}

#[derive(Subcommand)]
enum TokenCommands {
    /// Issue a personal access token; it is printed once
    Create { user: String, name: String },
}

#[derive(Args)]
struct RepoFlags {
    #[arg(long)]
    private: bool,
    #[arg(long)]
    mirror: bool,
    #[arg(long)]
    archived: bool,
    #[arg(long)]
    no_wiki: bool,
}

#[derive(Subcommand)]
enum RepoCommands {
    /// Create a repository and its bare git directory
    Create {
        /// Repository as <owner>/<name>
        full_name: String,
        #[command(flatten)]
        flags: RepoFlags,
    },
    /// Give a collaborator access to a repository
    Grant {
        full_name: String,
        user: String,
        mode: GrantMode,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum GrantMode {
    Read,
    Write,
    Admin,
}

impl From<GrantMode> for AccessMode {
    fn from(mode: GrantMode) -> Self {
        match mode {
            GrantMode::Read => AccessMode::Read,
            GrantMode::Write => AccessMode::Write,
            GrantMode::Admin => AccessMode::Admin,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => loader::load_from_file(path)?,
        None => loader::load_with_discovery()?,
    };

    let pool = db::init_pool(&config.server.db_root).await?;
    let store = SqliteAccessStore::new(pool.clone());

    match cli.command {
        Commands::Serve => serve(config, store).await?,
        Commands::User(cmd) => user_command(&store, cmd).await?,
        Commands::Token(TokenCommands::Create { user, name }) => {
            let token = store.create_access_token(&user, &name).await?;
            println!("✓ Token `{name}` created for {user}. It will not be shown again:");
            println!("  {token}");
        }
        Commands::Repo(cmd) => repo_command(&config, &pool, cmd).await?,
    }

    Ok(())
}

async fn serve(config: Config, store: SqliteAccessStore) -> Result<()> {
    metrics_exporter::init_metrics()?;

    let mut settings = config.git.clone();
    settings.repo_root = db::normalize_path(settings.repo_root)?;
    std::fs::create_dir_all(&settings.repo_root).with_context(|| {
        format!(
            "failed to create repository root directory: {}",
            settings.repo_root.display()
        )
    })?;

    let backend = GitCli::new(&settings.git_executable);
    let state = GatewayState::new(store, backend, settings);
    let router = build_router(state, config.server.access_control_allow_origin.as_deref())?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
        }
        signal.cancel();
    });

    run_api(router, &config.server.listen, shutdown).await
}

async fn user_command(store: &SqliteAccessStore, cmd: UserCommands) -> Result<()> {
    match cmd {
        UserCommands::Add {
            name,
            email,
            password,
            admin,
        } => {
            let account = store
                .create_user(NewUser {
                    name,
                    email,
                    password,
                    is_admin: admin,
                })
                .await?;
            println!("✓ User created successfully!");
            println!("  ID:   {}", account.id);
            println!("  Name: {}", account.name);
        }
        UserCommands::Disable { name } => {
            if !store.set_user_active(&name, false).await? {
                anyhow::bail!("user {name} not found");
            }
            println!("✓ User {name} disabled");
        }
        UserCommands::TwoFactor {
            name,
            enable,
            disable,
        } => {
            if enable == disable {
                anyhow::bail!("pass exactly one of --enable or --disable");
            }
            store.set_two_factor(&name, enable).await?;
            let state = if enable { "enabled" } else { "disabled" };
            println!("✓ Two-factor {state} for {name}");
        }
    }
    Ok(())
}

async fn repo_command(config: &Config, pool: &sqlx::SqlitePool, cmd: RepoCommands) -> Result<()> {
    match cmd {
        RepoCommands::Create { full_name, flags } => {
            let (owner, name) = parse_full_name(&full_name)?;
            let repo = create_repository_raw(
                pool,
                CreateRepositoryInput {
                    owner: owner.to_string(),
                    name: name.to_string(),
                    is_private: flags.private,
                    is_mirror: flags.mirror,
                    is_archived: flags.archived,
                    has_wiki: !flags.no_wiki,
                },
            )
            .await?;

            let storage = RepositoryStorage::new(
                db::normalize_path(config.git.repo_root.clone())?,
                config.git.git_executable.clone(),
            );
            let path = storage
                .init_repository(&repo.owner_name, &repo.name, repo.has_wiki)
                .await?;

            println!("✓ Repository created successfully!");
            println!("  ID:   {}", repo.id);
            println!("  Name: {}/{}", repo.owner_name, repo.name);
            println!("  Path: {}", path.display());
        }
        RepoCommands::Grant {
            full_name,
            user,
            mode,
        } => {
            let (owner, name) = parse_full_name(&full_name)?;
            let mode = AccessMode::from(mode);
            grant_access_raw(pool, owner, name, &user, mode).await?;
            println!("✓ {user} now has {} access to {owner}/{name}", mode.as_str());
        }
    }
    Ok(())
}
