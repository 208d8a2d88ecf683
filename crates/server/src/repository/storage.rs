use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tokio::process::Command;

/// Bare repositories laid out as `<root>/<owner>/<name>.git`, with the wiki
/// beside it as `<name>.wiki.git`.
#[derive(Clone, Debug)]
pub struct RepositoryStorage {
    pub root: PathBuf,
    git_executable: PathBuf,
}

impl RepositoryStorage {
    pub fn new(root: PathBuf, git_executable: PathBuf) -> Self {
        RepositoryStorage {
            root,
            git_executable,
        }
    }

    pub fn repository_path(&self, owner: &str, name: &str) -> PathBuf {
        self.root.join(owner).join(format!("{name}.git"))
    }

    pub fn wiki_path(&self, owner: &str, name: &str) -> PathBuf {
        self.root.join(owner).join(format!("{name}.wiki.git"))
    }

    /// Creates the bare repository (and its wiki when requested). Existing
    /// directories are left alone.
    pub async fn init_repository(&self, owner: &str, name: &str, with_wiki: bool) -> Result<PathBuf> {
        let path = self.repository_path(owner, name);
        self.init_bare(&path).await?;
        if with_wiki {
            self.init_bare(&self.wiki_path(owner, name)).await?;
        }
        Ok(path)
    }

    async fn init_bare(&self, path: &Path) -> Result<()> {
        if path.is_dir() {
            tracing::info!(path = %path.display(), "repository directory already present");
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let output = Command::new(&self.git_executable)
            .arg("init")
            .arg("--bare")
            .arg("--quiet")
            .arg(path)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.git_executable.display()))?;

        if !output.status.success() {
            return Err(anyhow!(
                "git init --bare {} failed: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        tracing::info!(path = %path.display(), "initialized bare repository");
        Ok(())
    }
}
