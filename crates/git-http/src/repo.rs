use std::path::{Path, PathBuf};

use crate::errors::GitHttpError;

const GIT_SUFFIX: &str = ".git";
const WIKI_SUFFIX: &str = ".wiki";

/// Owner/name pair taken from the path prefix in front of a git route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoLocator {
    pub owner: String,
    pub name: String,
    pub is_wiki: bool,
}

impl RepoLocator {
    /// Parses `/<owner>/<name>[.wiki][.git]`. Matching is case-insensitive,
    /// so both segments are lowercased.
    pub fn parse(prefix: &str) -> Result<Self, GitHttpError> {
        let lowered = prefix.trim_matches('/').to_ascii_lowercase();
        let trimmed = lowered.strip_suffix(GIT_SUFFIX).unwrap_or(&lowered);
        let Some((owner, name)) = trimmed.split_once('/') else {
            return Err(GitHttpError::RepositoryNotFound);
        };
        validate_segment(owner)?;
        validate_segment(name)?;

        let (name, is_wiki) = match name.strip_suffix(WIKI_SUFFIX) {
            Some(base) => {
                validate_segment(base)?;
                (base, true)
            }
            None => (name, false),
        };

        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
            is_wiki,
        })
    }

    /// Storage-relative locator without the `.git` suffix.
    pub fn storage_name(&self) -> String {
        if self.is_wiki {
            format!("{}/{}{WIKI_SUFFIX}", self.owner, self.name)
        } else {
            format!("{}/{}", self.owner, self.name)
        }
    }
}

fn validate_segment(segment: &str) -> Result<(), GitHttpError> {
    let is_valid = !segment.is_empty()
        && !segment.starts_with('.')
        && segment
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.'));

    if is_valid {
        Ok(())
    } else {
        tracing::debug!(segment, "rejecting repository path segment");
        Err(GitHttpError::RepositoryNotFound)
    }
}

/// Maps a locator to its bare repository directory under `root`, appending
/// `.git` when absent. Pure filesystem lookup, no permission checks.
pub fn resolve_repo_dir(root: &Path, locator: &str) -> Result<PathBuf, GitHttpError> {
    let locator = locator.trim_matches('/');
    let relative = if locator.ends_with(GIT_SUFFIX) {
        locator.to_string()
    } else {
        format!("{locator}{GIT_SUFFIX}")
    };

    let dir = root.join(relative);
    if dir.is_dir() {
        Ok(dir)
    } else {
        tracing::debug!(dir = %dir.display(), "repository directory missing");
        Err(GitHttpError::RepositoryNotFound)
    }
}
