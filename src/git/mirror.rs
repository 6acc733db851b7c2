use std::path::{Path, PathBuf};

use log::{debug, info, trace};
use thiserror::Error;

use super::{GitError, GitRunner};

const LAYOUT_VERSION_DIR: &str = "v2";
const MIRROR_PREFIX: &str = "submod-";

#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("can not create '{dir}' for '{url}': {source}")]
    CreateDir {
        dir: String,
        url: String,
        source: std::io::Error,
    },
    #[error("could not git fetch '{url}' in '{dir}': {source}")]
    Fetch {
        url: String,
        dir: String,
        source: GitError,
    },
    #[error("could not git clone '{url}' to '{dir}': {source}")]
    Clone {
        url: String,
        dir: String,
        source: GitError,
    },
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),
}

/// Bare mirrors of submodule remotes, one directory per remote url.
#[derive(Debug, Clone)]
pub struct MirrorStore {
    location: PathBuf,
}

impl MirrorStore {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        MirrorStore {
            location: base_dir.as_ref().join(LAYOUT_VERSION_DIR),
        }
    }

    /// Directory holding all mirrors of the current layout.
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Local mirror directory of `remote_url`. The mapping only depends on
    /// the url.
    pub fn mirror_dir(&self, remote_url: &str) -> PathBuf {
        self.location
            .join(format!("{}{}", MIRROR_PREFIX, sanitize(remote_url)))
    }

    /// Brings the mirror of `remote_url` at `mirror_dir` up to date, cloning
    /// it first if there is no bare repository there yet.
    pub async fn ensure<R: GitRunner>(
        &self,
        runner: &R,
        remote_url: &str,
        mirror_dir: &Path,
    ) -> Result<(), MirrorError> {
        tokio::fs::create_dir_all(mirror_dir)
            .await
            .map_err(|source| MirrorError::CreateDir {
                dir: mirror_dir.display().to_string(),
                url: remote_url.to_owned(),
                source,
            })?;

        if self.is_mirror_repo(runner, mirror_dir).await {
            debug!("Updating existing mirror at {}", mirror_dir.display());
            let args = ["fetch", "--no-recurse-submodules", "origin"].map(String::from);
            runner
                .run(mirror_dir, &args)
                .await
                .map_err(|source| MirrorError::Fetch {
                    url: remote_url.to_owned(),
                    dir: mirror_dir.display().to_string(),
                    source,
                })?;
        } else {
            debug!("Creating a new mirror at {}", mirror_dir.display());
            let args = [
                "clone".to_owned(),
                "--mirror".to_owned(),
                "--".to_owned(),
                remote_url.to_owned(),
                mirror_dir.display().to_string(),
            ];
            runner
                .run(&self.location, &args)
                .await
                .map_err(|source| MirrorError::Clone {
                    url: remote_url.to_owned(),
                    dir: mirror_dir.display().to_string(),
                    source,
                })?;
        }

        Ok(())
    }

    pub fn clear(&self) -> Result<(), MirrorError> {
        if self.location.exists() {
            info!("Clearing mirror store {}.", self.location.display());
            std::fs::remove_dir_all(&self.location)?;
        } else {
            info!(
                "{} is already removed, nothing to do",
                self.location.display()
            );
        }
        Ok(())
    }

    // A mirror is a bare repository. Checking the output as well keeps an
    // empty directory nested in some working tree from passing.
    async fn is_mirror_repo<R: GitRunner>(&self, runner: &R, mirror_dir: &Path) -> bool {
        let args = ["rev-parse", "--is-bare-repository"].map(String::from);
        match runner.run(mirror_dir, &args).await {
            Ok(output) => output.trim() == "true",
            Err(error) => {
                trace!("{} is not a mirror yet: {}", mirror_dir.display(), error);
                false
            }
        }
    }
}

/// Replaces every character outside `[A-Za-z0-9_.-]` with `_`.
pub fn sanitize(remote_url: &str) -> String {
    remote_url
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
