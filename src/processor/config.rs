use std::path::{Path, PathBuf};

use thiserror::Error;

pub const DEFAULT_WORKERS: usize = 4;
pub const MAX_WORKERS: usize = 8;
pub const DEFAULT_REPO_BUF_LEN: usize = 100;
pub const DEFAULT_MAX_RECURSE_DEPTH: usize = 20;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("workers count must be between 1 and 8, got {0}")]
    Workers(usize),
    #[error("repo buf queue length must be at least 1")]
    RepoBufLen,
    #[error("path '{0}' does not exist")]
    Missing(String),
    #[error("path '{0}' is not a directory")]
    NotADirectory(String),
    #[error("i/o error when checking '{path}': {source}")]
    IO {
        path: String,
        source: std::io::Error,
    },
}

/// Everything a single submodule update run needs to know. Validated once
/// and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateConfig {
    pub repo_path: PathBuf,
    pub mirror_base_dir: PathBuf,
    pub recurse_submodules: bool,
    pub dissociate: bool,
    pub depth: Option<u32>,
    pub filter: Option<String>,
    pub workers: usize,
    pub repo_buf_len: usize,
    pub max_recurse_depth: usize,
}

impl UpdateConfig {
    pub fn new(repo_path: impl Into<PathBuf>, mirror_base_dir: impl Into<PathBuf>) -> Self {
        UpdateConfig {
            repo_path: repo_path.into(),
            mirror_base_dir: mirror_base_dir.into(),
            recurse_submodules: false,
            dissociate: false,
            depth: None,
            filter: None,
            workers: DEFAULT_WORKERS,
            repo_buf_len: DEFAULT_REPO_BUF_LEN,
            max_recurse_depth: DEFAULT_MAX_RECURSE_DEPTH,
        }
    }

    /// Checks the limits and paths, returning the config with
    /// `mirror_base_dir` made absolute.
    pub fn validate(self) -> Result<Self, ConfigError> {
        if !(1..=MAX_WORKERS).contains(&self.workers) {
            return Err(ConfigError::Workers(self.workers));
        }
        if self.repo_buf_len < 1 {
            return Err(ConfigError::RepoBufLen);
        }
        check_dir(&self.repo_path)?;
        check_dir(&self.mirror_base_dir)?;
        let mirror_base_dir =
            self.mirror_base_dir
                .canonicalize()
                .map_err(|source| ConfigError::IO {
                    path: self.mirror_base_dir.display().to_string(),
                    source,
                })?;

        Ok(UpdateConfig {
            mirror_base_dir,
            ..self
        })
    }
}

fn check_dir(path: &Path) -> Result<(), ConfigError> {
    match std::fs::metadata(path) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(ConfigError::NotADirectory(path.display().to_string())),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            Err(ConfigError::Missing(path.display().to_string()))
        }
        Err(source) => Err(ConfigError::IO {
            path: path.display().to_string(),
            source,
        }),
    }
}
