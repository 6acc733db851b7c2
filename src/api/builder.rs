use std::{error::Error, path::PathBuf};

use home::home_dir;
use log::debug;

use crate::{
    processor::{DEFAULT_MAX_RECURSE_DEPTH, DEFAULT_REPO_BUF_LEN, DEFAULT_WORKERS},
    Submirror,
};

#[derive(Default)]
pub struct SubmirrorBuilder {
    mirror_directory: Option<PathBuf>,
    workers: Option<usize>,
    queue_length: Option<usize>,
    max_recurse_depth: Option<usize>,
}

impl SubmirrorBuilder {
    /// Location of the mirror base directory. Mirrors live in its `v2`
    /// subdirectory.
    ///
    /// Defaults to `$HOME/.submirror/mirrors`.
    pub fn mirror_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.mirror_directory = Some(path.into());
        self
    }

    /// Number of repository workers and of mirror fetch workers, between 1
    /// and 8.
    ///
    /// Defaults to 4.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Capacity of the repository and mirror fetch queues. A run that needs
    /// more queued jobs than this fails instead of waiting.
    ///
    /// Defaults to 100.
    pub fn queue_length(mut self, queue_length: usize) -> Self {
        self.queue_length = Some(queue_length);
        self
    }

    /// Deepest submodule nesting level that is processed.
    ///
    /// Defaults to 20.
    pub fn max_recurse_depth(mut self, depth: usize) -> Self {
        self.max_recurse_depth = Some(depth);
        self
    }

    pub fn try_build(self) -> Result<Submirror, Box<dyn Error>> {
        let Self {
            mirror_directory,
            workers,
            queue_length,
            max_recurse_depth,
        } = self;

        let mirror_directory = match mirror_directory {
            Some(path) => path,
            None => {
                let path = default_mirror_directory()?;
                debug!("Using default mirror directory {}", path.display());
                std::fs::create_dir_all(&path)?;
                path
            }
        };

        Ok(Submirror {
            mirror_directory,
            workers: workers.unwrap_or(DEFAULT_WORKERS),
            queue_length: queue_length.unwrap_or(DEFAULT_REPO_BUF_LEN),
            max_recurse_depth: max_recurse_depth.unwrap_or(DEFAULT_MAX_RECURSE_DEPTH),
        })
    }
}

fn default_mirror_directory() -> Result<PathBuf, Box<dyn Error>> {
    let mut mirror_directory = home_dir()
        .ok_or("Could not find home dir. Please define $HOME env variable or pass a mirror directory.")?;
    mirror_directory.push(".submirror/mirrors");
    Ok(mirror_directory)
}
