use std::{error::Error, path::PathBuf};

use crate::{
    cli::command_handlers::{do_clear_mirrors, do_update_submodules},
    processor::UpdateConfig,
};

mod builder;

pub use builder::SubmirrorBuilder;

pub struct Submirror {
    mirror_directory: PathBuf,
    workers: usize,
    queue_length: usize,
    max_recurse_depth: usize,
}

/// What to check out in a single `update_submodules` call.
#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    pub repository_path: PathBuf,
    /// Also check out the submodules of submodules
    pub recurse: bool,
    /// Copy the objects out of the mirror after checkout
    pub dissociate: bool,
    pub depth: Option<u32>,
    pub filter: Option<String>,
}

impl Submirror {
    pub fn builder() -> SubmirrorBuilder {
        SubmirrorBuilder::default()
    }

    pub fn mirror_directory(&self) -> &PathBuf {
        &self.mirror_directory
    }

    /// Checks out the submodules of a repository, cloning or refreshing the
    /// mirror of every remote they use first
    pub fn update_submodules(&self, options: UpdateOptions) -> Result<(), Box<dyn Error>> {
        do_update_submodules(self.update_config(options))
    }

    /// Removes all mirrors
    pub fn clear_mirrors(&self) -> Result<(), Box<dyn Error>> {
        do_clear_mirrors(&self.mirror_directory)
    }

    fn update_config(&self, options: UpdateOptions) -> UpdateConfig {
        let UpdateOptions {
            repository_path,
            recurse,
            dissociate,
            depth,
            filter,
        } = options;
        UpdateConfig {
            recurse_submodules: recurse,
            dissociate,
            depth,
            filter,
            workers: self.workers,
            repo_buf_len: self.queue_length,
            max_recurse_depth: self.max_recurse_depth,
            ..UpdateConfig::new(repository_path, &self.mirror_directory)
        }
    }
}
