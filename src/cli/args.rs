use clap::Parser;

use crate::processor::DEFAULT_MAX_RECURSE_DEPTH;

/// Checks out git submodules through a shared cache of bare mirrors.
#[derive(Debug, Parser)]
#[clap(version)]
pub struct CliArgs {
    #[clap(subcommand)]
    pub cmd: Command,
    /// Location of the mirror base directory.
    /// Can also be set with SUBMIRROR_MIRROR_DIR.
    /// [default: $HOME/.submirror/mirrors]
    #[clap(short, long, aliases = ["mirror-dir", "mirror_base_path"])]
    pub mirror_directory: Option<String>,
    /// Number of repository workers and of mirror fetch workers (1 to 8).
    /// Can also be set with SUBMIRROR_WORKERS_COUNT.
    /// [default: 4]
    #[clap(short, long)]
    pub workers: Option<usize>,
    /// Capacity of the work queues.
    /// Can also be set with SUBMIRROR_WORKERS_QUEUE.
    /// [default: 100]
    #[clap(short, long)]
    pub queue_length: Option<usize>,
    /// Deepest submodule nesting level that is processed
    #[clap(long, default_value_t = DEFAULT_MAX_RECURSE_DEPTH)]
    pub max_depth: usize,
}

#[derive(Debug, Parser)]
pub enum Command {
    ///Checks out the submodules of a repository, refreshing their mirrors first
    UpdateSubmodules {
        /// Repository whose submodules are checked out
        #[clap(short = 'p', long, alias = "repository_path")]
        repository_path: String,
        /// Also check out the submodules of submodules
        #[clap(short, long, alias = "recurse_submodules")]
        recurse: bool,
        /// Copy the objects out of the mirror after checkout
        #[clap(long)]
        dissociate: bool,
        /// Shallow checkout with the given number of commits
        #[clap(long)]
        depth: Option<u32>,
        /// Partial clone filter, e.g. blob:none
        #[clap(long)]
        filter: Option<String>,
    },
    ///Removes every mirror from the mirror directory
    ClearMirrors,
}
