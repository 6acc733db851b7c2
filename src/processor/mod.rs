//! Concurrent submodule checkout.
//!
//! The pipeline is made of two coordinator/worker-pool pairs:
//!
//! - the repository coordinator hands repositories to the repository workers
//!   and notices when every scheduled repository is finished,
//! - the mirror coordinator makes sure each remote url is cloned or fetched
//!   at most once per run and tells every interested worker when the mirror
//!   is ready.
//!
//! Coordinators own their state and only talk to workers through channels.
//! Every task runs in one [`JoinSet`]; the first error cancels the shared
//! token and is returned to the caller.

mod config;
mod mirror;
mod repo;

pub use self::config::{
    ConfigError, UpdateConfig, DEFAULT_MAX_RECURSE_DEPTH, DEFAULT_REPO_BUF_LEN, DEFAULT_WORKERS,
    MAX_WORKERS,
};
pub use mirror::MirrorResult;

use std::sync::Arc;

use log::{debug, info};
use thiserror::Error;
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;

use crate::git::{
    mirror::{MirrorError, MirrorStore},
    submodule::SubmoduleError,
    GitCli, GitError, GitRunner,
};

use mirror::{FetchWorker, MirrorCoordinator, MirrorHandle};
use repo::{RepoCoordinator, RepoHandle, RepoWorker};

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("reached repo buf queue length ({capacity}) on the {queue} queue while scheduling {item}")]
    QueueFull {
        queue: &'static str,
        capacity: usize,
        item: String,
    },
    #[error("reached max nesting level {depth} (limit {max}) at '{path}'")]
    MaxDepth {
        depth: usize,
        max: usize,
        path: String,
    },
    #[error("could not list submodules of '{path}': {source}")]
    Submodules {
        path: String,
        source: SubmoduleError,
    },
    #[error("mirror of '{url}' is unavailable: {source}")]
    Mirror {
        url: String,
        source: Arc<MirrorError>,
    },
    #[error("could not update submodule '{path}': {source}")]
    Update { path: String, source: GitError },
    #[error("{0} coordinator stopped unexpectedly")]
    CoordinatorGone(&'static str),
    #[error("submodule update was cancelled")]
    Cancelled,
    #[error("pipeline task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ProcessError {
    /// Whether this error only reports that the pipeline is shutting down.
    pub fn is_shutdown(&self) -> bool {
        matches!(
            self,
            ProcessError::Cancelled | ProcessError::CoordinatorGone(_)
        )
    }
}

type Queue<T> = Arc<Mutex<mpsc::Receiver<T>>>;

async fn next_job<T>(jobs: &Queue<T>) -> Option<T> {
    jobs.lock().await.recv().await
}

/// Log prefix showing how deep in the submodule tree a repository is.
fn indent(depth: usize) -> String {
    "  ".repeat(depth)
}

/// Checks out the submodules of one repository tree using a shared mirror
/// store.
pub struct Processor<R> {
    config: Arc<UpdateConfig>,
    runner: Arc<R>,
    cancel: CancellationToken,
}

impl<R: GitRunner> Processor<R> {
    /// Validates `config`; nothing is started before [`Processor::run`].
    pub fn new(config: UpdateConfig, runner: Arc<R>) -> Result<Self, ProcessError> {
        let config = config.validate()?;
        Ok(Processor {
            config: Arc::new(config),
            runner,
            cancel: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &UpdateConfig {
        &self.config
    }

    /// Cancelling this token stops a running pipeline with
    /// [`ProcessError::Cancelled`].
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(&self) -> Result<(), ProcessError> {
        let config = &self.config;
        let store = MirrorStore::new(&config.mirror_base_dir);
        let cancel = self.cancel.child_token();
        let done = CancellationToken::new();

        let (repo_intake, repo_events) = mpsc::channel(1);
        let (repo_dispatch, repo_jobs) = mpsc::channel(config.repo_buf_len);
        let (mirror_intake, mirror_requests) = mpsc::channel(1);
        let (fetch_dispatch, fetch_jobs) = mpsc::channel(config.repo_buf_len);
        let (fetch_results, fetch_outcomes) = mpsc::channel(config.workers);
        let repo_jobs: Queue<_> = Arc::new(Mutex::new(repo_jobs));
        let fetch_jobs: Queue<_> = Arc::new(Mutex::new(fetch_jobs));

        let repos = RepoHandle::new(repo_intake, cancel.clone());
        let mirrors = MirrorHandle::new(mirror_intake, cancel.clone());

        let mut group = JoinSet::new();
        group.spawn(
            RepoCoordinator::new(
                repo_events,
                repo_dispatch,
                config.repo_buf_len,
                done.clone(),
                cancel.clone(),
            )
            .run(),
        );
        group.spawn(
            MirrorCoordinator::new(
                store.clone(),
                mirror_requests,
                fetch_outcomes,
                fetch_dispatch,
                config.repo_buf_len,
                done.clone(),
                cancel.clone(),
            )
            .run(),
        );
        for id in 0..config.workers {
            group.spawn(
                RepoWorker::new(
                    id,
                    self.runner.clone(),
                    self.config.clone(),
                    repo_jobs.clone(),
                    repos.clone(),
                    mirrors.clone(),
                    done.clone(),
                    cancel.clone(),
                )
                .run(),
            );
            group.spawn(
                FetchWorker::new(
                    id,
                    self.runner.clone(),
                    store.clone(),
                    fetch_jobs.clone(),
                    fetch_results.clone(),
                    done.clone(),
                    cancel.clone(),
                )
                .run(),
            );
        }
        drop(mirrors);
        drop(fetch_results);

        let mut first_error = repos.schedule(config.repo_path.clone(), 0).await.err();
        drop(repos);
        if first_error.is_some() {
            cancel.cancel();
        }

        while let Some(joined) = group.join_next().await {
            let outcome = joined.map_err(ProcessError::from).and_then(|outcome| outcome);
            let Err(error) = outcome else { continue };
            cancel.cancel();
            // Tasks that merely noticed the shutdown may finish before the
            // one that caused it.
            let replace = first_error.as_ref().map_or(true, |previous| {
                previous.is_shutdown() && !error.is_shutdown()
            });
            if replace {
                debug!("Stopping all tasks: {}", error);
                first_error = Some(error);
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => {
                info!(
                    "Submodules of {} are up to date",
                    config.repo_path.display()
                );
                Ok(())
            }
        }
    }
}

/// Runs the whole pipeline with the `git` executable.
pub async fn update_submodules(config: UpdateConfig) -> Result<(), ProcessError> {
    Processor::new(config, Arc::new(GitCli::default()))?
        .run()
        .await
}
