//! Repository side of the pipeline: the coordinator tracking which
//! repositories are still being processed and the workers checking out
//! their submodules.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{debug, info, warn};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use crate::git::{submodule, submodule::Submodule, GitRunner};

use super::{indent, mirror::MirrorHandle, next_job, ProcessError, Queue, UpdateConfig};

/// A repository whose submodules have to be checked out. `depth` is 0 for
/// the root repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct ProcessRepoJob {
    pub repo_path: PathBuf,
    pub depth: usize,
}

pub(super) enum RepoEvent {
    Schedule(ProcessRepoJob),
    Done(ProcessRepoJob),
}

/// Sending side of the repository coordinator's intake. Workers use it to
/// schedule nested repositories and to report finished jobs.
#[derive(Clone)]
pub(super) struct RepoHandle {
    intake: mpsc::Sender<RepoEvent>,
    cancel: CancellationToken,
}

impl RepoHandle {
    pub fn new(intake: mpsc::Sender<RepoEvent>, cancel: CancellationToken) -> Self {
        RepoHandle { intake, cancel }
    }

    pub async fn schedule(&self, repo_path: PathBuf, depth: usize) -> Result<(), ProcessError> {
        self.send(RepoEvent::Schedule(ProcessRepoJob { repo_path, depth }))
            .await
    }

    pub async fn done(&self, job: ProcessRepoJob) -> Result<(), ProcessError> {
        self.send(RepoEvent::Done(job)).await
    }

    async fn send(&self, event: RepoEvent) -> Result<(), ProcessError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ProcessError::Cancelled),
            sent = self.intake.send(event) => {
                sent.map_err(|_| ProcessError::CoordinatorGone("repository"))
            }
        }
    }
}

pub(super) struct RepoCoordinator {
    intake: mpsc::Receiver<RepoEvent>,
    dispatch: mpsc::Sender<ProcessRepoJob>,
    capacity: usize,
    // Jobs are not deduplicated, so a path may be active more than once.
    active_repo_paths: HashMap<PathBuf, usize>,
    done: CancellationToken,
    cancel: CancellationToken,
}

impl RepoCoordinator {
    pub fn new(
        intake: mpsc::Receiver<RepoEvent>,
        dispatch: mpsc::Sender<ProcessRepoJob>,
        capacity: usize,
        done: CancellationToken,
        cancel: CancellationToken,
    ) -> Self {
        RepoCoordinator {
            intake,
            dispatch,
            capacity,
            active_repo_paths: HashMap::new(),
            done,
            cancel,
        }
    }

    pub async fn run(mut self) -> Result<(), ProcessError> {
        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(ProcessError::Cancelled),
                event = self.intake.recv() => event,
            };
            let Some(event) = event else {
                return Err(ProcessError::CoordinatorGone("repository"));
            };

            match event {
                RepoEvent::Schedule(job) => self.schedule(job)?,
                RepoEvent::Done(job) => {
                    if self.complete(job) {
                        debug!("All repositories processed");
                        self.done.cancel();
                        return Ok(());
                    }
                }
            }
        }
    }

    fn schedule(&mut self, job: ProcessRepoJob) -> Result<(), ProcessError> {
        *self
            .active_repo_paths
            .entry(job.repo_path.clone())
            .or_default() += 1;

        match self.dispatch.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(job)) => Err(ProcessError::QueueFull {
                queue: "repository",
                capacity: self.capacity,
                item: job.repo_path.display().to_string(),
            }),
            Err(TrySendError::Closed(_)) => Err(ProcessError::Cancelled),
        }
    }

    /// Returns true once no repository is active anymore.
    fn complete(&mut self, job: ProcessRepoJob) -> bool {
        match self.active_repo_paths.get_mut(&job.repo_path) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                self.active_repo_paths.remove(&job.repo_path);
            }
            None => warn!(
                "Completion reported for unknown repository {}",
                job.repo_path.display()
            ),
        }
        self.active_repo_paths.is_empty()
    }
}

pub(super) struct RepoWorker<R> {
    id: usize,
    runner: Arc<R>,
    config: Arc<UpdateConfig>,
    jobs: Queue<ProcessRepoJob>,
    repos: RepoHandle,
    mirrors: MirrorHandle,
    done: CancellationToken,
    cancel: CancellationToken,
}

impl<R: GitRunner> RepoWorker<R> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: usize,
        runner: Arc<R>,
        config: Arc<UpdateConfig>,
        jobs: Queue<ProcessRepoJob>,
        repos: RepoHandle,
        mirrors: MirrorHandle,
        done: CancellationToken,
        cancel: CancellationToken,
    ) -> Self {
        RepoWorker {
            id,
            runner,
            config,
            jobs,
            repos,
            mirrors,
            done,
            cancel,
        }
    }

    pub async fn run(self) -> Result<(), ProcessError> {
        loop {
            let job = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(ProcessError::Cancelled),
                _ = self.done.cancelled() => return Ok(()),
                job = next_job(&self.jobs) => job,
            };
            let Some(job) = job else { return Ok(()) };

            debug!(
                "Repository worker {} handles {}",
                self.id,
                job.repo_path.display()
            );
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(ProcessError::Cancelled),
                processed = self.process(&job) => processed?,
            }
            self.repos.done(job).await?;
        }
    }

    async fn process(&self, job: &ProcessRepoJob) -> Result<(), ProcessError> {
        if job.depth > self.config.max_recurse_depth {
            return Err(ProcessError::MaxDepth {
                depth: job.depth,
                max: self.config.max_recurse_depth,
                path: job.repo_path.display().to_string(),
            });
        }

        let prefix = indent(job.depth);
        info!("{}Entering {}", prefix, job.repo_path.display());

        let submodules = submodule::enumerate(&*self.runner, &job.repo_path)
            .await
            .map_err(|source| ProcessError::Submodules {
                path: job.repo_path.display().to_string(),
                source,
            })?;

        let mut pending = Vec::with_capacity(submodules.len());
        for submodule in submodules {
            info!(
                "{}Processing submodule {} -> {}",
                prefix, submodule.relative_path, submodule.remote_url
            );
            let ready = self.mirrors.ensure(submodule.clone()).await?;
            pending.push((submodule, ready));
        }

        // `submodule update` mutates the repository's index, so checkouts
        // run one at a time in declaration order.
        for (submodule, ready) in pending {
            let mirror_dir = ready
                .await
                .map_err(|_| ProcessError::CoordinatorGone("mirror"))?
                .map_err(|source| ProcessError::Mirror {
                    url: submodule.remote_url.clone(),
                    source,
                })?;

            self.update(job, &submodule, &mirror_dir).await?;

            if self.config.recurse_submodules {
                let child = job.repo_path.join(&submodule.relative_path);
                debug!("{}Recursing into {}", prefix, child.display());
                self.repos.schedule(child, job.depth + 1).await?;
            }
        }

        info!("{}Left {}", prefix, job.repo_path.display());
        Ok(())
    }

    async fn update(
        &self,
        job: &ProcessRepoJob,
        submodule: &Submodule,
        mirror_dir: &Path,
    ) -> Result<(), ProcessError> {
        let args = update_args(&self.config, submodule, mirror_dir);
        self.runner
            .run(&job.repo_path, &args)
            .await
            .map_err(|source| ProcessError::Update {
                path: submodule.relative_path.clone(),
                source,
            })?;
        Ok(())
    }
}

fn update_args(
    config: &UpdateConfig,
    submodule: &Submodule,
    mirror_dir: &Path,
) -> Vec<String> {
    let mut args = vec![
        "submodule".to_owned(),
        "update".to_owned(),
        "--init".to_owned(),
        "--reference".to_owned(),
        mirror_dir.display().to_string(),
    ];
    if config.dissociate {
        args.push("--dissociate".to_owned());
    }
    if let Some(depth) = config.depth {
        args.push("--depth".to_owned());
        args.push(depth.to_string());
    }
    if let Some(filter) = &config.filter {
        args.push("--filter".to_owned());
        args.push(filter.clone());
    }
    args.push(submodule.relative_path.clone());
    args
}
