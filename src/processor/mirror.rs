//! Mirror side of the pipeline: one coordinator task owning the per-url
//! state and a pool of workers running the clone/fetch subprocesses.

use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Duration};

use log::{debug, error, info, warn};
use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        oneshot,
    },
    time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::git::{
    mirror::{MirrorError, MirrorStore},
    submodule::Submodule,
    GitRunner,
};

use super::{next_job, ProcessError, Queue};

const STILL_FETCHING_INTERVAL: Duration = Duration::from_secs(10);

/// Outcome delivered to every submodule waiting on a remote.
pub type MirrorResult = Result<PathBuf, Arc<MirrorError>>;

pub(super) struct EnsureMirrorJob {
    pub submodule: Submodule,
    pub reply: oneshot::Sender<MirrorResult>,
}

#[derive(Debug)]
pub(super) struct MirrorFetchJob {
    pub remote_url: String,
    pub mirror_dir: PathBuf,
}

#[derive(Debug)]
pub(super) struct MirrorFetchResult {
    pub remote_url: String,
    pub mirror_dir: PathBuf,
    pub outcome: Result<(), MirrorError>,
}

enum MirrorStatus {
    FetchScheduled,
    FetchComplete(MirrorResult),
}

struct MirrorRecord {
    status: MirrorStatus,
    waiters: Vec<oneshot::Sender<MirrorResult>>,
}

/// Sending side of the mirror coordinator's intake.
#[derive(Clone)]
pub(super) struct MirrorHandle {
    intake: mpsc::Sender<EnsureMirrorJob>,
    cancel: CancellationToken,
}

impl MirrorHandle {
    pub fn new(intake: mpsc::Sender<EnsureMirrorJob>, cancel: CancellationToken) -> Self {
        MirrorHandle { intake, cancel }
    }

    /// Asks for a ready mirror of `submodule`'s remote. The answer arrives on
    /// the returned receiver, which always has room for it.
    pub async fn ensure(
        &self,
        submodule: Submodule,
    ) -> Result<oneshot::Receiver<MirrorResult>, ProcessError> {
        let (reply, ready) = oneshot::channel();
        let job = EnsureMirrorJob { submodule, reply };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ProcessError::Cancelled),
            sent = self.intake.send(job) => {
                sent.map_err(|_| ProcessError::CoordinatorGone("mirror"))?;
                Ok(ready)
            }
        }
    }
}

pub(super) struct MirrorCoordinator {
    store: MirrorStore,
    intake: mpsc::Receiver<EnsureMirrorJob>,
    results: mpsc::Receiver<MirrorFetchResult>,
    dispatch: mpsc::Sender<MirrorFetchJob>,
    capacity: usize,
    mirrors: HashMap<String, MirrorRecord>,
    done: CancellationToken,
    cancel: CancellationToken,
}

impl MirrorCoordinator {
    pub fn new(
        store: MirrorStore,
        intake: mpsc::Receiver<EnsureMirrorJob>,
        results: mpsc::Receiver<MirrorFetchResult>,
        dispatch: mpsc::Sender<MirrorFetchJob>,
        capacity: usize,
        done: CancellationToken,
        cancel: CancellationToken,
    ) -> Self {
        MirrorCoordinator {
            store,
            intake,
            results,
            dispatch,
            capacity,
            mirrors: HashMap::new(),
            done,
            cancel,
        }
    }

    pub async fn run(mut self) -> Result<(), ProcessError> {
        let mut ticker = interval_at(
            Instant::now() + STILL_FETCHING_INTERVAL,
            STILL_FETCHING_INTERVAL,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(ProcessError::Cancelled),
                _ = self.done.cancelled() => return Ok(()),
                Some(result) = self.results.recv() => self.complete(result),
                job = self.intake.recv() => match job {
                    Some(job) => self.ensure(job)?,
                    None => return Ok(()),
                },
                _ = ticker.tick() => self.log_in_flight(),
            }
        }
    }

    fn ensure(&mut self, job: EnsureMirrorJob) -> Result<(), ProcessError> {
        let url = job.submodule.remote_url;

        if let Some(record) = self.mirrors.get_mut(&url) {
            match &record.status {
                MirrorStatus::FetchComplete(result) => {
                    debug!("Mirror of {} already handled in this run", url);
                    // The requester may have given up already.
                    let _ = job.reply.send(result.clone());
                }
                MirrorStatus::FetchScheduled => {
                    debug!("Mirror of {} is being fetched, waiting for it", url);
                    record.waiters.push(job.reply);
                }
            }
            return Ok(());
        }

        let fetch = MirrorFetchJob {
            remote_url: url.clone(),
            mirror_dir: self.store.mirror_dir(&url),
        };
        match self.dispatch.try_send(fetch) {
            Ok(()) => {}
            Err(TrySendError::Full(fetch)) => {
                return Err(ProcessError::QueueFull {
                    queue: "mirror fetch",
                    capacity: self.capacity,
                    item: fetch.remote_url,
                })
            }
            Err(TrySendError::Closed(_)) => return Err(ProcessError::Cancelled),
        }
        self.mirrors.insert(
            url,
            MirrorRecord {
                status: MirrorStatus::FetchScheduled,
                waiters: vec![job.reply],
            },
        );

        Ok(())
    }

    fn complete(&mut self, result: MirrorFetchResult) {
        let Some(record) = self.mirrors.get_mut(&result.remote_url) else {
            warn!("Got a fetch result for unknown remote {}", result.remote_url);
            return;
        };

        let outcome = match result.outcome {
            Ok(()) => {
                info!("Mirror of {} is ready", result.remote_url);
                Ok(result.mirror_dir)
            }
            Err(error) => {
                error!("Mirror of {} failed: {}", result.remote_url, error);
                Err(Arc::new(error))
            }
        };
        for waiter in record.waiters.drain(..) {
            let _ = waiter.send(outcome.clone());
        }
        record.status = MirrorStatus::FetchComplete(outcome);
    }

    /// Remote urls whose fetch has not reported back yet, sorted.
    fn in_flight(&self) -> Vec<&str> {
        let mut in_flight: Vec<&str> = self
            .mirrors
            .iter()
            .filter(|(_, record)| matches!(record.status, MirrorStatus::FetchScheduled))
            .map(|(url, _)| url.as_str())
            .collect();
        in_flight.sort_unstable();
        in_flight
    }

    fn log_in_flight(&self) {
        let in_flight = self.in_flight();
        if in_flight.is_empty() {
            return;
        }
        info!(
            "Still fetching {} mirror(s): {}",
            in_flight.len(),
            in_flight.join(", ")
        );
    }
}

pub(super) struct FetchWorker<R> {
    id: usize,
    runner: Arc<R>,
    store: MirrorStore,
    jobs: Queue<MirrorFetchJob>,
    results: mpsc::Sender<MirrorFetchResult>,
    done: CancellationToken,
    cancel: CancellationToken,
}

impl<R: GitRunner> FetchWorker<R> {
    pub fn new(
        id: usize,
        runner: Arc<R>,
        store: MirrorStore,
        jobs: Queue<MirrorFetchJob>,
        results: mpsc::Sender<MirrorFetchResult>,
        done: CancellationToken,
        cancel: CancellationToken,
    ) -> Self {
        FetchWorker {
            id,
            runner,
            store,
            jobs,
            results,
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

            info!("Fetching mirror of {}", job.remote_url);
            debug!(
                "Fetch worker {} handles {} in {}",
                self.id,
                job.remote_url,
                job.mirror_dir.display()
            );
            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(ProcessError::Cancelled),
                outcome = self.store.ensure(&*self.runner, &job.remote_url, &job.mirror_dir) => outcome,
            };

            let result = MirrorFetchResult {
                remote_url: job.remote_url,
                mirror_dir: job.mirror_dir,
                outcome,
            };
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(ProcessError::Cancelled),
                sent = self.results.send(result) => {
                    sent.map_err(|_| ProcessError::CoordinatorGone("mirror"))?
                }
            }
        }
    }
}
