// Compress interactor - Orchestrates the in-place video compression use case

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::adapters::fs_local::LocalFs;
use crate::domain::model::*;
use crate::engine::{EngineConfig, JobNotifier, PipelineDriver};
use crate::error::{CompressError, CompressResult};
use crate::ports::*;

/// Run one job to completion on the calling thread.
///
/// Transcodes into `request.destination`, then replaces the source with it.
/// On failure the partial output is removed and the source is left alone.
/// The notifier receives exactly one terminal event either way.
pub fn run_job<B: CodecBackend>(
    backend: &B,
    config: &EngineConfig,
    fs: &LocalFs,
    request: &TranscodeRequest,
    notifier: &JobNotifier,
) -> CompressResult<JobReport> {
    let started_at = Utc::now();
    info!(
        source = %request.source.display(),
        quality = %request.tier,
        "compression job started"
    );

    match execute(backend, config, fs, request, notifier, started_at) {
        Ok(report) => {
            notifier.complete();
            notifier.succeed(&report);
            info!(
                source = %report.source.display(),
                original_size = report.original_size,
                compressed_size = report.compressed_size,
                ratio = %format!("{:.1}%", report.size_ratio_percent()),
                elapsed_ms = report.elapsed_ms(),
                "compression job finished"
            );
            Ok(report)
        }
        Err(err) => {
            if request.source.exists() {
                fs.discard_partial(&request.destination);
            } else {
                warn!(
                    output = %request.destination.display(),
                    "original already removed, keeping compressed output"
                );
            }
            error!(source = %request.source.display(), kind = ?err.kind(), error = %err, "compression job failed");
            notifier.fail(&err);
            Err(err)
        }
    }
}

fn execute<B: CodecBackend>(
    backend: &B,
    config: &EngineConfig,
    fs: &LocalFs,
    request: &TranscodeRequest,
    notifier: &JobNotifier,
    started_at: DateTime<Utc>,
) -> CompressResult<JobReport> {
    let original_size = fs.check_source(&request.source)?;
    let summary = PipelineDriver::new(backend, config).run(request, notifier)?;
    let compressed_size = fs.replace_source(&request.source, &request.destination)?;

    Ok(JobReport {
        source: request.source.clone(),
        profile: request.profile(),
        summary,
        original_size,
        compressed_size,
        started_at,
        finished_at: Utc::now(),
    })
}

struct Job {
    id: u64,
    request: TranscodeRequest,
    notifier: Arc<JobNotifier>,
    reply: oneshot::Sender<CompressResult<JobReport>>,
}

/// Pending result of a submitted job
#[derive(Debug)]
pub struct JobHandle {
    id: u64,
    source: PathBuf,
    reply: oneshot::Receiver<CompressResult<JobReport>>,
}

impl JobHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Wait for the job's outcome
    pub async fn wait(self) -> CompressResult<JobReport> {
        self.reply.await.map_err(|_| CompressError::Worker {
            message: format!("worker stopped before job {} finished", self.id),
        })?
    }
}

/// Job queue with one worker that runs jobs strictly one at a time.
///
/// Must be created inside a tokio runtime. Dropping the compressor closes the
/// queue; the worker finishes the jobs already queued and exits.
pub struct Compressor<B: CodecBackend> {
    backend: Arc<B>,
    queue: Option<mpsc::UnboundedSender<Job>>,
    worker: Option<JoinHandle<()>>,
    next_id: AtomicU64,
}

impl<B: CodecBackend> Compressor<B> {
    pub fn new(backend: Arc<B>, config: EngineConfig, fs: LocalFs) -> Self {
        let (queue, jobs) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(Arc::clone(&backend), config, fs, jobs));
        Self {
            backend,
            queue: Some(queue),
            worker: Some(worker),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Queue a job. Progress and the terminal event go to `observer`.
    pub fn submit(
        &self,
        request: TranscodeRequest,
        observer: Box<dyn JobObserver>,
    ) -> CompressResult<JobHandle> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply, receiver) = oneshot::channel();
        let source = request.source.clone();
        let job = Job {
            id,
            request,
            notifier: Arc::new(JobNotifier::new(observer)),
            reply,
        };

        let queue = self.queue.as_ref().ok_or_else(|| CompressError::Worker {
            message: "compressor is shut down".to_string(),
        })?;
        queue.send(job).map_err(|rejected| {
            let err = CompressError::Worker {
                message: "compression worker is not running".to_string(),
            };
            rejected.0.notifier.fail(&err);
            err
        })?;

        debug!(job = id, source = %source.display(), "job queued");
        Ok(JobHandle {
            id,
            source,
            reply: receiver,
        })
    }

    /// Close the queue and wait for queued jobs to finish
    pub async fn shutdown(mut self) -> CompressResult<()> {
        self.queue.take();
        if let Some(worker) = self.worker.take() {
            worker.await.map_err(|e| CompressError::Worker {
                message: format!("compression worker panicked: {e}"),
            })?;
        }
        debug!("compressor shut down");
        Ok(())
    }
}

async fn run_worker<B: CodecBackend>(
    backend: Arc<B>,
    config: EngineConfig,
    fs: LocalFs,
    mut jobs: mpsc::UnboundedReceiver<Job>,
) {
    debug!("compression worker started");
    while let Some(job) = jobs.recv().await {
        let Job {
            id,
            request,
            notifier,
            reply,
        } = job;

        let backend = Arc::clone(&backend);
        let config = config.clone();
        let fs = fs.clone();
        let job_notifier = Arc::clone(&notifier);
        let outcome = tokio::task::spawn_blocking(move || {
            run_job(backend.as_ref(), &config, &fs, &request, &job_notifier)
        })
        .await;

        let result = outcome.unwrap_or_else(|e| {
            let err = CompressError::Worker {
                message: format!("job {id} aborted: {e}"),
            };
            notifier.fail(&err);
            Err(err)
        });
        if reply.send(result).is_err() {
            debug!(job = id, "job handle dropped before completion");
        }
    }
    debug!("compression worker stopped");
}

/// Plugin-style entry point: validates the raw call, then queues the job
pub struct CompressInteractor<B: CodecBackend> {
    compressor: Compressor<B>,
    fs: LocalFs,
}

impl<B: CodecBackend> CompressInteractor<B> {
    pub fn new(backend: Arc<B>, config: EngineConfig, fs: LocalFs) -> Self {
        Self {
            compressor: Compressor::new(backend, config, fs.clone()),
            fs,
        }
    }

    pub fn compressor(&self) -> &Compressor<B> {
        &self.compressor
    }

    /// Compress the video at `path` in place.
    ///
    /// A missing `quality` means `high`. A rejected call is reported to the
    /// observer and returned as the error; an accepted call yields the handle.
    pub fn compress_video(
        &self,
        path: Option<&str>,
        quality: Option<&str>,
        observer: Box<dyn JobObserver>,
    ) -> CompressResult<JobHandle> {
        match self.build_request(path, quality) {
            Ok(request) => self.compressor.submit(request, observer),
            Err(err) => {
                observer.on_error(&err);
                Err(err)
            }
        }
    }

    fn build_request(&self, path: Option<&str>, quality: Option<&str>) -> CompressResult<TranscodeRequest> {
        let path = path
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or(CompressError::MissingPath)?;
        let source = PathBuf::from(path);
        if !source.exists() {
            return Err(CompressError::SourceNotFound {
                path: path.to_string(),
            });
        }
        let tier = quality.map(QualityTier::parse).unwrap_or_default();
        let destination = self.fs.temp_path_for(&source)?;
        Ok(TranscodeRequest::new(source, destination, tier))
    }

    pub async fn shutdown(self) -> CompressResult<()> {
        self.compressor.shutdown().await
    }
}
