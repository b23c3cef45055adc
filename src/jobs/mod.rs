/// Job orchestration
///
/// A cooperative worker pool over an in-memory queue. Jobs are long-running
/// (the speech detector can live for a day), carry hard timeouts and yield
/// on every sleep and blocking call so cancellation stays prompt.
pub mod conversation;
pub mod post_processing;
pub mod speech_detector;
pub mod transcribe_audio;

use crate::config::{AppConfig, JobConfig};
use crate::error::{AppError, Result};
use crate::pipeline::aggregator::ResultAggregator;
use crate::ports::events::EventBusPort;
use crate::ports::llm::LlmServicePort;
use crate::ports::log::DurableLogPort;
use crate::ports::memory::MemoryStorePort;
use crate::ports::metadata::MetadataStorePort;
use crate::ports::speaker::SpeakerRecognitionPort;
use crate::ports::storage::ConversationStorePort;
use crate::ports::transcription::TranscriptionServicePort;
use crate::utils::backoff::retry_with_backoff;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// One unit of background work
#[derive(Debug, Clone)]
pub enum Job {
    /// Watch a session until meaningful speech opens a conversation
    DetectSpeech { session_id: String },
    /// Drive one conversation from monitoring to closed
    TrackConversation {
        session_id: String,
        conversation_id: String,
    },
    /// Speaker recognition, memories, summaries, completion event
    PostProcess { conversation_id: String },
    /// Batch path for uploaded files: re-transcribe from the WAV on disk
    TranscribeAudioFile { conversation_id: String },
}

impl Job {
    fn timeout(&self, config: &JobConfig) -> Duration {
        match self {
            Job::DetectSpeech { .. } => config.detector_timeout,
            Job::TrackConversation { .. } => config.conversation_timeout,
            // Each post stage has its own budget; the envelope covers them all
            Job::PostProcess { .. } => config.post_job_timeout * 4,
            Job::TranscribeAudioFile { .. } => config.post_job_timeout * 5,
        }
    }

    fn describe(&self) -> String {
        match self {
            Job::DetectSpeech { session_id } => format!("detect-speech[{}]", session_id),
            Job::TrackConversation {
                conversation_id, ..
            } => format!("conversation[{}]", conversation_id),
            Job::PostProcess { conversation_id } => format!("post-process[{}]", conversation_id),
            Job::TranscribeAudioFile { conversation_id } => {
                format!("transcribe-file[{}]", conversation_id)
            }
        }
    }
}

/// Cloneable producer half of the job queue
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::UnboundedSender<Job>,
}

impl JobQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Job>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn enqueue(&self, job: Job) {
        log::debug!("Enqueueing {}", job.describe());
        if self.tx.send(job).is_err() {
            log::error!("Job queue is closed; job dropped");
        }
    }
}

/// Everything a job needs, shared behind Arcs
pub struct JobContext {
    pub config: Arc<AppConfig>,
    pub log: Arc<dyn DurableLogPort>,
    pub metadata: Arc<dyn MetadataStorePort>,
    pub store: Arc<dyn ConversationStorePort>,
    pub aggregator: ResultAggregator,
    pub asr: Arc<dyn TranscriptionServicePort>,
    pub speaker: Arc<dyn SpeakerRecognitionPort>,
    pub memory: Arc<dyn MemoryStorePort>,
    pub llm: Arc<dyn LlmServicePort>,
    pub events: Arc<dyn EventBusPort>,
    pub queue: JobQueue,
    pub cancel: CancellationToken,
}

/// Worker pool draining the job queue
pub struct JobRunner {
    ctx: Arc<JobContext>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>,
    workers: usize,
}

impl JobRunner {
    pub fn new(ctx: Arc<JobContext>, rx: mpsc::UnboundedReceiver<Job>, workers: usize) -> Self {
        Self {
            ctx,
            rx: Arc::new(Mutex::new(rx)),
            workers: workers.max(1),
        }
    }

    pub async fn run(self) -> Result<()> {
        let mut handles = Vec::with_capacity(self.workers);
        for index in 0..self.workers {
            let ctx = Arc::clone(&self.ctx);
            let rx = Arc::clone(&self.rx);
            handles.push(tokio::spawn(worker_loop(index, ctx, rx)));
        }
        for handle in handles {
            let _ = handle.await;
        }
        Ok(())
    }
}

async fn worker_loop(
    index: usize,
    ctx: Arc<JobContext>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>,
) {
    loop {
        let job = {
            let mut rx = rx.lock().await;
            tokio::select! {
                _ = ctx.cancel.cancelled() => return,
                job = rx.recv() => match job {
                    Some(job) => job,
                    None => return,
                },
            }
        };

        let label = job.describe();
        let budget = job.timeout(&ctx.config.jobs);
        log::info!("Job worker {} starting {}", index, label);
        match tokio::time::timeout(budget, run_job(&ctx, job)).await {
            Ok(Ok(())) => log::info!("{} finished", label),
            Ok(Err(e)) => log::error!("{} failed: {}", label, e),
            Err(_) => log::error!("{} exceeded its {:?} budget", label, budget),
        }
    }
}

/// Dispatch one job
pub async fn run_job(ctx: &JobContext, job: Job) -> Result<()> {
    match job {
        Job::DetectSpeech { session_id } => speech_detector::run(ctx, &session_id).await,
        Job::TrackConversation {
            session_id,
            conversation_id,
        } => conversation::run(ctx, &session_id, &conversation_id).await,
        Job::PostProcess { conversation_id } => post_processing::run(ctx, &conversation_id).await,
        Job::TranscribeAudioFile { conversation_id } => {
            transcribe_audio::run(ctx, &conversation_id).await
        }
    }
}

/// One post-conversation stage: retried with backoff inside a hard timeout
pub(crate) async fn run_stage<T, F, Fut>(config: &JobConfig, operation: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(
        config.post_job_timeout,
        retry_with_backoff(
            config.retry_attempts,
            config.retry_initial,
            config.retry_cap,
            operation,
        ),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(AppError::JobTimeout(config.post_job_timeout)),
    }
}
