/// ambient-scribe worker entrypoint
///
/// One binary covers the worker process types: `--role all` runs the whole
/// embedded deployment, the narrower roles run only their worker family.
/// Exit code 0 means clean shutdown, non-zero a fatal error.
use ambient_scribe::adapters::services::asr::build_transcription_service;
use ambient_scribe::adapters::services::llm::OpenAIService;
use ambient_scribe::adapters::{
    InProcessLog, InProcessMetadataStore, LocalEventBus, QdrantMemoryStore,
    SpeakerServiceClient, SqliteConversationStore,
};
use ambient_scribe::config::AppConfig;
use ambient_scribe::jobs::{JobContext, JobQueue, JobRunner};
use ambient_scribe::pipeline::{ResultAggregator, SupervisorRoles, WorkerSupervisor};
use ambient_scribe::ports::events::EventBusPort;
use ambient_scribe::ports::llm::LlmServicePort;
use ambient_scribe::ports::log::DurableLogPort;
use ambient_scribe::ports::memory::MemoryStorePort;
use ambient_scribe::ports::metadata::MetadataStorePort;
use ambient_scribe::ports::speaker::SpeakerRecognitionPort;
use ambient_scribe::ports::storage::ConversationStorePort;
use ambient_scribe::utils::wav::repair_wav_headers;
use anyhow::Context;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Role {
    /// Everything in one process (embedded deployment)
    All,
    /// Transcription consumers only
    TranscriptionWorker,
    /// Persistence consumers only
    PersistenceWorker,
    /// Job runner only
    JobWorker,
}

#[derive(Parser, Debug)]
#[command(
    name = "ambient-scribe",
    about = "Audio ingestion and conversation lifecycle service",
    version
)]
struct Args {
    /// Which worker family this process runs
    #[arg(long, value_enum, default_value_t = Role::All)]
    role: Role,

    /// Optional .env file loaded before reading configuration
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Log destination (stderr when omitted)
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Some(path) = &args.env_file {
        dotenv::from_path(path).ok();
    }
    init_logger(&args);

    if let Err(e) = run(args).await {
        log::error!("Fatal: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logger(args: &Args) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(path) = &args.log_file {
        match std::fs::OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("Could not open log file {}: {}", path.display(), e),
        }
    }
    builder.init();
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = Arc::new(AppConfig::from_env().context("loading configuration")?);

    std::fs::create_dir_all(&config.pipeline.recordings_dir)?;
    let repaired = repair_wav_headers(&config.pipeline.recordings_dir)?;
    if repaired > 0 {
        log::warn!(
            "Repaired {} WAV headers left by an unclean shutdown",
            repaired
        );
    }

    let log_store: Arc<dyn DurableLogPort> = Arc::new(InProcessLog::default());
    let metadata: Arc<dyn MetadataStorePort> = Arc::new(InProcessMetadataStore::new());
    let sqlite = SqliteConversationStore::new(config.database_path.clone())?;
    sqlite.run_migrations()?;
    let store: Arc<dyn ConversationStorePort> = Arc::new(sqlite);
    let asr = build_transcription_service(&config.asr)?;
    let speaker: Arc<dyn SpeakerRecognitionPort> =
        Arc::new(SpeakerServiceClient::new(config.speaker_service_url.clone()));
    let memory: Arc<dyn MemoryStorePort> =
        Arc::new(QdrantMemoryStore::new(config.memory_store_url.clone()));
    let llm: Arc<dyn LlmServicePort> = Arc::new(OpenAIService::new(
        config.openai_api_key.clone(),
        config.llm_model.clone(),
    ));
    let events: Arc<dyn EventBusPort> = Arc::new(LocalEventBus::default());

    let cancel = CancellationToken::new();
    let aggregator = ResultAggregator::new(log_store.clone());
    let (queue, queue_rx) = JobQueue::new();
    let mut tasks: Vec<tokio::task::JoinHandle<()>> = Vec::new();

    let roles = SupervisorRoles {
        transcription: matches!(args.role, Role::All | Role::TranscriptionWorker),
        persistence: matches!(args.role, Role::All | Role::PersistenceWorker),
    };
    if roles.transcription || roles.persistence {
        let supervisor = WorkerSupervisor::new(
            log_store.clone(),
            metadata.clone(),
            asr.clone(),
            &config,
            roles,
            cancel.child_token(),
        );
        tasks.push(tokio::spawn(async move {
            if let Err(e) = supervisor.run().await {
                log::error!("Supervisor failed: {}", e);
            }
        }));
    }

    if matches!(args.role, Role::All | Role::JobWorker) {
        let ctx = Arc::new(JobContext {
            config: config.clone(),
            log: log_store.clone(),
            metadata: metadata.clone(),
            store,
            aggregator,
            asr,
            speaker,
            memory,
            llm,
            events,
            queue: queue.clone(),
            cancel: cancel.child_token(),
        });
        let runner = JobRunner::new(ctx, queue_rx, config.job_concurrency);
        tasks.push(tokio::spawn(async move {
            if let Err(e) = runner.run().await {
                log::error!("Job runner failed: {}", e);
            }
        }));
    }

    log::info!(
        "ambient-scribe running as {:?}; press Ctrl-C to stop",
        args.role
    );
    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    log::info!("Shutting down");
    cancel.cancel();
    for task in tasks {
        let _ = task.await;
    }
    Ok(())
}
