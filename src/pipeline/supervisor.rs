/// Stream discovery supervisor
///
/// Periodically scans `audio.stream.*` and keeps one transcription worker
/// and one persistence worker alive per live session. The worker kind
/// follows the session's transcription mode selected at init; everything
/// downstream only sees the result-stream contract.
use crate::config::{AppConfig, PipelineConfig};
use crate::domain::models::{SessionStatus, TranscriptionMode};
use crate::error::Result;
use crate::pipeline::batch::BatchTranscriptionWorker;
use crate::pipeline::persistence::PersistenceWorker;
use crate::pipeline::streaming::StreamingTranscriptionWorker;
use crate::ports::log::{DurableLogPort, AUDIO_STREAM_PREFIX};
use crate::ports::metadata::MetadataStorePort;
use crate::ports::transcription::{TranscriptionConfig, TranscriptionServicePort};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Which worker families this supervisor runs (maps to the process roles)
#[derive(Debug, Clone, Copy)]
pub struct SupervisorRoles {
    pub transcription: bool,
    pub persistence: bool,
}

/// Stream supervisor spawning per-session workers
pub struct WorkerSupervisor {
    log: Arc<dyn DurableLogPort>,
    metadata: Arc<dyn MetadataStorePort>,
    asr: Arc<dyn TranscriptionServicePort>,
    pipeline: PipelineConfig,
    asr_config: TranscriptionConfig,
    binding_ttl: Duration,
    roles: SupervisorRoles,
    cancel: CancellationToken,
    workers: HashMap<String, JoinHandle<()>>,
}

impl WorkerSupervisor {
    pub fn new(
        log: Arc<dyn DurableLogPort>,
        metadata: Arc<dyn MetadataStorePort>,
        asr: Arc<dyn TranscriptionServicePort>,
        config: &AppConfig,
        roles: SupervisorRoles,
        cancel: CancellationToken,
    ) -> Self {
        let asr_config = TranscriptionConfig {
            model: config.asr.model.clone(),
            language: config.asr.language.clone(),
            ..TranscriptionConfig::default()
        };
        Self {
            log,
            metadata,
            asr,
            pipeline: config.pipeline.clone(),
            asr_config,
            binding_ttl: config.jobs.binding_ttl,
            roles,
            cancel,
            workers: HashMap::new(),
        }
    }

    pub async fn run(mut self) -> Result<()> {
        loop {
            if let Err(e) = self.scan().await {
                log::error!("Stream scan failed: {}", e);
            }
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.pipeline.scan_interval) => {}
            }
        }

        for (key, handle) in self.workers.drain() {
            if let Err(e) = handle.await {
                log::warn!("Worker {} ended abnormally: {}", key, e);
            }
        }
        Ok(())
    }

    async fn scan(&mut self) -> Result<()> {
        let streams = self.log.list_streams(AUDIO_STREAM_PREFIX).await?;
        for stream in streams {
            let Some(client_id) = stream.strip_prefix(AUDIO_STREAM_PREFIX) else {
                continue;
            };
            let Some(session) = self.metadata.session_for_client(client_id).await? else {
                continue;
            };
            if session.status == SessionStatus::Complete {
                continue;
            }

            if self.roles.transcription {
                let key = format!("stt:{}", session.session_id);
                if self.needs_spawn(&key, session.status) {
                    let worker = match session.mode {
                        TranscriptionMode::Streaming => {
                            let worker = StreamingTranscriptionWorker::new(
                                self.log.clone(),
                                self.metadata.clone(),
                                self.asr.clone(),
                                session.clone(),
                                self.pipeline.clone(),
                                self.asr_config.clone(),
                                self.cancel.child_token(),
                            );
                            tokio::spawn(log_exit(key.clone(), worker.run()))
                        }
                        TranscriptionMode::Batch => {
                            let worker = BatchTranscriptionWorker::new(
                                self.log.clone(),
                                self.metadata.clone(),
                                self.asr.clone(),
                                session.clone(),
                                self.pipeline.clone(),
                                self.asr_config.clone(),
                                self.cancel.child_token(),
                            );
                            tokio::spawn(log_exit(key.clone(), worker.run()))
                        }
                    };
                    log::info!("Spawned transcription worker for {}", session.session_id);
                    self.workers.insert(key, worker);
                }
            }

            if self.roles.persistence {
                let key = format!("persist:{}", session.session_id);
                if self.needs_spawn(&key, session.status) {
                    let worker = PersistenceWorker::new(
                        self.log.clone(),
                        self.metadata.clone(),
                        session.clone(),
                        self.pipeline.clone(),
                        self.binding_ttl,
                        self.cancel.child_token(),
                    );
                    log::info!("Spawned persistence worker for {}", session.session_id);
                    let handle = tokio::spawn(log_exit(key.clone(), worker.run()));
                    self.workers.insert(key, handle);
                }
            }
        }
        Ok(())
    }

    /// Spawn when unknown, or respawn a crashed worker while the session is
    /// still live. A worker that exited after END stays finished.
    fn needs_spawn(&self, key: &str, status: SessionStatus) -> bool {
        match self.workers.get(key) {
            None => true,
            Some(handle) if !handle.is_finished() => false,
            Some(_) => status == SessionStatus::Active,
        }
    }
}

async fn log_exit(key: String, fut: impl std::future::Future<Output = Result<()>>) {
    if let Err(e) = fut.await {
        log::error!("Worker {} failed: {}", key, e);
    }
}
