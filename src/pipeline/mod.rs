/// Stream pipeline: producer, consumers, aggregation
///
/// The audio stream fans out to the transcription path (streaming or batch)
/// and the persistence path; both are independent consumer groups over the
/// same durable log. The aggregator reads the result stream those paths
/// write.
pub mod aggregator;
pub mod batch;
pub mod persistence;
pub mod producer;
pub mod streaming;
pub mod supervisor;

pub use aggregator::ResultAggregator;
pub use batch::BatchTranscriptionWorker;
pub use persistence::PersistenceWorker;
pub use producer::AudioProducer;
pub use streaming::StreamingTranscriptionWorker;
pub use supervisor::{SupervisorRoles, WorkerSupervisor};
