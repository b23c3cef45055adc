/// Utility modules
pub mod backoff;
pub mod wav;

pub use backoff::retry_with_backoff;
pub use wav::{read_pcm, repair_wav_headers, WavSink};
