/// Transcription results aggregator
///
/// Stateless reader over a session's result stream. Both transcription
/// paths write the same chunk shape, so the aggregator does not know (or
/// care) which path produced a chunk.
use crate::domain::models::{CombinedTranscript, EntryId, TranscriptChunk};
use crate::error::Result;
use crate::ports::log::{results_stream_key, DurableLogPort, LogRecord, StreamPayload};
use std::collections::BTreeMap;
use std::sync::Arc;

const READ_BATCH: usize = 256;

/// Aggregating reader over result streams
#[derive(Clone)]
pub struct ResultAggregator {
    log: Arc<dyn DurableLogPort>,
}

impl ResultAggregator {
    pub fn new(log: Arc<dyn DurableLogPort>) -> Self {
        Self { log }
    }

    async fn read_records(&self, session_id: &str, after: Option<EntryId>) -> Result<Vec<LogRecord>> {
        let stream = results_stream_key(session_id);
        let mut records = Vec::new();
        let mut cursor = after;
        loop {
            let batch = self.log.range_after(&stream, cursor, READ_BATCH).await?;
            match batch.last() {
                Some(last) => cursor = Some(last.id),
                None => break,
            }
            records.extend(batch);
        }
        Ok(records)
    }

    /// Raw chunk list in stream order
    pub async fn get_raw(&self, session_id: &str) -> Result<Vec<TranscriptChunk>> {
        Ok(self
            .read_records(session_id, None)
            .await?
            .into_iter()
            .filter_map(|r| match r.payload {
                StreamPayload::Chunk(chunk) => Some(chunk),
                _ => None,
            })
            .collect())
    }

    /// Chunks appended after `cursor` plus the next cursor value.
    /// `EntryId::ZERO` ("0-0") yields everything.
    pub async fn get_incremental(
        &self,
        session_id: &str,
        cursor: EntryId,
    ) -> Result<(Vec<TranscriptChunk>, EntryId)> {
        let records = self.read_records(session_id, Some(cursor)).await?;
        let next_cursor = records.last().map(|r| r.id).unwrap_or(cursor);
        let chunks = records
            .into_iter()
            .filter_map(|r| match r.payload {
                StreamPayload::Chunk(chunk) => Some(chunk),
                _ => None,
            })
            .collect();
        Ok((chunks, next_cursor))
    }

    /// Merged view of the session's transcript so far.
    ///
    /// Supersession is keyed by the exact `chunk_id`: a later final for the
    /// same chunk_id replaces the earlier one (the streaming provider may
    /// re-emit a tightened final for a span). Distinct chunk_ids are
    /// concatenated in id order, which is log order for the batch path.
    /// Segment boundaries are never merged across chunks.
    pub async fn get_combined(&self, session_id: &str) -> Result<CombinedTranscript> {
        let mut latest: BTreeMap<EntryId, TranscriptChunk> = BTreeMap::new();
        for record in self.read_records(session_id, None).await? {
            if let StreamPayload::Chunk(chunk) = record.payload {
                latest.insert(chunk.chunk_id, chunk);
            }
        }

        let mut combined = CombinedTranscript {
            chunk_count: latest.len(),
            ..Default::default()
        };
        let mut text_parts: Vec<String> = Vec::new();
        for chunk in latest.into_values() {
            if !chunk.text.trim().is_empty() {
                text_parts.push(chunk.text.trim().to_string());
            }
            combined.words.extend(chunk.words);
            combined.segments.extend(chunk.segments);
            combined.provider = Some(chunk.provider);
        }
        // Collapse consecutive whitespace
        combined.text = text_parts
            .join(" ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        Ok(combined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::log::InProcessLog;
    use crate::domain::models::{SpeakerSegment, WordTiming};

    fn chunk(chunk_id: EntryId, text: &str, start_s: f64) -> TranscriptChunk {
        let words = text
            .split_whitespace()
            .enumerate()
            .map(|(i, word)| WordTiming {
                word: word.to_string(),
                start_s: start_s + i as f64 * 0.5,
                end_s: start_s + i as f64 * 0.5 + 0.4,
                confidence: 0.9,
            })
            .collect();
        TranscriptChunk {
            chunk_id,
            session_id: "s1".to_string(),
            provider: "deepgram".to_string(),
            text: text.to_string(),
            confidence: 0.9,
            words,
            segments: vec![SpeakerSegment {
                speaker: None,
                start_s,
                end_s: start_s + 1.0,
                text: text.to_string(),
            }],
        }
    }

    async fn setup(chunks: Vec<TranscriptChunk>) -> ResultAggregator {
        let log = Arc::new(InProcessLog::default());
        let stream = results_stream_key("s1");
        for c in chunks {
            log.append(&stream, StreamPayload::Chunk(c)).await.unwrap();
        }
        ResultAggregator::new(log)
    }

    #[tokio::test]
    async fn test_batch_chunks_concatenate_in_order() {
        let aggregator = setup(vec![
            chunk(EntryId::new(1, 0), "hello there", 0.0),
            chunk(EntryId::new(2, 0), "general kenobi", 7.5),
        ])
        .await;

        let combined = aggregator.get_combined("s1").await.unwrap();
        assert_eq!(combined.text, "hello there general kenobi");
        assert_eq!(combined.chunk_count, 2);
        assert_eq!(combined.words.len(), 4);
        assert_eq!(combined.segments.len(), 2);
        assert_eq!(combined.provider.as_deref(), Some("deepgram"));
    }

    #[tokio::test]
    async fn test_streaming_supersession_last_final_wins() {
        // The provider tightens "hello wold" into "hello world" for the
        // same span; only the superseding chunk may count.
        let aggregator = setup(vec![
            chunk(EntryId::new(1, 0), "hello wold", 0.0),
            chunk(EntryId::new(1, 0), "hello world", 0.0),
        ])
        .await;

        let combined = aggregator.get_combined("s1").await.unwrap();
        assert_eq!(combined.text, "hello world");
        assert_eq!(combined.chunk_count, 1);
        assert_eq!(combined.words.len(), 2);
        assert_eq!(combined.words[1].word, "world");
    }

    #[tokio::test]
    async fn test_combined_is_idempotent() {
        let aggregator = setup(vec![
            chunk(EntryId::new(1, 0), "one two", 0.0),
            chunk(EntryId::new(2, 0), "three", 2.0),
        ])
        .await;

        let first = aggregator.get_combined("s1").await.unwrap();
        let second = aggregator.get_combined("s1").await.unwrap();
        assert_eq!(first.text, second.text);
        assert_eq!(first.words.len(), second.words.len());
        assert_eq!(first.chunk_count, second.chunk_count);
    }

    #[tokio::test]
    async fn test_timestamps_monotonic_across_chunks() {
        let aggregator = setup(vec![
            chunk(EntryId::new(1, 0), "a b", 0.0),
            chunk(EntryId::new(2, 0), "c d", 7.5),
            chunk(EntryId::new(3, 0), "e", 15.0),
        ])
        .await;

        let combined = aggregator.get_combined("s1").await.unwrap();
        let starts: Vec<f64> = combined.words.iter().map(|w| w.start_s).collect();
        let mut sorted = starts.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(starts, sorted);
    }

    #[tokio::test]
    async fn test_incremental_cursor() {
        let log = Arc::new(InProcessLog::default());
        let stream = results_stream_key("s1");
        log.append(&stream, StreamPayload::Chunk(chunk(EntryId::new(1, 0), "one", 0.0)))
            .await
            .unwrap();
        let aggregator = ResultAggregator::new(log.clone());

        let (chunks, cursor) = aggregator
            .get_incremental("s1", EntryId::ZERO)
            .await
            .unwrap();
        assert_eq!(chunks.len(), 1);

        // Nothing new after the cursor
        let (chunks, cursor2) = aggregator.get_incremental("s1", cursor).await.unwrap();
        assert!(chunks.is_empty());
        assert_eq!(cursor2, cursor);

        log.append(&stream, StreamPayload::Chunk(chunk(EntryId::new(2, 0), "two", 1.0)))
            .await
            .unwrap();
        let (chunks, _) = aggregator.get_incremental("s1", cursor).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "two");
    }

    #[tokio::test]
    async fn test_whitespace_collapse() {
        let aggregator = setup(vec![
            chunk(EntryId::new(1, 0), "  hello   there ", 0.0),
            chunk(EntryId::new(2, 0), " world ", 2.0),
        ])
        .await;
        let combined = aggregator.get_combined("s1").await.unwrap();
        assert_eq!(combined.text, "hello there world");
    }

    #[tokio::test]
    async fn test_raw_preserves_stream_order() {
        let aggregator = setup(vec![
            chunk(EntryId::new(1, 0), "first", 0.0),
            chunk(EntryId::new(1, 0), "first revised", 0.0),
        ])
        .await;
        let raw = aggregator.get_raw("s1").await.unwrap();
        assert_eq!(raw.len(), 2);
        assert_eq!(raw[1].text, "first revised");
    }
}
