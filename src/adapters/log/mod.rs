/// In-process durable log adapter
///
/// Implements DurableLogPort with per-stream entry queues, named consumer
/// groups with pending-entry tracking, idle claim, bounded trim and a
/// broadcast-based pub/sub channel. All workers of the embedded deployment
/// share one instance; a networked log can replace it behind the same port
/// without touching any consumer.
use crate::domain::models::EntryId;
use crate::error::Result;
use crate::ports::log::{DurableLogPort, LogRecord, StreamPayload};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex};

#[derive(Clone)]
struct StoredEntry {
    id: EntryId,
    payload: StreamPayload,
}

struct PendingEntry {
    consumer: String,
    delivered_at: Instant,
    payload: StreamPayload,
}

#[derive(Default)]
struct GroupState {
    last_delivered: EntryId,
    pending: HashMap<EntryId, PendingEntry>,
}

struct StreamState {
    entries: VecDeque<StoredEntry>,
    last_id: EntryId,
    groups: HashMap<String, GroupState>,
    wakeup: broadcast::Sender<()>,
}

impl StreamState {
    fn new() -> Self {
        let (wakeup, _) = broadcast::channel(16);
        Self {
            entries: VecDeque::new(),
            last_id: EntryId::ZERO,
            groups: HashMap::new(),
            wakeup,
        }
    }

    fn next_id(&mut self) -> EntryId {
        let now_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let id = if now_ms > self.last_id.ms {
            EntryId::new(now_ms, 0)
        } else {
            EntryId::new(self.last_id.ms, self.last_id.seq + 1)
        };
        self.last_id = id;
        id
    }

    /// An entry may be evicted quietly once every group has consumed and
    /// acked it. Streams without groups have no consumers to wait for.
    fn acked_by_all_groups(&self, id: EntryId) -> bool {
        !self.groups.is_empty()
            && self
                .groups
                .values()
                .all(|g| id <= g.last_delivered && !g.pending.contains_key(&id))
    }
}

/// In-process implementation of the durable log
pub struct InProcessLog {
    streams: Mutex<HashMap<String, StreamState>>,
    channels: std::sync::Mutex<HashMap<String, broadcast::Sender<String>>>,
    /// How long trim waits for lagging consumers before force-evicting
    trim_wait: Duration,
}

impl InProcessLog {
    pub fn new(trim_wait: Duration) -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            channels: std::sync::Mutex::new(HashMap::new()),
            trim_wait,
        }
    }
}

impl Default for InProcessLog {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

#[async_trait]
impl DurableLogPort for InProcessLog {
    async fn append(&self, stream: &str, payload: StreamPayload) -> Result<EntryId> {
        let mut streams = self.streams.lock().await;
        let state = streams
            .entry(stream.to_string())
            .or_insert_with(StreamState::new);
        let id = state.next_id();
        state.entries.push_back(StoredEntry { id, payload });
        let _ = state.wakeup.send(());
        Ok(id)
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<LogRecord>> {
        let deadline = Instant::now() + block;
        loop {
            let mut rx = {
                let mut streams = self.streams.lock().await;
                let state = streams
                    .entry(stream.to_string())
                    .or_insert_with(StreamState::new);
                let last_delivered = state
                    .groups
                    .get(group)
                    .map(|g| g.last_delivered)
                    .unwrap_or(EntryId::ZERO);
                let picked: Vec<StoredEntry> = state
                    .entries
                    .iter()
                    .filter(|e| e.id > last_delivered)
                    .take(count)
                    .cloned()
                    .collect();
                let group_state = state.groups.entry(group.to_string()).or_default();
                if !picked.is_empty() {
                    let now = Instant::now();
                    for entry in &picked {
                        group_state.pending.insert(
                            entry.id,
                            PendingEntry {
                                consumer: consumer.to_string(),
                                delivered_at: now,
                                payload: entry.payload.clone(),
                            },
                        );
                        group_state.last_delivered = entry.id;
                    }
                    return Ok(picked
                        .into_iter()
                        .map(|e| LogRecord {
                            id: e.id,
                            payload: e.payload,
                        })
                        .collect());
                }
                // Subscribe while still holding the lock so an append racing
                // with the release cannot be missed.
                state.wakeup.subscribe()
            };

            let remaining = match deadline.checked_duration_since(Instant::now()) {
                Some(d) if !d.is_zero() => d,
                _ => return Ok(Vec::new()),
            };
            tokio::select! {
                _ = tokio::time::sleep(remaining) => return Ok(Vec::new()),
                _ = rx.recv() => {}
            }
        }
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[EntryId]) -> Result<()> {
        let mut streams = self.streams.lock().await;
        if let Some(state) = streams.get_mut(stream) {
            if let Some(group_state) = state.groups.get_mut(group) {
                for id in ids {
                    group_state.pending.remove(id);
                }
            }
        }
        Ok(())
    }

    async fn claim_idle(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
    ) -> Result<Vec<LogRecord>> {
        let mut streams = self.streams.lock().await;
        let Some(state) = streams.get_mut(stream) else {
            return Ok(Vec::new());
        };
        let Some(group_state) = state.groups.get_mut(group) else {
            return Ok(Vec::new());
        };
        let now = Instant::now();
        let mut claimed: Vec<LogRecord> = Vec::new();
        for (id, pending) in group_state.pending.iter_mut() {
            let own = pending.consumer == consumer;
            if own || now.duration_since(pending.delivered_at) >= min_idle {
                pending.consumer = consumer.to_string();
                pending.delivered_at = now;
                claimed.push(LogRecord {
                    id: *id,
                    payload: pending.payload.clone(),
                });
            }
        }
        claimed.sort_by_key(|r| r.id);
        Ok(claimed)
    }

    async fn trim(&self, stream: &str, max_len: usize) -> Result<usize> {
        let deadline = Instant::now() + self.trim_wait;
        let mut removed = 0usize;
        loop {
            {
                let mut streams = self.streams.lock().await;
                let Some(state) = streams.get_mut(stream) else {
                    return Ok(removed);
                };
                while state.entries.len() > max_len {
                    let front_id = state.entries.front().map(|e| e.id);
                    let Some(front_id) = front_id else { break };
                    if state.acked_by_all_groups(front_id) {
                        state.entries.pop_front();
                        removed += 1;
                    } else {
                        break;
                    }
                }
                if state.entries.len() <= max_len {
                    return Ok(removed);
                }
                if Instant::now() >= deadline {
                    // Consumers did not catch up in time; drop the oldest
                    // entries and forget them from every pending list.
                    while state.entries.len() > max_len {
                        if let Some(entry) = state.entries.pop_front() {
                            for group_state in state.groups.values_mut() {
                                group_state.pending.remove(&entry.id);
                            }
                            removed += 1;
                        }
                    }
                    log::warn!(
                        "force-trimmed {} entries from stream {}",
                        removed,
                        stream
                    );
                    return Ok(removed);
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn range_after(
        &self,
        stream: &str,
        after: Option<EntryId>,
        count: usize,
    ) -> Result<Vec<LogRecord>> {
        let streams = self.streams.lock().await;
        let Some(state) = streams.get(stream) else {
            return Ok(Vec::new());
        };
        Ok(state
            .entries
            .iter()
            .filter(|e| after.map_or(true, |a| e.id > a))
            .take(count)
            .map(|e| LogRecord {
                id: e.id,
                payload: e.payload.clone(),
            })
            .collect())
    }

    async fn stream_len(&self, stream: &str) -> Result<usize> {
        let streams = self.streams.lock().await;
        Ok(streams.get(stream).map(|s| s.entries.len()).unwrap_or(0))
    }

    async fn pending_count(&self, stream: &str, group: &str) -> Result<usize> {
        let streams = self.streams.lock().await;
        Ok(streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map(|g| g.pending.len())
            .unwrap_or(0))
    }

    async fn delete_stream(&self, stream: &str) -> Result<()> {
        self.streams.lock().await.remove(stream);
        Ok(())
    }

    async fn remove_consumer(&self, stream: &str, group: &str, consumer: &str) -> Result<()> {
        let mut streams = self.streams.lock().await;
        if let Some(state) = streams.get_mut(stream) {
            if let Some(group_state) = state.groups.get_mut(group) {
                group_state.pending.retain(|_, p| p.consumer != consumer);
            }
        }
        Ok(())
    }

    async fn list_streams(&self, prefix: &str) -> Result<Vec<String>> {
        let streams = self.streams.lock().await;
        let mut names: Vec<String> = streams
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        names.sort();
        Ok(names)
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<usize> {
        let channels = self.channels.lock().unwrap();
        match channels.get(channel) {
            Some(sender) => Ok(sender.send(payload.to_string()).unwrap_or(0)),
            None => Ok(0),
        }
    }

    fn subscribe(&self, channel: &str) -> broadcast::Receiver<String> {
        let mut channels = self.channels.lock().unwrap();
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(256).0)
            .subscribe()
    }
}
