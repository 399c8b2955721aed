//! Id-keyed tables for every live object plus the pending-completion slots.
//!
//! The registry is owned by the bridge worker and never shared, so nothing in
//! here takes a lock.

use std::collections::HashMap;

use tokio::sync::oneshot;

use crate::errors::{BridgeError, CompletionKind, ResourceKind};
use crate::model::{ConnectionRecord, PublisherRecord, SessionRecord, StreamRecord, SubscriberRecord};

/// One-shot answer to an asynchronous command.
pub type Completion = oneshot::Sender<Result<(), BridgeError>>;

/// A map from id to entry that knows what kind of thing it holds, so misses
/// turn into a proper `NotFound`.
#[derive(Debug)]
pub struct Table<T> {
    kind: ResourceKind,
    entries: HashMap<String, T>,
}

impl<T> Table<T> {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            entries: HashMap::new(),
        }
    }

    /// Insert or replace. The previous entry is handed back untouched; tearing
    /// it down is the caller's job.
    pub fn put(&mut self, id: &str, entry: T) -> Option<T> {
        self.entries.insert(id.to_string(), entry)
    }

    pub fn get(&self, id: &str) -> Result<&T, BridgeError> {
        self.entries
            .get(id)
            .ok_or_else(|| BridgeError::not_found(self.kind, id))
    }

    pub fn get_mut(&mut self, id: &str) -> Result<&mut T, BridgeError> {
        let kind = self.kind;
        self.entries
            .get_mut(id)
            .ok_or_else(|| BridgeError::not_found(kind, id))
    }

    pub fn remove(&mut self, id: &str) -> Option<T> {
        self.entries.remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.entries.values()
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.entries.values_mut()
    }

    /// Remove every entry matching `pred` and return them.
    pub fn drain_where(&mut self, mut pred: impl FnMut(&T) -> bool) -> Vec<(String, T)> {
        let ids: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| pred(entry))
            .map(|(id, _)| id.clone())
            .collect();
        ids.into_iter()
            .filter_map(|id| self.entries.remove(&id).map(|entry| (id, entry)))
            .collect()
    }

    fn clear(&mut self) -> Vec<(String, T)> {
        self.entries.drain().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompletionKey {
    pub kind: CompletionKind,
    pub id: String,
}

impl CompletionKey {
    pub fn new(kind: CompletionKind, id: &str) -> Self {
        Self {
            kind,
            id: id.to_string(),
        }
    }
}

struct Slot {
    generation: u64,
    completion: Completion,
}

/// At most one parked completion per key. Each reservation gets a fresh
/// generation so a stale timer can tell it no longer owns the slot.
#[derive(Default)]
pub struct PendingCompletions {
    slots: HashMap<CompletionKey, Slot>,
    next_generation: u64,
}

impl PendingCompletions {
    pub fn is_pending(&self, key: &CompletionKey) -> bool {
        self.slots.contains_key(key)
    }

    /// Park `completion` under `key`. If the key is taken the completion is
    /// handed back so the caller can answer it.
    pub fn reserve(&mut self, key: CompletionKey, completion: Completion) -> Result<u64, Completion> {
        if self.slots.contains_key(&key) {
            return Err(completion);
        }
        self.next_generation += 1;
        let generation = self.next_generation;
        self.slots.insert(key, Slot { generation, completion });
        Ok(generation)
    }

    /// Take the slot and answer it. Returns `false` when nothing was pending.
    pub fn resolve(&mut self, key: &CompletionKey, result: Result<(), BridgeError>) -> bool {
        match self.slots.remove(key) {
            Some(slot) => {
                // The caller may have stopped waiting.
                let _ = slot.completion.send(result);
                true
            }
            None => false,
        }
    }

    /// Like [`resolve`](Self::resolve) but only if the slot still belongs to
    /// `generation`.
    pub fn resolve_generation(
        &mut self,
        key: &CompletionKey,
        generation: u64,
        result: Result<(), BridgeError>,
    ) -> bool {
        match self.slots.get(key) {
            Some(slot) if slot.generation == generation => self.resolve(key, result),
            _ => false,
        }
    }

    /// Drop the slot without answering; the awaiting side sees `Cancelled`.
    pub fn discard(&mut self, key: &CompletionKey) -> bool {
        self.slots.remove(key).is_some()
    }

    /// Drop every slot whose id is `id`, whatever its kind.
    pub fn discard_scope(&mut self, id: &str) -> usize {
        let before = self.slots.len();
        self.slots.retain(|key, _| key.id != id);
        before - self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn clear(&mut self) -> usize {
        let count = self.slots.len();
        self.slots.clear();
        count
    }
}

/// A session's engine handle next to its bookkeeping.
pub struct SessionEntry<S> {
    pub handle: S,
    pub record: SessionRecord,
}

pub struct PublisherEntry<P> {
    pub handle: P,
    pub record: PublisherRecord,
}

pub struct SubscriberEntry<S> {
    pub handle: S,
    pub record: SubscriberRecord,
}

/// Everything removed by [`Registry::purge_session`].
#[derive(Debug, Default)]
pub struct PurgeReport {
    pub session_removed: bool,
    pub connections: Vec<String>,
    pub streams: Vec<String>,
    pub subscribers: Vec<String>,
    pub detached_publishers: Vec<String>,
    /// Publishers that were waiting on their destroy and are now gone.
    pub destroyed_publishers: Vec<String>,
    pub cancelled_completions: usize,
}

impl PurgeReport {
    pub fn removed_entries(&self) -> usize {
        self.connections.len() + self.streams.len() + self.subscribers.len()
    }
}

pub struct Registry<S, P, Sub> {
    pub(crate) sessions: Table<SessionEntry<S>>,
    pub(crate) publishers: Table<PublisherEntry<P>>,
    pub(crate) subscribers: Table<SubscriberEntry<Sub>>,
    pub(crate) streams: Table<StreamRecord>,
    pub(crate) publisher_streams: Table<StreamRecord>,
    pub(crate) connections: Table<ConnectionRecord>,
    pub(crate) pending: PendingCompletions,
}

impl<S, P, Sub> Default for Registry<S, P, Sub> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, P, Sub> Registry<S, P, Sub> {
    pub fn new() -> Self {
        Self {
            sessions: Table::new(ResourceKind::Session),
            publishers: Table::new(ResourceKind::Publisher),
            subscribers: Table::new(ResourceKind::Subscriber),
            streams: Table::new(ResourceKind::Stream),
            publisher_streams: Table::new(ResourceKind::PublisherStream),
            connections: Table::new(ResourceKind::Connection),
            pending: PendingCompletions::default(),
        }
    }

    /// Stream lookup across both pools; the publisher pool is authoritative
    /// for locally published streams.
    pub fn any_stream(&self, stream_id: &str) -> Option<&StreamRecord> {
        self.publisher_streams
            .get(stream_id)
            .or_else(|_| self.streams.get(stream_id))
            .ok()
    }

    /// Remove a session and everything scoped to it.
    ///
    /// Publishers are not owned by a session, so they survive detached. A
    /// publisher waiting on its destroy is finished off here instead, since
    /// the stream callback it waits for will never come.
    pub fn purge_session(&mut self, session_id: &str) -> PurgeReport {
        let mut report = PurgeReport {
            session_removed: self.sessions.remove(session_id).is_some(),
            ..PurgeReport::default()
        };

        report.connections = self
            .connections
            .drain_where(|c| c.session_id == session_id)
            .into_iter()
            .map(|(id, _)| id)
            .collect();

        let mut streams: Vec<String> = self
            .streams
            .drain_where(|s| s.session_id == session_id)
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        for (id, _) in self.publisher_streams.drain_where(|s| s.session_id == session_id) {
            if !streams.contains(&id) {
                streams.push(id);
            }
        }
        report.streams = streams;

        report.subscribers = self
            .subscribers
            .drain_where(|s| s.record.session_id == session_id)
            .into_iter()
            .map(|(id, _)| id)
            .collect();

        let attached: Vec<String> = self
            .publishers
            .values()
            .filter(|p| p.record.session_id.as_deref() == Some(session_id))
            .map(|p| p.record.id.clone())
            .collect();
        for publisher_id in attached {
            let key = CompletionKey::new(CompletionKind::DestroyPublisher, &publisher_id);
            if self.pending.resolve(&key, Ok(())) {
                self.publishers.remove(&publisher_id);
                report.destroyed_publishers.push(publisher_id);
            } else if let Ok(entry) = self.publishers.get_mut(&publisher_id) {
                entry.record.detach();
                report.detached_publishers.push(publisher_id);
            }
        }

        for subscriber_id in &report.subscribers {
            report.cancelled_completions += self.pending.discard_scope(subscriber_id);
        }
        report.cancelled_completions += self.pending.discard_scope(session_id);
        report
    }

    /// Drop everything. Used on process teardown.
    pub fn clear(&mut self) -> usize {
        let removed = self.sessions.clear().len()
            + self.publishers.clear().len()
            + self.subscribers.clear().len()
            + self.streams.clear().len()
            + self.publisher_streams.clear().len()
            + self.connections.clear().len();
        removed + self.pending.clear()
    }
}
