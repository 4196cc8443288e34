//! In-memory message store using DashMap.
//!
//! Messages are held in memory and lost on restart. The hash index is
//! updated under the index entry lock, so two concurrent inserts of the same
//! fingerprint resolve to a single stored message.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::message::Message;

use super::{Insert, MessageFilter, MessageStore, StoreError};

/// In-memory message store.
pub struct MemoryMessageStore {
    /// Messages by id
    messages: DashMap<Uuid, Message>,
    /// Hash -> message id
    by_hash: DashMap<String, Uuid>,
    /// Simulated availability, for exercising outage paths
    available: AtomicBool,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self {
            messages: DashMap::new(),
            by_hash: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Mark the store reachable or not
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store marked unavailable".to_string()))
        }
    }
}

impl Default for MemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn insert_if_absent(&self, message: Message) -> Result<Insert, StoreError> {
        self.ensure_available()?;

        match self.by_hash.entry(message.hash.clone()) {
            Entry::Occupied(entry) => {
                let existing_id = *entry.get();
                drop(entry);
                match self.messages.get(&existing_id) {
                    Some(existing) => Ok(Insert::Existing(existing.value().clone())),
                    None => {
                        // Dangling index entry; take the slot over
                        self.messages.insert(message.id, message.clone());
                        self.by_hash.insert(message.hash.clone(), message.id);
                        Ok(Insert::Created(message))
                    }
                }
            }
            Entry::Vacant(entry) => {
                self.messages.insert(message.id, message.clone());
                entry.insert(message.id);
                tracing::trace!(message_id = %message.id, hash = %message.hash, "Message stored");
                Ok(Insert::Created(message))
            }
        }
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Message>, StoreError> {
        self.ensure_available()?;
        Ok(self.messages.get(&id).map(|m| m.value().clone()))
    }

    async fn find_by_hash(&self, hash: &str) -> Result<Option<Message>, StoreError> {
        self.ensure_available()?;
        let id = match self.by_hash.get(hash) {
            Some(id) => *id,
            None => return Ok(None),
        };
        Ok(self.messages.get(&id).map(|m| m.value().clone()))
    }

    async fn find(&self, filter: &MessageFilter) -> Result<Vec<Message>, StoreError> {
        self.ensure_available()?;

        let mut found: Vec<Message> = self
            .messages
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();

        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        if let Some(limit) = filter.limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    async fn save(&self, message: &Message) -> Result<(), StoreError> {
        self.ensure_available()?;
        self.messages.insert(message.id, message.clone());
        self.by_hash.entry(message.hash.clone()).or_insert(message.id);
        Ok(())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        self.ensure_available()?;
        Ok(self.messages.len())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
