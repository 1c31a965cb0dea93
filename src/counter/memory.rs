//! In-process counter store
//!
//! DashMap keyed slots with expiry. Every mutating operation goes through the
//! map's entry API so the shard lock makes read-check-write a single step.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use super::{glob_match, CounterStore, WindowCount};
use crate::types::Result;

#[derive(Debug, Clone)]
enum SlotValue {
    Counter(u64),
    Bytes(Vec<u8>),
    Lease(String),
}

#[derive(Debug, Clone)]
struct Slot {
    value: SlotValue,
    expires_at: Instant,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// In-memory store statistics
#[derive(Debug, Clone, Default)]
pub struct MemoryStoreStats {
    pub entries: usize,
    pub counters: usize,
}

/// Single-instance stand-in for the shared store
#[derive(Default)]
pub struct MemoryCounterStore {
    slots: DashMap<String, Slot>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove expired slots
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let before = self.slots.len();
        self.slots.retain(|_, slot| !slot.is_expired(now));
        let removed = before.saturating_sub(self.slots.len());
        if removed > 0 {
            debug!(count = removed, "Cleaned up expired counter slots");
        }
        removed
    }

    pub fn stats(&self) -> MemoryStoreStats {
        let counters = self
            .slots
            .iter()
            .filter(|s| matches!(s.value, SlotValue::Counter(_)))
            .count();
        MemoryStoreStats {
            entries: self.slots.len(),
            counters,
        }
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn incr_window(&self, key: &str, window: Duration) -> Result<WindowCount> {
        let now = Instant::now();
        let mut slot = self.slots.entry(key.to_string()).or_insert_with(|| Slot {
            value: SlotValue::Counter(0),
            expires_at: now + window,
        });

        // Expired window or a key that held something else starts over
        let fresh = slot.is_expired(now) || !matches!(slot.value, SlotValue::Counter(_));
        if fresh {
            *slot = Slot {
                value: SlotValue::Counter(0),
                expires_at: now + window,
            };
        }

        let count = match &mut slot.value {
            SlotValue::Counter(c) => {
                *c += 1;
                *c
            }
            _ => 1,
        };

        Ok(WindowCount {
            count,
            reset_in: slot.expires_at.saturating_duration_since(now),
        })
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = Instant::now();
        if let Some(slot) = self.slots.get(key) {
            if !slot.is_expired(now) {
                if let SlotValue::Bytes(data) = &slot.value {
                    return Ok(Some(data.clone()));
                }
                return Ok(None);
            }
            drop(slot);
            self.slots.remove_if(key, |_, s| s.is_expired(now));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        self.slots.insert(
            key.to_string(),
            Slot {
                value: SlotValue::Bytes(value.to_vec()),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete_matching(&self, pattern: &str) -> Result<usize> {
        let matching: Vec<String> = self
            .slots
            .iter()
            .filter(|entry| glob_match(pattern, entry.key()))
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for key in matching {
            if self.slots.remove(&key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn try_lease(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let lease = Slot {
            value: SlotValue::Lease(owner.to_string()),
            expires_at: now + ttl,
        };
        match self.slots.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(lease);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(lease);
                Ok(true)
            }
        }
    }

    async fn release_lease(&self, key: &str, owner: &str) -> Result<bool> {
        let released = self
            .slots
            .remove_if(key, |_, slot| {
                matches!(&slot.value, SlotValue::Lease(holder) if holder == owner)
            })
            .is_some();
        Ok(released)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Spawn a background task to periodically drop expired slots
pub fn spawn_cleanup_task(store: Arc<MemoryCounterStore>, interval: Duration) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            store.cleanup();
        }
    });
}
