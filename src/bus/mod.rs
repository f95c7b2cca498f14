//! Shared event bus: pub/sub fan-out, bounded event history, and a
//! last-writer-wins key/value store for cross-worker data.

pub mod event;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

pub use event::{Event, EventType, MAX_EVENT_PRIORITY};

use crate::config::BusConfig;

/// A subscriber's callback. Failures are isolated per handler and never fail
/// the publish.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event) -> crate::error::Result<()>;
}

/// Handle returned by `subscribe`, used to unsubscribe later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

/// Filter for querying the event history.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub event_type: Option<EventType>,
    pub source_id: Option<String>,
    pub session_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// Snapshot of bus state for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct BusHealth {
    pub history_len: usize,
    pub subscriber_count: usize,
    pub kv_entries: usize,
    pub delivery_failures: u64,
    pub last_activity: Option<DateTime<Utc>>,
}

/// A shared value with its provenance.
#[derive(Debug, Clone, Serialize)]
pub struct KvEntry {
    pub value: Value,
    /// Who wrote the value last.
    pub owner: String,
    pub updated_at: DateTime<Utc>,
}

/// In-memory event bus with a bounded history.
pub struct EventBus {
    config: BusConfig,
    history: RwLock<VecDeque<Event>>,
    subscribers: RwLock<HashMap<EventType, Vec<(SubscriptionId, Arc<dyn EventHandler>)>>>,
    kv: RwLock<HashMap<String, KvEntry>>,
    delivery_failures: AtomicU64,
    last_activity: RwLock<Option<DateTime<Utc>>>,
}

impl EventBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            history: RwLock::new(VecDeque::new()),
            subscribers: RwLock::new(HashMap::new()),
            kv: RwLock::new(HashMap::new()),
            delivery_failures: AtomicU64::new(0),
            last_activity: RwLock::new(None),
        }
    }

    /// Append the event to history (evicting the oldest past capacity) and fan
    /// it out to every subscriber of its type. Handler failures are logged and
    /// counted, never propagated. Fan-out completes before this returns, so a
    /// single subscriber observes events in publish order.
    pub async fn publish(&self, event: Event) {
        tracing::debug!(
            event_type = %event.event_type,
            source = %event.source_id,
            "Publishing event"
        );

        {
            let mut history = self.history.write().await;
            history.push_back(event.clone());
            while history.len() > self.config.max_history {
                history.pop_front();
            }
        }
        *self.last_activity.write().await = Some(Utc::now());

        let handlers: Vec<Arc<dyn EventHandler>> = {
            let subscribers = self.subscribers.read().await;
            subscribers
                .get(&event.event_type)
                .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default()
        };

        let results =
            futures::future::join_all(handlers.iter().map(|handler| handler.handle(&event))).await;
        for result in results {
            if let Err(err) = result {
                self.delivery_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    event_type = %event.event_type,
                    error = %err,
                    "Event handler failed"
                );
            }
        }
    }

    /// Register a handler for one event type. Only events published after the
    /// subscription exists are delivered to it.
    pub async fn subscribe(
        &self,
        event_type: EventType,
        handler: Arc<dyn EventHandler>,
    ) -> SubscriptionId {
        let id = SubscriptionId(Uuid::new_v4());
        let mut subscribers = self.subscribers.write().await;
        subscribers.entry(event_type).or_default().push((id, handler));
        id
    }

    /// Remove a subscription. Unknown ids are a no-op.
    pub async fn unsubscribe(&self, id: SubscriptionId) {
        let mut subscribers = self.subscribers.write().await;
        for list in subscribers.values_mut() {
            list.retain(|(sub_id, _)| *sub_id != id);
        }
    }

    /// Query the retained history, newest first.
    pub async fn query(&self, filter: EventFilter) -> Vec<Event> {
        let history = self.history.read().await;
        let limit = filter.limit.unwrap_or(usize::MAX);
        history
            .iter()
            .rev()
            .filter(|e| filter.event_type.is_none_or(|t| e.event_type == t))
            .filter(|e| {
                filter
                    .source_id
                    .as_deref()
                    .is_none_or(|s| e.source_id == s)
            })
            .filter(|e| {
                filter
                    .session_id
                    .as_deref()
                    .is_none_or(|s| e.session_id.as_deref() == Some(s))
            })
            .filter(|e| filter.since.is_none_or(|since| e.timestamp >= since))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Store a shared value under a key, last writer wins. Emits `DataUpdated`.
    pub async fn put(&self, key: impl Into<String>, value: Value, owner: impl Into<String>) {
        let key = key.into();
        let owner = owner.into();
        {
            let mut kv = self.kv.write().await;
            kv.insert(
                key.clone(),
                KvEntry {
                    value,
                    owner: owner.clone(),
                    updated_at: Utc::now(),
                },
            );
        }
        self.publish(
            Event::new(EventType::DataUpdated, owner)
                .with_payload(serde_json::json!({ "key": key })),
        )
        .await;
    }

    /// Read a shared value. Returns None for unknown keys.
    pub async fn get(&self, key: &str) -> Option<Value> {
        let kv = self.kv.read().await;
        kv.get(key).map(|entry| entry.value.clone())
    }

    /// Read a shared value together with who wrote it and when.
    pub async fn get_entry(&self, key: &str) -> Option<KvEntry> {
        let kv = self.kv.read().await;
        kv.get(key).cloned()
    }

    pub async fn health(&self) -> BusHealth {
        let subscriber_count = {
            let subscribers = self.subscribers.read().await;
            subscribers.values().map(Vec::len).sum()
        };
        BusHealth {
            history_len: self.history.read().await.len(),
            subscriber_count,
            kv_entries: self.kv.read().await.len(),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            last_activity: *self.last_activity.read().await,
        }
    }
}
