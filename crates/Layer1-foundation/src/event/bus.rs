//! Event Bus - non-blocking event broadcast
//!
//! Publishing pushes onto a tokio broadcast channel and returns immediately.
//! Each subscriber owns its receive queue; a slow subscriber lags and drops
//! events rather than slowing the publisher.

use super::types::{EngineEvent, EventCategory, EventKind};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::trace;

// ============================================================================
// EventFilter
// ============================================================================

/// Event filter
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Allowed categories (None = all)
    pub categories: Option<Vec<EventCategory>>,

    /// Event name prefixes, e.g. `cache.miss`
    pub names: Option<Vec<String>>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_categories(mut self, categories: Vec<EventCategory>) -> Self {
        self.categories = Some(categories);
        self
    }

    pub fn with_names(mut self, names: Vec<String>) -> Self {
        self.names = Some(names);
        self
    }

    pub fn matches(&self, event: &EngineEvent) -> bool {
        if let Some(ref cats) = self.categories {
            if !cats.contains(&event.category()) {
                return false;
            }
        }

        if let Some(ref names) = self.names {
            let name = event.kind.name();
            if !names.iter().any(|n| name.starts_with(n.as_str())) {
                return false;
            }
        }

        true
    }
}

// ============================================================================
// EventBus
// ============================================================================

/// Event bus configuration
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Per-subscriber queue capacity
    pub channel_capacity: usize,

    /// Number of recent events kept for inspection
    pub history_size: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            history_size: 100,
        }
    }
}

/// Event bus
///
/// ```ignore
/// let bus = EventBus::new();
/// let mut sub = bus.subscribe();
/// bus.publish(EventKind::StoreRecovered);
/// let event = sub.recv().await?;
/// ```
pub struct EventBus {
    config: EventBusConfig,
    sender: broadcast::Sender<EngineEvent>,
    history: Mutex<VecDeque<EngineEvent>>,
    event_count: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    pub fn with_config(config: EventBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity.max(1));

        Self {
            history: Mutex::new(VecDeque::with_capacity(config.history_size)),
            config,
            sender,
            event_count: AtomicU64::new(0),
        }
    }

    /// Publish an event. Never blocks, never fails.
    pub fn publish(&self, kind: EventKind) {
        let event = EngineEvent::new(kind);
        let count = self.event_count.fetch_add(1, Ordering::Relaxed) + 1;

        trace!(
            event_id = %event.id,
            event = event.kind.name(),
            "Publishing event #{}", count
        );

        if self.config.history_size > 0 {
            let mut history = self.history.lock();
            if history.len() >= self.config.history_size {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        // No receivers is fine
        let _ = self.sender.send(event);
    }

    /// Independent receiver for all future events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Most recent events, newest first
    pub fn history(&self, limit: Option<usize>) -> Vec<EngineEvent> {
        let history = self.history.lock();
        let limit = limit.unwrap_or(history.len());
        history.iter().rev().take(limit).cloned().collect()
    }

    /// History entries matching a filter, oldest first
    pub fn search_history(&self, filter: &EventFilter) -> Vec<EngineEvent> {
        self.history
            .lock()
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Total events published
    pub fn event_count(&self) -> u64 {
        self.event_count.load(Ordering::Relaxed)
    }

    pub fn clear_history(&self) {
        self.history.lock().clear();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("config", &self.config)
            .field("event_count", &self.event_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::FingerprintBuilder;

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(EventKind::StoreRecovered);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::StoreRecovered);
        assert_eq!(bus.event_count(), 1);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        bus.publish(EventKind::StoreRecovered);
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.history(None).len(), 1);
    }

    #[tokio::test]
    async fn test_slow_subscriber_does_not_block() {
        let bus = EventBus::with_config(EventBusConfig {
            channel_capacity: 4,
            history_size: 0,
        });
        let mut rx = bus.subscribe();

        for _ in 0..20 {
            bus.publish(EventKind::StoreRecovered);
        }

        // Lagged receiver skips ahead instead of holding the publisher
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
        assert_eq!(bus.event_count(), 20);
    }

    #[test]
    fn test_history_bounded() {
        let bus = EventBus::with_config(EventBusConfig {
            channel_capacity: 16,
            history_size: 5,
        });
        for i in 0..10 {
            bus.publish(EventKind::UnitInvalidated {
                unit_id: format!("unit-{}", i),
            });
        }

        let history = bus.history(None);
        assert_eq!(history.len(), 5);
        assert_eq!(
            history[0].kind,
            EventKind::UnitInvalidated {
                unit_id: "unit-9".into()
            }
        );
    }

    #[test]
    fn test_filter() {
        let fp = FingerprintBuilder::build("u", "d", "v", "").unwrap();
        let bus = EventBus::new();
        bus.publish(EventKind::MissStarted { fingerprint: fp });
        bus.publish(EventKind::MissCompleted {
            fingerprint: fp,
            duration_ms: 3,
        });
        bus.publish(EventKind::StoreRecovered);

        let cache_only = EventFilter::new().with_categories(vec![EventCategory::Cache]);
        assert_eq!(bus.search_history(&cache_only).len(), 2);

        let completed = EventFilter::new().with_names(vec!["cache.miss_completed".into()]);
        assert_eq!(bus.search_history(&completed).len(), 1);
    }
}
