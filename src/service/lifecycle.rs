use crate::service::state::{ServiceState, Trigger};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Maximum number of events kept in memory
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

/// Capacity of the live event channel
const BROADCAST_CAPACITY: usize = 256;

/// A recorded state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceEvent {
    /// Event ID
    pub id: Uuid,
    /// Service name
    pub service: String,
    /// State before the transition
    pub from: ServiceState,
    /// State after the transition
    pub to: ServiceState,
    /// What caused it
    pub trigger: Trigger,
    /// Event timestamp
    pub timestamp: DateTime<Utc>,
    /// Event details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Lifecycle event log
///
/// Keeps a bounded history of transitions and fans every new event out to
/// live subscribers (the SSE endpoint, tests).
pub struct LifecycleLog {
    /// Recorded events, oldest first
    events: Mutex<VecDeque<ServiceEvent>>,
    /// History bound
    limit: usize,
    /// Live subscribers
    sender: broadcast::Sender<ServiceEvent>,
}

impl LifecycleLog {
    /// Create a new lifecycle log
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_HISTORY_LIMIT)
    }

    /// Create a lifecycle log keeping at most `limit` events
    pub fn with_limit(limit: usize) -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            events: Mutex::new(VecDeque::new()),
            limit: limit.max(1),
            sender,
        }
    }

    fn events(&self) -> MutexGuard<'_, VecDeque<ServiceEvent>> {
        // A panic while holding this lock cannot leave the deque half-updated.
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a transition
    pub fn record(
        &self,
        service: &str,
        from: ServiceState,
        to: ServiceState,
        trigger: Trigger,
        detail: Option<String>,
    ) -> ServiceEvent {
        let event = ServiceEvent {
            id: Uuid::new_v4(),
            service: service.to_string(),
            from,
            to,
            trigger,
            timestamp: Utc::now(),
            detail,
        };

        {
            let mut events = self.events();
            events.push_back(event.clone());

            // Limit event history
            while events.len() > self.limit {
                events.pop_front();
            }
        }

        match self.sender.send(event.clone()) {
            Ok(receivers) => tracing::trace!(receivers, "Lifecycle event broadcast"),
            Err(_) => tracing::trace!("Lifecycle event recorded, no live subscribers"),
        }

        event
    }

    /// Subscribe to events recorded from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.sender.subscribe()
    }

    /// Get recent events for a service (newest first)
    pub fn service_events(&self, service: &str, limit: Option<usize>) -> Vec<ServiceEvent> {
        let events = self.events();
        let iter = events.iter().rev().filter(|e| e.service == service).cloned();
        match limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }

    /// Get all events (newest first)
    pub fn all_events(&self, limit: Option<usize>) -> Vec<ServiceEvent> {
        let events = self.events();
        let iter = events.iter().rev().cloned();
        match limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }

    /// Number of retained events
    pub fn len(&self) -> usize {
        self.events().len()
    }

    /// Whether no events are retained
    pub fn is_empty(&self) -> bool {
        self.events().is_empty()
    }

    /// Clear events
    pub fn clear(&self) {
        self.events().clear();
    }
}

impl Default for LifecycleLog {
    fn default() -> Self {
        Self::new()
    }
}
