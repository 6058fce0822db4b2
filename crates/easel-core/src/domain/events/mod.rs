//! Domain event infrastructure
//!
//! Provides base traits and types for the outbound events the lock and
//! lifecycle managers emit. Events are handed to an `EventPublisher`, which
//! an integrating system wires to its notification fan-out.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::Result;

/// Base trait for all domain events
///
/// Domain events represent something that happened in the domain.
/// They are immutable facts about the past.
pub trait DomainEvent: Send + Sync {
    /// Get the event type as a string
    fn event_type(&self) -> &str;

    /// Get the resource this event concerns
    fn resource_id(&self) -> &str;

    /// Get the actor that caused the event
    fn actor_id(&self) -> &str;

    /// Get the timestamp when this event occurred
    fn timestamp(&self) -> DateTime<Utc>;

    /// Get optional event data as JSON
    fn data(&self) -> Option<&serde_json::Value>;
}

/// Publisher trait for emitting domain events
#[async_trait]
pub trait EventPublisher: Send + Sync + std::fmt::Debug {
    /// Publish a domain event
    async fn publish(&self, event: &dyn DomainEvent) -> Result<()>;

    /// Publish multiple events in order
    async fn publish_all(&self, events: &[&dyn DomainEvent]) -> Result<()> {
        for event in events {
            self.publish(*event).await?;
        }
        Ok(())
    }
}

/// A stored event record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Unique event ID
    pub id: Uuid,
    /// Resource this event concerns
    pub resource_id: String,
    /// Actor that caused the event
    pub actor_id: String,
    /// Event type string
    pub event_type: String,
    /// Event data as JSON
    pub data: Option<serde_json::Value>,
    /// When the event was created
    pub created_at: DateTime<Utc>,
}

impl StoredEvent {
    /// Create from a domain event
    pub fn from_event(event: &dyn DomainEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            resource_id: event.resource_id().to_string(),
            actor_id: event.actor_id().to_string(),
            event_type: event.event_type().to_string(),
            data: event.data().cloned(),
            created_at: event.timestamp(),
        }
    }
}

impl DomainEvent for StoredEvent {
    fn event_type(&self) -> &str {
        &self.event_type
    }

    fn resource_id(&self) -> &str {
        &self.resource_id
    }

    fn actor_id(&self) -> &str {
        &self.actor_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn data(&self) -> Option<&serde_json::Value> {
        self.data.as_ref()
    }
}

/// Publisher that drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

#[async_trait]
impl EventPublisher for NoopPublisher {
    async fn publish(&self, _event: &dyn DomainEvent) -> Result<()> {
        Ok(())
    }
}

/// A simple in-memory event store for recording events
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    events: RwLock<Vec<StoredEvent>>,
}

impl InMemoryEventStore {
    /// Create a new in-memory event store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an event
    pub fn store(&self, event: StoredEvent) {
        self.events
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }

    /// Get events for a resource
    pub fn events_for(&self, resource_id: &str) -> Vec<StoredEvent> {
        self.events
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| e.resource_id == resource_id)
            .cloned()
            .collect()
    }

    /// Get all events
    pub fn all_events(&self) -> Vec<StoredEvent> {
        self.events.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Get events by type
    pub fn events_by_type(&self, event_type: &str) -> Vec<StoredEvent> {
        self.events
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    /// Clear all events
    pub fn clear(&self) {
        self.events.write().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventStore {
    async fn publish(&self, event: &dyn DomainEvent) -> Result<()> {
        self.store(StoredEvent::from_event(event));
        Ok(())
    }
}

/// Fan-out publisher backed by a tokio broadcast channel
///
/// Every subscriber receives every event published after it subscribed.
/// Slow subscribers lag and miss events rather than blocking publishers.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    tx: broadcast::Sender<StoredEvent>,
}

impl BroadcastPublisher {
    /// Create a publisher buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to future events
    pub fn subscribe(&self) -> broadcast::Receiver<StoredEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EventPublisher for BroadcastPublisher {
    async fn publish(&self, event: &dyn DomainEvent) -> Result<()> {
        // No subscribers is not an error: nobody is watching this resource.
        let _ = self.tx.send(StoredEvent::from_event(event));
        Ok(())
    }
}
