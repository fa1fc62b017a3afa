//! Event Bus System
//!
//! Provides a small, type-safe event bus with:
//! - Subscription lifecycle management (subscribe/unsubscribe)
//! - Per-subscription filters
//! - One-shot subscriptions that remove themselves after the first event
//! - Channel subscriptions for async consumers
//! - Delivery statistics

pub mod core;
pub mod update_bus;

pub use crate::core::{EventBus, EventBusContainer, EventBusStats, SubscriptionId};
pub use update_bus::UpdateEventBusContainer;
