//! Chain events: raw records, filters and the dispatcher.

/// Handler registry and background dispatch
pub mod dispatcher;
/// Event records and argument filters
pub mod record;

pub use dispatcher::{filter_at, ArgFilters, ChainEventDispatcher, EventCallback, SubscriptionId};
pub use record::{event_key, ArgFilter, ChainEvent, EventRecord};
