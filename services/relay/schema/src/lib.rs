pub mod published_events;
pub mod received_events;
pub mod relay_locks;
