pub mod batcher;
pub mod direct;
pub mod ingest;
pub mod outbox;
pub mod predecessor;
pub mod processor;
pub mod publish;
pub mod registry;
pub mod scheduler;
pub mod sweeper;
