use std::sync::Arc;
use std::time::Duration;

use relay_core::time::Clock;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::domain::repository::{BrokerConsumer, EventStore};
use crate::usecase::ingest::Ingestor;
use crate::usecase::scheduler::{Job, run_worker};

/// Owns every relay loop of one process and the token that stops them.
pub struct RelayRuntime {
    tasks: JoinSet<()>,
    cancel: CancellationToken,
}

impl Default for RelayRuntime {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}

impl RelayRuntime {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            tasks: JoinSet::new(),
            cancel,
        }
    }

    /// Spawn `workers` independent polling loops for `job`.
    pub fn spawn_job<J: Job>(&mut self, job: J, workers: usize, interval: Duration) {
        let job = Arc::new(job);
        for worker in 0..workers {
            self.tasks.spawn(run_worker(
                Arc::clone(&job),
                worker,
                interval,
                self.cancel.child_token(),
            ));
        }
    }

    pub fn spawn_ingest<C, S, K>(&mut self, ingestor: Ingestor<C, S, K>)
    where
        C: BrokerConsumer + 'static,
        S: EventStore + 'static,
        K: Clock + 'static,
    {
        self.tasks.spawn(ingestor.run(self.cancel.child_token()));
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Stop claiming. Loops finish the iteration they are in.
    pub fn shutdown(&self) {
        info!(loops = self.tasks.len(), "relay shutting down");
        self.cancel.cancel();
    }

    /// Wait for every loop to exit.
    pub async fn join(mut self) {
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "relay loop aborted");
            }
        }
    }
}
