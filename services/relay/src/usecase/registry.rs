use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use relay_domain::event::ConsumableEvent;
use serde_json::Value;

use crate::error::RelayError;

/// Application handler for one consumable event type.
pub trait EventHandler<E: ConsumableEvent>: Send + Sync + 'static {
    fn handle(&self, event: E) -> impl Future<Output = anyhow::Result<()>> + Send;
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("failed to deserialize event body: {0}")]
    Deserialize(#[from] serde_json::Error),
    #[error("{0:#}")]
    Handler(anyhow::Error),
}

type DispatchFn = dyn Fn(Value) -> BoxFuture<'static, Result<(), DispatchError>> + Send + Sync;

/// Everything the processor needs to know about one registered event name.
pub struct HandlerEntry {
    pub event_name: &'static str,
    pub check_predecessor: bool,
    dispatch: Arc<DispatchFn>,
}

impl HandlerEntry {
    /// Deserialize `body` into the registered payload type and run the handler.
    pub fn dispatch(&self, body: Value) -> BoxFuture<'static, Result<(), DispatchError>> {
        (self.dispatch)(body)
    }
}

impl std::fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("event_name", &self.event_name)
            .field("check_predecessor", &self.check_predecessor)
            .finish_non_exhaustive()
    }
}

/// Immutable `event_name -> handler` map built once at startup.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, HandlerEntry>,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    pub fn lookup(&self, event_name: &str) -> Option<&HandlerEntry> {
        self.handlers.get(event_name)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct HandlerRegistryBuilder {
    handlers: HashMap<&'static str, HandlerEntry>,
}

impl HandlerRegistryBuilder {
    /// Registers `handler` for `E::EVENT_NAME`. A second registration for the same
    /// name is rejected.
    pub fn register<E, H>(mut self, handler: H) -> Result<Self, RelayError>
    where
        E: ConsumableEvent,
        H: EventHandler<E>,
    {
        if self.handlers.contains_key(E::EVENT_NAME) {
            return Err(RelayError::DuplicateHandler(E::EVENT_NAME.to_owned()));
        }
        let handler = Arc::new(handler);
        let dispatch: Arc<DispatchFn> = Arc::new(move |body: Value| {
            let handler = Arc::clone(&handler);
            async move {
                let event: E = serde_json::from_value(body)?;
                handler.handle(event).await.map_err(DispatchError::Handler)
            }
            .boxed()
        });
        self.handlers.insert(
            E::EVENT_NAME,
            HandlerEntry {
                event_name: E::EVENT_NAME,
                check_predecessor: E::CHECK_PREDECESSOR,
                dispatch,
            },
        );
        Ok(self)
    }

    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            handlers: self.handlers,
        }
    }
}
