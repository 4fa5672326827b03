//! Handler registration.
//!
//! Handlers are collected by [`HandlerRegistryBuilder`] and frozen into a
//! [`HandlerRegistry`] before the engine is constructed. Each registration keeps
//! its concrete handler type behind a small type-erased source, so the engine
//! itself never needs to know item types.

use std::any::type_name;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::queue::{PendingItem, ProcessFn};
use super::{EngineError, HandlerError, HandlerInfo, Purpose, WorkHandler, WorkItem};

/// Fetch side of a registration with the handler type erased.
#[async_trait]
pub(crate) trait ErasedSource: Send + Sync {
    async fn fetch(
        &self,
        max_items: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<PendingItem>, HandlerError>;
}

struct TypedSource<H, F> {
    factory: Arc<F>,
    _handler: PhantomData<fn() -> H>,
}

#[async_trait]
impl<H, F> ErasedSource for TypedSource<H, F>
where
    H: WorkHandler,
    F: Fn() -> Result<H, HandlerError> + Send + Sync + 'static,
{
    async fn fetch(
        &self,
        max_items: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<PendingItem>, HandlerError> {
        let handler = (self.factory.as_ref())()?;
        let items = handler.fetch_work_items(max_items, cancel).await?;

        Ok(items
            .into_iter()
            .map(|item| {
                let id = item.id();
                let factory = Arc::clone(&self.factory);
                let run: ProcessFn = Box::new(move |cancel: CancellationToken| {
                    async move {
                        let handler = (factory.as_ref())()?;
                        handler.process(item, &cancel).await
                    }
                    .boxed()
                });
                PendingItem { id, run }
            })
            .collect())
    }
}

#[derive(Clone)]
pub(crate) struct RegisteredHandler {
    pub info: HandlerInfo,
    pub name: Arc<str>,
    pub source: Arc<dyn ErasedSource>,
}

/// Collects handler registrations.
#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: Vec<RegisteredHandler>,
}

impl std::fmt::Debug for HandlerRegistryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistryBuilder")
            .field(
                "handlers",
                &self.handlers.iter().map(|h| &h.info).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl HandlerRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `name`.
    ///
    /// `factory` is called once per fetch and once per processed item; every
    /// call must produce an independent instance. Registering a name again
    /// replaces the earlier registration.
    pub fn register<H, F>(
        &mut self,
        name: impl Into<String>,
        max_items_per_cycle: usize,
        purpose: Purpose,
        factory: F,
    ) -> &mut Self
    where
        H: WorkHandler,
        F: Fn() -> Result<H, HandlerError> + Send + Sync + 'static,
    {
        let entry = Self::entry(name.into(), max_items_per_cycle, purpose, factory);
        match self.position(&entry.info.name) {
            Some(idx) => {
                warn!(
                    handler = %entry.info.name,
                    "Handler registered twice, replacing earlier registration"
                );
                self.handlers[idx] = entry;
            }
            None => self.handlers.push(entry),
        }
        self
    }

    /// Register a handler, failing if the name is already taken.
    pub fn try_register<H, F>(
        &mut self,
        name: impl Into<String>,
        max_items_per_cycle: usize,
        purpose: Purpose,
        factory: F,
    ) -> Result<&mut Self, EngineError>
    where
        H: WorkHandler,
        F: Fn() -> Result<H, HandlerError> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.position(&name).is_some() {
            return Err(EngineError::DuplicateRegistration(name));
        }
        self.handlers
            .push(Self::entry(name, max_items_per_cycle, purpose, factory));
        Ok(self)
    }

    /// Freeze the registrations.
    pub fn build(self) -> Result<HandlerRegistry, EngineError> {
        if let Some(bad) = self
            .handlers
            .iter()
            .find(|h| h.info.max_items_per_cycle == 0)
        {
            return Err(EngineError::InvalidMaxItems(bad.info.name.clone()));
        }
        Ok(HandlerRegistry {
            handlers: self.handlers,
        })
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.handlers.iter().position(|h| h.info.name == name)
    }

    fn entry<H, F>(
        name: String,
        max_items_per_cycle: usize,
        purpose: Purpose,
        factory: F,
    ) -> RegisteredHandler
    where
        H: WorkHandler,
        F: Fn() -> Result<H, HandlerError> + Send + Sync + 'static,
    {
        RegisteredHandler {
            name: Arc::from(name.as_str()),
            info: HandlerInfo {
                name,
                item_type: type_name::<H::Item>().to_string(),
                max_items_per_cycle,
                purpose,
            },
            source: Arc::new(TypedSource {
                factory: Arc::new(factory),
                _handler: PhantomData::<fn() -> H>,
            }),
        }
    }
}

/// Immutable set of registered handlers, in registration order.
pub struct HandlerRegistry {
    handlers: Vec<RegisteredHandler>,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::new()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Sum of per-cycle limits; the queue capacity of one cycle.
    pub fn total_capacity(&self) -> usize {
        self.handlers
            .iter()
            .map(|h| h.info.max_items_per_cycle)
            .sum()
    }

    pub fn get(&self, name: &str) -> Option<&HandlerInfo> {
        self.handlers
            .iter()
            .find(|h| h.info.name == name)
            .map(|h| &h.info)
    }

    pub fn infos(&self) -> Vec<HandlerInfo> {
        self.handlers.iter().map(|h| h.info.clone()).collect()
    }

    pub(crate) fn entries(&self) -> &[RegisteredHandler] {
        &self.handlers
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.handlers.iter().map(|h| &h.info))
            .finish()
    }
}
