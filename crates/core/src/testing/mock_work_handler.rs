//! Mock work handler for testing.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::engine::{HandlerError, WorkHandler, WorkItem};

/// Work item produced by [`MockWorkHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockItem {
    pub id: String,
}

impl WorkItem for MockItem {
    fn id(&self) -> String {
        self.id.clone()
    }
}

#[derive(Default)]
struct MockState {
    items: RwLock<Vec<MockItem>>,
    fetch_error: RwLock<Option<String>>,
    fetch_panics: RwLock<bool>,
    fetch_delay: RwLock<Option<Duration>>,
    process_delay: RwLock<Option<Duration>>,
    failing: RwLock<HashSet<String>>,
    panicking: RwLock<HashSet<String>>,
    processed: RwLock<Vec<String>>,
    fetch_limits: RwLock<Vec<usize>>,
    fetch_calls: AtomicUsize,
    instances: AtomicUsize,
}

/// Mock implementation of the WorkHandler trait.
///
/// Clones share state, so the instances built by [`MockWorkHandler::factory`]
/// all report into the same recorder:
/// - Fetch returns every configured item, ignoring the limit
/// - Fetch and individual items can be made to fail or panic
/// - Processed item ids and fetch limits are recorded for assertions
///
/// # Example
///
/// ```rust,ignore
/// use stockyard_core::engine::{HandlerRegistry, Purpose};
/// use stockyard_core::testing::MockWorkHandler;
///
/// let mock = MockWorkHandler::new();
/// mock.set_items(&["a", "b", "c"]).await;
/// mock.fail_item("b").await;
///
/// let mut builder = HandlerRegistry::builder();
/// builder.register("mock", 5, Purpose::Internal, mock.factory());
/// ```
#[derive(Clone, Default)]
pub struct MockWorkHandler {
    state: Arc<MockState>,
}

impl std::fmt::Debug for MockWorkHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockWorkHandler")
            .field("fetch_calls", &self.fetch_calls())
            .field("instances", &self.instances())
            .finish_non_exhaustive()
    }
}

impl MockWorkHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory handing out instances that share this mock's state.
    pub fn factory(
        &self,
    ) -> impl Fn() -> Result<MockWorkHandler, HandlerError> + Send + Sync + 'static {
        let mock = self.clone();
        move || {
            mock.state.instances.fetch_add(1, Ordering::SeqCst);
            Ok(mock.clone())
        }
    }

    pub async fn set_items(&self, ids: &[&str]) {
        *self.state.items.write().await = ids
            .iter()
            .map(|id| MockItem { id: id.to_string() })
            .collect();
    }

    pub async fn fail_fetch(&self, message: &str) {
        *self.state.fetch_error.write().await = Some(message.to_string());
    }

    pub async fn panic_on_fetch(&self) {
        *self.state.fetch_panics.write().await = true;
    }

    pub async fn set_fetch_delay(&self, delay: Duration) {
        *self.state.fetch_delay.write().await = Some(delay);
    }

    pub async fn set_process_delay(&self, delay: Duration) {
        *self.state.process_delay.write().await = Some(delay);
    }

    pub async fn fail_item(&self, id: &str) {
        self.state.failing.write().await.insert(id.to_string());
    }

    pub async fn panic_on_item(&self, id: &str) {
        self.state.panicking.write().await.insert(id.to_string());
    }

    /// Ids processed successfully, in completion order.
    pub async fn processed(&self) -> Vec<String> {
        self.state.processed.read().await.clone()
    }

    /// The `max_items` passed to each fetch.
    pub async fn fetch_limits(&self) -> Vec<usize> {
        self.state.fetch_limits.read().await.clone()
    }

    pub fn fetch_calls(&self) -> usize {
        self.state.fetch_calls.load(Ordering::SeqCst)
    }

    /// Instances built through the factory.
    pub fn instances(&self) -> usize {
        self.state.instances.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkHandler for MockWorkHandler {
    type Item = MockItem;

    async fn fetch_work_items(
        &self,
        max_items: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<MockItem>, HandlerError> {
        self.state.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.state.fetch_limits.write().await.push(max_items);

        let delay = *self.state.fetch_delay.read().await;
        if let Some(delay) = delay {
            tokio::select! {
                _ = cancel.cancelled() => return Err(HandlerError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        if *self.state.fetch_panics.read().await {
            panic!("mock fetch panic");
        }
        if let Some(message) = self.state.fetch_error.read().await.clone() {
            return Err(HandlerError::Other(message));
        }
        Ok(self.state.items.read().await.clone())
    }

    async fn process(&self, item: MockItem, cancel: &CancellationToken) -> Result<(), HandlerError> {
        let delay = *self.state.process_delay.read().await;
        if let Some(delay) = delay {
            tokio::select! {
                _ = cancel.cancelled() => return Err(HandlerError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        if self.state.panicking.read().await.contains(&item.id) {
            panic!("mock panic on item {}", item.id);
        }
        if self.state.failing.read().await.contains(&item.id) {
            return Err(HandlerError::Other(format!("mock failure on item {}", item.id)));
        }
        self.state.processed.write().await.push(item.id);
        Ok(())
    }
}
