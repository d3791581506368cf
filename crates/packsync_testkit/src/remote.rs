//! Remote store wrappers that change timing, not behavior.

use async_trait::async_trait;
use packsync_model::{Metadata, Record};
use packsync_storage::{InMemoryRemoteStore, RemoteFeed, RemoteStore, StorageResult};
use std::time::Duration;

/// Suspends the caller before and after every async remote call.
///
/// With the in-memory hub a write reaches every open feed, the writer's
/// own included, before `save` returns. The pauses give the feed task a
/// chance to run inside the write, the way it does against a network
/// remote.
#[derive(Debug)]
pub struct PausingRemote<R = InMemoryRemoteStore> {
    inner: R,
    yields: usize,
    delay: Duration,
}

impl<R: RemoteStore> PausingRemote<R> {
    /// Wraps `inner`, yielding to the runtime around each call.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            yields: 8,
            delay: Duration::ZERO,
        }
    }

    /// Also sleeps for `delay` around each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Returns the wrapped store.
    pub fn inner(&self) -> &R {
        &self.inner
    }

    async fn pause(&self) {
        for _ in 0..self.yields {
            tokio::task::yield_now().await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[async_trait]
impl<R: RemoteStore> RemoteStore for PausingRemote<R> {
    async fn save(&self, records: &[Record]) -> StorageResult<()> {
        self.pause().await;
        let result = self.inner.save(records).await;
        self.pause().await;
        result
    }

    async fn load(&self) -> StorageResult<Vec<Record>> {
        self.pause().await;
        let result = self.inner.load().await;
        self.pause().await;
        result
    }

    async fn clear(&self) -> StorageResult<()> {
        self.pause().await;
        let result = self.inner.clear().await;
        self.pause().await;
        result
    }

    async fn metadata(&self) -> StorageResult<Option<Metadata>> {
        self.pause().await;
        let result = self.inner.metadata().await;
        self.pause().await;
        result
    }

    async fn has_data(&self) -> StorageResult<bool> {
        self.pause().await;
        self.inner.has_data().await
    }

    async fn size_bytes(&self) -> StorageResult<u64> {
        self.pause().await;
        self.inner.size_bytes().await
    }

    fn subscribe(&self) -> StorageResult<RemoteFeed> {
        self.inner.subscribe()
    }

    fn unsubscribe(&self) {
        self.inner.unsubscribe();
    }

    fn set_identity(&self, identity_id: Option<String>) {
        self.inner.set_identity(identity_id);
    }

    fn identity(&self) -> Option<String> {
        self.inner.identity()
    }
}
