use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use tokio::sync::OnceCell;

use super::{BackendError, Engine, EngineFactory, EngineKey, InitReporter};

type EngineCell = Arc<OnceCell<Arc<dyn Engine>>>;

/// Initialized engines for one evaluation session.
///
/// Entries are created lazily and never evicted. Concurrent requests for the
/// same key share a single initialization; a failed initialization leaves the
/// key empty so the next request retries it.
pub struct EngineCache {
    factory: Arc<dyn EngineFactory>,
    cells: Mutex<HashMap<EngineKey, EngineCell>>,
}

impl EngineCache {
    pub fn new(factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            factory,
            cells: Mutex::new(HashMap::new()),
        }
    }

    /// Return the engine for `key`, initializing it on first use.
    pub async fn get_or_init(
        &self,
        key: &EngineKey,
        progress: &InitReporter,
    ) -> Result<Arc<dyn Engine>, BackendError> {
        let cell = self.cell(key);
        let engine = cell
            .get_or_try_init(|| async {
                let started = Instant::now();
                tracing::info!(
                    model = %key.model,
                    temperature = key.temperature(),
                    branch = %key.branch,
                    "initializing engine"
                );
                let engine = self.factory.initialize(key, progress).await?;
                tracing::info!(
                    model = %key.model,
                    branch = %key.branch,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "engine ready"
                );
                Ok::<_, BackendError>(engine)
            })
            .await?;
        Ok(engine.clone())
    }

    /// Number of keys with an initialized engine.
    pub fn len(&self) -> usize {
        self.lock()
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &EngineKey) -> bool {
        self.lock()
            .get(key)
            .map(|cell| cell.initialized())
            .unwrap_or(false)
    }

    fn cell(&self, key: &EngineKey) -> EngineCell {
        self.lock().entry(key.clone()).or_default().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<EngineKey, EngineCell>> {
        self.cells.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::NoopObserver;
    use crate::testing::ScriptedFactory;
    use crate::types::BranchIndex;
    use std::time::Duration;

    fn reporter() -> InitReporter {
        InitReporter::new(Arc::new(NoopObserver), "m")
    }

    #[test]
    fn test_same_key_initializes_once() {
        tokio_test::block_on(async {
            let factory = Arc::new(ScriptedFactory::new());
            let cache = EngineCache::new(factory.clone());
            let key = EngineKey::new("m", 0.2, BranchIndex::NONE);

            let a = cache.get_or_init(&key, &reporter()).await.unwrap();
            let b = cache.get_or_init(&key, &reporter()).await.unwrap();

            assert!(Arc::ptr_eq(&a, &b));
            assert_eq!(factory.init_count(), 1);
            assert!(cache.contains(&key));
        });
    }

    #[test]
    fn test_different_temperature_initializes_again() {
        tokio_test::block_on(async {
            let factory = Arc::new(ScriptedFactory::new());
            let cache = EngineCache::new(factory.clone());

            cache
                .get_or_init(&EngineKey::new("m", 0.2, BranchIndex::NONE), &reporter())
                .await
                .unwrap();
            cache
                .get_or_init(&EngineKey::new("m", 0.9, BranchIndex::NONE), &reporter())
                .await
                .unwrap();

            assert_eq!(factory.init_count(), 2);
            assert_eq!(cache.len(), 2);
        });
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_initialization() {
        let factory = Arc::new(ScriptedFactory::new().with_init_delay(Duration::from_millis(30)));
        let cache = EngineCache::new(factory.clone());
        let key = EngineKey::new("m", 0.2, BranchIndex::new(0));
        let progress = reporter();

        let (a, b, c) = tokio::join!(
            cache.get_or_init(&key, &progress),
            cache.get_or_init(&key, &progress),
            cache.get_or_init(&key, &progress),
        );

        let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());
        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&b, &c));
        assert_eq!(factory.init_count(), 1);
    }

    #[test]
    fn test_failed_initialization_is_retried() {
        tokio_test::block_on(async {
            let factory = Arc::new(ScriptedFactory::new().failing_init("broken"));
            let cache = EngineCache::new(factory.clone());
            let key = EngineKey::new("broken", 0.2, BranchIndex::NONE);

            assert!(cache.get_or_init(&key, &reporter()).await.is_err());
            assert!(cache.get_or_init(&key, &reporter()).await.is_err());

            assert_eq!(factory.init_count(), 2);
            assert!(cache.is_empty());
        });
    }
}
