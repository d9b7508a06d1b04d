use crate::error::EngineError;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::registry::SessionKey;

/// Bounded-cache behaviour knobs. `max_entries == 0` disables the capacity
/// bound, `idle_timeout == 0` disables expiry, `enabled == false` bypasses
/// caching entirely (every call hits the factory).
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub enabled: bool,
    pub max_entries: usize,
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 8,
            idle_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

struct CacheEntry<S> {
    session: S,
    last_access: Instant,
}

struct PoolInner<S> {
    cache: HashMap<SessionKey, CacheEntry<S>>,
    // Front = most recently used. Promotion moves a key back to the front.
    lru_order: VecDeque<SessionKey>,
    stats: PoolStats,
}

/// Bounded, LRU + idle-timeout keyed cache over shared session handles.
///
/// The pool is the sole authority over loading and eviction: a miss runs the
/// supplied factory while holding the lock, so at most one load per key can
/// be in flight.
pub struct SessionPool<S: Clone> {
    config: PoolConfig,
    inner: Mutex<PoolInner<S>>,
}

impl<S: Clone> SessionPool<S> {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(PoolInner {
                cache: HashMap::new(),
                lru_order: VecDeque::new(),
                stats: PoolStats::default(),
            }),
        }
    }

    pub fn get_or_create<F>(&self, key: &SessionKey, factory: F) -> Result<S, EngineError>
    where
        F: FnOnce() -> Result<S, EngineError>,
    {
        if !self.config.enabled {
            return factory();
        }

        let mut inner = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(entry) = inner.cache.get_mut(key) {
            entry.last_access = Instant::now();
            let session = entry.session.clone();
            inner.stats.hits += 1;
            Self::promote(&mut inner.lru_order, key);
            return Ok(session);
        }

        inner.stats.misses += 1;
        let session = factory()?;

        if self.config.max_entries > 0 && inner.cache.len() >= self.config.max_entries {
            Self::evict_lru(&mut inner);
        }

        inner.cache.insert(
            key.clone(),
            CacheEntry {
                session: session.clone(),
                last_access: Instant::now(),
            },
        );
        inner.lru_order.push_front(key.clone());
        Ok(session)
    }

    pub fn evict(&self, key: &SessionKey) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if inner.cache.remove(key).is_some() {
            inner.lru_order.retain(|k| k != key);
            true
        } else {
            false
        }
    }

    /// Drop every entry idle for longer than the configured timeout and
    /// return how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        if self.config.idle_timeout.is_zero() {
            return 0;
        }
        let mut inner = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = Instant::now();
        let expired: Vec<SessionKey> = inner
            .cache
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.last_access) > self.config.idle_timeout)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            inner.cache.remove(key);
            inner.lru_order.retain(|k| k != key);
            inner.stats.expirations += 1;
        }
        expired.len()
    }

    /// Used for graceful shutdown: all handles are dropped so sessions
    /// release once borrowers finish.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        inner.cache.clear();
        inner.lru_order.clear();
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .cache
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> PoolStats {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .stats
    }

    fn promote(order: &mut VecDeque<SessionKey>, key: &SessionKey) {
        if order.front() == Some(key) {
            return;
        }
        order.retain(|k| k != key);
        order.push_front(key.clone());
    }

    fn evict_lru(inner: &mut PoolInner<S>) {
        if let Some(oldest) = inner.lru_order.pop_back() {
            inner.cache.remove(&oldest);
            inner.stats.evictions += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infer::session::SessionOptions;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    fn key(name: &str) -> SessionKey {
        SessionKey::new(Path::new(name), &SessionOptions::cpu())
    }

    fn pool(max_entries: usize) -> SessionPool<String> {
        SessionPool::new(PoolConfig {
            enabled: true,
            max_entries,
            idle_timeout: Duration::ZERO,
        })
    }

    #[test]
    fn second_lookup_hits_the_cache() {
        let pool = pool(4);
        let k = key("a.onnx");
        pool.get_or_create(&k, || Ok("a".to_string())).unwrap();
        let value = pool
            .get_or_create(&k, || panic!("factory must not rerun"))
            .unwrap();
        assert_eq!(value, "a");
        assert_eq!(pool.stats().hits, 1);
        assert_eq!(pool.stats().misses, 1);
    }

    #[test]
    fn eviction_is_deterministically_lru() {
        let pool = pool(2);
        let (a, b, c) = (key("a.onnx"), key("b.onnx"), key("c.onnx"));
        pool.get_or_create(&a, || Ok("a".into())).unwrap();
        pool.get_or_create(&b, || Ok("b".into())).unwrap();
        // Touch `a` so `b` becomes the LRU entry.
        pool.get_or_create(&a, || panic!("cached")).unwrap();
        pool.get_or_create(&c, || Ok("c".into())).unwrap();

        assert_eq!(pool.len(), 2);
        assert_eq!(pool.stats().evictions, 1);
        // `b` was evicted: requesting it again re-runs the factory.
        let mut rebuilt = false;
        pool.get_or_create(&b, || {
            rebuilt = true;
            Ok("b2".into())
        })
        .unwrap();
        assert!(rebuilt);
        // `a` survived.
        pool.get_or_create(&a, || panic!("a must have survived")).unwrap();
    }

    #[test]
    fn disabled_pool_always_runs_the_factory() {
        let pool = SessionPool::new(PoolConfig {
            enabled: false,
            ..Default::default()
        });
        let k = key("a.onnx");
        let mut runs = 0;
        for _ in 0..3 {
            pool.get_or_create(&k, || {
                runs += 1;
                Ok::<_, EngineError>(runs)
            })
            .unwrap();
        }
        assert_eq!(runs, 3);
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn cleanup_expires_idle_entries() {
        let pool = SessionPool::new(PoolConfig {
            enabled: true,
            max_entries: 4,
            idle_timeout: Duration::from_nanos(1),
        });
        pool.get_or_create(&key("a.onnx"), || Ok("a".to_string())).unwrap();
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(pool.cleanup_expired(), 1);
        assert!(pool.is_empty());
        assert_eq!(pool.stats().expirations, 1);
    }

    #[test]
    fn clear_empties_the_pool() {
        let pool = pool(4);
        pool.get_or_create(&key("a.onnx"), || Ok("a".to_string())).unwrap();
        pool.get_or_create(&key("b.onnx"), || Ok("b".to_string())).unwrap();
        pool.clear();
        assert!(pool.is_empty());
    }
}
