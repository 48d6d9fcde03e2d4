//! Object pools for pooled operations.
//!
//! One free list per concrete operation type, bounded by a maximum retained
//! size. Instances beyond the bound are dropped instead of retained.
//!
//! Returning clears the instance first, so a stale holder reads blank data
//! rather than a later operation's state. An instance that is still shared
//! at return is then discarded instead of recycled.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::diagnostics::is_verbose;
use crate::sync::atomics::AtomicCounter;
use crate::sync::mutex::Mutex;
use crate::ft_emit_detail;

/// A poolable operation.
pub trait PoolItem: Send + Sync + 'static {
    /// Clear operation-specific fields and reset the embedded core.
    fn reset(&self);
}

/// Free list for one operation type.
pub struct TaskPool<T> {
    /// Idle instances.
    free: Mutex<Vec<Arc<T>>>,

    /// Maximum idle instances retained.
    max_size: AtomicUsize,

    /// Rents served from the free list.
    hits: AtomicCounter,

    /// Rents that found the free list empty.
    misses: AtomicCounter,

    /// Instances accepted back.
    returned: AtomicCounter,

    /// Instances dropped at return (pool full or still shared).
    discarded: AtomicCounter,
}

impl<T: PoolItem> TaskPool<T> {
    /// Create an empty pool retaining at most `max_size` instances.
    pub fn new(max_size: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            max_size: AtomicUsize::new(max_size),
            hits: AtomicCounter::new(0),
            misses: AtomicCounter::new(0),
            returned: AtomicCounter::new(0),
            discarded: AtomicCounter::new(0),
        }
    }

    /// Pop an idle instance. `None` means the caller constructs a fresh one.
    pub fn try_rent(&self) -> Option<Arc<T>> {
        let item = self.free.lock().pop();
        match item {
            Some(_) => self.hits.increment(),
            None => self.misses.increment(),
        };
        item
    }

    /// Clear `item` and push it onto the free list.
    ///
    /// Returns false when the pool is full or `item` is still shared; the
    /// instance is then dropped.
    pub fn try_return(&self, item: Arc<T>) -> bool {
        item.reset();

        if Arc::strong_count(&item) != 1 {
            self.discarded.increment();
            if is_verbose() {
                ft_emit_detail!(FT101, "{}", type_name::<T>());
            }
            return false;
        }

        let mut free = self.free.lock();
        if free.len() >= self.max_size.load(Ordering::Relaxed) {
            drop(free);
            self.discarded.increment();
            return false;
        }
        free.push(item);
        drop(free);

        self.returned.increment();
        true
    }

    /// Idle instances right now.
    pub fn size(&self) -> usize {
        self.free.lock().len()
    }

    /// Maximum idle instances retained.
    pub fn max_size(&self) -> usize {
        self.max_size.load(Ordering::Relaxed)
    }

    /// Change the bound, dropping idle instances above it.
    pub fn set_max_size(&self, max_size: usize) {
        self.max_size.store(max_size, Ordering::Relaxed);
        let excess = {
            let mut free = self.free.lock();
            let keep = free.len().min(max_size);
            free.split_off(keep)
        };
        drop(excess);
    }

    /// Drop every idle instance.
    pub fn clear(&self) {
        let idle = std::mem::take(&mut *self.free.lock());
        drop(idle);
    }

    /// Snapshot of this pool.
    pub fn snapshot(&self) -> PoolSize {
        PoolSize {
            type_name: type_name::<T>(),
            size: self.size(),
            max_size: self.max_size(),
            hits: self.hits.get(),
            misses: self.misses.get(),
            returned: self.returned.get(),
            discarded: self.discarded.get(),
        }
    }
}

/// Retained count and counters for one pooled type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSize {
    /// Operation type name.
    pub type_name: &'static str,
    /// Idle instances.
    pub size: usize,
    /// Retention bound.
    pub max_size: usize,
    /// Rents served from the free list.
    pub hits: u64,
    /// Rents that constructed a fresh instance.
    pub misses: u64,
    /// Instances accepted back.
    pub returned: u64,
    /// Instances dropped at return.
    pub discarded: u64,
}

/// Type-erased view of a pool for introspection.
trait PoolIntrospect: Send + Sync {
    fn snapshot(&self) -> PoolSize;
    fn clear(&self);
}

impl<T: PoolItem> PoolIntrospect for TaskPool<T> {
    fn snapshot(&self) -> PoolSize {
        TaskPool::snapshot(self)
    }

    fn clear(&self) {
        TaskPool::clear(self)
    }
}

struct PoolEntry {
    pool: Arc<dyn Any + Send + Sync>,
    introspect: Arc<dyn PoolIntrospect>,
}

/// One pool per concrete operation type.
pub struct PoolRegistry {
    pools: Mutex<HashMap<TypeId, PoolEntry>>,
    default_max_size: AtomicUsize,
}

impl PoolRegistry {
    /// Create a registry whose pools start with `default_max_size`.
    pub fn new(default_max_size: usize) -> Self {
        Self {
            pools: Mutex::new(HashMap::new()),
            default_max_size: AtomicUsize::new(default_max_size),
        }
    }

    /// The pool for `T`, created on first use.
    pub fn pool<T: PoolItem>(&self) -> Arc<TaskPool<T>> {
        let mut pools = self.pools.lock();
        if let Some(entry) = pools.get(&TypeId::of::<T>()) {
            if let Ok(pool) = entry.pool.clone().downcast::<TaskPool<T>>() {
                return pool;
            }
            ft_emit_detail!(FT901, "pool registry entry has the wrong type for {}", type_name::<T>());
        }

        let pool = Arc::new(TaskPool::<T>::new(
            self.default_max_size.load(Ordering::Relaxed),
        ));
        pools.insert(
            TypeId::of::<T>(),
            PoolEntry {
                pool: pool.clone(),
                introspect: pool.clone(),
            },
        );
        pool
    }

    /// Set the bound for `T`'s pool.
    pub fn set_max_size<T: PoolItem>(&self, max_size: usize) {
        self.pool::<T>().set_max_size(max_size);
    }

    /// Bound used for pools created from now on.
    pub fn default_max_size(&self) -> usize {
        self.default_max_size.load(Ordering::Relaxed)
    }

    /// Per-type snapshots, sorted by type name.
    pub fn sizes(&self) -> Vec<PoolSize> {
        let introspect: Vec<_> = self
            .pools
            .lock()
            .values()
            .map(|entry| entry.introspect.clone())
            .collect();
        let mut sizes: Vec<_> = introspect.iter().map(|pool| pool.snapshot()).collect();
        sizes.sort_by(|a, b| a.type_name.cmp(b.type_name));
        sizes
    }

    /// Idle instances across all pools.
    pub fn total_size(&self) -> usize {
        self.sizes().iter().map(|s| s.size).sum()
    }

    /// Drop idle instances in every pool.
    pub fn clear(&self) {
        let introspect: Vec<_> = self
            .pools
            .lock()
            .values()
            .map(|entry| entry.introspect.clone())
            .collect();
        for pool in introspect {
            pool.clear();
        }
    }
}

impl Default for PoolRegistry {
    fn default() -> Self {
        Self::new(crate::api::config::DEFAULT_MAX_POOL_SIZE)
    }
}
