use crate::error::{ConnectorError, ConnectorResult};
use crate::lifecycle::{
    Connectable, Lifecycle, LifecyclePhase, LifecycleState, activate, passivate, teardown,
};
use ahash::AHashMap;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::{self, Debug};
use std::hash::Hash;
use std::ops::Deref;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What `borrow_object` does when a key already has `max_active_per_key`
/// instances out.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolExhaustedAction {
    /// Create another instance anyway.
    Grow,
    /// Fail with `PoolExhausted`.
    Fail,
    /// Wait for a return, up to `max_wait_ms` (forever when unset).
    #[default]
    Block,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Cap on borrowed instances per key; `None` means unbounded, unless
    /// the owner derives it from a threading profile.
    pub max_active_per_key: Option<usize>,
    pub when_exhausted: PoolExhaustedAction,
    pub max_wait_ms: Option<u64>,
}

impl PoolConfig {
    #[inline]
    pub fn max_wait(&self) -> Option<Duration> {
        self.max_wait_ms.map(Duration::from_millis)
    }

    pub fn with_max_active_per_key(mut self, max: usize) -> Self {
        self.max_active_per_key = Some(max.max(1));
        self
    }

    pub fn with_when_exhausted(mut self, action: PoolExhaustedAction) -> Self {
        self.when_exhausted = action;
        self
    }

    pub fn with_max_wait(mut self, wait: Duration) -> Self {
        self.max_wait_ms = Some(wait.as_millis() as u64);
        self
    }
}

pub type PoolFactory<K, T> = dyn Fn(&K) -> ConnectorResult<T> + Send + Sync;

struct KeyEntry<T> {
    // unique per entry; a cleared and recreated key gets a new one
    epoch: u64,
    idle: VecDeque<Arc<T>>,
    active: Vec<Arc<T>>,
    creating: usize,
}

impl<T> KeyEntry<T> {
    fn new(epoch: u64) -> Self {
        Self {
            epoch,
            idle: VecDeque::new(),
            active: Vec::new(),
            creating: 0,
        }
    }

    fn take_active(&mut self, obj: &Arc<T>) -> Option<Arc<T>> {
        let pos = self.active.iter().position(|o| Arc::ptr_eq(o, obj))?;
        Some(self.active.swap_remove(pos))
    }

    fn is_empty(&self) -> bool {
        self.idle.is_empty() && self.active.is_empty() && self.creating == 0
    }
}

struct Inner<K, T> {
    entries: AHashMap<K, KeyEntry<T>>,
    next_epoch: u64,
}

impl<K: Eq + Hash + Clone, T> Inner<K, T> {
    fn entry(&mut self, key: &K) -> &mut KeyEntry<T> {
        let next_epoch = &mut self.next_epoch;
        self.entries.entry(key.clone()).or_insert_with(|| {
            *next_epoch += 1;
            KeyEntry::new(*next_epoch)
        })
    }

    fn prune(&mut self, key: &K) {
        if self.entries.get(key).is_some_and(KeyEntry::is_empty) {
            self.entries.remove(key);
        }
    }
}

/// Pool of [`Connectable`] instances keyed by endpoint.
///
/// New instances are initialised on creation and, while the owner is
/// started, connected and started before being handed out. Returning an
/// instance never runs lifecycle methods. Instance creation runs outside
/// the pool lock so borrowers on other keys are never held up by a slow
/// factory.
pub struct KeyedPool<K, T> {
    name: String,
    config: PoolConfig,
    owner: Arc<LifecycleState>,
    factory: Box<PoolFactory<K, T>>,
    inner: Mutex<Inner<K, T>>,
    returned: Condvar,
}

impl<K, T> KeyedPool<K, T>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    T: Connectable + 'static,
{
    pub fn new<F>(
        name: impl Into<String>,
        config: PoolConfig,
        owner: Arc<LifecycleState>,
        factory: F,
    ) -> Self
    where
        F: Fn(&K) -> ConnectorResult<T> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            config,
            owner,
            factory: Box::new(factory),
            inner: Mutex::new(Inner {
                entries: AHashMap::new(),
                next_epoch: 0,
            }),
            returned: Condvar::new(),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn borrow_object(&self, key: &K) -> ConnectorResult<Arc<T>> {
        let deadline = self.config.max_wait().map(|w| Instant::now() + w);
        let mut inner = self.inner.lock();

        loop {
            let entry = inner.entry(key);
            if let Some(obj) = entry.idle.pop_front() {
                entry.active.push(obj.clone());
                drop(inner);
                tracing::debug!("[Pool:{}] reusing idle instance for {:?}", self.name, key);
                return self.reactivate(key, obj);
            }

            let out = entry.active.len() + entry.creating;
            let Some(max) = self.config.max_active_per_key else {
                break;
            };
            if out < max {
                break;
            }
            match self.config.when_exhausted {
                PoolExhaustedAction::Grow => break,
                PoolExhaustedAction::Fail => return Err(self.exhausted(key, max)),
                PoolExhaustedAction::Block => match deadline {
                    Some(deadline) => {
                        if self.returned.wait_until(&mut inner, deadline).timed_out() {
                            return Err(self.exhausted(key, max));
                        }
                    }
                    None => self.returned.wait(&mut inner),
                },
            }
        }

        let entry = inner.entry(key);
        entry.creating += 1;
        let epoch = entry.epoch;
        drop(inner);

        let created = self.create(key);

        // A clear of this key while creating drops the entry, and the new
        // instance stays untracked until it comes back.
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.get_mut(key)
            && entry.epoch == epoch
        {
            entry.creating -= 1;
            if let Ok(obj) = &created {
                entry.active.push(obj.clone());
            }
        }
        if created.is_err() {
            inner.prune(key);
            drop(inner);
            self.returned.notify_one();
        }
        created
    }

    /// Give `obj` back to the pool. Instances the pool no longer tracks
    /// (cleared while borrowed) and disposed ones are torn down instead.
    pub fn return_object(&self, key: &K, obj: Arc<T>) {
        let mut inner = self.inner.lock();
        let tracked = inner
            .entries
            .get_mut(key)
            .and_then(|entry| entry.take_active(&obj));

        match tracked {
            Some(obj) if !obj.is_disposed() => {
                if let Some(entry) = inner.entries.get_mut(key) {
                    entry.idle.push_back(obj);
                }
                drop(inner);
                self.returned.notify_one();
            }
            _ => {
                inner.prune(key);
                drop(inner);
                self.returned.notify_one();
                tracing::debug!("[Pool:{}] discarding returned instance for {:?}", self.name, key);
                teardown(&*obj);
            }
        }
    }

    /// Remove a borrowed instance for good, e.g. after it lost its connection.
    pub fn invalidate_object(&self, key: &K, obj: Arc<T>) {
        {
            let mut inner = self.inner.lock();
            if let Some(entry) = inner.entries.get_mut(key) {
                entry.take_active(&obj);
            }
            inner.prune(key);
        }
        self.returned.notify_one();
        tracing::debug!("[Pool:{}] invalidated instance for {:?}", self.name, key);
        teardown(&*obj);
    }

    /// Borrow with a guard that returns the instance when dropped.
    pub fn borrow(self: &Arc<Self>, key: &K) -> ConnectorResult<PooledObject<K, T>> {
        let obj = self.borrow_object(key)?;
        Ok(PooledObject {
            pool: self.clone(),
            key: key.clone(),
            obj,
            released: false,
        })
    }

    /// Drop every instance. Idle ones are torn down now; borrowed ones are
    /// detached and torn down when they come back.
    pub fn clear(&self) {
        let entries = {
            let mut inner = self.inner.lock();
            std::mem::take(&mut inner.entries)
        };
        self.returned.notify_all();

        let mut disposed = 0;
        for (_, entry) in entries {
            for obj in entry.idle {
                teardown(&*obj);
                disposed += 1;
            }
        }
        if disposed > 0 {
            tracing::debug!("[Pool:{}] cleared, disposed {} idle instance(s)", self.name, disposed);
        }
    }

    /// [`clear`](Self::clear) restricted to one key.
    pub fn clear_key(&self, key: &K) {
        let entry = {
            let mut inner = self.inner.lock();
            inner.entries.remove(key)
        };
        self.returned.notify_all();
        if let Some(entry) = entry {
            for obj in entry.idle {
                teardown(&*obj);
            }
        }
    }

    /// connect + start every tracked instance. All are attempted; the first
    /// error is returned.
    pub fn apply_start(&self) -> ConnectorResult<()> {
        let mut first_err = None;
        for obj in self.snapshot() {
            if let Err(err) = activate(&*obj) {
                tracing::warn!("[Pool:{}] failed to start pooled instance: {}", self.name, err);
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// stop + disconnect every tracked instance. All are attempted; the first
    /// error is returned.
    pub fn apply_stop(&self) -> ConnectorResult<()> {
        let mut first_err = None;
        for obj in self.snapshot() {
            if let Err(err) = passivate(&*obj) {
                tracing::warn!("[Pool:{}] failed to stop pooled instance: {}", self.name, err);
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    pub fn num_idle(&self) -> usize {
        self.inner.lock().entries.values().map(|e| e.idle.len()).sum()
    }

    pub fn num_active(&self) -> usize {
        self.inner.lock().entries.values().map(|e| e.active.len()).sum()
    }

    pub fn num_idle_for(&self, key: &K) -> usize {
        self.inner.lock().entries.get(key).map_or(0, |e| e.idle.len())
    }

    pub fn num_active_for(&self, key: &K) -> usize {
        self.inner.lock().entries.get(key).map_or(0, |e| e.active.len())
    }

    pub fn keys(&self) -> Vec<K> {
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|(_, e)| !e.is_empty())
            .map(|(k, _)| k.clone())
            .collect()
    }

    fn snapshot(&self) -> Vec<Arc<T>> {
        let inner = self.inner.lock();
        inner
            .entries
            .values()
            .flat_map(|e| e.idle.iter().chain(e.active.iter()).cloned())
            .collect()
    }

    fn create(&self, key: &K) -> ConnectorResult<Arc<T>> {
        let obj = (self.factory)(key)?;
        if let Err(err) = obj.initialise() {
            teardown(&obj);
            return Err(err);
        }
        if self.owner_live()
            && let Err(err) = activate(&obj)
        {
            teardown(&obj);
            return Err(err);
        }
        tracing::debug!("[Pool:{}] created instance for {:?}", self.name, key);
        Ok(Arc::new(obj))
    }

    /// Bring a reused idle instance in line with the owner's state.
    fn reactivate(&self, key: &K, obj: Arc<T>) -> ConnectorResult<Arc<T>> {
        if self.owner_live()
            && let Err(err) = activate(&*obj)
        {
            self.invalidate_object(key, obj);
            return Err(err);
        }
        Ok(obj)
    }

    // Stopping counts: executors drain their queues after the owner has
    // left Started and that work still needs started instances.
    fn owner_live(&self) -> bool {
        matches!(
            self.owner.phase(),
            LifecyclePhase::Started | LifecyclePhase::Stopping
        )
    }

    fn exhausted(&self, key: &K, max_active: usize) -> ConnectorError {
        ConnectorError::PoolExhausted {
            key: format!("{key:?}"),
            max_active,
        }
    }
}

impl<K, T> Debug for KeyedPool<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedPool")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish()
    }
}

/// Borrowed pool instance; returned to its pool when dropped.
pub struct PooledObject<K, T>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    T: Connectable + 'static,
{
    pool: Arc<KeyedPool<K, T>>,
    key: K,
    obj: Arc<T>,
    released: bool,
}

impl<K, T> PooledObject<K, T>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    T: Connectable + 'static,
{
    #[inline]
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Tear the instance down instead of returning it.
    pub fn invalidate(mut self) {
        self.released = true;
        self.pool.invalidate_object(&self.key, self.obj.clone());
    }
}

impl<K, T> Deref for PooledObject<K, T>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    T: Connectable + 'static,
{
    type Target = T;

    fn deref(&self) -> &T {
        &self.obj
    }
}

impl<K, T> Drop for PooledObject<K, T>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    T: Connectable + 'static,
{
    fn drop(&mut self) {
        if !self.released {
            self.pool.return_object(&self.key, self.obj.clone());
        }
    }
}
