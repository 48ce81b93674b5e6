//! Advisory per-document locks that survive crashed holders.
//!
//! A lock is a JSON record at `<document>.lock`. Acquisition hard-links a
//! staged candidate onto that path, which either succeeds atomically or
//! fails because another holder got there first. Leases carry an explicit
//! expiry that any party can check; a lock past `expires_at + steal_threshold`
//! may be replaced by a rename after re-verifying the observed generation.
//!
//! Holders that run long operations should poll
//! [`LockManager::release_requested`] and release early when asked, and
//! call [`LockManager::extend`] before their lease runs out.

use crate::config::LockConfig;
use crate::errors::{LockError, StoreError};
use crate::store::atomic::AtomicStore;
use crate::utils::{add_duration, now_utc, Timestamp};
use chrono::DateTime;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Holder recorded for lock files that cannot be parsed.
pub const UNKNOWN_HOLDER: &str = "<unknown>";

/// A lease on a single document path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLock {
    /// The locked document, resolved inside the store root.
    pub target: PathBuf,
    /// Holder id of the lease owner.
    pub holder: String,
    /// When this lease was created.
    pub acquired_at: Timestamp,
    /// When this lease stops being valid.
    pub expires_at: Timestamp,
    /// Incremented every time an expired lease is stolen.
    ///
    /// Fresh leases start again at 0, so a lease is identified by holder,
    /// generation and `acquired_at` together.
    pub generation: u64,
    /// Last successful [`LockManager::extend`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<Timestamp>,
}

impl FileLock {
    /// Returns true once the lease has run out.
    #[must_use]
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }

    /// Returns true once the lease is far enough past expiry to be stolen.
    #[must_use]
    pub fn is_stealable(&self, now: Timestamp, threshold: std::time::Duration) -> bool {
        now >= add_duration(self.expires_at, threshold)
    }

    fn is_same_lease(&self, other: &Self) -> bool {
        self.holder == other.holder
            && self.generation == other.generation
            && self.acquired_at == other.acquired_at
    }

    fn describe(&self) -> String {
        format!("{}@{}", self.holder, self.generation)
    }
}

/// A request from a contender asking the holder to let go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRequest {
    /// Holder id of the contender.
    pub requested_by: String,
    /// When the request was written.
    pub requested_at: Timestamp,
    /// Holder of the lease the request is aimed at.
    pub holder: String,
    /// Creation time of the lease the request is aimed at.
    pub acquired_at: Timestamp,
    /// Generation of the lease the request is aimed at.
    pub generation: u64,
}

impl ReleaseRequest {
    /// Returns true if the request targets exactly `lock`.
    #[must_use]
    pub fn targets(&self, lock: &FileLock) -> bool {
        self.holder == lock.holder
            && self.generation == lock.generation
            && self.acquired_at == lock.acquired_at
    }
}

/// What a path's lock file currently says.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockState {
    /// No lock file exists.
    Unlocked,
    /// A valid lease is held.
    Held(FileLock),
    /// A lease exists but has run out.
    Expired(FileLock),
}

enum Attempt {
    Acquired(FileLock),
    Held(FileLock),
    Vanished,
}

/// Acquires, renews and releases document locks for one holder id.
///
/// Cheap to clone into a differently-named holder with
/// [`LockManager::for_holder`]; the store and config are shared.
#[derive(Debug)]
pub struct LockManager {
    store: AtomicStore,
    holder: String,
    config: LockConfig,
    held: Mutex<HashMap<PathBuf, FileLock>>,
}

impl LockManager {
    /// Creates a lock manager acting as `holder`.
    #[must_use]
    pub fn new(store: AtomicStore, holder: impl Into<String>, config: LockConfig) -> Self {
        Self {
            store,
            holder: holder.into(),
            config,
            held: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a manager on the same store with a different holder id.
    #[must_use]
    pub fn for_holder(&self, holder: impl Into<String>) -> Self {
        Self::new(self.store.clone(), holder, self.config.clone())
    }

    /// Returns this manager's holder id.
    #[must_use]
    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Returns the lock configuration.
    #[must_use]
    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &AtomicStore {
        &self.store
    }

    /// Number of leases this manager believes it holds.
    #[must_use]
    pub fn held_count(&self) -> usize {
        self.held.lock().len()
    }

    /// Acquires the lock on `target`, retrying with backoff.
    ///
    /// Live leases are waited out. Leases past the steal threshold get a
    /// cooperative release request first (when enabled), then are stolen.
    /// Gives up with [`LockError::Contention`] once the retry budget is spent.
    pub async fn acquire(&self, target: impl AsRef<Path>) -> Result<FileLock, LockError> {
        let target = target.as_ref();
        let (resolved, lock_path) = self.paths(target)?;
        let attempts = self.config.retry.max_attempts();
        let mut asked: Option<(String, u64)> = None;

        for attempt in 0..attempts {
            match self.try_create(&resolved, &lock_path)? {
                Attempt::Acquired(lock) => {
                    debug!(path = %resolved.display(), holder = %self.holder, attempt, "Lock acquired");
                    return Ok(lock);
                }
                Attempt::Vanished => continue,
                Attempt::Held(existing) => {
                    let now = now_utc();
                    if existing.is_stealable(now, self.config.steal_threshold()) {
                        let key = (existing.holder.clone(), existing.generation);
                        if self.config.cooperative_release && asked.as_ref() != Some(&key) {
                            asked = Some(key);
                            if self.request_release_and_wait(&lock_path, &existing).await? {
                                continue;
                            }
                        }
                        if let Some(lock) = self.try_steal(&resolved, &lock_path, &existing)? {
                            return Ok(lock);
                        }
                        debug!(path = %resolved.display(), "Lost steal race, retrying");
                    } else {
                        debug!(
                            path = %resolved.display(),
                            holder = %existing.holder,
                            generation = existing.generation,
                            attempt,
                            "Lock contended"
                        );
                    }
                }
            }

            if attempt + 1 < attempts {
                tokio::time::sleep(self.config.retry.delay_for(attempt)).await;
            }
        }

        warn!(path = %resolved.display(), attempts, "Lock acquisition gave up");
        Err(LockError::Contention {
            path: target.to_path_buf(),
            attempts,
        })
    }

    /// Makes a single create-or-fail attempt without waiting or stealing.
    ///
    /// Returns `None` when the path is already locked.
    pub fn try_acquire(&self, target: impl AsRef<Path>) -> Result<Option<FileLock>, LockError> {
        let (resolved, lock_path) = self.paths(target.as_ref())?;
        match self.try_create(&resolved, &lock_path)? {
            Attempt::Acquired(lock) => Ok(Some(lock)),
            Attempt::Held(_) | Attempt::Vanished => Ok(None),
        }
    }

    /// Releases a lease held by this manager.
    ///
    /// A lock file that is already gone is not an error. A lock file that
    /// now holds any other lease, including an earlier or later lease of the
    /// same holder, fails with [`LockError::NotHolder`] and is left in place.
    pub fn release(&self, lock: &FileLock) -> Result<(), LockError> {
        let (resolved, lock_path) = self.paths(&lock.target)?;
        self.held.lock().remove(&lock_path);

        match self.read_lock(&resolved, &lock_path)? {
            None => {
                debug!(path = %resolved.display(), "Lock already released");
                Ok(())
            }
            Some(current) if current.is_same_lease(lock) => {
                self.retire(&resolved, &lock_path, lock)
            }
            Some(current) => Err(LockError::NotHolder {
                path: resolved,
                expected: lock.describe(),
                actual: current.describe(),
            }),
        }
    }

    /// Removes the lock file after re-checking it off the canonical path.
    ///
    /// The record is renamed aside first, so a steal committed after the
    /// ownership check is not deleted: it is moved back and reported as
    /// [`LockError::NotHolder`].
    fn retire(&self, resolved: &Path, lock_path: &Path, lock: &FileLock) -> Result<(), LockError> {
        let mut aside = lock_path.as_os_str().to_os_string();
        aside.push(format!(".releasing-{}", Uuid::new_v4().simple()));
        let aside = PathBuf::from(aside);

        if !self.store.rename(lock_path, &aside)? {
            debug!(path = %resolved.display(), "Lock already released");
            return Ok(());
        }

        match self.read_lock(resolved, &aside)? {
            Some(moved) if !moved.is_same_lease(lock) => {
                let restored = match self.store.read(&aside)? {
                    Some(bytes) => self.store.create_exclusive(lock_path, &bytes)?,
                    None => false,
                };
                self.store.delete(&aside)?;
                if !restored {
                    warn!(
                        path = %resolved.display(),
                        holder = %moved.holder,
                        "Could not restore lock moved during release"
                    );
                }
                Err(LockError::NotHolder {
                    path: resolved.to_path_buf(),
                    expected: lock.describe(),
                    actual: moved.describe(),
                })
            }
            _ => {
                self.store.delete(&aside)?;
                self.store.delete(release_path(lock_path))?;
                debug!(path = %resolved.display(), generation = lock.generation, "Lock released");
                Ok(())
            }
        }
    }

    /// Deletes the lock on `target` regardless of holder.
    ///
    /// Returns `false` when no lock existed.
    pub fn force_release(&self, target: impl AsRef<Path>) -> Result<bool, LockError> {
        let (resolved, lock_path) = self.paths(target.as_ref())?;
        self.held.lock().remove(&lock_path);
        let removed = self.store.delete(&lock_path)?;
        self.store.delete(release_path(&lock_path))?;
        if removed {
            warn!(path = %resolved.display(), "Lock force-released");
        }
        Ok(removed)
    }

    /// Renews a lease for another TTL and records a heartbeat.
    pub fn extend(&self, lock: &FileLock) -> Result<FileLock, LockError> {
        let (resolved, lock_path) = self.paths(&lock.target)?;

        let current = match self.read_lock(&resolved, &lock_path)? {
            Some(current) if current.is_same_lease(lock) => current,
            Some(current) => {
                return Err(LockError::NotHolder {
                    path: resolved,
                    expected: lock.describe(),
                    actual: current.describe(),
                })
            }
            None => {
                return Err(LockError::NotHolder {
                    path: resolved,
                    expected: lock.describe(),
                    actual: "nobody".to_string(),
                })
            }
        };

        let now = now_utc();
        let renewed = FileLock {
            expires_at: add_duration(now, self.config.ttl()),
            last_heartbeat: Some(now),
            ..current
        };
        self.store.write(&lock_path, &encode_lock(&lock_path, &renewed)?)?;
        self.held.lock().insert(lock_path, renewed.clone());
        Ok(renewed)
    }

    /// Returns true if a contender has asked this lease to be released.
    pub fn release_requested(&self, lock: &FileLock) -> Result<bool, LockError> {
        let (_, lock_path) = self.paths(&lock.target)?;
        let Some(content) = self.store.read(release_path(&lock_path))? else {
            return Ok(false);
        };
        Ok(serde_json::from_slice::<ReleaseRequest>(&content)
            .map(|request| request.targets(lock))
            .unwrap_or(false))
    }

    /// Reports the state of the lock on `target`.
    pub fn inspect(&self, target: impl AsRef<Path>) -> Result<LockState, LockError> {
        let (resolved, lock_path) = self.paths(target.as_ref())?;
        Ok(match self.read_lock(&resolved, &lock_path)? {
            None => LockState::Unlocked,
            Some(lock) if lock.is_expired(now_utc()) => LockState::Expired(lock),
            Some(lock) => LockState::Held(lock),
        })
    }

    /// Deletes the lock on `target` if its lease has run out.
    ///
    /// The record is re-read before deletion so a renewed or replaced lease
    /// survives. Returns true when a lock file was removed.
    pub fn cleanup_expired(&self, target: impl AsRef<Path>) -> Result<bool, LockError> {
        let (resolved, lock_path) = self.paths(target.as_ref())?;
        let Some(observed) = self.read_lock(&resolved, &lock_path)? else {
            return Ok(false);
        };
        if !observed.is_expired(now_utc()) {
            return Ok(false);
        }

        match self.read_lock(&resolved, &lock_path)? {
            Some(current) if current.is_same_lease(&observed) => {
                let removed = self.store.delete(&lock_path)?;
                self.store.delete(release_path(&lock_path))?;
                info!(
                    path = %resolved.display(),
                    holder = %observed.holder,
                    generation = observed.generation,
                    "Expired lock cleaned up"
                );
                Ok(removed)
            }
            _ => Ok(false),
        }
    }

    /// Releases every lease this manager still tracks.
    ///
    /// Returns the number released; leases that were lost to a steal are
    /// logged and dropped from the registry.
    pub fn release_all(&self) -> usize {
        let leases: Vec<FileLock> = self.held.lock().drain().map(|(_, lock)| lock).collect();
        let mut released = 0;
        for lock in leases {
            match self.release(&lock) {
                Ok(()) => released += 1,
                Err(e) => warn!(path = %lock.target.display(), error = %e, "Failed to release lock"),
            }
        }
        released
    }

    /// Runs `f` while holding the lock on `target`.
    ///
    /// The lock is released on every exit path: after `f` returns `Ok` or
    /// `Err`, and through a drop guard if the future is cancelled or panics.
    /// A release failure after a successful `f` is returned as the error.
    pub async fn with_lock<T, E, F, Fut>(&self, target: impl AsRef<Path>, f: F) -> Result<T, E>
    where
        F: FnOnce(FileLock) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<LockError>,
    {
        let lock = self.acquire(target).await?;
        let guard = LockGuard::new(self, lock.clone());
        let outcome = f(lock).await;

        match (outcome, guard.release()) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(release_err)) => Err(release_err.into()),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(release_err)) => {
                warn!(error = %release_err, "Lock release failed after operation error");
                Err(e)
            }
        }
    }

    fn paths(&self, target: &Path) -> Result<(PathBuf, PathBuf), StoreError> {
        let resolved = self.store.resolve(target)?;
        let mut lock_name = resolved.clone().into_os_string();
        lock_name.push(".lock");
        let lock_path = self.store.resolve(PathBuf::from(lock_name))?;
        Ok((resolved, lock_path))
    }

    fn candidate(&self, target: &Path, generation: u64) -> FileLock {
        let now = now_utc();
        FileLock {
            target: target.to_path_buf(),
            holder: self.holder.clone(),
            acquired_at: now,
            expires_at: add_duration(now, self.config.ttl()),
            generation,
            last_heartbeat: None,
        }
    }

    fn try_create(&self, target: &Path, lock_path: &Path) -> Result<Attempt, LockError> {
        let candidate = self.candidate(target, 0);
        let bytes = encode_lock(lock_path, &candidate)?;

        if self.store.create_exclusive(lock_path, &bytes)? {
            self.store.delete(release_path(lock_path))?;
            self.held
                .lock()
                .insert(lock_path.to_path_buf(), candidate.clone());
            return Ok(Attempt::Acquired(candidate));
        }

        Ok(match self.read_lock(target, lock_path)? {
            Some(existing) => Attempt::Held(existing),
            None => Attempt::Vanished,
        })
    }

    /// Replaces `observed` with a lease one generation newer.
    ///
    /// Returns `None` if someone else changed the record first.
    fn try_steal(
        &self,
        target: &Path,
        lock_path: &Path,
        observed: &FileLock,
    ) -> Result<Option<FileLock>, LockError> {
        let candidate = self.candidate(target, observed.generation.saturating_add(1));
        let prepared = self
            .store
            .prepare(lock_path, &encode_lock(lock_path, &candidate)?)?;

        match self.read_lock(target, lock_path)? {
            Some(current) if current.is_same_lease(observed) => {}
            _ => return Ok(None),
        }
        prepared.commit()?;

        match self.read_lock(target, lock_path)? {
            Some(current) if current.is_same_lease(&candidate) => {
                self.store.delete(release_path(lock_path))?;
                self.held
                    .lock()
                    .insert(lock_path.to_path_buf(), candidate.clone());
                warn!(
                    path = %target.display(),
                    previous_holder = %observed.holder,
                    generation = candidate.generation,
                    "Stole expired lock"
                );
                Ok(Some(candidate))
            }
            _ => Ok(None),
        }
    }

    /// Asks the holder of `existing` to release and waits for it to.
    ///
    /// Returns true if the lease went away or changed within the timeout.
    async fn request_release_and_wait(
        &self,
        lock_path: &Path,
        existing: &FileLock,
    ) -> Result<bool, LockError> {
        let request = ReleaseRequest {
            requested_by: self.holder.clone(),
            requested_at: now_utc(),
            holder: existing.holder.clone(),
            acquired_at: existing.acquired_at,
            generation: existing.generation,
        };
        let request_path = release_path(lock_path);
        let bytes = serde_json::to_vec_pretty(&request)
            .map_err(|e| StoreError::serialization(&request_path, e))?;
        self.store.write(&request_path, &bytes)?;
        debug!(
            path = %existing.target.display(),
            holder = %existing.holder,
            generation = existing.generation,
            "Requested cooperative release"
        );

        let deadline = tokio::time::Instant::now() + self.config.cooperative_timeout();
        loop {
            match self.read_lock(&existing.target, lock_path)? {
                Some(current) if current.is_same_lease(existing) => {}
                _ => {
                    info!(path = %existing.target.display(), "Holder released cooperatively");
                    return Ok(true);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                debug!(path = %existing.target.display(), "Cooperative release timed out");
                return Ok(false);
            }
            tokio::time::sleep(self.config.poll_interval()).await;
        }
    }

    /// Reads the lock record, synthesizing one for unparsable files.
    fn read_lock(&self, target: &Path, lock_path: &Path) -> Result<Option<FileLock>, StoreError> {
        let Some(content) = self.store.read(lock_path)? else {
            return Ok(None);
        };
        if let Ok(lock) = serde_json::from_slice::<FileLock>(&content) {
            return Ok(Some(lock));
        }

        let Some(modified) = self.store.modified(lock_path)? else {
            return Ok(None);
        };
        let acquired_at: Timestamp = DateTime::from(modified);
        warn!(path = %lock_path.display(), "Unreadable lock record, treating as generation 0");
        Ok(Some(FileLock {
            target: target.to_path_buf(),
            holder: UNKNOWN_HOLDER.to_string(),
            acquired_at,
            expires_at: add_duration(acquired_at, self.config.ttl()),
            generation: 0,
            last_heartbeat: None,
        }))
    }
}

/// Releases a lease when dropped unless released explicitly first.
#[derive(Debug)]
pub struct LockGuard<'a> {
    manager: &'a LockManager,
    lock: Option<FileLock>,
}

impl<'a> LockGuard<'a> {
    /// Wraps a lease held through `manager`.
    #[must_use]
    pub fn new(manager: &'a LockManager, lock: FileLock) -> Self {
        Self {
            manager,
            lock: Some(lock),
        }
    }

    /// Returns the guarded lease.
    #[must_use]
    pub fn lock(&self) -> Option<&FileLock> {
        self.lock.as_ref()
    }

    /// Releases the lease now and reports the outcome.
    pub fn release(mut self) -> Result<(), LockError> {
        match self.lock.take() {
            Some(lock) => self.manager.release(&lock),
            None => Ok(()),
        }
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Some(lock) = self.lock.take() {
            if let Err(e) = self.manager.release(&lock) {
                warn!(path = %lock.target.display(), error = %e, "Lock release on drop failed");
            }
        }
    }
}

fn release_path(lock_path: &Path) -> PathBuf {
    let mut name = lock_path.as_os_str().to_os_string();
    name.push(".release");
    PathBuf::from(name)
}

fn encode_lock(lock_path: &Path, lock: &FileLock) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec_pretty(lock).map_err(|e| StoreError::serialization(lock_path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{BackoffStrategy, JitterStrategy, RetryConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn fast_config() -> LockConfig {
        LockConfig {
            ttl_ms: 60_000,
            steal_threshold_ms: 0,
            cooperative_release: false,
            cooperative_timeout_ms: Some(0),
            poll_interval_ms: 5,
            retry: RetryConfig::new()
                .with_max_retries(3)
                .with_base_delay_ms(5)
                .with_max_delay_ms(20)
                .with_backoff(BackoffStrategy::Constant)
                .with_jitter(JitterStrategy::None),
        }
    }

    fn short_lease_config() -> LockConfig {
        LockConfig {
            ttl_ms: 10,
            ..fast_config()
        }
    }

    fn manager(config: LockConfig) -> (TempDir, LockManager) {
        let dir = TempDir::new().unwrap();
        let store = AtomicStore::open(dir.path()).unwrap();
        (dir, LockManager::new(store, "holder-a", config))
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let (_dir, locks) = manager(fast_config());

        let lock = locks.acquire("docs/prd.yaml").await.unwrap();
        assert_eq!(lock.holder, "holder-a");
        assert_eq!(lock.generation, 0);
        assert!(locks.store().exists("docs/prd.yaml.lock").unwrap());
        assert_eq!(locks.held_count(), 1);

        locks.release(&lock).unwrap();
        assert!(!locks.store().exists("docs/prd.yaml.lock").unwrap());
        assert_eq!(locks.held_count(), 0);
        assert_eq!(locks.inspect("docs/prd.yaml").unwrap(), LockState::Unlocked);
    }

    #[tokio::test]
    async fn test_release_of_missing_lock_is_ok() {
        let (_dir, locks) = manager(fast_config());
        let lock = locks.acquire("a.yaml").await.unwrap();
        assert!(locks.force_release("a.yaml").unwrap());

        locks.release(&lock).unwrap();
        assert!(!locks.force_release("a.yaml").unwrap());
    }

    #[tokio::test]
    async fn test_live_lock_causes_contention() {
        let (_dir, a) = manager(fast_config());
        let b = a.for_holder("holder-b");

        let _lock = a.acquire("a.yaml").await.unwrap();
        assert!(b.try_acquire("a.yaml").unwrap().is_none());

        let err = b.acquire("a.yaml").await.unwrap_err();
        match err {
            LockError::Contention { path, attempts } => {
                assert_eq!(path, PathBuf::from("a.yaml"));
                assert_eq!(attempts, 4);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_lock_path_escape_rejected() {
        let (_dir, locks) = manager(fast_config());
        let err = locks.acquire("../outside.yaml").await.unwrap_err();
        assert!(matches!(err, LockError::Store(StoreError::PathEscape { .. })));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_acquisition_is_mutually_exclusive() {
        let (_dir, base) = manager(LockConfig {
            retry: RetryConfig::new()
                .with_max_retries(200)
                .with_base_delay_ms(1)
                .with_max_delay_ms(5)
                .with_backoff(BackoffStrategy::Constant)
                .with_jitter(JitterStrategy::Full),
            ..fast_config()
        });
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(tokio::sync::Barrier::new(4));

        let mut handles = Vec::new();
        for i in 0..4 {
            let locks = Arc::new(base.for_holder(format!("worker-{i}")));
            let inside = Arc::clone(&inside);
            let max_inside = Arc::clone(&max_inside);
            let barrier = Arc::clone(&barrier);
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                for _ in 0..5 {
                    let inside = Arc::clone(&inside);
                    let max_inside = Arc::clone(&max_inside);
                    locks
                        .with_lock("shared.yaml", move |_lock| async move {
                            let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                            max_inside.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(2)).await;
                            inside.fetch_sub(1, Ordering::SeqCst);
                            Ok::<_, LockError>(())
                        })
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert!(!base.store().exists("shared.yaml.lock").unwrap());
    }

    #[tokio::test]
    async fn test_steal_increments_generation_and_rejects_stale_holder() {
        let (_dir, a) = manager(short_lease_config());
        let b = a.for_holder("holder-b");

        let stale = a.acquire("a.yaml").await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(matches!(a.inspect("a.yaml").unwrap(), LockState::Expired(_)));

        let stolen = b.acquire("a.yaml").await.unwrap();
        assert_eq!(stolen.holder, "holder-b");
        assert_eq!(stolen.generation, 1);

        let err = a.release(&stale).unwrap_err();
        assert!(matches!(err, LockError::NotHolder { .. }));
        let err = a.extend(&stale).unwrap_err();
        assert!(matches!(err, LockError::NotHolder { .. }));

        // The stolen lease is untouched by the rejected calls.
        match b.inspect("a.yaml").unwrap() {
            LockState::Held(current) | LockState::Expired(current) => {
                assert_eq!(current.holder, "holder-b");
                assert_eq!(current.generation, 1);
            }
            LockState::Unlocked => panic!("lock vanished"),
        }
        b.release(&stolen).unwrap();
    }

    #[tokio::test]
    async fn test_old_handle_cannot_release_holders_newer_lease() {
        let (_dir, a) = manager(short_lease_config());
        let b = a.for_holder("holder-b");

        let old = a.acquire("a.yaml").await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let stolen = b.acquire("a.yaml").await.unwrap();
        assert_eq!(stolen.generation, 1);
        b.release(&stolen).unwrap();

        // Same holder and generation as `old`, but a different lease.
        let fresh = a.acquire("a.yaml").await.unwrap();
        assert_eq!(fresh.generation, old.generation);
        assert_ne!(fresh.acquired_at, old.acquired_at);

        let err = a.release(&old).unwrap_err();
        assert!(matches!(err, LockError::NotHolder { .. }));
        let err = a.extend(&old).unwrap_err();
        assert!(matches!(err, LockError::NotHolder { .. }));

        match a.inspect("a.yaml").unwrap() {
            LockState::Held(current) | LockState::Expired(current) => {
                assert_eq!(current, fresh);
            }
            LockState::Unlocked => panic!("fresh lease was deleted"),
        }
        a.release(&fresh).unwrap();
        assert_eq!(a.inspect("a.yaml").unwrap(), LockState::Unlocked);
    }

    #[tokio::test]
    async fn test_release_restores_lease_stolen_after_ownership_check() {
        let (_dir, a) = manager(short_lease_config());
        let b = a.for_holder("holder-b");

        let old = a.acquire("a.yaml").await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        // The steal lands between the ownership read and the removal.
        let stolen = b.acquire("a.yaml").await.unwrap();
        let (resolved, lock_path) = a.paths(Path::new("a.yaml")).unwrap();
        let err = a.retire(&resolved, &lock_path, &old).unwrap_err();
        assert!(matches!(err, LockError::NotHolder { .. }));

        match b.inspect("a.yaml").unwrap() {
            LockState::Held(current) | LockState::Expired(current) => {
                assert_eq!(current, stolen);
            }
            LockState::Unlocked => panic!("stolen lease was deleted"),
        }
        assert_eq!(a.store().list_files("").unwrap().len(), 1);

        b.release(&stolen).unwrap();
        assert!(a.store().list_files("").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_steal_aborts_when_record_changed() {
        let (_dir, a) = manager(short_lease_config());
        let b = a.for_holder("holder-b");
        let c = a.for_holder("holder-c");

        let observed = a.acquire("a.yaml").await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let (resolved, lock_path) = b.paths(Path::new("a.yaml")).unwrap();
        let winner = c.try_steal(&resolved, &lock_path, &observed).unwrap();
        assert!(winner.is_some());

        // b still holds the stale observation and must lose.
        let loser = b.try_steal(&resolved, &lock_path, &observed).unwrap();
        assert!(loser.is_none());

        match a.inspect("a.yaml").unwrap() {
            LockState::Held(current) | LockState::Expired(current) => {
                assert_eq!(current.holder, "holder-c");
                assert_eq!(current.generation, 1);
            }
            LockState::Unlocked => panic!("lock vanished"),
        }
    }

    #[tokio::test]
    async fn test_extend_renews_lease() {
        let (_dir, locks) = manager(fast_config());
        let lock = locks.acquire("a.yaml").await.unwrap();

        let renewed = locks.extend(&lock).unwrap();
        assert_eq!(renewed.generation, lock.generation);
        assert!(renewed.expires_at >= lock.expires_at);
        assert!(renewed.last_heartbeat.is_some());

        locks.release(&renewed).unwrap();
    }

    #[tokio::test]
    async fn test_cooperative_release() {
        let (_dir, a) = manager(short_lease_config());
        let b = LockManager::new(
            a.store().clone(),
            "holder-b",
            LockConfig {
                cooperative_release: true,
                cooperative_timeout_ms: Some(2_000),
                ..short_lease_config()
            },
        );

        let held = a.acquire("a.yaml").await.unwrap();
        let a = Arc::new(a);
        let holder = Arc::clone(&a);
        let watcher = tokio::spawn(async move {
            loop {
                if holder.release_requested(&held).unwrap() {
                    holder.release(&held).unwrap();
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        let acquired = b.acquire("a.yaml").await.unwrap();
        watcher.await.unwrap();

        // A cooperative handover creates a fresh lease instead of a steal.
        assert_eq!(acquired.holder, "holder-b");
        assert_eq!(acquired.generation, 0);
        assert!(!b.release_requested(&acquired).unwrap());
    }

    #[tokio::test]
    async fn test_release_request_for_previous_lease_is_ignored() {
        let (_dir, a) = manager(fast_config());
        let b = a.for_holder("holder-b");

        let previous = a.acquire("a.yaml").await.unwrap();
        a.release(&previous).unwrap();
        let current = b.acquire("a.yaml").await.unwrap();
        assert_eq!(current.generation, previous.generation);

        let late = ReleaseRequest {
            requested_by: "holder-c".to_string(),
            requested_at: now_utc(),
            holder: previous.holder.clone(),
            acquired_at: previous.acquired_at,
            generation: previous.generation,
        };
        b.store()
            .write("a.yaml.lock.release", &serde_json::to_vec(&late).unwrap())
            .unwrap();
        assert!(!b.release_requested(&current).unwrap());

        let aimed = ReleaseRequest {
            holder: current.holder.clone(),
            acquired_at: current.acquired_at,
            ..late
        };
        b.store()
            .write("a.yaml.lock.release", &serde_json::to_vec(&aimed).unwrap())
            .unwrap();
        assert!(b.release_requested(&current).unwrap());
    }

    #[tokio::test]
    async fn test_with_lock_releases_on_error() {
        let (_dir, locks) = manager(fast_config());

        let result: Result<(), anyhow::Error> = locks
            .with_lock("a.yaml", |_lock| async { Err(anyhow::anyhow!("boom")) })
            .await;

        assert_eq!(result.unwrap_err().to_string(), "boom");
        assert!(!locks.store().exists("a.yaml.lock").unwrap());
        assert_eq!(locks.held_count(), 0);
    }

    #[tokio::test]
    async fn test_guard_releases_on_drop() {
        let (_dir, locks) = manager(fast_config());
        let lock = locks.acquire("a.yaml").await.unwrap();

        {
            let guard = LockGuard::new(&locks, lock);
            assert!(guard.lock().is_some());
        }

        assert_eq!(locks.inspect("a.yaml").unwrap(), LockState::Unlocked);
    }

    #[tokio::test]
    async fn test_release_all() {
        let (_dir, locks) = manager(fast_config());
        locks.acquire("a.yaml").await.unwrap();
        locks.acquire("b.yaml").await.unwrap();

        assert_eq!(locks.release_all(), 2);
        assert_eq!(locks.held_count(), 0);
        assert!(!locks.store().exists("a.yaml.lock").unwrap());
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let (_dir, locks) = manager(short_lease_config());
        locks.acquire("a.yaml").await.unwrap();
        assert!(!locks.for_holder("x").cleanup_expired("b.yaml").unwrap());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(locks.cleanup_expired("a.yaml").unwrap());
        assert_eq!(locks.inspect("a.yaml").unwrap(), LockState::Unlocked);
    }

    #[tokio::test]
    async fn test_unreadable_lock_record_is_stealable() {
        let (_dir, locks) = manager(short_lease_config());
        locks.store().write("a.yaml.lock", b"not json").unwrap();

        match locks.inspect("a.yaml").unwrap() {
            LockState::Held(lock) | LockState::Expired(lock) => {
                assert_eq!(lock.holder, UNKNOWN_HOLDER);
                assert_eq!(lock.generation, 0);
            }
            LockState::Unlocked => panic!("expected a synthesized lock"),
        }

        tokio::time::sleep(Duration::from_millis(30)).await;
        let lock = locks.acquire("a.yaml").await.unwrap();
        assert_eq!(lock.generation, 1);
    }
}
