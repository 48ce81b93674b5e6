//! Lock-protected structured records shared between stages.

use crate::errors::{LockError, StoreError};
use crate::store::atomic::{decode, encode, AtomicStore};
use crate::store::lock::LockManager;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Schema check applied to structured records.
///
/// The store itself is schema-agnostic; validators see the record as a
/// JSON value regardless of its on-disk format.
pub trait RecordValidator: Send + Sync {
    /// Returns a message describing why the record is invalid.
    fn validate(&self, path: &Path, record: &serde_json::Value) -> Result<(), String>;
}

impl<F> RecordValidator for F
where
    F: Fn(&Path, &serde_json::Value) -> Result<(), String> + Send + Sync,
{
    fn validate(&self, path: &Path, record: &serde_json::Value) -> Result<(), String> {
        self(path, record)
    }
}

/// Read/write access to shared documents for one lock holder.
///
/// Writes go through [`LockManager::with_lock`]; reads are lock-free since
/// every write is an atomic replace.
#[derive(Clone)]
pub struct SharedStateStore {
    locks: Arc<LockManager>,
    validator: Option<Arc<dyn RecordValidator>>,
}

impl fmt::Debug for SharedStateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedStateStore")
            .field("root", &self.locks.store().root())
            .field("holder", &self.locks.holder())
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

impl SharedStateStore {
    /// Creates a facade over a lock manager.
    #[must_use]
    pub fn new(locks: Arc<LockManager>) -> Self {
        Self {
            locks,
            validator: None,
        }
    }

    /// Sets the record validator.
    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn RecordValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Returns a facade on the same store acting as a different holder.
    #[must_use]
    pub fn scoped(&self, holder: impl Into<String>) -> Self {
        Self {
            locks: Arc::new(self.locks.for_holder(holder)),
            validator: self.validator.clone(),
        }
    }

    /// Returns the lock manager.
    #[must_use]
    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    /// Returns the underlying atomic store.
    #[must_use]
    pub fn atomic(&self) -> &AtomicStore {
        self.locks.store()
    }

    /// Reads and validates a structured record.
    pub fn read_record<T: DeserializeOwned + Serialize>(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<Option<T>, StoreError> {
        let path = path.as_ref();
        let Some(record) = self.atomic().read_record::<T>(path)? else {
            return Ok(None);
        };
        self.check(path, &record)?;
        Ok(Some(record))
    }

    /// Validates and writes a structured record under the document lock.
    pub async fn write_record<T: Serialize>(
        &self,
        path: impl AsRef<Path>,
        value: &T,
    ) -> Result<PathBuf, LockError> {
        let path = path.as_ref();
        self.check(path, value)?;
        let content = encode(path, value)?;
        self.locks
            .with_lock(path, |_lock| async move {
                Ok::<_, LockError>(self.atomic().write(path, content.as_bytes())?)
            })
            .await
    }

    /// Read-modify-writes a record while holding its lock.
    ///
    /// `f` receives the current record, or `None` if it does not exist yet,
    /// and returns the record to store.
    pub async fn update_record<T, F>(&self, path: impl AsRef<Path>, f: F) -> Result<T, LockError>
    where
        T: DeserializeOwned + Serialize,
        F: FnOnce(Option<T>) -> T,
    {
        let path = path.as_ref();
        self.locks
            .with_lock(path, |_lock| async move {
                let current = match self.atomic().read_to_string(path)? {
                    Some(content) => {
                        let record: T = decode(path, &content)?;
                        self.check(path, &record)?;
                        Some(record)
                    }
                    None => None,
                };
                let updated = f(current);
                self.check(path, &updated)?;
                self.atomic().write(path, encode(path, &updated)?.as_bytes())?;
                Ok::<_, LockError>(updated)
            })
            .await
    }

    /// Reads a text document such as Markdown.
    pub fn read_text(&self, path: impl AsRef<Path>) -> Result<Option<String>, StoreError> {
        self.atomic().read_to_string(path)
    }

    /// Writes a text document under its lock.
    pub async fn write_text(
        &self,
        path: impl AsRef<Path>,
        content: &str,
    ) -> Result<PathBuf, LockError> {
        let path = path.as_ref();
        self.locks
            .with_lock(path, |_lock| async move {
                Ok::<_, LockError>(self.atomic().write(path, content.as_bytes())?)
            })
            .await
    }

    fn check<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), StoreError> {
        let Some(validator) = &self.validator else {
            return Ok(());
        };
        let json = serde_json::to_value(value).map_err(|e| StoreError::serialization(path, e))?;
        validator
            .validate(path, &json)
            .map_err(|message| StoreError::Validation {
                path: path.to_path_buf(),
                message,
            })
    }
}
