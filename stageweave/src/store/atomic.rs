//! Crash-safe filesystem primitives rooted at a single directory.
//!
//! Every write goes to a uniquely named temporary sibling and is renamed
//! into place, so readers observe either the old content or the new content
//! and never a torn file. Every path is resolved against the store root and
//! rejected if it normalizes outside of it.

use crate::errors::StoreError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tempfile::NamedTempFile;

/// Encoding of a structured record, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFormat {
    /// `.yaml` / `.yml`
    Yaml,
    /// `.json`
    Json,
    /// Anything else; read and written as raw text.
    Text,
}

impl RecordFormat {
    /// Detects the format from a path's extension.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml" | "yml") => Self::Yaml,
            Some("json") => Self::Json,
            _ => Self::Text,
        }
    }
}

/// Options for a single write.
#[derive(Debug, Clone, Copy)]
pub struct WriteOptions {
    /// Create missing parent directories.
    pub create_parents: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            create_parents: true,
        }
    }
}

/// A directory of documents with atomic write-replace semantics.
#[derive(Debug, Clone)]
pub struct AtomicStore {
    root: PathBuf,
}

impl AtomicStore {
    /// Opens a store, creating the root directory if needed.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref();
        std::fs::create_dir_all(root).map_err(|e| StoreError::io(root, e))?;
        let root = std::fs::canonicalize(root).map_err(|e| StoreError::io(root, e))?;
        Ok(Self { root })
    }

    /// Returns the canonical store root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a path against the root, failing closed on escapes.
    ///
    /// Relative paths are joined to the root; absolute paths are accepted
    /// only when they already lie inside it. `..` components are resolved
    /// lexically before the containment check.
    pub fn resolve(&self, path: impl AsRef<Path>) -> Result<PathBuf, StoreError> {
        let path = path.as_ref();
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };

        let escape = || StoreError::PathEscape {
            path: path.to_path_buf(),
            root: self.root.clone(),
        };

        let mut normalized = PathBuf::new();
        for component in joined.components() {
            match component {
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(escape());
                    }
                }
                Component::CurDir => {}
                other => normalized.push(other.as_os_str()),
            }
        }

        if normalized.starts_with(&self.root) {
            Ok(normalized)
        } else {
            Err(escape())
        }
    }

    /// Creates a directory and its parents. Idempotent.
    pub fn ensure_dir(&self, path: impl AsRef<Path>) -> Result<PathBuf, StoreError> {
        let resolved = self.resolve(path)?;
        std::fs::create_dir_all(&resolved).map_err(|e| StoreError::io(&resolved, e))?;
        Ok(resolved)
    }

    /// Atomically replaces the content of a file, creating parents.
    pub fn write(&self, path: impl AsRef<Path>, bytes: &[u8]) -> Result<PathBuf, StoreError> {
        self.write_with(path, bytes, WriteOptions::default())
    }

    /// Atomically replaces the content of a file.
    pub fn write_with(
        &self,
        path: impl AsRef<Path>,
        bytes: &[u8],
        options: WriteOptions,
    ) -> Result<PathBuf, StoreError> {
        let resolved = self.resolve(path)?;
        let tmp = self.stage_temp(&resolved, bytes, options)?;
        PreparedWrite { tmp, target: resolved }.commit()
    }

    /// Stages content in a temporary sibling without publishing it.
    ///
    /// Callers can re-check preconditions before calling
    /// [`PreparedWrite::commit`]; dropping the prepared write discards it.
    pub fn prepare(&self, path: impl AsRef<Path>, bytes: &[u8]) -> Result<PreparedWrite, StoreError> {
        let resolved = self.resolve(path)?;
        let tmp = self.stage_temp(&resolved, bytes, WriteOptions::default())?;
        Ok(PreparedWrite {
            tmp,
            target: resolved,
        })
    }

    /// Creates a file only if nothing exists at the path.
    ///
    /// The content is staged in a temporary sibling and hard-linked into
    /// place, which either succeeds atomically or fails because the path is
    /// taken. Returns `false` when the path already exists.
    pub fn create_exclusive(
        &self,
        path: impl AsRef<Path>,
        bytes: &[u8],
    ) -> Result<bool, StoreError> {
        let resolved = self.resolve(path)?;
        let tmp = self.stage_temp(&resolved, bytes, WriteOptions::default())?;

        match std::fs::hard_link(tmp.path(), &resolved) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(StoreError::io(&resolved, e)),
        }
        // `tmp` is removed on drop in every branch.
    }

    /// Reads a whole file, returning `None` if it does not exist.
    pub fn read(&self, path: impl AsRef<Path>) -> Result<Option<Vec<u8>>, StoreError> {
        let resolved = self.resolve(path)?;
        match std::fs::read(&resolved) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(&resolved, e)),
        }
    }

    /// Reads a whole file as UTF-8, returning `None` if it does not exist.
    pub fn read_to_string(&self, path: impl AsRef<Path>) -> Result<Option<String>, StoreError> {
        let path = path.as_ref();
        match self.read(path)? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| StoreError::serialization(path, e)),
            None => Ok(None),
        }
    }

    /// Returns true if the path exists.
    pub fn exists(&self, path: impl AsRef<Path>) -> Result<bool, StoreError> {
        let resolved = self.resolve(path)?;
        resolved
            .try_exists()
            .map_err(|e| StoreError::io(&resolved, e))
    }

    /// Deletes a file. Returns `false` if it was already gone.
    pub fn delete(&self, path: impl AsRef<Path>) -> Result<bool, StoreError> {
        let resolved = self.resolve(path)?;
        match std::fs::remove_file(&resolved) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(&resolved, e)),
        }
    }

    /// Renames a file within the store, replacing any file at `to`.
    ///
    /// Returns `false` if `from` did not exist.
    pub fn rename(&self, from: impl AsRef<Path>, to: impl AsRef<Path>) -> Result<bool, StoreError> {
        let from = self.resolve(from)?;
        let to = self.resolve(to)?;
        match std::fs::rename(&from, &to) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(&from, e)),
        }
    }

    /// Returns the modification time, or `None` if the file does not exist.
    pub fn modified(&self, path: impl AsRef<Path>) -> Result<Option<SystemTime>, StoreError> {
        let resolved = self.resolve(path)?;
        match std::fs::metadata(&resolved) {
            Ok(meta) => meta
                .modified()
                .map(Some)
                .map_err(|e| StoreError::io(&resolved, e)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(&resolved, e)),
        }
    }

    /// Lists the files directly inside a directory, sorted by path.
    ///
    /// A missing directory lists as empty.
    pub fn list_files(&self, dir: impl AsRef<Path>) -> Result<Vec<PathBuf>, StoreError> {
        let resolved = self.resolve(dir)?;
        let entries = match std::fs::read_dir(&resolved) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&resolved, e)),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&resolved, e))?;
            let file_type = entry.file_type().map_err(|e| StoreError::io(entry.path(), e))?;
            if file_type.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    /// Reads and decodes a YAML or JSON record.
    pub fn read_record<T: DeserializeOwned>(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<Option<T>, StoreError> {
        let path = path.as_ref();
        let Some(content) = self.read_to_string(path)? else {
            return Ok(None);
        };
        decode(path, &content).map(Some)
    }

    /// Encodes and atomically writes a YAML or JSON record.
    pub fn write_record<T: Serialize>(
        &self,
        path: impl AsRef<Path>,
        value: &T,
    ) -> Result<PathBuf, StoreError> {
        let path = path.as_ref();
        let content = encode(path, value)?;
        self.write(path, content.as_bytes())
    }

    fn stage_temp(
        &self,
        resolved: &Path,
        bytes: &[u8],
        options: WriteOptions,
    ) -> Result<NamedTempFile, StoreError> {
        let parent = resolved.parent().unwrap_or(&self.root);
        if options.create_parents {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }

        let mut tmp = tempfile::Builder::new()
            .prefix(".tmp-")
            .tempfile_in(parent)
            .map_err(|e| StoreError::io(parent, e))?;
        tmp.write_all(bytes)
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| StoreError::io(tmp.path(), e))?;
        Ok(tmp)
    }
}

/// Content staged next to its target, published by an atomic rename.
#[derive(Debug)]
pub struct PreparedWrite {
    tmp: NamedTempFile,
    target: PathBuf,
}

impl PreparedWrite {
    /// Returns the path the content will be published to.
    #[must_use]
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Renames the staged content over the target.
    pub fn commit(self) -> Result<PathBuf, StoreError> {
        let target = self.target;
        self.tmp
            .persist(&target)
            .map_err(|e| StoreError::io(&target, e.error))?;
        Ok(target)
    }
}

/// Decodes record content according to the path's format.
pub(crate) fn decode<T: DeserializeOwned>(path: &Path, content: &str) -> Result<T, StoreError> {
    match RecordFormat::from_path(path) {
        RecordFormat::Yaml => {
            serde_yaml::from_str(content).map_err(|e| StoreError::serialization(path, e))
        }
        RecordFormat::Json => {
            serde_json::from_str(content).map_err(|e| StoreError::serialization(path, e))
        }
        RecordFormat::Text => Err(StoreError::serialization(
            path,
            "structured records must be .yaml, .yml or .json",
        )),
    }
}

/// Encodes a value according to the path's format.
pub(crate) fn encode<T: Serialize>(path: &Path, value: &T) -> Result<String, StoreError> {
    match RecordFormat::from_path(path) {
        RecordFormat::Yaml => {
            serde_yaml::to_string(value).map_err(|e| StoreError::serialization(path, e))
        }
        RecordFormat::Json => {
            serde_json::to_string_pretty(value).map_err(|e| StoreError::serialization(path, e))
        }
        RecordFormat::Text => Err(StoreError::serialization(
            path,
            "structured records must be .yaml, .yml or .json",
        )),
    }
}
