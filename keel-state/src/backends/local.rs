//! Local file backend
//!
//! Stores each key as a JSON file below a root directory (default:
//! `.keel`). Key segments become directories; characters outside
//! `[A-Za-z0-9._-]` are percent-encoded.
//!
//! Conditional creation links a fully written temporary file into place,
//! which fails if the target exists. Compare-and-swap and conditional delete
//! run while holding a `<file>.guard` file created with `create_new`, so
//! separate processes on one machine never interleave. The revision is the
//! blake3 hash of the file content.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use log::warn;

use crate::backend::{BackendConfig, BackendError, BackendResult, KvBackend, Revision, Versioned};

const EXTENSION: &str = ".json";
const GUARD_POLL: Duration = Duration::from_millis(10);

/// Local directory backend for development and single-machine use
pub struct LocalBackend {
    root: PathBuf,
    guard_timeout: Duration,
}

impl LocalBackend {
    /// Default state directory
    pub const DEFAULT_ROOT: &'static str = ".keel";

    /// Default time to wait for another writer's guard on the same key
    pub const DEFAULT_GUARD_TIMEOUT: Duration = Duration::from_secs(5);

    /// Create a new LocalBackend with the default directory (.keel in current directory)
    pub fn new() -> Self {
        Self::with_root(PathBuf::from(Self::DEFAULT_ROOT))
    }

    /// Create a new LocalBackend below a specific directory
    pub fn with_root(root: PathBuf) -> Self {
        Self {
            root,
            guard_timeout: Self::DEFAULT_GUARD_TIMEOUT,
        }
    }

    pub fn with_guard_timeout(mut self, timeout: Duration) -> Self {
        self.guard_timeout = timeout;
        self
    }

    /// Create a LocalBackend from configuration
    pub fn from_config(config: &BackendConfig) -> BackendResult<Self> {
        let root = config
            .get_string("path")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(Self::DEFAULT_ROOT));

        let mut backend = Self::with_root(root);
        if let Some(ms) = config.get_u64("guard_timeout_ms") {
            backend = backend.with_guard_timeout(Duration::from_millis(ms));
        }
        Ok(backend)
    }

    /// Get the root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> BackendResult<PathBuf> {
        let mut path = self.root.clone();
        let mut segments = key.split('/').peekable();
        while let Some(segment) = segments.next() {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(BackendError::InvalidKey(key.to_string()));
            }
            let encoded = encode_segment(segment);
            if segments.peek().is_some() {
                path.push(encoded);
            } else {
                path.push(format!("{}{}", encoded, EXTENSION));
            }
        }
        Ok(path)
    }

    fn ensure_parent(path: &Path) -> BackendResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| BackendError::Io(format!("Failed to create directory: {}", e)))?;
        }
        Ok(())
    }

    /// Wait for exclusive access to `path`
    async fn guard(&self, path: &Path) -> BackendResult<Guard> {
        let guard_path = sibling(path, ".guard");
        let deadline = tokio::time::Instant::now() + self.guard_timeout;
        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&guard_path)
            {
                Ok(_) => return Ok(Guard { path: guard_path }),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(BackendError::Io(format!(
                            "Timed out waiting for guard file {}",
                            guard_path.display()
                        )));
                    }
                    tokio::time::sleep(GUARD_POLL).await;
                }
                Err(e) => {
                    return Err(BackendError::Io(format!(
                        "Failed to create guard file: {}",
                        e
                    )));
                }
            }
        }
    }

    /// Write `value` to a fresh temporary file next to `path`
    fn write_temp(path: &Path, value: &[u8]) -> BackendResult<PathBuf> {
        let temp = sibling(path, &format!(".{}.tmp", uuid::Uuid::new_v4()));
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp)
            .map_err(|e| BackendError::Io(format!("Failed to create temporary file: {}", e)))?;
        file.write_all(value)
            .and_then(|_| file.sync_all())
            .map_err(|e| BackendError::Io(format!("Failed to write temporary file: {}", e)))?;
        Ok(temp)
    }

    fn read(path: &Path) -> BackendResult<Option<Versioned>> {
        match fs::read(path) {
            Ok(value) => {
                let revision = content_revision(&value);
                Ok(Some(Versioned { value, revision }))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BackendError::Io(format!("Failed to read state file: {}", e))),
        }
    }

    fn check_revision(key: &str, path: &Path, expected: &Revision) -> BackendResult<()> {
        match Self::read(path)? {
            Some(current) if current.revision == *expected => Ok(()),
            _ => Err(BackendError::condition_failed(key)),
        }
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes the guard file when dropped
struct Guard {
    path: PathBuf,
}

impl Drop for Guard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to remove guard file {}: {}", self.path.display(), e);
        }
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

fn content_revision(value: &[u8]) -> Revision {
    Revision::new(blake3::hash(value).to_hex().to_string())
}

fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'_' | b'-') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

fn decode_segment(segment: &str) -> Option<String> {
    let bytes = segment.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = segment.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

/// Collect keys of every value file below `dir`
fn collect_keys(dir: &Path, prefix: &str, keys: &mut Vec<String>) -> BackendResult<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(BackendError::Io(format!("Failed to read directory: {}", e))),
    };
    for entry in entries {
        let entry = entry.map_err(|e| BackendError::Io(format!("Failed to read entry: {}", e)))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let file_type = entry
            .file_type()
            .map_err(|e| BackendError::Io(format!("Failed to read entry: {}", e)))?;

        if file_type.is_dir() {
            if let Some(segment) = decode_segment(&name) {
                collect_keys(&entry.path(), &format!("{}{}/", prefix, segment), keys)?;
            }
        } else if let Some(stem) = name.strip_suffix(EXTENSION)
            && let Some(segment) = decode_segment(stem)
        {
            keys.push(format!("{}{}", prefix, segment));
        }
    }
    Ok(())
}

#[async_trait]
impl KvBackend for LocalBackend {
    async fn get(&self, key: &str) -> BackendResult<Option<Versioned>> {
        let path = self.path_for(key)?;
        Self::read(&path)
    }

    async fn put_if_absent(&self, key: &str, value: Vec<u8>) -> BackendResult<Revision> {
        let path = self.path_for(key)?;
        Self::ensure_parent(&path)?;
        let temp = Self::write_temp(&path, &value)?;

        let linked = fs::hard_link(&temp, &path);
        if let Err(e) = fs::remove_file(&temp) {
            warn!("Failed to remove temporary file {}: {}", temp.display(), e);
        }
        match linked {
            Ok(()) => Ok(content_revision(&value)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(BackendError::condition_failed(key))
            }
            Err(e) => Err(BackendError::Io(format!("Failed to write state file: {}", e))),
        }
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &Revision,
        value: Vec<u8>,
    ) -> BackendResult<Revision> {
        let path = self.path_for(key)?;
        let _guard = self.guard(&path).await?;
        Self::check_revision(key, &path, expected)?;

        let temp = Self::write_temp(&path, &value)?;
        fs::rename(&temp, &path)
            .map_err(|e| BackendError::Io(format!("Failed to replace state file: {}", e)))?;
        Ok(content_revision(&value))
    }

    async fn delete_if(&self, key: &str, expected: &Revision) -> BackendResult<()> {
        let path = self.path_for(key)?;
        let _guard = self.guard(&path).await?;
        Self::check_revision(key, &path, expected)?;

        fs::remove_file(&path)
            .map_err(|e| BackendError::Io(format!("Failed to remove state file: {}", e)))
    }

    async fn list(&self, prefix: &str) -> BackendResult<Vec<String>> {
        let mut keys = Vec::new();
        collect_keys(&self.root, "", &mut keys)?;
        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }
}
