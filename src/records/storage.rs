use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use log::warn;

use crate::error::{AppError, Context, Result};

/// String key/value persistence.
pub trait KeyValueStore: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>>;
    fn set_item(&self, key: &str, value: &str) -> Result<()>;
    fn remove_item(&self, key: &str) -> Result<()>;
}

/// One `<key>.json` file per key inside `dir`.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
            && !key.starts_with('.');
        if !valid {
            return Err(AppError::validation(format!("invalid storage key `{key}`")));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl KeyValueStore for FileStore {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(AppError::Io(err)),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create storage directory {}", self.dir.display()))?;

        let staging = path.with_extension("json.tmp");
        fs::write(&staging, value)
            .with_context(|| format!("Failed to write {}", staging.display()))?;
        fs::rename(&staging, &path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AppError::Io(err)),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn items(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.items().get(key).cloned()
    }

    pub fn insert(&self, key: &str, value: &str) {
        self.items().insert(key.to_string(), value.to_string());
    }

    pub fn remove(&self, key: &str) {
        self.items().remove(key);
    }
}

impl KeyValueStore for MemoryStore {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.get(key))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.insert(key, value);
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        self.remove(key);
        Ok(())
    }
}

/// Wraps a primary store and switches to process memory the first time it fails.
///
/// Never returns errors; each failure is logged once it happens.
pub struct FallbackStore {
    primary: Option<Box<dyn KeyValueStore>>,
    memory: MemoryStore,
    degraded: AtomicBool,
}

impl FallbackStore {
    pub fn new(primary: impl KeyValueStore + 'static) -> Self {
        Self {
            primary: Some(Box::new(primary)),
            memory: MemoryStore::new(),
            degraded: AtomicBool::new(false),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            primary: None,
            memory: MemoryStore::new(),
            degraded: AtomicBool::new(false),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    fn active(&self) -> Option<&dyn KeyValueStore> {
        if self.is_degraded() {
            return None;
        }
        self.primary.as_deref()
    }

    fn degrade(&self, action: &str, key: &str, err: &AppError) {
        if !self.degraded.swap(true, Ordering::SeqCst) {
            warn!("storage {action} for `{key}` failed ({err}); keeping data in memory for this session");
        }
    }

    pub fn get_item(&self, key: &str) -> Option<String> {
        if let Some(primary) = self.active() {
            match primary.get_item(key) {
                Ok(value) => return value,
                Err(err) => self.degrade("read", key, &err),
            }
        }
        self.memory.get(key)
    }

    pub fn set_item(&self, key: &str, value: &str) {
        if let Some(primary) = self.active() {
            match primary.set_item(key, value) {
                Ok(()) => return,
                Err(err) => self.degrade("write", key, &err),
            }
        }
        self.memory.insert(key, value);
    }

    pub fn remove_item(&self, key: &str) {
        if let Some(primary) = self.active() {
            if let Err(err) = primary.remove_item(key) {
                self.degrade("remove", key, &err);
            }
        }
        self.memory.remove(key);
    }
}
