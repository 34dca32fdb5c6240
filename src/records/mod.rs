use std::fs;
use std::path::{Path, PathBuf};

use crate::config::ScreenerConfig;
use crate::error::{Context, Result};
use crate::screen::Filters;

pub mod export;
pub mod history;
pub mod presets;
pub mod storage;

pub use export::{export_rows, EXPORT_HEADER};
pub use history::{RunHistoryEntry, RunHistoryStore, DEFAULT_HISTORY_CAPACITY};
pub use storage::{FallbackStore, FileStore, KeyValueStore, MemoryStore};

/// Facade that keeps preset and run-history persistence isolated from the rest of the app.
pub struct Records {
    presets_dir: PathBuf,
    history_dir: PathBuf,
}

impl Records {
    pub fn from_config(config: &ScreenerConfig) -> Self {
        Self::with_dirs(&config.presets_dir, &config.history.dir)
    }

    pub fn with_dirs<P, H>(presets_dir: P, history_dir: H) -> Self
    where
        P: Into<PathBuf>,
        H: Into<PathBuf>,
    {
        Self {
            presets_dir: presets_dir.into(),
            history_dir: history_dir.into(),
        }
    }

    pub fn presets_dir(&self) -> &Path {
        &self.presets_dir
    }

    pub fn history_dir(&self) -> &Path {
        &self.history_dir
    }

    /// Ensure the target directories exist before any persistence happens.
    pub fn prepare(&self) -> Result<()> {
        for (label, dir) in [("presets", &self.presets_dir), ("history", &self.history_dir)] {
            fs::create_dir_all(dir).with_context(|| {
                format!("Failed to create {} directory {}", label, dir.display())
            })?;
        }
        Ok(())
    }

    /// Run history backed by the history directory, degrading to memory if it is unusable.
    pub fn history(&self, max_entries: usize) -> RunHistoryStore {
        let store = FallbackStore::new(FileStore::new(&self.history_dir));
        RunHistoryStore::new(store, max_entries)
    }

    pub fn save_preset(&self, name: &str, filters: &Filters) -> Result<PathBuf> {
        presets::save_filters(&self.presets_dir, name, filters)
    }

    pub fn load_preset(&self, name: &str) -> Result<Filters> {
        presets::load_named(&self.presets_dir, name)
    }

    pub fn list_presets(&self) -> Vec<String> {
        presets::list_presets(&self.presets_dir)
    }
}
