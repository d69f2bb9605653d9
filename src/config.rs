use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

use crate::app::CONFIG_FILENAME;

/// A configuration object: the whole store, or one command's block.
pub type Config = Map<String, Value>;

/// Where the configuration store lives. Reads and writes are whole-store;
/// there is no locking between concurrent CLI invocations.
pub trait ConfigBackend {
    /// Returns `None` when nothing has been persisted yet.
    fn load(&self) -> Result<Option<Config>>;
    fn store(&self, config: &Config) -> Result<()>;
}

pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn in_project(project_root: &Path) -> Self {
        Self::new(project_root.join(CONFIG_FILENAME))
    }
}

impl ConfigBackend for FileBackend {
    fn load(&self) -> Result<Option<Config>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read config from {}", self.path.display()))?;
        let config: Config = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse config {}", self.path.display()))?;
        Ok(Some(config))
    }

    fn store(&self, config: &Config) -> Result<()> {
        let content = serde_json::to_string_pretty(config).context("failed to serialize config")?;

        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write temp config to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("failed to rename config to {}", self.path.display()))?;

        Ok(())
    }
}

/// Persists and retrieves per-command configuration blocks. Handed to every
/// command's `run`, `eject` and `validate` hooks.
pub struct ConfigurationHelper {
    backend: Box<dyn ConfigBackend>,
}

impl ConfigurationHelper {
    pub fn new(backend: Box<dyn ConfigBackend>) -> Self {
        Self { backend }
    }

    /// Shallow-merges `config` into the block stored for `command_name`
    /// (keys in `config` win) and persists the whole store.
    pub fn save(&self, config: Config, command_name: &str) -> Result<()> {
        let mut store = self.read_store(None)?;
        let block = store
            .entry(command_name.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !block.is_object() {
            *block = Value::Object(Map::new());
        }
        if let Value::Object(existing) = block {
            existing.extend(config);
        }
        self.backend.store(&store)
    }

    /// Returns the block for `command_name`, or the whole store when `None`.
    /// A missing store, or a missing block, is created empty and persisted.
    pub fn get(&self, command_name: Option<&str>) -> Result<Config> {
        let mut store = self.read_store(command_name)?;
        match command_name {
            None => Ok(store),
            Some(name) => match store.remove(name) {
                Some(Value::Object(block)) => Ok(block),
                _ => Ok(Config::new()),
            },
        }
    }

    fn read_store(&self, command_name: Option<&str>) -> Result<Config> {
        let (mut store, mut dirty) = match self.backend.load()? {
            Some(store) => (store, false),
            None => (Config::new(), true),
        };

        if let Some(name) = command_name {
            if !store.contains_key(name) {
                store.insert(name.to_string(), Value::Object(Map::new()));
                dirty = true;
            }
        }

        if dirty {
            self.backend.store(&store)?;
        }
        Ok(store)
    }
}
