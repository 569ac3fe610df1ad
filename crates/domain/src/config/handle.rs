//! Process-wide configuration with an explicit init/reload lifecycle.
//!
//! Readers call [`ConfigHandle::snapshot`] and keep the returned `Arc`
//! for as long as they need a consistent view; a concurrent reload swaps
//! the pointer and never mutates a snapshot someone is holding.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::{Config, ConfigError, ConfigSeverity};
use crate::error::{Error, Result};

pub struct ConfigHandle {
    path: Option<PathBuf>,
    current: RwLock<Arc<Config>>,
    generation: AtomicU64,
}

impl ConfigHandle {
    /// Wrap an already-built config. `reload()` is unavailable.
    pub fn new(config: Config) -> Self {
        Self {
            path: None,
            current: RwLock::new(Arc::new(config)),
            generation: AtomicU64::new(0),
        }
    }

    /// Load from `path` (defaults when the file does not exist) and
    /// remember the path for later reloads.
    pub fn init(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let config = Config::load(&path)?;
        if let Some(errors) = config.validation_errors() {
            return Err(Error::Config(errors));
        }
        Ok(Self {
            path: Some(path),
            current: RwLock::new(Arc::new(config)),
            generation: AtomicU64::new(0),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Immutable view of the current configuration.
    pub fn snapshot(&self) -> Arc<Config> {
        self.current.read().clone()
    }

    /// Incremented on every successful swap.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Re-read the file given to [`init`](Self::init).
    ///
    /// On parse or validation errors the previous snapshot stays active.
    /// Returns the warnings of the accepted config.
    pub fn reload(&self) -> Result<Vec<ConfigError>> {
        let path = self
            .path
            .as_ref()
            .ok_or_else(|| Error::Config("config handle has no backing file".into()))?;
        let config = Config::load(path)?;
        self.replace(config)
    }

    /// Validate and atomically install `config`.
    pub fn replace(&self, config: Config) -> Result<Vec<ConfigError>> {
        let issues = config.validate();
        let (errors, warnings): (Vec<_>, Vec<_>) = issues
            .into_iter()
            .partition(|e| e.severity == ConfigSeverity::Error);
        if !errors.is_empty() {
            let joined: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            return Err(Error::Config(joined.join("; ")));
        }

        *self.current.write() = Arc::new(config);
        self.generation.fetch_add(1, Ordering::AcqRel);
        Ok(warnings)
    }
}
