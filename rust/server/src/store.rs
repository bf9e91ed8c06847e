//! JSON-file persistence for settings and finished-match history.

use engine::{GameState, PlayerId};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::warn;

use crate::config::MatchSettings;

pub const HISTORY_LIMIT: usize = 10;
pub const SETTINGS_FILE: &str = "settings.json";
pub const HISTORY_FILE: &str = "history.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub id: PlayerId,
    pub name: String,
    pub color: String,
    pub avatar: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: String,
    pub ranking: Vec<PlayerRecord>,
    /// Unix milliseconds.
    pub finished_at: u64,
}

impl MatchRecord {
    pub fn from_state(id: &str, state: &GameState) -> Self {
        let ranking = state
            .ranking
            .iter()
            .filter_map(|pid| state.player(*pid))
            .map(|p| PlayerRecord {
                id: p.id,
                name: p.name.clone(),
                color: p.color.clone(),
                avatar: p.avatar.clone(),
            })
            .collect();
        Self {
            id: id.to_string(),
            ranking,
            finished_at: now_ms(),
        }
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// One JSON document, cached in memory and optionally mirrored to disk.
#[derive(Debug)]
pub struct JsonStore<T> {
    path: Option<PathBuf>,
    value: Mutex<T>,
}

impl<T> JsonStore<T>
where
    T: Serialize + DeserializeOwned + Clone + Default,
{
    pub fn in_memory(value: T) -> Self {
        Self {
            path: None,
            value: Mutex::new(value),
        }
    }

    /// Missing or unreadable files start from `T::default()`.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let value = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|err| {
                warn!(path = %path.display(), %err, "corrupt store file, using defaults");
                T::default()
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => T::default(),
            Err(err) => {
                warn!(path = %path.display(), %err, "unreadable store file, using defaults");
                T::default()
            }
        };
        Self {
            path: Some(path),
            value: Mutex::new(value),
        }
    }

    pub fn get(&self) -> T {
        self.value.lock().clone()
    }

    /// Apply `f` and persist the result; on a write failure the cached value is left unchanged.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, StoreError> {
        let mut guard = self.value.lock();
        let mut next = guard.clone();
        let out = f(&mut next);
        if let Some(path) = &self.path {
            write_atomic(path, &next)?;
        }
        *guard = next;
        Ok(out)
    }
}

fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct Stores {
    pub settings: Arc<JsonStore<MatchSettings>>,
    pub history: Arc<JsonStore<Vec<MatchRecord>>>,
}

impl Default for Stores {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            settings: Arc::new(JsonStore::in_memory(MatchSettings::default())),
            history: Arc::new(JsonStore::in_memory(Vec::new())),
        }
    }

    pub fn open(dir: Option<&Path>) -> Self {
        let Some(dir) = dir else {
            return Self::in_memory();
        };
        let settings: JsonStore<MatchSettings> = JsonStore::open(dir.join(SETTINGS_FILE));
        if let Err(err) = settings.get().validate() {
            warn!(%err, "stored settings invalid, using defaults");
            *settings.value.lock() = MatchSettings::default();
        }
        let history: JsonStore<Vec<MatchRecord>> = JsonStore::open(dir.join(HISTORY_FILE));
        history.value.lock().truncate(HISTORY_LIMIT);
        Self {
            settings: Arc::new(settings),
            history: Arc::new(history),
        }
    }

    pub fn settings(&self) -> MatchSettings {
        self.settings.get()
    }

    pub fn save_settings(&self, settings: MatchSettings) -> Result<(), StoreError> {
        self.settings.update(|current| *current = settings)
    }

    /// Newest first.
    pub fn history(&self) -> Vec<MatchRecord> {
        self.history.get()
    }

    pub fn record_match(&self, record: MatchRecord) -> Result<(), StoreError> {
        self.history.update(|records| {
            records.insert(0, record);
            records.truncate(HISTORY_LIMIT);
        })
    }
}
