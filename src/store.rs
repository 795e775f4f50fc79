//! Persistence collaborator seam.
//!
//! Everything here is best effort: callers log failures and fall back to
//! re-deriving state.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::error::{DeckError, Result};

/// Scoring state persisted across restarts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreState {
    pub score: u64,
    pub total_score: u64,
    /// Local date (`YYYY-MM-DD`) the daily score belongs to.
    pub last_score_date: String,
    pub timer_state: String,
    pub timer_remaining_secs: u64,
}

pub trait SessionStore: Send + Sync {
    /// Transcript identifier locked to a session, if one was recorded.
    fn locked_transcript(&self, session: &str) -> Result<Option<String>>;
    fn lock_transcript(&self, session: &str, transcript_id: &str) -> Result<()>;

    fn create_session(&self, session: &str) -> Result<()>;
    fn touch_session(&self, session: &str) -> Result<()>;
    fn delete_session(&self, session: &str) -> Result<()>;

    fn hotkeys(&self) -> Result<BTreeMap<u8, String>>;
    fn set_hotkey(&self, slot: u8, session: &str) -> Result<()>;
    fn clear_hotkey(&self, slot: u8) -> Result<()>;

    fn score_state(&self) -> Result<Option<ScoreState>>;
    fn save_score_state(&self, state: &ScoreState) -> Result<()>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SessionRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    transcript_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_seen: Option<chrono::DateTime<chrono::Utc>>,
}

/// Everything a store keeps. Shared by both implementations.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct StoreData {
    sessions: HashMap<String, SessionRow>,
    hotkeys: BTreeMap<u8, String>,
    score: Option<ScoreState>,
}

impl StoreData {
    fn locked_transcript(&self, session: &str) -> Option<String> {
        self.sessions
            .get(session)
            .and_then(|row| row.transcript_id.clone())
    }

    fn lock_transcript(&mut self, session: &str, transcript_id: &str) {
        self.sessions
            .entry(session.to_string())
            .or_default()
            .transcript_id = Some(transcript_id.to_string());
    }

    fn create_session(&mut self, session: &str) {
        self.sessions.entry(session.to_string()).or_default();
    }

    fn touch_session(&mut self, session: &str) {
        if let Some(row) = self.sessions.get_mut(session) {
            row.last_seen = Some(chrono::Utc::now());
        }
    }
}

fn lock_data(data: &Mutex<StoreData>) -> MutexGuard<'_, StoreData> {
    data.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-process store. Used by tests and as the fallback when no state file
/// can be opened.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<StoreData>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, StoreData> {
        lock_data(&self.inner)
    }

    /// Whether a bookkeeping row exists for `session`.
    pub fn has_session(&self, session: &str) -> bool {
        self.inner().sessions.contains_key(session)
    }
}

impl SessionStore for MemoryStore {
    fn locked_transcript(&self, session: &str) -> Result<Option<String>> {
        Ok(self.inner().locked_transcript(session))
    }

    fn lock_transcript(&self, session: &str, transcript_id: &str) -> Result<()> {
        self.inner().lock_transcript(session, transcript_id);
        Ok(())
    }

    fn create_session(&self, session: &str) -> Result<()> {
        self.inner().create_session(session);
        Ok(())
    }

    fn touch_session(&self, session: &str) -> Result<()> {
        self.inner().touch_session(session);
        Ok(())
    }

    fn delete_session(&self, session: &str) -> Result<()> {
        self.inner().sessions.remove(session);
        Ok(())
    }

    fn hotkeys(&self) -> Result<BTreeMap<u8, String>> {
        Ok(self.inner().hotkeys.clone())
    }

    fn set_hotkey(&self, slot: u8, session: &str) -> Result<()> {
        self.inner().hotkeys.insert(slot, session.to_string());
        Ok(())
    }

    fn clear_hotkey(&self, slot: u8) -> Result<()> {
        self.inner().hotkeys.remove(&slot);
        Ok(())
    }

    fn score_state(&self) -> Result<Option<ScoreState>> {
        Ok(self.inner().score.clone())
    }

    fn save_score_state(&self, state: &ScoreState) -> Result<()> {
        self.inner().score = Some(state.clone());
        Ok(())
    }
}

/// Store backed by a single JSON snapshot file.
///
/// Every mutation rewrites the snapshot, except `touch_session`, whose
/// last-seen stamps are written with the next mutation or `flush`.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    data: Mutex<StoreData>,
}

impl FileStore {
    /// `<data dir>/agent-deck/state.json`
    pub fn default_path() -> Result<PathBuf> {
        dirs::data_dir()
            .map(|dir| dir.join("agent-deck").join("state.json"))
            .ok_or_else(|| DeckError::Store("no data directory for this platform".to_string()))
    }

    /// Open the snapshot at `path`. A missing file starts an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| DeckError::Json {
                context: format!("parsing {}", path.display()),
                source,
            })?,
            Err(e) if e.kind() == ErrorKind::NotFound => StoreData::default(),
            Err(source) => {
                return Err(DeckError::Io {
                    context: format!("reading {}", path.display()),
                    source,
                })
            }
        };
        debug!(path = %path.display(), "opened state file");
        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the current snapshot to disk.
    pub fn flush(&self) -> Result<()> {
        let data = lock_data(&self.data);
        self.write(&data)
    }

    fn mutate(&self, f: impl FnOnce(&mut StoreData)) -> Result<()> {
        let mut data = lock_data(&self.data);
        f(&mut data);
        self.write(&data)
    }

    fn write(&self, data: &StoreData) -> Result<()> {
        let io_err = |context: &str, source| DeckError::Io {
            context: format!("{context} {}", self.path.display()),
            source,
        };

        let bytes = serde_json::to_vec_pretty(data).map_err(|source| DeckError::Json {
            context: "serializing store".to_string(),
            source,
        })?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err("creating directory for", e))?;
        }

        // Write then rename so a crash never leaves a truncated snapshot
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes).map_err(|e| io_err("writing", e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| io_err("replacing", e))
    }
}

impl SessionStore for FileStore {
    fn locked_transcript(&self, session: &str) -> Result<Option<String>> {
        Ok(lock_data(&self.data).locked_transcript(session))
    }

    fn lock_transcript(&self, session: &str, transcript_id: &str) -> Result<()> {
        self.mutate(|data| data.lock_transcript(session, transcript_id))
    }

    fn create_session(&self, session: &str) -> Result<()> {
        if lock_data(&self.data).sessions.contains_key(session) {
            return Ok(());
        }
        self.mutate(|data| data.create_session(session))
    }

    fn touch_session(&self, session: &str) -> Result<()> {
        lock_data(&self.data).touch_session(session);
        Ok(())
    }

    fn delete_session(&self, session: &str) -> Result<()> {
        self.mutate(|data| {
            data.sessions.remove(session);
        })
    }

    fn hotkeys(&self) -> Result<BTreeMap<u8, String>> {
        Ok(lock_data(&self.data).hotkeys.clone())
    }

    fn set_hotkey(&self, slot: u8, session: &str) -> Result<()> {
        self.mutate(|data| {
            data.hotkeys.insert(slot, session.to_string());
        })
    }

    fn clear_hotkey(&self, slot: u8) -> Result<()> {
        self.mutate(|data| {
            data.hotkeys.remove(&slot);
        })
    }

    fn score_state(&self) -> Result<Option<ScoreState>> {
        Ok(lock_data(&self.data).score.clone())
    }

    fn save_score_state(&self, state: &ScoreState) -> Result<()> {
        self.mutate(|data| data.score = Some(state.clone()))
    }
}
