use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::{parse_transcript, SessionUsage};

const TRANSCRIPT_EXT: &str = "jsonl";

/// Transcript directories are named after the working directory with every
/// `/` replaced by `-` (`/home/me/app` becomes `-home-me-app`).
pub fn encode_project_dir(working_dir: &str) -> String {
    working_dir.replace('/', "-")
}

#[derive(Debug, Clone)]
struct Watch {
    path: PathBuf,
    last_size: Option<u64>,
    last_modified: Option<SystemTime>,
    usage: Option<SessionUsage>,
}

/// Per-session usage, re-parsed only when the locked transcript changes.
#[derive(Debug)]
pub struct UsageLedger {
    projects_dir: Option<PathBuf>,
    watches: Mutex<HashMap<String, Watch>>,
}

impl UsageLedger {
    pub fn new(projects_dir: Option<PathBuf>) -> Self {
        Self {
            projects_dir,
            watches: Mutex::new(HashMap::new()),
        }
    }

    fn watches(&self) -> MutexGuard<'_, HashMap<String, Watch>> {
        self.watches.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Transcript directory for `working_dir`. Pure path arithmetic; the
    /// directory may not exist yet.
    pub fn project_dir(&self, working_dir: &str) -> Option<PathBuf> {
        if working_dir.is_empty() {
            return None;
        }
        self.projects_dir
            .as_ref()
            .map(|root| root.join(encode_project_dir(working_dir)))
    }

    pub fn transcript_path(&self, working_dir: &str, transcript_id: &str) -> Option<PathBuf> {
        if transcript_id.is_empty() {
            return None;
        }
        self.project_dir(working_dir)
            .map(|dir| dir.join(format!("{transcript_id}.{TRANSCRIPT_EXT}")))
    }

    /// Identifier of the most recently modified transcript for `working_dir`.
    /// All directory access happens on the blocking pool.
    pub async fn find_latest_transcript(&self, working_dir: &str) -> Option<String> {
        let dir = self.project_dir(working_dir)?;
        tokio::task::spawn_blocking(move || latest_transcript_in(&dir))
            .await
            .ok()
            .flatten()
    }

    /// Track usage of `transcript_id` for `session`. Re-watching a session
    /// keeps the transcript it was first bound to.
    pub fn watch(&self, session: &str, working_dir: &str, transcript_id: &str) -> bool {
        let Some(path) = self.transcript_path(working_dir, transcript_id) else {
            debug!(session, working_dir, "no transcript location to watch");
            return false;
        };

        self.watches()
            .entry(session.to_string())
            .or_insert_with(|| Watch {
                path,
                last_size: None,
                last_modified: None,
                usage: None,
            });
        true
    }

    pub fn unwatch(&self, session: &str) {
        self.watches().remove(session);
    }

    pub fn is_watching(&self, session: &str) -> bool {
        self.watches().contains_key(session)
    }

    /// Latest parsed usage for `session`
    pub fn usage(&self, session: &str) -> Option<SessionUsage> {
        self.watches().get(session).and_then(|w| w.usage.clone())
    }

    /// Re-parse every watched transcript whose size or mtime changed.
    /// Returns the sessions whose usage was updated.
    pub async fn refresh(&self) -> Vec<String> {
        let snapshot: Vec<(String, Watch)> = self
            .watches()
            .iter()
            .map(|(name, watch)| (name.clone(), watch.clone()))
            .collect();

        let mut updated = Vec::new();
        for (name, watch) in snapshot {
            if self.refresh_one(&name, &watch).await {
                updated.push(name);
            }
        }
        updated
    }

    /// Refresh a single session now; returns its usage afterwards
    pub async fn refresh_session(&self, session: &str) -> Option<SessionUsage> {
        let watch = self.watches().get(session).cloned()?;
        self.refresh_one(session, &watch).await;
        self.usage(session)
    }

    async fn refresh_one(&self, session: &str, watch: &Watch) -> bool {
        let Ok(metadata) = tokio::fs::metadata(&watch.path).await else {
            return false;
        };
        let size = metadata.len();
        let modified = metadata.modified().ok();
        if watch.last_size == Some(size) && watch.last_modified == modified {
            return false;
        }

        let usage = match parse_transcript(&watch.path).await {
            Ok(usage) => usage,
            Err(e) => {
                warn!(session, "transcript parse failed: {e}");
                return false;
            }
        };

        let mut watches = self.watches();
        match watches.get_mut(session) {
            Some(current) if current.path == watch.path => {
                current.last_size = Some(size);
                current.last_modified = modified;
                current.usage = Some(usage);
                true
            }
            _ => false,
        }
    }
}

fn latest_transcript_in(dir: &Path) -> Option<String> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .is_some_and(|ext| ext == TRANSCRIPT_EXT)
        })
        .filter_map(|entry| {
            let modified = entry.metadata().ok()?.modified().ok()?;
            let stem = entry.path().file_stem()?.to_string_lossy().to_string();
            Some((modified, stem))
        })
        .max()
        .map(|(_, stem)| stem)
}
