//! Recent downloads registry
//!
//! A small bounded, most-recent-first view over this process's sessions and
//! the files the backend says it produced earlier. Local sessions are keyed
//! by session id, server files by name; when both describe the same file the
//! local session wins.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use tracing::{debug, warn};
use url::Url;

use crate::core::backend::BackendApi;
use crate::core::error_handling::AppResult;
use crate::core::models::{DownloadSession, ServerFile, SessionState};

pub const DEFAULT_CAPACITY: usize = 5;

/// How many evicted session ids are remembered to reject late snapshots
const EVICTED_MEMORY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKey {
    Session(String),
    ServerFile(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum RecentEntry {
    Local(DownloadSession),
    Server(ServerFile),
}

impl RecentEntry {
    pub fn key(&self) -> EntryKey {
        match self {
            Self::Local(session) => EntryKey::Session(session.id.clone()),
            Self::Server(file) => EntryKey::ServerFile(file.name.clone()),
        }
    }

    /// Local sessions still pending or transferring
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Local(session) if session.state.is_in_flight())
    }

    /// Best available display name
    pub fn display_name(&self) -> String {
        match self {
            Self::Local(session) => session
                .title
                .clone()
                .or_else(|| session.file_name.clone())
                .unwrap_or_else(|| session.source_url.to_string()),
            Self::Server(file) => file.name.clone(),
        }
    }

    pub fn state(&self) -> Option<SessionState> {
        match self {
            Self::Local(session) => Some(session.state),
            Self::Server(_) => None,
        }
    }
}

#[derive(Debug)]
struct Slot {
    entry: RecentEntry,
    /// Higher is more recent. Server files sit below every local session.
    recency: i64,
}

#[derive(Debug, Default)]
struct RegistryState {
    slots: Vec<Slot>,
    next_recency: i64,
    /// Sessions dropped by eviction, oldest first
    evicted: VecDeque<String>,
    evicted_ids: HashSet<String>,
}

impl RegistryState {
    fn bump(&mut self) -> i64 {
        self.next_recency += 1;
        self.next_recency
    }

    fn position(&self, key: &EntryKey) -> Option<usize> {
        self.slots.iter().position(|slot| &slot.entry.key() == key)
    }

    fn local_file_names(&self) -> HashSet<String> {
        self.slots
            .iter()
            .filter_map(|slot| match &slot.entry {
                RecentEntry::Local(session) => session.file_name.clone(),
                RecentEntry::Server(_) => None,
            })
            .collect()
    }

    fn remember_evicted(&mut self, id: String) {
        if !self.evicted_ids.insert(id.clone()) {
            return;
        }
        self.evicted.push_back(id);
        while self.evicted.len() > EVICTED_MEMORY {
            if let Some(oldest) = self.evicted.pop_front() {
                self.evicted_ids.remove(&oldest);
            }
        }
    }

    /// Drop the least recent entries that are not in flight until within capacity
    fn evict(&mut self, capacity: usize) {
        while self.slots.len() > capacity {
            let victim = self
                .slots
                .iter()
                .enumerate()
                .filter(|(_, slot)| !slot.entry.is_in_flight())
                .min_by_key(|(_, slot)| slot.recency)
                .map(|(index, _)| index);

            match victim {
                Some(index) => {
                    let slot = self.slots.remove(index);
                    debug!("Evicted {:?} from recent downloads", slot.entry.key());
                    if let RecentEntry::Local(session) = slot.entry {
                        self.remember_evicted(session.id);
                    }
                }
                None => {
                    debug!(
                        "Recent downloads over capacity with {} in-flight entries",
                        self.slots.len()
                    );
                    break;
                }
            }
        }
    }
}

pub struct RecentDownloads {
    capacity: usize,
    state: Mutex<RegistryState>,
}

impl Default for RecentDownloads {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl RecentDownloads {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(RegistryState::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert or update a session snapshot. Only state changes move it to the front.
    ///
    /// Only settled sessions are evicted and they never change again, so any
    /// snapshot of an evicted session arriving later is stale and dropped.
    pub fn record(&self, session: &DownloadSession) {
        let mut state = self.state.lock();
        if state.evicted_ids.contains(&session.id) {
            debug!("Ignoring snapshot of evicted session {}", session.id);
            return;
        }
        let key = EntryKey::Session(session.id.clone());

        match state.position(&key) {
            Some(index) => {
                let previous = match &state.slots[index].entry {
                    RecentEntry::Local(previous) => previous.clone(),
                    RecentEntry::Server(_) => return,
                };
                let reopened = previous.state.is_terminal() && !session.state.is_terminal();
                if reopened || session.updated_at < previous.updated_at {
                    debug!("Ignoring stale snapshot of session {}", session.id);
                    return;
                }
                let recency = if previous.state != session.state {
                    state.bump()
                } else {
                    state.slots[index].recency
                };
                state.slots[index] = Slot {
                    entry: RecentEntry::Local(session.clone()),
                    recency,
                };
            }
            None => {
                let recency = state.bump();
                state.slots.push(Slot {
                    entry: RecentEntry::Local(session.clone()),
                    recency,
                });
            }
        }

        if let Some(file_name) = &session.file_name {
            state.slots.retain(|slot| {
                !matches!(&slot.entry, RecentEntry::Server(file) if &file.name == file_name)
            });
        }

        state.evict(self.capacity);
    }

    /// Fold a server listing in behind local entries. A failed listing is
    /// logged and leaves only the local entries.
    pub fn merge(&self, listing: AppResult<Vec<ServerFile>>) {
        let mut state = self.state.lock();
        state
            .slots
            .retain(|slot| matches!(slot.entry, RecentEntry::Local(_)));

        let files = match listing {
            Ok(files) => files,
            Err(e) => {
                warn!("Could not list server files, showing local history only: {}", e);
                return;
            }
        };

        let mut taken = state.local_file_names();
        for (index, file) in files.into_iter().enumerate() {
            if !taken.insert(file.name.clone()) {
                continue;
            }
            state.slots.push(Slot {
                entry: RecentEntry::Server(file),
                recency: -(index as i64) - 1,
            });
        }

        state.evict(self.capacity);
    }

    /// Fetch the server listing and merge it. Never fails.
    pub async fn refresh(&self, api: &BackendApi, endpoint: &Url) {
        let listing = api.list_files(endpoint).await;
        self.merge(listing);
    }

    /// In-flight sessions first, then everything else by recency
    pub fn list(&self, limit: usize) -> Vec<RecentEntry> {
        let state = self.state.lock();
        let mut slots: Vec<&Slot> = state.slots.iter().collect();
        slots.sort_by(|a, b| {
            b.entry
                .is_in_flight()
                .cmp(&a.entry.is_in_flight())
                .then(b.recency.cmp(&a.recency))
        });

        slots
            .into_iter()
            .take(limit.min(self.capacity))
            .map(|slot| slot.entry.clone())
            .collect()
    }
}
