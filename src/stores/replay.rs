//! File-backed match feed
//!
//! Replays a JSON list of snapshots, one per fetch. Once the list is exhausted
//! the last snapshot keeps being served, which the watcher sees as "no change".

use crate::common::traits::MatchDataSource;
use crate::common::types::{MatchId, MatchState};
use crate::errors::{MatchdayResult, StorageError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

pub struct ReplayMatchSource {
    snapshots: Vec<HashMap<MatchId, MatchState>>,
    cursor: AtomicUsize,
}

impl ReplayMatchSource {
    pub fn new(snapshots: Vec<HashMap<MatchId, MatchState>>) -> Self {
        Self {
            snapshots,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> MatchdayResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            StorageError::ReadFailed(format!("{}: {}", path.display(), e))
        })?;
        let snapshots: Vec<HashMap<MatchId, MatchState>> = serde_json::from_str(&content)?;

        tracing::info!(
            path = %path.display(),
            snapshots = snapshots.len(),
            "Loaded match feed replay"
        );
        Ok(Self::new(snapshots))
    }

    /// Number of snapshots already served
    pub fn position(&self) -> usize {
        self.cursor.load(Ordering::SeqCst).min(self.snapshots.len())
    }

    pub fn is_exhausted(&self) -> bool {
        self.position() >= self.snapshots.len()
    }
}

#[async_trait]
impl MatchDataSource for ReplayMatchSource {
    async fn get_last_match_infos(&self, watched: &[MatchId]) -> MatchdayResult<HashMap<MatchId, MatchState>> {
        if self.snapshots.is_empty() {
            return Ok(HashMap::new());
        }

        let index = self.cursor.fetch_add(1, Ordering::SeqCst).min(self.snapshots.len() - 1);
        let snapshot = &self.snapshots[index];

        Ok(watched
            .iter()
            .filter_map(|id| snapshot.get(id).map(|state| (id.clone(), state.clone())))
            .collect())
    }
}
