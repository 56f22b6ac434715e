//! Run store
//!
//! Holds the active run and a bounded history of finished runs.

use std::collections::VecDeque;
use tokio::sync::RwLock;

use crate::config::env::constants::MAX_RUN_HISTORY;
use crate::domain::run::PipelineRun;

pub struct RunStore {
    /// Run in progress
    active: RwLock<Option<PipelineRun>>,
    /// Finished runs, newest first
    history: RwLock<VecDeque<PipelineRun>>,
    max_history: usize,
}

impl RunStore {
    pub fn new() -> Self {
        Self::with_capacity(MAX_RUN_HISTORY)
    }

    pub fn with_capacity(max_history: usize) -> Self {
        Self {
            active: RwLock::new(None),
            history: RwLock::new(VecDeque::new()),
            max_history,
        }
    }

    /// Record a run snapshot. Terminal runs move to the history.
    pub async fn update(&self, run: PipelineRun) {
        if !run.status.is_terminal() {
            *self.active.write().await = Some(run);
            return;
        }

        {
            let mut active = self.active.write().await;
            if active.as_ref().is_some_and(|a| a.id == run.id) {
                *active = None;
            }
        }

        let mut history = self.history.write().await;
        history.retain(|r| r.id != run.id);
        history.push_front(run);
        while history.len() > self.max_history {
            history.pop_back();
        }
    }

    pub async fn active(&self) -> Option<PipelineRun> {
        self.active.read().await.clone()
    }

    /// Active run or a run from the history
    pub async fn get(&self, run_id: &str) -> Option<PipelineRun> {
        if let Some(run) = self.active.read().await.as_ref().filter(|r| r.id == run_id) {
            return Some(run.clone());
        }
        let history = self.history.read().await;
        history.iter().find(|r| r.id == run_id).cloned()
    }

    /// Newest first, the active run included
    pub async fn recent(&self, limit: usize, status: Option<&str>) -> Vec<PipelineRun> {
        let active = self.active.read().await.clone();
        let history = self.history.read().await;
        active
            .into_iter()
            .chain(history.iter().cloned())
            .filter(|r| status.map_or(true, |s| r.status.as_str() == s))
            .take(limit)
            .collect()
    }

    pub async fn history_count(&self) -> usize {
        self.history.read().await.len()
    }
}

impl Default for RunStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::run::RunStatus;

    fn finished(id: &str, status: RunStatus) -> PipelineRun {
        let mut run = PipelineRun::new(id.to_string(), 1);
        run.complete(status);
        run
    }

    #[tokio::test]
    async fn test_active_run_moves_to_history() {
        let store = RunStore::new();
        let run = PipelineRun::new("r1".to_string(), 1);
        store.update(run.clone()).await;
        assert_eq!(store.active().await.unwrap().id, "r1");
        assert_eq!(store.get("r1").await.unwrap().status, RunStatus::Running);

        let mut done = run;
        done.complete(RunStatus::Unstable);
        store.update(done).await;
        assert!(store.active().await.is_none());
        assert_eq!(store.get("r1").await.unwrap().status, RunStatus::Unstable);
        assert_eq!(store.history_count().await, 1);
    }

    #[tokio::test]
    async fn test_history_is_bounded_and_newest_first() {
        let store = RunStore::with_capacity(2);
        store.update(finished("a", RunStatus::Success)).await;
        store.update(finished("b", RunStatus::Failed)).await;
        store.update(finished("c", RunStatus::Success)).await;
        store.update(PipelineRun::new("d".to_string(), 4)).await;

        let ids: Vec<String> = store.recent(10, None).await.into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["d", "c", "b"]);
        assert!(store.get("a").await.is_none());

        let failed = store.recent(10, Some("failed")).await;
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, "b");
        assert_eq!(store.recent(1, None).await.len(), 1);
    }
}
