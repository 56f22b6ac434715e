//! Agent state

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::config::{AgentConfig, PipelineConfig};
use crate::infra::{BuildCounter, CommandExecutor};

use super::log_hub::LogHub;
use super::run_store::RunStore;

/// The run currently holding the pipeline
pub struct RunningRun {
    pub run_id: String,
    pub cancel_token: CancellationToken,
}

/// Shared state of the HTTP agent
pub struct AppState {
    pub api_key: String,
    /// Base configuration for triggered runs
    pub config: Arc<PipelineConfig>,
    pub started_at: DateTime<Utc>,

    pub run_store: Arc<RunStore>,
    pub log_hub: LogHub,
    pub build_counter: BuildCounter,
    pub executor: Arc<dyn CommandExecutor>,

    /// At most one run at a time
    running: RwLock<Option<RunningRun>>,
}

impl AppState {
    pub fn new(
        config: PipelineConfig,
        agent: &AgentConfig,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        tracing::info!(
            api_key_len = agent.api_key.len(),
            port = agent.port,
            work_dir = %config.work_dir.display(),
            namespace = %config.cluster.namespace,
            "Loaded configuration"
        );

        Self {
            api_key: agent.api_key.clone(),
            build_counter: BuildCounter::new(&config.data_dir),
            config: Arc::new(config),
            started_at: Utc::now(),
            run_store: Arc::new(RunStore::new()),
            log_hub: LogHub::new(),
            executor,
            running: RwLock::new(None),
        }
    }

    /// Claim the pipeline for `run_id`; `Err` carries the id of the run holding it
    pub async fn try_register_run(&self, run_id: &str) -> Result<CancellationToken, String> {
        let mut running = self.running.write().await;
        if let Some(ref current) = *running {
            return Err(current.run_id.clone());
        }
        let cancel_token = CancellationToken::new();
        *running = Some(RunningRun {
            run_id: run_id.to_string(),
            cancel_token: cancel_token.clone(),
        });
        Ok(cancel_token)
    }

    pub async fn unregister_run(&self, run_id: &str) {
        let mut running = self.running.write().await;
        if running.as_ref().is_some_and(|r| r.run_id == run_id) {
            *running = None;
        }
    }

    pub async fn running_run_id(&self) -> Option<String> {
        self.running.read().await.as_ref().map(|r| r.run_id.clone())
    }

    /// Cancel `run_id` if it is the running one
    pub async fn cancel_run(&self, run_id: &str) -> bool {
        let running = self.running.read().await;
        match running.as_ref() {
            Some(run) if run.run_id == run_id => {
                run.cancel_token.cancel();
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::DryRunExecutor;

    fn state() -> AppState {
        let config = PipelineConfig::from_lookup(|_| None).unwrap();
        let agent = AgentConfig::from_lookup(|_| None);
        AppState::new(config, &agent, Arc::new(DryRunExecutor))
    }

    #[tokio::test]
    async fn test_single_run_gate() {
        let state = state();
        let token = state.try_register_run("a").await.unwrap();
        assert_eq!(state.try_register_run("b").await.unwrap_err(), "a");
        assert_eq!(state.running_run_id().await.as_deref(), Some("a"));

        // unregistering another id leaves the gate closed
        state.unregister_run("b").await;
        assert!(state.try_register_run("b").await.is_err());

        assert!(!state.cancel_run("b").await);
        assert!(state.cancel_run("a").await);
        assert!(token.is_cancelled());

        state.unregister_run("a").await;
        assert!(state.try_register_run("b").await.is_ok());
    }
}
