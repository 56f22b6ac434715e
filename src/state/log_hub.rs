//! Log channels
//!
//! One broadcast channel per run. The hub drops its sender when the run
//! finishes, so subscribers see the channel close once the pipeline's own
//! sender is gone too.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};

use crate::domain::run::LogLine;

/// Channel capacity; slow subscribers skip lines beyond this
const LOG_CHANNEL_CAPACITY: usize = 1024;

struct LogChannel {
    /// `None` once the run finished
    sender: Option<broadcast::Sender<LogLine>>,
    created_at: DateTime<Utc>,
}

pub struct LogHub {
    channels: RwLock<HashMap<String, LogChannel>>,
}

impl LogHub {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Create the channel for a run, or return the live sender
    pub async fn create(&self, run_id: &str) -> broadcast::Sender<LogLine> {
        let mut channels = self.channels.write().await;
        if let Some(sender) = channels.get(run_id).and_then(|c| c.sender.clone()) {
            return sender;
        }

        let (sender, _) = broadcast::channel(LOG_CHANNEL_CAPACITY);
        channels.insert(
            run_id.to_string(),
            LogChannel {
                sender: Some(sender.clone()),
                created_at: Utc::now(),
            },
        );
        sender
    }

    /// `None` when the run is unknown or already finished
    pub async fn subscribe(&self, run_id: &str) -> Option<broadcast::Receiver<LogLine>> {
        let channels = self.channels.read().await;
        channels
            .get(run_id)
            .and_then(|c| c.sender.as_ref())
            .map(broadcast::Sender::subscribe)
    }

    /// Release the hub's sender
    pub async fn finish(&self, run_id: &str) {
        let mut channels = self.channels.write().await;
        if let Some(channel) = channels.get_mut(run_id) {
            channel.sender = None;
        }
    }

    /// Unknown channels count as finished
    pub async fn is_finished(&self, run_id: &str) -> bool {
        let channels = self.channels.read().await;
        channels.get(run_id).map_or(true, |c| c.sender.is_none())
    }

    /// Forget finished channels older than `max_age_hours`
    pub async fn cleanup(&self, max_age_hours: i64) {
        let now = Utc::now();
        let mut channels = self.channels.write().await;
        channels.retain(|_, channel| {
            channel.sender.is_some() || (now - channel.created_at).num_hours() < max_age_hours
        });
    }

    pub async fn count(&self) -> usize {
        self.channels.read().await.len()
    }
}

impl Default for LogHub {
    fn default() -> Self {
        Self::new()
    }
}
