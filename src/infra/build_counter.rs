//! Persisted build counter
//!
//! Provides the monotonically increasing number used as the image tag when the
//! CI server does not supply one. Written atomically (temp file + rename).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

use crate::error::PipelineError;

const COUNTER_FILE_NAME: &str = "build-counter.json";

#[derive(Clone, Debug, Serialize, Deserialize)]
struct CounterFile {
    /// Format version
    version: u32,
    last_build: u64,
    updated_at: DateTime<Utc>,
}

/// Build counter stored under the data dir
pub struct BuildCounter {
    path: PathBuf,
}

impl BuildCounter {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(COUNTER_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last recorded build number, 0 when none
    pub async fn current(&self) -> Result<u64, PipelineError> {
        if !fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(0);
        }
        let content = fs::read_to_string(&self.path)
            .await
            .map_err(|e| PipelineError::io(&self.path, e))?;
        let file: CounterFile =
            serde_json::from_str(&content).map_err(|e| PipelineError::BuildCounter {
                path: self.path.clone(),
                message: e.to_string(),
            })?;
        Ok(file.last_build)
    }

    /// Allocate the build number for a new run
    ///
    /// An external number is used as-is and raises the stored counter so later
    /// local runs continue above it.
    pub async fn next(&self, external: Option<u64>) -> Result<u64, PipelineError> {
        let current = self.current().await?;
        let number = match external {
            Some(n) => {
                if n <= current {
                    warn!(
                        build_number = n,
                        last_build = current,
                        "External build number does not increase the counter"
                    );
                }
                n
            }
            None => current + 1,
        };
        if number > current {
            self.store(number).await?;
        }
        Ok(number)
    }

    async fn store(&self, last_build: u64) -> Result<(), PipelineError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::io(parent, e))?;
        }
        let file = CounterFile {
            version: 1,
            last_build,
            updated_at: Utc::now(),
        };
        let content = serde_json::to_string_pretty(&file).map_err(|e| PipelineError::BuildCounter {
            path: self.path.clone(),
            message: e.to_string(),
        })?;

        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, content)
            .await
            .map_err(|e| PipelineError::io(&temp_path, e))?;
        fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| PipelineError::io(&self.path, e))?;

        info!(path = %self.path.display(), last_build, "Saved build counter");
        Ok(())
    }
}
