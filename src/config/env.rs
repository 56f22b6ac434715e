//! Environment configuration
//!
//! Every setting is read from a `PIPELINE_*` variable, with fallbacks for the
//! names CI servers already export (`BUILD_NUMBER`, `DOCKER_USERNAME`, ...).

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::domain::stage::StageId;
use crate::error::PipelineError;

/// Full pipeline configuration for one run
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Repository checkout the stages run in
    pub work_dir: PathBuf,
    /// Clone source when `work_dir` is not yet a checkout
    pub repo_url: Option<String>,
    pub branch: String,
    /// Spring profile the container must start with
    pub spring_profile: String,
    /// Externally supplied build number; otherwise the persisted counter is used
    pub build_number: Option<u64>,
    /// Local state (build counter)
    pub data_dir: PathBuf,
    pub image: ImageConfig,
    pub registry_credentials: Option<RegistryCredentials>,
    pub cluster: ClusterConfig,
    pub analysis: Option<AnalysisConfig>,
    /// Base URL of the deployed service for the verify smoke check
    pub smoke_url: Option<String>,
    pub timeouts: Timeouts,
    pub skip_stages: BTreeSet<StageId>,
}

/// Image naming
#[derive(Clone, Debug)]
pub struct ImageConfig {
    pub name: String,
    /// Registry host, `None` for Docker Hub
    pub registry_host: Option<String>,
    /// Account or organisation in the registry
    pub registry_namespace: Option<String>,
}

/// Registry credential pair
#[derive(Clone)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Kubernetes target
#[derive(Clone, Debug)]
pub struct ClusterConfig {
    pub namespace: String,
    pub app_deployment: String,
    /// Container whose image reference is updated on rollout
    pub app_container: String,
    pub app_service: String,
    /// `app=` label selecting the database pods
    pub db_app_label: String,
    pub manifests_dir: PathBuf,
    pub health_path: String,
    /// Cluster is a local Minikube
    pub minikube: bool,
}

/// Quality scanner
#[derive(Clone)]
pub struct AnalysisConfig {
    pub host_url: String,
    pub token: Option<String>,
}

impl fmt::Debug for AnalysisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisConfig")
            .field("host_url", &self.host_url)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Stage-local bounds
#[derive(Clone, Debug)]
pub struct Timeouts {
    pub readiness: Duration,
    pub readiness_interval: Duration,
    pub rollout: Duration,
    pub command: Duration,
    pub run: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            readiness: Duration::from_secs(constants::READINESS_TIMEOUT_SECS),
            readiness_interval: Duration::from_secs(constants::READINESS_INTERVAL_SECS),
            rollout: Duration::from_secs(constants::ROLLOUT_TIMEOUT_SECS),
            command: Duration::from_secs(constants::COMMAND_TIMEOUT_SECS),
            run: Duration::from_secs(constants::RUN_TIMEOUT_SECS),
        }
    }
}

/// HTTP agent settings
#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub api_key: String,
    pub port: u16,
}

impl AgentConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let api_key = lookup("PIPELINE_API_KEY").unwrap_or_else(|| {
            warn!("PIPELINE_API_KEY not set, using the default key");
            constants::DEFAULT_API_KEY.to_string()
        });
        let port = lookup("PORT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(constants::DEFAULT_PORT);
        Self { api_key, port }
    }
}

impl PipelineConfig {
    /// Load from the process environment
    pub fn from_env() -> Result<Self, PipelineError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, PipelineError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let with_fallback =
            |primary: &str, fallback: &str| get(primary).or_else(|| get(fallback));

        let work_dir = PathBuf::from(get("PIPELINE_WORK_DIR").unwrap_or_else(|| ".".to_string()));
        let data_dir = get("PIPELINE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| work_dir.join(constants::DATA_DIR_NAME));

        let build_number = match with_fallback("PIPELINE_BUILD_NUMBER", "BUILD_NUMBER") {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(n) if n > 0 => Some(n),
                _ => {
                    return Err(PipelineError::config(format!(
                        "build number '{}' is not a positive integer",
                        raw
                    )))
                }
            },
            None => None,
        };

        let registry_credentials = match (
            with_fallback("PIPELINE_REGISTRY_USERNAME", "DOCKER_USERNAME"),
            with_fallback("PIPELINE_REGISTRY_PASSWORD", "DOCKER_PASSWORD"),
        ) {
            (Some(username), Some(password)) => Some(RegistryCredentials { username, password }),
            (Some(_), None) | (None, Some(_)) => {
                warn!("Only one of registry username/password is set, publishing is disabled");
                None
            }
            (None, None) => None,
        };

        let image = ImageConfig {
            name: get("PIPELINE_IMAGE_NAME")
                .unwrap_or_else(|| constants::DEFAULT_IMAGE_NAME.to_string()),
            registry_host: get("PIPELINE_REGISTRY_HOST"),
            registry_namespace: with_fallback("PIPELINE_REGISTRY_NAMESPACE", "DOCKERHUB_NAMESPACE")
                .or_else(|| registry_credentials.as_ref().map(|c| c.username.clone())),
        };

        let app_deployment = get("PIPELINE_APP_DEPLOYMENT")
            .unwrap_or_else(|| constants::DEFAULT_APP_NAME.to_string());
        let cluster = ClusterConfig {
            namespace: get("PIPELINE_K8S_NAMESPACE")
                .unwrap_or_else(|| constants::DEFAULT_NAMESPACE.to_string()),
            app_container: get("PIPELINE_APP_CONTAINER").unwrap_or_else(|| app_deployment.clone()),
            app_service: get("PIPELINE_APP_SERVICE").unwrap_or_else(|| app_deployment.clone()),
            app_deployment,
            db_app_label: get("PIPELINE_DB_APP_LABEL")
                .unwrap_or_else(|| constants::DEFAULT_DB_LABEL.to_string()),
            manifests_dir: PathBuf::from(
                get("PIPELINE_MANIFESTS_DIR")
                    .unwrap_or_else(|| constants::DEFAULT_MANIFESTS_DIR.to_string()),
            ),
            health_path: get("PIPELINE_HEALTH_PATH")
                .unwrap_or_else(|| constants::DEFAULT_HEALTH_PATH.to_string()),
            minikube: get("PIPELINE_MINIKUBE").map(|v| parse_bool(&v)).unwrap_or(false),
        };

        let analysis = get("PIPELINE_SONAR_HOST_URL").map(|host_url| AnalysisConfig {
            host_url,
            token: with_fallback("PIPELINE_SONAR_TOKEN", "SONAR_TOKEN"),
        });

        let secs = |key: &str, default: u64| -> Result<Duration, PipelineError> {
            match get(key) {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|_| {
                        PipelineError::config(format!(
                            "{} must be a number of seconds, got '{}'",
                            key, raw
                        ))
                    }),
                None => Ok(Duration::from_secs(default)),
            }
        };
        use constants::*;
        let timeouts = Timeouts {
            readiness: secs("PIPELINE_READINESS_TIMEOUT_SECS", READINESS_TIMEOUT_SECS)?,
            readiness_interval: secs("PIPELINE_READINESS_INTERVAL_SECS", READINESS_INTERVAL_SECS)?,
            rollout: secs("PIPELINE_ROLLOUT_TIMEOUT_SECS", ROLLOUT_TIMEOUT_SECS)?,
            command: secs("PIPELINE_COMMAND_TIMEOUT_SECS", COMMAND_TIMEOUT_SECS)?,
            run: secs("PIPELINE_RUN_TIMEOUT_SECS", RUN_TIMEOUT_SECS)?,
        };
        if timeouts.readiness_interval.is_zero() {
            return Err(PipelineError::config(
                "PIPELINE_READINESS_INTERVAL_SECS must be at least 1",
            ));
        }

        let skip_stages = match get("PIPELINE_SKIP_STAGES") {
            Some(raw) => parse_stage_list(&raw)?,
            None => BTreeSet::new(),
        };

        Ok(Self {
            work_dir,
            repo_url: get("PIPELINE_REPO_URL"),
            branch: get("PIPELINE_BRANCH").unwrap_or_else(|| constants::DEFAULT_BRANCH.to_string()),
            spring_profile: get("PIPELINE_SPRING_PROFILE")
                .unwrap_or_else(|| constants::DEFAULT_SPRING_PROFILE.to_string()),
            build_number,
            data_dir,
            image,
            registry_credentials,
            cluster,
            analysis,
            smoke_url: get("PIPELINE_SMOKE_URL"),
            timeouts,
            skip_stages,
        })
    }

    /// Manifest directory resolved against the work dir
    pub fn manifests_path(&self) -> PathBuf {
        resolve(&self.work_dir, &self.cluster.manifests_dir)
    }

    pub fn is_skipped(&self, stage: StageId) -> bool {
        self.skip_stages.contains(&stage)
    }
}

/// Parse a comma separated stage list such as `analysis,publish`
pub fn parse_stage_list(raw: &str) -> Result<BTreeSet<StageId>, PipelineError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<StageId>().map_err(PipelineError::config))
        .collect()
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn parse_bool(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("yes")
}

/// Defaults
pub mod constants {
    pub const DEFAULT_IMAGE_NAME: &str = "jhipster-sample-app";
    pub const DEFAULT_APP_NAME: &str = "jhipster-app";
    pub const DEFAULT_NAMESPACE: &str = "jhipster";
    pub const DEFAULT_DB_LABEL: &str = "postgresql";
    pub const DEFAULT_MANIFESTS_DIR: &str = "k8s";
    pub const DEFAULT_HEALTH_PATH: &str = "/management/health";
    pub const DEFAULT_BRANCH: &str = "main";
    pub const DEFAULT_SPRING_PROFILE: &str = "prod";
    pub const DATA_DIR_NAME: &str = ".rollout-pipeline";

    pub const READINESS_TIMEOUT_SECS: u64 = 300;
    pub const READINESS_INTERVAL_SECS: u64 = 5;
    pub const ROLLOUT_TIMEOUT_SECS: u64 = 300;
    pub const COMMAND_TIMEOUT_SECS: u64 = 1800; // 30 minutes
    pub const RUN_TIMEOUT_SECS: u64 = 3600;

    pub const DEFAULT_API_KEY: &str = "change-me-in-production";
    pub const DEFAULT_PORT: u16 = 9876;

    /// Runs kept in agent history
    pub const MAX_RUN_HISTORY: usize = 50;

    /// Lines of workload log captured when a rollout fails
    pub const DIAGNOSTIC_LOG_TAIL: usize = 50;

    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}
