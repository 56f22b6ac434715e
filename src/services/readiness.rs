//! Readiness polling
//!
//! Fixed-interval polling with an upper bound. A probe distinguishes "still
//! starting" from "will never become ready" so the wait can stop early.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::infra::{CommandExecutor, CommandSpec};

/// Container waiting reasons that do not resolve by waiting
const TERMINAL_WAITING_REASONS: &[&str] = &[
    "CrashLoopBackOff",
    "ImagePullBackOff",
    "ErrImagePull",
    "CreateContainerConfigError",
    "InvalidImageName",
];

/// Result of one probe
#[derive(Clone, Debug, PartialEq)]
pub enum ProbeResult {
    Ready,
    NotReady(String),
    Failed(String),
}

#[async_trait]
pub trait Probe: Send + Sync {
    async fn check(&self) -> ProbeResult;
}

/// Result of a whole wait
#[derive(Clone, Debug, PartialEq)]
pub enum ReadinessOutcome {
    Ready { attempts: u32 },
    TimedOut { attempts: u32, last: Option<String> },
    Failed { attempts: u32, reason: String },
    Cancelled,
}

/// Poll `probe` every `interval` until ready, failed, cancelled or `timeout` elapses
pub async fn wait_until_ready<P>(
    probe: &P,
    interval: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
) -> ReadinessOutcome
where
    P: Probe + ?Sized,
{
    let deadline = Instant::now() + timeout;
    let mut attempts = 0;
    let mut last = None;

    loop {
        if cancel.is_cancelled() {
            return ReadinessOutcome::Cancelled;
        }
        attempts += 1;
        match probe.check().await {
            ProbeResult::Ready => return ReadinessOutcome::Ready { attempts },
            ProbeResult::Failed(reason) => return ReadinessOutcome::Failed { attempts, reason },
            ProbeResult::NotReady(observation) => {
                debug!(attempts, observation = %observation, "Not ready yet");
                last = Some(observation);
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return ReadinessOutcome::TimedOut { attempts, last };
        }
        let pause = interval.min(deadline - now);
        tokio::select! {
            _ = cancel.cancelled() => return ReadinessOutcome::Cancelled,
            _ = tokio::time::sleep(pause) => {}
        }
    }
}

/// Pods selected by an `app=` label report the `Ready` condition
pub struct PodReadyProbe<'a> {
    pub executor: &'a dyn CommandExecutor,
    pub namespace: String,
    pub app_label: String,
    pub cancel: CancellationToken,
    pub timeout: Duration,
}

impl PodReadyProbe<'_> {
    pub fn command(&self) -> CommandSpec {
        CommandSpec::new(
            "kubectl",
            [
                "get".to_string(),
                "pods".to_string(),
                "-n".to_string(),
                self.namespace.clone(),
                "-l".to_string(),
                format!("app={}", self.app_label),
                "-o".to_string(),
                "json".to_string(),
            ],
        )
        .timeout(self.timeout)
        .capture()
        .quiet()
    }
}

#[async_trait]
impl Probe for PodReadyProbe<'_> {
    async fn check(&self) -> ProbeResult {
        let spec = self.command();
        match self.executor.execute(&spec, None, &self.cancel).await {
            Ok(output) if output.is_success() => assess_pods(&output.stdout, &self.app_label),
            Ok(output) => ProbeResult::NotReady(output.describe_failure("kubectl get pods")),
            Err(e) => ProbeResult::NotReady(e.to_string()),
        }
    }
}

/// Assess a `kubectl get pods -o json` document
pub fn assess_pods(json: &str, app_label: &str) -> ProbeResult {
    let doc: Value = match serde_json::from_str(json) {
        Ok(doc) => doc,
        Err(e) => return ProbeResult::NotReady(format!("unreadable pod list: {}", e)),
    };
    let pods = doc["items"].as_array().cloned().unwrap_or_default();
    if pods.is_empty() {
        return ProbeResult::NotReady(format!("no pods match app={}", app_label));
    }

    let mut terminal = None;
    let mut observations = Vec::with_capacity(pods.len());
    for pod in &pods {
        let name = pod["metadata"]["name"].as_str().unwrap_or("<unnamed>");
        if pod_is_ready(pod) {
            return ProbeResult::Ready;
        }
        if let Some(reason) = terminal_waiting_reason(pod) {
            terminal.get_or_insert_with(|| format!("pod {} is in {}", name, reason));
        }
        let phase = pod["status"]["phase"].as_str().unwrap_or("Unknown");
        observations.push(format!("{}: {}", name, phase));
    }

    match terminal {
        Some(reason) => ProbeResult::Failed(reason),
        None => ProbeResult::NotReady(observations.join(", ")),
    }
}

fn pod_is_ready(pod: &Value) -> bool {
    pod["status"]["conditions"]
        .as_array()
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c["type"] == "Ready" && c["status"] == "True")
        })
        .unwrap_or(false)
}

fn terminal_waiting_reason(pod: &Value) -> Option<String> {
    let statuses = pod["status"]["containerStatuses"].as_array()?;
    statuses
        .iter()
        .filter_map(|s| s["state"]["waiting"]["reason"].as_str())
        .find(|reason| TERMINAL_WAITING_REASONS.contains(reason))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::executor::scripted::ScriptedExecutor;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingProbe {
        ready_after: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Probe for CountingProbe {
        async fn check(&self) -> ProbeResult {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.ready_after {
                ProbeResult::Ready
            } else {
                ProbeResult::NotReady(format!("attempt {}", n))
            }
        }
    }

    struct FixedProbe(ProbeResult);

    #[async_trait]
    impl Probe for FixedProbe {
        async fn check(&self) -> ProbeResult {
            self.0.clone()
        }
    }

    const TICK: Duration = Duration::from_millis(5);

    #[tokio::test]
    async fn test_ready_after_some_attempts() {
        let probe = CountingProbe {
            ready_after: 3,
            calls: AtomicU32::new(0),
        };
        let outcome =
            wait_until_ready(&probe, TICK, Duration::from_secs(5), &CancellationToken::new()).await;
        assert_eq!(outcome, ReadinessOutcome::Ready { attempts: 3 });
    }

    #[tokio::test]
    async fn test_times_out_with_last_observation() {
        let probe = FixedProbe(ProbeResult::NotReady("Pending".to_string()));
        let outcome = wait_until_ready(
            &probe,
            TICK,
            Duration::from_millis(30),
            &CancellationToken::new(),
        )
        .await;
        match outcome {
            ReadinessOutcome::TimedOut { attempts, last } => {
                assert!(attempts >= 2);
                assert_eq!(last.as_deref(), Some("Pending"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failed_probe_stops_early() {
        let probe = FixedProbe(ProbeResult::Failed("CrashLoopBackOff".to_string()));
        let outcome =
            wait_until_ready(&probe, TICK, Duration::from_secs(60), &CancellationToken::new()).await;
        assert_eq!(
            outcome,
            ReadinessOutcome::Failed {
                attempts: 1,
                reason: "CrashLoopBackOff".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_cancel_interrupts_wait() {
        let probe = FixedProbe(ProbeResult::NotReady("Pending".to_string()));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let outcome =
            wait_until_ready(&probe, Duration::from_secs(30), Duration::from_secs(60), &cancel).await;
        assert_eq!(outcome, ReadinessOutcome::Cancelled);
    }

    fn pod(name: &str, ready: bool, waiting: Option<&str>) -> Value {
        let mut status = serde_json::json!({
            "phase": if ready { "Running" } else { "Pending" },
            "conditions": [{ "type": "Ready", "status": if ready { "True" } else { "False" } }],
        });
        if let Some(reason) = waiting {
            status["containerStatuses"] =
                serde_json::json!([{ "name": "db", "state": { "waiting": { "reason": reason } } }]);
        }
        serde_json::json!({ "metadata": { "name": name }, "status": status })
    }

    fn pod_list(pods: Vec<Value>) -> String {
        serde_json::json!({ "kind": "List", "items": pods }).to_string()
    }

    #[test]
    fn test_assess_pods() {
        assert!(matches!(
            assess_pods(&pod_list(vec![]), "postgresql"),
            ProbeResult::NotReady(m) if m.contains("app=postgresql")
        ));
        assert_eq!(
            assess_pods(&pod_list(vec![pod("db-0", true, None)]), "postgresql"),
            ProbeResult::Ready
        );
        assert_eq!(
            assess_pods(
                &pod_list(vec![pod("db-1", false, Some("ContainerCreating"))]),
                "postgresql"
            ),
            ProbeResult::NotReady("db-1: Pending".to_string())
        );
        assert_eq!(
            assess_pods(
                &pod_list(vec![pod("db-1", false, Some("ImagePullBackOff"))]),
                "postgresql"
            ),
            ProbeResult::Failed("pod db-1 is in ImagePullBackOff".to_string())
        );
        // an old crashing pod does not mask a ready replacement
        assert_eq!(
            assess_pods(
                &pod_list(vec![
                    pod("db-old", false, Some("CrashLoopBackOff")),
                    pod("db-new", true, None)
                ]),
                "postgresql"
            ),
            ProbeResult::Ready
        );
        assert!(matches!(assess_pods("{", "x"), ProbeResult::NotReady(_)));
    }

    #[tokio::test]
    async fn test_pod_probe_runs_kubectl() {
        let ready = pod_list(vec![pod("db-0", true, None)]);
        let exec = ScriptedExecutor::new().on_sequence(
            "kubectl get pods",
            &[(1, ""), (0, ready.as_str())],
        );
        let probe = PodReadyProbe {
            executor: &exec,
            namespace: "jhipster".to_string(),
            app_label: "postgresql".to_string(),
            cancel: CancellationToken::new(),
            timeout: Duration::from_secs(10),
        };

        assert!(matches!(probe.check().await, ProbeResult::NotReady(_)));
        assert_eq!(probe.check().await, ProbeResult::Ready);
        assert_eq!(
            exec.calls()[0],
            "kubectl get pods -n jhipster -l app=postgresql -o json"
        );
    }
}
