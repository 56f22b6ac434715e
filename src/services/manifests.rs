//! Kubernetes manifests
//!
//! Discovers `*.yaml`/`*.yml` files, parses every document, orders files so
//! dependencies are applied first and checks the application deployment
//! against the image-update contract.

use serde::Deserialize;
use serde_yaml::Value;
use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::ClusterConfig;
use crate::error::PipelineError;

/// Apply tier of a manifest document. Lower tiers are applied first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    Namespace,
    Config,
    Volume,
    VolumeClaim,
    Backing,
    AppDeployment,
    AppService,
    Other,
}

impl Tier {
    /// Tiers at or above this one depend on the database being ready
    pub fn is_application(&self) -> bool {
        *self >= Tier::AppDeployment
    }
}

/// One YAML document
#[derive(Clone, Debug)]
pub struct ManifestDoc {
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
    pub tier: Tier,
    raw: Value,
}

impl ManifestDoc {
    fn from_value(raw: Value, cluster: &ClusterConfig) -> Option<Self> {
        let kind = raw["kind"].as_str()?.to_string();
        let name = raw["metadata"]["name"].as_str().unwrap_or_default().to_string();
        let namespace = raw["metadata"]["namespace"].as_str().map(str::to_string);
        let tier = classify(&kind, &name, cluster);
        Some(Self {
            kind,
            name,
            namespace,
            tier,
            raw,
        })
    }

    /// `Kind/name`, as kubectl prints it
    pub fn reference(&self) -> String {
        format!("{}/{}", self.kind.to_lowercase(), self.name)
    }

    /// Pod template containers of a workload
    pub fn containers(&self) -> Vec<Container> {
        let Some(seq) = self.raw["spec"]["template"]["spec"]["containers"].as_sequence() else {
            return Vec::new();
        };
        seq.iter()
            .filter_map(|c| Container::deserialize(c.clone()).ok())
            .collect()
    }
}

/// The parts of a container spec the contract checks
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub readiness_probe: Option<Probe>,
    #[serde(default)]
    pub liveness_probe: Option<Probe>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Probe {
    #[serde(default)]
    pub http_get: Option<HttpGet>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct HttpGet {
    #[serde(default)]
    pub path: Option<String>,
}

impl Container {
    /// Readiness or liveness probe hitting `health_path`
    pub fn probes_health(&self, health_path: &str) -> bool {
        [&self.readiness_probe, &self.liveness_probe]
            .into_iter()
            .flatten()
            .filter_map(|p| p.http_get.as_ref()?.path.as_deref())
            .any(|path| path.starts_with(health_path))
    }
}

/// One manifest file and its documents
#[derive(Clone, Debug)]
pub struct ManifestFile {
    pub path: PathBuf,
    pub docs: Vec<ManifestDoc>,
}

impl ManifestFile {
    /// A file is applied in the tier of its earliest document
    pub fn tier(&self) -> Tier {
        self.docs.iter().map(|d| d.tier).min().unwrap_or(Tier::Other)
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Ordered manifest set
#[derive(Clone, Debug)]
pub struct ManifestSet {
    pub dir: PathBuf,
    files: Vec<ManifestFile>,
}

impl ManifestSet {
    /// Load and order every manifest under `dir` (not recursive)
    pub fn load(dir: &Path, cluster: &ClusterConfig) -> Result<Self, PipelineError> {
        let entries = std::fs::read_dir(dir).map_err(|e| PipelineError::io(dir, e))?;
        let mut paths = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| PipelineError::io(dir, e))?.path();
            let is_yaml = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e == "yaml" || e == "yml");
            if is_yaml && path.is_file() {
                paths.push(path);
            }
        }

        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            let content = std::fs::read_to_string(&path).map_err(|e| PipelineError::io(&path, e))?;
            let docs = parse_documents(&path, &content, cluster)?;
            if docs.is_empty() {
                debug!(path = %path.display(), "Skipping manifest without documents");
                continue;
            }
            files.push(ManifestFile { path, docs });
        }
        if files.is_empty() {
            return Err(PipelineError::NoManifests(dir.to_path_buf()));
        }

        files.sort_by(|a, b| match a.tier().cmp(&b.tier()) {
            Ordering::Equal => a.file_name().cmp(&b.file_name()),
            other => other,
        });

        Ok(Self {
            dir: dir.to_path_buf(),
            files,
        })
    }

    /// Files in apply order
    pub fn files(&self) -> &[ManifestFile] {
        &self.files
    }

    /// Files applied before the database readiness wait
    pub fn backing_files(&self) -> impl Iterator<Item = &ManifestFile> {
        self.files.iter().filter(|f| !f.tier().is_application())
    }

    /// Files applied once the database is ready
    pub fn application_files(&self) -> impl Iterator<Item = &ManifestFile> {
        self.files.iter().filter(|f| f.tier().is_application())
    }

    pub fn docs(&self) -> impl Iterator<Item = &ManifestDoc> {
        self.files.iter().flat_map(|f| f.docs.iter())
    }

    /// Check the application deployment contract
    ///
    /// Returns warnings for soft issues; a missing deployment or container is an error.
    pub fn validate(&self, cluster: &ClusterConfig) -> Result<Vec<String>, PipelineError> {
        let deployment = self
            .docs()
            .find(|d| d.tier == Tier::AppDeployment)
            .ok_or_else(|| {
                PipelineError::manifest(
                    &self.dir,
                    format!("no Deployment named '{}'", cluster.app_deployment),
                )
            })?;

        let containers = deployment.containers();
        let container = containers
            .iter()
            .find(|c| c.name == cluster.app_container)
            .ok_or_else(|| {
                let names: Vec<&str> = containers.iter().map(|c| c.name.as_str()).collect();
                PipelineError::manifest(
                    &self.dir,
                    format!(
                        "deployment '{}' has no container named '{}' (found: {})",
                        cluster.app_deployment,
                        cluster.app_container,
                        if names.is_empty() { "none".to_string() } else { names.join(", ") }
                    ),
                )
            })?;

        let mut warnings = Vec::new();
        if !container.probes_health(&cluster.health_path) {
            warnings.push(format!(
                "container '{}' has no HTTP readiness or liveness probe on {}",
                container.name, cluster.health_path
            ));
        }
        if !self.docs().any(|d| d.tier == Tier::AppService) {
            warnings.push(format!("no Service named '{}'", cluster.app_service));
        }
        for doc in self.docs() {
            if let Some(ref ns) = doc.namespace {
                if ns != &cluster.namespace && doc.kind != "Namespace" {
                    warnings.push(format!(
                        "{} targets namespace '{}' instead of '{}'",
                        doc.reference(),
                        ns,
                        cluster.namespace
                    ));
                }
            }
        }
        for warning in &warnings {
            warn!(dir = %self.dir.display(), "{}", warning);
        }
        Ok(warnings)
    }
}

impl fmt::Display for ManifestSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, file) in self.files.iter().enumerate() {
            let docs: Vec<String> = file.docs.iter().map(ManifestDoc::reference).collect();
            writeln!(f, "{:>2}. {:<28} {}", i + 1, file.file_name(), docs.join(", "))?;
        }
        Ok(())
    }
}

fn parse_documents(
    path: &Path,
    content: &str,
    cluster: &ClusterConfig,
) -> Result<Vec<ManifestDoc>, PipelineError> {
    let mut docs = Vec::new();
    for document in serde_yaml::Deserializer::from_str(content) {
        let value = Value::deserialize(document)
            .map_err(|e| PipelineError::manifest(path, e.to_string()))?;
        if value.is_null() {
            continue;
        }
        match ManifestDoc::from_value(value, cluster) {
            Some(doc) => docs.push(doc),
            None => return Err(PipelineError::manifest(path, "document has no kind")),
        }
    }
    Ok(docs)
}

fn classify(kind: &str, name: &str, cluster: &ClusterConfig) -> Tier {
    match kind {
        "Namespace" => Tier::Namespace,
        "ConfigMap" | "Secret" | "ServiceAccount" => Tier::Config,
        "PersistentVolume" | "StorageClass" => Tier::Volume,
        "PersistentVolumeClaim" => Tier::VolumeClaim,
        "Deployment" if name == cluster.app_deployment => Tier::AppDeployment,
        "Service" if name == cluster.app_service => Tier::AppService,
        "Deployment" | "StatefulSet" | "Service" => Tier::Backing,
        _ => Tier::Other,
    }
}
