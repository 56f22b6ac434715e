//! Sample manifests under deploy/k8s

use std::path::PathBuf;

use rollout_pipeline::config::PipelineConfig;
use rollout_pipeline::services::manifests::{ManifestSet, Tier};

fn sample_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("deploy/k8s")
}

fn config() -> PipelineConfig {
    PipelineConfig::from_lookup(|_| None).unwrap()
}

#[test]
fn sample_manifests_apply_in_dependency_order() {
    let config = config();
    let set = ManifestSet::load(&sample_dir(), &config.cluster).unwrap();

    let order: Vec<String> = set.files().iter().map(|f| f.file_name()).collect();
    assert_eq!(
        order,
        vec![
            "namespace.yaml",
            "app-config.yaml",
            "postgresql-storage.yaml",
            "postgresql.yaml",
            "jhipster-app-deployment.yaml",
            "jhipster-app-service.yaml",
        ]
    );

    let backing: Vec<String> = set.backing_files().map(|f| f.file_name()).collect();
    assert_eq!(backing.len(), 4);
    assert!(set.application_files().all(|f| f.tier() >= Tier::AppDeployment));
}

#[test]
fn sample_manifests_satisfy_the_deployment_contract() {
    let config = config();
    let set = ManifestSet::load(&sample_dir(), &config.cluster).unwrap();
    let warnings = set.validate(&config.cluster).unwrap();
    assert!(warnings.is_empty(), "{:?}", warnings);

    let deployment = set
        .docs()
        .find(|d| d.tier == Tier::AppDeployment)
        .unwrap();
    let containers = deployment.containers();
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0].name, config.cluster.app_container);
    assert!(containers[0].probes_health(&config.cluster.health_path));
}

#[test]
fn renamed_container_breaks_the_contract() {
    let config = PipelineConfig::from_lookup(|key| {
        (key == "PIPELINE_APP_CONTAINER").then(|| "web".to_string())
    })
    .unwrap();
    let set = ManifestSet::load(&sample_dir(), &config.cluster).unwrap();
    let err = set.validate(&config.cluster).unwrap_err();
    assert!(err.to_string().contains("no container named 'web'"), "{}", err);
}
