//! Concurrent deployments through the stress harness.

use std::time::Duration;

use factory::app::Factory;
use factory::core::types::DeploymentStatus;
use factory::io::paths::FactoryPaths;
use factory::io::process::Launcher;
use factory::test_support::fast_config;

#[tokio::test(flavor = "multi_thread")]
async fn five_concurrent_deployments_are_verified_and_cleaned_up() {
    let temp = tempfile::tempdir().expect("tempdir");
    let factory = Factory::with_launcher(
        FactoryPaths::new(temp.path()),
        fast_config(),
        Launcher::new(env!("CARGO_BIN_EXE_factory")),
    )
    .expect("factory");

    let summary = factory
        .stress()
        .run(5, Duration::from_secs(15))
        .await
        .expect("stress");

    assert_eq!(summary.ready + summary.not_ready, 5);
    assert_eq!(summary.launched.len(), 5);
    assert_eq!(summary.ready, 5);
    assert!(summary.avg_ready_secs.is_some());
    assert_eq!(summary.stopped.len(), 5);
    assert!(factory.deployer.registry().is_empty());

    let deployments = factory.deployer.list(10).expect("list");
    assert!(deployments.iter().all(|d| d.status == DeploymentStatus::Stopped));

    let log = std::fs::read_to_string(factory.stress().log_path()).expect("stress log");
    let line: serde_json::Value =
        serde_json::from_str(log.lines().last().expect("line")).expect("json");
    assert_eq!(line["requested"], 5);
}
