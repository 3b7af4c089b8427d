//! Deploy tests

use std::io;

use provision_api::DeploySource;
use shipyard::store::{ContainerStore, DeployCounter};
use shipyard::ProvisionError;

use crate::common::{app, harness, pull_platform, settings, Harness};

fn git(version: &str) -> DeploySource {
    DeploySource::Git {
        version: version.to_string(),
    }
}

#[tokio::test]
async fn test_deploy_builds_first_release() {
    let h = harness();
    let mut out = Vec::new();

    let image = h.provisioner.deploy(&app(), &git("ff13e"), &mut out).await.unwrap();

    assert_eq!(image, "tsuru/app-myapp:v1");
    assert!(h.node().has_image("tsuru/app-myapp:v1"));
    assert_eq!(h.store.deploys("myapp").await.unwrap(), 1);

    // The build container is gone from the runtime and the store
    assert_eq!(h.node().container_count(), 0);
    assert!(h.store.find_by_app("myapp").await.unwrap().is_empty());
    assert_eq!(h.node().calls("create"), 1);
    assert_eq!(h.node().calls("remove"), 1);

    let output = String::from_utf8(out).unwrap();
    assert!(output.contains("Pulling tsuru/python"));
    assert!(output.contains("output of"));
}

#[tokio::test]
async fn test_deploy_numbers_releases() {
    let h = harness();
    let mut out = Vec::new();

    h.provisioner.deploy(&app(), &git("ff13e"), &mut out).await.unwrap();
    let image = h.provisioner.deploy(&app(), &git("ab12c"), &mut out).await.unwrap();

    assert_eq!(image, "tsuru/app-myapp:v2");
    assert_eq!(h.provisioner.current_image("myapp").await.unwrap(), "tsuru/app-myapp:v2");
    assert_eq!(h.provisioner.next_image("myapp").await.unwrap(), "tsuru/app-myapp:v3");
}

#[tokio::test]
async fn test_deploy_archive() {
    let h = harness();
    let mut out = Vec::new();
    let source = DeploySource::Archive {
        url: "https://s3.example.com/myapp.tar.gz".to_string(),
    };

    let image = h.provisioner.deploy(&app(), &source, &mut out).await.unwrap();
    assert_eq!(image, "tsuru/app-myapp:v1");
}

#[tokio::test]
async fn test_deploy_unknown_repository() {
    let h = harness();
    let mut out = Vec::new();
    let other = shipyard::models::App::new("otherapp", "python");

    let err = h.provisioner.deploy(&other, &git("ff13e"), &mut out).await.unwrap_err();
    assert!(matches!(err, ProvisionError::RepositoryError(_)));
    assert_eq!(h.node().calls("create"), 0);
}

#[tokio::test]
async fn test_deploy_build_failure() {
    let h = harness();
    h.node().set_wait_exit_code(1);
    let mut out = Vec::new();

    let err = h.provisioner.deploy(&app(), &git("ff13e"), &mut out).await.unwrap_err();

    assert!(matches!(err, ProvisionError::BuildFailed { code: 1 }));
    assert_eq!(h.node().calls("commit"), 0);
    assert_eq!(h.node().container_count(), 0);
    assert_eq!(h.store.deploys("myapp").await.unwrap(), 0);
}

#[tokio::test]
async fn test_deploy_commit_failure() {
    let h = harness();
    h.node().prepare_failure("commit", "disk full");
    let mut out = Vec::new();

    let err = h.provisioner.deploy(&app(), &git("ff13e"), &mut out).await.unwrap_err();

    assert_eq!(err.to_string(), "runtime API error: disk full");
    assert!(!h.node().has_image("tsuru/app-myapp:v1"));
    assert_eq!(h.node().container_count(), 0);
    assert_eq!(h.store.deploys("myapp").await.unwrap(), 0);
}

#[tokio::test]
async fn test_deploy_output_failure_rolls_back() {
    let h = harness();
    pull_platform(&h).await;

    // The first write to the client is the build output
    let mut out = tokio_test::io::Builder::new()
        .write_error(io::Error::new(io::ErrorKind::BrokenPipe, "client went away"))
        .build();

    let result = h.provisioner.deploy(&app(), &git("ff13e"), &mut out).await;

    assert!(result.is_err());
    assert_eq!(h.node().calls("stop"), 1);
    assert_eq!(h.node().container_count(), 0);
    assert!(h.store.is_empty());
    assert!(!h.node().has_image("tsuru/app-myapp:v1"));
    assert_eq!(h.store.deploys("myapp").await.unwrap(), 0);
}

#[tokio::test]
async fn test_deploy_pushes_to_registry() {
    let mut settings = settings();
    settings.registry = Some("localhost:3030".to_string());
    let h = Harness::new(settings);
    let mut out = Vec::new();

    let image = h.provisioner.deploy(&app(), &git("ff13e"), &mut out).await.unwrap();

    assert_eq!(image, "localhost:3030/tsuru/app-myapp:v1");
    assert_eq!(h.node().pushed_images(), vec!["localhost:3030/tsuru/app-myapp:v1"]);
    assert!(String::from_utf8(out).unwrap().contains("Pushing localhost:3030/tsuru/app-myapp:v1"));
}

#[tokio::test]
async fn test_deploy_push_failure_drops_image() {
    let mut settings = settings();
    settings.registry = Some("localhost:3030".to_string());
    let h = Harness::new(settings);
    h.node().prepare_failure("push", "registry unavailable");
    let mut out = Vec::new();

    let err = h.provisioner.deploy(&app(), &git("ff13e"), &mut out).await.unwrap_err();

    assert_eq!(err.to_string(), "runtime API error: registry unavailable");
    assert!(!h.node().has_image("localhost:3030/tsuru/app-myapp:v1"));
    assert_eq!(h.node().container_count(), 0);
    assert_eq!(h.store.deploys("myapp").await.unwrap(), 0);
}

#[tokio::test]
async fn test_build_image_follows_app_state() {
    let h = harness();
    let app = app();
    h.provisioner.provision(&app).await.unwrap();
    assert_eq!(h.provisioner.build_image(&app).await.unwrap(), "tsuru/python");

    // A unit started before any counted deploy runs the untagged repository
    let mut out = Vec::new();
    h.provisioner
        .cluster()
        .pull_image("tsuru/app-myapp", &mut out)
        .await
        .unwrap();
    h.provisioner.start_container(&app, "tsuru/app-myapp").await.unwrap();
    assert_eq!(h.provisioner.build_image(&app).await.unwrap(), "tsuru/app-myapp");

    h.store.increment("myapp").await.unwrap();
    assert_eq!(h.provisioner.build_image(&app).await.unwrap(), "tsuru/app-myapp:v1");
}
