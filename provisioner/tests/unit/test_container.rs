//! Container lifecycle tests

use provision_api::Status;
use shipyard::container::{Container, CreateArgs};
use shipyard::models::app::{HOST_ENV, TOKEN_ENV};
use shipyard::models::App;
use shipyard::runtime::RestartPolicy;
use shipyard::router::Router;
use shipyard::ProvisionError;

use crate::common::{app, harness, pull_platform, settings, Harness};

fn args<'a>(app: &'a App, is_deploy: bool) -> CreateArgs<'a> {
    CreateArgs {
        app,
        image_id: "tsuru/python",
        commands: vec!["/bin/bash".to_string(), "-lc".to_string(), "ps".to_string()],
        is_deploy,
        building_image: is_deploy.then(|| "tsuru/app-myapp:v1".to_string()),
    }
}

#[tokio::test]
async fn test_build_container_has_no_port() {
    let h = harness();
    pull_platform(&h).await;
    let app = app();
    let p = &h.provisioner;

    let mut container = Container::create(p, p.cluster(), args(&app, true)).await.unwrap();

    assert_eq!(container.status, Status::Created);
    assert!(container.host_port.is_empty());
    assert_eq!(container.ip, "172.17.0.2");
    assert_eq!(container.building_image, "tsuru/app-myapp:v1");
    let opts = h.node().container_options(&container.id).unwrap();
    assert!(opts.exposed_port.is_none());

    container.start(p, true).await.unwrap();
    assert_eq!(container.status, Status::Building);
    assert_eq!(h.node().restart_policy(&container.id), Some(RestartPolicy::No));
    assert!(h.router.routes("myapp").is_empty());
}

#[tokio::test]
async fn test_create_applies_app_limits() {
    let mut settings = settings();
    settings.ssh.user = Some("ubuntu".to_string());
    let h = Harness::new(settings);
    pull_platform(&h).await;
    let mut app = app();
    app.memory = 1024;
    app.swap = 512;
    app.cpu_share = 50;
    let p = &h.provisioner;

    let container = Container::create(p, p.cluster(), args(&app, false)).await.unwrap();

    assert_eq!(container.user, "ubuntu");
    assert_eq!(container.host_port, "49153");
    assert_eq!(container.platform, "python");
    let opts = h.node().container_options(&container.id).unwrap();
    assert_eq!(opts.user.as_deref(), Some("ubuntu"));
    assert_eq!(opts.memory, 1024);
    assert_eq!(opts.memory_swap, 1536);
    assert_eq!(opts.cpu_shares, 50);
    assert_eq!(opts.exposed_port.as_deref(), Some("8888"));
    assert_eq!(
        opts.env,
        vec![
            (TOKEN_ENV.to_string(), "app-token".to_string()),
            (HOST_ENV.to_string(), "http://shipyard.example.com".to_string()),
        ]
    );

    let stored = p.get_container(&container.id).await.unwrap();
    assert_eq!(stored, container);
}

#[tokio::test]
async fn test_create_without_port_fails_early() {
    let mut settings = settings();
    settings.run_cmd.port = None;
    let h = Harness::new(settings);
    pull_platform(&h).await;
    let app = app();
    let p = &h.provisioner;

    let err = Container::create(p, p.cluster(), args(&app, false)).await.unwrap_err();

    assert!(matches!(err, ProvisionError::ConfigMissing(_)));
    assert_eq!(h.node().calls("create"), 0);

    // Build containers publish nothing and need no port
    Container::create(p, p.cluster(), args(&app, true)).await.unwrap();
}

#[tokio::test]
async fn test_second_start_is_rejected() {
    let h = harness();
    pull_platform(&h).await;
    let app = app();
    let p = &h.provisioner;
    p.provision(&app).await.unwrap();

    let mut container = Container::create(p, p.cluster(), args(&app, false)).await.unwrap();
    container.start(p, false).await.unwrap();
    assert_eq!(container.status, Status::Starting);
    assert_eq!(h.router.routes("myapp"), vec![container.address()]);
    assert_eq!(h.node().restart_policy(&container.id), Some(RestartPolicy::Always));

    let err = container.start(p, false).await.unwrap_err();
    assert!(matches!(err, ProvisionError::InvalidTransition(_)));
    assert_eq!(h.node().calls("start"), 1);
}

#[tokio::test]
async fn test_start_route_failure() {
    let h = harness();
    pull_platform(&h).await;
    let app = app();
    let p = &h.provisioner;
    p.provision(&app).await.unwrap();
    h.router.prepare_failure("add_route");

    let mut container = Container::create(p, p.cluster(), args(&app, false)).await.unwrap();
    let err = container.start(p, false).await.unwrap_err();

    assert!(matches!(err, ProvisionError::Router(_)));
    assert_eq!(container.status, Status::Error);
    let stored = p.get_container(&container.id).await.unwrap();
    assert_eq!(stored.status, Status::Error);
}

#[tokio::test]
async fn test_start_without_port() {
    let mut settings = settings();
    settings.run_cmd.port = None;
    let h = Harness::new(settings);
    pull_platform(&h).await;
    let app = app();
    let p = &h.provisioner;
    p.provision(&app).await.unwrap();

    let mut container = Container::create(p, p.cluster(), args(&app, true)).await.unwrap();
    let err = container.start(p, false).await.unwrap_err();

    assert!(matches!(err, ProvisionError::ConfigMissing(_)));
    assert_eq!(h.node().calls("start"), 0);
    assert!(h.router.routes("myapp").is_empty());
}

#[tokio::test]
async fn test_remove_deregisters_portless_container() {
    let h = harness();
    pull_platform(&h).await;
    let app = app();
    let p = &h.provisioner;
    p.provision(&app).await.unwrap();

    let container = Container::create(p, p.cluster(), args(&app, true)).await.unwrap();
    assert!(container.host_port.is_empty());
    p.router().add_route("myapp", &container.address()).await.unwrap();

    container.remove(p).await.unwrap();

    assert!(h.router.routes("myapp").is_empty());
    assert!(!h.node().has_container(&container.id));
}

#[tokio::test]
async fn test_commit_needs_building_image() {
    let h = harness();
    pull_platform(&h).await;
    let app = app();
    let p = &h.provisioner;

    let container = Container::create(p, p.cluster(), args(&app, false)).await.unwrap();
    let mut out = Vec::new();
    let err = container.commit(p, &mut out).await.unwrap_err();

    assert!(matches!(err, ProvisionError::Internal(_)));
    assert_eq!(h.node().calls("commit"), 0);
}

#[tokio::test]
async fn test_commit_returns_building_image() {
    let h = harness();
    pull_platform(&h).await;
    let app = app();
    let p = &h.provisioner;

    let container = Container::create(p, p.cluster(), args(&app, true)).await.unwrap();
    let mut out = Vec::new();
    let image = container.commit(p, &mut out).await.unwrap();

    assert_eq!(image, "tsuru/app-myapp:v1");
    assert!(h.node().has_image("tsuru/app-myapp:v1"));
    assert_eq!(h.node().calls("push"), 0);
}
