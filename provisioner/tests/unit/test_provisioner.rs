//! Provisioner operation tests

use provision_api::{DeploySource, Status, Unit};
use shipyard::cluster::Node;
use shipyard::runtime::{PtySpec, RestartPolicy, RuntimeClient};
use shipyard::store::ContainerStore;
use shipyard::ProvisionError;

use crate::common::{app, harness, settings, Harness, NODE, OTHER_NODE};

/// Harness with the app provisioned and deployed once
async fn deployed() -> Harness {
    let h = harness();
    h.provisioner.provision(&app()).await.unwrap();
    let mut out = Vec::new();
    let source = DeploySource::Git {
        version: "ff13e".to_string(),
    };
    h.provisioner.deploy(&app(), &source, &mut out).await.unwrap();
    h
}

#[tokio::test]
async fn test_add_units_routes_every_unit() {
    let h = deployed().await;

    let units = h.provisioner.add_units(&app(), 3).await.unwrap();

    assert_eq!(units.len(), 3);
    let routes = h.router.routes("myapp");
    assert_eq!(routes.len(), 3);
    for unit in &units {
        assert_eq!(unit.image, "tsuru/app-myapp:v1");
        assert_eq!(unit.status, Status::Starting);
        assert_eq!(unit.host_addr, "10.0.0.1");
        assert!(!unit.host_port.is_empty());
        assert!(routes.contains(&unit.address()));
        assert_eq!(h.node().restart_policy(&unit.id), Some(RestartPolicy::Always));
        assert!(h.node().is_running(&unit.id));
    }

    let stored = h.provisioner.list_containers_by_app("myapp").await.unwrap();
    assert_eq!(stored.len(), 3);
}

#[tokio::test]
async fn test_add_units_failure_removes_started_units() {
    let h = deployed().await;
    // The build container took the first start call
    h.node().prepare_call_failure("start", 3, "node overloaded");

    let err = h.provisioner.add_units(&app(), 3).await.unwrap_err();

    assert_eq!(err.to_string(), "runtime API error: node overloaded");
    assert_eq!(h.node().calls("start"), 4);
    assert_eq!(h.node().container_count(), 0);
    assert!(h.store.is_empty());
    assert!(h.router.routes("myapp").is_empty());
}

#[tokio::test]
async fn test_add_units_every_start_fails() {
    let h = deployed().await;
    h.node().prepare_failure("start", "node overloaded");

    assert!(h.provisioner.add_units(&app(), 2).await.is_err());
    assert_eq!(h.node().container_count(), 0);
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn test_remove_units() {
    let h = deployed().await;
    h.provisioner.add_units(&app(), 2).await.unwrap();

    h.provisioner.remove_units(&app()).await.unwrap();

    assert_eq!(h.node().container_count(), 0);
    assert!(h.store.is_empty());
    assert!(h.router.routes("myapp").is_empty());
}

#[tokio::test]
async fn test_start_requires_internal_port() {
    let mut settings = settings();
    settings.run_cmd.port = None;
    let h = Harness::new(settings);

    let err = h
        .provisioner
        .start_container(&app(), "tsuru/app-myapp:v1")
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::ConfigMissing(_)));
    assert_eq!(h.node().calls("create"), 0);
}

#[tokio::test]
async fn test_get_missing_container() {
    let h = harness();
    let err = h.provisioner.get_container("nope").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let h = deployed().await;
    let unit = h.provisioner.add_units(&app(), 1).await.unwrap().remove(0);

    h.provisioner.stop_container(&unit.id).await.unwrap();
    h.provisioner.stop_container(&unit.id).await.unwrap();

    assert_eq!(h.node().calls("stop"), 1);
    assert!(!h.node().is_running(&unit.id));
    let stored = h.provisioner.get_container(&unit.id).await.unwrap();
    assert_eq!(stored.status, Status::Stopped);
}

#[tokio::test]
async fn test_unit_status_reports() {
    let h = deployed().await;
    let unit = h.provisioner.add_units(&app(), 1).await.unwrap().remove(0);
    let starting = unit.last_success_status_update;
    assert!(starting.is_some());

    h.provisioner
        .set_unit_status(&unit.id, Status::Started)
        .await
        .unwrap();
    let started = h.provisioner.get_container(&unit.id).await.unwrap();
    let success = started.last_success_status_update;
    assert!(success >= starting);
    assert!(started.available());

    h.provisioner
        .set_unit_status(&unit.id, Status::Error)
        .await
        .unwrap();
    let failed = h.provisioner.get_container(&unit.id).await.unwrap();
    assert_eq!(failed.status, Status::Error);
    assert_eq!(failed.last_success_status_update, success);
    assert!(!Unit::from(&failed).available());

    // Error units can only restart or stop
    let err = h
        .provisioner
        .set_unit_status(&unit.id, Status::Building)
        .await
        .unwrap_err();
    assert!(matches!(err, ProvisionError::InvalidTransition(_)));
}

#[tokio::test]
async fn test_starting_counts_as_success() {
    let h = deployed().await;
    let unit = h.provisioner.add_units(&app(), 1).await.unwrap().remove(0);
    h.provisioner.stop_container(&unit.id).await.unwrap();

    let mut stopped = h.provisioner.get_container(&unit.id).await.unwrap();
    stopped.last_success_status_update = None;
    h.store.update(&stopped).await.unwrap();

    h.provisioner
        .set_unit_status(&unit.id, Status::Starting)
        .await
        .unwrap();
    let restarted = h.provisioner.get_container(&unit.id).await.unwrap();
    assert_eq!(restarted.status, Status::Starting);
    assert!(restarted.last_success_status_update.is_some());
}

#[tokio::test]
async fn test_set_image() {
    let h = deployed().await;
    let unit = h.provisioner.add_units(&app(), 1).await.unwrap().remove(0);

    h.provisioner
        .set_image(&unit.id, "tsuru/app-myapp:v7")
        .await
        .unwrap();

    let stored = h.provisioner.get_container(&unit.id).await.unwrap();
    assert_eq!(stored.image, "tsuru/app-myapp:v7");
}

#[tokio::test]
async fn test_remove_container_gone_from_runtime() {
    let h = deployed().await;
    let unit = h.provisioner.add_units(&app(), 1).await.unwrap().remove(0);
    h.node().remove_container(&unit.id).await.unwrap();

    h.provisioner.remove_container(&unit.id).await.unwrap();

    assert!(h.router.routes("myapp").is_empty());
    assert!(h.store.find(&unit.id).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_remove_container_router_failure() {
    let h = deployed().await;
    let unit = h.provisioner.add_units(&app(), 1).await.unwrap().remove(0);
    h.router.prepare_failure("remove_route");

    let err = h.provisioner.remove_container(&unit.id).await.unwrap_err();

    assert!(matches!(err, ProvisionError::Router(_)));
    assert!(h.node().has_container(&unit.id));
    assert!(h.store.find(&unit.id).await.is_ok());
}

#[tokio::test]
async fn test_exec_in_container() {
    let h = deployed().await;
    let unit = h.provisioner.add_units(&app(), 1).await.unwrap().remove(0);
    let cmd = vec!["ls".to_string(), "-l".to_string()];

    let output = h.provisioner.exec_in_container(&unit.id, &cmd).await.unwrap();
    assert_eq!(output.code, 0);
    assert_eq!(output.stdout, b"ls -l\n");

    h.node().set_exec_exit_code(2);
    let output = h.provisioner.exec_in_container(&unit.id, &cmd).await.unwrap();
    assert_eq!(output.code, 2);
    assert_eq!(h.node().execs().len(), 2);
}

#[tokio::test]
async fn test_logs_and_shell() {
    let h = deployed().await;
    let unit = h.provisioner.add_units(&app(), 1).await.unwrap().remove(0);
    h.node().set_output("server listening\n");

    let mut logs = Vec::new();
    h.provisioner.logs(&unit.id, &mut logs).await.unwrap();
    assert_eq!(logs, b"server listening\n");

    let mut stdin: &[u8] = b"uptime\n";
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    h.provisioner
        .shell(&unit.id, &mut stdin, &mut stdout, &mut stderr, &PtySpec::default())
        .await
        .unwrap();
    assert_eq!(stdout, b"uptime\n");
}

#[tokio::test]
async fn test_segregated_nodes_follow_pool() {
    let mut settings = settings();
    settings.segregate = true;
    let h = Harness::new(settings);
    h.provisioner
        .register_node(&Node::new(NODE).with_metadata("pool", "pool1"))
        .await
        .unwrap();
    h.provisioner
        .register_node(&Node::new(OTHER_NODE).with_metadata("pool", "pool2"))
        .await
        .unwrap();

    let nodes = h.provisioner.nodes(&app().with_pool("pool1")).await.unwrap();
    assert_eq!(nodes, vec![Node::new(NODE).with_metadata("pool", "pool1")]);

    let nodes = h.provisioner.nodes(&app().with_pool("pool3")).await.unwrap();
    assert!(nodes.is_empty());

    let err = h
        .provisioner
        .start_container(&app().with_pool("pool3"), "tsuru/app-myapp:v1")
        .await
        .unwrap_err();
    assert!(matches!(err, ProvisionError::NoEligibleNodes(Some(ref pool)) if pool == "pool3"));

    h.provisioner.unregister_node(NODE).await.unwrap();
    let nodes = h.provisioner.nodes(&app().with_pool("pool1")).await.unwrap();
    assert!(nodes.is_empty());
}

#[tokio::test]
async fn test_shared_cluster_ignores_pools() {
    let h = harness();
    let nodes = h.provisioner.nodes(&app().with_pool("pool1")).await.unwrap();
    assert_eq!(nodes, vec![Node::new(NODE)]);
}

#[tokio::test]
async fn test_provision_and_destroy() {
    let h = deployed().await;
    assert!(h.router.has_backend("myapp"));
    h.provisioner.add_units(&app(), 2).await.unwrap();

    h.provisioner.destroy(&app()).await.unwrap();

    assert!(!h.router.has_backend("myapp"));
    assert_eq!(h.node().container_count(), 0);
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn test_diagnose_reports_unreachable_nodes() {
    let h = harness();
    h.provisioner
        .register_node(&Node::new(OTHER_NODE))
        .await
        .unwrap();
    h.factory.runtime(OTHER_NODE).prepare_failure("ping", "connection refused");

    let report = h.provisioner.diagnose().await.unwrap();

    assert_eq!(report.len(), 2);
    assert_eq!(report[0].address, NODE);
    assert!(report[0].error.is_none());
    assert_eq!(report[1].address, OTHER_NODE);
    assert_eq!(
        report[1].error.as_deref(),
        Some("runtime API error: connection refused")
    );
}

#[tokio::test]
async fn test_push_image_without_registry() {
    let h = deployed().await;
    let mut out = Vec::new();
    h.provisioner
        .push_image("tsuru/app-myapp", "v1", &mut out)
        .await
        .unwrap();
    assert_eq!(h.node().calls("push"), 0);
}
