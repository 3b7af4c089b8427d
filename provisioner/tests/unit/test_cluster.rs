//! Multi-node cluster tests

use std::sync::Arc;

use shipyard::cluster::{Cluster, ClusterStorage, MemoryClusterStorage, Node, RoundRobin};
use shipyard::runtime::memory::MemoryFactory;
use shipyard::runtime::{CreateContainerOptions, RuntimeClient};

use crate::common::{NODE, OTHER_NODE};

fn cluster() -> (Cluster, Arc<MemoryFactory>, Arc<MemoryClusterStorage>) {
    let factory = Arc::new(MemoryFactory::new());
    let storage = Arc::new(MemoryClusterStorage::new());
    let cluster = Cluster::new(
        vec![Node::new(NODE), Node::new(OTHER_NODE)],
        None,
        storage.clone(),
        factory.clone(),
        Arc::new(RoundRobin::new()),
    );
    (cluster, factory, storage)
}

fn options(image: &str) -> CreateContainerOptions {
    CreateContainerOptions {
        name: "myapp-1".to_string(),
        image: image.to_string(),
        cmd: vec!["ps".to_string()],
        ..Default::default()
    }
}

#[tokio::test]
async fn test_pulls_spread_across_nodes() {
    let (cluster, factory, storage) = cluster();
    let mut out = Vec::new();

    let first = cluster.pull_image("tsuru/python", &mut out).await.unwrap();
    let second = cluster.pull_image("tsuru/ruby", &mut out).await.unwrap();

    assert_ne!(first, second);
    assert!(factory.runtime(&first).has_image("tsuru/python"));
    assert!(factory.runtime(&second).has_image("tsuru/ruby"));
    assert_eq!(storage.retrieve_image("tsuru/ruby").await.unwrap(), vec![second]);
}

#[tokio::test]
async fn test_push_from_holder() {
    let (cluster, factory, _) = cluster();
    let mut out = Vec::new();
    let holder = cluster.pull_image("tsuru/python", &mut out).await.unwrap();
    let (id, address) = cluster.create_container(&options("tsuru/python")).await.unwrap();
    assert_eq!(address, holder);

    cluster.commit(&id, "tsuru/app-myapp", "v1").await.unwrap();
    cluster
        .push_image("tsuru/app-myapp", "v1", None, &mut out)
        .await
        .unwrap();

    assert_eq!(
        factory.runtime(&holder).pushed_images(),
        vec!["tsuru/app-myapp:v1"]
    );

    let err = cluster
        .push_image("tsuru/app-myapp", "v2", None, &mut out)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_remove_image_everywhere() {
    let (cluster, factory, storage) = cluster();
    let mut out = Vec::new();
    for address in [NODE, OTHER_NODE] {
        factory
            .runtime(address)
            .pull_image("tsuru/python", &mut out)
            .await
            .unwrap();
        storage.store_image("tsuru/python", address).await.unwrap();
    }

    cluster.remove_image("tsuru/python").await.unwrap();

    assert!(!factory.runtime(NODE).has_image("tsuru/python"));
    assert!(!factory.runtime(OTHER_NODE).has_image("tsuru/python"));
    assert!(storage.retrieve_image("tsuru/python").await.unwrap().is_empty());
    assert!(cluster.remove_image("tsuru/python").await.unwrap_err().is_not_found());
}
