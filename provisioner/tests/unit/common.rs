//! Shared fixtures

use std::sync::Arc;

use shipyard::cluster::MemoryClusterStorage;
use shipyard::models::app::{App, HOST_ENV, TOKEN_ENV};
use shipyard::repository::StaticRepository;
use shipyard::router::MemoryRouter;
use shipyard::runtime::memory::{MemoryFactory, MemoryRuntime};
use shipyard::settings::DockerSettings;
use shipyard::store::MemoryStore;
use shipyard::{Collaborators, Provisioner};

pub const NODE: &str = "http://10.0.0.1:2375";
pub const OTHER_NODE: &str = "http://10.0.0.2:2375";

pub struct Harness {
    pub provisioner: Provisioner,
    pub factory: Arc<MemoryFactory>,
    pub store: Arc<MemoryStore>,
    pub router: Arc<MemoryRouter>,
    pub storage: Arc<MemoryClusterStorage>,
}

impl Harness {
    pub fn new(settings: DockerSettings) -> Self {
        let factory = Arc::new(MemoryFactory::new());
        let store = Arc::new(MemoryStore::new());
        let router = Arc::new(MemoryRouter::new());
        let storage = Arc::new(MemoryClusterStorage::new());
        let repository = StaticRepository::new().with_url("myapp", "git://git.example.com/myapp.git");

        let collaborators = Collaborators {
            factory: factory.clone(),
            cluster_storage: storage.clone(),
            containers: store.clone(),
            deploys: store.clone(),
            router: router.clone(),
            repository: Arc::new(repository),
        };
        Self {
            provisioner: Provisioner::new(settings, collaborators),
            factory,
            store,
            router,
            storage,
        }
    }

    /// The single node of the default settings
    pub fn node(&self) -> Arc<MemoryRuntime> {
        self.factory.runtime(NODE)
    }
}

pub fn settings() -> DockerSettings {
    let mut settings = DockerSettings {
        repository_namespace: "tsuru".to_string(),
        servers: vec![NODE.to_string()],
        ..Default::default()
    };
    settings.run_cmd.port = Some("8888".to_string());
    settings
}

pub fn harness() -> Harness {
    Harness::new(settings())
}

pub fn app() -> App {
    App::new("myapp", "python")
        .with_env(HOST_ENV, "http://shipyard.example.com")
        .with_env(TOKEN_ENV, "app-token")
}

/// Pull the app's platform image through the cluster
pub async fn pull_platform(h: &Harness) {
    let mut out = Vec::new();
    h.provisioner
        .cluster()
        .pull_image("tsuru/python", &mut out)
        .await
        .unwrap();
}
