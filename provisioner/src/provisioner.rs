//! The provisioner
//!
//! One [`Provisioner`] is built at startup and handed to the API layer by
//! reference. It owns the shared cluster and the collaborators every
//! container operation needs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{join_all, try_join_all};
use provision_api::{DeploySource, Status};
use tracing::{info, warn};

use crate::cluster::{
    build_cluster_storage, Cluster, ClusterStorage, Node, RoundRobin, Scheduler,
};
use crate::container::Container;
use crate::deploy::actions::{deploy_pipeline, start_pipeline, DeployContext};
use crate::deploy::commands;
use crate::errors::{ProvisionError, Result};
use crate::image;
use crate::models::App;
use crate::repository::{HttpRepository, Repository};
use crate::router::{MemoryRouter, Router};
use crate::runtime::docker::DockerCliFactory;
use crate::runtime::{ClientFactory, InputSource, OutputSink, PtySpec};
use crate::settings::{DockerSettings, Settings};
use crate::store::{ContainerStore, DeployCounter, MemoryStore};

/// External services the provisioner depends on
#[derive(Clone)]
pub struct Collaborators {
    pub factory: Arc<dyn ClientFactory>,
    pub cluster_storage: Arc<dyn ClusterStorage>,
    pub containers: Arc<dyn ContainerStore>,
    pub deploys: Arc<dyn DeployCounter>,
    pub router: Arc<dyn Router>,
    pub repository: Arc<dyn Repository>,
}

/// Output of a command run through `exec_in_container`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub code: i64,
}

/// Reachability of one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeHealth {
    pub address: String,

    /// Error reported by the node, `None` when it answered
    pub error: Option<String>,
}

pub struct Provisioner {
    settings: DockerSettings,
    cluster: Cluster,
    factory: Arc<dyn ClientFactory>,
    cluster_storage: Arc<dyn ClusterStorage>,
    scheduler: Arc<dyn Scheduler>,
    containers: Arc<dyn ContainerStore>,
    deploys: Arc<dyn DeployCounter>,
    router: Arc<dyn Router>,
    repository: Arc<dyn Repository>,
    deploy_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Provisioner {
    pub fn new(settings: DockerSettings, collaborators: Collaborators) -> Self {
        let scheduler: Arc<dyn Scheduler> = Arc::new(RoundRobin::new());
        let nodes = settings.servers.iter().map(Node::new).collect();
        let cluster = Cluster::new(
            nodes,
            None,
            collaborators.cluster_storage.clone(),
            collaborators.factory.clone(),
            scheduler.clone(),
        );

        Self {
            settings,
            cluster,
            factory: collaborators.factory,
            cluster_storage: collaborators.cluster_storage,
            scheduler,
            containers: collaborators.containers,
            deploys: collaborators.deploys,
            router: collaborators.router,
            repository: collaborators.repository,
            deploy_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Build a provisioner driving the docker CLI
    ///
    /// Container records and routes are kept in memory.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let docker = settings.docker.clone();
        let cluster_storage = build_cluster_storage(&docker)?;
        let store = Arc::new(MemoryStore::new());
        info!("Using in-memory container store and router");

        let collaborators = Collaborators {
            factory: Arc::new(DockerCliFactory::new(docker.docker_bin.clone())),
            cluster_storage,
            containers: store.clone(),
            deploys: store,
            router: Arc::new(MemoryRouter::new()),
            repository: Arc::new(HttpRepository::new(&settings.repository.base_url)?),
        };
        Ok(Self::new(docker, collaborators))
    }

    pub fn settings(&self) -> &DockerSettings {
        &self.settings
    }

    /// Cluster over the configured servers
    ///
    /// Operations on existing containers are routed through it whatever the
    /// placement policy.
    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    pub fn containers(&self) -> &Arc<dyn ContainerStore> {
        &self.containers
    }

    pub fn router(&self) -> &Arc<dyn Router> {
        &self.router
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.stop_timeout_secs)
    }

    /// Cluster new containers of an app are placed on
    ///
    /// Segregated clusters hold the registered nodes whose pool matches the
    /// app's pool; no match leaves the cluster empty.
    pub async fn cluster_for(&self, app: &App) -> Result<Cluster> {
        if !self.settings.segregate {
            return Ok(self.cluster.clone());
        }
        let nodes: Vec<Node> = self
            .cluster_storage
            .retrieve_nodes()
            .await?
            .into_iter()
            .filter(|n| n.pool() == app.pool.as_deref())
            .collect();
        Ok(Cluster::new(
            nodes,
            app.pool.clone(),
            self.cluster_storage.clone(),
            self.factory.clone(),
            self.scheduler.clone(),
        ))
    }

    /// Nodes eligible for an app's containers
    pub async fn nodes(&self, app: &App) -> Result<Vec<Node>> {
        Ok(self.cluster_for(app).await?.nodes().to_vec())
    }

    /// Add a node to the registry used by segregated clusters
    pub async fn register_node(&self, node: &Node) -> Result<()> {
        info!("Registering node {} (pool {:?})", node.address, node.pool());
        self.cluster_storage.store_node(node).await
    }

    pub async fn unregister_node(&self, address: &str) -> Result<()> {
        info!("Unregistering node {}", address);
        self.cluster_storage.remove_node(address).await
    }

    /// Ping every known node
    pub async fn diagnose(&self) -> Result<Vec<NodeHealth>> {
        let mut addresses: Vec<String> = self.settings.servers.clone();
        for node in self.cluster_storage.retrieve_nodes().await? {
            if !addresses.contains(&node.address) {
                addresses.push(node.address);
            }
        }

        let checks = addresses.into_iter().map(|address| async move {
            let error = self
                .factory
                .client(&address)
                .ping()
                .await
                .err()
                .map(|e| e.to_string());
            NodeHealth { address, error }
        });
        Ok(join_all(checks).await)
    }

    /// Register the app with the router
    pub async fn provision(&self, app: &App) -> Result<()> {
        self.router.add_backend(&app.name).await?;
        info!("Provisioned app {}", app.name);
        Ok(())
    }

    /// Remove every container of the app and its router backend
    pub async fn destroy(&self, app: &App) -> Result<()> {
        self.remove_units(app).await?;
        match self.router.remove_backend(&app.name).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
        info!("Destroyed app {}", app.name);
        Ok(())
    }

    /// Image a build for the app starts from
    pub async fn build_image(&self, app: &App) -> Result<String> {
        let has_containers = !self.containers.find_by_app(&app.name).await?.is_empty();
        let deploys = self.deploys.deploys(&app.name).await?;
        Ok(image::build_image_name(
            &self.settings,
            app,
            has_containers,
            deploys,
        ))
    }

    /// Image the next deploy of the app commits to
    pub async fn next_image(&self, app_name: &str) -> Result<String> {
        let deploys = self.deploys.deploys(app_name).await?;
        Ok(image::next_release_image_name(
            &self.settings,
            app_name,
            deploys,
        ))
    }

    /// Latest release image of the app
    pub async fn current_image(&self, app_name: &str) -> Result<String> {
        let deploys = self.deploys.deploys(app_name).await?;
        Ok(image::current_image_name(&self.settings, app_name, deploys))
    }

    fn deploy_lock(&self, app_name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.deploy_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(app_name.to_string()).or_default().clone()
    }

    /// Drop the app's lock once no other deploy holds or waits for it
    fn release_deploy_lock(&self, app_name: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.deploy_locks.lock().unwrap_or_else(|e| e.into_inner());
        // Held by the map and by `lock` only
        if Arc::strong_count(&lock) == 2 {
            locks.remove(app_name);
        }
    }

    /// Build a new release image of the app from source
    ///
    /// The build runs in a transient container that is removed whatever the
    /// outcome. Deploys of the same app run one at a time, and the deploy
    /// count only moves once the image is committed.
    pub async fn deploy(
        &self,
        app: &App,
        source: &DeploySource,
        output: OutputSink<'_>,
    ) -> Result<String> {
        let lock = self.deploy_lock(&app.name);
        let result = {
            let _guard = lock.lock().await;
            self.run_deploy(app, source, output).await
        };
        self.release_deploy_lock(&app.name, lock);
        result
    }

    async fn run_deploy(
        &self,
        app: &App,
        source: &DeploySource,
        output: OutputSink<'_>,
    ) -> Result<String> {
        let commands = match source {
            DeploySource::Git { version } => {
                let git_url = self.repository.git_url(&app.name).await?;
                commands::git_deploy_cmds(&self.settings, app, &git_url, version)?
            }
            DeploySource::Archive { url } => {
                commands::archive_deploy_cmds(&self.settings, app, url)?
            }
        };

        let image_id = self.build_image(app).await?;
        let target = self.next_image(&app.name).await?;
        let cluster = self.cluster_for(app).await?;
        info!(
            "Deploying app {} from {} source onto {}",
            app.name,
            source.kind(),
            target
        );

        let mut ctx = DeployContext {
            provisioner: self,
            cluster: &cluster,
            app,
            image_id,
            commands,
            is_deploy: true,
            building_image: Some(target),
            output,
            container: None,
            image: None,
        };
        let result = deploy_pipeline().execute(&mut ctx).await;

        if let Some(container) = ctx.container.take() {
            if let Err(e) = container.remove(self).await {
                warn!("Failed to remove build container {}: {}", container.id, e);
            }
        }
        result?;

        let image = ctx
            .image
            .take()
            .ok_or_else(|| ProvisionError::Internal("deploy committed no image".to_string()))?;
        let deploys = self.deploys.increment(&app.name).await?;
        info!("Deployed app {} as {} (deploy #{})", app.name, image, deploys);
        Ok(image)
    }

    /// Start a long-lived container of the app running `image`
    pub async fn start_container(&self, app: &App, image: &str) -> Result<Container> {
        self.settings.internal_port()?;
        let commands = commands::run_with_agent_cmds(&self.settings, app)?;
        let cluster = self.cluster_for(app).await?;

        let mut sink = tokio::io::sink();
        let mut ctx = DeployContext {
            provisioner: self,
            cluster: &cluster,
            app,
            image_id: image.to_string(),
            commands,
            is_deploy: false,
            building_image: None,
            output: &mut sink,
            container: None,
            image: None,
        };
        start_pipeline().execute(&mut ctx).await?;

        ctx.container
            .take()
            .ok_or_else(|| ProvisionError::Internal("start created no container".to_string()))
    }

    /// Start `units` containers of the app from its latest image
    ///
    /// The containers start concurrently; when any of them fails the others
    /// are removed again and the first error returned.
    pub async fn add_units(&self, app: &App, units: usize) -> Result<Vec<Container>> {
        let image = self.current_image(&app.name).await?;
        let results = join_all((0..units).map(|_| self.start_container(app, &image))).await;

        let mut started = Vec::with_capacity(results.len());
        let mut failure = None;
        for result in results {
            match result {
                Ok(container) => started.push(container),
                Err(e) => {
                    if failure.is_none() {
                        failure = Some(e);
                    }
                }
            }
        }

        if let Some(e) = failure {
            for container in &started {
                if let Err(cleanup) = container.remove(self).await {
                    warn!("Failed to remove unit {}: {}", container.id, cleanup);
                }
            }
            return Err(e);
        }
        info!("Added {} units to app {}", started.len(), app.name);
        Ok(started)
    }

    /// Remove every container of the app
    pub async fn remove_units(&self, app: &App) -> Result<()> {
        let containers = self.containers.find_by_app(&app.name).await?;
        try_join_all(containers.iter().map(|c| c.remove(self))).await?;
        Ok(())
    }

    pub async fn get_container(&self, id: &str) -> Result<Container> {
        self.containers.find(id).await
    }

    pub async fn list_containers_by_app(&self, app_name: &str) -> Result<Vec<Container>> {
        self.containers.find_by_app(app_name).await
    }

    pub async fn stop_container(&self, id: &str) -> Result<()> {
        let mut container = self.get_container(id).await?;
        container.stop(self).await
    }

    pub async fn remove_container(&self, id: &str) -> Result<()> {
        let container = self.get_container(id).await?;
        container.remove(self).await
    }

    /// Record a status reported for a container
    pub async fn set_unit_status(&self, id: &str, status: Status) -> Result<()> {
        let mut container = self.get_container(id).await?;
        container.set_status(self, status).await
    }

    pub async fn set_image(&self, id: &str, image: &str) -> Result<()> {
        let mut container = self.get_container(id).await?;
        container.set_image(self, image).await
    }

    /// Run a command in a container and collect its output
    ///
    /// A non-zero exit code is reported in the output rather than as an
    /// error.
    pub async fn exec_in_container(&self, id: &str, cmd: &[String]) -> Result<ExecOutput> {
        let container = self.get_container(id).await?;
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let code = match container.exec(self, cmd, &mut stdout, &mut stderr).await {
            Ok(()) => 0,
            Err(ProvisionError::ExecFailed { code }) => code,
            Err(e) => return Err(e),
        };
        Ok(ExecOutput {
            stdout,
            stderr,
            code,
        })
    }

    pub async fn shell(
        &self,
        id: &str,
        stdin: InputSource<'_>,
        stdout: OutputSink<'_>,
        stderr: OutputSink<'_>,
        pty: &PtySpec,
    ) -> Result<()> {
        let container = self.get_container(id).await?;
        container.shell(self, stdin, stdout, stderr, pty).await
    }

    pub async fn logs(&self, id: &str, output: OutputSink<'_>) -> Result<()> {
        let container = self.get_container(id).await?;
        container.logs(self, output).await
    }

    /// Push an image to the configured registry, doing nothing without one
    pub async fn push_image(&self, name: &str, tag: &str, output: OutputSink<'_>) -> Result<()> {
        if self.settings.registry().is_none() {
            return Ok(());
        }
        self.cluster
            .push_image(name, tag, self.settings.registry_auth.as_ref(), output)
            .await
    }
}
