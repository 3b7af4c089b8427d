//! Container entity
//!
//! A [`Container`] is the persisted record of one runtime container owned by
//! an app. Its lifecycle methods talk to the cluster, keep the router in step
//! and write the record back after every status change.

use chrono::{DateTime, Utc};
use provision_api::{Status, Unit};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cluster::Cluster;
use crate::errors::{ProvisionError, Result};
use crate::models::App;
use crate::provisioner::Provisioner;
use crate::runtime::{
    split_image, CreateContainerOptions, HostConfig, InputSource, OutputSink, PtySpec,
    RestartPolicy,
};
use crate::utils::url_to_host;

/// Persisted container record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub id: String,
    pub name: String,
    pub app_name: String,

    /// Platform of the owning app
    #[serde(rename = "type")]
    pub platform: String,

    /// Image the container runs
    pub image: String,

    /// Image a build container commits to
    #[serde(default)]
    pub building_image: String,

    #[serde(default)]
    pub status: Status,

    /// Host of the node the container lives on
    #[serde(default)]
    pub host_addr: String,

    /// Host port bound to the internal port, empty for build containers
    #[serde(default)]
    pub host_port: String,

    #[serde(default)]
    pub ip: String,

    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub last_status_update: Option<DateTime<Utc>>,

    /// Last time the container reached a successful status
    #[serde(default)]
    pub last_success_status_update: Option<DateTime<Utc>>,
}

/// Network view of a running container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkInfo {
    pub ip: String,

    /// Host port bound to the internal port, empty when none was allocated
    pub host_port: String,
}

/// Arguments for creating a container
#[derive(Debug, Clone)]
pub struct CreateArgs<'a> {
    pub app: &'a App,

    /// Image the container is created from
    pub image_id: &'a str,

    pub commands: Vec<String>,

    /// Build containers get no port and no route
    pub is_deploy: bool,

    /// Image a build container commits to
    pub building_image: Option<String>,
}

fn container_name(app_name: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", app_name, &suffix[..12])
}

impl Container {
    /// Create the runtime container and persist its record
    ///
    /// Long-lived containers publish the configured internal port; a missing
    /// port setting fails before anything reaches the runtime.
    pub async fn create(p: &Provisioner, cluster: &Cluster, args: CreateArgs<'_>) -> Result<Self> {
        let settings = p.settings();
        let exposed_port = if args.is_deploy {
            None
        } else {
            Some(settings.internal_port()?.to_string())
        };
        let user = settings.ssh.user.clone().unwrap_or_default();

        let mut env: Vec<(String, String)> = args
            .app
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        env.sort();

        let opts = CreateContainerOptions {
            name: container_name(&args.app.name),
            image: args.image_id.to_string(),
            cmd: args.commands,
            user: Some(user.clone()).filter(|u| !u.is_empty()),
            memory: args.app.memory,
            memory_swap: args.app.memory_swap(),
            cpu_shares: args.app.cpu_share,
            exposed_port: exposed_port.clone(),
            env,
        };

        let (id, address) = cluster.create_container(&opts).await?;
        info!("Created container {} for app {} on {}", id, args.app.name, address);

        let mut container = Container {
            id,
            name: opts.name,
            app_name: args.app.name.clone(),
            platform: args.app.platform.clone(),
            image: opts.image,
            building_image: args.building_image.unwrap_or_default(),
            status: Status::Created,
            host_addr: url_to_host(&address),
            user,
            last_status_update: Some(Utc::now()),
            ..Default::default()
        };

        let inspect = cluster.inspect_container(&container.id).await?;
        container.ip = inspect.ip_address.clone();
        if let Some(port) = &exposed_port {
            container.host_port = inspect.host_port(port).unwrap_or_default().to_string();
        }

        p.containers().insert(&container).await?;
        Ok(container)
    }

    /// Address the router sends traffic to
    pub fn address(&self) -> String {
        format!("http://{}:{}", self.host_addr, self.host_port)
    }

    /// Whether the container can serve requests
    pub fn available(&self) -> bool {
        self.status.is_available()
    }

    /// Move to a new status and persist it
    pub async fn set_status(&mut self, p: &Provisioner, status: Status) -> Result<()> {
        self.status = self.status.transition(status)?;
        let now = Utc::now();
        self.last_status_update = Some(now);
        if status.is_successful() {
            self.last_success_status_update = Some(now);
        }
        debug!("Container {} is now {}", self.id, status);
        p.containers().update(self).await
    }

    /// Point the record at a new image
    pub async fn set_image(&mut self, p: &Provisioner, image: &str) -> Result<()> {
        self.image = image.to_string();
        p.containers().update(self).await
    }

    /// Start the container
    ///
    /// Long-lived containers restart automatically and are registered with
    /// the router; build containers are neither.
    pub async fn start(&mut self, p: &Provisioner, is_deploy: bool) -> Result<()> {
        let next = if is_deploy {
            Status::Building
        } else {
            Status::Starting
        };
        // Rejects a second start before anything reaches the runtime
        self.status.transition(next)?;
        if !is_deploy {
            p.settings().internal_port()?;
        }

        let host_config = HostConfig {
            restart_policy: if is_deploy {
                RestartPolicy::No
            } else {
                RestartPolicy::Always
            },
        };
        p.cluster().start_container(&self.id, &host_config).await?;

        if !is_deploy {
            if let Err(e) = self.bind(p).await {
                if let Err(mark) = self.set_status(p, Status::Error).await {
                    warn!("Failed to mark container {} as failed: {}", self.id, mark);
                }
                return Err(e);
            }
        }

        self.set_status(p, next).await
    }

    /// Refresh the network view of a started container and route to it
    async fn bind(&mut self, p: &Provisioner) -> Result<()> {
        let info = self.network_info(p).await?;
        self.ip = info.ip;
        if !info.host_port.is_empty() {
            self.host_port = info.host_port;
        }
        p.router().add_route(&self.app_name, &self.address()).await?;
        Ok(())
    }

    /// Stop the container, doing nothing when it is already stopped
    pub async fn stop(&mut self, p: &Provisioner) -> Result<()> {
        if self.status == Status::Stopped {
            debug!("Container {} already stopped", self.id);
            return Ok(());
        }
        p.cluster()
            .stop_container(&self.id, p.stop_timeout())
            .await?;
        self.set_status(p, Status::Stopped).await
    }

    /// Deregister, remove and forget the container
    ///
    /// A container already gone from the router, the runtime or the store is
    /// not an error.
    pub async fn remove(&self, p: &Provisioner) -> Result<()> {
        match p.router().remove_route(&self.app_name, &self.address()).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!("Route for {} already removed: {}", self.id, e)
            }
            Err(e) => return Err(e.into()),
        }

        match p.cluster().remove_container(&self.id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                warn!("Container {} was already gone from the runtime", self.id)
            }
            Err(e) => return Err(e),
        }

        match p.containers().delete(&self.id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        info!("Removed container {} of app {}", self.id, self.app_name);
        Ok(())
    }

    /// Commit the container to its building image and push it when a
    /// registry is configured
    ///
    /// Returns the committed image name. When the push fails the local image
    /// is removed again and the push error returned.
    pub async fn commit(&self, p: &Provisioner, output: OutputSink<'_>) -> Result<String> {
        if self.building_image.is_empty() {
            return Err(ProvisionError::Internal(format!(
                "container {} has no building image",
                self.id
            )));
        }
        let (repository, tag) = split_image(&self.building_image);
        let cluster = p.cluster();

        cluster.commit(&self.id, repository, tag).await?;
        info!("Committed container {} to {}", self.id, self.building_image);

        let settings = p.settings();
        if settings.registry().is_some() {
            let pushed = cluster
                .push_image(repository, tag, settings.registry_auth.as_ref(), output)
                .await;
            if let Err(e) = pushed {
                if let Err(cleanup) = cluster.remove_image(&self.building_image).await {
                    warn!(
                        "Failed to remove image {} after push failure: {}",
                        self.building_image, cleanup
                    );
                }
                return Err(e);
            }
        }
        Ok(self.building_image.clone())
    }

    /// Run a command in the container, failing with the exit code when it is
    /// not zero
    pub async fn exec(
        &self,
        p: &Provisioner,
        cmd: &[String],
        stdout: OutputSink<'_>,
        stderr: OutputSink<'_>,
    ) -> Result<()> {
        let code = p.cluster().exec(&self.id, cmd, stdout, stderr).await?;
        if code != 0 {
            return Err(ProvisionError::ExecFailed { code });
        }
        Ok(())
    }

    pub async fn logs(&self, p: &Provisioner, output: OutputSink<'_>) -> Result<()> {
        p.cluster().logs(&self.id, output).await
    }

    pub async fn shell(
        &self,
        p: &Provisioner,
        stdin: InputSource<'_>,
        stdout: OutputSink<'_>,
        stderr: OutputSink<'_>,
        pty: &PtySpec,
    ) -> Result<()> {
        p.cluster().shell(&self.id, stdin, stdout, stderr, pty).await
    }

    /// IP and host port as reported by the runtime
    pub async fn network_info(&self, p: &Provisioner) -> Result<NetworkInfo> {
        let inspect = p.cluster().inspect_container(&self.id).await?;
        let host_port = p
            .settings()
            .run_cmd
            .port
            .as_deref()
            .and_then(|port| inspect.host_port(port))
            .unwrap_or_default()
            .to_string();
        Ok(NetworkInfo {
            ip: inspect.ip_address,
            host_port,
        })
    }
}

impl From<&Container> for Unit {
    fn from(container: &Container) -> Self {
        Unit {
            name: container.id.clone(),
            app_name: container.app_name.clone(),
            unit_type: container.platform.clone(),
            status: container.status,
            ip: container.host_addr.clone(),
        }
    }
}
