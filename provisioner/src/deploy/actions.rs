//! Container actions shared by deploys and unit starts

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::pipeline::{Action, Pipeline};
use crate::cluster::Cluster;
use crate::container::{Container, CreateArgs};
use crate::errors::{ProvisionError, Result};
use crate::models::App;
use crate::provisioner::Provisioner;
use crate::runtime::OutputSink;

/// State shared by the actions of one run
///
/// Lives only for the duration of the run and is never persisted.
pub struct DeployContext<'a> {
    pub provisioner: &'a Provisioner,

    /// Cluster new containers are placed on
    pub cluster: &'a Cluster,

    pub app: &'a App,

    /// Image the container is created from
    pub image_id: String,

    pub commands: Vec<String>,

    /// Whether the container is a transient build container
    pub is_deploy: bool,

    /// Release image a build container commits to
    pub building_image: Option<String>,

    pub output: OutputSink<'a>,

    /// Container created by the run
    pub container: Option<Container>,

    /// Image committed by the run
    pub image: Option<String>,
}

impl DeployContext<'_> {
    fn container_mut(&mut self) -> Result<&mut Container> {
        self.container
            .as_mut()
            .ok_or_else(|| ProvisionError::Internal("no container in context".to_string()))
    }
}

/// Makes the source image available on an eligible node
pub struct PullImage;

#[async_trait]
impl<'a> Action<DeployContext<'a>> for PullImage {
    fn name(&self) -> &'static str {
        "pull-image"
    }

    async fn forward(&self, ctx: &mut DeployContext<'a>) -> Result<()> {
        let holders = ctx.cluster.storage().retrieve_image(&ctx.image_id).await?;
        if ctx
            .cluster
            .nodes()
            .iter()
            .any(|n| holders.contains(&n.address))
        {
            debug!("Image {} already present", ctx.image_id);
            return Ok(());
        }
        ctx.cluster.pull_image(&ctx.image_id, &mut *ctx.output).await?;
        Ok(())
    }
}

pub struct CreateContainer;

#[async_trait]
impl<'a> Action<DeployContext<'a>> for CreateContainer {
    fn name(&self) -> &'static str {
        "create-container"
    }

    async fn forward(&self, ctx: &mut DeployContext<'a>) -> Result<()> {
        let args = CreateArgs {
            app: ctx.app,
            image_id: &ctx.image_id,
            commands: ctx.commands.clone(),
            is_deploy: ctx.is_deploy,
            building_image: ctx.building_image.clone(),
        };
        let container = Container::create(ctx.provisioner, ctx.cluster, args).await?;
        ctx.container = Some(container);
        Ok(())
    }

    async fn backward(&self, ctx: &mut DeployContext<'a>) -> Result<()> {
        if let Some(container) = ctx.container.take() {
            container.remove(ctx.provisioner).await?;
        }
        Ok(())
    }
}

pub struct StartContainer;

#[async_trait]
impl<'a> Action<DeployContext<'a>> for StartContainer {
    fn name(&self) -> &'static str {
        "start-container"
    }

    async fn forward(&self, ctx: &mut DeployContext<'a>) -> Result<()> {
        let provisioner = ctx.provisioner;
        let is_deploy = ctx.is_deploy;
        ctx.container_mut()?.start(provisioner, is_deploy).await
    }

    async fn backward(&self, ctx: &mut DeployContext<'a>) -> Result<()> {
        let provisioner = ctx.provisioner;
        match ctx.container.as_mut() {
            Some(container) => container.stop(provisioner).await,
            None => Ok(()),
        }
    }
}

/// Streams the build output and waits for the build to finish
pub struct WaitContainer;

#[async_trait]
impl<'a> Action<DeployContext<'a>> for WaitContainer {
    fn name(&self) -> &'static str {
        "wait-container"
    }

    async fn forward(&self, ctx: &mut DeployContext<'a>) -> Result<()> {
        let id = match &ctx.container {
            Some(container) => container.id.clone(),
            None => return Err(ProvisionError::Internal("no container in context".to_string())),
        };
        let cluster = ctx.provisioner.cluster();

        cluster.attach(&id, &mut *ctx.output).await?;
        ctx.output.flush().await?;

        let code = cluster.wait_container(&id).await?;
        if code != 0 {
            return Err(ProvisionError::BuildFailed { code });
        }
        Ok(())
    }
}

pub struct CommitImage;

#[async_trait]
impl<'a> Action<DeployContext<'a>> for CommitImage {
    fn name(&self) -> &'static str {
        "commit-image"
    }

    async fn forward(&self, ctx: &mut DeployContext<'a>) -> Result<()> {
        let container = ctx
            .container
            .as_ref()
            .ok_or_else(|| ProvisionError::Internal("no container in context".to_string()))?;
        let image = container.commit(ctx.provisioner, &mut *ctx.output).await?;
        info!("Built image {} for app {}", image, ctx.app.name);
        ctx.image = Some(image);
        Ok(())
    }

    async fn backward(&self, ctx: &mut DeployContext<'a>) -> Result<()> {
        if let Some(image) = ctx.image.take() {
            ctx.provisioner.cluster().remove_image(&image).await?;
        }
        Ok(())
    }
}

/// Actions building a release image in a transient container
pub fn deploy_pipeline<'a>() -> Pipeline<DeployContext<'a>> {
    let actions: Vec<Box<dyn Action<DeployContext<'a>>>> = vec![
        Box::new(PullImage),
        Box::new(CreateContainer),
        Box::new(StartContainer),
        Box::new(WaitContainer),
        Box::new(CommitImage),
    ];
    Pipeline::new(actions)
}

/// Actions starting a long-lived app container
pub fn start_pipeline<'a>() -> Pipeline<DeployContext<'a>> {
    let actions: Vec<Box<dyn Action<DeployContext<'a>>>> = vec![
        Box::new(PullImage),
        Box::new(CreateContainer),
        Box::new(StartContainer),
    ];
    Pipeline::new(actions)
}
