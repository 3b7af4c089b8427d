//! Commands run inside app containers
//!
//! Every command goes through the unit agent, which receives the control
//! plane host, the app token and the app name before the wrapped command.

use crate::errors::{ProvisionError, Result};
use crate::models::app::{App, HOST_ENV, TOKEN_ENV};
use crate::settings::DockerSettings;

/// Unit agent invocation prefix for an app
fn unit_agent(settings: &DockerSettings, app: &App) -> Result<String> {
    let host = app
        .env_var(HOST_ENV)
        .ok_or_else(|| ProvisionError::ConfigMissing(format!("{} for app {}", HOST_ENV, app.name)))?;
    let token = app
        .env_var(TOKEN_ENV)
        .ok_or_else(|| ProvisionError::ConfigMissing(format!("{} for app {}", TOKEN_ENV, app.name)))?;
    Ok(format!("{} {} {} {}", settings.unit_agent, host, token, app.name))
}

fn shell(cmd: String) -> Vec<String> {
    vec!["/bin/bash".to_string(), "-lc".to_string(), cmd]
}

fn deploy_cmds(settings: &DockerSettings, app: &App, args: &str) -> Result<Vec<String>> {
    let agent = unit_agent(settings, app)?;
    Ok(shell(format!(
        "{} \"{} {}\" deploy",
        agent, settings.deploy_cmd, args
    )))
}

/// Build commands fetching a git revision
pub fn git_deploy_cmds(
    settings: &DockerSettings,
    app: &App,
    git_url: &str,
    version: &str,
) -> Result<Vec<String>> {
    deploy_cmds(settings, app, &format!("git {} {}", git_url, version))
}

/// Build commands downloading an archive
pub fn archive_deploy_cmds(
    settings: &DockerSettings,
    app: &App,
    archive_url: &str,
) -> Result<Vec<String>> {
    deploy_cmds(settings, app, &format!("archive {}", archive_url))
}

/// Commands of a long-lived app container
///
/// The trailing `tail` keeps the container alive once the start command
/// returns.
pub fn run_with_agent_cmds(settings: &DockerSettings, app: &App) -> Result<Vec<String>> {
    let agent = unit_agent(settings, app)?;
    Ok(shell(format!(
        "{} {} && tail -f /dev/null",
        agent, settings.run_cmd.bin
    )))
}
