//! Runtime client driving the docker CLI against a remote daemon

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::debug;

use super::pty::run_in_pty;
use super::{
    ClientFactory, ContainerInspect, CreateContainerOptions, HostConfig, InputSource,
    OutputSink, PtySpec, RegistryAuth, RestartPolicy, RuntimeClient, RuntimeError,
};

/// Docker CLI client bound to one daemon
#[derive(Debug, Clone)]
pub struct DockerCli {
    docker_bin: String,
    address: String,
    host: String,
}

impl DockerCli {
    pub fn new(docker_bin: impl Into<String>, address: impl Into<String>) -> Self {
        let address = address.into();
        Self {
            docker_bin: docker_bin.into(),
            host: docker_host(&address),
            address,
        }
    }

    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut cmd = Command::new(&self.docker_bin);
        cmd.arg("-H").arg(&self.host).args(args).kill_on_drop(true);
        cmd
    }

    /// Run a command to completion and return its trimmed stdout
    async fn output(&self, args: &[&str]) -> Result<String, RuntimeError> {
        debug!("docker -H {} {}", self.host, args.join(" "));
        let output = self
            .command(args)
            .stdin(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            return Err(classify(&String::from_utf8_lossy(&output.stderr)));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Run a command, copying its stdout into `sink` as it arrives
    async fn stream(&self, args: &[&str], sink: OutputSink<'_>) -> Result<(), RuntimeError> {
        debug!("docker -H {} {}", self.host, args.join(" "));
        let mut child = self
            .command(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| RuntimeError::Api("docker stdout unavailable".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| RuntimeError::Api("docker stderr unavailable".to_string()))?;

        let mut errors = String::new();
        let (copied, read) = tokio::join!(
            tokio::io::copy(&mut stdout, &mut *sink),
            stderr.read_to_string(&mut errors)
        );
        // A failing sink aborts the command
        copied?;
        read?;

        let status = child.wait().await?;
        if !status.success() {
            return Err(classify(&errors));
        }
        sink.write_all(errors.as_bytes()).await?;
        sink.flush().await?;
        Ok(())
    }

    async fn login(&self, registry: &str, auth: &RegistryAuth) -> Result<(), RuntimeError> {
        debug!("Authenticating with registry {}", registry);
        let mut child = self
            .command(["login", registry, "-u", auth.username.as_str(), "--password-stdin"])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(auth.password.expose_secret().as_bytes())
                .await?;
        }
        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(classify(&String::from_utf8_lossy(&output.stderr)));
        }
        Ok(())
    }
}

#[async_trait]
impl RuntimeClient for DockerCli {
    fn address(&self) -> &str {
        &self.address
    }

    async fn ping(&self) -> Result<(), RuntimeError> {
        self.output(&["version", "--format", "{{.Server.Version}}"])
            .await
            .map(|_| ())
    }

    async fn pull_image(&self, image: &str, output: OutputSink<'_>) -> Result<(), RuntimeError> {
        self.stream(&["pull", image], output).await
    }

    async fn create_container(
        &self,
        opts: &CreateContainerOptions,
    ) -> Result<String, RuntimeError> {
        let args = create_args(opts);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.output(&args).await
    }

    async fn start_container(
        &self,
        id: &str,
        host_config: &HostConfig,
    ) -> Result<(), RuntimeError> {
        if host_config.restart_policy == RestartPolicy::Always {
            self.output(&["update", "--restart=always", id]).await?;
        }
        self.output(&["start", id]).await.map(|_| ())
    }

    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError> {
        let secs = timeout.as_secs().to_string();
        self.output(&["stop", "-t", &secs, id]).await.map(|_| ())
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.output(&["rm", "-v", id]).await.map(|_| ())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInspect, RuntimeError> {
        let raw = self
            .output(&["inspect", "--type", "container", id])
            .await?;
        parse_inspect(&raw)
    }

    async fn wait_container(&self, id: &str) -> Result<i64, RuntimeError> {
        let raw = self.output(&["wait", id]).await?;
        raw.parse::<i64>()
            .map_err(|_| RuntimeError::Api(format!("unexpected wait output: {}", raw)))
    }

    async fn attach(&self, id: &str, output: OutputSink<'_>) -> Result<(), RuntimeError> {
        self.stream(&["logs", "--follow", id], output).await
    }

    async fn logs(&self, id: &str, output: OutputSink<'_>) -> Result<(), RuntimeError> {
        self.stream(&["logs", id], output).await
    }

    async fn commit(&self, id: &str, repository: &str, tag: &str) -> Result<String, RuntimeError> {
        let target = if tag.is_empty() {
            repository.to_string()
        } else {
            format!("{}:{}", repository, tag)
        };
        self.output(&["commit", id, &target]).await
    }

    async fn push_image(
        &self,
        name: &str,
        tag: &str,
        auth: Option<&RegistryAuth>,
        output: OutputSink<'_>,
    ) -> Result<(), RuntimeError> {
        if let Some(auth) = auth {
            let registry = name.split('/').next().unwrap_or(name);
            self.login(registry, auth).await?;
        }
        let target = if tag.is_empty() {
            name.to_string()
        } else {
            format!("{}:{}", name, tag)
        };
        self.stream(&["push", &target], output).await
    }

    async fn remove_image(&self, name: &str) -> Result<(), RuntimeError> {
        self.output(&["rmi", name]).await.map(|_| ())
    }

    async fn exec(
        &self,
        id: &str,
        cmd: &[String],
        stdout: OutputSink<'_>,
        stderr: OutputSink<'_>,
    ) -> Result<i64, RuntimeError> {
        let mut args = vec!["exec".to_string(), id.to_string()];
        args.extend(cmd.iter().cloned());
        debug!("docker -H {} {}", self.host, args.join(" "));

        let mut child = self
            .command(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        let mut out = child
            .stdout
            .take()
            .ok_or_else(|| RuntimeError::Api("docker stdout unavailable".to_string()))?;
        let mut err = child
            .stderr
            .take()
            .ok_or_else(|| RuntimeError::Api("docker stderr unavailable".to_string()))?;

        // Keep a copy of stderr to tell CLI failures from command failures
        let mut captured = Vec::new();
        let copy_err = async {
            let mut buf = [0u8; 4096];
            loop {
                let n = err.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                captured.extend_from_slice(&buf[..n]);
                stderr.write_all(&buf[..n]).await?;
            }
            Ok::<_, std::io::Error>(())
        };
        let (copied, forwarded) = tokio::join!(tokio::io::copy(&mut out, &mut *stdout), copy_err);
        copied?;
        forwarded?;

        let status = child.wait().await?;
        let captured = String::from_utf8_lossy(&captured);
        if captured.contains("No such container") {
            return Err(RuntimeError::NoSuchContainer(id.to_string()));
        }
        Ok(status.code().map(i64::from).unwrap_or(-1))
    }

    async fn shell(
        &self,
        id: &str,
        stdin: InputSource<'_>,
        stdout: OutputSink<'_>,
        _stderr: OutputSink<'_>,
        pty: &PtySpec,
    ) -> Result<(), RuntimeError> {
        // The terminal merges stderr into stdout
        let args = vec![
            "-H".to_string(),
            self.host.clone(),
            "exec".to_string(),
            "-it".to_string(),
            "-e".to_string(),
            format!("TERM={}", pty.term),
            id.to_string(),
            "/bin/bash".to_string(),
            "-l".to_string(),
        ];
        let code = run_in_pty(&self.docker_bin, &args, pty, stdin, stdout).await?;
        debug!("Shell session in {} exited with {}", id, code);
        Ok(())
    }
}

/// Builds [`DockerCli`] clients
#[derive(Debug, Clone)]
pub struct DockerCliFactory {
    docker_bin: String,
}

impl DockerCliFactory {
    pub fn new(docker_bin: impl Into<String>) -> Self {
        Self {
            docker_bin: docker_bin.into(),
        }
    }
}

impl ClientFactory for DockerCliFactory {
    fn client(&self, address: &str) -> Arc<dyn RuntimeClient> {
        Arc::new(DockerCli::new(self.docker_bin.clone(), address))
    }
}

/// Translate a node address into a docker `-H` value
fn docker_host(address: &str) -> String {
    if let Some(rest) = address.strip_prefix("http://") {
        format!("tcp://{}", rest.trim_end_matches('/'))
    } else if let Some(rest) = address.strip_prefix("https://") {
        format!("tcp://{}", rest.trim_end_matches('/'))
    } else {
        address.to_string()
    }
}

fn create_args(opts: &CreateContainerOptions) -> Vec<String> {
    let mut args = vec!["create".to_string()];
    if !opts.name.is_empty() {
        args.extend(["--name".to_string(), opts.name.clone()]);
    }
    if let Some(user) = &opts.user {
        args.extend(["--user".to_string(), user.clone()]);
    }
    if opts.memory > 0 {
        args.extend(["--memory".to_string(), opts.memory.to_string()]);
    }
    if opts.memory_swap > 0 {
        args.extend(["--memory-swap".to_string(), opts.memory_swap.to_string()]);
    }
    if opts.cpu_shares > 0 {
        args.extend(["--cpu-shares".to_string(), opts.cpu_shares.to_string()]);
    }
    if let Some(port) = &opts.exposed_port {
        args.extend(["--publish".to_string(), port.clone()]);
    }
    for (key, value) in &opts.env {
        args.extend(["--env".to_string(), format!("{}={}", key, value)]);
    }
    args.push(opts.image.clone());
    args.extend(opts.cmd.iter().cloned());
    args
}

fn classify(stderr: &str) -> RuntimeError {
    let message = stderr.trim();
    if message.contains("No such container") {
        RuntimeError::NoSuchContainer(message.to_string())
    } else if message.contains("No such image") {
        RuntimeError::NoSuchImage(message.to_string())
    } else {
        RuntimeError::Api(message.to_string())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawInspect {
    id: String,
    state: RawState,
    network_settings: RawNetworkSettings,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawState {
    running: bool,
    #[serde(default)]
    exit_code: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawNetworkSettings {
    #[serde(rename = "IPAddress", default)]
    ip_address: String,
    #[serde(default)]
    ports: Option<HashMap<String, Option<Vec<RawPortBinding>>>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawPortBinding {
    #[serde(default)]
    host_port: String,
}

fn parse_inspect(raw: &str) -> Result<ContainerInspect, RuntimeError> {
    let mut parsed: Vec<RawInspect> = serde_json::from_str(raw)
        .map_err(|e| RuntimeError::Api(format!("invalid inspect output: {}", e)))?;
    let raw = parsed
        .pop()
        .ok_or_else(|| RuntimeError::Api("empty inspect output".to_string()))?;

    let ports = raw
        .network_settings
        .ports
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(port, bindings)| {
            let binding = bindings?.into_iter().find(|b| !b.host_port.is_empty())?;
            Some((port, binding.host_port))
        })
        .collect();

    Ok(ContainerInspect {
        id: raw.id,
        running: raw.state.running,
        exit_code: raw.state.exit_code,
        ip_address: raw.network_settings.ip_address,
        ports,
    })
}
