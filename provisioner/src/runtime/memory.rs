//! In-memory runtime node
//!
//! Behaves like a runtime node without any processes behind it. Used by the
//! test suite and by local setups without a container runtime.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::{
    split_image, ClientFactory, ContainerInspect, CreateContainerOptions, HostConfig,
    InputSource, OutputSink, PtySpec, RegistryAuth, RestartPolicy, RuntimeClient, RuntimeError,
};

const FIRST_HOST_PORT: u16 = 49153;

#[derive(Debug, Clone)]
struct MemoryContainer {
    opts: CreateContainerOptions,
    running: bool,
    exit_code: i64,
    ip_address: String,
    host_port: Option<String>,
    restart_policy: Option<RestartPolicy>,
}

#[derive(Debug, Default)]
struct State {
    containers: HashMap<String, MemoryContainer>,
    images: HashSet<String>,
    pushed: Vec<String>,
    failures: HashMap<String, String>,
    call_failures: HashMap<String, (usize, String)>,
    calls: HashMap<String, usize>,
    execs: Vec<Vec<String>>,
    exec_exit_code: i64,
    wait_exit_code: i64,
    output: Option<Vec<u8>>,
    next_port: u16,
    next_ip: u8,
}

/// In-memory runtime node
#[derive(Debug)]
pub struct MemoryRuntime {
    address: String,
    state: Mutex<State>,
}

impl MemoryRuntime {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            state: Mutex::new(State {
                next_port: FIRST_HOST_PORT,
                next_ip: 2,
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a call and return the prepared failure for it, if any
    fn enter(&self, op: &str) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        let count = state.calls.entry(op.to_string()).or_default();
        *count += 1;
        let count = *count;
        if let Some((nth, message)) = state.call_failures.get(op) {
            if *nth == count {
                return Err(RuntimeError::Api(message.clone()));
            }
        }
        match state.failures.get(op) {
            Some(message) => Err(RuntimeError::Api(message.clone())),
            None => Ok(()),
        }
    }

    /// Make every subsequent call to `op` fail with `message`
    pub fn prepare_failure(&self, op: &str, message: &str) {
        self.lock()
            .failures
            .insert(op.to_string(), message.to_string());
    }

    /// Make only the `nth` call to `op` fail with `message`, counting from 1
    /// and including calls already made
    pub fn prepare_call_failure(&self, op: &str, nth: usize, message: &str) {
        self.lock()
            .call_failures
            .insert(op.to_string(), (nth, message.to_string()));
    }

    pub fn reset_failure(&self, op: &str) {
        let mut state = self.lock();
        state.failures.remove(op);
        state.call_failures.remove(op);
    }

    /// Exit code reported by subsequent exec calls
    pub fn set_exec_exit_code(&self, code: i64) {
        self.lock().exec_exit_code = code;
    }

    /// Exit code reported when a container finishes
    pub fn set_wait_exit_code(&self, code: i64) {
        self.lock().wait_exit_code = code;
    }

    /// Output produced by every container
    pub fn set_output(&self, output: impl Into<Vec<u8>>) {
        self.lock().output = Some(output.into());
    }

    /// Number of calls made for an operation
    pub fn calls(&self, op: &str) -> usize {
        self.lock().calls.get(op).copied().unwrap_or(0)
    }

    pub fn has_image(&self, image: &str) -> bool {
        self.lock().images.contains(image)
    }

    pub fn has_container(&self, id: &str) -> bool {
        self.lock().containers.contains_key(id)
    }

    pub fn container_count(&self) -> usize {
        self.lock().containers.len()
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.lock()
            .containers
            .get(id)
            .map(|c| c.running)
            .unwrap_or(false)
    }

    /// Restart policy given to the last start call
    pub fn restart_policy(&self, id: &str) -> Option<RestartPolicy> {
        self.lock().containers.get(id).and_then(|c| c.restart_policy)
    }

    /// Command a container was created with
    pub fn container_cmd(&self, id: &str) -> Option<Vec<String>> {
        self.lock().containers.get(id).map(|c| c.opts.cmd.clone())
    }

    /// Options a container was created with
    pub fn container_options(&self, id: &str) -> Option<CreateContainerOptions> {
        self.lock().containers.get(id).map(|c| c.opts.clone())
    }

    /// Images pushed so far, as `name:tag`
    pub fn pushed_images(&self) -> Vec<String> {
        self.lock().pushed.clone()
    }

    /// Commands run through exec so far
    pub fn execs(&self) -> Vec<Vec<String>> {
        self.lock().execs.clone()
    }

    fn container_output(&self, id: &str) -> Result<Vec<u8>, RuntimeError> {
        let state = self.lock();
        if !state.containers.contains_key(id) {
            return Err(RuntimeError::NoSuchContainer(id.to_string()));
        }
        Ok(state
            .output
            .clone()
            .unwrap_or_else(|| format!("output of {}\n", id).into_bytes()))
    }
}

#[async_trait]
impl RuntimeClient for MemoryRuntime {
    fn address(&self) -> &str {
        &self.address
    }

    async fn ping(&self) -> Result<(), RuntimeError> {
        self.enter("ping")
    }

    async fn pull_image(&self, image: &str, output: OutputSink<'_>) -> Result<(), RuntimeError> {
        self.enter("pull")?;
        self.lock().images.insert(image.to_string());
        output
            .write_all(format!("Pulling {}\n", image).as_bytes())
            .await?;
        Ok(())
    }

    async fn create_container(
        &self,
        opts: &CreateContainerOptions,
    ) -> Result<String, RuntimeError> {
        self.enter("create")?;
        let mut state = self.lock();
        if !state.images.contains(&opts.image) {
            return Err(RuntimeError::NoSuchImage(opts.image.clone()));
        }

        let id = uuid::Uuid::new_v4().simple().to_string();
        let host_port = opts.exposed_port.as_ref().map(|_| {
            let port = state.next_port;
            state.next_port += 1;
            port.to_string()
        });
        let ip_address = format!("172.17.0.{}", state.next_ip);
        state.next_ip = state.next_ip.wrapping_add(1);

        state.containers.insert(
            id.clone(),
            MemoryContainer {
                opts: opts.clone(),
                running: false,
                exit_code: 0,
                ip_address,
                host_port,
                restart_policy: None,
            },
        );
        Ok(id)
    }

    async fn start_container(
        &self,
        id: &str,
        host_config: &HostConfig,
    ) -> Result<(), RuntimeError> {
        self.enter("start")?;
        let mut state = self.lock();
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NoSuchContainer(id.to_string()))?;
        if container.running {
            return Err(RuntimeError::Api(format!(
                "container {} is already running",
                id
            )));
        }
        container.running = true;
        container.restart_policy = Some(host_config.restart_policy);
        Ok(())
    }

    async fn stop_container(&self, id: &str, _timeout: Duration) -> Result<(), RuntimeError> {
        self.enter("stop")?;
        let mut state = self.lock();
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NoSuchContainer(id.to_string()))?;
        container.running = false;
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.enter("remove")?;
        self.lock()
            .containers
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RuntimeError::NoSuchContainer(id.to_string()))
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInspect, RuntimeError> {
        self.enter("inspect")?;
        let state = self.lock();
        let container = state
            .containers
            .get(id)
            .ok_or_else(|| RuntimeError::NoSuchContainer(id.to_string()))?;

        let mut ports = HashMap::new();
        if let (Some(port), Some(host_port)) =
            (&container.opts.exposed_port, &container.host_port)
        {
            ports.insert(format!("{}/tcp", port), host_port.clone());
        }

        Ok(ContainerInspect {
            id: id.to_string(),
            running: container.running,
            exit_code: container.exit_code,
            ip_address: container.ip_address.clone(),
            ports,
        })
    }

    async fn wait_container(&self, id: &str) -> Result<i64, RuntimeError> {
        self.enter("wait")?;
        let mut state = self.lock();
        let code = state.wait_exit_code;
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NoSuchContainer(id.to_string()))?;
        container.running = false;
        container.exit_code = code;
        Ok(code)
    }

    async fn attach(&self, id: &str, output: OutputSink<'_>) -> Result<(), RuntimeError> {
        self.enter("attach")?;
        let data = self.container_output(id)?;
        output.write_all(&data).await?;
        output.flush().await?;
        Ok(())
    }

    async fn logs(&self, id: &str, output: OutputSink<'_>) -> Result<(), RuntimeError> {
        self.enter("logs")?;
        let data = self.container_output(id)?;
        output.write_all(&data).await?;
        Ok(())
    }

    async fn commit(&self, id: &str, repository: &str, tag: &str) -> Result<String, RuntimeError> {
        self.enter("commit")?;
        let mut state = self.lock();
        if !state.containers.contains_key(id) {
            return Err(RuntimeError::NoSuchContainer(id.to_string()));
        }
        let name = if tag.is_empty() {
            repository.to_string()
        } else {
            format!("{}:{}", repository, tag)
        };
        state.images.insert(name);
        Ok(format!("sha256:{}", uuid::Uuid::new_v4().simple()))
    }

    async fn push_image(
        &self,
        name: &str,
        tag: &str,
        _auth: Option<&RegistryAuth>,
        output: OutputSink<'_>,
    ) -> Result<(), RuntimeError> {
        self.enter("push")?;
        let full = if tag.is_empty() {
            name.to_string()
        } else {
            format!("{}:{}", name, tag)
        };
        {
            let mut state = self.lock();
            if !state.images.contains(&full) {
                return Err(RuntimeError::NoSuchImage(full));
            }
            state.pushed.push(full.clone());
        }
        output
            .write_all(format!("Pushing {}\n", full).as_bytes())
            .await?;
        Ok(())
    }

    async fn remove_image(&self, name: &str) -> Result<(), RuntimeError> {
        self.enter("remove_image")?;
        let mut state = self.lock();
        if state.images.remove(name) {
            return Ok(());
        }
        // An untagged reference names the latest tag
        let (repository, tag) = split_image(name);
        if tag.is_empty() && state.images.remove(&format!("{}:latest", repository)) {
            return Ok(());
        }
        Err(RuntimeError::NoSuchImage(name.to_string()))
    }

    async fn exec(
        &self,
        id: &str,
        cmd: &[String],
        stdout: OutputSink<'_>,
        _stderr: OutputSink<'_>,
    ) -> Result<i64, RuntimeError> {
        self.enter("exec")?;
        let code = {
            let mut state = self.lock();
            if !state.containers.contains_key(id) {
                return Err(RuntimeError::NoSuchContainer(id.to_string()));
            }
            state.execs.push(cmd.to_vec());
            state.exec_exit_code
        };
        stdout
            .write_all(format!("{}\n", cmd.join(" ")).as_bytes())
            .await?;
        Ok(code)
    }

    async fn shell(
        &self,
        id: &str,
        stdin: InputSource<'_>,
        stdout: OutputSink<'_>,
        _stderr: OutputSink<'_>,
        _pty: &PtySpec,
    ) -> Result<(), RuntimeError> {
        self.enter("shell")?;
        if !self.has_container(id) {
            return Err(RuntimeError::NoSuchContainer(id.to_string()));
        }
        // Echo the session back like a terminal would
        let mut input = Vec::new();
        stdin.read_to_end(&mut input).await?;
        stdout.write_all(&input).await?;
        Ok(())
    }
}

/// Factory handing out one in-memory node per address
#[derive(Debug, Default)]
pub struct MemoryFactory {
    nodes: Mutex<HashMap<String, Arc<MemoryRuntime>>>,
}

impl MemoryFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The node behind an address, created on first use
    pub fn runtime(&self, address: &str) -> Arc<MemoryRuntime> {
        let mut nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());
        nodes
            .entry(address.to_string())
            .or_insert_with(|| Arc::new(MemoryRuntime::new(address)))
            .clone()
    }
}

impl ClientFactory for MemoryFactory {
    fn client(&self, address: &str) -> Arc<dyn RuntimeClient> {
        self.runtime(address)
    }
}
