//! In-memory fakes for the daemon, SSH session, dialer and HTTP endpoints

use async_trait::async_trait;
use axum::http::{StatusCode, Uri};
use axum::Router;
use bollard::container::Config;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

use dm_core::error::ConnectionError;
use dm_core::traits::{ShellSession, TransportProvider, TunnelStream};
use dm_core::ContainerRecord;

use crate::connection::Dialer;
use crate::daemon::{
    ContainerDetails, ContainerSpec, DaemonClient, DaemonError, DaemonInfo, ImageDetails,
    PruneReport,
};

/// A container held by [`MockDaemon`]
#[derive(Debug, Clone)]
pub struct MockContainer {
    pub id: String,
    pub name: String,
    pub image: String,
    pub image_id: String,
    pub running: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub labels: HashMap<String, String>,
}

impl MockContainer {
    /// Running for an hour already
    pub fn running(id: &str, name: &str, image: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            image: image.to_string(),
            image_id: String::new(),
            running: true,
            started_at: Some(Utc::now() - chrono::Duration::hours(1)),
            labels: HashMap::new(),
        }
    }

    pub fn stopped(id: &str, name: &str, image: &str) -> Self {
        Self {
            running: false,
            ..Self::running(id, name, image)
        }
    }

    pub fn up_for(mut self, uptime: Duration) -> Self {
        let uptime = chrono::Duration::from_std(uptime).unwrap_or_else(|_| chrono::Duration::zero());
        self.started_at = Some(Utc::now() - uptime);
        self
    }

    /// Created from an image its tag no longer points at
    pub fn on_image(mut self, image_id: &str) -> Self {
        self.image_id = image_id.to_string();
        self
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    /// Listed the way the daemon does: by image ID once the tag has moved on
    fn record(&self, images: &HashMap<String, ImageDetails>) -> ContainerRecord {
        let moved = images
            .get(&self.image)
            .is_some_and(|image| !self.image_id.is_empty() && image.id != self.image_id);
        ContainerRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            image: if moved { self.image_id.clone() } else { self.image.clone() },
            image_id: self.image_id.clone(),
            labels: self.labels.clone(),
            state: Some(if self.running { "running" } else { "exited" }.to_string()),
        }
    }

    fn details(&self) -> ContainerDetails {
        let config = Config {
            image: Some(self.image.clone()),
            labels: Some(self.labels.clone()),
            ..Default::default()
        };
        ContainerDetails {
            id: self.id.clone(),
            name: self.name.clone(),
            image: self.image.clone(),
            image_id: self.image_id.clone(),
            running: self.running,
            started_at: self.started_at,
            labels: self.labels.clone(),
            spec: ContainerSpec::new(config),
        }
    }
}

#[derive(Default)]
struct MockState {
    containers: Vec<MockContainer>,
    images: HashMap<String, ImageDetails>,
    registry: HashMap<String, String>,
    dangling: PruneReport,
    calls: Vec<String>,
    created: usize,
    unreachable: bool,
    fail_create: bool,
    fail_start: HashSet<String>,
    crash_on_start: HashSet<String>,
}

impl MockState {
    fn find(&mut self, id: &str) -> Result<&mut MockContainer, DaemonError> {
        self.containers
            .iter_mut()
            .find(|c| c.id == id || c.name == id)
            .ok_or_else(|| DaemonError::NotFound(format!("container {}", id)))
    }
}

/// A Docker daemon kept entirely in memory. Every call is logged as
/// `verb:argument` (see [`MockDaemon::calls`]).
#[derive(Default)]
pub struct MockDaemon {
    state: Mutex<MockState>,
    closed: Option<Arc<AtomicUsize>>,
}

impl MockDaemon {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call fails as if the daemon were down
    pub fn unreachable(self) -> Self {
        self.state.lock().unwrap().unreachable = true;
        self
    }

    pub fn with_container(self, container: MockContainer) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let mut container = container;
            if container.image_id.is_empty() {
                if let Some(image) = state.images.get(&container.image) {
                    container.image_id = image.id.clone();
                }
            }
            state.containers.push(container);
        }
        self
    }

    /// Local image `reference` with `id`, pulled by `repo_digests`
    pub fn with_image(self, reference: &str, id: &str, repo_digests: &[&str]) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.images.insert(
                reference.to_string(),
                ImageDetails {
                    id: id.to_string(),
                    repo_digests: repo_digests.iter().map(|d| d.to_string()).collect(),
                },
            );
            for container in state
                .containers
                .iter_mut()
                .filter(|c| c.image == reference && c.image_id.is_empty())
            {
                container.image_id = id.to_string();
            }
        }
        self
    }

    /// Digest the registry serves for `reference`
    pub fn with_registry_digest(self, reference: &str, digest: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .registry
            .insert(reference.to_string(), digest.to_string());
        self
    }

    /// Images removed by the next prune
    pub fn with_dangling(self, ids: &[&str], space_reclaimed: u64) -> Self {
        self.state.lock().unwrap().dangling = PruneReport {
            deleted: ids.iter().map(|s| s.to_string()).collect(),
            space_reclaimed,
        };
        self
    }

    pub fn fail_create(self) -> Self {
        self.state.lock().unwrap().fail_create = true;
        self
    }

    /// Starting the container named `name` fails
    pub fn fail_start(self, name: &str) -> Self {
        self.state.lock().unwrap().fail_start.insert(name.to_string());
        self
    }

    /// The container named `name` exits right after starting
    pub fn crash_on_start(self, name: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .crash_on_start
            .insert(name.to_string());
        self
    }

    /// Count `close` calls into `counter`
    pub fn counting_closes(mut self, counter: Arc<AtomicUsize>) -> Self {
        self.closed = Some(counter);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn containers(&self) -> Vec<MockContainer> {
        self.state.lock().unwrap().containers.clone()
    }

    pub fn container(&self, id: &str) -> Option<MockContainer> {
        self.containers().into_iter().find(|c| c.id == id)
    }

    fn call(&self, call: String) -> Result<std::sync::MutexGuard<'_, MockState>, DaemonError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        if state.unreachable {
            return Err(DaemonError::Unexpected("connection refused".to_string()));
        }
        Ok(state)
    }
}

#[async_trait]
impl DaemonClient for MockDaemon {
    async fn info(&self) -> Result<DaemonInfo, DaemonError> {
        self.call("info".to_string())?;
        Ok(DaemonInfo {
            name: "mock-daemon".to_string(),
            kernel_version: "6.1.0".to_string(),
            server_version: "26.1.0".to_string(),
        })
    }

    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerRecord>, DaemonError> {
        let state = self.call("list".to_string())?;
        Ok(state
            .containers
            .iter()
            .filter(|c| all || c.running)
            .map(|c| c.record(&state.images))
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, DaemonError> {
        let mut state = self.call(format!("inspect:{}", id))?;
        Ok(state.find(id)?.details())
    }

    async fn create_container(&self, name: &str, spec: ContainerSpec) -> Result<String, DaemonError> {
        let mut state = self.call(format!("create:{}", name))?;
        if state.fail_create {
            return Err(DaemonError::Unexpected("create refused".to_string()));
        }
        if state.containers.iter().any(|c| c.name == name) {
            return Err(DaemonError::Unexpected(format!("name {} is already in use", name)));
        }

        state.created += 1;
        let id = format!("new{}", state.created);
        let image = spec.image().unwrap_or_default().to_string();
        let image_id = state
            .images
            .get(&image)
            .map(|i| i.id.clone())
            .unwrap_or_default();
        state.containers.push(MockContainer {
            id: id.clone(),
            name: name.to_string(),
            image,
            image_id,
            running: false,
            started_at: None,
            labels: spec.into_config().labels.unwrap_or_default(),
        });
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), DaemonError> {
        let mut state = self.call(format!("start:{}", id))?;
        let fail_start = state.fail_start.clone();
        let crash_on_start = state.crash_on_start.clone();
        let container = state.find(id)?;
        if fail_start.contains(&container.name) {
            return Err(DaemonError::Unexpected(format!("{} failed to start", container.name)));
        }
        container.running = !crash_on_start.contains(&container.name);
        container.started_at = Some(Utc::now());
        Ok(())
    }

    async fn stop_container(&self, id: &str, _timeout: Duration) -> Result<(), DaemonError> {
        let mut state = self.call(format!("stop:{}", id))?;
        state.find(id)?.running = false;
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<(), DaemonError> {
        let mut state = self.call(format!("remove:{}", id))?;
        let before = state.containers.len();
        state.containers.retain(|c| c.id != id);
        if state.containers.len() == before {
            return Err(DaemonError::NotFound(format!("container {}", id)));
        }
        Ok(())
    }

    async fn rename_container(&self, id: &str, name: &str) -> Result<(), DaemonError> {
        let mut state = self.call(format!("rename:{}:{}", id, name))?;
        if state.containers.iter().any(|c| c.name == name && c.id != id) {
            return Err(DaemonError::Unexpected(format!("name {} is already in use", name)));
        }
        state.find(id)?.name = name.to_string();
        Ok(())
    }

    async fn inspect_image(&self, image: &str) -> Result<ImageDetails, DaemonError> {
        let state = self.call(format!("image:{}", image))?;
        state
            .images
            .get(image)
            .cloned()
            .ok_or_else(|| DaemonError::NotFound(format!("image {}", image)))
    }

    async fn list_image_ids(&self) -> Result<Vec<String>, DaemonError> {
        let state = self.call("images".to_string())?;
        Ok(state.images.values().map(|i| i.id.clone()).collect())
    }

    async fn registry_digest(&self, image: &str) -> Result<String, DaemonError> {
        let state = self.call(format!("registry:{}", image))?;
        state
            .registry
            .get(image)
            .cloned()
            .ok_or_else(|| DaemonError::NotFound(format!("manifest for {}", image)))
    }

    async fn pull_image(&self, image: &str) -> Result<(), DaemonError> {
        let mut state = self.call(format!("pull:{}", image))?;
        let digest = state
            .registry
            .get(image)
            .cloned()
            .ok_or_else(|| DaemonError::NotFound(format!("manifest for {}", image)))?;
        let repo = image.split(':').next().unwrap_or(image);
        state.images.insert(
            image.to_string(),
            ImageDetails {
                id: format!("sha256:pulled-{}", digest.trim_start_matches("sha256:")),
                repo_digests: vec![format!("{}@{}", repo, digest)],
            },
        );
        Ok(())
    }

    async fn prune_dangling_images(&self) -> Result<PruneReport, DaemonError> {
        let mut state = self.call("prune".to_string())?;
        Ok(std::mem::take(&mut state.dangling))
    }

    async fn close(&self) {
        if let Some(counter) = &self.closed {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// SSH session whose channels echo back whatever is written to them
pub struct FakeSession {
    host: String,
    unix_socket: bool,
    tcp: bool,
    unix_attempts: Mutex<Vec<String>>,
    tcp_attempts: Mutex<Vec<(String, u16)>>,
}

impl FakeSession {
    pub fn echo(host: &str) -> Self {
        Self {
            host: host.to_string(),
            unix_socket: true,
            tcp: true,
            unix_attempts: Mutex::new(Vec::new()),
            tcp_attempts: Mutex::new(Vec::new()),
        }
    }

    pub fn without_unix_socket(mut self) -> Self {
        self.unix_socket = false;
        self
    }

    pub fn without_tcp(mut self) -> Self {
        self.tcp = false;
        self
    }

    pub fn unix_attempts(&self) -> Vec<String> {
        self.unix_attempts.lock().unwrap().clone()
    }

    pub fn tcp_attempts(&self) -> Vec<(String, u16)> {
        self.tcp_attempts.lock().unwrap().clone()
    }
}

fn echo_stream() -> TunnelStream {
    let (near, far) = tokio::io::duplex(64 * 1024);
    tokio::spawn(async move {
        let (mut reader, mut writer) = tokio::io::split(far);
        let _ = tokio::io::copy(&mut reader, &mut writer).await;
    });
    Box::new(near)
}

#[async_trait]
impl ShellSession for FakeSession {
    fn host(&self) -> &str {
        &self.host
    }

    async fn open_unix_socket(&self, path: &str) -> Result<TunnelStream, ConnectionError> {
        self.unix_attempts.lock().unwrap().push(path.to_string());
        if !self.unix_socket {
            return Err(ConnectionError::Tunnel(format!("{}: no such file or directory", path)));
        }
        Ok(echo_stream())
    }

    async fn open_tcp(&self, host: &str, port: u16) -> Result<TunnelStream, ConnectionError> {
        self.tcp_attempts.lock().unwrap().push((host.to_string(), port));
        if !self.tcp {
            return Err(ConnectionError::Tunnel(format!("{}:{}: connection refused", host, port)));
        }
        Ok(echo_stream())
    }

    async fn close(&self) {}
}

/// Hands out an echo session for any host
#[derive(Default)]
pub struct FakeTransports;

#[async_trait]
impl TransportProvider for FakeTransports {
    async fn session(&self, host: &str) -> Result<Option<Arc<dyn ShellSession>>, ConnectionError> {
        Ok(Some(Arc::new(FakeSession::echo(host))))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialOutcome {
    /// Dial succeeds and the daemon answers
    Healthy,
    /// Dial succeeds but the daemon does not answer
    Unreachable,
    /// Dial itself fails
    DialFails,
}

/// Dialer with a scripted outcome per host; unknown hosts fail to dial
#[derive(Default)]
pub struct FakeDialer {
    outcomes: HashMap<String, DialOutcome>,
    closed: Arc<AtomicUsize>,
}

impl FakeDialer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, host: &str, outcome: DialOutcome) -> Self {
        self.outcomes.insert(host.to_string(), outcome);
        self
    }

    /// Number of daemon clients closed so far
    pub fn closed_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.closed)
    }
}

#[async_trait]
impl Dialer for FakeDialer {
    async fn dial(
        &self,
        host: &str,
        _session: Option<Arc<dyn ShellSession>>,
    ) -> Result<Arc<dyn DaemonClient>, ConnectionError> {
        let outcome = self.outcomes.get(host).copied().unwrap_or(DialOutcome::DialFails);
        let daemon = MockDaemon::new().counting_closes(Arc::clone(&self.closed));
        match outcome {
            DialOutcome::Healthy => Ok(Arc::new(daemon)),
            DialOutcome::Unreachable => Ok(Arc::new(daemon.unreachable())),
            DialOutcome::DialFails => Err(ConnectionError::Client {
                host: host.to_string(),
                reason: "scripted dial failure".to_string(),
            }),
        }
    }
}

async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{}", addr)
}

/// HTTP server answering every request with `status`; returns its base URL
pub async fn serve_status(status: u16) -> String {
    let status = StatusCode::from_u16(status).unwrap();
    serve(Router::new().fallback(move || async move { status })).await
}

/// HTTP server answering 200 and recording each request path
pub async fn serve_recording() -> (String, Arc<Mutex<Vec<String>>>) {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&requests);
    let app = Router::new().fallback(move |uri: Uri| {
        let log = Arc::clone(&log);
        async move {
            log.lock().unwrap().push(uri.path().to_string());
            StatusCode::OK
        }
    });
    (serve(app).await, requests)
}
