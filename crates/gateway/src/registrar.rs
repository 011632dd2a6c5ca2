//! Service discovery: announces the gateway to the cluster and reports
//! topology changes.

use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    tokio::{
        sync::{Mutex, RwLock, broadcast},
        task::JoinHandle,
    },
    tracing::{debug, info, warn},
};

use booster_config::GatewayConfig;

const EVENT_CAPACITY: usize = 64;

/// A gateway instance as seen by the discovery back-end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub id: String,
    pub service: String,
    pub address: String,
    pub port: u16,
    pub version: String,
}

impl ServiceInstance {
    /// Describe this process from its config, with a fresh instance id.
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            service: config.registrar.service_name.clone(),
            address: config
                .registrar
                .advertise_address
                .clone()
                .unwrap_or_else(|| config.address.clone()),
            port: config.port,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyEvent {
    Joined(ServiceInstance),
    Left(ServiceInstance),
}

#[derive(Debug, thiserror::Error)]
pub enum RegistrarError {
    #[error("invalid discovery endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    #[error("failed to build discovery client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("no discovery endpoint accepted the announcement: {0}")]
    Announce(String),
    #[error("registrar is not running")]
    NotRunning,
    #[error("registrar is already running")]
    AlreadyRunning,
}

/// Announces the gateway and delivers topology-change events.
#[async_trait]
pub trait ServiceRegistrar: Send + Sync {
    /// Start announcing. The event channel is ready once this returns `Ok`.
    async fn run(&self) -> Result<(), RegistrarError>;

    /// Subscribe to topology changes. Fails before [`ServiceRegistrar::run`].
    fn subscribe(&self) -> Result<broadcast::Receiver<TopologyEvent>, RegistrarError>;

    /// Last known set of instances of this service, including this one.
    async fn peers(&self) -> Vec<ServiceInstance>;

    fn instance(&self) -> &ServiceInstance;
}

/// Builds the registrar during startup.
pub type RegistrarFactory = Box<
    dyn FnOnce(&GatewayConfig) -> Result<Arc<dyn ServiceRegistrar>, RegistrarError> + Send,
>;

/// Default factory: standalone when no endpoint is configured, HTTP otherwise.
pub fn from_config(config: &GatewayConfig) -> Result<Arc<dyn ServiceRegistrar>, RegistrarError> {
    let instance = ServiceInstance::from_config(config);
    if config.registrar.endpoints.is_empty() {
        info!("no discovery endpoints configured, running standalone");
        return Ok(Arc::new(StandaloneRegistrar::new(instance)));
    }
    Ok(Arc::new(HttpRegistrar::new(config, instance)?))
}

/// Compute join/leave events between two peer sets, keyed by instance id.
pub fn diff_peers(old: &[ServiceInstance], new: &[ServiceInstance]) -> Vec<TopologyEvent> {
    let old_ids: HashSet<&str> = old.iter().map(|p| p.id.as_str()).collect();
    let new_ids: HashSet<&str> = new.iter().map(|p| p.id.as_str()).collect();

    let joined = new
        .iter()
        .filter(|p| !old_ids.contains(p.id.as_str()))
        .cloned()
        .map(TopologyEvent::Joined);
    let left = old
        .iter()
        .filter(|p| !new_ids.contains(p.id.as_str()))
        .cloned()
        .map(TopologyEvent::Left);
    joined.chain(left).collect()
}

// ── Standalone ───────────────────────────────────────────────────────────────

/// Registrar for single-node deployments: the only peer is this process.
pub struct StandaloneRegistrar {
    instance: ServiceInstance,
    events: broadcast::Sender<TopologyEvent>,
    running: AtomicBool,
}

impl StandaloneRegistrar {
    pub fn new(instance: ServiceInstance) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            instance,
            events,
            running: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ServiceRegistrar for StandaloneRegistrar {
    async fn run(&self) -> Result<(), RegistrarError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(RegistrarError::AlreadyRunning);
        }
        debug!(id = %self.instance.id, "standalone registrar running");
        Ok(())
    }

    fn subscribe(&self) -> Result<broadcast::Receiver<TopologyEvent>, RegistrarError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(RegistrarError::NotRunning);
        }
        Ok(self.events.subscribe())
    }

    async fn peers(&self) -> Vec<ServiceInstance> {
        vec![self.instance.clone()]
    }

    fn instance(&self) -> &ServiceInstance {
        &self.instance
    }
}

// ── HTTP discovery ───────────────────────────────────────────────────────────

struct Inner {
    client: reqwest::Client,
    endpoints: Vec<reqwest::Url>,
    instance: ServiceInstance,
    events: broadcast::Sender<TopologyEvent>,
    peers: RwLock<Vec<ServiceInstance>>,
}

/// Registrar backed by an HTTP discovery service.
///
/// Announces with `POST {endpoint}/v1/services/{service}/instances`, then
/// re-announces and polls `GET` on the same path every heartbeat, turning
/// peer-set changes into [`TopologyEvent`]s.
pub struct HttpRegistrar {
    inner: Arc<Inner>,
    heartbeat: Duration,
    /// Claimed by the first `run()` call; released again if it fails.
    started: AtomicBool,
    running: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HttpRegistrar {
    pub fn new(config: &GatewayConfig, instance: ServiceInstance) -> Result<Self, RegistrarError> {
        let endpoints = config
            .registrar
            .endpoints
            .iter()
            .map(|raw| {
                let base = format!("{}/", raw.trim_end_matches('/'));
                reqwest::Url::parse(&base)
                    .and_then(|url| url.join(&format!("v1/services/{}/instances", instance.service)))
                    .map_err(|e| RegistrarError::InvalidEndpoint {
                        endpoint: raw.clone(),
                        reason: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.registrar.request_timeout_secs))
            .build()
            .map_err(RegistrarError::Client)?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            inner: Arc::new(Inner {
                client,
                endpoints,
                instance,
                events,
                peers: RwLock::new(Vec::new()),
            }),
            heartbeat: Duration::from_secs(config.registrar.heartbeat_interval_secs),
            started: AtomicBool::new(false),
            running: AtomicBool::new(false),
            task: Mutex::new(None),
        })
    }
}

impl Inner {
    /// Announce to the first endpoint that accepts.
    async fn announce(&self) -> Result<&reqwest::Url, RegistrarError> {
        let mut last_error = String::from("no endpoints");
        for url in &self.endpoints {
            match self.client.post(url.clone()).json(&self.instance).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(url),
                Ok(resp) => last_error = format!("{url} answered {}", resp.status()),
                Err(e) => last_error = format!("{url}: {e}"),
            }
            debug!(endpoint = %url, error = %last_error, "discovery endpoint rejected announcement");
        }
        Err(RegistrarError::Announce(last_error))
    }

    async fn fetch_peers(&self) -> Option<Vec<ServiceInstance>> {
        for url in &self.endpoints {
            let resp = match self.client.get(url.clone()).send().await {
                Ok(resp) if resp.status().is_success() => resp,
                Ok(resp) => {
                    debug!(endpoint = %url, status = %resp.status(), "peer listing failed");
                    continue;
                },
                Err(e) => {
                    debug!(endpoint = %url, error = %e, "peer listing failed");
                    continue;
                },
            };
            match resp.json::<Vec<ServiceInstance>>().await {
                Ok(peers) => return Some(peers),
                Err(e) => warn!(endpoint = %url, error = %e, "malformed peer listing"),
            }
        }
        None
    }

    /// Replace the known peer set and publish the differences.
    async fn refresh_peers(&self) {
        let Some(new) = self.fetch_peers().await else {
            warn!("could not refresh peers from any discovery endpoint");
            return;
        };
        let mut peers = self.peers.write().await;
        for event in diff_peers(&peers, &new) {
            debug!(?event, "topology changed");
            // No subscribers is fine.
            let _ = self.events.send(event);
        }
        *peers = new;
    }
}

#[async_trait]
impl ServiceRegistrar for HttpRegistrar {
    async fn run(&self) -> Result<(), RegistrarError> {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(RegistrarError::AlreadyRunning);
        }
        let endpoint = match self.inner.announce().await {
            Ok(endpoint) => endpoint,
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                return Err(e);
            },
        };
        info!(endpoint = %endpoint, id = %self.inner.instance.id, "announced gateway to discovery");
        self.inner.refresh_peers().await;

        let inner = Arc::clone(&self.inner);
        let period = self.heartbeat;
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Err(e) = inner.announce().await {
                    warn!(error = %e, "discovery heartbeat failed");
                }
                inner.refresh_peers().await;
            }
        });
        *self.task.lock().await = Some(handle);
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn subscribe(&self) -> Result<broadcast::Receiver<TopologyEvent>, RegistrarError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(RegistrarError::NotRunning);
        }
        Ok(self.inner.events.subscribe())
    }

    async fn peers(&self) -> Vec<ServiceInstance> {
        self.inner.peers.read().await.clone()
    }

    fn instance(&self) -> &ServiceInstance {
        &self.inner.instance
    }
}

impl Drop for HttpRegistrar {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().take() {
            handle.abort();
        }
    }
}
