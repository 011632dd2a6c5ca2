use std::{future::Future, net::SocketAddr, sync::Arc};

use {
    axum::{
        Router,
        extract::State,
        http::{StatusCode, Uri},
        routing::get,
    },
    secrecy::SecretString,
    serde_json::{Value, json},
    tokio::{net::TcpListener, sync::watch},
    tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{error, info},
};

use {
    booster_common::{
        ServerErrCode,
        crypto::{ChaChaCredentials, CredentialDecryptor, UnconfiguredCredentials},
        process,
    },
    booster_config::GatewayConfig,
};

use crate::{
    activation::{self, ResourceRegistry},
    engines::{self, EngineKind},
    envelope::RestResponse,
    error::GatewayError,
    registrar::{self, RegistrarFactory, ServiceRegistrar},
    state::{GatewayPhase, GatewayState},
    store::{MySqlStoreFactory, StoreFactory},
};

/// Prefix every API route is nested under.
pub const API_V1: &str = "/api/v1";

const PID_NAME: &str = "booster-gateway";

// ── Shared app state ─────────────────────────────────────────────────────────

#[derive(Clone)]
struct AppState {
    version: &'static str,
    hostname: String,
    engines: Vec<EngineKind>,
    registrar: Arc<dyn ServiceRegistrar>,
}

// ── Router ───────────────────────────────────────────────────────────────────

/// Build the gateway router from the activated engines (shared between
/// production startup and tests).
pub fn build_gateway_app(
    registry: ResourceRegistry,
    registrar: Arc<dyn ServiceRegistrar>,
) -> Router {
    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".into());
    let app_state = AppState {
        version: env!("CARGO_PKG_VERSION"),
        hostname,
        engines: registry.kinds(),
        registrar,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let gateway_routes = Router::new()
        .route("/gateway/health", get(gateway_health))
        .route("/gateway/peers", get(gateway_peers))
        .with_state(app_state);

    Router::new()
        .nest(API_V1, registry.into_router().merge(gateway_routes))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

// ── Orchestrator ─────────────────────────────────────────────────────────────

/// Drives startup: registrar, engine activation, route registration, listener.
///
/// One pass only. The first error moves the phase to `Failed` and is returned;
/// restarting is left to the process supervisor.
pub struct GatewayServer {
    config: GatewayConfig,
    state: GatewayState,
    registrar_factory: Option<RegistrarFactory>,
    decryptor: Arc<dyn CredentialDecryptor>,
    stores: Arc<dyn StoreFactory>,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        config.validate().map_err(GatewayError::Config)?;

        let decryptor: Arc<dyn CredentialDecryptor> = match config.credentials.key.as_deref() {
            Some(key) if !key.trim().is_empty() => Arc::new(ChaChaCredentials::from_base64_key(
                &SecretString::new(key.to_string()),
            )?),
            _ => Arc::new(UnconfiguredCredentials),
        };

        Ok(Self {
            config,
            state: GatewayState::new(),
            registrar_factory: Some(Box::new(registrar::from_config)),
            decryptor,
            stores: Arc::new(MySqlStoreFactory),
        })
    }

    pub fn with_registrar_factory(mut self, factory: RegistrarFactory) -> Self {
        self.registrar_factory = Some(factory);
        self
    }

    pub fn with_decryptor(mut self, decryptor: Arc<dyn CredentialDecryptor>) -> Self {
        self.decryptor = decryptor;
        self
    }

    pub fn with_store_factory(mut self, stores: Arc<dyn StoreFactory>) -> Self {
        self.stores = stores;
        self
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn phase(&self) -> GatewayPhase {
        self.state.phase()
    }

    pub fn subscribe(&self) -> watch::Receiver<GatewayPhase> {
        self.state.subscribe()
    }

    /// Run every step up to route registration and return the aggregated
    /// router. Leaves the phase at `ResourcesActivated`.
    pub async fn prepare(&mut self) -> Result<Router, GatewayError> {
        let result = self.prepare_inner().await;
        if let Err(e) = &result {
            error!(phase = %self.state.phase(), error = %e, "gateway startup failed");
            self.state.fail();
        }
        result
    }

    async fn prepare_inner(&mut self) -> Result<Router, GatewayError> {
        if self.state.phase() != GatewayPhase::Created {
            return Err(GatewayError::InvalidTransition {
                from: self.state.phase(),
                to: GatewayPhase::RegistrarStarted,
            });
        }

        let factory = self
            .registrar_factory
            .take()
            .unwrap_or_else(|| Box::new(registrar::from_config) as RegistrarFactory);
        let registrar = factory(&self.config)?;
        registrar.run().await?;
        self.state.advance(GatewayPhase::RegistrarStarted)?;

        let mut registry = ResourceRegistry::new();
        for kind in EngineKind::ACTIVATION_ORDER {
            activation::activate(
                kind,
                kind.store_config(&self.config),
                self.decryptor.as_ref(),
                self.stores.as_ref(),
                engines::route_table,
                &mut registry,
            )
            .await?;
        }
        self.state.advance(GatewayPhase::ResourcesActivated)?;

        let engines = registry.kinds();
        info!(engines = ?engines, "engine resources activated");
        Ok(build_gateway_app(registry, registrar))
    }

    /// Bind the listener (plain or TLS) for a prepared router. The phase is
    /// `Serving` once this returns.
    pub async fn bind(&mut self, router: Router) -> Result<BoundGateway, GatewayError> {
        let result = self.bind_inner(router).await;
        if let Err(e) = &result {
            error!(error = %e, "failed to start listener");
            self.state.fail();
        }
        result
    }

    async fn bind_inner(&mut self, router: Router) -> Result<BoundGateway, GatewayError> {
        if self.state.phase() != GatewayPhase::ResourcesActivated {
            return Err(GatewayError::InvalidTransition {
                from: self.state.phase(),
                to: GatewayPhase::Serving,
            });
        }

        let tls = self.tls_config()?;
        let addr = self.listen_addr();
        // Resolves host names and accepts IPv6 literals.
        let listener = TcpListener::bind((self.config.address.as_str(), self.config.port))
            .await
            .map_err(|source| GatewayError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| GatewayError::Bind {
            addr: addr.clone(),
            source,
        })?;

        self.state.advance(GatewayPhase::Serving)?;
        info!(
            version = env!("CARGO_PKG_VERSION"),
            addr = %local_addr,
            tls = tls.is_some(),
            "booster gateway listening"
        );

        Ok(BoundGateway {
            listener,
            local_addr,
            router,
            tls,
            state: self.state.clone(),
        })
    }

    fn listen_addr(&self) -> String {
        let host = self.config.address.as_str();
        if host.contains(':') {
            format!("[{host}]:{}", self.config.port)
        } else {
            format!("{host}:{}", self.config.port)
        }
    }

    #[cfg(feature = "tls")]
    fn tls_config(&self) -> Result<Option<TlsAcceptorConfig>, GatewayError> {
        if !self.config.server_cert.is_ssl {
            return Ok(None);
        }
        Ok(Some(crate::tls::rustls_config(&self.config.server_cert)?))
    }

    #[cfg(not(feature = "tls"))]
    fn tls_config(&self) -> Result<Option<TlsAcceptorConfig>, GatewayError> {
        if self.config.server_cert.is_ssl {
            return Err(GatewayError::TlsUnavailable);
        }
        Ok(None)
    }

    /// Drive the gateway from `Created` to `Serving` and serve until `shutdown`
    /// resolves.
    pub async fn start_with_shutdown<F>(mut self, shutdown: F) -> Result<(), GatewayError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = self.prepare().await?;
        let bound = self.bind(router).await?;
        bound.serve_with_shutdown(shutdown).await
    }

    /// Drive the gateway to `Serving` and serve until Ctrl-C.
    pub async fn start(self) -> Result<(), GatewayError> {
        self.start_with_shutdown(shutdown_signal()).await
    }
}

#[cfg(feature = "tls")]
type TlsAcceptorConfig = axum_server::tls_rustls::RustlsConfig;

#[cfg(not(feature = "tls"))]
type TlsAcceptorConfig = std::convert::Infallible;

/// A gateway whose listener is bound and which is ready to accept connections.
pub struct BoundGateway {
    listener: TcpListener,
    local_addr: SocketAddr,
    router: Router,
    tls: Option<TlsAcceptorConfig>,
    state: GatewayState,
}

impl BoundGateway {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn phase(&self) -> GatewayPhase {
        self.state.phase()
    }

    /// Serve until the process is stopped.
    pub async fn serve(self) -> Result<(), GatewayError> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> Result<(), GatewayError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();
        match self.tls {
            #[cfg(feature = "tls")]
            Some(tls) => {
                let std_listener = self.listener.into_std().map_err(GatewayError::Serve)?;
                let handle = axum_server::Handle::new();
                let shutdown_handle = handle.clone();
                tokio::spawn(async move {
                    shutdown.await;
                    shutdown_handle.graceful_shutdown(Some(std::time::Duration::from_secs(10)));
                });
                axum_server::from_tcp_rustls(std_listener, tls)
                    .handle(handle)
                    .serve(app)
                    .await
                    .map_err(GatewayError::Serve)
            },
            #[cfg(not(feature = "tls"))]
            Some(never) => match never {},
            None => axum::serve(self.listener, app)
                .with_graceful_shutdown(shutdown)
                .await
                .map_err(GatewayError::Serve),
        }
    }
}

/// Start the gateway: persist the pid file, construct the orchestrator and
/// drive it to `Serving`. Returns the first fatal error.
pub async fn run(config: GatewayConfig) -> Result<(), GatewayError> {
    if let Some(dir) = &config.process.pid_dir {
        let path = process::save_pid(dir, PID_NAME).map_err(|e| {
            error!(error = %e, "save pid failed");
            GatewayError::Pid(e)
        })?;
        info!(path = %path.display(), "pid file written");
    }

    let server = GatewayServer::new(config).map_err(|e| {
        error!(error = %e, "init gateway server failed");
        e
    })?;
    server.start().await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c, shutdown signal disabled");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn gateway_health(State(state): State<AppState>) -> RestResponse {
    RestResponse::ok(json!({
        "status": "ok",
        "version": state.version,
        "hostname": state.hostname,
        "instance": state.registrar.instance().id,
        "engines": state.engines,
    }))
}

async fn gateway_peers(State(state): State<AppState>) -> RestResponse<Value> {
    let peers = state.registrar.peers().await;
    if peers.is_empty() {
        return RestResponse::error(ServerErrCode::DiscoveryUnavailable, "no peers known yet")
            .with_status(StatusCode::SERVICE_UNAVAILABLE);
    }
    let total = peers.len();
    RestResponse::ok(json!(peers)).with_extra("total", json!(total))
}

async fn not_found(uri: Uri) -> RestResponse {
    RestResponse::error(ServerErrCode::NotFound, format!("no route for {}", uri.path()))
        .with_status(StatusCode::NOT_FOUND)
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            activation::ActivationError,
            registrar::{RegistrarError, ServiceInstance, StandaloneRegistrar},
            testing::{FakeStoreFactory, PlainCredentials, enabled_store},
        },
        booster_config::EngineStoreConfig,
    };

    fn base_config() -> GatewayConfig {
        GatewayConfig {
            address: "127.0.0.1".into(),
            port: 0,
            ..Default::default()
        }
    }

    fn standalone_registrar(
        config: &GatewayConfig,
    ) -> Result<Arc<dyn ServiceRegistrar>, RegistrarError> {
        Ok(Arc::new(StandaloneRegistrar::new(
            ServiceInstance::from_config(config),
        )))
    }

    fn unreachable_registrar(
        _: &GatewayConfig,
    ) -> Result<Arc<dyn ServiceRegistrar>, RegistrarError> {
        Err(RegistrarError::Announce("discovery endpoint refused".into()))
    }

    fn standalone() -> RegistrarFactory {
        Box::new(standalone_registrar)
    }

    fn server_with(config: GatewayConfig, stores: Arc<FakeStoreFactory>) -> GatewayServer {
        GatewayServer::new(config)
            .unwrap()
            .with_registrar_factory(standalone())
            .with_decryptor(Arc::new(PlainCredentials))
            .with_store_factory(stores)
    }

    fn all_enabled() -> GatewayConfig {
        GatewayConfig {
            distcc: enabled_store("distcc"),
            fastbuild: enabled_store("fastbuild"),
            apisjob: enabled_store("apisjob"),
            disttask: enabled_store("disttask"),
            ..base_config()
        }
    }

    async fn get_json(addr: SocketAddr, path: &str) -> (StatusCode, Value) {
        let resp = reqwest::get(format!("http://{addr}{path}")).await.unwrap();
        let status = StatusCode::from_u16(resp.status().as_u16()).unwrap();
        (status, resp.json().await.unwrap())
    }

    #[tokio::test]
    async fn registrar_failure_stops_before_activation() {
        let stores = Arc::new(FakeStoreFactory::default());
        let mut server = server_with(all_enabled(), Arc::clone(&stores))
            .with_registrar_factory(Box::new(unreachable_registrar));

        let err = server.prepare().await.unwrap_err();

        assert!(matches!(err, GatewayError::Registrar(_)));
        assert_eq!(server.phase(), GatewayPhase::Failed);
        assert!(stores.opened().is_empty());
    }

    #[tokio::test]
    async fn activation_follows_declared_order() {
        for _ in 0..2 {
            let stores = Arc::new(FakeStoreFactory::default());
            let mut server = server_with(all_enabled(), Arc::clone(&stores));
            server.prepare().await.unwrap();
            assert_eq!(stores.opened(), EngineKind::ACTIVATION_ORDER.to_vec());
            assert_eq!(server.phase(), GatewayPhase::ResourcesActivated);
        }
    }

    #[tokio::test]
    async fn first_activation_failure_aborts_the_rest() {
        let stores = Arc::new(FakeStoreFactory::failing(&[EngineKind::FastBuild]));
        let mut server = server_with(all_enabled(), Arc::clone(&stores));

        let err = server.prepare().await.unwrap_err();

        assert!(matches!(
            err,
            GatewayError::Activation(ActivationError::Store {
                kind: EngineKind::FastBuild,
                ..
            })
        ));
        assert_eq!(stores.opened(), vec![EngineKind::DistCc, EngineKind::FastBuild]);
        assert_eq!(server.phase(), GatewayPhase::Failed);
    }

    #[tokio::test]
    async fn bad_credential_never_opens_a_port() {
        let reserved = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = reserved.local_addr().unwrap().port();
        drop(reserved);

        let config = GatewayConfig {
            port,
            distcc: EngineStoreConfig {
                encrypted_password: PlainCredentials::BAD.into(),
                ..enabled_store("distcc")
            },
            ..base_config()
        };
        let stores = Arc::new(FakeStoreFactory::default());
        let server = server_with(config, Arc::clone(&stores));
        let phase = server.subscribe();

        let err = server.start_with_shutdown(async {}).await.unwrap_err();

        assert!(matches!(
            err,
            GatewayError::Activation(ActivationError::Decrypt {
                kind: EngineKind::DistCc,
                ..
            })
        ));
        assert_eq!(*phase.borrow(), GatewayPhase::Failed);
        assert!(stores.opened().is_empty());
        assert!(std::net::TcpStream::connect(("127.0.0.1", port)).is_err());
    }

    #[tokio::test]
    async fn missing_credential_key_fails_enabled_engine() {
        let config = GatewayConfig {
            disttask: enabled_store("disttask"),
            ..base_config()
        };
        let stores = Arc::new(FakeStoreFactory::default());
        let mut server = GatewayServer::new(config)
            .unwrap()
            .with_registrar_factory(standalone())
            .with_store_factory(stores.clone());

        let err = server.prepare().await.unwrap_err();
        assert!(err.to_string().contains("disttask"), "{err}");
        assert!(stores.opened().is_empty());
    }

    #[tokio::test]
    async fn bind_requires_prepared_resources() {
        let mut server = server_with(base_config(), Arc::new(FakeStoreFactory::default()));
        let err = server.bind(Router::new()).await.err().unwrap();
        assert!(matches!(err, GatewayError::InvalidTransition {
            from: GatewayPhase::Created,
            to: GatewayPhase::Serving,
        }));
        assert_eq!(server.phase(), GatewayPhase::Failed);
    }

    #[tokio::test]
    async fn prepare_runs_once() {
        let mut server = server_with(base_config(), Arc::new(FakeStoreFactory::default()));
        server.prepare().await.unwrap();
        assert!(matches!(
            server.prepare().await,
            Err(GatewayError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn serves_enabled_engines_only() {
        let config = GatewayConfig {
            apisjob: enabled_store("apisjob"),
            disttask: enabled_store("disttask"),
            ..base_config()
        };
        let stores = Arc::new(FakeStoreFactory::default());
        let mut server = server_with(config, Arc::clone(&stores));

        let router = server.prepare().await.unwrap();
        let bound = server.bind(router).await.unwrap();
        assert_eq!(bound.phase(), GatewayPhase::Serving);
        let addr = bound.local_addr();
        tokio::spawn(bound.serve());

        assert_eq!(stores.opened(), vec![EngineKind::ApisJob, EngineKind::DistTask]);
        for engine in ["apisjob", "disttask"] {
            let (status, body) = get_json(addr, &format!("/api/v1/{engine}/health")).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["code"], 0);
            assert_eq!(body["data"]["engine"], engine);
        }

        let (status, body) = get_json(addr, "/api/v1/fastbuild/health").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "E_NOT_FOUND | no route for /api/v1/fastbuild/health");

        let (_, body) = get_json(addr, "/api/v1/gateway/health").await;
        assert_eq!(body["data"]["engines"], json!(["apisjob", "disttask"]));

        let (_, body) = get_json(addr, "/api/v1/gateway/peers").await;
        assert_eq!(body["extra"]["total"], 1);
    }

    #[tokio::test]
    async fn unassignable_address_fails_bind() {
        let config = GatewayConfig {
            address: "192.0.2.1".into(),
            ..base_config()
        };
        let mut server = server_with(config, Arc::new(FakeStoreFactory::default()));
        let router = server.prepare().await.unwrap();
        let err = server.bind(router).await.err().unwrap();
        assert!(matches!(err, GatewayError::Bind { ref addr, .. } if addr == "192.0.2.1:0"));
        assert_eq!(server.phase(), GatewayPhase::Failed);
    }

    async fn serve_on(address: &str) -> SocketAddr {
        let config = GatewayConfig {
            address: address.into(),
            ..base_config()
        };
        let mut server = server_with(config, Arc::new(FakeStoreFactory::default()));
        let router = server.prepare().await.unwrap();
        let bound = server.bind(router).await.unwrap();
        let addr = bound.local_addr();
        tokio::spawn(bound.serve());
        addr
    }

    #[tokio::test]
    async fn binds_host_names() {
        let addr = serve_on("localhost").await;
        assert!(addr.ip().is_loopback());
        let (status, body) = get_json(addr, "/api/v1/gateway/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["code"], 0);
    }

    #[tokio::test]
    async fn binds_ipv6_literals() {
        if std::net::TcpListener::bind("[::1]:0").is_err() {
            // Host without IPv6 loopback.
            return;
        }
        let addr = serve_on("::1").await;
        assert!(addr.is_ipv6());
        let (status, _) = get_json(addr, "/api/v1/gateway/health").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[cfg(feature = "tls")]
    #[tokio::test]
    async fn serves_over_tls() {
        let dir = tempfile::tempdir().unwrap();
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert_file = dir.path().join("server.crt");
        let key_file = dir.path().join("server.key");
        std::fs::write(&cert_file, cert.pem()).unwrap();
        std::fs::write(&key_file, key_pair.serialize_pem()).unwrap();

        let mut config = base_config();
        config.server_cert.is_ssl = true;
        config.server_cert.cert_file = Some(cert_file);
        config.server_cert.key_file = Some(key_file);
        let mut server = server_with(config, Arc::new(FakeStoreFactory::default()));
        let router = server.prepare().await.unwrap();
        let bound = server.bind(router).await.unwrap();
        let port = bound.local_addr().port();
        tokio::spawn(bound.serve());

        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .unwrap();
        let resp = client
            .get(format!("https://localhost:{port}/api/v1/gateway/health"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["code"], 0);
    }

    #[tokio::test]
    async fn run_writes_pid_before_failing() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = base_config();
        config.process.pid_dir = Some(dir.path().to_path_buf());
        config.registrar.endpoints = vec!["not a url".into()];

        let err = run(config).await.unwrap_err();

        assert!(matches!(err, GatewayError::Registrar(RegistrarError::InvalidEndpoint { .. })));
        assert!(dir.path().join("booster-gateway.pid").exists());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = base_config();
        config.fastbuild.enabled = true;
        assert!(matches!(
            GatewayServer::new(config),
            Err(GatewayError::Config(_))
        ));
    }

    #[test]
    fn bad_credential_key_is_rejected() {
        let mut config = base_config();
        config.credentials.key = Some("dG9vIHNob3J0".into());
        assert!(matches!(
            GatewayServer::new(config),
            Err(GatewayError::Credentials(_))
        ));
    }
}
