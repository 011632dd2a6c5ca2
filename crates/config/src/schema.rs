//! Config schema for the gateway process and its engine stores.

use std::{fmt, path::PathBuf};

use serde::{Deserialize, Serialize};

const DEFAULT_STORE_PORT: u16 = 3306;

/// Root configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address the HTTP listener binds to.
    pub address: String,
    pub port: u16,
    pub server_cert: ServerCertConfig,
    pub process: ProcessConfig,
    pub registrar: RegistrarConfig,
    pub credentials: CredentialsConfig,
    /// Distributed-compile engine store.
    pub distcc: EngineStoreConfig,
    /// Fast-build engine store.
    pub fastbuild: EngineStoreConfig,
    /// Job-dispatch engine store.
    pub apisjob: EngineStoreConfig,
    /// Task-distribution engine store.
    pub disttask: EngineStoreConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".into(),
            port: 30114,
            server_cert: ServerCertConfig::default(),
            process: ProcessConfig::default(),
            registrar: RegistrarConfig::default(),
            credentials: CredentialsConfig::default(),
            distcc: EngineStoreConfig::default(),
            fastbuild: EngineStoreConfig::default(),
            apisjob: EngineStoreConfig::default(),
            disttask: EngineStoreConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Engine store sections keyed by their table name, in declaration order.
    pub fn engine_sections(&self) -> [(&'static str, &EngineStoreConfig); 4] {
        [
            ("distcc", &self.distcc),
            ("fastbuild", &self.fastbuild),
            ("apisjob", &self.apisjob),
            ("disttask", &self.disttask),
        ]
    }

    /// Reject configurations that can never start.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.address.trim().is_empty() {
            anyhow::bail!("address must not be empty");
        }
        if self.server_cert.is_ssl {
            if self.server_cert.cert_file.is_none() {
                anyhow::bail!("server_cert.is_ssl is set but server_cert.cert_file is missing");
            }
            if self.server_cert.key_file.is_none() {
                anyhow::bail!("server_cert.is_ssl is set but server_cert.key_file is missing");
            }
        }
        if self.registrar.heartbeat_interval_secs == 0 {
            anyhow::bail!("registrar.heartbeat_interval_secs must be positive");
        }
        if self.registrar.request_timeout_secs == 0 {
            anyhow::bail!("registrar.request_timeout_secs must be positive");
        }
        for (name, store) in self.engine_sections() {
            if !store.enabled {
                continue;
            }
            for (field, value) in [
                ("host", &store.host),
                ("database", &store.database),
                ("user", &store.user),
            ] {
                if value.trim().is_empty() {
                    anyhow::bail!("{name}.{field} is required when {name} is enabled");
                }
            }
            if store.max_connections == 0 {
                anyhow::bail!("{name}.max_connections must be positive");
            }
            if store.connect_timeout_secs == 0 {
                anyhow::bail!("{name}.connect_timeout_secs must be positive");
            }
        }
        Ok(())
    }
}

/// Listener certificate material.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerCertConfig {
    pub is_ssl: bool,
    /// CA bundle used to verify client certificates. Client auth is off when unset.
    pub ca_file: Option<PathBuf>,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    /// Password protecting the private key. Encrypted keys are not supported.
    pub cert_password: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// Directory for the pid file. No pid file is written when unset.
    pub pid_dir: Option<PathBuf>,
}

/// Service discovery parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrarConfig {
    /// Discovery endpoints, tried in order. Empty means standalone mode.
    pub endpoints: Vec<String>,
    pub service_name: String,
    pub heartbeat_interval_secs: u64,
    pub request_timeout_secs: u64,
    /// Address announced to peers. Defaults to the listener address.
    pub advertise_address: Option<String>,
}

impl Default for RegistrarConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            service_name: "booster-gateway".into(),
            heartbeat_interval_secs: 30,
            request_timeout_secs: 5,
            advertise_address: None,
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Base64 key used to decrypt engine store passwords.
    pub key: Option<String>,
}

impl fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("key", &self.key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Store connection parameters for a single engine kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineStoreConfig {
    pub enabled: bool,
    /// `host` or `host:port`.
    pub host: String,
    pub database: String,
    pub user: String,
    pub encrypted_password: String,
    /// Log every statement the store executes.
    pub debug: bool,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

impl Default for EngineStoreConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: String::new(),
            database: String::new(),
            user: String::new(),
            encrypted_password: String::new(),
            debug: false,
            max_connections: 10,
            connect_timeout_secs: 5,
        }
    }
}

impl EngineStoreConfig {
    /// Split `host` into host name and port, defaulting the port to 3306.
    pub fn host_and_port(&self) -> (&str, u16) {
        let host = self.host.trim();
        if let Some((name, port)) = host.rsplit_once(':')
            && !name.contains(':')
            && let Ok(port) = port.parse()
        {
            return (name, port);
        }
        (host, DEFAULT_STORE_PORT)
    }
}
