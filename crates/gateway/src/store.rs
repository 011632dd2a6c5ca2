//! Engine store connections.
//!
//! The gateway only owns the pool; the schema belongs to each engine.

use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    secrecy::{ExposeSecret, SecretString},
    sqlx::{
        ConnectOptions,
        mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions},
    },
    tracing::debug,
};

use booster_config::EngineStoreConfig;

use crate::engines::EngineKind;

/// An open connection pool to one engine's store.
#[async_trait]
pub trait EngineStore: Send + Sync {
    /// Round-trip to the store.
    async fn ping(&self) -> anyhow::Result<()>;

    fn database(&self) -> &str;
}

/// Opens engine stores.
#[async_trait]
pub trait StoreFactory: Send + Sync {
    async fn open(
        &self,
        kind: EngineKind,
        config: &EngineStoreConfig,
        password: &SecretString,
    ) -> anyhow::Result<Arc<dyn EngineStore>>;
}

/// MySQL-backed store factory. Connects eagerly so a bad host or credential
/// fails at startup rather than on the first request.
#[derive(Debug, Default, Clone, Copy)]
pub struct MySqlStoreFactory;

#[async_trait]
impl StoreFactory for MySqlStoreFactory {
    async fn open(
        &self,
        kind: EngineKind,
        config: &EngineStoreConfig,
        password: &SecretString,
    ) -> anyhow::Result<Arc<dyn EngineStore>> {
        let store = MySqlEngineStore::connect(kind, config, password).await?;
        Ok(Arc::new(store))
    }
}

pub struct MySqlEngineStore {
    kind: EngineKind,
    database: String,
    pool: MySqlPool,
}

impl MySqlEngineStore {
    pub async fn connect(
        kind: EngineKind,
        config: &EngineStoreConfig,
        password: &SecretString,
    ) -> Result<Self, sqlx::Error> {
        let (host, port) = config.host_and_port();
        let mut options = MySqlConnectOptions::new()
            .host(host)
            .port(port)
            .username(&config.user)
            .password(password.expose_secret())
            .database(&config.database);
        if !config.debug {
            options = options.disable_statement_logging();
        }

        debug!(engine = %kind, host, port, database = %config.database, "connecting engine store");
        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect_with(options)
            .await?;

        Ok(Self {
            kind,
            database: config.database.clone(),
            pool,
        })
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

#[async_trait]
impl EngineStore for MySqlEngineStore {
    async fn ping(&self) -> anyhow::Result<()> {
        if self.pool.is_closed() {
            anyhow::bail!("{} store pool is closed", self.kind);
        }
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn database(&self) -> &str {
        &self.database
    }
}
