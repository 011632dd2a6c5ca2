//! Bringing engine stores and route tables online at startup.

use std::{fmt, sync::Arc};

use {
    axum::Router,
    tracing::{debug, info},
};

use {
    booster_common::crypto::{CredentialDecryptor, CryptoError},
    booster_config::EngineStoreConfig,
};

use crate::{
    engines::EngineKind,
    store::{EngineStore, StoreFactory},
};

#[derive(Debug, thiserror::Error)]
pub enum ActivationError {
    #[error("failed to decrypt {kind} store password: {source}")]
    Decrypt {
        kind: EngineKind,
        #[source]
        source: CryptoError,
    },
    #[error("failed to open {kind} store: {source:#}")]
    Store {
        kind: EngineKind,
        #[source]
        source: anyhow::Error,
    },
    #[error("{0} resources are already activated")]
    AlreadyActivated(EngineKind),
}

impl ActivationError {
    pub fn kind(&self) -> EngineKind {
        match self {
            Self::Decrypt { kind, .. } | Self::Store { kind, .. } => *kind,
            Self::AlreadyActivated(kind) => *kind,
        }
    }
}

/// Resources owned by one activated engine. Created once at startup and kept
/// for the life of the process.
pub struct EngineResource {
    pub kind: EngineKind,
    pub store: Arc<dyn EngineStore>,
    pub debug: bool,
}

impl fmt::Debug for EngineResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineResource")
            .field("kind", &self.kind)
            .field("database", &self.store.database())
            .field("debug", &self.debug)
            .finish()
    }
}

/// Activated engines and their route tables, in activation order.
#[derive(Default)]
pub struct ResourceRegistry {
    entries: Vec<(Arc<EngineResource>, Router)>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an engine's resource and route table. Each kind attaches once.
    pub fn attach(
        &mut self,
        resource: Arc<EngineResource>,
        routes: Router,
    ) -> Result<(), ActivationError> {
        if self.contains(resource.kind) {
            return Err(ActivationError::AlreadyActivated(resource.kind));
        }
        self.entries.push((resource, routes));
        Ok(())
    }

    pub fn contains(&self, kind: EngineKind) -> bool {
        self.entries.iter().any(|(r, _)| r.kind == kind)
    }

    pub fn get(&self, kind: EngineKind) -> Option<&Arc<EngineResource>> {
        self.entries
            .iter()
            .map(|(r, _)| r)
            .find(|r| r.kind == kind)
    }

    pub fn kinds(&self) -> Vec<EngineKind> {
        self.entries.iter().map(|(r, _)| r.kind).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merge every attached route table into one router.
    pub fn into_router(self) -> Router {
        self.entries
            .into_iter()
            .fold(Router::new(), |acc, (_, routes)| acc.merge(routes))
    }
}

/// Activate one engine kind.
///
/// Steps run strictly in order and the first failure stops them: a disabled
/// engine returns `Ok(None)` untouched, otherwise the credential is decrypted,
/// the store opened, the route table built once and attached to `registry`.
/// Engines attached earlier are left as they are when this one fails.
pub async fn activate<B>(
    kind: EngineKind,
    config: &EngineStoreConfig,
    decryptor: &dyn CredentialDecryptor,
    stores: &dyn StoreFactory,
    route_table: B,
    registry: &mut ResourceRegistry,
) -> Result<Option<Arc<EngineResource>>, ActivationError>
where
    B: FnOnce(Arc<EngineResource>) -> Router,
{
    if !config.enabled {
        debug!(engine = %kind, "engine disabled, skipping activation");
        return Ok(None);
    }
    if registry.contains(kind) {
        return Err(ActivationError::AlreadyActivated(kind));
    }

    let password = decryptor
        .decrypt(&config.encrypted_password)
        .map_err(|source| ActivationError::Decrypt { kind, source })?;

    let store = stores
        .open(kind, config, &password)
        .await
        .map_err(|source| ActivationError::Store { kind, source })?;

    let resource = Arc::new(EngineResource {
        kind,
        store,
        debug: config.debug,
    });
    let routes = route_table(Arc::clone(&resource));
    registry.attach(Arc::clone(&resource), routes)?;

    #[cfg(feature = "metrics")]
    metrics::counter!("booster_gateway_engine_activations_total", "engine" => kind.as_str())
        .increment(1);
    info!(engine = %kind, name = kind.display_name(), database = %config.database, "engine activated");
    Ok(Some(resource))
}
