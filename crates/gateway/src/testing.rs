//! Test doubles for stores, credentials and the registrar.

use std::sync::{Arc, Mutex};

use {
    async_trait::async_trait,
    secrecy::{ExposeSecret, SecretString},
};

use {
    booster_common::crypto::{CredentialDecryptor, CryptoError},
    booster_config::EngineStoreConfig,
};

use crate::{
    engines::EngineKind,
    store::{EngineStore, StoreFactory},
};

pub fn enabled_store(database: &str) -> EngineStoreConfig {
    EngineStoreConfig {
        enabled: true,
        host: "127.0.0.1:3306".into(),
        database: database.into(),
        user: "booster".into(),
        encrypted_password: "plain-secret".into(),
        ..Default::default()
    }
}

/// Passes the "encrypted" value through, except for [`PlainCredentials::BAD`].
pub struct PlainCredentials;

impl PlainCredentials {
    pub const BAD: &'static str = "undecryptable";
}

impl CredentialDecryptor for PlainCredentials {
    fn decrypt(&self, encrypted: &str) -> Result<SecretString, CryptoError> {
        if encrypted == Self::BAD {
            return Err(CryptoError::Decrypt);
        }
        Ok(SecretString::new(encrypted.to_string()))
    }
}

pub struct FakeStore {
    database: String,
    healthy: bool,
}

impl FakeStore {
    pub fn new(database: &str, healthy: bool) -> Self {
        Self {
            database: database.into(),
            healthy,
        }
    }
}

#[async_trait]
impl EngineStore for FakeStore {
    async fn ping(&self) -> anyhow::Result<()> {
        if self.healthy {
            Ok(())
        } else {
            anyhow::bail!("connection reset")
        }
    }

    fn database(&self) -> &str {
        &self.database
    }
}

/// Records every open attempt; fails for the configured kinds.
#[derive(Default)]
pub struct FakeStoreFactory {
    failing: Vec<EngineKind>,
    opened: Mutex<Vec<EngineKind>>,
    passwords: Mutex<Vec<String>>,
}

impl FakeStoreFactory {
    pub fn failing(kinds: &[EngineKind]) -> Self {
        Self {
            failing: kinds.to_vec(),
            ..Default::default()
        }
    }

    pub fn opened(&self) -> Vec<EngineKind> {
        self.opened.lock().unwrap().clone()
    }

    pub fn passwords(&self) -> Vec<String> {
        self.passwords.lock().unwrap().clone()
    }
}

#[async_trait]
impl StoreFactory for FakeStoreFactory {
    async fn open(
        &self,
        kind: EngineKind,
        config: &EngineStoreConfig,
        password: &SecretString,
    ) -> anyhow::Result<Arc<dyn EngineStore>> {
        self.opened.lock().unwrap().push(kind);
        self.passwords
            .lock()
            .unwrap()
            .push(password.expose_secret().clone());
        if self.failing.contains(&kind) {
            anyhow::bail!("access denied for user '{}'", config.user);
        }
        Ok(Arc::new(FakeStore::new(&config.database, true)))
    }
}
