//! Gateway configuration: schema, file discovery and loading.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{discover_and_load, discover_in, load_config},
    schema::{
        CredentialsConfig, EngineStoreConfig, GatewayConfig, ProcessConfig, RegistrarConfig,
        ServerCertConfig,
    },
};
