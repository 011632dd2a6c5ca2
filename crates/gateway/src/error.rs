use std::io;

use booster_common::crypto::CryptoError;

use crate::{activation::ActivationError, registrar::RegistrarError, state::GatewayPhase};

/// Fatal startup errors. None of them are retried.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("invalid configuration: {0:#}")]
    Config(#[source] anyhow::Error),
    #[error("failed to save pid file: {0}")]
    Pid(#[source] io::Error),
    #[error("credential setup failed: {0}")]
    Credentials(#[from] CryptoError),
    #[error("service registrar failed: {0}")]
    Registrar(#[from] RegistrarError),
    #[error(transparent)]
    Activation(#[from] ActivationError),
    #[error("invalid lifecycle transition from {from} to {to}")]
    InvalidTransition { from: GatewayPhase, to: GatewayPhase },
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[cfg(feature = "tls")]
    #[error("tls setup failed: {0}")]
    Tls(#[from] crate::tls::TlsError),
    #[cfg(not(feature = "tls"))]
    #[error("server_cert.is_ssl is set but this build has no tls support")]
    TlsUnavailable,
    #[error("server error: {0}")]
    Serve(#[source] io::Error),
}
