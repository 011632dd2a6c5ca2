//! Listener TLS from the configured PEM material.

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    axum_server::tls_rustls::RustlsConfig,
    rustls::{
        RootCertStore, ServerConfig,
        pki_types::{CertificateDer, PrivateKeyDer},
        server::WebPkiClientVerifier,
    },
    tracing::info,
};

use booster_config::ServerCertConfig;

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("server_cert.{0} is required when is_ssl is set")]
    Missing(&'static str),
    #[error("encrypted private keys are not supported, remove server_cert.cert_password")]
    EncryptedKey,
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no certificates found in {}", .0.display())]
    NoCertificates(PathBuf),
    #[error("no private key found in {}", .0.display())]
    NoPrivateKey(PathBuf),
    #[error("invalid client CA bundle: {0}")]
    ClientVerifier(String),
    #[error(transparent)]
    Rustls(#[from] rustls::Error),
}

/// Build the rustls server config. Client certificates are verified against
/// `ca_file` when it is set.
pub fn load_server_config(cert: &ServerCertConfig) -> Result<ServerConfig, TlsError> {
    if cert
        .cert_password
        .as_deref()
        .is_some_and(|p| !p.is_empty())
    {
        return Err(TlsError::EncryptedKey);
    }
    let cert_file = cert.cert_file.as_deref().ok_or(TlsError::Missing("cert_file"))?;
    let key_file = cert.key_file.as_deref().ok_or(TlsError::Missing("key_file"))?;

    let chain = read_certs(cert_file)?;
    let key = read_key(key_file)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ServerConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()?;

    let mut config = match cert.ca_file.as_deref() {
        Some(ca_file) => {
            let mut roots = RootCertStore::empty();
            for ca in read_certs(ca_file)? {
                roots.add(ca)?;
            }
            let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
                .build()
                .map_err(|e| TlsError::ClientVerifier(e.to_string()))?;
            info!(ca = %ca_file.display(), "client certificate verification enabled");
            builder
                .with_client_cert_verifier(verifier)
                .with_single_cert(chain, key)?
        },
        None => builder.with_no_client_auth().with_single_cert(chain, key)?,
    };
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(config)
}

/// [`load_server_config`] wrapped for the axum-server acceptor.
pub fn rustls_config(cert: &ServerCertConfig) -> Result<RustlsConfig, TlsError> {
    Ok(RustlsConfig::from_config(Arc::new(load_server_config(cert)?)))
}

fn read_pem(path: &Path) -> Result<Vec<u8>, TlsError> {
    fs::read(path).map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let pem = read_pem(path)?;
    let certs = rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

fn read_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let pem = read_pem(path)?;
    rustls_pemfile::private_key(&mut pem.as_slice())
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))
}
