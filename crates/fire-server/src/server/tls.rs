//! TLS listener setup using rustls with the `ring` crypto provider.
//!
//! The certificate chain, private key and CA certificate are read from the PEM
//! files written by [`crate::certs`]. The resulting `ServerConfig` advertises
//! HTTP/2 and HTTP/1.1 over ALPN.

use std::{io, path::Path, sync::Arc};

use rustls::{
    crypto::{ring, CryptoProvider},
    pki_types::{CertificateDer, PrivateKeyDer},
    server::{VerifierBuilderError, WebPkiClientVerifier},
    RootCertStore, ServerConfig,
};
use thiserror::Error;

use crate::certs::{CertificateFiles, CA_CERT_FILE, SERVER_CERT_FILE, SERVER_KEY_FILE};
use crate::config::ClientAuth;

/// ALPN identifiers in preference order.
pub const ALPN_PROTOCOLS: [&[u8]; 2] = [b"h2", b"http/1.1"];

/// Errors produced while building the TLS configuration.
#[derive(Debug, Error)]
pub enum TlsError {
    /// A PEM file could not be read from disk.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: io::Error,
    },

    /// A PEM section could not be parsed.
    #[error("failed to parse PEM data in {name}: {source}")]
    Pem {
        name: &'static str,
        #[source]
        source: io::Error,
    },

    /// The file parsed but held no certificate.
    #[error("no certificate found in {0}")]
    NoCertificate(&'static str),

    /// The key file parsed but held no private key.
    #[error("no private key found in {0}")]
    NoPrivateKey(&'static str),

    /// The CA certificate could not be used as a client trust anchor.
    #[error("failed to build client certificate verifier: {0}")]
    ClientVerifier(#[from] VerifierBuilderError),

    /// rustls rejected the certificate, key or protocol settings.
    #[error("failed to build rustls ServerConfig: {0}")]
    Rustls(#[from] rustls::Error),
}

/// PEM-encoded inputs of [`server_config_from_pem`].
#[derive(Clone, Copy)]
pub struct PemInputs<'a> {
    pub ca_cert: &'a [u8],
    pub server_cert: &'a [u8],
    pub server_key: &'a [u8],
}

/// Install the `ring` provider as the process default and return it.
///
/// Safe to call more than once; if a default is already installed that one is
/// returned.
pub fn install_crypto_provider() -> Arc<CryptoProvider> {
    // Err only means a default is already installed.
    let _ = ring::default_provider().install_default();
    CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(ring::default_provider()))
}

/// Read the materialised PEM files and build the listener's [`ServerConfig`].
///
/// # Errors
///
/// Returns an error naming the offending file if it cannot be read or parsed,
/// or if rustls rejects the resulting configuration.
pub fn load_server_config(
    files: &CertificateFiles,
    client_auth: ClientAuth,
    provider: Arc<CryptoProvider>,
) -> Result<Arc<ServerConfig>, TlsError> {
    let ca_cert = read(&files.ca_cert)?;
    let server_cert = read(&files.server_cert)?;
    let server_key = read(&files.server_key)?;

    server_config_from_pem(
        PemInputs {
            ca_cert: &ca_cert,
            server_cert: &server_cert,
            server_key: &server_key,
        },
        client_auth,
        provider,
    )
}

/// Build a [`ServerConfig`] from PEM-encoded certificate, key and CA bytes.
pub fn server_config_from_pem(
    pem: PemInputs<'_>,
    client_auth: ClientAuth,
    provider: Arc<CryptoProvider>,
) -> Result<Arc<ServerConfig>, TlsError> {
    let certs = parse_certs(pem.server_cert, SERVER_CERT_FILE)?;
    let key = parse_key(pem.server_key, SERVER_KEY_FILE)?;
    let ca = parse_certs(pem.ca_cert, CA_CERT_FILE)?;

    let builder =
        ServerConfig::builder_with_provider(provider.clone()).with_safe_default_protocol_versions()?;

    let builder = match client_auth {
        ClientAuth::None => builder.with_no_client_auth(),
        ClientAuth::Optional | ClientAuth::Required => {
            let mut roots = RootCertStore::empty();
            for cert in ca {
                roots.add(cert)?;
            }
            let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider);
            let verifier = if client_auth == ClientAuth::Optional {
                verifier.allow_unauthenticated().build()?
            } else {
                verifier.build()?
            };
            builder.with_client_cert_verifier(verifier)
        }
    };

    let mut config = builder.with_single_cert(certs, key)?;
    config.alpn_protocols = ALPN_PROTOCOLS.iter().map(|p| p.to_vec()).collect();

    Ok(Arc::new(config))
}

fn read(path: &Path) -> Result<Vec<u8>, TlsError> {
    std::fs::read(path).map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_certs(pem: &[u8], name: &'static str) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let certs = rustls_pemfile::certs(&mut io::BufReader::new(pem))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Pem { name, source })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificate(name));
    }
    Ok(certs)
}

fn parse_key(pem: &[u8], name: &'static str) -> Result<PrivateKeyDer<'static>, TlsError> {
    rustls_pemfile::private_key(&mut io::BufReader::new(pem))
        .map_err(|source| TlsError::Pem { name, source })?
        .ok_or(TlsError::NoPrivateKey(name))
}
