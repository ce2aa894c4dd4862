//! Certificate loading for TLS listeners.
//!
//! PEM certificate/key files are read into an [`Identity`] and turned into
//! a single-certificate rustls configuration. The management channel holds
//! a [`certificate_loader`] closure so the same paths can be reread on
//! demand under live traffic.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed reading {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("no certificate found in {0}")]
    NoCertificate(PathBuf),
    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),
    #[error("no TLS certificate configured")]
    NotConfigured,
    #[error("invalid certificate or key: {0}")]
    Rustls(#[from] rustls::Error),
}

/// A certificate chain and its private key.
#[derive(Debug)]
pub struct Identity {
    pub certs: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

/// Load a PEM certificate chain and private key from disk.
pub fn load_identity(cert_path: &Path, key_path: &Path) -> Result<Identity, TlsError> {
    let mut reader = open(cert_path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Read {
            path: cert_path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificate(cert_path.to_path_buf()));
    }

    let mut reader = open(key_path)?;
    let key = rustls_pemfile::private_key(&mut reader)
        .map_err(|source| TlsError::Read {
            path: key_path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(key_path.to_path_buf()))?;

    Ok(Identity { certs, key })
}

/// Build a server configuration holding a single identity.
pub fn server_config(identity: Identity) -> Result<Arc<rustls::ServerConfig>, TlsError> {
    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(identity.certs, identity.key)?;
    Ok(Arc::new(config))
}

/// Reload closure for the management channel: rereads the identity from
/// the same paths on every call.
pub fn certificate_loader(
    cert_path: PathBuf,
    key_path: PathBuf,
) -> impl Fn() -> Result<Identity, TlsError> + Send + Sync {
    move || load_identity(&cert_path, &key_path)
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })
}
