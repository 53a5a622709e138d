use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};
use rustls_pemfile::{certs, private_key};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use crate::CredentialError;

/// Client certificate and key presented to the cluster API server
#[derive(Debug, Clone, Copy)]
pub struct ClientIdentity<'a> {
    pub cert: &'a str,
    pub key: &'a str,
}

fn read_pem(what: &'static str, path: &Path) -> Result<String, CredentialError> {
    std::fs::read_to_string(path).map_err(|source| CredentialError::Read {
        what,
        path: path.to_path_buf(),
        source,
    })
}

fn load_certs_from_pem(pem_content: &str) -> Result<Vec<CertificateDer<'static>>, CredentialError> {
    let mut cursor = Cursor::new(pem_content.as_bytes());
    let parsed = certs(&mut cursor)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CredentialError::Certificate(format!("Failed to parse certificates: {}", e)))?;
    if parsed.is_empty() {
        return Err(CredentialError::Certificate(
            "No certificates found in PEM content".to_string(),
        ));
    }
    Ok(parsed)
}

fn load_private_key_from_pem(pem_content: &str) -> Result<PrivateKeyDer<'static>, CredentialError> {
    let mut cursor = Cursor::new(pem_content.as_bytes());
    private_key(&mut cursor)
        .map_err(|e| CredentialError::Certificate(format!("Failed to parse private key: {}", e)))?
        .ok_or_else(|| CredentialError::Certificate("No private key found in PEM content".to_string()))
}

fn load_root_store_from_pem(pem_content: &str) -> Result<RootCertStore, CredentialError> {
    let ca_certs = load_certs_from_pem(pem_content)?;
    let mut root_store = RootCertStore::empty();
    for cert in ca_certs {
        root_store.add(cert).map_err(|e| {
            CredentialError::Certificate(format!("Failed to add CA certificate: {}", e))
        })?;
    }
    Ok(root_store)
}

/// Build the client TLS config used to reach the cluster API server
///
/// # Arguments
/// * `ca_pem` - CA bundle for verifying the API server
/// * `identity` - Optional client certificate for mTLS authentication
pub fn load_client_config_from_pem(
    ca_pem: &str,
    identity: Option<ClientIdentity<'_>>,
) -> Result<Arc<ClientConfig>, CredentialError> {
    let root_store = load_root_store_from_pem(ca_pem)?;

    // Pin the provider so the result does not depend on a process-wide default.
    let builder = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| CredentialError::Tls(format!("Failed to select protocol versions: {}", e)))?
    .with_root_certificates(root_store);

    let config = match identity {
        Some(identity) => {
            let certs = load_certs_from_pem(identity.cert)?;
            let key = load_private_key_from_pem(identity.key)?;
            builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| CredentialError::Tls(format!("Failed to build client config: {}", e)))?
        }
        None => builder.with_no_client_auth(),
    };

    tracing::debug!(mtls = identity.is_some(), "Loaded cluster TLS configuration");
    Ok(Arc::new(config))
}

/// Build the client TLS config from PEM files on disk
///
/// # Arguments
/// * `ca_path` - Path to the CA bundle
/// * `identity` - Optional `(cert_path, key_path)` pair for mTLS
pub fn load_client_config(
    ca_path: &Path,
    identity: Option<(&Path, &Path)>,
) -> Result<Arc<ClientConfig>, CredentialError> {
    let ca_pem = read_pem("CA certificate", ca_path)?;
    match identity {
        Some((cert_path, key_path)) => {
            let cert = read_pem("client certificate", cert_path)?;
            let key = read_pem("client key", key_path)?;
            load_client_config_from_pem(
                &ca_pem,
                Some(ClientIdentity {
                    cert: &cert,
                    key: &key,
                }),
            )
        }
        None => load_client_config_from_pem(&ca_pem, None),
    }
}
