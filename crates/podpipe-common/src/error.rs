use std::path::PathBuf;

use thiserror::Error;

/// Errors loading cluster credential material
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Failed to read {what} {path:?}: {source}")]
    Read {
        what: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("TLS error: {0}")]
    Tls(String),
}
