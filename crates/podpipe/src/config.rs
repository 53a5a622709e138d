use std::path::{Path, PathBuf};
use std::sync::Arc;

use podpipe_common::{load_client_config, CredentialError};
use serde::Deserialize;

use crate::error::TunnelError;

/// Environment variable overriding the default config location
pub const CONFIG_ENV_VAR: &str = "PODPIPE_CONFIG";

/// Cluster credentials (parsed from TOML)
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterConfig {
    /// API server address (`https://host:port` or `host:port`)
    pub server: String,

    /// CA bundle path for verifying the API server
    pub ca_cert: String,

    /// Client certificate path (requires `client_key`)
    pub client_cert: Option<String>,

    /// Client private key path (requires `client_cert`)
    pub client_key: Option<String>,

    /// Bearer token
    pub token: Option<String>,

    /// File holding a bearer token
    pub token_file: Option<String>,
}

/// Cluster credentials with files read and TLS material parsed
#[derive(Debug, Clone)]
pub struct ResolvedClusterConfig {
    /// `host:port` of the API server
    pub host: String,
    pub bearer_token: Option<String>,
    pub tls: Arc<rustls::ClientConfig>,
}

impl ClusterConfig {
    /// `$PODPIPE_CONFIG`, else `<config dir>/podpipe/cluster.toml`
    pub fn default_path() -> PathBuf {
        if let Some(path) = std::env::var_os(CONFIG_ENV_VAR) {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("podpipe")
            .join("cluster.toml")
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, TunnelError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TunnelError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        Self::from_toml(&content)
            .map_err(|e| TunnelError::Config(format!("Invalid config file {:?}: {}", path, e)))
    }

    pub fn from_toml(content: &str) -> Result<Self, TunnelError> {
        toml::from_str(content).map_err(|e| TunnelError::Config(e.to_string()))
    }

    /// Read referenced files and build the TLS configuration
    pub fn resolve(&self) -> Result<ResolvedClusterConfig, TunnelError> {
        let host = normalize_host(&self.server)?;

        let bearer_token = match (&self.token, &self.token_file) {
            (Some(_), Some(_)) => {
                return Err(TunnelError::Config(
                    "Set either 'token' or 'token_file', not both".to_string(),
                ))
            }
            (Some(token), None) => Some(token.trim().to_string()),
            (None, Some(path)) => {
                let path = expand_path(path)?;
                let token = std::fs::read_to_string(&path).map_err(|e| {
                    TunnelError::Config(format!("Failed to read token file {:?}: {}", path, e))
                })?;
                Some(token.trim().to_string())
            }
            (None, None) => None,
        };

        let ca_path = expand_path(&self.ca_cert)?;
        let identity = match (&self.client_cert, &self.client_key) {
            (Some(cert), Some(key)) => Some((expand_path(cert)?, expand_path(key)?)),
            (None, None) => None,
            _ => {
                return Err(TunnelError::Config(
                    "'client_cert' and 'client_key' must be set together".to_string(),
                ))
            }
        };

        let tls = load_client_config(
            &ca_path,
            identity.as_ref().map(|(c, k)| (c.as_path(), k.as_path())),
        )
        .map_err(credential_error)?;

        tracing::debug!(host = %host, token = bearer_token.is_some(), "Resolved cluster configuration");

        Ok(ResolvedClusterConfig {
            host,
            bearer_token,
            tls,
        })
    }
}

fn credential_error(e: CredentialError) -> TunnelError {
    TunnelError::Config(e.to_string())
}

fn expand_path(path: &str) -> Result<PathBuf, TunnelError> {
    shellexpand::full(path)
        .map(|expanded| PathBuf::from(expanded.as_ref()))
        .map_err(|e| TunnelError::Config(format!("Failed to expand path '{}': {}", path, e)))
}

fn normalize_host(server: &str) -> Result<String, TunnelError> {
    let trimmed = server.trim().trim_end_matches('/');
    let host = match trimmed.split_once("://") {
        Some(("https", rest)) => rest,
        Some((scheme, _)) => {
            return Err(TunnelError::Config(format!(
                "Unsupported server scheme '{}', expected https",
                scheme
            )))
        }
        None => trimmed,
    };
    if host.is_empty() {
        return Err(TunnelError::Config("Server address is required".to_string()));
    }
    Ok(host.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn ca_file() -> tempfile::NamedTempFile {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        write_temp(&certified.cert.pem())
    }

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("https://10.0.0.1:6443/").unwrap(), "10.0.0.1:6443");
        assert_eq!(normalize_host("cluster.local:443").unwrap(), "cluster.local:443");
        assert!(normalize_host("http://10.0.0.1").is_err());
        assert!(normalize_host("https://").is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = ClusterConfig::load(Path::new("/definitely/not/here/cluster.toml")).unwrap_err();
        assert!(matches!(err, TunnelError::Config(_)));
    }

    #[test]
    fn test_malformed_file() {
        let file = write_temp("server = [not toml");
        assert!(matches!(
            ClusterConfig::load(file.path()),
            Err(TunnelError::Config(_))
        ));
    }

    #[test]
    fn test_resolve_with_token_file() {
        let ca = ca_file();
        let token = write_temp("  secret-token\n");
        let config = ClusterConfig::from_toml(&format!(
            "server = \"https://10.0.0.1:6443\"\nca_cert = {:?}\ntoken_file = {:?}\n",
            ca.path(),
            token.path()
        ))
        .unwrap();

        let resolved = config.resolve().unwrap();
        assert_eq!(resolved.host, "10.0.0.1:6443");
        assert_eq!(resolved.bearer_token.as_deref(), Some("secret-token"));
    }

    #[test]
    fn test_token_and_token_file_conflict() {
        let ca = ca_file();
        let config = ClusterConfig::from_toml(&format!(
            "server = \"10.0.0.1:6443\"\nca_cert = {:?}\ntoken = \"a\"\ntoken_file = \"/tmp/b\"\n",
            ca.path()
        ))
        .unwrap();
        assert!(matches!(config.resolve(), Err(TunnelError::Config(_))));
    }

    #[test]
    fn test_client_cert_requires_key() {
        let ca = ca_file();
        let config = ClusterConfig::from_toml(&format!(
            "server = \"10.0.0.1:6443\"\nca_cert = {:?}\nclient_cert = {:?}\n",
            ca.path(),
            ca.path()
        ))
        .unwrap();
        let err = config.resolve().unwrap_err();
        assert!(err.to_string().contains("client_key"));
    }

    #[test]
    fn test_bad_ca_fails_resolution() {
        let ca = write_temp("garbage");
        let config = ClusterConfig::from_toml(&format!(
            "server = \"10.0.0.1:6443\"\nca_cert = {:?}\n",
            ca.path()
        ))
        .unwrap();
        assert!(matches!(config.resolve(), Err(TunnelError::Config(_))));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let result = ClusterConfig::from_toml("server = \"a\"\nca_cert = \"b\"\nregion = \"c\"\n");
        assert!(result.is_err());
    }
}
