use std::fmt;

use crate::error::TunnelError;

/// A service to dial, optionally pinned to a backend port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub namespace: String,
    pub service: String,
    pub port: Option<u16>,
}

impl Target {
    /// Parse a `service` or `service:port` spec
    pub fn parse(namespace: &str, spec: &str) -> Result<Self, TunnelError> {
        let (service, port) = match spec.split_once(':') {
            Some((service, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    TunnelError::invalid_target(spec, format!("'{}' is not a valid port", port))
                })?;
                if port == 0 {
                    return Err(TunnelError::invalid_target(spec, "port must be non-zero"));
                }
                (service, Some(port))
            }
            None => (spec, None),
        };

        if service.is_empty() {
            return Err(TunnelError::invalid_target(spec, "service name is empty"));
        }
        if namespace.is_empty() {
            return Err(TunnelError::invalid_target(spec, "namespace is empty"));
        }

        Ok(Self {
            namespace: namespace.to_string(),
            service: service.to_string(),
            port,
        })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}/{}:{}", self.namespace, self.service, port),
            None => write!(f, "{}/{}", self.namespace, self.service),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_without_port() {
        let target = Target::parse("default", "redis").unwrap();
        assert_eq!(target.service, "redis");
        assert_eq!(target.port, None);
    }

    #[test]
    fn test_parse_with_port() {
        let target = Target::parse("default", "redis:6379").unwrap();
        assert_eq!(target.service, "redis");
        assert_eq!(target.port, Some(6379));
        assert_eq!(target.to_string(), "default/redis:6379");
    }

    #[test]
    fn test_parse_rejects_named_port() {
        let err = Target::parse("default", "redis:badport").unwrap_err();
        assert!(matches!(err, TunnelError::InvalidTarget { .. }));
        assert!(err.to_string().contains("badport"));
    }

    #[test]
    fn test_parse_rejects_empty_parts() {
        assert!(Target::parse("default", "").is_err());
        assert!(Target::parse("default", ":80").is_err());
        assert!(Target::parse("default", "redis:0").is_err());
        assert!(Target::parse("", "redis").is_err());
    }
}
