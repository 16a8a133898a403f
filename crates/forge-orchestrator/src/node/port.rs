//! Port mappings and network modes for node definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{OrchestratorError, Result};

/// Network mode a node's containers are attached to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkMode {
    /// Bridge network (default Docker networking).
    #[default]
    Bridge,

    /// Host network (container shares host network namespace).
    Host,

    /// No networking.
    None,

    /// User-defined network with the given name.
    Named(String),
}

impl NetworkMode {
    /// Parses a network mode declaration.
    ///
    /// Anything other than `host`, `bridge` or `none` names a user network.
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "" | "bridge" => Self::Bridge,
            "host" => Self::Host,
            "none" => Self::None,
            other => Self::Named(other.to_string()),
        }
    }

    /// Returns the Docker network mode string.
    pub fn as_docker_mode(&self) -> &str {
        match self {
            Self::Bridge => "bridge",
            Self::Host => "host",
            Self::None => "none",
            Self::Named(name) => name,
        }
    }

    /// Returns true if containers share the host network namespace.
    pub fn is_host(&self) -> bool {
        matches!(self, Self::Host)
    }
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_docker_mode())
    }
}

/// Transport protocol of a port mapping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortProtocol {
    /// TCP protocol.
    #[default]
    Tcp,

    /// UDP protocol.
    Udp,
}

impl PortProtocol {
    /// Returns the protocol suffix used by Docker.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

/// Explicit host-to-container port pair.
///
/// Declarations are always normalized into this form, so `8080` and
/// `"8080:8080"` produce the same mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortMapping {
    /// Port published on the host.
    pub host_port: u16,

    /// Port inside the container.
    pub container_port: u16,

    /// Protocol (tcp/udp).
    #[serde(default)]
    pub protocol: PortProtocol,
}

impl PortMapping {
    /// Creates a TCP mapping publishing `container_port` on `host_port`.
    pub fn new(host_port: u16, container_port: u16) -> Self {
        Self {
            host_port,
            container_port,
            protocol: PortProtocol::Tcp,
        }
    }

    /// Creates a TCP mapping with the same host and container port.
    pub fn same(port: u16) -> Self {
        Self::new(port, port)
    }

    /// Sets the protocol.
    pub fn with_protocol(mut self, protocol: PortProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Returns the Docker port key (e.g. "8080/tcp").
    pub fn as_docker_port(&self) -> String {
        format!("{}/{}", self.container_port, self.protocol.as_str())
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}/{}",
            self.host_port,
            self.container_port,
            self.protocol.as_str()
        )
    }
}

impl FromStr for PortMapping {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self> {
        let raw = s.trim();
        let (ports, protocol) = match raw.rsplit_once('/') {
            Some((ports, "tcp")) => (ports, PortProtocol::Tcp),
            Some((ports, "udp")) => (ports, PortProtocol::Udp),
            Some((_, other)) => {
                return Err(OrchestratorError::configuration(format!(
                    "unsupported port protocol '{}' in '{}'",
                    other, s
                )))
            }
            None => (raw, PortProtocol::Tcp),
        };

        let mapping = match ports.split_once(':') {
            Some((host, container)) => PortMapping::new(parse_port(host, s)?, parse_port(container, s)?),
            None => PortMapping::same(parse_port(ports, s)?),
        };

        Ok(mapping.with_protocol(protocol))
    }
}

fn parse_port(value: &str, declaration: &str) -> Result<u16> {
    match value.trim().parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(OrchestratorError::configuration(format!(
            "malformed port declaration '{}'",
            declaration
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_scalar_and_pair_normalize_identically() {
        let scalar: PortMapping = "8080".parse().unwrap();
        let pair: PortMapping = "8080:8080".parse().unwrap();
        assert_eq!(scalar, pair);
        assert_eq!(scalar, PortMapping::same(8080));
    }

    #[test]
    fn test_port_explicit_pair() {
        let mapping: PortMapping = "9000:80".parse().unwrap();
        assert_eq!(mapping.host_port, 9000);
        assert_eq!(mapping.container_port, 80);
        assert_eq!(mapping.as_docker_port(), "80/tcp");
    }

    #[test]
    fn test_port_protocol_suffix() {
        let mapping: PortMapping = "5353:53/udp".parse().unwrap();
        assert_eq!(mapping.protocol, PortProtocol::Udp);
        assert_eq!(mapping.to_string(), "5353:53/udp");

        let mapping: PortMapping = "443/tcp".parse().unwrap();
        assert_eq!(mapping, PortMapping::same(443));
    }

    #[test]
    fn test_port_malformed() {
        assert!("http".parse::<PortMapping>().is_err());
        assert!("80:".parse::<PortMapping>().is_err());
        assert!("0".parse::<PortMapping>().is_err());
        assert!("70000".parse::<PortMapping>().is_err());
        assert!("80/sctp".parse::<PortMapping>().unwrap_err().is_config_error());
    }

    #[test]
    fn test_network_mode_parse() {
        assert_eq!(NetworkMode::parse("host"), NetworkMode::Host);
        assert_eq!(NetworkMode::parse("none"), NetworkMode::None);
        assert_eq!(NetworkMode::parse("bridge"), NetworkMode::Bridge);
        assert_eq!(
            NetworkMode::parse("forge-net"),
            NetworkMode::Named("forge-net".to_string())
        );
        assert_eq!(NetworkMode::default().as_docker_mode(), "bridge");
        assert!(NetworkMode::Host.is_host());
    }
}
