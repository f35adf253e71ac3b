//! Connection identity shared by a driver and every facade built on it.
//!
//! A facade never owns these settings; it reads them from its driver so that
//! two facades over the same driver always report the same name and address.

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Backend family a connection talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Redis,
    Memcached,
    Ssdb,
}

impl ConnectionType {
    /// Well-known TCP port for this backend family.
    pub fn default_port(self) -> u16 {
        match self {
            ConnectionType::Redis => 6379,
            ConnectionType::Memcached => 11211,
            ConnectionType::Ssdb => 8888,
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionType::Redis => "redis",
            ConnectionType::Memcached => "memcached",
            ConnectionType::Ssdb => "ssdb",
        };
        f.write_str(name)
    }
}

/// Host name (or IP literal) plus TCP port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostAndPort {
    pub host: String,
    pub port: u16,
}

impl HostAndPort {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Returns `true` when the host names this machine.
    ///
    /// Accepts `localhost` (any case) and every loopback IP literal.
    pub fn is_local_host(&self) -> bool {
        if self.host.eq_ignore_ascii_case("localhost") {
            return true;
        }
        self.host
            .parse::<IpAddr>()
            .map(|ip| ip.is_loopback())
            .unwrap_or(false)
    }
}

impl fmt::Display for HostAndPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Settings a driver is created from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Human-readable name shown for the connection.
    pub connection_name: String,
    pub connection_type: ConnectionType,
    pub host: HostAndPort,
    /// Separator placed between values when a result is rendered as text.
    pub output_delimiter: String,
    /// Extra arguments the driver applies right after connecting
    /// (e.g. `-n 2` to select a database).
    pub command_line: String,
}

impl ConnectionSettings {
    /// Creates settings on the backend's default port with a newline delimiter
    /// and no extra arguments.
    pub fn new(
        connection_name: impl Into<String>,
        connection_type: ConnectionType,
        host: impl Into<String>,
    ) -> Self {
        Self {
            connection_name: connection_name.into(),
            connection_type,
            host: HostAndPort::new(host, connection_type.default_port()),
            output_delimiter: "\n".to_string(),
            command_line: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_settings_use_backend_default_port() {
        let settings = ConnectionSettings::new("cache", ConnectionType::Memcached, "10.0.0.7");
        assert_eq!(settings.host.port, 11211);
        assert_eq!(settings.output_delimiter, "\n");
        assert!(settings.command_line.is_empty());
    }

    #[test]
    fn test_host_and_port_display() {
        let addr = HostAndPort::new("db.internal", 6380);
        assert_eq!(addr.to_string(), "db.internal:6380");
    }

    #[test]
    fn test_is_local_host_accepts_localhost_and_loopback_literals() {
        assert!(HostAndPort::new("localhost", 1).is_local_host());
        assert!(HostAndPort::new("LocalHost", 1).is_local_host());
        assert!(HostAndPort::new("127.0.0.1", 1).is_local_host());
        assert!(HostAndPort::new("::1", 1).is_local_host());
    }

    #[test]
    fn test_is_local_host_rejects_remote_hosts() {
        assert!(!HostAndPort::new("192.168.1.20", 1).is_local_host());
        assert!(!HostAndPort::new("redis.example.com", 1).is_local_host());
    }

    #[test]
    fn test_connection_type_display_is_lowercase() {
        assert_eq!(ConnectionType::Redis.to_string(), "redis");
        assert_eq!(ConnectionType::Ssdb.to_string(), "ssdb");
    }
}
