//! Startup configuration.
//!
//! A plain `key=value` file:
//!
//! ```text
//! # provider address
//! rpcserverip=127.0.0.1
//! rpcserverport=8000
//! # coordination service address
//! zookeeperip=127.0.0.1
//! zookeeperport=2181
//! ```
//!
//! Lines starting with `#` and blank lines are skipped; keys and values are
//! trimmed. A repeated key keeps its last value. Unknown keys are ignored
//! with a warning so one file can carry settings for several programs.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::registry::{Endpoint, DEFAULT_SESSION_TIMEOUT};

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for a whole call (write request, read response).
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Default limit on concurrent provider connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 1024;

/// Largest accepted connection limit.
pub const MAX_CONNECTIONS_LIMIT: usize = tokio::sync::Semaphore::MAX_PERMITS;

const KNOWN_KEYS: &[&str] = &[
    "rpcserverip",
    "rpcserverport",
    "zookeeperip",
    "zookeeperport",
    "registrybackend",
    "connecttimeoutms",
    "calltimeoutms",
    "sessiontimeoutms",
    "maxconnections",
    "logdir",
    "loglevel",
];

/// Which coordination service the registry talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegistryBackend {
    /// The bundled coordination service (`beacon-registry`).
    #[default]
    Beacon,
    /// Apache ZooKeeper (needs the `zookeeper` feature).
    ZooKeeper,
}

impl FromStr for RegistryBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "beacon" => Ok(RegistryBackend::Beacon),
            "zookeeper" => Ok(RegistryBackend::ZooKeeper),
            _ => Err(ConfigError::InvalidValue {
                key: "registrybackend".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for RegistryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryBackend::Beacon => f.write_str("beacon"),
            RegistryBackend::ZooKeeper => f.write_str("zookeeper"),
        }
    }
}

/// Process configuration, loaded once at startup and passed explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcConfig {
    /// Address the provider listens on and advertises.
    pub rpc_server_ip: String,
    /// Provider port.
    pub rpc_server_port: u16,
    /// Coordination service host.
    pub registry_ip: String,
    /// Coordination service port.
    pub registry_port: u16,
    /// Coordination service flavour.
    pub registry_backend: RegistryBackend,
    /// TCP connect timeout, for providers and the registry alike.
    pub connect_timeout: Duration,
    /// Deadline for one call after the connection is up.
    pub call_timeout: Duration,
    /// Registry session timeout.
    pub session_timeout: Duration,
    /// Concurrent connection limit of a provider.
    pub max_connections: usize,
    /// Directory for daily log files.
    pub log_dir: PathBuf,
    /// Default `tracing` filter directive, overridden by `RUST_LOG`.
    pub log_level: String,
}

impl RpcConfig {
    /// Read and parse a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&text)?;
        tracing::debug!("loaded config from {}: {:?}", path.display(), config);
        Ok(config)
    }

    /// Parse configuration text.
    ///
    /// # Errors
    ///
    /// - `Malformed` for a non-comment line without `=` or with an empty key
    /// - `MissingKey` when one of the four address keys is absent
    /// - `InvalidValue` for a port, timeout or limit that does not parse
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let values = parse_pairs(text)?;

        for key in values.keys() {
            if !KNOWN_KEYS.contains(&key.as_str()) {
                tracing::warn!("ignoring unknown config key `{}`", key);
            }
        }

        Ok(Self {
            rpc_server_ip: required(&values, "rpcserverip")?.to_string(),
            rpc_server_port: parse_value("rpcserverport", required(&values, "rpcserverport")?)?,
            registry_ip: required(&values, "zookeeperip")?.to_string(),
            registry_port: parse_value("zookeeperport", required(&values, "zookeeperport")?)?,
            registry_backend: match values.get("registrybackend") {
                Some(value) => value.parse()?,
                None => RegistryBackend::default(),
            },
            connect_timeout: millis(&values, "connecttimeoutms", DEFAULT_CONNECT_TIMEOUT)?,
            call_timeout: millis(&values, "calltimeoutms", DEFAULT_CALL_TIMEOUT)?,
            session_timeout: millis(&values, "sessiontimeoutms", DEFAULT_SESSION_TIMEOUT)?,
            max_connections: match values.get("maxconnections") {
                Some(value) => match positive("maxconnections", value)? {
                    n if n > MAX_CONNECTIONS_LIMIT => {
                        return Err(ConfigError::InvalidValue {
                            key: "maxconnections".to_string(),
                            value: value.clone(),
                        })
                    }
                    n => n,
                },
                None => DEFAULT_MAX_CONNECTIONS,
            },
            log_dir: values
                .get("logdir")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            log_level: values
                .get("loglevel")
                .cloned()
                .unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Provider endpoint.
    pub fn rpc_endpoint(&self) -> Endpoint {
        Endpoint::new(self.rpc_server_ip.clone(), self.rpc_server_port)
    }

    /// Coordination service endpoint.
    pub fn registry_endpoint(&self) -> Endpoint {
        Endpoint::new(self.registry_ip.clone(), self.registry_port)
    }
}

fn parse_pairs(text: &str) -> Result<HashMap<String, String>, ConfigError> {
    let mut values = HashMap::new();

    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let malformed = || ConfigError::Malformed {
            line: index + 1,
            content: raw.to_string(),
        };
        let (key, value) = line.split_once('=').ok_or_else(malformed)?;
        let key = key.trim();
        if key.is_empty() {
            return Err(malformed());
        }
        values.insert(key.to_string(), value.trim().to_string());
    }

    Ok(values)
}

fn required<'a>(
    values: &'a HashMap<String, String>,
    key: &'static str,
) -> Result<&'a str, ConfigError> {
    match values.get(key) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(ConfigError::MissingKey(key)),
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn positive(key: &str, value: &str) -> Result<usize, ConfigError> {
    match parse_value::<usize>(key, value)? {
        0 => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
        n => Ok(n),
    }
}

fn millis(
    values: &HashMap<String, String>,
    key: &str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match values.get(key) {
        Some(value) => positive(key, value).map(|ms| Duration::from_millis(ms as u64)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = "\
rpcserverip=127.0.0.1
rpcserverport=8000
zookeeperip=127.0.0.1
zookeeperport=2181
";

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = RpcConfig::parse(MINIMAL).unwrap();

        assert_eq!(config.rpc_endpoint(), Endpoint::new("127.0.0.1", 8000));
        assert_eq!(config.registry_endpoint(), Endpoint::new("127.0.0.1", 2181));
        assert_eq!(config.registry_backend, RegistryBackend::Beacon);
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(config.call_timeout, DEFAULT_CALL_TIMEOUT);
        assert_eq!(config.session_timeout, DEFAULT_SESSION_TIMEOUT);
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(config.log_dir, PathBuf::from("."));
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_comments_whitespace_and_optional_keys() {
        let text = "\
# provider
  rpcserverip = 10.0.0.1

rpcserverport=9000
zookeeperip=zk.local
zookeeperport=2181
registrybackend=ZooKeeper
connecttimeoutms=250
calltimeoutms=1500
sessiontimeoutms=3000
maxconnections=16
logdir=/var/log/beacon
loglevel=beacon_rpc=debug
";
        let config = RpcConfig::parse(text).unwrap();

        assert_eq!(config.rpc_server_ip, "10.0.0.1");
        assert_eq!(config.registry_backend, RegistryBackend::ZooKeeper);
        assert_eq!(config.connect_timeout, Duration::from_millis(250));
        assert_eq!(config.call_timeout, Duration::from_millis(1500));
        assert_eq!(config.session_timeout, Duration::from_secs(3));
        assert_eq!(config.max_connections, 16);
        assert_eq!(config.log_dir, PathBuf::from("/var/log/beacon"));
        assert_eq!(config.log_level, "beacon_rpc=debug");
    }

    #[test]
    fn test_missing_key() {
        let err = RpcConfig::parse("rpcserverip=1.2.3.4\nrpcserverport=1\nzookeeperip=x\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey("zookeeperport")));

        let err = RpcConfig::parse(&MINIMAL.replace("rpcserverip=127.0.0.1", "rpcserverip="))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey("rpcserverip")));
    }

    #[test]
    fn test_malformed_line() {
        let text = format!("{}this line has no separator\n", MINIMAL);
        let err = RpcConfig::parse(&text).unwrap_err();
        match err {
            ConfigError::Malformed { line, content } => {
                assert_eq!(line, 5);
                assert_eq!(content, "this line has no separator");
            }
            other => panic!("unexpected error: {other}"),
        }

        assert!(matches!(
            RpcConfig::parse("=value"),
            Err(ConfigError::Malformed { line: 1, .. })
        ));
    }

    #[test]
    fn test_invalid_values() {
        let bad_port = MINIMAL.replace("8000", "eighty");
        assert!(matches!(
            RpcConfig::parse(&bad_port),
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "rpcserverport"
        ));

        let zero_timeout = format!("{}calltimeoutms=0\n", MINIMAL);
        assert!(matches!(
            RpcConfig::parse(&zero_timeout),
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "calltimeoutms"
        ));

        let zero_connections = format!("{}maxconnections=0\n", MINIMAL);
        assert!(matches!(
            RpcConfig::parse(&zero_connections),
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "maxconnections"
        ));

        let huge_connections = format!("{}maxconnections={}\n", MINIMAL, usize::MAX);
        assert!(matches!(
            RpcConfig::parse(&huge_connections),
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "maxconnections"
        ));

        let at_limit = format!("{}maxconnections={}\n", MINIMAL, MAX_CONNECTIONS_LIMIT);
        assert_eq!(
            RpcConfig::parse(&at_limit).unwrap().max_connections,
            MAX_CONNECTIONS_LIMIT
        );

        let bad_backend = format!("{}registrybackend=etcd\n", MINIMAL);
        assert!(RpcConfig::parse(&bad_backend).is_err());
    }

    #[test]
    fn test_last_value_wins() {
        let text = format!("{}rpcserverport=9001\n", MINIMAL);
        assert_eq!(RpcConfig::parse(&text).unwrap().rpc_server_port, 9001);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = RpcConfig::load(file.path()).unwrap();
        assert_eq!(config.rpc_server_port, 8000);

        let err = RpcConfig::load("/nonexistent/beacon.conf").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("/nonexistent/beacon.conf"));
    }
}
