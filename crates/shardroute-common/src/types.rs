//! Core type definitions for ShardRoute
//!
//! This module defines the fundamental identifier types used throughout the
//! routing tier: shard identities, node addresses, and connection strings.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Well-known identity of the config-server shard.
pub const CONFIG_SERVER_SHARD_ID: &str = "config";

/// Logical identity of a shard
///
/// A `ShardId` is an opaque token. Callers resolving a shard are allowed to
/// pass a replica-set name or a `host:port` string in its place, so no
/// validation is applied on construction.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct ShardId(String);

impl ShardId {
    /// Create a new shard id
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id of the config-server shard
    #[must_use]
    pub fn config_server() -> Self {
        Self(CONFIG_SERVER_SHARD_ID.to_string())
    }

    /// Get the shard id as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this id names the config-server shard
    #[must_use]
    pub fn is_config_server(&self) -> bool {
        self.0 == CONFIG_SERVER_SHARD_ID
    }
}

impl fmt::Debug for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShardId({:?})", self.0)
    }
}

impl From<&str> for ShardId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ShardId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Address of a single node
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[display("{host}:{port}")]
pub struct HostAndPort {
    host: String,
    port: u16,
}

impl HostAndPort {
    /// Create a new host address
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Get the host name
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Get the port
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Debug for HostAndPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostAndPort({}:{})", self.host, self.port)
    }
}

impl FromStr for HostAndPort {
    type Err = HostParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s.rsplit_once(':').ok_or(HostParseError::MissingPort)?;
        if host.is_empty() {
            return Err(HostParseError::EmptyHost);
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| HostParseError::InvalidPort(port.to_string()))?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

/// Errors that can occur when parsing a host address
#[derive(Debug, Clone, thiserror::Error)]
pub enum HostParseError {
    #[error("host address must be of the form host:port")]
    MissingPort,
    #[error("host name cannot be empty")]
    EmptyHost,
    #[error("invalid port: {0}")]
    InvalidPort(String),
}

/// The set of hosts reaching a shard
///
/// Either a replica set (`name/host:port,host:port`) or a standalone host
/// list (`host:port`). The replica-set *name* is the stable identity of the
/// connection string: membership updates replace the host list but never the
/// name.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionString {
    set_name: Option<String>,
    hosts: Vec<HostAndPort>,
}

impl ConnectionString {
    /// Create a replica-set connection string
    #[must_use]
    pub fn replica_set(name: impl Into<String>, hosts: Vec<HostAndPort>) -> Self {
        Self {
            set_name: Some(name.into()),
            hosts,
        }
    }

    /// Create a standalone connection string
    #[must_use]
    pub fn standalone(hosts: Vec<HostAndPort>) -> Self {
        Self {
            set_name: None,
            hosts,
        }
    }

    /// The replica-set name, if this is a replica-set connection string
    #[must_use]
    pub fn set_name(&self) -> Option<&str> {
        self.set_name.as_deref()
    }

    /// The hosts in this connection string
    #[must_use]
    pub fn hosts(&self) -> &[HostAndPort] {
        &self.hosts
    }

    /// Whether this connection string names a replica set
    #[must_use]
    pub fn is_replica_set(&self) -> bool {
        self.set_name.is_some()
    }
}

impl fmt::Display for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.set_name {
            write!(f, "{name}/")?;
        }
        for (i, host) in self.hosts.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{host}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionString({self})")
    }
}

impl FromStr for ConnectionString {
    type Err = ConnectionStringParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (set_name, host_part) = match s.split_once('/') {
            Some((name, rest)) => {
                if name.is_empty() {
                    return Err(ConnectionStringParseError::EmptySetName);
                }
                (Some(name.to_string()), rest)
            }
            None => (None, s),
        };

        if host_part.is_empty() {
            return Err(ConnectionStringParseError::NoHosts);
        }

        let hosts = host_part
            .split(',')
            .map(HostAndPort::from_str)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { set_name, hosts })
    }
}

/// Errors that can occur when parsing a connection string
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectionStringParseError {
    #[error("replica-set name cannot be empty")]
    EmptySetName,
    #[error("connection string must contain at least one host")]
    NoHosts,
    #[error("invalid host: {0}")]
    InvalidHost(#[from] HostParseError),
}
