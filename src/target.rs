// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fmt;

use crate::config::SshOptions;
use crate::error::{Error, Result};

/// One remote endpoint a session can be established to, plus its connection
/// options. Immutable once built; sessions derived from it are pooled under
/// [`PoolKey`].
#[derive(Debug, Clone)]
pub struct Target {
    pub host: String,
    /// Port from the target string; falls back to the options, then 22.
    pub port: Option<u16>,
    /// User from the target string; falls back to the options, then the
    /// local username.
    pub user: Option<String>,
    pub options: SshOptions,
}

/// Identity of a pool slot: endpoint plus an options fingerprint, so that
/// targets with differing keys, config or policy never share sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub host: String,
    pub port: u16,
    pub user: String,
    options: u64,
}

impl Target {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            user: None,
            options: SshOptions::default(),
        }
    }

    pub fn parse(target_str: &str) -> Result<Self> {
        // Accepted formats:
        // - host
        // - host:port
        // - user@host
        // - user@host:port

        let (user_part, host_part) = if let Some(at_pos) = target_str.find('@') {
            (Some(&target_str[..at_pos]), &target_str[at_pos + 1..])
        } else {
            (None, target_str)
        };

        let (host, port) = if let Some(colon_pos) = host_part.rfind(':') {
            let host = &host_part[..colon_pos];
            let port_str = &host_part[colon_pos + 1..];
            let port = port_str.parse::<u16>().map_err(|_| Error::Connect {
                host: host.to_string(),
                port: 0,
                message: format!("invalid port number '{port_str}'"),
            })?;
            (host, Some(port))
        } else {
            (host_part, None)
        };

        if host.is_empty() {
            return Err(Error::Connect {
                host: String::new(),
                port: 0,
                message: "empty hostname".to_string(),
            });
        }

        Ok(Target {
            host: host.to_string(),
            port,
            user: user_part.map(|s| s.to_string()),
            options: SshOptions::default(),
        })
    }

    pub fn with_options(mut self, options: SshOptions) -> Self {
        self.options = options;
        self
    }

    /// Effective port before ssh_config resolution.
    pub fn port(&self) -> u16 {
        self.port.or(self.options.port).unwrap_or(22)
    }

    /// Effective username before ssh_config resolution.
    pub fn user(&self) -> String {
        self.user
            .clone()
            .or_else(|| self.options.user.clone())
            .unwrap_or_else(|| {
                std::env::var("USER")
                    .or_else(|_| std::env::var("USERNAME"))
                    .unwrap_or_else(|_| "root".to_string())
            })
    }

    pub fn pool_key(&self) -> PoolKey {
        PoolKey {
            host: self.host.clone(),
            port: self.port(),
            user: self.user(),
            options: self.options.fingerprint(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user(), self.host, self.port())
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_only() {
        let target = Target::parse("example.com").unwrap();
        assert_eq!(target.host, "example.com");
        assert_eq!(target.port(), 22);
    }

    #[test]
    fn test_parse_host_with_port() {
        let target = Target::parse("example.com:2222").unwrap();
        assert_eq!(target.host, "example.com");
        assert_eq!(target.port(), 2222);
    }

    #[test]
    fn test_parse_user_and_host() {
        let target = Target::parse("admin@example.com").unwrap();
        assert_eq!(target.user.as_deref(), Some("admin"));
        assert_eq!(target.host, "example.com");
        assert_eq!(target.port(), 22);
    }

    #[test]
    fn test_parse_full_format() {
        let target = Target::parse("admin@example.com:2222").unwrap();
        assert_eq!(target.user.as_deref(), Some("admin"));
        assert_eq!(target.host, "example.com");
        assert_eq!(target.port(), 2222);
    }

    #[test]
    fn test_parse_invalid_port() {
        assert!(Target::parse("example.com:http").is_err());
    }

    #[test]
    fn test_parse_empty_host() {
        assert!(Target::parse("admin@:22").is_err());
    }

    #[test]
    fn test_options_supply_defaults() {
        let target = Target::parse("example.com")
            .unwrap()
            .with_options(SshOptions::default().with_user("deploy").with_port(2200));
        assert_eq!(target.user(), "deploy");
        assert_eq!(target.port(), 2200);

        // The target string always wins over the options.
        let target = Target::parse("admin@example.com:22")
            .unwrap()
            .with_options(SshOptions::default().with_user("deploy").with_port(2200));
        assert_eq!(target.user(), "admin");
        assert_eq!(target.port(), 22);
    }

    #[test]
    fn test_pool_key_separates_options() {
        let a = Target::parse("example.com").unwrap();
        let b = Target::parse("example.com")
            .unwrap()
            .with_options(SshOptions::default().with_key("/tmp/id_rsa"));
        assert_ne!(a.pool_key(), b.pool_key());

        let c = Target::parse("example.com").unwrap();
        assert_eq!(a.pool_key(), c.pool_key());
    }
}
