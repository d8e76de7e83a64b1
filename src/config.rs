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

//! Recognized configuration surface: per-target SSH options, per-command
//! execution options and pool sizing.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::time::Duration;

use zeroize::Zeroizing;

use crate::known_hosts::StrictHostKeyChecking;

/// Where client configuration overrides come from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum ConfigSource {
    /// Read the user's default `~/.ssh/config`.
    #[default]
    Default,
    /// Do not read any ssh_config file.
    Disabled,
    /// Read a specific file.
    Path(PathBuf),
}

/// Connection options for one target.
///
/// Together with the target's host, port and user these uniquely identify a
/// pool slot; see [`fingerprint`](SshOptions::fingerprint).
#[derive(Debug, Clone, Default)]
pub struct SshOptions {
    /// Username override when the target string carries none.
    pub user: Option<String>,
    /// Port override when the target string carries none.
    pub port: Option<u16>,
    /// Candidate identity files, tried in order. When empty, the default
    /// `~/.ssh` keys are tried instead.
    pub keys: Vec<PathBuf>,
    /// ssh_config handling.
    pub config: ConfigSource,
    /// known_hosts file override; `None` means `~/.ssh/known_hosts`.
    pub known_hosts: Option<PathBuf>,
    /// Host key checking policy.
    pub strict_host_key_check: StrictHostKeyChecking,
    /// Password for password authentication. Password auth is only
    /// attempted when this is set.
    pub password: Option<Zeroizing<String>>,
}

impl SshOptions {
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_key(mut self, key: impl Into<PathBuf>) -> Self {
        self.keys.push(key.into());
        self
    }

    pub fn with_config(mut self, config: ConfigSource) -> Self {
        self.config = config;
        self
    }

    pub fn with_known_hosts(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts = Some(path.into());
        self
    }

    pub fn with_strict_host_key_check(mut self, mode: StrictHostKeyChecking) -> Self {
        self.strict_host_key_check = mode;
        self
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.password = Some(Zeroizing::new(password.to_string()));
        self
    }

    /// Hash of every option that affects what an established session looks
    /// like. Sessions are only shared between checkouts whose options agree.
    ///
    /// The password is deliberately excluded: it does not change the
    /// identity of the resulting session, and secrets stay out of cache
    /// keys.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.keys.hash(&mut hasher);
        self.config.hash(&mut hasher);
        self.known_hosts.hash(&mut hasher);
        self.strict_host_key_check.hash(&mut hasher);
        hasher.finish()
    }
}

/// Per-command execution options.
#[derive(Debug, Clone, Default)]
pub struct ExecConfig {
    /// Allocate a pseudo-terminal before the exec request.
    pub pty: bool,
    /// Bound on transport establishment. `None` leaves it to the engine.
    pub connect_timeout: Option<Duration>,
    /// Overall bound on one command's execution. `None` means unlimited;
    /// orchestrators normally impose their own deadline here.
    pub command_timeout: Option<Duration>,
}

impl ExecConfig {
    pub fn with_pty(mut self, pty: bool) -> Self {
        self.pty = pty;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }
}

/// Pool sizing.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum live sessions (idle + checked out + establishing) per pool
    /// key. At the default of 1 the pool guarantees a single authenticated
    /// session per target and serializes callers on it.
    pub max_sessions_per_target: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_sessions_per_target: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_stable_across_password() {
        let base = SshOptions::default().with_key("/tmp/id_ed25519");
        let with_password = base.clone().with_password("hunter2");
        assert_eq!(base.fingerprint(), with_password.fingerprint());
    }

    #[test]
    fn test_fingerprint_differs_on_keys() {
        let a = SshOptions::default().with_key("/tmp/id_ed25519");
        let b = SshOptions::default().with_key("/tmp/id_rsa");
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_differs_on_strict_mode() {
        let a = SshOptions::default().with_strict_host_key_check(StrictHostKeyChecking::Yes);
        let b = SshOptions::default().with_strict_host_key_check(StrictHostKeyChecking::No);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_builder_chain() {
        let opts = SshOptions::default()
            .with_user("deploy")
            .with_port(2222)
            .with_config(ConfigSource::Disabled);
        assert_eq!(opts.user.as_deref(), Some("deploy"));
        assert_eq!(opts.port, Some(2222));
        assert_eq!(opts.config, ConfigSource::Disabled);
    }
}
