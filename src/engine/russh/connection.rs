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

//! Transport establishment and session handle management.

use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use russh::client::{self, Handle, Handler};
use russh::keys::PublicKey;
use tracing::debug;

use super::channel::RusshChannel;
use crate::engine::{AuthMethodKind, AuthStatus, Engine, EngineSession, HostKeyVerdict};
use crate::error::{Error, Result};
use crate::known_hosts::KnownHostsStore;

/// Engine implementation backed by russh.
pub struct RusshEngine {
    config: Arc<client::Config>,
}

impl RusshEngine {
    pub fn new() -> Self {
        Self::with_config(client::Config::default())
    }

    /// Use a non-default russh client configuration.
    pub fn with_config(config: client::Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl Default for RusshEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Engine for RusshEngine {
    type Session = RusshSession;

    async fn connect(
        &self,
        host: &str,
        port: u16,
        user: &str,
        connect_timeout: Option<Duration>,
    ) -> Result<RusshSession> {
        debug!(host, port, user, "opening transport");

        let server_key = Arc::new(Mutex::new(None));
        let handler = CapturingHandler {
            server_key: Arc::clone(&server_key),
        };

        let connecting = client::connect(Arc::clone(&self.config), (host, port), handler);
        let handle = match connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, connecting)
                .await
                .map_err(|_| Error::ConnectTimeout {
                    host: host.to_string(),
                    port,
                    timeout,
                })?,
            None => connecting.await,
        }
        .map_err(|e| Error::Connect {
            host: host.to_string(),
            port,
            message: e.to_string(),
        })?;

        Ok(RusshSession {
            handle,
            host: host.to_string(),
            port,
            user: user.to_string(),
            server_key,
            offered: Vec::new(),
        })
    }
}

/// One russh transport connection. Connected on construction; verified and
/// authenticated by the session lifecycle.
pub struct RusshSession {
    pub(super) handle: Handle<CapturingHandler>,
    pub(super) host: String,
    pub(super) port: u16,
    pub(super) user: String,
    server_key: Arc<Mutex<Option<PublicKey>>>,
    /// Methods the server offered in its last userauth failure.
    pub(super) offered: Vec<AuthMethodKind>,
}

impl RusshSession {
    /// The host key the server presented during the handshake.
    fn server_key(&self) -> Result<PublicKey> {
        self.server_key.lock().clone().ok_or_else(|| Error::Connect {
            host: self.host.clone(),
            port: self.port,
            message: "server presented no host key".to_string(),
        })
    }

    fn store(&self, known_hosts: Option<&Path>) -> KnownHostsStore {
        KnownHostsStore::new(known_hosts.map(Path::to_path_buf))
    }
}

#[async_trait]
impl EngineSession for RusshSession {
    type Channel = RusshChannel;

    fn classify_host_key(&self, known_hosts: Option<&Path>) -> Result<HostKeyVerdict> {
        let key = self.server_key()?;
        self.store(known_hosts).classify(&self.host, self.port, &key)
    }

    fn trust_host_key(&self, known_hosts: Option<&Path>) -> Result<()> {
        let key = self.server_key()?;
        self.store(known_hosts).trust(&self.host, self.port, &key)
    }

    async fn userauth_none(&mut self) -> Result<AuthStatus> {
        self.auth_none().await
    }

    fn userauth_list(&self) -> Vec<AuthMethodKind> {
        self.offered.clone()
    }

    async fn userauth_publickey(&mut self, identity: &Path) -> Result<AuthStatus> {
        self.auth_publickey(identity).await
    }

    async fn userauth_password(&mut self, password: &str) -> Result<AuthStatus> {
        self.auth_password(password).await
    }

    async fn open_channel(&mut self) -> Result<RusshChannel> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| Error::ChannelOpen(e.to_string()))?;
        Ok(RusshChannel::new(channel))
    }

    fn is_connected(&self) -> bool {
        !self.handle.is_closed()
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.handle
            .disconnect(russh::Disconnect::ByApplication, "", "")
            .await
            .map_err(Error::Ssh)
    }

    async fn upload_file(
        &mut self,
        local: &Path,
        remote_path: &str,
        mode: Option<u32>,
    ) -> Result<()> {
        self.sftp_upload(local, remote_path, mode).await
    }

    async fn download_file(&mut self, remote_path: &str, local: &Path) -> Result<()> {
        self.sftp_download(remote_path, local).await
    }
}

impl Debug for RusshSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RusshSession")
            .field("user", &self.user)
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}

/// Client handler that records the server's host key during the handshake.
///
/// The handshake itself always proceeds; the known-hosts verdict is applied
/// by the session lifecycle *after* connect, which is what lets the policy
/// distinguish unknown from changed keys and append on trust.
#[derive(Clone)]
pub struct CapturingHandler {
    server_key: Arc<Mutex<Option<PublicKey>>>,
}

impl Handler for CapturingHandler {
    type Error = Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        *self.server_key.lock() = Some(server_public_key.clone());
        Ok(true)
    }
}
