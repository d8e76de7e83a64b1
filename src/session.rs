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

//! Session lifecycle: connect, verify the host key, authenticate.
//!
//! [`establish`] runs the full sequence on every call and caches nothing;
//! avoiding repeat work is the pool's job. A [`Session`] is authenticated by
//! construction, which is what makes "channels only on authenticated
//! sessions" hold without runtime state checks.

use std::path::PathBuf;

use tracing::{debug, info, trace, warn};
use zeroize::Zeroizing;

use crate::channel::RemoteCommand;
use crate::config::ExecConfig;
use crate::engine::{AuthMethodKind, AuthStatus, Engine, EngineChannel, EngineSession, StreamKind};
use crate::error::{Error, Result};
use crate::known_hosts::{HostKeyAction, StrictHostKeyChecking};
use crate::ssh_config;
use crate::target::Target;

/// A target after ssh_config resolution: the endpoint actually connected
/// to, the identity candidates in trial order, and the trust policy.
#[derive(Debug)]
pub(crate) struct ResolvedTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub identities: Vec<PathBuf>,
    pub known_hosts: Option<PathBuf>,
    pub strict: StrictHostKeyChecking,
    pub password: Option<Zeroizing<String>>,
}

/// Apply ssh_config overrides and assemble the identity list.
///
/// Precedence: values carried by the target itself, then its options, then
/// the config file, then defaults. Identities keep their declaration order:
/// explicit keys, config-contributed keys, then whichever default
/// `~/.ssh` keys exist.
pub(crate) fn resolve(target: &Target) -> Result<ResolvedTarget> {
    let overrides = ssh_config::resolve(&target.options.config, &target.host)?;

    let host = overrides
        .host_name
        .clone()
        .unwrap_or_else(|| target.host.clone());
    let port = target
        .port
        .or(target.options.port)
        .or(overrides.port)
        .unwrap_or(22);
    let user = target
        .user
        .clone()
        .or_else(|| target.options.user.clone())
        .or_else(|| overrides.user.clone())
        .unwrap_or_else(|| {
            std::env::var("USER")
                .or_else(|_| std::env::var("USERNAME"))
                .unwrap_or_else(|_| "root".to_string())
        });

    let mut identities: Vec<PathBuf> = Vec::new();
    for key in &target.options.keys {
        let expanded = ssh_config::expand_identity_path(&key.to_string_lossy());
        if !identities.contains(&expanded) {
            identities.push(expanded);
        }
    }
    for key in overrides.identity_files {
        if !identities.contains(&key) {
            identities.push(key);
        }
    }
    for key in default_identities() {
        if !identities.contains(&key) {
            identities.push(key);
        }
    }

    Ok(ResolvedTarget {
        host,
        port,
        user,
        identities,
        known_hosts: target.options.known_hosts.clone(),
        strict: target.options.strict_host_key_check,
        password: target.options.password.clone(),
    })
}

/// Default key files, in order of preference, filtered to what exists.
fn default_identities() -> Vec<PathBuf> {
    let Some(dirs) = directories::BaseDirs::new() else {
        return Vec::new();
    };
    let ssh_dir = dirs.home_dir().join(".ssh");
    ["id_ed25519", "id_rsa", "id_ecdsa"]
        .iter()
        .map(|name| ssh_dir.join(name))
        .filter(|path| path.exists())
        .collect()
}

/// Establish one authenticated session to `target`.
///
/// Every failure point surfaces its own error kind: the transport
/// (`Connect`), the host-key policy (`HostKey`), authentication
/// (`AuthExhausted`). On any of them the partially-opened transport is
/// closed and nothing else is kept.
pub async fn establish<E: Engine>(
    engine: &E,
    target: &Target,
    exec: &ExecConfig,
) -> Result<Session<E::Session>> {
    let resolved = resolve(target)?;
    debug!(
        host = %resolved.host,
        port = resolved.port,
        user = %resolved.user,
        "establishing session"
    );

    let mut inner = engine
        .connect(
            &resolved.host,
            resolved.port,
            &resolved.user,
            exec.connect_timeout,
        )
        .await?;

    let prepared = match verify_host_key(&inner, &resolved) {
        Ok(()) => authenticate(&mut inner, &resolved).await,
        Err(err) => Err(err),
    };

    if let Err(err) = prepared {
        let _ = inner.disconnect().await;
        return Err(err);
    }

    info!(host = %resolved.host, user = %resolved.user, "session established");
    Ok(Session {
        inner,
        target: target.clone(),
    })
}

fn verify_host_key<S: EngineSession>(session: &S, resolved: &ResolvedTarget) -> Result<()> {
    let verdict = session.classify_host_key(resolved.known_hosts.as_deref())?;
    trace!(?verdict, host = %resolved.host, "host key classified");
    match resolved.strict.decide(verdict) {
        HostKeyAction::Proceed => Ok(()),
        HostKeyAction::TrustAndProceed => {
            debug!(host = %resolved.host, "recording host key");
            session.trust_host_key(resolved.known_hosts.as_deref())
        }
        HostKeyAction::Reject => Err(Error::HostKey {
            host: resolved.host.clone(),
            verdict,
        }),
    }
}

/// Fixed-preference authentication: none probe, public key per identity,
/// then password if one was supplied.
///
/// A method the server does not offer is skipped entirely; an identity the
/// server rejects or that cannot be loaded moves on to the next; running
/// out of candidates is the only fatal case.
async fn authenticate<S: EngineSession>(session: &mut S, resolved: &ResolvedTarget) -> Result<()> {
    if let AuthStatus::Success = session.userauth_none().await? {
        debug!(user = %resolved.user, "server accepted none authentication");
        return Ok(());
    }

    let offered = session.userauth_list();
    trace!(?offered, "authentication methods offered");

    if offered.is_empty() || offered.contains(&AuthMethodKind::PublicKey) {
        for identity in &resolved.identities {
            match session.userauth_publickey(identity).await {
                Ok(AuthStatus::Success) => {
                    debug!(?identity, "public key accepted");
                    return Ok(());
                }
                Ok(_) => trace!(?identity, "public key rejected"),
                Err(err @ Error::Identity { .. }) => warn!(%err, "skipping identity"),
                Err(err) => return Err(err),
            }
        }
    } else {
        trace!("publickey not offered by server");
    }

    if let Some(password) = &resolved.password {
        let offered = session.userauth_list();
        if offered.is_empty() || offered.contains(&AuthMethodKind::Password) {
            if let AuthStatus::Success = session.userauth_password(password).await? {
                debug!(user = %resolved.user, "password accepted");
                return Ok(());
            }
        } else {
            trace!("password not offered by server");
        }
    }

    Err(Error::AuthExhausted {
        user: resolved.user.clone(),
        host: resolved.host.clone(),
    })
}

/// One authenticated session.
pub struct Session<S: EngineSession> {
    inner: S,
    target: Target,
}

impl<S: EngineSession> std::fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("target", &self.target)
            .finish()
    }
}

impl<S: EngineSession> Session<S> {
    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    /// Execute `command`, delivering output chunks to `sink` as they
    /// arrive. Returns the remote exit status.
    pub async fn run<F>(&mut self, command: &str, exec: &ExecConfig, sink: F) -> Result<u32>
    where
        F: FnMut(StreamKind, &[u8]) + Send,
    {
        match exec.command_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.run_inner(command, exec, sink))
                .await
                .map_err(|_| Error::CommandTimeout(timeout))?,
            None => self.run_inner(command, exec, sink).await,
        }
    }

    async fn run_inner<F>(&mut self, command: &str, exec: &ExecConfig, sink: F) -> Result<u32>
    where
        F: FnMut(StreamKind, &[u8]) + Send,
    {
        debug!(remote = %self.target, command, "executing remote command");
        let channel = self.inner.open_channel().await?;
        let mut cmd = RemoteCommand::new(channel);
        let outcome = drive(&mut cmd, command, exec, sink).await;
        // The channel closes on success, error and early return alike.
        if let Err(err) = cmd.close().await {
            trace!(%err, "channel close failed");
        }
        outcome
    }

    pub async fn upload_file(
        &mut self,
        local: &std::path::Path,
        remote_path: &str,
        mode: Option<u32>,
    ) -> Result<()> {
        self.inner.upload_file(local, remote_path, mode).await
    }

    pub async fn download_file(&mut self, remote_path: &str, local: &std::path::Path) -> Result<()> {
        self.inner.download_file(remote_path, local).await
    }

    /// Tear the transport down. Errors are only traced; a session being
    /// disposed of has nothing left to fail.
    pub async fn disconnect(mut self) {
        if let Err(err) = self.inner.disconnect().await {
            trace!(%err, remote = %self.target, "disconnect failed");
        }
    }
}

async fn drive<C, F>(
    cmd: &mut RemoteCommand<C>,
    command: &str,
    exec: &ExecConfig,
    sink: F,
) -> Result<u32>
where
    C: EngineChannel,
    F: FnMut(StreamKind, &[u8]) + Send,
{
    if exec.pty {
        cmd.request_pty().await?;
    }
    cmd.request_exec(command).await?;
    cmd.stream(sink).await?;
    cmd.exit_status()
}
