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

//! The SSH engine seam.
//!
//! The pool, the session lifecycle and the channel multiplexer consume the
//! transport exclusively through these traits. The production implementation
//! lives in [`russh`](crate::engine::russh) and is powered by the russh crate;
//! tests drive the same code paths with a scripted in-memory engine.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub mod russh;

/// Which of a channel's two byte streams an operation addresses.
///
/// Used uniformly by poll, read and sink dispatch instead of a bare
/// is-stderr flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    pub(crate) fn index(self) -> usize {
        match self {
            StreamKind::Stdout => 0,
            StreamKind::Stderr => 1,
        }
    }
}

/// Outcome of a bounded-wait poll on one channel stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    /// At least this many bytes are buffered and readable right now.
    Ready(usize),
    /// Nothing arrived within the timeout; the stream is still open.
    Pending,
    /// The stream has reached end-of-file and is fully drained.
    Eof,
}

/// Outcome of a single authentication attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    Success,
    /// The server rejected the attempt; other methods may still succeed.
    Denied,
    /// The server accepted this step but requires another method.
    Partial,
}

/// Authentication methods a server can offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethodKind {
    None,
    Password,
    PublicKey,
    HostBased,
    KeyboardInteractive,
}

/// Result of comparing the server's presented host key against the
/// known-hosts store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKeyVerdict {
    /// The key matches a stored entry for this host.
    VerifiedOk,
    /// No entry exists for this host.
    Unknown,
    /// An entry exists but the key differs. Security-relevant: this is the
    /// impersonation/MITM signal.
    Changed,
    /// The known-hosts file itself does not exist.
    FileAbsent,
}

impl fmt::Display for HostKeyVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HostKeyVerdict::VerifiedOk => "key verified",
            HostKeyVerdict::Unknown => "host is unknown",
            HostKeyVerdict::Changed => "host key has changed",
            HostKeyVerdict::FileAbsent => "known_hosts file is absent",
        };
        f.write_str(s)
    }
}

/// Factory for transport connections.
#[async_trait]
pub trait Engine: Send + Sync + 'static {
    type Session: EngineSession;

    /// Open the transport to `host:port` for `user`, bounded by
    /// `connect_timeout` when given. The returned session is connected but
    /// neither verified nor authenticated.
    async fn connect(
        &self,
        host: &str,
        port: u16,
        user: &str,
        connect_timeout: Option<Duration>,
    ) -> Result<Self::Session>;
}

/// One transport connection to a remote host.
///
/// Mirrors the primitives of the wrapped SSH engine: host-key
/// classification and trust, the none/publickey/password userauth calls,
/// channel opening and file transfer.
#[async_trait]
pub trait EngineSession: Send + 'static {
    type Channel: EngineChannel;

    /// Classify the server's presented host key against the known-hosts
    /// store at `known_hosts` (or the default `~/.ssh/known_hosts`).
    fn classify_host_key(&self, known_hosts: Option<&Path>) -> Result<HostKeyVerdict>;

    /// Durably append the server's presented key to the known-hosts store.
    fn trust_host_key(&self, known_hosts: Option<&Path>) -> Result<()>;

    /// Probe with the "none" method. Besides occasionally succeeding on
    /// open servers, this populates the offered-method list.
    async fn userauth_none(&mut self) -> Result<AuthStatus>;

    /// Authentication methods the server offered in its last failure
    /// response. Empty until a probe has been made.
    fn userauth_list(&self) -> Vec<AuthMethodKind>;

    /// Attempt public-key authentication with one identity file.
    async fn userauth_publickey(&mut self, identity: &Path) -> Result<AuthStatus>;

    /// Attempt password authentication.
    async fn userauth_password(&mut self, password: &str) -> Result<AuthStatus>;

    /// Open a session channel for one remote command. Only valid on an
    /// authenticated session.
    async fn open_channel(&mut self) -> Result<Self::Channel>;

    /// Whether the transport is still usable.
    fn is_connected(&self) -> bool;

    async fn disconnect(&mut self) -> Result<()>;

    /// Upload one local file to `remote_path`, optionally applying `mode`
    /// as the remote permission bits.
    async fn upload_file(&mut self, local: &Path, remote_path: &str, mode: Option<u32>)
        -> Result<()>;

    /// Download one remote file to `local`.
    async fn download_file(&mut self, remote_path: &str, local: &Path) -> Result<()>;
}

/// One exec channel within a session.
#[async_trait]
pub trait EngineChannel: Send + 'static {
    /// Allocate a pseudo-terminal. Must precede the exec request.
    async fn request_pty(&mut self, term: &str, col_width: u32, row_height: u32) -> Result<()>;

    /// Send the exec request for `command`.
    async fn request_exec(&mut self, command: &str) -> Result<()>;

    /// Wait up to `timeout` for data on `stream`.
    ///
    /// `Eof` is only reported once the stream is both finished and fully
    /// drained, so a `Ready` can still follow a remote close.
    async fn poll(&mut self, stream: StreamKind, timeout: Duration) -> Result<PollStatus>;

    /// Drain up to `max` buffered bytes from `stream` without blocking.
    /// Returns an empty vec when nothing is buffered.
    fn read(&mut self, stream: StreamKind, max: usize) -> Vec<u8>;

    /// Whether end-of-file has been observed on the channel.
    fn is_eof(&self) -> bool;

    /// The remote exit status, if the remote end has reported one yet.
    fn exit_status(&self) -> Option<u32>;

    async fn close(&mut self) -> Result<()>;
}
