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

//! Error types for session establishment, pooling and channel I/O.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::engine::HostKeyVerdict;

/// Errors surfaced by the pool, the session lifecycle and the channel loop.
///
/// A non-zero remote exit status is *not* an error; it is reported through
/// the exit status returned by `run`.
#[derive(Debug, Error)]
pub enum Error {
    /// The transport to the remote host could not be established.
    #[error("failed to connect to {host}:{port}: {message}")]
    Connect {
        host: String,
        port: u16,
        message: String,
    },

    /// Connecting took longer than the configured connect timeout.
    #[error("connection to {host}:{port} timed out after {timeout:?}")]
    ConnectTimeout {
        host: String,
        port: u16,
        timeout: Duration,
    },

    /// The server host key was rejected under the active checking policy.
    #[error("host key verification failed for {host}: {verdict}")]
    HostKey { host: String, verdict: HostKeyVerdict },

    /// Every applicable authentication method was tried and rejected.
    #[error("authentication failed for {user}@{host}: all methods exhausted")]
    AuthExhausted { user: String, host: String },

    /// An identity file could not be loaded; the lifecycle skips it and
    /// moves on to the next candidate.
    #[error("unusable identity file {path:?}: {message}")]
    Identity { path: PathBuf, message: String },

    /// Opening a session channel was refused by the server.
    #[error("failed to open channel: {0}")]
    ChannelOpen(String),

    /// The exec request for a command was rejected.
    #[error("exec request rejected: {0}")]
    ExecRejected(String),

    /// A channel operation was attempted in the wrong state.
    #[error("channel is {actual} (expected {expected})")]
    ChannelState {
        expected: &'static str,
        actual: &'static str,
    },

    /// A poll or read failed while draining command output.
    #[error("channel read failed: {0}")]
    ChannelRead(String),

    /// The exit status was requested before the channel reached end-of-file.
    #[error("exit status is not available before end-of-file")]
    ExitStatusUnavailable,

    /// The channel closed without the remote end ever reporting an exit
    /// status.
    #[error("channel closed before reporting an exit status")]
    MissingExitStatus,

    /// The command did not complete within the configured command timeout.
    #[error("command did not complete within {0:?}")]
    CommandTimeout(Duration),

    /// The pool has been shut down; no further sessions are handed out.
    #[error("session pool is shut down")]
    PoolClosed,

    /// The known_hosts store could not be read or written.
    #[error("known_hosts file {path:?}: {message}")]
    KnownHosts { path: PathBuf, message: String },

    /// An ssh_config file could not be read or parsed.
    #[error("ssh config {path:?}: {message}")]
    SshConfig { path: PathBuf, message: String },

    /// Transport-level error from the underlying SSH engine.
    #[error("ssh transport error: {0}")]
    Ssh(#[from] russh::Error),

    /// SFTP subsystem error during a file transfer.
    #[error("sftp error: {0}")]
    Sftp(#[from] russh_sftp::client::error::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Coarse classification of an [`Error`], matching the failure taxonomy the
/// pool and its callers dispatch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connect,
    HostKey,
    Auth,
    Channel,
    Pool,
    Config,
    Other,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Connect { .. } | Error::ConnectTimeout { .. } | Error::Ssh(_) => {
                ErrorKind::Connect
            }
            Error::HostKey { .. } => ErrorKind::HostKey,
            Error::AuthExhausted { .. } | Error::Identity { .. } => ErrorKind::Auth,
            Error::ChannelOpen(_)
            | Error::ExecRejected(_)
            | Error::ChannelState { .. }
            | Error::ChannelRead(_)
            | Error::ExitStatusUnavailable
            | Error::MissingExitStatus
            | Error::CommandTimeout(_)
            | Error::Sftp(_) => ErrorKind::Channel,
            Error::PoolClosed => ErrorKind::Pool,
            Error::KnownHosts { .. } | Error::SshConfig { .. } => ErrorKind::Config,
            Error::Io(_) => ErrorKind::Other,
        }
    }
}

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
