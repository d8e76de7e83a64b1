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

//! Host identity and known-hosts policy.
//!
//! [`KnownHostsStore`] classifies a server's presented public key against an
//! OpenSSH-format known_hosts file and appends entries on trust.
//! [`StrictHostKeyChecking`] decides what each verdict means for the
//! connection attempt. The store re-reads the file on every classification:
//! establishment is rare, and other processes append to the same file.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use directories::BaseDirs;
use russh::keys::{PublicKey, PublicKeyBase64};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::engine::HostKeyVerdict;
use crate::error::{Error, Result};

/// Mode for host key checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StrictHostKeyChecking {
    /// Only a verified key may proceed (fail on unknown/changed/absent).
    #[default]
    Yes,
    /// Accept every key and record it in the store.
    No,
    /// Trust unknown hosts on first use, but fail on changed keys.
    AcceptNew,
}

/// What the policy says to do with a classified host key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKeyAction {
    Proceed,
    /// Append the presented key to the store, then proceed.
    TrustAndProceed,
    Reject,
}

impl StrictHostKeyChecking {
    /// Apply this policy to a verdict.
    ///
    /// The component never decides trust on its own beyond what the mode
    /// spells out: `Yes` admits only verified keys, `AcceptNew` additionally
    /// admits (and records) first contact, `No` admits everything and keeps
    /// the store up to date.
    pub fn decide(self, verdict: HostKeyVerdict) -> HostKeyAction {
        match (self, verdict) {
            (_, HostKeyVerdict::VerifiedOk) => HostKeyAction::Proceed,
            (StrictHostKeyChecking::Yes, _) => HostKeyAction::Reject,
            (StrictHostKeyChecking::AcceptNew, HostKeyVerdict::Changed) => HostKeyAction::Reject,
            (StrictHostKeyChecking::AcceptNew, _) => HostKeyAction::TrustAndProceed,
            (StrictHostKeyChecking::No, _) => HostKeyAction::TrustAndProceed,
        }
    }

    /// Map from the boolean configuration surface.
    pub fn from_bool(strict: bool) -> Self {
        if strict {
            Self::Yes
        } else {
            Self::No
        }
    }
}

impl FromStr for StrictHostKeyChecking {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "yes" | "true" => Self::Yes,
            "no" | "false" => Self::No,
            "accept-new" | "tofu" => Self::AcceptNew,
            _ => Self::Yes,
        })
    }
}

/// Get the default known_hosts file path.
pub fn default_known_hosts_path() -> Option<PathBuf> {
    BaseDirs::new().map(|dirs| dirs.home_dir().join(".ssh").join("known_hosts"))
}

/// An OpenSSH-format known_hosts store.
pub struct KnownHostsStore {
    path: PathBuf,
}

/// Entry parsed from one known_hosts line: (key type, base64 key).
struct HostKeyEntry {
    key_type: String,
    key_data: String,
}

impl KnownHostsStore {
    /// Open the store at `path`, or the default `~/.ssh/known_hosts`.
    pub fn new(path: Option<PathBuf>) -> Self {
        let path = path
            .or_else(default_known_hosts_path)
            .unwrap_or_else(|| PathBuf::from("~/.ssh/known_hosts"));
        Self { path }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Classify `key` as presented by `host:port` against the store.
    pub fn classify(&self, host: &str, port: u16, key: &PublicKey) -> Result<HostKeyVerdict> {
        if !self.path.exists() {
            debug!(path = ?self.path, "known_hosts file absent");
            return Ok(HostKeyVerdict::FileAbsent);
        }

        let lookup_key = Self::lookup_name(host, port);
        let presented_type = key.algorithm().as_str().to_string();
        let presented_data = BASE64.encode(key.public_key_bytes());

        let mut known_for_host = false;
        for entry in self.entries_for(&lookup_key, host)? {
            if entry.key_type != presented_type {
                known_for_host = true;
                continue;
            }
            if entry.key_data == presented_data {
                debug!(host = %lookup_key, key_type = %presented_type, "host key verified");
                return Ok(HostKeyVerdict::VerifiedOk);
            }
            warn!(
                host = %lookup_key,
                expected = %fingerprint_b64(&entry.key_data),
                presented = %fingerprint(key),
                "host key changed"
            );
            return Ok(HostKeyVerdict::Changed);
        }

        if known_for_host {
            // Host present with another key type only; first contact for
            // this algorithm.
            debug!(host = %lookup_key, key_type = %presented_type, "no key of this type stored");
        }
        Ok(HostKeyVerdict::Unknown)
    }

    /// Durably append the presented key for `host:port`.
    ///
    /// Plain append, safe against concurrent writers in the
    /// last-writer-wins sense; parent directories and the file itself are
    /// created as needed.
    pub fn trust(&self, host: &str, port: u16, key: &PublicKey) -> Result<()> {
        let lookup_key = Self::lookup_name(host, port);
        let key_type = key.algorithm().as_str().to_string();
        let key_data = BASE64.encode(key.public_key_bytes());

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.store_error(e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.store_error(e))?;
        writeln!(file, "{lookup_key} {key_type} {key_data}").map_err(|e| self.store_error(e))?;

        debug!(host = %lookup_key, key_type = %key_type, path = ?self.path, "recorded host key");
        Ok(())
    }

    fn store_error(&self, err: std::io::Error) -> Error {
        Error::KnownHosts {
            path: self.path.clone(),
            message: err.to_string(),
        }
    }

    /// Entries matching either the ported lookup name or the bare hostname.
    fn entries_for(&self, lookup_key: &str, host: &str) -> Result<Vec<HostKeyEntry>> {
        let content = fs::read_to_string(&self.path).map_err(|e| self.store_error(e))?;
        let host_only = host.to_lowercase();
        let mut entries = Vec::new();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            // hostname[,alias] keytype base64key [comment]
            let mut parts = line.split_whitespace();
            let (Some(hostnames), Some(key_type), Some(key_data)) =
                (parts.next(), parts.next(), parts.next())
            else {
                continue;
            };
            let matches = hostnames.split(',').any(|name| {
                // Hashed entries (|1|...) are not matchable without the salt.
                if name.starts_with('|') {
                    return false;
                }
                let name = name.to_lowercase();
                // A bracketed entry is bound to its port; a bare entry
                // matches the host on any port.
                if name.starts_with('[') {
                    name == lookup_key
                } else {
                    name == host_only
                }
            });
            if matches {
                entries.push(HostKeyEntry {
                    key_type: key_type.to_string(),
                    key_data: key_data.to_string(),
                });
            }
        }
        Ok(entries)
    }

    /// Lookup name as written in known_hosts: bare for port 22,
    /// `[host]:port` otherwise.
    fn lookup_name(host: &str, port: u16) -> String {
        let host = host.to_lowercase();
        if port == 22 {
            host
        } else {
            format!("[{host}]:{port}")
        }
    }
}

/// SHA256 fingerprint of a public key, in the OpenSSH presentation format.
pub fn fingerprint(key: &PublicKey) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.public_key_bytes());
    let hash = hasher.finalize();
    format!("SHA256:{}", BASE64.encode(hash).trim_end_matches('='))
}

fn fingerprint_b64(stored_b64: &str) -> String {
    match BASE64.decode(stored_b64) {
        Ok(bytes) => {
            let mut hasher = Sha256::new();
            hasher.update(&bytes);
            let hash = hasher.finalize();
            format!("SHA256:{}", BASE64.encode(hash).trim_end_matches('='))
        }
        Err(_) => "unknown".to_string(),
    }
}
