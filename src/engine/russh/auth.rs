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

//! Userauth primitives over the russh handle.
//!
//! Each call records the methods the server offered in its failure
//! response, so `userauth_list` reflects the server's view after a "none"
//! probe, the way the wrapped protocol defines it.

use std::path::Path;
use std::sync::Arc;

use russh::client::AuthResult;
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::{MethodKind, MethodSet};
use tracing::trace;

use super::connection::RusshSession;
use crate::engine::{AuthMethodKind, AuthStatus};
use crate::error::{Error, Result};

impl RusshSession {
    pub(super) async fn auth_none(&mut self) -> Result<AuthStatus> {
        trace!(user = %self.user, "userauth none probe");
        let result = self.handle.authenticate_none(self.user.clone()).await?;
        Ok(self.record(result))
    }

    pub(super) async fn auth_publickey(&mut self, identity: &Path) -> Result<AuthStatus> {
        trace!(user = %self.user, ?identity, "userauth publickey");
        let key = russh::keys::load_secret_key(identity, None).map_err(|e| Error::Identity {
            path: identity.to_path_buf(),
            message: e.to_string(),
        })?;
        let hash_alg = self.handle.best_supported_rsa_hash().await?.flatten();
        let result = self
            .handle
            .authenticate_publickey(
                self.user.clone(),
                PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
            )
            .await?;
        Ok(self.record(result))
    }

    pub(super) async fn auth_password(&mut self, password: &str) -> Result<AuthStatus> {
        trace!(user = %self.user, "userauth password");
        let result = self
            .handle
            .authenticate_password(self.user.clone(), password)
            .await?;
        Ok(self.record(result))
    }

    /// Fold an [`AuthResult`] into our status, keeping the offered-method
    /// list current.
    fn record(&mut self, result: AuthResult) -> AuthStatus {
        match result {
            AuthResult::Success => AuthStatus::Success,
            AuthResult::Failure {
                remaining_methods,
                partial_success,
            } => {
                self.offered = offered_methods(&remaining_methods);
                if partial_success {
                    AuthStatus::Partial
                } else {
                    AuthStatus::Denied
                }
            }
        }
    }
}

fn offered_methods(set: &MethodSet) -> Vec<AuthMethodKind> {
    const MAPPING: [(MethodKind, AuthMethodKind); 5] = [
        (MethodKind::None, AuthMethodKind::None),
        (MethodKind::Password, AuthMethodKind::Password),
        (MethodKind::PublicKey, AuthMethodKind::PublicKey),
        (MethodKind::HostBased, AuthMethodKind::HostBased),
        (
            MethodKind::KeyboardInteractive,
            AuthMethodKind::KeyboardInteractive,
        ),
    ];
    MAPPING
        .iter()
        .filter(|(kind, _)| set.contains(kind))
        .map(|(_, ours)| *ours)
        .collect()
}
