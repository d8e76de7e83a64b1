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

//! SFTP file transfer on an authenticated session.
//!
//! Some sshd_config does not enable sftp by default; a line like
//! `Subsystem sftp internal-sftp` is needed on the remote machine.

use std::path::Path;

use russh_sftp::client::SftpSession;
use russh_sftp::protocol::{FileAttributes, OpenFlags};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use super::connection::RusshSession;
use crate::error::{Error, Result};

impl RusshSession {
    async fn sftp(&mut self) -> Result<SftpSession> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| Error::ChannelOpen(e.to_string()))?;
        channel.request_subsystem(true, "sftp").await?;
        let sftp = SftpSession::new(channel.into_stream()).await?;
        Ok(sftp)
    }

    /// Upload one local file, optionally applying `mode` as the remote
    /// permission bits afterwards.
    pub(super) async fn sftp_upload(
        &mut self,
        local: &Path,
        remote_path: &str,
        mode: Option<u32>,
    ) -> Result<()> {
        debug!(?local, remote_path, "uploading file");
        let sftp = self.sftp().await?;

        let contents = tokio::fs::read(local).await?;

        let mut remote_file = sftp
            .open_with_flags(
                remote_path,
                OpenFlags::CREATE | OpenFlags::TRUNCATE | OpenFlags::WRITE | OpenFlags::READ,
            )
            .await?;
        remote_file.write_all(&contents).await?;
        remote_file.flush().await?;
        remote_file.shutdown().await?;

        if let Some(mode) = mode {
            let attrs = FileAttributes {
                permissions: Some(mode),
                ..Default::default()
            };
            sftp.set_metadata(remote_path, attrs).await?;
        }

        Ok(())
    }

    /// Download one remote file.
    pub(super) async fn sftp_download(&mut self, remote_path: &str, local: &Path) -> Result<()> {
        debug!(remote_path, ?local, "downloading file");
        let sftp = self.sftp().await?;

        let mut remote_file = sftp.open_with_flags(remote_path, OpenFlags::READ).await?;
        let mut contents = Vec::new();
        remote_file.read_to_end(&mut contents).await?;

        let mut local_file = tokio::fs::File::create(local).await?;
        local_file.write_all(&contents).await?;
        local_file.flush().await?;

        Ok(())
    }
}
