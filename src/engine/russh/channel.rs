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

//! Exec-channel adapter.
//!
//! russh delivers channel traffic as a message stream; this adapter folds
//! the messages into independent per-stream byte buffers and exposes the
//! bounded poll / non-blocking read surface the multiplexer drives.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::Msg;
use russh::{Channel, ChannelMsg};

use crate::engine::{EngineChannel, PollStatus, StreamKind};
use crate::error::{Error, Result};

pub struct RusshChannel {
    channel: Channel<Msg>,
    stdout: VecDeque<u8>,
    stderr: VecDeque<u8>,
    /// End-of-file observed on the wire.
    eof: bool,
    /// No further channel messages will arrive.
    closed: bool,
    exit_status: Option<u32>,
}

impl RusshChannel {
    pub(super) fn new(channel: Channel<Msg>) -> Self {
        Self {
            channel,
            stdout: VecDeque::new(),
            stderr: VecDeque::new(),
            eof: false,
            closed: false,
            exit_status: None,
        }
    }

    fn buffer_mut(&mut self, stream: StreamKind) -> &mut VecDeque<u8> {
        match stream {
            StreamKind::Stdout => &mut self.stdout,
            StreamKind::Stderr => &mut self.stderr,
        }
    }

    fn buffered(&self, stream: StreamKind) -> usize {
        match stream {
            StreamKind::Stdout => self.stdout.len(),
            StreamKind::Stderr => self.stderr.len(),
        }
    }

    fn absorb(&mut self, msg: ChannelMsg) {
        match msg {
            ChannelMsg::Data { ref data } => self.stdout.extend(&data[..]),
            ChannelMsg::ExtendedData { ref data, ext } => {
                if ext == 1 {
                    self.stderr.extend(&data[..]);
                }
            }
            // The exit status can precede the last data chunk; it never
            // means end of communications by itself.
            ChannelMsg::ExitStatus { exit_status } => self.exit_status = Some(exit_status),
            ChannelMsg::Eof => self.eof = true,
            ChannelMsg::Close => {
                self.eof = true;
                self.closed = true;
            }
            _ => {}
        }
    }
}

#[async_trait]
impl EngineChannel for RusshChannel {
    async fn request_pty(&mut self, term: &str, col_width: u32, row_height: u32) -> Result<()> {
        self.channel
            .request_pty(
                false,
                term,
                col_width,
                row_height,
                0,   // pixel width (0 means undefined)
                0,   // pixel height (0 means undefined)
                &[], // terminal modes (empty means use defaults)
            )
            .await
            .map_err(|e| Error::ExecRejected(format!("pty request failed: {e}")))
    }

    async fn request_exec(&mut self, command: &str) -> Result<()> {
        self.channel
            .exec(true, command)
            .await
            .map_err(|e| Error::ExecRejected(e.to_string()))
    }

    async fn poll(&mut self, stream: StreamKind, timeout: Duration) -> Result<PollStatus> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let buffered = self.buffered(stream);
            if buffered > 0 {
                return Ok(PollStatus::Ready(buffered));
            }
            if self.closed || (self.eof && self.exit_status.is_some()) {
                return Ok(PollStatus::Eof);
            }
            // After a wire-level EOF we keep listening briefly: the exit
            // status may still be in flight.

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(PollStatus::Pending);
            }
            match tokio::time::timeout(deadline - now, self.channel.wait()).await {
                Err(_) => return Ok(PollStatus::Pending),
                Ok(None) => {
                    self.eof = true;
                    self.closed = true;
                }
                Ok(Some(msg)) => self.absorb(msg),
            }
        }
    }

    fn read(&mut self, stream: StreamKind, max: usize) -> Vec<u8> {
        let buffer = self.buffer_mut(stream);
        let take = buffer.len().min(max);
        buffer.drain(..take).collect()
    }

    fn is_eof(&self) -> bool {
        self.eof
    }

    fn exit_status(&self) -> Option<u32> {
        self.exit_status
    }

    async fn close(&mut self) -> Result<()> {
        self.channel.close().await.map_err(Error::Ssh)
    }
}
