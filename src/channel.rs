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

//! Channel I/O multiplexing for one remote command.
//!
//! [`RemoteCommand`] walks a channel through
//! `Opened → Requested → Draining → Finished`, polling stdout and stderr
//! independently and handing chunks to the caller's sink in arrival order.
//! The exit status only becomes observable once both streams have reached
//! end-of-file.

use std::time::Duration;

use tracing::{debug, trace};

use crate::engine::{EngineChannel, PollStatus, StreamKind};
use crate::error::{Error, Result};

/// Read granularity for channel drains. One poll never hands more than
/// this many bytes to the sink at a time.
pub const BUF_SIZE: usize = 16384;

/// Bound on one poll. Short enough that the loop stays responsive to the
/// other stream, long enough not to spin on an idle channel.
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Default terminal when a pseudo-terminal is requested.
const DEFAULT_TERM: &str = "xterm";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelState {
    Opened,
    Requested,
    Draining,
    Finished,
    Failed,
}

impl ChannelState {
    fn name(self) -> &'static str {
        match self {
            ChannelState::Opened => "opened",
            ChannelState::Requested => "requested",
            ChannelState::Draining => "draining",
            ChannelState::Finished => "finished",
            ChannelState::Failed => "failed",
        }
    }
}

/// One remote command's execution channel.
pub struct RemoteCommand<C: EngineChannel> {
    channel: C,
    state: ChannelState,
    exit_status: Option<u32>,
}

impl<C: EngineChannel> RemoteCommand<C> {
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            state: ChannelState::Opened,
            exit_status: None,
        }
    }

    fn expect_state(&self, expected: ChannelState) -> Result<()> {
        if self.state != expected {
            return Err(Error::ChannelState {
                expected: expected.name(),
                actual: self.state.name(),
            });
        }
        Ok(())
    }

    /// Allocate a pseudo-terminal. Must precede [`request_exec`](Self::request_exec).
    pub async fn request_pty(&mut self) -> Result<()> {
        self.expect_state(ChannelState::Opened)?;
        self.channel.request_pty(DEFAULT_TERM, 80, 24).await
    }

    /// Send the exec request for `command`.
    pub async fn request_exec(&mut self, command: &str) -> Result<()> {
        self.expect_state(ChannelState::Opened)?;
        match self.channel.request_exec(command).await {
            Ok(()) => {
                self.state = ChannelState::Requested;
                Ok(())
            }
            Err(err) => {
                self.state = ChannelState::Failed;
                Err(err)
            }
        }
    }

    /// Drain both output streams until end-of-file, delivering each chunk
    /// to `sink` the moment it is observed.
    ///
    /// Bytes within one stream arrive in source order; across the two
    /// streams the order is whatever polling observed. Chunks already
    /// delivered stay delivered if the drain fails midway.
    pub async fn stream<F>(&mut self, mut sink: F) -> Result<()>
    where
        F: FnMut(StreamKind, &[u8]) + Send,
    {
        self.expect_state(ChannelState::Requested)?;
        self.state = ChannelState::Draining;

        let mut finished = [false; 2];
        while !(finished[0] && finished[1]) {
            for stream in [StreamKind::Stdout, StreamKind::Stderr] {
                if finished[stream.index()] {
                    continue;
                }
                match self.channel.poll(stream, POLL_TIMEOUT).await {
                    Ok(PollStatus::Ready(_)) => {
                        let chunk = self.channel.read(stream, BUF_SIZE);
                        if !chunk.is_empty() {
                            trace!(?stream, bytes = chunk.len(), "delivering chunk");
                            sink(stream, &chunk);
                        }
                    }
                    Ok(PollStatus::Pending) => {}
                    Ok(PollStatus::Eof) => finished[stream.index()] = true,
                    Err(err) => {
                        self.state = ChannelState::Failed;
                        return Err(err);
                    }
                }
            }
        }

        match self.channel.exit_status() {
            Some(status) => {
                debug!(status, "remote command finished");
                self.exit_status = Some(status);
                self.state = ChannelState::Finished;
                Ok(())
            }
            None => {
                self.state = ChannelState::Failed;
                Err(Error::MissingExitStatus)
            }
        }
    }

    /// The remote exit status. Only observable after the channel reached
    /// end-of-file; asking earlier is rejected rather than returning a
    /// stale value.
    pub fn exit_status(&self) -> Result<u32> {
        match (self.state, self.exit_status) {
            (ChannelState::Finished, Some(status)) => Ok(status),
            (ChannelState::Finished, None) => Err(Error::MissingExitStatus),
            _ => Err(Error::ExitStatusUnavailable),
        }
    }

    /// Close the channel. Safe to call in any state; errors are reported
    /// but the command's outcome is already settled by then.
    pub async fn close(&mut self) -> Result<()> {
        self.channel.close().await
    }
}
