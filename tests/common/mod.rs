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

//! Scripted in-memory SSH engine for deterministic pool/lifecycle tests.
//!
//! `MockBehavior` is the shared script: host-key verdict, accepted
//! credentials, per-command channel events and counters for everything the
//! tests assert on.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use sshpool::{
    AuthMethodKind, AuthStatus, ConfigSource, Engine, EngineChannel, EngineSession, Error,
    HostKeyVerdict, PollStatus, SshOptions, StreamKind, Target,
};

type Result<T> = std::result::Result<T, Error>;

/// One scripted channel event, absorbed one per poll so cross-stream
/// arrival order stays observable.
#[derive(Clone)]
pub enum MockEvent {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    Exit(u32),
    Eof,
    /// Keep the command "running" for a while; used to overlap commands in
    /// concurrency tests.
    Delay(Duration),
    ReadError,
}

pub struct MockBehavior {
    /// Simulated handshake latency, so concurrent checkouts overlap.
    pub connect_delay: Mutex<Duration>,
    pub fail_connect: AtomicBool,
    pub none_succeeds: AtomicBool,
    pub verdict: Mutex<HostKeyVerdict>,
    pub offered: Mutex<Vec<AuthMethodKind>>,
    /// Identity accepted by publickey auth; `accept_any_key` overrides.
    pub accepted_key: Mutex<Option<PathBuf>>,
    pub accept_any_key: AtomicBool,
    pub password: Mutex<Option<String>>,
    /// Per-command channel scripts; unknown commands exit 0 silently.
    pub scripts: Mutex<HashMap<String, Vec<MockEvent>>>,

    /// Transport connect attempts, including failing ones.
    pub connect_attempts: AtomicUsize,
    /// Sessions that completed the handshake.
    pub sessions_created: AtomicUsize,
    pub trust_calls: AtomicUsize,
    pub disconnect_calls: AtomicUsize,
    pub key_attempts: Mutex<Vec<PathBuf>>,
    pub pty_requests: AtomicUsize,

    /// Commands currently between exec and close, and the high-water mark.
    pub active_commands: AtomicUsize,
    pub max_active_commands: AtomicUsize,

    /// Liveness flag of every session handed out, in creation order.
    pub session_flags: Mutex<Vec<Arc<AtomicBool>>>,

    /// `upload_file` captures: remote path -> (bytes, mode).
    pub uploads: Mutex<HashMap<String, (Vec<u8>, Option<u32>)>>,
    /// Bytes served by `download_file`, by remote path.
    pub downloads: Mutex<HashMap<String, Vec<u8>>>,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            connect_delay: Mutex::new(Duration::ZERO),
            fail_connect: AtomicBool::new(false),
            none_succeeds: AtomicBool::new(false),
            verdict: Mutex::new(HostKeyVerdict::VerifiedOk),
            offered: Mutex::new(vec![AuthMethodKind::PublicKey, AuthMethodKind::Password]),
            accepted_key: Mutex::new(None),
            accept_any_key: AtomicBool::new(true),
            password: Mutex::new(None),
            scripts: Mutex::new(HashMap::new()),
            connect_attempts: AtomicUsize::new(0),
            sessions_created: AtomicUsize::new(0),
            trust_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
            key_attempts: Mutex::new(Vec::new()),
            pty_requests: AtomicUsize::new(0),
            active_commands: AtomicUsize::new(0),
            max_active_commands: AtomicUsize::new(0),
            session_flags: Mutex::new(Vec::new()),
            uploads: Mutex::new(HashMap::new()),
            downloads: Mutex::new(HashMap::new()),
        }
    }
}

impl MockBehavior {
    pub fn script(&self, command: &str, events: Vec<MockEvent>) {
        self.scripts.lock().insert(command.to_string(), events);
    }

    /// Mark every session handed out so far as dead.
    pub fn kill_all_sessions(&self) {
        for flag in self.session_flags.lock().iter() {
            flag.store(false, Ordering::SeqCst);
        }
    }
}

#[derive(Clone)]
pub struct MockEngine {
    pub behavior: Arc<MockBehavior>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            behavior: Arc::new(MockBehavior::default()),
        }
    }
}

#[async_trait]
impl Engine for MockEngine {
    type Session = MockSession;

    async fn connect(
        &self,
        host: &str,
        port: u16,
        user: &str,
        _connect_timeout: Option<Duration>,
    ) -> Result<MockSession> {
        self.behavior.connect_attempts.fetch_add(1, Ordering::SeqCst);
        let delay = *self.behavior.connect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.behavior.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::Connect {
                host: host.to_string(),
                port,
                message: "scripted connect failure".to_string(),
            });
        }
        self.behavior.sessions_created.fetch_add(1, Ordering::SeqCst);
        let connected = Arc::new(AtomicBool::new(true));
        self.behavior
            .session_flags
            .lock()
            .push(Arc::clone(&connected));
        Ok(MockSession {
            behavior: Arc::clone(&self.behavior),
            connected,
            host: host.to_string(),
            user: user.to_string(),
        })
    }
}

pub struct MockSession {
    behavior: Arc<MockBehavior>,
    connected: Arc<AtomicBool>,
    host: String,
    user: String,
}

#[async_trait]
impl EngineSession for MockSession {
    type Channel = MockChannel;

    fn classify_host_key(&self, _known_hosts: Option<&Path>) -> Result<HostKeyVerdict> {
        Ok(*self.behavior.verdict.lock())
    }

    fn trust_host_key(&self, _known_hosts: Option<&Path>) -> Result<()> {
        self.behavior.trust_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn userauth_none(&mut self) -> Result<AuthStatus> {
        if self.behavior.none_succeeds.load(Ordering::SeqCst) {
            Ok(AuthStatus::Success)
        } else {
            Ok(AuthStatus::Denied)
        }
    }

    fn userauth_list(&self) -> Vec<AuthMethodKind> {
        self.behavior.offered.lock().clone()
    }

    async fn userauth_publickey(&mut self, identity: &Path) -> Result<AuthStatus> {
        self.behavior
            .key_attempts
            .lock()
            .push(identity.to_path_buf());
        let accepted = self.behavior.accept_any_key.load(Ordering::SeqCst)
            || self.behavior.accepted_key.lock().as_deref() == Some(identity);
        if accepted {
            Ok(AuthStatus::Success)
        } else {
            Ok(AuthStatus::Denied)
        }
    }

    async fn userauth_password(&mut self, password: &str) -> Result<AuthStatus> {
        if self.behavior.password.lock().as_deref() == Some(password) {
            Ok(AuthStatus::Success)
        } else {
            Ok(AuthStatus::Denied)
        }
    }

    async fn open_channel(&mut self) -> Result<MockChannel> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(Error::ChannelOpen("session is closed".to_string()));
        }
        Ok(MockChannel {
            behavior: Arc::clone(&self.behavior),
            events: VecDeque::new(),
            buffers: [Vec::new(), Vec::new()],
            eof: false,
            exit_status: None,
            fail_next_poll: false,
            executing: false,
        })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.behavior.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn upload_file(
        &mut self,
        local: &Path,
        remote_path: &str,
        mode: Option<u32>,
    ) -> Result<()> {
        let contents = std::fs::read(local)?;
        self.behavior
            .uploads
            .lock()
            .insert(remote_path.to_string(), (contents, mode));
        Ok(())
    }

    async fn download_file(&mut self, remote_path: &str, local: &Path) -> Result<()> {
        let downloads = self.behavior.downloads.lock();
        let Some(contents) = downloads.get(remote_path) else {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no such file: {remote_path}"),
            )));
        };
        std::fs::write(local, contents)?;
        Ok(())
    }
}

pub struct MockChannel {
    behavior: Arc<MockBehavior>,
    events: VecDeque<MockEvent>,
    buffers: [Vec<u8>; 2],
    eof: bool,
    exit_status: Option<u32>,
    fail_next_poll: bool,
    executing: bool,
}

impl MockChannel {
    async fn absorb_one(&mut self) {
        match self.events.pop_front() {
            Some(MockEvent::Stdout(data)) => self.buffers[0].extend_from_slice(&data),
            Some(MockEvent::Stderr(data)) => self.buffers[1].extend_from_slice(&data),
            Some(MockEvent::Exit(status)) => self.exit_status = Some(status),
            Some(MockEvent::Eof) => self.eof = true,
            Some(MockEvent::Delay(duration)) => tokio::time::sleep(duration).await,
            Some(MockEvent::ReadError) => self.fail_next_poll = true,
            None => self.eof = true,
        }
    }

    fn settle(&mut self) {
        if self.executing {
            self.executing = false;
            self.behavior.active_commands.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl EngineChannel for MockChannel {
    async fn request_pty(&mut self, _term: &str, _col: u32, _row: u32) -> Result<()> {
        self.behavior.pty_requests.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn request_exec(&mut self, command: &str) -> Result<()> {
        self.events = self
            .behavior
            .scripts
            .lock()
            .get(command)
            .cloned()
            .unwrap_or_else(|| vec![MockEvent::Exit(0), MockEvent::Eof])
            .into();
        self.executing = true;
        let active = self.behavior.active_commands.fetch_add(1, Ordering::SeqCst) + 1;
        self.behavior
            .max_active_commands
            .fetch_max(active, Ordering::SeqCst);
        Ok(())
    }

    async fn poll(&mut self, stream: StreamKind, _timeout: Duration) -> Result<PollStatus> {
        if self.fail_next_poll {
            self.settle();
            return Err(Error::ChannelRead("scripted read failure".to_string()));
        }
        let index = stream_index(stream);
        if self.buffers[index].is_empty() && !self.eof {
            self.absorb_one().await;
        }
        if self.fail_next_poll {
            self.settle();
            return Err(Error::ChannelRead("scripted read failure".to_string()));
        }
        if !self.buffers[index].is_empty() {
            Ok(PollStatus::Ready(self.buffers[index].len()))
        } else if self.eof {
            Ok(PollStatus::Eof)
        } else {
            Ok(PollStatus::Pending)
        }
    }

    fn read(&mut self, stream: StreamKind, max: usize) -> Vec<u8> {
        let buffer = &mut self.buffers[stream_index(stream)];
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
        self.settle();
        Ok(())
    }
}

fn stream_index(stream: StreamKind) -> usize {
    match stream {
        StreamKind::Stdout => 0,
        StreamKind::Stderr => 1,
    }
}

/// Opt-in log capture for debugging:
/// `RUST_LOG=sshpool=trace cargo test -- --nocapture`.
pub fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A target with ssh_config disabled and a fixed identity, so resolution
/// never touches the test machine's real `~/.ssh`.
pub fn mock_target(host: &str) -> Target {
    Target::parse(host)
        .expect("valid test target")
        .with_options(
            SshOptions::default()
                .with_user("tester")
                .with_config(ConfigSource::Disabled)
                .with_key("/test/id_ed25519"),
        )
}

/// Collector sink pair for `run`: returns the closures plus the shared
/// buffers they fill.
pub type SharedOutput = Arc<Mutex<Vec<u8>>>;

pub fn sink_pair() -> (SharedOutput, SharedOutput) {
    (
        Arc::new(Mutex::new(Vec::new())),
        Arc::new(Mutex::new(Vec::new())),
    )
}
