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

//! Connection-pooled SSH session management for orchestration backends.
//!
//! A [`SessionPool`] caches authenticated sessions per target and hands
//! them out one caller at a time; [`SessionGuard::run`] executes a remote
//! command over a fresh channel, streaming stdout and stderr to callbacks
//! as the bytes arrive and returning the remote exit status.
//!
//! ```no_run
//! use sshpool::{RusshEngine, SessionPool, SshOptions, Target};
//!
//! # async fn demo() -> sshpool::Result<()> {
//! let pool = SessionPool::new(RusshEngine::new());
//! let target = Target::parse("deploy@db1.example.com")?
//!     .with_options(SshOptions::default().with_key("~/.ssh/deploy_key"));
//!
//! let mut session = pool.checkout(&target).await?;
//! let status = session
//!     .run(
//!         "uname -a",
//!         |out| print!("{}", String::from_utf8_lossy(out)),
//!         |err| eprint!("{}", String::from_utf8_lossy(err)),
//!     )
//!     .await?;
//! assert_eq!(status, 0);
//! session.checkin();
//! # pool.close().await;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod config;
pub mod engine;
pub mod error;
pub mod known_hosts;
pub mod pool;
pub mod session;
pub mod ssh_config;
pub mod target;

pub use channel::{RemoteCommand, BUF_SIZE};
pub use config::{ConfigSource, ExecConfig, PoolConfig, SshOptions};
pub use engine::russh::RusshEngine;
pub use engine::{
    AuthMethodKind, AuthStatus, Engine, EngineChannel, EngineSession, HostKeyVerdict, PollStatus,
    StreamKind,
};
pub use error::{Error, ErrorKind, Result};
pub use known_hosts::{KnownHostsStore, StrictHostKeyChecking};
pub use pool::{SessionGuard, SessionPool};
pub use session::{establish, Session};
pub use target::{PoolKey, Target};
