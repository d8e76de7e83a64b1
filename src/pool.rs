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

//! Connection pooling for authenticated sessions.
//!
//! Sessions are cached per (host, port, user, options-fingerprint) key.
//! Each key owns a capacity semaphore: a permit is held for every live
//! session, so concurrent checkouts can never establish duplicates — the
//! first caller connects while the rest wait, and a failed establishment
//! releases the permit so the next waiter retries on its own. Checkin is
//! the [`SessionGuard`] going out of scope, which makes
//! release-on-every-exit-path structural rather than a caller obligation.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, trace};

use crate::config::{ExecConfig, PoolConfig};
use crate::engine::{Engine, EngineSession, StreamKind};
use crate::error::{Error, Result};
use crate::session::{self, Session};
use crate::target::{PoolKey, Target};

/// Pool of authenticated sessions, keyed by target.
///
/// The pool is plain shared state: wrap it in an `Arc` and pass it to
/// whoever needs it. It lives until [`close`](Self::close) tears it down.
pub struct SessionPool<E: Engine> {
    engine: E,
    config: PoolConfig,
    slots: Mutex<HashMap<PoolKey, Arc<TargetSlot<E::Session>>>>,
    closed: AtomicBool,
}

/// Per-key state: a capacity semaphore plus the idle sessions.
struct TargetSlot<S: EngineSession> {
    limit: Arc<Semaphore>,
    idle: Mutex<Vec<Session<S>>>,
}

impl<S: EngineSession> TargetSlot<S> {
    fn new(capacity: usize) -> Self {
        Self {
            limit: Arc::new(Semaphore::new(capacity)),
            idle: Mutex::new(Vec::new()),
        }
    }
}

impl<E: Engine> SessionPool<E> {
    pub fn new(engine: E) -> Self {
        Self::with_config(engine, PoolConfig::default())
    }

    pub fn with_config(engine: E, config: PoolConfig) -> Self {
        Self {
            engine,
            config,
            slots: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Check out a session for `target`, establishing one if the slot has
    /// spare capacity and no idle session survives.
    ///
    /// Blocks while the target is at capacity; waiters resume in FIFO
    /// order as guards are released. An establishment failure is returned
    /// to the caller that performed it — nothing about a failed attempt is
    /// cached, and the freed capacity lets the next waiter make its own
    /// attempt.
    pub async fn checkout(&self, target: &Target) -> Result<SessionGuard<'_, E>> {
        self.checkout_with(target, &ExecConfig::default()).await
    }

    /// Same as [`checkout`](Self::checkout) with explicit execution options
    /// (connect timeout) for any establishment this checkout performs.
    pub async fn checkout_with(
        &self,
        target: &Target,
        exec: &ExecConfig,
    ) -> Result<SessionGuard<'_, E>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::PoolClosed);
        }

        let key = target.pool_key();
        let slot = {
            let mut slots = self.slots.lock();
            Arc::clone(slots.entry(key.clone()).or_insert_with(|| {
                Arc::new(TargetSlot::new(self.config.max_sessions_per_target))
            }))
        };

        // One permit per live session. Waiting here is how callers block
        // on a busy target; close() closes the semaphore and wakes them.
        let permit = Arc::clone(&slot.limit)
            .acquire_owned()
            .await
            .map_err(|_| Error::PoolClosed)?;
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::PoolClosed);
        }

        // Reuse an idle session, discarding any that died while parked.
        loop {
            let candidate = slot.idle.lock().pop();
            match candidate {
                Some(existing) if existing.is_connected() => {
                    trace!(%key, "reusing pooled session");
                    return Ok(SessionGuard::new(self, slot, permit, existing));
                }
                Some(dead) => {
                    debug!(%key, "discarding dead pooled session");
                    dispose(dead);
                }
                None => break,
            }
        }

        debug!(%key, "no pooled session available, establishing");
        let established = session::establish(&self.engine, target, exec).await?;
        Ok(SessionGuard::new(self, slot, permit, established))
    }

    /// Tear the pool down: refuse further checkouts, wake all waiters and
    /// disconnect every idle session. Sessions still checked out are
    /// disconnected when their guards release.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let slots: Vec<Arc<TargetSlot<E::Session>>> =
            self.slots.lock().values().cloned().collect();
        for slot in slots {
            slot.limit.close();
            let idle: Vec<Session<E::Session>> = slot.idle.lock().drain(..).collect();
            for existing in idle {
                existing.disconnect().await;
            }
        }
        info!("session pool closed");
    }

    /// Idle sessions currently parked in the pool, across all targets.
    pub fn idle_count(&self) -> usize {
        self.slots
            .lock()
            .values()
            .map(|slot| slot.idle.lock().len())
            .sum()
    }
}

/// Exclusive handle to one checked-out session.
///
/// Dropping the guard is the checkin. A guard whose command failed with a
/// transport or channel error marks its session broken, and the drop
/// evicts it instead of returning it to the pool.
pub struct SessionGuard<'a, E: Engine> {
    pool: &'a SessionPool<E>,
    slot: Arc<TargetSlot<E::Session>>,
    _permit: OwnedSemaphorePermit,
    session: Option<Session<E::Session>>,
    broken: bool,
}

impl<'a, E: Engine> std::fmt::Debug for SessionGuard<'a, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGuard")
            .field("target", &self.session.as_ref().map(|s| s.target()))
            .field("broken", &self.broken)
            .finish()
    }
}

impl<'a, E: Engine> SessionGuard<'a, E> {
    fn new(
        pool: &'a SessionPool<E>,
        slot: Arc<TargetSlot<E::Session>>,
        permit: OwnedSemaphorePermit,
        session: Session<E::Session>,
    ) -> Self {
        Self {
            pool,
            slot,
            _permit: permit,
            session: Some(session),
            broken: false,
        }
    }

    fn session_mut(&mut self) -> &mut Session<E::Session> {
        // Only drop() takes the session out.
        self.session
            .as_mut()
            .expect("session guard used after release")
    }

    pub fn target(&self) -> &Target {
        self.session
            .as_ref()
            .expect("session guard used after release")
            .target()
    }

    /// Execute `command`, streaming stdout and stderr chunks to the two
    /// callbacks in arrival order. Returns the remote exit status; a
    /// non-zero status is not an error.
    pub async fn run<O, T>(&mut self, command: &str, on_stdout: O, on_stderr: T) -> Result<u32>
    where
        O: FnMut(&[u8]) + Send,
        T: FnMut(&[u8]) + Send,
    {
        self.run_with(&ExecConfig::default(), command, on_stdout, on_stderr)
            .await
    }

    /// Same as [`run`](Self::run) with explicit execution options (pty
    /// allocation, command timeout).
    pub async fn run_with<O, T>(
        &mut self,
        exec: &ExecConfig,
        command: &str,
        mut on_stdout: O,
        mut on_stderr: T,
    ) -> Result<u32>
    where
        O: FnMut(&[u8]) + Send,
        T: FnMut(&[u8]) + Send,
    {
        let result = self
            .session_mut()
            .run(command, exec, |stream, chunk| match stream {
                StreamKind::Stdout => on_stdout(chunk),
                StreamKind::Stderr => on_stderr(chunk),
            })
            .await;
        if result.is_err() {
            // A session that failed mid-exec is not trusted again.
            self.broken = true;
        }
        result
    }

    pub async fn upload_file(
        &mut self,
        local: &Path,
        remote_path: &str,
        mode: Option<u32>,
    ) -> Result<()> {
        let result = self.session_mut().upload_file(local, remote_path, mode).await;
        self.note_transfer_outcome(&result);
        result
    }

    pub async fn download_file(&mut self, remote_path: &str, local: &Path) -> Result<()> {
        let result = self.session_mut().download_file(remote_path, local).await;
        self.note_transfer_outcome(&result);
        result
    }

    /// Transfer failures only poison the session when the transport died;
    /// a missing remote file leaves it perfectly reusable.
    fn note_transfer_outcome(&mut self, result: &Result<()>) {
        if result.is_err() && !self.session_mut().is_connected() {
            self.broken = true;
        }
    }

    /// Return the session to the pool. Sugar over dropping the guard.
    pub fn checkin(self) {}
}

impl<E: Engine> Drop for SessionGuard<'_, E> {
    fn drop(&mut self) {
        let Some(existing) = self.session.take() else {
            return;
        };
        if self.broken || self.pool.closed.load(Ordering::Acquire) || !existing.is_connected() {
            debug!(remote = %existing.target(), "evicting session");
            dispose(existing);
        } else {
            trace!(remote = %existing.target(), "returning session to pool");
            self.slot.idle.lock().push(existing);
        }
        // The permit drops with the guard, letting the next waiter in.
    }
}

/// Disconnect in the background when a runtime is available; dropping the
/// transport closes it either way.
fn dispose<S: EngineSession>(existing: Session<S>) {
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        handle.spawn(async move { existing.disconnect().await });
    }
}
