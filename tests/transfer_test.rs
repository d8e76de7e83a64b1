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

//! File transfer through the pooled guard.

mod common;

use std::sync::atomic::Ordering;

use sshpool::SessionPool;
use tempfile::TempDir;

use common::{mock_target, MockEngine};

#[tokio::test]
async fn test_upload_file_with_mode() {
    let engine = MockEngine::new();
    let pool = SessionPool::new(engine.clone());
    let dir = TempDir::new().unwrap();
    let local = dir.path().join("script.sh");
    std::fs::write(&local, b"#!/bin/sh\necho hi\n").unwrap();

    let mut guard = pool.checkout(&mock_target("db1")).await.unwrap();
    guard
        .upload_file(&local, "/opt/script.sh", Some(0o755))
        .await
        .unwrap();

    let uploads = engine.behavior.uploads.lock();
    let (bytes, mode) = uploads.get("/opt/script.sh").unwrap();
    assert_eq!(bytes.as_slice(), b"#!/bin/sh\necho hi\n");
    assert_eq!(*mode, Some(0o755));
}

#[tokio::test]
async fn test_download_file_roundtrip() {
    let engine = MockEngine::new();
    engine
        .behavior
        .downloads
        .lock()
        .insert("/var/log/app.log".to_string(), b"line one\nline two\n".to_vec());
    let pool = SessionPool::new(engine.clone());
    let dir = TempDir::new().unwrap();
    let local = dir.path().join("app.log");

    let mut guard = pool.checkout(&mock_target("db1")).await.unwrap();
    guard
        .download_file("/var/log/app.log", &local)
        .await
        .unwrap();

    assert_eq!(
        std::fs::read(&local).unwrap().as_slice(),
        b"line one\nline two\n"
    );
}

#[tokio::test]
async fn test_missing_remote_file_does_not_poison_session() {
    let engine = MockEngine::new();
    let pool = SessionPool::new(engine.clone());
    let dir = TempDir::new().unwrap();
    let target = mock_target("db1");

    let mut guard = pool.checkout(&target).await.unwrap();
    let err = guard
        .download_file("/nonexistent", &dir.path().join("out"))
        .await
        .unwrap_err();
    assert!(matches!(err, sshpool::Error::Io(_)));
    drop(guard);

    // A file-level failure leaves the transport healthy and pooled.
    assert_eq!(pool.idle_count(), 1);
    let _ = pool.checkout(&target).await.unwrap();
    assert_eq!(engine.behavior.sessions_created.load(Ordering::SeqCst), 1);
}
