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

//! The production SSH engine, powered by the russh crate.
//!
//! [`RusshEngine`] implements the [`Engine`](crate::engine::Engine) seam:
//! transport handshake with host-key capture, the none/publickey/password
//! userauth primitives, a channel adapter exposing russh's message stream
//! through the poll/read interface, and SFTP file transfer.

mod auth;
mod channel;
mod connection;
mod transfer;

pub use channel::RusshChannel;
pub use connection::{RusshEngine, RusshSession};

// Re-export the russh client config so callers can tune keepalives and
// window sizes without importing russh themselves.
pub use ::russh::client::Config;
