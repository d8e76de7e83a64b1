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

//! Minimal OpenSSH client-config resolution.
//!
//! The session lifecycle consumes four directives: `HostName`, `Port`,
//! `User` and `IdentityFile`, scoped by `Host` blocks with `*`/`?` glob
//! patterns and `!` negation. First obtained value wins, as in OpenSSH;
//! `IdentityFile` accumulates. `~` and `%d` in identity paths expand to the
//! home and `~/.ssh` directories respectively.

use std::path::{Path, PathBuf};

use directories::BaseDirs;
use tracing::debug;

use crate::config::ConfigSource;
use crate::error::{Error, Result};

/// Overrides a config file contributes for one host.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostOverrides {
    pub host_name: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub identity_files: Vec<PathBuf>,
}

/// Resolve the overrides for `host` from the configured source.
pub fn resolve(source: &ConfigSource, host: &str) -> Result<HostOverrides> {
    let path = match source {
        ConfigSource::Disabled => return Ok(HostOverrides::default()),
        ConfigSource::Path(path) => {
            if !path.exists() {
                return Err(Error::SshConfig {
                    path: path.clone(),
                    message: "file not found".to_string(),
                });
            }
            path.clone()
        }
        ConfigSource::Default => {
            let Some(dirs) = BaseDirs::new() else {
                return Ok(HostOverrides::default());
            };
            let path = dirs.home_dir().join(".ssh").join("config");
            if !path.exists() {
                return Ok(HostOverrides::default());
            }
            path
        }
    };

    let content = std::fs::read_to_string(&path).map_err(|e| Error::SshConfig {
        path: path.clone(),
        message: e.to_string(),
    })?;
    let overrides = parse(&content, host, &path)?;
    if overrides != HostOverrides::default() {
        debug!(?path, host, ?overrides, "applied ssh_config overrides");
    }
    Ok(overrides)
}

fn parse(content: &str, host: &str, path: &Path) -> Result<HostOverrides> {
    let mut overrides = HostOverrides::default();
    // Directives before the first Host block apply to every host.
    let mut block_matches = true;

    for line in content.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        let (keyword, value) = split_directive(line);
        if value.is_empty() {
            continue;
        }

        if keyword.eq_ignore_ascii_case("host") {
            block_matches = host_patterns_match(value, host);
            continue;
        }
        if !block_matches {
            continue;
        }

        if keyword.eq_ignore_ascii_case("hostname") {
            if overrides.host_name.is_none() {
                overrides.host_name = Some(value.to_string());
            }
        } else if keyword.eq_ignore_ascii_case("port") {
            if overrides.port.is_none() {
                let port = value.parse::<u16>().map_err(|_| Error::SshConfig {
                    path: path.to_path_buf(),
                    message: format!("invalid Port value '{value}'"),
                })?;
                overrides.port = Some(port);
            }
        } else if keyword.eq_ignore_ascii_case("user") {
            if overrides.user.is_none() {
                overrides.user = Some(value.to_string());
            }
        } else if keyword.eq_ignore_ascii_case("identityfile") {
            let expanded = expand_identity_path(value);
            if !overrides.identity_files.contains(&expanded) {
                overrides.identity_files.push(expanded);
            }
        }
        // Every other directive is outside this crate's concern.
    }

    Ok(overrides)
}

/// Split `Keyword Value` or `Keyword=Value`.
fn split_directive(line: &str) -> (&str, &str) {
    if let Some(eq_pos) = line.find('=') {
        let ws_pos = line.find(char::is_whitespace).unwrap_or(usize::MAX);
        if eq_pos < ws_pos {
            return (line[..eq_pos].trim(), line[eq_pos + 1..].trim());
        }
    }
    match line.find(char::is_whitespace) {
        Some(pos) => (&line[..pos], line[pos..].trim()),
        None => (line, ""),
    }
}

/// A `Host` directive's pattern list: any negated match excludes the block,
/// otherwise any positive match includes it.
fn host_patterns_match(patterns: &str, host: &str) -> bool {
    let mut matched = false;
    for pattern in patterns.split_whitespace() {
        if let Some(negated) = pattern.strip_prefix('!') {
            if glob_match(negated, host) {
                return false;
            }
        } else if glob_match(pattern, host) {
            matched = true;
        }
    }
    matched
}

/// Case-insensitive fnmatch-style glob: `*` any run, `?` any one character.
fn glob_match(pattern: &str, value: &str) -> bool {
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();
    let value: Vec<char> = value.to_lowercase().chars().collect();
    glob_match_at(&pattern, &value)
}

fn glob_match_at(pattern: &[char], value: &[char]) -> bool {
    match pattern.split_first() {
        None => value.is_empty(),
        Some(('*', rest)) => {
            (0..=value.len()).any(|skip| glob_match_at(rest, &value[skip..]))
        }
        Some(('?', rest)) => !value.is_empty() && glob_match_at(rest, &value[1..]),
        Some((ch, rest)) => value.first() == Some(ch) && glob_match_at(rest, &value[1..]),
    }
}

/// Expand `~` (home) and `%d` (the `~/.ssh` directory) in an identity path.
pub fn expand_identity_path(raw: &str) -> PathBuf {
    match BaseDirs::new() {
        Some(dirs) => expand_with_home(raw, dirs.home_dir()),
        None => PathBuf::from(raw),
    }
}

fn expand_with_home(raw: &str, home: &Path) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        home.join(rest)
    } else if let Some(rest) = raw.strip_prefix("%d/") {
        home.join(".ssh").join(rest)
    } else if raw == "%d" {
        home.join(".ssh")
    } else {
        PathBuf::from(raw)
    }
}
