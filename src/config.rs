//! Configuration loading from `.env` files.

use std::{collections::HashMap, env};

use anyhow::{Context, Result};

/// Runtime settings derived from environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Relay name reported in the info document.
    pub relay_name: String,
    /// HTTP bind address, e.g. `127.0.0.1:7747`.
    pub bind_http: String,
    /// WebSocket bind address, e.g. `127.0.0.1:7748`.
    pub bind_ws: String,
    /// Rate-limit window length in seconds.
    pub rate_window_secs: u64,
    /// Per-window quota for kinds without a specific entry.
    pub rate_default: u32,
    /// Per-kind quota overrides.
    pub rate_limits: HashMap<u32, u32>,
    /// Per-event ceiling for hook phases and the storage call, in seconds.
    pub hook_timeout_secs: u64,
    /// Identities that bypass rate limiting.
    pub authorized_pubkeys: Vec<String>,
    /// Identities whose events are rejected outright.
    pub banned_pubkeys: Vec<String>,
}

impl Settings {
    /// Load settings from the specified `.env` file.
    pub fn from_env(path: &str) -> Result<Self> {
        dotenvy::from_filename(path).context("reading env file")?;
        let relay_name = env::var("RELAY_NAME").unwrap_or_else(|_| "adrelay".into());
        let bind_http = env::var("BIND_HTTP")?;
        let bind_ws = env::var("BIND_WS")?;
        let rate_window_secs = env::var("RATE_WINDOW_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(60);
        let rate_default = env::var("RATE_DEFAULT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(100);
        let rate_limits = csv_limits(env::var("RATE_LIMITS").unwrap_or_default());
        let hook_timeout_secs = env::var("HOOK_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);
        let authorized_pubkeys = csv_strings(env::var("AUTHORIZED_PUBKEYS").unwrap_or_default());
        let banned_pubkeys = csv_strings(env::var("BANNED_PUBKEYS").unwrap_or_default());
        Ok(Self {
            relay_name,
            bind_http,
            bind_ws,
            rate_window_secs,
            rate_default,
            rate_limits,
            hook_timeout_secs,
            authorized_pubkeys,
            banned_pubkeys,
        })
    }
}

/// Split a comma-separated string into trimmed string values.
pub fn csv_strings(input: impl AsRef<str>) -> Vec<String> {
    let s = input.as_ref();
    s.split(',')
        .filter_map(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .collect()
}

/// Parse `kind:count` quota overrides, skipping malformed entries.
pub fn csv_limits(input: impl AsRef<str>) -> HashMap<u32, u32> {
    let s = input.as_ref();
    s.split(',')
        .filter_map(|entry| {
            let (kind, count) = entry.trim().split_once(':')?;
            Some((kind.parse().ok()?, count.parse().ok()?))
        })
        .collect()
}
