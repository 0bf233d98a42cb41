//! Typed configuration surface (§3 addendum, §4.12, §6).
//!
//! The core only defines this surface and its defaults; parsing a config
//! file or environment into it is session-bootstrap ergonomics and stays
//! with the caller (§1 Non-goals).

use crate::error::{Error, Result};
use crate::frame::Compression;
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

fn default_port() -> u16 {
    9042
}

fn default_dial_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_refill_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_tcp_nodelay() -> bool {
    true
}

fn default_compr_buffer_size() -> usize {
    64 * 1024
}

/// Per-connection configuration: credentials, keyspace, compression, dial
/// parameters (§6 "Connection configuration surface").
#[derive(Clone, Debug, Deserialize)]
pub struct ConnectionConfig {
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    keyspace: Option<String>,
    #[serde(default = "default_tcp_nodelay")]
    pub tcp_nodelay: bool,
    #[serde(default = "default_dial_timeout", with = "humantime_serde")]
    pub dial_timeout: Duration,
    /// Present but unused beyond this flag: wrapping the socket in TLS is out
    /// of scope (§1 Non-goals); a `true` value fails fast at connect time
    /// rather than silently dialing in plaintext.
    #[serde(default)]
    pub tls: bool,
    #[serde(default)]
    pub default_consistency: Option<crate::types::Consistency>,
    #[serde(default = "default_port")]
    pub default_port: u16,
    #[serde(default)]
    pub compression: Option<Compression>,
    #[serde(default = "default_compr_buffer_size")]
    pub compr_buffer_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            keyspace: None,
            tcp_nodelay: default_tcp_nodelay(),
            dial_timeout: default_dial_timeout(),
            tls: false,
            default_consistency: None,
            default_port: default_port(),
            compression: None,
            compr_buffer_size: default_compr_buffer_size(),
        }
    }
}

impl ConnectionConfig {
    pub fn keyspace(&self) -> Option<&str> {
        self.keyspace.as_deref()
    }

    /// Validates and sets the keyspace, per §6: `^[A-Za-z0-9_]{1,48}$`.
    pub fn with_keyspace(mut self, keyspace: impl Into<String>) -> Result<Self> {
        let keyspace = keyspace.into();
        validate_keyspace(&keyspace)?;
        self.keyspace = Some(keyspace);
        Ok(self)
    }
}

fn validate_keyspace(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name.len() <= 48
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if ok {
        Ok(())
    } else {
        Err(Error::InvalidKeyspace(name.to_string()))
    }
}

fn default_policy() -> PolicyChoice {
    PolicyChoice::RoundRobin
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PolicyChoice {
    RoundRobin,
    DcAwareRoundRobin,
}

/// Session-wide configuration: contact points, pool sizing, and policy
/// selection, aggregated on top of a [`ConnectionConfig`] (§3 addendum).
#[derive(Clone, Debug, Deserialize)]
pub struct SessionConfig {
    pub contact_points: Vec<SocketAddr>,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default = "default_refill_interval", with = "humantime_serde")]
    pub refill_interval: Duration,
    #[serde(default = "default_policy")]
    pub policy: PolicyChoice,
    #[serde(default)]
    pub local_dc: Option<String>,
    #[serde(default = "default_token_aware")]
    pub token_aware: bool,
}

fn default_token_aware() -> bool {
    true
}

impl SessionConfig {
    pub fn new(contact_points: Vec<SocketAddr>) -> Self {
        Self {
            contact_points,
            connection: ConnectionConfig::default(),
            refill_interval: default_refill_interval(),
            policy: default_policy(),
            local_dc: None,
            token_aware: default_token_aware(),
        }
    }

    /// `send_controller` target (§4.4): half the stream-ID domain.
    pub fn send_controller_target(&self) -> usize {
        crate::stream_id::MAX_STREAM_ID as usize / 2
    }
}
