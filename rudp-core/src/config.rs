//! Recognized configuration for the sender and receiver FSMs. `serde`-
//! derived so a binary can layer an optional TOML file underneath its
//! CLI flags.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SenderConfig {
    pub host: IpAddr,
    pub port: u16,
    pub chunk_size: usize,
    pub window: u16,
    pub timeout_ms: u64,
    pub max_retries: u32,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            port: 9000,
            chunk_size: 1024,
            window: 8,
            timeout_ms: 300,
            max_retries: 20,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReceiverConfig {
    pub port: u16,
    pub outdir: String,
    pub window: u16,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            port: 9000,
            outdir: "./server_data".to_string(),
            window: 8,
        }
    }
}

/// Receiver session table capacity.
pub const SESSION_TABLE_CAPACITY: usize = 100;
/// Idle-session reap threshold.
pub const SESSION_IDLE_TIMEOUT_MS: u64 = 30_000;
/// Reaper sweep cadence.
pub const REAP_SWEEP_INTERVAL_MS: u64 = 10_000;
/// Non-blocking poll sleep used inside the sender's bounded waits and
/// the receiver's idle loop.
pub const POLL_SLEEP_MS: u64 = 5;
