// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Process identity used for loop prevention and message identities.
//!
//! The numeric id is an FNV-1a hash of `host:pid:start_millis`, so two
//! restarts of the same OS process on the same host never collide.

use std::net::IpAddr;
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Stable identity of one running process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessIdentity {
    host_address: String,
    os_pid: u32,
    start_millis: u64,
    process_name: String,
    id: u64,
}

impl ProcessIdentity {
    /// Build an identity from explicit parts.
    pub fn new(host_address: impl Into<String>, os_pid: u32, start_millis: u64) -> Self {
        let host_address = host_address.into();
        let process_name = format!("{}:{}:{}", host_address, os_pid, start_millis);
        let mut id = fnv1a64(process_name.as_bytes());
        // zero means "no process" on the wire
        if id == 0 {
            id = 1;
        }
        Self {
            host_address,
            os_pid,
            start_millis,
            process_name,
            id,
        }
    }

    /// Identity of the current OS process, computed once.
    pub fn current() -> &'static ProcessIdentity {
        static CURRENT: OnceLock<ProcessIdentity> = OnceLock::new();
        CURRENT.get_or_init(|| {
            let start = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0);
            Self::new(local_host_address(), std::process::id(), start)
        })
    }

    pub fn host_address(&self) -> &str {
        &self.host_address
    }

    pub fn os_pid(&self) -> u32 {
        self.os_pid
    }

    pub fn start_millis(&self) -> u64 {
        self.start_millis
    }

    /// Human-readable `host:pid:start` string carried in batch headers.
    pub fn process_name(&self) -> &str {
        &self.process_name
    }

    /// Numeric id compared for loop prevention.
    pub fn id(&self) -> u64 {
        self.id
    }
}

fn local_host_address() -> String {
    match local_ip_address::local_ip() {
        Ok(ip) => ip.to_string(),
        Err(e) => {
            log::debug!("[PROCESS] local_ip() failed ({}), using loopback", e);
            IpAddr::from([127, 0, 0, 1]).to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_parts_same_id() {
        let a = ProcessIdentity::new("10.0.0.1", 42, 1_700_000_000_000);
        let b = ProcessIdentity::new("10.0.0.1", 42, 1_700_000_000_000);
        assert_eq!(a.id(), b.id());
        assert_eq!(a.process_name(), "10.0.0.1:42:1700000000000");
    }

    #[test]
    fn test_restart_changes_id() {
        let a = ProcessIdentity::new("10.0.0.1", 42, 1_700_000_000_000);
        let b = ProcessIdentity::new("10.0.0.1", 42, 1_700_000_000_001);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_current_is_stable() {
        let a = ProcessIdentity::current();
        let b = ProcessIdentity::current();
        assert_eq!(a.id(), b.id());
        assert_eq!(a.os_pid(), std::process::id());
        assert_ne!(a.id(), 0);
    }
}
