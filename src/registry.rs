//! Chunk-server registry (spec §4.6): tracks every connected chunk server's
//! address, label, capacity, load, and error history, independent of the
//! chunk-to-server assignment the [`crate::chunk`] and [`crate::placement`]
//! modules own.
//!
//! Grounded on the connection-table shape of a per-client session map keyed
//! by a small integer id, generalized from per-NFS-client bookkeeping to
//! per-chunk-server bookkeeping, plus the registration handshake and
//! disconnect-cleanup contract of spec §4.6.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::Status;

/// Ring size for recent-error accounting per server (spec §4.9 `LASTERRSIZE`).
pub const LASTERRSIZE: usize = 30;
/// Error count within [`LASTERRTIME`] that marks a server's reporting
/// folder damaged (spec §4.9 `ERRORLIMIT`).
pub const ERRORLIMIT: usize = 5;
/// Window, in seconds, the error-limit check looks back over (spec §4.9
/// `LASTERRTIME`).
pub const LASTERRTIME: i64 = 60;

/// Opaque handle identifying one registered chunk server for the lifetime
/// of its connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerId(pub u32);

/// Disk I/O failures a chunk server reports against itself, distinguished
/// because only `Eio`/`Erofs` count toward folder-damage (spec §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Eio,
    Erofs,
    Other,
}

impl ErrorKind {
    fn counts_toward_damage(self) -> bool {
        matches!(self, ErrorKind::Eio | ErrorKind::Erofs)
    }
}

/// One registered chunk server.
#[derive(Debug, Clone)]
pub struct ChunkServerEntry {
    pub ip: [u8; 4],
    pub port: u16,
    pub label: String,
    pub version: u32,
    pub used_space: u64,
    pub total_space: u64,
    pub chunk_count: u64,
    /// `Status{load_factor}` as last reported (spec §4.6 periodic status).
    pub load_factor: u32,
    /// Carry accumulator for round-robin rebalance source selection (spec
    /// §4.8).
    pub carry: f64,
    error_ring: Vec<(i64, ErrorKind)>,
    pub folder_damaged: bool,
}

impl ChunkServerEntry {
    fn new(ip: [u8; 4], port: u16, version: u32) -> Self {
        Self {
            ip,
            port,
            label: "_".to_owned(),
            version,
            used_space: 0,
            total_space: 0,
            chunk_count: 0,
            load_factor: 0,
            carry: 0.0,
            error_ring: Vec::new(),
            folder_damaged: false,
        }
    }

    pub fn usage_fraction(&self) -> f64 {
        if self.total_space == 0 {
            1.0
        } else {
            self.used_space as f64 / self.total_space as f64
        }
    }

    /// Server weight used by placement (spec §4.8): `1024 * (1 - used/total)`,
    /// with `LOAD_FACTOR_PENALTY * load_factor / 100` added to the usage
    /// fraction before computing weight so heavily loaded servers look
    /// fuller than they physically are.
    pub fn weight(&self, load_factor_penalty: f64) -> f64 {
        let penalized_usage = (self.usage_fraction() + load_factor_penalty * self.load_factor as f64 / 100.0).min(1.0);
        1024.0 * (1.0 - penalized_usage)
    }

    pub fn available_space(&self) -> u64 {
        self.total_space.saturating_sub(self.used_space)
    }

    /// Records an I/O error against this server at time `now`, evicting
    /// entries older than [`LASTERRTIME`]; returns whether this pushes the
    /// server over [`ERRORLIMIT`] (folder damage).
    pub fn record_error(&mut self, now: i64, kind: ErrorKind) -> bool {
        self.error_ring.retain(|(ts, _)| now - ts < LASTERRTIME);
        self.error_ring.push((now, kind));
        if self.error_ring.len() > LASTERRSIZE {
            self.error_ring.remove(0);
        }
        let damaging = self.error_ring.iter().filter(|(_, k)| k.counts_toward_damage()).count();
        if damaging >= ERRORLIMIT {
            self.folder_damaged = true;
        }
        self.folder_damaged
    }
}

fn is_loopback(ip: [u8; 4]) -> bool {
    ip[0] == 127
}

/// Registry of all currently connected chunk servers.
#[derive(Debug, Default)]
pub struct Registry {
    servers: HashMap<ServerId, ChunkServerEntry>,
    next_id: u32,
}

impl Registry {
    pub fn new() -> Self {
        Self { servers: HashMap::new(), next_id: 1 }
    }

    /// Modern 3-step registration (spec §4.6: `RegisterHost`, followed by
    /// `RegisterSpace`/`RegisterLabel`). Rejects loopback addresses and a
    /// duplicate `(ip, port)` pair, both per spec §4.6.
    pub fn register_host(&mut self, ip: [u8; 4], port: u16, version: u32) -> Result<ServerId, Status> {
        if is_loopback(ip) {
            return Err(Status::Invalid);
        }
        if self.servers.values().any(|s| s.ip == ip && s.port == port) {
            return Err(Status::Exists);
        }
        let id = ServerId(self.next_id);
        self.next_id += 1;
        self.servers.insert(id, ChunkServerEntry::new(ip, port, version));
        Ok(id)
    }

    pub fn register_space(&mut self, id: ServerId, used: u64, total: u64, chunk_count: u64) -> Result<(), Status> {
        let entry = self.servers.get_mut(&id).ok_or(Status::NotFound)?;
        entry.used_space = used;
        entry.total_space = total;
        entry.chunk_count = chunk_count;
        Ok(())
    }

    pub fn register_label(&mut self, id: ServerId, label: impl Into<String>) -> Result<(), Status> {
        let entry = self.servers.get_mut(&id).ok_or(Status::NotFound)?;
        entry.label = label.into();
        Ok(())
    }

    /// Periodic `Status{load_factor}` update (spec §4.6).
    pub fn update_status(&mut self, id: ServerId, load_factor: u32) -> Result<(), Status> {
        let entry = self.servers.get_mut(&id).ok_or(Status::NotFound)?;
        entry.load_factor = load_factor;
        Ok(())
    }

    /// Legacy registration packets (five protocol versions predate the
    /// modern 3-step handshake): collapse them to the same outcome, since
    /// every legacy packet version carries used/total/chunk-count inline
    /// with the initial registration rather than as separate steps.
    pub fn register_legacy(
        &mut self,
        ip: [u8; 4],
        port: u16,
        version: u32,
        used: u64,
        total: u64,
        chunk_count: u64,
    ) -> Result<ServerId, Status> {
        let id = self.register_host(ip, port, version)?;
        self.register_space(id, used, total, chunk_count)?;
        Ok(id)
    }

    pub fn get(&self, id: ServerId) -> Option<&ChunkServerEntry> {
        self.servers.get(&id)
    }

    pub fn get_mut(&mut self, id: ServerId) -> Option<&mut ChunkServerEntry> {
        self.servers.get_mut(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ServerId, &ChunkServerEntry)> {
        self.servers.iter().map(|(id, e)| (*id, e))
    }

    /// Number of already-chosen servers (from `excluding`) that share an IP
    /// with `candidate` — used by placement's per-IP de-duplication (spec
    /// §4.6, testable property 7).
    pub fn count_at_same_ip(&self, candidate: ServerId, chosen: &[ServerId]) -> usize {
        let Some(ip) = self.servers.get(&candidate).map(|s| s.ip) else { return 0 };
        chosen.iter().filter(|id| self.servers.get(id).map(|s| s.ip) == Some(ip)).count()
    }

    /// Removes a disconnected server from the registry. Scanning the chunk
    /// table to evict it from copy-sets is the caller's job (`chunk::ChunkTable
    /// ::remove_server`) since this registry doesn't own chunk state (spec
    /// §4.6 "disconnect handling").
    pub fn disconnect(&mut self, id: ServerId) -> Option<ChunkServerEntry> {
        self.servers.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

/// How long a registered-but-silent chunk server may go without a `Status`
/// update before it is treated as disconnected (a per-session idle timeout,
/// generalized to this registry's connections).
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_loopback_and_duplicate_registration() {
        let mut reg = Registry::new();
        assert_eq!(reg.register_host([127, 0, 0, 1], 9422, 1).unwrap_err(), Status::Invalid);

        reg.register_host([10, 0, 0, 1], 9422, 1).unwrap();
        assert_eq!(reg.register_host([10, 0, 0, 1], 9422, 1).unwrap_err(), Status::Exists);
    }

    #[test]
    fn weight_decreases_with_usage_and_load_penalty() {
        let mut reg = Registry::new();
        let id = reg.register_host([10, 0, 0, 1], 9422, 1).unwrap();
        reg.register_space(id, 50, 100, 10).unwrap();
        let empty_weight = reg.get(id).unwrap().weight(0.0);
        assert!((empty_weight - 512.0).abs() < 1e-9);

        reg.update_status(id, 50).unwrap();
        let penalized = reg.get(id).unwrap().weight(0.1);
        assert!(penalized < empty_weight);
    }

    #[test]
    fn five_io_errors_within_window_marks_folder_damaged() {
        let mut entry = ChunkServerEntry::new([10, 0, 0, 1], 9422, 1);
        for t in 0..ERRORLIMIT - 1 {
            assert!(!entry.record_error(t as i64, ErrorKind::Eio));
        }
        assert!(entry.record_error((ERRORLIMIT - 1) as i64, ErrorKind::Eio));
    }

    #[test]
    fn errors_outside_the_window_do_not_accumulate() {
        let mut entry = ChunkServerEntry::new([10, 0, 0, 1], 9422, 1);
        entry.record_error(0, ErrorKind::Eio);
        entry.record_error(0, ErrorKind::Eio);
        assert!(!entry.record_error(LASTERRTIME + 1, ErrorKind::Eio));
    }

    #[test]
    fn per_ip_dedup_counts_existing_choices_at_same_address() {
        let mut reg = Registry::new();
        let a = reg.register_host([10, 0, 0, 1], 9422, 1).unwrap();
        let b = reg.register_host([10, 0, 0, 1], 9423, 1).unwrap();
        let c = reg.register_host([10, 0, 0, 2], 9422, 1).unwrap();
        assert_eq!(reg.count_at_same_ip(b, &[a]), 1);
        assert_eq!(reg.count_at_same_ip(c, &[a]), 0);
    }
}
