//! Shadow registration, live changelog streaming, and the per-connection
//! state machine (spec §4.5).
//!
//! The "retriable vs. schedule-a-dump" branch on apply error mirrors the
//! teacher's `ProcResult::Error`/`Ok` split in `stream_writer.rs`, widened
//! from a single RPC reply into a stateful connection that can move itself
//! into `Downloading` or `Limbo`.

use crate::error::Status;

/// Message type tags carried in [`super::framing::Frame::msg_type`] for
/// this connection. Values are local to this implementation, not a wire
/// compatibility contract with any other system.
pub mod msg {
    pub const REGISTER_SHADOW: u32 = 1;
    pub const STATUS: u32 = 2;
    pub const RESPONSE: u32 = 3;
    pub const METACHANGES_LOG: u32 = 4;
    pub const FORCE_LOG_ROTATE: u32 = 5;
    pub const CHANGELOG_APPLY_ERROR: u32 = 6;
    pub const ERROR_DELAYED: u32 = 7;
    pub const OK: u32 = 8;
}

/// Marker byte prefixing a live changelog line (spec §4.5
/// `METACHANGES_LOG{0xFF, version, text\0}`).
pub const METACHANGES_MARKER: u8 = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterShadow {
    pub version: u32,
    pub timeout_ms: u32,
    pub have_metadata_version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Rejected(Status),
    /// `reply_version` is either the shadow's own version (catch-up by
    /// ring replay is possible) or the master's current version (forcing
    /// a full image download).
    Accepted { master_version: u64, reply_version: u64 },
}

/// Lifecycle of one shadow's connection to the master (spec §4.5 state
/// diagram).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    None,
    Downloading,
    Synchronized,
    /// A transient apply error while synchronized; the master retries its
    /// background dump rather than immediately forcing a re-download.
    Limbo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyErrorReply {
    ErrorDelayed,
    DumpThenOk,
}

/// One shadow's master-side connection state.
#[derive(Debug)]
pub struct ShadowConnection {
    state: ConnectionState,
    registered: Option<RegisterShadow>,
}

impl ShadowConnection {
    pub fn new() -> Self {
        Self { state: ConnectionState::None, registered: None }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Handles an incoming `RegisterShadow`. `ring_has_version` tells
    /// whether the master's in-memory changelog ring still covers the
    /// shadow's reported version, letting it skip a full download.
    pub fn register(
        &mut self,
        req: RegisterShadow,
        master_version: u64,
        ring_has_version: impl FnOnce(u64) -> bool,
    ) -> RegisterOutcome {
        if req.timeout_ms == 0 {
            return RegisterOutcome::Rejected(Status::Invalid);
        }
        self.registered = Some(req);
        self.state = ConnectionState::Downloading;
        let reply_version =
            if ring_has_version(req.have_metadata_version) { req.have_metadata_version } else { master_version };
        RegisterOutcome::Accepted { master_version, reply_version }
    }

    /// Files and in-memory reload both succeeded (spec §4.5 "files OK +
    /// load OK"): the shadow is now caught up and receiving live streams.
    pub fn mark_synchronized(&mut self) -> Result<(), Status> {
        if self.state != ConnectionState::Downloading {
            return Err(Status::Invalid);
        }
        self.state = ConnectionState::Synchronized;
        Ok(())
    }

    /// Handles a `ChangelogApplyError{status}` from a synchronized shadow.
    /// Retriable statuses keep the shadow synchronized and ask it to retry;
    /// anything else schedules a background dump and sends the shadow back
    /// to `Downloading` once that dump completes.
    pub fn apply_error(&mut self, status: Status) -> Result<ApplyErrorReply, Status> {
        if self.state != ConnectionState::Synchronized {
            return Err(Status::Invalid);
        }
        if status.is_retryable() {
            self.state = ConnectionState::Limbo;
            Ok(ApplyErrorReply::ErrorDelayed)
        } else {
            self.state = ConnectionState::Downloading;
            Ok(ApplyErrorReply::DumpThenOk)
        }
    }

    /// A `Limbo` connection's retried dump completed; it resumes streaming
    /// without a full re-download.
    pub fn resume_from_limbo(&mut self) -> Result<(), Status> {
        if self.state != ConnectionState::Limbo {
            return Err(Status::Invalid);
        }
        self.state = ConnectionState::Synchronized;
        Ok(())
    }

    pub fn registered_timeout_ms(&self) -> Option<u32> {
        self.registered.map(|r| r.timeout_ms)
    }
}

impl Default for ShadowConnection {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the payload for one `METACHANGES_LOG` broadcast (spec §4.5).
pub fn metachanges_log_payload(version: u64, text: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(1 + 8 + text.len() + 1);
    payload.push(METACHANGES_MARKER);
    payload.extend_from_slice(&version.to_be_bytes());
    payload.extend_from_slice(text.as_bytes());
    payload.push(0);
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_prefers_ring_replay_over_full_download() {
        let mut conn = ShadowConnection::new();
        let outcome =
            conn.register(RegisterShadow { version: 3, timeout_ms: 10_000, have_metadata_version: 41 }, 50, |v| v == 41);
        assert_eq!(outcome, RegisterOutcome::Accepted { master_version: 50, reply_version: 41 });
        assert_eq!(conn.state(), ConnectionState::Downloading);
    }

    #[test]
    fn registration_forces_full_download_when_ring_has_rolled_past() {
        let mut conn = ShadowConnection::new();
        let outcome =
            conn.register(RegisterShadow { version: 3, timeout_ms: 10_000, have_metadata_version: 5 }, 50, |_| false);
        assert_eq!(outcome, RegisterOutcome::Accepted { master_version: 50, reply_version: 50 });
    }

    #[test]
    fn full_lifecycle_through_an_apply_error_and_back() {
        let mut conn = ShadowConnection::new();
        conn.register(RegisterShadow { version: 3, timeout_ms: 10_000, have_metadata_version: 0 }, 10, |_| true);
        conn.mark_synchronized().unwrap();
        assert_eq!(conn.state(), ConnectionState::Synchronized);

        assert_eq!(conn.apply_error(Status::Delayed).unwrap(), ApplyErrorReply::ErrorDelayed);
        assert_eq!(conn.state(), ConnectionState::Limbo);
        conn.resume_from_limbo().unwrap();
        assert_eq!(conn.state(), ConnectionState::Synchronized);

        assert_eq!(conn.apply_error(Status::MetadataChecksumMismatch).unwrap(), ApplyErrorReply::DumpThenOk);
        assert_eq!(conn.state(), ConnectionState::Downloading);
    }

    #[test]
    fn apply_error_before_synchronized_is_rejected() {
        let mut conn = ShadowConnection::new();
        assert_eq!(conn.apply_error(Status::Delayed).unwrap_err(), Status::Invalid);
    }
}
