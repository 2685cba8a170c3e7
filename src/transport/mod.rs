//! Master↔shadow transport (spec §4.5): wire framing, shadow registration
//! and live-streaming state, and the download sub-protocol a shadow uses
//! to catch up from a cold start.
//!
//! Split across files by wire concern — byte-level codecs, message-level
//! protocol, connection-level driver state — rather than one large file.

pub mod download;
pub mod framing;
pub mod shadow;

pub use download::{DownloadSession, FileId, MAX_CHUNK_LEN, MAX_RETRIES};
pub use framing::{Frame, FrameDecoder, MAX_CHUNKSERVER_PACKET, MAX_CONTROL_PACKET};
pub use shadow::{ApplyErrorReply, ConnectionState, RegisterOutcome, RegisterShadow, ShadowConnection};

/// `timeout/3`: how long the outgoing side may sit idle before a NOP keeps
/// the connection from looking dead to the peer's `timeout`-based
/// disconnect check (spec §4.5).
pub fn nop_interval(timeout: std::time::Duration) -> std::time::Duration {
    timeout / 3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nop_interval_is_a_third_of_the_session_timeout() {
        assert_eq!(nop_interval(std::time::Duration::from_secs(30)), std::time::Duration::from_secs(10));
    }
}
