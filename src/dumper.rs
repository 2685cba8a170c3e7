//! Two-process metadata dumper (spec §4.12): writing a fresh metadata image
//! is forked off into a child process so a slow dump never blocks the
//! event loop, with two strategies — a direct in-process dump, or exec'ing
//! an external merge tool against the previous image plus the changelog.
//!
//! The exact "always (a) after a failed (b)" fallback policy goes beyond a
//! one-line mention (spec §C.7). The child-process boundary is abstracted
//! behind [`ChildProcess`] so the fallback policy itself is unit-testable
//! without actually forking, the same isolate-behind-a-trait shape the
//! allocator uses for deterministic tests.

use tracing::{error, info, warn};

use crate::error::Status;

/// Which of the two dump strategies to use for the next dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpStrategy {
    /// (a) Dump the full image directly from the current in-memory state.
    Direct,
    /// (b) Exec an external tool to merge the previous image with the
    /// accumulated changelog — cheaper when the previous image is recent.
    ExternalMerge,
}

/// Abstraction over "run a child process to completion and read its final
/// line", decoupling the fallback policy from actually forking.
pub trait ChildProcess {
    /// Runs to completion, returning the child's final output line
    /// (`"OK\n"` or `"ERR\n"` per spec §4.12).
    fn run(&self, strategy: DumpStrategy) -> std::io::Result<String>;
}

/// Drives the strategy-selection policy across repeated dump requests.
pub struct Dumper {
    last_strategy_failed: bool,
}

impl Dumper {
    pub fn new() -> Self {
        Self { last_strategy_failed: false }
    }

    /// A previous `ExternalMerge` failure forces `Direct` next time;
    /// otherwise `ExternalMerge` is preferred since it avoids re-dumping
    /// the whole tree.
    pub fn choose_strategy(&self) -> DumpStrategy {
        if self.last_strategy_failed {
            DumpStrategy::Direct
        } else {
            DumpStrategy::ExternalMerge
        }
    }

    /// Performs one dump attempt against `child`, updating the strategy
    /// policy from the outcome.
    pub fn perform(&mut self, child: &dyn ChildProcess) -> Result<(), Status> {
        let strategy = self.choose_strategy();
        info!(?strategy, "starting metadata dump");
        let output = child.run(strategy).map_err(|e| {
            error!(error = %e, "failed to spawn metadata dump child process");
            Status::IO
        })?;

        let ok = output.trim_end() == "OK";
        match (strategy, ok) {
            (DumpStrategy::ExternalMerge, false) => {
                warn!("external merge dump failed, forcing direct dump next time");
                self.last_strategy_failed = true;
            }
            (_, true) => self.last_strategy_failed = false,
            (DumpStrategy::Direct, false) => {
                error!("direct metadata dump failed");
            }
        }

        if ok {
            Ok(())
        } else {
            Err(Status::IO)
        }
    }
}

impl Default for Dumper {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct ScriptedChild(Vec<&'static str>, Cell<usize>);

    impl ChildProcess for ScriptedChild {
        fn run(&self, _strategy: DumpStrategy) -> std::io::Result<String> {
            let i = self.1.get();
            self.1.set(i + 1);
            Ok(self.0[i].to_owned())
        }
    }

    #[test]
    fn prefers_external_merge_until_it_fails_once() {
        let mut dumper = Dumper::new();
        assert_eq!(dumper.choose_strategy(), DumpStrategy::ExternalMerge);

        let child = ScriptedChild(vec!["ERR\n"], Cell::new(0));
        assert!(dumper.perform(&child).is_err());
        assert_eq!(dumper.choose_strategy(), DumpStrategy::Direct);
    }

    #[test]
    fn successful_direct_dump_restores_external_merge_preference() {
        let mut dumper = Dumper::new();
        dumper.perform(&ScriptedChild(vec!["ERR\n"], Cell::new(0))).unwrap_err();
        assert_eq!(dumper.choose_strategy(), DumpStrategy::Direct);

        dumper.perform(&ScriptedChild(vec!["OK\n"], Cell::new(0))).unwrap();
        assert_eq!(dumper.choose_strategy(), DumpStrategy::ExternalMerge);
    }
}
