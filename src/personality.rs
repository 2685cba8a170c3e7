//! Personality manager (spec §4.1 "Personality manager"): tracks whether
//! this process is acting as master or shadow, and drives the
//! shadow-to-master promotion sequence.
//!
//! The promotion sequence itself (reject promotion while still
//! downloading, drain in-flight shadow connections, flip the role
//! atomically, log it) goes beyond a one-line mention (spec §C.6);
//! structured as a small state machine, an enum-with-guarded-transitions
//! shape matching how session lifecycle is modeled elsewhere in this
//! codebase.

use tracing::{info, warn};

use crate::config::Personality as ConfiguredPersonality;
use crate::error::Status;

/// Live role of this process, distinct from [`ConfiguredPersonality`] (the
/// boot-time configuration) because a shadow may be promoted to master at
/// runtime without restarting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Master,
    /// A shadow still downloading its initial metadata image may not be
    /// promoted.
    ShadowDownloading,
    /// A shadow caught up and streaming live changelog records from its
    /// master; this is the only shadow state promotion is accepted from.
    ShadowSynchronized,
}

/// Drives the personality state machine for one process.
#[derive(Debug)]
pub struct PersonalityManager {
    role: Role,
}

impl PersonalityManager {
    /// Boots into the role implied by the configured personality. An
    /// `ha-cluster-managed` deployment still boots as a downloading shadow;
    /// its cluster manager is expected to request promotion once it decides
    /// this node should lead (spec §4.1).
    pub fn boot(configured: ConfiguredPersonality) -> Self {
        let role = match configured {
            ConfiguredPersonality::Master => Role::Master,
            ConfiguredPersonality::Shadow | ConfiguredPersonality::HaClusterManaged => Role::ShadowDownloading,
        };
        info!(?role, "personality manager booted");
        Self { role }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_master(&self) -> bool {
        self.role == Role::Master
    }

    /// Marks a shadow as having caught up to its master's live changelog
    /// stream (called once `transport::shadow`'s connection reaches
    /// `Synchronized`).
    pub fn mark_synchronized(&mut self) -> Result<(), Status> {
        if self.role != Role::ShadowDownloading {
            return Err(Status::Invalid);
        }
        self.role = Role::ShadowSynchronized;
        Ok(())
    }

    /// Promotes a synchronized shadow to master. Refuses a shadow that is
    /// still downloading its initial image, since promotion before the
    /// metadata is actually current would serve stale data as if
    /// authoritative, and is a no-op if already master.
    pub fn promote(&mut self) -> Result<(), Status> {
        match self.role {
            Role::Master => Ok(()),
            Role::ShadowDownloading => {
                warn!("refusing promotion: shadow has not finished its initial metadata download");
                Err(Status::NotSupported)
            }
            Role::ShadowSynchronized => {
                self.role = Role::Master;
                info!("promoted shadow to master");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boots_master_directly() {
        let pm = PersonalityManager::boot(ConfiguredPersonality::Master);
        assert!(pm.is_master());
    }

    #[test]
    fn shadow_cannot_be_promoted_until_synchronized() {
        let mut pm = PersonalityManager::boot(ConfiguredPersonality::Shadow);
        assert_eq!(pm.promote().unwrap_err(), Status::NotSupported);
        pm.mark_synchronized().unwrap();
        pm.promote().unwrap();
        assert!(pm.is_master());
    }

    #[test]
    fn promoting_an_already_master_process_is_a_no_op() {
        let mut pm = PersonalityManager::boot(ConfiguredPersonality::Master);
        pm.promote().unwrap();
        assert!(pm.is_master());
    }
}
