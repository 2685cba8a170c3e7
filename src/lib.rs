//! `lizardfs_mdcore`: the metadata-replication and chunk-placement core of
//! a distributed POSIX file system, independent of its network transport
//! and on-disk chunk storage (spec §1).

pub mod changelog;
pub mod chunk;
pub mod cli;
pub mod config;
pub mod dumper;
pub mod error;
pub mod eventloop;
pub mod goal;
pub mod image;
pub mod itree;
pub mod lockfile;
pub mod namespace;
pub mod opqueue;
pub mod personality;
pub mod placement;
pub mod registry;
pub mod snapshot;
pub mod transport;
pub mod workers;

pub use error::{Result, Status};
