//! Per-container activity statistics built from tracer events.
//!
//! A [`ContainerStats`] is the aggregation record of one container. It is
//! mutated by the container's processor only and read by the query API through
//! [`ContainerStats::snapshot`].
//!
//! # Main types
//!
//! - [`SyscallStats`]: invocation counts and latency per system call.
//! - [`FileSystemStats`]: per-file and per-layer I/O, plus slow operation samples.
//! - [`NetworkStats`]: traffic per active [`ConnectionKey`].
//! - [`ContainerSnapshot`]: a serializable copy of everything above.

mod connection;
mod error;
mod filesystem;
mod network;
mod syscall;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

pub use connection::ConnectionKey;
pub use error::ParseConnectionError;
pub use filesystem::{
    DEVICE_PREFIX, File, FileIoTotals, FileSystemStats, IoCall, Layer, SlowIoSamples,
    SlowIoThresholds,
};
pub use network::{Connection, NetworkStats};
pub use syscall::{SyscallStats, SystemCall};

use crate::container::{self, ContainerID};

/// Whether an I/O operation moved data into or out of the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoDirection {
    Read,
    Write,
}

/// A pair of byte counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ByteCounts {
    pub read_in: u64,
    pub write_out: u64,
}

impl ByteCounts {
    /// Adds `bytes` in `direction`, saturating at `u64::MAX`.
    pub fn add(&mut self, direction: IoDirection, bytes: u64) {
        match direction {
            IoDirection::Read => self.read_in = self.read_in.saturating_add(bytes),
            IoDirection::Write => self.write_out = self.write_out.saturating_add(bytes),
        }
    }
}

fn serialize_nanos<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u128(duration.as_nanos())
}

/// The aggregation record of one container.
#[derive(Debug, Clone)]
pub struct ContainerStats {
    id: ContainerID,
    name: String,
    system_calls: SyscallStats,
    file_system: FileSystemStats,
    network: NetworkStats,
}

impl ContainerStats {
    /// Creates empty statistics.
    ///
    /// Placeholder names are stored as [`container::UNKNOWN_CONTAINER_NAME`].
    pub fn new(
        id: ContainerID,
        name: &str,
        layers_in_order: Vec<PathBuf>,
        thresholds: SlowIoThresholds,
    ) -> Self {
        let name = if container::is_resolved_name(name) {
            name.to_owned()
        } else {
            container::UNKNOWN_CONTAINER_NAME.to_owned()
        };
        Self {
            id,
            name,
            system_calls: SyscallStats::default(),
            file_system: FileSystemStats::new(layers_in_order, thresholds),
            network: NetworkStats::default(),
        }
    }

    pub fn id(&self) -> &ContainerID {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replaces the placeholder name once the real one is known.
    ///
    /// Returns `true` if the name changed.
    pub fn upgrade_name(&mut self, name: &str) -> bool {
        if self.name == container::UNKNOWN_CONTAINER_NAME && container::is_resolved_name(name) {
            self.name = name.to_owned();
            return true;
        }
        false
    }

    pub fn system_calls(&self) -> &SyscallStats {
        &self.system_calls
    }

    pub fn system_calls_mut(&mut self) -> &mut SyscallStats {
        &mut self.system_calls
    }

    pub fn file_system(&self) -> &FileSystemStats {
        &self.file_system
    }

    pub fn file_system_mut(&mut self) -> &mut FileSystemStats {
        &mut self.file_system
    }

    pub fn network(&self) -> &NetworkStats {
        &self.network
    }

    pub fn network_mut(&mut self) -> &mut NetworkStats {
        &mut self.network
    }

    /// Copies the current state into a serializable value.
    pub fn snapshot(&self) -> ContainerSnapshot {
        let mut active_connections: Vec<FlattenedConnection> = self
            .network
            .connections()
            .map(|(key, conn)| FlattenedConnection {
                key: key.clone(),
                connection: conn.clone(),
            })
            .collect();
        active_connections.sort_by(|a, b| a.key.cmp(&b.key));

        ContainerSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            system_calls: self
                .system_calls
                .calls()
                .map(|call| (call.name.clone(), call.clone()))
                .collect(),
            total_calls: self.system_calls.total_calls(),
            layers_in_order: self.file_system.layers_in_order().to_vec(),
            accessed_layers: self.file_system.layers().cloned().collect(),
            accessed_files: self
                .file_system
                .files()
                .map(|file| (file.name.clone(), file.clone()))
                .collect(),
            slow_io: self.file_system.slow_io().clone(),
            file_system_totals: self.file_system.totals(),
            active_connections,
            network_totals: self.network.totals(),
        }
    }
}

/// A connection with its key fields merged into the value fields.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct FlattenedConnection {
    #[serde(flatten)]
    pub key: ConnectionKey,
    #[serde(flatten)]
    pub connection: Connection,
}

/// Point-in-time copy of a [`ContainerStats`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct ContainerSnapshot {
    pub id: ContainerID,
    pub name: String,
    pub system_calls: BTreeMap<String, SystemCall>,
    pub total_calls: u64,
    pub layers_in_order: Vec<PathBuf>,
    pub accessed_layers: Vec<Layer>,
    pub accessed_files: BTreeMap<String, File>,
    pub slow_io: SlowIoSamples,
    pub file_system_totals: ByteCounts,
    pub active_connections: Vec<FlattenedConnection>,
    pub network_totals: ByteCounts,
}
