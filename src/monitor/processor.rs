use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::container::ContainerID;
use crate::error::ResultOkLogExt;
use crate::layer::LayerCache;
use crate::metrics::Metrics;
use crate::stats::{ConnectionKey, ContainerStats};
use crate::sysdig::Event;

use super::classify::{EventKind, classify};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("processor was cancelled")]
    Cancelled,
    #[error("event queue closed")]
    QueueClosed,
    #[error("received event of container `{actual}` in processor of `{expected}`")]
    ContainerMismatch {
        expected: ContainerID,
        actual: String,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Running,
    Exited,
}

/// Applies the events of exactly one container to its statistics.
///
/// The processor is the only writer of the container's state. Layer lookups
/// touch the disk and are done before the state lock is taken.
pub struct Processor {
    id: ContainerID,
    state: Arc<RwLock<ContainerStats>>,
    layers: LayerCache,
    metrics: Metrics,
}

impl Processor {
    /// Creates the processor and publishes the container's identity series.
    pub fn new(state: Arc<RwLock<ContainerStats>>, metrics: Metrics) -> Self {
        let (id, layers) = {
            let stats = state.read();
            metrics.container_started(stats.id(), stats.file_system().layers_in_order());
            (stats.id().clone(), stats.file_system().layers_handle())
        };

        Self {
            id,
            state,
            layers: LayerCache::new(layers),
            metrics,
        }
    }

    /// Consumes the container's queue until it exits.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] for every way of stopping other than the exit of the
    /// container's root process.
    pub async fn run(mut self, mut rx: mpsc::Receiver<Event>, token: CancellationToken) -> Result<()> {
        loop {
            let event = tokio::select! {
                _ = token.cancelled() => return Err(Error::Cancelled),
                event = rx.recv() => event.ok_or(Error::QueueClosed)?,
            };

            match self.handle(&event) {
                Ok(Status::Running) => {}
                Ok(Status::Exited) => return Ok(()),
                Err(err) => {
                    self.clean_up();
                    return Err(err);
                }
            }
        }
    }

    /// Applies a single event.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ContainerMismatch`] if the event belongs to another container.
    pub fn handle(&mut self, event: &Event) -> Result<Status> {
        if event.container_id != self.id.as_str() {
            return Err(Error::ContainerMismatch {
                expected: self.id.clone(),
                actual: event.container_id.clone(),
            });
        }

        let kind = classify(event);
        if kind == EventKind::ProcessExit {
            log::debug!(
                target: "container processor",
                "root process exited: container_id={}, process={}, tid={}",
                self.id,
                event.proc_name,
                event.thread_id
            );
            self.clean_up();
            return Ok(Status::Exited);
        }

        if !event.is_inbound() {
            return Ok(Status::Running);
        }

        let file_layer = match kind {
            EventKind::FileIo { path, .. } => self.resolve_layer(path),
            _ => None,
        };

        let mut stats = self.state.write();
        if stats.upgrade_name(&event.container_name) {
            log::info!(
                target: "container processor",
                "resolved container name: container_id={}, name={}",
                self.id,
                stats.name()
            );
        }

        if !event.syscall_type.is_empty() {
            let call = stats
                .system_calls_mut()
                .record(&event.syscall_type, event.latency());
            self.metrics.record_syscall(&self.id, call);
        }

        match kind {
            EventKind::FileIo {
                path,
                direction,
                bytes,
                latency,
            } => {
                // Files outside every layer are not attributed.
                if let Some(layer) = file_layer {
                    let totals =
                        stats
                            .file_system_mut()
                            .record_io(path, &layer, direction, bytes, latency);
                    self.metrics.record_file_io(&self.id, &layer, path, totals);
                }
            }
            EventKind::NetworkIo {
                descriptor,
                protocol,
                direction,
                bytes,
            } => {
                if let Some(key) = parse_key(descriptor) {
                    let conn = stats
                        .network_mut()
                        .record_io(key.clone(), protocol, direction, bytes);
                    self.metrics.record_connection_io(&self.id, &key, conn);
                }
            }
            EventKind::ConnectionOpen {
                descriptor,
                protocol,
            } => {
                if let Some(key) = parse_key(descriptor) {
                    if stats.network_mut().open(key.clone(), protocol) {
                        log::trace!(
                            target: "container processor",
                            "connection opened: container_id={}, connection={}, process={}, tid={}",
                            self.id,
                            key,
                            event.proc_name,
                            event.thread_id
                        );
                    }
                }
            }
            EventKind::ConnectionClose { descriptor } => {
                if let Some(key) = parse_key(descriptor) {
                    if stats.network_mut().close(&key).is_some() {
                        self.metrics.remove_connection(&self.id, &key);
                    }
                }
            }
            EventKind::ProcessExit | EventKind::Syscall { .. } | EventKind::Unclassified => {}
        }

        Ok(Status::Running)
    }

    fn resolve_layer(&mut self, path: &str) -> Option<PathBuf> {
        match self.layers.resolve(path) {
            Ok(layer) => layer.map(Path::to_path_buf),
            Err(err) => {
                log::warn!(
                    target: "container processor",
                    "skipping file I/O: container_id={}, error={}",
                    self.id,
                    err
                );
                None
            }
        }
    }

    fn clean_up(&self) {
        self.metrics.remove_container(&self.state.read());
    }
}

fn parse_key(descriptor: &str) -> Option<ConnectionKey> {
    descriptor
        .parse::<ConnectionKey>()
        .ok_log_at(log::Level::Debug)
}
