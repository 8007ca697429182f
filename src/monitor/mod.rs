use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::container::{self, ContainerID};
use crate::inspect::ContainerInspector;
use crate::metrics::Metrics;
use crate::stats::{ContainerSnapshot, ContainerStats, SlowIoThresholds};
use crate::sysdig::Event;

pub mod classify;
pub mod processor;

pub use classify::EventKind;
pub use processor::Processor;

/// Tunables of the [`Monitor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    /// How long a stopped container stays registered, so late events are dropped quietly.
    pub grace_period: Duration,
    /// Capacity of each container's event queue.
    pub queue_size: usize,
    pub slow_io_thresholds: SlowIoThresholds,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_millis(50),
            queue_size: 512,
            slow_io_thresholds: SlowIoThresholds::default(),
        }
    }
}

struct MonitoredContainer {
    state: Arc<RwLock<ContainerStats>>,
    tx: mpsc::Sender<Event>,
}

/// Routes tracer events to one processor per container and answers queries
/// about the tracked containers.
pub struct Monitor<I> {
    containers: DashMap<ContainerID, MonitoredContainer>,
    inspector: I,
    metrics: Metrics,
    settings: MonitorSettings,
}

impl<I: ContainerInspector> Monitor<I> {
    pub fn new(inspector: I, metrics: Metrics, settings: MonitorSettings) -> Self {
        Self {
            containers: DashMap::new(),
            inspector,
            metrics,
            settings,
        }
    }

    /// Dispatches events until `rx` closes or `token` is cancelled.
    ///
    /// Processors run on child tokens of `token` and stop with it.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<Event>, token: CancellationToken) {
        loop {
            let event = tokio::select! {
                _ = token.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            self.dispatch(event, &token).await;
        }
        log::info!(target: "container monitor", "stopped dispatching events");
    }

    async fn dispatch(self: &Arc<Self>, event: Event, token: &CancellationToken) {
        // Host events and empty ids are not attributed to any container.
        let Ok(id) = ContainerID::new(&event.container_id) else {
            return;
        };

        let tx = self.containers.get(&id).map(|entry| entry.tx.clone());
        let tx = match tx {
            Some(tx) => tx,
            None => match self.register(id.clone(), &event, token).await {
                Some(tx) => tx,
                None => return,
            },
        };

        tokio::select! {
            _ = token.cancelled() => {}
            result = tx.send(event) => {
                if result.is_err() {
                    log::trace!(
                        target: "container monitor",
                        "dropping event of stopped container: container_id={}",
                        id
                    );
                }
            }
        }
    }

    async fn register(
        self: &Arc<Self>,
        id: ContainerID,
        event: &Event,
        token: &CancellationToken,
    ) -> Option<mpsc::Sender<Event>> {
        let metadata = match self.inspector.inspect(&id).await {
            Ok(metadata) => metadata,
            Err(err) => {
                log::warn!(
                    target: "container monitor",
                    "failed to inspect container: container_id={}, error={}",
                    id,
                    err
                );
                return None;
            }
        };
        if metadata.layers.is_empty() {
            log::warn!(
                target: "container monitor",
                "no layers known, file I/O will not be attributed: container_id={}",
                id
            );
        }

        let name = if container::is_resolved_name(&event.container_name) {
            event.container_name.as_str()
        } else {
            metadata.name.as_str()
        };
        let stats = ContainerStats::new(
            id.clone(),
            name,
            metadata.layers,
            self.settings.slow_io_thresholds,
        );
        log::info!(
            target: "container monitor",
            "tracking container: container_id={}, name={}",
            id,
            stats.name()
        );

        let state = Arc::new(RwLock::new(stats));
        let (tx, rx) = mpsc::channel(self.settings.queue_size);
        self.containers.insert(
            id.clone(),
            MonitoredContainer {
                state: Arc::clone(&state),
                tx: tx.clone(),
            },
        );

        let processor = Processor::new(Arc::clone(&state), self.metrics.clone());
        let monitor = Arc::clone(self);
        let token = token.child_token();
        tokio::spawn(async move {
            monitor.supervise(id, state, processor, rx, token).await;
        });

        Some(tx)
    }

    async fn supervise(
        self: Arc<Self>,
        id: ContainerID,
        state: Arc<RwLock<ContainerStats>>,
        processor: Processor,
        rx: mpsc::Receiver<Event>,
        token: CancellationToken,
    ) {
        match processor.run(rx, token).await {
            Ok(()) => log::info!(
                target: "container monitor",
                "container exited: container_id={}",
                id
            ),
            Err(processor::Error::Cancelled) => log::debug!(
                target: "container monitor",
                "processor cancelled: container_id={}",
                id
            ),
            Err(err) => log::error!(
                target: "container monitor",
                "processor stopped: container_id={}, error={}",
                id,
                err
            ),
        }

        tokio::time::sleep(self.settings.grace_period).await;
        let removed = self
            .containers
            .remove_if(&id, |_, entry| Arc::ptr_eq(&entry.state, &state));
        if removed.is_some() {
            log::debug!(
                target: "container monitor",
                "removed container: container_id={}",
                id
            );
        }
    }
}

impl<I> Monitor<I> {
    /// Maps the id of every tracked container to its name.
    pub fn list(&self) -> BTreeMap<String, String> {
        let states: Vec<_> = self
            .containers
            .iter()
            .map(|entry| (entry.key().to_string(), Arc::clone(&entry.state)))
            .collect();

        states
            .into_iter()
            .map(|(id, state)| {
                let name = state.read().name().to_owned();
                (id, name)
            })
            .collect()
    }

    /// A copy of the statistics of container `id`, if it is tracked.
    pub fn snapshot(&self, id: &str) -> Option<ContainerSnapshot> {
        let state = self.state(id)?;
        let snapshot = state.read().snapshot();
        Some(snapshot)
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    fn state(&self, id: &str) -> Option<Arc<RwLock<ContainerStats>>> {
        self.containers
            .get(id)
            .map(|entry| Arc::clone(&entry.state))
    }
}
