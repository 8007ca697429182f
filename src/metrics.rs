//! Prometheus gauges mirroring the per-container statistics.
//!
//! All series are keyed by the container id, so processors of different
//! containers never touch the same series. The gauges live in a
//! [`prometheus::Registry`] passed in by the caller instead of the global
//! default registry, which keeps tests isolated from each other.

use std::path::{Path, PathBuf};

use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};

use crate::container::ContainerID;
use crate::stats::{Connection, ConnectionKey, ContainerStats, FileIoTotals, SystemCall};

const NAMESPACE: &str = "sysdig_monitor";
const SUBSYSTEM: &str = "container";

const CONTAINER_ID_LABEL: &str = "id";
const SYSCALL_TYPE_LABEL: &str = "syscall_type";
const LAYER_DIR_LABEL: &str = "layer_dir";
const FILE_LABEL: &str = "file_name";
const SRC_IP_LABEL: &str = "src_ip";
const SRC_PORT_LABEL: &str = "src_port";
const DEST_IP_LABEL: &str = "dest_ip";
const DEST_PORT_LABEL: &str = "dest_port";

const CONNECTION_LABELS: &[&str] = &[
    CONTAINER_ID_LABEL,
    SRC_IP_LABEL,
    SRC_PORT_LABEL,
    DEST_IP_LABEL,
    DEST_PORT_LABEL,
];

/// Gauge vectors updated by the container processors.
#[derive(Clone)]
pub struct Metrics {
    container_id: GaugeVec,
    syscall_total: GaugeVec,
    syscall_latency: GaugeVec,
    layer_dir: GaugeVec,
    layer_read: GaugeVec,
    layer_write: GaugeVec,
    layer_file_read: GaugeVec,
    layer_file_write: GaugeVec,
    connection_read: GaugeVec,
    connection_write: GaugeVec,
}

fn gauge_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> prometheus::Result<GaugeVec> {
    let opts = Opts::new(name, help).namespace(NAMESPACE).subsystem(SUBSYSTEM);
    let gauge = GaugeVec::new(opts, labels)?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

fn path_label(path: &Path) -> std::borrow::Cow<'_, str> {
    path.to_string_lossy()
}

impl Metrics {
    /// Creates all gauges and registers them with `registry`.
    ///
    /// # Errors
    ///
    /// Fails if gauges with the same names are already registered.
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        Ok(Self {
            container_id: gauge_vec(
                registry,
                "container_id",
                "The container's id, the value is always 1",
                &[CONTAINER_ID_LABEL],
            )?,
            syscall_total: gauge_vec(
                registry,
                "syscall_total",
                "Total invoke times of different system call",
                &[CONTAINER_ID_LABEL, SYSCALL_TYPE_LABEL],
            )?,
            syscall_latency: gauge_vec(
                registry,
                "system_call_total_latency_seconds",
                "Total latency of the system calls of container",
                &[CONTAINER_ID_LABEL, SYSCALL_TYPE_LABEL],
            )?,
            layer_dir: gauge_vec(
                registry,
                "layer_dir",
                "The dir of the layer of each container, the upper layer's value is 1, the deeper the bigger",
                &[CONTAINER_ID_LABEL, LAYER_DIR_LABEL],
            )?,
            layer_read: gauge_vec(
                registry,
                "layer_read_bytes",
                "The total bytes a container read from files which belong to a layer",
                &[CONTAINER_ID_LABEL, LAYER_DIR_LABEL],
            )?,
            layer_write: gauge_vec(
                registry,
                "layer_write_bytes",
                "The total bytes a container wrote to files which belong to a layer",
                &[CONTAINER_ID_LABEL, LAYER_DIR_LABEL],
            )?,
            layer_file_read: gauge_vec(
                registry,
                "layer_file_read_bytes",
                "The total bytes a container read from a file which belongs to a layer",
                &[CONTAINER_ID_LABEL, LAYER_DIR_LABEL, FILE_LABEL],
            )?,
            layer_file_write: gauge_vec(
                registry,
                "layer_file_write_bytes",
                "The total bytes a container wrote to a file which belongs to a layer",
                &[CONTAINER_ID_LABEL, LAYER_DIR_LABEL, FILE_LABEL],
            )?,
            connection_read: gauge_vec(
                registry,
                "active_connection_read_bytes",
                "The total bytes a container read from an active net connection",
                CONNECTION_LABELS,
            )?,
            connection_write: gauge_vec(
                registry,
                "active_connection_write_bytes",
                "The total bytes a container wrote to an active net connection",
                CONNECTION_LABELS,
            )?,
        })
    }

    /// Publishes the identity series and the layer stack of a new container.
    pub fn container_started(&self, id: &ContainerID, layers_in_order: &[PathBuf]) {
        self.container_id.with_label_values(&[id.as_str()]).set(1.0);
        for (idx, layer) in layers_in_order.iter().enumerate() {
            let layer = path_label(layer);
            self.layer_dir
                .with_label_values(&[id.as_str(), &*layer])
                .set((idx + 1) as f64);
        }
    }

    pub fn record_syscall(&self, id: &ContainerID, call: &SystemCall) {
        let labels = [id.as_str(), call.name.as_str()];
        self.syscall_total
            .with_label_values(&labels)
            .set(call.calls as f64);
        self.syscall_latency
            .with_label_values(&labels)
            .set(call.total_time.as_secs_f64());
    }

    pub fn record_file_io(&self, id: &ContainerID, layer: &Path, file: &str, totals: FileIoTotals) {
        let layer = path_label(layer);
        let file_labels = [id.as_str(), &*layer, file];
        self.layer_file_read
            .with_label_values(&file_labels)
            .set(totals.file.read_in as f64);
        self.layer_file_write
            .with_label_values(&file_labels)
            .set(totals.file.write_out as f64);

        let layer_labels = [id.as_str(), &*layer];
        self.layer_read
            .with_label_values(&layer_labels)
            .set(totals.layer.read_in as f64);
        self.layer_write
            .with_label_values(&layer_labels)
            .set(totals.layer.write_out as f64);
    }

    pub fn record_connection_io(&self, id: &ContainerID, key: &ConnectionKey, conn: &Connection) {
        let [src_ip, src_port, dest_ip, dest_port] = key.label_values();
        let labels = [
            id.as_str(),
            src_ip.as_str(),
            src_port.as_str(),
            dest_ip.as_str(),
            dest_port.as_str(),
        ];
        self.connection_read
            .with_label_values(&labels)
            .set(conn.bytes.read_in as f64);
        self.connection_write
            .with_label_values(&labels)
            .set(conn.bytes.write_out as f64);
    }

    pub fn remove_connection(&self, id: &ContainerID, key: &ConnectionKey) {
        let [src_ip, src_port, dest_ip, dest_port] = key.label_values();
        let labels = [
            id.as_str(),
            src_ip.as_str(),
            src_port.as_str(),
            dest_ip.as_str(),
            dest_port.as_str(),
        ];
        // Missing series are fine, a connection may never have carried traffic.
        let _ = self.connection_read.remove_label_values(&labels);
        let _ = self.connection_write.remove_label_values(&labels);
    }

    /// Deletes every series that belongs to the container.
    pub fn remove_container(&self, stats: &ContainerStats) {
        let id = stats.id();
        for (key, _) in stats.network().connections() {
            self.remove_connection(id, key);
        }

        for layer in stats.file_system().layers() {
            let dir = path_label(&layer.dir);
            for file in &layer.files {
                let labels = [id.as_str(), &*dir, file.as_str()];
                let _ = self.layer_file_read.remove_label_values(&labels);
                let _ = self.layer_file_write.remove_label_values(&labels);
            }
            let labels = [id.as_str(), &*dir];
            let _ = self.layer_read.remove_label_values(&labels);
            let _ = self.layer_write.remove_label_values(&labels);
            let _ = self.layer_dir.remove_label_values(&labels);
        }

        for call in stats.system_calls().calls() {
            let labels = [id.as_str(), call.name.as_str()];
            let _ = self.syscall_total.remove_label_values(&labels);
            let _ = self.syscall_latency.remove_label_values(&labels);
        }

        let _ = self.container_id.remove_label_values(&[id.as_str()]);
    }
}

/// Renders the registry for scraping.
#[derive(Clone)]
pub struct MetricsPublisher {
    registry: Registry,
}

impl MetricsPublisher {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    /// Encodes all registered series in the Prometheus text format.
    pub fn encode(&self) -> prometheus::Result<String> {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|err| prometheus::Error::Msg(err.to_string()))
    }

    pub fn content_type(&self) -> &'static str {
        prometheus::TEXT_FORMAT
    }
}

/// Sample lines of every series currently held by `registry`.
#[cfg(test)]
pub(crate) fn exported_series(registry: &Registry) -> Vec<String> {
    let text = TextEncoder::new()
        .encode_to_string(&registry.gather())
        .unwrap();
    text.lines()
        .filter(|line| !line.starts_with('#') && !line.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::stats::{IoDirection, SlowIoThresholds};

    fn series_count(registry: &Registry) -> usize {
        exported_series(registry).len()
    }

    #[test]
    fn test_register_twice_fails() {
        let registry = Registry::new();
        Metrics::new(&registry).unwrap();
        assert!(Metrics::new(&registry).is_err());
    }

    #[test]
    fn test_remove_container_deletes_all_series() {
        let registry = Registry::new();
        let metrics = Metrics::new(&registry).unwrap();
        let id = ContainerID::new("c1").unwrap();
        let mut stats = ContainerStats::new(
            id.clone(),
            "web",
            vec![PathBuf::from("/upper"), PathBuf::from("/lower")],
            SlowIoThresholds::default(),
        );
        metrics.container_started(&id, stats.file_system().layers_in_order());

        let call = stats
            .system_calls_mut()
            .record("read", Duration::from_millis(5))
            .clone();
        metrics.record_syscall(&id, &call);

        let totals = stats.file_system_mut().record_io(
            "/a.txt",
            Path::new("/upper"),
            IoDirection::Write,
            100,
            Duration::ZERO,
        );
        metrics.record_file_io(&id, Path::new("/upper"), "/a.txt", totals);

        let key: ConnectionKey = "10.0.0.1:80->10.0.0.2:9000".parse().unwrap();
        let conn = stats
            .network_mut()
            .record_io(key.clone(), "ipv4", IoDirection::Read, 3)
            .clone();
        metrics.record_connection_io(&id, &key, &conn);

        let other = ContainerID::new("c2").unwrap();
        metrics.container_started(&other, &[]);

        assert!(series_count(&registry) > 1);
        let text = MetricsPublisher::new(registry.clone()).encode().unwrap();
        assert!(text.contains("sysdig_monitor_container_syscall_total{id=\"c1\",syscall_type=\"read\"} 1"));
        assert!(text.contains("sysdig_monitor_container_layer_write_bytes{id=\"c1\",layer_dir=\"/upper\"} 100"));

        metrics.remove_container(&stats);
        assert_eq!(series_count(&registry), 1);
    }

    #[test]
    fn test_remove_connection() {
        let registry = Registry::new();
        let metrics = Metrics::new(&registry).unwrap();
        let id = ContainerID::new("c1").unwrap();
        let key: ConnectionKey = "10.0.0.1:80->10.0.0.2:9000".parse().unwrap();
        let conn = Connection {
            protocol: "ipv4".to_owned(),
            bytes: Default::default(),
        };
        metrics.record_connection_io(&id, &key, &conn);
        assert_eq!(series_count(&registry), 2);
        metrics.remove_connection(&id, &key);
        metrics.remove_connection(&id, &key);
        assert_eq!(series_count(&registry), 0);
    }
}
