//! File and overlay-layer I/O accounting for a single container.
//!
//! Every accessed file is attributed to exactly one layer of the container's
//! overlay stack the first time it is seen (see [`crate::layer`]). Reads and
//! writes are then summed per file, per layer, and for the whole container.
//! Operations slower than the configured thresholds are additionally kept as
//! [`IoCall`] samples.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::{ByteCounts, IoDirection};

/// Files below this prefix are devices; their latency says nothing about storage.
pub const DEVICE_PREFIX: &str = "/dev/";

/// Latency limits above which a file operation is sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlowIoThresholds {
    pub low: Duration,
    pub medium: Duration,
    pub high: Duration,
}

impl Default for SlowIoThresholds {
    fn default() -> Self {
        Self {
            low: Duration::from_millis(1),
            medium: Duration::from_millis(10),
            high: Duration::from_millis(100),
        }
    }
}

/// A sampled slow file operation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct IoCall {
    pub file_name: String,
    #[serde(rename = "latency_ns", serialize_with = "super::serialize_nanos")]
    pub latency: Duration,
}

/// Append-only lists of slow file operations, one per threshold.
///
/// An operation above the high threshold is also above the lower ones and is
/// therefore present in all three lists.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SlowIoSamples {
    pub over_low: Vec<IoCall>,
    pub over_medium: Vec<IoCall>,
    pub over_high: Vec<IoCall>,
}

impl SlowIoSamples {
    fn record(&mut self, file_name: &str, latency: Duration, thresholds: &SlowIoThresholds) {
        let sample = || IoCall {
            file_name: file_name.to_owned(),
            latency,
        };
        if latency > thresholds.high {
            self.over_high.push(sample());
        }
        if latency > thresholds.medium {
            self.over_medium.push(sample());
        }
        if latency > thresholds.low {
            self.over_low.push(sample());
        }
    }
}

/// A file accessed by the container.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct File {
    pub name: String,
    /// The layer directory the file was found in.
    pub layer: PathBuf,
    #[serde(flatten)]
    pub bytes: ByteCounts,
}

/// One directory of the container's overlay stack.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Layer {
    pub dir: PathBuf,
    /// Position in the overlay stack, the upper layer is `1`.
    pub depth: usize,
    #[serde(flatten)]
    pub bytes: ByteCounts,
    /// Names of the files attributed to this layer.
    pub files: BTreeSet<String>,
}

/// Counters of a file and its layer after an I/O operation was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileIoTotals {
    pub file: ByteCounts,
    pub layer: ByteCounts,
}

#[derive(Debug, Clone)]
pub struct FileSystemStats {
    layers_in_order: Arc<[PathBuf]>,
    layers: HashMap<PathBuf, Layer>,
    files: HashMap<String, File>,
    slow_io: SlowIoSamples,
    thresholds: SlowIoThresholds,
    totals: ByteCounts,
}

impl FileSystemStats {
    /// Creates empty statistics for the given overlay stack.
    ///
    /// # Arguments
    ///
    /// * `layers_in_order` - Layer directories, upper layer first, followed by the lower layers
    ///   in overlay search order.
    /// * `thresholds` - Latency limits used to sample slow operations.
    pub fn new(layers_in_order: Vec<PathBuf>, thresholds: SlowIoThresholds) -> Self {
        let layers = layers_in_order
            .iter()
            .enumerate()
            .map(|(idx, dir)| {
                let layer = Layer {
                    dir: dir.clone(),
                    depth: idx + 1,
                    bytes: ByteCounts::default(),
                    files: BTreeSet::new(),
                };
                (dir.clone(), layer)
            })
            .collect();

        Self {
            layers_in_order: layers_in_order.into(),
            layers,
            files: HashMap::new(),
            slow_io: SlowIoSamples::default(),
            thresholds,
            totals: ByteCounts::default(),
        }
    }

    /// The overlay stack, upper layer first. Never changes after construction.
    pub fn layers_in_order(&self) -> &[PathBuf] {
        &self.layers_in_order
    }

    /// A shared handle to the overlay stack, for resolving files without holding a lock.
    pub fn layers_handle(&self) -> Arc<[PathBuf]> {
        Arc::clone(&self.layers_in_order)
    }

    /// Adds one file operation.
    ///
    /// `layer` is only used the first time `file_name` is seen; afterwards the
    /// file keeps the layer it was attributed to.
    pub fn record_io(
        &mut self,
        file_name: &str,
        layer: &Path,
        direction: IoDirection,
        bytes: u64,
        latency: Duration,
    ) -> FileIoTotals {
        let file = self
            .files
            .entry(file_name.to_owned())
            .or_insert_with(|| File {
                name: file_name.to_owned(),
                layer: layer.to_path_buf(),
                bytes: ByteCounts::default(),
            });
        file.bytes.add(direction, bytes);
        let file_totals = file.bytes;

        let layer_depth = self.layers.len() + 1;
        let layer = self
            .layers
            .entry(file.layer.clone())
            .or_insert_with(|| Layer {
                dir: file.layer.clone(),
                depth: layer_depth,
                bytes: ByteCounts::default(),
                files: BTreeSet::new(),
            });
        layer.files.insert(file_name.to_owned());
        layer.bytes.add(direction, bytes);

        self.totals.add(direction, bytes);
        if !file_name.starts_with(DEVICE_PREFIX) {
            self.slow_io.record(file_name, latency, &self.thresholds);
        }

        FileIoTotals {
            file: file_totals,
            layer: layer.bytes,
        }
    }

    pub fn file(&self, name: &str) -> Option<&File> {
        self.files.get(name)
    }

    pub fn files(&self) -> impl Iterator<Item = &File> {
        self.files.values()
    }

    pub fn layer(&self, dir: &Path) -> Option<&Layer> {
        self.layers.get(dir)
    }

    /// Layers in overlay order.
    pub fn layers(&self) -> impl Iterator<Item = &Layer> {
        self.layers_in_order
            .iter()
            .filter_map(|dir| self.layers.get(dir))
    }

    pub fn slow_io(&self) -> &SlowIoSamples {
        &self.slow_io
    }

    pub fn totals(&self) -> ByteCounts {
        self.totals
    }
}
