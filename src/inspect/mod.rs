//! Container metadata lookup.
//!
//! The monitor asks a [`ContainerInspector`] for the declared name and the
//! overlay layer directories of every container it sees for the first time.
//! [`docker::DockerInspector`] answers from the Docker Engine API.
use std::future::Future;
use std::path::{Path, PathBuf};

use crate::container::ContainerID;

pub mod docker;

pub use docker::DockerInspector;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to connect to socket `{path}`: {source}")]
    SocketConnect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to build request: {0}")]
    Request(#[source] http::Error),
    #[error("http exchange failed: {0}")]
    Http(#[source] hyper::Error),
    #[error("container `{0}` not found")]
    NotFound(ContainerID),
    #[error("unexpected status `{status}` when inspecting container `{id}`")]
    UnexpectedStatus {
        id: ContainerID,
        status: hyper::StatusCode,
    },
    #[error("failed to decode inspect response for container `{id}`: {source}")]
    Decode {
        id: ContainerID,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// What the monitor needs to know about a container before tracking it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerMetadata {
    /// Declared name, without the leading `/` Docker adds.
    pub name: String,
    /// Host paths of the overlay layers, upper layer first.
    pub layers: Vec<PathBuf>,
}

pub trait ContainerInspector: Send + Sync + 'static {
    fn inspect(
        &self,
        id: &ContainerID,
    ) -> impl Future<Output = Result<ContainerMetadata>> + Send;
}

/// Converts overlay driver data into an ordered layer list.
///
/// # Arguments
///
/// * `lower` - Colon separated lower directories, in overlay search order.
/// * `upper` - The writable upper directory.
/// * `rootfs` - Mount point of the host root, every directory is resolved below it.
///
/// # Returns
///
/// The upper directory followed by the lower directories. Empty entries are skipped.
pub fn layers_from_graph_driver(
    lower: Option<&str>,
    upper: Option<&str>,
    rootfs: &Path,
) -> Vec<PathBuf> {
    upper
        .into_iter()
        .chain(lower.into_iter().flat_map(|lower| lower.split(':')))
        .map(str::trim)
        .filter(|dir| !dir.is_empty())
        .map(|dir| rootfs.join(dir.strip_prefix('/').unwrap_or(dir)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layers_upper_first() {
        let layers = layers_from_graph_driver(
            Some("/var/lib/docker/overlay2/l/AAA:/var/lib/docker/overlay2/l/BBB"),
            Some("/var/lib/docker/overlay2/abc/diff"),
            Path::new("/"),
        );
        assert_eq!(
            layers,
            vec![
                PathBuf::from("/var/lib/docker/overlay2/abc/diff"),
                PathBuf::from("/var/lib/docker/overlay2/l/AAA"),
                PathBuf::from("/var/lib/docker/overlay2/l/BBB"),
            ]
        );
    }

    #[test]
    fn test_layers_below_rootfs() {
        let layers = layers_from_graph_driver(None, Some("/data/upper"), Path::new("/rootfs"));
        assert_eq!(layers, vec![PathBuf::from("/rootfs/data/upper")]);
    }

    #[test]
    fn test_layers_missing() {
        assert!(layers_from_graph_driver(None, None, Path::new("/")).is_empty());
        assert_eq!(
            layers_from_graph_driver(Some("/a::/b"), Some(""), Path::new("/")),
            vec![PathBuf::from("/a"), PathBuf::from("/b")]
        );
    }
}
