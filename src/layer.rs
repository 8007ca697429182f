//! Attribution of container files to overlay filesystem layers.
//!
//! An overlay mount searches its layers from the upper (writable) layer down
//! through the lower (image) layers and serves the first match. The same search
//! is done here against the host paths of the layer directories.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot find file `{file}` in any of the {layers} layers")]
    NotFound { file: String, layers: usize },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Returns the first directory in `layers` that contains `file`.
///
/// # Arguments
///
/// * `layers` - Layer directories, upper layer first.
/// * `file` - Absolute path of the file as seen from inside the container.
///
/// # Errors
///
/// Returns [`Error::NotFound`] if no layer contains the file.
///
/// # Example
/// ```no_run
/// # use std::path::PathBuf;
/// # use sysdig_monitor::layer;
/// let layers = [PathBuf::from("/var/lib/docker/overlay2/abc/diff")];
/// let dir = layer::resolve_layer(&layers, "/etc/hostname")?;
/// # Ok::<(), layer::Error>(())
/// ```
pub fn resolve_layer<'a>(layers: &'a [PathBuf], file: &str) -> Result<&'a Path> {
    layers
        .iter()
        .find(|dir| layer_path(dir, file).exists())
        .map(PathBuf::as_path)
        .ok_or_else(|| Error::NotFound {
            file: file.to_owned(),
            layers: layers.len(),
        })
}

/// Joins `file` below `dir` by concatenation, so absolute container paths stay below the layer.
fn layer_path(dir: &Path, file: &str) -> PathBuf {
    let mut path = OsString::from(dir.as_os_str());
    path.push(file);
    PathBuf::from(path)
}

/// Memoizes [`resolve_layer`] for one container.
///
/// Failed lookups are remembered as well: a file that is in none of the layers
/// is not looked up again for the lifetime of the container.
#[derive(Debug)]
pub struct LayerCache {
    layers: Arc<[PathBuf]>,
    resolved: HashMap<String, Option<PathBuf>>,
}

impl LayerCache {
    pub fn new(layers: Arc<[PathBuf]>) -> Self {
        Self {
            layers,
            resolved: HashMap::new(),
        }
    }

    /// Returns the layer of `file`, resolving it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] only the first time a file fails to resolve.
    /// Later calls for the same file return `Ok(None)`.
    pub fn resolve(&mut self, file: &str) -> Result<Option<&Path>> {
        if !self.resolved.contains_key(file) {
            match resolve_layer(&self.layers, file) {
                Ok(dir) => {
                    let dir = dir.to_path_buf();
                    self.resolved.insert(file.to_owned(), Some(dir));
                }
                Err(err) => {
                    self.resolved.insert(file.to_owned(), None);
                    return Err(err);
                }
            }
        }

        Ok(self.resolved.get(file).and_then(Option::as_deref))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn touch(dir: &Path, file: &str) {
        let path = layer_path(dir, file);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_resolve_prefers_upper_layer() {
        let tmp = tempfile::tempdir().expect("failed to create temp dir");
        let layers: Vec<PathBuf> = ["upper", "lower1", "lower2"]
            .iter()
            .map(|name| tmp.path().join(name))
            .collect();
        touch(&layers[0], "/etc/app.conf");
        touch(&layers[1], "/etc/app.conf");
        touch(&layers[2], "/usr/bin/app");

        assert_eq!(
            resolve_layer(&layers, "/etc/app.conf").unwrap(),
            layers[0].as_path()
        );
        assert_eq!(
            resolve_layer(&layers, "/usr/bin/app").unwrap(),
            layers[2].as_path()
        );
    }

    #[test]
    fn test_resolve_not_found() {
        let tmp = tempfile::tempdir().expect("failed to create temp dir");
        let layers = vec![tmp.path().join("upper")];
        let err = resolve_layer(&layers, "/missing").unwrap_err();
        assert!(matches!(err, Error::NotFound { ref file, layers: 1 } if file == "/missing"));
        assert!(resolve_layer(&[], "/missing").is_err());
    }

    #[test]
    fn test_cache_does_not_retry_failures() {
        let tmp = tempfile::tempdir().expect("failed to create temp dir");
        let upper = tmp.path().join("upper");
        let mut cache = LayerCache::new(vec![upper.clone()].into());

        assert!(cache.resolve("/late").is_err());
        touch(&upper, "/late");
        assert_eq!(cache.resolve("/late").unwrap(), None);

        touch(&upper, "/early");
        assert_eq!(cache.resolve("/early").unwrap(), Some(upper.as_path()));
        fs::remove_file(layer_path(&upper, "/early")).unwrap();
        assert_eq!(cache.resolve("/early").unwrap(), Some(upper.as_path()));
    }
}
