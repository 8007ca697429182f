use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

mod error;

pub use error::{Error, Result};

/// The maximum allowed length for a [`ContainerID`].
const CONTAINER_ID_MAX_LEN: usize = 255;

/// The pseudo container id the tracer reports for processes running on the host.
pub const HOST_CONTAINER_ID: &str = "host";

/// Name stored for a container until the tracer reports its real name.
pub const UNKNOWN_CONTAINER_NAME: &str = "<unknown>";

/// Placeholder the tracer emits while it has not resolved a container's name yet.
pub const INCOMPLETE_CONTAINER_NAME: &str = "incomplete";

/// A validated container identifier.
///
/// # Examples
///
/// ```
/// # use sysdig_monitor::container::{ContainerID, Error};
/// let container_id = ContainerID::new("3f4a1c2b9e77").unwrap();
/// assert_eq!(container_id.as_ref(), "3f4a1c2b9e77");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerID(Arc<str>);

impl ContainerID {
    /// Creates a new `ContainerID` from the given raw id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidContainerID`] if the input is empty, exceeds
    /// [`CONTAINER_ID_MAX_LEN`], or names the host pseudo container.
    ///
    /// # Examples
    ///
    /// ```
    /// # use sysdig_monitor::container::{ContainerID, Error};
    /// assert!(ContainerID::new("host").is_err());
    /// assert!(ContainerID::new("").is_err());
    /// ```
    pub fn new(src: impl AsRef<str>) -> Result<Self> {
        let src = src.as_ref();
        if src.is_empty() || src.len() > CONTAINER_ID_MAX_LEN || src == HOST_CONTAINER_ID {
            return Err(Error::InvalidContainerID(src.to_owned()));
        }

        Ok(Self(src.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ContainerID {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for ContainerID {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ContainerID {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl serde::Serialize for ContainerID {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

/// Returns `true` if `name` is a real container name rather than a tracer placeholder.
pub fn is_resolved_name(name: &str) -> bool {
    !name.is_empty() && name != INCOMPLETE_CONTAINER_NAME && name != UNKNOWN_CONTAINER_NAME
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_id_rejects_host_and_empty() {
        assert!(matches!(
            ContainerID::new(HOST_CONTAINER_ID),
            Err(Error::InvalidContainerID(_))
        ));
        assert!(ContainerID::new("").is_err());
        assert!(ContainerID::new("a".repeat(CONTAINER_ID_MAX_LEN + 1)).is_err());
    }

    #[test]
    fn test_container_id_borrows_as_str() {
        let id = ContainerID::new("c0ffee").unwrap();
        let map: std::collections::HashMap<ContainerID, u8> = [(id, 1)].into_iter().collect();
        assert_eq!(map.get("c0ffee"), Some(&1));
    }

    #[test]
    fn test_is_resolved_name() {
        assert!(is_resolved_name("web"));
        assert!(!is_resolved_name(INCOMPLETE_CONTAINER_NAME));
        assert!(!is_resolved_name(UNKNOWN_CONTAINER_NAME));
        assert!(!is_resolved_name(""));
    }
}
