use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::monitor::MonitorSettings;
use crate::stats::SlowIoThresholds;

const DEFAULT_SYSDIG_BINARY: &str = "sysdig";
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_DOCKER_SOCKET: &str = "/var/run/docker.sock";
const DEFAULT_ROOTFS: &str = "/";
const DEFAULT_EVENT_BUFFER_SIZE: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid value `{value}` for `{name}`: {reason}")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Runtime configuration, read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Tracer executable, looked up in `PATH` unless absolute.
    pub sysdig_binary: PathBuf,
    pub listen_addr: SocketAddr,
    pub docker_socket: PathBuf,
    /// Mount point of the host root. Layer directories reported by Docker are
    /// resolved below it.
    pub rootfs: PathBuf,
    /// Capacity of the queue between the tracer and the monitor.
    pub event_buffer_size: usize,
    pub monitor: MonitorSettings,
}

impl Config {
    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidValue`] if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`, using defaults for unset variables.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let sysdig_binary = lookup("SYSDIG_BINARY")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SYSDIG_BINARY));
        let docker_socket = lookup("DOCKER_SOCKET")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DOCKER_SOCKET));
        let rootfs = lookup("ROOTFS_MOUNT_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ROOTFS));

        let listen_addr = parse_var(
            "LISTEN_ADDR",
            lookup("LISTEN_ADDR").as_deref().unwrap_or(DEFAULT_LISTEN_ADDR),
        )?;

        let defaults = MonitorSettings::default();
        let grace_period = match lookup("CONTAINER_GRACE_PERIOD_MS") {
            Some(value) => Duration::from_millis(parse_var("CONTAINER_GRACE_PERIOD_MS", &value)?),
            None => defaults.grace_period,
        };
        let slow_io_thresholds = match lookup("SLOW_IO_THRESHOLDS_MS") {
            Some(value) => parse_thresholds(&value)?,
            None => defaults.slow_io_thresholds,
        };
        let event_buffer_size = match lookup("EVENT_BUFFER_SIZE") {
            Some(value) => parse_capacity("EVENT_BUFFER_SIZE", &value)?,
            None => DEFAULT_EVENT_BUFFER_SIZE,
        };
        let queue_size = match lookup("CONTAINER_QUEUE_SIZE") {
            Some(value) => parse_capacity("CONTAINER_QUEUE_SIZE", &value)?,
            None => defaults.queue_size,
        };

        Ok(Self {
            sysdig_binary,
            listen_addr,
            docker_socket,
            rootfs,
            event_buffer_size,
            monitor: MonitorSettings {
                grace_period,
                queue_size,
                slow_io_thresholds,
            },
        })
    }
}

fn parse_var<T>(name: &'static str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|err: T::Err| Error::InvalidValue {
        name,
        value: value.to_owned(),
        reason: err.to_string(),
    })
}

// Channels panic on a zero capacity.
fn parse_capacity(name: &'static str, value: &str) -> Result<usize> {
    match parse_var(name, value)? {
        0 => Err(Error::InvalidValue {
            name,
            value: value.to_owned(),
            reason: "must be greater than zero".to_owned(),
        }),
        capacity => Ok(capacity),
    }
}

fn parse_thresholds(value: &str) -> Result<SlowIoThresholds> {
    const NAME: &str = "SLOW_IO_THRESHOLDS_MS";
    let invalid = |reason: &str| Error::InvalidValue {
        name: NAME,
        value: value.to_owned(),
        reason: reason.to_owned(),
    };

    let millis = value
        .split(',')
        .map(|part| parse_var::<u64>(NAME, part))
        .collect::<Result<Vec<_>>>()?;
    let [low, medium, high] = millis[..] else {
        return Err(invalid("expected exactly three comma separated values"));
    };
    if !(low < medium && medium < high) {
        return Err(invalid("values must be strictly ascending"));
    }

    Ok(SlowIoThresholds {
        low: Duration::from_millis(low),
        medium: Duration::from_millis(medium),
        high: Duration::from_millis(high),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.sysdig_binary, PathBuf::from("sysdig"));
        assert_eq!(config.listen_addr, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.docker_socket, PathBuf::from("/var/run/docker.sock"));
        assert_eq!(config.rootfs, PathBuf::from("/"));
        assert_eq!(config.event_buffer_size, 1024);
        assert_eq!(config.monitor, MonitorSettings::default());
        assert_eq!(config.monitor.grace_period, Duration::from_millis(50));
        assert_eq!(config.monitor.queue_size, 512);
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("SYSDIG_BINARY", "/usr/local/bin/sysdig"),
            ("LISTEN_ADDR", "127.0.0.1:9100"),
            ("ROOTFS_MOUNT_PATH", "/rootfs"),
            ("CONTAINER_GRACE_PERIOD_MS", "250"),
            ("SLOW_IO_THRESHOLDS_MS", "5, 50, 500"),
            ("EVENT_BUFFER_SIZE", "64"),
            ("CONTAINER_QUEUE_SIZE", "8"),
        ])
        .unwrap();

        assert_eq!(config.sysdig_binary, PathBuf::from("/usr/local/bin/sysdig"));
        assert_eq!(config.listen_addr.port(), 9100);
        assert_eq!(config.rootfs, PathBuf::from("/rootfs"));
        assert_eq!(config.monitor.grace_period, Duration::from_millis(250));
        assert_eq!(config.monitor.slow_io_thresholds.medium, Duration::from_millis(50));
        assert_eq!(config.monitor.slow_io_thresholds.high, Duration::from_millis(500));
        assert_eq!(config.event_buffer_size, 64);
        assert_eq!(config.monitor.queue_size, 8);
    }

    #[test]
    fn test_invalid_values() {
        for (name, value) in [
            ("LISTEN_ADDR", "localhost"),
            ("CONTAINER_GRACE_PERIOD_MS", "-1"),
            ("SLOW_IO_THRESHOLDS_MS", "1,10"),
            ("SLOW_IO_THRESHOLDS_MS", "10,10,100"),
            ("SLOW_IO_THRESHOLDS_MS", "1,x,100"),
            ("EVENT_BUFFER_SIZE", "0"),
            ("CONTAINER_QUEUE_SIZE", "many"),
        ] {
            let err = config(&[(name, value)]).unwrap_err();
            assert!(
                matches!(&err, Error::InvalidValue { name: got, .. } if *got == name),
                "{name}={value} gave {err}"
            );
        }
    }
}
