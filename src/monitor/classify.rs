use std::time::Duration;

use crate::stats::IoDirection;
use crate::sysdig::Event;

const FD_TYPE_FILE: &str = "file";
const FD_TYPE_IPV4: &str = "ipv4";
const FD_TYPE_IPV6: &str = "ipv6";

/// What an event means for the statistics of its container.
///
/// System call accounting is orthogonal to the kind: every completed event
/// naming a syscall is counted, whatever its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind<'a> {
    /// The root process of the container terminated.
    ProcessExit,
    /// A successful read or write on a regular file.
    FileIo {
        path: &'a str,
        direction: IoDirection,
        bytes: u64,
        latency: Duration,
    },
    /// A successful read or write on an inet socket.
    NetworkIo {
        descriptor: &'a str,
        protocol: &'a str,
        direction: IoDirection,
        bytes: u64,
    },
    /// `connect` or `accept` on a socket.
    ConnectionOpen {
        descriptor: &'a str,
        protocol: &'a str,
    },
    /// `close` of anything that is not a file path.
    ConnectionClose { descriptor: &'a str },
    /// Nothing beyond syscall accounting.
    Syscall { name: &'a str },
    Unclassified,
}

fn io_direction(event: &Event) -> Option<IoDirection> {
    if event.is_io_write {
        Some(IoDirection::Write)
    } else if event.is_io_read {
        Some(IoDirection::Read)
    } else {
        None
    }
}

/// Decides the [`EventKind`] of `event`.
pub fn classify(event: &Event) -> EventKind<'_> {
    if event.is_root_exit() {
        return EventKind::ProcessExit;
    }

    let direction = io_direction(event).filter(|_| event.raw_res >= 0);
    if let Some(direction) = direction {
        match event.fd_type.as_str() {
            FD_TYPE_FILE => {
                return EventKind::FileIo {
                    path: &event.fd_name,
                    direction,
                    bytes: event.buffer_len,
                    latency: event.latency(),
                };
            }
            FD_TYPE_IPV4 | FD_TYPE_IPV6 => {
                return EventKind::NetworkIo {
                    descriptor: &event.fd_name,
                    protocol: &event.fd_type,
                    direction,
                    bytes: event.buffer_len,
                };
            }
            _ => return syscall_or_unclassified(event),
        }
    }

    match event.event_type.as_str() {
        "connect" | "accept" | "accept4" => EventKind::ConnectionOpen {
            descriptor: &event.fd_name,
            protocol: &event.fd_type,
        },
        "close" if !event.fd_name.starts_with('/') => EventKind::ConnectionClose {
            descriptor: &event.fd_name,
        },
        _ => syscall_or_unclassified(event),
    }
}

fn syscall_or_unclassified(event: &Event) -> EventKind<'_> {
    if event.syscall_type.is_empty() {
        EventKind::Unclassified
    } else {
        EventKind::Syscall {
            name: &event.syscall_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sysdig::{PROCESS_EXIT, ROOT_THREAD_VID};

    fn io_event(fd_type: &str, fd_name: &str, read: bool, raw_res: i64) -> Event {
        Event {
            dir: "<".to_owned(),
            event_type: if read { "read" } else { "write" }.to_owned(),
            fd_type: fd_type.to_owned(),
            fd_name: fd_name.to_owned(),
            is_io_read: read,
            is_io_write: !read,
            buffer_len: 64,
            raw_res,
            latency_ns: 1_000,
            ..Default::default()
        }
    }

    #[test]
    fn test_root_exit() {
        let event = Event {
            event_type: PROCESS_EXIT.to_owned(),
            thread_virtual_id: ROOT_THREAD_VID,
            ..Default::default()
        };
        assert_eq!(classify(&event), EventKind::ProcessExit);
    }

    #[test]
    fn test_child_exit_is_not_process_exit() {
        let event = Event {
            event_type: PROCESS_EXIT.to_owned(),
            thread_virtual_id: 33,
            ..Default::default()
        };
        assert_eq!(classify(&event), EventKind::Unclassified);
    }

    #[test]
    fn test_file_io() {
        let event = io_event("file", "/etc/hosts", true, 64);
        assert_eq!(
            classify(&event),
            EventKind::FileIo {
                path: "/etc/hosts",
                direction: IoDirection::Read,
                bytes: 64,
                latency: Duration::from_micros(1),
            }
        );
    }

    #[test]
    fn test_network_io() {
        let event = io_event("ipv6", "::1:80->::1:5000", false, 0);
        assert_eq!(
            classify(&event),
            EventKind::NetworkIo {
                descriptor: "::1:80->::1:5000",
                protocol: "ipv6",
                direction: IoDirection::Write,
                bytes: 64,
            }
        );
    }

    #[test]
    fn test_failed_io_is_not_io() {
        let mut event = io_event("file", "/etc/hosts", true, -2);
        event.syscall_type = "read".to_owned();
        assert_eq!(classify(&event), EventKind::Syscall { name: "read" });
    }

    #[test]
    fn test_io_on_other_descriptors() {
        let event = io_event("unix", "/run/app.sock", true, 1);
        assert_eq!(classify(&event), EventKind::Unclassified);
    }

    #[test]
    fn test_connection_lifecycle() {
        let connect = Event {
            event_type: "connect".to_owned(),
            fd_type: "ipv4".to_owned(),
            fd_name: "10.0.0.1:40000->10.0.0.2:80".to_owned(),
            ..Default::default()
        };
        assert!(matches!(
            classify(&connect),
            EventKind::ConnectionOpen { protocol: "ipv4", .. }
        ));

        let close = Event {
            event_type: "close".to_owned(),
            ..connect.clone()
        };
        assert!(matches!(classify(&close), EventKind::ConnectionClose { .. }));

        let close_file = Event {
            event_type: "close".to_owned(),
            fd_name: "/var/log/app.log".to_owned(),
            ..Default::default()
        };
        assert_eq!(classify(&close_file), EventKind::Unclassified);
    }
}
