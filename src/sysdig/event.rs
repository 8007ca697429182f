use std::time::Duration;

use serde::{Deserialize, Deserializer};

/// Direction marker of an event that reports a completed call.
pub const DIRECTION_EXIT: &str = "<";

/// Event type of a terminating process.
pub const PROCESS_EXIT: &str = "procexit";

/// Virtual thread id of the first process inside a container's pid namespace.
pub const ROOT_THREAD_VID: i64 = 1;

/// One event as emitted by `sysdig -j`.
///
/// Field names follow the tracer's output format. Fields missing from the
/// output, or reported as `null`, take their default value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Event {
    #[serde(rename = "evt.dir", default, deserialize_with = "nullable")]
    pub dir: String,
    #[serde(rename = "evt.type", default, deserialize_with = "nullable")]
    pub event_type: String,
    #[serde(rename = "container.id", default, deserialize_with = "nullable")]
    pub container_id: String,
    #[serde(rename = "container.name", default, deserialize_with = "nullable")]
    pub container_name: String,
    #[serde(rename = "fd.name", default, deserialize_with = "nullable")]
    pub fd_name: String,
    #[serde(rename = "fd.type", default, deserialize_with = "nullable")]
    pub fd_type: String,
    #[serde(rename = "evt.is_io_read", default, deserialize_with = "nullable")]
    pub is_io_read: bool,
    #[serde(rename = "evt.is_io_write", default, deserialize_with = "nullable")]
    pub is_io_write: bool,
    #[serde(rename = "evt.buflen", default, deserialize_with = "nullable")]
    pub buffer_len: u64,
    /// Latency of the call in nanoseconds.
    #[serde(rename = "evt.latency", default, deserialize_with = "nullable")]
    pub latency_ns: u64,
    #[serde(rename = "evt.rawres", default, deserialize_with = "nullable")]
    pub raw_res: i64,
    #[serde(rename = "syscall.type", default, deserialize_with = "nullable")]
    pub syscall_type: String,
    /// Only reported in log lines, like `thread_id`.
    #[serde(rename = "proc.name", default, deserialize_with = "nullable")]
    pub proc_name: String,
    #[serde(rename = "thread.tid", default, deserialize_with = "nullable")]
    pub thread_id: i64,
    #[serde(rename = "thread.vtid", default, deserialize_with = "nullable")]
    pub thread_virtual_id: i64,
}

impl Event {
    pub fn latency(&self) -> Duration {
        Duration::from_nanos(self.latency_ns)
    }

    /// Events reporting a completed call carry the results that are accounted.
    pub fn is_inbound(&self) -> bool {
        self.dir == DIRECTION_EXIT
    }

    /// `true` if the container's root process exited, as opposed to one of its children.
    pub fn is_root_exit(&self) -> bool {
        self.event_type == PROCESS_EXIT && self.thread_virtual_id == ROOT_THREAD_VID
    }
}

fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_tracer_line() {
        let line = r#"{"container.id":"8f2e1d","container.name":"web","evt.buflen":512,"evt.cpu":3,"evt.dir":"<","evt.info":"res=512","evt.is_io_read":true,"evt.is_io_write":false,"evt.latency":2500000,"evt.num":91,"evt.rawres":512,"evt.type":"read","fd.name":"/etc/passwd","fd.type":"file","proc.name":"nginx","syscall.type":"read","thread.tid":4242,"thread.vtid":7}"#;
        let event: Event = serde_json::from_str(line).unwrap();
        assert_eq!(event.container_id, "8f2e1d");
        assert_eq!(event.buffer_len, 512);
        assert!(event.is_io_read);
        assert!(event.is_inbound());
        assert_eq!(event.latency(), Duration::from_micros(2500));
        assert_eq!(event.thread_virtual_id, 7);
        assert!(!event.is_root_exit());
        assert_eq!(event.proc_name, "nginx");
        assert_eq!(event.thread_id, 4242);
    }

    #[test]
    fn test_missing_and_null_fields_default() {
        let event: Event =
            serde_json::from_str(r#"{"container.id":"x","fd.name":null,"evt.rawres":null}"#)
                .unwrap();
        assert_eq!(event.fd_name, "");
        assert_eq!(event.raw_res, 0);
        assert_eq!(event.event_type, "");
    }

    #[test]
    fn test_root_exit() {
        let event = Event {
            event_type: PROCESS_EXIT.to_owned(),
            thread_virtual_id: ROOT_THREAD_VID,
            ..Default::default()
        };
        assert!(event.is_root_exit());
        let child = Event {
            thread_virtual_id: 12,
            ..event
        };
        assert!(!child.is_root_exit());
    }
}
