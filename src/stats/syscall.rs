use std::collections::HashMap;
use std::time::Duration;

/// Invocation count and cumulative latency of a single system call.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SystemCall {
    pub name: String,
    /// Total number of times the call was invoked.
    pub calls: u64,
    #[serde(rename = "total_time_ns", serialize_with = "super::serialize_nanos")]
    pub total_time: Duration,
}

/// Per-container system call accounting.
#[derive(Debug, Clone, Default)]
pub struct SyscallStats {
    individual_calls: HashMap<String, SystemCall>,
    total_calls: u64,
}

impl SyscallStats {
    /// Counts one invocation of `name` that took `latency`.
    ///
    /// Returns the updated record so callers can mirror it into gauges.
    pub fn record(&mut self, name: &str, latency: Duration) -> &SystemCall {
        self.total_calls += 1;
        let call = self
            .individual_calls
            .entry(name.to_owned())
            .or_insert_with(|| SystemCall {
                name: name.to_owned(),
                calls: 0,
                total_time: Duration::ZERO,
            });
        call.calls += 1;
        call.total_time = call.total_time.saturating_add(latency);
        call
    }

    pub fn get(&self, name: &str) -> Option<&SystemCall> {
        self.individual_calls.get(name)
    }

    pub fn calls(&self) -> impl Iterator<Item = &SystemCall> {
        self.individual_calls.values()
    }

    pub fn total_calls(&self) -> u64 {
        self.total_calls
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_accumulates() {
        let mut stats = SyscallStats::default();
        stats.record("read", Duration::from_millis(5));
        stats.record("read", Duration::from_millis(3));
        stats.record("openat", Duration::from_micros(10));

        let read = stats.get("read").unwrap();
        assert_eq!(read.calls, 2);
        assert_eq!(read.total_time, Duration::from_millis(8));
        assert_eq!(stats.get("openat").unwrap().calls, 1);
        assert_eq!(stats.total_calls(), 3);
        assert_eq!(stats.calls().count(), 2);
    }
}
