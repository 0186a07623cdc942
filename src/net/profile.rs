//! Per-opcode packet profiling counters.
//!
//! Storage and export of metrics belong to the host; the engine only keeps
//! cheap in-process counters that a management surface can snapshot.

use std::time::Duration;

use dashmap::DashMap;

/// Accumulated statistics for one opcode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpcodeProfile {
    /// Packets dispatched
    pub count: u64,
    /// Total payload bytes dispatched
    pub bytes: u64,
    /// Cumulative handler time
    pub elapsed: Duration,
}

/// Profiler over inbound packet dispatch
#[derive(Debug)]
pub struct PacketProfiler {
    enabled: bool,
    profiles: DashMap<u8, OpcodeProfile>,
}

impl PacketProfiler {
    /// Create a profiler; a disabled profiler records nothing
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            profiles: DashMap::new(),
        }
    }

    /// Whether recording is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Record one dispatched packet
    pub fn record(&self, opcode: u8, length: usize, elapsed: Duration) {
        if !self.enabled {
            return;
        }
        let mut profile = self.profiles.entry(opcode).or_default();
        profile.count += 1;
        profile.bytes += length as u64;
        profile.elapsed += elapsed;
    }

    /// Snapshot of all recorded opcodes, ordered by opcode
    pub fn snapshot(&self) -> Vec<(u8, OpcodeProfile)> {
        let mut entries: Vec<(u8, OpcodeProfile)> = self
            .profiles
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();
        entries.sort_by_key(|(opcode, _)| *opcode);
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_snapshot() {
        let profiler = PacketProfiler::new(true);

        profiler.record(0x73, 2, Duration::from_micros(10));
        profiler.record(0x73, 2, Duration::from_micros(5));
        profiler.record(0x02, 7, Duration::from_micros(1));

        let snapshot = profiler.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].0, 0x02);

        let (_, ping) = snapshot[1];
        assert_eq!(ping.count, 2);
        assert_eq!(ping.bytes, 4);
        assert_eq!(ping.elapsed, Duration::from_micros(15));
    }

    #[test]
    fn test_disabled_records_nothing() {
        let profiler = PacketProfiler::new(false);
        profiler.record(0x73, 2, Duration::from_micros(10));
        assert!(profiler.snapshot().is_empty());
    }
}
