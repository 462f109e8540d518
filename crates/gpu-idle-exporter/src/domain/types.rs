use std::time::Duration;
use std::time::Instant;

pub type DeviceIndex = u32;
pub type Pid = u32;

/// Identity of a process on one device.
///
/// A host process may hold memory on several GPUs at once, so the pid alone
/// never identifies a tracked entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
#[display("gpu={device} pid={pid}")]
pub struct ProcessKey {
    pub device: DeviceIndex,
    pub pid: Pid,
}

impl ProcessKey {
    pub const fn new(device: DeviceIndex, pid: Pid) -> Self {
        Self { device, pid }
    }
}

/// One process's reading for one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawProcessSample {
    pub device: DeviceIndex,
    pub pid: Pid,
    pub memory_bytes: u64,
    /// SM utilization percentage, 0 when no sample was seen in the window
    pub utilization: u32,
}

impl RawProcessSample {
    pub const fn key(&self) -> ProcessKey {
        ProcessKey::new(self.device, self.pid)
    }
}

/// A timestamped batch of samples fed to the tracker once per polling tick
#[derive(Debug, Clone)]
pub struct CycleSnapshot {
    pub timestamp: Instant,
    pub samples: Vec<RawProcessSample>,
}

impl CycleSnapshot {
    pub fn new(timestamp: Instant, samples: Vec<RawProcessSample>) -> Self {
        Self { timestamp, samples }
    }

    pub fn empty(timestamp: Instant) -> Self {
        Self::new(timestamp, Vec::new())
    }
}

/// Idle classification of one process for one cycle.
///
/// `idle_duration` and `idle_memory_bytes` are always zero while `is_idle` is false.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessIdleView {
    pub device: DeviceIndex,
    pub pid: Pid,
    pub memory_bytes: u64,
    pub utilization: u32,
    pub is_idle: bool,
    pub idle_duration: Duration,
    pub idle_memory_bytes: u64,
}

impl ProcessIdleView {
    pub const fn key(&self) -> ProcessKey {
        ProcessKey::new(self.device, self.pid)
    }
}
