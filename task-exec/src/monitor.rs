use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid as NixPid;
use parking_lot::Mutex;
use std::sync::Arc;
use sysinfo::{Pid, ProcessStatus, System};
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::{debug, error, warn};

use crate::{
    error::Error,
    types::{ResourceLimits, ResourceSample, ResourceUsage},
};

/// Access to the OS process table
pub trait ProcessTable: Send + 'static {
    /// Reads the current usage of `pid`, `None` once it no longer exists
    fn sample(&mut self, pid: u32) -> Option<ResourceSample>;

    /// Force-terminates `pid`
    fn kill(&mut self, pid: u32) -> Result<(), Error>;
}

/// Process table backed by `sysinfo`
pub struct SystemProcessTable {
    system: System,
}

impl SystemProcessTable {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for SystemProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable for SystemProcessTable {
    fn sample(&mut self, pid: u32) -> Option<ResourceSample> {
        let pid = Pid::from_u32(pid);
        if !self.system.refresh_process(pid) {
            return None;
        }

        let process = self.system.process(pid)?;
        // An exited but unreaped child still has a table entry
        if process.status() == ProcessStatus::Zombie {
            return None;
        }

        Some(ResourceSample {
            memory_bytes: process.memory(),
            cpu_percent: process.cpu_usage(),
        })
    }

    fn kill(&mut self, pid: u32) -> Result<(), Error> {
        match kill(NixPid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(Error::ResourceExceeded(format!(
                "Failed to kill process {}: {}",
                pid, e
            ))),
        }
    }
}

/// Polls one process until it exits or breaches the memory cap
pub struct ResourceMonitor<T: ProcessTable> {
    pid: u32,
    limits: ResourceLimits,
    interval: Duration,
    table: T,
    usage: Arc<Mutex<ResourceUsage>>,
}

impl<T: ProcessTable> ResourceMonitor<T> {
    pub fn new(pid: u32, limits: ResourceLimits, interval: Duration, table: T) -> Self {
        Self {
            pid,
            limits,
            interval,
            table,
            usage: Arc::new(Mutex::new(ResourceUsage::default())),
        }
    }

    /// Shared view of what the monitor has observed so far
    pub fn usage(&self) -> Arc<Mutex<ResourceUsage>> {
        Arc::clone(&self.usage)
    }

    /// Runs until the process disappears (`Ok`) or exceeds the memory cap
    /// (`Err(ResourceExceeded)`, after the process has been killed).
    pub async fn run(mut self) -> Result<(), Error> {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let Some(sample) = self.table.sample(self.pid) else {
                debug!("Process {} exited, monitor stopping", self.pid);
                return Ok(());
            };

            self.usage.lock().record(sample);

            if sample.memory_bytes > self.limits.max_memory_bytes {
                let reason = format!(
                    "Memory limit exceeded: {} > {} bytes",
                    sample.memory_bytes, self.limits.max_memory_bytes
                );
                // Recorded before the kill so an observer of the exit sees it
                self.usage.lock().breach = Some(reason.clone());

                if let Err(e) = self.table.kill(self.pid) {
                    error!("{}", e);
                }
                warn!("Process {}: {}", self.pid, reason);
                return Err(Error::ResourceExceeded(reason));
            }

            if sample.cpu_percent > self.limits.max_cpu_percent {
                self.usage.lock().cpu_excess_ticks += 1;
                warn!(
                    "High CPU usage for process {}: {:.1}% > {:.1}%",
                    self.pid, sample.cpu_percent, self.limits.max_cpu_percent
                );
            }
        }
    }
}
