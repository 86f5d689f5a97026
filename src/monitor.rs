//! Process-wide resource sampling.

use std::sync::{Mutex, PoisonError};
use sysinfo::System;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceStats {
    pub cpu_percent: f32,
    pub memory_percent: f32,
    /// `None` when the platform does not report available memory.
    pub available_bytes: Option<u64>,
}

impl ResourceStats {
    pub fn available_gb(&self) -> Option<f64> {
        self.available_bytes
            .map(|bytes| (bytes as f64 / 1024f64.powi(3) * 100.0).round() / 100.0)
    }
}

pub trait StatsProvider: Send + Sync {
    fn sample(&self) -> ResourceStats;
}

/// [`StatsProvider`] backed by `sysinfo`.
///
/// CPU usage is computed between consecutive samples, so the very first
/// reading after startup is 0%.
pub struct SystemMonitor {
    system: Mutex<System>,
}

impl Default for SystemMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemMonitor {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();
        Self {
            system: Mutex::new(system),
        }
    }
}

impl StatsProvider for SystemMonitor {
    fn sample(&self) -> ResourceStats {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_cpu();
        system.refresh_memory();

        let total = system.total_memory();
        let available = system.available_memory();
        let memory_percent = if total == 0 {
            0.0
        } else {
            (total.saturating_sub(available) as f64 / total as f64 * 100.0) as f32
        };

        ResourceStats {
            cpu_percent: system.global_cpu_info().cpu_usage(),
            memory_percent,
            available_bytes: (total > 0).then_some(available),
        }
    }
}
