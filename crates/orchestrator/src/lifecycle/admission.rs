//! Admission control for starting instances
//!
//! An instance is admitted only while the number of running instances is
//! below the concurrency limit and the aggregate resource usage of running
//! instances plus the candidate stays within the configured thresholds.

use serde::{Deserialize, Serialize};

use super::instance::ResourceUsage;

/// Admission thresholds
///
/// # Example
///
/// ```
/// use workflow_orchestrator::lifecycle::AdmissionConfig;
///
/// let config = AdmissionConfig::default()
///     .with_max_concurrent_workflows(20)
///     .with_max_memory_mb(4096.0);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdmissionConfig {
    /// Maximum number of RUNNING instances
    pub max_concurrent_workflows: usize,

    /// Aggregate memory ceiling in megabytes
    pub max_memory_mb: f64,

    /// Aggregate CPU ceiling in percent
    pub max_cpu_percent: f64,

    /// Aggregate disk ceiling in megabytes
    pub max_disk_mb: f64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_workflows: 10,
            max_memory_mb: 2048.0,
            max_cpu_percent: 90.0,
            max_disk_mb: 10_240.0,
        }
    }
}

impl AdmissionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_concurrent_workflows(mut self, max: usize) -> Self {
        self.max_concurrent_workflows = max;
        self
    }

    pub fn with_max_memory_mb(mut self, mb: f64) -> Self {
        self.max_memory_mb = mb.max(0.0);
        self
    }

    pub fn with_max_cpu_percent(mut self, percent: f64) -> Self {
        self.max_cpu_percent = percent.max(0.0);
        self
    }

    pub fn with_max_disk_mb(mut self, mb: f64) -> Self {
        self.max_disk_mb = mb.max(0.0);
        self
    }

    /// Decide whether a candidate may start
    pub fn check(
        &self,
        running: usize,
        running_usage: ResourceUsage,
        candidate: ResourceUsage,
    ) -> Result<(), AdmissionRejection> {
        if running >= self.max_concurrent_workflows {
            return Err(AdmissionRejection::ConcurrencyLimit {
                running,
                limit: self.max_concurrent_workflows,
            });
        }

        let projected = running_usage + candidate;
        if projected.memory_mb > self.max_memory_mb {
            return Err(AdmissionRejection::Memory {
                projected: projected.memory_mb,
                limit: self.max_memory_mb,
            });
        }
        if projected.cpu_percent > self.max_cpu_percent {
            return Err(AdmissionRejection::Cpu {
                projected: projected.cpu_percent,
                limit: self.max_cpu_percent,
            });
        }
        if projected.disk_mb > self.max_disk_mb {
            return Err(AdmissionRejection::Disk {
                projected: projected.disk_mb,
                limit: self.max_disk_mb,
            });
        }
        Ok(())
    }

    /// Fraction of each threshold used by `usage`, for reporting
    pub fn utilization(&self, running: usize, usage: ResourceUsage) -> ResourceUtilization {
        fn ratio(value: f64, limit: f64) -> f64 {
            if limit > 0.0 {
                value / limit
            } else {
                0.0
            }
        }
        ResourceUtilization {
            concurrency: ratio(running as f64, self.max_concurrent_workflows as f64),
            memory: ratio(usage.memory_mb, self.max_memory_mb),
            cpu: ratio(usage.cpu_percent, self.max_cpu_percent),
            disk: ratio(usage.disk_mb, self.max_disk_mb),
            usage,
        }
    }
}

/// Why an instance was not admitted
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AdmissionRejection {
    #[error("{running} instances running, limit is {limit}")]
    ConcurrencyLimit { running: usize, limit: usize },

    #[error("memory would reach {projected:.1} MB, limit is {limit:.1} MB")]
    Memory { projected: f64, limit: f64 },

    #[error("cpu would reach {projected:.1}%, limit is {limit:.1}%")]
    Cpu { projected: f64, limit: f64 },

    #[error("disk would reach {projected:.1} MB, limit is {limit:.1} MB")]
    Disk { projected: f64, limit: f64 },
}

/// Aggregate usage of running instances relative to the thresholds
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUtilization {
    pub concurrency: f64,
    pub memory: f64,
    pub cpu: f64,
    pub disk: f64,
    pub usage: ResourceUsage,
}
