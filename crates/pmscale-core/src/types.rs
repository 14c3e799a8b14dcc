//! Shared types used across pmscale crates.

/// How the supervisor runs an application's processes.
///
/// Only `Cluster` applications are autoscaled; `Fork` processes are
/// single instances and are ignored by the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    Fork,
    Cluster,
}

/// Lifecycle status reported by the supervisor for one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Online,
    Stopping,
    Stopped,
    Launching,
    Errored,
    OneLaunchStatus,
}

impl ProcessStatus {
    pub fn is_online(&self) -> bool {
        matches!(self, ProcessStatus::Online)
    }
}

/// Live resource sample attached to a process record.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Monit {
    /// CPU usage in percent of one core (may exceed 100).
    pub cpu: f64,
    /// Resident memory in bytes.
    pub memory_bytes: u64,
}

/// One entry of the supervisor's process list.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessRecord {
    pub name: Option<String>,
    /// OS process id.
    pub pid: Option<u32>,
    /// Supervisor-assigned instance id.
    pub pm_id: Option<u32>,
    pub exec_mode: ExecMode,
    pub status: ProcessStatus,
    /// Supervisor modules are never scaled.
    pub is_module: bool,
    /// Instance count the application was launched with.
    pub instances: u32,
    pub monit: Monit,
}

impl ProcessRecord {
    /// Whether this record describes a worker the tracker should sample.
    ///
    /// Status is checked separately: a non-online record still removes
    /// its application from the registry.
    pub fn is_trackable(&self) -> bool {
        !self.is_module
            && self.exec_mode == ExecMode::Cluster
            && self.name.is_some()
            && self.pid.is_some()
            && self.pm_id.is_some()
    }
}

/// A worker-count change requested from the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleTarget {
    /// Add `n` workers to the current count.
    By(u32),
    /// Set the worker count to exactly `n`.
    To(u32),
}

impl std::fmt::Display for ScaleTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScaleTarget::By(n) => write!(f, "+{n}"),
            ScaleTarget::To(n) => write!(f, "{n}"),
        }
    }
}

/// Host-level resources relevant to scaling decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostStats {
    pub free_memory_bytes: u64,
    pub total_memory_bytes: u64,
    /// Logical CPU cores.
    pub cpu_cores: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ProcessRecord {
        ProcessRecord {
            name: Some("api".to_string()),
            pid: Some(4242),
            pm_id: Some(0),
            exec_mode: ExecMode::Cluster,
            status: ProcessStatus::Online,
            is_module: false,
            instances: 2,
            monit: Monit::default(),
        }
    }

    #[test]
    fn cluster_record_is_trackable() {
        assert!(record().is_trackable());
    }

    #[test]
    fn fork_and_module_records_are_not_trackable() {
        let mut fork = record();
        fork.exec_mode = ExecMode::Fork;
        assert!(!fork.is_trackable());

        let mut module = record();
        module.is_module = true;
        assert!(!module.is_trackable());

        let mut no_pm_id = record();
        no_pm_id.pm_id = None;
        assert!(!no_pm_id.is_trackable());
    }

    #[test]
    fn scale_target_renders_supervisor_argument() {
        assert_eq!(ScaleTarget::By(3).to_string(), "+3");
        assert_eq!(ScaleTarget::To(4).to_string(), "4");
    }
}
