//! Application: windowed resource history for one worker pool.
//!
//! Holds no scaling logic. The autoscaler reads the aggregated signals
//! and drives the in-flight state and cooldown timestamps through the
//! accessors below.

use std::collections::{BTreeMap, HashSet, VecDeque};

/// One CPU/memory observation of a worker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkerSample {
    pub timestamp_ms: u64,
    pub cpu_percent: f64,
    pub memory_mb: f64,
}

/// Direction of a scale command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDirection {
    Up,
    Down,
}

/// In-flight state of an application's scale command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScalingState {
    #[default]
    Idle,
    /// A scale-up command was issued at `since_ms` and has not completed.
    ScalingUp { since_ms: u64 },
    /// A scale-down command was issued at `since_ms` and has not completed.
    ScalingDown { since_ms: u64 },
}

impl ScalingState {
    pub fn direction(&self) -> Option<ScaleDirection> {
        match self {
            ScalingState::Idle => None,
            ScalingState::ScalingUp { .. } => Some(ScaleDirection::Up),
            ScalingState::ScalingDown { .. } => Some(ScaleDirection::Down),
        }
    }

    /// When the in-flight command was issued.
    pub fn since_ms(&self) -> Option<u64> {
        match self {
            ScalingState::Idle => None,
            ScalingState::ScalingUp { since_ms } | ScalingState::ScalingDown { since_ms } => {
                Some(*since_ms)
            }
        }
    }
}

/// Point-in-time view of an application, for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplicationStats {
    pub name: String,
    pub workers: usize,
    pub default_workers: u32,
    pub cpu: Vec<f64>,
    pub total_memory_mb: f64,
    /// Direction of the in-flight command, if any.
    pub scaling: Option<ScaleDirection>,
    /// How long the in-flight command has been running.
    pub scaling_for_ms: Option<u64>,
}

/// A named group of homogeneous cluster workers, scaled as one unit.
#[derive(Debug)]
pub struct Application {
    name: String,
    default_worker_count: u32,
    /// Retention window for worker samples.
    window_ms: u64,
    /// pid → time-ordered samples, oldest first.
    workers: BTreeMap<u32, VecDeque<WorkerSample>>,
    last_scale_up_at: Option<u64>,
    last_scale_down_at: Option<u64>,
    scaling: ScalingState,
}

impl Application {
    pub fn new(name: impl Into<String>, default_worker_count: u32, window_ms: u64) -> Self {
        Self {
            name: name.into(),
            default_worker_count,
            window_ms,
            workers: BTreeMap::new(),
            last_scale_up_at: None,
            last_scale_down_at: None,
            scaling: ScalingState::Idle,
        }
    }

    /// Application name as reported by the supervisor.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Worker count the application was launched with; the scale-down floor.
    pub fn default_worker_count(&self) -> u32 {
        self.default_worker_count
    }

    /// Number of workers with retained samples.
    pub fn active_worker_count(&self) -> u32 {
        self.workers.len() as u32
    }

    /// Worker pids currently tracked, ascending.
    pub fn worker_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.workers.keys().copied()
    }

    /// Samples retained for worker `id`, oldest first.
    pub fn samples(&self, id: u32) -> Option<&VecDeque<WorkerSample>> {
        self.workers.get(&id)
    }

    /// Append a sample for worker `id` and evict samples that fell out of
    /// the window.
    pub fn upsert_worker(&mut self, id: u32, cpu_percent: f64, memory_mb: f64, now_ms: u64) {
        let window_ms = self.window_ms;
        let history = self.workers.entry(id).or_default();

        // Keep the history ordered even if the wall clock stepped back.
        let timestamp_ms = history
            .back()
            .map_or(now_ms, |last| now_ms.max(last.timestamp_ms));

        history.push_back(WorkerSample {
            timestamp_ms,
            cpu_percent,
            memory_mb,
        });

        while let Some(oldest) = history.front() {
            if timestamp_ms - oldest.timestamp_ms > window_ms {
                history.pop_front();
            } else {
                break;
            }
        }
    }

    /// Drop every worker whose pid is not in `active_ids`.
    pub fn prune_workers(&mut self, active_ids: &HashSet<u32>) {
        self.workers.retain(|id, _| active_ids.contains(id));
    }

    /// One CPU value per worker: the mean over that worker's window.
    pub fn cpu_samples(&self) -> Vec<f64> {
        self.workers
            .values()
            .filter(|history| !history.is_empty())
            .map(|history| {
                let sum: f64 = history.iter().map(|s| s.cpu_percent).sum();
                sum / history.len() as f64
            })
            .collect()
    }

    /// Mean of the workers' latest memory samples, `None` without workers.
    pub fn average_memory_mb(&self) -> Option<f64> {
        let latest: Vec<f64> = self.latest_memory().collect();
        if latest.is_empty() {
            return None;
        }
        Some(latest.iter().sum::<f64>() / latest.len() as f64)
    }

    /// Sum of the workers' latest memory samples.
    pub fn total_memory_mb(&self) -> f64 {
        self.latest_memory().sum()
    }

    fn latest_memory(&self) -> impl Iterator<Item = f64> + '_ {
        self.workers
            .values()
            .filter_map(|history| history.back().map(|s| s.memory_mb))
    }

    /// When the last successful scale-up completed.
    pub fn last_scale_up_at(&self) -> Option<u64> {
        self.last_scale_up_at
    }

    /// When the last successful scale-down completed.
    pub fn last_scale_down_at(&self) -> Option<u64> {
        self.last_scale_down_at
    }

    /// Start the scale-up cooldown at `now_ms`.
    pub fn mark_scaled_up(&mut self, now_ms: u64) {
        self.last_scale_up_at = Some(now_ms);
    }

    /// Start the scale-down cooldown at `now_ms`.
    pub fn mark_scaled_down(&mut self, now_ms: u64) {
        self.last_scale_down_at = Some(now_ms);
    }

    pub fn scaling_state(&self) -> ScalingState {
        self.scaling
    }

    /// Whether a scale command is in flight.
    pub fn is_processing(&self) -> bool {
        self.scaling != ScalingState::Idle
    }

    /// Enter the in-flight state. Returns `false` if a command is already
    /// in flight.
    pub fn begin_scaling(&mut self, direction: ScaleDirection, now_ms: u64) -> bool {
        if self.is_processing() {
            return false;
        }
        self.scaling = match direction {
            ScaleDirection::Up => ScalingState::ScalingUp { since_ms: now_ms },
            ScaleDirection::Down => ScalingState::ScalingDown { since_ms: now_ms },
        };
        true
    }

    /// Return to idle, yielding the direction that was in flight.
    pub fn finish_scaling(&mut self) -> Option<ScaleDirection> {
        let direction = self.scaling.direction();
        self.scaling = ScalingState::Idle;
        direction
    }

    /// Snapshot for the diagnostics log.
    pub fn stats(&self, now_ms: u64) -> ApplicationStats {
        ApplicationStats {
            name: self.name.clone(),
            workers: self.workers.len(),
            default_workers: self.default_worker_count,
            cpu: self.cpu_samples(),
            total_memory_mb: self.total_memory_mb(),
            scaling: self.scaling.direction(),
            scaling_for_ms: self.scaling.since_ms().map(|since| now_ms.saturating_sub(since)),
        }
    }
}
