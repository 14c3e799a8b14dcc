//! Scaling decision: pure evaluation of one application's snapshot.

use tracing::debug;

use pmscale_core::{HostStats, ScaleConfig, bytes_to_mb};
use pmscale_tracker::Application;

/// Why an evaluation produced no command this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// A scale command is already in flight.
    Busy,
    /// No worker samples to aggregate.
    NoWorkers,
    /// Scale-up was eligible but the target formula asked for no workers.
    NothingToSpawn,
    /// Spawning would exhaust host memory.
    InsufficientMemory,
    /// The direction's cooldown has not elapsed.
    Cooldown,
}

/// Outcome of evaluating one application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Add `by` workers.
    ScaleUp { by: u32 },
    /// Set the worker count to `to`.
    ScaleDown { to: u32 },
    /// Neither direction is eligible.
    Hold,
    /// A direction was eligible but a gate blocked it.
    Skip(SkipReason),
}

/// Aggregate CPU signals across an application's workers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CpuSignals {
    pub sum: f64,
    pub max: f64,
    /// `sum / workers`, rounded to the nearest integer.
    pub average: f64,
}

impl CpuSignals {
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let sum: f64 = samples.iter().sum();
        let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some(Self {
            sum,
            max,
            average: (sum / samples.len() as f64).round(),
        })
    }
}

/// Whether more than `min_seconds` whole seconds have passed since `last_ms`.
/// Never having acted counts as infinitely long ago.
pub fn cooldown_elapsed(last_ms: Option<u64>, now_ms: u64, min_seconds: u64) -> bool {
    match last_ms {
        None => true,
        Some(last) => {
            let elapsed_secs = (now_ms.saturating_sub(last) as f64 / 1000.0).round() as u64;
            elapsed_secs > min_seconds
        }
    }
}

/// Decide what to do with `app` this tick. Reads state only.
pub fn decide(
    config: &ScaleConfig,
    app: &Application,
    host: &HostStats,
    now_ms: u64,
) -> ScaleDecision {
    if app.is_processing() {
        return ScaleDecision::Skip(SkipReason::Busy);
    }

    let Some(signals) = CpuSignals::from_samples(&app.cpu_samples()) else {
        return ScaleDecision::Skip(SkipReason::NoWorkers);
    };

    let active = app.active_worker_count();
    let cap = config.worker_cap(host.cpu_cores);

    if signals.max >= config.scale_cpu_threshold && active < cap {
        return decide_scale_up(config, app, host, &signals, active, cap, now_ms);
    }

    if signals.average < config.release_cpu_threshold && active > app.default_worker_count() {
        let to = active - 1;
        if to < app.default_worker_count() {
            return ScaleDecision::Hold;
        }
        if !cooldown_elapsed(
            app.last_scale_down_at(),
            now_ms,
            config.min_seconds_to_release_worker,
        ) {
            return ScaleDecision::Skip(SkipReason::Cooldown);
        }
        return ScaleDecision::ScaleDown { to };
    }

    ScaleDecision::Hold
}

fn decide_scale_up(
    config: &ScaleConfig,
    app: &Application,
    host: &HostStats,
    signals: &CpuSignals,
    active: u32,
    cap: u32,
    now_ms: u64,
) -> ScaleDecision {
    let Some(avg_worker_mb) = app.average_memory_mb() else {
        return ScaleDecision::Skip(SkipReason::NoWorkers);
    };
    let free_mb = bytes_to_mb(host.free_memory_bytes);
    let active_f = active as f64;

    // Workers needed for the average to fall to the threshold, assuming
    // CPU demand spreads linearly across workers.
    let desired = (signals.average / config.scale_cpu_threshold * active_f - active_f).ceil();
    let memory_cap = if avg_worker_mb > 0.0 {
        (free_mb / avg_worker_mb).floor()
    } else {
        f64::INFINITY
    };
    let headroom = (cap - active) as f64;
    let spawn = desired.min(memory_cap).min(headroom);

    if desired <= 0.0 {
        debug!(
            app = %app.name(),
            average = signals.average,
            max = signals.max,
            workers = active,
            "cpu peak without enough average load to add a worker"
        );
        return ScaleDecision::Skip(SkipReason::NothingToSpawn);
    }

    if spawn <= 0.0 || free_mb - avg_worker_mb * spawn <= 0.0 {
        debug!(
            app = %app.name(),
            free_mb,
            avg_worker_mb,
            "not enough memory to add workers"
        );
        return ScaleDecision::Skip(SkipReason::InsufficientMemory);
    }

    if !cooldown_elapsed(app.last_scale_up_at(), now_ms, config.min_seconds_to_add_worker) {
        return ScaleDecision::Skip(SkipReason::Cooldown);
    }

    ScaleDecision::ScaleUp { by: spawn as u32 }
}
