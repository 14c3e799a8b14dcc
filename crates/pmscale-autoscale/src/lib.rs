//! pmscale-autoscale: CPU-driven worker scaling.
//!
//! Once per sampling tick the [`Autoscaler`] polls the supervisor, folds
//! the process list into the tracker registry, and evaluates every
//! application that reported samples. At most one scale command per
//! application is in flight at a time.
//!
//! # Scaling Algorithm
//!
//! ```text
//! cpu[]   = windowed mean CPU of each worker
//! max     = max(cpu), average = round(sum(cpu) / workers)
//! cap     = max_workers > 0 ? max_workers : host_cores - 1
//!
//! if max >= scale_cpu_threshold and workers < cap:
//!     spawn = min(ceil(average / scale_cpu_threshold * workers - workers),
//!                 floor(free_mb / avg_worker_mb),
//!                 cap - workers)
//!     abort if spawn <= 0 or free_mb - avg_worker_mb * spawn <= 0
//!     ScaleUp(+spawn) once min_seconds_to_add_worker has passed
//!
//! else if average < release_cpu_threshold and workers > default_workers:
//!     ScaleDown(workers - 1) once min_seconds_to_release_worker has passed
//! ```
//!
//! Cooldown timestamps are only written when the supervisor confirms
//! the command.

pub mod decision;
pub mod error;
pub mod scaler;

pub use decision::{CpuSignals, ScaleDecision, SkipReason, decide};
pub use error::ScaleError;
pub use scaler::{Autoscaler, Clock};
