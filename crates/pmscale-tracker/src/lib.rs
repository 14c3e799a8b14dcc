//! pmscale-tracker: per-application worker resource tracking.
//!
//! Folds the supervisor's process list into one [`Application`] per
//! monitored process group. Each application keeps a time-bounded sample
//! history for every live worker, the baseline worker count it was
//! launched with, and the cooldown/in-flight state the autoscaler reads.
//!
//! # Architecture
//!
//! ```text
//! Registry
//!   ├── ingest(records) ← once per sampling tick
//!   │     ├── drop apps with no live workers / not online
//!   │     ├── prune_workers(active pids)
//!   │     └── upsert_worker(pid, cpu, memory)
//!   └── get() / applications() → SharedApplication for the autoscaler
//! ```

pub mod application;
pub mod registry;

pub use application::{
    Application, ApplicationStats, ScaleDirection, ScalingState, WorkerSample,
};
pub use registry::{Registry, SharedApplication};
