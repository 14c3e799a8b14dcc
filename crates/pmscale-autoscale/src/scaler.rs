//! Autoscaler: the sampling tick and scale command lifecycle.
//!
//! Decisions are made synchronously under the application's lock. The
//! resulting supervisor command runs on its own task; when it resolves,
//! the task re-acquires the lock, clears the in-flight state, and on
//! success records the cooldown timestamp.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use pmscale_core::{HostStats, ScaleConfig, ScaleTarget, epoch_millis, format_bytes};
use pmscale_supervisor::{HostProbe, Supervisor};
use pmscale_tracker::{Application, Registry, ScaleDirection, SharedApplication};

use crate::decision::{ScaleDecision, SkipReason, decide};
use crate::error::ScaleError;

/// Wall clock in epoch milliseconds.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Owns the application registry and drives one evaluation per
/// application per tick.
pub struct Autoscaler {
    config: Arc<ScaleConfig>,
    registry: Registry,
    supervisor: Arc<dyn Supervisor>,
    host: Box<dyn HostProbe>,
    clock: Clock,
    /// Scale commands awaiting completion.
    in_flight: JoinSet<()>,
}

impl Autoscaler {
    pub fn new(
        config: ScaleConfig,
        supervisor: Arc<dyn Supervisor>,
        host: Box<dyn HostProbe>,
    ) -> Self {
        Self {
            registry: Registry::new(config.window_millis()),
            config: Arc::new(config),
            supervisor,
            host,
            clock: Arc::new(epoch_millis),
            in_flight: JoinSet::new(),
        }
    }

    /// Replace the wall clock (tests use a manual one).
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &ScaleConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Number of scale commands not yet reaped.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Poll the supervisor, ingest the process list, and evaluate every
    /// application that reported samples.
    ///
    /// A failed poll leaves all application state untouched.
    pub async fn tick(&mut self) -> anyhow::Result<Vec<(String, ScaleDecision)>> {
        self.reap();

        let records = self.supervisor.list().await?;
        let now = (self.clock)();
        let touched = self.registry.ingest(&records, now).await;
        if touched.is_empty() {
            return Ok(Vec::new());
        }

        let host = self.host.host_stats();
        let mut decisions = Vec::with_capacity(touched.len());
        for (name, app) in touched {
            let decision = self.evaluate(&app, &host, now).await;
            decisions.push((name, decision));
        }
        Ok(decisions)
    }

    /// Evaluate one application and, if warranted, issue its scale command.
    ///
    /// Returns as soon as the command is dispatched; completion is handled
    /// on a separate task.
    pub async fn evaluate(
        &mut self,
        app: &SharedApplication,
        host: &HostStats,
        now_ms: u64,
    ) -> ScaleDecision {
        let mut guard = app.lock().await;
        let decision = decide(&self.config, &guard, host, now_ms);

        let (direction, target) = match decision {
            ScaleDecision::ScaleUp { by } => (ScaleDirection::Up, ScaleTarget::By(by)),
            ScaleDecision::ScaleDown { to } => (ScaleDirection::Down, ScaleTarget::To(to)),
            ScaleDecision::Hold => return decision,
            ScaleDecision::Skip(reason) => {
                debug!(app = %guard.name(), ?reason, "scale skipped");
                return decision;
            }
        };

        if !guard.begin_scaling(direction, now_ms) {
            return ScaleDecision::Skip(SkipReason::Busy);
        }
        let name = guard.name().to_string();
        drop(guard);

        debug!(app = %name, %target, "issuing scale command");

        let app = Arc::clone(app);
        let supervisor = Arc::clone(&self.supervisor);
        let clock = Arc::clone(&self.clock);
        let timeout = self.config.scale_command_timeout();

        self.in_flight.spawn(async move {
            let outcome = match tokio::time::timeout(timeout, supervisor.scale(&name, target)).await
            {
                Ok(result) => result.map_err(ScaleError::from),
                Err(_) => Err(ScaleError::Timeout(timeout)),
            };
            let mut app = app.lock().await;
            complete_scaling(&mut app, target, outcome, clock());
        });

        decision
    }

    /// Log host memory and per-application worker stats.
    pub async fn log_stats(&mut self) {
        let host = self.host.host_stats();
        debug!(
            free = %format_bytes(host.free_memory_bytes),
            total = %format_bytes(host.total_memory_bytes),
            "system memory"
        );

        if self.registry.is_empty() {
            debug!("no apps available");
            return;
        }

        let now = (self.clock)();
        for app in self.registry.applications() {
            let stats = app.lock().await.stats(now);
            debug!(
                app = %stats.name,
                workers = stats.workers,
                default_workers = stats.default_workers,
                cpu = ?stats.cpu,
                memory_mb = stats.total_memory_mb,
                scaling = ?stats.scaling,
                scaling_for_ms = ?stats.scaling_for_ms,
                "app stats"
            );
        }
    }

    /// Wait for every in-flight scale command to complete.
    pub async fn wait_idle(&mut self) {
        while let Some(result) = self.in_flight.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "scale task aborted");
            }
        }
    }

    fn reap(&mut self) {
        while let Some(result) = self.in_flight.try_join_next() {
            if let Err(e) = result {
                warn!(error = %e, "scale task aborted");
            }
        }
    }

    /// Run the sampling loop, plus the diagnostics loop when `debug` is
    /// set, until shutdown.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let mut check = tokio::time::interval(self.config.worker_check_interval());
        check.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut stats = tokio::time::interval(self.config.show_stat_interval());
        stats.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let show_stats = self.config.debug;

        info!(
            interval_ms = self.config.worker_check_interval_ms,
            show_stats,
            "autoscaler started"
        );

        loop {
            tokio::select! {
                _ = check.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!(error = %e, "process list poll failed");
                    }
                }
                _ = stats.tick(), if show_stats => {
                    self.log_stats().await;
                }
                _ = shutdown.changed() => {
                    info!("autoscaler shutting down");
                    break;
                }
            }
        }

        self.wait_idle().await;
    }
}

/// Apply a scale command's outcome. A failed or timed-out command frees
/// the application without consuming a cooldown window.
fn complete_scaling(
    app: &mut Application,
    target: ScaleTarget,
    outcome: Result<(), ScaleError>,
    now_ms: u64,
) {
    let direction = app.finish_scaling();
    match (outcome, direction) {
        (Ok(()), Some(ScaleDirection::Up)) => {
            app.mark_scaled_up(now_ms);
            info!(app = %app.name(), %target, "app scaled up");
        }
        (Ok(()), Some(ScaleDirection::Down)) => {
            app.mark_scaled_down(now_ms);
            info!(app = %app.name(), %target, "app released one worker");
        }
        (Ok(()), None) => {}
        (Err(e), _) => {
            warn!(app = %app.name(), %target, error = %e, "scale command failed");
        }
    }
}
