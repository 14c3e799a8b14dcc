//! Control loop integration tests.
//!
//! Drives the autoscaler tick against an in-memory supervisor whose
//! process table reacts to scale commands the way PM2 does: `+N` forks
//! new workers, an absolute count stops the newest ones.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use pmscale_autoscale::{Autoscaler, ScaleDecision, SkipReason};
use pmscale_core::{
    ExecMode, HostStats, MEMORY_MB, Monit, ProcessRecord, ProcessStatus, ScaleConfig, ScaleTarget,
};
use pmscale_supervisor::{BoxFuture, Supervisor, SupervisorError, SupervisorResult};
use pmscale_tracker::ScalingState;

const START: u64 = 1_700_000_000_000;

struct Pool {
    name: String,
    instances: u32,
    status: ProcessStatus,
    pids: Vec<u32>,
    cpu: f64,
    next_pid: u32,
}

#[derive(Default)]
struct MemoryPm2 {
    pools: Mutex<Vec<Pool>>,
    list_fails: Mutex<bool>,
    commands: Mutex<Vec<(String, ScaleTarget)>>,
}

impl MemoryPm2 {
    fn start(&self, name: &str, instances: u32, cpu: f64) {
        let base = 1000 * (self.pools.lock().unwrap().len() as u32 + 1);
        self.pools.lock().unwrap().push(Pool {
            name: name.to_string(),
            instances,
            status: ProcessStatus::Online,
            pids: (0..instances).map(|i| base + i).collect(),
            cpu,
            next_pid: base + instances,
        });
    }

    fn with_pool<R>(&self, name: &str, f: impl FnOnce(&mut Pool) -> R) -> R {
        let mut pools = self.pools.lock().unwrap();
        let pool = pools.iter_mut().find(|p| p.name == name).unwrap();
        f(pool)
    }

    fn set_cpu(&self, name: &str, cpu: f64) {
        self.with_pool(name, |p| p.cpu = cpu);
    }

    fn workers(&self, name: &str) -> usize {
        self.with_pool(name, |p| p.pids.len())
    }

    fn commands(&self) -> Vec<(String, ScaleTarget)> {
        self.commands.lock().unwrap().clone()
    }
}

impl Supervisor for MemoryPm2 {
    fn list(&self) -> BoxFuture<'_, SupervisorResult<Vec<ProcessRecord>>> {
        let result = if *self.list_fails.lock().unwrap() {
            Err(SupervisorError::CommandFailed {
                command: "pm2 jlist".to_string(),
                status: "exit status: 1".to_string(),
                stderr: "connect ECONNREFUSED".to_string(),
            })
        } else {
            let pools = self.pools.lock().unwrap();
            Ok(pools
                .iter()
                .flat_map(|pool| {
                    pool.pids.iter().map(move |pid| ProcessRecord {
                        name: Some(pool.name.clone()),
                        pid: Some(*pid),
                        pm_id: Some(*pid),
                        exec_mode: ExecMode::Cluster,
                        status: pool.status,
                        is_module: false,
                        instances: pool.instances,
                        monit: Monit {
                            cpu: pool.cpu,
                            memory_bytes: 100 * MEMORY_MB,
                        },
                    })
                })
                .collect())
        };
        Box::pin(async move { result })
    }

    fn scale<'a>(
        &'a self,
        name: &'a str,
        target: ScaleTarget,
    ) -> BoxFuture<'a, SupervisorResult<()>> {
        self.commands
            .lock()
            .unwrap()
            .push((name.to_string(), target));
        self.with_pool(name, |pool| match target {
            ScaleTarget::By(n) => {
                for _ in 0..n {
                    pool.pids.push(pool.next_pid);
                    pool.next_pid += 1;
                }
            }
            ScaleTarget::To(n) => pool.pids.truncate(n as usize),
        });
        Box::pin(async { Ok(()) })
    }
}

fn host(cpu_cores: u32) -> HostStats {
    HostStats {
        free_memory_bytes: 2048 * MEMORY_MB,
        total_memory_bytes: 8192 * MEMORY_MB,
        cpu_cores,
    }
}

fn config() -> ScaleConfig {
    ScaleConfig {
        scale_cpu_threshold: 80.0,
        release_cpu_threshold: 30.0,
        min_seconds_to_add_worker: 30,
        min_seconds_to_release_worker: 60,
        average_worker_resources_over_seconds: 5,
        ..ScaleConfig::default()
    }
}

struct Harness {
    pm2: Arc<MemoryPm2>,
    now: Arc<AtomicU64>,
    scaler: Autoscaler,
}

impl Harness {
    fn new(config: ScaleConfig, cpu_cores: u32) -> Self {
        let pm2 = Arc::new(MemoryPm2::default());
        let now = Arc::new(AtomicU64::new(START));
        let clock = now.clone();
        let scaler = Autoscaler::new(config, pm2.clone(), Box::new(host(cpu_cores)))
            .with_clock(Arc::new(move || clock.load(Ordering::SeqCst)));
        Self { pm2, now, scaler }
    }

    /// Advance the clock and run one tick, waiting for any command it issued.
    async fn tick_after(&mut self, secs: u64) -> Vec<(String, ScaleDecision)> {
        self.now.fetch_add(secs * 1000, Ordering::SeqCst);
        let decisions = self.scaler.tick().await.unwrap();
        self.scaler.wait_idle().await;
        decisions
    }
}

fn decision_for(decisions: &[(String, ScaleDecision)], name: &str) -> ScaleDecision {
    decisions
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, d)| *d)
        .unwrap()
}

#[tokio::test]
async fn sustained_load_adds_workers_once_per_cooldown() {
    let mut h = Harness::new(ScaleConfig { max_workers: 6, ..config() }, 8);
    h.pm2.start("api", 2, 95.0);

    let d = h.tick_after(0).await;
    assert_eq!(decision_for(&d, "api"), ScaleDecision::ScaleUp { by: 1 });
    assert_eq!(h.pm2.workers("api"), 3);

    // Still hot, but inside the add cooldown.
    let d = h.tick_after(10).await;
    assert_eq!(decision_for(&d, "api"), ScaleDecision::Skip(SkipReason::Cooldown));
    assert_eq!(h.pm2.workers("api"), 3);

    let d = h.tick_after(25).await;
    assert_eq!(decision_for(&d, "api"), ScaleDecision::ScaleUp { by: 1 });
    assert_eq!(h.pm2.workers("api"), 4);

    assert_eq!(
        h.pm2.commands(),
        vec![
            ("api".to_string(), ScaleTarget::By(1)),
            ("api".to_string(), ScaleTarget::By(1)),
        ]
    );
}

#[tokio::test]
async fn worker_cap_defaults_to_cores_minus_one() {
    let mut h = Harness::new(config(), 4);
    h.pm2.start("api", 2, 300.0);

    let d = h.tick_after(0).await;
    // desired = ceil(300/80*2 - 2) = 6, capped by 3 - 2 = 1.
    assert_eq!(decision_for(&d, "api"), ScaleDecision::ScaleUp { by: 1 });

    let d = h.tick_after(60).await;
    assert_eq!(decision_for(&d, "api"), ScaleDecision::Hold);
    assert_eq!(h.pm2.workers("api"), 3);
}

#[tokio::test]
async fn idle_pool_shrinks_one_at_a_time_to_default() {
    let mut h = Harness::new(ScaleConfig { max_workers: 8, ..config() }, 8);
    h.pm2.start("api", 2, 10.0);
    h.pm2.with_pool("api", |p| {
        p.pids.extend([2000, 2001, 2002]);
    });

    let d = h.tick_after(0).await;
    assert_eq!(decision_for(&d, "api"), ScaleDecision::ScaleDown { to: 4 });
    assert_eq!(h.pm2.workers("api"), 4);

    let d = h.tick_after(30).await;
    assert_eq!(decision_for(&d, "api"), ScaleDecision::Skip(SkipReason::Cooldown));

    let d = h.tick_after(31).await;
    assert_eq!(decision_for(&d, "api"), ScaleDecision::ScaleDown { to: 3 });

    let d = h.tick_after(61).await;
    assert_eq!(decision_for(&d, "api"), ScaleDecision::ScaleDown { to: 2 });

    let d = h.tick_after(61).await;
    assert_eq!(decision_for(&d, "api"), ScaleDecision::Hold);
    assert_eq!(h.pm2.workers("api"), 2);
}

#[tokio::test]
async fn applications_scale_independently() {
    let mut h = Harness::new(ScaleConfig { max_workers: 6, ..config() }, 8);
    h.pm2.start("api", 2, 95.0);
    h.pm2.start("web", 2, 40.0);

    let d = h.tick_after(0).await;
    assert_eq!(decision_for(&d, "api"), ScaleDecision::ScaleUp { by: 1 });
    assert_eq!(decision_for(&d, "web"), ScaleDecision::Hold);
    assert_eq!(h.pm2.workers("web"), 2);
}

#[tokio::test]
async fn offline_application_is_forgotten_and_recreated_fresh() {
    let mut h = Harness::new(ScaleConfig { max_workers: 6, ..config() }, 8);
    h.pm2.start("api", 2, 95.0);
    h.tick_after(0).await;
    assert!(h
        .scaler
        .registry()
        .get("api")
        .unwrap()
        .lock()
        .await
        .last_scale_up_at()
        .is_some());

    h.pm2.with_pool("api", |p| p.status = ProcessStatus::Stopped);
    let d = h.tick_after(1).await;
    assert!(d.is_empty());
    assert!(h.scaler.registry().get("api").is_none());

    h.pm2.with_pool("api", |p| {
        p.status = ProcessStatus::Online;
        p.instances = 3;
        p.cpu = 50.0;
    });
    h.tick_after(1).await;

    let app = h.scaler.registry().get("api").unwrap();
    let app = app.lock().await;
    assert_eq!(app.default_worker_count(), 3);
    assert_eq!(app.last_scale_up_at(), None);
    assert_eq!(app.scaling_state(), ScalingState::Idle);
}

#[tokio::test]
async fn failed_poll_leaves_state_untouched() {
    let mut h = Harness::new(config(), 8);
    h.pm2.start("api", 2, 50.0);
    h.tick_after(0).await;

    *h.pm2.list_fails.lock().unwrap() = true;
    h.now.fetch_add(1000, Ordering::SeqCst);
    assert!(h.scaler.tick().await.is_err());

    let app = h.scaler.registry().get("api").unwrap();
    let app = app.lock().await;
    assert_eq!(app.active_worker_count(), 2);
    assert_eq!(app.samples(1000).unwrap().len(), 1);
}

#[tokio::test]
async fn cpu_signal_is_smoothed_over_the_window() {
    let mut h = Harness::new(ScaleConfig { max_workers: 6, ..config() }, 8);
    h.pm2.start("api", 2, 10.0);
    h.tick_after(0).await;

    // One hot sample averages to (10 + 130) / 2 = 70, below the threshold.
    h.pm2.set_cpu("api", 130.0);
    let d = h.tick_after(1).await;
    assert_eq!(decision_for(&d, "api"), ScaleDecision::Hold);

    // Once the cool sample leaves the 5s window, the pool runs hot.
    let d = h.tick_after(6).await;
    assert_eq!(decision_for(&d, "api"), ScaleDecision::ScaleUp { by: 2 });
}
