//! Registry: the set of monitored applications, keyed by name.
//!
//! Owned by the control loop. Each application sits behind its own
//! mutex so that a scale completion running on another task can update
//! it without holding up ingestion of the others.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use pmscale_core::{ProcessRecord, bytes_to_mb};

use crate::application::Application;

/// An application shared between the tick loop and completion tasks.
pub type SharedApplication = Arc<Mutex<Application>>;

/// Applications currently tracked, keyed by name.
pub struct Registry {
    apps: HashMap<String, SharedApplication>,
    window_ms: u64,
}

impl Registry {
    /// Create an empty registry whose applications retain `window_ms` of samples.
    pub fn new(window_ms: u64) -> Self {
        Self {
            apps: HashMap::new(),
            window_ms,
        }
    }

    /// Look up an application by name.
    pub fn get(&self, name: &str) -> Option<SharedApplication> {
        self.apps.get(name).cloned()
    }

    /// Number of tracked applications.
    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    /// All registered applications, sorted by name.
    pub fn applications(&self) -> Vec<SharedApplication> {
        let mut names: Vec<&String> = self.apps.keys().collect();
        names.sort();
        names.into_iter().map(|n| self.apps[n].clone()).collect()
    }

    fn remove(&mut self, name: &str, reason: &str) {
        if self.apps.remove(name).is_some() {
            info!(app = %name, reason, "stopped tracking application");
        }
    }

    /// Fold one poll of the supervisor's process list into the registry.
    ///
    /// Returns the applications that received samples, keyed by name in
    /// first-seen order. Their state is fully updated before this returns.
    pub async fn ingest(
        &mut self,
        records: &[ProcessRecord],
        now_ms: u64,
    ) -> Vec<(String, SharedApplication)> {
        let mut active_pids: HashMap<&str, HashSet<u32>> = HashMap::new();
        for record in records {
            if let (Some(name), Some(pid)) = (record.name.as_deref(), record.pid) {
                active_pids.entry(name).or_default().insert(pid);
            }
        }

        let gone: Vec<String> = self
            .apps
            .keys()
            .filter(|name| !active_pids.contains_key(name.as_str()))
            .cloned()
            .collect();
        for name in gone {
            self.remove(&name, "no active workers");
        }

        let window_ms = self.window_ms;
        let mut touched: Vec<String> = Vec::new();

        for record in records {
            if !record.is_trackable() {
                continue;
            }
            let (Some(name), Some(pid)) = (record.name.as_deref(), record.pid) else {
                continue;
            };

            if !record.status.is_online() {
                self.remove(name, "not online");
                continue;
            }

            let app = self.apps.entry(name.to_string()).or_insert_with(|| {
                let default_workers = record.instances.max(1);
                info!(app = %name, default_workers, "tracking new application");
                Arc::new(Mutex::new(Application::new(name, default_workers, window_ms)))
            });

            let mut guard = app.lock().await;
            if let Some(pids) = active_pids.get(name) {
                guard.prune_workers(pids);
            }
            guard.upsert_worker(
                pid,
                record.monit.cpu,
                bytes_to_mb(record.monit.memory_bytes),
                now_ms,
            );
            drop(guard);

            if !touched.iter().any(|n| n == name) {
                touched.push(name.to_string());
            }
        }

        // An app dropped later in the same poll is no longer evaluated.
        let touched: Vec<(String, SharedApplication)> = touched
            .into_iter()
            .filter_map(|name| {
                let app = self.apps.get(&name).cloned()?;
                Some((name, app))
            })
            .collect();

        debug!(
            records = records.len(),
            apps = self.apps.len(),
            touched = touched.len(),
            "process list ingested"
        );
        touched
    }
}
