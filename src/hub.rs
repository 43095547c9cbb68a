//! Process-wide service object.
//!
//! One `TaskHub` is built at startup and handed to whatever drives the UI.
//! Every user interaction goes through `interact`, which gives the GC
//! scheduler its tick before running the handler against the store.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheLimits, Clock, MemoryCache, SystemClock};
use crate::core::config::HubConfig;
use crate::gc::{GcConfig, GcReport, GcScheduler, MemoryProbe, SysinfoProbe};
use crate::launcher::{CommandExecutor, LaunchError, LaunchHandle, LaunchPool, ShellExecutor};
use crate::persistence::ConfigFile;
use crate::state::StateStore;
use crate::taskfile::{load_task_file, LoadSummary, TaskfileError, YamlTaskfileReader};

pub struct TaskHub {
    config: HubConfig,
    cache: Arc<MemoryCache>,
    store: Arc<StateStore>,
    gc: GcScheduler,
    launcher: Option<LaunchPool>,
}

impl TaskHub {
    /// Wire up the hub against the real clock, `sysinfo` and the configured runner.
    pub fn new(config: HubConfig) -> Result<Self, LaunchError> {
        let executor = Arc::new(ShellExecutor::new(config.runner.clone()));
        Self::with_parts(config, Arc::new(SystemClock), Box::new(SysinfoProbe), Some(executor))
    }

    /// Build the hub from explicit parts. Passing no executor disables launching.
    pub fn with_parts(
        config: HubConfig,
        clock: Arc<dyn Clock>,
        probe: Box<dyn MemoryProbe>,
        executor: Option<Arc<dyn CommandExecutor>>,
    ) -> Result<Self, LaunchError> {
        let limits = CacheLimits {
            max_bytes: config.max_cache_bytes,
            max_age: config.max_cache_age,
        };
        let cache = Arc::new(MemoryCache::new(limits, clock));

        let config_file = config.config_path.as_ref().map(ConfigFile::new);
        let store = Arc::new(StateStore::new(Arc::clone(&cache), config_file));

        let gc = GcScheduler::new(
            GcConfig {
                interval: config.gc_interval,
                warning_threshold_percent: config.warning_threshold_percent,
            },
            Arc::clone(&cache),
            probe,
        );

        let launcher = match executor {
            Some(executor) => Some(LaunchPool::new(
                config.launch_workers,
                Arc::clone(&store),
                executor,
            )?),
            None => None,
        };

        tracing::info!(
            target: "state",
            max_cache_bytes = config.max_cache_bytes,
            max_cache_age_secs = config.max_cache_age.as_secs(),
            gc_interval_secs = config.gc_interval.as_secs(),
            launching = launcher.is_some(),
            "Task hub ready"
        );

        Ok(Self {
            config,
            cache,
            store,
            gc,
            launcher,
        })
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<MemoryCache> {
        &self.cache
    }

    pub fn gc(&self) -> &GcScheduler {
        &self.gc
    }

    /// Run one user interaction.
    pub fn interact<R>(&self, handler: impl FnOnce(&StateStore) -> R) -> R {
        if let Some(report) = self.gc.tick() {
            log_gc_report(&report);
        }
        handler(&self.store)
    }

    /// Reload a task definition file as one interaction.
    pub fn load_taskfile(&self, path: &Path) -> Result<LoadSummary, TaskfileError> {
        self.interact(|store| load_task_file(store, &YamlTaskfileReader, path))
    }

    /// Launch `task_names` in one runner invocation.
    ///
    /// Without an explicit `taskfile` the active task file is used.
    pub fn launch(
        &self,
        task_names: Vec<String>,
        taskfile: Option<PathBuf>,
    ) -> Result<LaunchHandle, LaunchError> {
        let pool = self.launcher.as_ref().ok_or(LaunchError::Disabled)?;
        let taskfile = self.interact(|store| {
            taskfile.or_else(|| store.active_taskfile().map(PathBuf::from))
        });
        pool.submit(task_names, taskfile)
    }

    /// Launch every selected task, together or one launch per task.
    pub fn launch_selected(
        &self,
        taskfile: Option<PathBuf>,
        parallel: bool,
    ) -> Result<Vec<LaunchHandle>, LaunchError> {
        let pool = self.launcher.as_ref().ok_or(LaunchError::Disabled)?;
        let (names, taskfile) = self.interact(|store| {
            let taskfile = taskfile.or_else(|| store.active_taskfile().map(PathBuf::from));
            (store.get_selected_task_names(), taskfile)
        });

        if parallel {
            pool.submit_parallel(&names, taskfile)
        } else {
            pool.submit(names, taskfile).map(|handle| vec![handle])
        }
    }

    /// Stop the launch pool. The store and cache stay usable.
    pub fn shutdown(&self, timeout: Duration) -> Result<(), LaunchError> {
        match &self.launcher {
            Some(pool) => pool.shutdown(timeout),
            None => Ok(()),
        }
    }
}

fn log_gc_report(report: &GcReport) {
    tracing::debug!(
        target: "gc",
        ran_at = %report.ran_at,
        reclaimed_bytes = report.reclaimed_bytes,
        outcome = ?report.outcome,
        "Interaction triggered GC pass"
    );
}
