//! Schedule registry and trigger management

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::cron::CronSchedule;
use super::definition::{ScheduleConfig, ScheduleFile};
use super::error::SchedulerError;
use super::trigger::{ScheduleCounters, Trigger};
use crate::runner::RunnerHandle;

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Directory holding `*.yaml` / `*.yml` schedule definitions
    pub schedules_dir: PathBuf,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            schedules_dir: PathBuf::from("schedules"),
        }
    }
}

impl SchedulerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schedules_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.schedules_dir = dir.into();
        self
    }
}

/// Point-in-time view of one schedule
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduledWorkflow {
    pub config: ScheduleConfig,
    pub source: PathBuf,
    pub active: bool,
    pub run_count: u64,
    pub error_count: u64,
    pub skipped_count: u64,
    pub in_flight: u32,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleStats {
    pub total: usize,
    pub active: usize,
    pub inactive: usize,
    pub total_runs: u64,
    pub total_errors: u64,
    pub skipped: u64,
}

/// A definition that was not loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedDefinition {
    pub path: PathBuf,
    pub id: Option<String>,
    pub reason: String,
}

/// Outcome of loading the definitions directory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub skipped: Vec<SkippedDefinition>,
}

struct LoadedSchedule {
    config: ScheduleConfig,
    cron: CronSchedule,
    source: PathBuf,
}

struct ScheduleEntry {
    config: ScheduleConfig,
    cron: CronSchedule,
    source: PathBuf,
    counters: Arc<ScheduleCounters>,
    trigger: Option<Trigger>,
}

impl ScheduleEntry {
    fn new(loaded: LoadedSchedule) -> Self {
        Self {
            config: loaded.config,
            cron: loaded.cron,
            source: loaded.source,
            counters: Arc::new(ScheduleCounters::default()),
            trigger: None,
        }
    }

    fn is_active(&self) -> bool {
        self.trigger.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn arm(&mut self, runner: &RunnerHandle) {
        if self.is_active() {
            return;
        }
        self.trigger = Some(Trigger::arm(
            self.config.clone(),
            self.cron.clone(),
            Arc::clone(&self.counters),
            runner.clone(),
        ));
    }

    fn disarm(&mut self) -> bool {
        match self.trigger.take() {
            Some(trigger) => {
                trigger.disarm();
                true
            }
            None => false,
        }
    }

    fn snapshot(&self) -> ScheduledWorkflow {
        let active = self.is_active();
        ScheduledWorkflow {
            config: self.config.clone(),
            source: self.source.clone(),
            active,
            run_count: self.counters.runs(),
            error_count: self.counters.errors(),
            skipped_count: self.counters.skipped(),
            in_flight: self.counters.in_flight(),
            last_run_at: self.counters.last_run_at(),
            next_run_at: active.then(|| self.counters.next_run_at()).flatten(),
            last_error: self.counters.last_error(),
        }
    }
}

/// Cron-driven starter of workflow instances
///
/// Holds the registry of loaded schedules, each optionally armed with a
/// trigger task. Fired schedules reach the runner only through its
/// [`RunnerHandle`].
pub struct Scheduler {
    config: SchedulerConfig,
    runner: RunnerHandle,
    entries: RwLock<BTreeMap<String, ScheduleEntry>>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("schedules", &self.entries.read().len())
            .finish()
    }
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, runner: RunnerHandle) -> Self {
        Self {
            config,
            runner,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Create the definitions directory if needed and load it
    #[instrument(skip(self), fields(dir = %self.config.schedules_dir.display()))]
    pub fn initialize(&self) -> Result<LoadReport, SchedulerError> {
        let dir = &self.config.schedules_dir;
        if !dir.exists() {
            std::fs::create_dir_all(dir).map_err(|e| SchedulerError::io(dir, e))?;
            info!("created schedules directory");
        }
        self.reload_schedules()
    }

    /// Disarm everything, clear the registry and load the directory again
    pub fn reload_schedules(&self) -> Result<LoadReport, SchedulerError> {
        let (loaded, report) = load_directory(&self.config.schedules_dir)?;

        let mut entries = self.entries.write();
        for (_, mut entry) in std::mem::take(&mut *entries) {
            entry.disarm();
        }
        for schedule in loaded {
            let mut entry = ScheduleEntry::new(schedule);
            if entry.config.trigger.enabled {
                entry.arm(&self.runner);
            }
            entries.insert(entry.config.id.clone(), entry);
        }

        info!(
            loaded = report.loaded.len(),
            skipped = report.skipped.len(),
            "schedules loaded"
        );
        Ok(report)
    }

    /// Arm one schedule's trigger
    pub fn start_schedule(&self, id: &str) -> Result<(), SchedulerError> {
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| SchedulerError::NotFound(id.to_string()))?;
        entry.arm(&self.runner);
        info!(schedule_id = id, "schedule started");
        Ok(())
    }

    /// Disarm one schedule's trigger
    pub fn stop_schedule(&self, id: &str) -> Result<(), SchedulerError> {
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| SchedulerError::NotFound(id.to_string()))?;
        if entry.disarm() {
            info!(schedule_id = id, "schedule stopped");
        }
        Ok(())
    }

    /// Disarm every trigger; the registry is kept
    pub fn stop(&self) -> usize {
        let stopped = self
            .entries
            .write()
            .values_mut()
            .filter_map(|entry| entry.disarm().then_some(()))
            .count();
        info!(stopped, "scheduler stopped");
        stopped
    }

    pub fn get_schedule(&self, id: &str) -> Result<ScheduledWorkflow, SchedulerError> {
        self.entries
            .read()
            .get(id)
            .map(ScheduleEntry::snapshot)
            .ok_or_else(|| SchedulerError::NotFound(id.to_string()))
    }

    /// All schedules, ordered by id
    pub fn list_schedules(&self) -> Vec<ScheduledWorkflow> {
        self.collect(|_| true)
    }

    /// Schedules targeting exactly `namespace.Name@version`
    pub fn get_schedules_for_workflow(&self, identity: &str) -> Vec<ScheduledWorkflow> {
        self.collect(|config| config.workflow.identity() == identity)
    }

    /// Schedules matching every supplied property; `None` matches anything
    pub fn filter_schedules_by_workflow_properties(
        &self,
        namespace: Option<&str>,
        name: Option<&str>,
        version: Option<&str>,
    ) -> Vec<ScheduledWorkflow> {
        self.collect(|config| {
            let target = &config.workflow;
            namespace.map_or(true, |ns| target.namespace == ns)
                && name.map_or(true, |n| target.name == n)
                && version.map_or(true, |v| target.version == v)
        })
    }

    fn collect(&self, keep: impl Fn(&ScheduleConfig) -> bool) -> Vec<ScheduledWorkflow> {
        self.entries
            .read()
            .values()
            .filter(|entry| keep(&entry.config))
            .map(ScheduleEntry::snapshot)
            .collect()
    }

    /// The next `count` fire times inside the schedule's window
    pub fn upcoming_runs(
        &self,
        id: &str,
        count: usize,
    ) -> Result<Vec<DateTime<Utc>>, SchedulerError> {
        let entries = self.entries.read();
        let entry = entries
            .get(id)
            .ok_or_else(|| SchedulerError::NotFound(id.to_string()))?;

        let from = match entry.config.start_at {
            Some(start) if start > Utc::now() => start - chrono::Duration::seconds(1),
            _ => Utc::now(),
        };
        Ok(entry
            .cron
            .upcoming(&from, count)
            .into_iter()
            .filter(|at| entry.config.end_at.map_or(true, |end| *at <= end))
            .collect())
    }

    pub fn get_stats(&self) -> ScheduleStats {
        let entries = self.entries.read();
        let active = entries.values().filter(|e| e.is_active()).count();
        ScheduleStats {
            total: entries.len(),
            active,
            inactive: entries.len() - active,
            total_runs: entries.values().map(|e| e.counters.runs()).sum(),
            total_errors: entries.values().map(|e| e.counters.errors()).sum(),
            skipped: entries.values().map(|e| e.counters.skipped()).sum(),
        }
    }

    // ------------------------------------------------------------------
    // CRUD
    // ------------------------------------------------------------------

    /// Persist a new schedule as `<id>.yaml` and register it
    pub fn create_schedule(
        &self,
        config: ScheduleConfig,
    ) -> Result<ScheduledWorkflow, SchedulerError> {
        let cron = config.validate()?;
        if self.entries.read().contains_key(&config.id) {
            return Err(SchedulerError::AlreadyExists(config.id));
        }

        let source = self.config.schedules_dir.join(format!("{}.yaml", config.id));
        if source.exists() {
            return Err(SchedulerError::AlreadyExists(config.id));
        }
        write_schedules(&source, std::slice::from_ref(&config))?;

        let mut entries = self.entries.write();
        let mut entry = ScheduleEntry::new(LoadedSchedule {
            config,
            cron,
            source,
        });
        if entry.config.trigger.enabled {
            entry.arm(&self.runner);
        }
        let snapshot = entry.snapshot();
        info!(schedule_id = %snapshot.config.id, workflow = %snapshot.config.workflow.identity(), "schedule created");
        entries.insert(snapshot.config.id.clone(), entry);
        Ok(snapshot)
    }

    /// Replace a schedule in the file it was loaded from
    pub fn update_schedule(
        &self,
        id: &str,
        config: ScheduleConfig,
    ) -> Result<ScheduledWorkflow, SchedulerError> {
        if config.id != id {
            return Err(SchedulerError::Invalid {
                id: id.to_string(),
                reason: format!("id cannot change to '{}'", config.id),
            });
        }
        let cron = config.validate()?;
        let source = self.source_of(id)?;
        rewrite_source(&source, id, Some(&config))?;

        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| SchedulerError::NotFound(id.to_string()))?;
        entry.disarm();
        entry.config = config;
        entry.cron = cron;
        if entry.config.trigger.enabled {
            entry.arm(&self.runner);
        }
        info!(schedule_id = id, "schedule updated");
        Ok(entry.snapshot())
    }

    /// Remove a schedule from disk and from the registry
    pub fn delete_schedule(&self, id: &str) -> Result<(), SchedulerError> {
        let source = self.source_of(id)?;
        rewrite_source(&source, id, None)?;

        if let Some(mut entry) = self.entries.write().remove(id) {
            entry.disarm();
        }
        info!(schedule_id = id, "schedule deleted");
        Ok(())
    }

    fn source_of(&self, id: &str) -> Result<PathBuf, SchedulerError> {
        self.entries
            .read()
            .get(id)
            .map(|entry| entry.source.clone())
            .ok_or_else(|| SchedulerError::NotFound(id.to_string()))
    }
}

fn is_definition_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext == "yaml" || ext == "yml")
}

fn load_directory(dir: &Path) -> Result<(Vec<LoadedSchedule>, LoadReport), SchedulerError> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| SchedulerError::io(dir, e))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| is_definition_file(path))
        .collect();
    paths.sort();

    let mut loaded = Vec::new();
    let mut report = LoadReport::default();
    let mut seen = HashSet::new();

    for path in paths {
        debug!(path = %path.display(), "loading schedule file");
        let schedules = match ScheduleFile::from_file(&path) {
            Ok(file) => file.into_schedules(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable schedule file");
                report.skipped.push(SkippedDefinition {
                    path,
                    id: None,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        for config in schedules {
            let outcome = config.validate().and_then(|cron| {
                if seen.contains(&config.id) {
                    Err(SchedulerError::AlreadyExists(config.id.clone()))
                } else {
                    Ok(cron)
                }
            });

            match outcome {
                Ok(cron) => {
                    seen.insert(config.id.clone());
                    report.loaded.push(config.id.clone());
                    loaded.push(LoadedSchedule {
                        config,
                        cron,
                        source: path.clone(),
                    });
                }
                Err(e) => {
                    warn!(path = %path.display(), schedule_id = %config.id, error = %e, "skipping invalid schedule");
                    report.skipped.push(SkippedDefinition {
                        path: path.clone(),
                        id: Some(config.id),
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    Ok((loaded, report))
}

fn write_schedules(path: &Path, schedules: &[ScheduleConfig]) -> Result<(), SchedulerError> {
    let yaml = ScheduleFile::to_yaml(schedules)?;
    std::fs::write(path, yaml).map_err(|e| SchedulerError::io(path, e))
}

/// Replace or drop one schedule inside a definition file
///
/// Other schedules in the same file are preserved; an emptied file is removed.
fn rewrite_source(
    path: &Path,
    id: &str,
    replacement: Option<&ScheduleConfig>,
) -> Result<(), SchedulerError> {
    let mut schedules = if path.exists() {
        ScheduleFile::from_file(path)?.into_schedules()
    } else {
        Vec::new()
    };

    match (
        schedules.iter().position(|s| s.id == id),
        replacement,
    ) {
        (Some(index), Some(config)) => schedules[index] = config.clone(),
        (Some(index), None) => {
            schedules.remove(index);
        }
        (None, Some(config)) => schedules.push(config.clone()),
        (None, None) => {}
    }

    if schedules.is_empty() {
        if path.exists() {
            std::fs::remove_file(path).map_err(|e| SchedulerError::io(path, e))?;
        }
        Ok(())
    } else {
        write_schedules(path, &schedules)
    }
}
