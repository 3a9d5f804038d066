//! Static job registration table and its synchronization into the job store.

use super::job::BackgroundJob;
use super::registry::JobRegistry;
use super::schedule::ScheduleConfig;
use crate::job_store::{JobStore, NewJob};
use anyhow::Result;
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{debug, info, warn};

lazy_static! {
    static ref JOB_IDENTIFIER: Regex =
        Regex::new(r"^[a-z][a-z0-9_]*$").expect("valid job identifier regex");
}

/// One row of a registration table.
pub struct JobEntry {
    /// Stable identifier; the registry key and the default job row name.
    pub name: &'static str,
    pub description: &'static str,
    pub active_by_default: bool,
    pub default_schedule: fn() -> ScheduleConfig,
    pub default_params: fn() -> JsonValue,
    pub factory: fn() -> Result<Arc<dyn BackgroundJob>>,
}

#[derive(Debug, Clone)]
pub struct DiscoveredJob {
    pub name: String,
    pub description: String,
    pub module_path: String,
    pub schedule: ScheduleConfig,
    pub params: JsonValue,
    pub active_by_default: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntry {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub registered: Vec<DiscoveredJob>,
    pub skipped: Vec<SkippedEntry>,
}

pub fn is_valid_identifier(name: &str) -> bool {
    JOB_IDENTIFIER.is_match(name)
}

fn discover_entry(entry: &JobEntry) -> Result<(DiscoveredJob, Arc<dyn BackgroundJob>), String> {
    if !is_valid_identifier(entry.name) {
        return Err("invalid identifier".to_string());
    }

    let schedule = (entry.default_schedule)();
    schedule
        .validate()
        .map_err(|e| format!("invalid default schedule: {}", e))?;

    let params = (entry.default_params)();
    if !params.is_object() {
        return Err("default params must be a JSON object".to_string());
    }

    let job = (entry.factory)().map_err(|e| format!("factory failed: {:#}", e))?;
    let module_path = job.module_path();
    if module_path.is_empty() {
        return Err("empty module path".to_string());
    }

    let discovered = DiscoveredJob {
        name: entry.name.to_string(),
        description: entry.description.to_string(),
        module_path: module_path.to_string(),
        schedule,
        params,
        active_by_default: entry.active_by_default,
    };
    Ok((discovered, job))
}

/// Registers every well-formed entry of `table` into `registry`.
///
/// Malformed entries are skipped and reported. Re-running over the same
/// registry replaces earlier registrations.
pub fn discover_jobs(table: &[JobEntry], registry: &mut JobRegistry) -> DiscoveryReport {
    let mut report = DiscoveryReport::default();

    for entry in table {
        match discover_entry(entry) {
            Ok((discovered, job)) => {
                if registry.overwrite(entry.name, job) {
                    debug!("Replaced registration for job '{}'", entry.name);
                }
                report.registered.push(discovered);
            }
            Err(reason) => {
                warn!("Skipping job entry '{}': {}", entry.name, reason);
                report.skipped.push(SkippedEntry {
                    name: entry.name.to_string(),
                    reason,
                });
            }
        }
    }

    info!(
        "Job discovery registered {} job(s), skipped {}",
        report.registered.len(),
        report.skipped.len()
    );
    report
}

/// Creates a job row for each discovered job that has none yet.
///
/// Existing rows are left as they are. Returns the number of rows created.
pub fn sync_to_store(
    report: &DiscoveryReport,
    job_store: &dyn JobStore,
    now: DateTime<Utc>,
) -> Result<usize> {
    let mut created = 0;

    for discovered in &report.registered {
        if job_store.get_job_by_name(&discovered.name)?.is_some() {
            continue;
        }

        job_store.create_job(
            &NewJob {
                name: discovered.name.clone(),
                description: Some(discovered.description.clone()),
                module_path: discovered.module_path.clone(),
                function_name: discovered.name.clone(),
                schedule: discovered.schedule.clone(),
                is_active: discovered.active_by_default,
                is_custom: false,
                params: discovered.params.clone(),
            },
            now,
        )?;
        created += 1;
    }

    if created > 0 {
        info!("Created {} job row(s) from discovery", created);
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background_jobs::{JobContext, JobError};
    use crate::job_store::{JobFilter, JobUpdate, SqliteJobStore};
    use serde_json::json;
    use tempfile::TempDir;

    struct NoopJob;

    impl BackgroundJob for NoopJob {
        fn module_path(&self) -> &'static str {
            module_path!()
        }

        fn execute(&self, _ctx: &JobContext) -> Result<(), JobError> {
            Ok(())
        }
    }

    struct NamelessJob;

    impl BackgroundJob for NamelessJob {
        fn module_path(&self) -> &'static str {
            ""
        }

        fn execute(&self, _ctx: &JobContext) -> Result<(), JobError> {
            Ok(())
        }
    }

    fn daily() -> ScheduleConfig {
        ScheduleConfig::Daily { hour: 2, minute: 0 }
    }

    fn bad_schedule() -> ScheduleConfig {
        ScheduleConfig::Daily { hour: 25, minute: 0 }
    }

    fn no_params() -> JsonValue {
        json!({})
    }

    fn noop() -> Result<Arc<dyn BackgroundJob>> {
        Ok(Arc::new(NoopJob))
    }

    fn nameless() -> Result<Arc<dyn BackgroundJob>> {
        Ok(Arc::new(NamelessJob))
    }

    fn broken() -> Result<Arc<dyn BackgroundJob>> {
        anyhow::bail!("missing dependency")
    }

    fn entry(
        name: &'static str,
        default_schedule: fn() -> ScheduleConfig,
        factory: fn() -> Result<Arc<dyn BackgroundJob>>,
    ) -> JobEntry {
        JobEntry {
            name,
            description: "test entry",
            active_by_default: true,
            default_schedule,
            default_params: no_params,
            factory,
        }
    }

    #[test]
    fn identifiers() {
        assert!(is_valid_identifier("weekly_report"));
        assert!(is_valid_identifier("job2"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("2job"));
        assert!(!is_valid_identifier("Weekly"));
        assert!(!is_valid_identifier("weekly-report"));
    }

    #[test]
    fn skips_malformed_entries_without_aborting() {
        let table = [
            entry("good_one", daily, noop),
            entry("", daily, noop),
            entry("Bad-Name", daily, noop),
            entry("bad_schedule", bad_schedule, noop),
            entry("broken_factory", daily, broken),
            entry("nameless", daily, nameless),
            entry("good_two", daily, noop),
        ];
        let mut registry = JobRegistry::new();

        let report = discover_jobs(&table, &mut registry);

        assert_eq!(registry.names(), vec!["good_one", "good_two"]);
        assert_eq!(report.registered.len(), 2);
        let skipped: Vec<&str> = report.skipped.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            skipped,
            vec!["", "Bad-Name", "bad_schedule", "broken_factory", "nameless"]
        );
        assert!(report.skipped[4].reason.contains("module path"));
        assert!(report.skipped[3].reason.contains("missing dependency"));
    }

    #[test]
    fn rediscovery_is_idempotent() {
        let table = [entry("good_one", daily, noop)];
        let mut registry = JobRegistry::new();

        discover_jobs(&table, &mut registry);
        let report = discover_jobs(&table, &mut registry);

        assert_eq!(registry.len(), 1);
        assert_eq!(report.registered.len(), 1);
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn sync_creates_missing_rows_and_keeps_edits() {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteJobStore::new(temp_dir.path().join("jobs.db")).unwrap();
        let table = [entry("good_one", daily, noop), entry("good_two", daily, noop)];
        let mut registry = JobRegistry::new();
        let report = discover_jobs(&table, &mut registry);
        let now = Utc::now();

        assert_eq!(sync_to_store(&report, &store, now).unwrap(), 2);

        let row = store.get_job_by_name("good_one").unwrap().unwrap();
        assert_eq!(row.function_name, "good_one");
        assert!(!row.is_custom);
        assert!(row.is_active);
        assert_eq!(row.schedule_type, "daily");
        assert!(row.module_path.contains("discovery"));

        store
            .update_job(
                row.id,
                &JobUpdate {
                    is_active: Some(false),
                    ..Default::default()
                },
                now,
            )
            .unwrap();

        assert_eq!(sync_to_store(&report, &store, now).unwrap(), 0);
        assert!(!store.get_job(row.id).unwrap().unwrap().is_active);
        assert_eq!(store.list_jobs(&JobFilter::default()).unwrap().len(), 2);
    }
}
