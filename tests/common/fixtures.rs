//! Workspace data seeded into every test server.

use super::constants::*;
use chrono::{Duration, Utc};
use reportflow_server::workspace_store::{
    NewEmailTemplate, NewTask, TaskStatus, WorkspaceStore,
};

/// Seeds the report template and a set of tasks. Returns the template id.
pub fn seed_workspace(store: &dyn WorkspaceStore) -> anyhow::Result<i64> {
    let now = Utc::now();

    let template = store.create_template(
        &NewEmailTemplate {
            name: REPORT_TEMPLATE_NAME.to_string(),
            subject: "{{ report_period }} summary for {{ period_end }}".to_string(),
            html_body: "<h1>{{ report_period }} summary</h1>\
                        <p>Total: {{ total_tasks }}</p>\
                        <p>Completed: {{ completed_tasks }}</p>\
                        <p>In progress: {{ in_progress_tasks }}</p>\
                        <p>Todo: {{ todo_tasks }}</p>\
                        <p>Completion: {{ completion_rate }}%</p>\
                        {{ accomplishments }}"
                .to_string(),
            category: Some("reports".to_string()),
            is_active: true,
            created_by: Some("admin".to_string()),
        },
        now,
    )?;

    let tasks = [
        (RECENT_COMPLETED_TITLE, TaskStatus::Completed, 1),
        ("Fix billing export", TaskStatus::Completed, 3),
        ("Migrate search index", TaskStatus::InProgress, 2),
        ("Draft hiring plan", TaskStatus::Todo, 5),
        (OLDER_COMPLETED_TITLE, TaskStatus::Completed, 20),
    ];
    for (title, status, days_ago) in tasks {
        store.create_task(&NewTask::new(title, status, now - Duration::days(days_ago)))?;
    }

    Ok(template.id)
}
