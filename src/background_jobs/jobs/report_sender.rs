//! Periodic task report email.
//!
//! Summarizes the tasks created during the period before the trigger time,
//! renders a stored email template with the summary and sends one email to
//! the configured recipients.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, JobError},
};
use crate::templates::{render_text, TemplateVariables};
use crate::workspace_store::{Task, TaskStatus};
use anyhow::Context;
use chrono::{DateTime, Duration, FixedOffset, Utc};
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportPeriod {
    /// The 7 days before the trigger.
    Weekly,
    /// The 30 days before the trigger.
    Monthly,
}

impl ReportPeriod {
    pub fn window(self) -> Duration {
        match self {
            ReportPeriod::Weekly => Duration::days(7),
            ReportPeriod::Monthly => Duration::days(30),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ReportPeriod::Weekly => "Weekly",
            ReportPeriod::Monthly => "Monthly",
        }
    }
}

#[derive(Debug, Deserialize)]
struct ReportParams {
    template_id: Option<i64>,
    template_name: Option<String>,
    #[serde(default)]
    recipients: Vec<String>,
    subject: Option<String>,
    period: Option<ReportPeriod>,
}

pub struct ReportSenderJob {
    default_period: ReportPeriod,
}

impl ReportSenderJob {
    pub fn new(default_period: ReportPeriod) -> Self {
        Self { default_period }
    }

    fn template_id(&self, ctx: &JobContext, params: &ReportParams) -> Result<i64, JobError> {
        if let Some(id) = params.template_id {
            return Ok(id);
        }
        let Some(name) = params.template_name.as_deref() else {
            return Err(JobError::InvalidParams(
                "either template_id or template_name is required".to_string(),
            ));
        };
        let template = ctx
            .services
            .workspace_store
            .get_template_by_name(name)
            .context("Failed to look up email template")?
            .ok_or_else(|| {
                JobError::ExecutionFailed(format!("Email template '{}' not found", name))
            })?;
        Ok(template.id)
    }
}

fn format_date(dt: DateTime<Utc>, offset: FixedOffset) -> String {
    dt.with_timezone(&offset).format("%Y-%m-%d").to_string()
}

fn titles_with_status(tasks: &[Task], status: TaskStatus) -> Vec<String> {
    tasks
        .iter()
        .filter(|task| task.status == status)
        .map(|task| task.title.clone())
        .collect()
}

/// Computes the template variables for tasks created in `[start, end)`.
///
/// `completion_rate` is the completed share in whole percent, rounded down,
/// and 0 when there are no tasks.
pub fn build_report_variables(
    period: ReportPeriod,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    now: DateTime<Utc>,
    tasks: &[Task],
    offset: FixedOffset,
) -> TemplateVariables {
    let accomplishments = titles_with_status(tasks, TaskStatus::Completed);
    let in_progress = titles_with_status(tasks, TaskStatus::InProgress);
    let total = tasks.len() as i64;
    let completed = accomplishments.len() as i64;
    let in_progress_count = in_progress.len() as i64;
    let todo = tasks
        .iter()
        .filter(|task| task.status == TaskStatus::Todo)
        .count() as i64;
    let completion_rate = if total == 0 { 0 } else { completed * 100 / total };

    let mut variables = TemplateVariables::new();
    variables.insert("report_period".to_string(), period.label().into());
    variables.insert("period_start".to_string(), format_date(start, offset).into());
    variables.insert("period_end".to_string(), format_date(end, offset).into());
    variables.insert("current_date".to_string(), format_date(now, offset).into());
    variables.insert("total_tasks".to_string(), total.into());
    variables.insert("completed_tasks".to_string(), completed.into());
    variables.insert("in_progress_tasks".to_string(), in_progress_count.into());
    variables.insert("todo_tasks".to_string(), todo.into());
    variables.insert("completion_rate".to_string(), completion_rate.into());
    variables.insert("accomplishments".to_string(), accomplishments.into());
    variables.insert("in_progress".to_string(), in_progress.into());
    variables
}

impl BackgroundJob for ReportSenderJob {
    fn module_path(&self) -> &'static str {
        module_path!()
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        let params: ReportParams = serde_json::from_value(ctx.params.clone())
            .map_err(|e| JobError::InvalidParams(e.to_string()))?;
        if params.recipients.is_empty() {
            return Err(JobError::InvalidParams(
                "recipients must be a non-empty list".to_string(),
            ));
        }
        let template_id = self.template_id(ctx, &params)?;
        let period = params.period.unwrap_or(self.default_period);

        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let end = ctx.triggered_at;
        let start = end - period.window();
        let tasks = ctx
            .services
            .workspace_store
            .tasks_created_between(start, end)
            .context("Failed to load tasks for report")?;

        let variables = build_report_variables(
            period,
            start,
            end,
            Utc::now(),
            &tasks,
            ctx.services.utc_offset,
        );

        let mut email = ctx
            .services
            .templates
            .render(template_id, &variables)
            .map_err(|e| JobError::ExecutionFailed(e.to_string()))?;
        if let Some(subject) = params.subject.as_deref() {
            email.subject = render_text(subject, &variables)
                .map_err(|e| JobError::ExecutionFailed(e.to_string()))?;
        }

        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        ctx.services
            .mailer
            .send(&email.html, &email.subject, &params.recipients)
            .map_err(|e| JobError::ExecutionFailed(format!("Failed to send report: {}", e)))?;

        info!(
            "{} report sent to {} recipient(s): {} task(s) between {} and {}",
            period.label(),
            params.recipients.len(),
            tasks.len(),
            start,
            end
        );
        Ok(())
    }
}
