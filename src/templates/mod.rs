//! `{{ name }}` substitution over stored email templates.
//!
//! Body values are HTML-escaped and lists render as `<ul>` elements. The
//! subject is plain text. A placeholder naming a variable that was not
//! provided is an error, never left in the output.

use crate::workspace_store::WorkspaceStore;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::sync::Arc;

lazy_static! {
    static ref PLACEHOLDER: Regex =
        Regex::new(r"\{\{\s*([a-zA-Z_][a-zA-Z0-9_]*)\s*\}\}").expect("valid placeholder regex");
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplateValue {
    Text(String),
    Number(i64),
    List(Vec<String>),
}

impl From<&str> for TemplateValue {
    fn from(value: &str) -> Self {
        TemplateValue::Text(value.to_string())
    }
}

impl From<String> for TemplateValue {
    fn from(value: String) -> Self {
        TemplateValue::Text(value)
    }
}

impl From<i64> for TemplateValue {
    fn from(value: i64) -> Self {
        TemplateValue::Number(value)
    }
}

impl From<Vec<String>> for TemplateValue {
    fn from(value: Vec<String>) -> Self {
        TemplateValue::List(value)
    }
}

pub type TemplateVariables = BTreeMap<String, TemplateValue>;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TemplateError {
    #[error("Email template {0} not found")]
    NotFound(i64),
    #[error("Email template '{0}' is inactive")]
    Inactive(String),
    #[error("Template references undefined variable '{0}'")]
    UndefinedVariable(String),
    #[error("Failed to load email template: {0}")]
    Store(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
}

pub trait TemplateRenderer: Send + Sync {
    fn render(
        &self,
        template_id: i64,
        variables: &TemplateVariables,
    ) -> Result<RenderedEmail, TemplateError>;
}

/// Renders templates loaded from the workspace store.
pub struct StoredTemplateRenderer {
    store: Arc<dyn WorkspaceStore>,
}

impl StoredTemplateRenderer {
    pub fn new(store: Arc<dyn WorkspaceStore>) -> Self {
        Self { store }
    }
}

impl TemplateRenderer for StoredTemplateRenderer {
    fn render(
        &self,
        template_id: i64,
        variables: &TemplateVariables,
    ) -> Result<RenderedEmail, TemplateError> {
        let template = self
            .store
            .get_template(template_id)
            .map_err(|e| TemplateError::Store(format!("{:#}", e)))?
            .ok_or(TemplateError::NotFound(template_id))?;

        if !template.is_active {
            return Err(TemplateError::Inactive(template.name));
        }

        Ok(RenderedEmail {
            subject: render_text(&template.subject, variables)?,
            html: render_html(&template.html_body, variables)?,
        })
    }
}

fn substitute(
    source: &str,
    variables: &TemplateVariables,
    format: fn(&TemplateValue) -> String,
) -> Result<String, TemplateError> {
    let mut missing: Option<String> = None;
    let rendered = PLACEHOLDER.replace_all(source, |caps: &Captures| {
        let name = &caps[1];
        match variables.get(name) {
            Some(value) => format(value),
            None => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(name) => Err(TemplateError::UndefinedVariable(name)),
        None => Ok(rendered.into_owned()),
    }
}

/// Renders an HTML body.
pub fn render_html(source: &str, variables: &TemplateVariables) -> Result<String, TemplateError> {
    substitute(source, variables, |value| match value {
        TemplateValue::Text(text) => escape_html(text),
        TemplateValue::Number(n) => n.to_string(),
        TemplateValue::List(items) => {
            let items: String = items
                .iter()
                .map(|item| format!("<li>{}</li>", escape_html(item)))
                .collect();
            format!("<ul>{}</ul>", items)
        }
    })
}

/// Renders a plain-text line such as a subject.
pub fn render_text(source: &str, variables: &TemplateVariables) -> Result<String, TemplateError> {
    substitute(source, variables, |value| match value {
        TemplateValue::Text(text) => text.clone(),
        TemplateValue::Number(n) => n.to_string(),
        TemplateValue::List(items) => items.join(", "),
    })
}

pub fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
