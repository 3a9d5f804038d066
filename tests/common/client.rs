//! HTTP client for end-to-end tests
//!
//! This module provides a high-level HTTP client that wraps reqwest
//! and provides methods for all admin API endpoints.
//!
//! When API routes or request formats change, update only this file.

use super::constants::*;
use reqwest::Response;
use serde_json::Value;
use std::time::{Duration, Instant};

/// HTTP test client for the job admin API
pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    /// The base URL of the test server
    pub base_url: String,
}

impl TestClient {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self { client, base_url }
    }

    // ========================================================================
    // Health
    // ========================================================================

    /// GET /health
    pub async fn health(&self) -> Response {
        self.client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .expect("Health request failed")
    }

    // ========================================================================
    // Jobs
    // ========================================================================

    /// GET /v1/jobs?{query}
    ///
    /// `query` is a raw query string without the leading `?`, e.g. "active=true".
    pub async fn list_jobs(&self, query: &str) -> Response {
        let url = if query.is_empty() {
            format!("{}/v1/jobs", self.base_url)
        } else {
            format!("{}/v1/jobs?{}", self.base_url, query)
        };
        self.client
            .get(url)
            .send()
            .await
            .expect("List jobs request failed")
    }

    /// POST /v1/jobs
    pub async fn create_job(&self, body: Value) -> Response {
        self.client
            .post(format!("{}/v1/jobs", self.base_url))
            .json(&body)
            .send()
            .await
            .expect("Create job request failed")
    }

    /// GET /v1/jobs/{id}
    pub async fn get_job(&self, job_id: i64) -> Response {
        self.client
            .get(format!("{}/v1/jobs/{}", self.base_url, job_id))
            .send()
            .await
            .expect("Get job request failed")
    }

    /// PUT /v1/jobs/{id}
    pub async fn update_job(&self, job_id: i64, body: Value) -> Response {
        self.client
            .put(format!("{}/v1/jobs/{}", self.base_url, job_id))
            .json(&body)
            .send()
            .await
            .expect("Update job request failed")
    }

    /// POST /v1/jobs/{id}/run
    pub async fn run_job(&self, job_id: i64) -> Response {
        self.client
            .post(format!("{}/v1/jobs/{}/run", self.base_url, job_id))
            .send()
            .await
            .expect("Run job request failed")
    }

    /// GET /v1/jobs/{id}/runs?limit={limit}
    pub async fn get_runs(&self, job_id: i64, limit: Option<usize>) -> Response {
        let mut url = format!("{}/v1/jobs/{}/runs", self.base_url, job_id);
        if let Some(limit) = limit {
            url.push_str(&format!("?limit={}", limit));
        }
        self.client
            .get(url)
            .send()
            .await
            .expect("Get runs request failed")
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Looks up a job id by name through the list endpoint.
    ///
    /// # Panics
    ///
    /// Panics if no job has that name.
    pub async fn job_id_by_name(&self, name: &str) -> i64 {
        let jobs: Vec<Value> = self
            .list_jobs(&format!("name_contains={}", name))
            .await
            .json()
            .await
            .expect("Invalid job list body");
        jobs.iter()
            .find(|job| job["name"] == name)
            .and_then(|job| job["id"].as_i64())
            .unwrap_or_else(|| panic!("No job named '{}'", name))
    }

    /// Polls the run history until the newest run is no longer running,
    /// and returns it.
    ///
    /// # Panics
    ///
    /// Panics if no finished run shows up within `RUN_FINISH_TIMEOUT_MS`.
    pub async fn wait_for_run_finished(&self, job_id: i64) -> Value {
        let start = Instant::now();
        let timeout = Duration::from_millis(RUN_FINISH_TIMEOUT_MS);

        loop {
            let runs: Vec<Value> = self
                .get_runs(job_id, Some(1))
                .await
                .json()
                .await
                .expect("Invalid runs body");
            if let Some(run) = runs.into_iter().next() {
                if run["status"] != "running" {
                    return run;
                }
            }
            if start.elapsed() > timeout {
                panic!(
                    "Run of job {} did not finish within {}ms",
                    job_id, RUN_FINISH_TIMEOUT_MS
                );
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}
