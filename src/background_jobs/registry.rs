use super::job::BackgroundJob;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Job '{0}' is already registered")]
    AlreadyRegistered(String),
    #[error("No job registered under '{0}'")]
    NotFound(String),
}

/// In-memory map from job identifier to implementation.
///
/// Rebuilt on every process start by discovery.
#[derive(Default)]
pub struct JobRegistry {
    jobs: HashMap<String, Arc<dyn BackgroundJob>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: &str,
        job: Arc<dyn BackgroundJob>,
    ) -> Result<(), RegistryError> {
        if self.jobs.contains_key(name) {
            return Err(RegistryError::AlreadyRegistered(name.to_string()));
        }
        self.jobs.insert(name.to_string(), job);
        Ok(())
    }

    /// Registers `job`, replacing any previous registration. Returns `true`
    /// when an entry was replaced.
    pub fn overwrite(&mut self, name: &str, job: Arc<dyn BackgroundJob>) -> bool {
        self.jobs.insert(name.to_string(), job).is_some()
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn BackgroundJob>, RegistryError> {
        self.jobs
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.jobs.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.jobs.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
