use super::job::Job;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Job {0} is already registered")]
    AlreadyExists(String),
    #[error("Job {0} not found")]
    NotFound(String),
}

/// Thread-safe name -> job lookup.
///
/// The single source of truth for which jobs exist; the scheduler and the
/// HTTP job service both read from it.
#[derive(Default)]
pub struct Registry {
    jobs: RwLock<HashMap<String, Arc<dyn Job>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, job: Arc<dyn Job>) -> Result<(), RegistryError> {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let name = job.name().to_string();
        if jobs.contains_key(&name) {
            return Err(RegistryError::AlreadyExists(name));
        }
        jobs.insert(name, job);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Job>, RegistryError> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub fn unregister(&self, name: &str) -> Result<Arc<dyn Job>, RegistryError> {
        self.jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// All registered jobs, sorted by name.
    pub fn list(&self) -> Vec<Arc<dyn Job>> {
        let mut jobs: Vec<_> = self
            .jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.name().cmp(b.name()));
        jobs
    }

    pub fn count(&self) -> usize {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}
