//! In-memory job registry.
//!
//! [`JobRegistry`] is the single owner of every [`JobRecord`]. Callers never
//! hold a mutable copy; all changes go through [`JobRegistry::update`], which
//! runs the mutation under the registry lock so concurrent writers cannot
//! lose each other's updates.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::DispatchError;
use crate::state_machine::{JobId, JobRecord};

/// Thread-safe map of job id to job record.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<JobId, JobRecord>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic inside a mutator leaves the map itself consistent, so a
    // poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, JobRecord>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a new record. Fails if the id is already present.
    pub fn insert(&self, record: JobRecord) -> Result<(), DispatchError> {
        let mut jobs = self.lock();
        if jobs.contains_key(&record.id) {
            return Err(DispatchError::DuplicateId(record.id));
        }
        jobs.insert(record.id, record);
        Ok(())
    }

    /// Atomically apply `mutate` to the record for `id` and return its result.
    pub fn update<F, T>(&self, id: JobId, mutate: F) -> Result<T, DispatchError>
    where
        F: FnOnce(&mut JobRecord) -> T,
    {
        let mut jobs = self.lock();
        let record = jobs
            .get_mut(&id)
            .ok_or_else(|| DispatchError::NotFound(id.to_string()))?;
        Ok(mutate(record))
    }

    /// Snapshot of the record for `id`.
    pub fn get(&self, id: JobId) -> Result<JobRecord, DispatchError> {
        self.lock()
            .get(&id)
            .cloned()
            .ok_or_else(|| DispatchError::NotFound(id.to_string()))
    }

    /// All known ids in ascending order.
    pub fn ids(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
