//! Per-tenant mutual exclusion for migration runs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as SyncMutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::error::DispatchError;
use crate::tenant::SchemaName;

type LockMap = HashMap<SchemaName, Arc<Mutex<()>>>;

/// Entries live only while a run holds or waits for them.
#[derive(Debug, Default)]
pub struct TenantLocks {
    locks: Arc<SyncMutex<LockMap>>,
}

/// Held for as long as a tenant's run is in progress.
#[derive(Debug)]
pub struct TenantGuard {
    schema: SchemaName,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<SyncMutex<LockMap>>,
}

impl TenantGuard {
    pub fn schema(&self) -> &SchemaName {
        &self.schema
    }
}

impl Drop for TenantGuard {
    fn drop(&mut self) {
        drop(self.guard.take());

        let mut locks = lock_map(&self.locks);
        // Waiters hold a clone of the entry; only the map's own reference left
        // means nobody else wants this tenant.
        if locks
            .get(&self.schema)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.schema);
        }
        debug!(schema = %self.schema, "released tenant lock");
    }
}

fn lock_map(locks: &SyncMutex<LockMap>) -> MutexGuard<'_, LockMap> {
    locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl TenantLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait up to `wait` for exclusive access to `schema`. A zero wait only
    /// tries once.
    pub async fn acquire(
        &self,
        schema: &SchemaName,
        wait: Duration,
    ) -> Result<TenantGuard, DispatchError> {
        let lock = {
            let mut locks = lock_map(&self.locks);
            // Drop entries left by waiters that were cancelled.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(schema.clone()).or_default())
        };

        let busy = || DispatchError::TenantBusy(schema.to_string());
        let guard = if wait.is_zero() {
            lock.try_lock_owned().map_err(|_| busy())?
        } else {
            tokio::time::timeout(wait, lock.lock_owned())
                .await
                .map_err(|_| busy())?
        };

        debug!(schema = %schema, "acquired tenant lock");
        Ok(TenantGuard {
            schema: schema.clone(),
            guard: Some(guard),
            locks: Arc::clone(&self.locks),
        })
    }

    pub fn is_locked(&self, schema: &SchemaName) -> bool {
        lock_map(&self.locks)
            .get(schema)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }

    /// Number of tenants currently held or waited on.
    pub fn len(&self) -> usize {
        lock_map(&self.locks).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
