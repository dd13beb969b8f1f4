use crate::errors::HarnessError;
use crate::reset::{clone_name, is_clone, DatabaseRestorer};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

struct CloneQueue {
    members: Vec<String>,
    free: Mutex<VecDeque<String>>,
    available: Arc<Semaphore>,
}

/// Lends per-worker database clones (`<base>_process_<n>`) so concurrent
/// instances on the same logical database never share state.
pub struct EphemeralCoordinator {
    queues: BTreeMap<String, Arc<CloneQueue>>,
}

/// A borrowed clone. Dropping the lease puts the clone back in its queue.
pub struct CloneLease {
    name: Option<String>,
    queue: Arc<CloneQueue>,
    _permit: OwnedSemaphorePermit,
}

impl CloneLease {
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }
}

impl Drop for CloneLease {
    fn drop(&mut self) {
        if let Some(name) = self.name.take() {
            if let Ok(mut free) = self.queue.free.lock() {
                free.push_back(name);
            }
        }
        // _permit is released after the name is back in the queue.
    }
}

impl EphemeralCoordinator {
    /// Creates `copies` clones for every base database. Stale clones from an
    /// earlier run are replaced.
    pub async fn provision(
        restorer: &dyn DatabaseRestorer,
        bases: &[String],
        copies: usize,
    ) -> Result<Self, HarnessError> {
        let mut layout = BTreeMap::new();
        let mut created: Vec<String> = Vec::new();
        for base in bases {
            let mut names = Vec::with_capacity(copies);
            for n in 1..=copies {
                let clone = clone_name(base, n);
                let step = async {
                    restorer.drop_database(&clone).await?;
                    restorer.create_clone(base, &clone).await
                };
                if let Err(e) = step.await {
                    // Clones created so far are not handed to anyone; drop them now.
                    for name in &created {
                        if let Err(drop_err) = restorer.drop_database(name).await {
                            tracing::warn!(event = "clone_drop_failed", clone = %name, error = %drop_err);
                        }
                    }
                    return Err(e);
                }
                tracing::info!(event = "clone_created", base = %base, clone = %clone);
                created.push(clone.clone());
                names.push(clone);
            }
            layout.insert(base.clone(), names);
        }
        Ok(Self::with_clones(layout))
    }

    /// Builds queues over clones that already exist.
    pub fn with_clones(layout: BTreeMap<String, Vec<String>>) -> Self {
        let queues = layout
            .into_iter()
            .map(|(base, names)| {
                let q = CloneQueue {
                    available: Arc::new(Semaphore::new(names.len())),
                    free: Mutex::new(names.iter().cloned().collect()),
                    members: names,
                };
                (base, Arc::new(q))
            })
            .collect();
        Self { queues }
    }

    pub fn bases(&self) -> Vec<String> {
        self.queues.keys().cloned().collect()
    }

    pub fn all_clones(&self) -> Vec<String> {
        self.queues
            .values()
            .flat_map(|q| q.members.iter().cloned())
            .collect()
    }

    /// Waits up to `wait` for a free clone of `base`.
    pub async fn borrow(&self, base: &str, wait: Duration) -> Result<CloneLease, HarnessError> {
        let unavailable = || HarnessError::CloneUnavailable {
            base: base.to_string(),
            waited: wait,
        };
        let queue = self.queues.get(base).ok_or_else(unavailable)?.clone();

        let permit = match tokio::time::timeout(wait, queue.available.clone().acquire_owned()).await {
            Ok(Ok(p)) => p,
            _ => return Err(unavailable()),
        };
        let name = queue
            .free
            .lock()
            .ok()
            .and_then(|mut f| f.pop_front())
            .ok_or_else(unavailable)?;
        tracing::debug!(event = "clone_borrowed", base, clone = %name);
        Ok(CloneLease {
            name: Some(name),
            queue,
            _permit: permit,
        })
    }

    /// Drops every clone. Failures are logged so the rest still go.
    pub async fn teardown(&self, restorer: &dyn DatabaseRestorer) -> usize {
        let mut dropped = 0;
        for q in self.queues.values() {
            q.available.close();
        }
        for name in self.all_clones() {
            match restorer.drop_database(&name).await {
                Ok(()) => dropped += 1,
                Err(e) => tracing::warn!(event = "clone_drop_failed", clone = %name, error = %e),
            }
        }
        tracing::info!(event = "clones_torn_down", dropped);
        dropped
    }
}

/// Drops any `_process_` database left on the server, e.g. after a crash.
pub async fn sweep_orphans(restorer: &dyn DatabaseRestorer) -> Result<Vec<String>, HarnessError> {
    let mut dropped = Vec::new();
    for db in restorer.list_databases().await? {
        if !is_clone(&db) {
            continue;
        }
        match restorer.drop_database(&db).await {
            Ok(()) => dropped.push(db),
            Err(e) => tracing::warn!(event = "orphan_drop_failed", db = %db, error = %e),
        }
    }
    Ok(dropped)
}
