use super::scenario::{run_scenario, ScenarioBackend, ScenarioPlan};
use crate::config::EfficiencyBinding;
use crate::coordinator::EphemeralCoordinator;
use crate::errors::HarnessError;
use crate::model::{Dialect, EvalMode, InstanceOutcome, InstanceRecord};
use crate::report::{ReportAccumulator, RunArtifacts};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::AbortHandle;
use tracing::Instrument;

/// Aborts the spawned instance tasks when the suite future is dropped
/// before they finish, so nothing keeps using a clone that is being torn down.
struct AbortOnDrop(Vec<AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for h in &self.0 {
            h.abort();
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunPolicy {
    pub dialect: Dialect,
    pub mode: EvalMode,
    pub workers: usize,
    pub borrow_timeout: Duration,
    pub efficiency_binding: EfficiencyBinding,
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self {
            dialect: Dialect::Postgresql,
            mode: EvalMode::Pred,
            workers: 4,
            borrow_timeout: Duration::from_secs(60),
            efficiency_binding: EfficiencyBinding::ErrorVsCandidate,
        }
    }
}

pub struct Runner<B: ScenarioBackend> {
    pub backend: Arc<B>,
    /// Without clones every instance runs on its logical database, one at a time.
    pub coordinator: Option<Arc<EphemeralCoordinator>>,
    pub policy: RunPolicy,
}

impl<B: ScenarioBackend + 'static> Runner<B> {
    fn workers(&self) -> usize {
        if self.coordinator.is_some() {
            self.policy.workers.max(1)
        } else {
            1
        }
    }

    pub async fn run_suite(&self, records: Vec<InstanceRecord>) -> anyhow::Result<RunArtifacts> {
        let workers = self.workers();
        let sem = Arc::new(Semaphore::new(workers));
        let accumulator = Arc::new(ReportAccumulator::default());
        let halted = Arc::new(AtomicBool::new(false));
        let records: Vec<Arc<InstanceRecord>> = records.into_iter().map(Arc::new).collect();
        tracing::info!(event = "run_started", instances = records.len(), workers);

        let mut handles = Vec::new();
        let mut guard = AbortOnDrop(Vec::new());
        for rec in &records {
            let permit = sem.clone().acquire_owned().await?;
            if halted.load(Ordering::SeqCst) {
                break;
            }
            let this = self.clone_for_task();
            let task_rec = rec.clone();
            let acc = accumulator.clone();
            let halted = halted.clone();
            let h = tokio::spawn(async move {
                let _permit = permit;
                let res = this.evaluate(&task_rec).await;
                match &res {
                    Ok(outcome) => acc.record(outcome),
                    Err(_) => halted.store(true, Ordering::SeqCst),
                }
                res
            });
            guard.0.push(h.abort_handle());
            handles.push((rec.clone(), h));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        let mut fatal: Option<HarnessError> = None;
        for (rec, h) in handles {
            match h.await {
                Ok(Ok(outcome)) => outcomes.push(outcome),
                Ok(Err(e)) => {
                    tracing::error!(event = "run_halted", instance_id = %rec.id(), error = %e);
                    fatal.get_or_insert(e);
                }
                Err(e) => {
                    let outcome =
                        InstanceOutcome::new(&rec).with_infra_error(format!("join error: {e}"));
                    accumulator.record(&outcome);
                    outcomes.push(outcome);
                }
            }
        }
        if let Some(e) = fatal {
            return Err(anyhow::Error::new(e).context("database reset failed; run aborted"));
        }

        outcomes.sort_by_key(|o| o.index);
        let report = accumulator.snapshot();
        tracing::info!(
            event = "run_finished",
            total = report.total,
            passed = report.passed,
            accuracy = report.accuracy()
        );
        Ok(RunArtifacts {
            dialect: self.policy.dialect,
            multi_worker: workers > 1,
            records: records.iter().map(|r| r.as_ref().clone()).collect(),
            outcomes,
            report,
        })
    }

    fn clone_for_task(&self) -> Runner<B> {
        Runner {
            backend: self.backend.clone(),
            coordinator: self.coordinator.clone(),
            policy: self.policy.clone(),
        }
    }

    /// Runs one instance. Only a fatal reset failure is an `Err`.
    pub async fn evaluate(&self, rec: &InstanceRecord) -> Result<InstanceOutcome, HarnessError> {
        let span = tracing::info_span!("instance", instance_id = %rec.id(), index = rec.index);
        async {
            let mut outcome = InstanceOutcome::new(rec);
            let inst = &rec.instance;

            if let Some(e) = &rec.decode_error {
                return Ok(outcome.with_infra_error(format!("invalid instance: {e}")));
            }
            let missing = inst.missing_fields();
            if !missing.is_empty() {
                tracing::warn!(event = "instance_missing_fields", fields = ?missing);
                outcome.missing_fields = missing.into_iter().map(str::to_string).collect();
                return Ok(outcome);
            }
            if let Some(d) = inst.dialect {
                if d != self.policy.dialect {
                    tracing::warn!(
                        event = "dialect_mismatch",
                        instance = %d,
                        run = %self.policy.dialect,
                        "evaluating with the run's dialect"
                    );
                }
            }

            let base = inst.selected_database.clone().unwrap_or_default();
            let lease = match &self.coordinator {
                Some(c) => match c.borrow(&base, self.policy.borrow_timeout).await {
                    Ok(lease) => Some(lease),
                    Err(e) => {
                        tracing::warn!(event = "clone_unavailable", base = %base, error = %e);
                        return Ok(outcome.with_infra_error(e.to_string()));
                    }
                },
                None => None,
            };
            let db = lease
                .as_ref()
                .map(|l| l.name().to_string())
                .unwrap_or(base);

            let plan = ScenarioPlan {
                db: &db,
                dialect: self.policy.dialect,
                mode: self.policy.mode,
                efficiency_binding: self.policy.efficiency_binding,
                instance: inst,
            };
            let res = run_scenario(self.backend.as_ref(), plan, outcome).await;
            drop(lease);

            if let Ok(o) = &res {
                tracing::info!(
                    event = "instance_finished",
                    db = %db,
                    passed = o.passed(),
                    tests_passed = o.passed_test_cases,
                    tests_total = o.total_test_cases
                );
            }
            res
        }
        .instrument(span)
        .await
    }
}
