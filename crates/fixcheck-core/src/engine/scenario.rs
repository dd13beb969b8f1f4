use crate::config::EfficiencyBinding;
use crate::errors::HarnessError;
use crate::executor::{BatchKind, BatchOutcome};
use crate::model::{BenchmarkInstance, Dialect, ErrorPhaseOutcome, EvalMode, InstanceOutcome};
use crate::testcase::{TestCaseInput, TestCaseSummary};
use async_trait::async_trait;

/// The operations a scenario needs from the outside world. The live
/// implementation talks to a database server; tests script it.
#[async_trait]
pub trait ScenarioBackend: Send + Sync {
    type Session: Send;

    async fn reset(&self, db: &str) -> Result<(), HarnessError>;

    async fn open_session(&self, db: &str) -> Result<Self::Session, HarnessError>;

    async fn execute(
        &self,
        session: &mut Self::Session,
        db: &str,
        statements: &[String],
        kind: BatchKind,
    ) -> BatchOutcome;

    async fn run_test_cases(
        &self,
        session: &mut Self::Session,
        cases: &[String],
        input: &TestCaseInput,
    ) -> TestCaseSummary;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioState {
    Idle,
    ResetForError,
    Preprocessing,
    ErrorPhase,
    ErrorPhaseEvaluated,
    ResetForSolution,
    PreprocessingForSolution,
    SolutionPhase,
    SolutionPhaseEvaluated,
    Cleanup,
    Done,
}

/// How to run one instance: where, in which mode, and which statements the
/// test cases get to compare.
#[derive(Debug, Clone, Copy)]
pub struct ScenarioPlan<'a> {
    /// Physical database: a borrowed clone, or the logical database itself.
    pub db: &'a str,
    pub dialect: Dialect,
    pub mode: EvalMode,
    pub efficiency_binding: EfficiencyBinding,
    pub instance: &'a BenchmarkInstance,
}

impl ScenarioPlan<'_> {
    fn test_input(&self, pred: &[String], sol: &[String]) -> TestCaseInput {
        TestCaseInput {
            dialect: self.dialect,
            db_name: self.db.to_string(),
            pred_sqls: pred.to_vec(),
            sol_sqls: sol.to_vec(),
            result: None,
        }
    }

    /// `(pred_sqls, sol_sqls)` handed to solution-phase test cases.
    pub fn solution_bindings(&self) -> (&[String], &[String]) {
        let inst = self.instance;
        let candidate = inst.candidate_statements(self.mode);
        if !inst.efficiency {
            return (candidate, inst.reference_statements());
        }
        match self.efficiency_binding {
            EfficiencyBinding::ErrorVsCandidate => (inst.error_statements(), candidate),
            EfficiencyBinding::CandidateVsReference => (candidate, inst.reference_statements()),
        }
    }
}

enum StepError {
    /// Stops the whole run.
    Fatal(HarnessError),
    /// Ends this instance with an infrastructure error.
    Instance(HarnessError),
}

fn no_session() -> StepError {
    StepError::Instance(HarnessError::Io(std::io::Error::other(
        "phase started without an open session",
    )))
}

/// Drives one instance through reset, error phase, reset, solution phase and
/// cleanup.
pub struct Scenario<'a, B: ScenarioBackend> {
    backend: &'a B,
    plan: ScenarioPlan<'a>,
    state: ScenarioState,
    session: Option<B::Session>,
    outcome: InstanceOutcome,
    trail: Vec<ScenarioState>,
}

impl<'a, B: ScenarioBackend> Scenario<'a, B> {
    pub fn new(backend: &'a B, plan: ScenarioPlan<'a>, outcome: InstanceOutcome) -> Self {
        Self {
            backend,
            plan,
            state: ScenarioState::Idle,
            session: None,
            outcome,
            trail: Vec::new(),
        }
    }

    /// Runs to `Done`. Only reset failures come back as errors.
    pub async fn run(mut self) -> Result<(InstanceOutcome, Vec<ScenarioState>), HarnessError> {
        while self.state != ScenarioState::Done {
            self.trail.push(self.state);
            let from = self.state;
            let next = match self.step().await {
                Ok(next) => next,
                Err(StepError::Fatal(e)) => {
                    self.session = None;
                    return Err(e);
                }
                Err(StepError::Instance(e)) => {
                    tracing::warn!(
                        event = "scenario_aborted",
                        db = self.plan.db,
                        state = ?from,
                        error = %e
                    );
                    self.session = None;
                    self.outcome = self.outcome.with_infra_error(e.to_string());
                    if from == ScenarioState::Cleanup {
                        ScenarioState::Done
                    } else {
                        ScenarioState::Cleanup
                    }
                }
            };
            tracing::debug!(event = "scenario_transition", db = self.plan.db, from = ?from, to = ?next);
            self.state = next;
        }
        self.trail.push(ScenarioState::Done);
        Ok((self.outcome, self.trail))
    }

    async fn step(&mut self) -> Result<ScenarioState, StepError> {
        use ScenarioState::*;
        let inst = self.plan.instance;
        Ok(match self.state {
            Idle => ResetForError,
            ResetForError => {
                self.reset().await?;
                Preprocessing
            }
            Preprocessing => {
                self.open_and_preprocess().await?;
                ErrorPhase
            }
            ErrorPhase => {
                self.error_phase().await?;
                ErrorPhaseEvaluated
            }
            ErrorPhaseEvaluated => {
                self.session = None;
                tracing::info!(
                    event = "error_phase_evaluated",
                    db = self.plan.db,
                    outcome = ?self.outcome.error_phase
                );
                ResetForSolution
            }
            ResetForSolution => {
                self.reset().await?;
                PreprocessingForSolution
            }
            PreprocessingForSolution => {
                self.open_and_preprocess().await?;
                SolutionPhase
            }
            SolutionPhase => {
                self.solution_phase().await?;
                SolutionPhaseEvaluated
            }
            SolutionPhaseEvaluated => {
                self.session = None;
                Cleanup
            }
            Cleanup => {
                if !inst.clean_up_sql.is_empty() {
                    let mut session = self.open().await?;
                    self.backend
                        .execute(&mut session, self.plan.db, inst.clean_up_sql.statements(), BatchKind::Lenient)
                        .await;
                }
                Done
            }
            Done => Done,
        })
    }

    async fn reset(&mut self) -> Result<(), StepError> {
        self.backend
            .reset(self.plan.db)
            .await
            .map_err(StepError::Fatal)
    }

    async fn open(&mut self) -> Result<B::Session, StepError> {
        self.backend
            .open_session(self.plan.db)
            .await
            .map_err(|e| {
                if e.is_fatal() {
                    StepError::Fatal(e)
                } else {
                    StepError::Instance(e)
                }
            })
    }

    async fn open_and_preprocess(&mut self) -> Result<(), StepError> {
        let mut session = self.open().await?;
        let pre = self.plan.instance.preprocess();
        if !pre.is_empty() {
            self.backend
                .execute(&mut session, self.plan.db, pre, BatchKind::Lenient)
                .await;
        }
        self.session = Some(session);
        Ok(())
    }

    async fn error_phase(&mut self) -> Result<(), StepError> {
        let plan = self.plan;
        let inst = plan.instance;
        let backend = self.backend;
        let session = self.session.as_mut().ok_or_else(no_session)?;

        let batch = backend
            .execute(session, plan.db, inst.error_statements(), BatchKind::Critical)
            .await;
        self.outcome.truncated |= batch.truncated;

        let phase = if batch.failed() {
            ErrorPhaseOutcome::Reproduced {
                message: batch.error_message().unwrap_or_default(),
            }
        } else if inst.efficiency || inst.test_cases.is_empty() {
            ErrorPhaseOutcome::Inconclusive
        } else {
            let mut input = plan.test_input(inst.error_statements(), inst.reference_statements());
            input.result = batch.result;
            let summary = backend
                .run_test_cases(session, &inst.test_cases, &input)
                .await;
            if summary.all_passed() {
                tracing::warn!(event = "error_phase_unexpected_pass", db = plan.db);
                ErrorPhaseOutcome::UnexpectedPass
            } else {
                ErrorPhaseOutcome::FailedAsExpected {
                    failed_tests: summary.failed,
                }
            }
        };
        self.outcome.error_phase = phase;
        Ok(())
    }

    async fn solution_phase(&mut self) -> Result<(), StepError> {
        let plan = self.plan;
        let inst = plan.instance;
        let backend = self.backend;
        let session = self.session.as_mut().ok_or_else(no_session)?;

        let batch = backend
            .execute(session, plan.db, inst.candidate_statements(plan.mode), BatchKind::Critical)
            .await;
        self.outcome.truncated |= batch.truncated;

        if batch.failed() {
            self.outcome.execution_error = batch.execution_error;
            self.outcome.timeout_error = batch.timeout_error;
            self.outcome.solution_error = batch.error_message();
            return Ok(());
        }
        if inst.test_cases.is_empty() {
            return Ok(());
        }

        let (pred, sol) = plan.solution_bindings();
        let mut input = plan.test_input(pred, sol);
        input.result = batch.result;
        let summary = backend
            .run_test_cases(session, &inst.test_cases, &input)
            .await;

        self.outcome.passed_test_cases = summary.passed;
        if !summary.failed.is_empty() {
            self.outcome.assertion_error = true;
            self.outcome.solution_error = summary.messages.first().cloned();
            self.outcome.failed_test_cases = summary.failed;
        }
        Ok(())
    }
}

/// Convenience wrapper returning just the outcome.
pub async fn run_scenario<B: ScenarioBackend>(
    backend: &B,
    plan: ScenarioPlan<'_>,
    outcome: InstanceOutcome,
) -> Result<InstanceOutcome, HarnessError> {
    Scenario::new(backend, plan, outcome)
        .run()
        .await
        .map(|(outcome, _)| outcome)
}
