//! Catalog job runner.
//!
//! Every trigger binding funnels into [`CatalogJobRunner::fire`]. A run
//! starts only if the job's lock in the control store can be taken; a
//! trigger arriving while a run holds it is skipped, not queued. The lock
//! TTL covers the job timeout, and the run itself is cut off at the
//! timeout, so a crashed runner blocks the job for one timeout at most.
//!
//! Control-store layout per job:
//!
//! ```text
//! jobs/{job}/lock.json               run lock
//! jobs/{job}/runs/{run_id}.json      run records
//! jobs/{job}/triggers/{binding}.json armed flag and last tick
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::Instrument;

use strata_core::arn::ArnScope;
use strata_core::audit::{emit_with, AuditAction, AuditEvent};
use strata_core::error::Error as CoreError;
use strata_core::guarded::Authorizer;
use strata_core::id::JobRunId;
use strata_core::lock::{Acquisition, DistributedLock, LockGuard};
use strata_core::observability::catalog_span;
use strata_core::policy::actions;
use strata_core::storage::{read_json, write_json, StorageBackend, WritePrecondition, WriteResult};

use crate::builder::{BuildSummary, CatalogWork};
use crate::error::{Error, Result};
use crate::job::{CatalogJobDefinition, TriggerBinding, TriggerKind, TriggerSpec};
use crate::metrics::CatalogMetrics;

/// Prefix of all job state in the control store.
pub const JOBS_PREFIX: &str = "jobs/";

/// Extra lock lifetime beyond the job timeout.
const LOCK_GRACE: Duration = Duration::from_secs(60);

/// Status of a catalog run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunStatus {
    /// The run holds the job lock and is executing.
    Running,
    /// The catalog was published.
    Succeeded {
        /// What the build produced.
        summary: BuildSummary,
    },
    /// The run stopped at its first error; the catalog is unchanged.
    Failed {
        /// Error text.
        reason: String,
    },
    /// The run exceeded the job timeout and was cut off.
    TimedOut,
}

impl RunStatus {
    /// Short label for logs and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Succeeded { .. } => "succeeded",
            Self::Failed { .. } => "failed",
            Self::TimedOut => "timed_out",
        }
    }

    /// Returns true once the run can no longer change.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Durable record of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogJobRun {
    /// Run identifier.
    pub run_id: JobRunId,
    /// Job name.
    pub job: String,
    /// How the run was started.
    pub trigger: TriggerKind,
    /// Binding that started it.
    pub binding: String,
    /// Fencing token of the lock acquisition.
    pub fencing_token: u64,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// End time, once terminal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Current status.
    pub status: RunStatus,
}

/// Handle to a started run.
#[derive(Debug)]
pub struct RunHandle {
    run_id: JobRunId,
    task: JoinHandle<CatalogJobRun>,
}

impl RunHandle {
    /// The run's identifier.
    #[must_use]
    pub const fn run_id(&self) -> JobRunId {
        self.run_id
    }

    /// Returns true once the run's task has ended.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the terminal run record.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the run task was aborted.
    pub async fn wait(self) -> Result<CatalogJobRun> {
        self.task.await.map_err(|e| {
            CoreError::internal(format!("catalog run {} aborted: {e}", self.run_id)).into()
        })
    }
}

/// What one trigger arrival did.
#[derive(Debug)]
pub enum TriggerOutcome {
    /// A new run started.
    Started(RunHandle),
    /// A run was already active; this trigger had no effect.
    Skipped {
        /// The active run, when known.
        active_run: Option<JobRunId>,
    },
    /// The binding is disarmed; this trigger had no effect.
    Disarmed,
}

impl TriggerOutcome {
    /// Returns true if a run started.
    #[must_use]
    pub const fn is_started(&self) -> bool {
        matches!(self, Self::Started(_))
    }

    /// Consumes the outcome, returning the run handle if one started.
    #[must_use]
    pub fn into_handle(self) -> Option<RunHandle> {
        match self {
            Self::Started(handle) => Some(handle),
            _ => None,
        }
    }
}

/// Persisted state of one trigger binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerState {
    /// Whether ticks fire runs.
    pub armed: bool,
    /// Last tick acted on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_tick: Option<DateTime<Utc>>,
}

/// What a timer evaluation did for one scheduled binding.
#[derive(Debug)]
pub enum TimerOutcome {
    /// The binding is disarmed.
    Disarmed {
        /// Binding name.
        binding: String,
    },
    /// No tick is due.
    NotDue {
        /// Binding name.
        binding: String,
    },
    /// A tick was due and the job was triggered.
    Fired {
        /// Binding name.
        binding: String,
        /// The tick that fired.
        tick: DateTime<Utc>,
        /// What the trigger did.
        outcome: TriggerOutcome,
    },
}

/// Starts and tracks runs of one catalog job.
#[derive(Clone)]
pub struct CatalogJobRunner {
    job: Arc<CatalogJobDefinition>,
    work: Arc<dyn CatalogWork>,
    control: Arc<dyn StorageBackend>,
    starter: Authorizer,
    job_arn: String,
    metrics: CatalogMetrics,
}

impl std::fmt::Debug for CatalogJobRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogJobRunner")
            .field("job", &self.job.name)
            .field("starter", &self.starter)
            .finish_non_exhaustive()
    }
}

impl CatalogJobRunner {
    /// Creates a runner. `starter` is the identity triggers act as; it
    /// needs `catalog:StartJobRun` on the job.
    ///
    /// # Errors
    ///
    /// Returns an error if the job definition is invalid.
    pub fn new(
        job: CatalogJobDefinition,
        work: Arc<dyn CatalogWork>,
        control: Arc<dyn StorageBackend>,
        starter: Authorizer,
        scope: &ArnScope,
    ) -> Result<Self> {
        job.validate()?;
        Ok(Self {
            job_arn: scope.catalog_job(&job.name),
            job: Arc::new(job),
            work,
            control,
            starter,
            metrics: CatalogMetrics::new(),
        })
    }

    /// The job definition.
    #[must_use]
    pub fn job(&self) -> &CatalogJobDefinition {
        &self.job
    }

    fn job_path(&self, rest: &str) -> String {
        format!("{JOBS_PREFIX}{}/{rest}", self.job.name)
    }

    fn lock(&self) -> DistributedLock {
        DistributedLock::new(Arc::clone(&self.control), self.job_path("lock.json"))
    }

    /// Fires a trigger binding by name.
    ///
    /// # Errors
    ///
    /// Returns `UnknownTrigger`, `AccessDenied` if the starter may not start
    /// the job, or a control-store error.
    pub async fn fire(&self, binding: &str) -> Result<TriggerOutcome> {
        let binding = self.job.trigger(binding)?.clone();
        if binding.kind() == TriggerKind::Scheduled && !self.trigger_state(&binding.name).await?.armed
        {
            tracing::debug!(binding = %binding.name, "disarmed trigger ignored");
            return Ok(TriggerOutcome::Disarmed);
        }
        self.launch(&binding).await
    }

    /// Fires the job's first on-demand binding.
    ///
    /// # Errors
    ///
    /// Returns `UnknownTrigger` if the job has no on-demand binding, or any
    /// error of [`Self::fire`].
    pub async fn run_now(&self) -> Result<TriggerOutcome> {
        let binding = self
            .job
            .triggers
            .iter()
            .find(|t| t.spec == TriggerSpec::OnDemand)
            .ok_or_else(|| Error::UnknownTrigger("on-demand".to_string()))?
            .clone();
        self.launch(&binding).await
    }

    /// Evaluates every scheduled binding at `now` and fires the due ones.
    ///
    /// A tick is consumed before the job is triggered, so a repeated timer
    /// at the same time fires nothing.
    ///
    /// # Errors
    ///
    /// Returns the first control-store or permission error.
    pub async fn on_timer(&self, now: DateTime<Utc>) -> Result<Vec<TimerOutcome>> {
        let mut outcomes = Vec::new();
        for binding in &self.job.triggers {
            let Some(evaluator) = binding.evaluator()? else {
                continue;
            };
            let name = binding.name.clone();
            let path = self.job_path(&format!("triggers/{name}.json"));
            let (state, precondition) = self.load_state(&path, binding).await?;
            if !state.armed {
                outcomes.push(TimerOutcome::Disarmed { binding: name });
                continue;
            }
            let Some(tick) = evaluator.due_tick(state.last_tick, now) else {
                outcomes.push(TimerOutcome::NotDue { binding: name });
                continue;
            };

            let consumed = TriggerState {
                last_tick: Some(tick),
                ..state
            };
            if let WriteResult::PreconditionFailed { .. } =
                write_json(self.control.as_ref(), &path, &consumed, precondition).await?
            {
                tracing::debug!(binding = %name, %tick, "tick consumed by another evaluator");
                outcomes.push(TimerOutcome::NotDue { binding: name });
                continue;
            }

            tracing::info!(binding = %name, %tick, "schedule tick due");
            let outcome = self.launch(binding).await?;
            outcomes.push(TimerOutcome::Fired {
                binding: name,
                tick,
                outcome,
            });
        }
        Ok(outcomes)
    }

    async fn load_state(
        &self,
        path: &str,
        binding: &TriggerBinding,
    ) -> Result<(TriggerState, WritePrecondition)> {
        Ok(
            match read_json::<TriggerState, _>(self.control.as_ref(), path).await? {
                Some((state, version)) => (state, WritePrecondition::MatchesVersion(version)),
                None => (Self::default_state(binding), WritePrecondition::DoesNotExist),
            },
        )
    }

    fn default_state(binding: &TriggerBinding) -> TriggerState {
        TriggerState {
            armed: binding.armed,
            last_tick: None,
        }
    }

    /// Current state of a binding.
    ///
    /// # Errors
    ///
    /// Returns `UnknownTrigger` or a control-store error.
    pub async fn trigger_state(&self, binding: &str) -> Result<TriggerState> {
        let definition = self.job.trigger(binding)?;
        let path = self.job_path(&format!("triggers/{binding}.json"));
        Ok(self.load_state(&path, definition).await?.0)
    }

    /// Arms a scheduled binding.
    ///
    /// # Errors
    ///
    /// Returns `UnknownTrigger`, `InvalidJob` for on-demand bindings, or a
    /// control-store error.
    pub async fn arm(&self, binding: &str) -> Result<()> {
        self.set_armed(binding, true).await
    }

    /// Disarms a scheduled binding. A running run is not affected.
    ///
    /// # Errors
    ///
    /// Returns `UnknownTrigger`, `InvalidJob` for on-demand bindings, or a
    /// control-store error.
    pub async fn disarm(&self, binding: &str) -> Result<()> {
        self.set_armed(binding, false).await
    }

    async fn set_armed(&self, binding: &str, armed: bool) -> Result<()> {
        let definition = self.job.trigger(binding)?;
        if definition.kind() != TriggerKind::Scheduled {
            return Err(Error::invalid_job(format!(
                "on-demand binding '{binding}' cannot be armed or disarmed"
            )));
        }
        let path = self.job_path(&format!("triggers/{binding}.json"));
        loop {
            let (state, precondition) = self.load_state(&path, definition).await?;
            let next = TriggerState { armed, ..state };
            if write_json(self.control.as_ref(), &path, &next, precondition)
                .await?
                .is_success()
            {
                tracing::info!(binding, armed, "trigger binding updated");
                return Ok(());
            }
        }
    }

    /// The run currently holding the job lock, if any.
    ///
    /// # Errors
    ///
    /// Returns a control-store error.
    pub async fn active_run(&self) -> Result<Option<JobRunId>> {
        let info = self.lock().read_lock_info().await?;
        Ok(info
            .filter(|i| !i.is_expired())
            .and_then(|i| i.operation)
            .and_then(|op| op.parse().ok()))
    }

    /// All run records, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a control-store error.
    pub async fn runs(&self) -> Result<Vec<CatalogJobRun>> {
        let prefix = self.job_path("runs/");
        let mut metas = self.control.list(&prefix).await?;
        metas.sort_by(|a, b| a.path.cmp(&b.path));
        let mut runs = Vec::with_capacity(metas.len());
        for meta in metas {
            if let Some((run, _)) =
                read_json::<CatalogJobRun, _>(self.control.as_ref(), &meta.path).await?
            {
                runs.push(run);
            }
        }
        Ok(runs)
    }

    /// Reads one run record.
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` or a control-store error.
    pub async fn get_run(&self, run_id: JobRunId) -> Result<CatalogJobRun> {
        read_json::<CatalogJobRun, _>(self.control.as_ref(), &self.run_path(run_id))
            .await?
            .map(|(run, _)| run)
            .ok_or_else(|| CoreError::resource_not_found("job run", run_id).into())
    }

    fn run_path(&self, run_id: JobRunId) -> String {
        self.job_path(&format!("runs/{run_id}.json"))
    }

    async fn launch(&self, binding: &TriggerBinding) -> Result<TriggerOutcome> {
        self.starter
            .authorize(&actions::CATALOG_START_JOB_RUN, &self.job_arn)
            .await?;

        let kind = binding.kind();
        let run_id = JobRunId::generate();
        let lock = self.lock();
        let guard = match lock
            .try_acquire(self.job.timeout + LOCK_GRACE, Some(run_id.to_string()))
            .await?
        {
            Acquisition::Acquired(guard) => guard,
            Acquisition::Held(info) => {
                let active_run: Option<JobRunId> = info.operation.and_then(|op| op.parse().ok());
                self.metrics.record_trigger(kind.as_str(), "skipped");
                tracing::info!(
                    binding = %binding.name,
                    active_run = ?active_run,
                    "catalog run already active, trigger skipped"
                );
                self.audit(
                    AuditAction::CatalogRunSkipped,
                    active_run.map(|r| r.to_string()),
                    &format!("{}:{}", kind, binding.name),
                )
                .await;
                return Ok(TriggerOutcome::Skipped { active_run });
            }
        };

        let run = CatalogJobRun {
            run_id,
            job: self.job.name.clone(),
            trigger: kind,
            binding: binding.name.clone(),
            fencing_token: guard.fencing_token(),
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Running,
        };
        if let Err(e) = self.save(&run, WritePrecondition::DoesNotExist).await {
            if let Err(release) = guard.release().await {
                tracing::warn!(%run_id, error = %release, "failed to release job lock");
            }
            return Err(e);
        }
        self.metrics.record_trigger(kind.as_str(), "started");
        self.audit(
            AuditAction::CatalogRunStarted,
            Some(run_id.to_string()),
            &format!("{}:{}", kind, binding.name),
        )
        .await;
        tracing::info!(%run_id, binding = %binding.name, trigger = %kind, "catalog run started");

        let runner = self.clone();
        let span = catalog_span("run", &self.job.database);
        let task = tokio::spawn(async move { runner.execute(run, guard).await }.instrument(span));
        Ok(TriggerOutcome::Started(RunHandle { run_id, task }))
    }

    async fn execute(self, mut run: CatalogJobRun, guard: LockGuard) -> CatalogJobRun {
        let started = tokio::time::Instant::now();
        let work = AssertUnwindSafe(self.work.execute()).catch_unwind();
        run.status = match tokio::time::timeout(self.job.timeout, work).await {
            Ok(Ok(Ok(summary))) => RunStatus::Succeeded { summary },
            Ok(Ok(Err(e))) => RunStatus::Failed {
                reason: e.to_string(),
            },
            Ok(Err(_)) => RunStatus::Failed {
                reason: "catalog run panicked".to_string(),
            },
            Err(_) => RunStatus::TimedOut,
        };
        run.finished_at = Some(Utc::now());

        let elapsed = started.elapsed();
        match &run.status {
            RunStatus::Failed { reason } => {
                tracing::warn!(run_id = %run.run_id, reason, "catalog run failed");
            }
            RunStatus::TimedOut => {
                tracing::warn!(run_id = %run.run_id, timeout = ?self.job.timeout, "catalog run timed out");
            }
            _ => tracing::info!(run_id = %run.run_id, ?elapsed, "catalog run succeeded"),
        }

        // The record goes terminal before the lock frees up.
        if let Err(e) = self.save(&run, WritePrecondition::None).await {
            tracing::warn!(run_id = %run.run_id, error = %e, "failed to record run outcome");
        }
        if let Err(e) = guard.release().await {
            tracing::warn!(run_id = %run.run_id, error = %e, "failed to release job lock");
        }
        self.metrics.record_run(run.status.label(), elapsed);
        self.audit(
            AuditAction::CatalogRunFinished,
            Some(run.run_id.to_string()),
            run.status.label(),
        )
        .await;
        run
    }

    async fn save(&self, run: &CatalogJobRun, precondition: WritePrecondition) -> Result<()> {
        let path = self.run_path(run.run_id);
        match write_json(self.control.as_ref(), &path, run, precondition).await? {
            WriteResult::Success { .. } => Ok(()),
            WriteResult::PreconditionFailed { .. } => Err(CoreError::PreconditionFailed {
                message: format!("run record {path} already exists"),
            }
            .into()),
        }
    }

    async fn audit(&self, action: AuditAction, correlation: Option<String>, reason: &str) {
        let sink = self.starter.audit();
        let mut builder = AuditEvent::builder()
            .action(action)
            .actor(self.starter.identity().actor())
            .resource(self.job_arn.clone())
            .decision_reason(reason);
        if let Some(id) = correlation {
            builder = builder.correlation_id(id);
        }
        emit_with(sink.as_ref(), builder).await;
    }
}
