//! The Query Gateway: runs ad-hoc SQL in a workgroup under the caller's
//! permissions and writes results only to the workgroup's results area.
//!
//! Submission validates synchronously and returns an ID; execution happens
//! on a spawned task that waits for a workgroup slot. Stopping a query
//! aborts its task, which releases the slot.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::AbortHandle;
use tracing::Instrument;

use strata_catalog::CatalogService;
use strata_core::arn::ArnScope;
use strata_core::config::PipelineConfig;
use strata_core::guarded::{Authorizer, GuardedStore};
use strata_core::id::QueryExecutionId;
use strata_core::observability::query_span;
use strata_core::policy::actions;
use strata_core::storage::{StorageBackend, WritePrecondition};
use strata_core::Error as CoreError;

use crate::engine;
use crate::error::{Error, Result};
use crate::execution::{QueryExecution, QueryState};
use crate::metrics::QueryMetrics;
use crate::workgroup::Workgroup;

/// Resource limits applied to every query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayLimits {
    /// Queries running at once per workgroup.
    pub concurrency: usize,
    /// Upper bound on one query, from slot acquisition to stored results.
    pub timeout: Duration,
    /// Rows kept per result.
    pub max_rows: usize,
    /// Finished executions remembered; older ones are forgotten first.
    pub retained_executions: usize,
}

impl From<&PipelineConfig> for GatewayLimits {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            concurrency: config.query_concurrency,
            timeout: config.query_timeout,
            max_rows: config.max_query_rows,
            retained_executions: config.query_history_limit,
        }
    }
}

/// A query submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartQueryRequest {
    /// SQL text; a single `SELECT` or CTE.
    pub sql: String,
    /// Workgroup to run in.
    pub workgroup: String,
    /// Database unqualified table names resolve in.
    pub database: String,
    /// Client-side results location. Must be absent or equal to the
    /// workgroup's enforced location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_location: Option<String>,
}

impl StartQueryRequest {
    /// A request that relies on the workgroup's results location.
    #[must_use]
    pub fn new(
        sql: impl Into<String>,
        workgroup: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            sql: sql.into(),
            workgroup: workgroup.into(),
            database: database.into(),
            output_location: None,
        }
    }

    /// Sets a client-side results location.
    #[must_use]
    pub fn with_output_location(mut self, location: impl Into<String>) -> Self {
        self.output_location = Some(location.into());
        self
    }
}

/// Rows of a succeeded query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResults {
    /// The query.
    pub query_id: QueryExecutionId,
    /// Where the artifact lives.
    pub output_location: String,
    /// One JSON object per row.
    pub rows: Vec<serde_json::Map<String, serde_json::Value>>,
}

struct Slot {
    workgroup: Workgroup,
    permits: Arc<Semaphore>,
}

struct Tracked {
    execution: QueryExecution,
    owner_arn: String,
    task: Option<AbortHandle>,
    state_tx: watch::Sender<QueryState>,
}

struct Inner {
    scope: ArnScope,
    slots: BTreeMap<String, Slot>,
    catalog: CatalogService,
    output_bucket: String,
    output: Arc<dyn StorageBackend>,
    results: Arc<dyn StorageBackend>,
    limits: GatewayLimits,
    executions: Mutex<HashMap<QueryExecutionId, Tracked>>,
    metrics: QueryMetrics,
}

/// Query execution front door.
#[derive(Clone)]
pub struct QueryGateway {
    inner: Arc<Inner>,
}

impl fmt::Debug for QueryGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryGateway")
            .field("workgroups", &self.inner.slots.keys().collect::<Vec<_>>())
            .field("output_bucket", &self.inner.output_bucket)
            .field("limits", &self.inner.limits)
            .finish_non_exhaustive()
    }
}

/// Stores the gateway reads from and writes to.
pub struct GatewayStores {
    /// Catalog the gateway resolves tables in. Its authorizer is replaced
    /// by the caller's for every query.
    pub catalog: CatalogService,
    /// Output zone bucket name.
    pub output_bucket: String,
    /// Output zone backend.
    pub output: Arc<dyn StorageBackend>,
    /// Results backend shared by all workgroups.
    pub results: Arc<dyn StorageBackend>,
}

impl QueryGateway {
    /// Creates a gateway serving `workgroups`.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for duplicate workgroup names or a zero
    /// concurrency limit.
    pub fn new(
        scope: ArnScope,
        workgroups: impl IntoIterator<Item = Workgroup>,
        stores: GatewayStores,
        limits: GatewayLimits,
    ) -> Result<Self> {
        if limits.concurrency == 0 {
            return Err(CoreError::configuration("query concurrency must be at least 1").into());
        }
        let mut slots = BTreeMap::new();
        for workgroup in workgroups {
            let name = workgroup.name.clone();
            let slot = Slot {
                workgroup,
                permits: Arc::new(Semaphore::new(limits.concurrency)),
            };
            if slots.insert(name.clone(), slot).is_some() {
                return Err(CoreError::configuration(format!("duplicate workgroup {name}")).into());
            }
        }
        Ok(Self {
            inner: Arc::new(Inner {
                scope,
                slots,
                catalog: stores.catalog,
                output_bucket: stores.output_bucket,
                output: stores.output,
                results: stores.results,
                limits,
                executions: Mutex::new(HashMap::new()),
                metrics: QueryMetrics::new(),
            }),
        })
    }

    /// Lists workgroup names.
    ///
    /// # Errors
    ///
    /// Returns `AccessDenied` without `query:ListWorkGroups`.
    pub async fn list_work_groups(&self, caller: &Authorizer) -> Result<Vec<String>> {
        caller
            .authorize(&actions::QUERY_LIST_WORK_GROUPS, &self.inner.scope.query_workgroup("*"))
            .await?;
        Ok(self.inner.slots.keys().cloned().collect())
    }

    /// Reads a workgroup's configuration.
    ///
    /// # Errors
    ///
    /// Returns `AccessDenied` without `query:GetWorkGroup`, or
    /// `ResourceNotFound`.
    pub async fn get_work_group(&self, caller: &Authorizer, name: &str) -> Result<Workgroup> {
        caller
            .authorize(&actions::QUERY_GET_WORK_GROUP, &self.inner.scope.query_workgroup(name))
            .await?;
        self.inner
            .slots
            .get(name)
            .map(|s| s.workgroup.clone())
            .ok_or_else(|| CoreError::resource_not_found("workgroup", name).into())
    }

    /// Submits a query.
    ///
    /// Everything that can be checked up front is checked here and returned
    /// as an error; engine failures show up later as a `Failed` state.
    ///
    /// # Errors
    ///
    /// `AccessDenied` without `query:StartQueryExecution` on the workgroup,
    /// `ResourceNotFound` for an unknown workgroup, the workgroup's
    /// admission errors, or `InvalidQuery`.
    pub async fn start_query_execution(
        &self,
        caller: &Authorizer,
        request: StartQueryRequest,
    ) -> Result<QueryExecutionId> {
        let inner = &self.inner;
        caller
            .authorize(
                &actions::QUERY_START_QUERY_EXECUTION,
                &inner.scope.query_workgroup(&request.workgroup),
            )
            .await?;
        let slot = inner
            .slots
            .get(&request.workgroup)
            .ok_or_else(|| CoreError::resource_not_found("workgroup", &request.workgroup))?;
        if let Err(e) = slot.workgroup.admit(request.output_location.as_deref()) {
            tracing::warn!(workgroup = %request.workgroup, error = %e, "query rejected");
            return Err(e);
        }
        engine::validate_query(&request.sql)?;

        let query_id = QueryExecutionId::generate();
        let consumer = caller.identity().name().to_string();
        let results_key = format!(
            "{}{query_id}.json",
            slot.workgroup.results.consumer_prefix(&consumer)
        );
        let execution = QueryExecution {
            query_id,
            sql: request.sql,
            workgroup: request.workgroup,
            database: request.database,
            owner: caller.identity().actor(),
            state: QueryState::Submitted,
            submitted_at: Utc::now(),
            started_at: None,
            completed_at: None,
            output_location: format!("s3://{}/{results_key}", slot.workgroup.results.bucket),
            rows: None,
        };
        let (state_tx, _) = watch::channel(QueryState::Submitted);

        let job = QueryJob {
            inner: Arc::clone(inner),
            caller: caller.clone(),
            permits: Arc::clone(&slot.permits),
            results_bucket: slot.workgroup.results.bucket.clone(),
            results_key,
            execution: execution.clone(),
        };
        let workgroup = execution.workgroup.clone();
        let span = query_span("execute", &workgroup, &query_id.to_string());

        // Register before spawning so the task always finds its entry.
        let mut executions = inner.lock_executions();
        executions.insert(
            query_id,
            Tracked {
                execution,
                owner_arn: caller.identity().arn().to_string(),
                task: None,
                state_tx,
            },
        );
        let handle = tokio::spawn(job.run().instrument(span));
        if let Some(tracked) = executions.get_mut(&query_id) {
            tracked.task = Some(handle.abort_handle());
        }
        evict_finished(&mut executions, inner.limits.retained_executions);
        drop(executions);

        inner.metrics.record_state(&workgroup, "submitted");
        tracing::info!(%query_id, consumer, "query submitted");
        Ok(query_id)
    }

    /// Reads a query's current record.
    ///
    /// # Errors
    ///
    /// `ResourceNotFound` if the query does not exist or belongs to another
    /// principal; `AccessDenied` without `query:GetQueryExecution`.
    pub async fn get_query_execution(
        &self,
        caller: &Authorizer,
        query_id: QueryExecutionId,
    ) -> Result<QueryExecution> {
        let execution = self.owned(caller, query_id)?;
        caller
            .authorize(
                &actions::QUERY_GET_QUERY_EXECUTION,
                &self.inner.scope.query_workgroup(&execution.workgroup),
            )
            .await?;
        Ok(execution)
    }

    /// Reads the rows of a succeeded query from its results artifact.
    ///
    /// The artifact is read through the caller's own permissions.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless the query succeeded, plus the errors of
    /// [`Self::get_query_execution`] and of the results read.
    pub async fn get_query_results(
        &self,
        caller: &Authorizer,
        query_id: QueryExecutionId,
    ) -> Result<QueryResults> {
        let execution = self.owned(caller, query_id)?;
        caller
            .authorize(
                &actions::QUERY_GET_QUERY_RESULTS,
                &self.inner.scope.query_workgroup(&execution.workgroup),
            )
            .await?;
        if execution.state != QueryState::Succeeded {
            return Err(Error::InvalidState {
                query_id,
                state: execution.state,
            });
        }
        let (bucket, key) = split_location(&execution.output_location)?;
        let results = GuardedStore::new(bucket, Arc::clone(&self.inner.results), caller.clone());
        let body = results.get(key).await?;
        let rows = serde_json::from_slice(&body).map_err(CoreError::from)?;
        Ok(QueryResults {
            query_id,
            output_location: execution.output_location,
            rows,
        })
    }

    /// Stops a query and releases its workgroup slot.
    ///
    /// Stopping a query that already finished changes nothing.
    ///
    /// # Errors
    ///
    /// The errors of [`Self::get_query_execution`], or `AccessDenied`
    /// without `query:StopQueryExecution`.
    pub async fn stop_query_execution(
        &self,
        caller: &Authorizer,
        query_id: QueryExecutionId,
    ) -> Result<QueryState> {
        let execution = self.owned(caller, query_id)?;
        caller
            .authorize(
                &actions::QUERY_STOP_QUERY_EXECUTION,
                &self.inner.scope.query_workgroup(&execution.workgroup),
            )
            .await?;

        let mut executions = self.inner.lock_executions();
        let Some(tracked) = executions.get_mut(&query_id) else {
            return Err(CoreError::resource_not_found("query", query_id).into());
        };
        if tracked.execution.state.is_terminal() {
            return Ok(tracked.execution.state.clone());
        }
        if let Some(task) = tracked.task.take() {
            task.abort();
        }
        tracked.execution.transition(QueryState::Cancelled);
        tracked.state_tx.send_replace(QueryState::Cancelled);
        let workgroup = tracked.execution.workgroup.clone();
        drop(executions);

        self.inner.metrics.record_state(&workgroup, "cancelled");
        tracing::info!(%query_id, "query cancelled");
        Ok(QueryState::Cancelled)
    }

    /// Waits until a query reaches a terminal state and returns its record.
    ///
    /// # Errors
    ///
    /// The errors of [`Self::get_query_execution`].
    pub async fn wait(&self, caller: &Authorizer, query_id: QueryExecutionId) -> Result<QueryExecution> {
        self.owned(caller, query_id)?;
        let mut rx = {
            let executions = self.inner.lock_executions();
            executions
                .get(&query_id)
                .map(|t| t.state_tx.subscribe())
                .ok_or_else(|| CoreError::resource_not_found("query", query_id))?
        };
        // The sender is dropped only when the finished execution is evicted.
        let _ = rx.wait_for(QueryState::is_terminal).await;
        self.get_query_execution(caller, query_id).await
    }

    /// Free slots in a workgroup.
    #[must_use]
    pub fn available_slots(&self, workgroup: &str) -> Option<usize> {
        self.inner
            .slots
            .get(workgroup)
            .map(|s| s.permits.available_permits())
    }

    fn owned(&self, caller: &Authorizer, query_id: QueryExecutionId) -> Result<QueryExecution> {
        let executions = self.inner.lock_executions();
        executions
            .get(&query_id)
            .filter(|t| t.owner_arn == caller.identity().arn())
            .map(|t| t.execution.clone())
            .ok_or_else(|| CoreError::resource_not_found("query", query_id).into())
    }
}

/// Forgets the oldest finished executions beyond `keep`. Executions still
/// queued or running are never forgotten.
fn evict_finished(executions: &mut HashMap<QueryExecutionId, Tracked>, keep: usize) {
    let mut finished: Vec<_> = executions
        .iter()
        .filter(|(_, tracked)| tracked.execution.state.is_terminal())
        .map(|(id, tracked)| (tracked.execution.completed_at, *id))
        .collect();
    let Some(excess) = finished.len().checked_sub(keep).filter(|n| *n > 0) else {
        return;
    };
    finished.sort_unstable_by_key(|(completed_at, _)| *completed_at);
    for (_, id) in finished.into_iter().take(excess) {
        executions.remove(&id);
    }
    tracing::debug!(evicted = excess, "forgot finished query executions");
}

fn split_location(uri: &str) -> Result<(&str, &str)> {
    uri.strip_prefix("s3://")
        .and_then(|rest| rest.split_once('/'))
        .ok_or_else(|| CoreError::internal(format!("malformed output location {uri}")).into())
}

impl Inner {
    fn lock_executions(&self) -> MutexGuard<'_, HashMap<QueryExecutionId, Tracked>> {
        self.executions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies a transition if it is still legal. Returns false when the
    /// query was cancelled in the meantime.
    fn advance(&self, query_id: QueryExecutionId, next: QueryState, rows: Option<usize>) -> bool {
        let mut executions = self.lock_executions();
        let Some(tracked) = executions.get_mut(&query_id) else {
            return false;
        };
        if !tracked.execution.transition(next.clone()) {
            return false;
        }
        if rows.is_some() {
            tracked.execution.rows = rows;
        }
        if next.is_terminal() {
            tracked.task = None;
        }
        tracked.state_tx.send_replace(next);
        true
    }
}

/// Slot held by a running query. Dropping it, including when the task is
/// aborted, frees the slot.
struct SlotGuard {
    _permit: OwnedSemaphorePermit,
    workgroup: String,
    metrics: QueryMetrics,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.metrics.slot_released(&self.workgroup);
    }
}

struct QueryJob {
    inner: Arc<Inner>,
    caller: Authorizer,
    permits: Arc<Semaphore>,
    results_bucket: String,
    results_key: String,
    execution: QueryExecution,
}

impl QueryJob {
    async fn run(self) {
        let query_id = self.execution.query_id;
        let workgroup = self.execution.workgroup.clone();
        let metrics = self.inner.metrics;

        let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
            self.inner.advance(
                query_id,
                QueryState::Failed {
                    reason: "workgroup is shutting down".to_string(),
                },
                None,
            );
            return;
        };
        metrics.slot_acquired(&workgroup);
        let _slot = SlotGuard {
            _permit: permit,
            workgroup: workgroup.clone(),
            metrics,
        };
        if !self.inner.advance(query_id, QueryState::Running, None) {
            return;
        }
        metrics.record_state(&workgroup, "running");
        tracing::debug!(%query_id, "query running");

        let started = tokio::time::Instant::now();
        let outcome = match tokio::time::timeout(self.inner.limits.timeout, self.execute()).await {
            Ok(result) => result,
            Err(_) => Err(Error::TimedOut {
                after: self.inner.limits.timeout,
            }),
        };
        let (state, rows) = match outcome {
            Ok(rows) => {
                tracing::info!(%query_id, rows, "query succeeded");
                (QueryState::Succeeded, Some(rows))
            }
            Err(e) => {
                tracing::warn!(%query_id, error = %e, "query failed");
                (
                    QueryState::Failed {
                        reason: e.to_string(),
                    },
                    None,
                )
            }
        };
        let label = state.label();
        if self.inner.advance(query_id, state, rows) {
            metrics.record_state(&workgroup, label);
            metrics.record_duration(&workgroup, label, started.elapsed());
        }
    }

    async fn execute(&self) -> Result<usize> {
        let inner = &self.inner;
        let output = GuardedStore::new(
            inner.output_bucket.clone(),
            Arc::clone(&inner.output),
            self.caller.clone(),
        );
        let catalog = inner.catalog.with_authorizer(self.caller.clone());
        let session = engine::session_for(&catalog, &output, &self.execution.database).await?;
        let batches = engine::run_sql(&session, &self.execution.sql, inner.limits.max_rows).await?;
        let rows = batches.iter().map(arrow::record_batch::RecordBatch::num_rows).sum();
        let body = engine::batches_to_json(&batches)?;

        let results = GuardedStore::new(
            self.results_bucket.clone(),
            Arc::clone(&inner.results),
            self.caller.clone(),
        );
        let written = results
            .put(&self.results_key, Bytes::from(body), WritePrecondition::DoesNotExist)
            .await?;
        if !written.is_success() {
            return Err(CoreError::PreconditionFailed {
                message: format!("results artifact {} already exists", self.results_key),
            }
            .into());
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_follow_configuration() {
        let config = PipelineConfig::default();
        let limits = GatewayLimits::from(&config);
        assert_eq!(limits.concurrency, 8);
        assert_eq!(limits.timeout, Duration::from_secs(600));
        assert_eq!(limits.max_rows, 10_000);
        assert_eq!(limits.retained_executions, 1_000);
    }

    #[test]
    fn output_locations_split_into_bucket_and_key() {
        assert_eq!(
            split_location("s3://results/alice/q.json").expect("split"),
            ("results", "alice/q.json")
        );
        assert!(split_location("results/alice").is_err());
    }

    #[test]
    fn requests_serialize_without_an_unset_location() {
        let json = serde_json::to_value(StartQueryRequest::new("SELECT 1", "wg", "db")).expect("json");
        assert_eq!(json["workgroup"], "wg");
        assert!(json.get("outputLocation").is_none());
    }
}
