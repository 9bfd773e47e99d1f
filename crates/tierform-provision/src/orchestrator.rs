//! Orchestrator: dependency-ordered, concurrent apply and destroy.
//!
//! The orchestrator reads the resource graph and issues handler calls:
//!
//! - A resource is dispatched only after every prerequisite reported ready
//!   outputs. Independent resources run concurrently, capped by
//!   `max_parallel`.
//! - `${resource.attribute}` references are substituted at dispatch time
//!   from the ready outputs of dependencies.
//! - Every step is persisted as a `ResourceRecord`. A re-apply skips ready
//!   resources whose resolved descriptor hash is unchanged, updates those
//!   whose hash changed, and resumes records left `Creating`.
//! - A failure or cancellation stops further dispatch, lets in-flight work
//!   settle, and leaves the records in place for the next run.
//! - Destroy deletes recorded resources, each after all of its dependents.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use tierform_core::config::ProvisioningConfig;
use tierform_core::reference::interpolate;
use tierform_core::{
    HandlerError, Readiness, ResolvedResource, ResourceHandler, ResourceKind, ResourceSpec,
};
use tierform_graph::{DependencyGraph, Schedule};
use tierform_state::*;

use crate::error::{ProvisionError, ProvisionResult};
use crate::handlers::HandlerSet;
use crate::retry::{RetryConfig, retry_with_backoff};

/// Ready outputs keyed by resource name.
type Outputs = BTreeMap<String, BTreeMap<String, String>>;

#[derive(Debug, Clone)]
pub struct ProvisionSettings {
    pub max_parallel: usize,
    pub retry: RetryConfig,
    pub poll_interval: Duration,
    pub ready_timeout: Duration,
}

impl Default for ProvisionSettings {
    fn default() -> Self {
        Self::from_config(&ProvisioningConfig::default())
    }
}

impl ProvisionSettings {
    pub fn from_config(config: &ProvisioningConfig) -> Self {
        Self {
            max_parallel: config.max_parallel,
            retry: RetryConfig::from_config(config),
            poll_interval: config.poll_interval(),
            ready_timeout: config.ready_timeout(),
        }
    }
}

/// What happened to one resource during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Change {
    Created,
    Updated,
    /// A record left mid-flight by an earlier run reached ready.
    Resumed,
    Unchanged,
    Deleted,
    /// Nothing to delete: never created, or already gone at the provider.
    AlreadyGone,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimelineEvent {
    Dispatched(String),
    Settled(String, Change),
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub kind: RunKind,
    /// Per-resource results in completion order.
    pub results: Vec<(String, Change)>,
    pub timeline: Vec<TimelineEvent>,
}

impl RunReport {
    pub fn count(&self, change: Change) -> usize {
        self.results.iter().filter(|(_, c)| *c == change).count()
    }

    /// Resources that were actually touched.
    pub fn changed(&self) -> Vec<String> {
        self.results
            .iter()
            .filter(|(_, c)| *c != Change::Unchanged)
            .map(|(n, _)| n.clone())
            .collect()
    }
}

/// What apply would do to one resource, judged from recorded state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    Create,
    Update,
    Resume,
    NoChange,
    /// Depends on outputs not known until its dependencies are applied.
    Deferred,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedStep {
    pub name: String,
    pub kind: ResourceKind,
    pub action: PlanAction,
}

#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    /// Steps grouped into waves that may run concurrently.
    pub waves: Vec<Vec<PlannedStep>>,
    /// Recorded resources no longer declared. Only destroy removes them.
    pub orphans: Vec<String>,
}

#[derive(Debug)]
struct Settled {
    name: String,
    change: Change,
    outputs: BTreeMap<String, String>,
}

#[derive(Debug)]
struct NodeFailure {
    resource: String,
    reason: String,
    cancelled: bool,
}

impl NodeFailure {
    fn failed(resource: &str, reason: impl Into<String>) -> Self {
        Self {
            resource: resource.to_string(),
            reason: reason.into(),
            cancelled: false,
        }
    }

    fn cancelled(resource: &str) -> Self {
        Self {
            resource: resource.to_string(),
            reason: "cancelled".to_string(),
            cancelled: true,
        }
    }
}

enum WaitError {
    /// The provider no longer knows the physical id.
    Gone,
    Failed(String),
    Cancelled,
}

/// Outcome of driving a schedule to completion, failure or cancellation.
#[derive(Debug, Default)]
struct Drive {
    settled: Vec<Settled>,
    timeline: Vec<TimelineEvent>,
    failure: Option<NodeFailure>,
    cancelled: bool,
    pending: Vec<String>,
}

/// Everything a per-resource task needs, shared across tasks.
struct NodeContext {
    handlers: HandlerSet,
    state: StateStore,
    settings: ProvisionSettings,
}

pub struct Orchestrator {
    ctx: Arc<NodeContext>,
}

impl Orchestrator {
    pub fn new(handlers: HandlerSet, state: StateStore, settings: ProvisionSettings) -> Self {
        Self {
            ctx: Arc::new(NodeContext {
                handlers,
                state,
                settings,
            }),
        }
    }

    pub fn state(&self) -> &StateStore {
        &self.ctx.state
    }

    /// Validate the graph without side effects. A rejected graph is
    /// recorded as a rejected run.
    fn build_graph(
        &self,
        specs: Vec<ResourceSpec>,
        run_id: &str,
        kind: RunKind,
        started_at: u64,
    ) -> ProvisionResult<DependencyGraph> {
        match DependencyGraph::build(specs) {
            Ok(graph) => Ok(graph),
            Err(e) => Err(self.reject(e.into(), run_id, kind, started_at)?),
        }
    }

    /// Record a structural rejection and hand the error back.
    fn reject(
        &self,
        err: ProvisionError,
        run_id: &str,
        kind: RunKind,
        started_at: u64,
    ) -> ProvisionResult<ProvisionError> {
        error!(%run_id, error = %err, "resource graph rejected before provisioning");
        self.record_run(
            run_id,
            kind,
            RunOutcome::Rejected {
                reason: err.to_string(),
            },
            started_at,
            Vec::new(),
        )?;
        Ok(err)
    }

    /// Bring every declared resource to ready, in dependency order.
    pub async fn apply(
        &self,
        specs: Vec<ResourceSpec>,
        cancel: watch::Receiver<bool>,
    ) -> ProvisionResult<RunReport> {
        let started_at = epoch_secs();
        let run_id = new_run_id();
        let graph = Arc::new(self.build_graph(specs, &run_id, RunKind::Apply, started_at)?);

        let existing: BTreeMap<String, ResourceRecord> = self
            .ctx
            .state
            .list_resources()?
            .into_iter()
            .map(|r| (r.name.clone(), r))
            .collect();
        for orphan in existing.keys().filter(|n| !graph.contains(n)) {
            warn!(resource = %orphan, "recorded resource is no longer declared; destroy removes it");
        }
        info!(%run_id, resources = graph.len(), "apply started");

        let existing = Arc::new(existing);
        let ctx = self.ctx.clone();
        let task_graph = graph.clone();
        let drive = self
            .drive(Schedule::for_create(&graph), cancel, move |name, outputs, cancel| {
                let ctx = ctx.clone();
                let graph = task_graph.clone();
                let record = existing.get(&name).cloned();
                let inputs: Outputs = graph
                    .dependencies(&name)
                    .into_iter()
                    .filter_map(|d| outputs.get(&d).map(|o| (d, o.clone())))
                    .collect();
                async move { ctx.apply_node(&graph, &name, record, inputs, cancel).await }
            })
            .await;

        let blocked = match &drive.failure {
            Some(failure) => graph
                .blocked_by(&failure.resource)
                .into_iter()
                .filter(|n| drive.pending.contains(n))
                .collect(),
            None => Vec::new(),
        };
        self.conclude(run_id, RunKind::Apply, started_at, drive, blocked)
    }

    /// Delete every recorded resource, each after all of its dependents.
    ///
    /// Ordering comes from the dependency edges recorded at apply time,
    /// not from the current declarations.
    pub async fn destroy(&self, cancel: watch::Receiver<bool>) -> ProvisionResult<RunReport> {
        let started_at = epoch_secs();
        let run_id = new_run_id();
        let records = self.ctx.state.list_resources()?;
        let recorded = records
            .iter()
            .map(|r| (r.name.clone(), r.kind, r.dependencies.clone()));
        let graph = match DependencyGraph::from_recorded(recorded) {
            Ok(graph) => graph,
            Err(e) => return Err(self.reject(e.into(), &run_id, RunKind::Destroy, started_at)?),
        };
        info!(%run_id, resources = records.len(), "destroy started");

        let present = records.iter().map(|r| r.name.clone()).collect();
        let records: Arc<BTreeMap<String, ResourceRecord>> =
            Arc::new(records.into_iter().map(|r| (r.name.clone(), r)).collect());
        let ctx = self.ctx.clone();
        let drive = self
            .drive(
                Schedule::for_delete(&graph, &present),
                cancel,
                move |name, _outputs, cancel| {
                    let ctx = ctx.clone();
                    let record = records.get(&name).cloned();
                    async move {
                        match record {
                            Some(record) => ctx.destroy_node(record, cancel).await,
                            None => Err(NodeFailure::failed(&name, "no record")),
                        }
                    }
                },
            )
            .await;

        // Whatever is still pending cannot be deleted until the failed
        // resource is gone.
        let blocked = drive.pending.clone();
        self.conclude(run_id, RunKind::Destroy, started_at, drive, blocked)
    }

    /// What `apply` would do, from the recorded state alone.
    pub fn plan(&self, specs: Vec<ResourceSpec>) -> ProvisionResult<Plan> {
        let graph = DependencyGraph::build(specs)?;
        let records: BTreeMap<String, ResourceRecord> = self
            .ctx
            .state
            .list_resources()?
            .into_iter()
            .map(|r| (r.name.clone(), r))
            .collect();
        let ready_outputs: Outputs = records
            .values()
            .filter(|r| r.is_ready())
            .map(|r| (r.name.clone(), r.outputs.clone()))
            .collect();

        let waves: Vec<Vec<PlannedStep>> = graph
            .create_waves()
            .into_iter()
            .map(|wave| {
                wave.into_iter()
                    .filter_map(|name| {
                        let spec = graph.spec(&name)?;
                        let action = match records.get(&name) {
                            None => PlanAction::Create,
                            Some(record) if !record.is_ready() => PlanAction::Resume,
                            Some(record) => match resolve(spec, &ready_outputs) {
                                Ok(resolved) if resolved.spec_hash() == record.spec_hash => {
                                    PlanAction::NoChange
                                }
                                Ok(_) => PlanAction::Update,
                                Err(_) => PlanAction::Deferred,
                            },
                        };
                        Some(PlannedStep {
                            name,
                            kind: spec.kind,
                            action,
                        })
                    })
                    .collect::<Vec<_>>()
            })
            .collect();

        let orphans = records
            .keys()
            .filter(|n| !graph.contains(n))
            .cloned()
            .collect();

        Ok(Plan { waves, orphans })
    }

    /// Dispatch ready resources until the schedule is finished, a resource
    /// fails, or cancellation is requested. In-flight tasks always settle
    /// before this returns.
    async fn drive<F, Fut>(
        &self,
        mut schedule: Schedule,
        mut cancel: watch::Receiver<bool>,
        mut launch: F,
    ) -> Drive
    where
        F: FnMut(String, &Outputs, watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = Result<Settled, NodeFailure>> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.ctx.settings.max_parallel.max(1)));
        let mut tasks = JoinSet::new();
        let mut outputs = Outputs::new();
        let mut drive = Drive::default();
        let mut watching = true;

        loop {
            let requested = *cancel.borrow();
            if requested && !drive.cancelled {
                warn!("cancellation requested, no further resources will be dispatched");
                drive.cancelled = true;
            }

            if drive.failure.is_none() && !drive.cancelled {
                for name in schedule.take_ready() {
                    debug!(resource = %name, "dispatching");
                    drive.timeline.push(TimelineEvent::Dispatched(name.clone()));
                    let task = launch(name.clone(), &outputs, cancel.clone());
                    let semaphore = semaphore.clone();
                    tasks.spawn(async move {
                        let _permit = semaphore
                            .acquire_owned()
                            .await
                            .map_err(|e| NodeFailure::failed(&name, e.to_string()))?;
                        task.await
                    });
                }
            }

            if tasks.is_empty() {
                break;
            }

            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(Ok(Ok(settled))) => {
                        schedule.complete(&settled.name);
                        outputs.insert(settled.name.clone(), settled.outputs.clone());
                        drive
                            .timeline
                            .push(TimelineEvent::Settled(settled.name.clone(), settled.change));
                        drive.settled.push(settled);
                    }
                    Some(Ok(Err(failure))) if failure.cancelled => {
                        debug!(resource = %failure.resource, "stopped by cancellation");
                        drive.cancelled = true;
                    }
                    Some(Ok(Err(failure))) => {
                        error!(resource = %failure.resource, reason = %failure.reason, "resource failed");
                        drive.failure.get_or_insert(failure);
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "provisioning task aborted");
                        drive
                            .failure
                            .get_or_insert(NodeFailure::failed("unknown", format!("task aborted: {e}")));
                    }
                    None => break,
                },
                changed = cancel.changed(), if watching => {
                    if changed.is_err() {
                        // Sender dropped: nobody can cancel any more.
                        watching = false;
                    }
                }
            }
        }

        drive.pending = schedule.pending();
        drive
    }

    /// Persist the run record and turn the drive outcome into a result.
    fn conclude(
        &self,
        run_id: String,
        kind: RunKind,
        started_at: u64,
        drive: Drive,
        blocked: Vec<String>,
    ) -> ProvisionResult<RunReport> {
        let touched: Vec<String> = drive
            .settled
            .iter()
            .filter(|s| s.change != Change::Unchanged)
            .map(|s| s.name.clone())
            .collect();

        if let Some(failure) = drive.failure {
            self.record_run(
                &run_id,
                kind,
                RunOutcome::Failed {
                    resource: failure.resource.clone(),
                    reason: failure.reason.clone(),
                    blocked: blocked.clone(),
                },
                started_at,
                touched,
            )?;
            error!(%run_id, resource = %failure.resource, ?blocked, "run halted for inspection");
            return Err(ProvisionError::ProvisioningFailed {
                resource: failure.resource,
                reason: failure.reason,
                blocked,
            });
        }

        if drive.cancelled {
            self.record_run(&run_id, kind, RunOutcome::Cancelled, started_at, touched)?;
            warn!(%run_id, pending = drive.pending.len(), "run cancelled; re-run to resume");
            return Err(ProvisionError::Cancelled {
                completed: drive.settled.into_iter().map(|s| s.name).collect(),
                pending: drive.pending,
            });
        }

        self.record_run(&run_id, kind, RunOutcome::Succeeded, started_at, touched.clone())?;
        info!(%run_id, ?kind, touched = touched.len(), "run succeeded");
        Ok(RunReport {
            run_id,
            kind,
            results: drive
                .settled
                .into_iter()
                .map(|s| (s.name, s.change))
                .collect(),
            timeline: drive.timeline,
        })
    }

    fn record_run(
        &self,
        run_id: &str,
        kind: RunKind,
        outcome: RunOutcome,
        started_at: u64,
        touched: Vec<String>,
    ) -> ProvisionResult<()> {
        self.ctx.state.put_run(&RunRecord {
            id: run_id.to_string(),
            kind,
            outcome,
            started_at,
            finished_at: epoch_secs(),
            touched,
        })?;
        Ok(())
    }
}

fn new_run_id() -> String {
    format!("run-{:08x}", rand::random::<u32>())
}

/// Substitute references in every property from dependency outputs.
fn resolve(spec: &ResourceSpec, outputs: &Outputs) -> Result<ResolvedResource, tierform_core::RefError> {
    let properties = spec
        .properties
        .iter()
        .map(|(k, v)| Ok((k.clone(), interpolate(v, outputs)?)))
        .collect::<Result<BTreeMap<_, _>, tierform_core::RefError>>()?;
    Ok(ResolvedResource {
        name: spec.name.clone(),
        kind: spec.kind,
        properties,
    })
}

/// Sleep for `duration` unless cancellation arrives first.
async fn pause(duration: Duration, cancel: &mut watch::Receiver<bool>) -> Result<(), WaitError> {
    let requested = *cancel.borrow();
    if requested {
        return Err(WaitError::Cancelled);
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        changed = cancel.changed() => {
            let requested = changed.is_ok() && *cancel.borrow();
            if requested {
                Err(WaitError::Cancelled)
            } else {
                tokio::time::sleep(duration).await;
                Ok(())
            }
        }
    }
}

enum Step {
    Create,
    /// Poll a record left mid-flight. `stale` means the declaration changed
    /// since, so an update follows once it is ready.
    Resume { id: String, stale: bool },
    Update(String),
}

impl NodeContext {
    async fn apply_node(
        &self,
        graph: &DependencyGraph,
        name: &str,
        existing: Option<ResourceRecord>,
        outputs: Outputs,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<Settled, NodeFailure> {
        let spec = graph
            .spec(name)
            .ok_or_else(|| NodeFailure::failed(name, "not declared"))?;
        let resolved = resolve(spec, &outputs).map_err(|e| NodeFailure::failed(name, e.to_string()))?;
        let hash = resolved.spec_hash();

        let step = match &existing {
            Some(record) if record.is_ready() && record.spec_hash == hash => {
                debug!(resource = %name, "unchanged");
                return Ok(Settled {
                    name: name.to_string(),
                    change: Change::Unchanged,
                    outputs: record.outputs.clone(),
                });
            }
            Some(ResourceRecord {
                physical_id: Some(id),
                status: ResourceStatus::Creating,
                spec_hash,
                ..
            }) => Step::Resume {
                id: id.clone(),
                stale: *spec_hash != hash,
            },
            Some(ResourceRecord {
                physical_id: Some(id),
                spec_hash,
                ..
            }) if *spec_hash != hash => Step::Update(id.clone()),
            Some(ResourceRecord {
                physical_id: Some(id),
                ..
            }) => Step::Resume {
                id: id.clone(),
                stale: false,
            },
            _ => Step::Create,
        };

        let requested = *cancel.borrow();
        if requested {
            return Err(NodeFailure::cancelled(name));
        }

        let now = epoch_secs();
        let mut record = existing.unwrap_or_else(|| ResourceRecord {
            name: name.to_string(),
            kind: spec.kind,
            physical_id: None,
            status: ResourceStatus::Creating,
            outputs: BTreeMap::new(),
            spec_hash: hash.clone(),
            dependencies: Vec::new(),
            error: None,
            created_at: now,
            updated_at: now,
        });
        record.dependencies = graph.dependencies(name);
        let handler = self.handlers.for_kind(spec.kind);

        let (mut id, mut change, stale) = match step {
            Step::Create => (
                self.create(&handler, &resolved, &mut record).await?,
                Change::Created,
                false,
            ),
            Step::Resume { id, stale } => {
                info!(resource = %name, physical_id = %id, "resuming");
                (id, Change::Resumed, stale)
            }
            Step::Update(id) => {
                self.update(&handler, &id, &resolved, &mut record).await?;
                (id, Change::Updated, false)
            }
        };

        let mut ready = self.wait_ready(&handler, spec.kind, &id, &mut cancel).await;
        if matches!(ready, Err(WaitError::Gone)) && change == Change::Resumed {
            warn!(resource = %name, physical_id = %id, "recorded resource no longer exists, recreating");
            record.physical_id = None;
            id = self.create(&handler, &resolved, &mut record).await?;
            change = Change::Created;
            ready = self.wait_ready(&handler, spec.kind, &id, &mut cancel).await;
        }
        let mut outputs = ready.map_err(|e| self.fail(&mut record, e))?;

        if stale {
            self.update(&handler, &id, &resolved, &mut record).await?;
            change = Change::Updated;
            outputs = self
                .wait_ready(&handler, spec.kind, &id, &mut cancel)
                .await
                .map_err(|e| self.fail(&mut record, e))?;
        }

        let missing: Vec<&str> = spec
            .kind
            .output_attributes()
            .iter()
            .copied()
            .filter(|attr| !outputs.contains_key(*attr))
            .collect();
        if !missing.is_empty() {
            let reason = format!("ready without outputs: {}", missing.join(", "));
            return Err(self.fail(&mut record, WaitError::Failed(reason)));
        }

        record.status = ResourceStatus::Ready;
        record.outputs = outputs.clone();
        record.spec_hash = hash;
        record.error = None;
        record.updated_at = epoch_secs();
        self.persist(&record)?;
        info!(resource = %name, kind = %spec.kind, physical_id = %id, ?change, "ready");

        Ok(Settled {
            name: name.to_string(),
            change,
            outputs,
        })
    }

    async fn create(
        &self,
        handler: &Arc<dyn ResourceHandler>,
        resolved: &ResolvedResource,
        record: &mut ResourceRecord,
    ) -> Result<String, NodeFailure> {
        // Recorded before the call so an interrupted create is visible.
        record.status = ResourceStatus::Creating;
        record.spec_hash = resolved.spec_hash();
        record.updated_at = epoch_secs();
        self.persist(record)?;

        let id = retry_with_backoff(
            &self.settings.retry,
            &format!("create {}", resolved.name),
            HandlerError::is_transient,
            || handler.create(resolved),
        )
        .await
        .map_err(|e| self.fail(record, WaitError::Failed(e.to_string())))?;

        debug!(resource = %resolved.name, physical_id = %id, "create accepted");
        record.physical_id = Some(id.clone());
        record.updated_at = epoch_secs();
        self.persist(record)?;
        Ok(id)
    }

    async fn update(
        &self,
        handler: &Arc<dyn ResourceHandler>,
        id: &str,
        resolved: &ResolvedResource,
        record: &mut ResourceRecord,
    ) -> Result<(), NodeFailure> {
        record.status = ResourceStatus::Updating;
        record.spec_hash = resolved.spec_hash();
        record.updated_at = epoch_secs();
        self.persist(record)?;

        retry_with_backoff(
            &self.settings.retry,
            &format!("update {}", resolved.name),
            HandlerError::is_transient,
            || handler.update(id, resolved),
        )
        .await
        .map_err(|e| self.fail(record, WaitError::Failed(e.to_string())))?;
        debug!(resource = %resolved.name, physical_id = %id, "update accepted");
        Ok(())
    }

    /// Poll until ready, failed, gone, timed out or cancelled.
    async fn wait_ready(
        &self,
        handler: &Arc<dyn ResourceHandler>,
        kind: ResourceKind,
        id: &str,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<BTreeMap<String, String>, WaitError> {
        // A timeout past the end of the clock never expires.
        let deadline = Instant::now().checked_add(self.settings.ready_timeout);
        loop {
            match handler.poll(kind, id).await {
                Ok(Readiness::Ready(outputs)) => return Ok(outputs),
                Ok(Readiness::Pending) => debug!(physical_id = %id, "not ready yet"),
                Ok(Readiness::Failed(reason)) => return Err(WaitError::Failed(reason)),
                Err(HandlerError::NotFound(_)) => return Err(WaitError::Gone),
                Err(e) if e.is_transient() => {
                    warn!(physical_id = %id, error = %e, "transient readiness error")
                }
                Err(e) => return Err(WaitError::Failed(e.to_string())),
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(WaitError::Failed(format!(
                    "not ready within {:?}",
                    self.settings.ready_timeout
                )));
            }
            pause(self.settings.poll_interval, cancel).await?;
        }
    }

    /// Record a failure on the resource and convert it for the drive loop.
    /// Cancellation leaves the record untouched so the next run resumes.
    fn fail(&self, record: &mut ResourceRecord, err: WaitError) -> NodeFailure {
        let reason = match err {
            WaitError::Cancelled => return NodeFailure::cancelled(&record.name),
            WaitError::Gone => "resource disappeared at the provider".to_string(),
            WaitError::Failed(reason) => reason,
        };
        record.status = ResourceStatus::Failed;
        record.error = Some(reason.clone());
        record.updated_at = epoch_secs();
        if let Err(e) = self.state.put_resource(record) {
            error!(resource = %record.name, error = %e, "failed to record failure");
        }
        NodeFailure::failed(&record.name, reason)
    }

    fn persist(&self, record: &ResourceRecord) -> Result<(), NodeFailure> {
        self.state
            .put_resource(record)
            .map_err(|e| NodeFailure::failed(&record.name, format!("state store: {e}")))
    }

    async fn destroy_node(
        &self,
        mut record: ResourceRecord,
        cancel: watch::Receiver<bool>,
    ) -> Result<Settled, NodeFailure> {
        let requested = *cancel.borrow();
        if requested {
            return Err(NodeFailure::cancelled(&record.name));
        }

        let change = match record.physical_id.clone() {
            None => Change::AlreadyGone,
            Some(id) => {
                record.status = ResourceStatus::Deleting;
                record.updated_at = epoch_secs();
                self.persist(&record)?;

                let handler = self.handlers.for_kind(record.kind);
                let kind = record.kind;
                let deleted = retry_with_backoff(
                    &self.settings.retry,
                    &format!("delete {}", record.name),
                    HandlerError::is_transient,
                    || handler.delete(kind, &id),
                )
                .await;
                match deleted {
                    Ok(()) => Change::Deleted,
                    Err(HandlerError::NotFound(_)) => {
                        warn!(resource = %record.name, physical_id = %id, "already gone at the provider");
                        Change::AlreadyGone
                    }
                    Err(e) => return Err(self.fail(&mut record, WaitError::Failed(e.to_string()))),
                }
            }
        };

        self.state
            .delete_resource(&record.name)
            .map_err(|e| NodeFailure::failed(&record.name, format!("state store: {e}")))?;
        info!(resource = %record.name, ?change, "removed");
        Ok(Settled {
            name: record.name,
            change,
            outputs: BTreeMap::new(),
        })
    }
}
