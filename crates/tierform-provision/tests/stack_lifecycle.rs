//! End-to-end apply / re-apply / destroy of the full stack against the
//! simulated cloud.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use tierform_core::topology::*;
use tierform_core::{HandlerError, ResourceKind, ResourceSpec, SecretConsumer, SecretReader, StackConfig};
use tierform_graph::DependencyGraph;
use tierform_identity::ReconciledUserHandler;
use tierform_provision::{
    Change, HandlerSet, Orchestrator, ProvisionError, ProvisionSettings, RetryConfig, SimOp,
    SimulatedCloud, StackOutputs, TimelineEvent,
};
use tierform_state::{ResourceStatus, RunOutcome, StateStore};

fn settings() -> ProvisionSettings {
    ProvisionSettings {
        max_parallel: 4,
        retry: RetryConfig::immediate(4),
        poll_interval: Duration::from_millis(2),
        ready_timeout: Duration::from_secs(5),
    }
}

struct Harness {
    cloud: Arc<SimulatedCloud>,
    orchestrator: Orchestrator,
}

impl Harness {
    fn new(cloud: SimulatedCloud) -> Self {
        Self::with_state(cloud, StateStore::open_in_memory().unwrap())
    }

    fn with_state(cloud: SimulatedCloud, state: StateStore) -> Self {
        let cloud = Arc::new(cloud);
        let users = ReconciledUserHandler::new(cloud.clone(), cloud.clone(), state.clone());
        let handlers = HandlerSet::new(cloud.clone()).with(ResourceKind::ReconciledUser, Arc::new(users));
        Self {
            cloud,
            orchestrator: Orchestrator::new(handlers, state, settings()),
        }
    }

    fn creates_of(&self, name: &str) -> usize {
        self.cloud
            .calls()
            .iter()
            .filter(|c| c.op == SimOp::Create && c.target == name)
            .count()
    }
}

fn stack() -> Vec<ResourceSpec> {
    StackConfig::scaffold("demo").resources()
}

/// A receiver whose sender is already gone: cancellation never arrives.
fn no_cancel() -> watch::Receiver<bool> {
    watch::channel(false).1
}

fn position(timeline: &[TimelineEvent], wanted: &TimelineEvent) -> usize {
    timeline
        .iter()
        .position(|e| e == wanted)
        .unwrap_or_else(|| panic!("{wanted:?} not in timeline"))
}

fn settled(name: &str, change: Change) -> TimelineEvent {
    TimelineEvent::Settled(name.to_string(), change)
}

fn dispatched(name: &str) -> TimelineEvent {
    TimelineEvent::Dispatched(name.to_string())
}

#[tokio::test]
async fn full_stack_applies_then_reapply_is_a_no_op() {
    let h = Harness::new(SimulatedCloud::new().with_ready_after_polls(1));

    let report = h.orchestrator.apply(stack(), no_cancel()).await.unwrap();
    assert_eq!(report.count(Change::Created), stack().len());

    let records = h.orchestrator.state().list_resources().unwrap();
    assert!(records.iter().all(|r| r.status == ResourceStatus::Ready));
    let pool_id = records
        .iter()
        .find(|r| r.name == USER_POOL)
        .and_then(|r| r.outputs.get("user_pool_id").cloned())
        .unwrap();
    assert!(h.cloud.user_exists(&pool_id, "admin"));

    let side_effects = h.cloud.side_effects();
    let again = h.orchestrator.apply(stack(), no_cancel()).await.unwrap();
    assert_eq!(again.count(Change::Unchanged), stack().len());
    assert!(again.changed().is_empty());
    assert_eq!(h.cloud.side_effects(), side_effects, "re-apply made provider calls");
}

#[tokio::test]
async fn identity_and_entry_point_are_ordered() {
    let h = Harness::new(SimulatedCloud::new().with_ready_after_polls(2));
    let report = h.orchestrator.apply(stack(), no_cancel()).await.unwrap();
    let t = &report.timeline;

    // Pool ready before the user is reconciled into it.
    assert!(position(t, &settled(USER_POOL, Change::Created)) < position(t, &dispatched(ADMIN_USER)));
    // The callback address exists before the client registers it.
    assert!(position(t, &settled(LOAD_BALANCER, Change::Created)) < position(t, &dispatched(USER_POOL_CLIENT)));
    // Authentication is attached last.
    for prerequisite in [ADMIN_USER, SERVICE, USER_POOL_CLIENT, USER_POOL_DOMAIN, TARGET_GROUP] {
        assert!(
            position(t, &settled(prerequisite, Change::Created)) < position(t, &dispatched(LISTENER)),
            "{prerequisite} settled after listener dispatch"
        );
    }
    // Storage and credentials before the task that mounts and reads them.
    for prerequisite in [DATABASE, ACCESS_POINT, DB_CREDENTIALS, APP_ADMIN_CREDENTIALS] {
        assert!(position(t, &settled(prerequisite, Change::Created)) < position(t, &dispatched(TASK_DEFINITION)));
    }

    let outputs = StackOutputs::load(h.orchestrator.state()).unwrap();
    let url = outputs.entry_point_url.unwrap();
    let client = h.orchestrator.state().get_resource(USER_POOL_CLIENT).unwrap().unwrap();
    assert!(client.outputs.contains_key("client_id"));
    assert!(url.starts_with("https://"));
}

#[tokio::test]
async fn cycle_is_rejected_before_any_call() {
    let h = Harness::new(SimulatedCloud::new());
    let specs = vec![
        ResourceSpec::new("a", ResourceKind::Cluster).depends_on("b"),
        ResourceSpec::new("b", ResourceKind::Cluster).depends_on("a"),
    ];

    let err = h.orchestrator.apply(specs, no_cancel()).await.unwrap_err();
    assert!(matches!(err, ProvisionError::CircularDependency { .. }), "got {err}");
    assert!(h.cloud.calls().is_empty());

    let runs = h.orchestrator.state().recent_runs(1).unwrap();
    assert!(matches!(runs[0].outcome, RunOutcome::Rejected { .. }));
    assert!(h.orchestrator.state().list_resources().unwrap().is_empty());
}

#[tokio::test]
async fn failure_halts_dependents_and_next_apply_resumes() {
    let cloud = SimulatedCloud::new();
    cloud.inject_fault(DATABASE, SimOp::Create, HandlerError::Invalid("storage quota".into()), 1);
    let h = Harness::new(cloud);

    let err = h.orchestrator.apply(stack(), no_cancel()).await.unwrap_err();
    let ProvisionError::ProvisioningFailed { resource, blocked, .. } = &err else {
        panic!("expected provisioning failure, got {err}");
    };
    assert_eq!(resource, DATABASE);
    for dependent in [TASK_DEFINITION, SERVICE, LISTENER] {
        assert!(blocked.contains(&dependent.to_string()), "{dependent} not blocked");
    }
    assert_eq!(h.creates_of(TASK_DEFINITION), 0);
    let failed = h.orchestrator.state().get_resource(DATABASE).unwrap().unwrap();
    assert_eq!(failed.status, ResourceStatus::Failed);
    assert!(failed.error.unwrap().contains("storage quota"));

    let report = h.orchestrator.apply(stack(), no_cancel()).await.unwrap();
    assert!(report.count(Change::Unchanged) > 0);
    for name in [NETWORK, DB_CREDENTIALS, USER_POOL] {
        assert_eq!(h.creates_of(name), 1, "{name} was created twice");
    }
    assert_eq!(h.creates_of(DATABASE), 2);
    assert_eq!(h.creates_of(LISTENER), 1);
}

#[tokio::test]
async fn transient_errors_are_retried() {
    let cloud = SimulatedCloud::new();
    cloud.inject_fault(CLUSTER, SimOp::Create, HandlerError::DependencyUnready("eventual consistency".into()), 2);
    let h = Harness::new(cloud);

    h.orchestrator.apply(stack(), no_cancel()).await.unwrap();
    assert_eq!(h.creates_of(CLUSTER), 3);
}

#[tokio::test]
async fn retries_are_bounded() {
    let cloud = SimulatedCloud::new();
    cloud.inject_fault(CLUSTER, SimOp::Create, HandlerError::DependencyUnready("never".into()), 100);
    let h = Harness::new(cloud);

    let err = h.orchestrator.apply(stack(), no_cancel()).await.unwrap_err();
    assert!(matches!(&err, ProvisionError::ProvisioningFailed { resource, .. } if resource == CLUSTER));
    assert_eq!(h.creates_of(CLUSTER), 4);
}

#[tokio::test]
async fn cancellation_before_start_dispatches_nothing() {
    let h = Harness::new(SimulatedCloud::new());
    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();

    let err = h.orchestrator.apply(stack(), rx).await.unwrap_err();
    let ProvisionError::Cancelled { completed, pending } = &err else {
        panic!("expected cancellation, got {err}");
    };
    assert!(completed.is_empty());
    assert_eq!(pending.len(), stack().len());
    assert!(h.cloud.calls().is_empty());
}

#[tokio::test]
async fn cancelled_run_resumes_without_duplicates() {
    let h = Harness::new(SimulatedCloud::new().with_ready_after_polls(5));
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(25)).await;
        let _ = tx.send(true);
    });

    match h.orchestrator.apply(stack(), rx).await {
        Err(ProvisionError::Cancelled { .. }) | Ok(_) => {}
        Err(other) => panic!("unexpected error: {other}"),
    }

    h.orchestrator.apply(stack(), no_cancel()).await.unwrap();
    for spec in stack() {
        if spec.kind != ResourceKind::ReconciledUser {
            assert_eq!(h.creates_of(&spec.name), 1, "{} created more than once", spec.name);
        }
    }
    assert!(h.orchestrator.state().list_resources().unwrap().iter().all(|r| r.is_ready()));
}

#[tokio::test]
async fn destroy_runs_in_reverse_dependency_order() {
    let h = Harness::new(SimulatedCloud::new());
    h.orchestrator.apply(stack(), no_cancel()).await.unwrap();

    let report = h.orchestrator.destroy(no_cancel()).await.unwrap();
    assert_eq!(report.count(Change::Deleted), stack().len());

    let graph = DependencyGraph::build(stack()).unwrap();
    for edge in graph.edges() {
        assert!(
            position(&report.timeline, &settled(&edge.dependent, Change::Deleted))
                < position(&report.timeline, &dispatched(&edge.dependency)),
            "{} deleted before its dependent {}",
            edge.dependency,
            edge.dependent
        );
    }
    assert_eq!(h.cloud.resource_count(), 0);
    assert!(h.orchestrator.state().list_resources().unwrap().is_empty());
}

#[tokio::test]
async fn destroy_tolerates_resources_already_gone() {
    let h = Harness::new(SimulatedCloud::new());
    h.orchestrator.apply(stack(), no_cancel()).await.unwrap();
    let cluster = h.orchestrator.state().get_resource(CLUSTER).unwrap().unwrap();
    h.cloud.forget(cluster.physical_id.as_deref().unwrap());

    let report = h.orchestrator.destroy(no_cancel()).await.unwrap();
    assert!(report.results.contains(&(CLUSTER.to_string(), Change::AlreadyGone)));
    assert!(h.orchestrator.state().list_resources().unwrap().is_empty());
}

#[tokio::test]
async fn taken_domain_prefix_fails_the_run() {
    let cloud = SimulatedCloud::new();
    cloud.claim_domain("demo-login");
    let h = Harness::new(cloud);

    let err = h.orchestrator.apply(stack(), no_cancel()).await.unwrap_err();
    let ProvisionError::ProvisioningFailed { resource, blocked, .. } = &err else {
        panic!("expected provisioning failure, got {err}");
    };
    assert_eq!(resource, USER_POOL_DOMAIN);
    assert!(blocked.contains(&LISTENER.to_string()));
}

#[tokio::test]
async fn secrets_are_read_only_by_task_and_reconciler_and_never_stored() {
    let h = Harness::new(SimulatedCloud::new());
    h.orchestrator.apply(stack(), no_cancel()).await.unwrap();

    let outputs = StackOutputs::load(h.orchestrator.state()).unwrap();
    let admin_secret = outputs.admin_credentials_secret_id.clone().unwrap();
    let db_secret = outputs.db_credentials_secret_id.clone().unwrap();

    let reads = h.cloud.secret_reads();
    assert!(reads.contains(&(admin_secret.clone(), SecretConsumer::IdentityReconciler)));
    assert!(reads.contains(&(db_secret.clone(), SecretConsumer::TaskEnvironment)));
    assert!(reads.contains(&(admin_secret.clone(), SecretConsumer::TaskEnvironment)));

    let records = serde_json::to_string(&h.orchestrator.state().list_resources().unwrap()).unwrap();
    let outputs_json = serde_json::to_string(&outputs).unwrap();
    for id in [admin_secret, db_secret] {
        let value = h.cloud.read_secret(&id, SecretConsumer::TaskEnvironment).await.unwrap();
        assert!(!records.contains(value.expose()));
        assert!(!outputs_json.contains(value.expose()));
    }
}

#[tokio::test]
async fn state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("state.redb");
    let snapshot = dir.path().join("cloud.json");

    {
        let h = Harness::with_state(SimulatedCloud::open(&snapshot).unwrap(), StateStore::open(&db).unwrap());
        h.orchestrator.apply(stack(), no_cancel()).await.unwrap();
        h.cloud.save().unwrap();
    }

    let h = Harness::with_state(SimulatedCloud::open(&snapshot).unwrap(), StateStore::open(&db).unwrap());
    let report = h.orchestrator.apply(stack(), no_cancel()).await.unwrap();
    assert_eq!(report.count(Change::Unchanged), stack().len());
    assert_eq!(h.cloud.side_effects(), 0);
}
