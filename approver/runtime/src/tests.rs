use crate::{
    core::{
        evaluator::FakeEvaluator, store::MemoryStore, Evaluate, IssuerRef, Reconciler,
        RequestStore, ResourceId, StoreError,
    },
    k8s::{
        certificate_request::{CONDITION_DENIED, CONDITION_TRUE},
        ByteString, CertificateRequest, CertificateRequestCondition, CertificateRequestSpec,
        CertificateRequestStatus, Decision,
    },
    Controller, ControllerMetrics, Index, IndexMetrics, SharedIndex,
};
use kubert::index::IndexNamespacedResource;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tokio::{
    sync::{mpsc, oneshot, watch},
    time,
};

const APPROVER: &str = "spiffe.csi.cert-manager.io";
const NAMESPACE: &str = "ns-0";
const RESYNC_PERIOD: time::Duration = time::Duration::from_secs(10);

fn issuer() -> IssuerRef {
    IssuerRef::new("spiffe-ca", "ClusterIssuer", "cert-manager.io")
}

fn other_issuer() -> IssuerRef {
    IssuerRef::new("not-spiffe-ca", "ClusterIssuer", "cert-manager.io")
}

fn make_request(name: &str, issuer: IssuerRef) -> CertificateRequest {
    let mut req = CertificateRequest::new(
        name,
        CertificateRequestSpec {
            request: ByteString(b"request".to_vec()),
            issuer_ref: issuer.into(),
            duration: None,
            is_ca: None,
            usages: None,
            username: None,
            uid: None,
            groups: None,
            extra: None,
        },
    );
    req.metadata.namespace = Some(NAMESPACE.to_string());
    req
}

/// Wraps a `MemoryStore` with reads that can be made to time out.
#[derive(Debug, Default)]
struct FlakyStore {
    inner: MemoryStore,
    failing_gets: AtomicUsize,
}

#[async_trait::async_trait]
impl RequestStore for FlakyStore {
    async fn get(&self, id: &ResourceId) -> Result<Option<CertificateRequest>, StoreError> {
        let failing = self
            .failing_gets
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(StoreError::Timeout);
        }
        self.inner.get(id).await
    }

    async fn update_status(
        &self,
        req: &CertificateRequest,
    ) -> Result<CertificateRequest, StoreError> {
        self.inner.update_status(req).await
    }
}

/// Takes `delay` to reach each verdict.
#[derive(Debug)]
struct SlowEvaluator {
    inner: FakeEvaluator,
    delay: Arc<Mutex<time::Duration>>,
}

#[async_trait::async_trait]
impl Evaluate for SlowEvaluator {
    async fn evaluate(&self, req: &CertificateRequest) -> anyhow::Result<()> {
        let delay = *self.delay.lock();
        time::sleep(delay).await;
        self.inner.evaluate(req).await
    }
}

struct Fixture {
    store: Arc<FlakyStore>,
    evaluator: FakeEvaluator,
    evaluation_delay: Arc<Mutex<time::Duration>>,
    index: SharedIndex,
    queue: mpsc::Sender<ResourceId>,
    leader: watch::Sender<bool>,
    metrics: ControllerMetrics,
    index_metrics: IndexMetrics,
    _shutdown: oneshot::Sender<()>,
}

impl Fixture {
    fn spawn(leader: bool) -> Self {
        Self::spawn_with(leader, 16)
    }

    fn spawn_with(leader: bool, queue_size: usize) -> Self {
        let store = Arc::new(FlakyStore::default());
        let evaluator = FakeEvaluator::new();
        let evaluation_delay = Arc::new(Mutex::new(time::Duration::ZERO));

        let (queue_tx, queue_rx) = mpsc::channel(queue_size);
        let index_metrics = IndexMetrics::default();
        let index = Index::shared(issuer(), queue_tx.clone(), index_metrics.clone());

        let (leader_tx, leader_rx) = watch::channel(leader);
        let metrics = ControllerMetrics::default();
        let reconciler = Arc::new(Reconciler::new(
            issuer(),
            APPROVER,
            SlowEvaluator {
                inner: evaluator.clone(),
                delay: evaluation_delay.clone(),
            },
            store.clone(),
        ));
        let controller = Controller::new(
            reconciler,
            index.clone(),
            leader_rx,
            queue_rx,
            RESYNC_PERIOD,
            metrics.clone(),
        );

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(controller.run(async move {
            let _ = shutdown_rx.await;
        }));

        Self {
            store,
            evaluator,
            evaluation_delay,
            index,
            queue: queue_tx,
            leader: leader_tx,
            metrics,
            index_metrics,
            _shutdown: shutdown_tx,
        }
    }

    /// Stores a request and delivers it to the index as the watch would.
    fn create(&self, req: CertificateRequest) -> ResourceId {
        let req = self
            .store
            .inner
            .create(req)
            .expect("request must be stored");
        let id = ResourceId::of(&req).expect("request must have an id");
        self.index.write().apply(req);
        id
    }

    fn get(&self, id: &ResourceId) -> CertificateRequest {
        self.store.inner.snapshot(id).expect("request must exist")
    }

    fn decision(&self, id: &ResourceId) -> Decision {
        self.get(id).decision()
    }

    /// Asserts that the request stays undecided for `period`.
    async fn stays_undecided(&self, id: &ResourceId, period: time::Duration) {
        let deadline = time::Instant::now() + period;
        while time::Instant::now() < deadline {
            assert_eq!(self.decision(id), Decision::Undecided);
            time::sleep(time::Duration::from_millis(100)).await;
        }
        assert_eq!(self.decision(id), Decision::Undecided);
    }

    async fn eventually_decided(&self, id: &ResourceId) -> Decision {
        let decided = time::timeout(time::Duration::from_secs(60), async {
            loop {
                let decision = self.decision(id);
                if decision.is_terminal() {
                    return decision;
                }
                time::sleep(time::Duration::from_millis(100)).await;
            }
        })
        .await;
        decided.unwrap_or_else(|_| panic!("{id} must be decided"))
    }
}

#[tokio::test(start_paused = true)]
async fn approves_request_when_policy_passes() {
    let fixture = Fixture::spawn(true);

    let id = fixture.create(make_request("req-0", issuer()));

    assert_eq!(fixture.eventually_decided(&id).await, Decision::Approved);
    assert_eq!(fixture.evaluator.calls(), 1);
    assert_eq!(fixture.metrics.approved.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn denies_request_when_policy_fails() {
    let fixture = Fixture::spawn(true);
    fixture
        .evaluator
        .with_evaluate(|_| Err(anyhow::anyhow!("this is an error")));

    let id = fixture.create(make_request("req-0", issuer()));

    assert_eq!(fixture.eventually_decided(&id).await, Decision::Denied);
    let req = fixture.get(&id);
    let denied = req
        .conditions()
        .iter()
        .find(|c| c.type_ == CONDITION_DENIED)
        .expect("request must have a Denied condition");
    assert_eq!(denied.status, CONDITION_TRUE);
    assert_eq!(denied.reason.as_deref(), Some(APPROVER));
    assert_eq!(denied.message.as_deref(), Some("this is an error"));
    assert_eq!(fixture.metrics.denied.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn requests_for_other_issuers_stay_undecided() {
    let fixture = Fixture::spawn(true);

    let id = fixture.create(make_request("req-0", other_issuer()));
    // Even a key that reaches the controller is not acted on.
    fixture.queue.send(id.clone()).await.unwrap();

    fixture.stays_undecided(&id, time::Duration::from_secs(3)).await;
    let req = fixture.get(&id);
    assert!(req.status.is_none(), "request must not be written");
    assert_eq!(fixture.evaluator.calls(), 0);
    assert_eq!(fixture.metrics.skipped.get(), 0);
    assert_eq!(fixture.metrics.errors.get(), 0);
    assert_eq!(fixture.index_metrics.pending.get(), 0);
}

#[tokio::test(start_paused = true)]
async fn duplicate_events_evaluate_once() {
    let fixture = Fixture::spawn(true);

    let id = fixture.create(make_request("req-0", issuer()));
    for _ in 0..4 {
        fixture.index.write().apply(make_request("req-0", issuer()));
    }

    assert_eq!(fixture.eventually_decided(&id).await, Decision::Approved);
    time::sleep(RESYNC_PERIOD * 2).await;
    assert_eq!(fixture.evaluator.calls(), 1);
    assert_eq!(fixture.metrics.approved.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn decided_requests_are_not_reevaluated() {
    let fixture = Fixture::spawn(true);

    let mut req = make_request("req-0", issuer());
    req.status = Some(CertificateRequestStatus {
        conditions: Some(vec![CertificateRequestCondition {
            type_: CONDITION_DENIED.to_string(),
            status: CONDITION_TRUE.to_string(),
            reason: Some("someone-else".to_string()),
            ..Default::default()
        }]),
        ..Default::default()
    });
    let id = fixture.create(req);
    fixture.queue.send(id.clone()).await.unwrap();

    time::sleep(time::Duration::from_secs(3)).await;
    let req = fixture.get(&id);
    assert_eq!(req.decision(), Decision::Denied);
    assert_eq!(req.conditions().len(), 1);
    assert_eq!(fixture.evaluator.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn follower_does_not_write_until_it_leads() {
    let fixture = Fixture::spawn(false);

    let id = fixture.create(make_request("req-0", issuer()));

    time::sleep(RESYNC_PERIOD * 2).await;
    assert_eq!(fixture.decision(&id), Decision::Undecided);
    assert_eq!(fixture.evaluator.calls(), 0);

    fixture.leader.send(true).unwrap();
    assert_eq!(fixture.eventually_decided(&id).await, Decision::Approved);
    assert_eq!(fixture.evaluator.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_fetches_are_requeued() {
    let fixture = Fixture::spawn(true);
    fixture.store.failing_gets.store(2, Ordering::Release);

    let id = fixture.create(make_request("req-0", issuer()));

    assert_eq!(fixture.eventually_decided(&id).await, Decision::Approved);
    assert_eq!(fixture.evaluator.calls(), 1);
    assert_eq!(fixture.metrics.errors.get(), 2);
    assert_eq!(fixture.metrics.requeues.get(), 2);
}

#[tokio::test(start_paused = true)]
async fn dropped_keys_are_picked_up_by_resync() {
    let fixture = Fixture::spawn_with(true, 1);
    // Let the controller take its initial resync.
    time::sleep(time::Duration::from_secs(1)).await;

    let first = fixture.create(make_request("req-0", issuer()));
    let second = fixture.create(make_request("req-1", issuer()));
    assert_eq!(fixture.index_metrics.dropped.get(), 1);

    time::sleep(time::Duration::from_secs(2)).await;
    assert_eq!(fixture.decision(&first), Decision::Approved);
    assert_eq!(fixture.decision(&second), Decision::Undecided);

    assert_eq!(fixture.eventually_decided(&second).await, Decision::Approved);
}

#[tokio::test(start_paused = true)]
async fn denies_request_when_policy_panics() {
    let fixture = Fixture::spawn(true);
    fixture.evaluator.with_evaluate(|_| panic!("evaluator bug"));

    let id = fixture.create(make_request("req-0", issuer()));

    assert_eq!(fixture.eventually_decided(&id).await, Decision::Denied);
    assert_eq!(fixture.evaluator.calls(), 1);
    assert_eq!(fixture.metrics.denied.get(), 1);
    assert_eq!(fixture.metrics.errors.get(), 0);
    assert_eq!(fixture.metrics.requeues.get(), 0);
}

#[tokio::test(start_paused = true)]
async fn losing_leadership_abandons_passes_in_flight() {
    let fixture = Fixture::spawn(true);
    *fixture.evaluation_delay.lock() = time::Duration::from_secs(5);

    let id = fixture.create(make_request("req-0", issuer()));
    time::sleep(time::Duration::from_secs(1)).await;
    assert_eq!(fixture.decision(&id), Decision::Undecided);

    fixture.leader.send(false).unwrap();
    fixture.stays_undecided(&id, RESYNC_PERIOD * 3).await;
    assert!(fixture.get(&id).status.is_none(), "request must not be written");
    assert_eq!(fixture.evaluator.calls(), 0, "the pass must not finish");

    // Events delivered while following are not acted on either.
    fixture.queue.send(id.clone()).await.unwrap();
    fixture.stays_undecided(&id, RESYNC_PERIOD).await;
    assert_eq!(fixture.evaluator.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn events_do_not_bypass_requeue_backoff() {
    let fixture = Fixture::spawn(true);
    fixture.store.failing_gets.store(2, Ordering::Release);

    let id = fixture.create(make_request("req-0", issuer()));
    time::sleep(time::Duration::from_millis(10)).await;
    assert_eq!(fixture.metrics.errors.get(), 1);

    // The key is waiting on its requeue timer; events for it are ignored
    // until the timer fires.
    for _ in 0..3 {
        fixture.queue.send(id.clone()).await.unwrap();
    }
    time::sleep(time::Duration::from_millis(100)).await;
    assert_eq!(fixture.metrics.errors.get(), 1);
    assert_eq!(fixture.metrics.requeues.get(), 1);
    assert_eq!(fixture.decision(&id), Decision::Undecided);

    assert_eq!(fixture.eventually_decided(&id).await, Decision::Approved);
    assert_eq!(fixture.metrics.errors.get(), 2);
    assert_eq!(fixture.metrics.requeues.get(), 2);
    assert_eq!(fixture.evaluator.calls(), 1);
}
