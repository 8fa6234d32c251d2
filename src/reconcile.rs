//! Keeps the routing table in step with the cluster's ingresses.

use std::{future::Future, sync::Arc, time::Duration};

use derive_more::Display;
use tokio::{
    sync::{oneshot, Notify},
    time::{self, Instant, Interval, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use crate::{
    cluster::IngressSource,
    error::ReconcileError,
    routing::{ClassFilter, RouteBuilder, RoutingTable},
};

/// Wakes the reconciler. Notifications arriving while a pass runs collapse
/// into a single follow-up pass.
#[derive(Clone, Debug, Default)]
pub(crate) struct Trigger(Arc<Notify>);

impl Trigger {
    pub(crate) fn notify(&self) {
        self.0.notify_one();
    }

    pub(crate) async fn notified(&self) {
        self.0.notified().await;
    }
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Idle,
    Listing,
    Building,
    Swapping,
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
#[display(fmt = "{} ingresses, {} hosts, {} routes", ingresses, hosts, routes)]
pub(crate) struct PassSummary {
    pub(crate) ingresses: usize,
    pub(crate) hosts: usize,
    pub(crate) routes: usize,
}

pub(crate) struct Reconciler {
    source: Arc<dyn IngressSource>,
    builder: RouteBuilder,
    table: Arc<RoutingTable>,
    filter: ClassFilter,
    trigger: Trigger,
    pass_timeout: Duration,
    resync_period: Option<Duration>,
    phase: Phase,
}

impl Reconciler {
    pub(crate) fn new(
        source: Arc<dyn IngressSource>,
        builder: RouteBuilder,
        table: Arc<RoutingTable>,
        filter: ClassFilter,
        trigger: Trigger,
    ) -> Self {
        Self {
            source,
            builder,
            table,
            filter,
            trigger,
            pass_timeout: Duration::from_secs(60),
            resync_period: None,
            phase: Phase::Idle,
        }
    }

    pub(crate) fn with_pass_timeout(mut self, timeout: Duration) -> Self {
        self.pass_timeout = timeout;
        self
    }

    /// `None` disables the periodic resync.
    pub(crate) fn with_resync_period(mut self, period: Option<Duration>) -> Self {
        self.resync_period = period;
        self
    }

    #[cfg(test)]
    pub(crate) fn phase(&self) -> Phase {
        self.phase
    }

    /// Lists, builds and publishes once.
    ///
    /// On failure or timeout the table keeps serving its previous contents.
    pub(crate) async fn run_once(&mut self) -> Result<PassSummary, ReconcileError> {
        let timeout = self.pass_timeout;
        let result = match time::timeout(timeout, self.pass()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(phase = %self.phase, "Reconciliation pass timed out");
                Err(ReconcileError::Timeout(timeout))
            }
        };
        self.phase = Phase::Idle;
        result
    }

    async fn pass(&mut self) -> Result<PassSummary, ReconcileError> {
        self.phase = Phase::Listing;
        let ingresses = self.source.list().await?;

        self.phase = Phase::Building;
        let routes = self.builder.build(&ingresses, &self.filter).await;

        self.phase = Phase::Swapping;
        let summary = PassSummary {
            ingresses: ingresses.len(),
            hosts: routes.len(),
            routes: routes.values().map(Vec::len).sum(),
        };
        self.table.swap(routes);

        Ok(summary)
    }

    async fn reconcile(&mut self) {
        match self.run_once().await {
            Ok(summary) => {
                info!(%summary, "Routing table updated");
                debug!("Routes:\n{}", self.table);
            }
            Err(error) => error!(%error, "Reconciliation failed, keeping previous routes"),
        }
    }

    /// Runs a pass on every trigger and resync tick until `shutdown`
    /// completes. A pass in progress is abandoned on shutdown.
    pub(crate) async fn run(mut self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);

        let mut resync = self.resync_period.map(|period| {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = self.trigger.notified() => debug!("Ingress change observed"),
                _ = tick(&mut resync) => debug!("Periodic resync"),
            }

            tokio::select! {
                _ = &mut shutdown => break,
                _ = self.reconcile() => {}
            }
        }

        info!("Reconciler stopped");
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Waits for the watch to deliver its initial listing.
pub(crate) async fn wait_for_sync(
    synced: oneshot::Receiver<()>,
    timeout: Duration,
) -> Result<(), ReconcileError> {
    match time::timeout(timeout, synced).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => Err(ReconcileError::CacheSync(
            "watch ended before the initial listing".to_string(),
        )),
        Err(_) => Err(ReconcileError::CacheSync(format!(
            "no initial listing within {timeout:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use futures::future;

    use super::*;
    use crate::{
        cluster::fake::{FakeCluster, FakeIngresses},
        config::EmptyClassPolicy,
        error::QueryError,
        ingress::{BackendRef, IngressPath, IngressRule, IngressSpec, ServicePort},
        routing::{testing::proxies, BackendResolver, PathType},
    };

    fn ingress(host: &str, service: &str) -> IngressSpec {
        IngressSpec {
            namespace: "ns".to_string(),
            name: host.to_string(),
            class: Some("gateway".to_string()),
            rules: vec![IngressRule {
                host: host.to_string(),
                paths: Some(vec![IngressPath {
                    path: "/".to_string(),
                    path_type: PathType::Prefix,
                    backend: Some(BackendRef::Service {
                        name: service.to_string(),
                        port: ServicePort::Number(8080),
                    }),
                }]),
            }],
        }
    }

    fn reconciler(source: Arc<dyn IngressSource>, table: Arc<RoutingTable>, trigger: Trigger) -> Reconciler {
        let builder = RouteBuilder::new(
            BackendResolver::new(Arc::new(FakeCluster::default())),
            proxies(),
        );
        Reconciler::new(
            source,
            builder,
            table,
            ClassFilter::new("gateway", EmptyClassPolicy::MatchNone),
            trigger,
        )
    }

    #[tokio::test]
    async fn pass_publishes_routes() {
        let table = Arc::new(RoutingTable::new());
        let source = Arc::new(FakeIngresses::new(vec![ingress("a.com", "a"), ingress("b.com", "b")]));
        let mut reconciler = reconciler(source, table.clone(), Trigger::default());

        let summary = reconciler.run_once().await.unwrap();

        assert_eq!(
            summary,
            PassSummary {
                ingresses: 2,
                hosts: 2,
                routes: 2,
            }
        );
        assert_eq!(reconciler.phase(), Phase::Idle);
        assert!(table.match_route("a.com", "/").is_some());
        assert!(table.match_route("b.com:8443", "/x").is_some());
    }

    #[tokio::test]
    async fn failed_listing_keeps_previous_table() {
        let table = Arc::new(RoutingTable::new());
        let source = Arc::new(FakeIngresses::new(vec![ingress("a.com", "a")]));
        let mut reconciler = reconciler(source.clone(), table.clone(), Trigger::default());
        reconciler.run_once().await.unwrap();

        source.fail();
        let result = reconciler.run_once().await;

        assert!(matches!(result, Err(ReconcileError::List(QueryError::Timeout(_)))));
        assert_eq!(reconciler.phase(), Phase::Idle);
        assert!(table.match_route("a.com", "/").is_some());
    }

    #[tokio::test]
    async fn removed_ingress_disappears() {
        let table = Arc::new(RoutingTable::new());
        let source = Arc::new(FakeIngresses::new(vec![ingress("a.com", "a"), ingress("b.com", "b")]));
        let mut reconciler = reconciler(source.clone(), table.clone(), Trigger::default());
        reconciler.run_once().await.unwrap();

        source.set(vec![ingress("b.com", "b")]);
        reconciler.run_once().await.unwrap();

        assert!(table.match_route("a.com", "/").is_none());
        assert!(table.match_route("b.com", "/").is_some());
    }

    struct StalledSource;

    #[async_trait]
    impl IngressSource for StalledSource {
        async fn list(&self) -> Result<Vec<IngressSpec>, QueryError> {
            future::pending().await
        }
    }

    #[tokio::test]
    async fn stalled_pass_times_out() {
        let table = Arc::new(RoutingTable::new());
        let mut reconciler = reconciler(Arc::new(StalledSource), table.clone(), Trigger::default())
            .with_pass_timeout(Duration::from_millis(50));

        let result = reconciler.run_once().await;

        assert!(matches!(result, Err(ReconcileError::Timeout(_))));
        assert_eq!(reconciler.phase(), Phase::Idle);
        assert_eq!(table.host_count(), 0);
    }

    /// Counts listings and blocks each one until released.
    struct GatedSource {
        lists: AtomicUsize,
        gate: Notify,
    }

    #[async_trait]
    impl IngressSource for GatedSource {
        async fn list(&self) -> Result<Vec<IngressSpec>, QueryError> {
            self.lists.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn triggers_during_a_pass_coalesce() {
        let source = Arc::new(GatedSource {
            lists: AtomicUsize::new(0),
            gate: Notify::new(),
        });
        let trigger = Trigger::default();
        let reconciler = reconciler(source.clone(), Arc::new(RoutingTable::new()), trigger.clone());
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(reconciler.run(async {
            let _ = stopped.await;
        }));

        trigger.notify();
        while source.lists.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        // Three changes while the first pass is blocked.
        trigger.notify();
        trigger.notify();
        trigger.notify();
        source.gate.notify_one();

        while source.lists.load(Ordering::SeqCst) < 2 {
            tokio::task::yield_now().await;
        }
        source.gate.notify_one();
        time::sleep(Duration::from_millis(50)).await;

        assert_eq!(source.lists.load(Ordering::SeqCst), 2);

        stop.send(()).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_resync() {
        let source = Arc::new(FakeIngresses::new(vec![]));
        let reconciler = reconciler(source.clone(), Arc::new(RoutingTable::new()), Trigger::default())
            .with_resync_period(Some(Duration::from_secs(30)));
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(reconciler.run(async {
            let _ = stopped.await;
        }));

        time::sleep(Duration::from_secs(29)).await;
        assert_eq!(source.lists(), 0);

        time::sleep(Duration::from_secs(62)).await;
        assert_eq!(source.lists(), 3);

        stop.send(()).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn sync_wait() {
        let (tx, rx) = oneshot::channel();
        tx.send(()).unwrap();
        assert!(wait_for_sync(rx, Duration::from_secs(1)).await.is_ok());

        let (tx, rx) = oneshot::channel::<()>();
        drop(tx);
        assert!(matches!(
            wait_for_sync(rx, Duration::from_secs(1)).await,
            Err(ReconcileError::CacheSync(_))
        ));

        let (_tx, rx) = oneshot::channel::<()>();
        assert!(matches!(
            wait_for_sync(rx, Duration::from_millis(10)).await,
            Err(ReconcileError::CacheSync(_))
        ));
    }
}
