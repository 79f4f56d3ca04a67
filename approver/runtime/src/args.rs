use crate::{
    core::{Evaluate, IssuerRef, Reconciler},
    index::Index,
    k8s::{watcher, CertificateRequest},
    lease,
    metrics::{ControllerMetrics, IndexMetrics},
    store::KubeStore,
    Controller,
};
use anyhow::{bail, Context, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tokio::{sync::mpsc, time::Duration};
use tracing::{info_span, Instrument};

const RESYNC_PERIOD: Duration = Duration::from_secs(60);

// The maximum number of keys to buffer between the watch and the controller.
// Keys that do not fit remain pending in the index and are picked up by the
// next resync.
const QUEUE_SIZE: usize = 1024;

#[derive(Debug, Parser)]
#[clap(
    name = "spiffe-approver",
    about = "Approves or denies cert-manager CertificateRequests for a SPIFFE issuer"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "spiffe_approver=info,warn",
        env = "SPIFFE_APPROVER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Name of the issuer whose requests are decided.
    #[clap(long)]
    issuer_name: String,

    #[clap(long, default_value = "ClusterIssuer")]
    issuer_kind: String,

    #[clap(long, default_value = "cert-manager.io")]
    issuer_group: String,

    /// Recorded as the reason of every condition written, and used as the
    /// field manager of status patches.
    #[clap(long, default_value = "spiffe.csi.cert-manager.io")]
    approver_name: String,

    #[clap(long, default_value = "cert-manager")]
    leader_election_namespace: String,

    #[clap(long, default_value = "cert-manager-csi-driver-spiffe-approver")]
    lease_name: String,

    #[clap(long, default_value = "5000")]
    patch_timeout_ms: u64,
}

impl Args {
    /// Parses arguments from the command line and runs the approver with the
    /// given policy until the process is signaled to shut down.
    #[inline]
    pub async fn parse_and_run<E>(evaluator: E) -> Result<()>
    where
        E: Evaluate + 'static,
    {
        Self::parse().run(evaluator).await
    }

    pub async fn run<E>(self, evaluator: E) -> Result<()>
    where
        E: Evaluate + 'static,
    {
        let Self {
            log_level,
            log_format,
            client,
            admin,
            issuer_name,
            issuer_kind,
            issuer_group,
            approver_name,
            leader_election_namespace,
            lease_name,
            patch_timeout_ms,
        } = self;

        let issuer = IssuerRef::new(issuer_name, issuer_kind, issuer_group);

        let mut prom = <Registry>::default();
        let approver = prom.sub_registry_with_prefix("approver");
        let controller_metrics = ControllerMetrics::register(approver);
        let index_metrics = IndexMetrics::register(approver);
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let hostname = std::env::var("HOSTNAME")
            .context("Failed to fetch `HOSTNAME` environment variable")?;

        let leader = lease::init(
            &runtime,
            &leader_election_namespace,
            &lease_name,
            &hostname,
        )
        .await?;

        tracing::info!(%issuer, approver = %approver_name, "Starting approver");

        let (queue_tx, queue_rx) = mpsc::channel(QUEUE_SIZE);
        let index = Index::shared(issuer.clone(), queue_tx, index_metrics);

        let requests = runtime.watch_all::<CertificateRequest>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), requests)
                .instrument(info_span!("certificaterequests")),
        );

        let store = KubeStore::new(
            runtime.client(),
            &approver_name,
            Duration::from_millis(patch_timeout_ms),
        );
        let reconciler = Arc::new(Reconciler::new(issuer, approver_name, evaluator, store));
        let controller = Controller::new(
            reconciler,
            index,
            leader,
            queue_rx,
            RESYNC_PERIOD,
            controller_metrics,
        );
        let shutdown = runtime.shutdown_handle();
        tokio::spawn(
            controller
                .run(async move {
                    let _ = shutdown.signaled().await;
                })
                .instrument(info_span!("approver")),
        );

        // Block the main thread on the shutdown signal. Once it fires, wait
        // for the background tasks to complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}
