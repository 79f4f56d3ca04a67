use crate::k8s::{self, ObjectMeta};
use anyhow::Result;
use k8s_openapi::api::coordination::v1 as coordv1;
use kubert::lease::Claim;
use std::sync::Arc;
use tokio::{sync::watch, time};
use tracing::{info_span, Instrument};

const LEASE_DURATION: time::Duration = time::Duration::from_secs(30);
const RENEW_GRACE_PERIOD: time::Duration = time::Duration::from_secs(1);
const FIELD_MANAGER: &str = "spiffe-approver";

/// Claims the approver's write lease and returns a watch that is true while
/// this replica holds it.
pub async fn init<T>(
    runtime: &kubert::Runtime<T>,
    ns: &str,
    lease_name: &str,
    claimant: &str,
) -> Result<watch::Receiver<bool>> {
    let lease = coordv1::Lease {
        metadata: ObjectMeta {
            name: Some(lease_name.to_string()),
            namespace: Some(ns.to_string()),
            // Specifying a resource version of "0" means that we will
            // only create the Lease if it does not already exist.
            resource_version: Some("0".to_string()),
            labels: Some(
                [(
                    "app.kubernetes.io/component".to_string(),
                    "approver".to_string(),
                )]
                .into_iter()
                .collect(),
            ),
            ..Default::default()
        },
        spec: None,
    };
    let api = k8s::Api::<coordv1::Lease>::namespaced(runtime.client(), ns);
    match api
        .patch(
            lease_name,
            &k8s::PatchParams {
                field_manager: Some(FIELD_MANAGER.to_string()),
                ..Default::default()
            },
            &k8s::Patch::Apply(lease),
        )
        .await
    {
        Ok(lease) => tracing::info!(?lease, "Created Lease resource"),
        Err(k8s::Error::Api(_)) => tracing::debug!("Lease already exists, no need to create it"),
        Err(error) => {
            return Err(error.into());
        }
    };

    let params = kubert::lease::ClaimParams {
        lease_duration: LEASE_DURATION,
        renew_grace_period: RENEW_GRACE_PERIOD,
    };
    let (claims, _task) = kubert::lease::LeaseManager::init(api, lease_name)
        .await?
        .spawn(claimant, params)
        .await?;

    let (tx, rx) = watch::channel(claims.borrow().is_current_for(claimant));
    tokio::spawn(
        leadership(claims, claimant.to_string(), tx).instrument(info_span!("leadership")),
    );
    Ok(rx)
}

/// Publishes whether `claimant` holds the lease.
///
/// A claim can lapse without the claim watch changing (e.g. when renewals
/// stop reaching the API server), so the claim is also rechecked on every
/// renew grace period.
async fn leadership(
    mut claims: watch::Receiver<Arc<Claim>>,
    claimant: String,
    tx: watch::Sender<bool>,
) {
    let mut recheck = time::interval(RENEW_GRACE_PERIOD);
    recheck.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            res = claims.changed() => {
                if res.is_err() {
                    break;
                }
            }
            _ = recheck.tick() => {}
            _ = tx.closed() => return,
        }

        let leader = claims.borrow_and_update().is_current_for(&claimant);
        tx.send_if_modified(|current| {
            if *current == leader {
                return false;
            }
            tracing::info!(leader, "Leadership changed");
            *current = leader;
            true
        });
    }

    tracing::warn!("Lease claims closed");
    let _ = tx.send(false);
}
