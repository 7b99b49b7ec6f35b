//! Inventory reconciler
//!
//! Lists a site's instances and merges each list-view record with its
//! detail record and resolved metadata into [`VmFacts`]. VMs are reconciled
//! on a bounded pool whose output keeps the listing order; one VM failing
//! never affects the others.

use futures::stream::{self, StreamExt};
use tokio::sync::watch;

use crate::context::ScanContext;
use crate::error::{GatewayError, ScanError};
use crate::gateway::{Operation, Scope};
use crate::models::{Age, VmDetail, VmFacts, VmSummary};
use crate::resolve::{owner_facts, resolve_flavor, resolve_image};

/// Result of reconciling one listed VM
#[derive(Debug)]
pub enum VmOutcome {
    Reconciled(Box<VmFacts>),
    Failed {
        vm_id: String,
        name: String,
        error: GatewayError,
    },
}

impl VmOutcome {
    pub fn facts(&self) -> Option<&VmFacts> {
        match self {
            VmOutcome::Reconciled(facts) => Some(&**facts),
            VmOutcome::Failed { .. } => None,
        }
    }
}

/// Everything learned about a site's instances, in listing order
#[derive(Debug, Default)]
pub struct SiteInventory {
    pub listed: usize,
    /// VMs without a navigable reference
    pub skipped: usize,
    pub outcomes: Vec<VmOutcome>,
}

impl SiteInventory {
    pub fn facts(&self) -> impl Iterator<Item = &VmFacts> {
        self.outcomes.iter().filter_map(VmOutcome::facts)
    }

    pub fn reconciled(&self) -> usize {
        self.facts().count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.reconciled()
    }
}

/// List the site's instances; the only failure that aborts a site scan
pub async fn list_instances(ctx: &ScanContext) -> Result<Vec<VmSummary>, ScanError> {
    ctx.fetch(Operation::ServerList, Scope::Vo)
        .await
        .map_err(|source| ScanError::ProviderUnavailable {
            site: ctx.site().name.clone(),
            source,
        })
}

/// Reconcile one VM. `Ok(None)` when the summary has no provider reference.
pub async fn reconcile(
    ctx: &ScanContext,
    summary: &VmSummary,
) -> Result<Option<VmFacts>, GatewayError> {
    let Some(id) = summary.reference() else {
        return Ok(None);
    };
    let detail: VmDetail = ctx
        .fetch(Operation::ServerShow { id: id.to_string() }, Scope::Vo)
        .await?;

    let addresses = summary.addresses();
    let flavor = async {
        match summary.flavor.as_deref() {
            Some(name) => resolve_flavor(ctx, name).await,
            None => None,
        }
    };
    let (flavor, image, owner, ssh, cups) = tokio::join!(
        flavor,
        resolve_image(
            ctx,
            summary.image_name.as_deref(),
            summary.image_id.as_deref(),
            &detail.attached_volumes,
        ),
        owner_facts(ctx, detail.user_id.as_deref()),
        ctx.prober().ssh(&addresses),
        ctx.prober().cups(&addresses),
    );

    Ok(Some(VmFacts {
        id: id.to_string(),
        name: summary.name.clone(),
        status: summary.status.clone(),
        age: Age::since(detail.created_at.as_deref(), ctx.now()),
        orchestrator_id: detail.orchestrator_id(),
        security_groups: detail.security_groups,
        created_at: detail.created_at,
        addresses,
        flavor,
        image,
        owner,
        ssh,
        cups,
    }))
}

async fn reconcile_isolated(ctx: &ScanContext, summary: &VmSummary) -> Option<VmOutcome> {
    match reconcile(ctx, summary).await {
        Ok(Some(facts)) => {
            ctx.logger()
                .log_vm_reconciled(&facts.id, facts.status.as_str(), &facts.image);
            Some(VmOutcome::Reconciled(Box::new(facts)))
        }
        Ok(None) => {
            ctx.logger().log_vm_skipped(&summary.name);
            None
        }
        Err(error) => {
            let vm_id = summary.reference().unwrap_or_default().to_string();
            ctx.logger().log_vm_failed(&vm_id, &error.to_string());
            Some(VmOutcome::Failed {
                vm_id,
                name: summary.name.clone(),
                error,
            })
        }
    }
}

/// Resolves once the shutdown flag is raised. Never resolves if the sender
/// is gone without having raised it.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// List and reconcile every VM of the site.
///
/// At most `concurrency` VMs are in flight; outcomes keep listing order.
/// Raising `shutdown` stops the scan before the next VM completes.
pub async fn scan(
    ctx: &ScanContext,
    concurrency: usize,
    mut shutdown: watch::Receiver<bool>,
) -> Result<SiteInventory, ScanError> {
    let summaries = list_instances(ctx).await?;
    ctx.logger().log_scan_started(summaries.len());

    let mut inventory = SiteInventory {
        listed: summaries.len(),
        ..SiteInventory::default()
    };
    let mut pool = stream::iter(summaries.iter())
        .map(|summary| reconcile_isolated(ctx, summary))
        .buffered(concurrency.max(1));

    loop {
        tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => {
                return Err(ScanError::Cancelled {
                    site: ctx.site().name.clone(),
                });
            }
            next = pool.next() => match next {
                Some(Some(outcome)) => inventory.outcomes.push(outcome),
                Some(None) => inventory.skipped += 1,
                None => break,
            },
        }
    }

    Ok(inventory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AgeUnit, VmStatus};
    use crate::testing::{test_site, MockGateway};
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn show(id: &str) -> Operation {
        Operation::ServerShow { id: id.to_string() }
    }

    fn listing() -> serde_json::Value {
        json!([
            {"ID": "vm-1", "Name": "first", "Status": "ACTIVE", "Flavor": "m1.small",
             "Image Name": "Ubuntu 22.04", "Image ID": "img-1",
             "Networks": {"public": ["193.1.2.3"]}},
            {"ID": "", "Name": "ghost", "Status": "ERROR"},
            {"ID": "vm-2", "Name": "second", "Status": "SHUTOFF", "Flavor": "m1.small",
             "Image Name": "", "Image ID": "", "Networks": {}},
            {"ID": "vm-3", "Name": "third", "Status": "ACTIVE", "Flavor": "m1.small",
             "Image Name": "Rocky 9", "Image ID": "img-3", "Networks": {}}
        ])
    }

    fn detail(created_at: &str, groups: &[&str]) -> serde_json::Value {
        let groups: Vec<_> = groups.iter().map(|g| json!({"name": g})).collect();
        json!({
            "created_at": created_at,
            "user_id": "u-1",
            "security_groups": groups,
            "properties": {},
            "attached_volumes": []
        })
    }

    fn gateway() -> MockGateway {
        MockGateway::new()
            .reply(Operation::ServerList, Scope::Vo, listing())
            .reply(
                Operation::FlavorList,
                Scope::Vo,
                json!([{"Name": "m1.small", "VCPUs": 1, "RAM": 2048, "Disk": 20}]),
            )
            .reply(
                Operation::UserList { domain_id: None },
                Scope::Vo,
                json!([{"ID": "u-1", "Name": "jdoe@egi.eu"}]),
            )
            .reply(show("vm-1"), Scope::Vo, detail("2024-05-01T00:00:00Z", &["default", "ssh"]))
            .reply(show("vm-2"), Scope::Vo, detail("2024-05-20T00:00:00Z", &["default"]))
            .reply(show("vm-3"), Scope::Vo, detail("2024-05-30T00:00:00Z", &["web"]))
    }

    fn context(gateway: MockGateway) -> (ScanContext, Arc<MockGateway>) {
        let gateway = Arc::new(gateway);
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        (
            ScanContext::new(test_site(), gateway.clone()).with_now(now),
            gateway,
        )
    }

    #[tokio::test]
    async fn test_scan_keeps_listing_order_and_skips_unreferenced() {
        // vm-1 answers slowest, so completion order differs from listing order
        let (ctx, _) = context(gateway().delay(show("vm-1"), Duration::from_millis(50)));
        let (_tx, rx) = watch::channel(false);

        let inventory = scan(&ctx, 4, rx).await.unwrap();

        assert_eq!(inventory.listed, 4);
        assert_eq!(inventory.skipped, 1);
        let ids: Vec<_> = inventory.facts().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["vm-1", "vm-2", "vm-3"]);
    }

    #[tokio::test]
    async fn test_reconciled_facts() {
        let (ctx, gateway) = context(gateway());
        let (_tx, rx) = watch::channel(false);

        let inventory = scan(&ctx, 2, rx).await.unwrap();
        let first = inventory.facts().next().unwrap();

        assert_eq!(first.status, VmStatus::Active);
        assert_eq!(first.image, "Ubuntu 22.04");
        assert_eq!(first.flavor.as_ref().unwrap().vcpus, 1);
        assert_eq!(first.owner.as_ref().unwrap().label(), "jdoe@egi.eu");
        assert_eq!(first.age.whole(AgeUnit::Days), Some(31));
        assert_eq!(first.addresses, vec!["193.1.2.3"]);
        assert!(first.ssh.is_none());
        assert_eq!(gateway.count("flavor list"), 1);
        assert_eq!(gateway.count("user list"), 1);
    }

    #[tokio::test]
    async fn test_detail_failure_isolated_to_one_vm() {
        let (ctx, _) = context(gateway().fail(show("vm-2"), Scope::Vo));
        let (_tx, rx) = watch::channel(false);

        let inventory = scan(&ctx, 4, rx).await.unwrap();

        assert_eq!(inventory.reconciled(), 2);
        assert_eq!(inventory.failed(), 1);
        assert!(matches!(
            &inventory.outcomes[1],
            VmOutcome::Failed { vm_id, .. } if vm_id == "vm-2"
        ));
    }

    #[tokio::test]
    async fn test_listing_failure_aborts_site() {
        let (ctx, _) = context(MockGateway::new().fail(Operation::ServerList, Scope::Vo));
        let (_tx, rx) = watch::channel(false);

        let err = scan(&ctx, 4, rx).await.unwrap_err();
        assert!(matches!(err, ScanError::ProviderUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_cancellation_between_vms() {
        let (ctx, _) = context(
            gateway()
                .delay(show("vm-1"), Duration::from_millis(200))
                .delay(show("vm-2"), Duration::from_millis(200))
                .delay(show("vm-3"), Duration::from_millis(200)),
        );
        let (tx, rx) = watch::channel(false);

        let cancel = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            tx.send(true).unwrap();
        };
        let (result, _) = tokio::join!(scan(&ctx, 1, rx), cancel);

        assert!(matches!(result, Err(ScanError::Cancelled { .. })));
    }

    #[tokio::test]
    async fn test_missing_creation_time_is_invalid_age() {
        let (ctx, _) = context(gateway().reply(
            show("vm-3"),
            Scope::Vo,
            json!({"user_id": "u-1", "security_groups": [], "properties": {}}),
        ));
        let summaries = list_instances(&ctx).await.unwrap();

        let facts = reconcile(&ctx, &summaries[3]).await.unwrap().unwrap();
        assert!(matches!(facts.age, Age::Invalid(_)));
        assert_eq!(facts.age.whole(AgeUnit::Hours), None);
    }
}
