//! Confirmed remediation
//!
//! Deletion is only ever attempted for deletion-eligible findings, after
//! the report is complete and an operator has confirmed each VM.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;

use crate::audit::SiteReport;
use crate::context::ScanContext;
use crate::error::GatewayError;
use crate::gateway::{Operation, Scope};

/// One VM proposed for deletion
#[derive(Debug, Clone, Serialize)]
pub struct DeletionRequest {
    pub site: String,
    pub vm_id: String,
    pub vm_name: Option<String>,
    pub reason: String,
}

/// Decides whether a proposed deletion goes ahead
#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn confirm(&self, request: &DeletionRequest) -> bool;
}

/// Declines every request
pub struct NeverConfirm;

#[async_trait]
impl Confirmer for NeverConfirm {
    async fn confirm(&self, _request: &DeletionRequest) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum DeletionStatus {
    Declined,
    Deleted,
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct DeletionOutcome {
    pub request: DeletionRequest,
    pub status: DeletionStatus,
}

/// Issue `server delete` for one VM of the context's site
pub async fn delete_instance(ctx: &ScanContext, vm_id: &str) -> Result<(), GatewayError> {
    ctx.call(
        &Operation::ServerDelete {
            id: vm_id.to_string(),
        },
        Scope::Vo,
    )
    .await
    .map(|_| ())
}

/// Deletion requests for the report's eligible VMs, once per VM in report order
pub fn deletion_requests(report: &SiteReport) -> Vec<DeletionRequest> {
    let mut seen = HashSet::new();
    report
        .deletion_candidates()
        .filter_map(|finding| {
            let vm_id = finding.vm_id()?;
            if !seen.insert(vm_id.to_string()) {
                return None;
            }
            Some(DeletionRequest {
                site: report.site.clone(),
                vm_id: vm_id.to_string(),
                vm_name: report.vm(vm_id).map(|vm| vm.name.clone()),
                reason: finding.message.clone(),
            })
        })
        .collect()
}

/// Ask the confirmer about each eligible VM and delete the confirmed ones.
/// A failed deletion is logged and returned; it never stops the others.
pub async fn execute_deletions(
    ctx: &ScanContext,
    report: &SiteReport,
    confirmer: &dyn Confirmer,
) -> Vec<DeletionOutcome> {
    let mut outcomes = Vec::new();
    for request in deletion_requests(report) {
        let status = if !confirmer.confirm(&request).await {
            ctx.logger()
                .log_deletion(&request.vm_id, false, "declined by operator");
            DeletionStatus::Declined
        } else {
            match delete_instance(ctx, &request.vm_id).await {
                Ok(()) => {
                    ctx.logger().log_deletion(&request.vm_id, true, "deleted");
                    DeletionStatus::Deleted
                }
                Err(e) => {
                    let detail = e.to_string();
                    ctx.logger().log_deletion(&request.vm_id, false, &detail);
                    DeletionStatus::Failed(detail)
                }
            }
        };
        outcomes.push(DeletionOutcome { request, status });
    }
    outcomes
}
