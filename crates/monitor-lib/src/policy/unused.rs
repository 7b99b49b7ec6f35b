use std::collections::BTreeSet;

use crate::models::{FloatingIp, Finding, Rule, SecurityGroup, Subject, Volume};

/// Floating IPs not bound to any port
pub fn unused_floating_ips(site: &str, floating_ips: &[FloatingIp]) -> Option<Finding> {
    let down: Vec<&str> = floating_ips
        .iter()
        .filter(|ip| ip.is_down())
        .map(|ip| ip.address.as_str())
        .collect();
    if down.is_empty() {
        return None;
    }
    Some(Finding::warning(
        Subject::Site(site.to_string()),
        Rule::UnusedFloatingIps,
        format!("List of unused floating IPs: {}", down.join(", ")),
    ))
}

/// Volumes not attached to any VM, with the capacity they hold
pub fn unused_volumes(site: &str, volumes: &[Volume]) -> Option<Finding> {
    let available: Vec<&Volume> = volumes.iter().filter(|v| v.is_available()).collect();
    if available.is_empty() {
        return None;
    }
    let reclaimable: u64 = available.iter().map(|v| v.size_gb).sum();
    let labels: Vec<&str> = available.iter().map(|v| v.label()).collect();
    Some(Finding::warning(
        Subject::Site(site.to_string()),
        Rule::UnusedVolumes,
        format!(
            "List of unused volumes: {}. {} GB could be claimed back deleting unused volumes",
            labels.join(", "),
            reclaimable
        ),
    ))
}

/// Names of security groups attached to none of the scanned VMs
pub fn unused_security_group_names(
    groups: &[SecurityGroup],
    in_use: &BTreeSet<String>,
) -> BTreeSet<String> {
    groups
        .iter()
        .map(|g| g.name.clone())
        .filter(|name| !in_use.contains(name))
        .collect()
}

pub fn unused_security_groups(
    site: &str,
    groups: &[SecurityGroup],
    in_use: &BTreeSet<String>,
) -> Option<Finding> {
    let unused = unused_security_group_names(groups, in_use);
    if unused.is_empty() {
        return None;
    }
    let names: Vec<&str> = unused.iter().map(String::as_str).collect();
    Some(Finding::warning(
        Subject::Site(site.to_string()),
        Rule::UnusedSecurityGroups,
        format!("List of unused security groups: {}", names.join(", ")),
    ))
}
