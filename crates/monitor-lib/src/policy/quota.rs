use crate::models::{Finding, QuotaEntry, QuotaSnapshot, Rule, Subject};

/// Outcome of one quota ratio check
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RatioOutcome {
    /// `ratio` is `None` when the numerator is unlimited
    Satisfied { ratio: Option<f64> },
    Violated { ratio: f64 },
    /// The ratio is undefined for this snapshot
    Skipped,
}

#[derive(Debug, Clone)]
pub struct QuotaPolicy {
    pub min_ram_gib_per_core: f64,
    pub min_secgroups_per_instance: f64,
    pub min_floating_ips_per_instance: f64,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            min_ram_gib_per_core: 1.0,
            min_secgroups_per_instance: 3.0,
            min_floating_ips_per_instance: 1.0,
        }
    }
}

/// Ratio of two quota limits. Missing, zero or unlimited denominators and
/// missing numerators make the ratio undefined.
fn ratio(
    numerator: Option<QuotaEntry>,
    denominator: Option<QuotaEntry>,
    numerator_scale: f64,
    minimum: f64,
) -> RatioOutcome {
    let Some(denominator) = denominator.and_then(|d| d.limit).filter(|&d| d > 0) else {
        return RatioOutcome::Skipped;
    };
    let Some(numerator) = numerator else {
        return RatioOutcome::Skipped;
    };
    let Some(limit) = numerator.limit else {
        return RatioOutcome::Satisfied { ratio: None };
    };
    let ratio = limit as f64 / numerator_scale / denominator as f64;
    if ratio < minimum {
        RatioOutcome::Violated { ratio }
    } else {
        RatioOutcome::Satisfied { ratio: Some(ratio) }
    }
}

impl QuotaPolicy {
    /// The three ratio checks, in report order. A site whose instance limit
    /// is zero cannot run VMs, so every check is skipped for it.
    pub fn ratio_checks(&self, quota: &QuotaSnapshot) -> [(Rule, RatioOutcome); 3] {
        if quota.instances.and_then(|i| i.limit) == Some(0) {
            return [
                (Rule::RamPerCore, RatioOutcome::Skipped),
                (Rule::SecurityGroupsPerInstance, RatioOutcome::Skipped),
                (Rule::FloatingIpsPerInstance, RatioOutcome::Skipped),
            ];
        }
        [
            (
                Rule::RamPerCore,
                ratio(quota.ram_mb, quota.cores, 1024.0, self.min_ram_gib_per_core),
            ),
            (
                Rule::SecurityGroupsPerInstance,
                ratio(
                    quota.secgroups,
                    quota.instances,
                    1.0,
                    self.min_secgroups_per_instance,
                ),
            ),
            (
                Rule::FloatingIpsPerInstance,
                ratio(
                    quota.floating_ips,
                    quota.instances,
                    1.0,
                    self.min_floating_ips_per_instance,
                ),
            ),
        ]
    }

    /// Usage as one info finding per quota resource, followed by a site
    /// warning per violated ratio
    pub fn evaluate(&self, site: &str, quota: &QuotaSnapshot) -> Vec<Finding> {
        let mut findings: Vec<Finding> = quota
            .display_entries()
            .into_iter()
            .map(|(name, entry)| {
                Finding::info(
                    Subject::Resource(name.to_string()),
                    Rule::QuotaUsage,
                    usage_message(name, &entry),
                )
            })
            .collect();

        for (rule, outcome) in self.ratio_checks(quota) {
            let RatioOutcome::Violated { ratio } = outcome else {
                continue;
            };
            let message = match rule {
                Rule::RamPerCore => format!(
                    "Less than {} GB RAM per available CPU ({:.2})",
                    self.min_ram_gib_per_core, ratio
                ),
                Rule::SecurityGroupsPerInstance => format!(
                    "Less than {} security groups per instance ({:.2})",
                    self.min_secgroups_per_instance, ratio
                ),
                _ => format!(
                    "Less than {} floating IPs per instance ({:.2})",
                    self.min_floating_ips_per_instance, ratio
                ),
            };
            findings.push(Finding::warning(Subject::Site(site.to_string()), rule, message));
        }
        findings
    }
}

fn usage_message(name: &str, entry: &QuotaEntry) -> String {
    let limit = entry
        .limit
        .map_or_else(|| "unlimited".to_string(), |l| l.to_string());
    match entry.usage_percent() {
        Some(percent) => format!(
            "{}: Limit: {}, Used: {} ({}%)",
            name,
            limit,
            entry.in_use,
            percent.round()
        ),
        None => format!("{}: Limit: {}, Used: {}", name, limit, entry.in_use),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{QuotaRow, Severity};

    fn snapshot(rows: &[(&str, i64, i64)]) -> QuotaSnapshot {
        let rows: Vec<QuotaRow> = rows
            .iter()
            .map(|(resource, limit, in_use)| QuotaRow {
                resource: resource.to_string(),
                limit: Some(*limit),
                in_use: *in_use,
            })
            .collect();
        QuotaSnapshot::from_rows(&rows)
    }

    fn warnings(findings: &[Finding], rule: Rule) -> usize {
        findings
            .iter()
            .filter(|f| f.rule == rule && f.severity == Severity::Warning)
            .count()
    }

    #[test]
    fn test_low_ram_per_core_warns() {
        let quota = snapshot(&[("cores", 4, 1), ("ram", 2048, 512)]);
        let policy = QuotaPolicy::default();

        let checks = policy.ratio_checks(&quota);
        assert_eq!(checks[0], (Rule::RamPerCore, RatioOutcome::Violated { ratio: 0.5 }));

        let findings = policy.evaluate("SITE", &quota);
        assert_eq!(warnings(&findings, Rule::RamPerCore), 1);
    }

    #[test]
    fn test_zero_cores_skips_ram_check() {
        let quota = snapshot(&[("cores", 0, 0), ("ram", 2048, 0)]);
        let policy = QuotaPolicy::default();

        assert_eq!(policy.ratio_checks(&quota)[0].1, RatioOutcome::Skipped);
        assert_eq!(warnings(&policy.evaluate("SITE", &quota), Rule::RamPerCore), 0);
    }

    #[test]
    fn test_zero_instances_skips_every_ratio() {
        let quota = snapshot(&[
            ("cores", 8, 0),
            ("ram", 1024, 0),
            ("instances", 0, 0),
            ("secgroups", 1, 0),
            ("floating-ips", 0, 0),
        ]);
        let checks = QuotaPolicy::default().ratio_checks(&quota);
        assert!(checks.iter().all(|(_, o)| *o == RatioOutcome::Skipped));
    }

    #[test]
    fn test_missing_and_unlimited_quotas() {
        let policy = QuotaPolicy::default();

        let missing = snapshot(&[("instances", 10, 2)]);
        let checks = policy.ratio_checks(&missing);
        assert_eq!(checks[0].1, RatioOutcome::Skipped);
        assert_eq!(checks[1].1, RatioOutcome::Skipped);

        let unlimited = snapshot(&[
            ("instances", 10, 2),
            ("secgroups", -1, 4),
            ("floating-ips", 20, 1),
        ]);
        let checks = policy.ratio_checks(&unlimited);
        assert_eq!(checks[1].1, RatioOutcome::Satisfied { ratio: None });
        assert_eq!(checks[2].1, RatioOutcome::Satisfied { ratio: Some(2.0) });

        let unlimited_instances = snapshot(&[("instances", -1, 2), ("secgroups", 10, 4)]);
        assert_eq!(policy.ratio_checks(&unlimited_instances)[1].1, RatioOutcome::Skipped);
    }

    #[test]
    fn test_usage_findings() {
        let quota = snapshot(&[
            ("cores", 40, 10),
            ("ram", 102_400, 20_480),
            ("secgroups", -1, 3),
        ]);
        let findings = QuotaPolicy::default().evaluate("SITE", &quota);

        let usage: Vec<_> = findings
            .iter()
            .filter(|f| f.rule == Rule::QuotaUsage)
            .map(|f| f.message.as_str())
            .collect();
        assert_eq!(
            usage,
            vec![
                "cores: Limit: 40, Used: 10 (25%)",
                "ram (GB): Limit: 100, Used: 20 (20%)",
                "secgroups: Limit: unlimited, Used: 3",
            ]
        );
        assert!(findings
            .iter()
            .filter(|f| f.rule == Rule::QuotaUsage)
            .all(|f| f.severity == Severity::Info));
        assert_eq!(findings[0].subject, Subject::Resource("cores".to_string()));
        assert_eq!(findings[1].subject.to_string(), "resource ram (GB)");
    }

    #[test]
    fn test_ratio_warnings_are_about_the_site() {
        let quota = snapshot(&[("cores", 4, 1), ("ram", 2048, 512)]);
        let findings = QuotaPolicy::default().evaluate("SITE", &quota);

        let warning = findings
            .iter()
            .find(|f| f.rule == Rule::RamPerCore)
            .unwrap();
        assert_eq!(warning.subject, Subject::Site("SITE".to_string()));
    }
}
