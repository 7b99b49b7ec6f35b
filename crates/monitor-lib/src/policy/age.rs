use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::InvalidMaxAge;
use crate::models::{Age, AgeUnit, Finding, Rule, Subject, VmFacts};

/// Maximum lifetime of an ACTIVE VM, e.g. `90d` or `72h`. A bare number is
/// a number of days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MaxAge {
    pub value: u64,
    pub unit: AgeUnit,
}

impl MaxAge {
    pub fn days(value: u64) -> Self {
        Self {
            value,
            unit: AgeUnit::Days,
        }
    }

    pub fn hours(value: u64) -> Self {
        Self {
            value,
            unit: AgeUnit::Hours,
        }
    }
}

impl Default for MaxAge {
    fn default() -> Self {
        Self::days(90)
    }
}

impl FromStr for MaxAge {
    type Err = InvalidMaxAge;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let text = raw.trim().to_ascii_lowercase();
        let (digits, unit) = if let Some(d) = text.strip_suffix('d') {
            (d, AgeUnit::Days)
        } else if let Some(h) = text.strip_suffix('h') {
            (h, AgeUnit::Hours)
        } else {
            (text.as_str(), AgeUnit::Days)
        };
        let value = digits
            .trim()
            .parse()
            .map_err(|_| InvalidMaxAge(raw.to_string()))?;
        Ok(Self { value, unit })
    }
}

impl TryFrom<String> for MaxAge {
    type Error = InvalidMaxAge;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        raw.parse()
    }
}

impl From<MaxAge> for String {
    fn from(max: MaxAge) -> Self {
        max.to_string()
    }
}

impl fmt::Display for MaxAge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let suffix = match self.unit {
            AgeUnit::Days => 'd',
            AgeUnit::Hours => 'h',
        };
        write!(f, "{}{}", self.value, suffix)
    }
}

/// Flags ACTIVE VMs that outlived the maximum age.
///
/// The threshold is exclusive: a VM exactly `max` whole units old is kept.
/// An ACTIVE VM without a usable creation time is flagged as well.
#[derive(Debug, Clone)]
pub struct AgePolicy {
    max_age: MaxAge,
}

impl AgePolicy {
    pub fn new(max_age: MaxAge) -> Self {
        Self { max_age }
    }

    pub fn max_age(&self) -> MaxAge {
        self.max_age
    }

    pub fn is_stale(&self, vm: &VmFacts) -> bool {
        vm.status.is_active()
            && vm
                .age
                .whole(self.max_age.unit)
                .map_or(true, |elapsed| elapsed > self.max_age.value)
    }

    pub fn evaluate(&self, vm: &VmFacts) -> Option<Finding> {
        if !self.is_stale(vm) {
            return None;
        }
        let subject = Subject::Vm(vm.id.clone());
        let finding = match &vm.age {
            Age::Elapsed { .. } => Finding::warning(
                subject,
                Rule::StaleVm,
                format!(
                    "VM elapsed time ({}) exceeds the maximum of {} {}",
                    vm.age, self.max_age.value, self.max_age.unit
                ),
            ),
            Age::Invalid(fault) => Finding::warning(
                subject,
                Rule::InvalidCreationTime,
                format!("VM age cannot be determined: {}", fault),
            ),
        };
        Some(finding.eligible_for_deletion())
    }
}
