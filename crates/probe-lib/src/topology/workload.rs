//! Workload controller names derived from pod naming conventions

use std::fmt;

/// Controller kind implied by a pod name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadKind {
    Deployment,
    DaemonSet,
    StatefulSet,
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WorkloadKind::Deployment => "Deployment",
            WorkloadKind::DaemonSet => "DaemonSet",
            WorkloadKind::StatefulSet => "StatefulSet",
        })
    }
}

/// Lowercase alphanumeric segment with a length in `range`
fn is_suffix(segment: &str, range: std::ops::RangeInclusive<usize>) -> bool {
    range.contains(&segment.len())
        && segment
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
}

/// Name and kind of the controller owning a pod, if the name follows a convention
///
/// Conventions are tried in order and the first match wins:
/// `<name>-<replicaset hash>-<pod suffix>` for deployments,
/// `<name>-<pod suffix>` for daemon sets and `<name>-<ordinal>` for
/// stateful sets.
pub fn extract_workload_name(pod: &str) -> Option<(String, WorkloadKind)> {
    if let Some((rest, suffix)) = pod.rsplit_once('-') {
        if let Some((name, hash)) = rest.rsplit_once('-') {
            if !name.is_empty() && is_suffix(hash, 6..=10) && is_suffix(suffix, 5..=5) {
                return Some((name.to_string(), WorkloadKind::Deployment));
            }
        }
        if !rest.is_empty() && is_suffix(suffix, 5..=5) {
            return Some((rest.to_string(), WorkloadKind::DaemonSet));
        }
        if !rest.is_empty() && !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) {
            return Some((rest.to_string(), WorkloadKind::StatefulSet));
        }
    }
    None
}
