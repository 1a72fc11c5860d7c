use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{Endpoint, Finding, Severity};

/// Aggregate risk of one endpoint: the highest finding severity, or `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    None,
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl From<Severity> for Tier {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Info => Tier::Info,
            Severity::Low => Tier::Low,
            Severity::Medium => Tier::Medium,
            Severity::High => Tier::High,
            Severity::Critical => Tier::Critical,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Tier::None => "NONE",
            Tier::Info => "INFO",
            Tier::Low => "LOW",
            Tier::Medium => "MEDIUM",
            Tier::High => "HIGH",
            Tier::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointReport {
    pub endpoint: Endpoint,
    pub findings: Vec<Finding>,
    pub tier: Option<Tier>,
}

impl EndpointReport {
    pub fn new(endpoint: Endpoint, findings: Vec<Finding>) -> Self {
        Self {
            endpoint,
            findings,
            tier: None,
        }
    }

    pub fn push_finding(&mut self, finding: Finding) {
        self.findings.push(finding);
    }

    /// Tier assigned by the scorer, `Tier::None` until then.
    pub fn tier(&self) -> Tier {
        self.tier.unwrap_or(Tier::None)
    }

    pub fn is_vulnerable(&self) -> bool {
        self.findings
            .iter()
            .any(|f| f.severity > Severity::Info && !f.is_inconclusive())
    }
}

/// Per-target lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetState {
    Pending,
    Discovering,
    Evaluating,
    Dispatching,
    Done,
    Failed,
}

impl TargetState {
    pub fn can_transition_to(self, next: TargetState) -> bool {
        use TargetState::*;
        matches!(
            (self, next),
            (Pending, Discovering)
                | (Pending, Failed)
                | (Discovering, Evaluating)
                | (Discovering, Failed)
                | (Evaluating, Dispatching)
                | (Dispatching, Done)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TargetState::Done | TargetState::Failed)
    }
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IssueKind {
    Network,
    TargetUnreachable,
    CheckerInternal,
    Adapter,
    Configuration,
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanIssue {
    pub kind: IssueKind,
    pub endpoint: Option<String>,
    pub message: String,
}

impl ScanIssue {
    pub fn new(kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            endpoint: None,
            message: message.into(),
        }
    }

    pub fn for_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub target: String,
    pub state: TargetState,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub requests_sent: usize,
    pub sqli_dispatches: usize,
    pub interrupted: bool,
    pub endpoints: Vec<EndpointReport>,
    pub errors: Vec<ScanIssue>,
    pub warnings: Vec<ScanIssue>,
}

impl ScanReport {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            state: TargetState::Pending,
            started_at: Utc::now(),
            finished_at: None,
            requests_sent: 0,
            sqli_dispatches: 0,
            interrupted: false,
            endpoints: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.state == TargetState::Failed
    }

    pub fn finding_count(&self) -> usize {
        self.endpoints.iter().map(|e| e.findings.len()).sum()
    }

    pub fn duration_ms(&self) -> u64 {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds().max(0) as u64)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanSummary {
    pub targets: usize,
    pub failed_targets: usize,
    pub total_endpoints: usize,
    pub critical_count: usize,
    pub high_count: usize,
    pub medium_count: usize,
    pub low_count: usize,
    pub info_count: usize,
    pub ok_count: usize,
}

impl ScanSummary {
    pub fn from_reports(reports: &[ScanReport]) -> Self {
        let mut summary = Self {
            targets: reports.len(),
            ..Self::default()
        };

        for report in reports {
            if report.is_failed() {
                summary.failed_targets += 1;
            }
            for endpoint in &report.endpoints {
                summary.total_endpoints += 1;
                match endpoint.tier() {
                    Tier::Critical => summary.critical_count += 1,
                    Tier::High => summary.high_count += 1,
                    Tier::Medium => summary.medium_count += 1,
                    Tier::Low => summary.low_count += 1,
                    Tier::Info => summary.info_count += 1,
                    Tier::None => summary.ok_count += 1,
                }
            }
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions_forward_only() {
        assert!(TargetState::Pending.can_transition_to(TargetState::Discovering));
        assert!(TargetState::Discovering.can_transition_to(TargetState::Failed));
        assert!(TargetState::Dispatching.can_transition_to(TargetState::Done));
        assert!(!TargetState::Done.can_transition_to(TargetState::Discovering));
        assert!(!TargetState::Evaluating.can_transition_to(TargetState::Failed));
        assert!(!TargetState::Pending.can_transition_to(TargetState::Done));
    }

    #[test]
    fn test_tier_ordering_matches_severity() {
        assert!(Tier::Critical > Tier::High);
        assert!(Tier::Info > Tier::None);
        assert_eq!(Tier::from(Severity::Medium), Tier::Medium);
    }
}
