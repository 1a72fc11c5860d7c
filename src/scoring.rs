//! Aggregate risk per endpoint.

use crate::models::{EndpointReport, Finding, Tier};

/// Folds an endpoint's findings into a single severity tier.
pub struct RiskScorer;

impl RiskScorer {
    /// Highest severity present, or `Tier::None` for an empty list.
    pub fn score(findings: &[Finding]) -> Tier {
        findings
            .iter()
            .map(|f| Tier::from(f.severity))
            .max()
            .unwrap_or(Tier::None)
    }

    /// The finding shown as an endpoint's headline: highest severity, the
    /// earlier OWASP category on ties.
    pub fn headline(findings: &[Finding]) -> Option<&Finding> {
        findings
            .iter()
            .min_by_key(|f| (std::cmp::Reverse(f.severity), f.category))
    }

    /// Sets the report's tier once all of its findings are in.
    pub fn apply(report: &mut EndpointReport) {
        report.tier = Some(Self::score(&report.findings));
    }
}
