pub mod builtin;
mod signals;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::error::{CheckError, NetworkError};
use crate::http::{HttpClient, ProbeRequest};
use crate::models::{Endpoint, Evidence, EvidenceType, Finding, OwaspCategory, ResponseInfo, Severity};

pub use signals::SensitiveFields;

/// A stateless check for one OWASP category.
///
/// `run` sees only what discovery captured, plus at most one confirmatory
/// request through the `ProbeBudget`.
#[async_trait]
pub trait Checker: Send + Sync {
    fn category(&self) -> OwaspCategory;

    fn name(&self) -> &'static str;

    fn applies(&self, endpoint: &Endpoint) -> bool;

    async fn run(
        &self,
        endpoint: &Endpoint,
        probe: &mut ProbeBudget<'_>,
    ) -> Result<Option<Finding>, CheckError>;
}

/// Allows a checker exactly one extra request against the target.
pub struct ProbeBudget<'a> {
    client: Option<&'a HttpClient>,
    used: bool,
}

impl<'a> ProbeBudget<'a> {
    pub fn new(client: &'a HttpClient) -> Self {
        Self {
            client: Some(client),
            used: false,
        }
    }

    /// Budget that never touches the network; probes come back empty.
    pub fn offline() -> Self {
        Self {
            client: None,
            used: false,
        }
    }

    pub fn is_used(&self) -> bool {
        self.used
    }

    /// Sends the confirmatory request. `Ok(None)` when running offline, when
    /// the request failed on the network or when the scan was cancelled; a
    /// second call is an error.
    pub async fn send(&mut self, request: ProbeRequest) -> Result<Option<ResponseInfo>, CheckError> {
        if self.used {
            return Err(CheckError::ProbeBudgetExhausted);
        }
        self.used = true;

        let Some(client) = self.client else {
            return Ok(None);
        };

        match client.send(&request).await {
            Ok(response) => Ok(Some(response)),
            Err(NetworkError::Cancelled) => {
                debug!(url = %request.url, "confirmatory probe skipped, scan cancelled");
                Ok(None)
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "confirmatory probe failed");
                Ok(None)
            }
        }
    }
}

/// Collects the issues one checker sees and folds them into a single
/// finding carrying the worst severity.
pub struct Observations {
    category: OwaspCategory,
    detector: &'static str,
    issues: Vec<(Severity, String, EvidenceType, String)>,
}

impl Observations {
    pub fn new(category: OwaspCategory, detector: &'static str) -> Self {
        Self {
            category,
            detector,
            issues: Vec::new(),
        }
    }

    pub fn add(
        &mut self,
        severity: Severity,
        description: impl Into<String>,
        evidence_type: EvidenceType,
        details: impl Into<String>,
    ) {
        self.issues
            .push((severity, description.into(), evidence_type, details.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn into_finding(self, endpoint: &Endpoint) -> Option<Finding> {
        let worst = self
            .issues
            .iter()
            .enumerate()
            .max_by_key(|(i, issue)| (issue.0, std::cmp::Reverse(*i)))
            .map(|(i, _)| i)?;

        let (severity, description, evidence_type, _) = &self.issues[worst];
        let details = self
            .issues
            .iter()
            .map(|(s, d, _, e)| format!("[{}] {}: {}", s.as_str(), d, e))
            .collect::<Vec<_>>()
            .join("; ");

        Some(Finding::new(
            endpoint,
            self.category,
            *severity,
            self.detector,
            description.clone(),
            Evidence::new(*evidence_type, details),
        ))
    }
}

/// Runs the fixed, category-ordered checker set against an endpoint.
pub struct RuleEngine {
    checkers: Vec<Box<dyn Checker>>,
}

impl RuleEngine {
    /// Engine with the built-in checkers for the given categories.
    pub fn new(enabled: &[OwaspCategory]) -> Self {
        let checkers = builtin::all_checkers()
            .into_iter()
            .filter(|c| enabled.contains(&c.category()))
            .collect();
        Self::with_checkers(checkers)
    }

    /// Engine over a custom checker set. Checkers are ordered by category;
    /// a second checker for an already covered category is dropped.
    pub fn with_checkers(mut checkers: Vec<Box<dyn Checker>>) -> Self {
        checkers.sort_by_key(|c| c.category());
        let mut seen = Vec::new();
        checkers.retain(|c| {
            if seen.contains(&c.category()) {
                warn!(checker = c.name(), category = %c.category(), "duplicate checker ignored");
                false
            } else {
                seen.push(c.category());
                true
            }
        });
        Self { checkers }
    }

    pub fn categories(&self) -> Vec<OwaspCategory> {
        self.checkers.iter().map(|c| c.category()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.checkers.is_empty()
    }

    /// Every checker runs regardless of its siblings' outcomes; results keep
    /// category order. A failing checker yields an inconclusive finding.
    pub async fn evaluate(&self, endpoint: &Endpoint, client: Option<&HttpClient>) -> Vec<Finding> {
        let runs = self.checkers.iter().map(|checker| async move {
            if !checker.applies(endpoint) {
                return None;
            }

            let mut budget = match client {
                Some(c) => ProbeBudget::new(c),
                None => ProbeBudget::offline(),
            };

            match checker.run(endpoint, &mut budget).await {
                Ok(finding) => finding,
                Err(e) => {
                    warn!(
                        checker = checker.name(),
                        endpoint = %endpoint.url,
                        error = %e,
                        "checker failed, recording inconclusive result"
                    );
                    Some(Finding::inconclusive(
                        endpoint,
                        checker.category(),
                        checker.name(),
                        e.to_string(),
                    ))
                }
            }
        });

        join_all(runs).await.into_iter().flatten().collect()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::BTreeMap;

    use crate::models::{Endpoint, HttpMethod, PathTemplate, ResponseInfo};

    pub fn endpoint(
        method: HttpMethod,
        base: &str,
        template: &str,
        status: u16,
        headers: &[(&str, &str)],
        body: &str,
    ) -> Endpoint {
        let template = PathTemplate::parse(template);
        let headers: BTreeMap<String, String> = headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let response = ResponseInfo::new(status, headers, body.as_bytes());
        Endpoint::new(
            format!("{}{}", base, template.resolve()),
            template.path.clone(),
            method,
            response,
        )
        .with_params(template.params)
    }

    pub fn get(template: &str, status: u16, headers: &[(&str, &str)], body: &str) -> Endpoint {
        endpoint(HttpMethod::Get, "http://example.test", template, status, headers, body)
    }
}
