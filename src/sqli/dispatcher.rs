use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::{InjectionRequest, SqliAnalyzer, Verdict};
use crate::config::SqliConfig;
use crate::error::AdapterError;
use crate::models::{Endpoint, Evidence, EvidenceType, Finding, OwaspCategory, Severity};

pub const DETECTOR_NAME: &str = "sqli-analyzer";

/// Per-target allowance of analyzer invocations.
#[derive(Debug, Clone)]
pub struct DispatchBudget {
    cap: usize,
    used: usize,
}

impl DispatchBudget {
    pub fn new(cap: usize) -> Self {
        Self { cap, used: 0 }
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn is_exhausted(&self) -> bool {
        self.used >= self.cap
    }

    fn take(&mut self) -> bool {
        if self.is_exhausted() {
            return false;
        }
        self.used += 1;
        true
    }
}

/// Decides which endpoints go to the external analyzer and turns its
/// verdict into a finding.
pub struct SqliDispatcher {
    analyzer: Arc<dyn SqliAnalyzer>,
    max_per_target: usize,
    timeout: Duration,
    auth_header: Option<(String, String)>,
}

impl SqliDispatcher {
    pub fn new(
        analyzer: Arc<dyn SqliAnalyzer>,
        config: &SqliConfig,
        auth_header: Option<(String, String)>,
    ) -> Self {
        Self {
            analyzer,
            max_per_target: config.max_per_target,
            timeout: Duration::from_secs(config.timeout_secs),
            auth_header,
        }
    }

    /// Fresh budget for one target.
    pub fn budget(&self) -> DispatchBudget {
        DispatchBudget::new(self.max_per_target)
    }

    /// A parameterized endpoint that did not refuse unauthenticated access.
    pub fn is_candidate(endpoint: &Endpoint, findings: &[Finding]) -> bool {
        endpoint.has_params()
            && !endpoint.is_access_denied()
            && !findings.iter().any(Finding::marks_access_denied)
    }

    pub async fn maybe_dispatch(
        &self,
        endpoint: &Endpoint,
        findings: &[Finding],
        budget: &mut DispatchBudget,
    ) -> Result<Option<Finding>, AdapterError> {
        if !Self::is_candidate(endpoint, findings) {
            return Ok(None);
        }
        if !budget.take() {
            debug!(endpoint = %endpoint.url, "SQLi dispatch cap reached, skipping");
            return Ok(None);
        }

        let request = InjectionRequest::from_endpoint(endpoint, self.auth_header.as_ref());
        debug!(
            analyzer = self.analyzer.name(),
            method = %request.method,
            url = %request.url,
            params = request.params.len(),
            "dispatching to SQLi analyzer"
        );

        let verdict = tokio::time::timeout(self.timeout, self.analyzer.analyze(&request))
            .await
            .map_err(|_| AdapterError::Timeout(self.timeout.as_secs()))??;

        match verdict {
            Verdict::Vulnerable { evidence } => {
                info!(endpoint = %endpoint.url, "SQL injection confirmed");
                Ok(Some(Finding::new(
                    endpoint,
                    OwaspCategory::UnsafeConsumptionOfApis,
                    Severity::Critical,
                    DETECTOR_NAME,
                    "SQL injection confirmed by external analyzer",
                    Evidence::new(EvidenceType::AnalyzerOutput, evidence),
                )))
            }
            Verdict::NotVulnerable => Ok(None),
            Verdict::Inconclusive => {
                debug!(endpoint = %endpoint.url, "SQLi analyzer inconclusive");
                Ok(None)
            }
        }
    }
}
