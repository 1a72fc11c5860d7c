use async_trait::async_trait;

use crate::error::CheckError;
use crate::http::ProbeRequest;
use crate::models::{Endpoint, EvidenceType, Finding, HttpMethod, OwaspCategory, Severity};
use crate::rules::{Checker, Observations, ProbeBudget};

/// API1:2023 Broken Object Level Authorization
///
/// Flags object-addressed endpoints (`/users/{id}`, `/orders/42`) that hand
/// back object data. For GET endpoints with a numeric id the neighbouring
/// object is requested as well; a different object coming back confirms
/// that ids are not scoped to the caller.
pub struct BolaChecker;

impl BolaChecker {
    fn adjacent_url(endpoint: &Endpoint) -> Option<String> {
        let (index, id) = endpoint.object_id_position()?;
        let n: u64 = id.parse().ok()?;
        let mut url = url::Url::parse(&endpoint.url).ok()?;

        let mut segments: Vec<String> = url
            .path_segments()?
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        *segments.get_mut(index)? = (n + 1).to_string();
        url.set_path(&format!("/{}", segments.join("/")));
        Some(url.to_string())
    }
}

#[async_trait]
impl Checker for BolaChecker {
    fn category(&self) -> OwaspCategory {
        OwaspCategory::BrokenObjectLevelAuthorization
    }

    fn name(&self) -> &'static str {
        "bola"
    }

    fn applies(&self, endpoint: &Endpoint) -> bool {
        endpoint.is_success()
            && !matches!(endpoint.method, HttpMethod::Post | HttpMethod::Options | HttpMethod::Head)
            && endpoint.object_id_segment().is_some()
    }

    async fn run(
        &self,
        endpoint: &Endpoint,
        probe: &mut ProbeBudget<'_>,
    ) -> Result<Option<Finding>, CheckError> {
        let mut obs = Observations::new(self.category(), self.name());
        let response = &endpoint.response;

        if !response.is_json() {
            return Ok(None);
        }

        let id = endpoint.object_id_segment().unwrap_or_default();
        if !endpoint.authenticated {
            obs.add(
                Severity::High,
                "Object returned without any authorization check",
                EvidenceType::StatusCode,
                format!(
                    "{} {} answered {} with {} JSON fields and no credentials sent (object id '{}')",
                    endpoint.method,
                    endpoint.path,
                    response.status,
                    response.keys.len(),
                    id
                ),
            );
        }

        if endpoint.method == HttpMethod::Get {
            if let Some(adjacent) = Self::adjacent_url(endpoint) {
                if let Some(other) = probe.send(ProbeRequest::get(adjacent.clone())).await? {
                    if other.is_success()
                        && other.is_json()
                        && other.body != response.body
                    {
                        let severity = if endpoint.authenticated {
                            Severity::High
                        } else {
                            Severity::Critical
                        };
                        obs.add(
                            severity,
                            "Neighbouring object readable by enumerating ids",
                            EvidenceType::Probe,
                            format!("{} also answered {} with a different object", adjacent, other.status),
                        );
                    }
                }
            }
        }

        Ok(obs.into_finding(endpoint))
    }
}
