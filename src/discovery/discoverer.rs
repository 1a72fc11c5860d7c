use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use super::openapi::{ApiOperation, OpenApiParser};
use super::soft404::{CANARY_PATH, Soft404};
use crate::config::ScanConfig;
use crate::error::{NetworkError, ScanError};
use crate::http::{HttpClient, ProbeRequest};
use crate::models::{Endpoint, HttpMethod, Param, ParamLocation, PathTemplate, Target};

const INTROSPECTION_QUERY: &str = "{__schema{types{name}}}";

/// One `(path template, method)` pair to probe.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub template: PathTemplate,
    pub method: HttpMethod,
    pub body_example: Option<serde_json::Value>,
}

/// Lazy path x method walk over the wordlist. Cloning restarts it.
#[derive(Debug, Clone)]
pub struct ProbePlan {
    paths: Vec<String>,
    methods: Vec<HttpMethod>,
    path_idx: usize,
    method_idx: usize,
    current: Option<PathTemplate>,
}

impl ProbePlan {
    pub fn new(paths: Vec<String>, methods: Vec<HttpMethod>) -> Self {
        Self {
            paths,
            methods,
            path_idx: 0,
            method_idx: 0,
            current: None,
        }
    }

    pub fn len(&self) -> usize {
        self.paths.len() * self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Iterator for ProbePlan {
    type Item = Candidate;

    fn next(&mut self) -> Option<Candidate> {
        if self.methods.is_empty() {
            return None;
        }
        if self.method_idx >= self.methods.len() {
            self.method_idx = 0;
            self.path_idx += 1;
            self.current = None;
        }
        let path = self.paths.get(self.path_idx)?;
        let template = self
            .current
            .get_or_insert_with(|| PathTemplate::parse(path))
            .clone();
        let method = self.methods[self.method_idx];
        self.method_idx += 1;

        Some(Candidate {
            template,
            method,
            body_example: None,
        })
    }
}

/// Result of walking one target.
#[derive(Debug, Default)]
pub struct Discovery {
    pub endpoints: Vec<Endpoint>,
    pub misses: usize,
    pub probed: usize,
    /// The root request failed without proving the target unreachable.
    pub root_error: Option<NetworkError>,
    /// The scan was cancelled mid-walk; `endpoints` holds what was found
    /// before that.
    pub interrupted: bool,
}

pub struct Discoverer<'a> {
    client: &'a HttpClient,
    config: &'a ScanConfig,
}

impl<'a> Discoverer<'a> {
    pub fn new(client: &'a HttpClient, config: &'a ScanConfig) -> Self {
        Self { client, config }
    }

    pub fn plan(&self) -> ProbePlan {
        ProbePlan::new(self.config.wordlist.clone(), self.config.methods.clone())
    }

    /// Walks the wordlist against `target`. Idempotent for a static target:
    /// endpoints come back sorted by path then method.
    pub async fn discover(&self, target: &Target) -> Result<Discovery, ScanError> {
        let mut discovery = Discovery {
            root_error: self.check_reachable(target).await?,
            ..Discovery::default()
        };
        let soft404 = self.fingerprint_not_found(target).await;

        let mut found: BTreeMap<(String, HttpMethod), Endpoint> = BTreeMap::new();

        let candidates: Vec<Candidate> = self.plan().collect();
        self.probe_all(target, candidates, &soft404, &mut found, &mut discovery)
            .await;

        if !self.client.is_cancelled() {
            self.introspect_graphql(target, &mut found, &mut discovery).await;
        }

        if self.config.follow_openapi && !self.client.is_cancelled() {
            let seeded = self.openapi_candidates(&found);
            if !seeded.is_empty() {
                info!(target = %target, operations = seeded.len(), "seeding discovery from API description");
                self.probe_all(target, seeded, &soft404, &mut found, &mut discovery)
                    .await;
            }
        }

        discovery.interrupted = self.client.is_cancelled();
        discovery.endpoints = found.into_values().collect();
        debug!(
            target = %target,
            endpoints = discovery.endpoints.len(),
            probed = discovery.probed,
            misses = discovery.misses,
            "discovery finished"
        );
        Ok(discovery)
    }

    /// Only a failed connection (DNS, refused, TLS) makes the target
    /// unreachable. A slow or broken root response is handed back so the
    /// walk can go on.
    async fn check_reachable(&self, target: &Target) -> Result<Option<NetworkError>, ScanError> {
        match self.client.send(&ProbeRequest::get(target.join("/"))).await {
            Ok(_) => Ok(None),
            Err(NetworkError::Cancelled) => Err(ScanError::Cancelled),
            Err(source @ NetworkError::Connect(_)) => Err(ScanError::TargetUnreachable {
                target: target.base_url.clone(),
                source,
            }),
            Err(e) => {
                warn!(target = %target, error = %e, "root request failed, continuing discovery");
                Ok(Some(e))
            }
        }
    }

    async fn fingerprint_not_found(&self, target: &Target) -> Soft404 {
        let mut soft404 = Soft404::new();
        for method in &self.config.methods {
            let request = self.build_request(target, &PathTemplate::parse(CANARY_PATH), *method, None);
            match self.client.send(&request).await {
                Ok(response) => soft404.record(*method, response),
                Err(e) => debug!(target = %target, method = %method, error = %e, "canary probe failed"),
            }
        }
        soft404
    }

    async fn probe_all(
        &self,
        target: &Target,
        candidates: Vec<Candidate>,
        soft404: &Soft404,
        found: &mut BTreeMap<(String, HttpMethod), Endpoint>,
        discovery: &mut Discovery,
    ) {
        let pending: Vec<Candidate> = candidates
            .into_iter()
            .filter(|c| !found.contains_key(&(c.template.path.clone(), c.method)))
            .collect();

        let mut results = stream::iter(pending)
            .map(|candidate| self.probe(target, candidate, soft404))
            .buffered(self.config.threads.max(1));

        while let Some(outcome) = results.next().await {
            match outcome {
                Ok(Some(endpoint)) => {
                    found
                        .entry((endpoint.path.clone(), endpoint.method))
                        .or_insert(endpoint);
                }
                Ok(None) => {}
                Err(NetworkError::Cancelled) => continue,
                Err(_) => discovery.misses += 1,
            }
            discovery.probed += 1;
        }
    }

    async fn probe(
        &self,
        target: &Target,
        candidate: Candidate,
        soft404: &Soft404,
    ) -> Result<Option<Endpoint>, NetworkError> {
        let request = self.build_request(
            target,
            &candidate.template,
            candidate.method,
            candidate.body_example.as_ref(),
        );

        let response = match self.client.send(&request).await {
            Ok(r) => r,
            Err(e) => {
                debug!(url = %request.url, method = %candidate.method, error = %e, "discovery miss");
                return Err(e);
            }
        };

        if soft404.is_absent(candidate.method, &response, &self.config.absent_statuses) {
            return Ok(None);
        }

        debug!(url = %request.url, method = %candidate.method, status = response.status, "endpoint found");

        let mut params = candidate.template.params.clone();
        if let Some(serde_json::Value::Object(fields)) = &candidate.body_example {
            params.extend(fields.iter().map(|(name, value)| {
                let param = Param::new(name, ParamLocation::Body);
                match value {
                    serde_json::Value::String(s) => param.with_value(s.clone()),
                    serde_json::Value::Null => param,
                    other => param.with_value(other.to_string()),
                }
            }));
        }

        let mut endpoint = Endpoint::new(request.url, candidate.template.path, candidate.method, response)
            .with_params(params);
        endpoint.request_body_example = candidate.body_example;
        endpoint.authenticated = self.client.has_auth();
        Ok(Some(endpoint))
    }

    /// Sends an introspection query to every discovered GraphQL path and
    /// records the POST endpoint when the schema comes back.
    async fn introspect_graphql(
        &self,
        target: &Target,
        found: &mut BTreeMap<(String, HttpMethod), Endpoint>,
        discovery: &mut Discovery,
    ) {
        let paths: BTreeSet<String> = found
            .keys()
            .map(|(path, _)| path.clone())
            .filter(|path| path.to_lowercase().ends_with("graphql"))
            .collect();

        for path in paths {
            let template = PathTemplate::parse(&path);
            let body = serde_json::json!({ "query": INTROSPECTION_QUERY });
            let request = self.build_request(target, &template, HttpMethod::Post, Some(&body));

            let response = match self.client.send(&request).await {
                Ok(r) => r,
                Err(NetworkError::Cancelled) => return,
                Err(e) => {
                    debug!(url = %request.url, error = %e, "introspection request failed");
                    discovery.misses += 1;
                    continue;
                }
            };
            discovery.probed += 1;

            if !response.is_success() || !response.exposes_graphql_schema() {
                continue;
            }
            info!(target = %target, path = %path, "GraphQL introspection answered");

            let query = Param::new("query", ParamLocation::Body).with_value(INTROSPECTION_QUERY);
            let mut endpoint = Endpoint::new(request.url, path.clone(), HttpMethod::Post, response)
                .with_params(vec![query]);
            endpoint.request_body_example = Some(body);
            endpoint.authenticated = self.client.has_auth();
            found.insert((path, HttpMethod::Post), endpoint);
        }
    }

    fn build_request(
        &self,
        target: &Target,
        template: &PathTemplate,
        method: HttpMethod,
        body: Option<&serde_json::Value>,
    ) -> ProbeRequest {
        let mut request = ProbeRequest::new(method, target.join(&template.resolve()));
        if method.requires_body() {
            request = request.json(body.cloned().unwrap_or_else(|| serde_json::json!({})));
        }
        request
    }

    fn openapi_candidates(&self, found: &BTreeMap<(String, HttpMethod), Endpoint>) -> Vec<Candidate> {
        let allowed: BTreeSet<HttpMethod> = self.config.methods.iter().copied().collect();

        found
            .values()
            .filter(|e| e.is_success())
            .filter_map(|e| e.response.body.as_ref())
            .filter(|body| OpenApiParser::is_api_document(body))
            .flat_map(OpenApiParser::parse)
            .filter(|op: &ApiOperation| allowed.contains(&op.method))
            .map(|op| Candidate {
                template: op.template,
                method: op.method,
                body_example: op.body_example,
            })
            .collect()
    }
}
