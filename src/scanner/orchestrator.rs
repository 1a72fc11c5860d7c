use chrono::Utc;
use futures::stream::{self, Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ScanConfig;
use crate::discovery::Discoverer;
use crate::error::{ConfigError, ScanError};
use crate::http::{HttpClient, RequestGate};
use crate::models::{
    Endpoint, EndpointReport, IssueKind, ScanIssue, ScanReport, Target, TargetState,
};
use crate::rules::RuleEngine;
use crate::scoring::RiskScorer;
use crate::sqli::{SqliDispatcher, SqlmapApiAnalyzer};

/// Drives every target through discovery, rule evaluation, SQLi dispatch
/// and scoring. Targets run concurrently up to `threads`; all of their
/// requests share one `RequestGate`.
pub struct Orchestrator {
    config: Arc<ScanConfig>,
    gate: Arc<RequestGate>,
    engine: RuleEngine,
    dispatcher: Option<SqliDispatcher>,
    client: reqwest::Client,
}

impl Orchestrator {
    /// Validates `config` and wires the shared pieces. When SQLi dispatch is
    /// enabled the sqlmapapi adapter is used.
    pub fn new(config: ScanConfig, cancel: CancellationToken) -> Result<Self, ConfigError> {
        config.validate()?;

        let engine = RuleEngine::new(&config.enabled_categories);
        if engine.is_empty() {
            return Err(ConfigError::Invalid("no usable checkers enabled".into()));
        }

        let dispatcher = if config.sqli.enabled {
            let analyzer = SqlmapApiAnalyzer::new(&config.sqli)
                .map_err(|e| ConfigError::Invalid(format!("SQLi analyzer: {}", e)))?;
            Some(SqliDispatcher::new(
                Arc::new(analyzer),
                &config.sqli,
                config.auth_header.clone(),
            ))
        } else {
            None
        };

        let gate = Arc::new(RequestGate::new(config.rate_limit_rps, config.threads, cancel));
        let client = HttpClient::build_client(&config)?;

        Ok(Self {
            config: Arc::new(config),
            gate,
            engine,
            dispatcher,
            client,
        })
    }

    pub fn with_dispatcher(mut self, dispatcher: SqliDispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn with_engine(mut self, engine: RuleEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.gate.cancel_token().clone()
    }

    /// Reports in completion order, one per target.
    pub fn reports(&self, targets: Vec<Target>) -> impl Stream<Item = ScanReport> + '_ {
        stream::iter(targets)
            .map(move |target| async move { self.scan_target(&target).await })
            .buffer_unordered(self.config.threads.max(1))
    }

    /// Sends each finished report to `sink`. Stops early if the receiver
    /// goes away.
    pub async fn run(&self, targets: Vec<Target>, sink: mpsc::Sender<ScanReport>) {
        let mut reports = Box::pin(self.reports(targets));
        while let Some(report) = reports.next().await {
            if sink.send(report).await.is_err() {
                warn!("report sink closed, stopping scan");
                self.gate.cancel_token().cancel();
                break;
            }
        }
    }

    pub async fn scan_all(&self, targets: Vec<Target>) -> Vec<ScanReport> {
        self.reports(targets).collect().await
    }

    pub async fn scan_target(&self, target: &Target) -> ScanReport {
        let client = HttpClient::with_client(self.client.clone(), &self.config, self.gate.clone());
        let mut run = TargetRun::new(target);

        let endpoints = match self.discover(target, &client, &mut run).await {
            Some(endpoints) => endpoints,
            None => return run.finish(&client),
        };

        run.advance(TargetState::Evaluating);
        let mut reports = self.evaluate(endpoints, &client, &mut run).await;

        run.advance(TargetState::Dispatching);
        self.dispatch(&mut reports, &mut run).await;

        for report in &mut reports {
            RiskScorer::apply(report);
        }
        run.report.endpoints = reports;

        if self.gate.is_cancelled() {
            run.interrupt();
        } else {
            run.advance(TargetState::Done);
        }
        run.finish(&client)
    }

    async fn discover(
        &self,
        target: &Target,
        client: &HttpClient,
        run: &mut TargetRun,
    ) -> Option<Vec<Endpoint>> {
        run.advance(TargetState::Discovering);

        match Discoverer::new(client, &self.config).discover(target).await {
            Ok(discovery) => {
                if let Some(e) = &discovery.root_error {
                    run.report.warnings.push(ScanIssue::new(
                        IssueKind::Network,
                        format!("root request failed, target kept: {}", e),
                    ));
                }
                if discovery.misses > 0 {
                    run.report.warnings.push(ScanIssue::new(
                        IssueKind::Network,
                        format!(
                            "{} of {} discovery requests failed",
                            discovery.misses, discovery.probed
                        ),
                    ));
                }
                if discovery.interrupted {
                    run.interrupt();
                    run.report.endpoints = self.evaluate_offline(discovery.endpoints).await;
                    return None;
                }
                info!(target = %target, endpoints = discovery.endpoints.len(), "discovery complete");
                Some(discovery.endpoints)
            }
            Err(ScanError::Cancelled) => {
                run.interrupt();
                None
            }
            Err(e @ ScanError::TargetUnreachable { .. }) => {
                warn!(target = %target, error = %e, "target unreachable");
                run.report
                    .errors
                    .push(ScanIssue::new(IssueKind::TargetUnreachable, e.to_string()));
                run.advance(TargetState::Failed);
                None
            }
            Err(e) => {
                warn!(target = %target, error = %e, "discovery aborted");
                run.report
                    .errors
                    .push(ScanIssue::new(IssueKind::Configuration, e.to_string()));
                run.advance(TargetState::Failed);
                None
            }
        }
    }

    async fn evaluate(
        &self,
        endpoints: Vec<Endpoint>,
        client: &HttpClient,
        run: &mut TargetRun,
    ) -> Vec<EndpointReport> {
        let reports: Vec<EndpointReport> = stream::iter(endpoints)
            .map(|endpoint| async move {
                let findings = self.engine.evaluate(&endpoint, Some(client)).await;
                EndpointReport::new(endpoint, findings)
            })
            .buffered(self.config.threads.max(1))
            .collect()
            .await;

        for report in &reports {
            for finding in report.findings.iter().filter(|f| f.is_inconclusive()) {
                run.report.warnings.push(
                    ScanIssue::new(
                        IssueKind::CheckerInternal,
                        format!("{} inconclusive: {}", finding.detector, finding.evidence.details),
                    )
                    .for_endpoint(report.endpoint.url.clone()),
                );
            }
        }
        reports
    }

    /// Endpoints found before a cancellation, checked against what discovery
    /// captured without sending anything more.
    async fn evaluate_offline(&self, endpoints: Vec<Endpoint>) -> Vec<EndpointReport> {
        let mut reports = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            let findings = self.engine.evaluate(&endpoint, None).await;
            let mut report = EndpointReport::new(endpoint, findings);
            RiskScorer::apply(&mut report);
            reports.push(report);
        }
        reports
    }

    async fn dispatch(&self, reports: &mut [EndpointReport], run: &mut TargetRun) {
        let Some(dispatcher) = &self.dispatcher else {
            return;
        };
        let mut budget = dispatcher.budget();
        let cancel = self.gate.cancel_token();

        for report in reports.iter_mut() {
            if cancel.is_cancelled() || budget.is_exhausted() {
                break;
            }

            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = dispatcher.maybe_dispatch(&report.endpoint, &report.findings, &mut budget) => outcome,
            };

            match outcome {
                Ok(Some(finding)) => report.push_finding(finding),
                Ok(None) => {}
                Err(e) => {
                    warn!(endpoint = %report.endpoint.url, error = %e, "SQLi analyzer failed");
                    run.report.warnings.push(
                        ScanIssue::new(IssueKind::Adapter, e.to_string())
                            .for_endpoint(report.endpoint.url.clone()),
                    );
                }
            }
        }
        run.report.sqli_dispatches = budget.used();
    }
}

/// The report being assembled for one target, owned by its worker.
struct TargetRun {
    report: ScanReport,
}

impl TargetRun {
    fn new(target: &Target) -> Self {
        Self {
            report: ScanReport::new(target.base_url.clone()),
        }
    }

    fn advance(&mut self, next: TargetState) {
        let current = self.report.state;
        if !current.can_transition_to(next) {
            warn!(target = %self.report.target, from = %current, to = %next, "invalid state transition ignored");
            return;
        }
        debug!(target = %self.report.target, from = %current, to = %next, "target state");
        self.report.state = next;
    }

    fn interrupt(&mut self) {
        if !self.report.interrupted {
            info!(target = %self.report.target, state = %self.report.state, "scan interrupted, flushing partial report");
            self.report.interrupted = true;
            self.report.warnings.push(ScanIssue::new(
                IssueKind::Interrupted,
                format!("scan interrupted while {}", self.report.state),
            ));
        }
    }

    fn finish(mut self, client: &HttpClient) -> ScanReport {
        self.report.requests_sent = client.requests_sent();
        self.report.finished_at = Some(Utc::now());
        self.report
    }
}
