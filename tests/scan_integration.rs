use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use apisentinel::error::AdapterError;
use apisentinel::models::{IssueKind, OwaspCategory};
use apisentinel::{
    HttpMethod, InjectionRequest, Orchestrator, ScanConfig, SqliAnalyzer, SqliConfig,
    SqliDispatcher, Target, TargetState, Tier, Verdict,
};

#[derive(Default)]
struct RecordingAnalyzer {
    requests: Mutex<Vec<InjectionRequest>>,
}

impl RecordingAnalyzer {
    fn requests(&self) -> Vec<InjectionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SqliAnalyzer for RecordingAnalyzer {
    fn name(&self) -> &str {
        "recording"
    }

    async fn analyze(&self, request: &InjectionRequest) -> Result<Verdict, AdapterError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(Verdict::NotVulnerable)
    }
}

fn config(wordlist: &[&str]) -> ScanConfig {
    ScanConfig {
        threads: 4,
        methods: vec![HttpMethod::Get],
        wordlist: wordlist.iter().map(|p| p.to_string()).collect(),
        rate_limit_rps: 0,
        follow_openapi: false,
        ..ScanConfig::default()
    }
}

fn with_recorder(
    orchestrator: Orchestrator,
    max_per_target: usize,
) -> (Orchestrator, Arc<RecordingAnalyzer>) {
    let analyzer = Arc::new(RecordingAnalyzer::default());
    let sqli = SqliConfig {
        max_per_target,
        timeout_secs: 5,
        ..SqliConfig::default()
    };
    let dispatcher = SqliDispatcher::new(analyzer.clone(), &sqli, None);
    (orchestrator.with_dispatcher(dispatcher), analyzer)
}

async fn user_api() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"id": 1, "email": "a@example.test", "name": "alice"})),
        )
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_object_endpoint_is_flagged_and_dispatched() {
    let server = user_api().await;
    let orchestrator = Orchestrator::new(config(&["/users/{id}"]), CancellationToken::new()).unwrap();
    let (orchestrator, analyzer) = with_recorder(orchestrator, 10);

    let report = orchestrator.scan_target(&Target::new(server.uri())).await;

    assert_eq!(report.state, TargetState::Done);
    assert!(!report.interrupted);
    assert_eq!(report.endpoints.len(), 1);

    let endpoint = &report.endpoints[0];
    assert_eq!(endpoint.endpoint.path, "/users/{id}");
    assert!(endpoint
        .findings
        .iter()
        .any(|f| f.category == OwaspCategory::BrokenObjectLevelAuthorization));
    assert!(endpoint.tier() >= Tier::High);

    let requests = analyzer.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, HttpMethod::Get);
    assert_eq!(requests[0].params.keys().collect::<Vec<_>>(), vec!["id"]);
    assert_eq!(report.sqli_dispatches, 1);
    assert!(report.requests_sent > 0);
    assert!(report.finished_at.is_some());
}

#[tokio::test]
async fn test_unreachable_target_fails_alone() {
    let server = user_api().await;
    let orchestrator = Orchestrator::new(config(&["/users/{id}"]), CancellationToken::new()).unwrap();

    let targets = vec![Target::new("http://127.0.0.1:1"), Target::new(server.uri())];
    let reports = orchestrator.scan_all(targets).await;
    assert_eq!(reports.len(), 2);

    let failed = reports.iter().find(|r| r.target == "http://127.0.0.1:1").unwrap();
    assert_eq!(failed.state, TargetState::Failed);
    assert!(failed.endpoints.is_empty());
    assert_eq!(failed.errors.len(), 1);
    assert_eq!(failed.errors[0].kind, IssueKind::TargetUnreachable);

    let healthy = reports.iter().find(|r| r.target == server.uri()).unwrap();
    assert_eq!(healthy.state, TargetState::Done);
    assert_eq!(healthy.endpoints.len(), 1);
}

#[tokio::test]
async fn test_discovery_is_repeatable() {
    let server = MockServer::start().await;
    for p in ["/api/orders", "/api/users", "/health"] {
        Mock::given(method("GET"))
            .and(path(p))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;
    }

    let wordlist = ["/health", "/api/users", "/missing", "/api/orders"];
    let orchestrator = Orchestrator::new(config(&wordlist), CancellationToken::new()).unwrap();
    let target = Target::new(server.uri());

    let first = orchestrator.scan_target(&target).await;
    let second = orchestrator.scan_target(&target).await;

    let paths = |r: &apisentinel::ScanReport| -> Vec<String> {
        r.endpoints.iter().map(|e| e.endpoint.path.clone()).collect()
    };
    assert_eq!(paths(&first), vec!["/api/orders", "/api/users", "/health"]);
    assert_eq!(paths(&first), paths(&second));
}

#[tokio::test]
async fn test_dispatch_cap_per_target() {
    let server = MockServer::start().await;
    let wordlist: Vec<String> = (0..8).map(|i| format!("/search{}?q=x", i)).collect();
    for i in 0..8 {
        Mock::given(method("GET"))
            .and(path(format!("/search{}", i)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"results": []})))
            .mount(&server)
            .await;
    }

    let refs: Vec<&str> = wordlist.iter().map(String::as_str).collect();
    let orchestrator = Orchestrator::new(config(&refs), CancellationToken::new()).unwrap();
    let (orchestrator, analyzer) = with_recorder(orchestrator, 3);

    let report = orchestrator.scan_target(&Target::new(server.uri())).await;

    assert_eq!(report.endpoints.len(), 8);
    assert_eq!(analyzer.requests().len(), 3);
    assert_eq!(report.sqli_dispatches, 3);
}

#[tokio::test]
async fn test_cancellation_flushes_partial_report() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fast"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    let mut scan_config = config(&["/fast", "/slow"]);
    scan_config.timeout_secs = 30;
    let orchestrator = Orchestrator::new(scan_config, cancel.clone()).unwrap();

    let trigger = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            cancel.cancel();
        })
    };

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        orchestrator.scan_target(&Target::new(server.uri())),
    )
    .await
    .expect("cancelled scan should return promptly");
    trigger.await.unwrap();

    assert!(report.interrupted);
    assert!(report.finished_at.is_some());
    assert_eq!(report.state, TargetState::Discovering);
    assert!(report
        .warnings
        .iter()
        .any(|w| w.kind == IssueKind::Interrupted));
    assert!(report.warnings.iter().all(|w| w.kind != IssueKind::Network));

    assert_eq!(report.endpoints.len(), 1);
    assert_eq!(report.endpoints[0].endpoint.path, "/fast");
    assert!(report.endpoints[0].tier.is_some());
}

#[tokio::test]
async fn test_slow_root_does_not_fail_target() {
    let server = user_api().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(4)))
        .mount(&server)
        .await;

    let mut scan_config = config(&["/users/{id}"]);
    scan_config.timeout_secs = 1;
    let orchestrator = Orchestrator::new(scan_config, CancellationToken::new()).unwrap();

    let report = orchestrator.scan_target(&Target::new(server.uri())).await;

    assert_eq!(report.state, TargetState::Done);
    assert!(report.errors.is_empty());
    assert_eq!(report.endpoints.len(), 1);
    assert!(report.warnings.iter().any(|w| w.kind == IssueKind::Network));
}

#[tokio::test]
async fn test_base_path_target_probes_neighbour_object() {
    let server = MockServer::start().await;
    for (id, name) in [(1, "alice"), (2, "bob")] {
        Mock::given(method("GET"))
            .and(path(format!("/api/users/{}", id)))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": id, "name": name})),
            )
            .mount(&server)
            .await;
    }

    let orchestrator = Orchestrator::new(config(&["/users/{id}"]), CancellationToken::new()).unwrap();
    let report = orchestrator
        .scan_target(&Target::new(format!("{}/api", server.uri())))
        .await;

    assert_eq!(report.endpoints.len(), 1);
    let bola = report.endpoints[0]
        .findings
        .iter()
        .find(|f| f.category == OwaspCategory::BrokenObjectLevelAuthorization)
        .unwrap();
    assert_eq!(bola.severity, apisentinel::Severity::Critical);
    assert!(bola.evidence.details.contains("/api/users/2"));
}

#[tokio::test]
async fn test_targets_file_feeds_orchestrator() {
    let server = user_api().await;
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("targets.txt");
    std::fs::write(&file, format!("# staging\n{}\n\n", server.uri())).unwrap();

    let targets = apisentinel::config::load_targets(&file).unwrap();
    assert_eq!(targets.len(), 1);

    let orchestrator = Orchestrator::new(config(&["/users/{id}"]), CancellationToken::new()).unwrap();
    let (tx, mut rx) = tokio::sync::mpsc::channel(1);
    let scan = orchestrator.run(targets, tx);
    let collect = async {
        let mut reports = Vec::new();
        while let Some(report) = rx.recv().await {
            reports.push(report);
        }
        reports
    };
    let ((), reports) = tokio::join!(scan, collect);

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].state, TargetState::Done);
}

#[tokio::test]
async fn test_graphql_introspection_is_discovered() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/graphql"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(serde_json::json!({"errors": [{"message": "Must provide query string."}]})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_partial_json(serde_json::json!({"query": "{__schema{types{name}}}"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"data": {"__schema": {"types": [{"name": "Query"}]}}})),
        )
        .mount(&server)
        .await;

    let orchestrator = Orchestrator::new(config(&["/graphql"]), CancellationToken::new()).unwrap();
    let report = orchestrator.scan_target(&Target::new(server.uri())).await;

    let methods: Vec<HttpMethod> = report.endpoints.iter().map(|e| e.endpoint.method).collect();
    assert_eq!(methods, vec![HttpMethod::Get, HttpMethod::Post]);

    let introspection = &report.endpoints[1];
    assert!(introspection
        .findings
        .iter()
        .any(|f| f.category == OwaspCategory::SecurityMisconfiguration
            && f.description == "GraphQL introspection enabled"));
}
