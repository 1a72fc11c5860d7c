use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, warn};

use super::{InjectionRequest, SqliAnalyzer, Verdict};
use crate::config::SqliConfig;
use crate::error::AdapterError;

/// Client for a running `sqlmapapi.py` server.
pub struct SqlmapApiAnalyzer {
    client: Client,
    base_url: String,
    poll_interval: Duration,
    task_timeout: Duration,
}

/// Stops and deletes a sqlmap task if the analysis future is dropped before
/// it released the task itself.
struct TaskCleanup {
    client: Client,
    base_url: String,
    task_id: Option<String>,
}

impl TaskCleanup {
    fn disarm(mut self) {
        self.task_id = None;
    }
}

impl Drop for TaskCleanup {
    fn drop(&mut self) {
        let Some(task_id) = self.task_id.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(task = %task_id, "no runtime left to release sqlmap task");
            return;
        };
        let client = self.client.clone();
        let base_url = self.base_url.clone();
        runtime.spawn(async move {
            release_task(&client, &base_url, &task_id, true).await;
        });
    }
}

async fn release_task(client: &Client, base_url: &str, task_id: &str, stop: bool) {
    let mut paths = Vec::with_capacity(2);
    if stop {
        paths.push(format!("/scan/{}/stop", task_id));
    }
    paths.push(format!("/task/{}/delete", task_id));

    for path in paths {
        let outcome = client
            .get(format!("{}{}", base_url, path))
            .send()
            .await
            .and_then(|r| r.error_for_status());
        if let Err(e) = outcome {
            warn!(task = %task_id, path = %path, error = %e, "failed to release sqlmap task");
        }
    }
}

#[derive(Debug, Deserialize)]
struct NewTask {
    success: bool,
    taskid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Ack {
    success: bool,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Status {
    success: bool,
    status: Option<String>,
    returncode: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ScanData {
    success: bool,
    #[serde(default)]
    data: Vec<Value>,
    #[serde(default)]
    error: Vec<String>,
}

impl SqlmapApiAnalyzer {
    pub fn new(config: &SqliConfig) -> Result<Self, AdapterError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AdapterError::Http(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            task_timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, AdapterError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AdapterError::Http(e.to_string()))?;
        response
            .json::<T>()
            .await
            .map_err(|e| AdapterError::Protocol(format!("{}: {}", path, e)))
    }

    fn start_body(request: &InjectionRequest) -> Value {
        let headers = request
            .headers
            .iter()
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect::<Vec<_>>()
            .join("\n");

        let mut body = json!({
            "url": request.marked_url,
            "method": request.method.as_str(),
            "batch": true,
        });
        if let Some(data) = request.form_data() {
            body["data"] = Value::String(data);
        }
        if !headers.is_empty() {
            body["headers"] = Value::String(headers);
        }
        body
    }

    /// Injectable parameters and techniques out of sqlmap's `data` entries.
    fn summarize(data: &[Value]) -> String {
        let mut parts = Vec::new();
        for entry in data {
            let Some(items) = entry.get("value").and_then(Value::as_array) else {
                continue;
            };
            for item in items {
                let parameter = item.get("parameter").and_then(Value::as_str).unwrap_or("?");
                let place = item.get("place").and_then(Value::as_str).unwrap_or("?");
                let techniques: Vec<String> = item
                    .get("data")
                    .and_then(Value::as_object)
                    .map(|m| {
                        m.values()
                            .filter_map(|t| t.get("title").and_then(Value::as_str))
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                if techniques.is_empty() {
                    parts.push(format!("{} ({})", parameter, place));
                } else {
                    parts.push(format!("{} ({}): {}", parameter, place, techniques.join(", ")));
                }
            }
        }
        if parts.is_empty() {
            format!("sqlmap reported {} result entries", data.len())
        } else {
            parts.join("; ")
        }
    }

    async fn run_task(&self, task_id: &str, request: &InjectionRequest) -> Result<Verdict, AdapterError> {
        let url = format!("{}/scan/{}/start", self.base_url, task_id);
        let ack: Ack = self
            .client
            .post(&url)
            .json(&Self::start_body(request))
            .send()
            .await
            .map_err(|e| AdapterError::Http(e.to_string()))?
            .json()
            .await
            .map_err(|e| AdapterError::Protocol(format!("scan start: {}", e)))?;
        if !ack.success {
            return Err(AdapterError::Task(
                ack.message.unwrap_or_else(|| "scan start rejected".to_string()),
            ));
        }

        let returncode = loop {
            let status: Status = self.get(&format!("/scan/{}/status", task_id)).await?;
            if !status.success {
                return Err(AdapterError::Task(format!("status query failed for task {}", task_id)));
            }
            match status.status.as_deref() {
                Some("terminated") => break status.returncode.unwrap_or(0),
                Some(_) => tokio::time::sleep(self.poll_interval).await,
                None => return Err(AdapterError::Protocol("status response without status".into())),
            }
        };

        let data: ScanData = self.get(&format!("/scan/{}/data", task_id)).await?;
        if !data.success {
            return Err(AdapterError::Task(format!("data query failed for task {}", task_id)));
        }
        for message in &data.error {
            debug!(task = task_id, error = %message, "sqlmap reported an error");
        }

        if !data.data.is_empty() {
            Ok(Verdict::Vulnerable {
                evidence: Self::summarize(&data.data),
            })
        } else if returncode != 0 {
            Ok(Verdict::Inconclusive)
        } else {
            Ok(Verdict::NotVulnerable)
        }
    }
}

#[async_trait]
impl SqliAnalyzer for SqlmapApiAnalyzer {
    fn name(&self) -> &str {
        "sqlmapapi"
    }

    async fn analyze(&self, request: &InjectionRequest) -> Result<Verdict, AdapterError> {
        let task: NewTask = self.get("/task/new").await?;
        let task_id = match (task.success, task.taskid) {
            (true, Some(id)) => id,
            _ => return Err(AdapterError::Protocol("task creation failed".into())),
        };

        let cleanup = TaskCleanup {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            task_id: Some(task_id.clone()),
        };

        let verdict = match tokio::time::timeout(self.task_timeout, self.run_task(&task_id, request)).await {
            Ok(verdict) => {
                release_task(&self.client, &self.base_url, &task_id, false).await;
                verdict
            }
            Err(_) => {
                warn!(task = %task_id, "sqlmap task exceeded its deadline, stopping it");
                release_task(&self.client, &self.base_url, &task_id, true).await;
                Err(AdapterError::Timeout(self.task_timeout.as_secs()))
            }
        };
        cleanup.disarm();
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Endpoint, HttpMethod, PathTemplate, ResponseInfo};
    use std::collections::BTreeMap;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> InjectionRequest {
        InjectionRequest {
            url: "http://target.test/users/1?sort=name".into(),
            marked_url: "http://target.test/users/1*?sort=name".into(),
            method: HttpMethod::Get,
            params: BTreeMap::from([("id".to_string(), "1".to_string())]),
            body_params: BTreeMap::new(),
            headers: BTreeMap::new(),
        }
    }

    fn analyzer(server: &MockServer) -> SqlmapApiAnalyzer {
        SqlmapApiAnalyzer::new(&SqliConfig {
            enabled: true,
            api_url: server.uri(),
            poll_interval_ms: 10,
            ..SqliConfig::default()
        })
        .unwrap()
    }

    async fn mount_started_task(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/task/new"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true, "taskid": "abc123"})))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/scan/abc123/start"))
            .and(body_partial_json(json!({"url": "http://target.test/users/1*?sort=name", "method": "GET"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true, "engineid": 42})))
            .expect(1)
            .mount(server)
            .await;
    }

    async fn mount_task(server: &MockServer, data: Value, returncode: i64) {
        mount_started_task(server).await;
        Mock::given(method("GET"))
            .and(path("/scan/abc123/status"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"success": true, "status": "terminated", "returncode": returncode})),
            )
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/scan/abc123/data"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true, "data": data, "error": []})))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/task/abc123/delete"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .expect(1)
            .mount(server)
            .await;
    }

    async fn mount_running_task(server: &MockServer) {
        mount_started_task(server).await;
        Mock::given(method("GET"))
            .and(path("/scan/abc123/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true, "status": "running"})))
            .mount(server)
            .await;
        for release in ["/scan/abc123/stop", "/task/abc123/delete"] {
            Mock::given(method("GET"))
                .and(path(release))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
                .mount(server)
                .await;
        }
    }

    async fn released_paths(server: &MockServer) -> Vec<String> {
        server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .map(|r| r.url.path().to_string())
            .filter(|p| p.ends_with("/stop") || p.ends_with("/delete"))
            .collect()
    }

    #[tokio::test]
    async fn test_vulnerable_result() {
        let server = MockServer::start().await;
        let data = json!([{
            "status": 1,
            "type": 1,
            "value": [{
                "parameter": "id",
                "place": "GET",
                "data": {"1": {"title": "AND boolean-based blind - WHERE or HAVING clause"}}
            }]
        }]);
        mount_task(&server, data, 0).await;

        let verdict = analyzer(&server).analyze(&request()).await.unwrap();
        match verdict {
            Verdict::Vulnerable { evidence } => {
                assert!(evidence.contains("id (GET)"));
                assert!(evidence.contains("boolean-based blind"));
            }
            other => panic!("unexpected verdict {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_clean_result() {
        let server = MockServer::start().await;
        mount_task(&server, json!([]), 0).await;
        let verdict = analyzer(&server).analyze(&request()).await.unwrap();
        assert_eq!(verdict, Verdict::NotVulnerable);
    }

    #[tokio::test]
    async fn test_failed_run_is_inconclusive() {
        let server = MockServer::start().await;
        mount_task(&server, json!([]), 1).await;
        let verdict = analyzer(&server).analyze(&request()).await.unwrap();
        assert_eq!(verdict, Verdict::Inconclusive);
    }

    #[tokio::test]
    async fn test_unreachable_api_is_adapter_error() {
        let analyzer = SqlmapApiAnalyzer::new(&SqliConfig {
            api_url: "http://127.0.0.1:1".into(),
            ..SqliConfig::default()
        })
        .unwrap();
        let result = analyzer.analyze(&request()).await;
        assert!(matches!(result, Err(AdapterError::Http(_))));
    }

    #[tokio::test]
    async fn test_deadline_stops_and_deletes_task() {
        let server = MockServer::start().await;
        mount_running_task(&server).await;
        let analyzer = SqlmapApiAnalyzer::new(&SqliConfig {
            enabled: true,
            api_url: server.uri(),
            poll_interval_ms: 10,
            timeout_secs: 1,
            ..SqliConfig::default()
        })
        .unwrap();

        let result = analyzer.analyze(&request()).await;
        assert_eq!(result, Err(AdapterError::Timeout(1)));
        assert_eq!(
            released_paths(&server).await,
            vec!["/scan/abc123/stop", "/task/abc123/delete"]
        );
    }

    #[tokio::test]
    async fn test_abandoned_analysis_releases_task() {
        let server = MockServer::start().await;
        mount_running_task(&server).await;
        let analyzer = analyzer(&server);

        let abandoned =
            tokio::time::timeout(Duration::from_millis(300), analyzer.analyze(&request())).await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(
            released_paths(&server).await,
            vec!["/scan/abc123/stop", "/task/abc123/delete"]
        );
    }

    #[test]
    fn test_path_parameter_marked_for_injection() {
        let template = PathTemplate::parse("/users/{id}");
        let endpoint = Endpoint::new(
            format!("http://target.test{}", template.resolve()),
            template.path.clone(),
            HttpMethod::Get,
            ResponseInfo::new(200, Default::default(), b"{}"),
        )
        .with_params(template.params);

        let body = SqlmapApiAnalyzer::start_body(&InjectionRequest::from_endpoint(&endpoint, None));
        assert_eq!(body["url"], "http://target.test/users/1*");
        assert_eq!(body["method"], "GET");
    }

    #[test]
    fn test_start_body_carries_form_data_and_headers() {
        let mut req = request();
        req.method = HttpMethod::Post;
        req.body_params.insert("name".into(), "a b".into());
        req.headers.insert("Authorization".into(), "Bearer t".into());

        let body = SqlmapApiAnalyzer::start_body(&req);
        assert_eq!(body["url"], "http://target.test/users/1*?sort=name");
        assert_eq!(body["method"], "POST");
        assert_eq!(body["data"], "name=a%20b");
        assert_eq!(body["headers"], "Authorization: Bearer t");
    }
}
