use anyhow::Result;
use serde_json::{Value, json};

use super::ReportSink;
use crate::models::{EndpointReport, ParamLocation, ScanReport};

const SCHEMA: &str = "https://schema.getpostman.com/json/collection/v2.1.0/collection.json";

/// Postman v2.1 collection with one folder per target and one request per
/// discovered endpoint. Findings go into the request description.
pub struct PostmanExporter;

impl PostmanExporter {
    fn request_item(report: &EndpointReport) -> Value {
        let endpoint = &report.endpoint;
        let parsed = url::Url::parse(&endpoint.url).ok();

        let mut url = json!({ "raw": endpoint.url });
        if let Some(parsed) = &parsed {
            url["protocol"] = json!(parsed.scheme());
            url["host"] = json!(parsed
                .host_str()
                .unwrap_or_default()
                .split('.')
                .collect::<Vec<_>>());
            if let Some(port) = parsed.port() {
                url["port"] = json!(port.to_string());
            }
            url["path"] = json!(parsed
                .path_segments()
                .map(|s| s.filter(|p| !p.is_empty()).collect::<Vec<_>>())
                .unwrap_or_default());
            let query: Vec<Value> = parsed
                .query_pairs()
                .map(|(k, v)| json!({ "key": k, "value": v }))
                .collect();
            if !query.is_empty() {
                url["query"] = Value::Array(query);
            }
        }

        let mut request = json!({
            "method": endpoint.method.as_str(),
            "header": [{ "key": "Accept", "value": "application/json" }],
            "url": url,
            "description": Self::description(report),
        });

        if endpoint.method.requires_body() {
            let body = endpoint.request_body_example.clone().unwrap_or_else(|| {
                let fields: serde_json::Map<String, Value> = endpoint
                    .params_at(ParamLocation::Body)
                    .map(|p| (p.name.clone(), Value::String(p.value.clone())))
                    .collect();
                Value::Object(fields)
            });
            request["body"] = json!({
                "mode": "raw",
                "raw": serde_json::to_string_pretty(&body).unwrap_or_else(|_| "{}".to_string()),
                "options": { "raw": { "language": "json" } },
            });
        }

        json!({
            "name": format!("{} {}", endpoint.method, endpoint.path),
            "request": request,
        })
    }

    fn description(report: &EndpointReport) -> String {
        let mut lines = vec![format!(
            "Risk tier: {} (HTTP {})",
            report.tier(),
            report.endpoint.status()
        )];
        for finding in &report.findings {
            lines.push(format!(
                "- [{}] {} {}: {}",
                finding.severity,
                finding.category.id(),
                finding.category.title(),
                finding.description
            ));
        }
        lines.join("\n")
    }
}

impl ReportSink for PostmanExporter {
    fn file_name(&self) -> &'static str {
        "api_sentinel_collection.postman_collection.json"
    }

    fn render(&self, reports: &[ScanReport]) -> Result<String> {
        let folders: Vec<Value> = reports
            .iter()
            .filter(|r| !r.endpoints.is_empty())
            .map(|r| {
                json!({
                    "name": r.target,
                    "item": r.endpoints.iter().map(Self::request_item).collect::<Vec<_>>(),
                })
            })
            .collect();

        let collection = json!({
            "info": {
                "name": "APISentinel discovered endpoints",
                "description": format!("Generated by {} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
                "schema": SCHEMA,
            },
            "item": folders,
        });
        Ok(serde_json::to_string_pretty(&collection)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::testing::sample_reports;

    #[test]
    fn test_collection_structure() {
        let rendered = PostmanExporter.render(&sample_reports()).unwrap();
        let collection: Value = serde_json::from_str(&rendered).unwrap();

        assert_eq!(collection["info"]["schema"], SCHEMA);
        let folders = collection["item"].as_array().unwrap();
        assert_eq!(folders.len(), 1);
        assert_eq!(folders[0]["name"], "http://example.test");

        let item = &folders[0]["item"][0];
        assert_eq!(item["name"], "GET /users/{id}");
        assert_eq!(item["request"]["method"], "GET");
        assert_eq!(item["request"]["url"]["raw"], "http://example.test/users/1");
        assert_eq!(item["request"]["url"]["path"], json!(["users", "1"]));
        assert!(item["request"]["description"]
            .as_str()
            .unwrap()
            .contains("API1:2023"));
        assert!(item["request"].get("body").is_none());
    }
}
