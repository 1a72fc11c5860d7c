use serde_json::Value;

use crate::models::{HttpMethod, Param, ParamLocation, PathTemplate};

/// An operation advertised by an OpenAPI / Swagger document.
#[derive(Debug, Clone)]
pub struct ApiOperation {
    pub method: HttpMethod,
    pub template: PathTemplate,
    pub body_example: Option<Value>,
}

/// Extracts operations from OpenAPI v3 and Swagger v2 documents found
/// during discovery.
pub struct OpenApiParser;

enum OpenApiVersion {
    V3,
    V2,
}

impl OpenApiParser {
    /// Whether a JSON body looks like an API description document.
    pub fn is_api_document(body: &Value) -> bool {
        Self::detect_version(body).is_some() && body.get("paths").is_some_and(Value::is_object)
    }

    pub fn parse(doc: &Value) -> Vec<ApiOperation> {
        let Some(version) = Self::detect_version(doc) else {
            return Vec::new();
        };
        let Some(paths) = doc.get("paths").and_then(Value::as_object) else {
            return Vec::new();
        };
        let prefix = Self::base_path(doc, &version);

        let mut operations = Vec::new();
        for (path, methods) in paths {
            let Some(methods_obj) = methods.as_object() else {
                continue;
            };

            // Path-item level parameters apply to every operation below it.
            let shared: Vec<Value> = methods_obj
                .get("parameters")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();

            for (method_str, operation) in methods_obj {
                let Some(method) = HttpMethod::parse(method_str) else {
                    continue;
                };

                let mut declared = shared.clone();
                if let Some(params) = operation.get("parameters").and_then(Value::as_array) {
                    declared.extend(params.iter().cloned());
                }

                let full_path = format!("{}{}", prefix, path);
                let mut template = PathTemplate::parse(&full_path);
                Self::merge_parameters(&mut template, &declared, &full_path);

                let body_example = match version {
                    OpenApiVersion::V3 => operation
                        .get("requestBody")
                        .and_then(Self::extract_request_body_example_v3),
                    OpenApiVersion::V2 => Self::extract_body_param_example_v2(&declared),
                };

                operations.push(ApiOperation {
                    method,
                    template,
                    body_example,
                });
            }
        }

        operations
    }

    fn detect_version(doc: &Value) -> Option<OpenApiVersion> {
        if doc.get("openapi").is_some() {
            Some(OpenApiVersion::V3)
        } else if doc.get("swagger").is_some() {
            Some(OpenApiVersion::V2)
        } else {
            None
        }
    }

    fn base_path(doc: &Value, version: &OpenApiVersion) -> String {
        let raw = match version {
            OpenApiVersion::V2 => doc.get("basePath").and_then(Value::as_str).map(str::to_string),
            OpenApiVersion::V3 => doc
                .get("servers")
                .and_then(Value::as_array)
                .and_then(|s| s.first())
                .and_then(|s| s.get("url"))
                .and_then(Value::as_str)
                .map(|u| match url::Url::parse(u) {
                    Ok(parsed) => parsed.path().to_string(),
                    Err(_) => u.to_string(),
                }),
        };

        raw.map(|p| p.trim_end_matches('/').to_string())
            .filter(|p| p.starts_with('/'))
            .unwrap_or_default()
    }

    fn merge_parameters(template: &mut PathTemplate, params: &[Value], path: &str) {
        for param in params {
            let location = match param.get("in").and_then(Value::as_str) {
                Some("path") => ParamLocation::Path,
                Some("query") => ParamLocation::Query,
                _ => continue,
            };
            let Some(name) = param.get("name").and_then(Value::as_str) else {
                continue;
            };

            if location == ParamLocation::Path && !path.contains(&format!("{{{}}}", name)) {
                continue;
            }
            if template
                .params
                .iter()
                .any(|p| p.name == name && p.location == location)
            {
                continue;
            }

            let mut declared = Param::new(name, location);
            if let Some(example) = param
                .get("example")
                .or_else(|| param.get("schema").and_then(|s| s.get("example")))
            {
                declared.value = match example {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
            }
            template.params.push(declared);
        }
    }

    fn extract_request_body_example_v3(request_body: &Value) -> Option<Value> {
        let json_content = request_body.get("content")?.get("application/json")?;

        if let Some(example) = json_content.get("example") {
            return Some(example.clone());
        }

        json_content
            .get("examples")
            .and_then(Value::as_object)
            .and_then(|examples| examples.values().next())
            .and_then(|first| first.get("value"))
            .cloned()
    }

    fn extract_body_param_example_v2(params: &[Value]) -> Option<Value> {
        params
            .iter()
            .filter(|p| p.get("in").and_then(Value::as_str) == Some("body"))
            .find_map(|p| p.get("schema").and_then(|s| s.get("example")).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_openapi_v3() {
        let doc = json!({
            "openapi": "3.0.0",
            "servers": [{"url": "https://api.example.test/v1"}],
            "paths": {
                "/users/{userId}": {
                    "get": {
                        "parameters": [
                            {"name": "userId", "in": "path", "schema": {"type": "integer"}},
                            {"name": "fields", "in": "query"}
                        ]
                    },
                    "put": {
                        "requestBody": {
                            "content": {"application/json": {"example": {"name": "x"}}}
                        }
                    }
                }
            }
        });

        assert!(OpenApiParser::is_api_document(&doc));
        let ops = OpenApiParser::parse(&doc);
        assert_eq!(ops.len(), 2);

        let get = ops.iter().find(|o| o.method == HttpMethod::Get).unwrap();
        assert_eq!(get.template.path, "/v1/users/{userId}");
        assert_eq!(get.template.params.len(), 2);
        assert_eq!(get.template.params[1].location, ParamLocation::Query);

        let put = ops.iter().find(|o| o.method == HttpMethod::Put).unwrap();
        assert_eq!(put.body_example, Some(json!({"name": "x"})));
    }

    #[test]
    fn test_parse_swagger_v2_body_example() {
        let doc = json!({
            "swagger": "2.0",
            "basePath": "/api",
            "paths": {
                "/orders": {
                    "post": {
                        "parameters": [
                            {"in": "body", "name": "order", "schema": {"example": {"sku": "a1", "qty": 2}}}
                        ]
                    }
                }
            }
        });

        let ops = OpenApiParser::parse(&doc);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].template.path, "/api/orders");
        assert_eq!(ops[0].body_example, Some(json!({"sku": "a1", "qty": 2})));
    }

    #[test]
    fn test_non_api_document_ignored() {
        let body = json!({"status": "ok"});
        assert!(!OpenApiParser::is_api_document(&body));
        assert!(OpenApiParser::parse(&body).is_empty());
    }
}
