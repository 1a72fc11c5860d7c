use serde::{Deserialize, Serialize};
use std::fmt;

use super::ResponseInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl HttpMethod {
    pub const DEFAULT_SET: [HttpMethod; 5] = [
        HttpMethod::Get,
        HttpMethod::Post,
        HttpMethod::Put,
        HttpMethod::Delete,
        HttpMethod::Options,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "GET" => Some(HttpMethod::Get),
            "POST" => Some(HttpMethod::Post),
            "PUT" => Some(HttpMethod::Put),
            "PATCH" => Some(HttpMethod::Patch),
            "DELETE" => Some(HttpMethod::Delete),
            "HEAD" => Some(HttpMethod::Head),
            "OPTIONS" => Some(HttpMethod::Options),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }

    pub fn requires_body(&self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }

    /// Methods that change server state.
    pub fn is_destructive(&self) -> bool {
        matches!(self, HttpMethod::Put | HttpMethod::Patch | HttpMethod::Delete)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamLocation {
    Path,
    Query,
    Body,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamType {
    String,
    Integer,
    Uuid,
    Boolean,
    Url,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub location: ParamLocation,
    pub param_type: ParamType,
    pub value: String,
}

impl Param {
    pub fn new(name: impl Into<String>, location: ParamLocation) -> Self {
        let name = name.into();
        let param_type = infer_param_type(&name);
        let value = default_value(param_type);
        Self {
            name,
            location,
            param_type,
            value,
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = value.into();
        self
    }
}

fn default_value(param_type: ParamType) -> String {
    match param_type {
        ParamType::String => "test".to_string(),
        ParamType::Integer => "1".to_string(),
        ParamType::Uuid => "00000000-0000-0000-0000-000000000001".to_string(),
        ParamType::Boolean => "true".to_string(),
        ParamType::Url => "https://example.com/".to_string(),
    }
}

fn infer_param_type(name: &str) -> ParamType {
    let lower = name.to_lowercase();
    if lower.contains("uuid") || lower.contains("guid") {
        ParamType::Uuid
    } else if matches!(
        lower.as_str(),
        "url" | "uri" | "callback" | "webhook" | "redirect" | "redirect_uri" | "return_url"
            | "next" | "dest" | "destination" | "feed" | "proxy" | "image_url" | "target"
    ) || lower.ends_with("_url")
    {
        ParamType::Url
    } else if lower == "id"
        || lower.ends_with("id")
        || lower.contains("count")
        || lower.contains("num")
        || lower == "page"
        || lower == "limit"
    {
        ParamType::Integer
    } else if lower.contains("enabled") || lower.contains("active") || lower.contains("flag") {
        ParamType::Boolean
    } else {
        ParamType::String
    }
}

/// A wordlist entry such as `/users/{id}?fields=` split into its path and
/// declared parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    pub path: String,
    pub params: Vec<Param>,
}

impl PathTemplate {
    pub fn parse(entry: &str) -> Self {
        let entry = entry.trim();
        let (raw_path, query) = match entry.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (entry, None),
        };

        let mut path = if raw_path.starts_with('/') {
            raw_path.to_string()
        } else {
            format!("/{}", raw_path)
        };
        if path.len() > 1 && path.ends_with('/') {
            path.pop();
        }

        let mut params: Vec<Param> = path
            .split('/')
            .filter(|s| s.len() > 2 && s.starts_with('{') && s.ends_with('}'))
            .map(|s| Param::new(&s[1..s.len() - 1], ParamLocation::Path))
            .collect();

        if let Some(query) = query {
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
                let mut param = Param::new(name, ParamLocation::Query);
                if !value.is_empty() {
                    param.value = value.to_string();
                }
                params.push(param);
            }
        }

        Self { path, params }
    }

    /// The concrete path and query string, with every placeholder filled in.
    pub fn resolve(&self) -> String {
        let mut resolved = self.path.clone();
        let mut query = Vec::new();

        for param in &self.params {
            match param.location {
                ParamLocation::Path => {
                    resolved = resolved.replace(
                        &format!("{{{}}}", param.name),
                        &urlencoding::encode(&param.value),
                    );
                }
                ParamLocation::Query => query.push(format!(
                    "{}={}",
                    urlencoding::encode(&param.name),
                    urlencoding::encode(&param.value)
                )),
                ParamLocation::Body => {}
            }
        }

        if query.is_empty() {
            resolved
        } else {
            format!("{}?{}", resolved, query.join("&"))
        }
    }
}

/// A reachable `(url, method)` pair and the response captured when it was
/// discovered. Endpoints are read-only once the Discoverer hands them out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub url: String,
    pub path: String,
    pub method: HttpMethod,
    pub params: Vec<Param>,
    pub request_body_example: Option<serde_json::Value>,
    pub authenticated: bool,
    pub response: ResponseInfo,
}

impl Endpoint {
    pub fn new(url: String, path: String, method: HttpMethod, response: ResponseInfo) -> Self {
        Self {
            url,
            path,
            method,
            params: Vec::new(),
            request_body_example: None,
            authenticated: false,
            response,
        }
    }

    pub fn with_params(mut self, params: Vec<Param>) -> Self {
        self.params = params;
        self
    }

    pub fn status(&self) -> u16 {
        self.response.status
    }

    pub fn is_success(&self) -> bool {
        self.response.is_success()
    }

    pub fn is_access_denied(&self) -> bool {
        matches!(self.response.status, 401 | 403)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.response.header(name)
    }

    pub fn is_https(&self) -> bool {
        self.url.starts_with("https://")
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.path.split('/').filter(|s| !s.is_empty())
    }

    /// Whether any path segment contains one of the lowercase `keywords`.
    pub fn path_contains_any(&self, keywords: &[&str]) -> bool {
        self.segments().any(|segment| {
            let segment = segment.to_lowercase();
            keywords.iter().any(|k| segment.contains(k))
        })
    }

    /// Template segments paired with the URL path segments they resolved
    /// to, as `(url segment index, template, concrete)`. Aligned from the end
    /// so a base path on the target does not shift them.
    pub fn aligned_segments(&self) -> Vec<(usize, &str, String)> {
        let resolved = self.resolved_path();
        let concrete: Vec<&str> = resolved.split('/').filter(|s| !s.is_empty()).collect();
        let template: Vec<&str> = self.segments().collect();
        let offset = concrete.len().saturating_sub(template.len());

        template
            .into_iter()
            .enumerate()
            .map(|(i, segment)| {
                let index = offset + i;
                let value = concrete.get(index).copied().unwrap_or(segment).to_string();
                (index, segment, value)
            })
            .collect()
    }

    /// URL path segment indexes filled in from `{param}` placeholders.
    pub fn placeholder_positions(&self) -> Vec<usize> {
        self.aligned_segments()
            .into_iter()
            .filter(|(_, template, _)| is_placeholder(template))
            .map(|(index, _, _)| index)
            .collect()
    }

    /// Index and value of the URL path segment naming a single object: a
    /// numeric id, a UUID or a `{param}` placeholder.
    pub fn object_id_position(&self) -> Option<(usize, String)> {
        self.aligned_segments()
            .into_iter()
            .find(|(_, template, _)| is_placeholder(template) || is_object_id(template))
            .map(|(index, _, value)| (index, value))
    }

    pub fn object_id_segment(&self) -> Option<String> {
        self.object_id_position().map(|(_, id)| id)
    }

    /// Path portion of the resolved URL.
    pub fn resolved_path(&self) -> String {
        url::Url::parse(&self.url)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| self.path.clone())
    }

    pub fn has_params(&self) -> bool {
        !self.params.is_empty()
    }

    pub fn params_at(&self, location: ParamLocation) -> impl Iterator<Item = &Param> {
        self.params.iter().filter(move |p| p.location == location)
    }

    pub fn display_path(&self) -> String {
        format!("{:7} {}", self.method, self.path)
    }

    /// Sort key giving endpoints a stable order across runs.
    pub fn sort_key(&self) -> (String, HttpMethod) {
        (self.path.clone(), self.method)
    }
}

fn is_placeholder(segment: &str) -> bool {
    segment.len() > 2 && segment.starts_with('{') && segment.ends_with('}')
}

pub(crate) fn is_object_id(segment: &str) -> bool {
    if segment.is_empty() {
        return false;
    }
    if segment.chars().all(|c| c.is_ascii_digit()) {
        return true;
    }
    segment.len() == 36
        && segment.chars().filter(|c| *c == '-').count() == 4
        && segment.chars().all(|c| c.is_ascii_hexdigit() || c == '-')
}
