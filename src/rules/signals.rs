//! Response signals shared by several checkers.

use regex::Regex;
use std::sync::LazyLock;

use crate::models::ResponseInfo;

const RATE_LIMIT_HEADERS: &[&str] = &[
    "x-ratelimit-limit",
    "x-ratelimit-remaining",
    "x-rate-limit-limit",
    "ratelimit-limit",
    "ratelimit-policy",
    "ratelimit",
    "retry-after",
];

pub fn has_rate_limit_headers(response: &ResponseInfo) -> bool {
    RATE_LIMIT_HEADERS.iter().any(|h| response.has_header(h))
}

pub const AUTH_PATH_KEYWORDS: &[&str] = &[
    "login", "signin", "sign-in", "auth", "token", "oauth", "session", "password", "passwd",
    "register", "signup", "sign-up", "mfa", "otp",
];

pub const PRIVILEGED_PATH_KEYWORDS: &[&str] = &[
    "admin", "internal", "manage", "management", "superuser", "root", "debug", "actuator",
    "config", "console", "staff", "sudo", "privileged",
];

pub const BUSINESS_FLOW_KEYWORDS: &[&str] = &[
    "checkout", "purchase", "order", "payment", "pay", "transfer", "withdraw", "coupon",
    "redeem", "voucher", "booking", "reserve", "ticket", "vote", "invite", "referral",
    "register", "signup", "comment", "review",
];

/// Role and ownership properties a client should never be able to set.
pub const PRIVILEGED_PROPERTIES: &[&str] = &[
    "role", "roles", "is_admin", "isadmin", "admin", "permissions", "privileges", "scope",
    "is_staff", "is_superuser", "verified", "is_verified", "balance", "credit", "owner_id",
    "account_type", "plan", "tier",
];

/// Field names that should not leave the server.
pub struct SensitiveFields {
    patterns: Vec<Regex>,
}

static SENSITIVE_FIELDS: LazyLock<SensitiveFields> = LazyLock::new(|| {
    let patterns = [
        r"(?i)passw(or)?d",
        r"(?i)secret",
        r"(?i)(^|[._\[])(access_|refresh_|auth_|api_)?token($|[._\]])",
        r"(?i)api[_-]?key",
        r"(?i)private[_-]?key",
        r"(?i)(^|[._])ssn($|[._])",
        r"(?i)credit[_-]?card",
        r"(?i)card[_-]?number",
        r"(?i)(^|[._])cvv($|[._])",
        r"(?i)routing[_-]?number",
        r"(?i)account[_-]?number",
        r"(?i)salt",
        r"(?i)otp[_-]?secret",
    ];
    SensitiveFields {
        patterns: patterns
            .iter()
            .map(|p| Regex::new(p).expect("sensitive field pattern is valid"))
            .collect(),
    }
});

impl SensitiveFields {
    pub fn shared() -> &'static SensitiveFields {
        &SENSITIVE_FIELDS
    }

    pub fn is_sensitive(&self, key: &str) -> bool {
        let leaf = key.rsplit('.').next().unwrap_or(key);
        self.patterns.iter().any(|p| p.is_match(leaf))
    }

    pub fn find<'a>(&self, keys: &'a [String]) -> Vec<&'a String> {
        keys.iter().filter(|k| self.is_sensitive(k)).collect()
    }
}

static ERROR_LEAK_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"Traceback \(most recent call last\)", "Python traceback"),
        (r"at [a-zA-Z_$][\w$]*(\.[\w$]+)+\([\w$]+\.java:\d+\)", "Java stack trace"),
        (r"(?i)System\.[A-Za-z]+Exception", ".NET exception"),
        (r"(?i)(SQLSTATE\[|ORA-\d{5}|PG::|mysql_fetch|You have an error in your SQL syntax)", "SQL error"),
        (r"(?i)<b>(Fatal error|Warning)</b>:", "PHP error"),
        (r"\bat [\w.<>]+ \(/[^)]+\.js:\d+:\d+\)", "Node.js stack trace"),
        (r#"(?i)"(stack|stacktrace|trace)"\s*:"#, "stack trace field"),
    ]
    .into_iter()
    .map(|(p, label)| (Regex::new(p).expect("error pattern is valid"), label))
    .collect()
});

/// Labels of verbose-error signatures present in `body`.
pub fn error_leaks(body: &str) -> Vec<&'static str> {
    ERROR_LEAK_PATTERNS
        .iter()
        .filter(|(re, _)| re.is_match(body))
        .map(|(_, label)| *label)
        .collect()
}

static VERSION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+\.\d+").expect("version pattern is valid"));

pub fn discloses_version(header_value: &str) -> bool {
    VERSION_PATTERN.is_match(header_value)
}

/// Every `http://` / `https://` URL string value in a JSON document.
pub fn json_urls(value: &serde_json::Value) -> Vec<String> {
    let mut urls = Vec::new();
    collect_urls(value, &mut urls);
    urls
}

fn collect_urls(value: &serde_json::Value, out: &mut Vec<String>) {
    match value {
        serde_json::Value::String(s) if s.starts_with("http://") || s.starts_with("https://") => {
            out.push(s.clone())
        }
        serde_json::Value::Array(items) => items.iter().for_each(|v| collect_urls(v, out)),
        serde_json::Value::Object(map) => map.values().for_each(|v| collect_urls(v, out)),
        _ => {}
    }
}
