//! Built-in discovery paths. Entries may carry `{param}` placeholders and
//! `?name=` query parameters; see `PathTemplate`.

const COMMON_PATHS: &[&str] = &["/api", "/v1", "/graphql", "/rest", "/admin"];

const VERSIONED_PATHS: &[&str] = &[
    "/api/v1",
    "/api/v2",
    "/api/v3",
    "/v2",
    "/api/beta",
    "/api/internal",
    "/api/legacy",
];

const RESOURCE_PATHS: &[&str] = &[
    "/users",
    "/users/{id}",
    "/api/users",
    "/api/users/{id}",
    "/api/v1/users",
    "/api/v1/users/{id}",
    "/accounts/{id}",
    "/api/orders",
    "/api/orders/{id}",
    "/api/products?search=",
    "/api/search?q=",
];

const AUTH_PATHS: &[&str] = &[
    "/login",
    "/api/login",
    "/api/auth/login",
    "/api/auth/token",
    "/oauth/token",
    "/api/password/reset",
    "/api/register",
];

const BUSINESS_PATHS: &[&str] = &["/api/checkout", "/api/payments", "/api/transfer", "/api/coupons/redeem"];

const INTEGRATION_PATHS: &[&str] = &[
    "/api/fetch?url=",
    "/api/proxy?url=",
    "/api/webhooks",
    "/api/import?source=",
];

const DOC_PATHS: &[&str] = &[
    "/swagger.json",
    "/openapi.json",
    "/api-docs",
    "/v2/api-docs",
    "/v3/api-docs",
    "/swagger-ui.html",
];

const OPS_PATHS: &[&str] = &[
    "/health",
    "/status",
    "/metrics",
    "/actuator",
    "/actuator/env",
    "/debug",
    "/admin/users",
    "/api/admin",
    "/api/admin/users",
    "/internal/config",
];

pub fn default_paths() -> Vec<String> {
    [
        COMMON_PATHS,
        VERSIONED_PATHS,
        RESOURCE_PATHS,
        AUTH_PATHS,
        BUSINESS_PATHS,
        INTEGRATION_PATHS,
        DOC_PATHS,
        OPS_PATHS,
    ]
    .iter()
    .flat_map(|group| group.iter().map(|p| p.to_string()))
    .collect()
}
