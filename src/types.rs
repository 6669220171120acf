use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::utils::log_sanitizer::mask_secret;

// ============ Credentials ============

/// Identity/secret pair used to authenticate against a provider API.
///
/// The same struct serves both authentication schemes: for request signing the
/// secret is the HMAC key, for session-token flows the pair is exchanged for a
/// [`SessionToken`] by a [`SessionAuthority`](crate::SessionAuthority).
///
/// Credentials are compared and hashed by value, which makes them usable as
/// cache keys. `Debug` output masks the secret.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiCredentials {
    /// Account identity (access key ID, API key name, tenant user).
    pub identity: String,
    /// Secret associated with the identity.
    pub secret: String,
}

impl ApiCredentials {
    /// Create a new credential pair.
    pub fn new(identity: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            secret: secret.into(),
        }
    }
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("identity", &self.identity)
            .field("secret", &mask_secret(&self.secret))
            .finish()
    }
}

// ============ Session Token ============

/// A session token issued by a provider's authentication endpoint.
///
/// Obtained through [`SessionAuthority::login`](crate::SessionAuthority::login)
/// and cached by [`SessionCache`](crate::SessionCache). The token value is sent
/// verbatim in the session header of authenticated requests.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionToken {
    /// Opaque token value.
    pub value: String,
    /// When the token was issued.
    pub issued_at: DateTime<Utc>,
    /// Validity window reported by the provider. A zero duration means the
    /// provider did not report one, and the session cache applies its own
    /// configured TTL.
    pub ttl: Duration,
}

impl SessionToken {
    /// Create a token issued now with the given validity window.
    pub fn new(value: impl Into<String>, ttl: Duration) -> Self {
        Self {
            value: value.into(),
            issued_at: Utc::now(),
            ttl,
        }
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionToken")
            .field("value", &mask_secret(&self.value))
            .field("issued_at", &self.issued_at)
            .field("ttl", &self.ttl)
            .finish()
    }
}

// ============ Request Spec ============

/// HTTP method of a bound request.
///
/// Serialized as uppercase strings (`"GET"`, `"POST"`, etc.).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// HTTP GET.
    Get,
    /// HTTP POST.
    Post,
    /// HTTP PUT.
    Put,
    /// HTTP PATCH.
    Patch,
    /// HTTP DELETE.
    Delete,
}

impl Method {
    /// Uppercase method name, as used on the wire and in canonical requests.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A provider-shaped HTTP request produced by a
/// [`RequestBinder`](crate::RequestBinder).
///
/// Path and query are kept separate from the endpoint so authenticators can
/// compute canonical signatures before the final URL is assembled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSpec {
    /// HTTP method.
    pub method: Method,
    /// Scheme and host without a trailing slash (e.g. `"https://api.example.com"`).
    pub endpoint: String,
    /// Absolute path beginning with `/`.
    pub path: String,
    /// Query parameters in insertion order.
    pub query: Vec<(String, String)>,
    /// Request headers in insertion order.
    pub headers: Vec<(String, String)>,
    /// Optional JSON body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

impl RequestSpec {
    /// Create a request spec with no query, headers or body.
    pub fn new(method: Method, endpoint: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method,
            endpoint: endpoint.into(),
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Append a query parameter.
    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Append a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the JSON body.
    #[must_use]
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Canonical query string: pairs sorted by key (then value), keys and
    /// values percent-encoded.
    ///
    /// Used both for the final URL and as the query component of canonical
    /// requests during signing, so signed requests hit the wire exactly as
    /// signed.
    pub fn canonical_query(&self) -> String {
        let mut pairs: Vec<&(String, String)> = self.query.iter().collect();
        pairs.sort();
        pairs
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Full request URL including the canonical query string.
    pub fn url(&self) -> String {
        let query = self.canonical_query();
        if query.is_empty() {
            format!("{}{}", self.endpoint, self.path)
        } else {
            format!("{}{}?{}", self.endpoint, self.path, query)
        }
    }

    /// Host portion of the endpoint, as used in the `Host` header of
    /// canonical requests.
    pub fn host(&self) -> &str {
        let rest = self
            .endpoint
            .strip_prefix("https://")
            .or_else(|| self.endpoint.strip_prefix("http://"))
            .unwrap_or(&self.endpoint);
        rest.split('/').next().unwrap_or(rest)
    }

    /// Look up a header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

// ============ Provider Response ============

/// Raw HTTP response handed back by a [`Transport`](crate::Transport).
///
/// The dispatcher classifies the status code and the configured
/// [`ResponseParser`](crate::ResponseParser) decodes the body; transports only
/// move bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: Vec<(String, String)>,
    /// Raw response body.
    pub body: String,
}

impl ProviderResponse {
    /// Create a response with the given status and no headers or body.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Append a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Whether the status code is in the 2xx range.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Look up a header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Parse the `Retry-After` header as whole seconds, if present.
    pub fn retry_after(&self) -> Option<u64> {
        self.header("retry-after").and_then(|v| v.parse::<u64>().ok())
    }
}
