use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::session::SessionSupplier;
use crate::types::{ApiCredentials, ProviderResponse, RequestSpec};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the session token on authenticated requests.
pub const SESSION_TOKEN_HEADER: &str = "X-Session-Token";

/// Signing scheme identifier used in `Authorization` headers.
const SIGNING_ALGORITHM: &str = "CBR1-HMAC-SHA256";

/// Headers included in the canonical request, sorted and semicolon-joined.
const SIGNED_HEADERS: &str = "host;x-cbr-content-sha256;x-cbr-date;x-cbr-nonce";

/// SHA-256 hex digest of an empty payload, used when signing bodyless requests.
const EMPTY_BODY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

// ============ Auth Scheme ============

/// Which authentication strategy a provider binding uses.
///
/// Selected once at wiring time from configuration; see
/// [`RuntimeBuilder::auth_scheme`](crate::RuntimeBuilder::auth_scheme).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthScheme {
    /// Every request carries an HMAC signature derived from the credentials.
    RequestSigning,
    /// Requests carry a session token obtained from a login endpoint and
    /// cached in a [`SessionCache`](crate::SessionCache).
    SessionToken,
}

impl AuthScheme {
    /// Configuration string for this scheme.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RequestSigning => "request-signing",
            Self::SessionToken => "session-token",
        }
    }
}

impl std::fmt::Display for AuthScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown [`AuthScheme`] string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown authentication scheme '{0}', expected 'request-signing' or 'session-token'")]
pub struct UnknownAuthScheme(pub String);

impl FromStr for AuthScheme {
    type Err = UnknownAuthScheme;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "request-signing" => Ok(Self::RequestSigning),
            "session-token" => Ok(Self::SessionToken),
            other => Err(UnknownAuthScheme(other.to_string())),
        }
    }
}

// ============ Authenticator Trait ============

/// 认证 Trait
///
/// 在已绑定的请求上补充认证信息。同一运行时内的所有请求共用一个
/// authenticator，由 [`RuntimeBuilder`](crate::RuntimeBuilder) 按配置选择实现。
#[async_trait]
pub trait RequestAuthenticator: Send + Sync {
    /// 该 authenticator 实现的认证方案
    fn scheme(&self) -> AuthScheme;

    /// 为请求补充认证信息
    ///
    /// 会话方案在此处获取（必要时建立）会话；登录失败映射为
    /// [`RuntimeError::AuthenticationFailed`](crate::RuntimeError::AuthenticationFailed)。
    async fn authenticate(&self, spec: RequestSpec) -> Result<RequestSpec>;

    /// 收到 401 后的清理动作
    ///
    /// 会话方案清除缓存令牌；签名方案无状态，默认空实现。
    async fn on_unauthorized(&self) {}
}

// ============ Request Signing ============

/// Request-signing authenticator implementing the `CBR1-HMAC-SHA256` scheme.
///
/// Each request is reduced to a canonical form (method, path, sorted query,
/// signed headers, payload hash), the canonical form is HMAC-signed with the
/// credential secret, and the result travels in the `Authorization` header.
/// The signer is stateless: there is no server round trip at wiring time and
/// nothing to invalidate when the provider rejects a request.
pub struct HmacRequestSigner {
    provider: String,
    credentials: ApiCredentials,
}

impl HmacRequestSigner {
    /// Create a signer for the given credentials.
    pub fn new(provider: impl Into<String>, credentials: ApiCredentials) -> Self {
        Self {
            provider: provider.into(),
            credentials,
        }
    }

    /// 生成 CBR1-HMAC-SHA256 签名
    pub(crate) fn sign(
        &self,
        method: &str,
        path: &str,
        query_string: &str,
        host: &str,
        payload_hash: &str,
        timestamp: &str,
        nonce: &str,
    ) -> String {
        // 1. 构造规范化请求头
        let canonical_headers = format!(
            "host:{host}\nx-cbr-content-sha256:{payload_hash}\nx-cbr-date:{timestamp}\nx-cbr-nonce:{nonce}\n"
        );

        // 2. 构造规范化请求
        let canonical_request = format!(
            "{method}\n{path}\n{query_string}\n{canonical_headers}\n{SIGNED_HEADERS}\n{payload_hash}"
        );

        log::debug!("[{}] CanonicalRequest:\n{canonical_request}", self.provider);

        // 3. 构造待签名字符串
        let hashed_canonical_request = hex::encode(Sha256::digest(canonical_request.as_bytes()));
        let string_to_sign = format!("{SIGNING_ALGORITHM}\n{hashed_canonical_request}");

        log::debug!("[{}] StringToSign:\n{string_to_sign}", self.provider);

        // 4. 计算签名
        let signature = hex::encode(hmac_sha256(
            self.credentials.secret.as_bytes(),
            string_to_sign.as_bytes(),
        ));

        // 5. 构造 Authorization 头
        format!(
            "{SIGNING_ALGORITHM} Credential={},SignedHeaders={SIGNED_HEADERS},Signature={signature}",
            self.credentials.identity
        )
    }
}

#[async_trait]
impl RequestAuthenticator for HmacRequestSigner {
    fn scheme(&self) -> AuthScheme {
        AuthScheme::RequestSigning
    }

    async fn authenticate(&self, spec: RequestSpec) -> Result<RequestSpec> {
        let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let nonce = uuid::Uuid::new_v4().to_string();
        let payload_hash = match &spec.body {
            // Value 的 Display 输出紧凑 JSON，与 transport 发送的字节一致
            Some(body) => hex::encode(Sha256::digest(body.to_string().as_bytes())),
            None => EMPTY_BODY_SHA256.to_string(),
        };
        let host = spec.host().to_string();

        let authorization = self.sign(
            spec.method.as_str(),
            &spec.path,
            &spec.canonical_query(),
            &host,
            &payload_hash,
            &timestamp,
            &nonce,
        );

        Ok(spec
            .with_header("Host", host)
            .with_header("x-cbr-content-sha256", payload_hash)
            .with_header("x-cbr-date", timestamp)
            .with_header("x-cbr-nonce", nonce)
            .with_header("Authorization", authorization))
    }
}

// ============ Session Token Auth ============

/// Session-token authenticator.
///
/// Obtains the current token from its [`SessionSupplier`] (establishing a
/// session through the shared cache when necessary) and attaches it as the
/// [`SESSION_TOKEN_HEADER`]. On 401 it invalidates the cached session so the
/// retry, and any other request for the same credentials, logs in again.
pub struct SessionTokenAuth {
    sessions: SessionSupplier,
}

impl SessionTokenAuth {
    /// Create an authenticator drawing tokens from `sessions`.
    pub fn new(sessions: SessionSupplier) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl RequestAuthenticator for SessionTokenAuth {
    fn scheme(&self) -> AuthScheme {
        AuthScheme::SessionToken
    }

    async fn authenticate(&self, spec: RequestSpec) -> Result<RequestSpec> {
        let token = self.sessions.current().await?;
        Ok(spec.with_header(SESSION_TOKEN_HEADER, token.value))
    }

    async fn on_unauthorized(&self) {
        self.sessions.invalidate().await;
    }
}

// ============ Auth Retry Policy ============

/// Bounded retry policy for session-authenticated requests rejected with
/// HTTP 401.
///
/// The attempt counter belongs to the originating request: concurrent
/// requests never share a budget, and a fresh request always starts at zero.
///
/// # Default
///
/// The default allows one relogin-and-retry cycle per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRetryPolicy {
    /// Maximum number of relogin-and-retry cycles per request.
    pub max_retries: u32,
}

impl AuthRetryPolicy {
    /// Create a policy allowing `max_retries` cycles per request.
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Whether the request that produced `response` should be retried after
    /// session renewal. `attempt` counts retries already performed for this
    /// request.
    #[must_use]
    pub fn should_retry(&self, response: &ProviderResponse, attempt: u32) -> bool {
        response.status == 401 && attempt < self.max_retries
    }
}

impl Default for AuthRetryPolicy {
    fn default() -> Self {
        Self { max_retries: 1 }
    }
}

// ============ HMAC-SHA256 ============

/// HMAC-SHA256 计算
fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}
