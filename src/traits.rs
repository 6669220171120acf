use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Result, RuntimeError};
use crate::invocation::{Invocation, OperationSpec};
use crate::types::{ApiCredentials, ProviderResponse, RequestSpec, SessionToken};
use crate::utils::log_sanitizer::truncate_for_log;

/// 请求绑定 Trait
///
/// 各 Provider 绑定实现此 trait，将一次调用映射为该 API 形状的 HTTP 请求。
/// 绑定结果不包含任何认证信息，认证由 authenticator 统一补充。
pub trait RequestBinder: Send + Sync {
    /// 将调用绑定为请求
    ///
    /// 参数不合法时返回 [`RuntimeError::InvalidParameter`]，
    /// 请求体无法编码时返回 [`RuntimeError::Serialization`]。
    fn bind(&self, invocation: &Invocation) -> Result<RequestSpec>;
}

/// 传输 Trait
///
/// 负责把请求发到网络上并返回原始响应。内置实现为
/// [`HttpTransport`](crate::HttpTransport)；测试可注入假实现。
///
/// 约定：瞬态失败（网络、超时、限流）以错误返回，
/// 其余状态码（包括 401/404/5xx）作为 [`ProviderResponse`] 正常返回，
/// 由 dispatcher 统一分类。
#[async_trait]
pub trait Transport: Send + Sync {
    /// 执行请求并返回原始响应
    async fn execute(&self, spec: &RequestSpec) -> Result<ProviderResponse>;
}

/// 响应解析 Trait
///
/// 将成功响应的 body 解析为结果值。默认实现为 [`JsonParser`]；
/// 各 Provider 绑定可实现自己的 envelope 解包逻辑。
pub trait ResponseParser: Send + Sync {
    /// 解析成功响应
    fn parse(&self, operation: &OperationSpec, response: &ProviderResponse) -> Result<Value>;
}

/// 会话签发 Trait
///
/// 用凭证换取新的会话令牌。由 [`SessionCache`](crate::SessionCache) 调用，
/// 缓存保证同一凭证同时只有一个 login 在途，实现方不需要自己去重。
#[async_trait]
pub trait SessionAuthority: Send + Sync {
    /// 登录并签发新令牌
    async fn login(&self, credentials: &ApiCredentials) -> Result<SessionToken>;
}

/// Default [`ResponseParser`]: decodes the response body as JSON.
///
/// Empty bodies (e.g. HTTP 204) parse to `null`. Invalid JSON maps to
/// [`RuntimeError::Parse`] with the raw payload logged in truncated form.
pub struct JsonParser {
    provider: String,
}

impl JsonParser {
    /// Create a parser reporting errors under the given provider name.
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
        }
    }
}

impl ResponseParser for JsonParser {
    fn parse(&self, operation: &OperationSpec, response: &ProviderResponse) -> Result<Value> {
        if response.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&response.body).map_err(|e| {
            log::error!(
                "[{}] JSON parse failed for '{}': {e}",
                self.provider,
                operation.name
            );
            log::error!(
                "[{}] Raw response: {}",
                self.provider,
                truncate_for_log(&response.body)
            );
            RuntimeError::Parse {
                provider: self.provider.clone(),
                detail: e.to_string(),
            }
        })
    }
}
