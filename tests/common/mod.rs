//! 共享测试工具和辅助函数

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use wiremock::MockServer;

use cloud_binding_runtime::{
    ApiCredentials, InterfaceClient, InterfaceDescriptor, Invocation, Method, PipelineDispatcher,
    ProviderRuntime, RequestBinder, RequestSpec, Result, RuntimeBuilder, SessionAuthority,
    SessionToken,
};

/// 断言 `Result` 为 `Ok`，并解包返回内部值（失败则直接让测试失败）。
#[macro_export]
macro_rules! require_ok {
    ($expr:expr $(,)?) => {{
        let res = $expr;
        assert!(res.is_ok(), "expected Ok(..), got {res:?}");
        let Ok(val) = res else {
            return;
        };
        val
    }};
    ($expr:expr, $($msg:tt)+) => {{
        let res = $expr;
        assert!(
            res.is_ok(),
            "{}: {res:?}",
            format_args!($($msg)+)
        );
        let Ok(val) = res else {
            return;
        };
        val
    }};
}

/// 测试凭证
pub fn test_credentials() -> ApiCredentials {
    ApiCredentials::new("test-key-id", "test-key-secret")
}

/// 将操作绑定为 POST /{operation} 的测试 binder
///
/// 第一个调用参数（如果有）作为请求体。
pub struct PathBinder {
    endpoint: String,
}

impl PathBinder {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

impl RequestBinder for PathBinder {
    fn bind(&self, invocation: &Invocation) -> Result<RequestSpec> {
        let mut spec = RequestSpec::new(
            Method::Post,
            self.endpoint.clone(),
            format!("/{}", invocation.operation().name),
        );
        if let Some(body) = invocation.arg(0) {
            spec = spec.with_body(body.clone());
        }
        Ok(spec)
    }
}

/// 计数登录次数的 `SessionAuthority` 测试实现
///
/// 每次登录发放 `session-{n}` 令牌；`fail_first` 可模拟前 N 次登录失败。
pub struct CountingAuthority {
    pub logins: AtomicU32,
    fail_first: u32,
}

impl CountingAuthority {
    pub fn new() -> Self {
        Self {
            logins: AtomicU32::new(0),
            fail_first: 0,
        }
    }

    pub fn failing_first(n: u32) -> Self {
        Self {
            logins: AtomicU32::new(0),
            fail_first: n,
        }
    }

    pub fn login_count(&self) -> u32 {
        self.logins.load(Ordering::SeqCst)
    }
}

impl Default for CountingAuthority {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionAuthority for CountingAuthority {
    async fn login(&self, _credentials: &ApiCredentials) -> Result<SessionToken> {
        let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.fail_first {
            return Err(cloud_binding_runtime::RuntimeError::AuthenticationFailed {
                provider: "mockcloud".to_string(),
                raw_message: Some("login rejected".to_string()),
            });
        }
        Ok(SessionToken::new(
            format!("session-{n}"),
            Duration::from_secs(60),
        ))
    }
}

/// 测试上下文 - 封装 mock 服务器和运行时
pub struct TestContext {
    pub server: MockServer,
    pub runtime: ProviderRuntime,
}

impl TestContext {
    /// 创建使用签名方案的测试上下文
    pub async fn signing() -> Self {
        let server = MockServer::start().await;
        let runtime = Self::builder()
            .build()
            .expect("runtime build should succeed");
        Self { server, runtime }
    }

    /// 创建使用会话令牌方案的测试上下文
    pub async fn session(authority: Arc<CountingAuthority>) -> Self {
        let server = MockServer::start().await;
        let runtime = Self::builder()
            .auth_scheme("session-token")
            .session_authority(authority)
            .build()
            .expect("runtime build should succeed");
        Self { server, runtime }
    }

    fn builder() -> RuntimeBuilder {
        ProviderRuntime::builder("mockcloud").credentials(test_credentials())
    }

    /// 为给定接口创建指向 mock 服务器的 client
    pub fn client(&self, descriptor: InterfaceDescriptor) -> InterfaceClient<PipelineDispatcher> {
        self.runtime
            .client(descriptor, Arc::new(PathBinder::new(self.server.uri())))
    }

    /// 服务器收到的请求列表
    pub async fn requests(&self) -> Vec<wiremock::Request> {
        self.server.received_requests().await.unwrap_or_default()
    }

    /// 读取第 `index` 个请求的指定 header
    pub async fn request_header(&self, index: usize, name: &str) -> Option<String> {
        let requests = self.requests().await;
        requests.get(index).and_then(|r| {
            r.headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(ToString::to_string)
        })
    }
}
