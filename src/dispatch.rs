//! Invocation dispatch
//!
//! [`PipelineDispatcher`] turns a table-described [`Invocation`] into an HTTP
//! exchange: bind, authenticate, execute, classify, parse. [`InterfaceClient`]
//! is the typed front door that looks operations up in an
//! [`InterfaceDescriptor`] and hands invocations to a dispatcher.
//!
//! # design principles
//! - **Table-driven, not reflective** - interfaces are plain
//!   [`InterfaceDescriptor`] values; adding an operation means adding a table
//!   entry, and an unknown operation fails fast naming the available ones
//! - **Declared errors pass, the rest is wrapped** - business errors an
//!   operation declares reach the caller as-is, infrastructure errors always
//!   propagate, anything else becomes [`RuntimeError::Undeclared`]
//! - **Auth retry is bounded** - a 401 under the session scheme invalidates
//!   the cached session and retries at most the configured number of times,
//!   then the authorization failure propagates

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::auth::{AuthRetryPolicy, AuthScheme, RequestAuthenticator};
use crate::error::{Result, RuntimeError};
use crate::invocation::{InterfaceDescriptor, Invocation, OperationSpec};
use crate::traits::{RequestBinder, ResponseParser, Transport};
use crate::types::ProviderResponse;
use crate::utils::log_sanitizer::truncate_for_log;

// ============ Dispatch Trait ============

/// 调度 Trait
///
/// 接收一次不可变的调用描述，返回解析后的响应值。
/// [`InterfaceClient`] 通过该 trait 与具体管道实现解耦。
#[async_trait]
pub trait Dispatch: Send + Sync {
    /// 此 dispatcher 绑定的 provider 名称
    fn provider(&self) -> &str;

    /// 执行一次调用
    async fn dispatch(&self, invocation: Invocation) -> Result<serde_json::Value>;
}

// ============ Interface Client ============

/// Typed front door for one provider interface.
///
/// Holds the interface's operation table and a dispatcher. Two clients are
/// equal when they expose the same interface through an equal dispatcher,
/// which makes clients usable as keys for per-interface bookkeeping.
pub struct InterfaceClient<D> {
    descriptor: Arc<InterfaceDescriptor>,
    dispatcher: D,
}

impl<D: Dispatch> InterfaceClient<D> {
    /// Create a client for `descriptor` backed by `dispatcher`.
    pub fn new(descriptor: InterfaceDescriptor, dispatcher: D) -> Self {
        Self {
            descriptor: Arc::new(descriptor),
            dispatcher,
        }
    }

    /// Name of the interface this client exposes.
    pub fn interface(&self) -> &str {
        self.descriptor.name()
    }

    /// The interface's operation table.
    pub fn descriptor(&self) -> &InterfaceDescriptor {
        &self.descriptor
    }

    /// Invoke `operation` with `args` and return the parsed response value.
    ///
    /// The argument list is copied into the invocation; later mutation of the
    /// caller's buffer cannot affect a dispatch already underway. An unknown
    /// operation name fails with
    /// [`RuntimeError::InvalidParameter`](crate::RuntimeError::InvalidParameter)
    /// listing the operations the interface does have.
    pub async fn call(
        &self,
        operation: &str,
        args: &[serde_json::Value],
    ) -> Result<serde_json::Value> {
        let Some(spec) = self.descriptor.get(operation) else {
            return Err(RuntimeError::InvalidParameter {
                provider: self.dispatcher.provider().to_string(),
                param: "operation".to_string(),
                detail: format!(
                    "unknown operation '{}' on interface '{}', available: {}",
                    operation,
                    self.descriptor.name(),
                    self.descriptor.operation_names().join(", ")
                ),
            });
        };

        let invocation = Invocation::new(self.descriptor.name(), spec.clone(), args);
        self.dispatcher.dispatch(invocation).await
    }

    /// Invoke `operation` and deserialize the response value into `T`.
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        operation: &str,
        args: &[serde_json::Value],
    ) -> Result<T> {
        let value = self.call(operation, args).await?;
        serde_json::from_value(value).map_err(|e| RuntimeError::Parse {
            provider: self.dispatcher.provider().to_string(),
            detail: format!("operation '{operation}' returned an unexpected shape: {e}"),
        })
    }
}

impl<D: Clone> Clone for InterfaceClient<D> {
    fn clone(&self) -> Self {
        Self {
            descriptor: self.descriptor.clone(),
            dispatcher: self.dispatcher.clone(),
        }
    }
}

impl<D: PartialEq> PartialEq for InterfaceClient<D> {
    fn eq(&self, other: &Self) -> bool {
        self.descriptor.name() == other.descriptor.name() && self.dispatcher == other.dispatcher
    }
}

impl<D: Eq> Eq for InterfaceClient<D> {}

impl<D: Hash> Hash for InterfaceClient<D> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.descriptor.name().hash(state);
        self.dispatcher.hash(state);
    }
}

impl<D: std::fmt::Debug> std::fmt::Debug for InterfaceClient<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterfaceClient")
            .field("interface", &self.descriptor.name())
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

// ============ Pipeline Dispatcher ============

/// The standard dispatch pipeline: bind, authenticate, execute, classify,
/// parse.
///
/// Each attempt gets the operation's timeout. A 401 under the session scheme
/// triggers session invalidation and a policy-bounded retry; every other
/// non-2xx status is first offered to the operation's fallback, then
/// classified into the error taxonomy.
#[derive(Clone)]
pub struct PipelineDispatcher {
    provider: String,
    binder: Arc<dyn RequestBinder>,
    authenticator: Arc<dyn RequestAuthenticator>,
    transport: Arc<dyn Transport>,
    parser: Arc<dyn ResponseParser>,
    retry_policy: AuthRetryPolicy,
}

impl PipelineDispatcher {
    /// Assemble a pipeline from its collaborators.
    pub fn new(
        provider: impl Into<String>,
        binder: Arc<dyn RequestBinder>,
        authenticator: Arc<dyn RequestAuthenticator>,
        transport: Arc<dyn Transport>,
        parser: Arc<dyn ResponseParser>,
        retry_policy: AuthRetryPolicy,
    ) -> Self {
        Self {
            provider: provider.into(),
            binder,
            authenticator,
            transport,
            parser,
            retry_policy,
        }
    }

    /// 执行 bind → authenticate → execute → classify → parse 管道
    ///
    /// 认证在重试循环内进行: 会话失效后的重试要拿到新令牌。
    async fn run_pipeline(&self, invocation: &Invocation) -> Result<serde_json::Value> {
        let operation = invocation.operation();
        let spec = self.binder.bind(invocation)?;

        let mut attempt = 0_u32;
        loop {
            let authenticated = self.authenticator.authenticate(spec.clone()).await?;

            let response = match tokio::time::timeout(
                operation.timeout,
                self.transport.execute(&authenticated),
            )
            .await
            {
                Ok(result) => result?,
                Err(_) => {
                    return Err(RuntimeError::Timeout {
                        provider: self.provider.clone(),
                        detail: format!(
                            "operation '{}' did not complete within {:?}",
                            operation.name, operation.timeout
                        ),
                    });
                }
            };

            if self.authenticator.scheme() == AuthScheme::SessionToken
                && self.retry_policy.should_retry(&response, attempt)
            {
                log::warn!(
                    "[{}] Unauthorized (HTTP 401), invalidating session and retrying (attempt {}/{})",
                    self.provider,
                    attempt + 1,
                    self.retry_policy.max_retries
                );
                self.authenticator.on_unauthorized().await;
                attempt += 1;
                continue;
            }

            if !response.is_success() {
                if let Some(value) = operation.fallback.value_for(response.status) {
                    log::debug!(
                        "[{}] Fallback value applied for HTTP {}",
                        self.provider,
                        response.status
                    );
                    return Ok(value);
                }
                return Err(self.classify(operation, &response));
            }

            return self.parser.parse(operation, &response);
        }
    }

    /// 将非 2xx 状态码映射到错误分类
    ///
    /// 429 和 502-504 在 transport 层已转为瞬态错误，不会到达这里。
    fn classify(&self, operation: &OperationSpec, response: &ProviderResponse) -> RuntimeError {
        let raw_message = (!response.body.is_empty()).then(|| response.body.clone());
        match response.status {
            401 | 403 => RuntimeError::AuthorizationDenied {
                provider: self.provider.clone(),
                status: response.status,
                raw_message,
            },
            404 => RuntimeError::NotFound {
                provider: self.provider.clone(),
                resource: operation.name.clone(),
                raw_message,
            },
            500..=599 => RuntimeError::ServerError {
                provider: self.provider.clone(),
                status: response.status,
                detail: truncate_for_log(&response.body),
            },
            status => RuntimeError::Unknown {
                provider: self.provider.clone(),
                status: Some(status),
                raw_message: truncate_for_log(&response.body),
            },
        }
    }
}

#[async_trait]
impl Dispatch for PipelineDispatcher {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn dispatch(&self, invocation: Invocation) -> Result<serde_json::Value> {
        log::debug!("[{}] Dispatching {invocation}", self.provider);

        match self.run_pipeline(&invocation).await {
            Ok(value) => Ok(value),
            Err(e) => {
                let e = map_failure(invocation.operation(), e);
                if e.is_expected() {
                    log::warn!("[{}] {invocation} failed: {e}", self.provider);
                } else {
                    log::error!("[{}] {invocation} failed: {e}", self.provider);
                }
                Err(e)
            }
        }
    }
}

impl PartialEq for PipelineDispatcher {
    fn eq(&self, other: &Self) -> bool {
        self.provider == other.provider
            && arc_addr(&self.binder) == arc_addr(&other.binder)
            && arc_addr(&self.authenticator) == arc_addr(&other.authenticator)
            && arc_addr(&self.transport) == arc_addr(&other.transport)
            && arc_addr(&self.parser) == arc_addr(&other.parser)
            && self.retry_policy == other.retry_policy
    }
}

impl Eq for PipelineDispatcher {}

impl Hash for PipelineDispatcher {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.provider.hash(state);
        arc_addr(&self.binder).hash(state);
        arc_addr(&self.authenticator).hash(state);
        arc_addr(&self.transport).hash(state);
        arc_addr(&self.parser).hash(state);
        self.retry_policy.max_retries.hash(state);
    }
}

impl std::fmt::Debug for PipelineDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineDispatcher")
            .field("provider", &self.provider)
            .field("scheme", &self.authenticator.scheme())
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}

/// 共享组件按数据指针比较（忽略 vtable 指针）
fn arc_addr<T: ?Sized>(arc: &Arc<T>) -> usize {
    Arc::as_ptr(arc).cast::<()>() as usize
}

// ============ Failure Mapping ============

/// 按操作声明映射失败
///
/// 操作声明过的错误种类原样传递；基础设施类错误始终原样传递；
/// 其余包装为 `Undeclared`，且不会重复包装。
fn map_failure(operation: &OperationSpec, error: RuntimeError) -> RuntimeError {
    let kind = error.kind();
    if operation.declares_kind(kind) || kind.is_infrastructure() {
        return error;
    }
    RuntimeError::Undeclared {
        provider: error.provider().to_string(),
        operation: operation.name.clone(),
        source: Box::new(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{HmacRequestSigner, SessionTokenAuth};
    use crate::error::ErrorKind;
    use crate::invocation::Fallback;
    use crate::session::{SessionCache, SessionSupplier};
    use crate::traits::JsonParser;
    use crate::types::{ApiCredentials, Method, RequestSpec, SessionToken};
    use serde::Deserialize;
    use serde_json::{Value, json};
    use std::collections::{HashSet, VecDeque};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::sync::Mutex;

    // ============ 测试夹具 ============

    struct StaticBinder;

    impl RequestBinder for StaticBinder {
        fn bind(&self, invocation: &Invocation) -> Result<RequestSpec> {
            Ok(RequestSpec::new(
                Method::Post,
                "https://api.example.com",
                format!("/{}", invocation.operation().name),
            ))
        }
    }

    struct FailingBinder;

    impl RequestBinder for FailingBinder {
        fn bind(&self, _invocation: &Invocation) -> Result<RequestSpec> {
            Err(RuntimeError::InvalidParameter {
                provider: "test".to_string(),
                param: "name".to_string(),
                detail: "must not be empty".to_string(),
            })
        }
    }

    /// 按脚本顺序应答的 transport, 记录收到的请求
    struct ScriptedTransport {
        replies: Mutex<VecDeque<Result<ProviderResponse>>>,
        seen: Mutex<Vec<RequestSpec>>,
        delay: Duration,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<Result<ProviderResponse>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
                delay: Duration::ZERO,
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        async fn request_count(&self) -> usize {
            self.seen.lock().await.len()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn execute(&self, spec: &RequestSpec) -> Result<ProviderResponse> {
            self.seen.lock().await.push(spec.clone());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.replies
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Ok(ProviderResponse::new(200).with_body("{}")))
        }
    }

    struct CountingAuthority {
        logins: AtomicU32,
    }

    #[async_trait]
    impl crate::traits::SessionAuthority for CountingAuthority {
        async fn login(&self, _credentials: &ApiCredentials) -> Result<SessionToken> {
            let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(SessionToken::new(
                format!("session-{n}"),
                Duration::from_secs(60),
            ))
        }
    }

    fn session_authenticator() -> (Arc<SessionTokenAuth>, Arc<CountingAuthority>) {
        let authority = Arc::new(CountingAuthority {
            logins: AtomicU32::new(0),
        });
        let cache = Arc::new(SessionCache::new("test", authority.clone()));
        let supplier = SessionSupplier::new(cache, ApiCredentials::new("user", "secret"));
        (Arc::new(SessionTokenAuth::new(supplier)), authority)
    }

    fn signing_authenticator() -> Arc<HmacRequestSigner> {
        Arc::new(HmacRequestSigner::new(
            "test",
            ApiCredentials::new("key-id", "key-secret"),
        ))
    }

    fn pipeline(
        transport: Arc<ScriptedTransport>,
        authenticator: Arc<dyn RequestAuthenticator>,
    ) -> PipelineDispatcher {
        PipelineDispatcher::new(
            "test",
            Arc::new(StaticBinder),
            authenticator,
            transport,
            Arc::new(JsonParser::new("test")),
            AuthRetryPolicy::default(),
        )
    }

    fn descriptor_for(operation: OperationSpec) -> InterfaceDescriptor {
        InterfaceDescriptor::new("ServerApi").operation(operation)
    }

    async fn call_one(
        operation: OperationSpec,
        replies: Vec<Result<ProviderResponse>>,
    ) -> (Result<Value>, Arc<ScriptedTransport>) {
        let name = operation.name.clone();
        let transport = Arc::new(ScriptedTransport::new(replies));
        let client = InterfaceClient::new(
            descriptor_for(operation),
            pipeline(transport.clone(), signing_authenticator()),
        );
        let result = client.call(&name, &[]).await;
        (result, transport)
    }

    // ============ 成功路径测试 ============

    #[tokio::test]
    async fn success_returns_parsed_body() {
        let (result, transport) = call_one(
            OperationSpec::new("get_server"),
            vec![Ok(ProviderResponse::new(200).with_body(r#"{"id":"srv-1"}"#))],
        )
        .await;

        assert!(
            matches!(&result, Ok(v) if v == &json!({"id": "srv-1"})),
            "unexpected: {result:?}"
        );
        assert_eq!(transport.request_count().await, 1);
    }

    #[tokio::test]
    async fn call_as_deserializes_response() {
        #[derive(Deserialize, Debug, PartialEq)]
        struct Server {
            id: String,
            status: String,
        }

        let transport = Arc::new(ScriptedTransport::new(vec![Ok(ProviderResponse::new(200)
            .with_body(r#"{"id":"srv-1","status":"RUNNING"}"#))]));
        let client = InterfaceClient::new(
            descriptor_for(OperationSpec::new("get_server")),
            pipeline(transport, signing_authenticator()),
        );

        let result: Result<Server> = client.call_as("get_server", &[]).await;
        assert!(
            matches!(&result, Ok(s) if s.id == "srv-1" && s.status == "RUNNING"),
            "unexpected: {result:?}"
        );
    }

    #[tokio::test]
    async fn signing_scheme_adds_authorization_header() {
        let (_, transport) = call_one(
            OperationSpec::new("get_server"),
            vec![Ok(ProviderResponse::new(200).with_body("{}"))],
        )
        .await;

        let seen = transport.seen.lock().await;
        let auth = seen[0].header("Authorization");
        assert!(
            auth.is_some_and(|a| a.starts_with("CBR1-HMAC-SHA256 ")),
            "unexpected Authorization: {auth:?}"
        );
    }

    // ============ 未知操作测试 ============

    #[tokio::test]
    async fn unknown_operation_lists_available() {
        let descriptor = InterfaceDescriptor::new("ServerApi")
            .operation(OperationSpec::new("get_server"))
            .operation(OperationSpec::new("list_servers"));
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let client =
            InterfaceClient::new(descriptor, pipeline(transport.clone(), signing_authenticator()));

        let result = client.call("destroy_server", &[]).await;

        let Err(RuntimeError::InvalidParameter { detail, .. }) = &result else {
            panic!("expected InvalidParameter, got: {result:?}");
        };
        assert!(detail.contains("destroy_server"), "detail: {detail}");
        assert!(detail.contains("get_server, list_servers"), "detail: {detail}");
        // 未知操作不应产生任何请求
        assert_eq!(transport.request_count().await, 0);
    }

    // ============ 错误分类测试 ============

    #[tokio::test]
    async fn declared_error_passes_unwrapped() {
        let (result, _) = call_one(
            OperationSpec::new("get_server").declares(ErrorKind::NotFound),
            vec![Ok(ProviderResponse::new(404).with_body(r#"{"error":"no such server"}"#))],
        )
        .await;

        let Err(RuntimeError::NotFound { resource, .. }) = &result else {
            panic!("expected NotFound, got: {result:?}");
        };
        assert_eq!(resource, "get_server");
    }

    #[tokio::test]
    async fn undeclared_error_wrapped_with_source() {
        let (result, _) = call_one(
            OperationSpec::new("get_server"),
            vec![Ok(ProviderResponse::new(404))],
        )
        .await;

        let Err(RuntimeError::Undeclared {
            operation, source, ..
        }) = &result
        else {
            panic!("expected Undeclared, got: {result:?}");
        };
        assert_eq!(operation, "get_server");
        assert_eq!(source.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn server_error_is_infrastructure_not_wrapped() {
        let (result, _) = call_one(
            OperationSpec::new("get_server"),
            vec![Ok(ProviderResponse::new(500).with_body("internal"))],
        )
        .await;

        let Err(RuntimeError::ServerError { status, .. }) = &result else {
            panic!("expected ServerError, got: {result:?}");
        };
        assert_eq!(*status, 500);
    }

    #[tokio::test]
    async fn transport_error_passes_through() {
        let (result, _) = call_one(
            OperationSpec::new("get_server"),
            vec![Err(RuntimeError::Transport {
                provider: "test".to_string(),
                detail: "connection refused".to_string(),
            })],
        )
        .await;

        assert!(
            matches!(&result, Err(RuntimeError::Transport { .. })),
            "unexpected: {result:?}"
        );
    }

    #[tokio::test]
    async fn parse_error_passes_through() {
        let (result, _) = call_one(
            OperationSpec::new("get_server"),
            vec![Ok(ProviderResponse::new(200).with_body("not json"))],
        )
        .await;

        assert!(
            matches!(&result, Err(RuntimeError::Parse { .. })),
            "unexpected: {result:?}"
        );
    }

    #[tokio::test]
    async fn binder_failure_wrapped_when_undeclared() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let dispatcher = PipelineDispatcher::new(
            "test",
            Arc::new(FailingBinder),
            signing_authenticator(),
            transport.clone(),
            Arc::new(JsonParser::new("test")),
            AuthRetryPolicy::default(),
        );
        let client = InterfaceClient::new(
            descriptor_for(OperationSpec::new("create_server")),
            dispatcher,
        );

        let result = client.call("create_server", &[]).await;

        let Err(RuntimeError::Undeclared { source, .. }) = &result else {
            panic!("expected Undeclared, got: {result:?}");
        };
        assert_eq!(source.kind(), ErrorKind::InvalidParameter);
        assert_eq!(transport.request_count().await, 0);
    }

    #[tokio::test]
    async fn unclassified_status_maps_to_unknown() {
        let (result, _) = call_one(
            OperationSpec::new("get_server"),
            vec![Ok(ProviderResponse::new(418).with_body("teapot"))],
        )
        .await;

        let Err(RuntimeError::Unknown { status, .. }) = &result else {
            panic!("expected Unknown, got: {result:?}");
        };
        assert_eq!(*status, Some(418));
    }

    // ============ 回退值测试 ============

    #[tokio::test]
    async fn fallback_maps_404_to_null() {
        let (result, _) = call_one(
            OperationSpec::new("get_server").with_fallback(Fallback::null_on_not_found()),
            vec![Ok(ProviderResponse::new(404))],
        )
        .await;

        assert!(matches!(&result, Ok(Value::Null)), "unexpected: {result:?}");
    }

    #[tokio::test]
    async fn fallback_custom_value() {
        let (result, _) = call_one(
            OperationSpec::new("list_servers")
                .with_fallback(Fallback::value_on(&[404], json!({"servers": []}))),
            vec![Ok(ProviderResponse::new(404))],
        )
        .await;

        assert!(
            matches!(&result, Ok(v) if v == &json!({"servers": []})),
            "unexpected: {result:?}"
        );
    }

    #[tokio::test]
    async fn fallback_does_not_cover_other_statuses() {
        let (result, _) = call_one(
            OperationSpec::new("get_server").with_fallback(Fallback::null_on_not_found()),
            vec![Ok(ProviderResponse::new(500))],
        )
        .await;

        assert!(
            matches!(&result, Err(RuntimeError::ServerError { .. })),
            "unexpected: {result:?}"
        );
    }

    // ============ 认证重试测试 ============

    #[tokio::test]
    async fn session_401_invalidates_and_retries_once() {
        let (authenticator, authority) = session_authenticator();
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(ProviderResponse::new(401)),
            Ok(ProviderResponse::new(200).with_body(r#"{"ok":true}"#)),
        ]));
        let client = InterfaceClient::new(
            descriptor_for(OperationSpec::new("get_server")),
            pipeline(transport.clone(), authenticator),
        );

        let result = client.call("get_server", &[]).await;

        assert!(
            matches!(&result, Ok(v) if v == &json!({"ok": true})),
            "unexpected: {result:?}"
        );
        assert_eq!(transport.request_count().await, 2);
        assert_eq!(authority.logins.load(Ordering::SeqCst), 2);

        // 重试请求携带新令牌
        let seen = transport.seen.lock().await;
        assert_eq!(seen[0].header("X-Session-Token"), Some("session-1"));
        assert_eq!(seen[1].header("X-Session-Token"), Some("session-2"));
    }

    #[tokio::test]
    async fn session_401_budget_exhausted_propagates() {
        let (authenticator, authority) = session_authenticator();
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(ProviderResponse::new(401)),
            Ok(ProviderResponse::new(401)),
        ]));
        let client = InterfaceClient::new(
            descriptor_for(OperationSpec::new("get_server")),
            pipeline(transport.clone(), authenticator),
        );

        let result = client.call("get_server", &[]).await;

        let Err(RuntimeError::AuthorizationDenied { status, .. }) = &result else {
            panic!("expected AuthorizationDenied, got: {result:?}");
        };
        assert_eq!(*status, 401);
        assert_eq!(transport.request_count().await, 2);
        assert_eq!(authority.logins.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn session_403_does_not_retry() {
        let (authenticator, authority) = session_authenticator();
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(ProviderResponse::new(403))]));
        let client = InterfaceClient::new(
            descriptor_for(OperationSpec::new("get_server")),
            pipeline(transport.clone(), authenticator),
        );

        let result = client.call("get_server", &[]).await;

        assert!(
            matches!(&result, Err(RuntimeError::AuthorizationDenied { status: 403, .. })),
            "unexpected: {result:?}"
        );
        assert_eq!(transport.request_count().await, 1);
        assert_eq!(authority.logins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn signing_401_does_not_retry() {
        let (result, transport) = call_one(
            OperationSpec::new("get_server"),
            vec![Ok(ProviderResponse::new(401))],
        )
        .await;

        assert!(
            matches!(&result, Err(RuntimeError::AuthorizationDenied { status: 401, .. })),
            "unexpected: {result:?}"
        );
        assert_eq!(transport.request_count().await, 1);
    }

    #[tokio::test]
    async fn sequential_calls_get_fresh_retry_budgets() {
        let (authenticator, _) = session_authenticator();
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(ProviderResponse::new(401)),
            Ok(ProviderResponse::new(200).with_body("{}")),
            Ok(ProviderResponse::new(401)),
            Ok(ProviderResponse::new(200).with_body("{}")),
        ]));
        let client = InterfaceClient::new(
            descriptor_for(OperationSpec::new("get_server")),
            pipeline(transport.clone(), authenticator),
        );

        let first = client.call("get_server", &[]).await;
        let second = client.call("get_server", &[]).await;

        assert!(first.is_ok(), "first call failed: {first:?}");
        assert!(second.is_ok(), "second call failed: {second:?}");
        assert_eq!(transport.request_count().await, 4);
    }

    // ============ 超时测试 ============

    #[tokio::test(start_paused = true)]
    async fn slow_transport_hits_operation_timeout() {
        let transport = Arc::new(
            ScriptedTransport::new(vec![Ok(ProviderResponse::new(200).with_body("{}"))])
                .with_delay(Duration::from_secs(10)),
        );
        let client = InterfaceClient::new(
            descriptor_for(
                OperationSpec::new("get_server").with_timeout(Duration::from_millis(50)),
            ),
            pipeline(transport, signing_authenticator()),
        );

        let result = client.call("get_server", &[]).await;

        let Err(RuntimeError::Timeout { detail, .. }) = &result else {
            panic!("expected Timeout, got: {result:?}");
        };
        assert!(detail.contains("get_server"), "detail: {detail}");
    }

    // ============ 客户端相等性测试 ============

    #[test]
    fn clients_equal_when_interface_and_dispatcher_match() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let dispatcher = pipeline(transport, signing_authenticator());

        let a = InterfaceClient::new(
            descriptor_for(OperationSpec::new("get_server")),
            dispatcher.clone(),
        );
        let b = InterfaceClient::new(
            descriptor_for(OperationSpec::new("get_server")),
            dispatcher.clone(),
        );

        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        set.insert(b);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn clients_differ_by_interface_name() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let dispatcher = pipeline(transport, signing_authenticator());

        let a = InterfaceClient::new(
            InterfaceDescriptor::new("ServerApi").operation(OperationSpec::new("get_server")),
            dispatcher.clone(),
        );
        let b = InterfaceClient::new(
            InterfaceDescriptor::new("VolumeApi").operation(OperationSpec::new("get_server")),
            dispatcher,
        );

        assert_ne!(a, b);
    }

    #[test]
    fn clients_differ_by_dispatcher_components() {
        let a_dispatcher = pipeline(
            Arc::new(ScriptedTransport::new(vec![])),
            signing_authenticator(),
        );
        let b_dispatcher = pipeline(
            Arc::new(ScriptedTransport::new(vec![])),
            signing_authenticator(),
        );

        let a = InterfaceClient::new(descriptor_for(OperationSpec::new("get_server")), a_dispatcher);
        let b = InterfaceClient::new(descriptor_for(OperationSpec::new("get_server")), b_dispatcher);

        assert_ne!(a, b);
    }

    // ============ map_failure 测试 ============

    #[test]
    fn map_failure_keeps_declared() {
        let op = OperationSpec::new("get_server").declares(ErrorKind::NotFound);
        let e = RuntimeError::NotFound {
            provider: "test".to_string(),
            resource: "srv-1".to_string(),
            raw_message: None,
        };
        let mapped = map_failure(&op, e);
        assert_eq!(mapped.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn map_failure_keeps_infrastructure() {
        let op = OperationSpec::new("get_server");
        let e = RuntimeError::Timeout {
            provider: "test".to_string(),
            detail: "slow".to_string(),
        };
        let mapped = map_failure(&op, e);
        assert_eq!(mapped.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn map_failure_keeps_auth_failures() {
        let op = OperationSpec::new("get_server");
        let e = RuntimeError::AuthorizationDenied {
            provider: "test".to_string(),
            status: 403,
            raw_message: None,
        };
        let mapped = map_failure(&op, e);
        assert_eq!(mapped.kind(), ErrorKind::AuthorizationDenied);
    }

    #[test]
    fn map_failure_wraps_undeclared_business_error() {
        let op = OperationSpec::new("get_server");
        let e = RuntimeError::InvalidParameter {
            provider: "test".to_string(),
            param: "zone".to_string(),
            detail: "unknown zone".to_string(),
        };
        let mapped = map_failure(&op, e);

        let RuntimeError::Undeclared {
            provider,
            operation,
            source,
        } = &mapped
        else {
            panic!("expected Undeclared, got: {mapped:?}");
        };
        assert_eq!(provider, "test");
        assert_eq!(operation, "get_server");
        assert_eq!(source.kind(), ErrorKind::InvalidParameter);
    }

    #[test]
    fn map_failure_never_double_wraps() {
        let op = OperationSpec::new("get_server");
        let inner = RuntimeError::NotFound {
            provider: "test".to_string(),
            resource: "srv-1".to_string(),
            raw_message: None,
        };
        let wrapped = RuntimeError::Undeclared {
            provider: "test".to_string(),
            operation: "get_server".to_string(),
            source: Box::new(inner),
        };
        let mapped = map_failure(&op, wrapped);

        let RuntimeError::Undeclared { source, .. } = &mapped else {
            panic!("expected Undeclared, got: {mapped:?}");
        };
        // 内层仍是原始错误, 未出现嵌套的 Undeclared
        assert_eq!(source.kind(), ErrorKind::NotFound);
    }
}
